//! The decoded MIPS32 instruction set and the per-mnemonic operand grammars
//!
//! Pass 1 emits [Instruction]s into a [TextSegment]; operands that name a
//! label are emitted with a zero placeholder and a recorded [Fixup] that
//! pass 2 patches once the symbol table is complete.

use super::layout::TEXT_BASE;
use super::pseudo;
use super::statement::{Statement, Target};
use super::{ParseError, ParseErrorKind};
use crate::registers::{self, Reg};
use crate::source::SourceLocation;

/// One decoded MIPS32 instruction.
///
/// Branch payloads are signed word displacements relative to the address
/// of the following instruction; jump payloads are absolute byte
/// addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // rd, rs, rt
    Add(Reg, Reg, Reg),
    Addu(Reg, Reg, Reg),
    Sub(Reg, Reg, Reg),
    Subu(Reg, Reg, Reg),
    And(Reg, Reg, Reg),
    Or(Reg, Reg, Reg),
    Xor(Reg, Reg, Reg),
    Nor(Reg, Reg, Reg),
    Slt(Reg, Reg, Reg),
    Sltu(Reg, Reg, Reg),
    // rd, rt, rs
    Sllv(Reg, Reg, Reg),
    Srlv(Reg, Reg, Reg),
    Srav(Reg, Reg, Reg),
    // rd, rt, shamt
    Sll(Reg, Reg, u8),
    Srl(Reg, Reg, u8),
    Sra(Reg, Reg, u8),
    // rt, rs, imm
    Addi(Reg, Reg, i16),
    Addiu(Reg, Reg, i16),
    Slti(Reg, Reg, i16),
    Sltiu(Reg, Reg, i16),
    Andi(Reg, Reg, u16),
    Ori(Reg, Reg, u16),
    Xori(Reg, Reg, u16),
    Lui(Reg, u16),
    // rs, rt
    Mult(Reg, Reg),
    Multu(Reg, Reg),
    Div(Reg, Reg),
    Divu(Reg, Reg),
    Mfhi(Reg),
    Mflo(Reg),
    Mthi(Reg),
    Mtlo(Reg),
    // rt, offset, base
    Lw(Reg, i16, Reg),
    Lh(Reg, i16, Reg),
    Lhu(Reg, i16, Reg),
    Lb(Reg, i16, Reg),
    Lbu(Reg, i16, Reg),
    Sw(Reg, i16, Reg),
    Sh(Reg, i16, Reg),
    Sb(Reg, i16, Reg),
    // rs, rt, word displacement
    Beq(Reg, Reg, i16),
    Bne(Reg, Reg, i16),
    // rs, word displacement
    Blez(Reg, i16),
    Bgtz(Reg, i16),
    Bltz(Reg, i16),
    Bgez(Reg, i16),
    // absolute target address
    J(u32),
    Jal(u32),
    Jr(Reg),
    // rd, rs
    Jalr(Reg, Reg),
    Syscall,
}

/// An [Op] together with the source position it was parsed from
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub loc: SourceLocation,
}

/// What a recorded fixup patches once its symbol resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    /// A 16-bit branch displacement
    Branch,
    /// A 26-bit-region absolute jump target
    Jump,
    /// The upper half of a label address (`lui` from a `la` expansion)
    Hi,
    /// The lower half of a label address (`ori` from a `la` expansion)
    Lo,
}

/// A deferred symbol reference: instruction `index` in the text segment
/// needs `symbol`'s address patched in during pass 2
#[derive(Debug, Clone)]
pub struct Fixup {
    pub index: usize,
    pub symbol: String,
    pub kind: FixupKind,
    pub loc: SourceLocation,
}

/// The text segment under construction: emitted instructions plus the
/// fixups pass 2 still has to apply
#[derive(Debug, Default)]
pub struct TextSegment {
    pub text: Vec<Instruction>,
    pub fixups: Vec<Fixup>,
}

impl TextSegment {
    /// Address of the next instruction to be emitted
    pub fn pc(&self) -> u32 {
        TEXT_BASE + 4 * self.text.len() as u32
    }

    pub fn emit(&mut self, op: Op, loc: SourceLocation) {
        self.text.push(Instruction { op, loc });
    }

    /// Record a fixup against the instruction about to be emitted
    pub fn fixup(&mut self, kind: FixupKind, symbol: String, loc: SourceLocation) {
        self.fixups.push(Fixup {
            index: self.text.len(),
            symbol,
            kind,
            loc,
        });
    }

    /// Compute the signed word displacement from the branch being emitted
    /// to `target`, validating alignment and range
    pub fn branch_disp(&self, target: u32, loc: &SourceLocation) -> Result<i16, ParseError> {
        branch_disp(self.pc(), target, loc)
    }

    /// Emit a branch to a target that is either symbolic or literal
    pub fn emit_branch(
        &mut self,
        target: Target,
        loc: SourceLocation,
        build: impl FnOnce(i16) -> Op,
    ) -> Result<(), ParseError> {
        match target {
            Target::Addr(addr) => {
                let disp = self.branch_disp(addr, &loc)?;
                self.emit(build(disp), loc);
            }
            Target::Sym(symbol) => {
                self.fixup(FixupKind::Branch, symbol, loc.clone());
                self.emit(build(0), loc);
            }
        }
        Ok(())
    }
}

/// Displacement of `target` relative to the instruction after the branch
/// at `pc`, in words
pub fn branch_disp(pc: u32, target: u32, loc: &SourceLocation) -> Result<i16, ParseError> {
    if target % 4 != 0 {
        return Err(ParseError {
            location: Some(loc.clone()),
            kind: ParseErrorKind::AlignmentError(target),
        });
    }
    let words = (target as i64 - (pc as i64 + 4)) >> 2;
    i16::try_from(words).map_err(|_| ParseError {
        location: Some(loc.clone()),
        kind: ParseErrorKind::BranchOutOfRange(words),
    })
}

/// Validate a jump target: word-aligned and within the 256 MiB region of
/// the instruction after the jump
pub fn jump_target(pc: u32, target: u32, loc: &SourceLocation) -> Result<u32, ParseError> {
    if target % 4 != 0 {
        return Err(ParseError {
            location: Some(loc.clone()),
            kind: ParseErrorKind::AlignmentError(target),
        });
    }
    if (pc.wrapping_add(4) ^ target) & 0xF000_0000 != 0 {
        return Err(ParseError {
            location: Some(loc.clone()),
            kind: ParseErrorKind::JumpOutOfRegion(target),
        });
    }
    Ok(target)
}

/// Parse one text-segment statement and emit the instruction(s) it
/// denotes
pub fn parse(stmt: &Statement, seg: &mut TextSegment) -> Result<(), ParseError> {
    let loc = stmt.loc.clone();
    let mnemonic = stmt.mnemonic.to_ascii_lowercase();
    match mnemonic.as_str() {
        // three registers: rd, rs, rt
        "add" | "addu" | "sub" | "subu" | "and" | "or" | "xor" | "nor" | "slt" | "sltu" => {
            stmt.expect_n(3)?;
            let (rd, rs, rt) = (stmt.reg(0)?, stmt.reg(1)?, stmt.reg(2)?);
            let op = match mnemonic.as_str() {
                "add" => Op::Add(rd, rs, rt),
                "addu" => Op::Addu(rd, rs, rt),
                "sub" => Op::Sub(rd, rs, rt),
                "subu" => Op::Subu(rd, rs, rt),
                "and" => Op::And(rd, rs, rt),
                "or" => Op::Or(rd, rs, rt),
                "xor" => Op::Xor(rd, rs, rt),
                "nor" => Op::Nor(rd, rs, rt),
                "slt" => Op::Slt(rd, rs, rt),
                _ => Op::Sltu(rd, rs, rt),
            };
            seg.emit(op, loc);
        }
        // variable shifts: rd, rt, rs
        "sllv" | "srlv" | "srav" => {
            stmt.expect_n(3)?;
            let (rd, rt, rs) = (stmt.reg(0)?, stmt.reg(1)?, stmt.reg(2)?);
            let op = match mnemonic.as_str() {
                "sllv" => Op::Sllv(rd, rt, rs),
                "srlv" => Op::Srlv(rd, rt, rs),
                _ => Op::Srav(rd, rt, rs),
            };
            seg.emit(op, loc);
        }
        // constant shifts: rd, rt, shamt
        "sll" | "srl" | "sra" => {
            stmt.expect_n(3)?;
            let (rd, rt, sh) = (stmt.reg(0)?, stmt.reg(1)?, stmt.shamt(2)?);
            let op = match mnemonic.as_str() {
                "sll" => Op::Sll(rd, rt, sh),
                "srl" => Op::Srl(rd, rt, sh),
                _ => Op::Sra(rd, rt, sh),
            };
            seg.emit(op, loc);
        }
        // immediate arithmetic: rt, rs, imm (sign-extended)
        "addi" | "addiu" | "slti" | "sltiu" => {
            stmt.expect_n(3)?;
            let (rt, rs, imm) = (stmt.reg(0)?, stmt.reg(1)?, stmt.signed_imm16(2)?);
            let op = match mnemonic.as_str() {
                "addi" => Op::Addi(rt, rs, imm),
                "addiu" => Op::Addiu(rt, rs, imm),
                "slti" => Op::Slti(rt, rs, imm),
                _ => Op::Sltiu(rt, rs, imm),
            };
            seg.emit(op, loc);
        }
        // immediate logic: rt, rs, imm (zero-extended)
        "andi" | "ori" | "xori" => {
            stmt.expect_n(3)?;
            let (rt, rs, imm) = (stmt.reg(0)?, stmt.reg(1)?, stmt.unsigned_imm16(2)?);
            let op = match mnemonic.as_str() {
                "andi" => Op::Andi(rt, rs, imm),
                "ori" => Op::Ori(rt, rs, imm),
                _ => Op::Xori(rt, rs, imm),
            };
            seg.emit(op, loc);
        }
        "lui" => {
            stmt.expect_n(2)?;
            let op = Op::Lui(stmt.reg(0)?, stmt.unsigned_imm16(1)?);
            seg.emit(op, loc);
        }
        "mult" | "multu" | "div" | "divu" => {
            stmt.expect_n(2)?;
            let (rs, rt) = (stmt.reg(0)?, stmt.reg(1)?);
            let op = match mnemonic.as_str() {
                "mult" => Op::Mult(rs, rt),
                "multu" => Op::Multu(rs, rt),
                "div" => Op::Div(rs, rt),
                _ => Op::Divu(rs, rt),
            };
            seg.emit(op, loc);
        }
        "mfhi" | "mflo" | "mthi" | "mtlo" => {
            stmt.expect_n(1)?;
            let r = stmt.reg(0)?;
            let op = match mnemonic.as_str() {
                "mfhi" => Op::Mfhi(r),
                "mflo" => Op::Mflo(r),
                "mthi" => Op::Mthi(r),
                _ => Op::Mtlo(r),
            };
            seg.emit(op, loc);
        }
        // loads and stores: rt, offset(base)
        "lw" | "lh" | "lhu" | "lb" | "lbu" | "sw" | "sh" | "sb" => {
            stmt.expect_n(2)?;
            let rt = stmt.reg(0)?;
            let (offset, base) = stmt.mem(1)?;
            let op = match mnemonic.as_str() {
                "lw" => Op::Lw(rt, offset, base),
                "lh" => Op::Lh(rt, offset, base),
                "lhu" => Op::Lhu(rt, offset, base),
                "lb" => Op::Lb(rt, offset, base),
                "lbu" => Op::Lbu(rt, offset, base),
                "sw" => Op::Sw(rt, offset, base),
                "sh" => Op::Sh(rt, offset, base),
                _ => Op::Sb(rt, offset, base),
            };
            seg.emit(op, loc);
        }
        "beq" | "bne" => {
            stmt.expect_n(3)?;
            let (rs, rt) = (stmt.reg(0)?, stmt.reg(1)?);
            let target = stmt.target(2)?;
            if mnemonic == "beq" {
                seg.emit_branch(target, loc, |d| Op::Beq(rs, rt, d))?;
            } else {
                seg.emit_branch(target, loc, |d| Op::Bne(rs, rt, d))?;
            }
        }
        "blez" | "bgtz" | "bltz" | "bgez" => {
            stmt.expect_n(2)?;
            let rs = stmt.reg(0)?;
            let target = stmt.target(1)?;
            match mnemonic.as_str() {
                "blez" => seg.emit_branch(target, loc, |d| Op::Blez(rs, d))?,
                "bgtz" => seg.emit_branch(target, loc, |d| Op::Bgtz(rs, d))?,
                "bltz" => seg.emit_branch(target, loc, |d| Op::Bltz(rs, d))?,
                _ => seg.emit_branch(target, loc, |d| Op::Bgez(rs, d))?,
            }
        }
        "j" | "jal" => {
            stmt.expect_n(1)?;
            match stmt.target(0)? {
                Target::Addr(addr) => {
                    let target = jump_target(seg.pc(), addr, &loc)?;
                    let op = if mnemonic == "j" {
                        Op::J(target)
                    } else {
                        Op::Jal(target)
                    };
                    seg.emit(op, loc);
                }
                Target::Sym(symbol) => {
                    seg.fixup(FixupKind::Jump, symbol, loc.clone());
                    let op = if mnemonic == "j" { Op::J(0) } else { Op::Jal(0) };
                    seg.emit(op, loc);
                }
            }
        }
        "jr" => {
            stmt.expect_n(1)?;
            let op = Op::Jr(stmt.reg(0)?);
            seg.emit(op, loc);
        }
        "jalr" => {
            // one-operand form defaults the link register to $ra
            let op = match stmt.n_operands() {
                1 => Op::Jalr(registers::RA, stmt.reg(0)?),
                _ => {
                    stmt.expect_n(2)?;
                    Op::Jalr(stmt.reg(0)?, stmt.reg(1)?)
                }
            };
            seg.emit(op, loc);
        }
        "syscall" => {
            stmt.expect_n(0)?;
            seg.emit(Op::Syscall, loc);
        }
        // pseudo-instructions
        "li" => pseudo::li(stmt, seg)?,
        "la" => pseudo::la(stmt, seg)?,
        "move" => pseudo::move_(stmt, seg)?,
        "b" => pseudo::b(stmt, seg)?,
        "bgt" | "blt" | "bge" | "ble" => pseudo::compare_branch(stmt, seg, &mnemonic)?,
        "nop" => pseudo::nop(stmt, seg)?,
        _ => {
            return Err(ParseError::bad(
                loc,
                format!("unknown instruction {}", stmt.mnemonic),
            ));
        }
    }
    Ok(())
}

/// Patch the displacement of a branch emitted against a symbolic target
pub(crate) fn patch_branch(op: &mut Op, disp: i16) {
    match op {
        Op::Beq(_, _, d)
        | Op::Bne(_, _, d)
        | Op::Blez(_, d)
        | Op::Bgtz(_, d)
        | Op::Bltz(_, d)
        | Op::Bgez(_, d) => *d = disp,
        _ => unreachable!("branch fixup against a non-branch"),
    }
}

/// Patch the target of a jump emitted against a symbolic target
pub(crate) fn patch_jump(op: &mut Op, target: u32) {
    match op {
        Op::J(t) | Op::Jal(t) => *t = target,
        _ => unreachable!("jump fixup against a non-jump"),
    }
}

/// Patch a 16-bit immediate produced by a `la` expansion
pub(crate) fn patch_imm16(op: &mut Op, imm: u16) {
    match op {
        Op::Lui(_, i) | Op::Ori(_, _, i) => *i = imm,
        _ => unreachable!("address-half fixup against a non-lui/ori"),
    }
}
