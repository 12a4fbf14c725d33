//! Pseudo-instruction expansion
//!
//! Each pseudo-op expands deterministically into one or two real
//! instructions, so label arithmetic in pass 1 stays exact. `la` always
//! expands to two instructions even for addresses whose upper half is
//! zero, keeping PC-relative reasoning predictable.

use super::instructions::{FixupKind, Op, TextSegment};
use super::statement::{Statement, Target};
use super::ParseError;
use crate::registers::{AT, ZERO};

/// `li $r, imm`: one instruction for 16-bit immediates, `lui`+`ori`
/// otherwise
pub fn li(stmt: &Statement, seg: &mut TextSegment) -> Result<(), ParseError> {
    stmt.expect_n(2)?;
    let rd = stmt.reg(0)?;
    let imm = stmt.int(1)?;
    if !(i32::MIN as i64..=u32::MAX as i64).contains(&imm) {
        return Err(ParseError::bad(
            stmt.operand_loc(1),
            format!("immediate {imm} does not fit in 32 bits"),
        ));
    }
    let bits = imm as u32;
    if let Ok(small) = i16::try_from(imm) {
        seg.emit(Op::Addiu(rd, ZERO, small), stmt.loc.clone());
    } else {
        seg.emit(Op::Lui(rd, (bits >> 16) as u16), stmt.loc.clone());
        seg.emit(Op::Ori(rd, rd, bits as u16), stmt.loc.clone());
    }
    Ok(())
}

/// `la $r, label`: always `lui`+`ori` with the address halves
pub fn la(stmt: &Statement, seg: &mut TextSegment) -> Result<(), ParseError> {
    stmt.expect_n(2)?;
    let rd = stmt.reg(0)?;
    match stmt.target(1)? {
        Target::Addr(addr) => {
            seg.emit(Op::Lui(rd, (addr >> 16) as u16), stmt.loc.clone());
            seg.emit(Op::Ori(rd, rd, addr as u16), stmt.loc.clone());
        }
        Target::Sym(symbol) => {
            seg.fixup(FixupKind::Hi, symbol.clone(), stmt.loc.clone());
            seg.emit(Op::Lui(rd, 0), stmt.loc.clone());
            seg.fixup(FixupKind::Lo, symbol, stmt.loc.clone());
            seg.emit(Op::Ori(rd, rd, 0), stmt.loc.clone());
        }
    }
    Ok(())
}

/// `move $d, $s`: `addu $d, $s, $zero`
pub fn move_(stmt: &Statement, seg: &mut TextSegment) -> Result<(), ParseError> {
    stmt.expect_n(2)?;
    let (rd, rs) = (stmt.reg(0)?, stmt.reg(1)?);
    seg.emit(Op::Addu(rd, rs, ZERO), stmt.loc.clone());
    Ok(())
}

/// `b label`: `beq $zero, $zero, label`
pub fn b(stmt: &Statement, seg: &mut TextSegment) -> Result<(), ParseError> {
    stmt.expect_n(1)?;
    let target = stmt.target(0)?;
    seg.emit_branch(target, stmt.loc.clone(), |d| Op::Beq(ZERO, ZERO, d))
}

/// `bgt`/`blt`/`bge`/`ble`: `slt $at, ..` followed by `bne`/`beq`
pub fn compare_branch(
    stmt: &Statement,
    seg: &mut TextSegment,
    mnemonic: &str,
) -> Result<(), ParseError> {
    stmt.expect_n(3)?;
    let (rs, rt) = (stmt.reg(0)?, stmt.reg(1)?);
    let target = stmt.target(2)?;
    let loc = stmt.loc.clone();

    // blt/bge test rs < rt; bgt/ble swap the comparison
    let slt = match mnemonic {
        "blt" | "bge" => Op::Slt(AT, rs, rt),
        _ => Op::Slt(AT, rt, rs),
    };
    seg.emit(slt, loc.clone());

    match mnemonic {
        // branch when the comparison held
        "blt" | "bgt" => seg.emit_branch(target, loc, |d| Op::Bne(AT, ZERO, d)),
        // branch when it did not
        _ => seg.emit_branch(target, loc, |d| Op::Beq(AT, ZERO, d)),
    }
}

/// `nop`: `sll $zero, $zero, 0`
pub fn nop(stmt: &Statement, seg: &mut TextSegment) -> Result<(), ParseError> {
    stmt.expect_n(0)?;
    seg.emit(Op::Sll(ZERO, ZERO, 0), stmt.loc.clone());
    Ok(())
}
