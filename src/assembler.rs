//! Assembles a token stream into an executable memory image in two passes
//!
//! The first pass walks the stream line by line, laying out `.data` bytes
//! and decoded `.text` instructions while collecting the symbol table.
//! Operands that reference a label are emitted with a placeholder and a
//! recorded fixup. The second pass applies the fixups: branch
//! displacements and jump targets are computed and range-checked, and
//! `la` address halves are filled in.
//!
//! Segment state is a three-way machine (`None`, `Data`, `Text`) driven
//! by the `.data` and `.text` directives. Labels bind to the current
//! segment pointer; the text pointer advances four bytes per emitted
//! instruction, including every instruction produced by a pseudo-op
//! expansion, so label arithmetic is exact after pass 1.

pub mod directives;
pub mod instructions;
pub mod layout;
pub mod pseudo;
pub mod statement;

use std::collections::HashMap;
use std::fmt;

use instructions::{FixupKind, TextSegment};
use layout::{DATA_BASE, MemoryLayout, TEXT_BASE};
use statement::Statement;

use crate::source::SourceLocation;
use crate::tokenizer::{Token, TokenKind};

/// A pre-execution failure: layout, operand grammar or symbol resolution
#[derive(Debug, Clone)]
pub struct ParseError {
    /// Absent only for failures with no single source position, such as a
    /// missing entry point
    pub location: Option<SourceLocation>,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    UnknownDirective(String),
    BadOperand(String),
    UndefinedLabel(String),
    DuplicateLabel(String),
    /// Carries the offending displacement in words
    BranchOutOfRange(i64),
    /// Carries the target address
    JumpOutOfRegion(u32),
    /// Carries the misaligned target address
    AlignmentError(u32),
    NoEntryPoint,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = &self.location {
            write!(f, "parse error at {location}: ")?;
        } else {
            write!(f, "parse error: ")?;
        }
        match &self.kind {
            ParseErrorKind::UnknownDirective(name) => write!(f, "unknown directive {name}"),
            ParseErrorKind::BadOperand(message) => write!(f, "{message}"),
            ParseErrorKind::UndefinedLabel(name) => write!(f, "undefined label {name}"),
            ParseErrorKind::DuplicateLabel(name) => write!(f, "duplicate label {name}"),
            ParseErrorKind::BranchOutOfRange(words) => {
                write!(f, "branch displacement of {words} words does not fit in 16 bits")
            }
            ParseErrorKind::JumpOutOfRegion(addr) => {
                write!(f, "jump target 0x{addr:08x} is outside the current 256 MiB region")
            }
            ParseErrorKind::AlignmentError(addr) => {
                write!(f, "target address 0x{addr:08x} is not word-aligned")
            }
            ParseErrorKind::NoEntryPoint => write!(f, "no main label defined"),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    None,
    Data,
    Text,
}

/// Assemble a tokenized program into a [MemoryLayout]
pub fn assemble(tokens: &[Token]) -> Result<MemoryLayout, ParseError> {
    let mut asm = Assembler::new();
    asm.first_pass(tokens)?;
    asm.second_pass()
}

struct Assembler {
    segment: Segment,
    data: Vec<u8>,
    text: TextSegment,
    symbols: HashMap<String, u32>,
    globals: HashMap<String, SourceLocation>,
}

impl Assembler {
    fn new() -> Assembler {
        Assembler {
            segment: Segment::None,
            data: Vec::new(),
            text: TextSegment::default(),
            symbols: HashMap::new(),
            globals: HashMap::new(),
        }
    }

    fn first_pass(&mut self, tokens: &[Token]) -> Result<(), ParseError> {
        let mut i = 0;
        while i < tokens.len() {
            let start = i;
            while i < tokens.len()
                && !matches!(tokens[i].kind, TokenKind::Newline | TokenKind::Eof)
            {
                i += 1;
            }
            let at_end = i >= tokens.len() || tokens[i].kind == TokenKind::Eof;
            self.line(&tokens[start..i])?;
            i += 1;
            if at_end {
                break;
            }
        }
        Ok(())
    }

    fn line(&mut self, line: &[Token]) -> Result<(), ParseError> {
        let mut rest = line;
        while let Some(Token {
            kind: TokenKind::Label(name),
            loc,
        }) = rest.first()
        {
            self.bind_label(name, loc)?;
            rest = &rest[1..];
        }

        match rest.first() {
            None => Ok(()),
            Some(Token {
                kind: TokenKind::Directive(name),
                loc,
            }) => {
                let stmt = Statement::new(name, loc.clone(), &rest[1..])?;
                self.directive(&stmt)
            }
            Some(Token {
                kind: TokenKind::Identifier(name),
                loc,
            }) => {
                if self.segment != Segment::Text {
                    return Err(ParseError::bad(
                        loc.clone(),
                        "instruction outside the .text segment",
                    ));
                }
                let stmt = Statement::new(name, loc.clone(), &rest[1..])?;
                instructions::parse(&stmt, &mut self.text)
            }
            Some(other) => Err(ParseError::bad(
                other.loc.clone(),
                "expected an instruction, directive or label",
            )),
        }
    }

    fn bind_label(&mut self, name: &str, loc: &SourceLocation) -> Result<(), ParseError> {
        let address = match self.segment {
            Segment::Data => DATA_BASE + self.data.len() as u32,
            Segment::Text => self.text.pc(),
            Segment::None => {
                return Err(ParseError::bad(
                    loc.clone(),
                    "label outside a segment; start with .data or .text",
                ));
            }
        };
        if self.symbols.insert(name.to_string(), address).is_some() {
            return Err(ParseError {
                location: Some(loc.clone()),
                kind: ParseErrorKind::DuplicateLabel(name.to_string()),
            });
        }
        Ok(())
    }

    fn directive(&mut self, stmt: &Statement) -> Result<(), ParseError> {
        match stmt.mnemonic {
            ".data" => {
                stmt.expect_n(0)?;
                self.segment = Segment::Data;
                Ok(())
            }
            ".text" => {
                stmt.expect_n(0)?;
                self.segment = Segment::Text;
                Ok(())
            }
            ".globl" => {
                if self.segment != Segment::Text {
                    return Err(ParseError::bad(
                        stmt.loc.clone(),
                        ".globl is only valid in the .text segment",
                    ));
                }
                stmt.expect_n(1)?;
                let name = stmt.label_name(0)?;
                self.globals.insert(name.to_string(), stmt.loc.clone());
                Ok(())
            }
            ".ascii" | ".asciiz" | ".byte" | ".half" | ".word" | ".space" | ".align" => {
                if self.segment != Segment::Data {
                    return Err(ParseError::bad(
                        stmt.loc.clone(),
                        format!("{} is only valid in the .data segment", stmt.mnemonic),
                    ));
                }
                match stmt.mnemonic {
                    ".ascii" => directives::ascii(stmt, &mut self.data),
                    ".asciiz" => directives::asciiz(stmt, &mut self.data),
                    ".byte" => directives::byte(stmt, &mut self.data),
                    ".half" => directives::half(stmt, &mut self.data),
                    ".word" => directives::word(stmt, &mut self.data),
                    ".space" => directives::space(stmt, &mut self.data),
                    _ => directives::align(stmt, &mut self.data),
                }
            }
            other => Err(ParseError {
                location: Some(stmt.loc.clone()),
                kind: ParseErrorKind::UnknownDirective(other.to_string()),
            }),
        }
    }

    fn second_pass(mut self) -> Result<MemoryLayout, ParseError> {
        for fixup in &self.text.fixups {
            let address = match self.symbols.get(&fixup.symbol) {
                Some(&address) => address,
                None => {
                    return Err(ParseError {
                        location: Some(fixup.loc.clone()),
                        kind: ParseErrorKind::UndefinedLabel(fixup.symbol.clone()),
                    });
                }
            };
            let pc = TEXT_BASE + 4 * fixup.index as u32;
            let op = &mut self.text.text[fixup.index].op;
            match fixup.kind {
                FixupKind::Branch => {
                    let disp = instructions::branch_disp(pc, address, &fixup.loc)?;
                    instructions::patch_branch(op, disp);
                }
                FixupKind::Jump => {
                    let target = instructions::jump_target(pc, address, &fixup.loc)?;
                    instructions::patch_jump(op, target);
                }
                FixupKind::Hi => instructions::patch_imm16(op, (address >> 16) as u16),
                FixupKind::Lo => instructions::patch_imm16(op, address as u16),
            }
        }

        let entry = match self.symbols.get("main") {
            Some(&entry) => entry,
            None => {
                return Err(ParseError {
                    location: None,
                    kind: ParseErrorKind::NoEntryPoint,
                });
            }
        };

        for (name, loc) in &self.globals {
            if !self.symbols.contains_key(name) {
                return Err(ParseError {
                    location: Some(loc.clone()),
                    kind: ParseErrorKind::UndefinedLabel(name.clone()),
                });
            }
        }

        Ok(MemoryLayout {
            text: self.text.text,
            data: self.data,
            symbols: self.symbols,
            entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::instructions::Op;
    use super::layout::{DATA_BASE, TEXT_BASE};
    use super::*;
    use crate::registers::Reg;
    use crate::source::SourceFile;
    use crate::tokenizer::Tokenizer;

    fn assemble_source(source: &str) -> Result<MemoryLayout, ParseError> {
        let file = SourceFile::from_text("test.asm", source);
        let tokens = Tokenizer::new()
            .tokenize(std::slice::from_ref(&file))
            .unwrap();
        assemble(&tokens)
    }

    fn ops(layout: &MemoryLayout) -> Vec<Op> {
        layout.text.iter().map(|i| i.op.clone()).collect()
    }

    #[test]
    fn hello_layout() {
        let layout = assemble_source(
            ".data\nmsg: .asciiz \"Hello there\"\n.text\nmain:\n  la $a0, msg\n  li $v0, 4\n  syscall\n",
        )
        .unwrap();
        assert_eq!(&layout.data, b"Hello there\0");
        assert_eq!(layout.address_of("msg"), Some(DATA_BASE));
        assert_eq!(layout.entry, TEXT_BASE);
        assert_eq!(
            ops(&layout),
            vec![
                Op::Lui(Reg(4), (DATA_BASE >> 16) as u16),
                Op::Ori(Reg(4), Reg(4), DATA_BASE as u16),
                Op::Addiu(Reg(2), Reg(0), 4),
                Op::Syscall,
            ]
        );
    }

    #[test]
    fn half_and_word_align_with_padding() {
        let layout = assemble_source(
            ".data\na: .byte 1\nb: .half 2\nc: .byte 3\nd: .word 4\n.text\nmain: nop\n",
        )
        .unwrap();
        // byte, pad, half(le), byte, pad*3, word(le)
        assert_eq!(
            layout.data,
            vec![1, 0, 2, 0, 3, 0, 0, 0, 4, 0, 0, 0]
        );
        assert_eq!(layout.address_of("b"), Some(DATA_BASE + 2));
        assert_eq!(layout.address_of("d"), Some(DATA_BASE + 8));
    }

    #[test]
    fn align_directive_pads_to_power_of_two() {
        let layout =
            assemble_source(".data\n.byte 1\n.align 3\nv: .byte 2\n.text\nmain: nop\n").unwrap();
        assert_eq!(layout.address_of("v"), Some(DATA_BASE + 8));
    }

    #[test]
    fn space_reserves_zero_bytes() {
        let layout =
            assemble_source(".data\nbuf: .space 5\nend: .byte 9\n.text\nmain: nop\n").unwrap();
        assert_eq!(layout.data, vec![0, 0, 0, 0, 0, 9]);
        assert_eq!(layout.address_of("end"), Some(DATA_BASE + 5));
    }

    #[test]
    fn negative_byte_values_wrap_to_two_complement() {
        let layout = assemble_source(".data\nv: .byte -1, 255\n.text\nmain: nop\n").unwrap();
        assert_eq!(layout.data, vec![0xFF, 0xFF]);
    }

    #[test]
    fn duplicate_label_is_rejected() {
        let err = assemble_source(".text\nmain: nop\nmain: nop\n").unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::DuplicateLabel("main".to_string())
        );
    }

    #[test]
    fn undefined_label_is_rejected() {
        let err = assemble_source(".text\nmain: j nowhere\n").unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::UndefinedLabel("nowhere".to_string())
        );
    }

    #[test]
    fn missing_main_is_rejected() {
        let err = assemble_source(".text\nstart: nop\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::NoEntryPoint);
    }

    #[test]
    fn unknown_directive_is_rejected() {
        let err = assemble_source(".text\nmain: nop\n.bogus 1\n").unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::UnknownDirective(".bogus".to_string())
        );
    }

    #[test]
    fn instruction_outside_text_is_rejected() {
        let err = assemble_source("nop\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::BadOperand(_)));
    }

    #[test]
    fn data_directive_in_text_is_rejected() {
        let err = assemble_source(".text\nmain: nop\n.word 1\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::BadOperand(_)));
    }

    #[test]
    fn mnemonics_are_case_insensitive() {
        let layout = assemble_source(".text\nmain: ADD $t0, $t1, $t2\n").unwrap();
        assert_eq!(ops(&layout), vec![Op::Add(Reg(8), Reg(9), Reg(10))]);
    }

    #[test]
    fn forward_branch_resolves() {
        let layout = assemble_source(".text\nmain: beq $t0, $t1, done\nnop\ndone: nop\n").unwrap();
        // done is two instructions past the slot after the branch
        assert_eq!(ops(&layout)[0], Op::Beq(Reg(8), Reg(9), 1));
    }

    #[test]
    fn backward_branch_resolves() {
        let layout = assemble_source(".text\nmain: nop\nloop: nop\nbne $t0, $zero, loop\n").unwrap();
        assert_eq!(ops(&layout)[2], Op::Bne(Reg(8), Reg(0), -2));
    }

    #[test]
    fn branch_displacement_boundaries() {
        // forward displacement of exactly 32767 words is accepted
        let mut source = String::from(".text\nmain: beq $zero, $zero, far\n");
        for _ in 0..32767 {
            source.push_str("nop\n");
        }
        source.push_str("far: nop\n");
        assert!(assemble_source(&source).is_ok());

        // one more word is rejected
        let mut source = String::from(".text\nmain: beq $zero, $zero, far\n");
        for _ in 0..32768 {
            source.push_str("nop\n");
        }
        source.push_str("far: nop\n");
        let err = assemble_source(&source).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::BranchOutOfRange(32768));
    }

    #[test]
    fn backward_branch_displacement_boundaries() {
        // backward displacement of exactly -32768 words is accepted
        let mut source = String::from(".text\nmain: nop\n");
        for _ in 0..32766 {
            source.push_str("nop\n");
        }
        source.push_str("b main\n");
        assert!(assemble_source(&source).is_ok());

        // one more word back is rejected
        let mut source = String::from(".text\nmain: nop\n");
        for _ in 0..32767 {
            source.push_str("nop\n");
        }
        source.push_str("b main\n");
        let err = assemble_source(&source).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::BranchOutOfRange(-32769));
    }

    #[test]
    fn jump_stores_absolute_target() {
        let layout = assemble_source(".text\nmain: nop\nthere: j there\n").unwrap();
        assert_eq!(ops(&layout)[1], Op::J(TEXT_BASE + 4));
    }

    #[test]
    fn jump_across_region_boundary_is_rejected() {
        let err = assemble_source(".text\nmain: j 0x10000000\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::JumpOutOfRegion(0x1000_0000));
    }

    #[test]
    fn li_expands_by_immediate_width() {
        let layout = assemble_source(".text\nmain: li $t0, 10\nli $t1, 0x12345\n").unwrap();
        assert_eq!(
            ops(&layout),
            vec![
                Op::Addiu(Reg(8), Reg(0), 10),
                Op::Lui(Reg(9), 0x1),
                Op::Ori(Reg(9), Reg(9), 0x2345),
            ]
        );
    }

    #[test]
    fn la_always_expands_to_two_instructions() {
        let layout =
            assemble_source(".data\nv: .word 1\n.text\nmain: la $t0, v\nnop\n").unwrap();
        assert_eq!(ops(&layout)[0], Op::Lui(Reg(8), (DATA_BASE >> 16) as u16));
        assert_eq!(ops(&layout)[1], Op::Ori(Reg(8), Reg(8), DATA_BASE as u16));
    }

    #[test]
    fn compare_branch_expansions() {
        let layout = assemble_source(
            ".text\nmain: bgt $t0, $t1, main\nblt $t0, $t1, main\nbge $t0, $t1, main\nble $t0, $t1, main\n",
        )
        .unwrap();
        let at = Reg(1);
        let (t0, t1, zero) = (Reg(8), Reg(9), Reg(0));
        assert_eq!(
            ops(&layout),
            vec![
                Op::Slt(at, t1, t0),
                Op::Bne(at, zero, -2),
                Op::Slt(at, t0, t1),
                Op::Bne(at, zero, -4),
                Op::Slt(at, t0, t1),
                Op::Beq(at, zero, -6),
                Op::Slt(at, t1, t0),
                Op::Beq(at, zero, -8),
            ]
        );
    }

    #[test]
    fn labels_advance_through_pseudo_expansions() {
        let layout =
            assemble_source(".data\nv: .word 1\n.text\nmain: la $t0, v\nafter: nop\n").unwrap();
        assert_eq!(layout.address_of("after"), Some(TEXT_BASE + 8));
    }

    #[test]
    fn globl_of_undefined_symbol_is_rejected() {
        let err = assemble_source(".text\n.globl missing\nmain: nop\n").unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::UndefinedLabel("missing".to_string())
        );
    }

    #[test]
    fn heap_base_is_word_aligned_end_of_data() {
        let layout = assemble_source(".data\n.byte 1, 2, 3\n.text\nmain: nop\n").unwrap();
        assert_eq!(layout.heap_base(), DATA_BASE + 4);
    }
}
