//! [Statement] and its typed operand accessors

use super::{ParseError, ParseErrorKind};
use crate::registers::Reg;
use crate::source::SourceLocation;
use crate::tokenizer::{Token, TokenKind};

/// A branch or jump destination as written in the source: either a label
/// reference or a literal address
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Sym(String),
    Addr(u32),
}

/// One instruction or directive line, lexed into a mnemonic and its
/// comma-separated operand groups.
///
/// An operand group is a run of tokens between commas; `4($sp)` is a
/// single group of four tokens.
#[derive(Debug)]
pub struct Statement<'a> {
    pub mnemonic: &'a str,
    pub loc: SourceLocation,
    operands: Vec<&'a [Token]>,
}

impl<'a> Statement<'a> {
    /// Split the tokens following a mnemonic into operand groups.
    ///
    /// `rest` holds every token on the line after the mnemonic itself,
    /// excluding the newline.
    pub fn new(
        mnemonic: &'a str,
        loc: SourceLocation,
        rest: &'a [Token],
    ) -> Result<Statement<'a>, ParseError> {
        let mut operands = Vec::new();
        let mut start = 0;
        for (i, token) in rest.iter().enumerate() {
            if token.kind == TokenKind::Comma {
                if start == i {
                    return Err(ParseError::bad(token.loc.clone(), "empty operand"));
                }
                operands.push(&rest[start..i]);
                start = i + 1;
            }
        }
        if start < rest.len() {
            operands.push(&rest[start..]);
        } else if !rest.is_empty() {
            let last = &rest[rest.len() - 1];
            return Err(ParseError::bad(last.loc.clone(), "trailing comma"));
        }
        Ok(Statement {
            mnemonic,
            loc,
            operands,
        })
    }

    pub fn n_operands(&self) -> usize {
        self.operands.len()
    }

    /// Require an exact operand count
    pub fn expect_n(&self, n: usize) -> Result<(), ParseError> {
        if self.operands.len() != n {
            return Err(ParseError::bad(
                self.loc.clone(),
                format!(
                    "{} takes {} operand(s), found {}",
                    self.mnemonic,
                    n,
                    self.operands.len()
                ),
            ));
        }
        Ok(())
    }

    fn group(&self, index: usize) -> Result<&'a [Token], ParseError> {
        self.operands.get(index).copied().ok_or_else(|| {
            ParseError::bad(
                self.loc.clone(),
                format!("{} is missing operand {}", self.mnemonic, index + 1),
            )
        })
    }

    /// A single-token operand, with its location for error reporting
    fn single(&self, index: usize) -> Result<&'a Token, ParseError> {
        let group = self.group(index)?;
        match group {
            [token] => Ok(token),
            _ => Err(ParseError::bad(
                group[0].loc.clone(),
                "expected a single operand",
            )),
        }
    }

    pub fn reg(&self, index: usize) -> Result<Reg, ParseError> {
        let token = self.single(index)?;
        match token.kind {
            TokenKind::Register(reg) => Ok(reg),
            _ => Err(ParseError::bad(token.loc.clone(), "expected a register")),
        }
    }

    /// An integer operand; character literals count as their byte value
    pub fn int(&self, index: usize) -> Result<i64, ParseError> {
        let token = self.single(index)?;
        match token.kind {
            TokenKind::Integer(value) => Ok(value),
            TokenKind::Char(byte) => Ok(byte as i64),
            _ => Err(ParseError::bad(token.loc.clone(), "expected an integer")),
        }
    }

    /// A signed 16-bit immediate
    pub fn signed_imm16(&self, index: usize) -> Result<i16, ParseError> {
        let value = self.int(index)?;
        i16::try_from(value).map_err(|_| {
            ParseError::bad(
                self.operand_loc(index),
                format!("immediate {value} does not fit in a signed 16-bit field"),
            )
        })
    }

    /// An unsigned 16-bit immediate (logical immediates zero-extend)
    pub fn unsigned_imm16(&self, index: usize) -> Result<u16, ParseError> {
        let value = self.int(index)?;
        u16::try_from(value).map_err(|_| {
            ParseError::bad(
                self.operand_loc(index),
                format!("immediate {value} does not fit in an unsigned 16-bit field"),
            )
        })
    }

    /// A shift amount in `0..=31`
    pub fn shamt(&self, index: usize) -> Result<u8, ParseError> {
        let value = self.int(index)?;
        if (0..=31).contains(&value) {
            Ok(value as u8)
        } else {
            Err(ParseError::bad(
                self.operand_loc(index),
                format!("shift amount {value} is not in 0..=31"),
            ))
        }
    }

    /// A branch or jump destination: a label reference or a literal address
    pub fn target(&self, index: usize) -> Result<Target, ParseError> {
        let token = self.single(index)?;
        match &token.kind {
            TokenKind::Identifier(name) => Ok(Target::Sym(name.clone())),
            TokenKind::Integer(value) => u32::try_from(*value).map(Target::Addr).map_err(|_| {
                ParseError::bad(token.loc.clone(), format!("address {value} is out of range"))
            }),
            _ => Err(ParseError::bad(
                token.loc.clone(),
                "expected a label or an address",
            )),
        }
    }

    /// A label name, for `.globl` and `la`
    pub fn label_name(&self, index: usize) -> Result<&'a str, ParseError> {
        let token = self.single(index)?;
        match &token.kind {
            TokenKind::Identifier(name) => Ok(name),
            _ => Err(ParseError::bad(token.loc.clone(), "expected a label name")),
        }
    }

    /// A string literal operand
    pub fn string(&self, index: usize) -> Result<&'a [u8], ParseError> {
        let token = self.single(index)?;
        match &token.kind {
            TokenKind::Str(bytes) => Ok(bytes),
            _ => Err(ParseError::bad(
                token.loc.clone(),
                "expected a string literal",
            )),
        }
    }

    /// A memory operand: `offset(base)` or `(base)` with an implied zero
    /// offset
    pub fn mem(&self, index: usize) -> Result<(i16, Reg), ParseError> {
        let group = self.group(index)?;
        let (offset, rest) = match group {
            [
                Token {
                    kind: TokenKind::Integer(value),
                    loc,
                },
                rest @ ..,
            ] => {
                let offset = i16::try_from(*value).map_err(|_| {
                    ParseError::bad(
                        loc.clone(),
                        format!("offset {value} does not fit in a signed 16-bit field"),
                    )
                })?;
                (offset, rest)
            }
            rest => (0, rest),
        };
        match rest {
            [
                Token {
                    kind: TokenKind::LParen,
                    ..
                },
                Token {
                    kind: TokenKind::Register(base),
                    ..
                },
                Token {
                    kind: TokenKind::RParen,
                    ..
                },
            ] => Ok((offset, *base)),
            _ => Err(ParseError::bad(
                group[0].loc.clone(),
                "expected a memory operand of the form offset(base)",
            )),
        }
    }

    /// The location of an operand group, for diagnostics
    pub fn operand_loc(&self, index: usize) -> SourceLocation {
        match self.operands.get(index) {
            Some(group) => group[0].loc.clone(),
            None => self.loc.clone(),
        }
    }
}

impl ParseError {
    /// Shorthand for a [ParseErrorKind::BadOperand] at a location
    pub(crate) fn bad(location: SourceLocation, message: impl Into<String>) -> ParseError {
        ParseError {
            location: Some(location),
            kind: ParseErrorKind::BadOperand(message.into()),
        }
    }
}
