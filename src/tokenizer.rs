//! Converts MIPS assembly source lines into a typed token stream
//!
//! Each line of each source file is scanned left to right with a single
//! compiled regular expression; every token records the file, line and
//! column it came from. Comments start with a hash (`#`) and continue to
//! the end of the line. A `#` inside a string or character literal does
//! not start a comment.
//!
//! The stream preserves the caller's file order, emits exactly one
//! [`TokenKind::Newline`] per source line and ends with a single
//! [`TokenKind::Eof`].

use std::fmt;

use regex::Regex;

use crate::registers::{self, Reg};
use crate::source::{SourceFile, SourceLocation};

/// One lexical token together with its source position
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: SourceLocation,
}

/// The kinds of token recognised by the tokenizer
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// An assembler directive, stored with its leading dot (`.data`)
    Directive(String),
    /// A label definition: an identifier immediately followed by `:`
    Label(String),
    /// A bare identifier: a mnemonic or a label reference
    Identifier(String),
    /// A register, normalised to its index through the ABI alias table
    Register(Reg),
    Integer(i64),
    Float(f64),
    /// A string literal with escapes decoded
    Str(Vec<u8>),
    /// A character literal with escapes decoded
    Char(u8),
    Comma,
    LParen,
    RParen,
    Colon,
    Newline,
    Eof,
}

/// A tokenizer failure: malformed literal, unknown register, stray character
#[derive(Debug, Clone)]
pub struct LexError {
    pub location: SourceLocation,
    pub message: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lex error at {}: {}", self.location, self.message)
    }
}

impl std::error::Error for LexError {}

/// The lexical scanner.
///
/// Holds the compiled token pattern; one instance can tokenize any number
/// of files.
pub struct Tokenizer {
    pattern: Regex,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Tokenizer::new()
    }
}

impl Tokenizer {
    pub fn new() -> Tokenizer {
        // Alternatives are tried in order; string and character literals
        // come first so that `#`, `$` and punctuation inside them are
        // consumed as part of the literal.
        let pattern = Regex::new(concat!(
            r#""(?:\\.|[^"\\])*""#,                          // string literal
            r"|'(?:\\.|[^'\\])*'",                           // character literal
            r"|\$[A-Za-z0-9]+",                              // register
            r"|[+-]?(?:0[xX][0-9a-fA-F]+|0[bB][01]+|[0-9]+(?:\.[0-9]+)?)", // number
            r"|[A-Za-z_.][A-Za-z0-9_]*",                     // identifier or directive
            r"|[,():]",                                      // punctuation
        ))
        .unwrap();
        Tokenizer { pattern }
    }

    /// Tokenize an ordered list of source files into one linear stream
    pub fn tokenize(&self, files: &[SourceFile]) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        for file in files {
            for index in 0..file.line_count() {
                let line = file.line(index).unwrap_or("");
                self.tokenize_line(file.name(), index + 1, line, &mut tokens)?;
            }
        }
        let eof_loc = match files.last() {
            Some(file) => SourceLocation::new(file.name(), file.line_count(), 1),
            None => SourceLocation::new("", 0, 1),
        };
        tokens.push(Token {
            kind: TokenKind::Eof,
            loc: eof_loc,
        });
        Ok(tokens)
    }

    fn tokenize_line(
        &self,
        file: &str,
        line_number: usize,
        line: &str,
        tokens: &mut Vec<Token>,
    ) -> Result<(), LexError> {
        let bytes = line.as_bytes();
        let mut pos = 0;

        while pos < bytes.len() {
            if bytes[pos].is_ascii_whitespace() {
                pos += 1;
                continue;
            }
            if bytes[pos] == b'#' {
                // comment runs to the end of the line
                break;
            }

            let loc = SourceLocation::new(file, line_number, pos + 1);
            let mat = match self.pattern.find_at(line, pos) {
                Some(mat) if mat.start() == pos => mat,
                _ => {
                    let message = match bytes[pos] {
                        b'"' => "unterminated string literal".to_string(),
                        b'\'' => "unterminated character literal".to_string(),
                        c => format!("stray character '{}'", c as char),
                    };
                    return Err(LexError {
                        location: loc,
                        message,
                    });
                }
            };

            let lexeme = mat.as_str();
            let kind = match bytes[pos] {
                b'"' => {
                    let inner = &lexeme[1..lexeme.len() - 1];
                    TokenKind::Str(decode_escapes(inner, &loc)?)
                }
                b'\'' => {
                    let inner = &lexeme[1..lexeme.len() - 1];
                    let decoded = decode_escapes(inner, &loc)?;
                    if decoded.len() != 1 {
                        return Err(LexError {
                            location: loc,
                            message: format!("character literal '{inner}' is not a single byte"),
                        });
                    }
                    TokenKind::Char(decoded[0])
                }
                b'$' => {
                    let name = &lexeme[1..];
                    match registers::lookup(name) {
                        Some(reg) => TokenKind::Register(reg),
                        None => {
                            return Err(LexError {
                                location: loc,
                                message: format!("unknown register ${name}"),
                            });
                        }
                    }
                }
                b'0'..=b'9' | b'+' | b'-' => parse_number(lexeme, &loc)?,
                b',' => TokenKind::Comma,
                b'(' => TokenKind::LParen,
                b')' => TokenKind::RParen,
                b':' => TokenKind::Colon,
                _ => {
                    // identifier, directive, or a label if a colon follows
                    // with no intervening whitespace
                    if lexeme.starts_with('.') {
                        TokenKind::Directive(lexeme.to_string())
                    } else if bytes.get(mat.end()) == Some(&b':') {
                        pos = mat.end() + 1;
                        tokens.push(Token {
                            kind: TokenKind::Label(lexeme.to_string()),
                            loc,
                        });
                        continue;
                    } else {
                        TokenKind::Identifier(lexeme.to_string())
                    }
                }
            };

            tokens.push(Token { kind, loc });
            pos = mat.end();
        }

        tokens.push(Token {
            kind: TokenKind::Newline,
            loc: SourceLocation::new(file, line_number, line.len() + 1),
        });
        Ok(())
    }
}

fn parse_number(lexeme: &str, loc: &SourceLocation) -> Result<TokenKind, LexError> {
    let (negative, digits) = match lexeme.as_bytes()[0] {
        b'-' => (true, &lexeme[1..]),
        b'+' => (false, &lexeme[1..]),
        _ => (false, lexeme),
    };

    let malformed = || LexError {
        location: loc.clone(),
        message: format!("malformed numeric literal {lexeme}"),
    };

    let magnitude = if digits.len() > 2 && (digits.starts_with("0x") || digits.starts_with("0X")) {
        i64::from_str_radix(&digits[2..], 16).map_err(|_| malformed())?
    } else if digits.len() > 2 && (digits.starts_with("0b") || digits.starts_with("0B")) {
        i64::from_str_radix(&digits[2..], 2).map_err(|_| malformed())?
    } else if digits.contains('.') {
        let value: f64 = digits.parse().map_err(|_| malformed())?;
        return Ok(TokenKind::Float(if negative { -value } else { value }));
    } else {
        digits.parse::<i64>().map_err(|_| malformed())?
    };

    Ok(TokenKind::Integer(if negative { -magnitude } else { magnitude }))
}

/// Decode C-style escapes in a string or character literal body
fn decode_escapes(text: &str, loc: &SourceLocation) -> Result<Vec<u8>, LexError> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    let bad = |message: String| LexError {
        location: loc.clone(),
        message,
    };

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let Some(&escape) = bytes.get(i + 1) else {
            return Err(bad("dangling escape at end of literal".to_string()));
        };
        i += 2;
        match escape {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'0'..=b'7' => {
                // up to three octal digits, the first already consumed
                let mut value = (escape - b'0') as u32;
                let mut count = 1;
                while count < 3 && matches!(bytes.get(i), Some(b'0'..=b'7')) {
                    value = value * 8 + (bytes[i] - b'0') as u32;
                    i += 1;
                    count += 1;
                }
                if value > 0xFF {
                    return Err(bad(format!("octal escape \\{value:o} out of range")));
                }
                out.push(value as u8);
            }
            b'\\' => out.push(b'\\'),
            b'"' => out.push(b'"'),
            b'\'' => out.push(b'\''),
            b'x' => {
                let mut value = 0u32;
                let mut count = 0;
                while count < 2 {
                    match bytes.get(i).copied().map(|c| (c as char).to_digit(16)) {
                        Some(Some(digit)) => {
                            value = value * 16 + digit;
                            i += 1;
                            count += 1;
                        }
                        _ => break,
                    }
                }
                if count == 0 {
                    return Err(bad("\\x escape with no hex digits".to_string()));
                }
                out.push(value as u8);
            }
            other => {
                return Err(bad(format!("unknown escape \\{}", other as char)));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize_str(text: &str) -> Result<Vec<Token>, LexError> {
        let file = SourceFile::from_text("test.asm", text);
        Tokenizer::new().tokenize(std::slice::from_ref(&file))
    }

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize_str(text)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn registers_normalise_to_indices() {
        let toks = kinds("add $t0, $s1, $31");
        assert_eq!(
            toks,
            vec![
                TokenKind::Identifier("add".to_string()),
                TokenKind::Register(Reg(8)),
                TokenKind::Comma,
                TokenKind::Register(Reg(17)),
                TokenKind::Comma,
                TokenKind::Register(Reg(31)),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn integer_bases() {
        assert_eq!(
            kinds("1 -42 0x1F 0b101 -0x10"),
            vec![
                TokenKind::Integer(1),
                TokenKind::Integer(-42),
                TokenKind::Integer(0x1F),
                TokenKind::Integer(5),
                TokenKind::Integer(-16),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn float_literal() {
        assert_eq!(
            kinds("3.14"),
            vec![TokenKind::Float(3.14), TokenKind::Newline, TokenKind::Eof]
        );
    }

    #[test]
    fn labels_and_directives() {
        assert_eq!(
            kinds(".data\nmsg: .asciiz \"hi\""),
            vec![
                TokenKind::Directive(".data".to_string()),
                TokenKind::Newline,
                TokenKind::Label("msg".to_string()),
                TokenKind::Directive(".asciiz".to_string()),
                TokenKind::Str(b"hi".to_vec()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn detached_colon_is_its_own_token() {
        assert_eq!(
            kinds("loop :"),
            vec![
                TokenKind::Identifier("loop".to_string()),
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes_decode() {
        assert_eq!(
            kinds(r#""a\tb\n\x41\101\0""#),
            vec![
                TokenKind::Str(b"a\tb\nAA\0".to_vec()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn char_literals() {
        assert_eq!(
            kinds(r"'a' '\n' '\''"),
            vec![
                TokenKind::Char(b'a'),
                TokenKind::Char(b'\n'),
                TokenKind::Char(b'\''),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_stripped() {
        assert_eq!(
            kinds("add $t0, $t0, 1 # increment"),
            vec![
                TokenKind::Identifier("add".to_string()),
                TokenKind::Register(Reg(8)),
                TokenKind::Comma,
                TokenKind::Register(Reg(8)),
                TokenKind::Comma,
                TokenKind::Integer(1),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn hash_inside_string_is_not_a_comment() {
        assert_eq!(
            kinds(r##".asciiz "a # b""##),
            vec![
                TokenKind::Directive(".asciiz".to_string()),
                TokenKind::Str(b"a # b".to_vec()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn locations_are_one_indexed() {
        let toks = tokenize_str("main:\n  li $v0, 10").unwrap();
        assert_eq!(toks[0].loc, SourceLocation::new("test.asm", 1, 1));
        // `li` sits at line 2, column 3
        assert_eq!(toks[2].loc, SourceLocation::new("test.asm", 2, 3));
        // `$v0` follows at column 6
        assert_eq!(toks[3].loc, SourceLocation::new("test.asm", 2, 6));
    }

    #[test]
    fn cross_file_order_is_preserved() {
        let a = SourceFile::from_text("a.asm", "one");
        let b = SourceFile::from_text("b.asm", "two");
        let toks = Tokenizer::new().tokenize(&[a, b]).unwrap();
        assert_eq!(toks[0].kind, TokenKind::Identifier("one".to_string()));
        assert_eq!(toks[0].loc.file, "a.asm");
        assert_eq!(toks[2].kind, TokenKind::Identifier("two".to_string()));
        assert_eq!(toks[2].loc.file, "b.asm");
        assert_eq!(toks.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn unknown_register_is_a_lex_error() {
        let err = tokenize_str("add $q9, $t0, $t1").unwrap_err();
        assert!(err.message.contains("unknown register"));
        assert_eq!(err.location.column, 5);
    }

    #[test]
    fn unterminated_string_is_a_lex_error() {
        let err = tokenize_str(".asciiz \"oops").unwrap_err();
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn stray_character_is_a_lex_error() {
        let err = tokenize_str("add $t0, @, $t1").unwrap_err();
        assert!(err.message.contains("stray character"));
        assert_eq!(err.location.column, 10);
    }
}
