//! A MIPS32 assembler and interpreter written in Rust, featuring:
//! - a tokenizer with source-accurate diagnostics
//! - a two-pass assembler with pseudo-instruction expansion
//! - an interpreter with syscall and memory-mapped I/O modes

pub mod assembler;
pub mod interpreter;
pub mod logging;
pub mod memory;
pub mod registers;
pub mod source;
pub mod tokenizer;

use std::fmt;

use assembler::ParseError;
use assembler::layout::MemoryLayout;
use interpreter::ExecError;
use source::SourceFile;
use tokenizer::{LexError, Tokenizer};

/// Any failure the crate can surface to a host
#[derive(Debug)]
pub enum Error {
    Lex(LexError),
    Parse(ParseError),
    Exec(ExecError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Lex(e) => e.fmt(f),
            Error::Parse(e) => e.fmt(f),
            Error::Exec(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<LexError> for Error {
    fn from(e: LexError) -> Error {
        Error::Lex(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Error {
        Error::Parse(e)
    }
}

impl From<ExecError> for Error {
    fn from(e: ExecError) -> Error {
        Error::Exec(e)
    }
}

/// Tokenize and assemble an ordered list of source files into a program
/// image
pub fn assemble_files(files: &[SourceFile]) -> Result<MemoryLayout, Error> {
    let tokens = Tokenizer::new().tokenize(files)?;
    Ok(assembler::assemble(&tokens)?)
}
