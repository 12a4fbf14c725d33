use std::io::{self, Read, Write};
use std::{env, fs};

use mipsvm::interpreter::{ByteStream, Interpreter, IoMode};
use mipsvm::logging::error;
use mipsvm::source::SourceFile;

/// Console input; reads block until the user types something, which the
/// interpreter's blocking mode expects
struct StdinStream(io::Stdin);

impl ByteStream for StdinStream {
    fn read_some(&mut self, buf: &mut [u8]) -> usize {
        self.0.lock().read(buf).unwrap_or(0)
    }

    fn write_some(&mut self, _bytes: &[u8]) {}
}

struct StdoutStream(io::Stdout);

impl ByteStream for StdoutStream {
    fn read_some(&mut self, _buf: &mut [u8]) -> usize {
        0
    }

    fn write_some(&mut self, bytes: &[u8]) {
        let mut out = self.0.lock();
        let _ = out.write_all(bytes);
        let _ = out.flush();
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <program.asm> [more.asm ...]", args[0]);
        std::process::exit(1);
    }

    let mut files = Vec::new();
    for path in &args[1..] {
        let text = fs::read_to_string(path).unwrap_or_else(|e| {
            error(format!("failed to read {}: {}", path, e));
            std::process::exit(3);
        });
        files.push(SourceFile::from_text(path, &text));
    }

    let layout = mipsvm::assemble_files(&files).unwrap_or_else(|e| {
        error(e.to_string());
        std::process::exit(2);
    });

    let mut interpreter = Interpreter::new(
        IoMode::Syscall,
        StdinStream(io::stdin()),
        StdoutStream(io::stdout()),
    );
    match interpreter.interpret(&layout) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error(e.to_string());
            std::process::exit(2);
        }
    }
}
