use std::{env, fs};

use mipsvm::logging::error;
use mipsvm::source::SourceFile;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <input.asm> [more.asm ...]", args[0]);
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

    println!(
        "text: {} instructions ({} bytes)",
        layout.text.len(),
        4 * layout.text.len()
    );
    println!("data: {} bytes", layout.data.len());
    println!("entry: 0x{:08x}", layout.entry);

    let mut symbols: Vec<(&String, &u32)> = layout.symbols.iter().collect();
    symbols.sort_by_key(|&(_, &address)| address);
    println!("symbols:");
    for (name, address) in symbols {
        println!("  0x{:08x}  {}", address, name);
    }
}
