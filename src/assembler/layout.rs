//! The assembled program image and the fixed segment map

use std::collections::HashMap;

use super::instructions::Instruction;

/// Base address of the text segment
pub const TEXT_BASE: u32 = 0x0040_0000;
/// Base address of the data segment
pub const DATA_BASE: u32 = 0x1001_0000;
/// Initial stack pointer; the stack grows downward from here
pub const STACK_TOP: u32 = 0x7FFF_EFFC;
/// Base address of the memory-mapped I/O region
pub const MMIO_BASE: u32 = 0xFFFF_0000;

/// Receiver control register; bit 0 is the Ready flag
pub const RECV_CTRL: u32 = MMIO_BASE;
/// Receiver data register; the low byte is the received character
pub const RECV_DATA: u32 = MMIO_BASE + 4;
/// Transmitter control register; bit 0 is the Ready flag
pub const XMIT_CTRL: u32 = MMIO_BASE + 8;
/// Transmitter data register; storing the low byte sends it
pub const XMIT_DATA: u32 = MMIO_BASE + 12;

/// An assembled program: decoded text, initial data bytes, symbols and
/// the entry point.
///
/// The layout is immutable once produced; the interpreter copies it into
/// its own register file and memory on `init_program`.
#[derive(Debug, Clone)]
pub struct MemoryLayout {
    /// Decoded instructions, one per word starting at [`TEXT_BASE`]
    pub text: Vec<Instruction>,
    /// Initial bytes of the data segment, starting at [`DATA_BASE`]
    pub data: Vec<u8>,
    /// Label name to absolute address
    pub symbols: HashMap<String, u32>,
    /// Address of the `main` label
    pub entry: u32,
}

impl MemoryLayout {
    /// One past the last text address
    pub fn text_end(&self) -> u32 {
        TEXT_BASE + 4 * self.text.len() as u32
    }

    /// First free address after the data segment, word-aligned
    pub fn heap_base(&self) -> u32 {
        (DATA_BASE + self.data.len() as u32 + 3) & !3
    }

    /// Look up the address a label was assigned
    pub fn address_of(&self, label: &str) -> Option<u32> {
        self.symbols.get(label).copied()
    }
}
