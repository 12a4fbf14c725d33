//! Executes an assembled program instruction by instruction
//!
//! The interpreter owns the register file and memory for the lifetime of
//! one program and drives a fetch/decode/execute loop over the decoded
//! text segment. The program counter is advanced past an instruction
//! before it executes, and taken branches simply overwrite it: there is
//! no branch-delay-slot emulation, so `beq` taken means the next fetch
//! happens at the branch target. Users comparing traces against real
//! MIPS silicon should expect the delay-slot difference.
//!
//! I/O runs in one of two modes over a pair of caller-supplied byte
//! streams. In [IoMode::Syscall] the `syscall` instruction dispatches on
//! `$v0` for console-style input and output. In [IoMode::Mmio] the
//! interpreter polls the input stream before each fetch and exposes the
//! four memory-mapped terminal registers; `syscall` then only honours
//! the two exit services.
//!
//! [Interpreter::step] is the suspension point: between steps the caller
//! may feed the input stream and drain the output stream. A console read
//! that cannot complete in stepping mode leaves the program counter on
//! the `syscall` and reports [ExecError::InputPending]; the instruction
//! re-executes on the next step.

use std::collections::VecDeque;
use std::fmt;

use crate::assembler::instructions::{Instruction, Op};
use crate::assembler::layout::{
    DATA_BASE, MMIO_BASE, MemoryLayout, RECV_CTRL, RECV_DATA, STACK_TOP, TEXT_BASE, XMIT_CTRL,
    XMIT_DATA,
};
use crate::memory::Memory;
use crate::registers::{A0, A1, RA, Reg, RegisterFile, V0};
use crate::source::SourceLocation;

/// How the interpreter performs input and output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Console services dispatched through the `syscall` instruction
    Syscall,
    /// Memory-mapped terminal registers polled before each step
    Mmio,
}

/// The minimal byte-stream capability both I/O modes consume.
///
/// `read_some` is non-blocking from the interpreter's point of view:
/// returning 0 means nothing is available right now (stepping mode) or
/// end of input (blocking interpretation).
pub trait ByteStream {
    /// Read up to `buf.len()` bytes, returning how many were read
    fn read_some(&mut self, buf: &mut [u8]) -> usize;
    /// Write all of `bytes`
    fn write_some(&mut self, bytes: &[u8]);
}

/// A growable in-memory FIFO usable as either stream end.
///
/// The host feeds bytes with [PipeBuffer::feed] and collects them with
/// [PipeBuffer::take], between steps if it likes.
#[derive(Debug, Default)]
pub struct PipeBuffer {
    queue: VecDeque<u8>,
}

impl PipeBuffer {
    pub fn new() -> PipeBuffer {
        PipeBuffer::default()
    }

    pub fn with_input(bytes: &[u8]) -> PipeBuffer {
        let mut pipe = PipeBuffer::new();
        pipe.feed(bytes);
        pipe
    }

    /// Append bytes for the interpreter to read
    pub fn feed(&mut self, bytes: &[u8]) {
        self.queue.extend(bytes);
    }

    /// Drain everything the interpreter has written
    pub fn take(&mut self) -> Vec<u8> {
        self.queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl ByteStream for PipeBuffer {
    fn read_some(&mut self, buf: &mut [u8]) -> usize {
        let mut count = 0;
        while count < buf.len() {
            match self.queue.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    fn write_some(&mut self, bytes: &[u8]) {
        self.queue.extend(bytes);
    }
}

/// A runtime failure raised by a step
#[derive(Debug, Clone)]
pub enum ExecError {
    /// Load, store or fetch outside any legal segment
    SegFault { address: u32 },
    /// Unaligned word or halfword access
    AlignmentError { address: u32 },
    /// Signed overflow in `add`, `addi` or `sub`
    ArithOverflow { location: SourceLocation },
    /// Unrecognised `$v0` service, or a non-exit service in MMIO mode
    BadSyscall { service: i32, location: SourceLocation },
    /// Stepping mode only: a console read had no input; the program
    /// counter was not advanced and the step should be retried
    InputPending,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::SegFault { address } => {
                write!(f, "segmentation fault at 0x{address:08x}")
            }
            ExecError::AlignmentError { address } => {
                write!(f, "unaligned access at 0x{address:08x}")
            }
            ExecError::ArithOverflow { location } => {
                write!(f, "arithmetic overflow at {location}")
            }
            ExecError::BadSyscall { service, location } => {
                write!(f, "unknown syscall {service} at {location}")
            }
            ExecError::InputPending => {
                write!(f, "input pending; retry the step once input arrives")
            }
        }
    }
}

impl std::error::Error for ExecError {}

/// What a successful step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    Continue,
    /// The program terminated with an exit code. Termination is not an
    /// error; once halted, further steps keep returning the same event.
    Exit(i32),
}

/// The virtual machine state for one program
pub struct Interpreter<I, O> {
    pub regs: RegisterFile,
    pub mem: Memory,
    mode: IoMode,
    istream: I,
    ostream: O,
    text: Vec<Instruction>,
    text_end: u32,
    halted: bool,
    exit_code: i32,
    /// True inside [Interpreter::interpret]: console reads treat stream
    /// exhaustion as end of input instead of raising InputPending
    blocking: bool,
    /// Console input pulled from the stream but not yet consumed
    pending: VecDeque<u8>,
    recv_ready: bool,
    recv_byte: u8,
}

impl<I: ByteStream, O: ByteStream> Interpreter<I, O> {
    pub fn new(mode: IoMode, istream: I, ostream: O) -> Interpreter<I, O> {
        Interpreter {
            regs: RegisterFile::new(),
            mem: Memory::new(),
            mode,
            istream,
            ostream,
            text: Vec::new(),
            text_end: TEXT_BASE,
            halted: false,
            exit_code: 0,
            blocking: false,
            pending: VecDeque::new(),
            recv_ready: false,
            recv_byte: 0,
        }
    }

    /// The input stream, for feeding bytes between steps
    pub fn istream_mut(&mut self) -> &mut I {
        &mut self.istream
    }

    /// The output stream, for draining bytes between steps
    pub fn ostream_mut(&mut self) -> &mut O {
        &mut self.ostream
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Install a program image and reset all execution state.
    ///
    /// Calling this twice with the same layout yields identical
    /// observable state.
    pub fn init_program(&mut self, layout: &MemoryLayout) {
        self.regs.reset();
        self.regs.pc = layout.entry;
        self.regs.set(crate::registers::SP, STACK_TOP as i32);
        self.regs.set(crate::registers::GP, DATA_BASE as i32);
        self.mem = Memory::new();
        self.mem.write_block(DATA_BASE, &layout.data);
        self.text = layout.text.clone();
        self.text_end = layout.text_end();
        self.halted = false;
        self.exit_code = 0;
        self.pending.clear();
        self.recv_ready = false;
        self.recv_byte = 0;
    }

    /// Execute one instruction.
    ///
    /// On [ExecError::InputPending] the program counter is left on the
    /// faulting `syscall` so the read retries next step.
    pub fn step(&mut self) -> Result<StepEvent, ExecError> {
        if self.halted {
            return Ok(StepEvent::Exit(self.exit_code));
        }
        if self.mode == IoMode::Mmio {
            self.poll_receiver();
        }

        let pc = self.regs.pc;
        if pc % 4 != 0 {
            return Err(ExecError::AlignmentError { address: pc });
        }
        if pc == self.text_end {
            // running off the end of text is an implicit exit 0
            self.halted = true;
            return Ok(StepEvent::Exit(0));
        }
        if pc < TEXT_BASE || pc > self.text_end {
            return Err(ExecError::SegFault { address: pc });
        }
        let instruction = self.text[((pc - TEXT_BASE) / 4) as usize].clone();

        self.regs.pc = pc.wrapping_add(4);
        match self.execute(&instruction) {
            Ok(None) => Ok(StepEvent::Continue),
            Ok(Some(code)) => {
                self.halted = true;
                self.exit_code = code;
                Ok(StepEvent::Exit(code))
            }
            Err(ExecError::InputPending) => {
                self.regs.pc = pc;
                Err(ExecError::InputPending)
            }
            Err(error) => Err(error),
        }
    }

    /// Install a layout and step until the program exits, returning its
    /// exit code. Console reads block until data or end of input.
    pub fn interpret(&mut self, layout: &MemoryLayout) -> Result<i32, ExecError> {
        self.init_program(layout);
        self.blocking = true;
        let result = loop {
            match self.step() {
                Ok(StepEvent::Continue) => {}
                Ok(StepEvent::Exit(code)) => break Ok(code),
                Err(error) => break Err(error),
            }
        };
        self.blocking = false;
        result
    }

    /// Execute one decoded instruction; `Some(code)` means an exit
    /// service ran
    fn execute(&mut self, instruction: &Instruction) -> Result<Option<i32>, ExecError> {
        let regs = &mut self.regs;
        match instruction.op {
            Op::Add(rd, rs, rt) => {
                let value = regs.get(rs).checked_add(regs.get(rt)).ok_or_else(|| {
                    ExecError::ArithOverflow {
                        location: instruction.loc.clone(),
                    }
                })?;
                regs.set(rd, value);
            }
            Op::Addu(rd, rs, rt) => regs.set(rd, regs.get(rs).wrapping_add(regs.get(rt))),
            Op::Sub(rd, rs, rt) => {
                let value = regs.get(rs).checked_sub(regs.get(rt)).ok_or_else(|| {
                    ExecError::ArithOverflow {
                        location: instruction.loc.clone(),
                    }
                })?;
                regs.set(rd, value);
            }
            Op::Subu(rd, rs, rt) => regs.set(rd, regs.get(rs).wrapping_sub(regs.get(rt))),
            Op::And(rd, rs, rt) => regs.set(rd, regs.get(rs) & regs.get(rt)),
            Op::Or(rd, rs, rt) => regs.set(rd, regs.get(rs) | regs.get(rt)),
            Op::Xor(rd, rs, rt) => regs.set(rd, regs.get(rs) ^ regs.get(rt)),
            Op::Nor(rd, rs, rt) => regs.set(rd, !(regs.get(rs) | regs.get(rt))),
            Op::Slt(rd, rs, rt) => regs.set(rd, (regs.get(rs) < regs.get(rt)) as i32),
            Op::Sltu(rd, rs, rt) => {
                regs.set(rd, ((regs.get(rs) as u32) < (regs.get(rt) as u32)) as i32)
            }
            Op::Sllv(rd, rt, rs) => {
                let shift = (regs.get(rs) as u32) & 31;
                regs.set(rd, ((regs.get(rt) as u32) << shift) as i32);
            }
            Op::Srlv(rd, rt, rs) => {
                let shift = (regs.get(rs) as u32) & 31;
                regs.set(rd, ((regs.get(rt) as u32) >> shift) as i32);
            }
            Op::Srav(rd, rt, rs) => {
                let shift = (regs.get(rs) as u32) & 31;
                regs.set(rd, regs.get(rt) >> shift);
            }
            Op::Sll(rd, rt, shamt) => regs.set(rd, ((regs.get(rt) as u32) << shamt) as i32),
            Op::Srl(rd, rt, shamt) => regs.set(rd, ((regs.get(rt) as u32) >> shamt) as i32),
            Op::Sra(rd, rt, shamt) => regs.set(rd, regs.get(rt) >> shamt),
            Op::Addi(rt, rs, imm) => {
                let value = regs.get(rs).checked_add(imm as i32).ok_or_else(|| {
                    ExecError::ArithOverflow {
                        location: instruction.loc.clone(),
                    }
                })?;
                regs.set(rt, value);
            }
            Op::Addiu(rt, rs, imm) => regs.set(rt, regs.get(rs).wrapping_add(imm as i32)),
            Op::Slti(rt, rs, imm) => regs.set(rt, (regs.get(rs) < imm as i32) as i32),
            Op::Sltiu(rt, rs, imm) => {
                // the immediate sign-extends, then the compare is unsigned
                regs.set(rt, ((regs.get(rs) as u32) < (imm as i32 as u32)) as i32)
            }
            Op::Andi(rt, rs, imm) => regs.set(rt, ((regs.get(rs) as u32) & imm as u32) as i32),
            Op::Ori(rt, rs, imm) => regs.set(rt, ((regs.get(rs) as u32) | imm as u32) as i32),
            Op::Xori(rt, rs, imm) => regs.set(rt, ((regs.get(rs) as u32) ^ imm as u32) as i32),
            Op::Lui(rt, imm) => regs.set(rt, ((imm as u32) << 16) as i32),
            Op::Mult(rs, rt) => {
                let product = regs.get(rs) as i64 * regs.get(rt) as i64;
                regs.lo = product as i32;
                regs.hi = (product >> 32) as i32;
            }
            Op::Multu(rs, rt) => {
                let product = (regs.get(rs) as u32 as u64) * (regs.get(rt) as u32 as u64);
                regs.lo = product as i32;
                regs.hi = (product >> 32) as i32;
            }
            Op::Div(rs, rt) => {
                // division by zero leaves HI/LO unchanged, matching the
                // unpredictable-but-silent hardware behavior
                let divisor = regs.get(rt);
                if divisor != 0 {
                    regs.lo = regs.get(rs).wrapping_div(divisor);
                    regs.hi = regs.get(rs).wrapping_rem(divisor);
                }
            }
            Op::Divu(rs, rt) => {
                let divisor = regs.get(rt) as u32;
                if divisor != 0 {
                    regs.lo = ((regs.get(rs) as u32) / divisor) as i32;
                    regs.hi = ((regs.get(rs) as u32) % divisor) as i32;
                }
            }
            Op::Mfhi(rd) => regs.set(rd, regs.hi),
            Op::Mflo(rd) => regs.set(rd, regs.lo),
            Op::Mthi(rs) => regs.hi = regs.get(rs),
            Op::Mtlo(rs) => regs.lo = regs.get(rs),
            Op::Lw(rt, offset, base) => {
                let address = self.effective_address(base, offset);
                let value = self.load_word(address)? as i32;
                self.regs.set(rt, value);
            }
            Op::Lh(rt, offset, base) => {
                let address = self.effective_address(base, offset);
                let value = self.load_half(address)? as i16 as i32;
                self.regs.set(rt, value);
            }
            Op::Lhu(rt, offset, base) => {
                let address = self.effective_address(base, offset);
                let value = self.load_half(address)? as i32;
                self.regs.set(rt, value);
            }
            Op::Lb(rt, offset, base) => {
                let address = self.effective_address(base, offset);
                let value = self.load_byte(address)? as i8 as i32;
                self.regs.set(rt, value);
            }
            Op::Lbu(rt, offset, base) => {
                let address = self.effective_address(base, offset);
                let value = self.load_byte(address)? as i32;
                self.regs.set(rt, value);
            }
            Op::Sw(rt, offset, base) => {
                let address = self.effective_address(base, offset);
                let value = self.regs.get(rt) as u32;
                self.store_word(address, value)?;
            }
            Op::Sh(rt, offset, base) => {
                let address = self.effective_address(base, offset);
                let value = self.regs.get(rt) as u16;
                self.store_half(address, value)?;
            }
            Op::Sb(rt, offset, base) => {
                let address = self.effective_address(base, offset);
                let value = self.regs.get(rt) as u8;
                self.store_byte(address, value)?;
            }
            Op::Beq(rs, rt, disp) => {
                if regs.get(rs) == regs.get(rt) {
                    self.branch(disp);
                }
            }
            Op::Bne(rs, rt, disp) => {
                if regs.get(rs) != regs.get(rt) {
                    self.branch(disp);
                }
            }
            Op::Blez(rs, disp) => {
                if regs.get(rs) <= 0 {
                    self.branch(disp);
                }
            }
            Op::Bgtz(rs, disp) => {
                if regs.get(rs) > 0 {
                    self.branch(disp);
                }
            }
            Op::Bltz(rs, disp) => {
                if regs.get(rs) < 0 {
                    self.branch(disp);
                }
            }
            Op::Bgez(rs, disp) => {
                if regs.get(rs) >= 0 {
                    self.branch(disp);
                }
            }
            Op::J(target) => self.regs.pc = target,
            Op::Jal(target) => {
                let link = self.regs.pc;
                self.regs.set(RA, link as i32);
                self.regs.pc = target;
            }
            Op::Jr(rs) => self.regs.pc = self.regs.get(rs) as u32,
            Op::Jalr(rd, rs) => {
                let target = self.regs.get(rs) as u32;
                let link = self.regs.pc;
                self.regs.set(rd, link as i32);
                self.regs.pc = target;
            }
            Op::Syscall => return self.syscall(&instruction.loc),
        }
        Ok(None)
    }

    fn effective_address(&self, base: Reg, offset: i16) -> u32 {
        (self.regs.get(base) as u32).wrapping_add(offset as i32 as u32)
    }

    /// Taken branch: the program counter already points past the branch
    fn branch(&mut self, disp: i16) {
        self.regs.pc = self.regs.pc.wrapping_add((disp as i32 as u32) << 2);
    }

    // ---- memory access, routed through MMIO when enabled ----

    fn is_mmio(address: u32) -> bool {
        (MMIO_BASE..MMIO_BASE + 16).contains(&address)
    }

    fn load_word(&mut self, address: u32) -> Result<u32, ExecError> {
        if self.mode == IoMode::Mmio && Self::is_mmio(address) {
            if address % 4 != 0 {
                return Err(ExecError::AlignmentError { address });
            }
            return Ok(self.mmio_read(address));
        }
        self.mem.load_word(address)
    }

    fn load_half(&mut self, address: u32) -> Result<u16, ExecError> {
        if self.mode == IoMode::Mmio && Self::is_mmio(address) {
            if address % 2 != 0 {
                return Err(ExecError::AlignmentError { address });
            }
            let word = self.mmio_read(address & !3);
            return Ok((word >> (8 * (address & 3))) as u16);
        }
        self.mem.load_half(address)
    }

    fn load_byte(&mut self, address: u32) -> Result<u8, ExecError> {
        if self.mode == IoMode::Mmio && Self::is_mmio(address) {
            let word = self.mmio_read(address & !3);
            return Ok((word >> (8 * (address & 3))) as u8);
        }
        self.mem.load_byte(address)
    }

    fn store_word(&mut self, address: u32, value: u32) -> Result<(), ExecError> {
        if self.mode == IoMode::Mmio && Self::is_mmio(address) {
            if address % 4 != 0 {
                return Err(ExecError::AlignmentError { address });
            }
            self.mmio_write(address, value);
            return Ok(());
        }
        self.mem.store_word(address, value)
    }

    fn store_half(&mut self, address: u32, value: u16) -> Result<(), ExecError> {
        if self.mode == IoMode::Mmio && Self::is_mmio(address) {
            if address % 2 != 0 {
                return Err(ExecError::AlignmentError { address });
            }
            self.mmio_write(address & !3, value as u32);
            return Ok(());
        }
        self.mem.store_half(address, value)
    }

    fn store_byte(&mut self, address: u32, value: u8) -> Result<(), ExecError> {
        if self.mode == IoMode::Mmio && Self::is_mmio(address) {
            self.mmio_write(address & !3, value as u32);
            return Ok(());
        }
        self.mem.store_byte(address, value)
    }

    // ---- memory-mapped terminal ----

    /// Latch one input byte into the receiver if it is idle
    fn poll_receiver(&mut self) {
        if !self.recv_ready {
            let mut buf = [0u8; 1];
            if self.istream.read_some(&mut buf) == 1 {
                self.recv_byte = buf[0];
                self.recv_ready = true;
            }
        }
    }

    fn mmio_read(&mut self, address: u32) -> u32 {
        match address {
            RECV_CTRL => self.recv_ready as u32,
            RECV_DATA => {
                // reading the data register clears the Ready flag
                self.recv_ready = false;
                self.recv_byte as u32
            }
            XMIT_CTRL => 1,
            _ => 0,
        }
    }

    fn mmio_write(&mut self, address: u32, value: u32) {
        // only the transmit data register reacts to stores
        if address == XMIT_DATA {
            self.ostream.write_some(&[value as u8]);
        }
    }

    // ---- syscall services ----

    fn syscall(&mut self, location: &SourceLocation) -> Result<Option<i32>, ExecError> {
        let service = self.regs.get(V0);

        // exit services work in both I/O modes
        match service {
            10 => return Ok(Some(0)),
            17 => return Ok(Some(self.regs.get(A0) & 0xFF)),
            _ => {}
        }
        if self.mode == IoMode::Mmio {
            return Err(ExecError::BadSyscall {
                service,
                location: location.clone(),
            });
        }

        match service {
            1 => {
                let text = self.regs.get(A0).to_string();
                self.ostream.write_some(text.as_bytes());
            }
            4 => {
                let mut address = self.regs.get(A0) as u32;
                let mut bytes = Vec::new();
                loop {
                    let byte = self.mem.load_byte(address)?;
                    if byte == 0 {
                        break;
                    }
                    bytes.push(byte);
                    address = address.wrapping_add(1);
                }
                self.ostream.write_some(&bytes);
            }
            5 => {
                let line = self.read_line()?;
                let text = String::from_utf8_lossy(&line);
                self.regs.set(V0, text.trim().parse::<i32>().unwrap_or(0));
            }
            8 => {
                let address = self.regs.get(A0) as u32;
                let max = self.regs.get(A1);
                if max > 0 {
                    let line = self.read_line_limited(max as usize - 1)?;
                    for (i, &byte) in line.iter().enumerate() {
                        self.mem.store_byte(address.wrapping_add(i as u32), byte)?;
                    }
                    self.mem
                        .store_byte(address.wrapping_add(line.len() as u32), 0)?;
                }
            }
            11 => {
                let byte = self.regs.get(A0) as u8;
                self.ostream.write_some(&[byte]);
            }
            12 => {
                let byte = self.read_byte()?;
                self.regs.set(V0, byte.map_or(0, i32::from));
            }
            _ => {
                return Err(ExecError::BadSyscall {
                    service,
                    location: location.clone(),
                });
            }
        }
        Ok(None)
    }

    // ---- console input plumbing ----

    /// Pull stream bytes until the pending buffer holds a full line.
    ///
    /// Blocking interpretation treats stream exhaustion as end of input
    /// and returns the partial line; stepping mode raises InputPending
    /// and keeps what was buffered for the retry.
    fn read_line(&mut self) -> Result<Vec<u8>, ExecError> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                return Ok(self.pending.drain(..=pos).collect());
            }
            let mut buf = [0u8; 64];
            let count = self.istream.read_some(&mut buf);
            if count == 0 {
                if self.blocking {
                    return Ok(self.pending.drain(..).collect());
                }
                return Err(ExecError::InputPending);
            }
            self.pending.extend(&buf[..count]);
        }
    }

    /// Like [Interpreter::read_line] but never returns more than `max`
    /// bytes; the remainder of the line stays buffered
    fn read_line_limited(&mut self, max: usize) -> Result<Vec<u8>, ExecError> {
        let line = self.read_line()?;
        if line.len() <= max {
            return Ok(line);
        }
        let (taken, rest) = line.split_at(max);
        for &byte in rest.iter().rev() {
            self.pending.push_front(byte);
        }
        Ok(taken.to_vec())
    }

    /// One byte of console input; `None` only at end of input in
    /// blocking interpretation
    fn read_byte(&mut self) -> Result<Option<u8>, ExecError> {
        if let Some(byte) = self.pending.pop_front() {
            return Ok(Some(byte));
        }
        let mut buf = [0u8; 1];
        if self.istream.read_some(&mut buf) == 1 {
            return Ok(Some(buf[0]));
        }
        if self.blocking {
            Ok(None)
        } else {
            Err(ExecError::InputPending)
        }
    }
}
