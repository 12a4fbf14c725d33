//! End-to-end program scenarios: assemble real MIPS source and observe
//! the interpreter's output, exit codes and failure modes.

use mipsvm::assembler::layout::{MemoryLayout, TEXT_BASE};
use mipsvm::interpreter::{ExecError, Interpreter, IoMode, PipeBuffer, StepEvent};
use mipsvm::source::SourceFile;

fn assemble(sources: &[(&str, &str)]) -> MemoryLayout {
    let files: Vec<SourceFile> = sources
        .iter()
        .map(|(name, text)| SourceFile::from_text(name, text))
        .collect();
    mipsvm::assemble_files(&files).unwrap()
}

fn run(source: &str, input: &[u8]) -> (i32, Vec<u8>) {
    let layout = assemble(&[("test.asm", source)]);
    let mut interp = Interpreter::new(
        IoMode::Syscall,
        PipeBuffer::with_input(input),
        PipeBuffer::new(),
    );
    let code = interp.interpret(&layout).unwrap();
    let output = interp.ostream_mut().take();
    (code, output)
}

#[test]
fn hello_world() {
    let source = r#"
.data
msg: .asciiz "Hello there"

.text

main:
    la $a0, msg         # load the address of the message
    li $v0, 4           # print string
    syscall

    li $v0, 10
    syscall             # exit gracefully
"#;
    let (code, output) = run(source, b"");
    assert_eq!(output, b"Hello there");
    assert_eq!(code, 0);
}

#[test]
fn echo_int() {
    let source = r#"
.data
resp: .asciiz "Your number is: "

.text

main:
    li $v0, 5           # read integer
    syscall
    move $t0, $v0

    la $a0, resp
    li $v0, 4
    syscall

    move $a0, $t0
    li $v0, 1           # print integer
    syscall

    li $a0, '\n'
    li $v0, 11          # print character
    syscall

    li $v0, 10
    syscall
"#;
    let (code, output) = run(source, b"5\n");
    assert_eq!(output, b"Your number is: 5\n");
    assert_eq!(code, 0);
}

#[test]
fn countdown_loop() {
    let source = r#"
.text

main:
    li $t0, 3
    li $t1, -1
loop:
    move $a0, $t0
    li $v0, 1
    syscall
    addi $t0, $t0, -1
    bne $t0, $t1, loop

    li $v0, 10
    syscall
"#;
    let (code, output) = run(source, b"");
    assert_eq!(output, b"3210");
    assert_eq!(code, 0);
}

#[test]
fn mmio_echo_with_incremental_input() {
    let source = r#"
.text

main:
    la $s0, 0xFFFF0000  # terminal register block
poll:
    lw $t0, 0($s0)      # receiver control: Ready in bit 0
    beq $t0, $zero, poll
    lw $t1, 4($s0)      # receiver data; the load clears Ready
    beq $t1, $zero, done
    sw $t1, 12($s0)     # transmitter data
    b poll
done:
    li $v0, 10
    syscall
"#;
    let layout = assemble(&[("mmio.asm", source)]);
    let mut interp = Interpreter::new(IoMode::Mmio, PipeBuffer::new(), PipeBuffer::new());
    interp.init_program(&layout);

    let mut output = Vec::new();
    for &byte in b"dcba\0" {
        interp.istream_mut().feed(&[byte]);
        // give the poll loop a bounded number of steps to consume it
        for _ in 0..64 {
            let event = interp.step().unwrap();
            output.extend(interp.ostream_mut().take());
            if event != StepEvent::Continue {
                assert_eq!(event, StepEvent::Exit(0));
                break;
            }
        }
    }

    assert!(interp.halted());
    assert_eq!(output, b"dcba");
}

#[test]
fn addi_overflow_traps() {
    let source = r#"
.text

main:
    li $t0, 0x7FFFFFFF
    addi $t1, $t0, 1
"#;
    let layout = assemble(&[("overflow.asm", source)]);
    let mut interp = Interpreter::new(IoMode::Syscall, PipeBuffer::new(), PipeBuffer::new());
    let result = interp.interpret(&layout);
    assert!(matches!(result, Err(ExecError::ArithOverflow { location }) if location.line == 6));
}

#[test]
fn label_defined_in_another_file_resolves() {
    let main_file = r#"
.text

main:
    jal shout
    li $v0, 10
    syscall
"#;
    let helper_file = r#"
shout:
    li $a0, '!'
    li $v0, 11
    syscall
    jr $ra
"#;
    let layout = assemble(&[("main.asm", main_file), ("helper.asm", helper_file)]);
    // main is jal + li + syscall, so the helper starts at word 3
    assert_eq!(layout.address_of("shout"), Some(TEXT_BASE + 12));

    let mut interp = Interpreter::new(IoMode::Syscall, PipeBuffer::new(), PipeBuffer::new());
    let code = interp.interpret(&layout).unwrap();
    assert_eq!(interp.ostream_mut().take(), b"!");
    assert_eq!(code, 0);
}

#[test]
fn program_with_data_round_trip() {
    let source = r#"
.data
values: .word 10, 20, 30
sum:    .word 0

.text

main:
    la $t0, values
    lw $t1, 0($t0)
    lw $t2, 4($t0)
    lw $t3, 8($t0)
    add $t4, $t1, $t2
    add $t4, $t4, $t3
    la $t5, sum
    sw $t4, 0($t5)

    move $a0, $t4
    li $v0, 1
    syscall

    li $v0, 10
    syscall
"#;
    let (code, output) = run(source, b"");
    assert_eq!(output, b"60");
    assert_eq!(code, 0);
}

#[test]
fn exit2_carries_its_code_to_the_host() {
    let source = r#"
.text

main:
    li $a0, 42
    li $v0, 17
    syscall
"#;
    let (code, output) = run(source, b"");
    assert_eq!(code, 42);
    assert!(output.is_empty());
}

#[test]
fn stack_is_usable_from_the_start() {
    let source = r#"
.text

main:
    li $t0, 7
    addi $sp, $sp, -4
    sw $t0, 0($sp)
    lw $a0, 0($sp)
    li $v0, 1
    syscall
    li $v0, 10
    syscall
"#;
    let (_, output) = run(source, b"");
    assert_eq!(output, b"7");
}

#[test]
fn read_char_echoes_bytes() {
    let source = r#"
.text

main:
    li $v0, 12          # read character
    syscall
    move $a0, $v0
    li $v0, 11          # print character
    syscall
    li $v0, 10
    syscall
"#;
    let (_, output) = run(source, b"Q");
    assert_eq!(output, b"Q");
}
