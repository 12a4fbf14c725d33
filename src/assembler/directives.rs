//! Data-segment directive handlers
//!
//! Each handler appends bytes to the data image. `.half` and `.word`
//! align the data pointer before emitting, inserting zero padding.

use byteorder::{ByteOrder, LittleEndian};

use super::statement::Statement;
use super::ParseError;

/// Pad `data` with zeros until its length is a multiple of `alignment`
fn align_to(data: &mut Vec<u8>, alignment: usize) {
    while data.len() % alignment != 0 {
        data.push(0);
    }
}

/// `.byte v, ...`: one byte per value in `-128..=255`
pub fn byte(stmt: &Statement, data: &mut Vec<u8>) -> Result<(), ParseError> {
    for index in 0..stmt.n_operands() {
        let value = stmt.int(index)?;
        if !(-128..=255).contains(&value) {
            return Err(ParseError::bad(
                stmt.operand_loc(index),
                format!("byte value {value} is not in -128..=255"),
            ));
        }
        data.push(value as u8);
    }
    Ok(())
}

/// `.half v, ...`: little-endian halfwords at a 2-byte-aligned address
pub fn half(stmt: &Statement, data: &mut Vec<u8>) -> Result<(), ParseError> {
    align_to(data, 2);
    for index in 0..stmt.n_operands() {
        let value = stmt.int(index)?;
        if !(-32768..=65535).contains(&value) {
            return Err(ParseError::bad(
                stmt.operand_loc(index),
                format!("halfword value {value} is not in -32768..=65535"),
            ));
        }
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value as u16);
        data.extend_from_slice(&buf);
    }
    Ok(())
}

/// `.word v, ...`: little-endian words at a 4-byte-aligned address
pub fn word(stmt: &Statement, data: &mut Vec<u8>) -> Result<(), ParseError> {
    align_to(data, 4);
    for index in 0..stmt.n_operands() {
        let value = stmt.int(index)?;
        if !(i32::MIN as i64..=u32::MAX as i64).contains(&value) {
            return Err(ParseError::bad(
                stmt.operand_loc(index),
                format!("word value {value} does not fit in 32 bits"),
            ));
        }
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value as u32);
        data.extend_from_slice(&buf);
    }
    Ok(())
}

/// `.ascii s, ...`: raw string bytes, no terminator
pub fn ascii(stmt: &Statement, data: &mut Vec<u8>) -> Result<(), ParseError> {
    for index in 0..stmt.n_operands() {
        data.extend_from_slice(stmt.string(index)?);
    }
    Ok(())
}

/// `.asciiz s, ...`: string bytes with a NUL after each
pub fn asciiz(stmt: &Statement, data: &mut Vec<u8>) -> Result<(), ParseError> {
    for index in 0..stmt.n_operands() {
        data.extend_from_slice(stmt.string(index)?);
        data.push(0);
    }
    Ok(())
}

/// `.space n`: advance the data pointer by `n` zero bytes
pub fn space(stmt: &Statement, data: &mut Vec<u8>) -> Result<(), ParseError> {
    stmt.expect_n(1)?;
    let n = stmt.int(0)?;
    if !(0..=i64::from(u32::MAX)).contains(&n) {
        return Err(ParseError::bad(
            stmt.operand_loc(0),
            format!("cannot reserve {n} bytes"),
        ));
    }
    data.resize(data.len() + n as usize, 0);
    Ok(())
}

/// `.align k`: align the data pointer to `2^k`
pub fn align(stmt: &Statement, data: &mut Vec<u8>) -> Result<(), ParseError> {
    stmt.expect_n(1)?;
    let k = stmt.int(0)?;
    if !(0..=16).contains(&k) {
        return Err(ParseError::bad(
            stmt.operand_loc(0),
            format!("alignment exponent {k} is not in 0..=16"),
        ));
    }
    align_to(data, 1 << k);
    Ok(())
}
