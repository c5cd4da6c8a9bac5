//! Bitwise operations on 32-bit signed integers.
//!
//! Shift amounts of 32 or more yield 0 (`arshift` yields the sign fill).
//! Bit positions outside 0..=31 are ignored.

/// Arithmetic right shift.
pub fn arshift(value: i32, shift: u32) -> i32 {
    if shift >= 32 {
        if value < 0 { -1 } else { 0 }
    } else {
        value >> shift
    }
}

/// Logical right shift.
pub fn rshift(value: i32, shift: u32) -> i32 {
    (value as u32).checked_shr(shift).unwrap_or(0) as i32
}

pub fn lshift(value: i32, shift: u32) -> i32 {
    (value as u32).checked_shl(shift).unwrap_or(0) as i32
}

/// AND of all operands; `-1` (all ones) for none.
pub fn band(values: &[i32]) -> i32 {
    values.iter().fold(-1, |acc, v| acc & v)
}

pub fn bor(values: &[i32]) -> i32 {
    values.iter().fold(0, |acc, v| acc | v)
}

pub fn bxor(values: &[i32]) -> i32 {
    values.iter().fold(0, |acc, v| acc ^ v)
}

pub fn bnot(value: i32) -> i32 {
    !value
}

/// Value with only bit `pos` set.
pub fn bit(pos: u32) -> i32 {
    lshift(1, pos)
}

fn mask(positions: &[u32]) -> i32 {
    positions.iter().fold(0, |acc, &p| acc | bit(p))
}

/// Set the given bit positions.
pub fn set(value: i32, positions: &[u32]) -> i32 {
    value | mask(positions)
}

/// Clear the given bit positions.
pub fn clear(value: i32, positions: &[u32]) -> i32 {
    value & !mask(positions)
}

pub fn isset(value: i32, pos: u32) -> bool {
    pos < 32 && value & bit(pos) != 0
}

pub fn isclear(value: i32, pos: u32) -> bool {
    !isset(value, pos)
}
