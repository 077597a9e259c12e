//! Script number conventions: little-endian sign-magnitude byte strings.

use thiserror::Error;

/// Default bound on numeric operands, in bytes.
pub const SCRIPTNUM_MAX_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NumError {
    #[error("script number of {len} bytes exceeds the {max}-byte limit")]
    Overflow { len: usize, max: usize },
    #[error("script number is not minimally encoded")]
    NonMinimal,
}

/// Stack truthiness: any set bit other than the final sign bit.
pub fn cast_to_bool(data: &[u8]) -> bool {
    match data.split_last() {
        None => false,
        Some((&last, rest)) => last & 0x7f != 0 || rest.iter().any(|&byte| byte != 0),
    }
}

pub fn encode_num(value: i64) -> Vec<u8> {
    let magnitude = value.unsigned_abs();
    let width = (64 - magnitude.leading_zeros() as usize + 7) / 8;
    let mut out = magnitude.to_le_bytes()[..width].to_vec();

    let sign = if value < 0 { 0x80 } else { 0x00 };
    push_sign(&mut out, sign);
    out
}

/// Decodes without bound checks. Callers must keep `bytes` at 8 bytes or less.
pub fn decode_num(bytes: &[u8]) -> i64 {
    let Some((&top, low)) = bytes.split_last() else {
        return 0;
    };
    let magnitude = low
        .iter()
        .rev()
        .fold(i64::from(top & 0x7f), |acc, &byte| (acc << 8) | i64::from(byte));
    if top & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

pub fn parse_scriptnum(bytes: &[u8], minimal: bool, max_len: usize) -> Result<i64, NumError> {
    if bytes.len() > max_len {
        return Err(NumError::Overflow {
            len: bytes.len(),
            max: max_len,
        });
    }
    if minimal && !is_minimally_encoded(bytes, max_len) {
        return Err(NumError::NonMinimal);
    }
    Ok(decode_num(bytes))
}

pub fn is_minimally_encoded(bytes: &[u8], max_len: usize) -> bool {
    if bytes.len() > max_len {
        return false;
    }
    match bytes {
        [] => true,
        [.., last] if last & 0x7f != 0 => true,
        // A bare sign byte only earns its place when the byte below uses bit 7.
        [.., below, _] => below & 0x80 != 0,
        [_] => false,
    }
}

/// Strips redundant high-order padding while keeping the sign bit.
pub fn minimally_encode(bytes: &[u8]) -> Vec<u8> {
    if is_minimally_encoded(bytes, usize::MAX) {
        return bytes.to_vec();
    }
    let Some((&last, body)) = bytes.split_last() else {
        return Vec::new();
    };
    let mut out = body.to_vec();
    while out.last() == Some(&0) {
        out.pop();
    }
    push_sign(&mut out, last & 0x80);
    out
}

/// Folds `sign` into the top magnitude byte, or appends it when bit 7 is taken.
fn push_sign(magnitude: &mut Vec<u8>, sign: u8) {
    let top_bit_taken = magnitude.last().is_some_and(|top| top & 0x80 != 0);
    if top_bit_taken {
        magnitude.push(sign);
    } else if let Some(top) = magnitude.last_mut() {
        *top |= sign;
    }
}
