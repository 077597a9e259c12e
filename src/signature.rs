//! ECDSA signature values, their DER codec and the checksig wire format.

use num::{BigUint, One, Zero};
use thiserror::Error;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_FORKID: u32 = 0x40;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Bits of the scope that select ALL/NONE/SINGLE.
pub const SIGHASH_BASE_MASK: u32 = 0x1f;

/// Half the secp256k1 group order; the largest accepted low-S value.
const HALF_CURVE_ORDER: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b, 0x20, 0xa0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DerError {
    #[error("signature DER must start with 0x30")]
    MissingSequenceTag,
    #[error("DER entity length must fit in a single byte")]
    LongFormLength,
    #[error("DER sequence length does not match the buffer")]
    LengthMismatch,
    #[error("expected an INTEGER tag for {0}")]
    MissingIntegerTag(&'static str),
    #[error("DER buffer ends inside the {0} component")]
    Truncated(&'static str),
    #[error("{0} component is empty")]
    EmptyInteger(&'static str),
    #[error("{0} component has a superfluous leading zero")]
    NonCanonicalPadding(&'static str),
    #[error("signature component of {0} bytes is too long to encode")]
    ComponentTooLong(usize),
    #[error("{0} component is zero")]
    ZeroComponent(&'static str),
}

/// A raw `(r, s)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub r: BigUint,
    pub s: BigUint,
}

impl Signature {
    pub fn new(r: BigUint, s: BigUint) -> Self {
        Self { r, s }
    }

    /// Strict DER decoding: single-byte lengths that exactly consume `der`.
    pub fn from_der(der: &[u8]) -> Result<Self, DerError> {
        let (r, s) = der_components(der)?;
        Ok(Self {
            r: BigUint::from_bytes_be(r),
            s: BigUint::from_bytes_be(s),
        })
    }

    pub fn to_der(&self) -> Result<Vec<u8>, DerError> {
        let r = der_integer(&self.r, "R")?;
        let s = der_integer(&self.s, "S")?;
        let body_len = 2 + r.len() + 2 + s.len();
        for len in [r.len(), s.len(), body_len] {
            if len >= 0x80 {
                return Err(DerError::ComponentTooLong(len));
            }
        }

        let mut out = Vec::with_capacity(2 + body_len);
        out.push(0x30);
        out.push(body_len as u8);
        out.push(0x02);
        out.push(r.len() as u8);
        out.extend_from_slice(&r);
        out.push(0x02);
        out.push(s.len() as u8);
        out.extend_from_slice(&s);
        Ok(out)
    }

    /// True when `1 <= s <= n/2`.
    pub fn has_low_s(&self) -> bool {
        self.s >= BigUint::one() && self.s <= BigUint::from_bytes_be(&HALF_CURVE_ORDER)
    }
}

/// Big-endian magnitude, zero-padded only to keep the sign bit clear.
fn der_integer(value: &BigUint, component: &'static str) -> Result<Vec<u8>, DerError> {
    if value.is_zero() {
        return Err(DerError::ZeroComponent(component));
    }
    let mut bytes = value.to_bytes_be();
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0x00);
    }
    Ok(bytes)
}

struct DerReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    fn byte(&mut self, component: &'static str) -> Result<u8, DerError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DerError::Truncated(component))?;
        self.pos += 1;
        Ok(byte)
    }

    fn length(&mut self, component: &'static str) -> Result<usize, DerError> {
        let len = self.byte(component)?;
        if len & 0x80 != 0 {
            return Err(DerError::LongFormLength);
        }
        Ok(len as usize)
    }

    fn integer(&mut self, component: &'static str) -> Result<&'a [u8], DerError> {
        if self.byte(component)? != 0x02 {
            return Err(DerError::MissingIntegerTag(component));
        }
        let len = self.length(component)?;
        let value = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or(DerError::Truncated(component))?;
        self.pos += len;

        match value {
            [] => Err(DerError::EmptyInteger(component)),
            [0x00, next, ..] if next & 0x80 != 0 => Ok(value),
            [0x00, ..] => Err(DerError::NonCanonicalPadding(component)),
            _ => Ok(value),
        }
    }
}

/// Splits a DER signature into its `R` and `S` integer bytes, sign padding
/// included.
fn der_components(der: &[u8]) -> Result<(&[u8], &[u8]), DerError> {
    let mut reader = DerReader { bytes: der, pos: 0 };
    if reader.byte("sequence")? != 0x30 {
        return Err(DerError::MissingSequenceTag);
    }
    let len = reader.length("sequence")?;
    if reader.pos + len != der.len() {
        return Err(DerError::LengthMismatch);
    }
    let r = reader.integer("R")?;
    let s = reader.integer("S")?;
    if reader.pos != der.len() {
        return Err(DerError::LengthMismatch);
    }
    Ok((r, s))
}

/// Whether `sig` is `DER ‖ scope` with canonical, non-negative components
/// and a total size between 9 and 73 bytes.
pub fn is_checksig_format(sig: &[u8]) -> bool {
    let Some((_, der)) = sig.split_last() else {
        return false;
    };
    if !(8..=72).contains(&der.len()) {
        return false;
    }
    match der_components(der) {
        Ok((r, s)) => r[0] & 0x80 == 0 && s[0] & 0x80 == 0,
        Err(_) => false,
    }
}

/// A signature together with the sighash scope it commits to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionSignature {
    pub signature: Signature,
    pub scope: u32,
}

impl TransactionSignature {
    pub fn new(signature: Signature, scope: u32) -> Self {
        Self { signature, scope }
    }

    /// Decodes `DER ‖ scope`. An empty slice yields the blank placeholder
    /// `(r = 1, s = 1, scope = SIGHASH_ALL)`.
    pub fn from_checksig_format(bytes: &[u8]) -> Result<Self, DerError> {
        let Some((&scope, der)) = bytes.split_last() else {
            return Ok(Self {
                signature: Signature::new(BigUint::one(), BigUint::one()),
                scope: SIGHASH_ALL,
            });
        };
        Ok(Self {
            signature: Signature::from_der(der)?,
            scope: scope as u32,
        })
    }

    /// `DER ‖ scope`, keeping only the low byte of the scope.
    pub fn to_checksig_format(&self) -> Result<Vec<u8>, DerError> {
        let mut out = self.signature.to_der()?;
        out.push(self.scope as u8);
        Ok(out)
    }

    pub fn has_low_s(&self) -> bool {
        self.signature.has_low_s()
    }

    pub fn base_type(&self) -> u32 {
        self.scope & SIGHASH_BASE_MASK
    }

    pub fn has_fork_id(&self) -> bool {
        self.scope & SIGHASH_FORKID != 0
    }

    pub fn anyone_can_pay(&self) -> bool {
        self.scope & SIGHASH_ANYONECANPAY != 0
    }
}
