//! Pure-Rust verification of BSV transaction input spends.
//!
//! A [`Spend`] runs an input's unlocking script followed by the locking
//! script of the output it spends, under a [`Policy`], and reports whether
//! the spend is authorised. Failures are [`SpendError`] values carrying the
//! interpreter state at the failing step.
//!
//! The supporting value types are usable on their own: [`Script`] parses and
//! renders ASM, hex and wire bytes; [`Signature`] and
//! [`TransactionSignature`] handle DER and checksig encodings; and
//! [`TransactionSignature::format`] builds the FORKID signature-hash
//! preimage.

pub mod crypto;
pub mod num;
pub mod opcodes;
pub mod policy;
pub mod script;
pub mod sighash;
pub mod signature;
pub mod tx;

mod interpreter;
mod ops;
mod stack;

pub use interpreter::{ErrorKind, ScriptContext, Spend, SpendError, SpendParams};
pub use policy::Policy;
pub use script::{Chunk, Script};
pub use sighash::SighashParams;
pub use signature::{DerError, Signature, TransactionSignature};
pub use tx::{TxInputRef, TxOutput};

use thiserror::Error;

/// Do not enable any verification.
pub const VERIFY_NONE: u32 = 0;
/// Require signatures to use low-S form.
pub const VERIFY_LOW_S: u32 = 1 << 3;
/// Require the extra `OP_CHECKMULTISIG` item to be empty.
pub const VERIFY_NULLDUMMY: u32 = 1 << 4;
/// Require unlocking scripts to be push only.
pub const VERIFY_SIGPUSHONLY: u32 = 1 << 5;
/// Require minimal data encodings.
pub const VERIFY_MINIMALDATA: u32 = 1 << 6;
/// Require a clean stack after evaluation.
pub const VERIFY_CLEANSTACK: u32 = 1 << 8;

/// The standard rule set; equivalent to [`Policy::default`].
pub const VERIFY_STANDARD: u32 =
    VERIFY_LOW_S | VERIFY_NULLDUMMY | VERIFY_SIGPUSHONLY | VERIFY_MINIMALDATA | VERIFY_CLEANSTACK;

/// Errors returned when decoding a script from text or bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid hex: {0:?}")]
    InvalidHex(String),
    #[error("{opcode} at token {index} is missing its length or payload")]
    MissingPushData { opcode: String, index: usize },
    #[error("push at offset {offset} runs past the end of the script")]
    TruncatedPush { offset: usize },
    #[error("{opcode} at token {index} declares length {declared:?} but carries {actual} byte(s)")]
    PushLengthMismatch {
        opcode: String,
        index: usize,
        declared: String,
        actual: usize,
    },
    #[error("{opcode} cannot carry a {len}-byte payload")]
    PushTooLong { opcode: String, len: usize },
}

/// Errors returned when building a script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("push of {len} bytes exceeds the {max}-byte limit")]
    OversizedPush { len: usize, max: usize },
}

/// Verification flags that no [`Policy`] field corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unsupported verification flags: {unsupported:#x}")]
pub struct FlagsError {
    pub unsupported: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::num::cast_to_bool;

    #[test]
    fn truthiness_table() {
        let cases: &[(&[u8], bool)] = &[
            (&[], false),
            (&[0x00], false),
            (&[0x00, 0x00], false),
            (&[0x80], false),
            (&[0x00, 0x80], false),
            (&[0x01], true),
            (&[0x00, 0x01], true),
            (&[0x80, 0x00], true),
            (&[0x81], true),
        ];
        for (bytes, expected) in cases {
            assert_eq!(cast_to_bool(bytes), *expected, "{bytes:02x?}");
        }
    }

    #[test]
    fn public_types_are_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Spend>();
        assert_send_sync::<SpendError>();
        assert_send_sync::<Script>();
        assert_send_sync::<TransactionSignature>();
        assert_send_sync::<Policy>();
    }

    #[test]
    fn standard_flags_cover_every_rule() {
        assert_eq!(Policy::from_flags(VERIFY_STANDARD), Ok(Policy::default()));
        assert_eq!(
            Policy::from_flags(VERIFY_STANDARD | 1).unwrap_err().to_string(),
            "unsupported verification flags: 0x1"
        );
    }
}
