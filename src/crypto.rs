//! Hashing and ECDSA verification backed by `bitcoin::hashes` and
//! `bitcoin::secp256k1`.

use std::sync::OnceLock;

use bitcoin::{
    hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash},
    secp256k1::{self, ecdsa, Message, PublicKey, Secp256k1},
};

use crate::signature::Signature;

type VerificationContext = Secp256k1<secp256k1::VerifyOnly>;

static SECP256K1: OnceLock<VerificationContext> = OnceLock::new();

fn with_secp256k1_verification_ctx<R>(f: impl FnOnce(&VerificationContext) -> R) -> R {
    f(SECP256K1.get_or_init(Secp256k1::verification_only))
}

pub fn sha1(data: &[u8]) -> [u8; 20] {
    sha1::Hash::hash(data).to_byte_array()
}

pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    ripemd160::Hash::hash(data).to_byte_array()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(data).to_byte_array()
}

/// RIPEMD160(SHA256(data)).
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

/// SHA256(SHA256(data)).
pub fn hash256(data: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(data).to_byte_array()
}

/// Verifies `signature` over the 32-byte `digest` taken as a big-endian
/// integer. Unparseable keys or out-of-range components verify as false.
///
/// High-S signatures are normalised first; the low-S rule is a policy
/// decision made by the caller.
pub fn verify_ecdsa(digest: &[u8; 32], signature: &Signature, public_key: &[u8]) -> bool {
    let Some(compact) = to_compact(signature) else {
        return false;
    };
    let Ok(mut sig) = ecdsa::Signature::from_compact(&compact) else {
        return false;
    };
    sig.normalize_s();
    let Ok(pubkey) = PublicKey::from_slice(public_key) else {
        return false;
    };
    let message = Message::from_digest(*digest);
    with_secp256k1_verification_ctx(|secp| secp.verify_ecdsa(&message, &sig, &pubkey).is_ok())
}

fn to_compact(signature: &Signature) -> Option<[u8; 64]> {
    let r = signature.r.to_bytes_be();
    let s = signature.s.to_bytes_be();
    if r.len() > 32 || s.len() > 32 {
        return None;
    }
    let mut compact = [0u8; 64];
    compact[32 - r.len()..32].copy_from_slice(&r);
    compact[64 - s.len()..].copy_from_slice(&s);
    Some(compact)
}
