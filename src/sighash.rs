//! Signature-hash preimage for FORKID signatures.
//!
//! The layout commits to the spent output's value and splits the
//! transaction-wide parts into three intermediate hashes so that each can be
//! blanked according to the signature's scope.

use bitcoin::Txid;

use crate::{
    crypto::hash256,
    script::Script,
    signature::{
        TransactionSignature, SIGHASH_ANYONECANPAY, SIGHASH_BASE_MASK, SIGHASH_NONE,
        SIGHASH_SINGLE,
    },
    tx::{write_outpoint, write_var_bytes, TxInputRef, TxOutput},
};

/// Everything the preimage commits to for one input.
#[derive(Debug, Clone, Copy)]
pub struct SighashParams<'a> {
    pub source_txid: Txid,
    pub source_output_index: u32,
    pub source_satoshis: u64,
    pub transaction_version: i32,
    /// All inputs except the one being signed, in transaction order.
    pub other_inputs: &'a [TxInputRef],
    pub outputs: &'a [TxOutput],
    pub input_index: usize,
    pub subscript: &'a Script,
    pub input_sequence: u32,
    pub lock_time: u32,
    pub scope: u32,
}

impl TransactionSignature {
    /// Builds the preimage that is double-SHA256 hashed and signed.
    pub fn format(params: &SighashParams<'_>) -> Vec<u8> {
        let base_type = params.scope & SIGHASH_BASE_MASK;
        let anyone_can_pay = params.scope & SIGHASH_ANYONECANPAY != 0;

        let mut inputs = params.other_inputs.to_vec();
        let at = params.input_index.min(inputs.len());
        inputs.insert(
            at,
            TxInputRef::new(
                params.source_txid,
                params.source_output_index,
                params.input_sequence,
            ),
        );

        let hash_prevouts = if anyone_can_pay {
            [0u8; 32]
        } else {
            let mut buf = Vec::with_capacity(inputs.len() * 36);
            for input in &inputs {
                input.write_outpoint(&mut buf);
            }
            hash256(&buf)
        };

        let hash_sequence =
            if anyone_can_pay || base_type == SIGHASH_SINGLE || base_type == SIGHASH_NONE {
                [0u8; 32]
            } else {
                let mut buf = Vec::with_capacity(inputs.len() * 4);
                for input in &inputs {
                    buf.extend_from_slice(&input.sequence.to_le_bytes());
                }
                hash256(&buf)
            };

        let hash_outputs = if base_type != SIGHASH_SINGLE && base_type != SIGHASH_NONE {
            let mut buf = Vec::new();
            for output in params.outputs {
                output.write_to(&mut buf);
            }
            hash256(&buf)
        } else if base_type == SIGHASH_SINGLE && params.input_index < params.outputs.len() {
            let mut buf = Vec::new();
            params.outputs[params.input_index].write_to(&mut buf);
            hash256(&buf)
        } else {
            [0u8; 32]
        };

        let subscript = params.subscript.to_binary();
        let mut preimage = Vec::with_capacity(4 + 32 * 3 + 36 + 9 + subscript.len() + 8 + 4 + 32 + 8);
        preimage.extend_from_slice(&params.transaction_version.to_le_bytes());
        preimage.extend_from_slice(&hash_prevouts);
        preimage.extend_from_slice(&hash_sequence);
        write_outpoint(&mut preimage, &params.source_txid, params.source_output_index);
        write_var_bytes(&mut preimage, &subscript);
        preimage.extend_from_slice(&params.source_satoshis.to_le_bytes());
        preimage.extend_from_slice(&params.input_sequence.to_le_bytes());
        preimage.extend_from_slice(&hash_outputs);
        preimage.extend_from_slice(&params.lock_time.to_le_bytes());
        preimage.extend_from_slice(&params.scope.to_le_bytes());
        preimage
    }

    /// hash256 of [`TransactionSignature::format`]; the digest that is signed.
    pub fn sighash(params: &SighashParams<'_>) -> [u8; 32] {
        hash256(&Self::format(params))
    }
}
