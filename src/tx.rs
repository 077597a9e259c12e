//! Transaction fragments a spend commits to.

use bitcoin::{
    consensus::encode::{serialize, VarInt},
    hashes::Hash,
    Txid,
};

use crate::script::Script;

/// A reference to a previous output together with the spending input's
/// sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxInputRef {
    pub source_txid: Txid,
    pub source_output_index: u32,
    pub sequence: u32,
}

impl TxInputRef {
    pub fn new(source_txid: Txid, source_output_index: u32, sequence: u32) -> Self {
        Self {
            source_txid,
            source_output_index,
            sequence,
        }
    }

    /// Outpoint wire bytes: txid in internal byte order, then the index.
    pub(crate) fn write_outpoint(&self, out: &mut Vec<u8>) {
        write_outpoint(out, &self.source_txid, self.source_output_index);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxOutput {
    pub satoshis: u64,
    pub locking_script: Script,
}

impl TxOutput {
    pub fn new(satoshis: u64, locking_script: Script) -> Self {
        Self {
            satoshis,
            locking_script,
        }
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.satoshis.to_le_bytes());
        write_var_bytes(out, &self.locking_script.to_binary());
    }
}

pub(crate) fn write_outpoint(out: &mut Vec<u8>, txid: &Txid, index: u32) {
    out.extend_from_slice(&txid.to_byte_array());
    out.extend_from_slice(&index.to_le_bytes());
}

/// Compact-size length prefix followed by `bytes`.
pub(crate) fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&serialize(&VarInt(bytes.len() as u64)));
    out.extend_from_slice(bytes);
}
