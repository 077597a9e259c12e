//! Cross-checks the FORKID preimage against `bitcoin`'s BIP143 encoder,
//! which shares its layout byte for byte apart from the scope word.

use bitcoin::{
    absolute::LockTime,
    hashes::Hash,
    sighash::{EcdsaSighashType, SighashCache},
    transaction::Version,
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use proptest::prelude::*;
use sv_consensus::{
    signature::SIGHASH_FORKID, Script, SighashParams, TransactionSignature, TxInputRef, TxOutput,
};

const SIGHASH_TYPES: [EcdsaSighashType; 6] = [
    EcdsaSighashType::All,
    EcdsaSighashType::None,
    EcdsaSighashType::Single,
    EcdsaSighashType::AllPlusAnyoneCanPay,
    EcdsaSighashType::NonePlusAnyoneCanPay,
    EcdsaSighashType::SinglePlusAnyoneCanPay,
];

#[derive(Debug, Clone)]
struct Case {
    version: i32,
    lock_time: u32,
    source: TxInputRef,
    source_satoshis: u64,
    other_inputs: Vec<TxInputRef>,
    outputs: Vec<TxOutput>,
    input_index: usize,
    subscript: Script,
    sighash_type: EcdsaSighashType,
}

impl Case {
    fn params(&self, scope: u32) -> SighashParams<'_> {
        SighashParams {
            source_txid: self.source.source_txid,
            source_output_index: self.source.source_output_index,
            source_satoshis: self.source_satoshis,
            transaction_version: self.version,
            other_inputs: &self.other_inputs,
            outputs: &self.outputs,
            input_index: self.input_index,
            subscript: &self.subscript,
            input_sequence: self.source.sequence,
            lock_time: self.lock_time,
            scope,
        }
    }

    fn oracle_preimage(&self) -> Vec<u8> {
        let mut inputs = self.other_inputs.clone();
        inputs.insert(self.input_index, self.source);
        let tx = Transaction {
            version: Version(self.version),
            lock_time: LockTime::from_consensus(self.lock_time),
            input: inputs
                .iter()
                .map(|input| TxIn {
                    previous_output: OutPoint::new(input.source_txid, input.source_output_index),
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence(input.sequence),
                    witness: Witness::new(),
                })
                .collect(),
            output: self
                .outputs
                .iter()
                .map(|output| TxOut {
                    value: Amount::from_sat(output.satoshis),
                    script_pubkey: ScriptBuf::from_bytes(output.locking_script.to_binary()),
                })
                .collect(),
        };
        let script_code = ScriptBuf::from_bytes(self.subscript.to_binary());
        let mut preimage = Vec::new();
        SighashCache::new(&tx)
            .segwit_v0_encode_signing_data_to(
                &mut preimage,
                self.input_index,
                &script_code,
                Amount::from_sat(self.source_satoshis),
                self.sighash_type,
            )
            .expect("input index is in range");
        preimage
    }
}

fn input_strategy() -> impl Strategy<Value = TxInputRef> {
    (any::<[u8; 32]>(), any::<u32>(), any::<u32>()).prop_map(|(txid, vout, sequence)| {
        TxInputRef::new(Txid::from_byte_array(txid), vout, sequence)
    })
}

fn script_strategy() -> impl Strategy<Value = Script> {
    prop::collection::vec(any::<u8>(), 0..40).prop_map(|data| {
        let mut script = Script::new();
        script.write_bin(&data).expect("small push");
        script.write_op_code(sv_consensus::opcodes::OP_CHECKSIG);
        script
    })
}

fn output_strategy() -> impl Strategy<Value = TxOutput> {
    (any::<u64>(), script_strategy())
        .prop_map(|(satoshis, script)| TxOutput::new(satoshis % 2_100_000_000_000_000, script))
}

fn case_strategy() -> impl Strategy<Value = Case> {
    (
        prop::collection::vec(input_strategy(), 0..4),
        prop::collection::vec(output_strategy(), 0..4),
        any::<prop::sample::Index>(),
        0..SIGHASH_TYPES.len(),
        (any::<i32>(), any::<u32>(), input_strategy(), any::<u64>()),
        script_strategy(),
    )
        .prop_map(
            |(other_inputs, outputs, index, type_index, (version, lock_time, source, sats), subscript)| {
                let input_index = index.index(other_inputs.len() + 1);
                Case {
                    version,
                    lock_time,
                    source,
                    source_satoshis: sats,
                    other_inputs,
                    outputs,
                    input_index,
                    subscript,
                    sighash_type: SIGHASH_TYPES[type_index],
                }
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn preimage_matches_bip143_layout(case in case_strategy()) {
        let scope = case.sighash_type.to_u32();
        let ours = TransactionSignature::format(&case.params(scope));
        prop_assert_eq!(ours, case.oracle_preimage());
    }

    #[test]
    fn fork_id_only_changes_scope_word(case in case_strategy()) {
        let scope = case.sighash_type.to_u32();
        let plain = TransactionSignature::format(&case.params(scope));
        let forked = TransactionSignature::format(&case.params(scope | SIGHASH_FORKID));
        let split = plain.len() - 4;
        prop_assert_eq!(&plain[..split], &forked[..split]);
        prop_assert_eq!(&forked[split..], &(scope | SIGHASH_FORKID).to_le_bytes()[..]);
    }
}
