use bitcoin::{
    hashes::Hash,
    hex::DisplayHex,
    secp256k1::{Message, PublicKey, Secp256k1, SecretKey},
    Txid,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sv_consensus::{
    crypto::hash160,
    signature::{SIGHASH_ALL, SIGHASH_FORKID},
    Script, Spend, SpendParams, TransactionSignature, TxInputRef, TxOutput,
};

struct BenchCase {
    name: &'static str,
    params: SpendParams,
}

pub fn verification_bench(c: &mut Criterion) {
    let cases = vec![arithmetic_case(), p2pkh_case(), multisig_case()];

    let mut group = c.benchmark_group("validate");
    for case in &cases {
        group.bench_with_input(BenchmarkId::new("spend", case.name), case, |b, case| {
            b.iter(|| {
                Spend::new(case.params.clone())
                    .validate()
                    .expect("bench spend validates")
            });
        });
    }
    group.finish();

    let p2pkh = p2pkh_case();
    c.bench_function("sighash_preimage", |b| {
        let params = &p2pkh.params;
        b.iter(|| {
            TransactionSignature::format(
                &params.sighash_params(&params.locking_script, SIGHASH_ALL | SIGHASH_FORKID),
            )
        });
    });

    let script_hex = multisig_case().params.locking_script.to_hex();
    c.bench_function("script_from_hex", |b| {
        b.iter(|| Script::from_hex(&script_hex).expect("valid script hex"));
    });
}

fn base_params(locking_script: Script) -> SpendParams {
    SpendParams {
        source_txid: Txid::from_byte_array([0x3f; 32]),
        source_output_index: 0,
        source_satoshis: 100_000,
        locking_script,
        transaction_version: 1,
        other_inputs: vec![TxInputRef::new(Txid::from_byte_array([0x95; 32]), 1, 0xffff_ffff)],
        outputs: vec![TxOutput::new(
            99_000,
            Script::from_hex("76a914fc25d6d5c94003bf5b0c7b640a248e2c637fcfb088ac").unwrap(),
        )],
        input_index: 0,
        unlocking_script: Script::new(),
        input_sequence: 0xffff_ffff,
        lock_time: 0,
    }
}

fn sign(secret: &SecretKey, params: &SpendParams) -> Vec<u8> {
    let scope = SIGHASH_ALL | SIGHASH_FORKID;
    let digest =
        TransactionSignature::sighash(&params.sighash_params(&params.locking_script, scope));
    let sig = Secp256k1::new().sign_ecdsa(&Message::from_digest(digest), secret);
    let mut bytes = sig.serialize_der().to_vec();
    bytes.push(scope as u8);
    bytes
}

fn key(seed: u8) -> (SecretKey, Vec<u8>) {
    let secret = SecretKey::from_slice(&[seed; 32]).unwrap();
    let public = PublicKey::from_secret_key(&Secp256k1::new(), &secret)
        .serialize()
        .to_vec();
    (secret, public)
}

fn arithmetic_case() -> BenchCase {
    let mut params = base_params(Script::from_asm("OP_ADD OP_2 OP_EQUAL").unwrap());
    params.unlocking_script = Script::from_asm("OP_1 OP_1").unwrap();
    BenchCase {
        name: "arithmetic",
        params,
    }
}

fn p2pkh_case() -> BenchCase {
    let (secret, public) = key(0x42);
    let locking = Script::from_asm(&format!(
        "OP_DUP OP_HASH160 {} OP_EQUALVERIFY OP_CHECKSIG",
        hash160(&public).as_slice().to_lower_hex_string()
    ))
    .unwrap();
    let mut params = base_params(locking);
    let sig = sign(&secret, &params);
    let mut unlocking = Script::new();
    unlocking.write_bin(&sig).unwrap().write_bin(&public).unwrap();
    params.unlocking_script = unlocking;
    BenchCase {
        name: "p2pkh",
        params,
    }
}

fn multisig_case() -> BenchCase {
    let keys: Vec<_> = (1..=3).map(key).collect();
    let locking = Script::from_asm(&format!(
        "OP_2 {} {} {} OP_3 OP_CHECKMULTISIG",
        keys[0].1.to_lower_hex_string(),
        keys[1].1.to_lower_hex_string(),
        keys[2].1.to_lower_hex_string()
    ))
    .unwrap();
    let mut params = base_params(locking);
    let mut unlocking = Script::new();
    unlocking.write_number(0);
    for (secret, _) in &keys[..2] {
        unlocking.write_bin(&sign(secret, &params)).unwrap();
    }
    params.unlocking_script = unlocking;
    BenchCase {
        name: "multisig_2_of_3",
        params,
    }
}

criterion_group!(benches, verification_bench);
criterion_main!(benches);
