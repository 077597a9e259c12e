//! Opcode handlers and the table that dispatches to them.
//!
//! Every handler receives the machine stacks and an [`OpEnv`] describing the
//! opcode being run, and reports either a control-flow outcome or an
//! [`OpFailure`] that the spend decorates with its diagnostics.

use num::BigUint;

use crate::{
    crypto,
    interpreter::ErrorKind,
    num::{
        cast_to_bool, encode_num, is_minimally_encoded, minimally_encode, parse_scriptnum,
        NumError, SCRIPTNUM_MAX_LEN,
    },
    opcodes::*,
    policy::Policy,
    script::Script,
    signature::{is_checksig_format, TransactionSignature},
    stack::ScriptStack,
};

/// The three stacks a spend threads through both scripts.
#[derive(Debug, Default, Clone)]
pub(crate) struct Machine {
    pub stack: ScriptStack,
    pub alt_stack: ScriptStack,
    pub if_stack: Vec<bool>,
}

impl Machine {
    pub fn is_executing(&self) -> bool {
        !self.if_stack.contains(&false)
    }
}

/// How the program counter moves after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// Skip the rest of the current script.
    EndSegment,
    /// Record the current position as the start of the signed subscript.
    CodeSeparator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl OpFailure {
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Evaluation,
            message: message.into(),
        }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Encoding,
            message: message.into(),
        }
    }

    fn underflow(op: u8, needed: usize) -> Self {
        let noun = if needed == 1 { "item" } else { "items" };
        Self {
            kind: ErrorKind::StackUnderflow,
            message: format!(
                "{} requires at least {needed} {noun} on the stack",
                display_name(op)
            ),
        }
    }
}

impl From<NumError> for OpFailure {
    fn from(err: NumError) -> Self {
        Self::evaluation(err.to_string())
    }
}

/// Verifies a decoded signature against a public key and subscript.
pub(crate) trait SignatureChecker {
    fn check_signature(
        &self,
        signature: &TransactionSignature,
        public_key: &[u8],
        subscript: &Script,
    ) -> bool;
}

pub(crate) struct OpEnv<'a> {
    pub op: u8,
    pub executing: bool,
    pub policy: &'a Policy,
    pub checker: &'a dyn SignatureChecker,
    /// The script currently being executed.
    pub script: &'a Script,
    pub last_code_separator: Option<usize>,
}

impl OpEnv<'_> {
    fn subscript(&self) -> Script {
        let start = self.last_code_separator.unwrap_or(0);
        let chunks = self.script.chunks().get(start..).unwrap_or(&[]);
        Script::from_chunks(chunks.to_vec())
    }

    fn num_at(&self, stack: &ScriptStack, depth: usize) -> Result<i64, OpFailure> {
        Ok(parse_scriptnum(
            stack.top(depth),
            self.policy.require_minimal_push,
            SCRIPTNUM_MAX_LEN,
        )?)
    }
}

pub(crate) type Handler = fn(&mut Machine, &OpEnv<'_>) -> Result<Flow, OpFailure>;

/// Handler for a non-push opcode.
pub(crate) fn handler(op: u8) -> Handler {
    match op {
        OP_1NEGATE | OP_1..=OP_16 => op_small_int,
        OP_NOP | OP_NOP1..=OP_NOP73 | OP_NOP77 => op_nop,
        OP_IF | OP_NOTIF => op_if,
        OP_ELSE => op_else,
        OP_ENDIF => op_endif,
        OP_VERIFY => op_verify,
        OP_RETURN => op_return,
        OP_TOALTSTACK | OP_FROMALTSTACK => op_altstack,
        OP_2DROP | OP_2DUP | OP_3DUP | OP_2OVER | OP_2ROT | OP_2SWAP | OP_IFDUP | OP_DEPTH
        | OP_DROP | OP_DUP | OP_NIP | OP_OVER | OP_ROT | OP_SWAP | OP_TUCK | OP_SIZE => op_shuffle,
        OP_PICK | OP_ROLL => op_pick_roll,
        OP_CAT | OP_SPLIT | OP_NUM2BIN | OP_BIN2NUM => op_splice,
        OP_INVERT => op_invert,
        OP_AND | OP_OR | OP_XOR => op_bitwise,
        OP_LSHIFT | OP_RSHIFT => op_shift,
        OP_EQUAL | OP_EQUALVERIFY => op_equal,
        OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => op_unary_num,
        OP_ADD | OP_SUB | OP_MUL | OP_DIV | OP_MOD | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL
        | OP_NUMEQUALVERIFY | OP_NUMNOTEQUAL | OP_LESSTHAN | OP_GREATERTHAN
        | OP_LESSTHANOREQUAL | OP_GREATERTHANOREQUAL | OP_MIN | OP_MAX => op_binary_num,
        OP_WITHIN => op_within,
        OP_RIPEMD160 | OP_SHA1 | OP_SHA256 | OP_HASH160 | OP_HASH256 => op_hash,
        OP_CODESEPARATOR => op_codeseparator,
        OP_CHECKSIG | OP_CHECKSIGVERIFY => op_checksig,
        OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => op_checkmultisig,
        _ => op_invalid,
    }
}

fn need(stack: &ScriptStack, op: u8, count: usize) -> Result<(), OpFailure> {
    if stack.len() < count {
        return Err(OpFailure::underflow(op, count));
    }
    Ok(())
}

/// Pops a truthy top item, failing with `message` otherwise.
fn verify_top(stack: &mut ScriptStack, message: &str) -> Result<(), OpFailure> {
    match stack.last() {
        Some(top) if cast_to_bool(top) => {
            stack.pop();
            Ok(())
        }
        _ => Err(OpFailure::evaluation(message)),
    }
}

fn op_invalid(_: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    Err(OpFailure::evaluation(format!(
        "invalid opcode {} (0x{:02x})",
        display_name(env.op),
        env.op
    )))
}

fn op_nop(_: &mut Machine, _: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    Ok(Flow::Continue)
}

fn op_small_int(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    let value = small_int_value(env.op).unwrap_or_default();
    m.stack.push(encode_num(value));
    Ok(Flow::Continue)
}

fn op_if(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    let mut value = false;
    if env.executing {
        let condition = m
            .stack
            .pop()
            .ok_or_else(|| OpFailure::underflow(env.op, 1))?;
        value = cast_to_bool(&condition);
        if env.op == OP_NOTIF {
            value = !value;
        }
    }
    m.if_stack.push(value);
    Ok(Flow::Continue)
}

fn op_else(m: &mut Machine, _: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    let Some(top) = m.if_stack.last_mut() else {
        return Err(OpFailure::evaluation("OP_ELSE requires a preceding OP_IF"));
    };
    *top = !*top;
    Ok(Flow::Continue)
}

fn op_endif(m: &mut Machine, _: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    if m.if_stack.pop().is_none() {
        return Err(OpFailure::evaluation("OP_ENDIF requires a preceding OP_IF"));
    }
    Ok(Flow::Continue)
}

fn op_verify(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    need(&m.stack, env.op, 1)?;
    verify_top(&mut m.stack, "OP_VERIFY requires the top stack value to be truthy")?;
    Ok(Flow::Continue)
}

fn op_return(_: &mut Machine, _: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    Ok(Flow::EndSegment)
}

fn op_altstack(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    if env.op == OP_TOALTSTACK {
        need(&m.stack, env.op, 1)?;
        let value = m.stack.remove(1);
        m.alt_stack.push(value);
    } else {
        let value = m.alt_stack.pop().ok_or_else(|| OpFailure {
            kind: ErrorKind::StackUnderflow,
            message: "OP_FROMALTSTACK requires at least 1 item on the alt stack".to_string(),
        })?;
        m.stack.push(value);
    }
    Ok(Flow::Continue)
}

fn op_shuffle(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    let stack = &mut m.stack;
    match env.op {
        OP_DEPTH => {
            let depth = encode_num(stack.len() as i64);
            stack.push(depth);
        }
        OP_2DROP => {
            need(stack, env.op, 2)?;
            stack.pop();
            stack.pop();
        }
        OP_2DUP => {
            need(stack, env.op, 2)?;
            let first = stack.top(2).clone();
            let second = stack.top(1).clone();
            stack.push(first);
            stack.push(second);
        }
        OP_3DUP => {
            need(stack, env.op, 3)?;
            let first = stack.top(3).clone();
            let second = stack.top(2).clone();
            let third = stack.top(1).clone();
            stack.push(first);
            stack.push(second);
            stack.push(third);
        }
        OP_2OVER => {
            need(stack, env.op, 4)?;
            let first = stack.top(4).clone();
            let second = stack.top(3).clone();
            stack.push(first);
            stack.push(second);
        }
        OP_2ROT => {
            need(stack, env.op, 6)?;
            let first = stack.remove(6);
            let second = stack.remove(5);
            stack.push(first);
            stack.push(second);
        }
        OP_2SWAP => {
            need(stack, env.op, 4)?;
            stack.swap(4, 2);
            stack.swap(3, 1);
        }
        OP_IFDUP => {
            need(stack, env.op, 1)?;
            if cast_to_bool(stack.top(1)) {
                let value = stack.top(1).clone();
                stack.push(value);
            }
        }
        OP_DROP => {
            need(stack, env.op, 1)?;
            stack.pop();
        }
        OP_DUP => {
            need(stack, env.op, 1)?;
            let value = stack.top(1).clone();
            stack.push(value);
        }
        OP_NIP => {
            need(stack, env.op, 2)?;
            stack.remove(2);
        }
        OP_OVER => {
            need(stack, env.op, 2)?;
            let value = stack.top(2).clone();
            stack.push(value);
        }
        OP_ROT => {
            need(stack, env.op, 3)?;
            stack.swap(3, 2);
            stack.swap(2, 1);
        }
        OP_SWAP => {
            need(stack, env.op, 2)?;
            stack.swap(2, 1);
        }
        OP_TUCK => {
            need(stack, env.op, 2)?;
            let value = stack.top(1).clone();
            stack.insert(3, value);
        }
        OP_SIZE => {
            need(stack, env.op, 1)?;
            let size = encode_num(stack.top(1).len() as i64);
            stack.push(size);
        }
        _ => return op_invalid(m, env),
    }
    Ok(Flow::Continue)
}

fn op_pick_roll(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    need(&m.stack, env.op, 2)?;
    let n = env.num_at(&m.stack, 1)?;
    m.stack.pop();
    if n < 0 || n as usize >= m.stack.len() {
        return Err(OpFailure::evaluation(format!(
            "{} requires the top stack item to be 0 or more and less than the stack size",
            display_name(env.op)
        )));
    }
    let depth = n as usize + 1;
    let value = if env.op == OP_ROLL {
        m.stack.remove(depth)
    } else {
        m.stack.top(depth).clone()
    };
    m.stack.push(value);
    Ok(Flow::Continue)
}

fn op_splice(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    let max_size = env.policy.max_script_element_size;
    match env.op {
        OP_CAT => {
            need(&m.stack, env.op, 2)?;
            let combined = m.stack.top(2).len() + m.stack.top(1).len();
            if combined > max_size {
                return Err(OpFailure::encoding(format!(
                    "OP_CAT result of {combined} bytes exceeds the {max_size}-byte element limit"
                )));
            }
            let tail = m.stack.remove(1);
            m.stack.top_mut(1).extend_from_slice(&tail);
        }
        OP_SPLIT => {
            need(&m.stack, env.op, 2)?;
            let position = env.num_at(&m.stack, 1)?;
            let data_len = m.stack.top(2).len();
            if position < 0 || position as usize > data_len {
                return Err(OpFailure::evaluation(
                    "OP_SPLIT requires a position between 0 and the size of the item being split",
                ));
            }
            m.stack.pop();
            let mut head = m.stack.remove(1);
            let tail = head.split_off(position as usize);
            m.stack.push(head);
            m.stack.push(tail);
        }
        OP_NUM2BIN => {
            need(&m.stack, env.op, 2)?;
            let size = env.num_at(&m.stack, 1)?;
            if size > max_size as i64 {
                return Err(OpFailure::encoding(format!(
                    "OP_NUM2BIN size {size} exceeds the {max_size}-byte element limit"
                )));
            }
            m.stack.pop();
            let mut number = minimally_encode(m.stack.top(1));
            if size < 0 || number.len() > size as usize {
                return Err(OpFailure::evaluation(
                    "OP_NUM2BIN size is too small to hold the value",
                ));
            }
            let sign = match number.last_mut() {
                Some(last) => {
                    let sign = *last & 0x80;
                    *last &= 0x7f;
                    sign
                }
                None => 0,
            };
            number.resize(size as usize, 0);
            if let Some(last) = number.last_mut() {
                *last |= sign;
            }
            *m.stack.top_mut(1) = number;
        }
        OP_BIN2NUM => {
            need(&m.stack, env.op, 1)?;
            let number = minimally_encode(m.stack.top(1));
            let valid = is_minimally_encoded(&number, SCRIPTNUM_MAX_LEN);
            *m.stack.top_mut(1) = number;
            if !valid {
                return Err(OpFailure::evaluation(
                    "OP_BIN2NUM result is not a valid script number",
                ));
            }
        }
        _ => return op_invalid(m, env),
    }
    Ok(Flow::Continue)
}

fn op_invert(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    need(&m.stack, env.op, 1)?;
    for byte in m.stack.top_mut(1).iter_mut() {
        *byte = !*byte;
    }
    Ok(Flow::Continue)
}

fn op_bitwise(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    need(&m.stack, env.op, 2)?;
    if m.stack.top(1).len() != m.stack.top(2).len() {
        return Err(OpFailure::evaluation(format!(
            "{} requires the top two stack items to be the same size",
            display_name(env.op)
        )));
    }
    let rhs = m.stack.remove(1);
    let lhs = m.stack.top_mut(1);
    for (a, b) in lhs.iter_mut().zip(rhs) {
        match env.op {
            OP_AND => *a &= b,
            OP_OR => *a |= b,
            _ => *a ^= b,
        }
    }
    Ok(Flow::Continue)
}

fn op_shift(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    need(&m.stack, env.op, 2)?;
    if m.stack.top(2).is_empty() {
        m.stack.pop();
        return Ok(Flow::Continue);
    }
    let n = env.num_at(&m.stack, 1)?;
    if n < 0 {
        return Err(OpFailure::evaluation(format!(
            "{} requires the shift count to be 0 or more",
            display_name(env.op)
        )));
    }
    m.stack.pop();
    let value = m.stack.pop().unwrap_or_default();
    m.stack.push(shift_bytes(&value, n as usize, env.op == OP_LSHIFT));
    Ok(Flow::Continue)
}

/// Shifts `value` as an unsigned big-endian integer, keeping its width.
fn shift_bytes(value: &[u8], bits: usize, left: bool) -> Vec<u8> {
    let width = value.len();
    if bits >= width * 8 {
        return vec![0; width];
    }
    let number = BigUint::from_bytes_be(value);
    let shifted = if left { number << bits } else { number >> bits };
    let bytes = shifted.to_bytes_be();
    let mut out = vec![0; width];
    if bytes.len() >= width {
        out.copy_from_slice(&bytes[bytes.len() - width..]);
    } else {
        out[width - bytes.len()..].copy_from_slice(&bytes);
    }
    out
}

fn op_equal(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    need(&m.stack, env.op, 2)?;
    let a = m.stack.pop().unwrap_or_default();
    let b = m.stack.pop().unwrap_or_default();
    m.stack.push_bool(a == b);
    if env.op == OP_EQUALVERIFY {
        verify_top(
            &mut m.stack,
            "OP_EQUALVERIFY requires the top two stack items to be equal",
        )?;
    }
    Ok(Flow::Continue)
}

fn op_unary_num(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    need(&m.stack, env.op, 1)?;
    let n = env.num_at(&m.stack, 1)?;
    let result = match env.op {
        OP_1ADD => n + 1,
        OP_1SUB => n - 1,
        OP_NEGATE => -n,
        OP_ABS => n.abs(),
        OP_NOT => (n == 0) as i64,
        _ => (n != 0) as i64,
    };
    *m.stack.top_mut(1) = encode_num(result);
    Ok(Flow::Continue)
}

fn op_binary_num(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    need(&m.stack, env.op, 2)?;
    let a = env.num_at(&m.stack, 2)?;
    let b = env.num_at(&m.stack, 1)?;
    let result = match env.op {
        OP_ADD => a + b,
        OP_SUB => a - b,
        OP_MUL => a * b,
        OP_DIV | OP_MOD if b == 0 => {
            return Err(OpFailure::evaluation(format!(
                "{} cannot divide by zero",
                display_name(env.op)
            )));
        }
        OP_DIV => a / b,
        OP_MOD => a % b,
        OP_BOOLAND => (a != 0 && b != 0) as i64,
        OP_BOOLOR => (a != 0 || b != 0) as i64,
        OP_NUMEQUAL | OP_NUMEQUALVERIFY => (a == b) as i64,
        OP_NUMNOTEQUAL => (a != b) as i64,
        OP_LESSTHAN => (a < b) as i64,
        OP_GREATERTHAN => (a > b) as i64,
        OP_LESSTHANOREQUAL => (a <= b) as i64,
        OP_GREATERTHANOREQUAL => (a >= b) as i64,
        OP_MIN => a.min(b),
        _ => a.max(b),
    };
    m.stack.pop();
    m.stack.pop();
    m.stack.push(encode_num(result));
    if env.op == OP_NUMEQUALVERIFY {
        verify_top(
            &mut m.stack,
            "OP_NUMEQUALVERIFY requires the top two stack items to be numerically equal",
        )?;
    }
    Ok(Flow::Continue)
}

fn op_within(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    need(&m.stack, env.op, 3)?;
    let value = env.num_at(&m.stack, 3)?;
    let min = env.num_at(&m.stack, 2)?;
    let max = env.num_at(&m.stack, 1)?;
    for _ in 0..3 {
        m.stack.pop();
    }
    m.stack.push_bool(min <= value && value < max);
    Ok(Flow::Continue)
}

fn op_hash(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    need(&m.stack, env.op, 1)?;
    let data = m.stack.pop().unwrap_or_default();
    let digest = match env.op {
        OP_RIPEMD160 => crypto::ripemd160(&data).to_vec(),
        OP_SHA1 => crypto::sha1(&data).to_vec(),
        OP_SHA256 => crypto::sha256(&data).to_vec(),
        OP_HASH160 => crypto::hash160(&data).to_vec(),
        _ => crypto::hash256(&data).to_vec(),
    };
    m.stack.push(digest);
    Ok(Flow::Continue)
}

fn op_codeseparator(_: &mut Machine, _: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    Ok(Flow::CodeSeparator)
}

fn check_signature_encoding(sig: &[u8], policy: &Policy) -> Result<(), OpFailure> {
    if sig.is_empty() {
        return Ok(());
    }
    if !is_checksig_format(sig) {
        return Err(OpFailure::encoding("the signature format is invalid"));
    }
    let parsed = TransactionSignature::from_checksig_format(sig)
        .map_err(|err| OpFailure::encoding(format!("the signature format is invalid: {err}")))?;
    if policy.require_low_s_signatures && !parsed.has_low_s() {
        return Err(OpFailure::evaluation("the signature must have a low S value"));
    }
    if !parsed.has_fork_id() {
        return Err(OpFailure::evaluation("the signature must use SIGHASH_FORKID"));
    }
    Ok(())
}

fn check_pubkey_encoding(pubkey: &[u8]) -> Result<(), OpFailure> {
    if pubkey.len() < 33 {
        return Err(OpFailure::encoding(
            "the public key is too short, it must be at least 33 bytes",
        ));
    }
    let valid = match pubkey[0] {
        0x04 => pubkey.len() == 65,
        0x02 | 0x03 => pubkey.len() == 33,
        _ => {
            return Err(OpFailure::encoding("the public key is in an unknown format"));
        }
    };
    if !valid {
        return Err(OpFailure::encoding(
            "the public key length does not match its prefix",
        ));
    }
    Ok(())
}

fn strip_signature(subscript: &mut Script, sig: &[u8]) -> Result<(), OpFailure> {
    let mut pattern = Script::new();
    pattern
        .write_bin(sig)
        .map_err(|err| OpFailure::encoding(err.to_string()))?;
    subscript.find_and_delete(&pattern);
    Ok(())
}

fn verify_signature(env: &OpEnv<'_>, sig: &[u8], pubkey: &[u8], subscript: &Script) -> bool {
    match TransactionSignature::from_checksig_format(sig) {
        Ok(parsed) => env.checker.check_signature(&parsed, pubkey, subscript),
        Err(_) => false,
    }
}

fn op_checksig(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    need(&m.stack, env.op, 2)?;
    let sig = m.stack.top(2).clone();
    let pubkey = m.stack.top(1).clone();
    check_signature_encoding(&sig, env.policy)?;
    check_pubkey_encoding(&pubkey)?;

    let mut subscript = env.subscript();
    strip_signature(&mut subscript, &sig)?;
    let success = verify_signature(env, &sig, &pubkey, &subscript);
    if !success && !sig.is_empty() {
        return Err(OpFailure::evaluation(format!(
            "{} failed with a non-empty signature",
            display_name(env.op)
        )));
    }

    m.stack.pop();
    m.stack.pop();
    m.stack.push_bool(success);
    if env.op == OP_CHECKSIGVERIFY {
        verify_top(
            &mut m.stack,
            "OP_CHECKSIGVERIFY requires that a valid signature is provided",
        )?;
    }
    Ok(Flow::Continue)
}

fn op_checkmultisig(m: &mut Machine, env: &OpEnv<'_>) -> Result<Flow, OpFailure> {
    let op = env.op;
    let mut i = 1;
    need(&m.stack, op, i)?;

    let key_count = env.num_at(&m.stack, i)?;
    if key_count < 0 || key_count > env.policy.max_multisig_key_count as i64 {
        return Err(OpFailure::evaluation(format!(
            "{} key count must be between 0 and {}",
            display_name(op),
            env.policy.max_multisig_key_count
        )));
    }
    let mut keys_left = key_count as usize;
    // Items still to pop before the signatures: count, keys and sig count.
    let mut before_sigs = keys_left + 2;
    i += 1;
    let mut ikey = i;
    i += keys_left;
    need(&m.stack, op, i)?;

    let sig_count = env.num_at(&m.stack, i)?;
    if sig_count < 0 || sig_count as usize > keys_left {
        return Err(OpFailure::evaluation(format!(
            "{} signature count must be between 0 and the key count",
            display_name(op)
        )));
    }
    let mut sigs_left = sig_count as usize;
    i += 1;
    let mut isig = i;
    i += sigs_left;
    need(&m.stack, op, i)?;

    let mut subscript = env.subscript();
    for k in 0..sigs_left {
        let sig = m.stack.top(isig + k).clone();
        strip_signature(&mut subscript, &sig)?;
    }

    let mut success = true;
    while success && sigs_left > 0 {
        let sig = m.stack.top(isig).clone();
        let pubkey = m.stack.top(ikey).clone();
        check_signature_encoding(&sig, env.policy)?;
        check_pubkey_encoding(&pubkey)?;

        if verify_signature(env, &sig, &pubkey, &subscript) {
            isig += 1;
            sigs_left -= 1;
        }
        ikey += 1;
        keys_left -= 1;
        if sigs_left > keys_left {
            success = false;
        }
    }

    while i > 1 {
        i -= 1;
        if !success && before_sigs == 0 && !m.stack.top(1).is_empty() {
            return Err(OpFailure::evaluation(format!(
                "{} failed with a non-empty signature",
                display_name(op)
            )));
        }
        before_sigs = before_sigs.saturating_sub(1);
        m.stack.pop();
    }

    if m.stack.is_empty() {
        return Err(OpFailure {
            kind: ErrorKind::StackUnderflow,
            message: format!("{} requires an extra dummy item", display_name(op)),
        });
    }
    if env.policy.require_null_dummy && !m.stack.top(1).is_empty() {
        return Err(OpFailure::evaluation(format!(
            "{} requires the extra dummy item to be empty",
            display_name(op)
        )));
    }
    m.stack.pop();
    m.stack.push_bool(success);
    if op == OP_CHECKMULTISIGVERIFY {
        verify_top(
            &mut m.stack,
            "OP_CHECKMULTISIGVERIFY requires that valid signatures are provided",
        )?;
    }
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Reject;

    impl SignatureChecker for Reject {
        fn check_signature(&self, _: &TransactionSignature, _: &[u8], _: &Script) -> bool {
            false
        }
    }

    fn run(op: u8, items: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, OpFailure> {
        let policy = Policy::default();
        let script = Script::new();
        let env = OpEnv {
            op,
            executing: true,
            policy: &policy,
            checker: &Reject,
            script: &script,
            last_code_separator: None,
        };
        let mut machine = Machine::default();
        for item in items {
            machine.stack.push(item);
        }
        handler(op)(&mut machine, &env)?;
        Ok(machine.stack.items().to_vec())
    }

    #[test]
    fn shifts_keep_width() {
        assert_eq!(shift_bytes(&[0x01, 0x80], 1, true), vec![0x03, 0x00]);
        assert_eq!(shift_bytes(&[0x01, 0x80], 1, false), vec![0x00, 0xc0]);
        assert_eq!(shift_bytes(&[0xff], 4, true), vec![0xf0]);
        assert_eq!(shift_bytes(&[0xff, 0xff], 16, true), vec![0x00, 0x00]);
        assert_eq!(shift_bytes(&[0x00, 0x01], 9, true), vec![0x02, 0x00]);
    }

    #[test]
    fn shift_of_empty_value_only_drops_count() {
        assert_eq!(run(OP_LSHIFT, vec![vec![], vec![0x03]]).unwrap(), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn two_rot_moves_deepest_pair() {
        let items = (1..=6).map(|n| vec![n]).collect();
        let out = run(OP_2ROT, items).unwrap();
        assert_eq!(out, vec![vec![3], vec![4], vec![5], vec![6], vec![1], vec![2]]);
    }

    #[test]
    fn two_swap_and_rot() {
        let out = run(OP_2SWAP, vec![vec![1], vec![2], vec![3], vec![4]]).unwrap();
        assert_eq!(out, vec![vec![3], vec![4], vec![1], vec![2]]);
        let out = run(OP_ROT, vec![vec![1], vec![2], vec![3]]).unwrap();
        assert_eq!(out, vec![vec![2], vec![3], vec![1]]);
    }

    #[test]
    fn tuck_copies_under_second() {
        let out = run(OP_TUCK, vec![vec![1], vec![2]]).unwrap();
        assert_eq!(out, vec![vec![2], vec![1], vec![2]]);
    }

    #[test]
    fn pick_and_roll_bounds() {
        let out = run(OP_PICK, vec![vec![7], vec![8], vec![0x01]]).unwrap();
        assert_eq!(out, vec![vec![7], vec![8], vec![7]]);
        let out = run(OP_ROLL, vec![vec![7], vec![8], vec![0x01]]).unwrap();
        assert_eq!(out, vec![vec![8], vec![7]]);
        let err = run(OP_PICK, vec![vec![7], vec![0x02]]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Evaluation);
    }

    #[test]
    fn underflow_names_the_opcode() {
        let err = run(OP_DUP, vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StackUnderflow);
        assert!(err.message.contains("OP_DUP"), "{}", err.message);
    }

    #[test]
    fn arithmetic() {
        assert_eq!(run(OP_ADD, vec![vec![2], vec![3]]).unwrap(), vec![vec![5]]);
        assert_eq!(run(OP_SUB, vec![vec![2], vec![3]]).unwrap(), vec![vec![0x81]]);
        assert_eq!(run(OP_DIV, vec![vec![0x87], vec![2]]).unwrap(), vec![vec![0x83]]);
        assert_eq!(run(OP_MOD, vec![vec![0x87], vec![2]]).unwrap(), vec![vec![0x81]]);
        assert_eq!(run(OP_DIV, vec![vec![1], vec![]]).unwrap_err().kind, ErrorKind::Evaluation);
        assert_eq!(
            run(OP_WITHIN, vec![vec![2], vec![2], vec![3]]).unwrap(),
            vec![vec![1]]
        );
        assert_eq!(
            run(OP_WITHIN, vec![vec![3], vec![2], vec![3]]).unwrap(),
            vec![Vec::<u8>::new()]
        );
    }

    #[test]
    fn non_minimal_operands_rejected() {
        let err = run(OP_1ADD, vec![vec![0x01, 0x00]]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Evaluation);
        let err = run(OP_1ADD, vec![vec![1, 0, 0, 0, 1]]).unwrap_err();
        assert!(err.message.contains("exceeds"), "{}", err.message);
    }

    #[test]
    fn splice_ops() {
        assert_eq!(
            run(OP_CAT, vec![vec![1, 2], vec![3]]).unwrap(),
            vec![vec![1, 2, 3]]
        );
        assert_eq!(
            run(OP_SPLIT, vec![vec![1, 2, 3], vec![1]]).unwrap(),
            vec![vec![1], vec![2, 3]]
        );
        assert!(run(OP_SPLIT, vec![vec![1, 2, 3], vec![4]]).is_err());
        assert_eq!(
            run(OP_NUM2BIN, vec![vec![0x81], vec![3]]).unwrap(),
            vec![vec![0x01, 0x00, 0x80]]
        );
        assert!(run(OP_NUM2BIN, vec![vec![0x01, 0x02], vec![1]]).is_err());
        assert_eq!(
            run(OP_BIN2NUM, vec![vec![0x01, 0x00, 0x80]]).unwrap(),
            vec![vec![0x81]]
        );
    }

    #[test]
    fn bin2num_rejects_results_beyond_four_bytes() {
        let err = run(OP_BIN2NUM, vec![vec![1, 2, 3, 4, 5]]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Evaluation);
        assert!(run(OP_BIN2NUM, vec![vec![1, 2, 3, 4, 0, 0]]).is_ok());
    }

    #[test]
    fn bitwise_requires_equal_sizes() {
        assert_eq!(
            run(OP_XOR, vec![vec![0xf0, 0x0f], vec![0xff, 0xff]]).unwrap(),
            vec![vec![0x0f, 0xf0]]
        );
        assert!(run(OP_AND, vec![vec![0xf0], vec![0xff, 0xff]]).is_err());
        assert_eq!(run(OP_INVERT, vec![vec![0x0f]]).unwrap(), vec![vec![0xf0]]);
    }

    #[test]
    fn empty_signature_pushes_false() {
        let pubkey = {
            let mut key = vec![0x02];
            key.extend_from_slice(&[0x11; 32]);
            key
        };
        let out = run(OP_CHECKSIG, vec![vec![], pubkey]).unwrap();
        assert_eq!(out, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn pubkey_encoding_rules() {
        assert!(check_pubkey_encoding(&[0x02; 33]).is_ok());
        assert!(check_pubkey_encoding(&[0x04; 65]).is_ok());
        assert!(check_pubkey_encoding(&[0x04; 33]).is_err());
        assert!(check_pubkey_encoding(&[0x02; 65]).is_err());
        assert!(check_pubkey_encoding(&[0x05; 33]).is_err());
        assert!(check_pubkey_encoding(&[0x02; 32]).is_err());
    }

    #[test]
    fn zero_of_zero_multisig_needs_empty_dummy() {
        assert_eq!(
            run(OP_CHECKMULTISIG, vec![vec![], vec![], vec![]]).unwrap(),
            vec![vec![1]]
        );
        let err = run(OP_CHECKMULTISIG, vec![vec![0x01], vec![], vec![]]).unwrap_err();
        assert!(err.message.contains("dummy"), "{}", err.message);
        let err = run(OP_CHECKMULTISIG, vec![vec![], vec![]]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StackUnderflow);
    }

    #[test]
    fn invalid_opcodes_fail() {
        for op in [OP_RESERVED, OP_RESERVED1, OP_RESERVED2, OP_VERIF, OP_PUBKEY, 0xff] {
            assert!(run(op, vec![]).is_err(), "0x{op:02x}");
        }
        assert!(run(OP_NOP10, vec![]).is_ok());
        assert!(run(OP_NOP77, vec![]).is_ok());
    }
}
