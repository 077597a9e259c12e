//! The spend interpreter: runs an unlocking script followed by a locking
//! script over shared stacks and decides whether the input is authorised.

use std::fmt;

use bitcoin::Txid;

use crate::{
    crypto,
    num::cast_to_bool,
    opcodes::{display_name, is_conditional, is_disabled, is_push},
    ops::{handler, Flow, Machine, OpEnv, OpFailure, SignatureChecker},
    policy::Policy,
    script::{Chunk, Script},
    sighash::SighashParams,
    signature::TransactionSignature,
    tx::{TxInputRef, TxOutput},
};

/// Which of the two scripts is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptContext {
    Unlocking,
    Locking,
}

impl fmt::Display for ScriptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScriptContext::Unlocking => "UnlockingScript",
            ScriptContext::Locking => "LockingScript",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An opcode needed more items than the stack held.
    StackUnderflow,
    /// Malformed data: non-minimal pushes, bad signature or key encodings,
    /// oversized elements.
    Encoding,
    /// A rule of script evaluation was violated.
    Evaluation,
    /// The policy's step budget ran out.
    ResourceExhausted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::StackUnderflow => "stack underflow",
            ErrorKind::Encoding => "encoding",
            ErrorKind::Evaluation => "evaluation",
            ErrorKind::ResourceExhausted => "resource exhausted",
        })
    }
}

/// A failed validation together with the interpreter state at the point of
/// failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "{message}\n\nsource TXID: {source_txid}\nsource output index: {source_output_index}\n\
     context: {context}\nprogram counter: {program_counter}\nstack size: {stack_size}\n\
     alt stack size: {alt_stack_size}"
)]
pub struct SpendError {
    pub kind: ErrorKind,
    pub message: String,
    pub source_txid: Txid,
    pub source_output_index: u32,
    pub context: ScriptContext,
    pub program_counter: usize,
    pub stack_size: usize,
    pub alt_stack_size: usize,
}

/// The input being authorised and the transaction it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendParams {
    pub source_txid: Txid,
    pub source_output_index: u32,
    pub source_satoshis: u64,
    pub locking_script: Script,
    pub transaction_version: i32,
    /// Every input of the spending transaction except this one.
    pub other_inputs: Vec<TxInputRef>,
    pub outputs: Vec<TxOutput>,
    pub input_index: usize,
    pub unlocking_script: Script,
    pub input_sequence: u32,
    pub lock_time: u32,
}

impl SpendParams {
    /// Preimage inputs for a signature with the given `scope` over `subscript`.
    pub fn sighash_params<'a>(&'a self, subscript: &'a Script, scope: u32) -> SighashParams<'a> {
        SighashParams {
            source_txid: self.source_txid,
            source_output_index: self.source_output_index,
            source_satoshis: self.source_satoshis,
            transaction_version: self.transaction_version,
            other_inputs: &self.other_inputs,
            outputs: &self.outputs,
            input_index: self.input_index,
            subscript,
            input_sequence: self.input_sequence,
            lock_time: self.lock_time,
            scope,
        }
    }
}

impl SignatureChecker for SpendParams {
    fn check_signature(
        &self,
        signature: &TransactionSignature,
        public_key: &[u8],
        subscript: &Script,
    ) -> bool {
        let digest = TransactionSignature::sighash(&self.sighash_params(subscript, signature.scope));
        crypto::verify_ecdsa(&digest, &signature.signature, public_key)
    }
}

fn active_script(params: &SpendParams, context: ScriptContext) -> &Script {
    match context {
        ScriptContext::Unlocking => &params.unlocking_script,
        ScriptContext::Locking => &params.locking_script,
    }
}

/// One validation session for a single input.
///
/// A `Spend` owns its stacks; use [`Spend::validate`] to run it to
/// completion or [`Spend::step`] to drive it one chunk at a time.
#[derive(Debug, Clone)]
pub struct Spend {
    params: SpendParams,
    policy: Policy,
    context: ScriptContext,
    program_counter: usize,
    last_code_separator: Option<usize>,
    machine: Machine,
    steps: u64,
}

impl Spend {
    pub fn new(params: SpendParams) -> Self {
        Self::with_policy(params, Policy::default())
    }

    pub fn with_policy(params: SpendParams, policy: Policy) -> Self {
        Self {
            params,
            policy,
            context: ScriptContext::Unlocking,
            program_counter: 0,
            last_code_separator: None,
            machine: Machine::default(),
            steps: 0,
        }
    }

    /// Returns the session to its initial state.
    pub fn reset(&mut self) {
        self.context = ScriptContext::Unlocking;
        self.program_counter = 0;
        self.last_code_separator = None;
        self.machine = Machine::default();
        self.steps = 0;
    }

    pub fn params(&self) -> &SpendParams {
        &self.params
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn context(&self) -> ScriptContext {
        self.context
    }

    pub fn program_counter(&self) -> usize {
        self.program_counter
    }

    /// Main stack, bottom first.
    pub fn stack(&self) -> &[Vec<u8>] {
        self.machine.stack.items()
    }

    pub fn alt_stack(&self) -> &[Vec<u8>] {
        self.machine.alt_stack.items()
    }

    pub fn if_stack(&self) -> &[bool] {
        &self.machine.if_stack
    }

    pub fn is_finished(&self) -> bool {
        self.context == ScriptContext::Locking
            && self.program_counter >= self.params.locking_script.len()
    }

    /// Executes the chunk under the program counter, moving to the locking
    /// script once the unlocking script is exhausted. Does nothing once
    /// [`Spend::is_finished`].
    pub fn step(&mut self) -> Result<(), SpendError> {
        if self.context == ScriptContext::Unlocking
            && self.program_counter >= self.params.unlocking_script.len()
        {
            self.context = ScriptContext::Locking;
            self.program_counter = 0;
            self.last_code_separator = None;
        }

        let script = active_script(&self.params, self.context);
        let Some(chunk) = script.chunks().get(self.program_counter) else {
            return Ok(());
        };

        if let Some(max_steps) = self.policy.max_steps {
            if self.steps >= max_steps {
                return Err(self.fail(OpFailure {
                    kind: ErrorKind::ResourceExhausted,
                    message: format!("the step budget of {max_steps} operations is exhausted"),
                }));
            }
        }
        self.steps += 1;

        log::trace!(
            "{} pc={} {} stack={}",
            self.context,
            self.program_counter,
            display_name(chunk.op),
            self.machine.stack.len()
        );

        let outcome = Self::execute(
            &mut self.machine,
            &self.policy,
            &self.params,
            script,
            chunk,
            self.last_code_separator,
        );
        match outcome {
            Ok(Flow::Continue) => self.program_counter += 1,
            Ok(Flow::CodeSeparator) => {
                self.last_code_separator = Some(self.program_counter);
                self.program_counter += 1;
            }
            Ok(Flow::EndSegment) => self.program_counter = script.len(),
            Err(failure) => return Err(self.fail(failure)),
        }
        Ok(())
    }

    fn execute(
        machine: &mut Machine,
        policy: &Policy,
        params: &SpendParams,
        script: &Script,
        chunk: &Chunk,
        last_code_separator: Option<usize>,
    ) -> Result<Flow, OpFailure> {
        let op = chunk.op;
        let data = chunk.data();
        if data.len() > policy.max_script_element_size {
            return Err(OpFailure::encoding(format!(
                "data of {} bytes exceeds the {}-byte element limit",
                data.len(),
                policy.max_script_element_size
            )));
        }

        let executing = machine.is_executing();
        if executing && is_disabled(op) {
            return Err(OpFailure::evaluation(format!(
                "{} is disabled",
                display_name(op)
            )));
        }

        if is_push(op) {
            if executing {
                if policy.require_minimal_push && !chunk.is_minimal_push() {
                    return Err(OpFailure::evaluation("this data is not minimally encoded"));
                }
                machine.stack.push(data.to_vec());
            }
            return Ok(Flow::Continue);
        }

        if !executing && !is_conditional(op) {
            return Ok(Flow::Continue);
        }

        let env = OpEnv {
            op,
            executing,
            policy,
            checker: params,
            script,
            last_code_separator,
        };
        handler(op)(machine, &env)
    }

    fn fail(&self, failure: OpFailure) -> SpendError {
        let err = SpendError {
            kind: failure.kind,
            message: failure.message,
            source_txid: self.params.source_txid,
            source_output_index: self.params.source_output_index,
            context: self.context,
            program_counter: self.program_counter,
            stack_size: self.machine.stack.len(),
            alt_stack_size: self.machine.alt_stack.len(),
        };
        log::debug!(
            "spend of {}:{} failed ({}) in {} at pc {}: {}",
            err.source_txid,
            err.source_output_index,
            err.kind,
            err.context,
            err.program_counter,
            err.message
        );
        err
    }

    /// Runs both scripts to completion and applies the final-state rules.
    pub fn validate(&mut self) -> Result<(), SpendError> {
        if self.policy.require_push_only_unlocking_scripts
            && !self.params.unlocking_script.is_push_only()
        {
            return Err(self.fail(OpFailure::evaluation(
                "unlocking scripts can only contain push operations",
            )));
        }

        while !self.is_finished() {
            self.step()?;
        }

        if !self.machine.if_stack.is_empty() {
            return Err(self.fail(OpFailure::evaluation(
                "every OP_IF must be terminated by OP_ENDIF prior to the end of the script",
            )));
        }
        if self.policy.require_clean_stack && self.machine.stack.len() != 1 {
            return Err(self.fail(OpFailure::evaluation(format!(
                "the clean stack rule requires exactly one item after evaluation, found {}",
                self.machine.stack.len()
            ))));
        }
        if !self.machine.stack.last().is_some_and(|top| cast_to_bool(top)) {
            return Err(self.fail(OpFailure::evaluation(
                "the top stack element must be truthy after script evaluation",
            )));
        }

        log::debug!(
            "spend of {}:{} validated in {} steps",
            self.params.source_txid,
            self.params.source_output_index,
            self.steps
        );
        Ok(())
    }
}
