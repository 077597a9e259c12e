//! Rule-set knobs injected into every [`Spend`](crate::Spend).

use crate::{
    FlagsError, VERIFY_CLEANSTACK, VERIFY_LOW_S, VERIFY_MINIMALDATA, VERIFY_NULLDUMMY,
    VERIFY_SIGPUSHONLY,
};

/// 1 GiB, the largest stack element a push or `OP_CAT` may produce.
pub const DEFAULT_MAX_SCRIPT_ELEMENT_SIZE: usize = 1024 * 1024 * 1024;
/// `i32::MAX`, the largest key count `OP_CHECKMULTISIG` accepts.
pub const DEFAULT_MAX_MULTISIG_KEY_COUNT: u32 = i32::MAX as u32;

const SUPPORTED_FLAGS: u32 =
    VERIFY_MINIMALDATA | VERIFY_SIGPUSHONLY | VERIFY_LOW_S | VERIFY_NULLDUMMY | VERIFY_CLEANSTACK;

/// Immutable verification policy.
///
/// `Default` is the standard rule set: every requirement on and no step
/// budget.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Policy {
    pub max_script_element_size: usize,
    pub max_multisig_key_count: u32,
    pub require_minimal_push: bool,
    pub require_push_only_unlocking_scripts: bool,
    pub require_low_s_signatures: bool,
    pub require_clean_stack: bool,
    /// The extra `OP_CHECKMULTISIG` item must be empty.
    pub require_null_dummy: bool,
    /// Upper bound on executed opcodes per validation; `None` is unbounded.
    pub max_steps: Option<u64>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_script_element_size: DEFAULT_MAX_SCRIPT_ELEMENT_SIZE,
            max_multisig_key_count: DEFAULT_MAX_MULTISIG_KEY_COUNT,
            require_minimal_push: true,
            require_push_only_unlocking_scripts: true,
            require_low_s_signatures: true,
            require_clean_stack: true,
            require_null_dummy: true,
            max_steps: None,
        }
    }
}

impl Policy {
    /// Builds a policy from `VERIFY_*` bits, rejecting unknown ones.
    /// Size limits keep their defaults.
    pub fn from_flags(bits: u32) -> Result<Self, FlagsError> {
        if bits & !SUPPORTED_FLAGS != 0 {
            return Err(FlagsError {
                unsupported: bits & !SUPPORTED_FLAGS,
            });
        }
        Ok(Self {
            require_minimal_push: bits & VERIFY_MINIMALDATA != 0,
            require_push_only_unlocking_scripts: bits & VERIFY_SIGPUSHONLY != 0,
            require_low_s_signatures: bits & VERIFY_LOW_S != 0,
            require_clean_stack: bits & VERIFY_CLEANSTACK != 0,
            require_null_dummy: bits & VERIFY_NULLDUMMY != 0,
            ..Self::default()
        })
    }

    pub fn flags(&self) -> u32 {
        let mut bits = 0;
        for (enabled, flag) in [
            (self.require_minimal_push, VERIFY_MINIMALDATA),
            (self.require_push_only_unlocking_scripts, VERIFY_SIGPUSHONLY),
            (self.require_low_s_signatures, VERIFY_LOW_S),
            (self.require_clean_stack, VERIFY_CLEANSTACK),
            (self.require_null_dummy, VERIFY_NULLDUMMY),
        ] {
            if enabled {
                bits |= flag;
            }
        }
        bits
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VERIFY_NONE, VERIFY_STANDARD};

    #[test]
    fn rejects_unknown_flags() {
        let err = Policy::from_flags(1 << 31).unwrap_err();
        assert_eq!(err.unsupported, 1 << 31);
    }

    #[test]
    fn standard_flags_match_default() {
        assert_eq!(Policy::from_flags(VERIFY_STANDARD).unwrap(), Policy::default());
        assert_eq!(Policy::default().flags(), VERIFY_STANDARD);
    }

    #[test]
    fn flag_roundtrip_is_lossless() {
        let bits = VERIFY_SIGPUSHONLY | VERIFY_LOW_S;
        let policy = Policy::from_flags(bits).unwrap();
        assert_eq!(policy.flags(), bits);
        assert!(!policy.require_clean_stack);
        assert_eq!(policy.max_script_element_size, DEFAULT_MAX_SCRIPT_ELEMENT_SIZE);
    }

    #[test]
    fn none_disables_everything() {
        let policy = Policy::from_flags(VERIFY_NONE).unwrap();
        assert_eq!(policy.flags(), 0);
        assert!(!policy.require_minimal_push);
    }

    #[test]
    fn step_budget_builder() {
        assert_eq!(Policy::default().with_max_steps(10).max_steps, Some(10));
    }
}
