// This module defines error types for the lanegen backend using the thiserror
// crate for idiomatic Rust error handling. CodegenError is the main error enum
// covering two families of failures: usage errors (type mismatches, constants
// outside an operator's accepted domain, bad array indices, overload
// resolution failures) which are raised before any instruction is emitted and
// are recoverable by rejecting the offending operation, and internal errors
// (invariant violations such as double-released registers or decomposition
// count mismatches, and register-pool exhaustion) which indicate a lowering
// strategy bug and abort compilation of the current kernel. Each variant
// carries the context needed to report the offending operator, operand types,
// and tier. The module also provides CodegenResult<T> as a convenience alias.

//! Error types for the code-generation backend.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

use super::regalloc::RegClass;

/// Main error type for kernel code generation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodegenError {
    #[error("operator '{op}' does not accept operand of type {found}")]
    TypeMismatch { op: String, found: String },

    #[error("constant {value} out of range for operator '{op}'")]
    ConstantOutOfRange { op: String, value: String },

    #[error("negative array index {index}")]
    NegativeIndex { index: i64 },

    #[error("array index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: i64, len: u64 },

    #[error("no matching overload for '{op}' with operands ({signature})")]
    NoMatchingOverload { op: String, signature: String },

    #[error("ambiguous overload for '{op}' with operands ({signature})")]
    AmbiguousOverload { op: String, signature: String },

    #[error("operation '{op}' not supported for {ty}")]
    UnsupportedOperation { op: String, ty: String },

    #[error("register pool for class {class:?} exhausted")]
    Exhausted { class: RegClass },

    #[error("invariant violation: {reason}")]
    InvariantViolation { reason: String },
}

impl CodegenError {
    /// Whether this error is a recoverable usage error (raised strictly
    /// before emission) as opposed to a fatal internal error.
    pub fn is_usage(&self) -> bool {
        !matches!(
            self,
            CodegenError::Exhausted { .. } | CodegenError::InvariantViolation { .. }
        )
    }

    /// Internal-error constructor that stamps operator/tier context into the
    /// report, since invariant violations abort the whole kernel.
    pub fn invariant(op: &str, tier: super::isa::Tier, reason: impl Into<String>) -> Self {
        CodegenError::InvariantViolation {
            reason: format!("{} (operator '{}', tier {})", reason.into(), op, tier.name()),
        }
    }
}

/// Result type alias for code-generation operations.
pub type CodegenResult<T> = Result<T, CodegenError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::isa::Tier;

    #[test]
    fn usage_classification() {
        let usage = CodegenError::NegativeIndex { index: -1 };
        assert!(usage.is_usage());

        let fatal = CodegenError::Exhausted {
            class: RegClass::Xmm,
        };
        assert!(!fatal.is_usage());

        let violation = CodegenError::invariant("add", Tier::Avx2, "double release");
        assert!(!violation.is_usage());
        assert!(violation.to_string().contains("add"));
        assert!(violation.to_string().contains("avx2"));
    }
}
