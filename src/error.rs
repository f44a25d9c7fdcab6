//! The evaluation error taxonomy.
//!
//! Two broad classes matter to callers:
//!
//! - **type errors** (`SignednessMismatch`, `WrongSignForExponent`) are
//!   detected structurally before any value is computed. They indicate a
//!   synthesis-time logic defect and are propagated, never repaired.
//! - **value errors** (`ZeroDivision`, `NegativeSecondOperand`,
//!   `ArrayBounds`) arise from specific sample values. The first two are
//!   repairable in place (see [`crate::repair`]); out-of-bounds accesses
//!   abort the synthesis unit.
//!
//! Value errors carry the faulty sub-expression and whatever of its values
//! had been computed by the time the error was raised; the repair engine
//! needs both.

use thiserror::Error;

use crate::expr::Expr;
use crate::types::SolType;
use crate::value::Value;

/// Result type alias for evaluation and synthesis operations.
pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Errors raised by the evaluator and the synthesizers.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Signed and unsigned integer operands mixed in one operation.
    #[error("signedness mismatch between {lhs} and {rhs}")]
    SignednessMismatch { lhs: SolType, rhs: SolType },

    /// Exponentiation with signed operands; the language requires unsigned.
    #[error("exponentiation requires unsigned operands")]
    WrongSignForExponent,

    /// Division or modulo where the divisor evaluated to zero on some
    /// sample.
    #[error("division or modulo by zero")]
    ZeroDivision { faulty: Expr, observed: Vec<Value> },

    /// Shift or exponentiation where the count evaluated to a negative
    /// value on some sample.
    #[error("negative second operand for shift or exponentiation")]
    NegativeSecondOperand { faulty: Expr, observed: Vec<Value> },

    /// Array subscript out of range on some sample.
    #[error("array index out of bounds")]
    ArrayBounds { faulty: Expr, observed: Vec<Value> },

    /// A syntax-tree shape the lifting step does not model.
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),

    /// A synthesized predicate disagreed with its promised truth value.
    /// Always fatal: the synthesizer itself is unsound.
    #[error("consistency check failed: {0}")]
    Consistency(String),

    /// Malformed expression tree, registry miss, or broken invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EvalError {
    /// Whether this error belongs to the repairable value-error class.
    /// (`ArrayBounds` is a value error but has no repair strategy.)
    pub fn is_value_error(&self) -> bool {
        matches!(
            self,
            EvalError::ZeroDivision { .. }
                | EvalError::NegativeSecondOperand { .. }
                | EvalError::ArrayBounds { .. }
        )
    }

    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            EvalError::SignednessMismatch { .. } | EvalError::WrongSignForExponent
        )
    }
}
