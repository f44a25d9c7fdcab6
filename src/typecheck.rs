//! Operator definedness rules.
//!
//! These predicates answer, per operator category, which operand type
//! combinations are legal in the modeled language — independently of any
//! sample values, so they hold even for environments with zero recorded
//! samples. The synthesizers consult them before constructing a node; an
//! undefined combination that still reaches the evaluator is a logic
//! defect and surfaces as a type error there.

use crate::context::SynthesisFlags;
use crate::expr::{BinaryOp, Expr, UnaryOp};

pub struct TypeChecker;

impl TypeChecker {
    /// Whether `op` applied to `operand` is undefined.
    pub fn is_undefined_unary(op: UnaryOp, operand: &Expr, flags: &SynthesisFlags) -> bool {
        // The dynamic "bytes" type supports nothing but subscripts.
        if operand.ty().is_dynamic_bytes() {
            return true;
        }

        match op {
            UnaryOp::IncPre | UnaryOp::IncPost | UnaryOp::DecPre | UnaryOp::DecPost => {
                if !flags.allow_side_effects {
                    return true;
                }
                if !operand.ty().is_integer() {
                    return true;
                }
                // Only modifiable, variable-backed lvalues can be stepped;
                // literals and computed intermediates cannot.
                match operand.base_variable() {
                    Some(variable) => !variable.mutable,
                    None => true,
                }
            }
            UnaryOp::LogicNot => !operand.ty().is_bool(),
            UnaryOp::Neg => !operand.ty().is_integer(),
            UnaryOp::BitNot => !operand.ty().is_integer() && !operand.ty().is_fixed_bytes(),
        }
    }

    /// Whether `lhs op rhs` is undefined.
    pub fn is_undefined_binary(
        lhs: &Expr,
        op: BinaryOp,
        rhs: &Expr,
        flags: &SynthesisFlags,
    ) -> bool {
        if lhs.ty().is_dynamic_bytes() || rhs.ty().is_dynamic_bytes() {
            return true;
        }

        match op {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Rem
            | BinaryOp::Pow => {
                if !lhs.ty().is_integer() || !rhs.ty().is_integer() {
                    return true;
                }
                if op == BinaryOp::Pow {
                    if flags.avoid_exponentiation {
                        return true;
                    }
                    // The language defines ** for unsigned operands only.
                    if !lhs.ty().is_unsigned_integer() || !rhs.ty().is_unsigned_integer() {
                        return true;
                    }
                }
                false
            }
            BinaryOp::BitOr | BinaryOp::BitAnd | BinaryOp::BitXor => {
                let both_int = lhs.ty().is_integer() && rhs.ty().is_integer();
                let both_bytes = lhs.ty().is_fixed_bytes() && rhs.ty().is_fixed_bytes();
                !(both_int || both_bytes)
            }
            BinaryOp::Shl | BinaryOp::Shr => {
                if flags.avoid_shifts {
                    return true;
                }
                // Count must be an integer; the shifted operand may be an
                // integer or a fixed byte array.
                if !rhs.ty().is_integer() {
                    return true;
                }
                !lhs.ty().is_integer() && !lhs.ty().is_fixed_bytes()
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                if lhs.ty().is_string()
                    || lhs.ty().is_struct()
                    || lhs.ty().is_array()
                    || lhs.ty().is_mapping()
                {
                    return true;
                }
                // Fixed-bytes comparisons are allowed across sizes.
                if lhs.ty().is_fixed_bytes() && rhs.ty().is_fixed_bytes() {
                    return false;
                }
                !lhs.ty().same_type(rhs.ty())
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let both_int = lhs.ty().is_integer() && rhs.ty().is_integer();
                let both_bytes = lhs.ty().is_fixed_bytes() && rhs.ty().is_fixed_bytes();
                !(both_int || both_bytes)
            }
            BinaryOp::LogicAnd | BinaryOp::LogicOr => {
                if flags.avoid_logical_ops {
                    return true;
                }
                !lhs.ty().is_bool() || !rhs.ty().is_bool()
            }
        }
    }
}
