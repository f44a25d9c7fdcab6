//! Error repair: rewriting undefined sub-expressions into defined ones.
//!
//! When evaluation hits a value error — a divisor that is zero on some
//! sample, a shift count that is negative on some sample — the failing
//! sub-expression is replaced by a new expression guaranteed to avoid the
//! undefined condition on *every* currently available sample, and the whole
//! expression is evaluated once more. The retry policy is deliberately
//! explicit and shallow: [`evaluate_with_repair`] retries exactly once, and
//! a second error of any kind aborts the synthesis unit. No known scenario
//! requires nested repair — the two error classes arise in disjoint operator
//! contexts.
//!
//! Memoization makes the retry cheap and sound: the repaired replacement
//! consists of fresh nodes (recomputed), while every untouched node returns
//! its cached samples, so `++`/`--` side effects fire exactly once.

use log::debug;

use crate::context::SynthesisContext;
use crate::env::VariableEnvironment;
use crate::error::{EvalError, EvalResult};
use crate::eval::Evaluator;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::valgen::{IntegerPolicy, ValueGenerator};
use crate::value::{IntValue, Value};

/// Randomized offset attempts before falling back to the generic guard.
/// The exact number is not load-bearing; the guard always succeeds.
pub const ZERO_DIVISION_ATTEMPTS: usize = 10;

/// Evaluates `expr` over all samples, repairing at most one value error.
///
/// Returns the (possibly rewritten) expression together with its values.
/// Type errors and unrepairable value errors propagate immediately; an
/// error on the retried evaluation is fatal for this synthesis unit.
pub fn evaluate_with_repair(
    ctx: &mut SynthesisContext,
    evaluator: &mut Evaluator,
    env: &mut VariableEnvironment,
    expr: Expr,
) -> EvalResult<(Expr, Vec<Value>)> {
    let error = match evaluator.evaluate_all(env, &expr) {
        Ok(values) => return Ok((expr, values)),
        Err(error) => error,
    };

    let (faulty, fixed) = match &error {
        EvalError::ZeroDivision { faulty, observed } => (
            faulty.clone(),
            RepairEngine::fix_zero_division(ctx, evaluator, env, faulty, observed)?,
        ),
        EvalError::NegativeSecondOperand { faulty, observed } => (
            faulty.clone(),
            RepairEngine::fix_negative_operand(faulty, observed)?,
        ),
        _ => return Err(error),
    };

    debug!("repairing {error}: rewriting one operand");
    let rewritten = expr.replace(faulty.id(), &fixed);
    let values = evaluator.evaluate_all(env, &rewritten)?;
    Ok((rewritten, values))
}

pub struct RepairEngine;

impl RepairEngine {
    /// Replaces a sometimes-zero divisor with `k + divisor` (or
    /// `k - divisor`) for a small random `k` that is verified nonzero
    /// against every observed sample, falling back to the generic
    /// `(divisor != 0 ? c1 : c2)` guard when no offset works out.
    pub fn fix_zero_division(
        ctx: &mut SynthesisContext,
        evaluator: &mut Evaluator,
        env: &mut VariableEnvironment,
        faulty: &Expr,
        observed: &[Value],
    ) -> EvalResult<Expr> {
        let ty = faulty.ty().clone();
        if !ty.is_integer() {
            return Err(EvalError::Internal(format!(
                "zero-division repair on non-integer type {ty}"
            )));
        }

        for _ in 0..ZERO_DIVISION_ATTEMPTS {
            let candidate =
                ValueGenerator::random_value(ctx, &ty, IntegerPolicy::ExclusivelySmall)?;
            let candidate = match candidate {
                Value::Int(v) => v,
                _ => unreachable!("integer policy produced non-integer"),
            };

            let mut addition_ok = true;
            let mut subtraction_ok = true;
            for value in observed {
                let value = value.as_int().ok_or_else(|| {
                    EvalError::Internal("non-integer divisor sample".into())
                })?;
                if addition_ok && value.add(&candidate).is_zero() {
                    addition_ok = false;
                }
                if subtraction_ok && value.sub(&candidate).is_zero() {
                    subtraction_ok = false;
                }
                if !addition_ok && !subtraction_ok {
                    break;
                }
            }

            if addition_ok || subtraction_ok {
                let constant = Expr::literal(Value::Int(candidate));
                // Populate the constant's slots for every sample up front:
                // later re-evaluation may ask for single-sample slices.
                evaluator.evaluate_all(env, &constant)?;
                let op = if addition_ok {
                    BinaryOp::Add
                } else {
                    BinaryOp::Sub
                };
                // The constant goes first so the offset operand is fully
                // evaluated before the order-sensitive original.
                return Ok(Expr::binary(constant, op, faulty.clone()));
            }
        }

        debug!("offset search exhausted, using generic divisor guard");
        Ok(make_operand_safe(ctx, BinaryOp::Div, faulty.clone()))
    }

    /// Makes a sometimes-negative shift/exponent count non-negative.
    ///
    /// With a single sample in play a plain negation suffices (adjusting
    /// the signed minimum, whose negation is itself, by adding 1 first).
    /// With several samples the sign may vary, so the count is wrapped in
    /// `(count < 0 ? -count : count)`.
    pub fn fix_negative_operand(faulty: &Expr, observed: &[Value]) -> EvalResult<Expr> {
        if observed.len() > 1 {
            let zero = Expr::literal(Value::Int(int_of(faulty, 0)?));
            let is_negative = Expr::binary(faulty.clone(), BinaryOp::Lt, zero);
            let negated = Expr::unary(UnaryOp::Neg, faulty.clone());
            return Ok(Expr::conditional(is_negative, negated, faulty.clone()));
        }

        let value = observed
            .first()
            .and_then(Value::as_int)
            .ok_or_else(|| EvalError::Internal("no observed operand value".into()))?;
        let mut adjusted = faulty.clone();
        if value.signed() && value.eq_value(&value.min_value()) {
            // MIN negates to itself; nudge to MIN+1 first.
            adjusted = Expr::binary(
                adjusted,
                BinaryOp::Add,
                Expr::literal(Value::Int(int_of(faulty, 1)?)),
            );
        }
        Ok(Expr::unary(UnaryOp::Neg, adjusted))
    }
}

/// Proactive guard for operators with value-dependent undefined inputs,
/// applied by the synthesizer before use: division and modulo get an
/// always-nonzero divisor, shifts get an always-non-negative count. The
/// guard branches are fresh constants rather than the operand itself —
/// reusing the operand would double its side effects on re-evaluation.
pub fn make_operand_safe(
    ctx: &mut SynthesisContext,
    op: BinaryOp,
    second_operand: Expr,
) -> Expr {
    let (signed, bits) = match second_operand.ty() {
        crate::types::SolType::Int { signed, bits } => (*signed, *bits),
        // Non-integer second operands have no value-dependent hazards.
        _ => return second_operand,
    };
    let small = |ctx: &mut SynthesisContext| {
        Expr::literal(Value::Int(IntValue::from_i64(
            signed,
            bits,
            ctx.int_in_range(1, 5),
        )))
    };
    let zero = Expr::literal(Value::Int(IntValue::from_i64(signed, bits, 0)));

    match op {
        BinaryOp::Div | BinaryOp::Rem => {
            // x / y  becomes  x / (y != 0 ? c1 : c2). The original operand
            // must not reappear in a branch: its side effects would fire a
            // second time on re-evaluation.
            let check = Expr::binary(second_operand, BinaryOp::Ne, zero);
            let c1 = small(ctx);
            let c2 = small(ctx);
            Expr::conditional(check, c1, c2)
        }
        BinaryOp::Shl | BinaryOp::Shr => {
            let check = Expr::binary(second_operand, BinaryOp::Lt, zero);
            let c1 = small(ctx);
            let c2 = small(ctx);
            Expr::conditional(check, c1, c2)
        }
        _ => second_operand,
    }
}

fn int_of(expr: &Expr, value: i64) -> EvalResult<IntValue> {
    match expr.ty() {
        crate::types::SolType::Int { signed, bits } => {
            Ok(IntValue::from_i64(*signed, *bits, value))
        }
        other => Err(EvalError::Internal(format!(
            "integer repair on non-integer type {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use test_log::test;

    use super::*;
    use crate::env::variable;
    use crate::types::SolType;

    fn u8lit(v: i64) -> Expr {
        Expr::literal(Value::int(false, 8, v))
    }

    fn replay_env(name: &str, ty: SolType, samples: Vec<Value>) -> VariableEnvironment {
        let mut env = VariableEnvironment::replay(samples.len());
        env.add_variable_with_values(variable(name, ty), samples)
            .unwrap();
        env
    }

    #[test]
    fn test_zero_division_repair_preserves_definedness() {
        // x % y with y taking 0 on the first sample.
        let mut env = replay_env(
            "y",
            SolType::uint(8),
            vec![
                Value::int(false, 8, 0),
                Value::int(false, 8, 5),
                Value::int(false, 8, 13),
            ],
        );
        let mut ctx = SynthesisContext::seeded(1);
        let mut evaluator = Evaluator::new();

        let y = Expr::var(Rc::clone(env.lookup("y").unwrap().variable()));
        let modulo = Expr::binary(u8lit(100), BinaryOp::Rem, y);

        let (repaired, values) =
            evaluate_with_repair(&mut ctx, &mut evaluator, &mut env, modulo).unwrap();
        assert_eq!(values.len(), 3);

        // Re-evaluating the repaired expression never raises again.
        let mut fresh = Evaluator::new();
        let again = fresh.evaluate_all(&mut env, &repaired).unwrap();
        assert_eq!(values, again);
    }

    #[test]
    fn test_negative_shift_single_sample_negates() {
        let mut env = replay_env(
            "e",
            SolType::int(true, 8),
            vec![Value::int(true, 8, -3)],
        );
        let mut ctx = SynthesisContext::seeded(2);
        let mut evaluator = Evaluator::new();

        let e = Expr::var(Rc::clone(env.lookup("e").unwrap().variable()));
        let shift = Expr::binary(
            Expr::literal(Value::int(true, 8, 4)),
            BinaryOp::Shl,
            e,
        );
        let (_, values) =
            evaluate_with_repair(&mut ctx, &mut evaluator, &mut env, shift).unwrap();
        // 4 << -(-3) = 32
        assert_eq!(values, vec![Value::int(true, 8, 32)]);
    }

    #[test]
    fn test_negative_shift_varying_sign_uses_conditional() {
        let mut env = replay_env(
            "e",
            SolType::int(true, 8),
            vec![Value::int(true, 8, -2), Value::int(true, 8, 3)],
        );
        let mut ctx = SynthesisContext::seeded(3);
        let mut evaluator = Evaluator::new();

        let e = Expr::var(Rc::clone(env.lookup("e").unwrap().variable()));
        let shift = Expr::binary(
            Expr::literal(Value::int(true, 8, 1)),
            BinaryOp::Shl,
            e,
        );
        let (_, values) =
            evaluate_with_repair(&mut ctx, &mut evaluator, &mut env, shift).unwrap();
        // Sample 0 negates (-2 -> 2), sample 1 stays: 1<<2, 1<<3.
        assert_eq!(
            values,
            vec![Value::int(true, 8, 4), Value::int(true, 8, 8)]
        );
    }

    #[test]
    fn test_signed_minimum_edge_case() {
        let mut env = replay_env(
            "e",
            SolType::int(true, 8),
            vec![Value::int(true, 8, -128)],
        );
        let mut ctx = SynthesisContext::seeded(4);
        let mut evaluator = Evaluator::new();

        let e = Expr::var(Rc::clone(env.lookup("e").unwrap().variable()));
        let shift = Expr::binary(
            Expr::literal(Value::int(true, 8, 1)),
            BinaryOp::Shl,
            e,
        );
        // -(-128 + 1) = 127; 1 << 127 wraps to 0 in 8 bits. The point is
        // that the repair itself is defined.
        let (_, values) =
            evaluate_with_repair(&mut ctx, &mut evaluator, &mut env, shift).unwrap();
        assert_eq!(values, vec![Value::int(true, 8, 0)]);
    }

    #[test]
    fn test_generic_guard_is_always_nonzero() {
        let mut env = replay_env(
            "y",
            SolType::uint(8),
            vec![Value::int(false, 8, 0), Value::int(false, 8, 7)],
        );
        let mut ctx = SynthesisContext::seeded(5);
        let mut evaluator = Evaluator::new();

        let y = Expr::var(Rc::clone(env.lookup("y").unwrap().variable()));
        let guarded = make_operand_safe(&mut ctx, BinaryOp::Div, y);
        let values = evaluator.evaluate_all(&mut env, &guarded).unwrap();
        for value in values {
            assert!(!value.as_int().unwrap().is_zero());
        }
    }

    #[test]
    fn test_array_bounds_is_not_repaired() {
        use crate::value::ArrayValue;

        let mut env = VariableEnvironment::replay(1);
        env.add_variable_with_values(
            variable("a", SolType::Array(Box::new(SolType::uint(8)))),
            vec![Value::Array(ArrayValue::new(
                SolType::uint(8),
                vec![Value::int(false, 8, 1)],
            ))],
        )
        .unwrap();
        let mut ctx = SynthesisContext::seeded(6);
        let mut evaluator = Evaluator::new();

        let a = Expr::var(Rc::clone(env.lookup("a").unwrap().variable()));
        let access = Expr::index(a, u8lit(5)).unwrap();
        assert!(matches!(
            evaluate_with_repair(&mut ctx, &mut evaluator, &mut env, access),
            Err(EvalError::ArrayBounds { .. })
        ));
    }

    #[test]
    fn test_repair_does_not_refire_side_effects() {
        // Recording mode: x++ % y with y == 0 forces a repair; the
        // increment must still fire exactly once.
        let mut env = VariableEnvironment::recording();
        let x = variable("x", SolType::uint(8));
        let y = variable("y", SolType::uint(8));
        env.add_variable_with_values(Rc::clone(&x), vec![Value::int(false, 8, 10)])
            .unwrap();
        env.add_variable_with_values(Rc::clone(&y), vec![Value::int(false, 8, 0)])
            .unwrap();
        let mut ctx = SynthesisContext::seeded(7);
        let mut evaluator = Evaluator::new();

        let stepped = Expr::unary(UnaryOp::IncPost, Expr::var(Rc::clone(&x)));
        let modulo = Expr::binary(stepped, BinaryOp::Rem, Expr::var(Rc::clone(&y)));
        let (_, values) =
            evaluate_with_repair(&mut ctx, &mut evaluator, &mut env, modulo).unwrap();
        assert_eq!(values.len(), 1);
        // Exactly one increment despite the second evaluation pass.
        assert_eq!(env.resolve(0, "x").unwrap(), Value::int(false, 8, 11));
    }
}
