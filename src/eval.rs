//! The multi-sample expression evaluator.
//!
//! [`Evaluator`] computes an expression's value for every sample of a
//! [`VariableEnvironment`] at once. Evaluation is operand-first and
//! memoized: the evaluator owns a table keyed by node id (not a cache field
//! on the node), so a repaired subtree — which consists of fresh nodes —
//! invalidates nothing and never sees stale slots, while the unchanged
//! remainder of the tree is *not* recomputed on the post-repair pass. That
//! last property is what keeps `++`/`--` side effects from firing twice.
//!
//! Short-circuiting is per sample, not global: for `a && b`, `b` is
//! evaluated only for the samples where `a` is true. Conditionals evaluate
//! the untaken branch for no sample at all — required, because the untaken
//! branch may be undefined for exactly those samples' values.

use std::collections::HashMap;

use log::{debug, trace};
use num_traits::ToPrimitive;
use tiny_keccak::{Hasher, Keccak};

use crate::env::VariableEnvironment;
use crate::error::{EvalError, EvalResult};
use crate::expr::{BinaryOp, Expr, ExprId, ExprKind, UnaryOp};
use crate::types::SolType;
use crate::value::{BytesValue, IntValue, Value};

/// Per-node memoized sample values; slots fill as samples are evaluated.
type SampleSlots = Vec<Option<Value>>;

/// Evaluates expressions over all samples of an environment, with
/// memoization and per-sample short-circuiting.
///
/// One evaluator serves one synthesis pass over one environment. Discard
/// it (or [`clear`](Evaluator::clear) it) when the environment's recorded
/// values change, e.g. between statements in recording mode.
#[derive(Debug, Default)]
pub struct Evaluator {
    slots: HashMap<ExprId, SampleSlots>,
    hits: usize,
    misses: usize,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of memo-table hits.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Number of memo-table misses.
    pub fn misses(&self) -> usize {
        self.misses
    }

    /// Drops all memoized results.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Evaluates `expr` for every sample in `env`.
    pub fn evaluate_all(
        &mut self,
        env: &mut VariableEnvironment,
        expr: &Expr,
    ) -> EvalResult<Vec<Value>> {
        self.evaluate(env, expr, None)
    }

    /// Evaluates `expr` for the single sample `sample`.
    pub fn evaluate_one(
        &mut self,
        env: &mut VariableEnvironment,
        sample: usize,
        expr: &Expr,
    ) -> EvalResult<Value> {
        let mut values = self.evaluate(env, expr, Some(sample))?;
        values.pop().ok_or_else(|| {
            EvalError::Internal("single-sample evaluation produced no value".into())
        })
    }

    /// Core recursion. `sample == None` means all samples; the result
    /// vector is aligned with the requested sample indices.
    fn evaluate(
        &mut self,
        env: &mut VariableEnvironment,
        expr: &Expr,
        sample: Option<usize>,
    ) -> EvalResult<Vec<Value>> {
        // An evaluation alias overrides the node entirely: the call
        // renders as a call but computes through its body expression.
        if let Some(alias) = expr.eval_alias() {
            return self.evaluate(env, &alias.clone(), sample);
        }

        let total = env.sample_count();
        let indices: Vec<usize> = match sample {
            Some(i) => vec![i],
            None => (0..total).collect(),
        };

        if let Some(slots) = self.slots.get(&expr.id()) {
            if indices.iter().all(|&i| slots[i].is_some()) {
                self.hits += 1;
                return Ok(indices
                    .iter()
                    .map(|&i| slots[i].clone().expect("checked above"))
                    .collect());
            }
        }
        self.misses += 1;

        let values = self.compute(env, expr, &indices)?;
        debug_assert_eq!(values.len(), indices.len());

        let entry = self
            .slots
            .entry(expr.id())
            .or_insert_with(|| vec![None; total]);
        for (slot, value) in indices.iter().zip(&values) {
            entry[*slot] = Some(value.clone());
        }
        Ok(values)
    }

    fn compute(
        &mut self,
        env: &mut VariableEnvironment,
        expr: &Expr,
        indices: &[usize],
    ) -> EvalResult<Vec<Value>> {
        match expr.kind() {
            ExprKind::Literal(value) => Ok(vec![value.clone(); indices.len()]),
            ExprKind::Var(variable) => indices
                .iter()
                .map(|&i| env.resolve(i, &variable.name))
                .collect(),
            ExprKind::Unary { op, operand } => {
                let sample = single(indices);
                let operand_values = self.evaluate(env, operand, sample)?;
                operand_values
                    .into_iter()
                    .map(|v| self.apply_unary(env, *op, v, operand))
                    .collect()
            }
            ExprKind::Binary { op, lhs, rhs } => self.compute_binary(env, indices, *op, lhs, rhs),
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                let sample = single(indices);
                let cond_values = self.evaluate(env, cond, sample)?;
                let mut out = Vec::with_capacity(indices.len());
                for (k, &i) in indices.iter().enumerate() {
                    let taken = cond_values[k].as_bool().ok_or_else(|| {
                        EvalError::Internal("conditional operator without bool condition".into())
                    })?;
                    // Only the taken branch, only for this sample.
                    let branch = if taken { then_branch } else { else_branch };
                    out.push(self.evaluate_one(env, i, branch)?);
                }
                Ok(out)
            }
            ExprKind::Member { base, field } => {
                let sample = single(indices);
                let base_values = self.evaluate(env, base, sample)?;
                base_values
                    .into_iter()
                    .map(|v| match v {
                        Value::Struct(s) => s.member(field).cloned().ok_or_else(|| {
                            EvalError::Internal(format!(
                                "unknown struct member {field} of {}",
                                s.def.name
                            ))
                        }),
                        _ => Err(EvalError::Internal(
                            "member access on non-struct value".into(),
                        )),
                    })
                    .collect()
            }
            ExprKind::Index { base, index } => {
                let sample = single(indices);
                let base_values = self.evaluate(env, base, sample)?;
                let index_values = self.evaluate(env, index, sample)?;
                let mut out = Vec::with_capacity(indices.len());
                for (array, idx) in base_values.iter().zip(&index_values) {
                    let array = match array {
                        Value::Array(a) => a,
                        _ => {
                            return Err(EvalError::Internal(
                                "index access on non-array value".into(),
                            ))
                        }
                    };
                    let idx = idx.as_int().ok_or_else(|| {
                        EvalError::Internal("non-integer array subscript".into())
                    })?;
                    let in_range = !idx.is_negative()
                        && idx.lt(&IntValue::from_i64(idx.signed(), idx.bits().max(64), array.len() as i64));
                    if !in_range {
                        return Err(EvalError::ArrayBounds {
                            faulty: index.clone(),
                            observed: index_values.clone(),
                        });
                    }
                    let slot = idx
                        .magnitude()
                        .to_usize()
                        .ok_or_else(|| EvalError::Internal("array index overflow".into()))?;
                    out.push(array.elements[slot].clone());
                }
                Ok(out)
            }
            ExprKind::Cast { operand, target } => {
                let sample = single(indices);
                let operand_values = self.evaluate(env, operand, sample)?;
                if operand.ty().same_type(target) {
                    return Ok(operand_values);
                }
                operand_values
                    .into_iter()
                    .map(|v| cast_value(&v, target))
                    .collect()
            }
            ExprKind::Call { callee, arguments } => {
                if callee == "keccak256" {
                    let argument = arguments.first().ok_or_else(|| {
                        EvalError::Internal("keccak256 call without argument".into())
                    })?;
                    let sample = single(indices);
                    let argument_values = self.evaluate(env, argument, sample)?;
                    argument_values
                        .iter()
                        .map(|v| {
                            let data = v.hash_input().ok_or_else(|| {
                                EvalError::Internal(
                                    "keccak256 over non-hashable value".into(),
                                )
                            })?;
                            Ok(Value::Bytes(BytesValue::fixed(keccak256(&data).to_vec())))
                        })
                        .collect()
                } else {
                    // Synthesized calls always carry an evaluation alias;
                    // anything else cannot be computed by this engine.
                    Err(EvalError::UnsupportedConstruct(format!(
                        "call to function {callee} without evaluation alias"
                    )))
                }
            }
            ExprKind::Assign { lhs, rhs } => {
                let sample = single(indices);
                let rhs_values = self.evaluate(env, rhs, sample)?;
                let mut out = Vec::with_capacity(indices.len());
                for value in rhs_values {
                    // Implicit conversion to the target's type happens as
                    // part of the assignment.
                    let converted = if value.sol_type().same_type(lhs.ty()) {
                        value
                    } else {
                        cast_value(&value, lhs.ty())?
                    };
                    update_through(env, lhs, converted.clone())?;
                    out.push(converted);
                }
                Ok(out)
            }
            ExprKind::Tuple(parts) => {
                let sample = single(indices);
                let mut per_part = Vec::with_capacity(parts.len());
                for part in parts {
                    per_part.push(self.evaluate(env, part, sample)?);
                }
                Ok((0..indices.len())
                    .map(|k| Value::Tuple(per_part.iter().map(|vals| vals[k].clone()).collect()))
                    .collect())
            }
        }
    }

    fn compute_binary(
        &mut self,
        env: &mut VariableEnvironment,
        indices: &[usize],
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> EvalResult<Vec<Value>> {
        let sample = single(indices);
        let lhs_values = self.evaluate(env, lhs, sample)?;

        // Structural checks, independent of sample values (and therefore
        // meaningful even for empty sample sets).
        if let (
            SolType::Int { signed: ls, .. },
            SolType::Int { signed: rs, .. },
        ) = (lhs.ty(), rhs.ty())
        {
            if ls != rs {
                return Err(EvalError::SignednessMismatch {
                    lhs: lhs.ty().clone(),
                    rhs: rhs.ty().clone(),
                });
            }
            if *ls && op == BinaryOp::Pow {
                return Err(EvalError::WrongSignForExponent);
            }
        }

        if op.is_logical() {
            let mut out = Vec::with_capacity(indices.len());
            for (k, &i) in indices.iter().enumerate() {
                let left = lhs_values[k].as_bool().ok_or_else(|| {
                    EvalError::Internal("logical operator on non-bool operand".into())
                })?;
                let decided = match op {
                    BinaryOp::LogicAnd if !left => Some(false),
                    BinaryOp::LogicOr if left => Some(true),
                    _ => None,
                };
                match decided {
                    Some(result) => {
                        trace!("short-circuit {} at sample {i}", op.token());
                        out.push(Value::Bool(result));
                    }
                    None => {
                        let right = self.evaluate_one(env, i, rhs)?;
                        let right = right.as_bool().ok_or_else(|| {
                            EvalError::Internal("logical operator on non-bool operand".into())
                        })?;
                        out.push(Value::Bool(right));
                    }
                }
            }
            return Ok(out);
        }

        // Every other operator evaluates its second operand for all
        // requested samples before combining: a complete value vector is
        // what makes the repair strategies able to fix all samples at once.
        let rhs_values = self.evaluate(env, rhs, sample)?;

        indices
            .iter()
            .enumerate()
            .map(|(k, _)| apply_binary(&lhs_values[k], op, &rhs_values[k], rhs, &rhs_values))
            .collect()
    }

    fn apply_unary(
        &mut self,
        env: &mut VariableEnvironment,
        op: UnaryOp,
        value: Value,
        operand: &Expr,
    ) -> EvalResult<Value> {
        match (op, &value) {
            (UnaryOp::LogicNot, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Neg, Value::Int(v)) => Ok(Value::Int(v.neg())),
            (UnaryOp::BitNot, Value::Int(v)) => Ok(Value::Int(v.not_bits())),
            (UnaryOp::BitNot, Value::Bytes(v)) => Ok(Value::Bytes(v.not_bits())),
            (
                UnaryOp::IncPre | UnaryOp::IncPost | UnaryOp::DecPre | UnaryOp::DecPost,
                Value::Int(v),
            ) => {
                let one = IntValue::same_type_as(v, 1);
                let stepped = match op {
                    UnaryOp::IncPre | UnaryOp::IncPost => v.add(&one),
                    _ => v.sub(&one),
                };
                // The write-back only exists in recording mode; replaying
                // profiled samples never mutates the environment.
                if env.is_recording() {
                    debug!(
                        "side effect: {}{}",
                        operand
                            .base_variable()
                            .map(|v| v.name.as_str())
                            .unwrap_or("<non-variable>"),
                        op.token()
                    );
                    update_through(env, operand, Value::Int(stepped.clone()))?;
                }
                let result = if op.is_prefix() { stepped } else { v.clone() };
                Ok(Value::Int(result))
            }
            _ => Err(EvalError::Internal(format!(
                "unary operator {} on {}",
                op.token(),
                value.sol_type()
            ))),
        }
    }
}

/// `Some(i)` for a single-sample request, `None` for an all-sample pass.
fn single(indices: &[usize]) -> Option<usize> {
    match indices {
        [one] => Some(*one),
        _ => None,
    }
}

/// The builtin hash over raw bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

/// Writes `value` into the variable an lvalue expression denotes,
/// descending through struct member accesses.
fn update_through(
    env: &mut VariableEnvironment,
    lvalue: &Expr,
    value: Value,
) -> EvalResult<()> {
    let variable = lvalue.base_variable().ok_or_else(|| {
        EvalError::Internal("assignment target is not variable-backed".into())
    })?;
    let variable = variable.clone();
    let path = lvalue.member_path();
    if path.is_empty() {
        return env.update(&variable, value);
    }
    let current = env.resolve(0, &variable.name)?;
    let rebuilt = set_member(&current, &path, value)?;
    env.update(&variable, rebuilt)
}

/// Rebuilds a (possibly nested) struct value with one member replaced.
fn set_member(container: &Value, path: &[String], new_value: Value) -> EvalResult<Value> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(new_value);
    };
    let Value::Struct(outer) = container else {
        return Err(EvalError::Internal(
            "member update on non-struct value".into(),
        ));
    };
    let inner = outer
        .member(head)
        .ok_or_else(|| EvalError::Internal(format!("unknown struct member {head}")))?;
    let updated = set_member(inner, rest, new_value)?;
    let rebuilt = outer
        .with_member(head, updated)
        .ok_or_else(|| EvalError::Internal(format!("unknown struct member {head}")))?;
    Ok(Value::Struct(rebuilt))
}

/// Applies one binary operator to one pair of sample values. On a
/// value-dependent undefined condition the error names the second operand
/// expression and hands over every second-operand value computed so far.
fn apply_binary(
    lhs: &Value,
    op: BinaryOp,
    rhs: &Value,
    rhs_expr: &Expr,
    rhs_observed: &[Value],
) -> EvalResult<Value> {
    use BinaryOp::*;

    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            if a.signed() != b.signed() {
                return Err(EvalError::SignednessMismatch {
                    lhs: a.sol_type(),
                    rhs: b.sol_type(),
                });
            }
            if a.bits() != b.bits() {
                return Err(EvalError::Internal(format!(
                    "width mismatch between {} and {}",
                    a.sol_type(),
                    b.sol_type()
                )));
            }
            match op {
                Add => Ok(Value::Int(a.add(b))),
                Sub => Ok(Value::Int(a.sub(b))),
                Mul => Ok(Value::Int(a.mul(b))),
                Div | Rem => {
                    if b.is_zero() {
                        return Err(EvalError::ZeroDivision {
                            faulty: rhs_expr.clone(),
                            observed: rhs_observed.to_vec(),
                        });
                    }
                    Ok(Value::Int(if op == Div { a.div(b) } else { a.rem(b) }))
                }
                Pow => {
                    if b.is_negative() {
                        return Err(EvalError::NegativeSecondOperand {
                            faulty: rhs_expr.clone(),
                            observed: rhs_observed.to_vec(),
                        });
                    }
                    Ok(Value::Int(a.pow(b)))
                }
                Shl | Shr => {
                    if b.is_negative() {
                        return Err(EvalError::NegativeSecondOperand {
                            faulty: rhs_expr.clone(),
                            observed: rhs_observed.to_vec(),
                        });
                    }
                    Ok(Value::Int(if op == Shl { a.shl(b) } else { a.shr(b) }))
                }
                BitOr => Ok(Value::Int(a.or_bits(b))),
                BitAnd => Ok(Value::Int(a.and_bits(b))),
                BitXor => Ok(Value::Int(a.xor_bits(b))),
                Eq => Ok(Value::Bool(a.eq_value(b))),
                Ne => Ok(Value::Bool(!a.eq_value(b))),
                Lt => Ok(Value::Bool(a.lt(b))),
                Le => Ok(Value::Bool(a.le(b))),
                Gt => Ok(Value::Bool(a.gt(b))),
                Ge => Ok(Value::Bool(a.ge(b))),
                LogicAnd | LogicOr => Err(EvalError::Internal(
                    "logical operator reached value combination".into(),
                )),
            }
        }
        (Value::Bool(a), Value::Bool(b)) => match op {
            Eq => Ok(Value::Bool(a == b)),
            Ne => Ok(Value::Bool(a != b)),
            _ => Err(EvalError::Internal(format!(
                "binary operator {} on bool operands",
                op.token()
            ))),
        },
        (Value::Bytes(a), Value::Int(b)) => match op {
            Shl | Shr => {
                if b.is_negative() {
                    return Err(EvalError::NegativeSecondOperand {
                        faulty: rhs_expr.clone(),
                        observed: rhs_observed.to_vec(),
                    });
                }
                Ok(Value::Bytes(if op == Shl { a.shl(b) } else { a.shr(b) }))
            }
            _ => Err(EvalError::Internal(format!(
                "binary operator {} on bytes and integer operands",
                op.token()
            ))),
        },
        (Value::Bytes(a), Value::Bytes(b)) => match op {
            Eq => Ok(Value::Bool(a.eq_value(b))),
            Ne => Ok(Value::Bool(!a.eq_value(b))),
            Lt => Ok(Value::Bool(a.lt(b))),
            Le => Ok(Value::Bool(a.le(b))),
            Gt => Ok(Value::Bool(a.gt(b))),
            Ge => Ok(Value::Bool(a.ge(b))),
            BitOr | BitAnd | BitXor => {
                if a.size() != b.size() {
                    return Err(EvalError::Internal(format!(
                        "bytes size mismatch: {} vs {}",
                        a.size(),
                        b.size()
                    )));
                }
                Ok(Value::Bytes(match op {
                    BitOr => a.or_bits(b),
                    BitAnd => a.and_bits(b),
                    _ => a.xor_bits(b),
                }))
            }
            _ => Err(EvalError::Internal(format!(
                "binary operator {} on bytes operands",
                op.token()
            ))),
        },
        (Value::Address(a), Value::Address(b)) => match op {
            Eq => Ok(Value::Bool(a == b)),
            Ne => Ok(Value::Bool(a != b)),
            _ => Err(EvalError::Internal(format!(
                "binary operator {} on address operands",
                op.token()
            ))),
        },
        (Value::Enum(a), Value::Enum(b)) => match op {
            Eq => Ok(Value::Bool(a == b)),
            Ne => Ok(Value::Bool(a != b)),
            _ => Err(EvalError::Internal(format!(
                "binary operator {} on enum operands",
                op.token()
            ))),
        },
        (a, b) => Err(EvalError::Internal(format!(
            "operand type combination {} and {} for operator {}",
            a.sol_type(),
            b.sol_type(),
            op.token()
        ))),
    }
}

/// Casts one value to a target type. Only the conversions the modeled
/// language defines exist; anything else is an internal error because the
/// converter never builds such a cast.
pub fn cast_value(value: &Value, target: &SolType) -> EvalResult<Value> {
    match (value, target) {
        (Value::Int(v), SolType::Int { signed, bits }) => {
            Ok(Value::Int(v.cast_int(*signed, *bits)))
        }
        (Value::Int(v), SolType::Bytes(size)) if *size > 0 => {
            Ok(Value::Bytes(v.cast_bytes(*size)))
        }
        (Value::Int(v), SolType::Address) => Ok(Value::Address(v.cast_address())),
        (Value::Bytes(v), SolType::Bytes(size)) if *size > 0 => {
            Ok(Value::Bytes(v.cast_bytes(*size)))
        }
        (Value::Bytes(v), SolType::Int { signed, bits }) => {
            Ok(Value::Int(v.cast_int(*signed, *bits)))
        }
        (Value::Bytes(v), SolType::Address) => Ok(Value::Address(v.cast_address())),
        (Value::Address(v), SolType::Int { signed, bits }) => {
            Ok(Value::Int(v.cast_int(*signed, *bits)))
        }
        (Value::Address(v), SolType::Bytes(size)) if *size > 0 => {
            Ok(Value::Bytes(v.cast_int(false, 160).cast_bytes(*size)))
        }
        (Value::Enum(v), SolType::Int { signed, bits }) => Ok(Value::Int(
            IntValue::from_i64(*signed, *bits, v.ordinal as i64),
        )),
        (Value::Str(s), SolType::Bytes(0)) => {
            Ok(Value::Bytes(BytesValue::dynamic(s.as_bytes().to_vec())))
        }
        (v, t) => Err(EvalError::Internal(format!(
            "cast from {} to {t}",
            v.sol_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use test_log::test;

    use super::*;
    use crate::env::variable;

    fn u8lit(v: i64) -> Expr {
        Expr::literal(Value::int(false, 8, v))
    }

    fn env_with_u8(name: &str, samples: &[i64]) -> VariableEnvironment {
        let mut env = VariableEnvironment::replay(samples.len());
        let var = variable(name, SolType::uint(8));
        env.add_variable_with_values(
            var,
            samples.iter().map(|&v| Value::int(false, 8, v)).collect(),
        )
        .unwrap();
        env
    }

    fn var_expr(env: &VariableEnvironment, name: &str) -> Expr {
        Expr::var(Rc::clone(env.lookup(name).unwrap().variable()))
    }

    #[test]
    fn test_literal_and_variable() {
        let mut env = env_with_u8("x", &[1, 2, 3]);
        let mut eval = Evaluator::new();

        let lit = u8lit(7);
        assert_eq!(
            eval.evaluate_all(&mut env, &lit).unwrap(),
            vec![Value::int(false, 8, 7); 3]
        );

        let x = var_expr(&env, "x");
        assert_eq!(
            eval.evaluate_all(&mut env, &x).unwrap(),
            vec![
                Value::int(false, 8, 1),
                Value::int(false, 8, 2),
                Value::int(false, 8, 3)
            ]
        );
    }

    #[test]
    fn test_arithmetic_over_samples() {
        let mut env = env_with_u8("x", &[10, 200]);
        let mut eval = Evaluator::new();
        let sum = Expr::binary(var_expr(&env, "x"), BinaryOp::Add, u8lit(100));
        assert_eq!(
            eval.evaluate_all(&mut env, &sum).unwrap(),
            vec![Value::int(false, 8, 110), Value::int(false, 8, 44)]
        );
    }

    #[test]
    fn test_zero_division_reported_with_observed_values() {
        let mut env = env_with_u8("y", &[0, 5, 13]);
        let mut eval = Evaluator::new();
        let modulo = Expr::binary(u8lit(7), BinaryOp::Rem, var_expr(&env, "y"));
        match eval.evaluate_all(&mut env, &modulo) {
            Err(EvalError::ZeroDivision { observed, .. }) => {
                assert_eq!(observed.len(), 3);
                assert_eq!(observed[0], Value::int(false, 8, 0));
            }
            other => panic!("expected zero division, got {other:?}"),
        }
    }

    #[test]
    fn test_short_circuit_skips_undefined_operand() {
        // false && (1 / 0 == 0) must not raise.
        let mut env = env_with_u8("y", &[0]);
        let mut eval = Evaluator::new();
        let division = Expr::binary(u8lit(1), BinaryOp::Div, var_expr(&env, "y"));
        let raising = Expr::binary(division, BinaryOp::Eq, u8lit(0));
        let guarded = Expr::binary(
            Expr::literal(Value::Bool(false)),
            BinaryOp::LogicAnd,
            raising,
        );
        assert_eq!(
            eval.evaluate_all(&mut env, &guarded).unwrap(),
            vec![Value::Bool(false)]
        );
    }

    #[test]
    fn test_short_circuit_is_per_sample() {
        // (x < 5) || (x / (x - 5) == 0): the divisor is zero exactly where
        // the left side is true, so per-sample short-circuiting succeeds.
        let mut env = env_with_u8("x", &[5, 10]);
        let mut eval = Evaluator::new();
        let x = var_expr(&env, "x");
        let left = Expr::binary(x.clone(), BinaryOp::Lt, u8lit(5));
        let divisor = Expr::binary(x.clone(), BinaryOp::Sub, u8lit(5));
        let division = Expr::binary(x.clone(), BinaryOp::Div, divisor);
        let right = Expr::binary(division, BinaryOp::Eq, u8lit(2));
        let either = Expr::binary(left, BinaryOp::LogicOr, right);

        // Sample 0: x = 5, left false, right evaluates 5/0 -> raises.
        assert!(eval.evaluate_all(&mut env, &either).is_err());

        // With samples where the left side covers the zero divisor.
        let mut env = env_with_u8("x", &[3, 10]);
        let mut eval = Evaluator::new();
        let x = var_expr(&env, "x");
        let left = Expr::binary(x.clone(), BinaryOp::Lt, u8lit(5));
        let divisor = Expr::binary(x.clone(), BinaryOp::Sub, u8lit(3));
        let division = Expr::binary(x.clone(), BinaryOp::Div, divisor);
        let right = Expr::binary(division, BinaryOp::Eq, u8lit(2));
        let either = Expr::binary(left, BinaryOp::LogicOr, right);
        // Sample 0: left true, divisor x-3 = 0 never touched.
        // Sample 1: left false, 10 / 7 == 1, comparison false.
        assert_eq!(
            eval.evaluate_all(&mut env, &either).unwrap(),
            vec![Value::Bool(true), Value::Bool(false)]
        );
    }

    #[test]
    fn test_conditional_evaluates_only_taken_branch() {
        // x == 0 ? 1 : 10 / x  — the division is undefined exactly where
        // the condition selects the other branch.
        let mut env = env_with_u8("x", &[0, 2]);
        let mut eval = Evaluator::new();
        let x = var_expr(&env, "x");
        let cond = Expr::binary(x.clone(), BinaryOp::Eq, u8lit(0));
        let division = Expr::binary(u8lit(10), BinaryOp::Div, x);
        let pick = Expr::conditional(cond, u8lit(1), division);
        assert_eq!(
            eval.evaluate_all(&mut env, &pick).unwrap(),
            vec![Value::int(false, 8, 1), Value::int(false, 8, 5)]
        );
    }

    #[test]
    fn test_signedness_mismatch_detected_structurally() {
        let mut env = VariableEnvironment::replay(0);
        let mut eval = Evaluator::new();
        let signed = Expr::var(variable("s", SolType::int(true, 8)));
        let unsigned = Expr::var(variable("u", SolType::uint(8)));
        let sum = Expr::binary(signed, BinaryOp::Add, unsigned);
        // No samples at all: the type error must still surface.
        assert!(matches!(
            eval.evaluate_all(&mut env, &sum),
            Err(EvalError::SignednessMismatch { .. })
        ));
    }

    #[test]
    fn test_signed_exponent_rejected() {
        let mut env = VariableEnvironment::replay(0);
        let mut eval = Evaluator::new();
        let a = Expr::var(variable("a", SolType::int(true, 8)));
        let b = Expr::var(variable("b", SolType::int(true, 8)));
        assert!(matches!(
            eval.evaluate_all(&mut env, &Expr::binary(a, BinaryOp::Pow, b)),
            Err(EvalError::WrongSignForExponent)
        ));
    }

    #[test]
    fn test_memoization() {
        let mut env = env_with_u8("x", &[1, 2]);
        let mut eval = Evaluator::new();
        let x = var_expr(&env, "x");
        let sum = Expr::binary(x, BinaryOp::Add, u8lit(1));

        let first = eval.evaluate_all(&mut env, &sum).unwrap();
        let misses = eval.misses();
        let second = eval.evaluate_all(&mut env, &sum).unwrap();
        assert_eq!(first, second);
        assert_eq!(eval.misses(), misses, "second pass must be pure cache hits");
        assert!(eval.hits() > 0);
    }

    #[test]
    fn test_recording_assignment() {
        let mut env = VariableEnvironment::recording();
        let x = variable("x", SolType::uint(8));
        env.add_variable_with_values(Rc::clone(&x), vec![Value::int(false, 8, 1)])
            .unwrap();
        let mut eval = Evaluator::new();

        let assignment = Expr::assign(Expr::var(Rc::clone(&x)), u8lit(41));
        assert_eq!(
            eval.evaluate_all(&mut env, &assignment).unwrap(),
            vec![Value::int(false, 8, 41)]
        );
        assert_eq!(env.resolve(0, "x").unwrap(), Value::int(false, 8, 41));
    }

    #[test]
    fn test_increment_semantics() {
        let mut env = VariableEnvironment::recording();
        let x = variable("x", SolType::uint(8));
        env.add_variable_with_values(Rc::clone(&x), vec![Value::int(false, 8, 10)])
            .unwrap();
        let mut eval = Evaluator::new();

        // Post-increment yields the old value and stores the new one.
        let post = Expr::unary(UnaryOp::IncPost, Expr::var(Rc::clone(&x)));
        assert_eq!(
            eval.evaluate_all(&mut env, &post).unwrap(),
            vec![Value::int(false, 8, 10)]
        );
        assert_eq!(env.resolve(0, "x").unwrap(), Value::int(false, 8, 11));

        // Pre-decrement yields the new value.
        let pre = Expr::unary(UnaryOp::DecPre, Expr::var(Rc::clone(&x)));
        assert_eq!(
            eval.evaluate_all(&mut env, &pre).unwrap(),
            vec![Value::int(false, 8, 10)]
        );
        assert_eq!(env.resolve(0, "x").unwrap(), Value::int(false, 8, 10));
    }

    #[test]
    fn test_member_update_through_assignment() {
        use crate::types::StructDef;
        use crate::value::StructValue;

        let def = StructDef::new("S0", vec![("a", SolType::uint(8)), ("b", SolType::Bool)]);
        let s = variable("s", SolType::Struct(Rc::clone(&def)));
        let mut env = VariableEnvironment::recording();
        env.add_variable_with_values(
            Rc::clone(&s),
            vec![Value::Struct(StructValue::new(
                Rc::clone(&def),
                vec![Value::int(false, 8, 1), Value::Bool(false)],
            ))],
        )
        .unwrap();
        let mut eval = Evaluator::new();

        let target = Expr::member(Expr::var(Rc::clone(&s)), "a").unwrap();
        let assignment = Expr::assign(target, u8lit(99));
        eval.evaluate_all(&mut env, &assignment).unwrap();

        match env.resolve(0, "s").unwrap() {
            Value::Struct(sv) => assert_eq!(sv.member("a"), Some(&Value::int(false, 8, 99))),
            other => panic!("expected struct, got {other:?}"),
        }
    }

    #[test]
    fn test_array_bounds() {
        use crate::value::ArrayValue;

        let mut env = VariableEnvironment::replay(1);
        let a = variable("a", SolType::Array(Box::new(SolType::uint(8))));
        env.add_variable_with_values(
            Rc::clone(&a),
            vec![Value::Array(ArrayValue::new(
                SolType::uint(8),
                vec![Value::int(false, 8, 7)],
            ))],
        )
        .unwrap();
        let mut eval = Evaluator::new();

        let ok = Expr::index(Expr::var(Rc::clone(&a)), u8lit(0)).unwrap();
        assert_eq!(
            eval.evaluate_all(&mut env, &ok).unwrap(),
            vec![Value::int(false, 8, 7)]
        );

        let oob = Expr::index(Expr::var(Rc::clone(&a)), u8lit(3)).unwrap();
        assert!(matches!(
            eval.evaluate_all(&mut env, &oob),
            Err(EvalError::ArrayBounds { .. })
        ));
    }

    #[test]
    fn test_keccak_builtin() {
        let mut env = VariableEnvironment::replay(1);
        let mut eval = Evaluator::new();
        let call = Expr::call(
            "keccak256",
            vec![Expr::literal(Value::Str("abc".into()))],
            SolType::Bytes(32),
        );
        match &eval.evaluate_all(&mut env, &call).unwrap()[0] {
            Value::Bytes(b) => assert_eq!(
                b.hex(),
                "4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45"
            ),
            other => panic!("expected bytes32, got {other:?}"),
        }
    }

    #[test]
    fn test_call_without_alias_unsupported() {
        let mut env = VariableEnvironment::replay(1);
        let mut eval = Evaluator::new();
        let call = Expr::call("mystery", vec![], SolType::Bool);
        assert!(matches!(
            eval.evaluate_all(&mut env, &call),
            Err(EvalError::UnsupportedConstruct(_))
        ));
    }

    #[test]
    fn test_call_with_alias_evaluates_body() {
        let mut env = env_with_u8("x", &[4]);
        let mut eval = Evaluator::new();
        let body = Expr::binary(var_expr(&env, "x"), BinaryOp::Mul, u8lit(2));
        let call = Expr::call_with_alias(
            "__returnFunction0",
            vec![var_expr(&env, "x")],
            SolType::uint(8),
            body,
        );
        assert_eq!(
            eval.evaluate_all(&mut env, &call).unwrap(),
            vec![Value::int(false, 8, 8)]
        );
    }

    #[test]
    fn test_cast_chain() {
        let mut env = VariableEnvironment::replay(1);
        let mut eval = Evaluator::new();
        let wide = Expr::cast(u8lit(0xff), SolType::uint(256));
        let as_bytes = Expr::cast(wide, SolType::Bytes(32));
        let narrowed = Expr::cast(as_bytes, SolType::Bytes(1));
        match &eval.evaluate_all(&mut env, &narrowed).unwrap()[0] {
            // Shrinking a byte array keeps the leading bytes.
            Value::Bytes(b) => assert_eq!(b.data(), &[0x00]),
            other => panic!("expected bytes1, got {other:?}"),
        }
    }
}
