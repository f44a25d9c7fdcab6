//! Synthesis of predicates with a guaranteed truth value.
//!
//! [`PredicateSynthesizer::synthesize`] builds a boolean expression that
//! evaluates to the requested value on *every* sample of the environment.
//! The recursion uses four productions — negation, conjunction,
//! disjunction, atom — with operand expectations chosen to satisfy the
//! short-circuit truth tables. Atoms relate a randomly chosen integer
//! variable to a constant picked just outside (or at the edge of) the
//! variable's observed value interval.
//!
//! This correctness is load-bearing: a "guaranteed true" guard that is
//! false on some sample turns a behavior-preserving mutation into a broken
//! program, which would be indistinguishable from a compiler bug. The
//! `check_consistency` flag re-evaluates every synthesized predicate and
//! treats a mismatch as fatal.

use log::trace;

use crate::context::SynthesisContext;
use crate::env::{Variable, VariableEnvironment};
use crate::error::{EvalError, EvalResult};
use crate::eval::Evaluator;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::valgen::ValueGenerator;
use crate::value::{IntValue, Value};

#[derive(Default)]
pub struct PredicateSynthesizer {
    evaluator: Evaluator,
}

impl PredicateSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthesizes a predicate evaluating to `expected` on every sample.
    pub fn synthesize(
        &mut self,
        ctx: &mut SynthesisContext,
        env: &mut VariableEnvironment,
        expected: bool,
        depth: u32,
    ) -> EvalResult<Expr> {
        if depth == 0 {
            return self.atom(ctx, env, expected);
        }

        match ctx.int_in_range(0, 3) {
            0 => self.negation(ctx, env, expected, depth),
            1 => self.conjunction(ctx, env, expected, depth),
            2 => self.disjunction(ctx, env, expected, depth),
            _ => self.atom(ctx, env, expected),
        }
    }

    fn negation(
        &mut self,
        ctx: &mut SynthesisContext,
        env: &mut VariableEnvironment,
        expected: bool,
        depth: u32,
    ) -> EvalResult<Expr> {
        let inner = self.synthesize(ctx, env, !expected, depth - 1)?;
        Ok(Expr::unary(UnaryOp::LogicNot, inner))
    }

    fn conjunction(
        &mut self,
        ctx: &mut SynthesisContext,
        env: &mut VariableEnvironment,
        expected: bool,
        depth: u32,
    ) -> EvalResult<Expr> {
        // A true conjunction needs both sides true; a false one needs at
        // least one false side, the other side being free.
        let (left_expected, right_expected) = if expected {
            (true, true)
        } else if ctx.flip_coin() {
            (true, false)
        } else {
            (false, ctx.flip_coin())
        };

        let left = self.synthesize(ctx, env, left_expected, depth - 1)?;
        let right = self.synthesize(ctx, env, right_expected, depth - 1)?;
        let combined = Expr::binary(left, BinaryOp::LogicAnd, right);
        self.verify(ctx, env, combined, expected)
    }

    fn disjunction(
        &mut self,
        ctx: &mut SynthesisContext,
        env: &mut VariableEnvironment,
        expected: bool,
        depth: u32,
    ) -> EvalResult<Expr> {
        let (left_expected, right_expected) = if !expected {
            (false, false)
        } else if ctx.flip_coin() {
            (false, true)
        } else {
            (true, ctx.flip_coin())
        };

        let left = self.synthesize(ctx, env, left_expected, depth - 1)?;
        let right = self.synthesize(ctx, env, right_expected, depth - 1)?;
        let combined = Expr::binary(left, BinaryOp::LogicOr, right);
        self.verify(ctx, env, combined, expected)
    }

    fn atom(
        &mut self,
        ctx: &mut SynthesisContext,
        env: &mut VariableEnvironment,
        expected: bool,
    ) -> EvalResult<Expr> {
        let count = env.integer_variable_count();
        if count == 0 {
            // Nothing to relate; a literal fulfills the value trivially.
            return Ok(Expr::literal(Value::Bool(expected)));
        }

        let choice = ctx.int_in_range(0, count as i64 - 1) as usize;
        let values = env.integer_variable_values(choice);
        let (variable, smallest, largest) = match (values.smallest(), values.largest()) {
            (Some(smallest), Some(largest)) => (
                values.variable().clone(),
                smallest.clone(),
                largest.clone(),
            ),
            _ => return Ok(Expr::literal(Value::Bool(expected))),
        };

        let atom = Self::relational_atom(ctx, variable, &smallest, &largest, expected);
        self.verify(ctx, env, atom, expected)
    }

    /// Relates one variable to a constant such that the comparison's truth
    /// value holds on every sample. The observed interval `[smallest,
    /// largest]` makes that a matter of picking the constant on the right
    /// side of (or just outside) the interval.
    fn relational_atom(
        ctx: &mut SynthesisContext,
        variable: Variable,
        smallest: &IntValue,
        largest: &IntValue,
        expected: bool,
    ) -> Expr {
        // The constant is the first operand: `c op x` for all samples x.
        let (constant, op) = match ctx.int_in_range(0, 3) {
            0 => {
                // c < x: always ⟸ c just below the minimum; never ⟸ c at
                // the maximum.
                let c = if expected {
                    ValueGenerator::smaller_value(smallest)
                } else {
                    Some(largest.clone())
                };
                (c, BinaryOp::Lt)
            }
            1 => {
                let c = if expected {
                    ValueGenerator::bigger_value(largest)
                } else {
                    Some(smallest.clone())
                };
                (c, BinaryOp::Gt)
            }
            2 => {
                let c = if expected {
                    Some(smallest.clone())
                } else {
                    ValueGenerator::bigger_value(largest)
                };
                (c, BinaryOp::Le)
            }
            _ => {
                let c = if expected {
                    Some(largest.clone())
                } else {
                    ValueGenerator::smaller_value(smallest)
                };
                (c, BinaryOp::Ge)
            }
        };

        let Some(constant) = constant else {
            // The observed interval touches the type limit, so the chosen
            // operator cannot fulfill the value; fall back to the identity
            // comparison.
            trace!("interval at type limit, falling back to identity atom");
            let reference = Expr::var(variable.clone());
            let other = Expr::var(variable);
            let op = if expected { BinaryOp::Eq } else { BinaryOp::Ne };
            return Expr::binary(reference, op, other);
        };

        let constant_expr = Expr::literal(Value::Int(constant));
        let variable_expr = Expr::var(variable);
        if ctx.flip_coin() {
            Expr::binary(constant_expr, op, variable_expr)
        } else {
            // Flipped operand order needs the mirrored operator.
            let mirrored = op.mirrored().expect("relational operator");
            Expr::binary(variable_expr, mirrored, constant_expr)
        }
    }

    /// Diagnostic self-check: re-evaluate the predicate on every sample
    /// and fail fatally on any mismatch.
    fn verify(
        &mut self,
        ctx: &SynthesisContext,
        env: &mut VariableEnvironment,
        predicate: Expr,
        expected: bool,
    ) -> EvalResult<Expr> {
        if !ctx.flags.check_consistency {
            return Ok(predicate);
        }
        for sample in 0..env.sample_count() {
            let value = self.evaluator.evaluate_one(env, sample, &predicate)?;
            if value.as_bool() != Some(expected) {
                return Err(EvalError::Consistency(format!(
                    "predicate expected to be {expected} evaluated to {} on sample {sample}",
                    value.to_source()
                )));
            }
        }
        Ok(predicate)
    }
}
