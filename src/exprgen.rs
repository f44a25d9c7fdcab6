//! Worklist-based random expression synthesis.
//!
//! [`ExpressionGenerator::synthesize`] seeds a worklist with leaf
//! expressions over the environment's usable variables and randomly
//! combines items until one remains: either a random unary operator is
//! applied to one popped item, several popped items become the arguments
//! of a freshly invented helper function, or two popped items are brought
//! to a compatible type and joined with a random binary operator. Operator
//! candidates are drawn without replacement and checked against the type
//! checker; known-unsafe second operands (`/ % << >>`) are guarded
//! proactively. This is a greedy randomized reduction, not a search.
//!
//! The survivor is converted to the caller's desired type and evaluated
//! over all samples through the repair loop, so the returned expression is
//! both well-typed and defined on every sample.

use log::{debug, trace};

use crate::context::SynthesisContext;
use crate::convert::TypeConverter;
use crate::env::{Variable, VariableEnvironment};
use crate::error::{EvalError, EvalResult};
use crate::eval::Evaluator;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::repair::{evaluate_with_repair, make_operand_safe};
use crate::typecheck::TypeChecker;
use crate::types::SolType;
use crate::valgen::{IntegerPolicy, ValueGenerator};

/// Weight (percent) of plain unary application against helper-call
/// generation. Unary operators allow more diverse operations; helper
/// functions are interesting but carry code-size overhead.
const UNARY_WEIGHT: i64 = 90;

/// Upper bound on helper-call arguments, to stay clear of stack limits in
/// generated code.
const MAX_CALL_ARGUMENTS: usize = 5;

/// A generated helper function definition the driver must emit alongside
/// the expression that calls it.
#[derive(Debug, Clone)]
pub struct HelperFunction {
    pub name: String,
    pub parameters: Vec<(String, SolType)>,
    pub return_type: SolType,
    pub body: Expr,
}

#[derive(Default)]
pub struct ExpressionGenerator {
    evaluator: Evaluator,
    helpers: Vec<HelperFunction>,
    helper_counter: usize,
}

impl ExpressionGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands over (and clears) the helper functions generated so far.
    pub fn take_helpers(&mut self) -> Vec<HelperFunction> {
        std::mem::take(&mut self.helpers)
    }

    /// Synthesizes a well-typed, well-defined expression of `desired` type,
    /// already evaluated over all samples of `env`.
    pub fn synthesize(
        &mut self,
        ctx: &mut SynthesisContext,
        env: &mut VariableEnvironment,
        desired: &SolType,
    ) -> EvalResult<Expr> {
        let worklist = Self::populate_worklist(ctx, env, desired)?;
        let expr = self.reduce_worklist(ctx, env, worklist, desired, false)?;
        let (expr, _) = evaluate_with_repair(ctx, &mut self.evaluator, env, expr)?;
        // A repair may have rewritten a helper body behind its call node;
        // the recorded definitions must describe what actually evaluates.
        self.refresh_helper_bodies(&expr);
        Ok(expr)
    }

    /// Re-syncs recorded helper definitions with the (possibly repaired)
    /// bodies found behind the call nodes of `expr`.
    fn refresh_helper_bodies(&mut self, expr: &Expr) {
        use crate::expr::ExprKind;

        if let (ExprKind::Call { callee, .. }, Some(alias)) = (expr.kind(), expr.eval_alias()) {
            if let Some(helper) = self.helpers.iter_mut().find(|h| &h.name == callee) {
                if !helper.body.same_node(alias) {
                    debug!("helper {callee} body rewritten by repair");
                    helper.body = alias.clone();
                }
            }
            self.refresh_helper_bodies(alias);
        }
        match expr.kind() {
            ExprKind::Unary { operand, .. } => self.refresh_helper_bodies(operand),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.refresh_helper_bodies(lhs);
                self.refresh_helper_bodies(rhs);
            }
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                self.refresh_helper_bodies(cond);
                self.refresh_helper_bodies(then_branch);
                self.refresh_helper_bodies(else_branch);
            }
            ExprKind::Member { base, .. } => self.refresh_helper_bodies(base),
            ExprKind::Index { base, index } => {
                self.refresh_helper_bodies(base);
                self.refresh_helper_bodies(index);
            }
            ExprKind::Cast { operand, .. } => self.refresh_helper_bodies(operand),
            ExprKind::Call { arguments, .. } => {
                for argument in arguments {
                    self.refresh_helper_bodies(argument);
                }
            }
            ExprKind::Assign { lhs, rhs } => {
                self.refresh_helper_bodies(lhs);
                self.refresh_helper_bodies(rhs);
            }
            ExprKind::Tuple(parts) => {
                for part in parts {
                    self.refresh_helper_bodies(part);
                }
            }
            ExprKind::Literal(_) | ExprKind::Var(_) => {}
        }
    }

    /// Uniformly picks a tracked variable whose type can participate in
    /// synthesis, scanning onward from a random start.
    pub fn pick_random_usable_variable(
        ctx: &mut SynthesisContext,
        env: &VariableEnvironment,
    ) -> Option<Variable> {
        let count = env.variable_count();
        if count == 0 {
            return None;
        }
        let start = ctx.int_in_range(0, count as i64 - 1) as usize;
        for offset in 0..count {
            let candidate = env.variable_values((start + offset) % count).variable();
            if candidate.ty.is_usable() && !candidate.ty.is_dynamic_bytes() {
                return Some(candidate.clone());
            }
        }
        None
    }

    fn populate_worklist(
        ctx: &mut SynthesisContext,
        env: &VariableEnvironment,
        desired: &SolType,
    ) -> EvalResult<Vec<Expr>> {
        let mut worklist = Vec::new();

        for index in 0..env.variable_count() {
            let variable = env.variable_values(index).variable().clone();
            if !variable.ty.is_usable() || variable.ty.is_dynamic_bytes() {
                continue;
            }
            // Sparse inclusion keeps expressions from ballooning with
            // every variable in scope.
            if !(ctx.flip_coin() && ctx.flip_coin()) {
                continue;
            }
            let mut leaf = Expr::var(variable.clone());
            if variable.ty.is_struct() && ctx.flip_coin() {
                // Half the struct seeds are pre-drilled to a member, which
                // lets inc/dec and arithmetic apply; the other half keep
                // the struct type, which later forces a conversion of the
                // partner operand.
                leaf = TypeConverter::access_random_struct_member(ctx, leaf)?;
            }
            worklist.push(leaf);
        }

        if worklist.is_empty() {
            // Some callers require a non-empty result to work with.
            match Self::pick_random_usable_variable(ctx, env) {
                Some(variable) => worklist.push(Expr::var(variable)),
                None => worklist.push(Expr::literal(ValueGenerator::random_value(
                    ctx,
                    desired,
                    IntegerPolicy::FavorSmall,
                )?)),
            }
        }
        Ok(worklist)
    }

    /// Reduces the worklist to one expression and converts it to `desired`.
    ///
    /// `enforce_inclusion` is set when building a helper-function body:
    /// every argument must then end up in a subexpression that is
    /// definitely evaluated, so logical operators (which short-circuit)
    /// and side effects (which would double-fire through the alias) are
    /// disabled.
    fn reduce_worklist(
        &mut self,
        ctx: &mut SynthesisContext,
        env: &mut VariableEnvironment,
        mut worklist: Vec<Expr>,
        desired: &SolType,
        enforce_inclusion: bool,
    ) -> EvalResult<Expr> {
        let mut flags = ctx.flags.clone();
        if enforce_inclusion {
            flags.allow_side_effects = false;
            flags.avoid_logical_ops = true;
        }

        while worklist.len() > 1 {
            trace!("worklist size {}", worklist.len());
            if ctx.flip_coin() {
                let use_helper = flags.allow_helper_calls
                    && !enforce_inclusion
                    && ctx.int_in_range(0, 99) >= UNARY_WEIGHT;
                if use_helper {
                    if let Some(call) = self.generate_helper_call(ctx, env, &mut worklist)? {
                        worklist.push(call);
                        continue;
                    }
                    // No usable arguments; fall through to unary.
                }

                let operand = pop_random(ctx, &mut worklist);
                let mut operators: Vec<UnaryOp> = UnaryOp::ALL.to_vec();
                let mut applied = false;
                while !operators.is_empty() {
                    let op = pop_random(ctx, &mut operators);
                    if TypeChecker::is_undefined_unary(op, &operand, &flags) {
                        continue;
                    }
                    worklist.push(Expr::unary(op, operand.clone()));
                    applied = true;
                    break;
                }
                if !applied {
                    // No unary operator fits this operand's type; keep the
                    // item for a later binary combination.
                    worklist.push(operand);
                }
            } else {
                let lhs = pop_random(ctx, &mut worklist);
                let rhs = pop_random(ctx, &mut worklist);
                let (lhs, rhs) = TypeConverter::unify_operands(ctx, env, lhs, rhs)?;

                let mut operators: Vec<BinaryOp> = BinaryOp::ALL.to_vec();
                let mut applied = false;
                while !operators.is_empty() {
                    let op = pop_random(ctx, &mut operators);
                    if TypeChecker::is_undefined_binary(&lhs, op, &rhs, &flags) {
                        continue;
                    }
                    // Guard value-dependent hazards before the operator is
                    // ever evaluated.
                    let rhs = make_operand_safe(ctx, op, rhs.clone());
                    worklist.push(Expr::binary(lhs.clone(), op, rhs));
                    applied = true;
                    break;
                }
                if !applied {
                    return Err(EvalError::Internal(format!(
                        "no defined binary operator for {} and {}",
                        lhs.ty(),
                        rhs.ty()
                    )));
                }
            }
        }

        let survivor = worklist
            .pop()
            .ok_or_else(|| EvalError::Internal("empty synthesis worklist".into()))?;
        TypeConverter::convert(ctx, env, survivor, desired)
    }

    /// Invents a helper function over up to [`MAX_CALL_ARGUMENTS`] popped
    /// worklist items and returns a call to it, evaluable through its
    /// body via the evaluation-alias mechanism. Returns `None` when no
    /// worklist item qualifies as an argument.
    fn generate_helper_call(
        &mut self,
        ctx: &mut SynthesisContext,
        env: &mut VariableEnvironment,
        worklist: &mut Vec<Expr>,
    ) -> EvalResult<Option<Expr>> {
        // Nested generated calls conflict over argument aliases, and
        // struct-typed arguments are kept out of generated signatures.
        let usable = worklist
            .iter()
            .filter(|e| !e.contains_eval_alias() && !e.ty().is_struct())
            .count();
        if usable == 0 {
            return Ok(None);
        }
        let wanted =
            ctx.int_in_range(1, usable.min(MAX_CALL_ARGUMENTS) as i64) as usize;

        // Pick the last qualifying items, w.l.o.g.
        let mut arguments = Vec::new();
        let mut index = worklist.len();
        while index > 0 && arguments.len() < wanted {
            index -= 1;
            if !worklist[index].contains_eval_alias() && !worklist[index].ty().is_struct() {
                arguments.push(worklist.remove(index));
            }
        }

        for (position, argument) in arguments.iter().enumerate() {
            argument.set_render_alias(Some(format!("arg{position}")));
        }

        let return_type = SolType::random_elementary(ctx);
        let body =
            self.reduce_worklist(ctx, env, arguments.clone(), &return_type, true)?;

        let name = format!("__returnFunction{}", self.helper_counter);
        self.helper_counter += 1;
        debug!("generated helper {name} returning {return_type}");

        let call = Expr::call_with_alias(
            name.clone(),
            arguments.clone(),
            return_type.clone(),
            body.clone(),
        );
        self.helpers.push(HelperFunction {
            name,
            parameters: arguments
                .iter()
                .enumerate()
                .map(|(position, argument)| (format!("arg{position}"), argument.ty().clone()))
                .collect(),
            return_type,
            body,
        });
        Ok(Some(call))
    }
}

fn pop_random<T>(ctx: &mut SynthesisContext, items: &mut Vec<T>) -> T {
    let index = ctx.int_in_range(0, items.len() as i64 - 1) as usize;
    items.remove(index)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use test_log::test;

    use super::*;
    use crate::env::variable;
    use crate::types::StructDef;
    use crate::value::{StructValue, Value};

    fn rich_env() -> VariableEnvironment {
        let def = StructDef::new("S0", vec![("a", SolType::uint(8)), ("b", SolType::Bool)]);
        let mut env = VariableEnvironment::replay(2);
        env.add_variable_with_values(
            variable("x", SolType::uint(8)),
            vec![Value::int(false, 8, 3), Value::int(false, 8, 200)],
        )
        .unwrap();
        env.add_variable_with_values(
            variable("y", SolType::int(true, 32)),
            vec![Value::int(true, 32, -40), Value::int(true, 32, 7)],
        )
        .unwrap();
        env.add_variable_with_values(
            variable("flag", SolType::Bool),
            vec![Value::Bool(true), Value::Bool(false)],
        )
        .unwrap();
        env.add_variable_with_values(
            variable("s", SolType::Struct(Rc::clone(&def))),
            vec![
                Value::Struct(StructValue::new(
                    Rc::clone(&def),
                    vec![Value::int(false, 8, 1), Value::Bool(true)],
                )),
                Value::Struct(StructValue::new(
                    Rc::clone(&def),
                    vec![Value::int(false, 8, 9), Value::Bool(false)],
                )),
            ],
        )
        .unwrap();
        env
    }

    #[test]
    fn test_synthesized_expression_matches_desired_type() {
        let mut env = rich_env();
        let targets = [
            SolType::uint(8),
            SolType::int(true, 64),
            SolType::Bool,
            SolType::Bytes(8),
        ];
        for seed in 0..25 {
            let mut ctx = SynthesisContext::seeded(seed);
            let mut generator = ExpressionGenerator::new();
            for desired in &targets {
                let expr = generator
                    .synthesize(&mut ctx, &mut env, desired)
                    .unwrap_or_else(|e| panic!("seed {seed}, target {desired}: {e}"));
                assert!(expr.ty().same_type(desired));
            }
        }
    }

    #[test]
    fn test_synthesized_expression_is_defined_on_all_samples() {
        let mut env = rich_env();
        for seed in 0..25 {
            let mut ctx = SynthesisContext::seeded(seed + 1000);
            let mut generator = ExpressionGenerator::new();
            let expr = generator
                .synthesize(&mut ctx, &mut env, &SolType::uint(16))
                .unwrap();

            // A fresh evaluator (no memoized slots) must succeed too:
            // repairs are part of the returned tree, not the cache.
            let mut fresh = Evaluator::new();
            let values = fresh.evaluate_all(&mut env, &expr).unwrap();
            assert_eq!(values.len(), 2);
        }
    }

    #[test]
    fn test_empty_environment_falls_back_to_constant() {
        let mut env = VariableEnvironment::replay(1);
        let mut ctx = SynthesisContext::seeded(4);
        let mut generator = ExpressionGenerator::new();
        let expr = generator
            .synthesize(&mut ctx, &mut env, &SolType::uint(8))
            .unwrap();
        assert!(expr.ty().same_type(&SolType::uint(8)));
    }

    #[test]
    fn test_helper_functions_are_recorded_and_evaluable() {
        let mut env = rich_env();
        let mut found_helper = false;
        for seed in 0..500 {
            let mut ctx = SynthesisContext::seeded(seed);
            let mut generator = ExpressionGenerator::new();
            let expr = generator
                .synthesize(&mut ctx, &mut env, &SolType::uint(8))
                .unwrap();
            let helpers = generator.take_helpers();
            if helpers.is_empty() {
                continue;
            }
            found_helper = true;
            for helper in &helpers {
                assert!(helper.name.starts_with("__returnFunction"));
                assert!(!helper.parameters.is_empty());
                assert!(helper.body.ty().same_type(&helper.return_type));
            }
            // The call site still evaluates (through the alias).
            let mut fresh = Evaluator::new();
            fresh.evaluate_all(&mut env, &expr).unwrap();
            break;
        }
        assert!(found_helper, "no seed produced a helper call");
    }

    #[test]
    fn test_side_effect_free_when_disallowed() {
        let mut env = rich_env();
        for seed in 0..20 {
            let mut ctx = SynthesisContext::seeded(seed);
            ctx.flags.allow_side_effects = false;
            let mut generator = ExpressionGenerator::new();
            let expr = generator
                .synthesize(&mut ctx, &mut env, &SolType::uint(8))
                .unwrap();
            assert!(!has_side_effect(&expr));
        }
    }

    fn has_side_effect(expr: &Expr) -> bool {
        use crate::expr::ExprKind;
        match expr.kind() {
            ExprKind::Unary { op, operand } => op.has_side_effect() || has_side_effect(operand),
            ExprKind::Binary { lhs, rhs, .. } => has_side_effect(lhs) || has_side_effect(rhs),
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                has_side_effect(cond)
                    || has_side_effect(then_branch)
                    || has_side_effect(else_branch)
            }
            ExprKind::Member { base, .. } => has_side_effect(base),
            ExprKind::Index { base, index } => has_side_effect(base) || has_side_effect(index),
            ExprKind::Cast { operand, .. } => has_side_effect(operand),
            ExprKind::Call { arguments, .. } => arguments.iter().any(has_side_effect),
            ExprKind::Assign { .. } => true,
            ExprKind::Tuple(parts) => parts.iter().any(has_side_effect),
            ExprKind::Literal(_) | ExprKind::Var(_) => false,
        }
    }
}
