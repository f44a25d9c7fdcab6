//! Live mutations: semantics-preserving program transformations.
//!
//! Each mutation wraps or precedes one statement with synthesized code that
//! is *provably* inert over every recorded sample — a guard that is always
//! taken, a block that is never entered, or a block whose state changes are
//! fully undone. Since the transformation cannot change observable
//! behavior, any divergence in the compiled program's output afterwards
//! indicates a defect in the compiler under test.
//!
//! The generated code assumes the driver declares the usual scratch
//! storage variables (`_internalBackupInteger` as `uint256`,
//! `_internalBackupBool`, `_internalBackupAddress`, `_internalBackupString`,
//! `_internalBackupStruct<Name>`, and `_internalBackupSideEffectVariable<N>`
//! as `uint256`) in the enclosing contract, as well as emitting the
//! returned helper function definitions.

use log::debug;

use crate::context::SynthesisContext;
use crate::env::{Variable, VariableEnvironment};
use crate::error::EvalResult;
use crate::expr::Expr;
use crate::exprgen::{ExpressionGenerator, HelperFunction};
use crate::predicate::PredicateSynthesizer;
use crate::syntax::{render, render_with_undo, SyntaxNode};
use crate::types::SolType;

/// The three mutation shapes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MutationKind {
    /// `S` becomes `if (<true predicate>) { S }`.
    AlwaysTrueGuard,
    /// `S` is preceded by `if (<false predicate>) { <dead statements> }`.
    AlwaysFalseBlock,
    /// `S` is preceded by a block that overwrites a variable under an
    /// always-true guard and provably restores it.
    AlwaysTrueBlock,
}

impl MutationKind {
    pub fn choose(ctx: &mut SynthesisContext) -> MutationKind {
        match ctx.int_in_range(0, 2) {
            0 => MutationKind::AlwaysTrueGuard,
            1 => MutationKind::AlwaysFalseBlock,
            _ => MutationKind::AlwaysTrueBlock,
        }
    }
}

/// A finished mutation: the replacement fragment for the statement, plus
/// any helper functions the driver must add to the contract.
#[derive(Debug)]
pub struct Mutation {
    pub kind: MutationKind,
    pub code: SyntaxNode,
    pub helpers: Vec<HelperFunction>,
}

#[derive(Default)]
pub struct Mutator {
    predicates: PredicateSynthesizer,
    expressions: ExpressionGenerator,
    backup_counter: usize,
}

impl Mutator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a uniformly chosen mutation to `statement`.
    pub fn mutate(
        &mut self,
        ctx: &mut SynthesisContext,
        env: &mut VariableEnvironment,
        statement: &SyntaxNode,
    ) -> EvalResult<Mutation> {
        match MutationKind::choose(ctx) {
            MutationKind::AlwaysTrueGuard => self.always_true_guard(ctx, env, statement),
            MutationKind::AlwaysFalseBlock => self.always_false_block(ctx, env, statement),
            MutationKind::AlwaysTrueBlock => self.always_true_block(ctx, env, statement),
        }
    }

    /// Wraps the statement in a guard that is taken on every sample.
    pub fn always_true_guard(
        &mut self,
        ctx: &mut SynthesisContext,
        env: &mut VariableEnvironment,
        statement: &SyntaxNode,
    ) -> EvalResult<Mutation> {
        let depth = ctx.random_predicate_depth();
        let guard = self.predicates.synthesize(ctx, env, true, depth)?;
        let code = format!(
            "if ({}) {{ {} }}",
            render(&guard).to_source(),
            statement.to_source()
        );
        Ok(Mutation {
            kind: MutationKind::AlwaysTrueGuard,
            code: SyntaxNode::Verbatim(code),
            helpers: Vec::new(),
        })
    }

    /// Prepends a block guarded by a predicate that is false on every
    /// sample; its body holds freshly synthesized, never-executed
    /// statements.
    pub fn always_false_block(
        &mut self,
        ctx: &mut SynthesisContext,
        env: &mut VariableEnvironment,
        statement: &SyntaxNode,
    ) -> EvalResult<Mutation> {
        let depth = ctx.random_predicate_depth();
        let guard = self.predicates.synthesize(ctx, env, false, depth)?;

        let mut body = String::new();
        let count = ctx.int_in_range(1, 3);
        for _ in 0..count {
            if let Some(dead) = self.synthesize_dead_statement(ctx, env)? {
                body.push_str(&dead);
                body.push(' ');
            }
        }

        let code = format!(
            "{{ if ({}) {{ {body}}} {} }}",
            render(&guard).to_source(),
            statement.to_source()
        );
        Ok(Mutation {
            kind: MutationKind::AlwaysFalseBlock,
            code: SyntaxNode::Verbatim(code),
            helpers: self.expressions.take_helpers(),
        })
    }

    /// An assignment of a synthesized (but well-defined) expression to a
    /// mutable variable. Dead code still has to compile and evaluate.
    fn synthesize_dead_statement(
        &mut self,
        ctx: &mut SynthesisContext,
        env: &mut VariableEnvironment,
    ) -> EvalResult<Option<String>> {
        let Some(target) = Self::pick_overwritable_variable(ctx, env) else {
            return Ok(None);
        };
        let value = self.expressions.synthesize(ctx, env, &target.ty)?;
        Ok(Some(format!(
            "{} = {};",
            target.name,
            render(&value).to_source()
        )))
    }

    /// Prepends a block that backs up a chosen variable, overwrites it
    /// under an always-true guard, and restores the backup afterwards —
    /// provably inert for any code after the block. Side effects produced
    /// incidentally by the overwrite expression (`++`/`--`) are recorded
    /// during rendering and compensated with backup/restore statements.
    pub fn always_true_block(
        &mut self,
        ctx: &mut SynthesisContext,
        env: &mut VariableEnvironment,
        statement: &SyntaxNode,
    ) -> EvalResult<Mutation> {
        let Some(overwritten) = Self::pick_overwritable_variable(ctx, env) else {
            // No variable to work on; leave the statement untouched.
            return Ok(Mutation {
                kind: MutationKind::AlwaysTrueBlock,
                code: statement.clone(),
                helpers: Vec::new(),
            });
        };

        // Generated calls are disabled here: undo handling for side
        // effects inside call arguments does not compose with the
        // argument-alias mechanism.
        let saved_helper_flag = ctx.flags.allow_helper_calls;
        ctx.flags.allow_helper_calls = false;
        let overwrite = self.expressions.synthesize(ctx, env, &overwritten.ty);
        ctx.flags.allow_helper_calls = saved_helper_flag;
        let overwrite = overwrite?;

        let mut lines: Vec<String> = Vec::new();

        // Fixed-size byte arrays cannot currently be backed up without
        // storage-location errors; the block then only exercises the
        // predicates.
        let assignable = !matches!(overwritten.ty, SolType::Bytes(_));

        let mut backup_name = String::new();
        let mut integer_backup = false;
        if assignable {
            let mut undo = Vec::new();
            let rendered_overwrite = render_with_undo(&overwrite, &mut undo);

            // Save every variable a ++/-- in the overwrite expression will
            // touch, before the expression runs.
            for (index, compensation) in undo.iter().enumerate() {
                let operand = undo_operand(compensation);
                lines.push(format!(
                    "_internalBackupSideEffectVariable{index} = uint256({operand});"
                ));
            }

            let (name, is_integer_slot, declaration) =
                self.backup_variable_for(&overwritten);
            backup_name = name;
            integer_backup = is_integer_slot;
            match declaration {
                Some(decl) => lines.push(format!(
                    "{decl} = {};",
                    rendered_overwrite.to_source()
                )),
                None if integer_backup => lines.push(format!(
                    "{backup_name} = uint256({});",
                    rendered_overwrite.to_source()
                )),
                None => lines.push(format!(
                    "{backup_name} = {};",
                    rendered_overwrite.to_source()
                )),
            }

            // Put the stepped variables back.
            for (index, compensation) in undo.iter().enumerate() {
                let operand = undo_operand(compensation);
                let ty = compensation.ty();
                lines.push(format!(
                    "if ({operand} != {ty}(_internalBackupSideEffectVariable{index})) \
                     {operand} = {ty}(_internalBackupSideEffectVariable{index});"
                ));
            }
        }

        // if (<true predicate>) { backup = v; if (<false predicate>) { } }
        let depth = ctx.random_predicate_depth();
        let true_guard = self.predicates.synthesize(ctx, env, true, depth)?;
        let depth = ctx.random_predicate_depth();
        let false_guard = self.predicates.synthesize(ctx, env, false, depth)?;

        let save = if assignable {
            let rhs = if integer_backup {
                format!("uint256({})", overwritten.name)
            } else {
                overwritten.name.clone()
            };
            format!("{backup_name} = {rhs}; ")
        } else {
            String::new()
        };
        lines.push(format!(
            "if ({}) {{ {save}if ({}) {{ }} }}",
            render(&true_guard).to_source(),
            render(&false_guard).to_source()
        ));

        if assignable {
            let rhs = if integer_backup {
                format!("{}({backup_name})", overwritten.ty)
            } else {
                backup_name.clone()
            };
            lines.push(format!("{} = {rhs};", overwritten.name));
        }

        debug!(
            "always-true block over variable {} ({} lines)",
            overwritten.name,
            lines.len()
        );
        let code = format!("{{ {} {} }}", lines.join(" "), statement.to_source());
        Ok(Mutation {
            kind: MutationKind::AlwaysTrueBlock,
            code: SyntaxNode::Verbatim(code),
            helpers: self.expressions.take_helpers(),
        })
    }

    /// Backup storage for one variable: name, whether it is the shared
    /// uint256 integer slot (which needs casts), and an optional in-block
    /// declaration for types without a pre-declared slot.
    fn backup_variable_for(&mut self, variable: &Variable) -> (String, bool, Option<String>) {
        match &variable.ty {
            SolType::Int { .. } => ("_internalBackupInteger".to_owned(), true, None),
            SolType::Bool => ("_internalBackupBool".to_owned(), false, None),
            SolType::Address => ("_internalBackupAddress".to_owned(), false, None),
            SolType::String => ("_internalBackupString".to_owned(), false, None),
            SolType::Struct(def) => {
                (format!("_internalBackupStruct{}", def.name), false, None)
            }
            ty => {
                let name = format!("backup_var{}_{}", self.backup_counter, variable.name);
                self.backup_counter += 1;
                let location = if ty.is_array() { " memory " } else { " " };
                let declaration = format!("{ty}{location}{name}");
                (name, false, Some(declaration))
            }
        }
    }

    fn pick_overwritable_variable(
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
            if candidate.mutable
                && candidate.ty.is_usable()
                && !candidate.ty.is_dynamic_bytes()
            {
                return Some(candidate.clone());
            }
        }
        None
    }
}

/// The stepped lvalue inside a recorded compensation expression.
fn undo_operand(compensation: &Expr) -> String {
    match compensation.kind() {
        crate::expr::ExprKind::Unary { operand, .. } => render(operand).to_source(),
        _ => render(compensation).to_source(),
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::env::variable;
    use crate::value::Value;

    fn env_for_mutation() -> VariableEnvironment {
        let mut env = VariableEnvironment::replay(3);
        env.add_variable_with_values(
            variable("counter", SolType::uint(8)),
            vec![
                Value::int(false, 8, 3),
                Value::int(false, 8, 5),
                Value::int(false, 8, 9),
            ],
        )
        .unwrap();
        env.add_variable_with_values(
            variable("ready", SolType::Bool),
            vec![Value::Bool(true), Value::Bool(false), Value::Bool(true)],
        )
        .unwrap();
        env
    }

    fn statement() -> SyntaxNode {
        SyntaxNode::Verbatim("counter = counter + uint8(1);".into())
    }

    #[test]
    fn test_always_true_guard_wraps_statement() {
        let mut env = env_for_mutation();
        let mut ctx = SynthesisContext::seeded(31);
        // The consistency flag makes predicate synthesis self-verify
        // against every sample; an unsound guard fails the test here.
        ctx.flags.check_consistency = true;
        let mut mutator = Mutator::new();

        let mutation = mutator
            .always_true_guard(&mut ctx, &mut env, &statement())
            .unwrap();
        let code = mutation.code.to_source();
        assert!(code.starts_with("if ("));
        assert!(code.contains("counter = counter + uint8(1);"));
    }

    #[test]
    fn test_always_false_block_prepends_dead_code() {
        let mut env = env_for_mutation();
        let mut ctx = SynthesisContext::seeded(32);
        ctx.flags.check_consistency = true;
        let mut mutator = Mutator::new();

        let mutation = mutator
            .always_false_block(&mut ctx, &mut env, &statement())
            .unwrap();
        let code = mutation.code.to_source();
        assert!(code.starts_with("{ if ("));
        // The original statement is preserved after the dead block.
        assert!(code.ends_with("counter = counter + uint8(1); }"));
    }

    #[test]
    fn test_always_true_block_backs_up_and_restores() {
        let mut env = env_for_mutation();
        let mut ctx = SynthesisContext::seeded(33);
        ctx.flags.check_consistency = true;
        let mut mutator = Mutator::new();

        let mutation = mutator
            .always_true_block(&mut ctx, &mut env, &statement())
            .unwrap();
        let code = mutation.code.to_source();
        // Restoration must textually follow the guarded overwrite.
        let backup = code.find("_internalBackup").expect("backup assignment");
        let restore = code.rfind("_internalBackup").expect("restore assignment");
        assert!(restore > backup);
        assert!(code.contains("counter = counter + uint8(1);"));
    }

    #[test]
    fn test_mutations_do_not_touch_replay_environment() {
        let mut env = env_for_mutation();
        let before: Vec<Value> = (0..3).map(|i| env.resolve(i, "counter").unwrap()).collect();
        for seed in 40..60 {
            let mut ctx = SynthesisContext::seeded(seed);
            ctx.flags.check_consistency = true;
            let mut mutator = Mutator::new();
            mutator.mutate(&mut ctx, &mut env, &statement()).unwrap();
        }
        let after: Vec<Value> = (0..3).map(|i| env.resolve(i, "counter").unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_mutation_without_variables_degenerates_gracefully() {
        let mut env = VariableEnvironment::replay(1);
        let mut ctx = SynthesisContext::seeded(44);
        let mut mutator = Mutator::new();
        let mutation = mutator
            .always_true_block(&mut ctx, &mut env, &statement())
            .unwrap();
        assert_eq!(mutation.code.to_source(), statement().to_source());
    }

    #[test]
    fn test_helper_functions_surface_through_mutation() {
        // Scan seeds until an always-false block synthesizes a helper
        // call; the definition must surface on the mutation.
        let mut env = env_for_mutation();
        for seed in 0..2000u64 {
            let mut ctx = SynthesisContext::seeded(seed);
            let mut mutator = Mutator::new();
            let mutation = mutator
                .always_false_block(&mut ctx, &mut env, &statement())
                .unwrap();
            if !mutation.helpers.is_empty() {
                let code = mutation.code.to_source();
                assert!(code.contains(&mutation.helpers[0].name));
                return;
            }
        }
        panic!("no seed produced a helper function");
    }
}
