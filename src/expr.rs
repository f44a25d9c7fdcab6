//! The symbolic operator tree.
//!
//! [`Expr`] is a cheap handle (`Rc`) to an immutable node. Each node carries
//! a unique id, its derived type (computed once at construction and never
//! recomputed), and exactly one operand payload ([`ExprKind`]). Two optional
//! attachments exist:
//!
//! - a **render alias**: literal text that overrides rendering, used to name
//!   a helper-function argument (`arg0` instead of the full expression);
//! - an **evaluation alias**: a substitute expression evaluated in place of
//!   a call node while the node still renders as a call. This is how a
//!   synthesized helper call is evaluated through the body the helper is
//!   defined to return, without re-parsing generated source.
//!
//! Repair never mutates a node: it builds a replacement subtree and
//! [`Expr::replace`] rebuilds the spine above it, reusing untouched
//! branches. Fresh ids on the rebuilt spine keep the evaluator's
//! memoization sound.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::env::Variable;
use crate::error::{EvalError, EvalResult};
use crate::types::SolType;
use crate::value::Value;

static NEXT_EXPR_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of an expression node; memoization keys.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ExprId(u64);

impl ExprId {
    fn fresh() -> Self {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Unary operators.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `~x`
    BitNot,
    /// `!x`
    LogicNot,
    /// `++x`
    IncPre,
    /// `x++`
    IncPost,
    /// `--x`
    DecPre,
    /// `x--`
    DecPost,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 7] = [
        UnaryOp::Neg,
        UnaryOp::BitNot,
        UnaryOp::LogicNot,
        UnaryOp::IncPre,
        UnaryOp::IncPost,
        UnaryOp::DecPre,
        UnaryOp::DecPost,
    ];

    pub fn is_prefix(self) -> bool {
        !matches!(self, UnaryOp::IncPost | UnaryOp::DecPost)
    }

    pub fn has_side_effect(self) -> bool {
        matches!(
            self,
            UnaryOp::IncPre | UnaryOp::IncPost | UnaryOp::DecPre | UnaryOp::DecPost
        )
    }

    pub fn token(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::BitNot => "~",
            UnaryOp::LogicNot => "!",
            UnaryOp::IncPre | UnaryOp::IncPost => "++",
            UnaryOp::DecPre | UnaryOp::DecPost => "--",
        }
    }
}

/// Binary operators.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    BitOr,
    BitAnd,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicAnd,
    LogicOr,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 19] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Rem,
        BinaryOp::Pow,
        BinaryOp::BitOr,
        BinaryOp::BitAnd,
        BinaryOp::BitXor,
        BinaryOp::Shl,
        BinaryOp::Shr,
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::LogicAnd,
        BinaryOp::LogicOr,
    ];

    /// Operators whose result type is `bool` regardless of operand types.
    pub fn yields_bool(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::LogicAnd
                | BinaryOp::LogicOr
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogicAnd | BinaryOp::LogicOr)
    }

    pub fn is_relational(self) -> bool {
        matches!(self, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
    }

    /// Mirror of a relational operator, for flipping operand order.
    pub fn mirrored(self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Lt => Some(BinaryOp::Gt),
            BinaryOp::Gt => Some(BinaryOp::Lt),
            BinaryOp::Le => Some(BinaryOp::Ge),
            BinaryOp::Ge => Some(BinaryOp::Le),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
            BinaryOp::BitOr => "|",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::LogicAnd => "&&",
            BinaryOp::LogicOr => "||",
        }
    }
}

/// The operand payload of a node; exactly one kind per node.
#[derive(Debug)]
pub enum ExprKind {
    Literal(Value),
    Var(Variable),
    Unary {
        op: UnaryOp,
        operand: Expr,
    },
    Binary {
        op: BinaryOp,
        lhs: Expr,
        rhs: Expr,
    },
    Conditional {
        cond: Expr,
        then_branch: Expr,
        else_branch: Expr,
    },
    Member {
        base: Expr,
        field: String,
    },
    Index {
        base: Expr,
        index: Expr,
    },
    Cast {
        operand: Expr,
        target: SolType,
    },
    Call {
        callee: String,
        arguments: Vec<Expr>,
    },
    Assign {
        lhs: Expr,
        rhs: Expr,
    },
    Tuple(Vec<Expr>),
}

/// One node of the tree. Constructed only through the [`Expr`] builders.
#[derive(Debug)]
pub struct ExprNode {
    id: ExprId,
    ty: SolType,
    kind: ExprKind,
    render_alias: RefCell<Option<String>>,
    eval_alias: Option<Expr>,
    contains_eval_alias: bool,
}

/// Shared handle to an expression node.
#[derive(Debug, Clone)]
pub struct Expr(Rc<ExprNode>);

impl Expr {
    fn build(ty: SolType, kind: ExprKind, eval_alias: Option<Expr>) -> Expr {
        let children_contain_alias = {
            let mut found = eval_alias.is_some();
            let mut visit = |e: &Expr| found |= e.contains_eval_alias();
            match &kind {
                ExprKind::Literal(_) | ExprKind::Var(_) => {}
                ExprKind::Unary { operand, .. } => visit(operand),
                ExprKind::Binary { lhs, rhs, .. } => {
                    visit(lhs);
                    visit(rhs);
                }
                ExprKind::Conditional {
                    cond,
                    then_branch,
                    else_branch,
                } => {
                    visit(cond);
                    visit(then_branch);
                    visit(else_branch);
                }
                ExprKind::Member { base, .. } => visit(base),
                ExprKind::Index { base, index } => {
                    visit(base);
                    visit(index);
                }
                ExprKind::Cast { operand, .. } => visit(operand),
                ExprKind::Call { arguments, .. } => arguments.iter().for_each(&mut visit),
                ExprKind::Assign { lhs, rhs } => {
                    visit(lhs);
                    visit(rhs);
                }
                ExprKind::Tuple(parts) => parts.iter().for_each(&mut visit),
            }
            found
        };
        Expr(Rc::new(ExprNode {
            id: ExprId::fresh(),
            ty,
            kind,
            render_alias: RefCell::new(None),
            eval_alias,
            contains_eval_alias: children_contain_alias,
        }))
    }

    pub fn literal(value: Value) -> Expr {
        let ty = value.sol_type();
        Expr::build(ty, ExprKind::Literal(value), None)
    }

    pub fn var(variable: Variable) -> Expr {
        let ty = variable.ty.clone();
        Expr::build(ty, ExprKind::Var(variable), None)
    }

    /// All unary operators preserve the operand's type.
    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        let ty = operand.ty().clone();
        Expr::build(ty, ExprKind::Unary { op, operand }, None)
    }

    /// Comparisons and logical operators yield `bool`; integer arithmetic
    /// yields the operands' common integer type; everything else keeps the
    /// left operand's type.
    pub fn binary(lhs: Expr, op: BinaryOp, rhs: Expr) -> Expr {
        let ty = if op.yields_bool() {
            SolType::Bool
        } else {
            lhs.ty()
                .common_integer_type(rhs.ty())
                .unwrap_or_else(|| lhs.ty().clone())
        };
        Expr::build(ty, ExprKind::Binary { op, lhs, rhs }, None)
    }

    /// The conditional operator requires compatible branch types.
    pub fn conditional(cond: Expr, then_branch: Expr, else_branch: Expr) -> Expr {
        let ty = then_branch
            .ty()
            .common_integer_type(else_branch.ty())
            .unwrap_or_else(|| then_branch.ty().clone());
        Expr::build(
            ty,
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            },
            None,
        )
    }

    pub fn member(base: Expr, field: impl Into<String>) -> EvalResult<Expr> {
        let field = field.into();
        let ty = match base.ty() {
            SolType::Struct(def) => def
                .member(&field)
                .map(|m| m.ty.clone())
                .ok_or_else(|| {
                    EvalError::Internal(format!("unknown member {field} of {}", def.name))
                })?,
            other => {
                return Err(EvalError::Internal(format!(
                    "member access on non-struct type {other}"
                )))
            }
        };
        Ok(Expr::build(ty, ExprKind::Member { base, field }, None))
    }

    pub fn index(base: Expr, index: Expr) -> EvalResult<Expr> {
        let ty = match base.ty() {
            SolType::Array(elem) => (**elem).clone(),
            other => {
                return Err(EvalError::Internal(format!(
                    "index access on non-array type {other}"
                )))
            }
        };
        Ok(Expr::build(ty, ExprKind::Index { base, index }, None))
    }

    pub fn cast(operand: Expr, target: SolType) -> Expr {
        Expr::build(
            target.clone(),
            ExprKind::Cast { operand, target },
            None,
        )
    }

    pub fn call(callee: impl Into<String>, arguments: Vec<Expr>, return_type: SolType) -> Expr {
        Expr::build(
            return_type,
            ExprKind::Call {
                callee: callee.into(),
                arguments,
            },
            None,
        )
    }

    /// Call node evaluated through a substitute body expression.
    pub fn call_with_alias(
        callee: impl Into<String>,
        arguments: Vec<Expr>,
        return_type: SolType,
        body: Expr,
    ) -> Expr {
        Expr::build(
            return_type,
            ExprKind::Call {
                callee: callee.into(),
                arguments,
            },
            Some(body),
        )
    }

    pub fn assign(lhs: Expr, rhs: Expr) -> Expr {
        let ty = lhs.ty().clone();
        Expr::build(ty, ExprKind::Assign { lhs, rhs }, None)
    }

    pub fn tuple(parts: Vec<Expr>) -> Expr {
        let ty = SolType::Tuple(parts.iter().map(|p| p.ty().clone()).collect());
        Expr::build(ty, ExprKind::Tuple(parts), None)
    }

    pub fn id(&self) -> ExprId {
        self.0.id
    }

    pub fn ty(&self) -> &SolType {
        &self.0.ty
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    pub fn render_alias(&self) -> Option<String> {
        self.0.render_alias.borrow().clone()
    }

    /// Sets or clears the render alias.
    pub fn set_render_alias(&self, alias: Option<String>) {
        *self.0.render_alias.borrow_mut() = alias;
    }

    pub fn eval_alias(&self) -> Option<&Expr> {
        self.0.eval_alias.as_ref()
    }

    pub fn contains_eval_alias(&self) -> bool {
        self.0.contains_eval_alias
    }

    /// Walks past member/index accesses to the variable an lvalue
    /// expression is rooted in, if any.
    pub fn base_variable(&self) -> Option<&Variable> {
        match self.kind() {
            ExprKind::Var(v) => Some(v),
            ExprKind::Member { base, .. } => base.base_variable(),
            ExprKind::Index { base, .. } => base.base_variable(),
            _ => None,
        }
    }

    /// Member path from the base variable to this node, outermost last.
    /// Empty for a plain variable reference.
    pub fn member_path(&self) -> Vec<String> {
        match self.kind() {
            ExprKind::Member { base, field } => {
                let mut path = base.member_path();
                path.push(field.clone());
                path
            }
            _ => Vec::new(),
        }
    }

    pub fn same_node(&self, other: &Expr) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Structurally rebuilds this tree with the node `target` replaced by
    /// `replacement`. Untouched branches are shared; every node on the
    /// rebuilt spine gets a fresh id (its cached values no longer apply).
    pub fn replace(&self, target: ExprId, replacement: &Expr) -> Expr {
        if self.id() == target {
            return replacement.clone();
        }
        let rebuild = |e: &Expr| e.replace(target, replacement);
        let changed_kind = match self.kind() {
            ExprKind::Literal(_) | ExprKind::Var(_) => None,
            ExprKind::Unary { op, operand } => {
                let new = rebuild(operand);
                (!new.same_node(operand)).then(|| ExprKind::Unary {
                    op: *op,
                    operand: new,
                })
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let (new_lhs, new_rhs) = (rebuild(lhs), rebuild(rhs));
                (!new_lhs.same_node(lhs) || !new_rhs.same_node(rhs)).then(|| ExprKind::Binary {
                    op: *op,
                    lhs: new_lhs,
                    rhs: new_rhs,
                })
            }
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                let (c, t, e) = (rebuild(cond), rebuild(then_branch), rebuild(else_branch));
                (!c.same_node(cond) || !t.same_node(then_branch) || !e.same_node(else_branch))
                    .then(|| ExprKind::Conditional {
                        cond: c,
                        then_branch: t,
                        else_branch: e,
                    })
            }
            ExprKind::Member { base, field } => {
                let new = rebuild(base);
                (!new.same_node(base)).then(|| ExprKind::Member {
                    base: new,
                    field: field.clone(),
                })
            }
            ExprKind::Index { base, index } => {
                let (b, i) = (rebuild(base), rebuild(index));
                (!b.same_node(base) || !i.same_node(index))
                    .then(|| ExprKind::Index { base: b, index: i })
            }
            ExprKind::Cast { operand, target: t } => {
                let new = rebuild(operand);
                (!new.same_node(operand)).then(|| ExprKind::Cast {
                    operand: new,
                    target: t.clone(),
                })
            }
            ExprKind::Call { callee, arguments } => {
                let new_args: Vec<Expr> = arguments.iter().map(rebuild).collect();
                new_args
                    .iter()
                    .zip(arguments)
                    .any(|(n, o)| !n.same_node(o))
                    .then(|| ExprKind::Call {
                        callee: callee.clone(),
                        arguments: new_args,
                    })
            }
            ExprKind::Assign { lhs, rhs } => {
                let (l, r) = (rebuild(lhs), rebuild(rhs));
                (!l.same_node(lhs) || !r.same_node(rhs))
                    .then(|| ExprKind::Assign { lhs: l, rhs: r })
            }
            ExprKind::Tuple(parts) => {
                let new_parts: Vec<Expr> = parts.iter().map(rebuild).collect();
                new_parts
                    .iter()
                    .zip(parts)
                    .any(|(n, o)| !n.same_node(o))
                    .then(|| ExprKind::Tuple(new_parts))
            }
        };

        let new_alias = self.eval_alias().map(rebuild);
        let alias_changed = match (self.eval_alias(), &new_alias) {
            (Some(old), Some(new)) => !new.same_node(old),
            _ => false,
        };

        if changed_kind.is_none() && !alias_changed {
            return self.clone();
        }

        let kind = changed_kind.unwrap_or_else(|| match self.kind() {
            // Only the alias changed; shallow-copy the payload.
            ExprKind::Call { callee, arguments } => ExprKind::Call {
                callee: callee.clone(),
                arguments: arguments.clone(),
            },
            _ => unreachable!("eval alias only attaches to call nodes"),
        });
        let rebuilt = Expr::build(self.ty().clone(), kind, new_alias);
        rebuilt.set_render_alias(self.render_alias());
        rebuilt
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::env::variable;

    fn u8lit(v: i64) -> Expr {
        Expr::literal(Value::int(false, 8, v))
    }

    #[test]
    fn test_derived_types() {
        let x = Expr::var(variable("x", SolType::uint(8)));
        let y = Expr::var(variable("y", SolType::uint(32)));

        let sum = Expr::binary(x.clone(), BinaryOp::Add, y.clone());
        assert_eq!(sum.ty(), &SolType::uint(32));

        let cmp = Expr::binary(x.clone(), BinaryOp::Lt, y);
        assert_eq!(cmp.ty(), &SolType::Bool);

        let neg = Expr::unary(UnaryOp::Neg, x.clone());
        assert_eq!(neg.ty(), &SolType::uint(8));

        let cast = Expr::cast(x, SolType::int(true, 16));
        assert_eq!(cast.ty(), &SolType::int(true, 16));
    }

    #[test]
    fn test_member_and_index_types() {
        use crate::types::StructDef;

        let def = StructDef::new("S0", vec![("a", SolType::uint(8))]);
        let s = Expr::var(variable("s", SolType::Struct(def)));
        let member = Expr::member(s.clone(), "a").unwrap();
        assert_eq!(member.ty(), &SolType::uint(8));
        assert!(Expr::member(s, "nope").is_err());

        let arr = Expr::var(variable("a", SolType::Array(Box::new(SolType::Bool))));
        let elem = Expr::index(arr, u8lit(0)).unwrap();
        assert_eq!(elem.ty(), &SolType::Bool);
    }

    #[test]
    fn test_base_variable_through_members() {
        use crate::types::StructDef;

        let def = StructDef::new("S0", vec![("a", SolType::uint(8))]);
        let v = variable("s", SolType::Struct(def));
        let access = Expr::member(Expr::var(Rc::clone(&v)), "a").unwrap();
        assert_eq!(access.base_variable().unwrap().name, "s");
        assert_eq!(access.member_path(), vec!["a".to_owned()]);
    }

    #[test]
    fn test_replace_rebuilds_spine_only() {
        let a = u8lit(1);
        let b = u8lit(2);
        let sum = Expr::binary(a.clone(), BinaryOp::Add, b.clone());
        let outer = Expr::binary(sum.clone(), BinaryOp::Mul, u8lit(3));

        let replacement = u8lit(9);
        let rewritten = outer.replace(b.id(), &replacement);

        assert!(!rewritten.same_node(&outer));
        match rewritten.kind() {
            ExprKind::Binary { lhs, rhs, .. } => {
                // Right factor untouched and shared; left rebuilt.
                match outer.kind() {
                    ExprKind::Binary { rhs: old_rhs, .. } => assert!(rhs.same_node(old_rhs)),
                    _ => unreachable!(),
                }
                match lhs.kind() {
                    ExprKind::Binary { lhs: new_a, rhs: new_b, .. } => {
                        assert!(new_a.same_node(&a));
                        assert!(new_b.same_node(&replacement));
                    }
                    _ => panic!("expected rebuilt sum"),
                }
            }
            _ => panic!("expected binary node"),
        }
    }

    #[test]
    fn test_replace_missing_target_is_identity() {
        let e = Expr::binary(u8lit(1), BinaryOp::Add, u8lit(2));
        let unrelated = u8lit(5);
        let out = e.replace(unrelated.id(), &u8lit(9));
        assert!(out.same_node(&e));
    }

    #[test]
    fn test_eval_alias_propagation() {
        let body = u8lit(7);
        let call = Expr::call_with_alias("helper0", vec![u8lit(1)], SolType::uint(8), body);
        assert!(call.contains_eval_alias());

        let wrapped = Expr::unary(UnaryOp::Neg, call);
        assert!(wrapped.contains_eval_alias());
        assert!(!u8lit(1).contains_eval_alias());
    }
}
