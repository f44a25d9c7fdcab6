//! The boundary to the (external) syntax layer.
//!
//! The engine neither parses programs nor owns a full syntax tree; it only
//! needs to (a) lift a program-tree *leaf* into an [`Expr`] given the
//! enclosing variable bindings, and (b) render a finished expression into a
//! freestanding fragment that splices into a program tree as valid source
//! text. [`SyntaxNode`] is that minimal currency: leaves in, verbatim
//! fragments out. No parent pointers in either direction.

use num_bigint::BigInt;
use num_traits::Num;

use crate::env::VariableEnvironment;
use crate::error::{EvalError, EvalResult};
use crate::expr::{Expr, ExprKind, UnaryOp};
use crate::exprgen::HelperFunction;
use crate::types::SolType;
use crate::value::{AddressValue, IntValue, Value};

/// A splice-able piece of program syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxNode {
    /// A literal token, e.g. `42`, `true`, `"abc"`, `0xdead...beef`.
    Literal(String),
    /// A plain identifier.
    Identifier(String),
    /// A direct call, e.g. `uint8(x)` or `keccak256(s)`.
    Call {
        callee: String,
        arguments: Vec<SyntaxNode>,
    },
    /// Pre-rendered source text.
    Verbatim(String),
}

impl SyntaxNode {
    pub fn to_source(&self) -> String {
        match self {
            SyntaxNode::Literal(text) => text.clone(),
            SyntaxNode::Identifier(name) => name.clone(),
            SyntaxNode::Call { callee, arguments } => {
                let arguments: Vec<String> =
                    arguments.iter().map(SyntaxNode::to_source).collect();
                format!("{callee}({})", arguments.join(", "))
            }
            SyntaxNode::Verbatim(text) => text.clone(),
        }
    }
}

/// Builds an expression leaf from a syntax leaf and the enclosing variable
/// bindings. Anything beyond literals, identifiers and direct
/// elementary-typed/builtin calls is rejected with `UnsupportedConstruct`.
pub fn lift_leaf(node: &SyntaxNode, env: &VariableEnvironment) -> EvalResult<Expr> {
    match node {
        SyntaxNode::Literal(text) => Ok(Expr::literal(parse_literal(text)?)),
        SyntaxNode::Identifier(name) => {
            let values = env.lookup(name).ok_or_else(|| {
                EvalError::Internal(format!("reference to unknown variable {name}"))
            })?;
            Ok(Expr::var(values.variable().clone()))
        }
        SyntaxNode::Call { callee, arguments } => {
            if let Some(target) = parse_elementary_type(callee) {
                // An elementary type name in call position is a cast.
                let [argument] = arguments.as_slice() else {
                    return Err(EvalError::UnsupportedConstruct(format!(
                        "cast to {callee} with {} arguments",
                        arguments.len()
                    )));
                };
                let operand = lift_leaf(argument, env)?;
                return Ok(Expr::cast(operand, target));
            }
            if callee == "keccak256" {
                let arguments = arguments
                    .iter()
                    .map(|a| lift_leaf(a, env))
                    .collect::<EvalResult<Vec<_>>>()?;
                return Ok(Expr::call("keccak256", arguments, SolType::Bytes(32)));
            }
            Err(EvalError::UnsupportedConstruct(format!(
                "call to {callee}"
            )))
        }
        SyntaxNode::Verbatim(text) => Err(EvalError::UnsupportedConstruct(format!(
            "verbatim fragment {text:?}"
        ))),
    }
}

/// Renders a finished expression as a splice-able fragment.
pub fn render(expr: &Expr) -> SyntaxNode {
    SyntaxNode::Verbatim(render_text(expr, &mut None))
}

/// Like [`render`], additionally collecting an undo expression for every
/// `++`/`--` encountered, so the caller can compensate side effects with
/// generated backup/restore statements.
pub fn render_with_undo(expr: &Expr, undo: &mut Vec<Expr>) -> SyntaxNode {
    let mut collector = Some(undo);
    SyntaxNode::Verbatim(render_text(expr, &mut collector))
}

/// Renders a generated helper function as a full definition.
pub fn render_helper(helper: &HelperFunction) -> SyntaxNode {
    let mut signature = String::new();
    for (index, (name, ty)) in helper.parameters.iter().enumerate() {
        if index > 0 {
            signature.push_str(", ");
        }
        signature.push_str(&ty.to_string());
        if needs_memory_location(ty) {
            signature.push_str(" memory");
        }
        signature.push(' ');
        signature.push_str(name);
    }
    let mut returns = helper.return_type.to_string();
    if needs_memory_location(&helper.return_type) {
        returns.push_str(" memory");
    }
    let body = render_text(&helper.body, &mut None);
    SyntaxNode::Verbatim(format!(
        "function {}({signature}) public returns ({returns}) {{ return {body}; }}",
        helper.name
    ))
}

fn needs_memory_location(ty: &SolType) -> bool {
    ty.is_string() || ty.is_struct() || ty.is_array() || ty.is_dynamic_bytes()
}

fn render_text(expr: &Expr, undo: &mut Option<&mut Vec<Expr>>) -> String {
    if let Some(alias) = expr.render_alias() {
        return alias;
    }
    if expr.eval_alias().is_some() {
        // A generated call: it renders as a call while evaluating through
        // its alias. The arguments' own aliases name the helper's
        // parameters and must not leak into the call site, so they are
        // stripped for the duration of this rendering.
        let ExprKind::Call { callee, arguments } = expr.kind() else {
            unreachable!("evaluation alias only attaches to call nodes");
        };
        let rendered: Vec<String> = arguments
            .iter()
            .map(|argument| {
                let saved = argument.render_alias();
                argument.set_render_alias(None);
                let text = render_text(argument, undo);
                argument.set_render_alias(saved);
                text
            })
            .collect();
        return format!("{callee}({})", rendered.join(", "));
    }

    match expr.kind() {
        ExprKind::Literal(value) => value.to_source(),
        ExprKind::Var(variable) => variable.name.clone(),
        ExprKind::Unary { op, operand } => {
            if op.has_side_effect() {
                if let Some(collector) = undo.as_deref_mut() {
                    let compensation = match op {
                        UnaryOp::IncPre | UnaryOp::IncPost => UnaryOp::DecPre,
                        _ => UnaryOp::IncPre,
                    };
                    collector.push(Expr::unary(compensation, operand.clone()));
                }
            }
            // Parentheses are mandatory even around unary operators:
            // "---var" would otherwise re-associate as "--(-var)".
            let inner = render_text(operand, undo);
            if op.is_prefix() {
                format!("({}{inner})", op.token())
            } else {
                format!("({inner}{})", op.token())
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            format!(
                "({} {} {})",
                render_text(lhs, undo),
                op.token(),
                render_text(rhs, undo)
            )
        }
        ExprKind::Conditional {
            cond,
            then_branch,
            else_branch,
        } => {
            format!(
                "({}? {}: {})",
                render_text(cond, undo),
                render_text(then_branch, undo),
                render_text(else_branch, undo)
            )
        }
        ExprKind::Member { base, field } => {
            format!("{}.{field}", render_text(base, undo))
        }
        ExprKind::Index { base, index } => {
            format!("{}[{}]", render_text(base, undo), render_text(index, undo))
        }
        ExprKind::Cast { operand, target } => {
            format!("{target}({})", render_text(operand, undo))
        }
        ExprKind::Call { callee, arguments } => {
            let rendered: Vec<String> = arguments
                .iter()
                .map(|argument| {
                    let text = render_text(argument, undo);
                    // The builtin hash takes a "bytes" argument; string
                    // arguments need the conversion spelled out.
                    if callee == "keccak256" && argument.ty().is_string() {
                        format!("bytes({text})")
                    } else {
                        text
                    }
                })
                .collect();
            format!("{callee}({})", rendered.join(", "))
        }
        ExprKind::Assign { lhs, rhs } => {
            format!("({} = {})", render_text(lhs, undo), render_text(rhs, undo))
        }
        ExprKind::Tuple(parts) => {
            let rendered: Vec<String> =
                parts.iter().map(|part| render_text(part, undo)).collect();
            format!("({})", rendered.join(", "))
        }
    }
}

fn parse_literal(text: &str) -> EvalResult<Value> {
    match text {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Some(stripped) = text.strip_prefix('"') {
        let inner = stripped.strip_suffix('"').ok_or_else(|| {
            EvalError::UnsupportedConstruct(format!("unterminated string literal {text}"))
        })?;
        return Ok(Value::Str(inner.replace("\\\"", "\"").replace("\\\\", "\\")));
    }
    if let Some(hex) = text.strip_prefix("0x") {
        if hex.len() == 40 {
            let mut bytes = [0u8; 20];
            for (index, chunk) in hex.as_bytes().chunks(2).enumerate() {
                let chunk = std::str::from_utf8(chunk).expect("hex digits");
                bytes[index] = u8::from_str_radix(chunk, 16).map_err(|_| {
                    EvalError::UnsupportedConstruct(format!("malformed address {text}"))
                })?;
            }
            return Ok(Value::Address(AddressValue::new(bytes)));
        }
        let magnitude = BigInt::from_str_radix(hex, 16).map_err(|_| {
            EvalError::UnsupportedConstruct(format!("malformed hex literal {text}"))
        })?;
        return Ok(Value::Int(infer_integer(magnitude)?));
    }
    let magnitude = text.parse::<BigInt>().map_err(|_| {
        EvalError::UnsupportedConstruct(format!("unsupported literal {text}"))
    })?;
    Ok(Value::Int(infer_integer(magnitude)?))
}

/// Smallest signed type whose range contains the constant.
fn infer_integer(magnitude: BigInt) -> EvalResult<IntValue> {
    for bytes in 1..=32u16 {
        let bits = bytes * 8;
        let probe = IntValue::from_i64(true, bits, 0);
        if magnitude >= *probe.min_value().magnitude()
            && magnitude <= *probe.max_value().magnitude()
        {
            return Ok(IntValue::new(true, bits, magnitude));
        }
    }
    Err(EvalError::UnsupportedConstruct(format!(
        "integer constant {magnitude} exceeds 256 bits"
    )))
}

fn parse_elementary_type(name: &str) -> Option<SolType> {
    match name {
        "bool" => return Some(SolType::Bool),
        "string" => return Some(SolType::String),
        "address" => return Some(SolType::Address),
        "bytes" => return Some(SolType::Bytes(0)),
        "uint" => return Some(SolType::uint(256)),
        "int" => return Some(SolType::int(true, 256)),
        _ => {}
    }
    if let Some(bits) = name.strip_prefix("uint") {
        let bits: u16 = bits.parse().ok()?;
        return (bits >= 8 && bits <= 256 && bits % 8 == 0).then(|| SolType::uint(bits));
    }
    if let Some(bits) = name.strip_prefix("int") {
        let bits: u16 = bits.parse().ok()?;
        return (bits >= 8 && bits <= 256 && bits % 8 == 0).then(|| SolType::int(true, bits));
    }
    if let Some(size) = name.strip_prefix("bytes") {
        let size: u16 = size.parse().ok()?;
        return (size >= 1 && size <= 32).then_some(SolType::Bytes(size));
    }
    None
}
