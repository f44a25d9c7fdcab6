//! Generative type conversion.
//!
//! [`TypeConverter::convert`] turns an expression of any supported type
//! into one of any desired type — typically *not* preserving any semblance
//! of the original value, only evaluability. Where the modeled language has
//! a cast, a cast is used (inserting the intermediate maximum-width steps
//! the language demands for integer/bytes crossings); everywhere else the
//! conversion is built from conditionals over freshly generated constants,
//! parity checks, aggregate drilling, or hashing.
//!
//! [`TypeConverter::unify_operands`] is the binary-operator front end: it
//! brings two worklist operands to a compatible type combination before an
//! operator is chosen.

use log::trace;

use crate::context::SynthesisContext;
use crate::env::VariableEnvironment;
use crate::error::{EvalError, EvalResult};
use crate::expr::{BinaryOp, Expr};
use crate::types::SolType;
use crate::valgen::{IntegerPolicy, ValueGenerator};
use crate::value::{IntValue, Value};

pub struct TypeConverter;

impl TypeConverter {
    /// Converts `expr` into an expression whose derived type equals
    /// `desired` exactly.
    pub fn convert(
        ctx: &mut SynthesisContext,
        env: &VariableEnvironment,
        expr: Expr,
        desired: &SolType,
    ) -> EvalResult<Expr> {
        if expr.ty().same_type(desired) {
            return Ok(expr);
        }
        trace!("convert {} -> {desired}", expr.ty());

        match expr.ty().clone() {
            SolType::Int { .. } => Self::convert_from_integer(ctx, expr, desired),
            SolType::Bool => Self::convert_from_bool(ctx, expr, desired),
            SolType::Bytes(0) => Err(EvalError::Internal(
                "cannot convert from dynamic bytes".into(),
            )),
            SolType::Bytes(_) => Self::convert_from_bytes(ctx, env, expr, desired),
            SolType::Address => Self::convert_from_address(ctx, env, expr, desired),
            SolType::String => {
                // String-to-anything goes through the hash: a bytes32 value
                // that also gives string comparisons a meaning.
                let hashed = Self::hash_expr(expr);
                Self::convert_from_bytes(ctx, env, hashed, desired)
            }
            SolType::Enum(_) => Self::convert_from_enum(ctx, env, expr, desired),
            SolType::Struct(_) => {
                let member = Self::access_random_struct_member(ctx, expr)?;
                Self::convert(ctx, env, member, desired)
            }
            SolType::Array(_) => {
                let element = Self::access_random_array_element(ctx, expr)?;
                Self::convert(ctx, env, element, desired)
            }
            other => Err(EvalError::Internal(format!(
                "cannot convert from type {other}"
            ))),
        }
    }

    fn convert_from_integer(
        ctx: &mut SynthesisContext,
        expr: Expr,
        desired: &SolType,
    ) -> EvalResult<Expr> {
        let (signed, bits) = match expr.ty() {
            SolType::Int { signed, bits } => (*signed, *bits),
            _ => unreachable!(),
        };
        match desired {
            SolType::Int { .. } => Ok(Expr::cast(expr, desired.clone())),
            SolType::Bytes(size) if *size > 0 => {
                // Direct integer/bytes conversion only exists between the
                // maximum-width types; chain through int256 and bytes32.
                let mut out = expr;
                if bits < 256 {
                    out = Expr::cast(out, SolType::int(signed, 256));
                }
                out = Expr::cast(out, SolType::Bytes(32));
                if *size < 32 {
                    out = Expr::cast(out, SolType::Bytes(*size));
                }
                Ok(out)
            }
            SolType::Bool => Ok(Self::integer_to_bool(expr)),
            SolType::Address => Ok(Expr::cast(expr, SolType::Address)),
            _ => Self::conditional_projection(ctx, expr, desired),
        }
    }

    fn convert_from_bool(
        ctx: &mut SynthesisContext,
        expr: Expr,
        desired: &SolType,
    ) -> EvalResult<Expr> {
        if desired.is_integer() {
            // Mapping true/false to 1/0 would bias results into a tiny
            // corner of the domain. Keep zero in one branch for its special
            // nature and give the other branch a random small value; which
            // branch gets which is a coin flip.
            let random = Expr::literal(ValueGenerator::random_value(
                ctx,
                desired,
                IntegerPolicy::FavorSmall,
            )?);
            let zero = Expr::literal(Value::Int(match desired {
                SolType::Int { signed, bits } => IntValue::from_i64(*signed, *bits, 0),
                _ => unreachable!(),
            }));
            let (then_branch, else_branch) = if ctx.flip_coin() {
                (random, zero)
            } else {
                (zero, random)
            };
            return Ok(Expr::conditional(expr, then_branch, else_branch));
        }
        // bool to anything else: a random value either way.
        let then_branch = Expr::literal(ValueGenerator::random_value(
            ctx,
            desired,
            IntegerPolicy::FavorSmall,
        )?);
        let else_branch = Expr::literal(ValueGenerator::random_value(
            ctx,
            desired,
            IntegerPolicy::FavorSmall,
        )?);
        Ok(Expr::conditional(expr, then_branch, else_branch))
    }

    fn convert_from_bytes(
        ctx: &mut SynthesisContext,
        env: &VariableEnvironment,
        expr: Expr,
        desired: &SolType,
    ) -> EvalResult<Expr> {
        let size = match expr.ty() {
            SolType::Bytes(n) => *n,
            _ => unreachable!(),
        };
        match desired {
            SolType::Bytes(n) if *n > 0 => Ok(Expr::cast(expr, SolType::Bytes(*n))),
            SolType::Int {
                signed,
                bits,
            } => {
                let mut out = expr;
                if size < 32 {
                    out = Expr::cast(out, SolType::Bytes(32));
                }
                out = Expr::cast(out, SolType::int(*signed, 256));
                if *bits < 256 {
                    out = Expr::cast(out, desired.clone());
                }
                Ok(out)
            }
            SolType::Bool => {
                // Through a random integer type first, then by parity.
                let integer = SolType::random_integer(ctx);
                let as_integer = Self::convert_from_bytes(ctx, env, expr, &integer)?;
                Ok(Self::integer_to_bool(as_integer))
            }
            SolType::Address => Ok(Expr::cast(expr, SolType::Address)),
            _ => Self::conditional_projection(ctx, expr, desired),
        }
    }

    fn convert_from_address(
        ctx: &mut SynthesisContext,
        env: &VariableEnvironment,
        expr: Expr,
        desired: &SolType,
    ) -> EvalResult<Expr> {
        match desired {
            SolType::Int { .. } | SolType::Bytes(_) if !desired.is_dynamic_bytes() => {
                Ok(Expr::cast(expr, desired.clone()))
            }
            SolType::Bool => {
                let integer = SolType::random_integer(ctx);
                let as_integer = Expr::cast(expr, integer);
                Ok(Self::integer_to_bool(as_integer))
            }
            _ => {
                let _ = env;
                Self::conditional_projection(ctx, expr, desired)
            }
        }
    }

    fn convert_from_enum(
        ctx: &mut SynthesisContext,
        env: &VariableEnvironment,
        expr: Expr,
        desired: &SolType,
    ) -> EvalResult<Expr> {
        match desired {
            SolType::Int { .. } => Ok(Expr::cast(expr, desired.clone())),
            SolType::Bytes(n) if *n > 0 => {
                let integer = SolType::random_integer(ctx);
                let as_integer = Expr::cast(expr, integer);
                Self::convert_from_integer(ctx, as_integer, desired)
            }
            SolType::Bool => {
                let integer = SolType::random_integer(ctx);
                let as_integer = Expr::cast(expr, integer);
                Ok(Self::integer_to_bool(as_integer))
            }
            _ => {
                let _ = env;
                Self::conditional_projection(ctx, expr, desired)
            }
        }
    }

    /// `e` becomes `((e % 2) == 1 ? true : false)`: true iff the lowest
    /// bit is set.
    fn integer_to_bool(expr: Expr) -> Expr {
        let (signed, bits) = match expr.ty() {
            SolType::Int { signed, bits } => (*signed, *bits),
            _ => unreachable!(),
        };
        let two = Expr::literal(Value::Int(IntValue::from_i64(signed, bits, 2)));
        let one = Expr::literal(Value::Int(IntValue::from_i64(signed, bits, 1)));
        let parity = Expr::binary(expr, BinaryOp::Rem, two);
        let check = Expr::binary(parity, BinaryOp::Eq, one);
        Expr::conditional(
            check,
            Expr::literal(Value::Bool(true)),
            Expr::literal(Value::Bool(false)),
        )
    }

    /// Catch-all conversion: compare against a random probe of the source
    /// type and select between two random constants of the target type.
    fn conditional_projection(
        ctx: &mut SynthesisContext,
        expr: Expr,
        desired: &SolType,
    ) -> EvalResult<Expr> {
        let source_type = expr.ty().clone();
        let probe = Expr::literal(ValueGenerator::random_value(
            ctx,
            &source_type,
            IntegerPolicy::FavorSmall,
        )?);
        let condition = Expr::binary(expr, BinaryOp::Eq, probe);
        let then_branch = Expr::literal(ValueGenerator::random_value(
            ctx,
            desired,
            IntegerPolicy::FavorSmall,
        )?);
        let else_branch = Expr::literal(ValueGenerator::random_value(
            ctx,
            desired,
            IntegerPolicy::FavorSmall,
        )?);
        Ok(Expr::conditional(condition, then_branch, else_branch))
    }

    /// `s` becomes `keccak256(s)`, a `bytes32` result.
    pub fn hash_expr(expr: Expr) -> Expr {
        Expr::call("keccak256", vec![expr], SolType::Bytes(32))
    }

    /// Drills into a struct-typed expression with member accesses (and
    /// element accesses for array members) until a non-aggregate type is
    /// reached. Member choice is random at every level.
    pub fn access_random_struct_member(
        ctx: &mut SynthesisContext,
        expr: Expr,
    ) -> EvalResult<Expr> {
        let def = match expr.ty() {
            SolType::Struct(def) => def.clone(),
            other => {
                return Err(EvalError::Internal(format!(
                    "struct member access on type {other}"
                )))
            }
        };
        if def.members.is_empty() {
            return Err(EvalError::Internal(format!(
                "struct {} has no members to access",
                def.name
            )));
        }
        let choice = ctx.int_in_range(0, def.members.len() as i64 - 1) as usize;
        let member = &def.members[choice];
        let access = Expr::member(expr, member.name.clone())?;
        match &member.ty {
            SolType::Struct(_) => Self::access_random_struct_member(ctx, access),
            SolType::Array(_) => Self::access_random_array_element(ctx, access),
            _ => Ok(access),
        }
    }

    /// Subscripts an array-typed expression with a small random constant
    /// index, recursing through nested aggregates.
    pub fn access_random_array_element(
        ctx: &mut SynthesisContext,
        expr: Expr,
    ) -> EvalResult<Expr> {
        let index = ctx.int_in_range(0, 4);
        let subscript = Expr::literal(Value::int(false, 256, index));
        let access = Expr::index(expr, subscript)?;
        match access.ty().clone() {
            SolType::Array(_) => Self::access_random_array_element(ctx, access),
            SolType::Struct(_) => Self::access_random_struct_member(ctx, access),
            _ => Ok(access),
        }
    }

    /// Brings two operands to a compatible type combination for a binary
    /// operator. Integer pairs unify by casting the left operand; a
    /// fixed-bytes/integer pair is kept as-is half the time (it enables
    /// the shift operators); anything else converts the right operand to
    /// the left's type and then drills both out of aggregates and strings.
    pub fn unify_operands(
        ctx: &mut SynthesisContext,
        env: &VariableEnvironment,
        mut lhs: Expr,
        mut rhs: Expr,
    ) -> EvalResult<(Expr, Expr)> {
        if lhs.ty().is_integer() && rhs.ty().is_integer() {
            if !lhs.ty().same_type(rhs.ty()) {
                lhs = Expr::cast(lhs, rhs.ty().clone());
            }
            return Ok((lhs, rhs));
        }

        if lhs.ty().is_fixed_bytes()
            && rhs.ty().is_integer()
            && !ctx.flags.avoid_shifts
            && ctx.flip_coin()
        {
            // Keep the pair: shifts accept exactly this combination. The
            // coin flip limits the bias toward shift operators.
            return Ok((lhs, rhs));
        }

        if lhs.ty().is_fixed_bytes() && rhs.ty().is_fixed_bytes() {
            if !lhs.ty().same_type(rhs.ty()) {
                lhs = Expr::cast(lhs, rhs.ty().clone());
            }
            return Ok((lhs, rhs));
        }

        let target = lhs.ty().clone();
        rhs = Self::convert(ctx, env, rhs, &target)?;

        if target.is_struct() {
            // Two struct operands support no computational operator; take
            // a random terminal member of each. The drill paths are chosen
            // independently, so the terminal types may differ and the
            // right one is converted once more.
            let left = Self::access_random_struct_member(ctx, lhs)?;
            let right = Self::access_random_struct_member(ctx, rhs)?;
            let left_ty = left.ty().clone();
            lhs = left;
            rhs = Self::convert(ctx, env, right, &left_ty)?;
        } else if target.is_array() {
            let left = Self::access_random_array_element(ctx, lhs)?;
            let right = Self::access_random_array_element(ctx, rhs)?;
            let left_ty = left.ty().clone();
            lhs = left;
            rhs = Self::convert(ctx, env, right, &left_ty)?;
        }

        if lhs.ty().is_string() {
            // No operator is defined on strings; hashes compare fine.
            lhs = Self::hash_expr(lhs);
            rhs = Self::hash_expr(rhs);
        }
        Ok((lhs, rhs))
    }
}
