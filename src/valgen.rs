//! Random value generation.
//!
//! Entirely random integers are mostly useless to the synthesizers: for
//! most widths they come out huge, which defeats shift counts, array
//! indices and loop bounds. [`IntegerPolicy`] trades off between small and
//! full-range values; small means "one low byte of entropy".

use num_bigint::{BigInt, Sign};

use crate::context::SynthesisContext;
use crate::error::{EvalError, EvalResult};
use crate::types::SolType;
use crate::value::{
    AddressValue, ArrayValue, BytesValue, EnumValue, IntValue, StructValue, Value,
};

/// How integer magnitudes are drawn.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IntegerPolicy {
    /// Only the lowest byte is randomized.
    ExclusivelySmall,
    /// Half the time small, half the time full-range.
    FavorSmall,
    /// Full-range random.
    Random,
}

pub struct ValueGenerator;

impl ValueGenerator {
    /// Random value of the given type.
    pub fn random_value(
        ctx: &mut SynthesisContext,
        ty: &SolType,
        policy: IntegerPolicy,
    ) -> EvalResult<Value> {
        match ty {
            SolType::Int {
                signed: false,
                bits,
            } => Ok(Value::Int(Self::random_unsigned(ctx, *bits, policy))),
            SolType::Int { signed: true, bits } => {
                Ok(Value::Int(Self::random_signed(ctx, *bits, policy)))
            }
            SolType::Bool => Ok(Value::Bool(ctx.flip_coin())),
            SolType::Bytes(0) => {
                let len = ctx.int_in_range(0, 32) as usize;
                Ok(Value::Bytes(BytesValue::dynamic(Self::random_bytes(
                    ctx, len,
                ))))
            }
            SolType::Bytes(n) => Ok(Value::Bytes(BytesValue::fixed(Self::random_bytes(
                ctx,
                *n as usize,
            )))),
            SolType::String => Ok(Value::Str(Self::random_string(ctx))),
            SolType::Address => {
                let mut bytes = [0u8; 20];
                bytes.fill_with(|| ctx.random_byte());
                Ok(Value::Address(AddressValue::new(bytes)))
            }
            SolType::Array(elem) => {
                // Fixed default length, individual element generation.
                let elements = (0..5)
                    .map(|_| Self::random_value(ctx, elem, policy))
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok(Value::Array(ArrayValue::new((**elem).clone(), elements)))
            }
            SolType::Struct(def) => {
                let fields = def
                    .members
                    .iter()
                    .map(|m| Self::random_value(ctx, &m.ty, policy))
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok(Value::Struct(StructValue::new(def.clone(), fields)))
            }
            SolType::Enum(def) => {
                let ordinal = ctx.int_in_range(0, def.members.len() as i64 - 1) as usize;
                Ok(Value::Enum(EnumValue::new(def.clone(), ordinal)))
            }
            other => Err(EvalError::Internal(format!(
                "cannot generate a value of type {other}"
            ))),
        }
    }

    fn random_bytes(ctx: &mut SynthesisContext, len: usize) -> Vec<u8> {
        (0..len).map(|_| ctx.random_byte()).collect()
    }

    fn random_string(ctx: &mut SynthesisContext) -> String {
        const ALPHABET: &[u8] =
            b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 _";
        let len = ctx.int_in_range(0, 255) as usize;
        (0..len)
            .map(|_| *ctx.choose(ALPHABET) as char)
            .collect()
    }

    fn random_unsigned(ctx: &mut SynthesisContext, bits: u16, policy: IntegerPolicy) -> IntValue {
        let len = bits as usize / 8;
        let mut magnitude = vec![0u8; len];
        let full_range = match policy {
            IntegerPolicy::ExclusivelySmall => false,
            IntegerPolicy::FavorSmall => ctx.flip_coin(),
            IntegerPolicy::Random => true,
        };
        if full_range {
            magnitude.fill_with(|| ctx.random_byte());
        } else {
            magnitude[len - 1] = ctx.random_byte();
        }
        IntValue::new(false, bits, BigInt::from_bytes_be(Sign::Plus, &magnitude))
    }

    fn random_signed(ctx: &mut SynthesisContext, bits: u16, policy: IntegerPolicy) -> IntValue {
        // Draw an unsigned magnitude of the same width until it fits the
        // signed range (the signed maximum plus one, which negates to MIN),
        // then pick a sign.
        let limit = IntValue::from_i64(true, bits, 0).max_value();
        let limit_plus_one = limit.magnitude() + BigInt::from(1);
        let magnitude = loop {
            let candidate = Self::random_unsigned(ctx, bits, policy);
            if candidate.magnitude() <= &limit_plus_one {
                break candidate.magnitude().clone();
            }
        };
        let positive = ctx.flip_coin();
        if positive {
            if magnitude == limit_plus_one {
                IntValue::from_i64(true, bits, 0).min_value()
            } else {
                IntValue::new(true, bits, magnitude)
            }
        } else {
            IntValue::new(true, bits, -magnitude)
        }
    }

    /// The all-zeros value of a type (false, empty-ish aggregates with
    /// zeroed members, ordinal 0 for enums).
    pub fn zero_value(ty: &SolType) -> EvalResult<Value> {
        match ty {
            SolType::Int { signed, bits } => Ok(Value::Int(IntValue::from_i64(*signed, *bits, 0))),
            SolType::Bool => Ok(Value::Bool(false)),
            SolType::Bytes(0) => Ok(Value::Bytes(BytesValue::dynamic(Vec::new()))),
            SolType::Bytes(n) => Ok(Value::Bytes(BytesValue::fixed(vec![0; *n as usize]))),
            SolType::String => Ok(Value::Str(String::new())),
            SolType::Address => Ok(Value::Address(AddressValue::new([0; 20]))),
            SolType::Array(elem) => {
                let elements = (0..5)
                    .map(|_| Self::zero_value(elem))
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok(Value::Array(ArrayValue::new((**elem).clone(), elements)))
            }
            SolType::Struct(def) => {
                let fields = def
                    .members
                    .iter()
                    .map(|m| Self::zero_value(&m.ty))
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok(Value::Struct(StructValue::new(def.clone(), fields)))
            }
            SolType::Enum(def) => Ok(Value::Enum(EnumValue::new(def.clone(), 0))),
            other => Err(EvalError::Internal(format!(
                "no zero value for type {other}"
            ))),
        }
    }

    /// Strictly smaller value of the same type, or `None` at the minimum.
    pub fn smaller_value(value: &IntValue) -> Option<IntValue> {
        if value.gt(&value.min_value()) {
            Some(value.sub(&IntValue::same_type_as(value, 1)))
        } else {
            None
        }
    }

    /// Strictly larger value of the same type, or `None` at the maximum.
    pub fn bigger_value(value: &IntValue) -> Option<IntValue> {
        if value.lt(&value.max_value()) {
            Some(value.add(&IntValue::same_type_as(value, 1)))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_values_typecheck() {
        let mut ctx = SynthesisContext::seeded(11);
        let types = [
            SolType::uint(8),
            SolType::uint(256),
            SolType::int(true, 16),
            SolType::Bool,
            SolType::Bytes(4),
            SolType::String,
            SolType::Address,
        ];
        for ty in &types {
            for policy in [
                IntegerPolicy::ExclusivelySmall,
                IntegerPolicy::FavorSmall,
                IntegerPolicy::Random,
            ] {
                let value = ValueGenerator::random_value(&mut ctx, ty, policy).unwrap();
                assert!(value.sol_type().same_type(ty), "type mismatch for {ty}");
            }
        }
    }

    #[test]
    fn test_exclusively_small_stays_small() {
        let mut ctx = SynthesisContext::seeded(5);
        for _ in 0..100 {
            let value = ValueGenerator::random_value(
                &mut ctx,
                &SolType::uint(256),
                IntegerPolicy::ExclusivelySmall,
            )
            .unwrap();
            let v = value.as_int().unwrap();
            assert!(v.le(&IntValue::from_i64(false, 256, 255)));
        }
    }

    #[test]
    fn test_signed_values_in_range() {
        let mut ctx = SynthesisContext::seeded(6);
        let min = IntValue::from_i64(true, 8, 0).min_value();
        let max = IntValue::from_i64(true, 8, 0).max_value();
        for _ in 0..200 {
            let value =
                ValueGenerator::random_value(&mut ctx, &SolType::int(true, 8), IntegerPolicy::Random)
                    .unwrap();
            let v = value.as_int().unwrap();
            assert!(v.ge(&min) && v.le(&max));
        }
    }

    #[test]
    fn test_neighbor_values_clamped_at_limits() {
        let min = IntValue::from_i64(false, 8, 0);
        assert_eq!(ValueGenerator::smaller_value(&min), None);
        assert_eq!(
            ValueGenerator::smaller_value(&IntValue::from_i64(false, 8, 3)),
            Some(IntValue::from_i64(false, 8, 2))
        );

        let max = IntValue::from_i64(false, 8, 255);
        assert_eq!(ValueGenerator::bigger_value(&max), None);
        assert_eq!(
            ValueGenerator::bigger_value(&IntValue::from_i64(true, 8, -1)),
            Some(IntValue::from_i64(true, 8, 0))
        );
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(
            ValueGenerator::zero_value(&SolType::uint(8)).unwrap(),
            Value::int(false, 8, 0)
        );
        assert_eq!(
            ValueGenerator::zero_value(&SolType::Bool).unwrap(),
            Value::Bool(false)
        );
        match ValueGenerator::zero_value(&SolType::Bytes(4)).unwrap() {
            Value::Bytes(b) => assert_eq!(b.data(), &[0, 0, 0, 0]),
            other => panic!("expected bytes, got {other:?}"),
        }
    }

    #[test]
    fn test_struct_generation_fills_all_members() {
        use crate::types::StructDef;

        let mut ctx = SynthesisContext::seeded(9);
        let def = StructDef::new("S0", vec![("a", SolType::uint(8)), ("b", SolType::Bool)]);
        let value = ValueGenerator::random_value(
            &mut ctx,
            &SolType::Struct(def),
            IntegerPolicy::FavorSmall,
        )
        .unwrap();
        match value {
            Value::Struct(s) => assert_eq!(s.fields.len(), 2),
            other => panic!("expected struct, got {other:?}"),
        }
    }
}
