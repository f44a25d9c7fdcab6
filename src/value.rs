//! Immutable typed constants.
//!
//! [`Value`] is the tagged union over every runtime value the engine can
//! observe or synthesize. Values are never mutated after construction;
//! "updating" a struct member builds a new [`StructValue`].
//!
//! [`IntValue`] models the target language's machine integers on top of
//! `BigInt`: every arithmetic result is wrapped back into the type's range
//! (two's complement), matching the EVM's silent overflow behavior.
//! Division by zero and negative shift/exponent counts are *not* handled
//! here — the evaluator checks those operand conditions up front, so the
//! operations below may assume well-defined inputs.

use std::fmt;
use std::rc::Rc;

use num_bigint::{BigInt, Sign};
use num_traits::{One, ToPrimitive, Zero};

use crate::types::{ContractDef, EnumDef, SolType, StructDef};

/// An arbitrary-precision integer constrained to a declared width.
///
/// # Invariants
///
/// - `8 <= bits <= 256`, multiple of 8
/// - `magnitude` always lies inside the type's value range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntValue {
    signed: bool,
    bits: u16,
    magnitude: BigInt,
}

fn modulus(bits: u16) -> BigInt {
    BigInt::one() << bits
}

impl IntValue {
    /// Creates a value, wrapping `magnitude` into the type's range.
    pub fn new(signed: bool, bits: u16, magnitude: BigInt) -> Self {
        debug_assert!(bits >= 8 && bits <= 256 && bits % 8 == 0);
        let magnitude = Self::wrap(signed, bits, magnitude);
        Self {
            signed,
            bits,
            magnitude,
        }
    }

    pub fn from_i64(signed: bool, bits: u16, value: i64) -> Self {
        Self::new(signed, bits, BigInt::from(value))
    }

    /// Value of the same type as `other`.
    pub fn same_type_as(other: &IntValue, value: i64) -> Self {
        Self::from_i64(other.signed, other.bits, value)
    }

    fn wrap(signed: bool, bits: u16, value: BigInt) -> BigInt {
        let m = modulus(bits);
        let mut v = value % &m;
        if v.sign() == Sign::Minus {
            v += &m;
        }
        if signed && v >= (&m >> 1) {
            v -= m;
        }
        v
    }

    pub fn signed(&self) -> bool {
        self.signed
    }

    pub fn bits(&self) -> u16 {
        self.bits
    }

    pub fn magnitude(&self) -> &BigInt {
        &self.magnitude
    }

    pub fn sol_type(&self) -> SolType {
        SolType::Int {
            signed: self.signed,
            bits: self.bits,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.magnitude.sign() == Sign::Minus
    }

    /// Smallest representable value of this value's type.
    pub fn min_value(&self) -> IntValue {
        let magnitude = if self.signed {
            -(modulus(self.bits) >> 1u32)
        } else {
            BigInt::zero()
        };
        IntValue {
            signed: self.signed,
            bits: self.bits,
            magnitude,
        }
    }

    /// Largest representable value of this value's type.
    pub fn max_value(&self) -> IntValue {
        let magnitude = if self.signed {
            (modulus(self.bits) >> 1) - BigInt::one()
        } else {
            modulus(self.bits) - BigInt::one()
        };
        IntValue {
            signed: self.signed,
            bits: self.bits,
            magnitude,
        }
    }

    fn rewrap(&self, value: BigInt) -> IntValue {
        IntValue::new(self.signed, self.bits, value)
    }

    fn assert_same_type(&self, other: &IntValue) {
        debug_assert_eq!(
            (self.signed, self.bits),
            (other.signed, other.bits),
            "integer operands must share signedness and width"
        );
    }

    pub fn add(&self, other: &IntValue) -> IntValue {
        self.assert_same_type(other);
        self.rewrap(&self.magnitude + &other.magnitude)
    }

    pub fn sub(&self, other: &IntValue) -> IntValue {
        self.assert_same_type(other);
        self.rewrap(&self.magnitude - &other.magnitude)
    }

    pub fn mul(&self, other: &IntValue) -> IntValue {
        self.assert_same_type(other);
        self.rewrap(&self.magnitude * &other.magnitude)
    }

    /// Truncating division. The caller has already ruled out a zero divisor.
    pub fn div(&self, other: &IntValue) -> IntValue {
        self.assert_same_type(other);
        debug_assert!(!other.is_zero());
        self.rewrap(&self.magnitude / &other.magnitude)
    }

    /// Remainder with the dividend's sign. Nonzero divisor as for [`div`].
    ///
    /// [`div`]: IntValue::div
    pub fn rem(&self, other: &IntValue) -> IntValue {
        self.assert_same_type(other);
        debug_assert!(!other.is_zero());
        self.rewrap(&self.magnitude % &other.magnitude)
    }

    /// Modular exponentiation; the exponent is non-negative by the time we
    /// get here (the evaluator raises for negative counts).
    pub fn pow(&self, exponent: &IntValue) -> IntValue {
        debug_assert!(!exponent.is_negative());
        let result = self.magnitude.modpow(&exponent.magnitude, &modulus(self.bits));
        self.rewrap(result)
    }

    /// Two's complement negation; the signed minimum maps to itself.
    pub fn neg(&self) -> IntValue {
        self.rewrap(-&self.magnitude)
    }

    /// Bitwise complement: `!x == -x - 1` in two's complement.
    pub fn not_bits(&self) -> IntValue {
        self.rewrap(-&self.magnitude - BigInt::one())
    }

    pub fn and_bits(&self, other: &IntValue) -> IntValue {
        self.assert_same_type(other);
        self.rewrap(&self.magnitude & &other.magnitude)
    }

    pub fn or_bits(&self, other: &IntValue) -> IntValue {
        self.assert_same_type(other);
        self.rewrap(&self.magnitude | &other.magnitude)
    }

    pub fn xor_bits(&self, other: &IntValue) -> IntValue {
        self.assert_same_type(other);
        self.rewrap(&self.magnitude ^ &other.magnitude)
    }

    /// Left shift; counts of 256 or more yield 0. Negative counts have been
    /// ruled out by the evaluator.
    pub fn shl(&self, count: &IntValue) -> IntValue {
        debug_assert!(!count.is_negative());
        if count.magnitude >= BigInt::from(256) {
            return self.rewrap(BigInt::zero());
        }
        let shift = count.magnitude.to_u64().unwrap_or(256) as usize;
        self.rewrap(&self.magnitude << shift)
    }

    /// Right shift: arithmetic (rounding toward negative infinity) for
    /// signed types, logical for unsigned. Counts at or beyond the bit
    /// width sign-extend to 0 or -1.
    pub fn shr(&self, count: &IntValue) -> IntValue {
        debug_assert!(!count.is_negative());
        if count.magnitude >= BigInt::from(self.bits) {
            return if self.is_negative() {
                self.rewrap(BigInt::from(-1))
            } else {
                self.rewrap(BigInt::zero())
            };
        }
        let shift = count.magnitude.to_u64().unwrap_or(256) as usize;
        self.rewrap(&self.magnitude >> shift)
    }

    pub fn lt(&self, other: &IntValue) -> bool {
        self.magnitude < other.magnitude
    }

    pub fn le(&self, other: &IntValue) -> bool {
        self.magnitude <= other.magnitude
    }

    pub fn gt(&self, other: &IntValue) -> bool {
        self.magnitude > other.magnitude
    }

    pub fn ge(&self, other: &IntValue) -> bool {
        self.magnitude >= other.magnitude
    }

    pub fn eq_value(&self, other: &IntValue) -> bool {
        self.magnitude == other.magnitude
    }

    /// Cast to another integer type: truncate to the new width, then
    /// re-interpret under the new signedness.
    pub fn cast_int(&self, signed: bool, bits: u16) -> IntValue {
        IntValue::new(signed, bits, self.magnitude.clone())
    }

    /// Cast to a fixed-size byte array: the big-endian representation of
    /// the same-width unsigned value, left-padded with zeros.
    pub fn cast_bytes(&self, size: u16) -> BytesValue {
        let unsigned = self.cast_int(false, size * 8);
        let (_, raw) = unsigned.magnitude.to_bytes_be();
        let mut data = vec![0u8; size as usize];
        let offset = data.len().saturating_sub(raw.len());
        data[offset..].copy_from_slice(&raw[raw.len().saturating_sub(size as usize)..]);
        BytesValue::fixed(data)
    }

    /// Cast to an address via the unsigned 160-bit analog.
    pub fn cast_address(&self) -> AddressValue {
        let bytes = self.cast_bytes(20);
        let mut out = [0u8; 20];
        out.copy_from_slice(bytes.data());
        AddressValue::new(out)
    }
}

impl fmt::Display for IntValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.magnitude)
    }
}

/// A fixed-size (`bytes1`..`bytes32`) or dynamic (`bytes`) byte array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesValue {
    data: Vec<u8>,
    dynamic: bool,
}

impl BytesValue {
    pub fn fixed(data: Vec<u8>) -> Self {
        debug_assert!(!data.is_empty() && data.len() <= 32);
        Self {
            data,
            dynamic: false,
        }
    }

    pub fn dynamic(data: Vec<u8>) -> Self {
        Self {
            data,
            dynamic: true,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn sol_type(&self) -> SolType {
        if self.dynamic {
            SolType::Bytes(0)
        } else {
            SolType::Bytes(self.data.len() as u16)
        }
    }

    pub fn and_bits(&self, other: &BytesValue) -> BytesValue {
        debug_assert_eq!(self.size(), other.size());
        BytesValue::fixed(
            self.data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| a & b)
                .collect(),
        )
    }

    pub fn or_bits(&self, other: &BytesValue) -> BytesValue {
        debug_assert_eq!(self.size(), other.size());
        BytesValue::fixed(
            self.data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| a | b)
                .collect(),
        )
    }

    pub fn xor_bits(&self, other: &BytesValue) -> BytesValue {
        debug_assert_eq!(self.size(), other.size());
        BytesValue::fixed(
            self.data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| a ^ b)
                .collect(),
        )
    }

    pub fn not_bits(&self) -> BytesValue {
        BytesValue::fixed(self.data.iter().map(|b| !b).collect())
    }

    fn as_uint(&self) -> BigInt {
        BigInt::from_bytes_be(Sign::Plus, &self.data)
    }

    fn from_uint(&self, value: BigInt) -> BytesValue {
        let bits = self.data.len() as u16 * 8;
        let wrapped = IntValue::new(false, bits, value);
        wrapped.cast_bytes(self.data.len() as u16)
    }

    /// Shift the array left as one big-endian unsigned unit.
    pub fn shl(&self, count: &IntValue) -> BytesValue {
        debug_assert!(!count.is_negative());
        let width = self.data.len() * 8;
        if count.magnitude() >= &BigInt::from(width) {
            return BytesValue::fixed(vec![0u8; self.data.len()]);
        }
        let shift = count.magnitude().to_u64().unwrap_or(0) as usize;
        self.from_uint(self.as_uint() << shift)
    }

    /// Logical right shift of the array as one big-endian unsigned unit.
    pub fn shr(&self, count: &IntValue) -> BytesValue {
        debug_assert!(!count.is_negative());
        let width = self.data.len() * 8;
        if count.magnitude() >= &BigInt::from(width) {
            return BytesValue::fixed(vec![0u8; self.data.len()]);
        }
        let shift = count.magnitude().to_u64().unwrap_or(0) as usize;
        self.from_uint(self.as_uint() >> shift)
    }

    pub fn lt(&self, other: &BytesValue) -> bool {
        self.data < other.data
    }

    pub fn le(&self, other: &BytesValue) -> bool {
        self.data <= other.data
    }

    pub fn gt(&self, other: &BytesValue) -> bool {
        self.data > other.data
    }

    pub fn ge(&self, other: &BytesValue) -> bool {
        self.data >= other.data
    }

    pub fn eq_value(&self, other: &BytesValue) -> bool {
        self.data == other.data
    }

    /// Cast between sizes: shrinking keeps the leading bytes, growing pads
    /// zeros on the right.
    pub fn cast_bytes(&self, size: u16) -> BytesValue {
        let mut data = self.data.clone();
        data.resize(size as usize, 0);
        BytesValue::fixed(data)
    }

    /// Re-interpret the big-endian contents as an integer.
    pub fn cast_int(&self, signed: bool, bits: u16) -> IntValue {
        IntValue::new(signed, bits, self.as_uint())
    }

    pub fn cast_address(&self) -> AddressValue {
        self.cast_int(false, 160).cast_address()
    }

    pub fn hex(&self) -> String {
        self.data.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// A 160-bit account address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressValue([u8; 20]);

impl AddressValue {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn cast_int(&self, signed: bool, bits: u16) -> IntValue {
        IntValue::new(signed, bits, BigInt::from_bytes_be(Sign::Plus, &self.0))
    }

    pub fn hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// A struct instance: definition plus one value per member, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructValue {
    pub def: Rc<StructDef>,
    pub fields: Vec<Value>,
}

impl StructValue {
    pub fn new(def: Rc<StructDef>, fields: Vec<Value>) -> Self {
        debug_assert_eq!(def.members.len(), fields.len());
        Self { def, fields }
    }

    pub fn member(&self, name: &str) -> Option<&Value> {
        self.def
            .members
            .iter()
            .position(|m| m.name == name)
            .map(|i| &self.fields[i])
    }

    /// Immutable member update: a copy with one field replaced.
    pub fn with_member(&self, name: &str, value: Value) -> Option<StructValue> {
        let index = self.def.members.iter().position(|m| m.name == name)?;
        let mut fields = self.fields.clone();
        fields[index] = value;
        Some(StructValue {
            def: Rc::clone(&self.def),
            fields,
        })
    }
}

/// An array instance with a fixed element type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayValue {
    pub element_type: SolType,
    pub elements: Vec<Value>,
}

impl ArrayValue {
    pub fn new(element_type: SolType, elements: Vec<Value>) -> Self {
        Self {
            element_type,
            elements,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// An enum instance: definition plus member ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub def: Rc<EnumDef>,
    pub ordinal: usize,
}

impl EnumValue {
    pub fn new(def: Rc<EnumDef>, ordinal: usize) -> Self {
        debug_assert!(ordinal < def.members.len());
        Self { def, ordinal }
    }

    pub fn member_name(&self) -> &str {
        &self.def.members[self.ordinal]
    }
}

/// A contract instance: definition plus constructor argument values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractValue {
    pub def: Rc<ContractDef>,
    pub constructor_args: Vec<Value>,
}

/// The tagged union over all runtime values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(IntValue),
    Bool(bool),
    Bytes(BytesValue),
    Address(AddressValue),
    Str(String),
    Struct(StructValue),
    Array(ArrayValue),
    Enum(EnumValue),
    Contract(ContractValue),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn int(signed: bool, bits: u16, value: i64) -> Value {
        Value::Int(IntValue::from_i64(signed, bits, value))
    }

    pub fn sol_type(&self) -> SolType {
        match self {
            Value::Int(v) => v.sol_type(),
            Value::Bool(_) => SolType::Bool,
            Value::Bytes(v) => v.sol_type(),
            Value::Address(_) => SolType::Address,
            Value::Str(_) => SolType::String,
            Value::Struct(v) => SolType::Struct(Rc::clone(&v.def)),
            Value::Array(v) => SolType::Array(Box::new(v.element_type.clone())),
            Value::Enum(v) => SolType::Enum(Rc::clone(&v.def)),
            Value::Contract(v) => SolType::Contract(Rc::clone(&v.def)),
            Value::Tuple(parts) => SolType::Tuple(parts.iter().map(Value::sol_type).collect()),
        }
    }

    pub fn as_int(&self) -> Option<&IntValue> {
        match self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&BytesValue> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Byte representation fed to the builtin hash: UTF-8 for strings,
    /// the raw contents for byte arrays.
    pub fn hash_input(&self) -> Option<Vec<u8>> {
        match self {
            Value::Str(s) => Some(s.as_bytes().to_vec()),
            Value::Bytes(b) => Some(b.data().to_vec()),
            _ => None,
        }
    }

    /// Renders the value as a source-code literal. Integers carry an
    /// explicit cast so the literal's type never depends on inference.
    pub fn to_source(&self) -> String {
        match self {
            Value::Int(v) => format!("{}({})", v.sol_type(), v),
            Value::Bool(b) => b.to_string(),
            Value::Bytes(b) if b.is_dynamic() => format!("hex\"{}\"", b.hex()),
            Value::Bytes(b) => format!("{}(0x{})", b.sol_type(), b.hex()),
            Value::Address(a) => format!("address(0x{})", a.hex()),
            Value::Str(s) => {
                let escaped: String = s
                    .chars()
                    .flat_map(|c| match c {
                        '"' => vec!['\\', '"'],
                        '\\' => vec!['\\', '\\'],
                        c => vec![c],
                    })
                    .collect();
                format!("\"{escaped}\"")
            }
            Value::Struct(v) => {
                let fields: Vec<String> = v.fields.iter().map(Value::to_source).collect();
                format!("{}({})", v.def.name, fields.join(", "))
            }
            Value::Array(v) => {
                let elements: Vec<String> = v.elements.iter().map(Value::to_source).collect();
                format!("[{}]", elements.join(", "))
            }
            Value::Enum(v) => format!("{}.{}", v.def.name, v.member_name()),
            Value::Contract(v) => {
                let args: Vec<String> =
                    v.constructor_args.iter().map(Value::to_source).collect();
                format!("new {}({})", v.def.name, args.join(", "))
            }
            Value::Tuple(parts) => {
                let parts: Vec<String> = parts.iter().map(Value::to_source).collect();
                format!("({})", parts.join(", "))
            }
        }
    }
}
