//! Type descriptors for the modeled contract language.
//!
//! A [`SolType`] describes the static type of a value or expression:
//! integers with explicit signedness and bit width, fixed or dynamic byte
//! arrays, and user-defined struct/enum/contract types whose definitions are
//! shared behind `Rc`. Compatibility predicates here answer the questions
//! the type checker and converter ask ("are these the same type", "what is
//! the common integer type"); per-operator definedness lives in
//! [`crate::typecheck`].

use std::fmt;
use std::rc::Rc;

use crate::context::SynthesisContext;

/// A struct member declaration: name plus type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructMember {
    pub name: String,
    pub ty: SolType,
}

/// A user-defined struct type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    pub members: Vec<StructMember>,
}

impl StructDef {
    pub fn new(name: impl Into<String>, members: Vec<(&str, SolType)>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            members: members
                .into_iter()
                .map(|(name, ty)| StructMember {
                    name: name.to_owned(),
                    ty,
                })
                .collect(),
        })
    }

    pub fn member(&self, name: &str) -> Option<&StructMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// A user-defined enum type; members are ordered, ordinals are indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub name: String,
    pub members: Vec<String>,
}

impl EnumDef {
    pub fn new(name: impl Into<String>, members: &[&str]) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            members: members.iter().map(|m| (*m).to_owned()).collect(),
        })
    }
}

/// A contract type; only the constructor signature matters to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDef {
    pub name: String,
    pub constructor_params: Vec<(String, SolType)>,
}

/// Static type of a value or expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolType {
    /// `intN` / `uintN`, bits in `8..=256`, multiple of 8.
    Int { signed: bool, bits: u16 },
    Bool,
    /// `bytesN` for `1..=32`; 0 encodes the dynamic `bytes` type.
    Bytes(u16),
    String,
    Address,
    Array(Box<SolType>),
    Struct(Rc<StructDef>),
    Enum(Rc<EnumDef>),
    Contract(Rc<ContractDef>),
    Mapping(Box<SolType>, Box<SolType>),
    /// Tuple of component types; only produced by tuple expressions, never
    /// declared.
    Tuple(Vec<SolType>),
}

impl SolType {
    pub fn int(signed: bool, bits: u16) -> Self {
        debug_assert!(bits >= 8 && bits <= 256 && bits % 8 == 0);
        SolType::Int { signed, bits }
    }

    pub fn uint(bits: u16) -> Self {
        SolType::int(false, bits)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, SolType::Int { .. })
    }

    pub fn is_signed_integer(&self) -> bool {
        matches!(self, SolType::Int { signed: true, .. })
    }

    pub fn is_unsigned_integer(&self) -> bool {
        matches!(self, SolType::Int { signed: false, .. })
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, SolType::Bool)
    }

    pub fn is_fixed_bytes(&self) -> bool {
        matches!(self, SolType::Bytes(n) if *n > 0)
    }

    pub fn is_dynamic_bytes(&self) -> bool {
        matches!(self, SolType::Bytes(0))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, SolType::String)
    }

    pub fn is_address(&self) -> bool {
        matches!(self, SolType::Address)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, SolType::Array(_))
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, SolType::Struct(_))
    }

    pub fn is_enum(&self) -> bool {
        matches!(self, SolType::Enum(_))
    }

    pub fn is_contract(&self) -> bool {
        matches!(self, SolType::Contract(_))
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, SolType::Mapping(_, _))
    }

    /// Structural type equality; two values are comparable only if this
    /// holds (modulo the explicit exceptions in the type checker).
    pub fn same_type(&self, other: &SolType) -> bool {
        self == other
    }

    /// Common type for two integer operands: the larger width. Signedness
    /// is taken from the left operand; mixed-signedness combinations are
    /// rejected later by the evaluator, not here.
    pub fn common_integer_type(&self, other: &SolType) -> Option<SolType> {
        match (self, other) {
            (SolType::Int { signed, bits: a }, SolType::Int { bits: b, .. }) => {
                Some(SolType::Int {
                    signed: *signed,
                    bits: (*a).max(*b),
                })
            }
            _ => None,
        }
    }

    /// Whether a variable of this type can participate in synthesis at all.
    /// Mappings cannot be read or copied, contract references are excluded,
    /// and structs are usable only if all members are.
    pub fn is_usable(&self) -> bool {
        match self {
            SolType::Mapping(_, _) => false,
            SolType::Contract(_) => false,
            SolType::Struct(def) => def.members.iter().all(|m| m.ty.is_usable()),
            SolType::Array(elem) => elem.is_usable(),
            SolType::Tuple(_) => false,
            _ => true,
        }
    }

    /// Random integer type (either signedness, any width).
    pub fn random_integer(ctx: &mut SynthesisContext) -> SolType {
        let signed = ctx.flip_coin();
        let bits = ctx.int_in_range(1, 32) as u16 * 8;
        SolType::Int { signed, bits }
    }

    /// Random fixed-size bytes type.
    pub fn random_fixed_bytes(ctx: &mut SynthesisContext) -> SolType {
        SolType::Bytes(ctx.int_in_range(1, 32) as u16)
    }

    /// Random elementary type usable as a helper-function result.
    pub fn random_elementary(ctx: &mut SynthesisContext) -> SolType {
        match ctx.int_in_range(0, 3) {
            0 => SolType::random_integer(ctx),
            1 => SolType::Bool,
            2 => SolType::random_fixed_bytes(ctx),
            _ => SolType::Address,
        }
    }
}

impl fmt::Display for SolType {
    /// Renders the type the way it is written in source code.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolType::Int { signed: true, bits } => write!(f, "int{bits}"),
            SolType::Int {
                signed: false,
                bits,
            } => write!(f, "uint{bits}"),
            SolType::Bool => write!(f, "bool"),
            SolType::Bytes(0) => write!(f, "bytes"),
            SolType::Bytes(n) => write!(f, "bytes{n}"),
            SolType::String => write!(f, "string"),
            SolType::Address => write!(f, "address"),
            SolType::Array(elem) => write!(f, "{elem}[]"),
            SolType::Struct(def) => write!(f, "{}", def.name),
            SolType::Enum(def) => write!(f, "{}", def.name),
            SolType::Contract(def) => write!(f, "{}", def.name),
            SolType::Mapping(k, v) => write!(f, "mapping({k} => {v})"),
            SolType::Tuple(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{part}")?;
                }
                write!(f, ")")
            }
        }
    }
}
