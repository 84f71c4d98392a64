//! Values exchanged between test code and intercepted calls.
//!
//! A [`Value`] is what a test author programs as an answer or expectation, and what
//! call arguments and storage reads decode into. Decoded ABI structs are tagged as
//! [`Value::Struct`] so that the matcher never has to guess a value's shape.

use crate::primitives::{
    Address,
    B256,
    Bytes,
    I256,
    U256,
    hex,
};
use alloy_dyn_abi::DynSolValue;
use alloy_json_abi::Param;
use enum_as_inner::EnumAsInner;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum Value {
    Bool(bool),
    Uint(U256),
    Int(I256),
    Address(Address),
    /// Left-aligned fixed bytes and their declared width.
    FixedBytes(B256, usize),
    Bytes(Bytes),
    String(String),
    Sequence(Vec<Value>),
    /// Struct decoded from ABI data, members in declaration order.
    Struct(Vec<(String, Value)>),
    /// Keyed record supplied by a test or produced by a storage read.
    Record(Vec<(String, Value)>),
    /// Mapping literal used for storage writes.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Builds a [`Value::Record`] from `(key, value)` pairs.
    pub fn record<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Record(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds a [`Value::Map`] from `(key, value)` pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<Value>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds a [`Value::Sequence`].
    pub fn seq<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Value::Sequence(items.into_iter().map(Into::into).collect())
    }

    /// Looks up a member of a struct or record by name.
    pub fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) | Value::Record(members) => {
                members.iter().find(|(k, _)| k == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Short type name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Uint(_) => "uint",
            Value::Int(_) => "int",
            Value::Address(_) => "address",
            Value::FixedBytes(..) => "fixed bytes",
            Value::Bytes(_) => "bytes",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Struct(_) => "struct",
            Value::Record(_) => "record",
            Value::Map(_) => "map",
        }
    }

    /// Converts a decoded ABI value. `components` are the components of the parameter
    /// the value was decoded for and name the members of tuples.
    pub fn from_decoded(value: DynSolValue, components: &[Param]) -> Self {
        match value {
            DynSolValue::Bool(b) => Value::Bool(b),
            DynSolValue::Int(i, _) => Value::Int(i),
            DynSolValue::Uint(u, _) => Value::Uint(u),
            DynSolValue::FixedBytes(word, size) => Value::FixedBytes(word, size),
            DynSolValue::Address(address) => Value::Address(address),
            DynSolValue::Function(function) => {
                Value::FixedBytes(B256::right_padding_from(function.as_slice()), 24)
            }
            DynSolValue::Bytes(bytes) => Value::Bytes(bytes.into()),
            DynSolValue::String(s) => Value::String(s),
            DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
                Value::Sequence(
                    items
                        .into_iter()
                        .map(|item| Value::from_decoded(item, components))
                        .collect(),
                )
            }
            DynSolValue::Tuple(items) => {
                let named = components.len() == items.len()
                    && !components.is_empty()
                    && components.iter().all(|c| !c.name.is_empty());
                if named {
                    Value::Struct(
                        items
                            .into_iter()
                            .zip(components)
                            .map(|(item, c)| {
                                (c.name.clone(), Value::from_decoded(item, &c.components))
                            })
                            .collect(),
                    )
                } else {
                    Value::Sequence(
                        items
                            .into_iter()
                            .enumerate()
                            .map(|(i, item)| {
                                let inner = components
                                    .get(i)
                                    .map(|c| c.components.as_slice())
                                    .unwrap_or_default();
                                Value::from_decoded(item, inner)
                            })
                            .collect(),
                    )
                }
            }
            #[allow(unreachable_patterns)]
            other => Value::Bytes(other.abi_encode().into()),
        }
    }

    /// Decodes the arguments of a call into one value per input parameter.
    pub fn from_arguments(values: Vec<DynSolValue>, inputs: &[Param]) -> Vec<Value> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                let components = inputs
                    .get(i)
                    .map(|p| p.components.as_slice())
                    .unwrap_or_default();
                Value::from_decoded(value, components)
            })
            .collect()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Uint(u) => write!(f, "{u}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Address(a) => write!(f, "{a}"),
            Value::FixedBytes(word, size) => write!(f, "0x{}", hex::encode(&word[..*size])),
            Value::Bytes(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Sequence(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Struct(members) | Value::Record(members) => {
                write!(f, "{{")?;
                for (i, (k, v)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} => {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

macro_rules! impl_from_unsigned {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Uint(U256::from(value))
                }
            }
        )*
    };
}

impl_from_unsigned!(u8, u16, u32, u64, u128, usize);

macro_rules! impl_from_signed {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Int(I256::try_from(value as i128).unwrap_or_default())
                }
            }
        )*
    };
}

impl_from_signed!(i8, i16, i32, i64, i128);

impl From<U256> for Value {
    fn from(value: U256) -> Self {
        Value::Uint(value)
    }
}

impl From<I256> for Value {
    fn from(value: I256) -> Self {
        Value::Int(value)
    }
}

impl From<Address> for Value {
    fn from(value: Address) -> Self {
        Value::Address(value)
    }
}

impl From<B256> for Value {
    fn from(value: B256) -> Self {
        Value::FixedBytes(value, 32)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::seq(value)
    }
}
