//! Encoding of programmed answers into return data.
//!
//! A value is first tried as the single return value of the function, then as a tuple
//! of positional return values, and finally, for keyed records, by walking the declared
//! output names. The fallback function emits raw bytes.

use crate::{
    error::{
        EncodeError,
        MockError,
    },
    primitives::{
        B256,
        Bytes,
        I256,
        U256,
        hex,
    },
    value::Value,
};
use alloy_dyn_abi::{
    DynSolType,
    DynSolValue,
    Specifier,
};
use alloy_json_abi::{
    Function,
    Param,
};
use alloy_sol_types::{
    Revert,
    SolError,
};
use std::str::FromStr;

/// Encodes answers for one function.
#[derive(Debug, Clone)]
pub struct ResponseEncoder {
    /// `None` for the fallback function.
    function: Option<Function>,
    outputs: Vec<DynSolType>,
}

impl ResponseEncoder {
    pub fn new(function: Function) -> Result<Self, MockError> {
        let outputs = function
            .outputs
            .iter()
            .map(|param| {
                param.resolve().map_err(|err| EncodeError::InvalidType {
                    ty: param.ty.clone(),
                    reason: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| MockError::Encoding {
                function: function.signature(),
                source,
            })?;
        Ok(Self {
            function: Some(function),
            outputs,
        })
    }

    pub fn fallback() -> Self {
        Self {
            function: None,
            outputs: Vec::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.function.is_none()
    }

    /// Name used in error messages.
    pub fn name(&self) -> String {
        self.function
            .as_ref()
            .map(Function::signature)
            .unwrap_or_else(|| "fallback".to_string())
    }

    /// Return data for the programmed `value`. `None` yields the zero value.
    pub fn encode(&self, value: Option<&Value>) -> Result<Bytes, MockError> {
        let result = match (&self.function, value) {
            (None, value) => fallback_bytes(value),
            (Some(_), None) => Ok(self.zero()),
            (Some(function), Some(value)) => self.encode_outputs(function, value),
        };
        result.map_err(|source| MockError::Encoding {
            function: self.name(),
            source,
        })
    }

    /// Return data holding the zero value of every output.
    pub fn zero(&self) -> Bytes {
        if self.is_fallback() {
            return Bytes::new();
        }
        DynSolValue::Tuple(self.outputs.iter().map(zero_value).collect())
            .abi_encode_params()
            .into()
    }

    fn encode_outputs(&self, function: &Function, value: &Value) -> Result<Bytes, EncodeError> {
        let single = self.encode_single(function, value);
        if single.is_ok() {
            return single;
        }

        let mut last_error = single;
        let positional = match value {
            Value::Sequence(items) => Some(items.clone()),
            Value::Struct(members) => Some(members.iter().map(|(_, v)| v.clone()).collect()),
            _ => None,
        };
        if let Some(items) = positional {
            let tuple = self.encode_positional(function, &items);
            if tuple.is_ok() {
                return tuple;
            }
            last_error = tuple;
        }

        if let Value::Record(entries) = value {
            return self.encode_keyed(function, entries);
        }
        last_error
    }

    fn encode_single(&self, function: &Function, value: &Value) -> Result<Bytes, EncodeError> {
        if self.outputs.len() != 1 {
            return Err(EncodeError::LengthMismatch {
                expected: self.outputs.len(),
                got: 1,
            });
        }
        let encoded = coerce(value, &self.outputs[0], &function.outputs[0].components)?;
        Ok(DynSolValue::Tuple(vec![encoded]).abi_encode_params().into())
    }

    fn encode_positional(&self, function: &Function, items: &[Value]) -> Result<Bytes, EncodeError> {
        if items.len() != self.outputs.len() {
            return Err(EncodeError::LengthMismatch {
                expected: self.outputs.len(),
                got: items.len(),
            });
        }
        let values = items
            .iter()
            .zip(&self.outputs)
            .zip(&function.outputs)
            .map(|((item, ty), param)| coerce(item, ty, &param.components))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DynSolValue::Tuple(values).abi_encode_params().into())
    }

    fn encode_keyed(
        &self,
        function: &Function,
        entries: &[(String, Value)],
    ) -> Result<Bytes, EncodeError> {
        let values = coerce_members(entries, &self.outputs, &function.outputs)?;
        Ok(DynSolValue::Tuple(values).abi_encode_params().into())
    }
}

/// `Error(string)` revert data, or nothing when there is no reason.
pub fn revert_payload(reason: Option<&str>) -> Bytes {
    match reason {
        Some(reason) => Revert {
            reason: reason.to_string(),
        }
        .abi_encode()
        .into(),
        None => Bytes::new(),
    }
}

/// Raw bytes for the fallback function.
fn fallback_bytes(value: Option<&Value>) -> Result<Bytes, EncodeError> {
    let Some(value) = value else {
        return Ok(Bytes::new());
    };
    match value {
        Value::String(s) if !s.starts_with("0x") => Ok(Bytes::from(s.clone().into_bytes())),
        other => raw_bytes(other).map(Bytes::from),
    }
}

/// Byte-like values as raw bytes: bytes, fixed bytes, hex strings and sequences of
/// small integers.
fn raw_bytes(value: &Value) -> Result<Vec<u8>, EncodeError> {
    match value {
        Value::Bytes(bytes) => Ok(bytes.to_vec()),
        Value::FixedBytes(word, size) => Ok(word[..*size].to_vec()),
        Value::String(s) if s.starts_with("0x") => {
            hex::decode(s).map_err(|err| EncodeError::TypeMismatch {
                expected: "hex string".to_string(),
                got: format!("{s:?} ({err})"),
            })
        }
        Value::Sequence(items) => {
            items
                .iter()
                .map(|item| {
                    to_u256(item)
                        .filter(|u| *u <= U256::from(u8::MAX))
                        .map(|u| u.to::<u8>())
                        .ok_or_else(|| EncodeError::Overflow {
                            value: item.to_string(),
                            ty: "byte".to_string(),
                        })
                })
                .collect()
        }
        other => Err(mismatch("bytes", other)),
    }
}

fn mismatch(expected: impl ToString, got: &Value) -> EncodeError {
    EncodeError::TypeMismatch {
        expected: expected.to_string(),
        got: format!("{} {got}", got.kind()),
    }
}

fn to_u256(value: &Value) -> Option<U256> {
    match value {
        Value::Uint(u) => Some(*u),
        Value::Int(i) if !i.is_negative() => Some(i.into_raw()),
        Value::String(s) => U256::from_str(s).ok(),
        _ => None,
    }
}

fn to_i256(value: &Value) -> Option<I256> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Uint(u) if !u.bit(255) => Some(I256::from_raw(*u)),
        Value::String(s) => I256::from_str(s).ok(),
        _ => None,
    }
}

pub(crate) fn uint_fits(value: U256, bits: usize) -> bool {
    bits >= 256 || value.bit_len() <= bits
}

pub(crate) fn int_fits(value: I256, bits: usize) -> bool {
    if bits >= 256 {
        return true;
    }
    let bound = I256::from_raw(U256::from(1) << (bits - 1));
    value < bound && value >= -bound
}

/// Coerces `value` into an ABI value of type `ty`. `components` name tuple members.
pub fn coerce(
    value: &Value,
    ty: &DynSolType,
    components: &[Param],
) -> Result<DynSolValue, EncodeError> {
    let overflow = || EncodeError::Overflow {
        value: value.to_string(),
        ty: ty.sol_type_name().into_owned(),
    };

    match ty {
        DynSolType::Bool => match value {
            Value::Bool(b) => Ok(DynSolValue::Bool(*b)),
            other => Err(mismatch("bool", other)),
        },
        DynSolType::Uint(bits) => {
            let u = to_u256(value).ok_or_else(|| mismatch(ty.sol_type_name(), value))?;
            if !uint_fits(u, *bits) {
                return Err(overflow());
            }
            Ok(DynSolValue::Uint(u, *bits))
        }
        DynSolType::Int(bits) => {
            let i = to_i256(value).ok_or_else(|| mismatch(ty.sol_type_name(), value))?;
            if !int_fits(i, *bits) {
                return Err(overflow());
            }
            Ok(DynSolValue::Int(i, *bits))
        }
        DynSolType::Address => match value {
            Value::Address(address) => Ok(DynSolValue::Address(*address)),
            Value::String(s) => s
                .parse()
                .map(DynSolValue::Address)
                .map_err(|_| mismatch("address", value)),
            other => Err(mismatch("address", other)),
        },
        DynSolType::FixedBytes(size) => {
            let bytes = match value {
                Value::FixedBytes(word, n) if n == size => word[..*n].to_vec(),
                Value::FixedBytes(..) => return Err(mismatch(ty.sol_type_name(), value)),
                other => raw_bytes(other)?,
            };
            if bytes.len() != *size {
                return Err(EncodeError::LengthMismatch {
                    expected: *size,
                    got: bytes.len(),
                });
            }
            Ok(DynSolValue::FixedBytes(
                B256::right_padding_from(&bytes),
                *size,
            ))
        }
        DynSolType::Function => match value {
            Value::FixedBytes(word, 24) => Ok(DynSolValue::Function(
                alloy_primitives::Function::from_slice(&word[..24]),
            )),
            other => Err(mismatch("function", other)),
        },
        DynSolType::Bytes => raw_bytes(value).map(DynSolValue::Bytes),
        DynSolType::String => match value {
            Value::String(s) => Ok(DynSolValue::String(s.clone())),
            other => Err(mismatch("string", other)),
        },
        DynSolType::Array(inner) => match value {
            Value::Sequence(items) => items
                .iter()
                .map(|item| coerce(item, inner, components))
                .collect::<Result<Vec<_>, _>>()
                .map(DynSolValue::Array),
            other => Err(mismatch(ty.sol_type_name(), other)),
        },
        DynSolType::FixedArray(inner, len) => match value {
            Value::Sequence(items) if items.len() == *len => items
                .iter()
                .map(|item| coerce(item, inner, components))
                .collect::<Result<Vec<_>, _>>()
                .map(DynSolValue::FixedArray),
            Value::Sequence(items) => Err(EncodeError::LengthMismatch {
                expected: *len,
                got: items.len(),
            }),
            other => Err(mismatch(ty.sol_type_name(), other)),
        },
        DynSolType::Tuple(types) => {
            let values = match value {
                Value::Sequence(items) => coerce_positional(items.iter(), types, components)?,
                Value::Struct(members) => {
                    coerce_positional(members.iter().map(|(_, v)| v), types, components)?
                }
                Value::Record(entries) if components.len() == types.len() => {
                    coerce_members(entries, types, components)?
                }
                other => return Err(mismatch(ty.sol_type_name(), other)),
            };
            Ok(DynSolValue::Tuple(values))
        }
        #[allow(unreachable_patterns)]
        other => Err(EncodeError::InvalidType {
            ty: other.sol_type_name().into_owned(),
            reason: "unsupported return type".to_string(),
        }),
    }
}

fn coerce_positional<'a>(
    items: impl ExactSizeIterator<Item = &'a Value>,
    types: &[DynSolType],
    components: &[Param],
) -> Result<Vec<DynSolValue>, EncodeError> {
    if items.len() != types.len() {
        return Err(EncodeError::LengthMismatch {
            expected: types.len(),
            got: items.len(),
        });
    }
    items
        .zip(types)
        .enumerate()
        .map(|(i, (item, ty))| {
            let inner = components
                .get(i)
                .map(|c| c.components.as_slice())
                .unwrap_or_default();
            coerce(item, ty, inner)
        })
        .collect()
}

/// Converts a keyed record into positional values by walking the declared names.
fn coerce_members(
    entries: &[(String, Value)],
    types: &[DynSolType],
    params: &[Param],
) -> Result<Vec<DynSolValue>, EncodeError> {
    types
        .iter()
        .zip(params)
        .map(|(ty, param)| {
            let value = entries
                .iter()
                .find(|(key, _)| *key == param.name)
                .map(|(_, value)| value)
                .ok_or_else(|| EncodeError::MissingMember(param.name.clone()))?;
            coerce(value, ty, &param.components)
        })
        .collect()
}

/// Zero value of `ty`.
pub fn zero_value(ty: &DynSolType) -> DynSolValue {
    match ty {
        DynSolType::Bool => DynSolValue::Bool(false),
        DynSolType::Int(bits) => DynSolValue::Int(I256::ZERO, *bits),
        DynSolType::Uint(bits) => DynSolValue::Uint(U256::ZERO, *bits),
        DynSolType::FixedBytes(size) => DynSolValue::FixedBytes(B256::ZERO, *size),
        DynSolType::Address => DynSolValue::Address(Default::default()),
        DynSolType::Function => DynSolValue::Function(Default::default()),
        DynSolType::Bytes => DynSolValue::Bytes(Vec::new()),
        DynSolType::String => DynSolValue::String(String::new()),
        DynSolType::Array(_) => DynSolValue::Array(Vec::new()),
        DynSolType::FixedArray(inner, len) => {
            DynSolValue::FixedArray(vec![zero_value(inner); *len])
        }
        DynSolType::Tuple(types) => DynSolValue::Tuple(types.iter().map(zero_value).collect()),
        #[allow(unreachable_patterns)]
        _ => DynSolValue::Tuple(Vec::new()),
    }
}
