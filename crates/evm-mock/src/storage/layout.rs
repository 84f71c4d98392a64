//! Compiler storage layouts.
//!
//! Parses the `storageLayout` output of solc into a [`StorageLayout`]. Types are resolved
//! once into [`TypeDescriptor`]s and referenced by id, so recursive types (a struct
//! holding a mapping to itself) need no special handling.

use crate::{
    error::StorageError,
    primitives::U256,
};
use serde::{
    Deserialize,
    Deserializer,
    Serialize,
};
use std::{
    collections::BTreeMap,
    str::FromStr,
};

/// A number solc may emit either as a decimal string or as a JSON number.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

fn u256_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(U256::from(n)),
        NumberOrString::String(s) => U256::from_str(&s).map_err(serde::de::Error::custom),
    }
}

fn u64_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// A `storage[]` entry or a struct member, as emitted by solc.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawStorageEntry {
    pub label: String,
    #[serde(default)]
    pub offset: u8,
    #[serde(deserialize_with = "u256_from_any")]
    pub slot: U256,
    #[serde(rename = "type")]
    pub ty: String,
}

/// A `types{}` entry, as emitted by solc.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTypeInfo {
    pub encoding: String,
    pub label: String,
    #[serde(deserialize_with = "u64_from_any")]
    pub number_of_bytes: u64,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub members: Option<Vec<RawStorageEntry>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawStorageLayout {
    pub storage: Vec<RawStorageEntry>,
    #[serde(default)]
    pub types: Option<BTreeMap<String, RawTypeInfo>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Inplace,
    Bytes,
    DynamicArray,
    Mapping,
}

impl FromStr for Encoding {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inplace" => Ok(Encoding::Inplace),
            "bytes" => Ok(Encoding::Bytes),
            "dynamic_array" => Ok(Encoding::DynamicArray),
            "mapping" => Ok(Encoding::Mapping),
            other => Err(StorageError::Layout(format!("unknown encoding `{other}`"))),
        }
    }
}

/// Value types that live inside a single word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    Uint(usize),
    Int(usize),
    Address,
    FixedBytes(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructMember {
    pub label: String,
    /// Slot relative to the struct's first slot.
    pub slot: U256,
    pub offset: u8,
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Scalar(ScalarKind),
    Bytes { is_string: bool },
    StaticArray { base: String, length: usize },
    DynamicArray { base: String },
    Mapping { key: String, value: String },
    Struct { members: Vec<StructMember> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub id: String,
    pub label: String,
    pub encoding: Encoding,
    pub number_of_bytes: u64,
    pub kind: TypeKind,
}

/// Where a top-level variable lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSlotDescriptor {
    pub label: String,
    pub slot: U256,
    pub offset: u8,
    pub ty: String,
}

/// Resolved storage layout of one contract.
#[derive(Debug, Clone, Default)]
pub struct StorageLayout {
    entries: Vec<StorageSlotDescriptor>,
    types: BTreeMap<String, TypeDescriptor>,
}

impl StorageLayout {
    /// Parses solc `storageLayout` JSON.
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        let raw: RawStorageLayout = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    /// Parses a `storageLayout` object, or an artifact carrying one under `storageLayout`.
    pub fn from_value(value: serde_json::Value) -> Result<Self, StorageError> {
        let value = match value {
            serde_json::Value::Object(mut map) if !map.contains_key("storage") => map
                .remove("storageLayout")
                .ok_or_else(|| StorageError::Layout("missing `storage` entries".to_string()))?,
            other => other,
        };
        let raw: RawStorageLayout = serde_json::from_value(value)?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawStorageLayout) -> Result<Self, StorageError> {
        let raw_types = raw.types.unwrap_or_default();
        let types = raw_types
            .iter()
            .map(|(id, info)| resolve_type(id, info).map(|ty| (id.clone(), ty)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let layout = Self {
            entries: raw
                .storage
                .into_iter()
                .map(|entry| StorageSlotDescriptor {
                    label: entry.label,
                    slot: entry.slot,
                    offset: entry.offset,
                    ty: entry.ty,
                })
                .collect(),
            types,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Checks that every referenced type id is defined.
    fn validate(&self) -> Result<(), StorageError> {
        for entry in &self.entries {
            self.type_of(&entry.ty)?;
        }
        for ty in self.types.values() {
            let referenced: Vec<&String> = match &ty.kind {
                TypeKind::StaticArray { base, .. } | TypeKind::DynamicArray { base } => vec![base],
                TypeKind::Mapping { key, value } => vec![key, value],
                TypeKind::Struct { members } => members.iter().map(|m| &m.ty).collect(),
                TypeKind::Scalar(_) | TypeKind::Bytes { .. } => vec![],
            };
            for id in referenced {
                self.type_of(id)?;
            }
        }
        Ok(())
    }

    /// Descriptor of the top-level variable `label`.
    pub fn get(&self, label: &str) -> Result<&StorageSlotDescriptor, StorageError> {
        self.entries
            .iter()
            .find(|entry| entry.label == label)
            .ok_or_else(|| StorageError::UnknownVariable(label.to_string()))
    }

    /// Type with id `id`.
    pub fn type_of(&self, id: &str) -> Result<&TypeDescriptor, StorageError> {
        self.types
            .get(id)
            .ok_or_else(|| StorageError::Layout(format!("undefined type `{id}`")))
    }

    pub fn entries(&self) -> &[StorageSlotDescriptor] {
        &self.entries
    }
}

fn resolve_type(id: &str, info: &RawTypeInfo) -> Result<TypeDescriptor, StorageError> {
    let encoding: Encoding = info.encoding.parse()?;
    let missing = |field: &str| StorageError::Layout(format!("type `{id}` has no `{field}`"));

    let kind = match encoding {
        Encoding::Bytes => TypeKind::Bytes {
            is_string: info.label == "string",
        },
        Encoding::DynamicArray => TypeKind::DynamicArray {
            base: info.base.clone().ok_or_else(|| missing("base"))?,
        },
        Encoding::Mapping => TypeKind::Mapping {
            key: info.key.clone().ok_or_else(|| missing("key"))?,
            value: info.value.clone().ok_or_else(|| missing("value"))?,
        },
        Encoding::Inplace => {
            if let Some(members) = &info.members {
                TypeKind::Struct {
                    members: members
                        .iter()
                        .map(|m| StructMember {
                            label: m.label.clone(),
                            slot: m.slot,
                            offset: m.offset,
                            ty: m.ty.clone(),
                        })
                        .collect(),
                }
            } else if let Some(base) = &info.base {
                TypeKind::StaticArray {
                    base: base.clone(),
                    length: static_array_length(&info.label).ok_or_else(|| {
                        StorageError::Layout(format!("cannot read length of `{}`", info.label))
                    })?,
                }
            } else {
                TypeKind::Scalar(scalar_kind(id, &info.label, info.number_of_bytes)?)
            }
        }
    };

    Ok(TypeDescriptor {
        id: id.to_string(),
        label: info.label.clone(),
        encoding,
        number_of_bytes: info.number_of_bytes,
        kind,
    })
}

/// Outer length of a static array label such as `uint8[3][2]`.
fn static_array_length(label: &str) -> Option<usize> {
    let (_, last) = label.rsplit_once('[')?;
    last.strip_suffix(']')?.parse().ok()
}

fn scalar_kind(id: &str, label: &str, number_of_bytes: u64) -> Result<ScalarKind, StorageError> {
    let bits = (number_of_bytes as usize) * 8;
    let kind = match label {
        "bool" => ScalarKind::Bool,
        "address" | "address payable" => ScalarKind::Address,
        l if l.starts_with("contract ") => ScalarKind::Address,
        l if l.starts_with("enum ") => ScalarKind::Uint(bits),
        l if l.starts_with("uint") => ScalarKind::Uint(parse_width(l, "uint")?.unwrap_or(256)),
        l if l.starts_with("int") => ScalarKind::Int(parse_width(l, "int")?.unwrap_or(256)),
        l if l.starts_with("bytes") => match parse_width(l, "bytes")? {
            Some(size) if (1..=32).contains(&size) => ScalarKind::FixedBytes(size),
            _ => return Err(StorageError::UnsupportedType(label.to_string())),
        },
        // user defined value types carry the underlying width only
        _ if id.starts_with("t_userDefinedValueType") => ScalarKind::Uint(bits),
        _ => return Err(StorageError::UnsupportedType(label.to_string())),
    };
    Ok(kind)
}

fn parse_width(label: &str, prefix: &str) -> Result<Option<usize>, StorageError> {
    let digits = &label[prefix.len()..];
    if digits.is_empty() {
        return Ok(None);
    }
    digits
        .parse()
        .map(Some)
        .map_err(|_| StorageError::UnsupportedType(label.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: &str = r#"{
        "storage": [
            {"astId": 3, "contract": "C", "label": "owner", "offset": 0, "slot": "0", "type": "t_address"},
            {"astId": 5, "contract": "C", "label": "paused", "offset": 20, "slot": "0", "type": "t_bool"},
            {"astId": 9, "contract": "C", "label": "balances", "offset": 0, "slot": "1", "type": "t_mapping(t_address,t_uint256)"},
            {"astId": 12, "contract": "C", "label": "small", "offset": 0, "slot": "2", "type": "t_array(t_uint8)3_storage"},
            {"astId": 15, "contract": "C", "label": "name", "offset": 0, "slot": "3", "type": "t_string_storage"},
            {"astId": 18, "contract": "C", "label": "kind", "offset": 0, "slot": "4", "type": "t_enum(Kind)7"}
        ],
        "types": {
            "t_address": {"encoding": "inplace", "label": "address", "numberOfBytes": "20"},
            "t_bool": {"encoding": "inplace", "label": "bool", "numberOfBytes": "1"},
            "t_uint256": {"encoding": "inplace", "label": "uint256", "numberOfBytes": "32"},
            "t_uint8": {"encoding": "inplace", "label": "uint8", "numberOfBytes": "1"},
            "t_mapping(t_address,t_uint256)": {"encoding": "mapping", "key": "t_address", "label": "mapping(address => uint256)", "numberOfBytes": "32", "value": "t_uint256"},
            "t_array(t_uint8)3_storage": {"base": "t_uint8", "encoding": "inplace", "label": "uint8[3]", "numberOfBytes": "32"},
            "t_string_storage": {"encoding": "bytes", "label": "string", "numberOfBytes": "32"},
            "t_enum(Kind)7": {"encoding": "inplace", "label": "enum C.Kind", "numberOfBytes": "1"}
        }
    }"#;

    #[test]
    fn test_parse_solc_layout() {
        let layout = StorageLayout::from_json(LAYOUT).unwrap();

        let paused = layout.get("paused").unwrap();
        assert_eq!(paused.slot, U256::ZERO);
        assert_eq!(paused.offset, 20);
        assert_eq!(
            layout.type_of(&paused.ty).unwrap().kind,
            TypeKind::Scalar(ScalarKind::Bool)
        );

        let small = layout.get("small").unwrap();
        assert_eq!(
            layout.type_of(&small.ty).unwrap().kind,
            TypeKind::StaticArray {
                base: "t_uint8".to_string(),
                length: 3
            }
        );

        let name = layout.type_of(&layout.get("name").unwrap().ty).unwrap();
        assert_eq!(name.encoding, Encoding::Bytes);
        assert_eq!(name.kind, TypeKind::Bytes { is_string: true });

        let kind = layout.type_of(&layout.get("kind").unwrap().ty).unwrap();
        assert_eq!(kind.kind, TypeKind::Scalar(ScalarKind::Uint(8)));
    }

    #[test]
    fn test_unknown_variable() {
        let layout = StorageLayout::from_json(LAYOUT).unwrap();
        assert!(matches!(
            layout.get("missing"),
            Err(StorageError::UnknownVariable(label)) if label == "missing"
        ));
    }

    #[test]
    fn test_undefined_type_is_rejected() {
        let json = r#"{"storage": [{"label": "x", "offset": 0, "slot": "0", "type": "t_nope"}], "types": {}}"#;
        assert!(matches!(
            StorageLayout::from_json(json),
            Err(StorageError::Layout(_))
        ));
    }

    #[test]
    fn test_empty_layout_with_null_types() {
        let layout = StorageLayout::from_json(r#"{"storage": [], "types": null}"#).unwrap();
        assert!(layout.entries().is_empty());
    }

    #[test]
    fn test_layout_from_artifact() {
        let artifact = serde_json::json!({
            "abi": [],
            "storageLayout": serde_json::from_str::<serde_json::Value>(LAYOUT).unwrap(),
        });
        let layout = StorageLayout::from_value(artifact).unwrap();
        assert_eq!(layout.entries().len(), 6);
    }

    #[test]
    fn test_static_array_length_uses_outer_dimension() {
        assert_eq!(static_array_length("uint8[3][2]"), Some(2));
        assert_eq!(static_array_length("int16[][4]"), Some(4));
        assert_eq!(static_array_length("uint8[]"), None);
    }
}
