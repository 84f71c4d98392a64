//! Translation between storage variables and raw 32-byte words.
//!
//! Value types are packed from the low-order end of a word at their byte offset. Strings
//! and bytes of up to 31 bytes live in their slot with `2 * len` in the low byte, longer
//! ones store `2 * len + 1` and keep their data from `keccak(slot)` on. Dynamic arrays
//! keep their length in the slot and elements from `keccak(slot)` on. A mapping entry
//! lives at `keccak(key ‖ slot)`.

use crate::{
    encoder,
    error::StorageError,
    primitives::{
        Address,
        B256,
        I256,
        U256,
        hex,
        keccak256,
    },
    storage::{
        backend::StorageBackend,
        layout::{
            ScalarKind,
            StorageLayout,
            StorageSlotDescriptor,
            TypeDescriptor,
            TypeKind,
        },
    },
    value::Value,
};
use alloy_dyn_abi::{
    DynSolType,
    DynSolValue,
};
use std::collections::BTreeMap;

/// Read access to words of one account.
pub trait WordSource {
    fn word(&mut self, slot: U256) -> Result<U256, StorageError>;
}

/// Reads words straight from a backend.
pub struct SlotReader<'a, B: StorageBackend + ?Sized> {
    backend: &'a mut B,
    address: Address,
}

impl<'a, B: StorageBackend + ?Sized> SlotReader<'a, B> {
    pub fn new(backend: &'a mut B, address: Address) -> Self {
        Self { backend, address }
    }
}

impl<B: StorageBackend + ?Sized> WordSource for SlotReader<'_, B> {
    fn word(&mut self, slot: U256) -> Result<U256, StorageError> {
        self.backend.load(self.address, slot)
    }
}

/// Buffers the writes of one variable. Nothing reaches the backend before
/// [`commit`](SlotWriter::commit), so a failed encode leaves storage untouched.
pub struct SlotWriter<'a, B: StorageBackend + ?Sized> {
    backend: &'a mut B,
    address: Address,
    pending: BTreeMap<U256, U256>,
}

impl<'a, B: StorageBackend + ?Sized> SlotWriter<'a, B> {
    pub fn new(backend: &'a mut B, address: Address) -> Self {
        Self {
            backend,
            address,
            pending: BTreeMap::new(),
        }
    }

    pub fn store(&mut self, slot: U256, value: U256) {
        self.pending.insert(slot, value);
    }

    /// Buffered writes, by slot.
    pub fn pending(&self) -> &BTreeMap<U256, U256> {
        &self.pending
    }

    /// Writes the buffered words. Returns how many were written.
    pub fn commit(self) -> Result<usize, StorageError> {
        let count = self.pending.len();
        for (slot, value) in self.pending {
            self.backend.store(self.address, slot, value)?;
        }
        Ok(count)
    }
}

impl<B: StorageBackend + ?Sized> WordSource for SlotWriter<'_, B> {
    fn word(&mut self, slot: U256) -> Result<U256, StorageError> {
        match self.pending.get(&slot) {
            Some(value) => Ok(*value),
            None => self.backend.load(self.address, slot),
        }
    }
}

/// First data slot of a dynamic array or long byte string stored at `slot`.
pub fn dynamic_data_slot(slot: U256) -> U256 {
    U256::from_be_bytes(keccak256(slot.to_be_bytes::<32>()).0)
}

/// Slot of the mapping entry for the encoded `key` of a mapping stored at `slot`.
pub fn mapping_slot(key: &[u8], slot: U256) -> U256 {
    let mut preimage = Vec::with_capacity(key.len() + 32);
    preimage.extend_from_slice(key);
    preimage.extend_from_slice(&slot.to_be_bytes::<32>());
    U256::from_be_bytes(keccak256(preimage).0)
}

/// Slot and byte offset of element `index` of an array whose data starts at `base`.
///
/// Slot arithmetic wraps modulo 2^256 like the EVM, so any index has a position.
pub fn element_position(base: U256, element: &TypeDescriptor, index: usize) -> (U256, u8) {
    let size = element.number_of_bytes;
    if size > 0 && size < 32 {
        let per_slot = 32 / size as usize;
        (
            base.wrapping_add(U256::from(index / per_slot)),
            ((index % per_slot) * size as usize) as u8,
        )
    } else {
        let slots = U256::from(size.div_ceil(32).max(1));
        (base.wrapping_add(U256::from(index).wrapping_mul(slots)), 0)
    }
}

/// Number of slots `count` consecutive elements occupy.
fn span_slots(element: &TypeDescriptor, count: usize) -> usize {
    let size = element.number_of_bytes as usize;
    if size > 0 && size < 32 {
        count.div_ceil(32 / size)
    } else {
        count.saturating_mul(size.div_ceil(32).max(1))
    }
}

/// Mask over the low `size` bytes of a word.
fn low_mask(size: usize) -> U256 {
    if size >= 32 {
        U256::MAX
    } else {
        (U256::from(1) << (size * 8)) - U256::from(1)
    }
}

fn read_field<S: WordSource + ?Sized>(
    source: &mut S,
    slot: U256,
    offset: u8,
    size: usize,
) -> Result<U256, StorageError> {
    let word = source.word(slot)?;
    Ok((word >> (offset as usize * 8)) & low_mask(size))
}

/// Read-modify-write of one packed field, leaving the rest of the word intact.
fn write_field<B: StorageBackend + ?Sized>(
    writer: &mut SlotWriter<'_, B>,
    slot: U256,
    offset: u8,
    size: usize,
    field: U256,
) -> Result<(), StorageError> {
    let shift = offset as usize * 8;
    let mask = low_mask(size) << shift;
    let word = writer.word(slot)?;
    writer.store(slot, (word & !mask) | ((field & low_mask(size)) << shift));
    Ok(())
}

fn invalid(ty: &TypeDescriptor, value: &Value, reason: impl ToString) -> StorageError {
    StorageError::InvalidValue {
        ty: ty.label.clone(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn scalar_sol_type(kind: ScalarKind) -> DynSolType {
    match kind {
        ScalarKind::Bool => DynSolType::Bool,
        ScalarKind::Uint(bits) => DynSolType::Uint(bits),
        ScalarKind::Int(bits) => DynSolType::Int(bits),
        ScalarKind::Address => DynSolType::Address,
        ScalarKind::FixedBytes(size) => DynSolType::FixedBytes(size),
    }
}

/// Coerces a value, accepting the string forms a test may use for keys and scalars.
fn coerce_scalar(
    kind: ScalarKind,
    ty: &TypeDescriptor,
    value: &Value,
) -> Result<DynSolValue, StorageError> {
    let value = match (kind, value) {
        (ScalarKind::Bool, Value::String(s)) if s == "true" || s == "false" => {
            Value::Bool(s == "true")
        }
        _ => value.clone(),
    };
    encoder::coerce(&value, &scalar_sol_type(kind), &[]).map_err(|err| invalid(ty, &value, err))
}

/// Field value of a scalar, right-aligned in the low `number_of_bytes` bytes.
fn scalar_field(kind: ScalarKind, ty: &TypeDescriptor, value: &Value) -> Result<U256, StorageError> {
    let size = ty.number_of_bytes as usize;
    match coerce_scalar(kind, ty, value)? {
        DynSolValue::Bool(b) => Ok(U256::from(b as u8)),
        DynSolValue::Uint(u, _) => Ok(u),
        DynSolValue::Int(i, _) => Ok(i.into_raw() & low_mask(size)),
        DynSolValue::Address(address) => Ok(U256::from_be_slice(address.as_slice())),
        DynSolValue::FixedBytes(word, n) => Ok(U256::from_be_slice(&word[..n])),
        _ => Err(StorageError::UnsupportedType(ty.label.clone())),
    }
}

fn scalar_value(kind: ScalarKind, size: usize, field: U256) -> Value {
    match kind {
        ScalarKind::Bool => Value::Bool(!field.is_zero()),
        ScalarKind::Uint(_) => Value::Uint(field),
        ScalarKind::Int(_) => {
            let width = size * 8;
            if width < 256 && field.bit(width - 1) {
                Value::Int(I256::from_raw(field | !low_mask(size)))
            } else {
                Value::Int(I256::from_raw(field))
            }
        }
        ScalarKind::Address => {
            Value::Address(Address::from_word(B256::from(field.to_be_bytes::<32>())))
        }
        ScalarKind::FixedBytes(n) => {
            let word = field.to_be_bytes::<32>();
            Value::FixedBytes(B256::right_padding_from(&word[32 - n..]), n)
        }
    }
}

/// Bytes of a `string` or `bytes` value.
fn byte_string(ty: &TypeDescriptor, is_string: bool, value: &Value) -> Result<Vec<u8>, StorageError> {
    match value {
        Value::String(s) if is_string || !s.starts_with("0x") => Ok(s.as_bytes().to_vec()),
        Value::String(s) => hex::decode(s).map_err(|err| invalid(ty, value, err)),
        Value::Bytes(bytes) => Ok(bytes.to_vec()),
        Value::FixedBytes(word, size) if !is_string => Ok(word[..*size].to_vec()),
        Value::Sequence(_) if !is_string => {
            encoder::coerce(value, &DynSolType::Bytes, &[])
                .map_err(|err| invalid(ty, value, err))
                .map(|coerced| match coerced {
                    DynSolValue::Bytes(bytes) => bytes,
                    _ => Vec::new(),
                })
        }
        other => Err(invalid(ty, other, "expected a byte string")),
    }
}

/// Key bytes hashed for a mapping with key type `key_ty`. Value types are padded to a
/// word, `string` and `bytes` keys are hashed unpadded.
pub fn encode_key(key_ty: &TypeDescriptor, key: &Value) -> Result<Vec<u8>, StorageError> {
    match &key_ty.kind {
        TypeKind::Scalar(kind) => Ok(coerce_scalar(*kind, key_ty, key)?.abi_encode()),
        TypeKind::Bytes { is_string } => byte_string(key_ty, *is_string, key),
        _ => Err(StorageError::UnsupportedType(key_ty.label.clone())),
    }
}

fn to_index(ty: &TypeDescriptor, step: &Value) -> Result<usize, StorageError> {
    let index = match step {
        Value::Uint(u) => usize::try_from(*u).ok(),
        Value::Int(i) if !i.is_negative() => usize::try_from(i.into_raw()).ok(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };
    index.ok_or_else(|| invalid(ty, step, "not an array index"))
}

/// Largest array length or byte string length read back from storage.
pub const MAX_STORED_LENGTH: usize = 1 << 24;

/// Length held in a storage word, rejecting words that cannot be a real length.
fn length_of(ty: &TypeDescriptor, word: U256) -> Result<usize, StorageError> {
    match usize::try_from(word) {
        Ok(length) if length <= MAX_STORED_LENGTH => Ok(length),
        _ => Err(StorageError::InvalidValue {
            ty: ty.label.clone(),
            value: word.to_string(),
            reason: format!("stored length exceeds {MAX_STORED_LENGTH}"),
        }),
    }
}

fn check_index(ty: &TypeDescriptor, index: usize, length: usize) -> Result<(), StorageError> {
    if index >= length {
        return Err(StorageError::IndexOutOfRange {
            ty: ty.label.clone(),
            index,
            length,
        });
    }
    Ok(())
}

/// A dynamic array index on an access path, checked against the stored length at read
/// time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicBound {
    pub length_slot: U256,
    pub index: usize,
    pub ty: String,
}

/// Where an access path ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub slot: U256,
    pub offset: u8,
    /// Type id of the value at the location.
    pub ty: String,
    pub bounds: Vec<DynamicBound>,
}

/// Follows `path` (mapping keys, array indices, struct member names) from `entry`.
pub fn locate(
    layout: &StorageLayout,
    entry: &StorageSlotDescriptor,
    path: &[Value],
) -> Result<Location, StorageError> {
    let mut ty = layout.type_of(&entry.ty)?;
    let mut slot = entry.slot;
    let mut offset = entry.offset;
    let mut bounds = Vec::new();

    for step in path {
        match &ty.kind {
            TypeKind::Mapping { key, value } => {
                let key = encode_key(layout.type_of(key)?, step)?;
                slot = mapping_slot(&key, slot);
                offset = 0;
                ty = layout.type_of(value)?;
            }
            TypeKind::StaticArray { base, length } => {
                let index = to_index(ty, step)?;
                check_index(ty, index, *length)?;
                let base = layout.type_of(base)?;
                (slot, offset) = element_position(slot, base, index);
                ty = base;
            }
            TypeKind::DynamicArray { base } => {
                let index = to_index(ty, step)?;
                bounds.push(DynamicBound {
                    length_slot: slot,
                    index,
                    ty: ty.label.clone(),
                });
                let base = layout.type_of(base)?;
                (slot, offset) = element_position(dynamic_data_slot(slot), base, index);
                ty = base;
            }
            TypeKind::Struct { members } => {
                let name = match step {
                    Value::String(name) => name.as_str(),
                    other => {
                        return Err(StorageError::UnknownMember {
                            ty: ty.label.clone(),
                            member: other.to_string(),
                        });
                    }
                };
                let member = members.iter().find(|m| m.label == name).ok_or_else(|| {
                    StorageError::UnknownMember {
                        ty: ty.label.clone(),
                        member: name.to_string(),
                    }
                })?;
                slot = slot.wrapping_add(member.slot);
                offset = member.offset;
                ty = layout.type_of(&member.ty)?;
            }
            TypeKind::Scalar(_) | TypeKind::Bytes { .. } => {
                return Err(StorageError::PathTooLong(ty.label.clone()));
            }
        }
    }

    Ok(Location {
        slot,
        offset,
        ty: ty.id.clone(),
        bounds,
    })
}

fn as_sequence<'v>(ty: &TypeDescriptor, value: &'v Value) -> Result<&'v [Value], StorageError> {
    match value {
        Value::Sequence(items) => Ok(items),
        other => Err(invalid(ty, other, "expected a sequence")),
    }
}

/// Entries of a mapping literal. Record keys are passed on as strings.
fn mapping_entries(ty: &TypeDescriptor, value: &Value) -> Result<Vec<(Value, Value)>, StorageError> {
    match value {
        Value::Map(entries) => Ok(entries.clone()),
        Value::Record(entries) => Ok(entries
            .iter()
            .map(|(k, v)| (Value::String(k.clone()), v.clone()))
            .collect()),
        other => Err(invalid(ty, other, "expected a mapping")),
    }
}

/// Writes `value` of type `ty` at `slot`/`offset` into `writer`.
pub fn encode<B: StorageBackend + ?Sized>(
    layout: &StorageLayout,
    ty: &TypeDescriptor,
    slot: U256,
    offset: u8,
    value: &Value,
    writer: &mut SlotWriter<'_, B>,
) -> Result<(), StorageError> {
    match &ty.kind {
        TypeKind::Scalar(kind) => {
            let field = scalar_field(*kind, ty, value)?;
            write_field(writer, slot, offset, ty.number_of_bytes as usize, field)
        }
        TypeKind::Bytes { is_string } => {
            let data = byte_string(ty, *is_string, value)?;
            write_byte_string(ty, writer, slot, &data)
        }
        TypeKind::StaticArray { base, length } => {
            let items = as_sequence(ty, value)?;
            if items.len() > *length {
                return Err(StorageError::IndexOutOfRange {
                    ty: ty.label.clone(),
                    index: items.len() - 1,
                    length: *length,
                });
            }
            let base = layout.type_of(base)?;
            for (index, item) in items.iter().enumerate() {
                let (slot, offset) = element_position(slot, base, index);
                encode(layout, base, slot, offset, item, writer)?;
            }
            Ok(())
        }
        TypeKind::DynamicArray { base } => {
            let items = as_sequence(ty, value)?;
            let base = layout.type_of(base)?;
            let data = dynamic_data_slot(slot);

            let old_length = length_of(ty, writer.word(slot)?)?;
            for i in 0..span_slots(base, old_length.max(items.len())) {
                writer.store(data.wrapping_add(U256::from(i)), U256::ZERO);
            }

            writer.store(slot, U256::from(items.len()));
            for (index, item) in items.iter().enumerate() {
                let (slot, offset) = element_position(data, base, index);
                encode(layout, base, slot, offset, item, writer)?;
            }
            Ok(())
        }
        TypeKind::Mapping { key, value: value_ty } => {
            let key_ty = layout.type_of(key)?;
            let value_ty = layout.type_of(value_ty)?;
            for (key, entry) in mapping_entries(ty, value)? {
                let entry_slot = mapping_slot(&encode_key(key_ty, &key)?, slot);
                encode(layout, value_ty, entry_slot, 0, &entry, writer)?;
            }
            Ok(())
        }
        TypeKind::Struct { members } => {
            let entries = match value {
                Value::Record(entries) | Value::Struct(entries) => entries,
                other => return Err(invalid(ty, other, "expected a record")),
            };
            for (name, entry) in entries {
                let member = members.iter().find(|m| &m.label == name).ok_or_else(|| {
                    StorageError::UnknownMember {
                        ty: ty.label.clone(),
                        member: name.clone(),
                    }
                })?;
                let member_ty = layout.type_of(&member.ty)?;
                encode(
                    layout,
                    member_ty,
                    slot.wrapping_add(member.slot),
                    member.offset,
                    entry,
                    writer,
                )?;
            }
            Ok(())
        }
    }
}

fn write_byte_string<B: StorageBackend + ?Sized>(
    ty: &TypeDescriptor,
    writer: &mut SlotWriter<'_, B>,
    slot: U256,
    data: &[u8],
) -> Result<(), StorageError> {
    let old = writer.word(slot)?;
    let old_words = if old.bit(0) {
        length_of(ty, old >> 1)?.div_ceil(32)
    } else {
        0
    };
    let data_slot = dynamic_data_slot(slot);

    let new_words = if data.len() <= 31 {
        let mut word = [0u8; 32];
        word[..data.len()].copy_from_slice(data);
        word[31] = (data.len() * 2) as u8;
        writer.store(slot, U256::from_be_bytes(word));
        0
    } else {
        writer.store(slot, U256::from(data.len() * 2 + 1));
        for (i, chunk) in data.chunks(32).enumerate() {
            let mut word = [0u8; 32];
            word[..chunk.len()].copy_from_slice(chunk);
            writer.store(data_slot.wrapping_add(U256::from(i)), U256::from_be_bytes(word));
        }
        data.len().div_ceil(32)
    };

    for i in new_words..old_words {
        writer.store(data_slot.wrapping_add(U256::from(i)), U256::ZERO);
    }
    Ok(())
}

fn read_byte_string<S: WordSource + ?Sized>(
    ty: &TypeDescriptor,
    source: &mut S,
    slot: U256,
) -> Result<Vec<u8>, StorageError> {
    let word = source.word(slot)?;
    if !word.bit(0) {
        let bytes = word.to_be_bytes::<32>();
        let len = (bytes[31] / 2) as usize;
        if len > 31 {
            return Err(StorageError::InvalidValue {
                ty: ty.label.clone(),
                value: word.to_string(),
                reason: format!("short form length {len} exceeds 31"),
            });
        }
        return Ok(bytes[..len].to_vec());
    }

    let len = length_of(ty, word >> 1)?;
    let data_slot = dynamic_data_slot(slot);
    let mut data = Vec::with_capacity(len);
    for i in 0..len.div_ceil(32) {
        let word = source.word(data_slot.wrapping_add(U256::from(i)))?;
        data.extend_from_slice(&word.to_be_bytes::<32>());
    }
    data.truncate(len);
    Ok(data)
}

/// Reads the value of type `ty` at `slot`/`offset`.
///
/// Structs decode to records, arrays to sequences. Mappings cannot be enumerated: reading
/// one fails, and mapping members are left out of struct records.
pub fn decode<S: WordSource + ?Sized>(
    layout: &StorageLayout,
    ty: &TypeDescriptor,
    slot: U256,
    offset: u8,
    source: &mut S,
) -> Result<Value, StorageError> {
    match &ty.kind {
        TypeKind::Scalar(kind) => {
            let size = ty.number_of_bytes as usize;
            let field = read_field(source, slot, offset, size)?;
            Ok(scalar_value(*kind, size, field))
        }
        TypeKind::Bytes { is_string } => {
            let data = read_byte_string(ty, source, slot)?;
            if *is_string {
                Ok(Value::String(String::from_utf8_lossy(&data).into_owned()))
            } else {
                Ok(Value::Bytes(data.into()))
            }
        }
        TypeKind::StaticArray { base, length } => {
            let base = layout.type_of(base)?;
            (0..*length)
                .map(|index| {
                    let (slot, offset) = element_position(slot, base, index);
                    decode(layout, base, slot, offset, source)
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Sequence)
        }
        TypeKind::DynamicArray { base } => {
            let base = layout.type_of(base)?;
            let length = length_of(ty, source.word(slot)?)?;
            let data = dynamic_data_slot(slot);
            (0..length)
                .map(|index| {
                    let (slot, offset) = element_position(data, base, index);
                    decode(layout, base, slot, offset, source)
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Sequence)
        }
        TypeKind::Mapping { .. } => Err(StorageError::MissingMappingKey(ty.label.clone())),
        TypeKind::Struct { members } => {
            let mut record = Vec::with_capacity(members.len());
            for member in members {
                let member_ty = layout.type_of(&member.ty)?;
                if matches!(member_ty.kind, TypeKind::Mapping { .. }) {
                    continue;
                }
                let value = decode(
                    layout,
                    member_ty,
                    slot.wrapping_add(member.slot),
                    member.offset,
                    source,
                )?;
                record.push((member.label.clone(), value));
            }
            Ok(Value::Record(record))
        }
    }
}
