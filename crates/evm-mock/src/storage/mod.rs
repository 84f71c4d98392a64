//! Reading and writing contract storage variables by name.

pub mod backend;
pub mod codec;
pub mod layout;

pub use backend::{
    CodeBackend,
    MemoryStorage,
    StorageBackend,
    account_with_code,
};
pub use codec::{
    DynamicBound,
    Location,
    MAX_STORED_LENGTH,
    SlotReader,
    SlotWriter,
    WordSource,
    dynamic_data_slot,
    element_position,
    mapping_slot,
};
pub use layout::{
    StorageLayout,
    StorageSlotDescriptor,
    TypeDescriptor,
    TypeKind,
};

use crate::{
    error::StorageError,
    primitives::{
        Address,
        U256,
    },
    value::Value,
};
use std::sync::Arc;
use tracing::{
    debug,
    trace,
};

/// Storage variables of one deployed contract.
#[derive(Debug, Clone)]
pub struct ContractStorage {
    address: Address,
    layout: Arc<StorageLayout>,
}

impl ContractStorage {
    pub fn new(address: Address, layout: impl Into<Arc<StorageLayout>>) -> Self {
        Self {
            address,
            layout: layout.into(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Writes `value` into the variable `label`.
    ///
    /// The write is all or nothing: when any part of `value` does not fit the variable's
    /// type, storage is left untouched.
    pub fn set_variable<B: StorageBackend + ?Sized>(
        &self,
        backend: &mut B,
        label: &str,
        value: impl Into<Value>,
    ) -> Result<(), StorageError> {
        let value = value.into();
        let entry = self.layout.get(label)?;
        let ty = self.layout.type_of(&entry.ty)?;

        let mut writer = SlotWriter::new(backend, self.address);
        codec::encode(&self.layout, ty, entry.slot, entry.offset, &value, &mut writer)?;
        let words = writer.commit()?;

        debug!(
            target: "evm-mock::storage",
            address = %self.address,
            label,
            words,
            "Storage variable set"
        );
        Ok(())
    }

    /// Writes several variables in order. Stops at the first failure, keeping the
    /// variables written before it.
    pub fn set_variables<B, I, K, V>(&self, backend: &mut B, values: I) -> Result<(), StorageError>
    where
        B: StorageBackend + ?Sized,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (label, value) in values {
            self.set_variable(backend, label.as_ref(), value)?;
        }
        Ok(())
    }

    /// Reads the variable `label`, following `path` into mappings, arrays and structs.
    pub fn get_variable<B: StorageBackend + ?Sized>(
        &self,
        backend: &mut B,
        label: &str,
        path: &[Value],
    ) -> Result<Value, StorageError> {
        let entry = self.layout.get(label)?;
        let location = codec::locate(&self.layout, entry, path)?;
        let mut reader = SlotReader::new(backend, self.address);

        for bound in &location.bounds {
            let length = reader.word(bound.length_slot)?;
            if U256::from(bound.index) >= length {
                return Err(StorageError::IndexOutOfRange {
                    ty: bound.ty.clone(),
                    index: bound.index,
                    length: length.saturating_to(),
                });
            }
        }

        trace!(
            target: "evm-mock::storage",
            label,
            slot = %location.slot,
            offset = location.offset,
            "Reading storage variable"
        );
        let ty = self.layout.type_of(&location.ty)?;
        codec::decode(&self.layout, ty, location.slot, location.offset, &mut reader)
    }

    /// Slot and offset of `label` followed by `path`, without touching storage.
    pub fn slot_of(&self, label: &str, path: &[Value]) -> Result<Location, StorageError> {
        codec::locate(&self.layout, self.layout.get(label)?, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{
        address,
        keccak256,
    };

    const ACCOUNT: Address = address!("00000000000000000000000000000000000000d0");
    const HOLDER: Address = address!("00000000000000000000000000000000000000a1");

    const LAYOUT: &str = r#"{
        "storage": [
            {"label": "owner", "offset": 0, "slot": "0", "type": "t_address"},
            {"label": "paused", "offset": 20, "slot": "0", "type": "t_bool"},
            {"label": "balances", "offset": 0, "slot": "1", "type": "t_mapping(t_address,t_uint256)"},
            {"label": "small", "offset": 0, "slot": "2", "type": "t_array(t_uint8)3_storage"},
            {"label": "name", "offset": 0, "slot": "3", "type": "t_string_storage"},
            {"label": "values", "offset": 0, "slot": "4", "type": "t_array(t_uint128)dyn_storage"},
            {"label": "config", "offset": 0, "slot": "5", "type": "t_struct(Config)10_storage"},
            {"label": "allowances", "offset": 0, "slot": "7", "type": "t_mapping(t_address,t_mapping(t_address,t_uint256))"},
            {"label": "labels", "offset": 0, "slot": "8", "type": "t_mapping(t_string_memory_ptr,t_uint256)"},
            {"label": "configs", "offset": 0, "slot": "9", "type": "t_array(t_struct(Config)10_storage)dyn_storage"}
        ],
        "types": {
            "t_address": {"encoding": "inplace", "label": "address", "numberOfBytes": "20"},
            "t_bool": {"encoding": "inplace", "label": "bool", "numberOfBytes": "1"},
            "t_uint8": {"encoding": "inplace", "label": "uint8", "numberOfBytes": "1"},
            "t_uint64": {"encoding": "inplace", "label": "uint64", "numberOfBytes": "8"},
            "t_uint128": {"encoding": "inplace", "label": "uint128", "numberOfBytes": "16"},
            "t_uint256": {"encoding": "inplace", "label": "uint256", "numberOfBytes": "32"},
            "t_string_storage": {"encoding": "bytes", "label": "string", "numberOfBytes": "32"},
            "t_string_memory_ptr": {"encoding": "bytes", "label": "string", "numberOfBytes": "32"},
            "t_mapping(t_address,t_uint256)": {"encoding": "mapping", "key": "t_address", "label": "mapping(address => uint256)", "numberOfBytes": "32", "value": "t_uint256"},
            "t_mapping(t_address,t_mapping(t_address,t_uint256))": {"encoding": "mapping", "key": "t_address", "label": "mapping(address => mapping(address => uint256))", "numberOfBytes": "32", "value": "t_mapping(t_address,t_uint256)"},
            "t_mapping(t_string_memory_ptr,t_uint256)": {"encoding": "mapping", "key": "t_string_memory_ptr", "label": "mapping(string => uint256)", "numberOfBytes": "32", "value": "t_uint256"},
            "t_array(t_uint8)3_storage": {"base": "t_uint8", "encoding": "inplace", "label": "uint8[3]", "numberOfBytes": "32"},
            "t_array(t_uint128)dyn_storage": {"base": "t_uint128", "encoding": "dynamic_array", "label": "uint128[]", "numberOfBytes": "32"},
            "t_array(t_struct(Config)10_storage)dyn_storage": {"base": "t_struct(Config)10_storage", "encoding": "dynamic_array", "label": "struct C.Config[]", "numberOfBytes": "32"},
            "t_struct(Config)10_storage": {"encoding": "inplace", "label": "struct C.Config", "numberOfBytes": "64", "members": [
                {"label": "limit", "offset": 0, "slot": "0", "type": "t_uint256"},
                {"label": "epoch", "offset": 0, "slot": "1", "type": "t_uint64"},
                {"label": "enabled", "offset": 8, "slot": "1", "type": "t_bool"}
            ]}
        }
    }"#;

    fn storage() -> ContractStorage {
        ContractStorage::new(ACCOUNT, StorageLayout::from_json(LAYOUT).unwrap())
    }

    fn word(memory: &mut MemoryStorage, slot: U256) -> U256 {
        memory.load(ACCOUNT, slot).unwrap()
    }

    #[test]
    fn test_packed_variables_share_a_slot() {
        let storage = storage();
        let mut memory = MemoryStorage::new();

        storage.set_variable(&mut memory, "owner", HOLDER).unwrap();
        storage.set_variable(&mut memory, "paused", true).unwrap();

        let expected = U256::from_be_slice(HOLDER.as_slice()) | (U256::from(1) << 160);
        assert_eq!(word(&mut memory, U256::ZERO), expected);
        assert_eq!(
            storage.get_variable(&mut memory, "owner", &[]).unwrap(),
            Value::Address(HOLDER)
        );
        assert_eq!(
            storage.get_variable(&mut memory, "paused", &[]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_mapping_entry_slot() {
        let storage = storage();
        let mut memory = MemoryStorage::new();

        storage
            .set_variable(&mut memory, "balances", Value::map(vec![(HOLDER, 500u64)]))
            .unwrap();

        let mut preimage = [0u8; 64];
        preimage[12..32].copy_from_slice(HOLDER.as_slice());
        preimage[63] = 1;
        let slot = U256::from_be_bytes(keccak256(preimage).0);
        assert_eq!(word(&mut memory, slot), U256::from(500));

        assert_eq!(
            storage
                .get_variable(&mut memory, "balances", &[HOLDER.into()])
                .unwrap(),
            Value::Uint(U256::from(500))
        );
    }

    #[test]
    fn test_mapping_read_without_key_fails() {
        let storage = storage();
        let mut memory = MemoryStorage::new();
        assert!(matches!(
            storage.get_variable(&mut memory, "balances", &[]),
            Err(StorageError::MissingMappingKey(_))
        ));
    }

    #[test]
    fn test_nested_mapping_with_record_keys() {
        let storage = storage();
        let mut memory = MemoryStorage::new();
        let spender = "0x00000000000000000000000000000000000000b2";

        let value = Value::record(vec![(
            HOLDER.to_string(),
            Value::record(vec![(spender, 7u64)]),
        )]);
        storage.set_variable(&mut memory, "allowances", value).unwrap();

        assert_eq!(
            storage
                .get_variable(&mut memory, "allowances", &[HOLDER.into(), spender.into()])
                .unwrap(),
            Value::Uint(U256::from(7))
        );
    }

    #[test]
    fn test_string_keyed_mapping() {
        let storage = storage();
        let mut memory = MemoryStorage::new();
        storage
            .set_variable(&mut memory, "labels", Value::record(vec![("alpha", 3u64)]))
            .unwrap();

        let slot = mapping_slot(b"alpha", U256::from(8));
        assert_eq!(word(&mut memory, slot), U256::from(3));
    }

    #[test]
    fn test_static_array_packs_elements() {
        let storage = storage();
        let mut memory = MemoryStorage::new();
        storage
            .set_variable(&mut memory, "small", vec![1u8, 2, 3])
            .unwrap();

        assert_eq!(word(&mut memory, U256::from(2)), U256::from(0x030201u64));
        assert_eq!(
            storage.get_variable(&mut memory, "small", &[1u64.into()]).unwrap(),
            Value::Uint(U256::from(2))
        );
        assert!(matches!(
            storage.get_variable(&mut memory, "small", &[3u64.into()]),
            Err(StorageError::IndexOutOfRange { index: 3, length: 3, .. })
        ));
    }

    #[test]
    fn test_static_array_rejects_too_many_elements() {
        let storage = storage();
        let mut memory = MemoryStorage::new();
        assert!(matches!(
            storage.set_variable(&mut memory, "small", vec![1u8, 2, 3, 4]),
            Err(StorageError::IndexOutOfRange { .. })
        ));
        assert_eq!(memory.words(ACCOUNT).count(), 0);
    }

    #[test]
    fn test_dynamic_array_shrink_clears_stale_elements() {
        let storage = storage();
        let mut memory = MemoryStorage::new();
        let data = dynamic_data_slot(U256::from(4));

        storage
            .set_variable(&mut memory, "values", vec![1u64, 2, 3])
            .unwrap();
        assert_eq!(word(&mut memory, U256::from(4)), U256::from(3));
        assert_eq!(word(&mut memory, data), U256::from(1) | (U256::from(2) << 128));
        assert_eq!(word(&mut memory, data + U256::from(1)), U256::from(3));

        storage.set_variable(&mut memory, "values", vec![9u64]).unwrap();
        assert_eq!(word(&mut memory, data), U256::from(9));
        assert_eq!(word(&mut memory, data + U256::from(1)), U256::ZERO);

        assert_eq!(
            storage.get_variable(&mut memory, "values", &[]).unwrap(),
            Value::seq(vec![Value::Uint(U256::from(9))])
        );
        assert!(matches!(
            storage.get_variable(&mut memory, "values", &[1u64.into()]),
            Err(StorageError::IndexOutOfRange { index: 1, length: 1, .. })
        ));
    }

    #[test]
    fn test_short_and_long_strings() {
        let storage = storage();
        let mut memory = MemoryStorage::new();
        let slot = U256::from(3);

        storage.set_variable(&mut memory, "name", "abc").unwrap();
        let mut expected = [0u8; 32];
        expected[..3].copy_from_slice(b"abc");
        expected[31] = 6;
        assert_eq!(word(&mut memory, slot), U256::from_be_bytes(expected));

        let long = "x".repeat(70);
        storage.set_variable(&mut memory, "name", long.as_str()).unwrap();
        assert_eq!(word(&mut memory, slot), U256::from(141));
        assert_eq!(
            storage.get_variable(&mut memory, "name", &[]).unwrap(),
            Value::String(long)
        );

        storage.set_variable(&mut memory, "name", "short").unwrap();
        let data = dynamic_data_slot(slot);
        for i in 0..3u64 {
            assert_eq!(word(&mut memory, data + U256::from(i)), U256::ZERO);
        }
        assert_eq!(
            storage.get_variable(&mut memory, "name", &[]).unwrap(),
            Value::String("short".to_string())
        );
    }

    #[test]
    fn test_struct_members() {
        let storage = storage();
        let mut memory = MemoryStorage::new();

        storage
            .set_variable(
                &mut memory,
                "config",
                Value::record(vec![
                    ("limit", Value::from(1000u64)),
                    ("enabled", Value::from(true)),
                ]),
            )
            .unwrap();
        storage
            .set_variable(
                &mut memory,
                "config",
                Value::record(vec![("epoch", 4u64)]),
            )
            .unwrap();

        assert_eq!(word(&mut memory, U256::from(6)), U256::from(4) | (U256::from(1) << 64));
        assert_eq!(
            storage.get_variable(&mut memory, "config", &[]).unwrap(),
            Value::record(vec![
                ("limit", Value::Uint(U256::from(1000))),
                ("epoch", Value::Uint(U256::from(4))),
                ("enabled", Value::Bool(true)),
            ])
        );
        assert_eq!(
            storage
                .get_variable(&mut memory, "config", &["enabled".into()])
                .unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_unknown_member_and_variable() {
        let storage = storage();
        let mut memory = MemoryStorage::new();

        assert!(matches!(
            storage.set_variable(
                &mut memory,
                "config",
                Value::record(vec![("nope", 1u64)])
            ),
            Err(StorageError::UnknownMember { member, .. }) if member == "nope"
        ));
        assert!(matches!(
            storage.set_variable(&mut memory, "missing", 1u64),
            Err(StorageError::UnknownVariable(_))
        ));
        assert!(matches!(
            storage.get_variable(&mut memory, "owner", &[1u64.into()]),
            Err(StorageError::PathTooLong(_))
        ));
    }

    #[test]
    fn test_set_variables_keeps_earlier_writes() {
        let storage = storage();
        let mut memory = MemoryStorage::new();

        let result = storage.set_variables(
            &mut memory,
            vec![("paused", Value::Bool(true)), ("missing", Value::Bool(true))],
        );
        assert!(result.is_err());
        assert_eq!(
            storage.get_variable(&mut memory, "paused", &[]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_slot_of() {
        let storage = storage();
        let location = storage.slot_of("config", &["enabled".into()]).unwrap();
        assert_eq!(location.slot, U256::from(6));
        assert_eq!(location.offset, 8);
        assert_eq!(location.ty, "t_bool");
    }

    #[test]
    fn test_nested_mapping_slot_and_unrelated_paths() {
        let storage = storage();
        let mut memory = MemoryStorage::new();
        let spender = address!("00000000000000000000000000000000000000b2");
        let stranger = address!("00000000000000000000000000000000000000b3");

        storage
            .set_variable(
                &mut memory,
                "allowances",
                Value::map(vec![(HOLDER, Value::map(vec![(spender, 7u64)]))]),
            )
            .unwrap();

        // keccak(pad32(spender) ++ keccak(pad32(holder) ++ pad32(7)))
        let mut outer = [0u8; 64];
        outer[12..32].copy_from_slice(HOLDER.as_slice());
        outer[63] = 7;
        let inner_slot = keccak256(outer);
        let mut inner = [0u8; 64];
        inner[12..32].copy_from_slice(spender.as_slice());
        inner[32..].copy_from_slice(inner_slot.as_slice());
        let slot = U256::from_be_bytes(keccak256(inner).0);

        assert_eq!(word(&mut memory, slot), U256::from(7));
        assert_eq!(
            storage
                .slot_of("allowances", &[HOLDER.into(), spender.into()])
                .unwrap()
                .slot,
            slot
        );
        assert_eq!(
            storage
                .get_variable(&mut memory, "allowances", &[spender.into(), HOLDER.into()])
                .unwrap(),
            Value::Uint(U256::ZERO)
        );
        assert_eq!(
            storage
                .get_variable(&mut memory, "allowances", &[HOLDER.into(), stranger.into()])
                .unwrap(),
            Value::Uint(U256::ZERO)
        );
    }

    #[test]
    fn test_corrupt_short_string_is_rejected() {
        let storage = storage();
        let mut memory = MemoryStorage::new();
        memory.store(ACCOUNT, U256::from(3), U256::from(0x42)).unwrap();

        assert!(matches!(
            storage.get_variable(&mut memory, "name", &[]),
            Err(StorageError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_huge_index_into_struct_array_is_out_of_range() {
        let storage = storage();
        let mut memory = MemoryStorage::new();
        storage
            .set_variable(
                &mut memory,
                "configs",
                Value::seq(vec![Value::record(vec![("limit", 1u64)])]),
            )
            .unwrap();

        let index = Value::Uint(U256::from(usize::MAX));
        assert!(matches!(
            storage.get_variable(&mut memory, "configs", &[index.clone(), "limit".into()]),
            Err(StorageError::IndexOutOfRange { length: 1, .. })
        ));
        assert!(storage.slot_of("configs", &[index]).is_ok());
        assert_eq!(
            storage
                .get_variable(&mut memory, "configs", &[0u64.into(), "limit".into()])
                .unwrap(),
            Value::Uint(U256::from(1))
        );
    }

    #[test]
    fn test_implausible_stored_lengths_are_rejected() {
        let storage = storage();
        let mut memory = MemoryStorage::new();

        memory.store(ACCOUNT, U256::from(4), U256::MAX).unwrap();
        assert!(matches!(
            storage.get_variable(&mut memory, "values", &[]),
            Err(StorageError::InvalidValue { .. })
        ));
        assert!(matches!(
            storage.set_variable(&mut memory, "values", vec![1u64]),
            Err(StorageError::InvalidValue { .. })
        ));

        let huge = U256::from(MAX_STORED_LENGTH + 1);
        memory.store(ACCOUNT, U256::from(3), (huge << 1) | U256::from(1)).unwrap();
        assert!(matches!(
            storage.get_variable(&mut memory, "name", &[]),
            Err(StorageError::InvalidValue { .. })
        ));
        assert!(matches!(
            storage.set_variable(&mut memory, "name", "abc"),
            Err(StorageError::InvalidValue { .. })
        ));
    }
}
