//! Account storage and code primitives.

use crate::{
    error::StorageError,
    primitives::{
        AccountInfo,
        Address,
        Bytecode,
        Bytes,
        U256,
    },
};
use revm::{
    Database,
    DatabaseRef,
    database::CacheDB,
};
use std::collections::HashMap;

/// Raw word access to account storage.
pub trait StorageBackend {
    fn load(&mut self, address: Address, slot: U256) -> Result<U256, StorageError>;
    fn store(&mut self, address: Address, slot: U256, value: U256) -> Result<(), StorageError>;
}

/// Writes code into an account.
pub trait CodeBackend {
    fn set_code(&mut self, address: Address, code: Bytes) -> Result<(), StorageError>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for &mut B {
    fn load(&mut self, address: Address, slot: U256) -> Result<U256, StorageError> {
        (**self).load(address, slot)
    }

    fn store(&mut self, address: Address, slot: U256, value: U256) -> Result<(), StorageError> {
        (**self).store(address, slot, value)
    }
}

impl<ExtDb: DatabaseRef> StorageBackend for CacheDB<ExtDb> {
    fn load(&mut self, address: Address, slot: U256) -> Result<U256, StorageError> {
        self.storage(address, slot)
            .map_err(|err| StorageError::Backend(err.to_string()))
    }

    fn store(&mut self, address: Address, slot: U256, value: U256) -> Result<(), StorageError> {
        self.insert_account_storage(address, slot, value)
            .map_err(|err| StorageError::Backend(err.to_string()))
    }
}

impl<ExtDb: DatabaseRef> CodeBackend for CacheDB<ExtDb> {
    fn set_code(&mut self, address: Address, code: Bytes) -> Result<(), StorageError> {
        let mut info = self
            .basic(address)
            .map_err(|err| StorageError::Backend(err.to_string()))?
            .unwrap_or_default();
        let bytecode = Bytecode::new_raw(code);
        info.code_hash = bytecode.hash_slow();
        info.code = Some(bytecode);
        self.insert_account_info(address, info);
        Ok(())
    }
}

/// In-memory account storage and code, for tests and offline slot computation.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slots: HashMap<(Address, U256), U256>,
    code: HashMap<Address, Bytes>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(&self, address: Address) -> Option<&Bytes> {
        self.code.get(&address)
    }

    /// Non-zero words stored for `address`.
    pub fn words(&self, address: Address) -> impl Iterator<Item = (U256, U256)> + '_ {
        self.slots
            .iter()
            .filter(move |((a, _), v)| *a == address && !v.is_zero())
            .map(|((_, slot), value)| (*slot, *value))
    }

    /// Copies the stored words of `address` into an account of `db`.
    pub fn apply_to<ExtDb: DatabaseRef>(
        &self,
        address: Address,
        db: &mut CacheDB<ExtDb>,
    ) -> Result<(), StorageError> {
        for (slot, value) in self.words(address) {
            db.store(address, slot, value)?;
        }
        Ok(())
    }
}

impl StorageBackend for MemoryStorage {
    fn load(&mut self, address: Address, slot: U256) -> Result<U256, StorageError> {
        Ok(self.slots.get(&(address, slot)).copied().unwrap_or_default())
    }

    fn store(&mut self, address: Address, slot: U256, value: U256) -> Result<(), StorageError> {
        self.slots.insert((address, slot), value);
        Ok(())
    }
}

impl CodeBackend for MemoryStorage {
    fn set_code(&mut self, address: Address, code: Bytes) -> Result<(), StorageError> {
        self.code.insert(address, code);
        Ok(())
    }
}

/// Builds account info holding `code`.
pub fn account_with_code(code: Bytes) -> AccountInfo {
    let bytecode = Bytecode::new_raw(code);
    AccountInfo {
        code_hash: bytecode.hash_slow(),
        code: Some(bytecode),
        ..Default::default()
    }
}
