//! NVS (Non-Volatile Storage) adapter.
//!
//! In-memory flash backing the [`StoragePort`].  It lives inside the
//! [`Device`](crate::device::Device) and is never cleared by a reset, so
//! records written with `save = true` are visible after `node::restart`.
//!
//! Records are `postcard`-encoded.  Key and namespace length limits follow
//! the ESP NVS API (15 characters).

use std::collections::HashMap;

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ConfigError;
use crate::ports::{StorageError, StoragePort};

const MAX_KEY_LEN: usize = 15;
const MAX_BLOB_SIZE: usize = 4000;
/// Total bytes the simulated partition can hold.
const PARTITION_BYTES: usize = 16 * 1024;

#[derive(Debug, Default)]
pub struct NvsStore {
    store: HashMap<String, Vec<u8>>,
}

impl NvsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn composite_key(namespace: &str, key: &str) -> Result<String, StorageError> {
        if namespace.len() > MAX_KEY_LEN || key.len() > MAX_KEY_LEN {
            return Err(StorageError::IoError);
        }
        Ok(format!("{}::{}", namespace, key))
    }

    fn used_bytes(&self) -> usize {
        self.store.values().map(Vec::len).sum()
    }

    /// Encode and persist a record.
    pub fn save_record<T: Serialize>(
        &mut self,
        namespace: &str,
        key: &str,
        record: &T,
    ) -> Result<(), StorageError> {
        let bytes = postcard::to_allocvec(record).map_err(|_| StorageError::IoError)?;
        self.write(namespace, key, &bytes)
    }

    /// Load and decode a record.  `Ok(None)` when the key is absent.
    pub fn load_record<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>, ConfigError> {
        let mut buf = vec![0u8; MAX_BLOB_SIZE];
        match self.read(namespace, key, &mut buf) {
            Ok(n) => postcard::from_bytes(&buf[..n])
                .map(Some)
                .map_err(|_| ConfigError::Corrupted),
            Err(StorageError::NotFound) => Ok(None),
            Err(e) => {
                warn!("NVS: read {namespace}::{key} failed: {e}");
                Err(ConfigError::Corrupted)
            }
        }
    }
}

impl StoragePort for NvsStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let composite = Self::composite_key(namespace, key)?;
        match self.store.get(&composite) {
            Some(data) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let composite = Self::composite_key(namespace, key)?;
        if data.len() > MAX_BLOB_SIZE {
            return Err(StorageError::Full);
        }
        let replaced = self.store.get(&composite).map_or(0, Vec::len);
        if self.used_bytes() - replaced + data.len() > PARTITION_BYTES {
            return Err(StorageError::Full);
        }
        self.store.insert(composite, data.to_vec());
        debug!("NVS: wrote {namespace}::{key} ({} bytes)", data.len());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let composite = Self::composite_key(namespace, key)?;
        self.store.remove(&composite);
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        Self::composite_key(namespace, key)
            .map(|k| self.store.contains_key(&k))
            .unwrap_or(false)
    }
}
