use std::collections::HashMap;
use std::sync::RwLock;

use super::BlobStore;
use crate::error::{ExtractError, Result};

/// 进程内 blob 存储
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| ExtractError::persistence(name, "blob store lock poisoned"))?;
        Ok(blobs.get(name).cloned())
    }

    fn store(&self, name: &str, blob: &[u8]) -> Result<()> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| ExtractError::persistence(name, "blob store lock poisoned"))?;
        blobs.insert(name.to_string(), blob.to_vec());
        Ok(())
    }

    fn locate(&self, name: &str) -> String {
        format!("memory://{}", name)
    }
}
