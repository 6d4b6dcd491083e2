use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::BlobStore;
use crate::error::{ExtractError, Result};

/// 目录下每个 blob 一个文件
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl BlobStore for FsBlobStore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ExtractError::persistence(name, e)),
        }
    }

    fn store(&self, name: &str, blob: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| ExtractError::persistence(name, e))?;

        // 先写临时文件再改名，避免留下半个 blob
        let target = self.path_for(name);
        let staging = self.root.join(format!(".{}.partial", name));
        fs::write(&staging, blob).map_err(|e| ExtractError::persistence(name, e))?;
        fs::rename(&staging, &target).map_err(|e| {
            let _ = fs::remove_file(&staging);
            ExtractError::persistence(name, e)
        })?;

        tracing::debug!("Stored blob {} ({} bytes) at {}", name, blob.len(), target.display());
        Ok(())
    }

    fn locate(&self, name: &str) -> String {
        self.path_for(name).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_blob_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.load("nb_model").unwrap().is_none());
    }

    #[test]
    fn stores_and_loads_whole_blob() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path().join("models"));
        store.store("rf_model", b"forest").unwrap();
        assert_eq!(store.load("rf_model").unwrap().as_deref(), Some(&b"forest"[..]));
        assert!(!dir.path().join("models").join(".rf_model.partial").exists());
    }

    #[test]
    fn unwritable_root_surfaces_persistence_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let store = FsBlobStore::new(&blocker);
        let err = store.store("svm_model", b"x").unwrap_err();
        assert!(matches!(err, ExtractError::Persistence { ref name, .. } if name == "svm_model"));
    }
}
