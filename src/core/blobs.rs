//! Content-addressed JSON blobs (`blobs/<kind>/<sha256>.json`).
//!
//! Blobs are write-once. Writing the same content twice yields the same
//! address and leaves the existing file untouched.

use crate::core::error::TrellisError;
use crate::core::hash::sha256_hex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use ulid::Ulid;

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn kind_dir(&self, kind: &str) -> Result<PathBuf, TrellisError> {
        if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
            return Err(TrellisError::InvalidInput(format!(
                "invalid blob kind '{}'",
                kind
            )));
        }
        Ok(self.root.join(kind))
    }

    /// Store `value` and return its address.
    pub fn put<T: Serialize>(&self, kind: &str, value: &T) -> Result<String, TrellisError> {
        let bytes = serde_json::to_vec(value)?;
        let address = sha256_hex(&bytes);
        let dir = self.kind_dir(kind)?;
        fs::create_dir_all(&dir).map_err(TrellisError::IoError)?;

        let final_path = dir.join(format!("{}.json", address));
        if final_path.exists() {
            return Ok(address);
        }

        let tmp_path = dir.join(format!(".tmp-{}", Ulid::new()));
        let mut f = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)
            .map_err(TrellisError::IoError)?;
        f.write_all(&bytes).map_err(TrellisError::IoError)?;
        f.sync_all().map_err(TrellisError::IoError)?;
        drop(f);

        let result = match fs::hard_link(&tmp_path, &final_path) {
            Ok(()) => Ok(address),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(address),
            Err(err) => Err(TrellisError::IoError(err)),
        };
        let _ = fs::remove_file(&tmp_path);
        result
    }

    /// Load a blob, checking that its bytes still hash to `address`.
    pub fn get<T: DeserializeOwned>(&self, kind: &str, address: &str) -> Result<T, TrellisError> {
        let path = self.kind_dir(kind)?.join(format!("{}.json", address));
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(TrellisError::NotFound(format!("blob {}/{}", kind, address)));
            }
            Err(err) => return Err(TrellisError::IoError(err)),
        };
        let computed = sha256_hex(&bytes);
        if computed != address {
            return Err(TrellisError::HashMismatch {
                node: format!("blob {}", kind),
                recorded: address.to_string(),
                computed,
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}
