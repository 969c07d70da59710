// Directory-backed storage network
//
// Lets several local accounts exchange mail through one shared directory.
// Each blob is a file named after the SHA-256 of its resolved key.

use super::{resolve_fetch_key, resolve_insert_key, NetworkClient, NetworkError, SskKeyPair};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct DirectoryNetwork {
    root: PathBuf,
}

impl DirectoryNetwork {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, NetworkError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, resolved_key: &str) -> PathBuf {
        self.root
            .join(hex::encode(Sha256::digest(resolved_key.as_bytes())))
    }
}

impl NetworkClient for DirectoryNetwork {
    fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, NetworkError> {
        let path = self.blob_path(&resolve_fetch_key(key)?);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn insert(
        &self,
        data: &[u8],
        key: &str,
        _priority: u8,
        _extra: &str,
    ) -> Result<(), NetworkError> {
        let resolved = resolve_insert_key(key)?;
        let path = self.blob_path(&resolved);
        match fs::read(&path) {
            Ok(existing) if existing != data => return Err(NetworkError::Collision(resolved)),
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        debug!("Stored {} bytes under {}", data.len(), resolved);
        Ok(())
    }

    fn generate_key_pair(&self) -> Result<SskKeyPair, NetworkError> {
        Ok(SskKeyPair::generate())
    }
}
