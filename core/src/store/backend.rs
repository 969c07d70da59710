// Property store abstraction for per-contact persistence
//
// Every contact owns one `props` file of `key=value` lines. Writes go to a
// sibling temp file which is renamed over the old one, so a crash leaves
// either the old or the new file, never a torn one.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid property {key:?}: {reason}")]
    InvalidProperty { key: String, reason: &'static str },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable string key/value persistence
pub trait PropertyStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Apply several puts and removes. File-backed stores make this a single write.
    fn update(&self, puts: &[(&str, String)], removes: &[&str]) -> Result<(), StoreError> {
        for (key, value) in puts {
            self.put(key, value)?;
        }
        for key in removes {
            self.remove(key)?;
        }
        Ok(())
    }
}

fn validate(key: &str, value: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.contains(['=', '\n', '\r']) {
        return Err(StoreError::InvalidProperty {
            key: key.to_string(),
            reason: "keys must be non-empty and free of '=' and line breaks",
        });
    }
    if value.contains(['\n', '\r']) {
        return Err(StoreError::InvalidProperty {
            key: key.to_string(),
            reason: "values must not contain line breaks",
        });
    }
    Ok(())
}

/// In-memory property store useful for testing
#[derive(Clone, Default)]
pub struct MemoryProps {
    data: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryProps {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PropertyStore for MemoryProps {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        validate(key, value)?;
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.data.read().keys().cloned().collect())
    }
}

/// A `key=value` property file on disk, cached in memory after the first read
pub struct PropsFile {
    path: PathBuf,
    cache: RwLock<Option<BTreeMap<String, String>>>,
}

impl PropsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Parse property lines. Lines without `=` are ignored.
    pub fn parse(text: &str) -> BTreeMap<String, String> {
        text.lines()
            .filter_map(|line| {
                let line = line.trim_end_matches('\r');
                line.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect()
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if let Some(map) = self.cache.read().as_ref() {
            return Ok(map.clone());
        }
        let map = match fs::read_to_string(&self.path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        *self.cache.write() = Some(map.clone());
        Ok(map)
    }

    fn write(&self, map: BTreeMap<String, String>) -> Result<(), StoreError> {
        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        let mut contents = String::new();
        for (k, v) in &map {
            contents.push_str(k);
            contents.push('=');
            contents.push_str(v);
            contents.push('\n');
        }

        let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(contents.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        *self.cache.write() = Some(map);
        Ok(())
    }
}

impl PropertyStore for PropsFile {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(&[(key, value.to_string())], &[])
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(&[], &[key])
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.load()?.keys().cloned().collect())
    }

    fn update(&self, puts: &[(&str, String)], removes: &[&str]) -> Result<(), StoreError> {
        for (key, value) in puts {
            validate(key, value)?;
        }
        let mut map = self.load()?;
        let before = map.clone();
        for (key, value) in puts {
            map.insert(key.to_string(), value.clone());
        }
        for key in removes {
            map.remove(*key);
        }
        if map == before && self.exists() {
            return Ok(());
        }
        self.write(map)
    }
}
