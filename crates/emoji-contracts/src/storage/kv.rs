use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::StorageError;

/// Durable key-value capability standing in for browser local storage.
pub trait KeyValueStore {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError>;
}

/// Every key lives in one JSON object file.
///
/// Values that are valid JSON are stored inline so the file stays readable;
/// anything else is stored as a UTF-8 string. Reads always go back to disk and
/// writes merge into the current on-disk object, so two handles on the same
/// file do not clobber each other's keys.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KeyValueStore for FileStore {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let payload = read_json_object(&self.path)?;
        let Some(value) = payload.get(key) else {
            return Ok(None);
        };
        let bytes = match value {
            Value::String(text) => text.as_bytes().to_vec(),
            other => serde_json::to_vec(other).map_err(StorageError::Encode)?,
        };
        Ok(Some(bytes))
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let snapshot = match serde_json::from_slice::<Value>(value) {
            Ok(parsed) => parsed,
            Err(_) => {
                let text = std::str::from_utf8(value).map_err(|_| StorageError::NotUtf8 {
                    key: key.to_string(),
                })?;
                Value::String(text.to_string())
            }
        };

        let mut on_disk = read_json_object(&self.path)?;
        if on_disk.get(key) == Some(&snapshot) {
            return Ok(());
        }
        on_disk.insert(key.to_string(), snapshot);
        write_json_object(&self.path, &on_disk)
    }
}

/// In-process store used by tests and throwaway sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, key: &str) -> Option<&[u8]> {
        self.values.get(key).map(Vec::as_slice)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

fn read_json_object(path: &Path) -> Result<Map<String, Value>, StorageError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(payload)) => Ok(payload),
        Ok(_) => Err(StorageError::Corrupt {
            path: path.to_path_buf(),
            reason: "top-level value is not an object".to_string(),
        }),
        Err(err) => Err(StorageError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> Result<(), StorageError> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(io_err)?;

    let body = serde_json::to_string_pretty(&Value::Object(payload.clone()))
        .map_err(StorageError::Encode)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "store".to_string());
    let tmp_path = parent.join(format!(".{file_name}.tmp-{}", std::process::id()));
    let mut tmp = std::fs::File::create(&tmp_path).map_err(io_err)?;
    tmp.write_all(body.as_bytes()).map_err(io_err)?;
    tmp.sync_all().map_err(io_err)?;
    drop(tmp);
    std::fs::rename(&tmp_path, path).map_err(io_err)
}
