//! JSON file store with whole-file merge writes
//!
//! Every settings file xdl owns is a single JSON object. Reads fall back to a
//! caller-supplied default; writes are shallow merges done under an exclusive
//! advisory lock on a sibling `.lock` file, written to a temp file and renamed
//! into place.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use xdl_core::prelude::*;

/// A JSON object persisted at `path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        sibling(&self.path, "", ".lock")
    }

    fn temp_path(&self) -> PathBuf {
        sibling(&self.path, ".", ".tmp")
    }

    /// Read the raw object; missing file is an empty object, corrupt is `None`
    fn read_object(&self) -> Option<Map<String, Value>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Some(Map::new()),
            Err(e) => {
                warn!("Failed to read {:?}: {}", self.path, e);
                return None;
            }
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => {
                warn!("Ignoring non-object JSON in {:?}", self.path);
                None
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", self.path, e);
                None
            }
        }
    }

    /// Read the file as `T`, or `default` when missing or corrupt.
    ///
    /// Keys absent from the file take their values from `default`.
    pub fn read<T>(&self, default: T) -> T
    where
        T: Serialize + DeserializeOwned,
    {
        let Some(stored) = self.read_object() else {
            return default;
        };
        if stored.is_empty() {
            return default;
        }
        let mut merged = match serde_json::to_value(&default) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        merged.extend(stored);
        match serde_json::from_value(Value::Object(merged)) {
            Ok(value) => value,
            Err(e) => {
                warn!("Invalid contents in {:?}: {}", self.path, e);
                default
            }
        }
    }

    /// Shallow-merge `partial` into the file and return the merged object.
    ///
    /// Keys not in `partial` are preserved; an explicit `null` overwrites.
    pub fn merge(&self, partial: Map<String, Value>) -> Result<Map<String, Value>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::config(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let lock = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| Error::config(format!("Failed to open lock file: {}", e)))?;
        lock.lock_exclusive()
            .map_err(|e| Error::config(format!("Failed to lock {:?}: {}", self.path, e)))?;

        let mut current = self.read_object().unwrap_or_default();
        current.extend(partial);

        let content = serde_json::to_string_pretty(&Value::Object(current.clone()))?;
        let temp_path = self.temp_path();
        fs::write(&temp_path, content)
            .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;
        fs::rename(&temp_path, &self.path)
            .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))?;

        // Lock is released when `lock` is dropped
        trace!("Merged settings into {:?}", self.path);
        Ok(current)
    }

    /// Merge a serializable partial (must serialize to an object)
    pub fn merge_from<P: Serialize>(&self, partial: &P) -> Result<Map<String, Value>> {
        match serde_json::to_value(partial)? {
            Value::Object(map) => self.merge(map),
            other => Err(Error::config(format!(
                "settings update must be an object, got {other}"
            ))),
        }
    }
}

fn sibling(path: &Path, prefix: &str, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{prefix}{name}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: u32,
        b: Option<String>,
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_missing_file_returns_default() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::new(temp.path().join("x.json"));
        let default = Sample { a: 1, b: None };
        assert_eq!(store.read(default.clone()), default);
    }

    #[test]
    fn test_corrupt_file_returns_default() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("x.json");
        fs::write(&path, "{ nope").unwrap();
        let store = JsonFileStore::new(&path);
        assert_eq!(store.read(Sample { a: 7, b: None }).a, 7);
    }

    #[test]
    fn test_merge_preserves_other_keys_and_null_overwrites() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::new(temp.path().join("nested/dir/x.json"));

        store.merge(obj(json!({"a": 1, "b": "keep", "c": true}))).unwrap();
        let merged = store.merge(obj(json!({"a": 2, "b": null}))).unwrap();

        assert_eq!(merged["a"], 2);
        assert_eq!(merged["b"], Value::Null);
        assert_eq!(merged["c"], true);

        let on_disk: Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk, Value::Object(merged));
    }

    #[test]
    fn test_read_fills_missing_keys_from_default() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::new(temp.path().join("x.json"));
        store.merge(obj(json!({"b": "set"}))).unwrap();

        let read = store.read(Sample { a: 5, b: None });
        assert_eq!(read, Sample { a: 5, b: Some("set".into()) });
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::new(temp.path().join("x.json"));
        store.merge(obj(json!({"a": 1}))).unwrap();
        assert!(!temp.path().join(".x.json.tmp").exists());
        assert!(temp.path().join("x.json.lock").exists());
    }

    #[test]
    fn test_merge_from_rejects_non_object() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::new(temp.path().join("x.json"));
        assert!(store.merge_from(&42).is_err());
    }

    #[test]
    fn test_concurrent_merges_do_not_lose_keys() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("x.json");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = JsonFileStore::new(&path);
                std::thread::spawn(move || {
                    let mut partial = Map::new();
                    partial.insert(format!("k{i}"), Value::from(i));
                    store.merge(partial).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let store = JsonFileStore::new(&path);
        let all = store.read_object().unwrap();
        assert_eq!(all.len(), 8);
    }
}
