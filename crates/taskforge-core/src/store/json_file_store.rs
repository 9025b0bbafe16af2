//! Atomic JSON-file persistence shared by the Task Store and every session
//! store. Grounded on `FsCasStore`'s write-to-tempfile-then-persist pattern:
//! no partial record is ever visible to a concurrent reader.

use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Result, TaskforgeError};

/// A directory of `<id>.json` files, one record per id, written atomically.
pub struct JsonFileStore<T> {
    dir: PathBuf,
    _marker: PhantomData<T>,
}

impl<T> JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            _marker: PhantomData,
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.path_for(id).exists()
    }

    /// Write `record` to `<id>.json` atomically: write to a sibling temp
    /// file then rename over the destination.
    pub fn write(&self, id: &str, record: &T) -> Result<()> {
        let path = self.path_for(id);
        let bytes = serde_json::to_vec_pretty(record)?;
        let mut tmp_path = path.clone();
        tmp_path.set_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Read and validate `<id>.json`. A malformed file returns
    /// `ValidationError`, never a partially-constructed value.
    pub fn read(&self, id: &str) -> Result<T> {
        let path = self.path_for(id);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TaskforgeError::NotFound(id.to_string())
            } else {
                TaskforgeError::IoError(e)
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TaskforgeError::ValidationError(format!("{id}: {e}")))
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        fs::remove_file(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TaskforgeError::NotFound(id.to_string())
            } else {
                TaskforgeError::IoError(e)
            }
        })
    }

    /// List every id currently persisted. Ordering is unspecified.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        Ok(ids)
    }
}

/// A directory-as-lock: existence of `.locks/<key>/` means the lock is
/// held. Acquisition is a single non-blocking atomic `mkdir`; a second
/// attempt while held fails fast rather than waiting.
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    pub fn acquire(locks_root: impl AsRef<Path>, key: &str) -> Result<Self> {
        let path = locks_root.as_ref().join(key);
        fs::create_dir_all(locks_root.as_ref())?;
        match fs::create_dir(&path) {
            Ok(()) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(TaskforgeError::LockHeld(key.to_string()))
            }
            Err(e) => Err(TaskforgeError::IoError(e)),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs::remove_dir(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Sample> = JsonFileStore::new(dir.path()).unwrap();
        store.write("a", &Sample { value: 1 }).unwrap();
        let back = store.read("a").unwrap();
        assert_eq!(back, Sample { value: 1 });
    }

    #[test]
    fn read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Sample> = JsonFileStore::new(dir.path()).unwrap();
        let err = store.read("missing").unwrap_err();
        assert!(matches!(err, TaskforgeError::NotFound(_)));
    }

    #[test]
    fn read_malformed_file_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Sample> = JsonFileStore::new(dir.path()).unwrap();
        fs::write(dir.path().join("bad.json"), b"not json").unwrap();
        let err = store.read("bad").unwrap_err();
        assert!(matches!(err, TaskforgeError::ValidationError(_)));
    }

    #[test]
    fn list_ids_finds_every_written_record() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Sample> = JsonFileStore::new(dir.path()).unwrap();
        store.write("a", &Sample { value: 1 }).unwrap();
        store.write("b", &Sample { value: 2 }).unwrap();
        let mut ids = store.list_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn delete_removes_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Sample> = JsonFileStore::new(dir.path()).unwrap();
        store.write("a", &Sample { value: 1 }).unwrap();
        store.delete("a").unwrap();
        assert!(store.read("a").is_err());
    }

    #[test]
    fn dir_lock_second_acquire_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = DirLock::acquire(dir.path(), "task-1").unwrap();
        let second = DirLock::acquire(dir.path(), "task-1");
        assert!(matches!(second, Err(TaskforgeError::LockHeld(_))));
    }

    #[test]
    fn dir_lock_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = DirLock::acquire(dir.path(), "task-1").unwrap();
        }
        let second = DirLock::acquire(dir.path(), "task-1");
        assert!(second.is_ok());
    }
}
