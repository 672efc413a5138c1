//! Filesystem-backed key-value store.
//!
//! Each key maps to one file under the root directory; `/` in keys becomes a
//! subdirectory. Writes go to a temporary sibling that is then hard-linked into
//! place, which fails if the key was taken in the meantime.

use super::{KeyValueStore, StoreError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub struct FsKvStore {
    root: PathBuf,
}

impl FsKvStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid store key: {}", key),
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl KeyValueStore for FsKvStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if path.exists() {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        // hard_link refuses an existing target, so concurrent writers of one key
        // see exactly one success
        let published = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);
        match published {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        debug!(key, bytes = value.len(), "Wrote store entry");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.path_for(key)?.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKvStore::new(dir.path()).unwrap();
        store.put("policy/abc", b"blob").unwrap();
        assert_eq!(store.get("policy/abc").unwrap(), Some(b"blob".to_vec()));
        assert!(dir.path().join("policy").join("abc").is_file());
        assert_eq!(store.get("meta/abc").unwrap(), None);
    }

    #[test]
    fn test_put_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKvStore::new(dir.path()).unwrap();
        store.put("meta/a", b"1").unwrap();
        assert!(matches!(
            store.put("meta/a", b"2"),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_concurrent_writers_of_one_key_see_one_success() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        for round in 0..50 {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(FsKvStore::new(dir.path()).unwrap());
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = (0..2u8)
                .map(|writer| {
                    let store = Arc::clone(&store);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        store.put("meta/x", &[writer])
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let ok = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(ok, 1, "round {}: {:?}", round, results);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(StoreError::AlreadyExists(_)))));

            let winner = results.iter().position(|r| r.is_ok()).unwrap() as u8;
            assert_eq!(store.get("meta/x").unwrap(), Some(vec![winner]));
        }
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKvStore::new(dir.path()).unwrap();
        assert!(store.put("../outside", b"x").is_err());
        assert!(store.get("/etc/passwd").is_err());
        assert!(store.exists("").is_err());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKvStore::new(dir.path()).unwrap();
        store.put("policy/a", b"blob").unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path().join("policy"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
