//! File-per-job record store.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::{JobId, JobRecord, JobStore, StoreError};

/// Stores each record as `<id>.json` inside one directory.
///
/// Terminal records are written to a hidden sibling file and renamed over
/// the pending record, so a reader sees either the old or the new document.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn write(path: &Path, record: &JobRecord) -> Result<(), StoreError> {
        let mut file = File::create(path)?;
        serde_json::to_writer(&mut file, record)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}

impl JobStore for FileStore {
    fn create(&self, id: &JobId) -> Result<(), StoreError> {
        Self::write(&self.path(id), &JobRecord::pending(id.link()))
    }

    fn finalize(&self, id: &JobId, record: &JobRecord) -> Result<(), StoreError> {
        if !record.is_terminal() {
            return Err(StoreError::NotTerminal(*id));
        }
        if self.read(id)?.is_terminal() {
            return Err(StoreError::AlreadyFinal(*id));
        }

        let tmp = self.dir.join(format!(".{}.json.tmp", id));
        if let Err(e) = Self::write(&tmp, record) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, self.path(id))?;
        Ok(())
    }

    fn read_raw(&self, id: &JobId) -> Result<String, StoreError> {
        match fs::read_to_string(self.path(id)) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::contract;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_contract() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        contract::all(&store);
    }

    #[test]
    fn test_record_file_matches_wire_format() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let id = JobId::new();
        store.create(&id).unwrap();

        let path = dir.path().join(format!("{}.json", id));
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, format!(r#"{{"complete":false,"link":"/data/{}"}}"#, id));

        store.finalize(&id, &JobRecord::failed("exit status: 1")).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, r#"{"error":"exit status: 1"}"#);

        // No temp files left behind.
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_create_overwrites_existing_key() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let id = JobId::new();
        fs::write(dir.path().join(format!("{}.json", id)), b"{\"error\":\"stale and much longer than a pending record\"}").unwrap();

        store.create(&id).unwrap();
        assert_eq!(store.read(&id).unwrap(), JobRecord::pending(id.link()));
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileStore::new(&nested).unwrap();
        store.create(&JobId::new()).unwrap();
        assert!(nested.is_dir());
    }
}
