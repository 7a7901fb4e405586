//! Generic JSON-backed collection manager, generalized from the teacher's
//! single-purpose `DeviceManager` to any [`Record`] type.

use crate::records::Record;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("record not found: {id}")]
    NotFound { id: String },
}

/// A single JSON-file-backed collection of `T`, keyed by `Record::id`.
/// Reads are lock-free against writers at the `RwLock` granularity; writes
/// serialize through `file_lock` and commit write-temp-then-rename so a
/// crash mid-write can never corrupt the prior file.
pub struct RecordStore<T: Record> {
    records: RwLock<HashMap<String, T>>,
    path: PathBuf,
    file_lock: Mutex<()>,
}

impl<T: Record> RecordStore<T> {
    pub fn new(path: PathBuf) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            path,
            file_lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> Result<(), StoreError> {
        if !self.path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| StoreError::Read {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        let items: Vec<T> = serde_json::from_str(&content).map_err(|e| StoreError::Parse {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut records = self.records.write().unwrap();
        *records = items.into_iter().map(|r| (r.id(), r)).collect();
        Ok(())
    }

    fn save(&self) -> Result<(), StoreError> {
        let _guard = self.file_lock.lock().unwrap();
        let records = self.records.read().unwrap();
        let items: Vec<&T> = records.values().collect();
        let content = serde_json::to_string_pretty(&items).expect("records always serialize");
        drop(records);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Write {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content.as_bytes()).map_err(|e| StoreError::Write {
            path: tmp_path.display().to_string(),
            reason: e.to_string(),
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Write {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.records.read().unwrap().get(id).cloned()
    }

    pub fn list(&self) -> Vec<T> {
        self.records.read().unwrap().values().cloned().collect()
    }

    pub fn upsert(&self, record: T) -> Result<(), StoreError> {
        {
            let mut records = self.records.write().unwrap();
            records.insert(record.id(), record);
        }
        self.save()
    }

    pub fn remove(&self, id: &str) -> Result<(), StoreError> {
        let removed = {
            let mut records = self.records.write().unwrap();
            records.remove(id).is_some()
        };
        if !removed {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ControllerFamily, Machine};
    use tempfile::tempdir;

    fn sample(port: &str) -> Machine {
        Machine {
            port: port.to_string(),
            baud_rate: 115_200,
            controller_type: ControllerFamily::Grbl,
            label: "test".to_string(),
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("machines.json"));
        store.upsert(sample("/dev/ttyUSB0")).unwrap();
        assert!(store.get("/dev/ttyUSB0").is_some());
    }

    #[test]
    fn remove_missing_record_errors() {
        let dir = tempdir().unwrap();
        let store: RecordStore<Machine> = RecordStore::new(dir.path().join("machines.json"));
        assert!(store.remove("nope").is_err());
    }

    #[test]
    fn reload_after_save_restores_all_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("machines.json");
        {
            let store = RecordStore::new(path.clone());
            store.upsert(sample("/dev/ttyUSB0")).unwrap();
            store.upsert(sample("/dev/ttyACM0")).unwrap();
        }
        let reloaded: RecordStore<Machine> = RecordStore::new(path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.list().len(), 2);
    }

    #[test]
    fn upsert_replaces_existing_record_with_same_id() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("machines.json"));
        store.upsert(sample("/dev/ttyUSB0")).unwrap();
        let mut updated = sample("/dev/ttyUSB0");
        updated.label = "renamed".to_string();
        store.upsert(updated).unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get("/dev/ttyUSB0").unwrap().label, "renamed");
    }
}
