//! File-backed store.
//!
//! Layout under the base directory:
//!
//! ```text
//! definitions/<id>.json
//! instances/<id>.json
//! ```
//!
//! Every write goes to a uniquely named temporary file in the same directory
//! which is synced and then renamed over the target, so readers only ever
//! observe a complete document.

use crate::error::StorageError;
use dashmap::DashMap;
use parking_lot::Mutex;
use stepflow_core::{Definition, Instance, SaveOutcome, Store, StoreError};
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFINITIONS_DIR: &str = "definitions";
const INSTANCES_DIR: &str = "instances";

/// Durable [`Store`] keeping one JSON file per record.
pub struct FileStore {
    dir: PathBuf,

    /// Per-instance write locks. The version compare and the rename happen
    /// under the lock for that id. Entries live only while a save holds them.
    locks: DashMap<String, Arc<Mutex<()>>>,

    /// Serializes definition writes and the create-if-absent check.
    definitions_lock: Mutex<()>,
}

impl FileStore {
    /// Opens or creates a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join(DEFINITIONS_DIR))?;
        fs::create_dir_all(dir.join(INSTANCES_DIR))?;

        tracing::debug!(dir = %dir.display(), "file store opened");

        Ok(Self {
            dir,
            locks: DashMap::new(),
            definitions_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn definition_path(&self, id: &str) -> Option<PathBuf> {
        record_path(&self.dir.join(DEFINITIONS_DIR), id)
    }

    fn instance_path(&self, id: &str) -> Option<PathBuf> {
        record_path(&self.dir.join(INSTANCES_DIR), id)
    }

    fn instance_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the lock entry for `id` once no caller holds it.
    fn release_instance_lock(&self, id: &str) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn compare_and_write(
        &self,
        path: &Path,
        instance: &Instance,
        expected_version: u64,
    ) -> Result<SaveOutcome, StoreError> {
        let actual = read_json::<Instance>(path)?.map(|stored| stored.version);
        let matches = match actual {
            Some(version) => version == expected_version,
            None => expected_version == 0,
        };
        if !matches {
            return Ok(SaveOutcome::Conflict { actual });
        }

        write_json_atomic(path, instance)?;
        Ok(SaveOutcome::Saved)
    }
}

/// Maps a record id to its file. Ids that could escape the directory or
/// collide with temporary files have no path.
fn record_path(dir: &Path, id: &str) -> Option<PathBuf> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then(|| dir.join(format!("{}.json", id)))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| StorageError::Corruption(format!("{}: {}", path.display(), e)))?;
    Ok(Some(value))
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let data = serde_json::to_vec_pretty(value)?;
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::Corruption(format!("no parent: {}", path.display())))?;
    let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));

    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

impl Store for FileStore {
    fn load_definition(&self, id: &str) -> Result<Option<Definition>, StoreError> {
        match self.definition_path(id) {
            Some(path) => Ok(read_json(&path)?),
            None => Ok(None),
        }
    }

    fn load_all_definitions(&self) -> Result<Vec<Definition>, StoreError> {
        let mut definitions = Vec::new();
        for entry in fs::read_dir(self.dir.join(DEFINITIONS_DIR))? {
            let path = entry?.path();
            let is_record = path.extension().map(|e| e == "json").unwrap_or(false)
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(true);
            if !is_record {
                continue;
            }
            if let Some(definition) = read_json(&path)? {
                definitions.push(definition);
            }
        }
        Ok(definitions)
    }

    fn save_definition(&self, definition: &Definition) -> Result<(), StoreError> {
        let path = self.definition_path(&definition.id).ok_or_else(|| {
            StoreError::Backend(format!("invalid definition id: {:?}", definition.id))
        })?;
        let _guard = self.definitions_lock.lock();
        write_json_atomic(&path, definition)?;
        Ok(())
    }

    fn insert_definition(
        &self,
        definition: &Definition,
    ) -> Result<Option<Definition>, StoreError> {
        let path = self.definition_path(&definition.id).ok_or_else(|| {
            StoreError::Backend(format!("invalid definition id: {:?}", definition.id))
        })?;
        let _guard = self.definitions_lock.lock();
        if let Some(existing) = read_json(&path)? {
            return Ok(Some(existing));
        }
        write_json_atomic(&path, definition)?;
        Ok(None)
    }

    fn load_instance(&self, id: &str) -> Result<Option<Instance>, StoreError> {
        match self.instance_path(id) {
            Some(path) => Ok(read_json(&path)?),
            None => Ok(None),
        }
    }

    fn save_instance_if_version_matches(
        &self,
        instance: &Instance,
        expected_version: u64,
    ) -> Result<SaveOutcome, StoreError> {
        let path = self.instance_path(&instance.id).ok_or_else(|| {
            StoreError::Backend(format!("invalid instance id: {:?}", instance.id))
        })?;

        let outcome = {
            let lock = self.instance_lock(&instance.id);
            let _guard = lock.lock();
            self.compare_and_write(&path, instance, expected_version)
        };
        self.release_instance_lock(&instance.id);
        outcome
    }
}
