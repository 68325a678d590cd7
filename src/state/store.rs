use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{ItemLock, WorkflowState};
use crate::errors::PersistenceError;

/// Durable keyed storage for workflow state.
///
/// `save` must be all-or-nothing: after a crash the store holds either the
/// previous record or the new one, never a torn write.
pub trait StateStore: Send + Sync {
    fn load(&self, id: &str) -> Result<Option<WorkflowState>, PersistenceError>;

    fn save(&self, state: &WorkflowState) -> Result<(), PersistenceError>;

    /// Delete an item's record. Returns whether one existed.
    fn remove(&self, id: &str) -> Result<bool, PersistenceError>;

    /// Every readable record, ordered by item id.
    fn list(&self) -> Result<Vec<WorkflowState>, PersistenceError>;

    /// Claim exclusive access to an item. `None` if someone else holds it.
    fn lock(&self, id: &str) -> Result<Option<ItemLock>, PersistenceError>;
}

/// One pretty-printed JSON file per work item under a state directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `id`.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(id)))
    }

    fn lock_path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", file_stem(id)))
    }

    fn ensure_dir(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(|source| PersistenceError::Io {
            path: self.dir.clone(),
            source,
        })
    }

    fn read(&self, path: &Path) -> Result<WorkflowState, PersistenceError> {
        let content = fs::read_to_string(path).map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|e| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

impl StateStore for JsonFileStore {
    fn load(&self, id: &str) -> Result<Option<WorkflowState>, PersistenceError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let state = self.read(&path)?;
        if state.item.id != id {
            return Err(PersistenceError::Corrupt {
                path,
                message: format!("record belongs to '{}', not '{}'", state.item.id, id),
            });
        }
        Ok(Some(state))
    }

    fn save(&self, state: &WorkflowState) -> Result<(), PersistenceError> {
        self.ensure_dir()?;
        let path = self.path_for(&state.item.id);
        let json =
            serde_json::to_string_pretty(state).map_err(|source| PersistenceError::Serialize {
                id: state.item.id.clone(),
                source,
            })?;

        let io_err = |source| PersistenceError::Io {
            path: path.clone(),
            source,
        };

        // Write beside the target, flush to disk, then rename over it.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;

        #[cfg(unix)]
        if let Ok(dir) = fs::File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        tracing::trace!(item = %state.item.id, path = %path.display(), "state saved");
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, PersistenceError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(false);
        }
        // Unparseable records may still be deleted; readable ones must match.
        if let Ok(state) = self.read(&path)
            && state.item.id != id
        {
            return Err(PersistenceError::Corrupt {
                path,
                message: format!("record belongs to '{}', not '{}'", state.item.id, id),
            });
        }
        fs::remove_file(&path).map_err(|source| PersistenceError::Io { path, source })?;
        let lock_path = self.lock_path_for(id);
        if lock_path.exists() {
            let _ = fs::remove_file(lock_path);
        }
        Ok(true)
    }

    fn list(&self) -> Result<Vec<WorkflowState>, PersistenceError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|source| PersistenceError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut states: Vec<WorkflowState> = Vec::new();
        for path in entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
        {
            match self.read(&path) {
                Ok(state) => states.push(state),
                Err(e) if e.is_item_scoped() => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable state file");
                }
                Err(e) => return Err(e),
            }
        }
        states.sort_by(|a, b| a.item.id.cmp(&b.item.id));
        Ok(states)
    }

    fn lock(&self, id: &str) -> Result<Option<ItemLock>, PersistenceError> {
        self.ensure_dir()?;
        let path = self.lock_path_for(id);
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })?;
        ItemLock::try_file(id, file).map_err(|source| PersistenceError::Io { path, source })
    }
}

/// Map an item id onto a file name. Percent-encoding keeps distinct ids distinct.
fn file_stem(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

/// In-process store holding serialized snapshots. Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStateStore {
    records: Mutex<BTreeMap<String, String>>,
    locks: Arc<Mutex<HashSet<String>>>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, id: &str) -> Result<Option<WorkflowState>, PersistenceError> {
        let records = self
            .records
            .lock()
            .map_err(|_| PersistenceError::LockPoisoned)?;
        records
            .get(id)
            .map(|json| {
                serde_json::from_str(json).map_err(|e| PersistenceError::Corrupt {
                    path: PathBuf::from(id),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    fn save(&self, state: &WorkflowState) -> Result<(), PersistenceError> {
        let json =
            serde_json::to_string(state).map_err(|source| PersistenceError::Serialize {
                id: state.item.id.clone(),
                source,
            })?;
        self.records
            .lock()
            .map_err(|_| PersistenceError::LockPoisoned)?
            .insert(state.item.id.clone(), json);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, PersistenceError> {
        Ok(self
            .records
            .lock()
            .map_err(|_| PersistenceError::LockPoisoned)?
            .remove(id)
            .is_some())
    }

    fn list(&self) -> Result<Vec<WorkflowState>, PersistenceError> {
        let ids: Vec<String> = self
            .records
            .lock()
            .map_err(|_| PersistenceError::LockPoisoned)?
            .keys()
            .cloned()
            .collect();
        let mut states = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(state) = self.load(&id)? {
                states.push(state);
            }
        }
        Ok(states)
    }

    fn lock(&self, id: &str) -> Result<Option<ItemLock>, PersistenceError> {
        Ok(ItemLock::try_memory(id, &self.locks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::WorkItem;
    use crate::workflow::testing::NoopStep;
    use crate::workflow::{StepSpec, WorkflowDefinition};
    use serde_json::json;
    use tempfile::tempdir;

    fn make_state(id: &str) -> WorkflowState {
        let steps: Vec<std::sync::Arc<dyn StepSpec>> = vec![
            std::sync::Arc::new(NoopStep::new("fetch-tenant")),
            std::sync::Arc::new(NoopStep::new("merge-tenant")),
        ];
        let workflow = WorkflowDefinition::new(steps).unwrap();
        WorkflowState::new(WorkItem::new(id, "USA POC"), &workflow)
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state"));
        assert!(store.load("OPS-1").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state"));
        let mut state = make_state("OPS-1");
        state.complete(0, json!({"id": "t-1"})).unwrap();

        store.save(&state).unwrap();
        let loaded = store.load("OPS-1").unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mut state = make_state("OPS-1");
        store.save(&state).unwrap();
        state.complete(0, json!(null)).unwrap();
        store.save(&state).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["OPS-1.json".to_string()]);
    }

    #[test]
    fn test_recovery_after_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state");
        {
            let store = JsonFileStore::new(&path);
            let mut state = make_state("OPS-7");
            state.complete(0, json!({"tenant": "acme"})).unwrap();
            store.save(&state).unwrap();
        }
        {
            let store = JsonFileStore::new(&path);
            let state = store.load("OPS-7").unwrap().unwrap();
            assert_eq!(state.resume_point(), Some(1));
            assert_eq!(state.steps[0].result, Some(json!({"tenant": "acme"})));
        }
    }

    #[test]
    fn test_corrupt_file_is_item_scoped() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        fs::write(store.path_for("OPS-2"), "{ not json").unwrap();
        let err = store.load("OPS-2").unwrap_err();
        assert!(err.is_item_scoped());

        store.save(&make_state("OPS-3")).unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].item.id, "OPS-3");
    }

    #[test]
    fn test_file_stem_encodes_ids() {
        assert_eq!(file_stem("OPS-123"), "OPS-123");
        assert_eq!(file_stem("team/OPS 1"), "team%2FOPS%201");
        assert_ne!(file_stem("ACME/1"), file_stem("ACME_1"));
        assert_ne!(file_stem("ACME%2F1"), file_stem("ACME/1"));
    }

    #[test]
    fn test_similar_ids_do_not_share_records_or_locks() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mut slashed = make_state("ACME/1");
        slashed.complete(0, json!({"tenant": "acme"})).unwrap();
        store.save(&slashed).unwrap();

        assert!(store.load("ACME_1").unwrap().is_none());
        store.save(&make_state("ACME_1")).unwrap();
        assert_eq!(store.load("ACME/1").unwrap().unwrap(), slashed);

        let held = store.lock("ACME/1").unwrap();
        assert!(held.is_some());
        assert!(store.lock("ACME_1").unwrap().is_some());

        assert!(store.remove("ACME_1").unwrap());
        assert_eq!(store.load("ACME/1").unwrap().unwrap(), slashed);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_refuses_record_of_another_item() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.save(&make_state("OPS-1")).unwrap();
        fs::rename(store.path_for("OPS-1"), store.path_for("OPS-2")).unwrap();

        let err = store.remove("OPS-2").unwrap_err();
        assert!(err.is_item_scoped());
        assert!(store.path_for("OPS-2").exists());
    }

    #[test]
    fn test_remove_deletes_record() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.save(&make_state("OPS-1")).unwrap();
        assert!(store.remove("OPS-1").unwrap());
        assert!(!store.remove("OPS-1").unwrap());
        assert!(store.load("OPS-1").unwrap().is_none());
    }

    #[test]
    fn test_file_lock_excludes_second_holder() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let held = store.lock("OPS-1").unwrap();
        assert!(held.is_some());
        assert!(store.lock("OPS-1").unwrap().is_none());
        drop(held);
        assert!(store.lock("OPS-1").unwrap().is_some());
    }

    #[test]
    fn test_memory_store_counts_saves() {
        let store = MemoryStateStore::new();
        let state = make_state("OPS-1");
        store.save(&state).unwrap();
        store.save(&state).unwrap();
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load("OPS-1").unwrap().unwrap(), state);
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
