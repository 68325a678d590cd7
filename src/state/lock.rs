//! Per-item mutual exclusion.
//!
//! A work item's record must be touched by at most one worker at a time.
//! File-backed stores take an exclusive `fs2` lock on a sidecar file so two
//! processes exclude each other too; the in-memory store keeps a set of held
//! identifiers. Either way the lock is released when the guard drops.

use fs2::FileExt;
use std::collections::HashSet;
use std::fs::File;
use std::sync::{Arc, Mutex};

pub struct ItemLock {
    id: String,
    held: Held,
}

enum Held {
    File(File),
    Memory(Arc<Mutex<HashSet<String>>>),
}

impl ItemLock {
    /// Try to take an exclusive lock on an already-open lock file.
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub fn try_file(id: &str, file: File) -> std::io::Result<Option<Self>> {
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                id: id.to_string(),
                held: Held::File(file),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Try to claim `id` in an in-process set. Returns `None` if already held.
    pub fn try_memory(id: &str, set: &Arc<Mutex<HashSet<String>>>) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !guard.insert(id.to_string()) {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            held: Held::Memory(Arc::clone(set)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for ItemLock {
    fn drop(&mut self) {
        match &self.held {
            Held::File(file) => {
                if let Err(e) = FileExt::unlock(file) {
                    tracing::warn!(item = %self.id, error = %e, "failed to release item lock");
                }
            }
            Held::Memory(set) => {
                let mut guard = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.remove(&self.id);
            }
        }
    }
}

impl std::fmt::Debug for ItemLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemLock").field("id", &self.id).finish()
    }
}
