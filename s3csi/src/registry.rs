//! Volumes provisioned by this controller instance.

use std::collections::HashMap;

use libcsi::{Volume, VolumeId};
use parking_lot::Mutex;

/// What the controller remembers about one provisioned volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRecord {
    /// Name the orchestrator asked for.
    pub name: String,
    pub volume: Volume,
    pub bucket: String,
    /// Whether the bucket was created for this volume and should go with it.
    pub owns_bucket: bool,
}

#[derive(Default)]
struct Tables {
    by_id: HashMap<VolumeId, VolumeRecord>,
    by_name: HashMap<String, VolumeId>,
}

/// Owned by the driver and handed to the controller server; request tasks
/// share it through the lock.
#[derive(Default)]
pub struct VolumeRegistry {
    tables: Mutex<Tables>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &VolumeId) -> Option<VolumeRecord> {
        self.tables.lock().by_id.get(id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<VolumeRecord> {
        let tables = self.tables.lock();
        tables
            .by_name
            .get(name)
            .and_then(|id| tables.by_id.get(id))
            .cloned()
    }

    /// Record `record`, replacing any volume with the same id.
    pub fn insert(&self, record: VolumeRecord) {
        let mut tables = self.tables.lock();
        let id = record.volume.volume_id.clone();
        let name = record.name.clone();
        tables.by_name.insert(name.clone(), id.clone());
        if let Some(old) = tables.by_id.insert(id, record)
            && old.name != name
        {
            tables.by_name.remove(&old.name);
        }
    }

    pub fn remove(&self, id: &VolumeId) -> Option<VolumeRecord> {
        let mut tables = self.tables.lock();
        let record = tables.by_id.remove(id)?;
        tables.by_name.remove(&record.name);
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.tables.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
