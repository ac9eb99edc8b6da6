//! Record store - where entity records live between events.
//!
//! The classifier never owns records; a worker loads one, classifies an
//! event against it and commits the result with the classifier's directive.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use geotrack_env::EntityId;

use crate::error::StoreError;
use crate::record::{EntityRecord, UpdateDirective};

/// Trait for entity record storage.
///
/// Implementations must be thread-safe. Callers guarantee that a single id
/// is only ever loaded and committed by one worker at a time.
pub trait RecordStore: Send + Sync + 'static {
    /// Returns the stored record, or a blank one for a first message.
    fn load_or_create(&self, id: &EntityId) -> Result<EntityRecord, StoreError>;

    /// Applies a directive: persist, drop the changes, or delete.
    fn commit(&self, id: &EntityId, record: EntityRecord, directive: UpdateDirective) -> Result<(), StoreError>;

    /// Returns the stored record without creating one.
    fn get(&self, id: &EntityId) -> Result<Option<EntityRecord>, StoreError>;

    /// Ids of all stored records, sorted.
    fn ids(&self) -> Result<Vec<EntityId>, StoreError>;
}

/// In-memory store. Records live as long as the process.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<EntityId, EntityRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryRecordStore {
    fn load_or_create(&self, id: &EntityId) -> Result<EntityRecord, StoreError> {
        Ok(self.get(id)?.unwrap_or_default())
    }

    fn commit(&self, id: &EntityId, record: EntityRecord, directive: UpdateDirective) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        match directive {
            UpdateDirective::DoUpdate => {
                records.insert(id.clone(), record);
            }
            UpdateDirective::Remove => {
                records.remove(id);
            }
            UpdateDirective::NoUpdate => {}
        }
        Ok(())
    }

    fn get(&self, id: &EntityId) -> Result<Option<EntityRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    fn ids(&self) -> Result<Vec<EntityId>, StoreError> {
        let mut ids: Vec<EntityId> = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Sled-based persistent store.
///
/// Records are stored as JSON under their id; they never expire.
pub struct SledRecordStore {
    db: sled::Db,
}

impl SledRecordStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Backend(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Create a temporary store that is deleted on drop
    pub fn open_temp() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Backend(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }

    fn decode(id: &str, bytes: &[u8]) -> Result<EntityRecord, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }
}

impl RecordStore for SledRecordStore {
    fn load_or_create(&self, id: &EntityId) -> Result<EntityRecord, StoreError> {
        Ok(self.get(id)?.unwrap_or_default())
    }

    fn commit(&self, id: &EntityId, record: EntityRecord, directive: UpdateDirective) -> Result<(), StoreError> {
        match directive {
            UpdateDirective::DoUpdate => {
                let bytes = serde_json::to_vec(&record).map_err(|e| StoreError::Corrupt {
                    id: id.to_string(),
                    reason: e.to_string(),
                })?;
                self.db
                    .insert(id.as_str(), bytes)
                    .map_err(|e| StoreError::Backend(format!("Insert failed: {}", e)))?;
            }
            UpdateDirective::Remove => {
                self.db
                    .remove(id.as_str())
                    .map_err(|e| StoreError::Backend(format!("Remove failed: {}", e)))?;
            }
            UpdateDirective::NoUpdate => {}
        }
        Ok(())
    }

    fn get(&self, id: &EntityId) -> Result<Option<EntityRecord>, StoreError> {
        let value = self
            .db
            .get(id.as_str())
            .map_err(|e| StoreError::Backend(format!("Read failed: {}", e)))?;
        value.map(|bytes| Self::decode(id.as_str(), &bytes)).transpose()
    }

    fn ids(&self) -> Result<Vec<EntityId>, StoreError> {
        let mut ids = Vec::new();
        for result in self.db.iter().keys() {
            let key = result.map_err(|e| StoreError::Backend(format!("Iteration failed: {}", e)))?;
            ids.push(EntityId::new(String::from_utf8_lossy(&key)));
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;

    fn exercise(store: &dyn RecordStore) {
        let id = EntityId::new("98072");
        assert!(store.get(&id).unwrap().is_none());

        let mut record = store.load_or_create(&id).unwrap();
        assert_eq!(record, EntityRecord::new());
        record.condition = Condition::Minor;
        record.counters.minor_count = 1;
        record.counters.total_incidents = 1;

        store.commit(&id, record.clone(), UpdateDirective::NoUpdate).unwrap();
        assert!(store.get(&id).unwrap().is_none());

        store.commit(&id, record.clone(), UpdateDirective::DoUpdate).unwrap();
        assert_eq!(store.load_or_create(&id).unwrap(), record);
        assert_eq!(store.ids().unwrap(), vec![id.clone()]);

        store.commit(&id, record, UpdateDirective::Remove).unwrap();
        assert!(store.get(&id).unwrap().is_none());
    }

    #[test]
    fn test_memory_store_directives() {
        exercise(&MemoryRecordStore::new());
    }

    #[test]
    fn test_sled_store_directives() {
        exercise(&SledRecordStore::open_temp().unwrap());
    }

    #[test]
    fn test_sled_store_reports_corrupt_records() {
        let store = SledRecordStore::open_temp().unwrap();
        store.db.insert("10122", b"{oops".to_vec()).unwrap();

        let result = store.get(&EntityId::new("10122"));
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }
}
