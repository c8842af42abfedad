use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{StoreError, StudentStore};
use crate::models::{StudentFields, StudentId, StudentRecord};

#[derive(Debug, Clone, Default)]
struct Collection {
    records: HashMap<StudentId, StudentRecord>,
    order: Vec<StudentId>,
}

impl Collection {
    fn from_records(records: Vec<StudentRecord>) -> Self {
        let mut collection = Self::default();
        for record in records {
            if collection.records.contains_key(&record.id) {
                continue;
            }
            collection.order.push(record.id.clone());
            collection.records.insert(record.id.clone(), record);
        }
        collection
    }

    fn ordered(&self) -> Vec<StudentRecord> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect()
    }

    fn find_code(&self, code: &str) -> Option<&StudentRecord> {
        self.records
            .values()
            .find(|record| record.student_code.as_deref() == Some(code))
    }

    /// Student codes are unique; `owner` may keep its own code on update.
    fn check_code(&self, fields: &StudentFields, owner: Option<&StudentId>) -> Result<(), StoreError> {
        let Some(code) = fields.student_code.as_deref() else {
            return Ok(());
        };
        match self.find_code(code) {
            Some(existing) if Some(&existing.id) != owner => {
                Err(StoreError::Rejected(format!("student code {code} already exists")))
            }
            _ => Ok(()),
        }
    }

    fn next_id(&self) -> StudentId {
        loop {
            let id = StudentId::generate();
            if !self.records.contains_key(&id) {
                return id;
            }
        }
    }
}

/// In-process store keyed by id, optionally mirrored to a JSON snapshot file.
///
/// The snapshot is read once on open and rewritten after every successful
/// mutation. A mutation whose snapshot write fails is not applied.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collection: Mutex<Collection>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Storage(format!("reading {}: {e}", path.display())))?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str::<Vec<StudentRecord>>(&raw)
                    .map_err(|e| StoreError::Storage(format!("decoding {}: {e}", path.display())))?
            }
        } else {
            Vec::new()
        };

        tracing::debug!(path = %path.display(), count = records.len(), "opened student snapshot");

        Ok(Self {
            collection: Mutex::new(Collection::from_records(records)),
            snapshot: Some(path),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().map(|collection| collection.order.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collection>, StoreError> {
        self.collection
            .lock()
            .map_err(|_| StoreError::Storage("student collection lock poisoned".to_string()))
    }

    fn commit(&self, current: &mut Collection, next: Collection) -> Result<(), StoreError> {
        if let Some(path) = &self.snapshot {
            write_snapshot(path, &next.ordered())?;
        }
        *current = next;
        Ok(())
    }
}

fn write_snapshot(path: &Path, records: &[StudentRecord]) -> Result<(), StoreError> {
    let body = serde_json::to_string_pretty(records)
        .map_err(|e| StoreError::Storage(format!("encoding snapshot: {e}")))?;

    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);

    std::fs::write(&staging, body)
        .and_then(|_| std::fs::rename(&staging, path))
        .map_err(|e| StoreError::Storage(format!("writing {}: {e}", path.display())))
}

#[async_trait]
impl StudentStore for MemoryStore {
    async fn list(&self) -> Result<Vec<StudentRecord>, StoreError> {
        Ok(self.lock()?.ordered())
    }

    async fn get(&self, id: &StudentId) -> Result<StudentRecord, StoreError> {
        self.lock()?
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<StudentRecord>, StoreError> {
        Ok(self.lock()?.find_code(code).cloned())
    }

    async fn create(&self, fields: StudentFields) -> Result<StudentRecord, StoreError> {
        let mut current = self.lock()?;
        current.check_code(&fields, None)?;
        let record = StudentRecord::from_fields(current.next_id(), fields);

        let mut next = current.clone();
        next.order.push(record.id.clone());
        next.records.insert(record.id.clone(), record.clone());
        self.commit(&mut current, next)?;

        tracing::debug!(id = %record.id, "created student");
        Ok(record)
    }

    async fn update(&self, id: &StudentId, fields: StudentFields) -> Result<StudentRecord, StoreError> {
        let mut current = self.lock()?;
        if !current.records.contains_key(id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        current.check_code(&fields, Some(id))?;

        let record = StudentRecord::from_fields(id.clone(), fields);
        let mut next = current.clone();
        next.records.insert(id.clone(), record.clone());
        self.commit(&mut current, next)?;

        tracing::debug!(%id, "updated student");
        Ok(record)
    }

    async fn delete(&self, id: &StudentId) -> Result<(), StoreError> {
        let mut current = self.lock()?;
        if !current.records.contains_key(id) {
            return Err(StoreError::NotFound(id.clone()));
        }

        let mut next = current.clone();
        next.records.remove(id);
        next.order.retain(|existing| existing != id);
        self.commit(&mut current, next)?;

        tracing::debug!(%id, "deleted student");
        Ok(())
    }
}
