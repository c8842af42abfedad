use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{StoreError, StudentStore};
use crate::models::{StudentFields, StudentId, StudentRecord};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Created(StudentId),
    Updated(StudentId),
    Deleted(StudentId),
}

/// Publishes a [`StoreEvent`] after every successful mutation of the wrapped store.
pub struct ObservedStore {
    inner: Arc<dyn StudentStore>,
    events: broadcast::Sender<StoreEvent>,
}

impl ObservedStore {
    pub fn new(inner: Arc<dyn StudentStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { inner, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl StudentStore for ObservedStore {
    async fn list(&self) -> Result<Vec<StudentRecord>, StoreError> {
        self.inner.list().await
    }

    async fn get(&self, id: &StudentId) -> Result<StudentRecord, StoreError> {
        self.inner.get(id).await
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<StudentRecord>, StoreError> {
        self.inner.get_by_code(code).await
    }

    async fn create(&self, fields: StudentFields) -> Result<StudentRecord, StoreError> {
        let record = self.inner.create(fields).await?;
        self.publish(StoreEvent::Created(record.id.clone()));
        Ok(record)
    }

    async fn update(&self, id: &StudentId, fields: StudentFields) -> Result<StudentRecord, StoreError> {
        let record = self.inner.update(id, fields).await?;
        self.publish(StoreEvent::Updated(record.id.clone()));
        Ok(record)
    }

    async fn delete(&self, id: &StudentId) -> Result<(), StoreError> {
        self.inner.delete(id).await?;
        self.publish(StoreEvent::Deleted(id.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::fields;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn successful_mutations_are_published_in_order() {
        let store = ObservedStore::new(Arc::new(MemoryStore::new()));
        let mut events = store.subscribe();

        let created = store.create(fields("An", 8.0, 8.0, 8.0)).await.unwrap();
        store.update(&created.id, fields("An", 9.0, 9.0, 9.0)).await.unwrap();
        store.delete(&created.id).await.unwrap();

        assert_eq!(events.try_recv().unwrap(), StoreEvent::Created(created.id.clone()));
        assert_eq!(events.try_recv().unwrap(), StoreEvent::Updated(created.id.clone()));
        assert_eq!(events.try_recv().unwrap(), StoreEvent::Deleted(created.id.clone()));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_mutations_publish_nothing() {
        let store = ObservedStore::new(Arc::new(MemoryStore::new()));
        let mut events = store.subscribe();

        let missing = StudentId::new("nope");
        assert!(store.delete(&missing).await.is_err());
        assert!(store.update(&missing, fields("An", 1.0, 1.0, 1.0)).await.is_err());
        assert!(events.try_recv().is_err());
    }
}
