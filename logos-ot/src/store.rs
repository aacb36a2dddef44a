//! Durable field store interface.
//!
//! The engine only ever writes resolved field text. Reads happen elsewhere:
//! the UI layer provides initial text when a field is first touched.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::operation::{FieldKey, FieldKind};

/// Storage errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Best-effort async writer of field text.
pub trait FieldStore: Send + Sync {
    fn persist_field(
        &self,
        presentation_id: Uuid,
        slide_id: String,
        field: FieldKind,
        content_index: Option<u32>,
        text: String,
    ) -> BoxFuture<'static, Result<(), StoreError>>;
}

/// A write seen by [`MemoryFieldStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedWrite {
    pub presentation_id: Uuid,
    pub key: FieldKey,
    pub text: String,
}

/// In-memory store that records every write in order.
#[derive(Debug, Clone, Default)]
pub struct MemoryFieldStore {
    writes: Arc<Mutex<Vec<PersistedWrite>>>,
}

impl MemoryFieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn writes(&self) -> Vec<PersistedWrite> {
        self.writes.lock().await.clone()
    }

    pub async fn write_count(&self) -> usize {
        self.writes.lock().await.len()
    }

    /// Most recent text written for `key`.
    pub async fn latest(&self, key: &FieldKey) -> Option<String> {
        self.writes
            .lock()
            .await
            .iter()
            .rev()
            .find(|w| &w.key == key)
            .map(|w| w.text.clone())
    }
}

impl FieldStore for MemoryFieldStore {
    fn persist_field(
        &self,
        presentation_id: Uuid,
        slide_id: String,
        field: FieldKind,
        content_index: Option<u32>,
        text: String,
    ) -> BoxFuture<'static, Result<(), StoreError>> {
        let writes = self.writes.clone();
        Box::pin(async move {
            let key = FieldKey {
                slide_id,
                field,
                content_index,
            };
            writes.lock().await.push(PersistedWrite {
                presentation_id,
                key,
                text,
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_records_writes() {
        let store = MemoryFieldStore::new();
        let doc = Uuid::new_v4();
        let key = FieldKey::content_item("slide-1", 2);

        store
            .persist_field(doc, "slide-1".into(), FieldKind::Content, Some(2), "one".into())
            .await
            .unwrap();
        store
            .persist_field(doc, "slide-1".into(), FieldKind::Content, Some(2), "two".into())
            .await
            .unwrap();

        assert_eq!(store.write_count().await, 2);
        assert_eq!(store.latest(&key).await.as_deref(), Some("two"));
        assert_eq!(store.writes().await[0].presentation_id, doc);
    }

    #[tokio::test]
    async fn test_latest_unknown_key() {
        let store = MemoryFieldStore::new();
        let key = FieldKey::new("slide-9", FieldKind::Title);
        assert!(store.latest(&key).await.is_none());
    }
}
