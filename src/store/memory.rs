use super::{Document, DocumentStore, Fields, MAX_BATCH_WRITES, StoreError, StoreResult, Write};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-local document store. Used in development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, Fields>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the connection; every call fails with `Offline` until reset.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Offline("memory store marked offline".into()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Fields>> {
        // A panic while holding the lock leaves the map intact; keep serving it.
        self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn apply(docs: &mut BTreeMap<String, Fields>, write: Write) {
    match write {
        Write::Set { path, fields, merge: true } => {
            docs.entry(path).or_default().extend(fields);
        }
        Write::Set { path, fields, merge: false } => {
            docs.insert(path, fields);
        }
        Write::Delete { path } => {
            docs.remove(&path);
        }
    }
}

fn is_direct_child(collection: &str, path: &str) -> bool {
    path.strip_prefix(collection)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|id| !id.is_empty() && !id.contains('/'))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Document>> {
        self.check_online()?;
        Ok(self
            .lock()
            .get(path)
            .map(|fields| Document::new(path, fields.clone())))
    }

    async fn list(&self, collection: &str) -> StoreResult<Vec<Document>> {
        self.check_online()?;
        Ok(self
            .lock()
            .iter()
            .filter(|(path, _)| is_direct_child(collection, path))
            .map(|(path, fields)| Document::new(path.clone(), fields.clone()))
            .collect())
    }

    async fn set(&self, path: &str, fields: Fields, merge: bool) -> StoreResult<()> {
        self.check_online()?;
        apply(&mut self.lock(), Write::Set { path: path.to_owned(), fields, merge });
        Ok(())
    }

    async fn create(&self, path: &str, fields: Fields) -> StoreResult<bool> {
        self.check_online()?;
        let mut docs = self.lock();
        if docs.contains_key(path) {
            return Ok(false);
        }
        docs.insert(path.to_owned(), fields);
        Ok(true)
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.check_online()?;
        self.lock().remove(path);
        Ok(())
    }

    async fn commit(&self, writes: Vec<Write>) -> StoreResult<()> {
        self.check_online()?;
        if writes.len() > MAX_BATCH_WRITES {
            return Err(StoreError::BatchTooLarge(writes.len()));
        }
        let mut docs = self.lock();
        for write in writes {
            apply(&mut docs, write);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn merge_replaces_only_given_fields() {
        let store = MemoryStore::new();
        store.set("users/a", fields(json!({"email": "a@x", "name": "A"})), false).await.unwrap();
        store.set("users/a", fields(json!({"name": "B"})), true).await.unwrap();
        let doc = store.get("users/a").await.unwrap().unwrap();
        assert_eq!(doc.fields.get("email"), Some(&json!("a@x")));
        assert_eq!(doc.fields.get("name"), Some(&json!("B")));
    }

    #[tokio::test]
    async fn list_skips_nested_subcollections() {
        let store = MemoryStore::new();
        store.set("users/a", Fields::new(), false).await.unwrap();
        store.set("users/a/picks/1", Fields::new(), false).await.unwrap();
        store.set("usersx/b", Fields::new(), false).await.unwrap();
        let docs = store.list("users").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "a");
        assert_eq!(store.list("users/a/picks").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_reports_existing_documents() {
        let store = MemoryStore::new();
        assert!(store.create("users/a", Fields::new()).await.unwrap());
        assert!(!store.create("users/a", fields(json!({"x": 1}))).await.unwrap());
        let doc = store.get("users/a").await.unwrap().unwrap();
        assert!(doc.fields.is_empty(), "second create must not overwrite");
    }

    #[tokio::test]
    async fn oversized_batches_are_rejected_untouched() {
        let store = MemoryStore::new();
        let writes = (0..=MAX_BATCH_WRITES)
            .map(|i| Write::Set { path: format!("games/{i}"), fields: Fields::new(), merge: false })
            .collect();
        let err = store.commit(writes).await.unwrap_err();
        assert!(matches!(err, StoreError::BatchTooLarge(n) if n == MAX_BATCH_WRITES + 1));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(store.get("users/a").await.unwrap_err().is_offline());
        store.set_offline(false);
        assert!(store.get("users/a").await.unwrap().is_none());
    }
}
