//! In-process store backend with the same observable semantics as the
//! Postgres/Redis one. Used by the test suites; change notification goes
//! through a broadcast channel instead of Redis pub/sub.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::{matches_filter, DocEvent, DocWatch, Document, DocumentStore, QueryWatch, Watch};

#[derive(Debug, Clone)]
struct Change {
    collection: String,
    id: Uuid,
}

type Collections = HashMap<String, HashMap<Uuid, Document>>;

pub struct MemoryStore {
    inner: Arc<Mutex<Collections>>,
    changes: broadcast::Sender<Change>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            changes,
        }
    }

    fn fetch(inner: &Mutex<Collections>, collection: &str, id: Uuid) -> Option<Document> {
        inner
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|docs| docs.get(&id))
            .cloned()
    }

    fn query(inner: &Mutex<Collections>, collection: &str, filter: &Value) -> Vec<Document> {
        let mut docs: Vec<Document> = inner
            .lock()
            .unwrap()
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|d| matches_filter(&d.data, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        docs.sort_by_key(|d| d.created_at);
        docs
    }

    fn notify(&self, collection: &str, id: Uuid) {
        // No receivers is fine; nobody is watching yet.
        let _ = self.changes.send(Change {
            collection: collection.to_string(),
            id,
        });
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: Uuid) -> anyhow::Result<Option<Document>> {
        Ok(Self::fetch(&self.inner, collection, id))
    }

    async fn list(&self, collection: &str, filter: &Value) -> anyhow::Result<Vec<Document>> {
        Ok(Self::query(&self.inner, collection, filter))
    }

    async fn create(&self, collection: &str, data: Value) -> anyhow::Result<Document> {
        let doc = Document {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            data,
        };
        self.inner
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id, doc.clone());
        self.notify(collection, doc.id);
        Ok(doc)
    }

    async fn merge(
        &self,
        collection: &str,
        id: Uuid,
        patch: Value,
    ) -> anyhow::Result<Option<Document>> {
        let updated = {
            let mut inner = self.inner.lock().unwrap();
            let Some(doc) = inner.get_mut(collection).and_then(|docs| docs.get_mut(&id)) else {
                return Ok(None);
            };
            if let (Value::Object(body), Value::Object(fields)) = (&mut doc.data, patch) {
                for (k, v) in fields {
                    body.insert(k, v);
                }
            }
            doc.clone()
        };
        self.notify(collection, id);
        Ok(Some(updated))
    }

    async fn watch_doc(&self, collection: &str, id: Uuid) -> anyhow::Result<DocWatch> {
        let mut changes = self.changes.subscribe();
        let inner = Arc::clone(&self.inner);
        let collection = collection.to_string();
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            let send_current = |tx: mpsc::Sender<DocEvent>| {
                let event = match Self::fetch(&inner, &collection, id) {
                    Some(doc) => DocEvent::Snapshot(doc),
                    None => DocEvent::NotFound,
                };
                async move { tx.send(event).await }
            };
            if send_current(tx.clone()).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(change) if change.collection == collection && change.id == id => {
                        if send_current(tx.clone()).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    // Missed notifications: the re-fetch still observes the
                    // latest committed state, so just resend.
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if send_current(tx.clone()).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(Watch::new(rx, task))
    }

    async fn watch_matching(&self, collection: &str, filter: Value) -> anyhow::Result<QueryWatch> {
        let mut changes = self.changes.subscribe();
        let inner = Arc::clone(&self.inner);
        let collection = collection.to_string();
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            if tx.send(Self::query(&inner, &collection, &filter)).await.is_err() {
                return;
            }
            loop {
                let hit = match changes.recv().await {
                    Ok(change) => change.collection == collection,
                    Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                if hit && tx.send(Self::query(&inner, &collection, &filter)).await.is_err() {
                    return;
                }
            }
        });

        Ok(Watch::new(rx, task))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::collections;
    use serde_json::json;

    #[tokio::test]
    async fn create_then_read_back() {
        let store = MemoryStore::new();
        let doc = store
            .create(collections::STUDENTS, json!({ "name": "Aziza", "class_id": "c1" }))
            .await
            .unwrap();

        let fetched = store.get(collections::STUDENTS, doc.id).await.unwrap().unwrap();
        assert_eq!(fetched.data["name"], "Aziza");
        assert_eq!(fetched.created_at, doc.created_at);
    }

    #[tokio::test]
    async fn list_applies_containment_filter() {
        let store = MemoryStore::new();
        store
            .create(collections::CLASSES, json!({ "name": "A", "number": 1 }))
            .await
            .unwrap();
        store
            .create(collections::CLASSES, json!({ "name": "B", "number": 2 }))
            .await
            .unwrap();

        let first_grade = store
            .list(collections::CLASSES, &json!({ "number": 1 }))
            .await
            .unwrap();
        assert_eq!(first_grade.len(), 1);
        assert_eq!(first_grade[0].data["name"], "A");
    }

    #[tokio::test]
    async fn watch_doc_emits_initial_then_changes() {
        let store = MemoryStore::new();
        let doc = store
            .create(collections::PICKUP_REQUESTS, json!({ "status": "pending" }))
            .await
            .unwrap();

        let mut watch = store.watch_doc(collections::PICKUP_REQUESTS, doc.id).await.unwrap();
        match watch.next().await.unwrap() {
            DocEvent::Snapshot(d) => assert_eq!(d.data["status"], "pending"),
            DocEvent::NotFound => panic!("expected initial snapshot"),
        }

        store
            .merge(collections::PICKUP_REQUESTS, doc.id, json!({ "status": "approved" }))
            .await
            .unwrap();
        match watch.next().await.unwrap() {
            DocEvent::Snapshot(d) => assert_eq!(d.data["status"], "approved"),
            DocEvent::NotFound => panic!("expected snapshot after merge"),
        }
    }

    #[tokio::test]
    async fn watch_doc_reports_missing_document() {
        let store = MemoryStore::new();
        let mut watch = store
            .watch_doc(collections::PICKUP_REQUESTS, Uuid::new_v4())
            .await
            .unwrap();
        assert!(matches!(watch.next().await, Some(DocEvent::NotFound)));
    }

    #[tokio::test]
    async fn cancelled_watch_stops_delivering() {
        let store = MemoryStore::new();
        let doc = store
            .create(collections::PICKUP_REQUESTS, json!({ "status": "pending" }))
            .await
            .unwrap();

        let mut watch = store.watch_doc(collections::PICKUP_REQUESTS, doc.id).await.unwrap();
        assert!(watch.next().await.is_some());

        watch.cancel();
        watch.cancel(); // idempotent

        store
            .merge(collections::PICKUP_REQUESTS, doc.id, json!({ "status": "approved" }))
            .await
            .unwrap();
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn watch_matching_reevaluates_on_change() {
        let store = MemoryStore::new();
        let mut watch = store
            .watch_matching(
                collections::PICKUP_REQUESTS,
                json!({ "status": "pending", "group_or_class_id": "g1" }),
            )
            .await
            .unwrap();
        assert!(watch.next().await.unwrap().is_empty());

        let doc = store
            .create(
                collections::PICKUP_REQUESTS,
                json!({ "status": "pending", "group_or_class_id": "g1" }),
            )
            .await
            .unwrap();
        assert_eq!(watch.next().await.unwrap().len(), 1);

        store
            .merge(collections::PICKUP_REQUESTS, doc.id, json!({ "status": "approved" }))
            .await
            .unwrap();
        assert!(watch.next().await.unwrap().is_empty());
    }
}
