pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Collection names used by the application.
pub mod collections {
    pub const CLASSES: &str = "classes";
    pub const GROUPS: &str = "groups";
    pub const STUDENTS: &str = "students";
    pub const CHILDREN: &str = "children";
    pub const USERS: &str = "users";
    pub const PICKUP_REQUESTS: &str = "pickup_requests";
}

/// A stored document: server-assigned id and creation timestamp
/// wrapped around an arbitrary JSON body.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub data: Value,
}

impl Document {
    pub fn parse<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// One observation delivered by a single-document subscription.
#[derive(Debug, Clone)]
pub enum DocEvent {
    Snapshot(Document),
    /// The document does not exist (never created, or removed upstream).
    NotFound,
}

/// Live subscription handle. Owns the forwarding task; dropping the
/// handle cancels the subscription, and `cancel` may be called any
/// number of times.
pub struct Watch<T> {
    rx: mpsc::Receiver<T>,
    task: JoinHandle<()>,
}

pub type DocWatch = Watch<DocEvent>;
pub type QueryWatch = Watch<Vec<Document>>;

impl<T> Watch<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Next observation, starting with the current value. Returns `None`
    /// once the subscription is cancelled or the store side stops.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl<T> Drop for Watch<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A real-time document store: durable collections, point reads,
/// filtered queries, and subscriptions that deliver an initial snapshot
/// followed by a live stream of changes until cancelled.
///
/// Filters are JSON containment: a document matches when every
/// key/value pair of the filter object appears in its body.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: Uuid) -> anyhow::Result<Option<Document>>;

    async fn list(&self, collection: &str, filter: &Value) -> anyhow::Result<Vec<Document>>;

    /// Insert with a server-assigned id and timestamp.
    async fn create(&self, collection: &str, data: Value) -> anyhow::Result<Document>;

    /// Shallow field merge. Returns the updated document, or `None` when
    /// the target does not exist. This service only reads pickup
    /// requests after creation; `merge` is the write path used by the
    /// teacher-facing collaborator (and by tests standing in for it).
    async fn merge(&self, collection: &str, id: Uuid, patch: Value)
        -> anyhow::Result<Option<Document>>;

    async fn watch_doc(&self, collection: &str, id: Uuid) -> anyhow::Result<DocWatch>;

    async fn watch_matching(&self, collection: &str, filter: Value)
        -> anyhow::Result<QueryWatch>;

    /// Liveness probe for the health route.
    async fn ping(&self) -> anyhow::Result<()>;
}

/// JSON containment test shared by the in-memory backend (the Postgres
/// backend delegates to the `@>` operator).
pub(crate) fn matches_filter(data: &Value, filter: &Value) -> bool {
    match (data, filter) {
        (Value::Object(doc), Value::Object(want)) => want
            .iter()
            .all(|(k, v)| doc.get(k).is_some_and(|have| have == v)),
        _ => data == filter,
    }
}
