//! Pickup request repository: translates domain operations into store
//! calls. Requests are created by this service and only ever mutated by
//! the teacher-facing application.

use std::collections::HashMap;

use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::PickupError,
    models::{
        request::{PendingEntry, PickupRequest, PickupStatus},
        scope::ScopeRef,
        subject::SubjectRef,
    },
    store::{collections, DocEvent, DocWatch, Document, DocumentStore, QueryWatch},
};

/// One observation of a single watched request.
#[derive(Debug, Clone)]
pub enum RequestUpdate {
    Status {
        status: PickupStatus,
        subject_name: String,
    },
    /// The request document is gone (expired or removed upstream).
    NotFound,
}

/// Live view of one request document. Cancelling (or dropping) stops
/// the underlying subscription.
pub struct RequestWatch {
    inner: DocWatch,
}

impl RequestWatch {
    pub async fn next(&mut self) -> Option<RequestUpdate> {
        loop {
            match self.inner.next().await? {
                DocEvent::Snapshot(doc) => match doc.parse::<PickupRequest>() {
                    Ok(request) => {
                        return Some(RequestUpdate::Status {
                            status: request.status,
                            subject_name: request.subject_name,
                        })
                    }
                    Err(e) => {
                        warn!("Skipping malformed pickup request {}: {e}", doc.id);
                        continue;
                    }
                },
                DocEvent::NotFound => return Some(RequestUpdate::NotFound),
            }
        }
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

/// Live per-scope map of subjects with an outstanding request.
pub struct PendingWatch {
    inner: QueryWatch,
}

impl PendingWatch {
    pub async fn next(&mut self) -> Option<HashMap<Uuid, PendingEntry>> {
        self.inner.next().await.map(|docs| pending_map(&docs))
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

fn pending_map(docs: &[Document]) -> HashMap<Uuid, PendingEntry> {
    let mut map = HashMap::new();
    for doc in docs {
        match doc.parse::<PickupRequest>() {
            Ok(request) => {
                map.insert(
                    request.subject_id,
                    PendingEntry {
                        request_id: doc.id,
                        status: request.status,
                    },
                );
            }
            Err(e) => warn!("Skipping malformed pickup request {}: {e}", doc.id),
        }
    }
    map
}

fn pending_filter(scope_id: Uuid) -> serde_json::Value {
    json!({ "group_or_class_id": scope_id, "status": "pending" })
}

pub struct PickupService;

impl PickupService {
    /// Insert a new pending request with names denormalized from the
    /// subject and scope at this moment. Fails before touching the store
    /// when the scope has no teacher; store failures surface as
    /// `Creation` and are never retried here.
    pub async fn create(
        store: &dyn DocumentStore,
        subject: &SubjectRef,
        scope: &ScopeRef,
    ) -> Result<Document, PickupError> {
        let Some(teacher_id) = scope.teacher_id else {
            return Err(PickupError::MissingTeacher);
        };

        let request = PickupRequest {
            subject_id: subject.id,
            subject_name: subject.display_name.clone(),
            group_or_class_id: scope.id,
            group_or_class_name: scope.name.clone(),
            teacher_id,
            status: PickupStatus::Pending,
            kind: scope.kind,
            parent_notification: "waiting".to_string(),
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| PickupError::Creation(e.into()))?;

        store
            .create(collections::PICKUP_REQUESTS, body)
            .await
            .map_err(PickupError::Creation)
    }

    pub async fn get(
        store: &dyn DocumentStore,
        id: Uuid,
    ) -> anyhow::Result<Option<(Document, PickupRequest)>> {
        let Some(doc) = store.get(collections::PICKUP_REQUESTS, id).await? else {
            return Ok(None);
        };
        let request = doc.parse()?;
        Ok(Some((doc, request)))
    }

    pub async fn watch_request(
        store: &dyn DocumentStore,
        id: Uuid,
    ) -> Result<RequestWatch, PickupError> {
        let inner = store
            .watch_doc(collections::PICKUP_REQUESTS, id)
            .await
            .map_err(PickupError::Subscription)?;
        Ok(RequestWatch { inner })
    }

    /// Snapshot of the subjects with an outstanding request in a scope.
    pub async fn pending_for_scope(
        store: &dyn DocumentStore,
        scope_id: Uuid,
    ) -> anyhow::Result<HashMap<Uuid, PendingEntry>> {
        let docs = store
            .list(collections::PICKUP_REQUESTS, &pending_filter(scope_id))
            .await?;
        Ok(pending_map(&docs))
    }

    /// Same mapping, but live: one emission per observed change.
    pub async fn watch_pending_for_scope(
        store: &dyn DocumentStore,
        scope_id: Uuid,
    ) -> Result<PendingWatch, PickupError> {
        let inner = store
            .watch_matching(collections::PICKUP_REQUESTS, pending_filter(scope_id))
            .await
            .map_err(PickupError::Subscription)?;
        Ok(PendingWatch { inner })
    }
}
