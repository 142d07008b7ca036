//! Pickup lifecycle controller. Owns the per-subject state machine:
//!
//! idle (absent) -> requesting -> pending -> approved_grace -> idle
//!                                        \-> idle (rejected / removed)
//!
//! All transitions happen inside event handlers under one mutex that is
//! never held across an await, so per-subject transitions are atomic
//! with respect to each other. Each outstanding request gets exactly one
//! watcher task; the watcher reacts to the first terminal status it
//! observes and then ends, which drops and cancels the subscription.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::PickupError,
    models::{
        request::{PickupNotice, PickupStatus},
        scope::ScopeRef,
        subject::SubjectRef,
    },
    services::{
        metrics,
        pickups::{PickupService, RequestUpdate},
    },
    store::DocumentStore,
};

enum SubjectState {
    /// Create call in flight. Reserves the subject so a second submit
    /// cannot race the first one into a duplicate request.
    Requesting,
    Pending {
        request_id: Uuid,
        watcher: JoinHandle<()>,
    },
    ApprovedGrace {
        until: Instant,
    },
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    subjects: Mutex<HashMap<Uuid, SubjectState>>,
    notices: broadcast::Sender<PickupNotice>,
    grace: Duration,
}

/// Cheap-to-clone handle; all clones share one state store.
#[derive(Clone)]
pub struct PickupLifecycle {
    inner: Arc<Inner>,
}

impl PickupLifecycle {
    pub fn new(store: Arc<dyn DocumentStore>, grace: Duration) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                store,
                subjects: Mutex::new(HashMap::new()),
                notices,
                grace,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    /// Terminal-status notices (the toast feed).
    pub fn subscribe_notices(&self) -> broadcast::Receiver<PickupNotice> {
        self.inner.notices.subscribe()
    }

    /// Create a pickup request for a subject, unless one is already
    /// outstanding or the subject is still inside the grace window.
    pub async fn request_pickup(
        &self,
        subject: &SubjectRef,
        scope: &ScopeRef,
    ) -> Result<Uuid, PickupError> {
        {
            let mut subjects = self.inner.subjects.lock().unwrap();
            match subjects.get(&subject.id) {
                Some(SubjectState::Requesting) | Some(SubjectState::Pending { .. }) => {
                    return Err(PickupError::AlreadyRequested);
                }
                Some(SubjectState::ApprovedGrace { until }) => {
                    let now = Instant::now();
                    if *until > now {
                        return Err(PickupError::InGraceWindow {
                            remaining: *until - now,
                        });
                    }
                    // Expired but not yet swept.
                    subjects.remove(&subject.id);
                }
                None => {}
            }
            if scope.teacher_id.is_none() {
                // No store call is made in this case.
                return Err(PickupError::MissingTeacher);
            }
            subjects.insert(subject.id, SubjectState::Requesting);
        }

        let created = match PickupService::create(self.inner.store.as_ref(), subject, scope).await
        {
            Ok(doc) => doc,
            Err(e) => {
                self.inner.subjects.lock().unwrap().remove(&subject.id);
                return Err(e);
            }
        };
        let request_id = created.id;
        info!(
            "Pickup requested: subject={} scope={} request={}",
            subject.id, scope.id, request_id
        );
        metrics::PICKUPS_CREATED
            .with_label_values(&[scope.kind.as_str()])
            .inc();

        let watcher = tokio::spawn(run_watcher(
            Arc::clone(&self.inner),
            subject.id,
            request_id,
        ));
        {
            let mut subjects = self.inner.subjects.lock().unwrap();
            if matches!(subjects.get(&subject.id), Some(SubjectState::Requesting)) {
                subjects.insert(subject.id, SubjectState::Pending { request_id, watcher });
            } else {
                // The reservation is gone: either the watcher already
                // observed a terminal status and did its work under this
                // lock, or a concurrent shutdown drained the map while
                // the create was in flight. Either way nothing tracks
                // this watcher anymore, so it must not keep running.
                watcher.abort();
            }
        }

        Ok(request_id)
    }

    /// Evict grace entries whose window has elapsed. Called by the
    /// background sweep; expired entries also yield to a new request
    /// before the sweep reaches them.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let mut subjects = self.inner.subjects.lock().unwrap();
        let before = subjects.len();
        subjects.retain(
            |_, state| !matches!(state, SubjectState::ApprovedGrace { until } if *until <= now),
        );
        let evicted = before - subjects.len();
        if evicted > 0 {
            debug!("Grace sweep evicted {evicted} subject(s)");
        }
        update_grace_gauge(&subjects);
    }

    /// Abort every outstanding watcher. Teardown leg of the cancellation
    /// contract; terminal transitions cover the other.
    pub fn shutdown(&self) {
        let mut subjects = self.inner.subjects.lock().unwrap();
        for (_, state) in subjects.drain() {
            if let SubjectState::Pending { watcher, .. } = state {
                watcher.abort();
            }
        }
    }
}

/// One task per outstanding request. Ends on the first terminal
/// observation; returning drops the watch, which cancels the store
/// subscription.
async fn run_watcher(inner: Arc<Inner>, subject_id: Uuid, request_id: Uuid) {
    let mut watch = match PickupService::watch_request(inner.store.as_ref(), request_id).await {
        Ok(watch) => watch,
        Err(e) => {
            // Broken subscription: the subject keeps its last known
            // state rather than crashing anything.
            warn!("Pickup watch for request {request_id} failed: {e:#}");
            return;
        }
    };

    while let Some(update) = watch.next().await {
        match update {
            RequestUpdate::Status {
                status,
                subject_name,
            } if status.is_terminal() => {
                // State change, metrics and notice happen under one lock
                // acquisition; whoever observes the new state can rely on
                // the side effects having gone out already.
                {
                    let mut subjects = inner.subjects.lock().unwrap();
                    if status == PickupStatus::Approved {
                        let until = Instant::now() + inner.grace;
                        subjects.insert(subject_id, SubjectState::ApprovedGrace { until });
                    } else {
                        subjects.remove(&subject_id);
                    }
                    update_grace_gauge(&subjects);
                    metrics::PICKUPS_RESOLVED
                        .with_label_values(&[status.as_str()])
                        .inc();
                    let _ = inner.notices.send(PickupNotice {
                        request_id,
                        subject_id,
                        subject_name,
                        status,
                    });
                }
                info!(
                    "Pickup {}: subject={subject_id} request={request_id}",
                    status.as_str()
                );
                return;
            }
            RequestUpdate::Status { .. } => {
                // Still pending; a teacher may take arbitrarily long.
            }
            RequestUpdate::NotFound => {
                debug!("Pickup request {request_id} removed upstream");
                inner.subjects.lock().unwrap().remove(&subject_id);
                return;
            }
        }
    }
}

fn update_grace_gauge(subjects: &HashMap<Uuid, SubjectState>) {
    let in_grace = subjects
        .values()
        .filter(|s| matches!(s, SubjectState::ApprovedGrace { .. }))
        .count();
    metrics::GRACE_SUBJECTS.set(in_grace as f64);
}

/// Fixed-interval background sweep over the grace map.
pub fn start_sweeper(lifecycle: PickupLifecycle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.tick().await; // completes immediately
        loop {
            tick.tick().await;
            lifecycle.sweep_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::PickupKind;
    use crate::store::{collections, memory::MemoryStore, DocWatch, Document, QueryWatch};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    const GRACE: Duration = Duration::from_secs(600);

    fn setup() -> (PickupLifecycle, SubjectRef, ScopeRef) {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let lifecycle = PickupLifecycle::new(store, GRACE);
        let subject = SubjectRef {
            id: Uuid::new_v4(),
            display_name: "Madina Yusupova".to_string(),
        };
        let scope = ScopeRef {
            id: Uuid::new_v4(),
            name: "Quyoshcha".to_string(),
            kind: PickupKind::Kindergarten,
            teacher_id: Some(Uuid::new_v4()),
        };
        (lifecycle, subject, scope)
    }

    async fn created_requests(lifecycle: &PickupLifecycle) -> usize {
        lifecycle
            .store()
            .list(collections::PICKUP_REQUESTS, &json!({}))
            .await
            .unwrap()
            .len()
    }

    async fn resolve(lifecycle: &PickupLifecycle, request_id: Uuid, status: &str) {
        lifecycle
            .store()
            .merge(collections::PICKUP_REQUESTS, request_id, json!({ "status": status }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn double_submit_creates_exactly_one_request() {
        let (lifecycle, subject, scope) = setup();

        let first = lifecycle.request_pickup(&subject, &scope).await;
        assert!(first.is_ok());

        let second = lifecycle.request_pickup(&subject, &scope).await;
        assert!(matches!(second, Err(PickupError::AlreadyRequested)));

        assert_eq!(created_requests(&lifecycle).await, 1);
    }

    #[tokio::test]
    async fn simultaneous_submits_create_exactly_one_request() {
        let (lifecycle, subject, scope) = setup();

        let (a, b) = tokio::join!(
            lifecycle.request_pickup(&subject, &scope),
            lifecycle.request_pickup(&subject, &scope),
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(created_requests(&lifecycle).await, 1);
    }

    #[tokio::test]
    async fn missing_teacher_fails_without_store_write_or_stuck_state() {
        let (lifecycle, subject, mut scope) = setup();
        scope.teacher_id = None;

        let err = lifecycle.request_pickup(&subject, &scope).await.unwrap_err();
        assert!(matches!(err, PickupError::MissingTeacher));
        assert_eq!(created_requests(&lifecycle).await, 0);

        // The refusal must not leave a reservation behind.
        scope.teacher_id = Some(Uuid::new_v4());
        assert!(lifecycle.request_pickup(&subject, &scope).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn approval_enters_grace_and_stops_watching() {
        let (lifecycle, subject, scope) = setup();
        let mut notices = lifecycle.subscribe_notices();

        let request_id = lifecycle.request_pickup(&subject, &scope).await.unwrap();
        resolve(&lifecycle, request_id, "approved").await;

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.request_id, request_id);
        assert_eq!(notice.status, PickupStatus::Approved);
        assert_eq!(notice.subject_name, "Madina Yusupova");

        // Grace window blocks a repeat request for the full 10 minutes.
        match lifecycle.request_pickup(&subject, &scope).await {
            Err(PickupError::InGraceWindow { remaining }) => {
                assert!(remaining <= GRACE);
                assert!(remaining > GRACE - Duration::from_secs(1));
            }
            other => panic!("expected grace refusal, got {other:?}"),
        }

        // The controller reacted to the first terminal status only: an
        // out-of-band flip back to pending changes nothing.
        resolve(&lifecycle, request_id, "pending").await;
        tokio::task::yield_now().await;
        assert!(matches!(
            lifecycle.request_pickup(&subject, &scope).await,
            Err(PickupError::InGraceWindow { .. })
        ));
        assert_eq!(created_requests(&lifecycle).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_returns_subject_to_idle() {
        let (lifecycle, subject, scope) = setup();
        let mut notices = lifecycle.subscribe_notices();

        let request_id = lifecycle.request_pickup(&subject, &scope).await.unwrap();
        resolve(&lifecycle, request_id, "rejected").await;

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.status, PickupStatus::Rejected);

        // Idle again: a fresh request goes through immediately.
        let second = lifecycle.request_pickup(&subject, &scope).await.unwrap();
        assert_ne!(second, request_id);
        assert_eq!(created_requests(&lifecycle).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_expired_grace_entries() {
        let (lifecycle, subject, scope) = setup();
        let mut notices = lifecycle.subscribe_notices();

        let request_id = lifecycle.request_pickup(&subject, &scope).await.unwrap();
        resolve(&lifecycle, request_id, "approved").await;
        notices.recv().await.unwrap();

        // 9 minutes in: still inside the window, the sweep must not evict.
        tokio::time::advance(Duration::from_secs(9 * 60)).await;
        lifecycle.sweep_expired();
        assert!(matches!(
            lifecycle.request_pickup(&subject, &scope).await,
            Err(PickupError::InGraceWindow { .. })
        ));

        // Past the window: evicted, subject back to idle.
        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        lifecycle.sweep_expired();
        assert!(lifecycle.request_pickup(&subject, &scope).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_ticks_on_interval() {
        let (lifecycle, subject, scope) = setup();
        let mut notices = lifecycle.subscribe_notices();

        let request_id = lifecycle.request_pickup(&subject, &scope).await.unwrap();
        resolve(&lifecycle, request_id, "approved").await;
        notices.recv().await.unwrap();

        let sweeper = start_sweeper(lifecycle.clone(), Duration::from_secs(60));

        // The window expires between two ticks; eviction happens at the
        // next tick, not before.
        tokio::time::advance(GRACE + Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert!(lifecycle.request_pickup(&subject, &scope).await.is_ok());

        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn expired_grace_yields_to_new_request_before_sweep() {
        let (lifecycle, subject, scope) = setup();
        let mut notices = lifecycle.subscribe_notices();

        let request_id = lifecycle.request_pickup(&subject, &scope).await.unwrap();
        resolve(&lifecycle, request_id, "approved").await;
        notices.recv().await.unwrap();

        tokio::time::advance(GRACE + Duration::from_secs(1)).await;
        // No sweep has run, but the window is over.
        assert!(lifecycle.request_pickup(&subject, &scope).await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_aborts_outstanding_watchers() {
        let (lifecycle, subject, scope) = setup();

        lifecycle.request_pickup(&subject, &scope).await.unwrap();
        lifecycle.shutdown();

        // Teardown emptied the state store; a new request is accepted.
        assert!(lifecycle.request_pickup(&subject, &scope).await.is_ok());
        assert_eq!(created_requests(&lifecycle).await, 2);
    }

    /// Store whose `create` yields once, giving another task room to run
    /// while the insert is in flight.
    struct YieldingStore(MemoryStore);

    #[async_trait]
    impl DocumentStore for YieldingStore {
        async fn get(&self, collection: &str, id: Uuid) -> anyhow::Result<Option<Document>> {
            self.0.get(collection, id).await
        }

        async fn list(&self, collection: &str, filter: &Value) -> anyhow::Result<Vec<Document>> {
            self.0.list(collection, filter).await
        }

        async fn create(&self, collection: &str, data: Value) -> anyhow::Result<Document> {
            tokio::task::yield_now().await;
            self.0.create(collection, data).await
        }

        async fn merge(
            &self,
            collection: &str,
            id: Uuid,
            patch: Value,
        ) -> anyhow::Result<Option<Document>> {
            self.0.merge(collection, id, patch).await
        }

        async fn watch_doc(&self, collection: &str, id: Uuid) -> anyhow::Result<DocWatch> {
            self.0.watch_doc(collection, id).await
        }

        async fn watch_matching(
            &self,
            collection: &str,
            filter: Value,
        ) -> anyhow::Result<QueryWatch> {
            self.0.watch_matching(collection, filter).await
        }

        async fn ping(&self) -> anyhow::Result<()> {
            self.0.ping().await
        }
    }

    #[tokio::test]
    async fn shutdown_during_create_leaves_no_untracked_watcher() {
        let store: Arc<dyn DocumentStore> = Arc::new(YieldingStore(MemoryStore::new()));
        let lifecycle = PickupLifecycle::new(store, GRACE);
        let subject = SubjectRef {
            id: Uuid::new_v4(),
            display_name: "Otabek Saidov".to_string(),
        };
        let scope = ScopeRef {
            id: Uuid::new_v4(),
            name: "4-A".to_string(),
            kind: PickupKind::School,
            teacher_id: Some(Uuid::new_v4()),
        };

        let request = tokio::spawn({
            let lifecycle = lifecycle.clone();
            let subject = subject.clone();
            let scope = scope.clone();
            async move { lifecycle.request_pickup(&subject, &scope).await }
        });
        // Park the request task inside the store create, then tear down.
        tokio::task::yield_now().await;
        lifecycle.shutdown();

        let request_id = request.await.unwrap().unwrap();

        // The late-spawned watcher was aborted, so an approval after
        // teardown must not put the subject into a grace window.
        resolve(&lifecycle, request_id, "approved").await;
        tokio::task::yield_now().await;
        assert!(lifecycle.request_pickup(&subject, &scope).await.is_ok());
    }
}
