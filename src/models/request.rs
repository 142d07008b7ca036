use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickupStatus {
    Pending,
    Approved,
    Rejected,
}

impl PickupStatus {
    /// Terminal for this service: once observed, the per-request
    /// subscription is cancelled and no later flip is acted on.
    pub fn is_terminal(self) -> bool {
        matches!(self, PickupStatus::Approved | PickupStatus::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PickupStatus::Pending => "pending",
            PickupStatus::Approved => "approved",
            PickupStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickupKind {
    School,
    Kindergarten,
}

impl PickupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PickupKind::School => "school",
            PickupKind::Kindergarten => "kindergarten",
        }
    }
}

/// Body of a `pickup_requests` document. Subject and scope names are
/// snapshots taken at creation time so status screens render without
/// joins; a later rename or teacher change does not touch outstanding
/// requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupRequest {
    pub subject_id: Uuid,
    pub subject_name: String,
    pub group_or_class_id: Uuid,
    pub group_or_class_name: String,
    pub teacher_id: Uuid,
    pub status: PickupStatus,
    pub kind: PickupKind,
    /// Consumed by the teacher-side client only; this service writes
    /// `"waiting"` at creation and never reads it back.
    pub parent_notification: String,
}

/// One entry of the per-scope pending map (drives button-disable state
/// on roster screens).
#[derive(Debug, Clone, Serialize)]
pub struct PendingEntry {
    pub request_id: Uuid,
    pub status: PickupStatus,
}

/// Broadcast to connected parents when a request reaches a terminal
/// status.
#[derive(Debug, Clone, Serialize)]
pub struct PickupNotice {
    pub request_id: Uuid,
    pub subject_id: Uuid,
    pub subject_name: String,
    pub status: PickupStatus,
}

#[derive(Debug, Deserialize)]
pub struct CreatePickupRequest {
    pub subject_id: Uuid,
    pub scope_id: Uuid,
    pub kind: PickupKind,
}

#[derive(Debug, Serialize)]
pub struct PickupStatusResponse {
    pub request_id: Uuid,
    pub status: PickupStatus,
    pub subject_name: String,
    pub kind: PickupKind,
    pub created_at: DateTime<Utc>,
}
