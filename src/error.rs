use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy for the pickup lifecycle. Nothing here is fatal to
/// the process and nothing is retried automatically; every retry is a
/// fresh user action.
#[derive(Debug, Error)]
pub enum PickupError {
    /// Data-integrity gap in the class/group record. Not retryable by
    /// the user alone; the UI tells them to contact the administration.
    #[error("scope has no assigned teacher")]
    MissingTeacher,

    /// A request for this subject is already outstanding. Expected under
    /// concurrent use; informational, not a failure.
    #[error("a pickup request for this subject is already pending")]
    AlreadyRequested,

    /// The subject was approved within the grace window; repeat requests
    /// are blocked until it elapses. Informational.
    #[error("subject was approved recently, blocked for another {remaining:?}")]
    InGraceWindow { remaining: Duration },

    /// Transient store failure while writing the request. The user is
    /// told to try again.
    #[error("could not create pickup request")]
    Creation(#[source] anyhow::Error),

    /// The store reported an error setting up or running a live
    /// subscription. The subscription is treated as broken; affected
    /// subjects keep their last known state.
    #[error("live subscription failed")]
    Subscription(#[source] anyhow::Error),
}

impl PickupError {
    /// Stable machine-readable code for HTTP responses.
    pub fn code(&self) -> &'static str {
        match self {
            PickupError::MissingTeacher => "missing_teacher",
            PickupError::AlreadyRequested => "already_requested",
            PickupError::InGraceWindow { .. } => "grace_window",
            PickupError::Creation(_) => "request_creation_failed",
            PickupError::Subscription(_) => "subscription_failed",
        }
    }
}
