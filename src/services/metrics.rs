use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge, CounterVec, Gauge};

lazy_static! {
    pub static ref PICKUPS_CREATED: CounterVec = register_counter_vec!(
        "pickup_requests_created_total",
        "Pickup requests created, by kind",
        &["kind"]
    ).unwrap();

    pub static ref PICKUPS_RESOLVED: CounterVec = register_counter_vec!(
        "pickup_requests_resolved_total",
        "Terminal statuses observed on watched requests, by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref GRACE_SUBJECTS: Gauge = register_gauge!(
        "pickup_grace_subjects",
        "Subjects currently inside the post-approval grace window"
    ).unwrap();
}
