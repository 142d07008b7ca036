pub mod lifecycle;
pub mod metrics;
pub mod pickups;
pub mod roster;
