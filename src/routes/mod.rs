pub mod auth;
pub mod classes;
pub mod groups;
pub mod health;
pub mod metrics;
pub mod pickups;
pub mod websocket;
