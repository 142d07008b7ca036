pub mod auth;
pub mod request;
pub mod scope;
pub mod subject;
