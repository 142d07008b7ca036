use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Teacher,
    Parent,
}

/// Claims embedded in the access token issued by the auth collaborator.
/// This service only verifies; it never issues tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user UUID
    pub role: UserRole,
    pub exp: usize,
    pub iat: usize,
}

/// Extracted from a validated JWT by the auth extractor.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: UserRole,
}

/// Body of a `users` document. Route access only needs "a user is
/// present"; the role is surfaced so clients can pick their entry
/// screen, mirroring the role lookup done at sign-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredUser {
    pub role: UserRole,
}
