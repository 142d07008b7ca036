use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::PickupKind;

/// A school class document: grade number plus letter, e.g. "3-B".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchoolClass {
    pub name: String,
    pub number: i32,
    pub teacher_id: Option<Uuid>,
}

/// A kindergarten group document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindergartenGroup {
    pub name: String,
    pub teacher_id: Option<Uuid>,
}

/// Unified view of the class or group that owns a roster and designates
/// the approving teacher. `teacher_id` stays optional here; its absence
/// is the `MissingTeacher` failure at request time.
#[derive(Debug, Clone)]
pub struct ScopeRef {
    pub id: Uuid,
    pub name: String,
    pub kind: PickupKind,
    pub teacher_id: Option<Uuid>,
}

impl ScopeRef {
    pub fn school(id: Uuid, class: &SchoolClass) -> Self {
        Self {
            id,
            name: format!("{}-{}", class.number, class.name),
            kind: PickupKind::School,
            teacher_id: class.teacher_id,
        }
    }

    pub fn kindergarten(id: Uuid, group: &KindergartenGroup) -> Self {
        Self {
            id,
            name: group.name.clone(),
            kind: PickupKind::Kindergarten,
            teacher_id: group.teacher_id,
        }
    }
}

// List DTOs for the roster routes.

#[derive(Debug, Serialize)]
pub struct ClassItem {
    pub id: Uuid,
    pub name: String,
    pub number: i32,
}

#[derive(Debug, Serialize)]
pub struct GroupItem {
    pub id: Uuid,
    pub name: String,
}
