use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A school student document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub name: String,
    pub class_id: Uuid,
}

/// A kindergarten child document. Children carry a separate last name;
/// the display name joins both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Child {
    pub name: String,
    pub last_name: String,
    pub group_id: Uuid,
}

/// Unified view of whoever is being picked up.
#[derive(Debug, Clone)]
pub struct SubjectRef {
    pub id: Uuid,
    pub display_name: String,
}

impl SubjectRef {
    pub fn student(id: Uuid, student: &Student) -> Self {
        Self {
            id,
            display_name: student.name.clone(),
        }
    }

    pub fn child(id: Uuid, child: &Child) -> Self {
        Self {
            id,
            display_name: format!("{} {}", child.name, child.last_name),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubjectItem {
    pub id: Uuid,
    pub name: String,
}
