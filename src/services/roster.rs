//! Reads for the reference-data screens: classes by grade, kindergarten
//! groups, and the rosters inside each. Pure CRUD glue over the store;
//! no pickup logic lives here.

use serde_json::json;
use uuid::Uuid;

use crate::{
    models::{
        auth::StoredUser,
        scope::{ClassItem, GroupItem, KindergartenGroup, SchoolClass, ScopeRef},
        subject::{Child, Student, SubjectItem, SubjectRef},
    },
    store::{collections, DocumentStore},
};

pub struct RosterService;

impl RosterService {
    pub async fn classes_by_grade(
        store: &dyn DocumentStore,
        grade: i32,
    ) -> anyhow::Result<Vec<ClassItem>> {
        let docs = store
            .list(collections::CLASSES, &json!({ "number": grade }))
            .await?;
        let mut items = Vec::with_capacity(docs.len());
        for doc in docs {
            let class: SchoolClass = doc.parse()?;
            items.push(ClassItem {
                id: doc.id,
                name: class.name,
                number: class.number,
            });
        }
        Ok(items)
    }

    pub async fn students_in_class(
        store: &dyn DocumentStore,
        class_id: Uuid,
    ) -> anyhow::Result<Vec<SubjectItem>> {
        let docs = store
            .list(collections::STUDENTS, &json!({ "class_id": class_id }))
            .await?;
        let mut items = Vec::with_capacity(docs.len());
        for doc in docs {
            let student: Student = doc.parse()?;
            items.push(SubjectItem {
                id: doc.id,
                name: student.name,
            });
        }
        Ok(items)
    }

    pub async fn groups(store: &dyn DocumentStore) -> anyhow::Result<Vec<GroupItem>> {
        let docs = store.list(collections::GROUPS, &json!({})).await?;
        let mut items = Vec::with_capacity(docs.len());
        for doc in docs {
            let group: KindergartenGroup = doc.parse()?;
            items.push(GroupItem {
                id: doc.id,
                name: group.name,
            });
        }
        Ok(items)
    }

    pub async fn children_in_group(
        store: &dyn DocumentStore,
        group_id: Uuid,
    ) -> anyhow::Result<Vec<SubjectItem>> {
        let docs = store
            .list(collections::CHILDREN, &json!({ "group_id": group_id }))
            .await?;
        let mut items = Vec::with_capacity(docs.len());
        for doc in docs {
            let child: Child = doc.parse()?;
            items.push(SubjectItem {
                id: doc.id,
                name: format!("{} {}", child.name, child.last_name),
            });
        }
        Ok(items)
    }

    /// Scope lookup for a pickup request. The teacher assignment is read
    /// fresh here; the request snapshots it at creation and never again.
    pub async fn school_scope(
        store: &dyn DocumentStore,
        class_id: Uuid,
    ) -> anyhow::Result<Option<ScopeRef>> {
        let Some(doc) = store.get(collections::CLASSES, class_id).await? else {
            return Ok(None);
        };
        let class: SchoolClass = doc.parse()?;
        Ok(Some(ScopeRef::school(doc.id, &class)))
    }

    pub async fn kindergarten_scope(
        store: &dyn DocumentStore,
        group_id: Uuid,
    ) -> anyhow::Result<Option<ScopeRef>> {
        let Some(doc) = store.get(collections::GROUPS, group_id).await? else {
            return Ok(None);
        };
        let group: KindergartenGroup = doc.parse()?;
        Ok(Some(ScopeRef::kindergarten(doc.id, &group)))
    }

    /// Resolve a student and confirm it belongs to the given class.
    pub async fn student_subject(
        store: &dyn DocumentStore,
        student_id: Uuid,
        class_id: Uuid,
    ) -> anyhow::Result<Option<SubjectRef>> {
        let Some(doc) = store.get(collections::STUDENTS, student_id).await? else {
            return Ok(None);
        };
        let student: Student = doc.parse()?;
        if student.class_id != class_id {
            return Ok(None);
        }
        Ok(Some(SubjectRef::student(doc.id, &student)))
    }

    pub async fn child_subject(
        store: &dyn DocumentStore,
        child_id: Uuid,
        group_id: Uuid,
    ) -> anyhow::Result<Option<SubjectRef>> {
        let Some(doc) = store.get(collections::CHILDREN, child_id).await? else {
            return Ok(None);
        };
        let child: Child = doc.parse()?;
        if child.group_id != group_id {
            return Ok(None);
        }
        Ok(Some(SubjectRef::child(doc.id, &child)))
    }

    pub async fn user(
        store: &dyn DocumentStore,
        user_id: Uuid,
    ) -> anyhow::Result<Option<StoredUser>> {
        let Some(doc) = store.get(collections::USERS, user_id).await? else {
            return Ok(None);
        };
        Ok(Some(doc.parse()?))
    }
}
