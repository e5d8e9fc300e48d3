//! The storage contract every tidemark backend implements.
//!
//! The trait splits into two layers, mirroring the split between what is
//! store-specific and what is not:
//!
//! - *required ops* (`obj_create`, `activity_create`, ...) are the raw
//!   store operations of the backend contract;
//! - *provided ops* (`create_activity`, `create_sub_activity`, ...) carry
//!   the backend-generic logic: id synthesis, duplicate checks, and the
//!   dehydration-with-compensation write path (see [`store_activity`]).

mod dehydrate;
mod query;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use serde_json::Value;
use snafu::Snafu;
use tidemark_aggregate::AggregateError;
use tidemark_core::model::{self, SubActivityKind, ValidationError};
use tidemark_core::{Document, id};
use tidemark_util_error::BoxedError;

pub use self::dehydrate::{StoreMode, store_activity};
pub use self::query::{ActivityQuery, RawFilter};

pub(crate) const LOG_TARGET: &str = "tidemark::backend";

#[derive(Debug, Snafu)]
pub enum BackendError {
    #[snafu(transparent)]
    Validation { source: ValidationError },
    #[snafu(display("{kind} with id `{id}` already exists"))]
    Duplicate { kind: &'static str, id: String },
    #[snafu(display("{kind} with id `{id}` not found"))]
    NotFound { kind: &'static str, id: String },
    #[snafu(display("backend misconfigured: {message}"))]
    Configuration { message: String },
    #[snafu(display("operation not supported: {op}"))]
    Unsupported { op: &'static str },
    #[snafu(transparent)]
    Aggregate { source: AggregateError },
    #[snafu(display("store error"))]
    Store { source: BoxedError },
}

impl BackendError {
    /// Wrap a store-level failure for propagation through the contract.
    pub fn store(source: impl Into<BoxedError>) -> Self {
        Self::Store {
            source: source.into(),
        }
    }

    fn missing_id() -> Self {
        ValidationError::RequiredFieldMissing {
            field: "id".to_owned(),
        }
        .into()
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Fresh opaque id; unique and stable in its string form.
    fn new_id(&self) -> String {
        id::new_hex_id()
    }

    // ---- required store ops ----

    async fn obj_exists(&self, obj: &Value) -> BackendResult<bool>;

    /// Upsert an object record by id. Idempotent: a later create with the
    /// same id overwrites the stored fields wholesale (not a merge).
    async fn obj_create(&self, obj: Document) -> BackendResult<Document>;

    async fn obj_update(&self, obj: Document) -> BackendResult<()>;

    /// Fetch objects by id; missing ids are dropped from the result.
    async fn obj_get(&self, ids: Vec<String>) -> BackendResult<Vec<Document>>;

    async fn obj_delete(&self, obj: &Value) -> BackendResult<()>;

    async fn activity_exists(&self, activity: &Value) -> BackendResult<bool>;

    /// Store a dehydrated activity and return its hydrated form.
    ///
    /// `parent_id` is set when the activity is a sub-activity, so the
    /// backend can record the parent back-reference.
    async fn activity_create(
        &self,
        activity: Document,
        parent_id: Option<&str>,
    ) -> BackendResult<Document>;

    async fn activity_update(&self, activity: Document) -> BackendResult<Document>;

    /// The query path: fetch, filter, order and hydrate; see
    /// [`ActivityQuery`].
    async fn activity_get(&self, query: ActivityQuery) -> BackendResult<Vec<Document>>;

    /// Delete an activity, cascading over its sub-activities.
    async fn activity_delete(&self, activity: &Value) -> BackendResult<()>;

    /// Create a reply/like under a parent activity; returns the hydrated
    /// sub-activity and the hydrated updated parent.
    async fn sub_activity_create(
        &self,
        activity: &Value,
        actor: Value,
        content: Value,
        kind: SubActivityKind,
        object_type: Option<String>,
        extra: Option<Document>,
    ) -> BackendResult<(Document, Document)>;

    /// Delete a sub-activity and mend its parent; the delete is typed,
    /// deleting a reply as a like fails.
    async fn sub_activity_delete(
        &self,
        sub_activity: &Value,
        kind: SubActivityKind,
    ) -> BackendResult<Document>;

    /// Destructive; integration tests only.
    async fn clear_all_objects(&self) -> BackendResult<()>;

    /// Destructive; integration tests only.
    async fn clear_all_activities(&self) -> BackendResult<()>;

    // ---- provided contract ops ----

    async fn clear_all(&self) -> BackendResult<()> {
        self.clear_all_activities().await?;
        self.clear_all_objects().await
    }

    /// Store an object, synthesizing an id when the caller did not supply
    /// one.
    async fn create_obj(&self, mut obj: Document) -> BackendResult<Document> {
        if obj.get("id").and_then(id::extract_id).is_none() {
            obj.insert("id".to_owned(), Value::String(self.new_id()));
        }
        self.obj_create(obj).await
    }

    async fn update_obj(&self, obj: Document) -> BackendResult<()> {
        if obj.get("id").and_then(id::extract_id).is_none() {
            return Err(BackendError::missing_id());
        }
        self.obj_update(obj).await
    }

    async fn delete_obj(&self, obj: &Value) -> BackendResult<()> {
        if id::extract_id(obj).is_none() {
            return Err(BackendError::missing_id());
        }
        self.obj_delete(obj).await
    }

    async fn get_obj(&self, ids: Vec<String>) -> BackendResult<Vec<Document>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.obj_get(ids).await
    }

    /// Store an activity. Objects supplied as records in object-valued or
    /// audience slots are split out and persisted separately, with
    /// compensation on failure; see [`store_activity`].
    async fn create_activity(&self, activity: Document) -> BackendResult<Document> {
        store_activity(self, activity, None, StoreMode::Create).await
    }

    /// Update an activity in place; slots given as records are split out
    /// the same way as on create.
    async fn update_activity(&self, activity: Document) -> BackendResult<Document> {
        if activity.get("id").and_then(id::extract_id).is_none() {
            return Err(BackendError::missing_id());
        }
        store_activity(self, activity, None, StoreMode::Update).await
    }

    async fn delete_activity(&self, activity: &Value) -> BackendResult<()> {
        if id::extract_id(activity).is_none() {
            return Err(BackendError::missing_id());
        }
        self.activity_delete(activity).await
    }

    async fn get_activities(&self, ids: Vec<String>) -> BackendResult<Vec<Document>> {
        self.activity_get(ActivityQuery::for_ids(ids)).await
    }

    /// Create a sub-activity under `activity`. The verb must name a
    /// supported sub-activity kind, and both the parent and the actor must
    /// carry ids.
    async fn create_sub_activity(
        &self,
        activity: &Value,
        actor: Value,
        content: Value,
        verb: &str,
        object_type: Option<String>,
        extra: Option<Document>,
    ) -> BackendResult<(Document, Document)> {
        let kind = SubActivityKind::from_verb(verb)?;
        if id::extract_id(&actor).is_none() {
            return Err(BackendError::missing_id());
        }
        if id::extract_id(activity).is_none() {
            return Err(BackendError::missing_id());
        }
        self.sub_activity_create(activity, actor, content, kind, object_type, extra)
            .await
    }

    /// Delete a sub-activity by id; `verb` must match the stored record.
    async fn delete_sub_activity(&self, sub_activity: &Value, verb: &str) -> BackendResult<Document> {
        let kind = SubActivityKind::from_verb(verb)?;
        if id::extract_id(sub_activity).is_none() {
            return Err(BackendError::missing_id());
        }
        self.sub_activity_delete(sub_activity, kind).await
    }
}

/// Slots the dehydration pass walks: the object-valued slots plus the four
/// audience lists.
pub(crate) fn object_slots() -> impl Iterator<Item = &'static str> {
    model::OBJECT_FIELDS.iter().copied()
}
