//! The client facade: a thin, ergonomic surface over any backend.
//!
//! Everything here is a pass-through to the backend contract; the only
//! value added is naming (`create_reply` instead of a verb-tagged
//! `create_sub_activity`) and hiding the contract trait from casual
//! callers.

use serde_json::Value;
use tidemark_backend::{ActivityQuery, Backend, BackendResult};
use tidemark_core::Document;

pub struct StreamClient<B> {
    backend: B,
}

impl<B: Backend> StreamClient<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The backend this client was initialized with.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Store an object usable as part of an activity. An object with an
    /// existing id is overwritten.
    pub async fn create_object(&self, object: Document) -> BackendResult<Document> {
        self.backend.create_obj(object).await
    }

    /// Store an activity. Objects given as records are split out and
    /// persisted separately; object ids that do not resolve come back as
    /// `{}` on later reads.
    pub async fn create_activity(&self, activity: Document) -> BackendResult<Document> {
        self.backend.create_activity(activity).await
    }

    /// Create a reply on an activity; returns the reply and the updated
    /// activity, both hydrated.
    pub async fn create_reply(
        &self,
        activity: &Value,
        actor: Value,
        content: Value,
        extra: Option<Document>,
    ) -> BackendResult<(Document, Document)> {
        self.backend
            .create_sub_activity(activity, actor, content, "reply", None, extra)
            .await
    }

    /// Create a like on an activity; returns the like and the updated
    /// activity, both hydrated.
    pub async fn create_like(
        &self,
        activity: &Value,
        actor: Value,
        content: Value,
        extra: Option<Document>,
    ) -> BackendResult<(Document, Document)> {
        self.backend
            .create_sub_activity(activity, actor, content, "like", None, extra)
            .await
    }

    /// Delete an activity and all of its sub-activities.
    pub async fn delete_activity(&self, activity: &Value) -> BackendResult<()> {
        self.backend.delete_activity(activity).await
    }

    /// Delete a reply; returns the mended parent activity.
    pub async fn delete_reply(&self, reply: &Value) -> BackendResult<Document> {
        self.backend.delete_sub_activity(reply, "reply").await
    }

    /// Delete a like; returns the mended parent activity.
    pub async fn delete_like(&self, like: &Value) -> BackendResult<Document> {
        self.backend.delete_sub_activity(like, "like").await
    }

    pub async fn get_objects(&self, ids: Vec<String>) -> BackendResult<Vec<Document>> {
        self.backend.get_obj(ids).await
    }

    /// Fetch activities by id, in the order given.
    pub async fn get_activities(&self, ids: Vec<String>) -> BackendResult<Vec<Document>> {
        self.backend.get_activities(ids).await
    }

    /// Fetch activities with filtering, audience scoping and aggregation.
    pub async fn query_activities(&self, query: ActivityQuery) -> BackendResult<Vec<Document>> {
        self.backend.activity_get(query).await
    }

    /// Delete all stream data. Destructive; integration tests only.
    pub async fn clear_all(&self) -> BackendResult<()> {
        self.backend.clear_all().await
    }

    pub async fn clear_all_objects(&self) -> BackendResult<()> {
        self.backend.clear_all_objects().await
    }

    pub async fn clear_all_activities(&self) -> BackendResult<()> {
        self.backend.clear_all_activities().await
    }
}
