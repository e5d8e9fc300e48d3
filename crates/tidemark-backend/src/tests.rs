use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tidemark_core::model::SubActivityKind;
use tidemark_core::{Document, id};

use crate::{ActivityQuery, Backend, BackendError, BackendResult};

/// Minimal in-memory store exercising the contract's provided ops.
#[derive(Default)]
struct MemBackend {
    objects: Mutex<HashMap<String, Document>>,
    activities: Mutex<HashMap<String, Document>>,
    fail_next_activity_store: AtomicBool,
}

impl MemBackend {
    fn object(&self, obj_id: &str) -> Option<Document> {
        self.objects.lock().unwrap().get(obj_id).cloned()
    }

    fn activity(&self, activity_id: &str) -> Option<Document> {
        self.activities.lock().unwrap().get(activity_id).cloned()
    }
}

#[async_trait]
impl Backend for MemBackend {
    async fn obj_exists(&self, obj: &Value) -> BackendResult<bool> {
        let obj_id = id::extract_id(obj).expect("test objects carry ids");
        Ok(self.objects.lock().unwrap().contains_key(&obj_id))
    }

    async fn obj_create(&self, mut obj: Document) -> BackendResult<Document> {
        id::coerce_id(&mut obj);
        let obj_id = obj
            .get("id")
            .and_then(id::extract_id)
            .expect("create_obj injects an id");
        self.objects.lock().unwrap().insert(obj_id, obj.clone());
        Ok(obj)
    }

    async fn obj_update(&self, mut obj: Document) -> BackendResult<()> {
        id::coerce_id(&mut obj);
        let obj_id = obj.get("id").and_then(id::extract_id).unwrap();
        self.objects.lock().unwrap().insert(obj_id, obj);
        Ok(())
    }

    async fn obj_get(&self, ids: Vec<String>) -> BackendResult<Vec<Document>> {
        let objects = self.objects.lock().unwrap();
        Ok(ids.iter().filter_map(|i| objects.get(i).cloned()).collect())
    }

    async fn obj_delete(&self, obj: &Value) -> BackendResult<()> {
        let obj_id = id::extract_id(obj).unwrap();
        self.objects.lock().unwrap().remove(&obj_id);
        Ok(())
    }

    async fn activity_exists(&self, activity: &Value) -> BackendResult<bool> {
        let activity_id = id::extract_id(activity).unwrap();
        Ok(self.activities.lock().unwrap().contains_key(&activity_id))
    }

    async fn activity_create(
        &self,
        activity: Document,
        _parent_id: Option<&str>,
    ) -> BackendResult<Document> {
        if self.fail_next_activity_store.swap(false, Ordering::SeqCst) {
            return Err(BackendError::store(std::io::Error::other("store down")));
        }
        let activity_id = activity.get("id").and_then(id::extract_id).unwrap();
        self.activities
            .lock()
            .unwrap()
            .insert(activity_id, activity.clone());
        Ok(activity)
    }

    async fn activity_update(&self, activity: Document) -> BackendResult<Document> {
        self.activity_create(activity, None).await
    }

    async fn activity_get(&self, query: ActivityQuery) -> BackendResult<Vec<Document>> {
        let activities = self.activities.lock().unwrap();
        Ok(query
            .ids
            .iter()
            .filter_map(|i| activities.get(i).cloned())
            .collect())
    }

    async fn activity_delete(&self, activity: &Value) -> BackendResult<()> {
        let activity_id = id::extract_id(activity).unwrap();
        self.activities.lock().unwrap().remove(&activity_id);
        Ok(())
    }

    async fn sub_activity_create(
        &self,
        _activity: &Value,
        _actor: Value,
        _content: Value,
        _kind: SubActivityKind,
        _object_type: Option<String>,
        _extra: Option<Document>,
    ) -> BackendResult<(Document, Document)> {
        Err(BackendError::Unsupported {
            op: "sub_activity_create",
        })
    }

    async fn sub_activity_delete(
        &self,
        _sub_activity: &Value,
        _kind: SubActivityKind,
    ) -> BackendResult<Document> {
        Err(BackendError::Unsupported {
            op: "sub_activity_delete",
        })
    }

    async fn clear_all_objects(&self) -> BackendResult<()> {
        self.objects.lock().unwrap().clear();
        Ok(())
    }

    async fn clear_all_activities(&self) -> BackendResult<()> {
        self.activities.lock().unwrap().clear();
        Ok(())
    }
}

fn doc(value: Value) -> Document {
    let Value::Object(map) = value else {
        panic!("fixture must be a map")
    };
    map
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn create_activity_reduces_object_slots_to_ids() {
    let backend = MemBackend::default();

    let activity = doc(json!({
        "id": "5",
        "verb": "post",
        "actor": {"objectType": "user", "id": "u1", "published": "2012-07-05T12:00:00Z"},
        "object": {"objectType": "item", "id": "o1", "published": "2012-07-05T12:00:00Z"},
    }));
    backend.create_activity(activity).await.unwrap();

    let stored = backend.activity("5").unwrap();
    assert_eq!(stored.get("actor"), Some(&json!("u1")));
    assert_eq!(stored.get("object"), Some(&json!("o1")));
    assert!(backend.object("u1").is_some());
    assert!(backend.object("o1").is_some());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn create_activity_reduces_audience_records_element_wise() {
    let backend = MemBackend::default();

    let activity = doc(json!({
        "id": "5",
        "verb": "post",
        "actor": "u1",
        "object": "o1",
        "to": [
            {"objectType": "user", "id": "t1", "published": "2012-07-05T12:00:00Z"},
            "t2",
        ],
        "cc": [
            {"objectType": "user", "id": "c1", "published": "2012-07-05T12:00:00Z"},
        ],
    }));
    backend.create_activity(activity).await.unwrap();

    let stored = backend.activity("5").unwrap();
    assert_eq!(stored.get("to"), Some(&json!(["t1", "t2"])));
    assert_eq!(stored.get("cc"), Some(&json!(["c1"])));
    assert!(backend.object("t1").is_some());
    assert!(backend.object("c1").is_some());
    // bare id strings are not upserted
    assert!(backend.object("t2").is_none());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn create_activity_synthesizes_missing_id() {
    let backend = MemBackend::default();

    let stored = backend
        .create_activity(doc(json!({"verb": "post", "actor": "u1", "object": "o1"})))
        .await
        .unwrap();
    let activity_id = stored.get("id").and_then(Value::as_str).unwrap();
    assert!(!activity_id.is_empty());
    assert!(backend.activity(activity_id).is_some());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn create_activity_with_existing_id_is_a_duplicate() {
    let backend = MemBackend::default();

    let activity = doc(json!({"id": "5", "verb": "post", "actor": "u1", "object": "o1"}));
    backend.create_activity(activity.clone()).await.unwrap();

    let err = backend.create_activity(activity).await.unwrap_err();
    assert!(matches!(err, BackendError::Duplicate { .. }), "{err}");
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn failed_store_compensates_created_and_modified_objects() {
    let backend = MemBackend::default();

    let original_actor = doc(json!({
        "objectType": "user",
        "id": "u1",
        "published": "2012-07-05T12:00:00Z",
    }));
    backend.create_obj(original_actor.clone()).await.unwrap();

    let mut changed_actor = original_actor.clone();
    changed_actor.insert("content".to_owned(), json!("new content"));

    backend.fail_next_activity_store.store(true, Ordering::SeqCst);
    let err = backend
        .create_activity(doc(json!({
            "id": "6",
            "verb": "post",
            "actor": changed_actor,
            "object": {"objectType": "item", "id": "o9", "published": "2012-07-05T12:00:00Z"},
        })))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Store { .. }), "{err}");

    // the modified actor is restored, the freshly created object deleted
    assert_eq!(backend.object("u1"), Some(original_actor));
    assert!(backend.object("o9").is_none());
    assert!(backend.activity("6").is_none());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn update_requires_an_id() {
    let backend = MemBackend::default();

    let err = backend
        .update_obj(doc(json!({"objectType": "user"})))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Validation { .. }), "{err}");

    let err = backend
        .update_activity(doc(json!({"verb": "post"})))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Validation { .. }), "{err}");
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn create_sub_activity_rejects_unsupported_verbs() {
    let backend = MemBackend::default();

    let err = backend
        .create_sub_activity(&json!("5"), json!("u1"), json!("hi"), "share", None, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not supported"), "{err}");
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn create_sub_activity_requires_actor_id() {
    let backend = MemBackend::default();

    let err = backend
        .create_sub_activity(
            &json!("5"),
            json!({"objectType": "user"}),
            json!("hi"),
            "reply",
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Validation { .. }), "{err}");
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn create_obj_injects_an_id() {
    let backend = MemBackend::default();

    let stored = backend
        .create_obj(doc(json!({"objectType": "user", "published": "2012-07-05T12:00:00Z"})))
        .await
        .unwrap();
    let obj_id = stored.get("id").and_then(Value::as_str).unwrap();
    assert_eq!(obj_id.len(), 32);
}
