//! The sub-activity lifecycle: creating replies/likes under a parent,
//! typed deletion, and the cascade when a parent goes away.

use serde_json::Value;
use tidemark_backend::{Backend as _, BackendError, BackendResult, StoreMode, store_activity};
use tidemark_core::model::{
    self, RESPONSE_FIELDS, SubActivityKind, SubActivitySpec, ValidationError,
};
use tidemark_core::{Document, id};
use tracing::info;

use super::{KvStreamDb, LOG_TARGET, activity_parents};

impl KvStreamDb {
    /// Create a reply/like under the given parent activity.
    ///
    /// The parent is read in its dehydrated form, the sub-activity and
    /// updated parent are built by the model layer, the sub-activity is
    /// stored through the regular write path (which splits out its actor
    /// object), and the parent is written back with the new projection at
    /// the head of its response slot.
    pub(crate) async fn create_sub_activity_impl(
        &self,
        activity: &Value,
        actor: Value,
        content: Value,
        kind: SubActivityKind,
        object_type: Option<String>,
        extra: Option<Document>,
    ) -> BackendResult<(Document, Document)> {
        let parent_id = id::extract_id(activity).ok_or_else(missing_id)?;
        let parent = self
            .get_activity_raw(&parent_id)
            .await?
            .ok_or_else(|| BackendError::NotFound {
                kind: "activity",
                id: parent_id.clone(),
            })?;

        let actor_id = id::extract_id(&actor);
        let spec = SubActivitySpec {
            kind,
            actor,
            content,
            object_type: object_type.unwrap_or_else(|| kind.verb().to_owned()),
            extra,
            sub_activity_id: self.new_id(),
            object_id: self.new_id(),
        };
        let (sub_activity, mut updated_parent) = model::parsed_sub_activity(&parent, spec);

        let hydrated_sub = store_activity(self, sub_activity, Some(&parent_id), StoreMode::Create)
            .await?;

        // the freshly stored sub-activity knows its final identity; patch
        // the head projection with it
        patch_head_projection(&mut updated_parent, kind, &hydrated_sub, actor_id);

        let hydrated_parent = store_activity(self, updated_parent, None, StoreMode::Update).await?;

        info!(
            target: LOG_TARGET,
            kind = %kind,
            parent = %parent_id,
            sub = %hydrated_sub.get("id").and_then(id::extract_id).unwrap_or_default(),
            "Created sub-activity"
        );

        Ok((hydrated_sub, hydrated_parent))
    }

    /// Delete a sub-activity by id and mend its parent.
    ///
    /// The delete is typed: the stored verb must match `kind`. The parent
    /// is located through the parent back-reference, the matching
    /// projection is removed, and the whole response slot is dropped once
    /// it holds no items.
    pub(crate) async fn delete_sub_activity_impl(
        &self,
        sub_activity: &Value,
        kind: SubActivityKind,
    ) -> BackendResult<Document> {
        let sub_id = id::extract_id(sub_activity).ok_or_else(missing_id)?;
        let sub = self
            .get_activity_raw(&sub_id)
            .await?
            .ok_or_else(|| BackendError::NotFound {
                kind: "activity",
                id: sub_id.clone(),
            })?;

        let actual = sub
            .get("verb")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        if actual != kind.verb() {
            return Err(ValidationError::VerbMismatch {
                expected: kind.verb().to_owned(),
                actual,
            }
            .into());
        }

        let parent_id = self
            .read_with(|tx| {
                let parents = tx.open_table(&activity_parents::TABLE)?;
                Self::get_parent_tx(&sub_id, &parents)
            })
            .await?
            .ok_or_else(|| BackendError::NotFound {
                kind: "activity",
                id: sub_id.clone(),
            })?;
        let mut parent = self
            .get_activity_raw(&parent_id)
            .await?
            .ok_or_else(|| BackendError::NotFound {
                kind: "activity",
                id: parent_id.clone(),
            })?;

        remove_projection(&mut parent, kind, &sub_id);

        let hydrated_parent = store_activity(self, parent, None, StoreMode::Update).await?;

        self.delete_activity_impl(&Value::String(sub_id.clone())).await?;

        info!(
            target: LOG_TARGET,
            kind = %kind,
            parent = %parent_id,
            sub = %sub_id,
            "Deleted sub-activity"
        );

        Ok(hydrated_parent)
    }

    /// Delete an activity and cascade over the sub-activities listed in
    /// its response slots.
    pub(crate) async fn delete_activity_impl(&self, activity: &Value) -> BackendResult<()> {
        let activity_id = id::extract_id(activity).ok_or_else(missing_id)?;
        let doc = self
            .get_activity_raw(&activity_id)
            .await?
            .ok_or_else(|| BackendError::NotFound {
                kind: "activity",
                id: activity_id.clone(),
            })?;

        for sub_id in projection_sub_ids(&doc) {
            self.write_with(|tx| Self::delete_activity_tx(&sub_id, tx).map(drop))
                .await?;
        }

        self.write_with(|tx| Self::delete_activity_tx(&activity_id, tx).map(drop))
            .await?;

        info!(target: LOG_TARGET, id = %activity_id, "Deleted activity");
        Ok(())
    }
}

fn missing_id() -> BackendError {
    ValidationError::RequiredFieldMissing {
        field: "id".to_owned(),
    }
    .into()
}

/// Sub-activity ids referenced from both response slots of a dehydrated
/// record.
fn projection_sub_ids(doc: &Document) -> Vec<String> {
    let mut out = vec![];
    for field in RESPONSE_FIELDS {
        let items = doc
            .get(*field)
            .and_then(Value::as_object)
            .and_then(|slot| slot.get("items"))
            .and_then(Value::as_array);
        for item in items.into_iter().flatten() {
            if let Some(sub_id) = projection_sub_id(item) {
                out.push(sub_id);
            }
        }
    }
    out
}

fn projection_sub_id(item: &Value) -> Option<String> {
    let item = item.as_object()?;
    if let Some(object) = item.get("object").and_then(Value::as_object) {
        if let Some(sub_id) = object.get("id").and_then(id::extract_id) {
            return Some(sub_id);
        }
    }
    item.get("id").and_then(id::extract_id)
}

/// Rewrite the head projection with the stored sub-activity's identity:
/// the actor id, and the sub-activity id inside the `object` projection.
fn patch_head_projection(
    parent: &mut Document,
    kind: SubActivityKind,
    stored_sub: &Document,
    actor_id: Option<String>,
) {
    let sub_id = stored_sub.get("id").cloned();
    let Some(items) = parent
        .get_mut(kind.collection())
        .and_then(Value::as_object_mut)
        .and_then(|slot| slot.get_mut("items"))
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    let Some(Value::Object(head)) = items.first_mut() else {
        return;
    };

    if let Some(actor_id) = actor_id {
        head.insert("actor".to_owned(), Value::String(actor_id));
    }
    if let Some(sub_id) = sub_id {
        if let Some(Value::Object(object)) = head.get_mut("object") {
            object.insert("id".to_owned(), sub_id);
        }
    }
}

/// Drop the projection matching `sub_id` from the response slot,
/// recompute the counter, and remove the slot entirely once empty.
fn remove_projection(parent: &mut Document, kind: SubActivityKind, sub_id: &str) {
    let collection = kind.collection();
    let emptied = {
        let Some(items) = parent
            .get_mut(collection)
            .and_then(Value::as_object_mut)
            .and_then(|slot| slot.get_mut("items"))
            .and_then(Value::as_array_mut)
        else {
            return;
        };
        items.retain(|item| projection_sub_id(item).as_deref() != Some(sub_id));
        items.is_empty()
    };

    if emptied {
        parent.remove(collection);
        return;
    }

    if let Some(slot) = parent.get_mut(collection).and_then(Value::as_object_mut) {
        let total = slot
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        slot.insert("totalItems".to_owned(), serde_json::json!(total));
    }
}
