//! The write path: splitting embedded objects out of an activity before it
//! is stored, with compensation when any step fails.

use serde_json::Value;
use tidemark_core::model::audience_fields;
use tidemark_core::{Document, id};
use tidemark_util_error::FmtCompact as _;
use tracing::{debug, warn};

use crate::{Backend, BackendError, BackendResult, DuplicateSnafu, LOG_TARGET, object_slots};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Fail on an existing id; synthesize one when absent.
    Create,
    /// Overwrite in place; the id must be present (checked by the caller).
    Update,
}

/// Everything written while dehydrating one activity, kept for
/// compensation: ids of objects that did not exist before, and prior
/// contents of objects that did.
#[derive(Default)]
struct WriteLog {
    created: Vec<String>,
    modified: Vec<Document>,
}

/// Persist an activity: upsert every object given as a record in an
/// object-valued or audience slot, reduce those slots to id strings, then
/// hand the dehydrated record to the backend's raw store op.
///
/// On any failure mid-sequence the objects written so far are compensated
/// (new ones deleted, modified ones restored) and the originating error is
/// re-raised.
pub async fn store_activity<B>(
    backend: &B,
    mut activity: Document,
    parent_id: Option<&str>,
    mode: StoreMode,
) -> BackendResult<Document>
where
    B: Backend + ?Sized,
{
    if mode == StoreMode::Create {
        match activity.get("id").and_then(id::extract_id) {
            Some(id) => {
                if backend.activity_exists(&Value::String(id.clone())).await? {
                    return DuplicateSnafu {
                        kind: "activity",
                        id,
                    }
                    .fail();
                }
            }
            None => {
                activity.insert("id".to_owned(), Value::String(backend.new_id()));
            }
        }
    }

    let mut log = WriteLog::default();

    for field in object_slots() {
        let Some(Value::Object(obj)) = activity.get(field) else {
            continue;
        };
        let obj = obj.clone();
        match upsert_object(backend, obj, &mut log).await {
            Ok(obj_id) => {
                activity.insert(field.to_owned(), Value::String(obj_id));
            }
            Err(err) => {
                rollback(backend, &log).await;
                return Err(err);
            }
        }
    }

    for field in audience_fields() {
        let Some(Value::Array(items)) = activity.get(field) else {
            continue;
        };
        let mut items = items.clone();
        for item in &mut items {
            let Value::Object(obj) = &*item else {
                continue;
            };
            match upsert_object(backend, obj.clone(), &mut log).await {
                Ok(obj_id) => *item = Value::String(obj_id),
                Err(err) => {
                    rollback(backend, &log).await;
                    return Err(err);
                }
            }
        }
        activity.insert(field.to_owned(), Value::Array(items));
    }

    let stored = match mode {
        StoreMode::Create => backend.activity_create(activity, parent_id).await,
        StoreMode::Update => backend.activity_update(activity).await,
    };
    match stored {
        Ok(stored) => Ok(stored),
        Err(err) => {
            rollback(backend, &log).await;
            Err(err)
        }
    }
}

/// Insert or overwrite one embedded object, recording what compensation
/// would need to undo.
async fn upsert_object<B>(
    backend: &B,
    obj: Document,
    log: &mut WriteLog,
) -> BackendResult<String>
where
    B: Backend + ?Sized,
{
    let obj_id = obj.get("id").and_then(id::extract_id);
    let prior = match &obj_id {
        Some(obj_id) => {
            if backend.obj_exists(&Value::String(obj_id.clone())).await? {
                backend
                    .obj_get(vec![obj_id.clone()])
                    .await?
                    .into_iter()
                    .next()
            } else {
                None
            }
        }
        None => None,
    };

    match prior {
        Some(prior) => {
            let obj_id = obj_id.expect("prior lookup implies an id");
            log.modified.push(prior);
            backend.obj_update(obj).await?;
            Ok(obj_id)
        }
        None => {
            let stored = backend.create_obj(obj).await?;
            let obj_id = stored
                .get("id")
                .and_then(id::extract_id)
                .ok_or_else(|| BackendError::Configuration {
                    message: "stored object came back without an id".to_owned(),
                })?;
            log.created.push(obj_id.clone());
            Ok(obj_id)
        }
    }
}

/// Undo the write log: delete objects we inserted, restore the prior
/// contents of objects we overwrote. Compensation failures are logged and
/// skipped so the originating error still surfaces.
async fn rollback<B>(backend: &B, log: &WriteLog)
where
    B: Backend + ?Sized,
{
    debug!(
        target: LOG_TARGET,
        created = log.created.len(),
        modified = log.modified.len(),
        "Compensating failed activity store"
    );

    for obj_id in &log.created {
        if let Err(err) = backend.obj_delete(&Value::String(obj_id.clone())).await {
            warn!(
                target: LOG_TARGET,
                err = %err.fmt_compact(),
                id = %obj_id,
                "Failed to delete object during compensation"
            );
        }
    }
    for prior in &log.modified {
        if let Err(err) = backend.obj_update(prior.clone()).await {
            warn!(
                target: LOG_TARGET,
                err = %err.fmt_compact(),
                "Failed to restore object during compensation"
            );
        }
    }
}
