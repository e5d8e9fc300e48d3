//! The backend contract implemented over the KV tables.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use tidemark_aggregate::run_pipeline;
use tidemark_backend::{ActivityQuery, Backend, BackendResult};
use tidemark_core::model::{self, SubActivityKind, ValidationError};
use tidemark_core::{Document, Timestamp, id};
use tracing::{debug, info};

use super::{
    KvStreamDb, LOG_TARGET, activities, activities_by_actor, activities_by_created,
    activities_by_modified, activities_by_object, activities_by_target, activities_by_verb,
    activity_parents, objects, objects_by_created, objects_by_modified,
};
use crate::query::QueryFilters;

fn missing_id() -> tidemark_backend::BackendError {
    ValidationError::RequiredFieldMissing {
        field: "id".to_owned(),
    }
    .into()
}

#[async_trait]
impl Backend for KvStreamDb {
    async fn obj_exists(&self, obj: &Value) -> BackendResult<bool> {
        let Some(obj_id) = id::extract_id(obj) else {
            return Ok(false);
        };
        Ok(self.contains_object(&obj_id).await?)
    }

    async fn obj_create(&self, obj: Document) -> BackendResult<Document> {
        model::OBJECT.validate(&obj)?;
        let parsed = model::OBJECT.parsed(&obj, None);

        let now = Timestamp::now();
        self.write_with(|tx| Self::upsert_object_tx(&parsed, now, tx))
            .await?;

        debug!(
            target: LOG_TARGET,
            id = %parsed.get("id").and_then(id::extract_id).unwrap_or_default(),
            "Stored object"
        );
        Ok(parsed)
    }

    async fn obj_update(&self, obj: Document) -> BackendResult<()> {
        self.obj_create(obj).await.map(drop)
    }

    async fn obj_get(&self, ids: Vec<String>) -> BackendResult<Vec<Document>> {
        let wanted: BTreeSet<String> = ids.iter().cloned().collect();
        let found = self.fetch_object_docs(&wanted).await?;
        Ok(ids
            .iter()
            .filter_map(|obj_id| found.get(obj_id).cloned())
            .collect())
    }

    async fn obj_delete(&self, obj: &Value) -> BackendResult<()> {
        let obj_id = id::extract_id(obj).ok_or_else(missing_id)?;
        self.write_with(|tx| Self::delete_object_tx(&obj_id, tx))
            .await?;
        debug!(target: LOG_TARGET, id = %obj_id, "Deleted object");
        Ok(())
    }

    async fn activity_exists(&self, activity: &Value) -> BackendResult<bool> {
        let Some(activity_id) = id::extract_id(activity) else {
            return Ok(false);
        };
        Ok(self.contains_activity(&activity_id).await?)
    }

    async fn activity_create(
        &self,
        activity: Document,
        parent_id: Option<&str>,
    ) -> BackendResult<Document> {
        model::ACTIVITY.validate(&activity)?;
        let parsed = model::ACTIVITY.parsed(&activity, None);

        let now = Timestamp::now();
        self.write_with(|tx| Self::upsert_activity_tx(&parsed, parent_id, now, tx))
            .await?;

        info!(
            target: LOG_TARGET,
            id = %parsed.get("id").and_then(id::extract_id).unwrap_or_default(),
            verb = %parsed.get("verb").and_then(serde_json::Value::as_str).unwrap_or_default(),
            "Stored activity"
        );

        let mut hydrated = self.hydrate_activities(vec![parsed]).await?;
        Ok(hydrated.pop().expect("one record in, one out"))
    }

    async fn activity_update(&self, activity: Document) -> BackendResult<Document> {
        self.activity_create(activity, None).await
    }

    async fn activity_get(&self, query: ActivityQuery) -> BackendResult<Vec<Document>> {
        if query.ids.is_empty() {
            return Ok(vec![]);
        }

        let records = self
            .get_many_activities(
                &query.ids,
                QueryFilters {
                    filters: query.filters.as_ref(),
                    raw_filter: query.raw_filter.as_ref(),
                    audience_targeting: query.audience_targeting.as_ref(),
                    include_public: query.include_public,
                },
            )
            .await?;
        let hydrated = self.hydrate_activities(records).await?;
        Ok(run_pipeline(&query.aggregation_pipeline, hydrated)?)
    }

    async fn activity_delete(&self, activity: &Value) -> BackendResult<()> {
        self.delete_activity_impl(activity).await
    }

    async fn sub_activity_create(
        &self,
        activity: &Value,
        actor: Value,
        content: Value,
        kind: SubActivityKind,
        object_type: Option<String>,
        extra: Option<Document>,
    ) -> BackendResult<(Document, Document)> {
        self.create_sub_activity_impl(activity, actor, content, kind, object_type, extra)
            .await
    }

    async fn sub_activity_delete(
        &self,
        sub_activity: &Value,
        kind: SubActivityKind,
    ) -> BackendResult<Document> {
        self.delete_sub_activity_impl(sub_activity, kind).await
    }

    async fn clear_all_objects(&self) -> BackendResult<()> {
        self.write_with(|tx| {
            Self::drain_table_tx(&mut tx.open_table(&objects::TABLE)?)?;
            Self::drain_table_tx(&mut tx.open_table(&objects_by_created::TABLE)?)?;
            Self::drain_table_tx(&mut tx.open_table(&objects_by_modified::TABLE)?)?;
            Ok(())
        })
        .await?;
        info!(target: LOG_TARGET, "Cleared all objects");
        Ok(())
    }

    async fn clear_all_activities(&self) -> BackendResult<()> {
        self.write_with(|tx| {
            Self::drain_table_tx(&mut tx.open_table(&activities::TABLE)?)?;
            Self::drain_table_tx(&mut tx.open_table(&activities_by_created::TABLE)?)?;
            Self::drain_table_tx(&mut tx.open_table(&activities_by_modified::TABLE)?)?;
            Self::drain_table_tx(&mut tx.open_table(&activities_by_verb::TABLE)?)?;
            Self::drain_table_tx(&mut tx.open_table(&activities_by_actor::TABLE)?)?;
            Self::drain_table_tx(&mut tx.open_table(&activities_by_object::TABLE)?)?;
            Self::drain_table_tx(&mut tx.open_table(&activities_by_target::TABLE)?)?;
            Self::drain_table_tx(&mut tx.open_table(&activity_parents::TABLE)?)?;
            Ok(())
        })
        .await?;
        info!(target: LOG_TARGET, "Cleared all activities");
        Ok(())
    }
}
