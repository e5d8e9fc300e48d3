//! Low-level per-transaction record and index maintenance.

use redb_bincode::{ReadableTable as _, WriteTransaction};
use snafu::ResultExt as _;
use tidemark_core::{Document, Timestamp, id};

use super::{
    CorruptRecordSnafu, DbResult, DocRecord, KvStreamDb, ParentRecord, activities,
    activities_by_actor, activities_by_created, activities_by_modified, activities_by_object,
    activities_by_target, activities_by_verb, activity_parents, objects, objects_by_created,
    objects_by_modified,
};

/// The (verb, actor, object, target) index values of a dehydrated
/// activity record. Slots may legitimately be absent (`target`) or not
/// reducible to an id.
fn activity_index_values(doc: &Document) -> [Option<String>; 4] {
    ["verb", "actor", "object", "target"]
        .map(|slot| doc.get(slot).and_then(id::extract_id))
}

impl KvStreamDb {
    pub(crate) fn parse_stored(record_id: &str, record: &DocRecord) -> DbResult<Document> {
        serde_json::from_str(&record.json).context(CorruptRecordSnafu { id: record_id })
    }

    pub(crate) fn encode_doc(doc: &Document) -> String {
        serde_json::to_string(doc).expect("JSON documents always serialize")
    }

    /// Insert or overwrite one object record, preserving its creation
    /// instant across overwrites and keeping the instant indexes current.
    pub(crate) fn upsert_object_tx(
        parsed: &Document,
        now: Timestamp,
        tx: &WriteTransaction,
    ) -> DbResult<()> {
        let obj_id = parsed
            .get("id")
            .and_then(id::extract_id)
            .expect("validated objects carry an id");

        let mut objects_table = tx.open_table(&objects::TABLE)?;
        let mut by_created = tx.open_table(&objects_by_created::TABLE)?;
        let mut by_modified = tx.open_table(&objects_by_modified::TABLE)?;

        let prev = objects_table.get(&obj_id)?.map(|g| g.value());
        let created = prev.as_ref().map(|r| r.created).unwrap_or(now);
        if let Some(prev) = &prev {
            by_modified.remove(&(prev.modified, obj_id.clone()))?;
        }

        objects_table.insert(
            &obj_id,
            &DocRecord {
                created,
                modified: now,
                json: Self::encode_doc(parsed),
            },
        )?;
        by_created.insert(&(created, obj_id.clone()), &())?;
        by_modified.insert(&(now, obj_id.clone()), &())?;

        Ok(())
    }

    pub(crate) fn delete_object_tx(obj_id: &String, tx: &WriteTransaction) -> DbResult<bool> {
        let mut objects_table = tx.open_table(&objects::TABLE)?;
        let mut by_created = tx.open_table(&objects_by_created::TABLE)?;
        let mut by_modified = tx.open_table(&objects_by_modified::TABLE)?;

        let Some(prev) = objects_table.remove(obj_id)?.map(|g| g.value()) else {
            return Ok(false);
        };
        by_created.remove(&(prev.created, obj_id.clone()))?;
        by_modified.remove(&(prev.modified, obj_id.clone()))?;
        Ok(true)
    }

    /// Insert or overwrite one activity record.
    ///
    /// Keeps the creation instant and any existing parent link across
    /// overwrites, rewrites the modification index, and swaps the slot
    /// index entries when the record's slots changed. `parent_id` is set
    /// when the record is a freshly created sub-activity.
    pub(crate) fn upsert_activity_tx(
        parsed: &Document,
        parent_id: Option<&str>,
        now: Timestamp,
        tx: &WriteTransaction,
    ) -> DbResult<()> {
        let activity_id = parsed
            .get("id")
            .and_then(id::extract_id)
            .expect("validated activities carry an id");

        let mut activities_table = tx.open_table(&activities::TABLE)?;
        let mut by_created = tx.open_table(&activities_by_created::TABLE)?;
        let mut by_modified = tx.open_table(&activities_by_modified::TABLE)?;

        let prev = activities_table.get(&activity_id)?.map(|g| g.value());
        let created = prev.as_ref().map(|r| r.created).unwrap_or(now);
        if let Some(prev) = &prev {
            by_modified.remove(&(prev.modified, activity_id.clone()))?;
            let prev_doc = Self::parse_stored(&activity_id, prev)?;
            Self::remove_slot_indexes_tx(&activity_id, &prev_doc, tx)?;
        }

        activities_table.insert(
            &activity_id,
            &DocRecord {
                created,
                modified: now,
                json: Self::encode_doc(parsed),
            },
        )?;
        by_created.insert(&(created, activity_id.clone()), &())?;
        by_modified.insert(&(now, activity_id.clone()), &())?;
        Self::insert_slot_indexes_tx(&activity_id, parsed, tx)?;

        if let Some(parent) = parent_id {
            let mut parents = tx.open_table(&activity_parents::TABLE)?;
            parents.insert(
                &activity_id,
                &ParentRecord {
                    parent: parent.to_owned(),
                },
            )?;
        }

        Ok(())
    }

    fn insert_slot_indexes_tx(
        activity_id: &str,
        doc: &Document,
        tx: &WriteTransaction,
    ) -> DbResult<()> {
        let [verb, actor, object, target] = activity_index_values(doc);
        let tables = [
            (&activities_by_verb::TABLE, verb),
            (&activities_by_actor::TABLE, actor),
            (&activities_by_object::TABLE, object),
            (&activities_by_target::TABLE, target),
        ];
        for (definition, value) in tables {
            if let Some(value) = value {
                let mut table = tx.open_table(definition)?;
                table.insert(&(value, activity_id.to_owned()), &())?;
            }
        }
        Ok(())
    }

    fn remove_slot_indexes_tx(
        activity_id: &str,
        doc: &Document,
        tx: &WriteTransaction,
    ) -> DbResult<()> {
        let [verb, actor, object, target] = activity_index_values(doc);
        let tables = [
            (&activities_by_verb::TABLE, verb),
            (&activities_by_actor::TABLE, actor),
            (&activities_by_object::TABLE, object),
            (&activities_by_target::TABLE, target),
        ];
        for (definition, value) in tables {
            if let Some(value) = value {
                let mut table = tx.open_table(definition)?;
                table.remove(&(value, activity_id.to_owned()))?;
            }
        }
        Ok(())
    }

    /// Remove one activity record and every index entry derived from it.
    /// Does not cascade; the caller walks sub-activities first.
    pub(crate) fn delete_activity_tx(
        activity_id: &String,
        tx: &WriteTransaction,
    ) -> DbResult<bool> {
        let mut activities_table = tx.open_table(&activities::TABLE)?;
        let mut by_created = tx.open_table(&activities_by_created::TABLE)?;
        let mut by_modified = tx.open_table(&activities_by_modified::TABLE)?;

        let Some(prev) = activities_table.remove(activity_id)?.map(|g| g.value()) else {
            return Ok(false);
        };
        by_created.remove(&(prev.created, activity_id.clone()))?;
        by_modified.remove(&(prev.modified, activity_id.clone()))?;

        let prev_doc = Self::parse_stored(activity_id, &prev)?;
        Self::remove_slot_indexes_tx(activity_id, &prev_doc, tx)?;

        let mut parents = tx.open_table(&activity_parents::TABLE)?;
        parents.remove(activity_id)?;

        Ok(true)
    }

    pub(crate) fn get_parent_tx(
        sub_activity_id: &String,
        table: &impl activity_parents::ReadableTable,
    ) -> DbResult<Option<String>> {
        Ok(table.get(sub_activity_id)?.map(|g| g.value().parent))
    }

    /// Fetch one activity in its stored (dehydrated) form.
    pub(crate) async fn get_activity_raw(&self, activity_id: &str) -> DbResult<Option<Document>> {
        let activity_id = activity_id.to_owned();
        self.read_with(|tx| {
            let table = tx.open_table(&activities::TABLE)?;
            let Some(record) = table.get(&activity_id)?.map(|g| g.value()) else {
                return Ok(None);
            };
            Self::parse_stored(&activity_id, &record).map(Some)
        })
        .await
    }

    pub(crate) async fn contains_object(&self, obj_id: &str) -> DbResult<bool> {
        let obj_id = obj_id.to_owned();
        self.read_with(|tx| {
            let table = tx.open_table(&objects::TABLE)?;
            Ok(table.get(&obj_id)?.is_some())
        })
        .await
    }

    pub(crate) async fn contains_activity(&self, activity_id: &str) -> DbResult<bool> {
        let activity_id = activity_id.to_owned();
        self.read_with(|tx| {
            let table = tx.open_table(&activities::TABLE)?;
            Ok(table.get(&activity_id)?.is_some())
        })
        .await
    }
}
