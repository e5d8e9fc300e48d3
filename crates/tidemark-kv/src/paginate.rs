//! Cursor pagination and scans over the admin/analytic index tables.
//!
//! These scans are the reason the instant and slot index tables exist;
//! the id-driven query path never touches them.

use redb_bincode::ReadableTable as _;
use tidemark_core::Timestamp;

use crate::{
    DbResult, KvStreamDb, activities_by_actor, activities_by_created, activities_by_modified,
    activities_by_object, activities_by_target, activities_by_verb, objects_by_created,
    objects_by_modified,
};

/// An instant-ordered index page plus the cursor of the next page, when
/// there is one.
pub type InstantPage = (Vec<(Timestamp, String)>, Option<(Timestamp, String)>);

/// All instant index tables share this definition shape.
type InstantIndexDefinition = redb_bincode::TableDefinition<'static, (Timestamp, String), ()>;

/// Likewise for the slot index tables.
type SlotIndexDefinition = redb_bincode::TableDefinition<'static, (String, String), ()>;

impl KvStreamDb {
    pub fn paginate_table<K, V, R>(
        table: &impl redb_bincode::ReadableTable<K, V>,
        cursor: Option<K>,
        limit: usize,
        filter_fn: impl Fn(K, V) -> DbResult<Option<R>> + Send + 'static,
    ) -> DbResult<(Vec<R>, Option<K>)>
    where
        K: bincode::Decode<()> + bincode::Encode,
        V: bincode::Decode<()> + bincode::Encode,
    {
        let mut ret = vec![];

        for entry in if let Some(cursor) = cursor {
            table.range(&cursor..)?
        } else {
            table.range(..)?
        } {
            let (k, v) = entry?;

            let k = k.value();
            if limit <= ret.len() {
                return Ok((ret, Some(k)));
            }

            if let Some(r) = filter_fn(k, v.value())? {
                ret.push(r);
            }
        }

        Ok((ret, None))
    }

    async fn paginate_instant_index(
        &self,
        definition: &'static InstantIndexDefinition,
        cursor: Option<(Timestamp, String)>,
        limit: usize,
    ) -> DbResult<InstantPage> {
        self.read_with(|tx| {
            let table = tx.open_table(definition)?;
            Self::paginate_table(&table, cursor, limit, |k, ()| Ok(Some(k)))
        })
        .await
    }

    /// Activity ids in creation order, oldest first. The returned cursor,
    /// when present, starts the next page.
    pub async fn paginate_activities_by_created(
        &self,
        cursor: Option<(Timestamp, String)>,
        limit: usize,
    ) -> DbResult<InstantPage> {
        self.paginate_instant_index(&activities_by_created::TABLE, cursor, limit)
            .await
    }

    /// Activity ids ordered by their most recent store.
    pub async fn paginate_activities_by_modified(
        &self,
        cursor: Option<(Timestamp, String)>,
        limit: usize,
    ) -> DbResult<InstantPage> {
        self.paginate_instant_index(&activities_by_modified::TABLE, cursor, limit)
            .await
    }

    /// Object ids in creation order, oldest first.
    pub async fn paginate_objects_by_created(
        &self,
        cursor: Option<(Timestamp, String)>,
        limit: usize,
    ) -> DbResult<InstantPage> {
        self.paginate_instant_index(&objects_by_created::TABLE, cursor, limit)
            .await
    }

    /// Object ids ordered by their most recent store.
    pub async fn paginate_objects_by_modified(
        &self,
        cursor: Option<(Timestamp, String)>,
        limit: usize,
    ) -> DbResult<InstantPage> {
        self.paginate_instant_index(&objects_by_modified::TABLE, cursor, limit)
            .await
    }

    async fn scan_slot_index(
        &self,
        definition: &'static SlotIndexDefinition,
        key: String,
        limit: usize,
    ) -> DbResult<Vec<String>> {
        self.read_with(|tx| {
            let table = tx.open_table(definition)?;
            let mut ret = vec![];
            for entry in table.range(&(key.clone(), String::new())..)? {
                let (k, _) = entry?;
                let (entry_key, activity_id) = k.value();
                if entry_key != key || limit <= ret.len() {
                    break;
                }
                ret.push(activity_id);
            }
            Ok(ret)
        })
        .await
    }

    /// Ids of activities carrying the given verb, up to `limit`.
    pub async fn scan_activities_by_verb(
        &self,
        verb: impl Into<String>,
        limit: usize,
    ) -> DbResult<Vec<String>> {
        self.scan_slot_index(&activities_by_verb::TABLE, verb.into(), limit)
            .await
    }

    /// Ids of activities whose actor is the given object id.
    pub async fn scan_activities_by_actor(
        &self,
        actor_id: impl Into<String>,
        limit: usize,
    ) -> DbResult<Vec<String>> {
        self.scan_slot_index(&activities_by_actor::TABLE, actor_id.into(), limit)
            .await
    }

    /// Ids of activities whose object is the given object id.
    pub async fn scan_activities_by_object(
        &self,
        object_id: impl Into<String>,
        limit: usize,
    ) -> DbResult<Vec<String>> {
        self.scan_slot_index(&activities_by_object::TABLE, object_id.into(), limit)
            .await
    }

    /// Ids of activities targeting the given object id.
    pub async fn scan_activities_by_target(
        &self,
        target_id: impl Into<String>,
        limit: usize,
    ) -> DbResult<Vec<String>> {
        self.scan_slot_index(&activities_by_target::TABLE, target_id.into(), limit)
            .await
    }
}
