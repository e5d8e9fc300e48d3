//! The query path: map the requested ids to raw records, reduce by
//! audience and property filters, sort by creation instant, and reorder
//! into the caller's id order.
//!
//! On a clustered store these stages would ship to the server; an
//! embedded store runs them over the fetched records, stage order and
//! filter semantics unchanged.

use std::collections::HashMap;

use redb_bincode::ReadableTable as _;
use serde_json::{Value, json};
use tidemark_backend::RawFilter;
use tidemark_core::model::audience_fields;
use tidemark_core::{Document, id};
use tracing::debug;

use super::{DbResult, KvStreamDb, LOG_TARGET, activities};

/// The filter portion of one activity read.
#[derive(Default)]
pub(crate) struct QueryFilters<'a> {
    /// `None` = no property filter; an empty map rejects everything.
    pub filters: Option<&'a HashMap<String, Vec<Value>>>,
    pub raw_filter: Option<&'a RawFilter>,
    pub audience_targeting: Option<&'a HashMap<String, Vec<String>>>,
    pub include_public: bool,
}

impl KvStreamDb {
    /// Fetch the requested activities in dehydrated form, filtered and
    /// ordered. Unknown ids drop out silently.
    pub(crate) async fn get_many_activities(
        &self,
        activity_ids: &[String],
        filters: QueryFilters<'_>,
    ) -> DbResult<Vec<Document>> {
        // map: fetch each requested record, stamping its creation instant
        // under the transient `timestamp` key
        let mut records = self
            .read_with(|tx| {
                let table = tx.open_table(&activities::TABLE)?;
                let mut records = Vec::with_capacity(activity_ids.len());
                for activity_id in activity_ids {
                    let Some(record) = table.get(activity_id)?.map(|g| g.value()) else {
                        continue;
                    };
                    let mut doc = Self::parse_stored(activity_id, &record)?;
                    doc.insert(
                        "timestamp".to_owned(),
                        json!(record.created.as_millis()),
                    );
                    records.push(doc);
                }
                Ok(records)
            })
            .await?;

        if let Some(targeting) = filters.audience_targeting {
            records.retain(|record| {
                audience_keeps(record, targeting, filters.include_public)
            });
        }

        if filters.filters.is_some() || filters.raw_filter.is_some() {
            records.retain(|record| {
                property_keeps(record, filters.filters, filters.raw_filter)
            });
        }

        records.sort_by_key(|record| {
            record
                .get("timestamp")
                .and_then(Value::as_u64)
                .unwrap_or_default()
        });

        debug!(
            target: LOG_TARGET,
            requested = activity_ids.len(),
            returned = records.len(),
            "Activity query"
        );

        // reorder into the caller's id order
        let mut by_id: HashMap<String, Document> = records
            .into_iter()
            .filter_map(|record| {
                let record_id = record.get("id").and_then(id::extract_id)?;
                Some((record_id, record))
            })
            .collect();
        Ok(activity_ids
            .iter()
            .filter_map(|activity_id| by_id.remove(activity_id))
            .collect())
    }
}

/// Audience reduce: a record survives when it is public (and the caller
/// asked for public records), or when some configured audience slot
/// intersects the allowed ids.
fn audience_keeps(
    record: &Document,
    targeting: &HashMap<String, Vec<String>>,
    include_public: bool,
) -> bool {
    if include_public && audience_fields().all(|field| !record.contains_key(field)) {
        return true;
    }

    for field in audience_fields() {
        let (Some(Value::Array(members)), Some(allowed)) =
            (record.get(field), targeting.get(field))
        else {
            continue;
        };
        let hit = members
            .iter()
            .filter_map(id::extract_id)
            .any(|member| allowed.contains(&member));
        if hit {
            return true;
        }
    }
    false
}

/// Property reduce: the raw filter must pass when set, and when a filter
/// map is provided at least one (key, allowed) pair must match. An empty
/// filter map therefore rejects everything; callers encode "no filter" by
/// omitting the map.
fn property_keeps(
    record: &Document,
    filters: Option<&HashMap<String, Vec<Value>>>,
    raw_filter: Option<&RawFilter>,
) -> bool {
    if let Some(raw_filter) = raw_filter {
        if !(raw_filter.as_ref())(record) {
            return false;
        }
    }

    match filters {
        None => true,
        Some(filters) => filters.iter().any(|(key, allowed)| {
            record
                .get(key)
                .is_some_and(|value| allowed.contains(value))
        }),
    }
}
