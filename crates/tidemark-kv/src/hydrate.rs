//! Hydration: reassembling fully nested activities from their dehydrated
//! records.
//!
//! Dehydrated activities reference objects by id string and other
//! activities through compact projections (`{"objectType": "activity",
//! "id": ...}`) in object slots, `inReplyTo` lists and response-slot
//! items. Hydration runs fetch rounds to a fixed point:
//!
//! 1. collect projection ids not seen yet, fetch them, and splice the
//!    fetched record into the projection in place;
//! 2. collect object id strings not attempted yet and fetch them in one
//!    batch (ids that do not resolve hydrate to `{}`);
//! 3. substitute known ids throughout, element-wise in lists;
//!
//! until a round discovers nothing new. Each splice carries the chain of
//! activity ids above it, so mutually referencing activities terminate:
//! a projection whose id is already on the chain is left compact.
//!
//! Afterwards response-slot items whose sub-activity no longer exists are
//! dropped and `totalItems` recomputed.

use std::collections::{BTreeMap, BTreeSet};

use redb_bincode::ReadableTable as _;
use serde_json::{Value, json};
use tidemark_core::model::{OBJECT_FIELDS, RESPONSE_FIELDS, audience_fields};
use tidemark_core::{Document, id};
use tracing::debug;

use super::{DbResult, KvStreamDb, LOG_TARGET, activities, objects};

impl KvStreamDb {
    pub(crate) async fn hydrate_activities(
        &self,
        mut hydrating: Vec<Document>,
    ) -> DbResult<Vec<Document>> {
        // records already in hand are reused instead of refetched
        let mut activity_records: BTreeMap<String, Document> = hydrating
            .iter()
            .filter_map(|activity| {
                let activity_id = activity.get("id").and_then(id::extract_id)?;
                Some((activity_id, activity.clone()))
            })
            .collect();
        let mut attempted: BTreeSet<String> = activity_records.keys().cloned().collect();
        let mut missing_activities: BTreeSet<String> = BTreeSet::new();
        let mut objects_cache: BTreeMap<String, Document> = BTreeMap::new();

        let mut rounds = 0usize;
        loop {
            let mut changed = false;
            rounds += 1;

            let mut wanted: BTreeSet<String> = BTreeSet::new();
            for activity in &hydrating {
                collect_activity_refs(activity, &mut wanted);
            }
            wanted.retain(|r| !attempted.contains(r));
            if !wanted.is_empty() {
                let fetched = self.fetch_activity_docs(&wanted).await?;
                for wanted_id in &wanted {
                    attempted.insert(wanted_id.clone());
                    if !fetched.contains_key(wanted_id) {
                        missing_activities.insert(wanted_id.clone());
                    }
                }
                activity_records.extend(fetched);
                changed = true;
            }

            for activity in &mut hydrating {
                let mut chain: Vec<String> = activity
                    .get("id")
                    .and_then(id::extract_id)
                    .into_iter()
                    .collect();
                splice_doc(activity, &activity_records, &mut chain);
            }

            let mut obj_wanted: BTreeSet<String> = BTreeSet::new();
            for activity in &hydrating {
                collect_object_ids(activity, &mut obj_wanted);
            }
            obj_wanted.retain(|obj_id| !objects_cache.contains_key(obj_id));
            if !obj_wanted.is_empty() {
                let fetched = self.fetch_object_docs(&obj_wanted).await?;
                for obj_id in obj_wanted {
                    let doc = fetched.get(&obj_id).cloned().unwrap_or_default();
                    objects_cache.insert(obj_id, doc);
                }
                changed = true;
            }

            for activity in &mut hydrating {
                substitute_object_refs(activity, &objects_cache);
            }

            if !changed {
                break;
            }
        }

        for activity in &mut hydrating {
            prune_missing_items(activity, &missing_activities);
        }

        debug!(
            target: LOG_TARGET,
            activities = hydrating.len(),
            objects = objects_cache.len(),
            rounds,
            "Hydrated activities"
        );

        Ok(hydrating)
    }

    pub(crate) async fn fetch_activity_docs(
        &self,
        ids: &BTreeSet<String>,
    ) -> DbResult<BTreeMap<String, Document>> {
        self.read_with(|tx| {
            let table = tx.open_table(&activities::TABLE)?;
            let mut out = BTreeMap::new();
            for record_id in ids {
                if let Some(record) = table.get(record_id)?.map(|g| g.value()) {
                    out.insert(record_id.clone(), Self::parse_stored(record_id, &record)?);
                }
            }
            Ok(out)
        })
        .await
    }

    pub(crate) async fn fetch_object_docs(
        &self,
        ids: &BTreeSet<String>,
    ) -> DbResult<BTreeMap<String, Document>> {
        self.read_with(|tx| {
            let table = tx.open_table(&objects::TABLE)?;
            let mut out = BTreeMap::new();
            for record_id in ids {
                if let Some(record) = table.get(record_id)?.map(|g| g.value()) {
                    out.insert(record_id.clone(), Self::parse_stored(record_id, &record)?);
                }
            }
            Ok(out)
        })
        .await
    }
}

fn is_activity_projection(map: &Document) -> bool {
    map.get("objectType").and_then(Value::as_str) == Some("activity")
}

/// Ids of all activities referenced through projections anywhere in the
/// document: object slots, `inReplyTo` entries, response items, and the
/// content already spliced into any of those.
fn collect_activity_refs(doc: &Document, out: &mut BTreeSet<String>) {
    for field in OBJECT_FIELDS {
        if let Some(Value::Object(inner)) = doc.get(*field) {
            collect_projection_refs(inner, out);
        }
    }
    if let Some(Value::Array(entries)) = doc.get("inReplyTo") {
        for entry in entries {
            if let Value::Object(inner) = entry {
                collect_projection_refs(inner, out);
            }
        }
    }
    for field in RESPONSE_FIELDS {
        for item in response_items(doc, field) {
            if let Value::Object(inner) = item {
                collect_activity_refs(inner, out);
            }
        }
    }
}

fn collect_projection_refs(map: &Document, out: &mut BTreeSet<String>) {
    if is_activity_projection(map) {
        if let Some(ref_id) = map.get("id").and_then(id::extract_id) {
            out.insert(ref_id);
        }
        collect_activity_refs(map, out);
    }
    if let Some(Value::Array(entries)) = map.get("inReplyTo") {
        for entry in entries {
            if let Value::Object(inner) = entry {
                if let Some(ref_id) = inner.get("id").and_then(id::extract_id) {
                    out.insert(ref_id);
                }
                collect_activity_refs(inner, out);
            }
        }
    }
}

/// Merge fetched activity records into every projection of the document.
/// `chain` holds the activity ids above the current node; projections
/// whose id is already on the chain stay compact, which is what makes
/// cyclic references terminate.
fn splice_doc(doc: &mut Document, records: &BTreeMap<String, Document>, chain: &mut Vec<String>) {
    for field in OBJECT_FIELDS {
        if let Some(Value::Object(inner)) = doc.get_mut(*field) {
            splice_projection(inner, records, chain);
        }
    }
    if let Some(Value::Array(entries)) = doc.get_mut("inReplyTo") {
        for entry in entries {
            if let Value::Object(inner) = entry {
                splice_projection(inner, records, chain);
            }
        }
    }
    for field in RESPONSE_FIELDS {
        for item in response_items_mut(doc, field) {
            if let Value::Object(inner) = item {
                splice_doc(inner, records, chain);
            }
        }
    }
}

fn splice_projection(
    map: &mut Document,
    records: &BTreeMap<String, Document>,
    chain: &mut Vec<String>,
) {
    if is_activity_projection(map) {
        if let Some(ref_id) = map.get("id").and_then(id::extract_id) {
            if !chain.contains(&ref_id) {
                if let Some(record) = records.get(&ref_id) {
                    for (key, value) in record {
                        map.insert(key.clone(), value.clone());
                    }
                }
                chain.push(ref_id);
                splice_doc(map, records, chain);
                chain.pop();
            }
        }
    }

    if let Some(Value::Array(entries)) = map.get_mut("inReplyTo") {
        for entry in entries {
            if let Value::Object(inner) = entry {
                splice_projection(inner, records, chain);
            }
        }
    }
}

/// Ids of all objects referenced by id string: object slots, audience
/// lists, and the same slots inside spliced projections and response
/// items.
fn collect_object_ids(doc: &Document, out: &mut BTreeSet<String>) {
    for field in OBJECT_FIELDS.iter().copied().chain(audience_fields()) {
        match doc.get(field) {
            Some(Value::String(ref_id)) => {
                out.insert(ref_id.clone());
            }
            Some(Value::Array(items)) => {
                for item in items {
                    if let Value::String(ref_id) = item {
                        out.insert(ref_id.clone());
                    }
                }
            }
            Some(Value::Object(inner)) => {
                if is_activity_projection(inner) {
                    collect_object_ids(inner, out);
                }
                if let Some(Value::Array(entries)) = inner.get("inReplyTo") {
                    for entry in entries {
                        if let Value::Object(entry) = entry {
                            collect_object_ids(entry, out);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    for field in RESPONSE_FIELDS {
        for item in response_items(doc, field) {
            if let Value::Object(inner) = item {
                collect_object_ids(inner, out);
            }
        }
    }
}

/// Replace id strings with the fetched object records, element-wise in
/// lists. Only attempted ids are substituted; an attempted id with no
/// record hydrates to `{}`.
fn substitute_object_refs(doc: &mut Document, objects_cache: &BTreeMap<String, Document>) {
    for field in OBJECT_FIELDS.iter().copied().chain(audience_fields()) {
        match doc.get_mut(field) {
            Some(slot) if slot.is_string() => {
                let key = slot.as_str().expect("checked").to_owned();
                if let Some(obj) = objects_cache.get(&key) {
                    *slot = Value::Object(obj.clone());
                }
            }
            Some(Value::Array(items)) => {
                for item in items {
                    if let Value::String(ref_id) = &*item {
                        let key = ref_id.clone();
                        if let Some(obj) = objects_cache.get(&key) {
                            *item = Value::Object(obj.clone());
                        }
                    }
                }
            }
            Some(Value::Object(inner)) => {
                if is_activity_projection(inner) {
                    substitute_object_refs(inner, objects_cache);
                }
                if let Some(Value::Array(entries)) = inner.get_mut("inReplyTo") {
                    for entry in entries {
                        if let Value::Object(entry) = entry {
                            substitute_object_refs(entry, objects_cache);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    for field in RESPONSE_FIELDS {
        for item in response_items_mut(doc, field) {
            if let Value::Object(inner) = item {
                substitute_object_refs(inner, objects_cache);
            }
        }
    }
}

/// Drop response items whose sub-activity does not exist and recompute
/// `totalItems`; untouched (empty) slots keep their stored counter.
fn prune_missing_items(doc: &mut Document, missing: &BTreeSet<String>) {
    for field in RESPONSE_FIELDS {
        if let Some(Value::Object(slot)) = doc.get_mut(*field) {
            prune_slot(slot, missing);
        }
    }
    for field in OBJECT_FIELDS {
        if let Some(Value::Object(inner)) = doc.get_mut(*field) {
            if is_activity_projection(inner) {
                prune_missing_items(inner, missing);
            }
        }
    }
}

fn prune_slot(slot: &mut Document, missing: &BTreeSet<String>) {
    let Some(Value::Array(items)) = slot.get_mut("items") else {
        return;
    };
    if items.is_empty() {
        return;
    }

    items.retain(|item| {
        let Value::Object(inner) = item else {
            return true;
        };
        let Some(Value::Object(object)) = inner.get("object") else {
            return true;
        };
        if !is_activity_projection(object) {
            return true;
        }
        match object.get("id").and_then(id::extract_id) {
            None => false,
            Some(sub_id) => !missing.contains(&sub_id),
        }
    });

    for item in items.iter_mut() {
        if let Value::Object(inner) = item {
            prune_missing_items(inner, missing);
        }
    }

    let total = items.len();
    slot.insert("totalItems".to_owned(), json!(total));
}

fn response_items<'a>(doc: &'a Document, field: &str) -> impl Iterator<Item = &'a Value> {
    doc.get(field)
        .and_then(Value::as_object)
        .and_then(|slot| slot.get("items"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn response_items_mut<'a>(doc: &'a mut Document, field: &str) -> impl Iterator<Item = &'a mut Value> {
    doc.get_mut(field)
        .and_then(Value::as_object_mut)
        .and_then(|slot| slot.get_mut("items"))
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
}
