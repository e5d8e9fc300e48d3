//! Table definitions for the KV stream store.
//!
//! # Data Model Overview
//!
//! The store owns two record families, `objects` and `activities`, both
//! keyed by their opaque string id. The record value is the JSON
//! serialization of the *dehydrated* document: every object-valued slot of
//! an activity holds the referenced object's id string, audience lists
//! hold id strings, and response-slot projections hold the sub-activity id
//! only. The full nested shape is reassembled at read time by the
//! hydration pass.
//!
//! Alongside each record the store keeps its creation and modification
//! instants. The `*_by_created`/`*_by_modified` tables are time-ordered
//! mirrors of those instants, and the `activities_by_*` tables mirror an
//! activity's main slots. All of them exist for admin and analytic scans;
//! the query path reads records by id only.
//!
//! Sub-activities (replies and likes) additionally record the id of the
//! activity they were made on in [`activity_parents`], which is how a
//! sub-activity delete finds the parent whose projection list it must
//! mend.

use bincode::{Decode, Encode};
use tidemark_core::Timestamp;

#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = redb_bincode::TableDefinition<'a, Key, Value>;
            pub trait ReadableTable: redb_bincode::ReadableTable<Key, Value> {}
            impl<RT> ReadableTable for RT where RT: redb_bincode::ReadableTable<Key, Value> {}
            pub type Table<'a> = redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

// ============================================================================
// SYSTEM TABLES
// ============================================================================

def_table! {
    /// Tracks database/schema version for migrations.
    db_version: () => u64
}

// ============================================================================
// RECORD TABLES
// ============================================================================

def_table! {
    /// Object records: actors, items, media containers.
    ///
    /// Key: object id. Value: the stored JSON plus its instants.
    objects: String => DocRecord
}

def_table! {
    /// Activity records in dehydrated form.
    ///
    /// Key: activity id. Value: the stored JSON plus its instants.
    activities: String => DocRecord
}

// ============================================================================
// INSTANT INDEXES
// ============================================================================

def_table! {
    /// Objects ordered by creation instant.
    ///
    /// Key: (created, object_id)
    objects_by_created: (Timestamp, String) => ()
}

def_table! {
    /// Objects ordered by their most recent store.
    ///
    /// Key: (modified, object_id); the entry is rewritten on every store.
    objects_by_modified: (Timestamp, String) => ()
}

def_table! {
    /// Activities ordered by creation instant.
    ///
    /// Key: (created, activity_id). The creation instant survives updates,
    /// so this is the stable timeline of the stream.
    activities_by_created: (Timestamp, String) => ()
}

def_table! {
    /// Activities ordered by their most recent store.
    ///
    /// Key: (modified, activity_id); the entry is rewritten on every store.
    activities_by_modified: (Timestamp, String) => ()
}

// ============================================================================
// SLOT INDEXES
// ============================================================================

def_table! {
    /// Activities grouped by verb.
    ///
    /// Key: (verb, activity_id)
    activities_by_verb: (String, String) => ()
}

def_table! {
    /// Activities grouped by actor object id.
    ///
    /// Key: (actor_id, activity_id)
    activities_by_actor: (String, String) => ()
}

def_table! {
    /// Activities grouped by object id.
    ///
    /// Key: (object_id, activity_id)
    activities_by_object: (String, String) => ()
}

def_table! {
    /// Activities grouped by target object id; only present when the
    /// activity carries a target.
    ///
    /// Key: (target_id, activity_id)
    activities_by_target: (String, String) => ()
}

// ============================================================================
// SUB-ACTIVITY TABLES
// ============================================================================

def_table! {
    /// Parent back-reference for sub-activities.
    ///
    /// Key: sub-activity id. Value: the parent activity id. Written when a
    /// reply/like is created, removed with the sub-activity.
    activity_parents: String => ParentRecord
}

/// One stored document plus the instants its index entries are keyed by.
///
/// `created` is set once and survives overwrites; `modified` is rewritten
/// on every store.
#[derive(Debug, Encode, Decode, Clone)]
pub struct DocRecord {
    pub created: Timestamp,
    pub modified: Timestamp,
    /// JSON serialization of the dehydrated document.
    pub json: String,
}

/// The parent id a sub-activity was made on.
#[derive(Debug, Encode, Decode, Clone)]
pub struct ParentRecord {
    pub parent: String,
}
