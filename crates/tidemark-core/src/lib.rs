//! Core model layer of the tidemark engine.
//!
//! Activity Streams documents are schemaless JSON records, so the engine
//! works on [`Document`]s (JSON maps) throughout. This crate provides the
//! typed edges around them:
//!
//! - [`model`]: type descriptors for objects, activities and media links,
//!   validation and storage normalization ("parsing"),
//! - [`dotpath`]: dotted-path access into nested documents,
//! - [`datetime`]: the [`Timestamp`] index instant and RFC 3339 handling,
//! - [`id`]: opaque string id generation and coercion.

pub mod datetime;
pub mod dotpath;
pub mod id;
pub mod model;

pub use datetime::Timestamp;

/// A schemaless JSON record, the currency of the whole engine.
pub type Document = serde_json::Map<String, serde_json::Value>;
