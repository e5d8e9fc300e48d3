use std::collections::HashMap;
use std::sync::Arc;

use bon::Builder;
use serde_json::Value;
use tidemark_aggregate::Aggregator;
use tidemark_core::Document;

/// Caller-supplied predicate evaluated on each raw (dehydrated) record
/// during the property-reduce stage.
pub type RawFilter = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// One read through the query path.
///
/// `filters` is deliberately three-valued: `None` means "no property
/// filter", `Some` with entries keeps records where *any* (key, allowed)
/// pair matches, and `Some` of an empty map rejects everything.
#[derive(Builder)]
pub struct ActivityQuery {
    /// The requested ids; the response preserves this order.
    pub ids: Vec<String>,
    /// Keep records where any key's value is in the allowed list.
    pub filters: Option<HashMap<String, Vec<Value>>>,
    /// Extra predicate, ANDed with `filters`.
    pub raw_filter: Option<RawFilter>,
    /// Audience slot name to allowed object ids.
    pub audience_targeting: Option<HashMap<String, Vec<String>>>,
    /// With audience targeting set, also keep records that have no
    /// audience slots at all.
    #[builder(default)]
    pub include_public: bool,
    /// Aggregation stages applied, in order, to the hydrated result.
    #[builder(default)]
    pub aggregation_pipeline: Vec<Box<dyn Aggregator>>,
}

impl ActivityQuery {
    /// A plain fetch of the given ids, no filtering, no aggregation.
    pub fn for_ids<I>(ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::builder()
            .ids(ids.into_iter().map(Into::into).collect())
            .build()
    }
}
