//! Read-time aggregation pipeline.
//!
//! A pipeline is an ordered list of [`Aggregator`] stages. Each stage
//! receives the activity list as it stands, a snapshot of the list before
//! any stage ran, and the pipeline itself, and returns a new list. Stages
//! are free to pass entries through or collapse them.

mod property;

use snafu::Snafu;
use tidemark_core::Document;
use tidemark_core::dotpath::PathError;

pub use self::property::PropertyAggregator;

#[derive(Debug, Snafu)]
pub enum AggregateError {
    #[snafu(display("invalid participation pattern `{pattern}`"))]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
    #[snafu(transparent)]
    Path { source: PathError },
}

pub type AggregateResult<T> = std::result::Result<T, AggregateError>;

pub trait Aggregator: Send + Sync {
    /// Process one stage of the pipeline.
    ///
    /// `original` is a deep copy of the fully hydrated list before any
    /// aggregation ran; `pipeline` is the whole stage list for stages that
    /// want to inspect their siblings.
    fn process(
        &self,
        current: Vec<Document>,
        original: &[Document],
        pipeline: &[Box<dyn Aggregator>],
    ) -> AggregateResult<Vec<Document>>;
}

/// Run every stage in order. Stage errors are not caught here; the first
/// failure aborts the pipeline.
pub fn run_pipeline(
    pipeline: &[Box<dyn Aggregator>],
    activities: Vec<Document>,
) -> AggregateResult<Vec<Document>> {
    if pipeline.is_empty() {
        return Ok(activities);
    }

    let original = activities.clone();
    let mut current = activities;
    for aggregator in pipeline {
        current = aggregator.process(current, &original, pipeline)?;
    }
    Ok(current)
}
