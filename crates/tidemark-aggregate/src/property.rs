use regex::Regex;
use serde_json::{Value, json};
use snafu::ResultExt as _;
use tidemark_core::{Document, dotpath};

use crate::{AggregateResult, Aggregator, InvalidPatternSnafu};

/// Groups activities by the values at a list of (possibly dotted)
/// attribute paths and folds each multi-element group into one entry whose
/// non-group fields are "listified".
///
/// Grouping is run-length: only consecutive activities with equal key
/// tuples form a group. The backend delivers activities in stable
/// timestamp order, so partial runs represent bursts worth collapsing;
/// callers that want global grouping presort.
pub struct PropertyAggregator {
    properties: Vec<String>,
    participation: Option<(String, Regex)>,
}

/// Group key for one activity: either the tuple of present property
/// values, or a unique per-position marker for activities that do not
/// participate in grouping.
#[derive(Debug, Clone, PartialEq)]
enum GroupKey {
    Solo(usize),
    Values(Vec<Value>),
}

impl PropertyAggregator {
    pub fn new(properties: Vec<String>) -> Self {
        Self {
            properties,
            participation: None,
        }
    }

    /// Restrict participation: only activities whose value at `key`
    /// matches `pattern` (anchored at the start, like a prefix match) are
    /// grouped; the rest pass through untouched.
    pub fn with_participation(
        properties: Vec<String>,
        key: impl Into<String>,
        pattern: &str,
    ) -> AggregateResult<Self> {
        let regex =
            Regex::new(&format!("\\A(?:{pattern})")).context(InvalidPatternSnafu { pattern })?;
        Ok(Self {
            properties,
            participation: Some((key.into(), regex)),
        })
    }

    fn group_key(&self, index: usize, activity: &Document) -> GroupKey {
        if let Some((key, regex)) = &self.participation {
            let participates = dotpath::get(activity, key)
                .map(match_repr)
                .is_some_and(|s| regex.is_match(&s));
            if !participates {
                return GroupKey::Solo(index);
            }
        }

        GroupKey::Values(
            self.properties
                .iter()
                .filter_map(|path| dotpath::get(activity, path).cloned())
                .collect(),
        )
    }

    /// Listify the first group member: wrap every top-level value that is
    /// neither a group attribute nor the root of a dotted group attribute
    /// into a one-element list, and likewise the siblings of the deepest
    /// segment of each dotted group attribute (by dotted path, leaving the
    /// nested root itself unwrapped).
    fn listify(&self, activity: &Document) -> AggregateResult<(Vec<String>, Document)> {
        let mut out = activity.clone();
        let mut nested_roots: Vec<String> = Vec::new();

        for attr in &self.properties {
            let Some((parent_path, deepest)) = attr.rsplit_once('.') else {
                continue;
            };
            if dotpath::get(activity, attr).is_none() {
                continue;
            }
            let root = attr.split_once('.').expect("dotted").0;
            nested_roots.push(root.to_owned());

            if let Some(Value::Object(nested)) = dotpath::get(activity, parent_path) {
                for (key, value) in nested.clone() {
                    if key != deepest {
                        dotpath::set(&mut out, &format!("{parent_path}.{key}"), json!([value]))?;
                    }
                }
            }
        }

        for (key, value) in activity {
            if !self.properties.iter().any(|p| p == key)
                && !nested_roots.iter().any(|r| r == key)
            {
                out.insert(key.clone(), json!([value]));
            }
        }

        Ok((nested_roots, out))
    }

    fn fold_group(
        &self,
        key_values: Vec<Value>,
        members: Vec<Document>,
    ) -> AggregateResult<Document> {
        let mut members = members.into_iter();
        let first = members.next().expect("group is never empty");
        let (nested_roots, mut folded) = self.listify(&first)?;

        // appends never add top-level keys, so the snapshot stays valid
        let keys: Vec<String> = folded.keys().cloned().collect();

        for activity in members {
            for key in &keys {
                if self.properties.iter().any(|p| p == key)
                    || nested_roots.iter().any(|r| r == key)
                {
                    continue;
                }
                if let Some(Value::Array(list)) = folded.get_mut(key) {
                    list.push(activity.get(key).cloned().unwrap_or(Value::Null));
                }
            }

            for attr in &self.properties {
                let Some((parent_path, deepest)) = attr.rsplit_once('.') else {
                    continue;
                };
                if dotpath::get(&activity, attr).is_none() {
                    continue;
                }
                let Some(Value::Object(nested)) = dotpath::get(&activity, parent_path) else {
                    continue;
                };
                for (key, value) in nested.clone() {
                    if key == deepest {
                        continue;
                    }
                    let dotted = format!("{parent_path}.{key}");
                    if let Some(Value::Array(list)) = dotpath::get_mut(&mut folded, &dotted) {
                        list.push(value);
                    }
                }
            }
        }

        folded.insert(
            "grouped_by_attributes".to_owned(),
            json!(self.properties),
        );
        folded.insert("grouped_by_values".to_owned(), Value::Array(key_values));
        Ok(folded)
    }
}

impl Aggregator for PropertyAggregator {
    fn process(
        &self,
        current: Vec<Document>,
        _original: &[Document],
        _pipeline: &[Box<dyn Aggregator>],
    ) -> AggregateResult<Vec<Document>> {
        if self.properties.is_empty() {
            return Ok(current);
        }

        // run-length grouping over consecutive equal keys
        let mut groups: Vec<(GroupKey, Vec<Document>)> = Vec::new();
        for (index, activity) in current.into_iter().enumerate() {
            let key = self.group_key(index, &activity);
            match groups.last_mut() {
                Some((last_key, members)) if *last_key == key => members.push(activity),
                _ => groups.push((key, vec![activity])),
            }
        }

        let mut out = Vec::with_capacity(groups.len());
        for (key, mut members) in groups {
            if members.len() == 1 {
                out.push(members.remove(0));
                continue;
            }
            let GroupKey::Values(values) = key else {
                // solo keys are unique per position and never group
                out.extend(members);
                continue;
            };
            out.push(self.fold_group(values, members)?);
        }
        Ok(out)
    }
}

/// How a value reads for the participation regex: strings as-is, anything
/// else through its JSON rendering (`3` matches `3`).
fn match_repr(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
