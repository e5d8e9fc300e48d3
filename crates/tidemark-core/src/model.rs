//! Type descriptors and normalization for Activity Streams documents.
//!
//! The documents themselves stay schemaless; what the engine knows about
//! each entity family (required fields, reserved fields, which slots hold
//! object references) lives on a [`ModelDescriptor`], not on instances.

use serde_json::{Map, Value, json};
use snafu::Snafu;

use crate::{Document, Timestamp, datetime, id};

/// Slots whose value is an object reference (an id string when stored, a
/// full record when hydrated).
pub const OBJECT_FIELDS: &[&str] = &[
    "actor",
    "generator",
    "object",
    "provider",
    "target",
    "author",
];

/// Fields normalized to RFC 3339 UTC strings on every parse.
pub const DATETIME_FIELDS: &[&str] = &["published", "updated"];

/// Audience slots delivered directly to their targets.
pub const DIRECT_AUDIENCE_FIELDS: &[&str] = &["to", "bto"];

/// Audience slots carried for visibility only.
pub const INDIRECT_AUDIENCE_FIELDS: &[&str] = &["cc", "bcc"];

/// Response slots: a counter plus a newest-first list of sub-activity
/// projections.
pub const RESPONSE_FIELDS: &[&str] = &["replies", "likes"];

/// All four audience slots, direct first.
pub fn audience_fields() -> impl Iterator<Item = &'static str> {
    DIRECT_AUDIENCE_FIELDS
        .iter()
        .chain(INDIRECT_AUDIENCE_FIELDS)
        .copied()
}

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[snafu(display("required field missing: `{field}`"))]
    RequiredFieldMissing { field: String },
    #[snafu(display("reserved field name used: `{field}`"))]
    ReservedFieldUsed { field: String },
    #[snafu(display("sub-activity verb `{verb}` is not supported"))]
    UnsupportedVerb { verb: String },
    #[snafu(display("expected a `{expected}`, found verb `{actual}`"))]
    VerbMismatch { expected: String, actual: String },
}

pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// What the engine knows about one entity family.
///
/// The slot taxonomy ([`OBJECT_FIELDS`], audience fields, ...) is shared by
/// all families; only the per-family field sets live here.
#[derive(Debug, Clone, Copy)]
pub struct ModelDescriptor {
    pub required_fields: &'static [&'static str],
    pub media_fields: &'static [&'static str],
    /// Fields maintained by the engine. Caller-supplied values are rejected
    /// by [`validate`](Self::validate), except for the published/updated
    /// timestamp pair which may be set explicitly.
    pub reserved_fields: &'static [&'static str],
    /// Whether parsing stamps `published`/`updated` (true for first-class
    /// records, false for embedded media links).
    stamps_timestamps: bool,
}

/// First-class entity referenced by activities (user, item, media...).
pub const OBJECT: ModelDescriptor = ModelDescriptor {
    required_fields: &["objectType", "id", "published"],
    media_fields: &["image"],
    reserved_fields: &[],
    stamps_timestamps: true,
};

/// An `actor verb object [target]` event record.
pub const ACTIVITY: ModelDescriptor = ModelDescriptor {
    required_fields: &["id", "verb", "actor", "object"],
    media_fields: &["icon"],
    reserved_fields: &["published", "updated"],
    stamps_timestamps: true,
};

/// An embedded media reference (`image`/`icon` slots).
pub const MEDIA_LINK: ModelDescriptor = ModelDescriptor {
    required_fields: &["url"],
    media_fields: &[],
    reserved_fields: &[],
    stamps_timestamps: false,
};

/// Python-style truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` all
/// count as missing.
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_none_or(|f| f != 0.0),
    }
}

impl ModelDescriptor {
    /// Validate a raw caller-supplied document against this descriptor.
    ///
    /// Nested object and media slots given as records validate recursively,
    /// as do audience list elements that are records.
    pub fn validate(&self, doc: &Document) -> ValidationResult<()> {
        for field in self.required_fields {
            if !truthy(doc.get(*field)) {
                return RequiredFieldMissingSnafu { field: *field }.fail();
            }
        }

        for field in self.reserved_fields {
            if !DATETIME_FIELDS.contains(field) && truthy(doc.get(*field)) {
                return ReservedFieldUsedSnafu { field: *field }.fail();
            }
        }

        // empty records (e.g. hydrated dangling refs) are skipped, not
        // validated
        for field in self.media_fields {
            if let Some(Value::Object(inner)) = doc.get(*field) {
                if !inner.is_empty() {
                    MEDIA_LINK.validate(inner)?;
                }
            }
        }

        for field in OBJECT_FIELDS {
            if let Some(Value::Object(inner)) = doc.get(*field) {
                if !inner.is_empty() {
                    OBJECT.validate(inner)?;
                }
            }
        }

        for field in audience_fields() {
            if let Some(Value::Array(items)) = doc.get(field) {
                for item in items {
                    if let Value::Object(inner) = item {
                        if !inner.is_empty() {
                            OBJECT.validate(inner)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Produce the storage-ready form of a document: a deep copy with the
    /// id coerced to a string (injected from `fresh_id` when missing),
    /// datetime fields normalized to RFC 3339 UTC, `published` defaulted
    /// and `updated` restamped, and nested records parsed recursively.
    pub fn parsed(&self, doc: &Document, fresh_id: Option<&str>) -> Document {
        let mut out = doc.clone();

        id::coerce_id(&mut out);
        if !truthy(out.get("id")) {
            if let Some(fresh) = fresh_id {
                out.insert("id".to_owned(), Value::String(fresh.to_owned()));
            }
        }

        for field in DATETIME_FIELDS {
            if let Some(value) = out.get(*field) {
                let normalized = datetime::normalize_datetime(value);
                out.insert((*field).to_owned(), Value::String(normalized));
            }
        }

        if self.stamps_timestamps {
            let now = datetime::format_rfc3339(Timestamp::now());
            if !out.contains_key("published") {
                out.insert("published".to_owned(), Value::String(now.clone()));
            }
            out.insert("updated".to_owned(), Value::String(now));
        }

        for field in OBJECT_FIELDS {
            if let Some(Value::Object(inner)) = out.get(*field) {
                if !inner.is_empty() {
                    let parsed = OBJECT.parsed(inner, None);
                    out.insert((*field).to_owned(), Value::Object(parsed));
                }
            }
        }

        for field in self.media_fields {
            if let Some(Value::Object(inner)) = out.get(*field) {
                if !inner.is_empty() {
                    let parsed = MEDIA_LINK.parsed(inner, None);
                    out.insert((*field).to_owned(), Value::Object(parsed));
                }
            }
        }

        out
    }
}

/// The two supported sub-activity families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubActivityKind {
    Reply,
    Like,
}

impl SubActivityKind {
    pub fn verb(self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::Like => "like",
        }
    }

    /// The parent's response slot this kind lives in.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Reply => "replies",
            Self::Like => "likes",
        }
    }

    pub fn from_verb(verb: &str) -> ValidationResult<Self> {
        match verb.to_ascii_lowercase().as_str() {
            "reply" => Ok(Self::Reply),
            "like" => Ok(Self::Like),
            _ => UnsupportedVerbSnafu { verb }.fail(),
        }
    }
}

impl std::fmt::Display for SubActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.verb())
    }
}

/// Everything needed to build one sub-activity under a parent.
pub struct SubActivitySpec {
    pub kind: SubActivityKind,
    /// Who is replying/liking: an id string or a full object record.
    pub actor: Value,
    /// The payload: a plain string becomes the generated object's
    /// `content`, a record is used as the object wholesale.
    pub content: Value,
    /// `objectType` for a generated object (defaults to the verb upstream).
    pub object_type: String,
    /// Caller extras merged over the generated sub-activity; may override
    /// anything, including `published`.
    pub extra: Option<Document>,
    /// Fresh id for the sub-activity itself, used unless `extra` or a
    /// content record supplies one.
    pub sub_activity_id: String,
    /// Fresh id for the generated object.
    pub object_id: String,
}

/// Build a sub-activity and the updated parent from the parent's stored
/// (dehydrated) record.
///
/// The sub-activity's `object` carries an `inReplyTo` entry pointing back
/// at the parent; the parent gains a compact projection at index 0 of the
/// response slot (newest first) and its `totalItems` is incremented.
pub fn parsed_sub_activity(parent: &Document, spec: SubActivitySpec) -> (Document, Document) {
    let now = datetime::format_rfc3339(Timestamp::now());

    let mut object = match spec.content {
        Value::Object(mut map) => {
            id::coerce_id(&mut map);
            if !truthy(map.get("id")) {
                map.insert("id".to_owned(), Value::String(spec.object_id));
            }
            if !map.contains_key("objectType") {
                map.insert("objectType".to_owned(), Value::String(spec.object_type));
            }
            if !map.contains_key("published") {
                map.insert("published".to_owned(), Value::String(now.clone()));
            }
            map
        }
        content => {
            let mut map = Map::new();
            map.insert("objectType".to_owned(), Value::String(spec.object_type));
            map.insert("id".to_owned(), Value::String(spec.object_id));
            map.insert("published".to_owned(), Value::String(now.clone()));
            map.insert("content".to_owned(), content);
            map
        }
    };

    let mut in_reply_to = Map::new();
    in_reply_to.insert("objectType".to_owned(), Value::String("activity".to_owned()));
    for (parent_key, key) in [("id", "id"), ("verb", "displayName"), ("published", "published")] {
        if let Some(value) = parent.get(parent_key) {
            in_reply_to.insert(key.to_owned(), value.clone());
        }
    }
    object.insert("inReplyTo".to_owned(), json!([in_reply_to]));

    let mut sub = Map::new();
    sub.insert("id".to_owned(), Value::String(spec.sub_activity_id));
    sub.insert("verb".to_owned(), Value::String(spec.kind.verb().to_owned()));
    sub.insert("actor".to_owned(), spec.actor);
    sub.insert("object".to_owned(), Value::Object(object));
    if let Some(target) = parent.get("actor") {
        sub.insert("target".to_owned(), target.clone());
    }
    if let Some(extra) = spec.extra {
        for (key, value) in extra {
            sub.insert(key, value);
        }
    }

    let projection = json!({
        "verb": sub.get("verb").cloned().unwrap_or_default(),
        "actor": sub.get("actor").cloned().unwrap_or_default(),
        "object": {
            "objectType": "activity",
            "id": sub.get("id").cloned().unwrap_or_default(),
        },
    });

    let mut updated_parent = parent.clone();
    let slot = updated_parent
        .entry(spec.kind.collection().to_owned())
        .or_insert_with(|| json!({"totalItems": 0, "items": []}));
    if !slot.is_object() {
        *slot = json!({"totalItems": 0, "items": []});
    }
    if let Value::Object(slot) = slot {
        let items = slot.entry("items".to_owned()).or_insert_with(|| json!([]));
        if !items.is_array() {
            *items = json!([]);
        }
        if let Value::Array(items) = items {
            items.insert(0, projection);
        }
        let total = slot.get("totalItems").and_then(Value::as_u64).unwrap_or(0);
        slot.insert("totalItems".to_owned(), json!(total + 1));
    }

    (sub, updated_parent)
}
