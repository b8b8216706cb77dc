//! Record normalization: [`RawRecord`] → [`IndexedDocument`].
//!
//! Field handling is driven by the [`FIELD_RULES`] table. `title` and
//! `text` default to the empty string; every other field is copied only
//! when the record carries it, so the output never gains keys the source
//! did not provide. Copied values are not type-checked here: a field with
//! an unexpected type goes to the backend as is and is rejected there per
//! document. Only `redirect` is reshaped.

use serde_json::Value;

use crate::models::{IndexedDocument, RawRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Text,
    Timestamp,
    Namespace,
    Category,
    Template,
    Redirect,
    IncomingLinks,
    OpeningText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    /// Always set; empty string when absent.
    Required,
    /// Set only when the key is present.
    IfPresent,
}

const FIELD_RULES: &[(&str, Field, Rule)] = &[
    ("title", Field::Title, Rule::Required),
    ("text", Field::Text, Rule::Required),
    ("timestamp", Field::Timestamp, Rule::IfPresent),
    ("namespace", Field::Namespace, Rule::IfPresent),
    ("category", Field::Category, Rule::IfPresent),
    ("template", Field::Template, Rule::IfPresent),
    ("redirect", Field::Redirect, Rule::IfPresent),
    ("incoming_links", Field::IncomingLinks, Rule::IfPresent),
    ("opening_text", Field::OpeningText, Rule::IfPresent),
];

/// Map a raw dump record onto the indexed document shape. Pure and total.
pub fn transform(record: &RawRecord) -> IndexedDocument {
    let mut doc = IndexedDocument::default();

    for &(key, field, rule) in FIELD_RULES {
        match (record.get(key), rule) {
            (Some(value), _) => apply(&mut doc, field, value),
            (None, Rule::Required) => apply(&mut doc, field, &Value::Null),
            (None, Rule::IfPresent) => {}
        }
    }

    doc
}

fn apply(doc: &mut IndexedDocument, field: Field, value: &Value) {
    match field {
        Field::Title => doc.title = value.as_str().unwrap_or_default().to_string(),
        Field::Text => doc.text = value.as_str().unwrap_or_default().to_string(),
        Field::Timestamp => doc.timestamp = Some(value.clone()),
        Field::OpeningText => doc.opening_text = Some(value.clone()),
        Field::Namespace => doc.namespace = Some(value.clone()),
        Field::IncomingLinks => doc.incoming_links = Some(value.clone()),
        Field::Category => doc.category = Some(value.clone()),
        Field::Template => doc.template = Some(value.clone()),
        Field::Redirect => doc.redirect = normalize_redirect(value),
    }
}

/// A plain string is used verbatim; an object yields its `title`, or the
/// empty string when it has none. Any other shape is dropped.
pub fn normalize_redirect(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => Some(
            map.get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        _ => None,
    }
}
