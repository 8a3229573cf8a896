//! Submitted form data.
//!
//! A [`Submission`] keeps keys in the order the client sent them, because
//! action resolution picks the first `action_*` key it sees. Bracketed keys
//! (`contact[email]`, `tags[]`) are decoded into nested [`FieldValue`]s the
//! same way a query-string decoder would, and [`Submission::flatten`] encodes
//! them back into `name[key]=value` pairs.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::error::FormError;

/// Deepest bracket nesting decoded from a submitted key. Keys nested deeper
/// are dropped.
pub const MAX_NESTING_DEPTH: usize = 64;

/// A single submitted (or bound) value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// No value.
    #[default]
    Null,

    /// Scalar text value.
    Text(String),

    /// Positional values (`name[]=a&name[]=b`).
    List(Vec<FieldValue>),

    /// Keyed values (`name[a]=1&name[b]=2`).
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Create a text value.
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    /// Whether the value would compare loosely equal to `false`.
    ///
    /// Null, `""`, `"0"` and empty collections are false-ish.
    pub fn is_falsy(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.is_empty() || s == "0",
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Map(map) => map.is_empty(),
        }
    }

    /// Whether the value counts as "not filled in" for required-field checks.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.iter().all(FieldValue::is_blank),
            FieldValue::Map(map) => map.values().all(FieldValue::is_blank),
        }
    }

    /// Borrow the scalar text, if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON value into a field value.
    ///
    /// Numbers become their decimal text, `true` becomes `"1"` and `false`
    /// becomes `""`, which is how a browser would have submitted them.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(true) => FieldValue::text("1"),
            Value::Bool(false) => FieldValue::text(""),
            Value::Number(n) => FieldValue::Text(n.to_string()),
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Array(items) => FieldValue::List(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => FieldValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert into a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            FieldValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::text(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(values: Vec<&str>) -> Self {
        FieldValue::List(values.into_iter().map(FieldValue::from).collect())
    }
}

/// Ordered map of submitted keys to values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    entries: IndexMap<String, FieldValue>,
}

impl Submission {
    /// Create an empty submission.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a submission from raw `(key, value)` pairs as they arrive on the
    /// wire, decoding bracket notation into nested values.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut submission = Self::new();
        for (key, value) in pairs {
            submission.insert_raw(key.as_ref(), value.into());
        }
        submission
    }

    /// Parse a url-encoded query string or request body.
    pub fn parse_query(query: &str) -> Self {
        Self::from_pairs(url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()))
    }

    /// Build a submission from a JSON object.
    ///
    /// Anything other than an object cannot be bound and is reported as
    /// [`FormError::BindingInputInvalid`].
    pub fn from_json(value: &Value) -> Result<Self, FormError> {
        let Value::Object(map) = value else {
            return Err(FormError::BindingInputInvalid(json_kind(value).to_string()));
        };
        Ok(Self {
            entries: map
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                .collect(),
        })
    }

    /// Convert into a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Insert a raw wire pair, honouring bracket notation.
    pub fn insert_raw(&mut self, key: &str, value: String) {
        match key_shape(key) {
            KeyShape::Plain => self.insert(key, FieldValue::Text(value)),
            KeyShape::Nested(base, segments) => {
                let slot = self.entries.entry(base.to_string()).or_default();
                assign(slot, &segments, value);
            }
            KeyShape::TooDeep => {
                debug!(
                    key_len = key.len(),
                    max_depth = MAX_NESTING_DEPTH,
                    "dropping over-nested form key"
                );
            }
        }
    }

    /// Set a top-level key. An existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Look up a top-level key.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.entries.get(key)
    }

    /// Whether a top-level key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Whether a top-level key is present with a non-null value.
    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| *v != FieldValue::Null)
    }

    /// Remove a top-level key.
    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.entries.shift_remove(key)
    }

    /// Merge another submission into this one: keys from `other` overwrite
    /// existing keys in place, new keys are appended.
    pub fn merge(&mut self, other: Submission) {
        for (key, value) in other.entries {
            self.insert(key, value);
        }
    }

    /// Return a merged copy (`self` first, `other` wins).
    pub fn merged(&self, other: &Submission) -> Submission {
        let mut merged = self.clone();
        merged.merge(other.clone());
        merged
    }

    /// Iterate keys in submission order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Iterate entries in submission order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys were submitted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode nested values back into flat `name[key]` pairs.
    ///
    /// Null values and empty collections produce no pairs.
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (key, value) in &self.entries {
            flatten_into(key.clone(), value, &mut out);
        }
        out
    }

    /// Resolve a bracketed name (`contact[email]`) to the text value that
    /// [`flatten`](Self::flatten) would emit under that name.
    pub fn lookup_flattened(&self, name: &str) -> Option<FieldValue> {
        if let Some(value @ FieldValue::Text(_)) = self.get(name) {
            return Some(value.clone());
        }
        let KeyShape::Nested(base, segments) = key_shape(name) else {
            return None;
        };

        let mut current = self.get(base)?;
        for segment in &segments {
            current = match current {
                FieldValue::Map(map) => map.get(segment)?,
                FieldValue::List(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        matches!(current, FieldValue::Text(_)).then(|| current.clone())
    }
}

impl FromIterator<(String, FieldValue)> for Submission {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        let mut submission = Submission::new();
        for (key, value) in iter {
            submission.insert(key, value);
        }
        submission
    }
}

impl Serialize for Submission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Submission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SubmissionVisitor;

        impl<'de> Visitor<'de> for SubmissionVisitor {
            type Value = Submission;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of submitted form values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut submission = Submission::new();
                while let Some((key, value)) = access.next_entry::<String, FieldValue>()? {
                    submission.insert(key, value);
                }
                Ok(submission)
            }
        }

        deserializer.deserialize_map(SubmissionVisitor)
    }
}

enum KeyShape<'a> {
    Plain,
    Nested(&'a str, Vec<String>),
    TooDeep,
}

/// Classify a submitted key: `a[b][c]` is `Nested("a", ["b", "c"])`.
///
/// Keys without a well-formed bracket suffix, and keys carrying an embedded
/// query string (`action_save?x=1`), are plain.
fn key_shape(key: &str) -> KeyShape<'_> {
    if key.contains('?') {
        return KeyShape::Plain;
    }
    let Some(open) = key.find('[') else {
        return KeyShape::Plain;
    };
    if open == 0 || !key.ends_with(']') {
        return KeyShape::Plain;
    }

    let (base, mut rest) = key.split_at(open);
    let mut segments = Vec::new();
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(close) = stripped.find(']') else {
            return KeyShape::Plain;
        };
        // Stop collecting as soon as the key is known to be too deep
        if segments.len() == MAX_NESTING_DEPTH {
            return KeyShape::TooDeep;
        }
        segments.push(stripped[..close].to_string());
        rest = &stripped[close + 1..];
    }
    if !rest.is_empty() {
        return KeyShape::Plain;
    }
    KeyShape::Nested(base, segments)
}

/// Write `value` at the path `segments` below `slot`. Recursion depth is
/// bounded by [`MAX_NESTING_DEPTH`].
fn assign(slot: &mut FieldValue, segments: &[String], value: String) {
    let Some((segment, rest)) = segments.split_first() else {
        *slot = FieldValue::Text(value);
        return;
    };

    // `[]` appends to a list
    if segment.is_empty() {
        if !matches!(slot, FieldValue::List(_)) {
            *slot = FieldValue::List(Vec::new());
        }
        if let FieldValue::List(items) = slot {
            items.push(FieldValue::Null);
            if let Some(child) = items.last_mut() {
                assign(child, rest, value);
            }
        }
        return;
    }

    // Named segments need a map; an existing list keeps its items under
    // their indexes
    match slot {
        FieldValue::Map(_) => {}
        FieldValue::List(items) => {
            let converted = std::mem::take(items)
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect();
            *slot = FieldValue::Map(converted);
        }
        _ => *slot = FieldValue::Map(BTreeMap::new()),
    }
    if let FieldValue::Map(map) = slot {
        let child = map.entry(segment.clone()).or_default();
        assign(child, rest, value);
    }
}

fn flatten_into(prefix: String, value: &FieldValue, out: &mut Vec<(String, String)>) {
    match value {
        FieldValue::Null => {}
        FieldValue::Text(text) => out.push((prefix, text.clone())),
        FieldValue::List(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_into(format!("{prefix}[{i}]"), item, out);
            }
        }
        FieldValue::Map(map) => {
            for (key, item) in map {
                flatten_into(format!("{prefix}[{key}]"), item, out);
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_keeps_order() {
        let submission = Submission::parse_query("b=2&a=1&action_save=Save");
        let keys: Vec<_> = submission.keys().collect();
        assert_eq!(keys, vec!["b", "a", "action_save"]);
    }

    #[test]
    fn test_bracket_keys_nest() {
        let submission =
            Submission::parse_query("contact%5Bemail%5D=a%40b.c&contact%5Bname%5D=Ann&tags[]=x&tags[]=y");

        let Some(FieldValue::Map(contact)) = submission.get("contact") else {
            panic!("expected nested contact map");
        };
        assert_eq!(contact.get("email"), Some(&FieldValue::text("a@b.c")));
        assert_eq!(
            submission.get("tags"),
            Some(&FieldValue::from(vec!["x", "y"]))
        );
    }

    #[test]
    fn test_flatten_round_trips_brackets() {
        let submission = Submission::parse_query("a[b][c]=1&plain=2");
        let flat = submission.flatten();
        assert_eq!(
            flat,
            vec![
                ("a[b][c]".to_string(), "1".to_string()),
                ("plain".to_string(), "2".to_string())
            ]
        );
        assert_eq!(
            submission.lookup_flattened("a[b][c]"),
            Some(FieldValue::text("1"))
        );
        assert_eq!(submission.lookup_flattened("a[b]"), None);
    }

    #[test]
    fn test_over_nested_keys_are_dropped() {
        let deep = format!("a{}=1&ok=2", "[]".repeat(200_000));
        let submission = Submission::parse_query(&deep);
        assert!(!submission.contains_key("a"));
        assert_eq!(submission.get("ok"), Some(&FieldValue::text("2")));

        let too_deep = format!("b{}", "[x]".repeat(MAX_NESTING_DEPTH + 1));
        let submission = Submission::from_pairs([(too_deep.as_str(), "1")]);
        assert!(submission.is_empty());
    }

    #[test]
    fn test_nesting_up_to_the_limit_is_kept() {
        let key = format!("b{}", "[x]".repeat(MAX_NESTING_DEPTH));
        let submission = Submission::from_pairs([(key.as_str(), "1")]);
        assert_eq!(submission.lookup_flattened(&key), Some(FieldValue::text("1")));
        assert_eq!(submission.flatten().len(), 1);
    }

    #[test]
    fn test_lookup_flattened_walks_lists_and_literal_keys() {
        let submission = Submission::parse_query("tags[]=x&tags[]=y&c[d][]=z");
        assert_eq!(submission.lookup_flattened("tags[1]"), Some(FieldValue::text("y")));
        assert_eq!(submission.lookup_flattened("tags[2]"), None);
        assert_eq!(submission.lookup_flattened("c[d][0]"), Some(FieldValue::text("z")));
        assert_eq!(submission.lookup_flattened("tags"), None);

        let literal = Submission::from_json(&serde_json::json!({"a[b]": "1"})).unwrap();
        assert_eq!(literal.lookup_flattened("a[b]"), Some(FieldValue::text("1")));
    }

    #[test]
    fn test_many_keys_keep_order_and_overwrite_in_place() {
        let query: Vec<String> = (0..10_000).map(|i| format!("k{i}={i}")).collect();
        let mut submission = Submission::parse_query(&query.join("&"));
        submission.insert("k5", "five");
        assert_eq!(submission.len(), 10_000);
        assert_eq!(submission.keys().nth(5), Some("k5"));
        assert_eq!(submission.get("k5"), Some(&FieldValue::text("five")));

        submission.remove("k0");
        assert_eq!(submission.keys().next(), Some("k1"));
    }

    #[test]
    fn test_embedded_query_key_is_not_split() {
        let submission = Submission::from_pairs([("action_go?x[y]=1", "Go")]);
        assert!(submission.contains_key("action_go?x[y]=1"));
    }

    #[test]
    fn test_merge_overwrites_in_place() {
        let mut left = Submission::parse_query("a=1&b=2");
        left.merge(Submission::parse_query("b=3&c=4"));
        let pairs: Vec<_> = left
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_str().unwrap().to_string()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "3".to_string()),
                ("c".to_string(), "4".to_string())
            ]
        );
    }

    #[test]
    fn test_falsy_values() {
        assert!(FieldValue::Null.is_falsy());
        assert!(FieldValue::text("").is_falsy());
        assert!(FieldValue::text("0").is_falsy());
        assert!(FieldValue::List(vec![]).is_falsy());
        assert!(!FieldValue::text("x").is_falsy());
        assert!(FieldValue::text("  ").is_blank());
        assert!(!FieldValue::text("  ").is_falsy());
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        let err = Submission::from_json(&serde_json::json!([1, 2])).unwrap_err();
        assert!(matches!(err, FormError::BindingInputInvalid(kind) if kind == "array"));

        let ok = Submission::from_json(&serde_json::json!({"Title": "x", "n": 3})).unwrap();
        assert_eq!(ok.get("n"), Some(&FieldValue::text("3")));
    }

    #[test]
    fn test_serde_preserves_values() {
        let submission = Submission::parse_query("Title=&tags[]=a");
        let json = serde_json::to_string(&submission).unwrap();
        let parsed: Submission = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.get("Title"), Some(&FieldValue::text("")));
        assert_eq!(parsed.get("tags"), Some(&FieldValue::from(vec!["a"])));
    }
}
