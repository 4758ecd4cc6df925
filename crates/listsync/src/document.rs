//! Semantic document tree for replicated records.
//!
//! Provider payloads arrive as JSON, but the store needs exact decimals for
//! prices, areas and tax amounts that may sit at any nesting depth. Every
//! payload is converted into a [`Document`] once, at normalization time, and
//! the rest of the crate works on that tree.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

/// Key used to tag decimal values in their storage encoding.
pub const DECIMAL_TAG: &str = "$numberDecimal";

/// A record value with decimals kept at arbitrary precision.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Document {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(BigDecimal),
    Text(String),
    List(Vec<Document>),
    Map(BTreeMap<String, Document>),
}

impl Document {
    /// An empty map document.
    #[must_use]
    pub fn empty_map() -> Self {
        Document::Map(BTreeMap::new())
    }

    /// Convert a provider JSON value, coercing every non-integer number into
    /// a decimal at every depth.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Document::Null,
            Value::Bool(b) => Document::Bool(*b),
            Value::Number(n) => number_to_document(n),
            Value::String(s) => Document::Text(s.clone()),
            Value::Array(items) => Document::List(items.iter().map(Document::from_json).collect()),
            Value::Object(map) => Document::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Document::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Encode for storage. Decimals become `{"$numberDecimal": "<digits>"}` so
    /// no JSON consumer ever sees them as binary floats.
    #[must_use]
    pub fn to_storage_json(&self) -> Value {
        match self {
            Document::Null => Value::Null,
            Document::Bool(b) => Value::Bool(*b),
            Document::Integer(i) => Value::Number(Number::from(*i)),
            Document::Decimal(d) => {
                let mut tagged = Map::new();
                tagged.insert(DECIMAL_TAG.to_string(), Value::String(d.to_string()));
                Value::Object(tagged)
            }
            Document::Text(s) => Value::String(s.clone()),
            Document::List(items) => {
                Value::Array(items.iter().map(Document::to_storage_json).collect())
            }
            Document::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_storage_json()))
                    .collect(),
            ),
        }
    }

    /// Decode a value previously produced by [`Document::to_storage_json`].
    #[must_use]
    pub fn from_storage_json(value: &Value) -> Self {
        match value {
            Value::Object(map) => {
                if map.len() == 1
                    && let Some(Value::String(digits)) = map.get(DECIMAL_TAG)
                    && let Ok(decimal) = BigDecimal::from_str(digits)
                {
                    return Document::Decimal(decimal);
                }
                Document::Map(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Document::from_storage_json(v)))
                        .collect(),
                )
            }
            Value::Array(items) => {
                Document::List(items.iter().map(Document::from_storage_json).collect())
            }
            other => Document::from_json(other),
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Document>> {
        match self {
            Document::Map(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Document::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Document::Null)
    }

    /// Look up a top-level field of a map document.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Document> {
        self.as_map().and_then(|map| map.get(field))
    }

    /// Look up a field by dotted path (`"Office.Key"`), descending into maps.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Document> {
        path.split('.')
            .try_fold(self, |current, segment| current.get(segment))
    }

    /// Drop top-level fields whose name satisfies `predicate`.
    pub fn retain_fields(&mut self, mut predicate: impl FnMut(&str) -> bool) {
        if let Document::Map(map) = self {
            map.retain(|k, _| predicate(k));
        }
    }

    /// Overlay `incoming` onto `self` at the top level.
    ///
    /// Fields present in `incoming` replace the existing ones; fields absent
    /// from `incoming` are kept. Non-map documents are replaced outright.
    pub fn merge_from(&mut self, incoming: Document) {
        match (self, incoming) {
            (Document::Map(existing), Document::Map(fresh)) => existing.extend(fresh),
            (this, other) => *this = other,
        }
    }

    /// Stable SHA-256 digest of the document, hex encoded.
    ///
    /// Map keys are visited in sorted order and every node is prefixed with a
    /// type tag, so `1` and `"1"` never collide.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        self.feed(&mut hasher);
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    fn feed(&self, hasher: &mut Sha256) {
        match self {
            Document::Null => hasher.update(b"n"),
            Document::Bool(b) => hasher.update(if *b { b"t" } else { b"f" }),
            Document::Integer(i) => {
                hasher.update(b"i");
                hasher.update(i.to_be_bytes());
            }
            Document::Decimal(d) => {
                hasher.update(b"d");
                write_len_prefixed(hasher, d.normalized().to_string().as_bytes());
            }
            Document::Text(s) => {
                hasher.update(b"s");
                write_len_prefixed(hasher, s.as_bytes());
            }
            Document::List(items) => {
                hasher.update(b"l");
                hasher.update((items.len() as u64).to_be_bytes());
                for item in items {
                    item.feed(hasher);
                }
            }
            Document::Map(map) => {
                hasher.update(b"m");
                hasher.update((map.len() as u64).to_be_bytes());
                for (key, value) in map {
                    write_len_prefixed(hasher, key.as_bytes());
                    value.feed(hasher);
                }
            }
        }
    }
}

fn write_len_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn number_to_document(n: &Number) -> Document {
    if let Some(i) = n.as_i64() {
        return Document::Integer(i);
    }
    // serde_json keeps the original digits (arbitrary_precision), so this
    // parse is exact. u64 values past i64::MAX land here too.
    let digits = n.to_string();
    match BigDecimal::from_str(&digits) {
        Ok(decimal) => Document::Decimal(decimal),
        Err(_) => Document::Text(digits),
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Document::Null => f.write_str("null"),
            Document::Bool(b) => write!(f, "{b}"),
            Document::Integer(i) => write!(f, "{i}"),
            Document::Decimal(d) => write!(f, "{d}"),
            Document::Text(s) => f.write_str(s),
            other => write!(f, "{}", other.to_storage_json()),
        }
    }
}
