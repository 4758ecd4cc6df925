//! Record normalization: stable key, modification timestamp and typed fields.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::document::Document;
use crate::provider::ProviderAdapter;

/// A raw record exactly as the provider returned it.
pub type RemoteRecord = Value;

/// Stable identifier of a record within a provider collection.
///
/// Numeric keys order before text keys; within a kind the natural ordering
/// applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKey {
    Int(i64),
    Text(String),
}

impl RecordKey {
    /// Interpret a document value as a key. Empty strings are not keys.
    #[must_use]
    pub fn from_document(value: &Document) -> Option<Self> {
        use bigdecimal::ToPrimitive;

        match value {
            Document::Integer(i) => Some(RecordKey::Int(*i)),
            Document::Decimal(d) if d.is_integer() => d.to_i64().map(RecordKey::Int),
            Document::Text(s) if !s.trim().is_empty() => Some(RecordKey::Text(s.clone())),
            _ => None,
        }
    }

    /// Literal form for an OData `$filter` expression.
    #[must_use]
    pub fn to_filter_literal(&self) -> String {
        match self {
            RecordKey::Int(i) => i.to_string(),
            RecordKey::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl Ord for RecordKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (RecordKey::Int(a), RecordKey::Int(b)) => a.cmp(b),
            (RecordKey::Text(a), RecordKey::Text(b)) => a.cmp(b),
            (RecordKey::Int(_), RecordKey::Text(_)) => Ordering::Less,
            (RecordKey::Text(_), RecordKey::Int(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for RecordKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Int(i) => write!(f, "{i}"),
            RecordKey::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(value: i64) -> Self {
        RecordKey::Int(value)
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        RecordKey::Text(value.to_string())
    }
}

/// A record ready for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub key: RecordKey,
    /// Provider-side modification time, in UTC.
    pub modified_at: Option<DateTime<Utc>>,
    /// Field map with decimals coerced at every depth.
    pub fields: Document,
}

/// Why a raw record could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("record is not an object")]
    NotAnObject,

    #[error("record has no usable key in field '{field}'")]
    MissingKey { field: String },

    #[error("record has no modification timestamp in field '{field}'")]
    MissingTimestamp { field: String },

    #[error("field '{field}' holds an unparseable timestamp: {value}")]
    InvalidTimestamp { field: String, value: String },
}

/// Turns raw provider records into [`NormalizedRecord`]s.
///
/// Key and timestamp extraction are delegated to the provider adapter; the
/// normalizer owns the decimal coercion and the timestamp requirement.
#[derive(Debug, Clone, Copy)]
pub struct RecordNormalizer {
    require_timestamp: bool,
}

impl RecordNormalizer {
    #[must_use]
    pub fn new(require_timestamp: bool) -> Self {
        Self { require_timestamp }
    }

    /// Normalize one record. Pure: no I/O.
    pub fn normalize<A: ProviderAdapter + ?Sized>(
        &self,
        adapter: &A,
        raw: &RemoteRecord,
    ) -> Result<NormalizedRecord, NormalizeError> {
        if !raw.is_object() {
            return Err(NormalizeError::NotAnObject);
        }

        let document = Document::from_json(raw);
        let key = adapter.extract_key(&document)?;
        let modified_at = adapter.extract_timestamp(&document)?;

        if self.require_timestamp && modified_at.is_none() {
            return Err(NormalizeError::MissingTimestamp {
                field: adapter.timestamp_field().to_string(),
            });
        }

        Ok(NormalizedRecord {
            key,
            modified_at,
            fields: adapter.prepare_fields(document),
        })
    }
}

/// Parse a provider timestamp.
///
/// Accepts RFC 3339 (any offset, converted to UTC) and offset-less ISO 8601
/// date-times, which are taken to be UTC already.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ODataAdapter, ProviderConfig};
    use chrono::TimeZone;
    use serde_json::json;

    fn adapter() -> ODataAdapter {
        ODataAdapter::new(ProviderConfig {
            name: "bridge".into(),
            base_url: "https://api.example.com/Property".into(),
            key_field: "ListingKeyNumeric".into(),
            timestamp_field: "ModificationTimestamp".into(),
            ..ProviderConfig::default()
        })
    }

    #[test]
    fn normalizes_key_timestamp_and_fields() {
        let raw = json!({
            "@odata.id": "https://api.example.com/Property('1')",
            "ListingKeyNumeric": 1001,
            "ModificationTimestamp": "2024-03-01T12:00:00.000Z",
            "ListPrice": 500000.5
        });

        let record = RecordNormalizer::new(true)
            .normalize(&adapter(), &raw)
            .expect("record should normalize");

        assert_eq!(record.key, RecordKey::Int(1001));
        assert_eq!(
            record.modified_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
        assert!(matches!(
            record.fields.get("ListPrice"),
            Some(Document::Decimal(_))
        ));
        assert!(record.fields.get("@odata.id").is_none());
    }

    #[test]
    fn missing_key_is_reported() {
        let raw = json!({"ModificationTimestamp": "2024-03-01T12:00:00Z"});
        let err = RecordNormalizer::new(true)
            .normalize(&adapter(), &raw)
            .expect_err("no key");
        assert_eq!(
            err,
            NormalizeError::MissingKey {
                field: "ListingKeyNumeric".into()
            }
        );
    }

    #[test]
    fn missing_timestamp_only_matters_when_required() {
        let raw = json!({"ListingKeyNumeric": 7});

        let err = RecordNormalizer::new(true)
            .normalize(&adapter(), &raw)
            .expect_err("timestamp required");
        assert!(matches!(err, NormalizeError::MissingTimestamp { .. }));

        let record = RecordNormalizer::new(false)
            .normalize(&adapter(), &raw)
            .expect("timestamp optional");
        assert_eq!(record.modified_at, None);
    }

    #[test]
    fn garbage_timestamp_is_invalid_not_missing() {
        let raw = json!({"ListingKeyNumeric": 7, "ModificationTimestamp": "yesterday"});
        let err = RecordNormalizer::new(false)
            .normalize(&adapter(), &raw)
            .expect_err("bad timestamp");
        assert!(matches!(err, NormalizeError::InvalidTimestamp { .. }));
    }

    #[test]
    fn non_object_records_are_rejected() {
        let err = RecordNormalizer::new(false)
            .normalize(&adapter(), &json!([1, 2]))
            .expect_err("array is not a record");
        assert_eq!(err, NormalizeError::NotAnObject);
    }

    #[test]
    fn parse_timestamp_handles_offsets_and_naive_values() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp("2024-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T05:04:05+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 03:04:05.000"), Some(expected));
        assert_eq!(parse_timestamp("not a date"), None);
    }

    #[test]
    fn record_key_ordering_and_literals() {
        assert!(RecordKey::Int(2) < RecordKey::Int(10));
        assert!(RecordKey::Int(i64::MAX) < RecordKey::Text("a".into()));
        assert_eq!(RecordKey::Int(5).to_filter_literal(), "5");
        assert_eq!(RecordKey::from("O'Neil").to_filter_literal(), "'O''Neil'");
    }

    #[test]
    fn record_key_from_document() {
        assert_eq!(
            RecordKey::from_document(&Document::Integer(3)),
            Some(RecordKey::Int(3))
        );
        assert_eq!(
            RecordKey::from_document(&Document::Text("X1".into())),
            Some(RecordKey::Text("X1".into()))
        );
        assert_eq!(RecordKey::from_document(&Document::Text("  ".into())), None);
        assert_eq!(RecordKey::from_document(&Document::Null), None);
    }
}
