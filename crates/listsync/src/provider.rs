//! Provider abstraction: how to page through one remote collection.
//!
//! The sync engine knows nothing about a provider's query language. It talks
//! to a [`ProviderAdapter`] that builds page requests, decides what comes
//! next, and pulls keys and timestamps out of records. Fetching itself goes
//! through a [`PageFetcher`], and credentials through a
//! [`CredentialProvider`].
//!
//! # Module Structure
//!
//! - [`config`] - `ProviderConfig`, the serde view of one configured provider
//! - [`credential`] - credentials and the `CredentialProvider` capability
//! - [`fetch`] - `PageFetcher` and the HTTP implementation
//! - [`odata`] - `ODataAdapter`, the adapter for OData/RESO Web API feeds
//! - [`rate_limit`] - proactive request pacing

pub mod config;
pub mod credential;
pub mod fetch;
pub mod odata;
mod rate_limit;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::normalize::{NormalizeError, RecordKey, parse_timestamp};

pub use config::ProviderConfig;
pub use credential::{AuthError, Credential, CredentialConfig, CredentialProvider, StaticCredentials};
pub use fetch::{FetchError, PageFetcher, PageFormat, PageResponse};
#[cfg(feature = "http")]
pub use fetch::HttpPageFetcher;
pub use odata::ODataAdapter;
pub use rate_limit::{ApiRateLimiter, DEFAULT_RPS, RateLimitedFetcher};

/// Identifies one replicated collection: provider name plus collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderKey {
    pub provider: String,
    pub collection: String,
}

impl ProviderKey {
    pub fn new(provider: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.collection)
    }
}

/// Where a walk over the collection starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedPoint {
    /// Only records modified at or after this instant.
    pub watermark: Option<DateTime<Utc>>,
    /// Tie-break: among records at exactly `watermark`, only keys after this.
    pub after_key: Option<RecordKey>,
    /// Records of this walk already consumed.
    pub offset: u64,
}

/// A locally built query: base URL plus query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub base_url: String,
    /// Unencoded name/value pairs, in order.
    pub params: Vec<(String, String)>,
    pub offset: u64,
    pub page_size: u32,
}

impl PageQuery {
    /// Render the full URL, percent-encoding parameter values.
    #[must_use]
    pub fn to_url(&self) -> String {
        if self.params.is_empty() {
            return self.base_url.clone();
        }
        let query = self
            .params
            .iter()
            .map(|(name, value)| format!("{}={}", name, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.base_url, separator, query)
    }
}

/// One page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// A continuation URL handed out by the provider.
    Continuation(String),
    /// A query built by the adapter.
    Query(PageQuery),
}

impl PageRequest {
    #[must_use]
    pub fn url(&self) -> String {
        match self {
            PageRequest::Continuation(url) => url.clone(),
            PageRequest::Query(query) => query.to_url(),
        }
    }
}

/// What follows a processed page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPage {
    Request(PageRequest),
    Exhausted,
}

/// Provider-specific paging and record conventions.
///
/// Implementations are strategy objects: one engine drives every provider
/// through this interface.
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn collection(&self) -> &str;

    /// Field (or dotted path) holding the record key.
    fn key_field(&self) -> &str;

    /// Field (or dotted path) holding the modification timestamp.
    fn timestamp_field(&self) -> &str;

    /// First request of a walk starting at `seed`.
    fn build_initial_request(&self, seed: &SeedPoint) -> PageRequest;

    /// Request following `current`, given the page it returned.
    fn build_next_request(&self, current: &PageRequest, page: &PageResponse) -> NextPage;

    fn extract_key(&self, record: &Document) -> Result<RecordKey, NormalizeError> {
        record
            .get_path(self.key_field())
            .and_then(RecordKey::from_document)
            .ok_or_else(|| NormalizeError::MissingKey {
                field: self.key_field().to_string(),
            })
    }

    fn extract_timestamp(&self, record: &Document) -> Result<Option<DateTime<Utc>>, NormalizeError> {
        match record.get_path(self.timestamp_field()) {
            None | Some(Document::Null) => Ok(None),
            Some(Document::Text(raw)) => parse_timestamp(raw).map(Some).ok_or_else(|| {
                NormalizeError::InvalidTimestamp {
                    field: self.timestamp_field().to_string(),
                    value: raw.clone(),
                }
            }),
            Some(other) => Err(NormalizeError::InvalidTimestamp {
                field: self.timestamp_field().to_string(),
                value: other.to_string(),
            }),
        }
    }

    /// Last chance to reshape fields before storage.
    fn prepare_fields(&self, record: Document) -> Document {
        record
    }

    /// Offset into the current walk encoded in `request`, when it has one.
    fn request_offset(&self, _request: &PageRequest) -> Option<u64> {
        None
    }

    /// Offsets at or past this value are refused by the provider.
    fn offset_limit(&self) -> Option<u64> {
        None
    }

    /// Whether walks are ordered by `(timestamp, key)`, which allows exact
    /// keyset seeks.
    fn orders_by_key(&self) -> bool {
        false
    }

    /// Request for the page after `current` without using its contents.
    /// Only offset-addressed requests can be skipped.
    fn skip_request(&self, _current: &PageRequest) -> Option<PageRequest> {
        None
    }

    fn provider_key(&self) -> ProviderKey {
        ProviderKey::new(self.name(), self.collection())
    }
}
