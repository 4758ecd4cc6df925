use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ProviderKey;
use super::credential::CredentialConfig;
use crate::store::UpsertPolicy;

/// Default `$top` page size.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Configuration for one provider collection.
///
/// ```toml
/// [[providers]]
/// name = "bridge"
/// base_url = "https://api.bridgedataoutput.com/api/v2/OData/actris/Property"
/// key_field = "ListingKeyNumeric"
/// page_size = 200
/// offset_limit = 10000
/// credential = { kind = "query", param = "access_token", token = "..." }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider name, used as the cursor and record namespace.
    pub name: String,
    /// Collection (resource) name.
    pub collection: String,
    /// Collection endpoint, without query string parameters managed here.
    pub base_url: String,
    /// Field (or dotted path) holding the stable record key.
    pub key_field: String,
    /// Field (or dotted path) holding the modification timestamp.
    pub timestamp_field: String,
    /// Extra `$filter` clause ANDed into every query.
    pub filter: Option<String>,
    /// Records per page (`$top`).
    pub page_size: u32,
    /// Offsets at or past this value are refused by the provider.
    pub offset_limit: Option<u64>,
    /// Follow `@odata.nextLink`; when false, pages are addressed by `$skip`.
    pub follow_next_link: bool,
    /// Order by key after timestamp so walks can resume by keyset.
    pub key_tiebreak: bool,
    /// Drop `@odata.*` annotations from stored fields.
    pub strip_annotations: bool,
    /// Additional query parameters sent with every locally built query.
    pub params: BTreeMap<String, String>,
    /// Name of the response field holding the records.
    pub records_field: String,
    /// Name of the response field holding the continuation link.
    pub next_link_field: String,
    pub credential: CredentialConfig,
    /// Proactive request rate; `None` disables pacing.
    pub requests_per_second: Option<u32>,
    pub upsert_policy: UpsertPolicy,
    /// Disabled providers are skipped by multi-provider runs.
    pub enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            collection: "Property".to_string(),
            base_url: String::new(),
            key_field: "ListingKey".to_string(),
            timestamp_field: "ModificationTimestamp".to_string(),
            filter: None,
            page_size: DEFAULT_PAGE_SIZE,
            offset_limit: None,
            follow_next_link: true,
            key_tiebreak: true,
            strip_annotations: true,
            params: BTreeMap::new(),
            records_field: "value".to_string(),
            next_link_field: "@odata.nextLink".to_string(),
            credential: CredentialConfig::None,
            requests_per_second: None,
            upsert_policy: UpsertPolicy::Merge,
            enabled: true,
        }
    }
}

impl ProviderConfig {
    /// The cursor and record namespace of this collection.
    #[must_use]
    pub fn key(&self) -> ProviderKey {
        ProviderKey::new(&self.name, &self.collection)
    }
}
