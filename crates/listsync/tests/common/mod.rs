//! Shared fixtures: an in-memory OData listing feed and helpers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use listsync::provider::{
    Credential, CredentialProvider, FetchError, ODataAdapter, PageFetcher, PageQuery, PageRequest,
    PageResponse, ProviderConfig, StaticCredentials,
};
use listsync::store::{MemoryCursorTracker, MemoryStore};
use listsync::sync::{CursorTracker, SyncEngine, SyncOptions};
use listsync::{BatchUpserter, ProviderKey};
use serde_json::{Value, json};

pub const BASE_URL: &str = "https://feed.example.com/odata/Property";

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

/// A listing whose timestamp is `base_time() + hour` hours.
pub fn listing(id: i64, hour: i64) -> Value {
    let modified = base_time() + Duration::hours(hour);
    json!({
        "@odata.id": format!("Property('{id}')"),
        "ListingKeyNumeric": id,
        "ModificationTimestamp": modified.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "ListPrice": 100_000 + id,
        "City": "Chicago",
    })
}

pub fn config(page_size: u32) -> ProviderConfig {
    ProviderConfig {
        name: "feed".into(),
        collection: "Property".into(),
        base_url: BASE_URL.into(),
        key_field: "ListingKeyNumeric".into(),
        page_size,
        follow_next_link: false,
        ..ProviderConfig::default()
    }
}

pub fn key() -> ProviderKey {
    ProviderKey::new("feed", "Property")
}

/// Serves records ordered by `(ModificationTimestamp, ListingKeyNumeric)`,
/// honouring the `$filter` shapes `ODataAdapter` produces, `$top` and
/// `$skip`. A `$skip` at or past the configured limit is refused with 400,
/// the way Bridge refuses offsets past 10 000.
pub struct ODataFeed {
    records: Vec<(DateTime<Utc>, i64, Value)>,
    skip_limit: Option<u64>,
    next_links: bool,
    requests: Mutex<Vec<PageRequest>>,
    served: AtomicUsize,
}

impl ODataFeed {
    pub fn new(records: Vec<Value>) -> Self {
        let mut records: Vec<_> = records
            .into_iter()
            .map(|record| {
                let ts = record["ModificationTimestamp"]
                    .as_str()
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .expect("listing has a timestamp");
                let id = record["ListingKeyNumeric"].as_i64().expect("listing has a key");
                (ts, id, record)
            })
            .collect();
        records.sort_by_key(|(ts, id, _)| (*ts, *id));
        Self {
            records,
            skip_limit: None,
            next_links: false,
            requests: Mutex::default(),
            served: AtomicUsize::new(0),
        }
    }

    pub fn with_skip_limit(mut self, limit: u64) -> Self {
        self.skip_limit = Some(limit);
        self
    }

    /// Hand out `@odata.nextLink` on every full page.
    pub fn with_next_links(mut self) -> Self {
        self.next_links = true;
        self
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Records handed out so far, re-deliveries included.
    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    fn params(request: &PageRequest) -> Vec<(String, String)> {
        match request {
            PageRequest::Query(query) => query.params.clone(),
            PageRequest::Continuation(link) => url::Url::parse(link)
                .expect("continuation is a URL")
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    fn selected(&self, filter: Option<&str>) -> Vec<&(DateTime<Utc>, i64, Value)> {
        let seed = filter.map(|f| parse_seed_filter(f).expect("supported $filter shape"));
        self.records
            .iter()
            .filter(|(ts, id, _)| match &seed {
                None => true,
                Some((watermark, None)) => ts >= watermark,
                Some((watermark, Some(after))) => {
                    ts > watermark || (ts == watermark && id > after)
                }
            })
            .collect()
    }
}

/// Parse `TS ge W` or `(TS gt W or (TS eq W and KEY gt K))`.
fn parse_seed_filter(filter: &str) -> Option<(DateTime<Utc>, Option<i64>)> {
    let parse = |raw: &str| {
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    };

    if let Some(rest) = filter.strip_prefix("ModificationTimestamp ge ") {
        return Some((parse(rest)?, None));
    }
    let rest = filter.strip_prefix("(ModificationTimestamp gt ")?;
    let (watermark, rest) = rest.split_once(" or (ModificationTimestamp eq ")?;
    let (_, after) = rest.split_once(" and ListingKeyNumeric gt ")?;
    let after = after.trim_end_matches(')').parse().ok()?;
    Some((parse(watermark)?, Some(after)))
}

#[async_trait]
impl PageFetcher for ODataFeed {
    async fn fetch(
        &self,
        request: &PageRequest,
        _credential: &Credential,
    ) -> Result<PageResponse, FetchError> {
        self.requests.lock().unwrap().push(request.clone());

        let params = Self::params(request);
        let param = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        let skip: u64 = param("$skip").and_then(|v| v.parse().ok()).unwrap_or(0);
        let top: usize = param("$top").and_then(|v| v.parse().ok()).unwrap_or(100);

        if let Some(limit) = self.skip_limit
            && skip >= limit
        {
            return Err(FetchError::Http {
                status: 400,
                body: format!("$skip must be less than {limit}"),
                retry_after: None,
            });
        }

        let filter = param("$filter");
        let records: Vec<Value> = self
            .selected(filter.as_deref())
            .into_iter()
            .skip(skip as usize)
            .take(top)
            .map(|(_, _, record)| record.clone())
            .collect();
        self.served.fetch_add(records.len(), Ordering::SeqCst);

        let next_link = (self.next_links && records.len() == top).then(|| {
            let mut params: Vec<(String, String)> =
                params.into_iter().filter(|(k, _)| k != "$skip").collect();
            params.push(("$skip".into(), (skip + top as u64).to_string()));
            PageQuery {
                base_url: BASE_URL.into(),
                params,
                offset: skip + top as u64,
                page_size: top as u32,
            }
            .to_url()
        });

        Ok(PageResponse { records, next_link })
    }
}

/// Replays scripted pages, then empty ones.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<PageResponse, FetchError>>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedFetcher {
    pub fn new(script: Vec<Result<PageResponse, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::default(),
        }
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        request: &PageRequest,
        _credential: &Credential,
    ) -> Result<PageResponse, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(PageResponse::default()))
    }
}

pub fn engine(
    config: ProviderConfig,
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn BatchUpserter>,
    cursors: Arc<dyn CursorTracker>,
    options: SyncOptions,
) -> SyncEngine {
    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(StaticCredentials::new(Credential::Bearer("test-token".into())));
    SyncEngine::new(
        Arc::new(ODataAdapter::new(config)),
        fetcher,
        credentials,
        store,
        cursors,
    )
    .with_options(options)
}

pub fn memory_engine(
    config: ProviderConfig,
    fetcher: Arc<dyn PageFetcher>,
    store: &MemoryStore,
    cursors: &MemoryCursorTracker,
) -> SyncEngine {
    engine(
        config,
        fetcher,
        Arc::new(store.clone()),
        Arc::new(cursors.clone()),
        SyncOptions::default(),
    )
}
