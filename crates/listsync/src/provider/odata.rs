//! OData / RESO Web API adapter.
//!
//! Walks are ordered by the modification timestamp (and the key, when
//! `key_tiebreak` is on) and seeded with a `$filter` on that timestamp.
//! Paging either follows `@odata.nextLink` or advances `$skip` locally.

use chrono::SecondsFormat;

use super::config::ProviderConfig;
use super::fetch::PageResponse;
use super::{NextPage, PageQuery, PageRequest, ProviderAdapter, SeedPoint};
use crate::document::Document;

const SKIP_PARAM: &str = "$skip";

/// Adapter for OData collections such as Bridge, Trestle, MLS Grid and
/// other RESO Web API feeds.
#[derive(Debug, Clone)]
pub struct ODataAdapter {
    config: ProviderConfig,
}

impl ODataAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// The `$filter` clause selecting records at or after `seed`.
    fn seed_clause(&self, seed: &SeedPoint) -> Option<String> {
        let watermark = seed.watermark?;
        let ts_field = &self.config.timestamp_field;
        let ts = watermark.to_rfc3339_opts(SecondsFormat::AutoSi, true);

        match (&seed.after_key, self.config.key_tiebreak) {
            (Some(key), true) => Some(format!(
                "({ts_field} gt {ts} or ({ts_field} eq {ts} and {} gt {}))",
                self.config.key_field,
                key.to_filter_literal()
            )),
            _ => Some(format!("{ts_field} ge {ts}")),
        }
    }

    fn order_by(&self) -> String {
        if self.config.key_tiebreak {
            format!(
                "{} asc,{} asc",
                self.config.timestamp_field, self.config.key_field
            )
        } else {
            format!("{} asc", self.config.timestamp_field)
        }
    }

    fn resolve_link(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            return link.to_string();
        }
        url::Url::parse(&self.config.base_url)
            .and_then(|base| base.join(link))
            .map(|resolved| resolved.to_string())
            .unwrap_or_else(|_| link.to_string())
    }

    fn page_size(&self) -> u64 {
        u64::from(self.config.page_size.max(1))
    }
}

impl ProviderAdapter for ODataAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn collection(&self) -> &str {
        &self.config.collection
    }

    fn key_field(&self) -> &str {
        &self.config.key_field
    }

    fn timestamp_field(&self) -> &str {
        &self.config.timestamp_field
    }

    fn build_initial_request(&self, seed: &SeedPoint) -> PageRequest {
        let filter = match (&self.config.filter, self.seed_clause(seed)) {
            (Some(base), Some(seeded)) => Some(format!("({base}) and {seeded}")),
            (Some(base), None) => Some(base.clone()),
            (None, seeded) => seeded,
        };

        let mut params = Vec::new();
        if let Some(filter) = filter {
            params.push(("$filter".to_string(), filter));
        }
        params.push(("$orderby".to_string(), self.order_by()));
        params.push(("$top".to_string(), self.config.page_size.to_string()));
        if seed.offset > 0 {
            params.push((SKIP_PARAM.to_string(), seed.offset.to_string()));
        }
        params.extend(
            self.config
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        PageRequest::Query(PageQuery {
            base_url: self.config.base_url.clone(),
            params,
            offset: seed.offset,
            page_size: self.config.page_size,
        })
    }

    fn build_next_request(&self, current: &PageRequest, page: &PageResponse) -> NextPage {
        if page.records.is_empty() {
            return NextPage::Exhausted;
        }

        if self.config.follow_next_link {
            return match &page.next_link {
                Some(link) => NextPage::Request(PageRequest::Continuation(self.resolve_link(link))),
                None => NextPage::Exhausted,
            };
        }

        if (page.records.len() as u64) < self.page_size() {
            return NextPage::Exhausted;
        }
        match current {
            PageRequest::Query(query) => NextPage::Request(PageRequest::Query(with_query_skip(
                query,
                query.offset + page.records.len() as u64,
            ))),
            PageRequest::Continuation(_) => NextPage::Exhausted,
        }
    }

    fn prepare_fields(&self, mut record: Document) -> Document {
        if self.config.strip_annotations {
            record.retain_fields(|name| !name.starts_with("@odata."));
        }
        record
    }

    fn request_offset(&self, request: &PageRequest) -> Option<u64> {
        match request {
            PageRequest::Query(query) => Some(query.offset),
            PageRequest::Continuation(link) => continuation_skip(link),
        }
    }

    fn offset_limit(&self) -> Option<u64> {
        self.config.offset_limit
    }

    fn orders_by_key(&self) -> bool {
        self.config.key_tiebreak
    }

    fn skip_request(&self, current: &PageRequest) -> Option<PageRequest> {
        match current {
            PageRequest::Query(query) => Some(PageRequest::Query(with_query_skip(
                query,
                query.offset + self.page_size(),
            ))),
            PageRequest::Continuation(link) => {
                let skip = continuation_skip(link)?;
                Some(PageRequest::Continuation(replace_raw_skip(
                    link,
                    skip + self.page_size(),
                )))
            }
        }
    }
}

/// `$skip` carried by a continuation link, if any.
fn continuation_skip(link: &str) -> Option<u64> {
    let url = url::Url::parse(link).ok()?;
    url.query_pairs()
        .find(|(name, _)| name == SKIP_PARAM)
        .and_then(|(_, value)| value.parse().ok())
}

fn with_query_skip(query: &PageQuery, offset: u64) -> PageQuery {
    let mut next = query.clone();
    next.offset = offset;
    match next.params.iter_mut().find(|(name, _)| name == SKIP_PARAM) {
        Some((_, value)) => *value = offset.to_string(),
        None => next.params.push((SKIP_PARAM.to_string(), offset.to_string())),
    }
    next
}

/// Rewrite `$skip` in a raw URL without re-encoding the rest of the query.
fn replace_raw_skip(link: &str, skip: u64) -> String {
    let Some((base, query)) = link.split_once('?') else {
        return format!("{link}?{SKIP_PARAM}={skip}");
    };
    let rewritten = query
        .split('&')
        .map(|pair| {
            if pair.starts_with("$skip=") || pair.starts_with("%24skip=") {
                format!("{SKIP_PARAM}={skip}")
            } else {
                pair.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("{base}?{rewritten}")
}
