//! Page fetching: one authenticated request/response cycle.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::PageRequest;
use super::credential::Credential;
use crate::http::{HttpRequest, HttpResponse};
use crate::normalize::RemoteRecord;

/// Delay before the single retry of a connection-level failure.
pub const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Longest response body kept in an [`FetchError::Http`].
const MAX_ERROR_BODY: usize = 2048;

/// A decoded page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResponse {
    pub records: Vec<RemoteRecord>,
    /// Continuation link, when the provider supplied one.
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Connection reset, timeout, DNS failure: no response at all.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The provider answered with a non-2xx status.
    #[error("http {status}: {body}")]
    Http {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    /// A 2xx response whose body is not a page.
    #[error("malformed page: {0}")]
    Decode(String),
}

impl FetchError {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Fetches one page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(
        &self,
        request: &PageRequest,
        credential: &Credential,
    ) -> Result<PageResponse, FetchError>;
}

/// Where records and the continuation link live in a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFormat {
    pub records_field: String,
    pub next_link_field: String,
}

impl Default for PageFormat {
    fn default() -> Self {
        Self {
            records_field: "value".to_string(),
            next_link_field: "@odata.nextLink".to_string(),
        }
    }
}

impl PageFormat {
    /// Decode a response body. A bare JSON array is a final page.
    pub fn decode(&self, body: &[u8]) -> Result<PageResponse, FetchError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;

        match value {
            Value::Array(records) => Ok(PageResponse {
                records,
                next_link: None,
            }),
            Value::Object(mut map) => {
                let records = match map.remove(&self.records_field) {
                    Some(Value::Array(records)) => records,
                    Some(Value::Null) => Vec::new(),
                    // An error document served with a 2xx must not end the walk
                    None => {
                        return Err(FetchError::Decode(format!(
                            "response has no '{}' field",
                            self.records_field
                        )));
                    }
                    Some(_) => {
                        return Err(FetchError::Decode(format!(
                            "field '{}' is not an array",
                            self.records_field
                        )));
                    }
                };
                let next_link = match map.remove(&self.next_link_field) {
                    Some(Value::String(link)) if !link.is_empty() => Some(link),
                    _ => None,
                };
                Ok(PageResponse { records, next_link })
            }
            _ => Err(FetchError::Decode("body is neither an object nor an array".into())),
        }
    }
}

/// Parse `Retry-After` given in seconds.
fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncated_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_ERROR_BODY {
        return text.into_owned();
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(feature = "http")]
pub use http_fetcher::HttpPageFetcher;

#[cfg(feature = "http")]
mod http_fetcher {
    use super::*;

    use crate::http::{HttpError, HttpTransport};

    /// [`PageFetcher`] over an [`HttpTransport`].
    ///
    /// A connection-level failure is retried exactly once after
    /// `retry_delay`; a second consecutive failure is returned as
    /// [`FetchError::Transport`]. Non-2xx responses are never retried here.
    pub struct HttpPageFetcher<T> {
        transport: T,
        format: PageFormat,
        retry_delay: Duration,
        request_timeout: Option<Duration>,
    }

    impl<T: HttpTransport> HttpPageFetcher<T> {
        pub fn new(transport: T, format: PageFormat) -> Self {
            Self {
                transport,
                format,
                retry_delay: TRANSPORT_RETRY_DELAY,
                request_timeout: None,
            }
        }

        #[must_use]
        pub fn with_retry_delay(mut self, delay: Duration) -> Self {
            self.retry_delay = delay;
            self
        }

        /// Bound each attempt; an expired attempt counts as a transport failure.
        #[must_use]
        pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
            self.request_timeout = Some(timeout);
            self
        }

        async fn send_once(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            let send = self.transport.send(request);
            let result = match self.request_timeout {
                Some(limit) => match tokio::time::timeout(limit, send).await {
                    Ok(result) => result,
                    Err(_) => return Err(format!("request timed out after {limit:?}")),
                },
                None => send.await,
            };
            result.map_err(|e| match e {
                HttpError::Transport(message) => message,
                other => other.to_string(),
            })
        }
    }

    #[async_trait]
    impl<T: HttpTransport> PageFetcher for HttpPageFetcher<T> {
        async fn fetch(
            &self,
            request: &PageRequest,
            credential: &Credential,
        ) -> Result<PageResponse, FetchError> {
            let mut http_request = HttpRequest::get(request.url());
            credential.apply(&mut http_request);

            let response = match self.send_once(http_request.clone()).await {
                Ok(response) => response,
                Err(first) => {
                    tracing::warn!(
                        url = %request.url(),
                        error = %first,
                        delay = ?self.retry_delay,
                        "Page fetch failed at the connection level, retrying once"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    self.send_once(http_request)
                        .await
                        .map_err(FetchError::Transport)?
                }
            };

            if !response.is_success() {
                return Err(FetchError::Http {
                    status: response.status,
                    retry_after: retry_after(&response),
                    body: truncated_body(&response.body),
                });
            }

            self.format.decode(&response.body)
        }
    }
}
