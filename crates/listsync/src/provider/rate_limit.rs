use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use super::PageRequest;
use super::credential::Credential;
use super::fetch::{FetchError, PageFetcher, PageResponse};

type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Conservative pace for providers that publish no limit of their own.
pub const DEFAULT_RPS: u32 = 2;

/// A standalone request pacer.
///
/// Clones share the same quota, so one limiter can pace every collection
/// served by the same provider account.
#[derive(Clone)]
pub struct ApiRateLimiter {
    inner: Arc<GovernorRateLimiter>,
}

impl ApiRateLimiter {
    /// `requests_per_second` of zero is treated as one.
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            inner: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
        }
    }

    /// Wait until another request may go out.
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter").finish_non_exhaustive()
    }
}

/// A [`PageFetcher`] that waits for its limiter before every fetch.
pub struct RateLimitedFetcher<F> {
    inner: F,
    limiter: ApiRateLimiter,
}

impl<F> RateLimitedFetcher<F> {
    pub fn new(inner: F, limiter: ApiRateLimiter) -> Self {
        Self { inner, limiter }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

#[async_trait]
impl<F: PageFetcher> PageFetcher for RateLimitedFetcher<F> {
    async fn fetch(
        &self,
        request: &PageRequest,
        credential: &Credential,
    ) -> Result<PageResponse, FetchError> {
        self.limiter.wait().await;
        self.inner.fetch(request, credential).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher(AtomicUsize);

    #[async_trait]
    impl PageFetcher for CountingFetcher {
        async fn fetch(
            &self,
            _request: &PageRequest,
            _credential: &Credential,
        ) -> Result<PageResponse, FetchError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(PageResponse::default())
        }
    }

    #[tokio::test]
    async fn zero_rps_falls_back_to_one() {
        let limiter = ApiRateLimiter::new(0);
        limiter.wait().await;
    }

    #[tokio::test]
    async fn decorator_delegates_to_inner_fetcher() {
        let fetcher = RateLimitedFetcher::new(
            CountingFetcher(AtomicUsize::new(0)),
            ApiRateLimiter::new(100),
        );
        let request = PageRequest::Continuation("https://api.example.com/Property".into());

        fetcher.fetch(&request, &Credential::None).await.expect("page");
        fetcher.fetch(&request, &Credential::None).await.expect("page");

        assert_eq!(fetcher.inner().0.load(Ordering::SeqCst), 2);
    }
}
