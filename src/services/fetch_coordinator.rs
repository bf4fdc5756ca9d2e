//! # Fetch Coordinator
//!
//! Sits between every consumer of upstream state and the configured
//! [`UpstreamFetcher`]. It collapses concurrent fetches into one request,
//! enforces a minimum interval between completed fetches, and keeps the last
//! successful snapshot for callers that arrive inside that interval.

use crate::domain::{ConfigMap, RoutingSnapshot, SourceType};
use crate::errors::{Result, RouteplaneError};
use crate::observability::MetricsRecorder;
use crate::services::in_flight::{InFlight, Role};
use crate::upstream::UpstreamFetcher;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Default minimum interval between completed upstream fetches.
pub const DEFAULT_MIN_FETCH_INTERVAL: Duration = Duration::from_secs(5);

/// Anything that can hand out the current routing snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Current snapshot, possibly served from cache.
    async fn snapshot(&self) -> Result<Arc<RoutingSnapshot>>;

    /// Allow the next call to reach the upstream immediately.
    async fn invalidate(&self);

    fn source_type(&self) -> SourceType;
}

/// Key under which concurrent fetches are collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub source_type: SourceType,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    last_snapshot: Option<Arc<RoutingSnapshot>>,
    last_completed: Option<Instant>,
}

/// How one call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Fetched,
    ThrottledCached,
}

struct Inner {
    fetcher: Arc<dyn UpstreamFetcher>,
    min_interval: Duration,
    state: RwLock<CoordinatorState>,
    metrics: MetricsRecorder,
}

impl Inner {
    async fn fetch_or_reuse(self: Arc<Self>) -> Result<(Arc<RoutingSnapshot>, Outcome)> {
        {
            let state = self.state.read().await;
            if let Some(completed) = state.last_completed {
                let elapsed = completed.elapsed();
                if elapsed < self.min_interval {
                    return match &state.last_snapshot {
                        Some(snapshot) => Ok((Arc::clone(snapshot), Outcome::ThrottledCached)),
                        None => {
                            let retry_after = self.min_interval - elapsed;
                            Err(RouteplaneError::throttled(retry_after.as_millis() as u64))
                        }
                    };
                }
            }
        }

        let result = self.fetcher.fetch().await;

        let mut state = self.state.write().await;
        state.last_completed = Some(Instant::now());
        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                state.last_snapshot = Some(Arc::clone(&snapshot));
                Ok((snapshot, Outcome::Fetched))
            }
            Err(e) => Err(e),
        }
    }
}

/// Deduplicating, rate-limited front for an [`UpstreamFetcher`].
pub struct FetchCoordinator {
    inner: Arc<Inner>,
    in_flight: InFlight<FetchKey, (Arc<RoutingSnapshot>, Outcome)>,
}

impl FetchCoordinator {
    pub fn new(fetcher: Arc<dyn UpstreamFetcher>, min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                min_interval,
                state: RwLock::new(CoordinatorState::default()),
                metrics: MetricsRecorder::new(),
            }),
            in_flight: InFlight::new(),
        }
    }

    pub fn with_default_interval(fetcher: Arc<dyn UpstreamFetcher>) -> Self {
        Self::new(fetcher, DEFAULT_MIN_FETCH_INTERVAL)
    }

    fn key(&self) -> FetchKey {
        FetchKey {
            source_type: self.inner.fetcher.source_type(),
        }
    }

    /// Last successful snapshot, without contacting the upstream.
    pub async fn last_snapshot(&self) -> Option<Arc<RoutingSnapshot>> {
        self.inner.state.read().await.last_snapshot.clone()
    }

    pub async fn routers(&self) -> Result<ConfigMap> {
        Ok(self.snapshot().await?.http.routers.clone())
    }

    pub async fn services(&self) -> Result<ConfigMap> {
        Ok(self.snapshot().await?.http.services.clone())
    }

    pub async fn middlewares(&self) -> Result<ConfigMap> {
        Ok(self.snapshot().await?.http.middlewares.clone())
    }
}

#[async_trait]
impl SnapshotSource for FetchCoordinator {
    #[instrument(
        skip(self),
        fields(source = %self.inner.fetcher.source_type()),
        name = "coordinated_fetch"
    )]
    async fn snapshot(&self) -> Result<Arc<RoutingSnapshot>> {
        let inner = Arc::clone(&self.inner);
        let (result, role) = self
            .in_flight
            .run(self.key(), move || inner.fetch_or_reuse())
            .await;

        let metrics = &self.inner.metrics;
        match (&result, role) {
            (Ok(_), Role::Follower) => metrics.record_coordinator_outcome("joined"),
            (Ok((_, Outcome::Fetched)), Role::Leader) => {
                metrics.record_coordinator_outcome("fetched")
            }
            (Ok((_, Outcome::ThrottledCached)), Role::Leader) => {
                debug!("Serving cached snapshot inside the minimum fetch interval");
                metrics.record_coordinator_outcome("throttled_cached")
            }
            (Err(e), _) if e.is_throttled() => metrics.record_coordinator_outcome("throttled"),
            (Err(e), Role::Leader) => warn!(error = %e, "Upstream fetch failed"),
            (Err(_), Role::Follower) => {}
        }

        result.map(|(snapshot, _)| snapshot)
    }

    async fn invalidate(&self) {
        self.inner.state.write().await.last_completed = None;
    }

    fn source_type(&self) -> SourceType {
        self.inner.fetcher.source_type()
    }
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("source_type", &self.inner.fetcher.source_type())
            .field("min_interval", &self.inner.min_interval)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::CountingFetcher;
    use super::*;

    #[tokio::test]
    async fn test_concurrent_calls_share_one_fetch() {
        let mut fetcher = CountingFetcher::empty();
        fetcher.delay = Duration::from_millis(50);
        let fetcher = Arc::new(fetcher);
        let coordinator = FetchCoordinator::new(fetcher.clone(), Duration::ZERO);

        let results = futures::future::join_all((0..8).map(|_| coordinator.snapshot())).await;

        assert_eq!(fetcher.calls(), 1);
        let first = results[0].as_ref().unwrap();
        assert!(results
            .iter()
            .all(|r| Arc::ptr_eq(r.as_ref().unwrap(), first)));
    }

    fn populated_snapshot() -> RoutingSnapshot {
        let mut snapshot = RoutingSnapshot::empty(SourceType::Aggregator);
        let section = |value: serde_json::Value| value.as_object().cloned().unwrap();
        snapshot.http.routers = section(serde_json::json!({
            "app@docker": {"rule": "Host(`app.example.com`)", "service": "app@docker"}
        }));
        snapshot.http.services = section(serde_json::json!({
            "app@docker": {"loadBalancer": {"servers": [{"url": "http://app:80"}]}}
        }));
        snapshot.http.middlewares = section(serde_json::json!({
            "compress": {"compress": {}}
        }));
        snapshot
    }

    #[tokio::test]
    async fn test_section_accessors_share_one_fetch() {
        let mut fetcher = CountingFetcher::returning(populated_snapshot());
        fetcher.delay = Duration::from_millis(50);
        let fetcher = Arc::new(fetcher);
        let coordinator = FetchCoordinator::new(fetcher.clone(), Duration::from_secs(60));

        let (routers, services, middlewares) =
            tokio::join!(coordinator.routers(), coordinator.services(), coordinator.middlewares());

        assert_eq!(fetcher.calls(), 1);
        assert!(routers.unwrap().contains_key("app@docker"));
        assert!(services.unwrap()["app@docker"].get("loadBalancer").is_some());
        assert!(middlewares.unwrap().contains_key("compress"));

        // later calls inside the interval reuse the same snapshot
        coordinator.routers().await.unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetcher_section_defaults() {
        let fetcher = CountingFetcher::returning(populated_snapshot());

        let routers = fetcher.fetch_routers().await.unwrap();
        let services = fetcher.fetch_services().await.unwrap();
        let middlewares = fetcher.fetch_middlewares().await.unwrap();
        assert!(routers.contains_key("app@docker"));
        assert!(services.contains_key("app@docker"));
        assert!(middlewares.contains_key("compress"));
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_serves_cached_snapshot() {
        let fetcher = Arc::new(CountingFetcher::empty());
        let coordinator = FetchCoordinator::new(fetcher.clone(), Duration::from_secs(5));

        let first = coordinator.snapshot().await.unwrap();
        let second = coordinator.snapshot().await.unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));

        tokio::time::advance(Duration::from_secs(6)).await;
        coordinator.snapshot().await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_is_throttled_without_snapshot() {
        let fetcher = Arc::new(CountingFetcher::failing());
        let coordinator = FetchCoordinator::new(fetcher.clone(), Duration::from_secs(5));

        let err = coordinator.snapshot().await.unwrap_err();
        assert!(err.is_transport());

        let err = coordinator.snapshot().await.unwrap_err();
        assert!(err.is_throttled());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_previous_snapshot() {
        let fetcher = Arc::new(CountingFetcher::empty());
        let coordinator = FetchCoordinator::new(fetcher.clone(), Duration::from_secs(5));

        let first = coordinator.snapshot().await.unwrap();
        fetcher.set_snapshot(None);
        coordinator.invalidate().await;

        assert!(coordinator.snapshot().await.is_err());
        let cached = coordinator.last_snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&first, &cached));

        // inside the window again: the last good snapshot is served
        let served = coordinator.snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&first, &served));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_reopens_window() {
        let fetcher = Arc::new(CountingFetcher::empty());
        let coordinator = FetchCoordinator::new(fetcher.clone(), Duration::from_secs(60));

        coordinator.snapshot().await.unwrap();
        coordinator.invalidate().await;
        coordinator.snapshot().await.unwrap();
        coordinator.snapshot().await.unwrap();

        assert_eq!(fetcher.calls(), 2);
    }
}
