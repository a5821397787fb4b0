//! Active proxy validation.
//!
//! Each proxy is tried against a short list of IP echo services. The first
//! 200 response marks it Working with the measured latency; a proxy that
//! fails every service gets one failure reported per failed attempt.
//! Network I/O happens outside the pool lock; only the reports go through
//! the pool.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::proxy::{ProxyPool, ProxyRecord, ProxyStats};
use crate::transport::{Connector, HttpConnector};

/// Echo services tried in order.
pub const DEFAULT_TEST_URLS: &[&str] = &[
    "http://httpbin.org/ip",
    "https://httpbin.org/ip",
    "http://icanhazip.com",
    "https://api.ipify.org?format=json",
];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONCURRENCY: usize = 5;

/// Result of checking one proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Latency of the first successful attempt.
    pub latency: Option<Duration>,
    /// Attempts that failed before the first success, or all of them.
    pub failed_attempts: u32,
}

impl CheckOutcome {
    pub fn is_working(&self) -> bool {
        self.latency.is_some()
    }
}

/// Checks proxies against echo services and feeds the pool's health state.
pub struct ProxyChecker {
    connector: Arc<dyn Connector>,
    test_urls: Vec<String>,
    timeout: Duration,
    concurrency: usize,
}

impl ProxyChecker {
    pub fn new() -> Self {
        Self {
            connector: Arc::new(HttpConnector),
            test_urls: DEFAULT_TEST_URLS.iter().map(|u| u.to_string()).collect(),
            timeout: DEFAULT_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Opens attempts through `connector` instead of reqwest.
    pub fn with_connector<C: Connector + 'static>(mut self, connector: C) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    pub fn with_test_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.test_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of proxies checked at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Tries `record` against each test URL until one answers 200.
    pub async fn check(&self, record: &ProxyRecord) -> CheckOutcome {
        let mut failed_attempts = 0;
        for url in &self.test_urls {
            let started = Instant::now();
            match self.attempt(record, url).await {
                Ok(()) => {
                    let latency = started.elapsed();
                    info!(
                        "Proxy {} is working ({:.2}s via {})",
                        record.address(),
                        latency.as_secs_f64(),
                        url
                    );
                    return CheckOutcome {
                        latency: Some(latency),
                        failed_attempts,
                    };
                }
                Err(reason) => {
                    debug!("Proxy {} failed {}: {}", record.address(), url, reason);
                    failed_attempts += 1;
                }
            }
        }
        warn!("Proxy {} failed all checks", record.address());
        CheckOutcome {
            latency: None,
            failed_attempts,
        }
    }

    async fn attempt(&self, record: &ProxyRecord, url: &str) -> Result<(), String> {
        let fetcher = self
            .connector
            .connect(Some(record), self.timeout)
            .map_err(|e| e.to_string())?;
        let page = timeout(self.timeout, fetcher.fetch(url))
            .await
            .map_err(|_| format!("timed out after {:?}", self.timeout))?
            .map_err(|e| e.to_string())?;
        if page.status == 200 {
            Ok(())
        } else {
            Err(format!("HTTP {}", page.status))
        }
    }

    /// Checks every proxy in `pool` and reports the results to it.
    ///
    /// A working proxy gets one success report with its latency. A proxy
    /// that fails every attempt gets one failure report per attempt, so it
    /// is demoted once the attempts reach the pool's failure threshold.
    pub async fn validate_all(&self, pool: &ProxyPool) -> ProxyStats {
        let records = pool.snapshot().await;
        if records.is_empty() {
            return pool.stats().await;
        }
        info!("Validating {} proxies", records.len());

        let checked: Vec<(ProxyRecord, CheckOutcome)> = stream::iter(records)
            .map(|record| async move {
                let outcome = self.check(&record).await;
                (record, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (record, outcome) in &checked {
            match outcome.latency {
                Some(latency) => pool.report_success(record, latency).await,
                None => {
                    for _ in 0..outcome.failed_attempts {
                        pool.report_failure(record).await;
                    }
                }
            }
        }

        let stats = pool.stats().await;
        info!(
            "Validation complete: {} working, {} failed of {}",
            stats.working, stats.failed, stats.total
        );
        stats
    }
}

impl Default for ProxyChecker {
    fn default() -> Self {
        Self::new()
    }
}
