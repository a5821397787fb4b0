//! Per-category probe orchestration.
//!
//! One orchestrator owns a bounded worker pool that is reused for every
//! category of a run. For each category it dispatches one probe task per
//! platform, paces dispatches, enforces per-probe and per-category
//! deadlines, and always returns exactly one outcome per platform.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::platform::dedupe_by_name;
use crate::probe::{ProbeContext, ProbeStrategy};
use crate::proxy::ProxyPool;
use crate::{
    Identifier, OrchestratorConfig, PlatformDescriptor, ProbeOutcome, ProbeStatus, ReconError,
    Result,
};

/// Runs one probe per platform of a category under a worker budget.
pub struct PlatformSearchOrchestrator {
    strategy: Arc<dyn ProbeStrategy>,
    proxy_pool: Option<Arc<ProxyPool>>,
    config: OrchestratorConfig,
    workers: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl PlatformSearchOrchestrator {
    /// Creates an orchestrator with the default configuration.
    pub fn new<S: ProbeStrategy + 'static>(strategy: S) -> Self {
        Self::with_shared_strategy(Arc::new(strategy))
    }

    /// Creates an orchestrator around an already shared strategy.
    pub fn with_shared_strategy(strategy: Arc<dyn ProbeStrategy>) -> Self {
        let config = OrchestratorConfig::default();
        Self {
            strategy,
            proxy_pool: None,
            workers: Arc::new(Semaphore::new(config.pool_size())),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the configuration and resizes the worker pool.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.workers = Arc::new(Semaphore::new(config.pool_size()));
        self.config = config;
        self
    }

    /// Routes probes through `pool`.
    pub fn with_proxy_pool(mut self, pool: Arc<ProxyPool>) -> Self {
        self.proxy_pool = Some(pool);
        self
    }

    /// Uses `token` for cooperative cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the proxy pool if configured.
    pub fn proxy_pool(&self) -> Option<&Arc<ProxyPool>> {
        self.proxy_pool.as_ref()
    }

    /// Token that stops further dispatches when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Probes every platform of `category` and returns one outcome per
    /// distinct platform name, in descriptor order.
    ///
    /// Probe failures, panics and timeouts become `Error` outcomes. When the
    /// category deadline passes, probes still running are left to finish on
    /// their own and are reported as timed out.
    pub async fn run_category(
        &self,
        identifier: &Identifier,
        category: &str,
        platforms: &[PlatformDescriptor],
    ) -> Result<Vec<ProbeOutcome>> {
        let platforms = dedupe_by_name(platforms);
        if platforms.is_empty() {
            return Ok(Vec::new());
        }

        let category_started = chrono::Utc::now();
        let deadline = Instant::now() + self.config.category_timeout();
        let delay = self.config.inter_dispatch_delay();
        let probe_timeout = self.config.probe_timeout();
        let found_threshold = self.config.found_threshold();
        let identifier = Arc::new(identifier.clone());

        info!(
            "Probing {} platforms in '{}' with {} workers",
            platforms.len(),
            category,
            self.config.workers_for(platforms.len())
        );

        let mut slots: Vec<Option<ProbeOutcome>> = vec![None; platforms.len()];
        let mut dispatched = vec![false; platforms.len()];
        let mut tasks: JoinSet<(usize, ProbeOutcome)> = JoinSet::new();

        let batch = async {
            for (index, platform) in platforms.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    break;
                }
                if index > 0 && !delay.is_zero() {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = sleep(delay) => {}
                    }
                }

                let permit = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    permit = Arc::clone(&self.workers).acquire_owned() => permit
                        .map_err(|_| ReconError::Other("worker pool closed".into()))?,
                };

                debug!("Dispatching probe for {} ({})", platform.name, category);
                dispatched[index] = true;
                tasks.spawn(run_probe(
                    index,
                    permit,
                    Arc::clone(&self.strategy),
                    self.proxy_pool.clone(),
                    Arc::clone(&identifier),
                    platform.clone(),
                    probe_timeout,
                    found_threshold,
                ));
            }

            if self.cancel.is_cancelled() {
                warn!("Cancelled, waiting for in-flight probes in '{}'", category);
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((index, outcome)) => slots[index] = Some(outcome),
                    Err(e) => warn!("Probe task in '{}' ended abnormally: {}", category, e),
                }
            }
            Ok::<(), ReconError>(())
        };

        let finished = timeout_at(deadline, batch).await;
        let timed_out = match finished {
            Ok(result) => {
                result?;
                false
            }
            Err(_) => {
                warn!(
                    "Category '{}' exceeded {:?}, abandoning {} outstanding probes",
                    category,
                    self.config.category_timeout(),
                    tasks.len()
                );
                tasks.detach_all();
                true
            }
        };

        let outcomes: Vec<ProbeOutcome> = platforms
            .iter()
            .zip(slots)
            .zip(dispatched)
            .map(|((platform, slot), was_dispatched)| match slot {
                Some(outcome) => outcome,
                None if timed_out => ProbeOutcome::failed(
                    platform,
                    format!(
                        "timeout: category deadline of {:?} exceeded",
                        self.config.category_timeout()
                    ),
                    category_started,
                ),
                None if !was_dispatched => {
                    ProbeOutcome::failed(platform, "cancelled before dispatch", category_started)
                }
                None => ProbeOutcome::failed(platform, "probe task aborted", category_started),
            })
            .collect();

        let count = |status: ProbeStatus| outcomes.iter().filter(|o| o.status() == status).count();
        info!(
            "Finished '{}': {} found, {} potential, {} not found, {} errors",
            category,
            count(ProbeStatus::Found),
            count(ProbeStatus::PotentialMatch),
            count(ProbeStatus::NotFound),
            count(ProbeStatus::Error)
        );

        Ok(outcomes)
    }
}

/// Produces the outcomes of one category for a campaign.
#[async_trait]
pub trait CategoryRunner: Send + Sync {
    async fn run_category(
        &self,
        identifier: &Identifier,
        category: &str,
        platforms: &[PlatformDescriptor],
    ) -> Result<Vec<ProbeOutcome>>;
}

#[async_trait]
impl CategoryRunner for PlatformSearchOrchestrator {
    async fn run_category(
        &self,
        identifier: &Identifier,
        category: &str,
        platforms: &[PlatformDescriptor],
    ) -> Result<Vec<ProbeOutcome>> {
        PlatformSearchOrchestrator::run_category(self, identifier, category, platforms).await
    }
}

/// Body of one probe task. Never fails: every fault becomes an outcome.
#[allow(clippy::too_many_arguments)]
async fn run_probe(
    index: usize,
    _permit: OwnedSemaphorePermit,
    strategy: Arc<dyn ProbeStrategy>,
    proxy_pool: Option<Arc<ProxyPool>>,
    identifier: Arc<Identifier>,
    platform: PlatformDescriptor,
    probe_timeout: Duration,
    found_threshold: f64,
) -> (usize, ProbeOutcome) {
    let proxy = match &proxy_pool {
        Some(pool) => {
            let proxy = pool.acquire().await;
            if proxy.is_none() {
                debug!("{}, probing {} directly", ReconError::ProxyExhausted, platform.name);
            }
            proxy
        }
        None => None,
    };

    let context = ProbeContext::new(proxy, probe_timeout, found_threshold);
    let started = Instant::now();
    let attempt = AssertUnwindSafe(strategy.probe(&identifier, &platform, &context)).catch_unwind();

    // Some(true): the transport worked; Some(false): it did not; None: unknown.
    let (outcome, transport_ok) = match timeout(probe_timeout, attempt).await {
        Ok(Ok(Ok(outcome))) if outcome.platform_name() != platform.name => {
            let detail = format!(
                "strategy returned an outcome for '{}'",
                outcome.platform_name()
            );
            (ProbeOutcome::failed(&platform, detail, context.started_at), None)
        }
        Ok(Ok(Ok(outcome))) => (outcome, Some(true)),
        Ok(Ok(Err(e))) => {
            warn!("Probe of {} failed: {}", platform.name, e);
            let transport_failed = e.is_transport();
            (
                ProbeOutcome::failed(&platform, e.to_string(), context.started_at),
                Some(!transport_failed),
            )
        }
        Ok(Err(panic)) => {
            let detail = format!("probe panicked: {}", panic_message(panic.as_ref()));
            warn!("Probe of {} {}", platform.name, detail);
            (ProbeOutcome::failed(&platform, detail, context.started_at), None)
        }
        Err(_) => {
            warn!("Probe of {} timed out after {:?}", platform.name, probe_timeout);
            (
                ProbeOutcome::failed(
                    &platform,
                    format!("timeout: probe exceeded {:?}", probe_timeout),
                    context.started_at,
                ),
                Some(false),
            )
        }
    };

    if let (Some(pool), Some(record)) = (&proxy_pool, &context.proxy) {
        match transport_ok {
            Some(true) => pool.report_success(record, started.elapsed()).await,
            Some(false) => pool.report_failure(record).await,
            None => {}
        }
    }

    debug!("Probe of {} finished: {}", platform.name, outcome.status().as_str());
    (index, outcome)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
