//! Probe strategy trait.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::proxy::ProxyRecord;
use crate::transport::{Connector, HttpConnector, PageFetcher};
use crate::{Identifier, Match, PlatformDescriptor, ProbeOutcome, Result};

/// Per-attempt context handed to a strategy by the orchestrator.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    /// Proxy acquired for this attempt, if the pool had one.
    pub proxy: Option<ProxyRecord>,
    /// Soft deadline the strategy should finish by.
    pub deadline: Instant,
    /// Best-match confidence at or above which a hit counts as `Found`.
    pub found_threshold: f64,
    /// When the orchestrator started this probe.
    pub started_at: DateTime<Utc>,
}

impl ProbeContext {
    pub fn new(proxy: Option<ProxyRecord>, timeout: Duration, found_threshold: f64) -> Self {
        Self {
            proxy,
            deadline: Instant::now() + timeout,
            found_threshold,
            started_at: Utc::now(),
        }
    }

    /// Time left before the soft deadline, never less than one second so a
    /// late strategy still gets a usable client timeout.
    pub fn remaining(&self) -> Duration {
        self.deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_secs(1))
    }

    /// Builds a transport bound to this attempt's proxy.
    pub fn fetcher(&self) -> Result<Box<dyn PageFetcher>> {
        HttpConnector.connect(self.proxy.as_ref(), self.remaining())
    }

    /// Classifies `matches` into an outcome for `platform`.
    pub fn classify(&self, platform: &PlatformDescriptor, matches: Vec<Match>) -> ProbeOutcome {
        ProbeOutcome::from_matches(platform, matches, self.found_threshold, self.started_at)
    }
}

/// Determines whether a platform holds evidence of an identifier.
///
/// Routine failures that still produced a response (HTTP errors, block
/// pages) should come back as `Ok` with an `Error` outcome. An `Err` means
/// the transport itself failed and is counted against the proxy in use.
#[async_trait]
pub trait ProbeStrategy: Send + Sync {
    /// Short name recorded on every match this strategy produces.
    fn name(&self) -> &str;

    /// Whether this strategy can say anything about `platform`.
    fn applies_to(&self, _platform: &PlatformDescriptor) -> bool {
        true
    }

    /// Probes `platform` for `identifier`.
    async fn probe(
        &self,
        identifier: &Identifier,
        platform: &PlatformDescriptor,
        context: &ProbeContext,
    ) -> Result<ProbeOutcome>;
}
