//! Scored proxy pool with health tracking.
//!
//! Outbound probes rotate through a shared pool of proxies so they do not
//! all originate from one address. Every record carries a health state:
//!
//! ```text
//! Untested --success--> Working
//! Untested --N failures--> Failed
//! Working  --N consecutive failures--> Failed
//! Failed   --reset / pool exhaustion--> Untested
//! ```
//!
//! No other transition happens. Failed records stay in the registry for
//! statistics and reset, but are not handed out while any other record is
//! available.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{ReconError, Result};

/// Default number of consecutive failures before a proxy is demoted.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Weight of the newest sample in the latency moving average.
const LATENCY_SMOOTHING: f64 = 0.3;

/// Proxy protocol type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    /// HTTP proxy
    #[default]
    Http,
    /// HTTPS proxy
    Https,
    /// SOCKS5 proxy
    Socks5,
}

impl ProxyProtocol {
    fn scheme(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }
}

/// Address and credentials of one proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProxyEndpoint {
    /// Proxy host (IP or domain)
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// Proxy protocol
    pub protocol: ProxyProtocol,
    /// Optional username for authentication
    #[serde(skip_serializing)]
    pub username: Option<String>,
    /// Optional password for authentication
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// Creates a new HTTP proxy endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: ProxyProtocol::Http,
            username: None,
            password: None,
        }
    }

    /// Sets the proxy protocol.
    pub fn with_protocol(mut self, protocol: ProxyProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets authentication credentials.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Parses `scheme://[user:pass@]host:port` or bare `host:port`.
    ///
    /// Bare entries are assumed to be HTTP proxies. The port is required.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.contains("://") {
            let url = url::Url::parse(raw)?;
            let protocol = match url.scheme() {
                "http" => ProxyProtocol::Http,
                "https" => ProxyProtocol::Https,
                "socks5" | "socks5h" => ProxyProtocol::Socks5,
                scheme => {
                    return Err(ReconError::Config(format!(
                        "Unsupported proxy protocol: {}",
                        scheme
                    )))
                }
            };
            let host = url
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| ReconError::Config(format!("Missing proxy host in '{}'", raw)))?;
            let port = url
                .port()
                .ok_or_else(|| ReconError::Config(format!("Missing proxy port in '{}'", raw)))?;

            let mut endpoint = ProxyEndpoint::new(host, port).with_protocol(protocol);
            if let Some(password) = url.password() {
                endpoint = endpoint.with_auth(url.username(), password);
            }
            return Ok(endpoint);
        }

        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| ReconError::Config(format!("Expected host:port, got '{}'", raw)))?;
        let port: u16 = port
            .parse()
            .map_err(|_| ReconError::Config(format!("Invalid proxy port in '{}'", raw)))?;
        if host.is_empty() || port == 0 {
            return Err(ReconError::Config(format!("Invalid proxy '{}'", raw)));
        }
        Ok(ProxyEndpoint::new(host, port))
    }

    /// Returns the proxy URL string, including credentials when both are set.
    pub fn url(&self) -> String {
        let scheme = self.protocol.scheme();
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                format!("{}://{}:{}@{}:{}", scheme, user, pass, self.host, self.port)
            }
            _ => format!("{}://{}:{}", scheme, self.host, self.port),
        }
    }

    /// Returns the credential-free address, used as the registry key.
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }
}

/// Health state of a proxy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyState {
    Untested,
    Working,
    Failed,
}

/// A proxy plus its health bookkeeping.
///
/// Values handed out by [`ProxyPool`] are snapshots; the authoritative copy
/// lives inside the pool and only changes through its methods.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyRecord {
    pub endpoint: ProxyEndpoint,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub average_latency: Option<Duration>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub state: ProxyState,
}

impl ProxyRecord {
    fn new(endpoint: ProxyEndpoint) -> Self {
        Self {
            endpoint,
            consecutive_failures: 0,
            consecutive_successes: 0,
            average_latency: None,
            last_used_at: None,
            state: ProxyState::Untested,
        }
    }

    /// Credential-free address of the endpoint.
    pub fn address(&self) -> String {
        self.endpoint.address()
    }

    fn revive(&mut self) {
        self.state = ProxyState::Untested;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
    }
}

/// Read-only pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProxyStats {
    pub total: usize,
    pub working: usize,
    pub failed: usize,
    pub available_for_use: usize,
}

#[derive(Debug, Default)]
struct Registry {
    records: Vec<ProxyRecord>,
    index: HashMap<String, usize>,
}

impl Registry {
    fn push(&mut self, endpoint: ProxyEndpoint) -> bool {
        let key = endpoint.address();
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.records.len());
        self.records.push(ProxyRecord::new(endpoint));
        true
    }

    fn get_mut(&mut self, address: &str) -> Option<&mut ProxyRecord> {
        let slot = *self.index.get(address)?;
        self.records.get_mut(slot)
    }

    fn remove(&mut self, address: &str) -> bool {
        let Some(slot) = self.index.remove(address) else {
            return false;
        };
        self.records.swap_remove(slot);
        if let Some(moved) = self.records.get(slot) {
            self.index.insert(moved.address(), slot);
        }
        true
    }

    fn pick(&self, state_filter: impl Fn(ProxyState) -> bool) -> Option<&ProxyRecord> {
        let candidates: Vec<&ProxyRecord> = self
            .records
            .iter()
            .filter(|r| state_filter(r.state))
            .collect();
        candidates.choose(&mut rand::thread_rng()).copied()
    }
}

/// A pool of proxies shared by concurrent probe tasks.
///
/// All operations go through one lock and never perform network I/O.
#[derive(Debug)]
pub struct ProxyPool {
    registry: Mutex<Registry>,
    failure_threshold: u32,
}

impl ProxyPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    /// Creates a pool with the given endpoints. Duplicate addresses are
    /// collapsed.
    pub fn with_endpoints(endpoints: impl IntoIterator<Item = ProxyEndpoint>) -> Self {
        let mut registry = Registry::default();
        for endpoint in endpoints {
            if !registry.push(endpoint.clone()) {
                debug!("Duplicate proxy {} ignored", endpoint.address());
            }
        }
        Self {
            registry: Mutex::new(registry),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    /// Loads proxies from a list file.
    ///
    /// One proxy per line; blank lines and `#` comments are ignored, as is
    /// anything after a `#` on a proxy line. Invalid entries are skipped
    /// with a warning. A missing file yields an empty pool.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Proxy file {} not found, running without proxies",
                    path.display()
                );
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let endpoints: Vec<ProxyEndpoint> = raw
            .lines()
            .filter_map(|line| {
                let entry = line.split('#').next().unwrap_or_default().trim();
                if entry.is_empty() {
                    return None;
                }
                match ProxyEndpoint::parse(entry) {
                    Ok(endpoint) => Some(endpoint),
                    Err(e) => {
                        warn!("Skipping proxy entry '{}': {}", entry, e);
                        None
                    }
                }
            })
            .collect();

        info!("Loaded {} proxies from {}", endpoints.len(), path.display());
        Ok(Self::with_endpoints(endpoints))
    }

    /// Sets the number of consecutive failures that demotes a proxy.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Hands out a proxy for one attempt.
    ///
    /// Working records are preferred, then any record that is not Failed.
    /// When every record is Failed, all of them are reset to Untested and
    /// one is returned, so the pool never starves callers permanently.
    /// Returns `None` only when the pool is empty.
    pub async fn acquire(&self) -> Option<ProxyRecord> {
        let mut registry = self.registry.lock().await;
        if registry.records.is_empty() {
            return None;
        }

        if let Some(record) = registry.pick(|s| s == ProxyState::Working) {
            return Some(record.clone());
        }
        if let Some(record) = registry.pick(|s| s != ProxyState::Failed) {
            return Some(record.clone());
        }

        warn!(
            "All {} proxies failed, resetting pool",
            registry.records.len()
        );
        for record in registry.records.iter_mut() {
            record.revive();
        }
        registry.pick(|_| true).cloned()
    }

    /// Records a successful attempt through `record`.
    ///
    /// A Failed record keeps its state; it only comes back through a reset.
    pub async fn report_success(&self, record: &ProxyRecord, latency: Duration) {
        let mut registry = self.registry.lock().await;
        let Some(entry) = registry.get_mut(&record.address()) else {
            debug!("Success reported for unknown proxy {}", record.address());
            return;
        };

        entry.consecutive_successes = entry.consecutive_successes.saturating_add(1);
        entry.consecutive_failures = 0;
        entry.average_latency = Some(match entry.average_latency {
            None => latency,
            Some(avg) => avg.mul_f64(1.0 - LATENCY_SMOOTHING) + latency.mul_f64(LATENCY_SMOOTHING),
        });
        entry.last_used_at = Some(Utc::now());
        if entry.state == ProxyState::Untested {
            entry.state = ProxyState::Working;
        }
    }

    /// Records a failed attempt through `record`, demoting it to Failed at
    /// the failure threshold.
    pub async fn report_failure(&self, record: &ProxyRecord) {
        let threshold = self.failure_threshold;
        let mut registry = self.registry.lock().await;
        let Some(entry) = registry.get_mut(&record.address()) else {
            debug!("Failure reported for unknown proxy {}", record.address());
            return;
        };

        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.consecutive_successes = 0;
        entry.last_used_at = Some(Utc::now());
        if entry.state != ProxyState::Failed && entry.consecutive_failures >= threshold {
            entry.state = ProxyState::Failed;
            warn!(
                "Proxy {} failed {} times in a row, removed from rotation",
                entry.address(),
                entry.consecutive_failures
            );
        }
    }

    /// Returns the pool counters without changing anything.
    pub async fn stats(&self) -> ProxyStats {
        let registry = self.registry.lock().await;
        let total = registry.records.len();
        let working = registry
            .records
            .iter()
            .filter(|r| r.state == ProxyState::Working)
            .count();
        let failed = registry
            .records
            .iter()
            .filter(|r| r.state == ProxyState::Failed)
            .count();
        ProxyStats {
            total,
            working,
            failed,
            available_for_use: total - failed,
        }
    }

    /// Gives every Failed record another chance.
    pub async fn reset(&self) {
        let mut registry = self.registry.lock().await;
        let mut revived = 0;
        for record in registry
            .records
            .iter_mut()
            .filter(|r| r.state == ProxyState::Failed)
        {
            record.revive();
            revived += 1;
        }
        info!("Reset {} failed proxies", revived);
    }

    /// Adds a proxy. Returns false when the address is already registered.
    pub async fn add_proxy(&self, endpoint: ProxyEndpoint) -> bool {
        self.registry.lock().await.push(endpoint)
    }

    /// Removes a proxy by its credential-free address.
    pub async fn remove_proxy(&self, address: &str) -> bool {
        self.registry.lock().await.remove(address)
    }

    /// Returns up to `count` Working records, fastest first.
    ///
    /// Records without a latency sample sort after measured ones.
    pub async fn best(&self, count: usize) -> Vec<ProxyRecord> {
        let registry = self.registry.lock().await;
        let mut working: Vec<ProxyRecord> = registry
            .records
            .iter()
            .filter(|r| r.state == ProxyState::Working)
            .cloned()
            .collect();
        drop(registry);

        working.sort_by_key(|r| (r.average_latency.is_none(), r.average_latency));
        working.truncate(count);
        working
    }

    /// Returns copies of all records, for reporting.
    pub async fn snapshot(&self) -> Vec<ProxyRecord> {
        self.registry.lock().await.records.clone()
    }

    /// Returns the number of proxies in the pool.
    pub async fn len(&self) -> usize {
        self.registry.lock().await.records.len()
    }

    /// Returns whether the pool is empty.
    pub async fn is_empty(&self) -> bool {
        self.registry.lock().await.records.is_empty()
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::new()
    }
}
