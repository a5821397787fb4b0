//! # identrace
//!
//! Concurrent identifier reconnaissance across third-party platforms.
//!
//! Given an identifier such as an email address, this library probes the
//! platforms of one or more categories for evidence that the identifier is
//! known to them, with:
//!
//! - Bounded concurrent probing per category with per-probe and
//!   per-category deadlines
//! - A shared rotating proxy pool with tracked health
//! - Pluggable probe strategies with ordered fallback
//! - One normalized, summarized record per run
//! - Optional proxy validation and email deliverability checks
//!
//! ## Example
//!
//! ```rust,no_run
//! use identrace::{
//!     OrchestratorConfig, PlatformRegistry, PlatformSearchOrchestrator, SearchCampaign,
//!     strategies::StrategyChain,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = PlatformSearchOrchestrator::new(StrategyChain::standard())
//!         .with_config(OrchestratorConfig::default());
//!     let campaign = SearchCampaign::new(PlatformRegistry::builtin()?, orchestrator);
//!
//!     let result = campaign.run("user@example.com", &["discussions"]).await?;
//!     for (category, outcomes) in result.categories() {
//!         for outcome in outcomes {
//!             println!("{} {}: {:?}", category, outcome.platform_name(), outcome.status());
//!         }
//!     }
//!     println!("hit rate: {:.2}%", result.summary().hit_rate_percent);
//!     Ok(())
//! }
//! ```

mod campaign;
mod config;
mod deliverability;
mod error;
mod identifier;
mod orchestrator;
mod outcome;
mod platform;
mod probe;

pub mod proxy;
pub mod proxy_check;
pub mod strategies;
pub mod transport;

pub use campaign::{CampaignResult, SearchCampaign, Summary};
pub use config::{OrchestratorConfig, MAX_WORKERS};
pub use error::{ReconError, Result};
pub use deliverability::{
    check_domain, Deliverability, DeliverabilityReport, DomainChecker, DomainReport, MxHost,
    SmtpVerdict,
};
pub use identifier::{EmailValidator, Identifier, IdentifierValidator, Validation};
pub use orchestrator::{CategoryRunner, PlatformSearchOrchestrator};
pub use outcome::{Match, ProbeOutcome, ProbeStatus};
pub use platform::{PlatformDescriptor, PlatformRegistry};
pub use probe::{ProbeContext, ProbeStrategy};
