//! Ordered fallback over several strategies.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{DirectPageStrategy, WebSearchStrategy};
use crate::probe::{ProbeContext, ProbeStrategy};
use crate::{Identifier, PlatformDescriptor, ProbeOutcome, ProbeStatus, Result};

/// Runs strategies in order and stops at the first hit.
///
/// Strategies that do not apply to a platform are skipped. Without a hit the
/// chain returns the last `NotFound`; if every applicable strategy failed it
/// returns the last failure, preserving whether it was a transport error.
pub struct StrategyChain {
    strategies: Vec<Arc<dyn ProbeStrategy>>,
}

impl StrategyChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Site search first, then site-restricted web search.
    pub fn standard() -> Self {
        Self::new()
            .with_strategy(DirectPageStrategy::new())
            .with_strategy(WebSearchStrategy::new())
    }

    /// Appends a strategy.
    pub fn with_strategy<S: ProbeStrategy + 'static>(mut self, strategy: S) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    /// Appends a shared strategy.
    pub fn with_shared(mut self, strategy: Arc<dyn ProbeStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for StrategyChain {
    fn default() -> Self {
        Self::standard()
    }
}

#[async_trait]
impl ProbeStrategy for StrategyChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn applies_to(&self, platform: &PlatformDescriptor) -> bool {
        self.strategies.iter().any(|s| s.applies_to(platform))
    }

    async fn probe(
        &self,
        identifier: &Identifier,
        platform: &PlatformDescriptor,
        context: &ProbeContext,
    ) -> Result<ProbeOutcome> {
        let mut not_found: Option<ProbeOutcome> = None;
        let mut last_failure: Option<Result<ProbeOutcome>> = None;

        for strategy in self.strategies.iter().filter(|s| s.applies_to(platform)) {
            match strategy.probe(identifier, platform, context).await {
                Ok(outcome) if outcome.status().is_hit() => {
                    debug!("{} hit on {}", strategy.name(), platform.name);
                    return Ok(outcome);
                }
                Ok(outcome) if outcome.status() == ProbeStatus::NotFound => {
                    not_found = Some(outcome);
                }
                Ok(outcome) => {
                    debug!(
                        "{} failed on {}: {}",
                        strategy.name(),
                        platform.name,
                        outcome.error_detail()
                    );
                    last_failure = Some(Ok(outcome));
                }
                Err(e) => {
                    debug!("{} failed on {}: {}", strategy.name(), platform.name, e);
                    last_failure = Some(Err(e));
                }
            }
        }

        match (not_found, last_failure) {
            (Some(outcome), _) => Ok(outcome),
            (None, Some(failure)) => failure,
            (None, None) => Ok(ProbeOutcome::failed(
                platform,
                "no probe strategy applies to this platform",
                context.started_at,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::{EmailValidator, Match, ReconError};

    #[derive(Clone, Copy)]
    enum Behaviour {
        Hit,
        Miss,
        HttpError,
        Transport,
    }

    struct Scripted {
        name: &'static str,
        behaviour: Behaviour,
        applies: bool,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(name: &'static str, behaviour: Behaviour) -> Self {
            Self {
                name,
                behaviour,
                applies: true,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn not_applicable(mut self) -> Self {
            self.applies = false;
            self
        }
    }

    #[async_trait]
    impl ProbeStrategy for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn applies_to(&self, _platform: &PlatformDescriptor) -> bool {
            self.applies
        }

        async fn probe(
            &self,
            _identifier: &Identifier,
            platform: &PlatformDescriptor,
            context: &ProbeContext,
        ) -> Result<ProbeOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Hit => Ok(context.classify(
                    platform,
                    vec![Match::new("t", "u", "s", 0.9, self.name)],
                )),
                Behaviour::Miss => Ok(ProbeOutcome::not_found(platform, context.started_at)),
                Behaviour::HttpError => Ok(ProbeOutcome::failed(
                    platform,
                    format!("HTTP 503 from {}", self.name),
                    context.started_at,
                )),
                Behaviour::Transport => Err(ReconError::Transport("connection reset".into())),
            }
        }
    }

    fn fixtures() -> (Identifier, PlatformDescriptor, ProbeContext) {
        (
            Identifier::parse("user@example.com", &EmailValidator).unwrap(),
            PlatformDescriptor::new("eBay", "ebay.com", "marketplaces"),
            ProbeContext::new(None, Duration::from_secs(5), 0.75),
        )
    }

    #[test]
    fn test_standard_chain() {
        let chain = StrategyChain::standard();
        assert_eq!(chain.len(), 2);
        assert!(!StrategyChain::default().is_empty());
        assert!(StrategyChain::new().is_empty());
    }

    #[tokio::test]
    async fn test_stops_at_first_hit() {
        let (id, platform, ctx) = fixtures();
        let second = Scripted::new("second", Behaviour::Hit);
        let second_calls = Arc::clone(&second.calls);
        let chain = StrategyChain::new()
            .with_strategy(Scripted::new("first", Behaviour::Hit))
            .with_strategy(second);

        let outcome = chain.probe(&id, &platform, &ctx).await.unwrap();
        assert_eq!(outcome.status(), ProbeStatus::Found);
        assert_eq!(outcome.matches()[0].source_strategy, "first");
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_through_to_later_hit() {
        let (id, platform, ctx) = fixtures();
        let chain = StrategyChain::new()
            .with_strategy(Scripted::new("miss", Behaviour::Miss))
            .with_strategy(Scripted::new("broken", Behaviour::Transport))
            .with_strategy(Scripted::new("hit", Behaviour::Hit));

        let outcome = chain.probe(&id, &platform, &ctx).await.unwrap();
        assert_eq!(outcome.matches()[0].source_strategy, "hit");
    }

    #[tokio::test]
    async fn test_not_found_beats_failures() {
        let (id, platform, ctx) = fixtures();
        let chain = StrategyChain::new()
            .with_strategy(Scripted::new("broken", Behaviour::Transport))
            .with_strategy(Scripted::new("miss", Behaviour::Miss))
            .with_strategy(Scripted::new("http", Behaviour::HttpError));

        let outcome = chain.probe(&id, &platform, &ctx).await.unwrap();
        assert_eq!(outcome.status(), ProbeStatus::NotFound);
    }

    #[tokio::test]
    async fn test_all_failed_returns_last_failure() {
        let (id, platform, ctx) = fixtures();
        let chain = StrategyChain::new()
            .with_strategy(Scripted::new("http", Behaviour::HttpError))
            .with_strategy(Scripted::new("broken", Behaviour::Transport));
        let result = chain.probe(&id, &platform, &ctx).await;
        assert!(matches!(result, Err(ReconError::Transport(_))));

        let chain = StrategyChain::new()
            .with_strategy(Scripted::new("broken", Behaviour::Transport))
            .with_strategy(Scripted::new("http", Behaviour::HttpError));
        let outcome = chain.probe(&id, &platform, &ctx).await.unwrap();
        assert_eq!(outcome.status(), ProbeStatus::Error);
        assert_eq!(outcome.error_detail(), "HTTP 503 from http");
    }

    #[tokio::test]
    async fn test_skips_inapplicable_strategies() {
        let (id, platform, ctx) = fixtures();
        let skipped = Scripted::new("skipped", Behaviour::Hit).not_applicable();
        let skipped_calls = Arc::clone(&skipped.calls);
        let chain = StrategyChain::new()
            .with_strategy(skipped)
            .with_shared(Arc::new(Scripted::new("miss", Behaviour::Miss)));

        let outcome = chain.probe(&id, &platform, &ctx).await.unwrap();
        assert_eq!(outcome.status(), ProbeStatus::NotFound);
        assert_eq!(skipped_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_nothing_applies() {
        let (id, platform, ctx) = fixtures();
        let chain = StrategyChain::new()
            .with_strategy(Scripted::new("skipped", Behaviour::Hit).not_applicable());
        assert!(!chain.applies_to(&platform));
        let outcome = chain.probe(&id, &platform, &ctx).await.unwrap();
        assert_eq!(outcome.status(), ProbeStatus::Error);
        assert!(outcome.error_detail().contains("no probe strategy"));
    }
}
