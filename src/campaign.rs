//! End-to-end search runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use tracing::{error, info, warn};

use crate::orchestrator::CategoryRunner;
use crate::{
    EmailValidator, Identifier, IdentifierValidator, PlatformDescriptor, PlatformRegistry,
    ProbeOutcome, ProbeStatus, ReconError, Result,
};

/// Counts derived from a campaign's outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub total_probed: usize,
    pub found_count: usize,
    pub potential_count: usize,
    pub error_count: usize,
    /// Share of probes that found the identifier, 0-100 with two decimals.
    pub hit_rate_percent: f64,
}

impl Summary {
    /// Tallies `outcomes`.
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a ProbeOutcome>) -> Self {
        let mut summary = Summary {
            total_probed: 0,
            found_count: 0,
            potential_count: 0,
            error_count: 0,
            hit_rate_percent: 0.0,
        };

        for outcome in outcomes {
            summary.total_probed += 1;
            match outcome.status() {
                ProbeStatus::Found => summary.found_count += 1,
                ProbeStatus::PotentialMatch => summary.potential_count += 1,
                ProbeStatus::Error => summary.error_count += 1,
                ProbeStatus::NotFound => {}
            }
        }

        if summary.total_probed > 0 {
            let rate = 100.0 * summary.found_count as f64 / summary.total_probed as f64;
            summary.hit_rate_percent = (rate * 100.0).round() / 100.0;
        }
        summary
    }

    /// Number of probes that answered without finding anything.
    pub fn not_found_count(&self) -> usize {
        self.total_probed - self.found_count - self.potential_count - self.error_count
    }
}

/// Result of one campaign.
///
/// The summary is never stored; it is recomputed from the outcomes on every
/// call and when serializing.
#[derive(Debug, Clone)]
pub struct CampaignResult {
    identifier: Identifier,
    started_at: DateTime<Utc>,
    categories_requested: Vec<String>,
    outcomes_by_category: BTreeMap<String, Vec<ProbeOutcome>>,
}

impl CampaignResult {
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Requested categories in request order, duplicates removed.
    pub fn categories_requested(&self) -> &[String] {
        &self.categories_requested
    }

    /// Outcomes of `category`, if it was probed.
    pub fn outcomes(&self, category: &str) -> Option<&[ProbeOutcome]> {
        self.outcomes_by_category.get(category).map(Vec::as_slice)
    }

    /// Probed categories and their outcomes, in request order.
    pub fn categories(&self) -> impl Iterator<Item = (&str, &[ProbeOutcome])> {
        self.categories_requested.iter().filter_map(|category| {
            self.outcomes_by_category
                .get(category)
                .map(|outcomes| (category.as_str(), outcomes.as_slice()))
        })
    }

    /// Every outcome across categories.
    pub fn all_outcomes(&self) -> impl Iterator<Item = &ProbeOutcome> {
        self.outcomes_by_category.values().flatten()
    }

    pub fn summary(&self) -> Summary {
        Summary::from_outcomes(self.all_outcomes())
    }
}

impl Serialize for CampaignResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CampaignResult", 5)?;
        state.serialize_field("identifier", &self.identifier)?;
        state.serialize_field("started_at", &self.started_at)?;
        state.serialize_field("categories_requested", &self.categories_requested)?;
        state.serialize_field("outcomes_by_category", &OrderedOutcomes(self))?;
        state.serialize_field("summary", &self.summary())?;
        state.end()
    }
}

/// Serializes the outcome map in request order.
struct OrderedOutcomes<'a>(&'a CampaignResult);

impl Serialize for OrderedOutcomes<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.outcomes_by_category.len()))?;
        for (category, outcomes) in self.0.categories() {
            map.serialize_entry(category, outcomes)?;
        }
        map.end()
    }
}

/// Validates an identifier and probes every requested category.
pub struct SearchCampaign {
    validator: Arc<dyn IdentifierValidator>,
    registry: PlatformRegistry,
    runner: Arc<dyn CategoryRunner>,
}

impl SearchCampaign {
    /// Creates a campaign that validates identifiers as email addresses.
    ///
    /// `runner` is usually a [`PlatformSearchOrchestrator`](crate::PlatformSearchOrchestrator).
    pub fn new<R: CategoryRunner + 'static>(registry: PlatformRegistry, runner: R) -> Self {
        Self {
            validator: Arc::new(EmailValidator::new()),
            registry,
            runner: Arc::new(runner),
        }
    }

    /// Replaces the identifier validator.
    pub fn with_validator<V: IdentifierValidator + 'static>(mut self, validator: V) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    /// Runs the campaign.
    ///
    /// Fails only when the identifier is rejected or when none of the
    /// requested categories has a configured platform. Unknown or empty
    /// categories are skipped, and a category that fails as a whole is
    /// recorded as a single `Error` outcome named after the category.
    pub async fn run<I, S>(&self, identifier: &str, categories: I) -> Result<CampaignResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let identifier = Identifier::parse(identifier, self.validator.as_ref())?;
        let started_at = Utc::now();

        let mut seen = HashSet::new();
        let categories_requested: Vec<String> = categories
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .filter(|c| !c.is_empty() && seen.insert(c.clone()))
            .collect();

        let mut plan = Vec::new();
        for category in &categories_requested {
            match self.registry.platforms(category) {
                Some(platforms) if !platforms.is_empty() => plan.push((category, platforms)),
                Some(_) => warn!("Category '{}' has no platforms, skipping", category),
                None => warn!("{}, skipping", ReconError::UnknownCategory(category.clone())),
            }
        }
        if plan.is_empty() {
            return Err(ReconError::NoPlatforms);
        }

        info!(
            "Searching for {} across {} categories",
            identifier,
            plan.len()
        );

        let mut outcomes_by_category = BTreeMap::new();
        for (category, platforms) in plan {
            let outcomes = match self
                .runner
                .run_category(&identifier, category, platforms)
                .await
            {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    error!("Category '{}' failed: {}", category, e);
                    let placeholder = PlatformDescriptor::new(category.as_str(), "", category.as_str());
                    vec![ProbeOutcome::failed(&placeholder, e.to_string(), Utc::now())]
                }
            };
            outcomes_by_category.insert(category.clone(), outcomes);
        }

        let result = CampaignResult {
            identifier,
            started_at,
            categories_requested,
            outcomes_by_category,
        };
        let summary = result.summary();
        info!(
            "Campaign finished: {} probed, {} found, {} potential, {} errors ({:.2}% hit rate)",
            summary.total_probed,
            summary.found_count,
            summary.potential_count,
            summary.error_count,
            summary.hit_rate_percent
        );
        Ok(result)
    }
}
