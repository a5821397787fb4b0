//! Probe outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PlatformDescriptor;

/// Verdict of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    /// Direct evidence that the platform knows the identifier.
    Found,
    /// The platform was reached and showed no evidence.
    NotFound,
    /// Indirect or unauthenticated evidence only.
    PotentialMatch,
    /// The probe could not complete.
    Error,
}

impl ProbeStatus {
    /// Returns true for `Found` and `PotentialMatch`.
    pub fn is_hit(&self) -> bool {
        matches!(self, ProbeStatus::Found | ProbeStatus::PotentialMatch)
    }

    /// Lowercase label used in text output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Found => "found",
            ProbeStatus::NotFound => "not_found",
            ProbeStatus::PotentialMatch => "potential_match",
            ProbeStatus::Error => "error",
        }
    }
}

/// A piece of supporting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Title of the page or result.
    pub title: String,
    /// Where the evidence was seen.
    pub locator: String,
    /// Text surrounding the identifier.
    pub snippet: String,
    /// Confidence in `[0, 1]`.
    pub confidence_score: f64,
    /// Name of the strategy that produced this match.
    pub source_strategy: String,
}

impl Match {
    /// Creates a match; the confidence is clamped into `[0, 1]`.
    pub fn new(
        title: impl Into<String>,
        locator: impl Into<String>,
        snippet: impl Into<String>,
        confidence_score: f64,
        source_strategy: impl Into<String>,
    ) -> Self {
        let confidence_score = if confidence_score.is_nan() {
            0.0
        } else {
            confidence_score.clamp(0.0, 1.0)
        };
        Self {
            title: title.into(),
            locator: locator.into(),
            snippet: snippet.into(),
            confidence_score,
            source_strategy: source_strategy.into(),
        }
    }

    /// Caps the confidence at `ceiling`.
    pub fn capped(mut self, ceiling: f64) -> Self {
        self.confidence_score = self.confidence_score.min(ceiling);
        self
    }
}

/// Structured result of one probe.
///
/// Built once by the task that ran the probe and never mutated afterwards.
/// `error_detail` is non-empty exactly when `status` is `Error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    platform_name: String,
    platform_address: String,
    status: ProbeStatus,
    matches: Vec<Match>,
    error_detail: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl ProbeOutcome {
    fn build(
        platform: &PlatformDescriptor,
        status: ProbeStatus,
        matches: Vec<Match>,
        error_detail: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        let finished_at = Utc::now().max(started_at);
        Self {
            platform_name: platform.name.clone(),
            platform_address: platform.base_address.clone(),
            status,
            matches,
            error_detail,
            started_at,
            finished_at,
        }
    }

    /// Direct evidence was found.
    pub fn found(platform: &PlatformDescriptor, matches: Vec<Match>, started_at: DateTime<Utc>) -> Self {
        Self::build(platform, ProbeStatus::Found, matches, String::new(), started_at)
    }

    /// Only indirect evidence was found.
    pub fn potential_match(
        platform: &PlatformDescriptor,
        matches: Vec<Match>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::build(
            platform,
            ProbeStatus::PotentialMatch,
            matches,
            String::new(),
            started_at,
        )
    }

    /// The platform answered and showed nothing.
    pub fn not_found(platform: &PlatformDescriptor, started_at: DateTime<Utc>) -> Self {
        Self::build(
            platform,
            ProbeStatus::NotFound,
            Vec::new(),
            String::new(),
            started_at,
        )
    }

    /// The probe failed. An empty detail is replaced so the outcome stays
    /// distinguishable from the non-error statuses.
    pub fn failed(
        platform: &PlatformDescriptor,
        detail: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut detail = detail.into();
        if detail.trim().is_empty() {
            detail = "unspecified error".to_string();
        }
        Self::build(platform, ProbeStatus::Error, Vec::new(), detail, started_at)
    }

    /// Classifies `matches` against `found_threshold`: the best confidence at
    /// or above the threshold is `Found`, any other match is
    /// `PotentialMatch`, and no match is `NotFound`.
    pub fn from_matches(
        platform: &PlatformDescriptor,
        mut matches: Vec<Match>,
        found_threshold: f64,
        started_at: DateTime<Utc>,
    ) -> Self {
        if matches.is_empty() {
            return Self::not_found(platform, started_at);
        }

        matches.sort_by(|a, b| {
            b.confidence_score
                .partial_cmp(&a.confidence_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if matches[0].confidence_score >= found_threshold {
            Self::found(platform, matches, started_at)
        } else {
            Self::potential_match(platform, matches, started_at)
        }
    }

    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    pub fn platform_address(&self) -> &str {
        &self.platform_address
    }

    pub fn status(&self) -> ProbeStatus {
        self.status
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    /// Empty unless `status()` is `Error`.
    pub fn error_detail(&self) -> &str {
        &self.error_detail
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Highest confidence among the matches, if any.
    pub fn best_confidence(&self) -> Option<f64> {
        self.matches
            .iter()
            .map(|m| m.confidence_score)
            .fold(None, |best, c| Some(best.map_or(c, |b: f64| b.max(c))))
    }
}
