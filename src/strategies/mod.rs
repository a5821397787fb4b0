//! Probe strategy implementations.

mod chain;
mod direct_page;
mod web_search;

pub use chain::StrategyChain;
pub use direct_page::DirectPageStrategy;
pub use web_search::WebSearchStrategy;

use regex::RegexBuilder;

use crate::{ReconError, Result};

/// Returns up to `limit` excerpts of `text` around case-insensitive
/// occurrences of `needle`, each extended by `radius` characters per side.
pub(crate) fn context_snippets(
    text: &str,
    needle: &str,
    radius: usize,
    limit: usize,
) -> Result<Vec<String>> {
    if needle.is_empty() {
        return Ok(Vec::new());
    }
    let pattern = RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
        .map_err(|e| ReconError::Parse(format!("Failed to build pattern: {}", e)))?;

    let snippets = pattern
        .find_iter(text)
        .take(limit)
        .map(|found| {
            let start = match radius {
                0 => found.start(),
                _ => text[..found.start()]
                    .char_indices()
                    .rev()
                    .nth(radius - 1)
                    .map(|(i, _)| i)
                    .unwrap_or(0),
            };
            let end = text[found.end()..]
                .char_indices()
                .nth(radius)
                .map(|(i, _)| found.end() + i)
                .unwrap_or(text.len());
            collapse_whitespace(&text[start..end])
        })
        .collect();
    Ok(snippets)
}

/// Case-insensitive containment check.
pub(crate) fn mentions(haystack: &str, needle: &str) -> bool {
    !needle.is_empty() && haystack.to_lowercase().contains(&needle.to_lowercase())
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
