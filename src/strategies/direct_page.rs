//! Site search on the platform itself.

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;

use super::{collapse_whitespace, context_snippets};
use crate::probe::{ProbeContext, ProbeStrategy};
use crate::transport::FetchedPage;
use crate::{Identifier, Match, PlatformDescriptor, ProbeOutcome, ReconError, Result};

const STRATEGY_NAME: &str = "direct_page";
const CONFIDENCE: f64 = 0.9;
const SNIPPET_RADIUS: usize = 50;
const MAX_SNIPPETS: usize = 3;

/// Queries a public platform's own search endpoint and looks for the
/// identifier in the returned page.
///
/// Only applies to platforms that do not require authentication and that
/// declare a search endpoint.
#[derive(Debug, Clone, Default)]
pub struct DirectPageStrategy;

impl DirectPageStrategy {
    pub fn new() -> Self {
        Self
    }

    /// Builds the site search URL for `identifier`.
    pub fn search_url(platform: &PlatformDescriptor, identifier: &Identifier) -> Result<String> {
        let path = platform.search_path.as_deref().unwrap_or("/search");
        let base = url::Url::parse(&platform.site_url())?;
        let mut url = base.join(path)?;
        url.query_pairs_mut().append_pair("q", identifier.as_str());
        Ok(url.to_string())
    }

    fn parse_page(
        &self,
        page: &FetchedPage,
        identifier: &Identifier,
    ) -> Result<Vec<Match>> {
        let document = Html::parse_document(&page.body);
        let title_selector = Selector::parse("title")
            .map_err(|e| ReconError::Parse(format!("Failed to parse selector: {:?}", e)))?;
        let body_selector = Selector::parse("body")
            .map_err(|e| ReconError::Parse(format!("Failed to parse selector: {:?}", e)))?;

        let title = document
            .select(&title_selector)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "No title".to_string());

        let text = match document.select(&body_selector).next() {
            Some(body) => body.text().collect::<Vec<_>>().join(" "),
            None => document.root_element().text().collect::<Vec<_>>().join(" "),
        };

        let matches = context_snippets(&text, identifier.as_str(), SNIPPET_RADIUS, MAX_SNIPPETS)?
            .into_iter()
            .map(|snippet| Match::new(title.clone(), page.url.clone(), snippet, CONFIDENCE, STRATEGY_NAME))
            .collect();
        Ok(matches)
    }
}

#[async_trait]
impl ProbeStrategy for DirectPageStrategy {
    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    fn applies_to(&self, platform: &PlatformDescriptor) -> bool {
        !platform.requires_authentication && platform.search_path.is_some()
    }

    async fn probe(
        &self,
        identifier: &Identifier,
        platform: &PlatformDescriptor,
        context: &ProbeContext,
    ) -> Result<ProbeOutcome> {
        let url = Self::search_url(platform, identifier)?;
        debug!("Searching {} at {}", platform.name, url);

        let page = context.fetcher()?.fetch(&url).await?;
        if !page.is_success() {
            return Ok(ProbeOutcome::failed(
                platform,
                format!("HTTP {}", page.status),
                context.started_at,
            ));
        }

        let matches = self.parse_page(&page, identifier)?;
        Ok(context.classify(platform, matches))
    }
}
