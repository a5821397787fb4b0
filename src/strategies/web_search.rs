//! Site-restricted web search through DuckDuckGo's HTML front end.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::{collapse_whitespace, mentions};
use crate::probe::{ProbeContext, ProbeStrategy};
use crate::{Identifier, Match, PlatformDescriptor, ProbeOutcome, ReconError, Result};

const STRATEGY_NAME: &str = "web_search";
const DEFAULT_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const MAX_MATCHES: usize = 5;
const SNIPPET_LIMIT: usize = 200;

/// Confidence for a result whose visible text mentions the identifier.
const MENTION_CONFIDENCE: f64 = 0.8;
/// Confidence for a site-restricted result that does not show the
/// identifier in its snippet.
const LISTED_CONFIDENCE: f64 = 0.4;
/// Ceiling for platforms whose content sits behind a login.
const GATED_CEILING: f64 = 0.5;

/// Selectors for the result page layout.
struct ResultSelectors {
    result: Selector,
    title: Selector,
    snippet: Selector,
}

impl ResultSelectors {
    fn new() -> Result<Self> {
        let parse = |css: &str| {
            Selector::parse(css)
                .map_err(|e| ReconError::Parse(format!("bad selector {}: {:?}", css, e)))
        };
        Ok(Self {
            result: parse(".result")?,
            title: parse(".result__title a")?,
            snippet: parse(".result__snippet")?,
        })
    }
}

/// One parsed search result.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SearchHit {
    title: String,
    url: String,
    snippet: String,
}

impl SearchHit {
    /// Reads a hit from one result block. Blocks without a linked title
    /// yield nothing.
    fn from_element(element: ElementRef<'_>, selectors: &ResultSelectors) -> Option<Self> {
        let link = element.select(&selectors.title).next()?;
        let title = collapse_whitespace(&link.text().collect::<String>());
        let url = resolve_result_link(link.value().attr("href")?)?;
        if title.is_empty() {
            return None;
        }

        let snippet = element
            .select(&selectors.snippet)
            .next()
            .map(|e| collapse_whitespace(&e.text().collect::<String>()))
            .unwrap_or_default();

        Some(Self {
            title,
            url,
            snippet,
        })
    }
}

/// Searches the web for `site:<platform> "<identifier>"`.
///
/// Results on platforms that require authentication are indirect evidence
/// and never score above the gated ceiling.
#[derive(Debug, Clone)]
pub struct WebSearchStrategy {
    endpoint: String,
}

impl WebSearchStrategy {
    /// Creates the strategy against the default search front end.
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Uses a different front end with the same HTML layout.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Builds the query string for `platform`.
    pub fn query(platform: &PlatformDescriptor, identifier: &Identifier) -> String {
        format!("site:{} \"{}\"", platform.site_host(), identifier)
    }

    fn search_url(&self, platform: &PlatformDescriptor, identifier: &Identifier) -> String {
        format!(
            "{}?q={}",
            self.endpoint,
            urlencoding::encode(&Self::query(platform, identifier))
        )
    }

    fn parse_results(&self, html: &str) -> Result<Vec<SearchHit>> {
        let selectors = ResultSelectors::new()?;
        let document = Html::parse_document(html);
        Ok(document
            .select(&selectors.result)
            .filter_map(|element| SearchHit::from_element(element, &selectors))
            .collect())
    }

    fn to_matches(
        &self,
        hits: Vec<SearchHit>,
        platform: &PlatformDescriptor,
        identifier: &Identifier,
    ) -> Vec<Match> {
        let ceiling = if platform.requires_authentication {
            GATED_CEILING
        } else {
            1.0
        };

        let mut matches: Vec<Match> = hits
            .into_iter()
            .map(|hit| {
                let visible = format!("{} {} {}", hit.title, hit.url, hit.snippet);
                let confidence = if mentions(&visible, identifier.as_str()) {
                    MENTION_CONFIDENCE
                } else {
                    LISTED_CONFIDENCE
                };
                Match::new(
                    hit.title,
                    hit.url,
                    truncate(&hit.snippet, SNIPPET_LIMIT),
                    confidence,
                    STRATEGY_NAME,
                )
                .capped(ceiling)
            })
            .collect();

        matches.sort_by(|a, b| {
            b.confidence_score
                .partial_cmp(&a.confidence_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(MAX_MATCHES);
        matches
    }
}

impl Default for WebSearchStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeStrategy for WebSearchStrategy {
    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    async fn probe(
        &self,
        identifier: &Identifier,
        platform: &PlatformDescriptor,
        context: &ProbeContext,
    ) -> Result<ProbeOutcome> {
        let url = self.search_url(platform, identifier);
        debug!("Web search for {} at {}", platform.name, url);

        let page = context.fetcher()?.fetch(&url).await?;
        if is_block_page(&page.body) {
            return Ok(ProbeOutcome::failed(
                platform,
                "search front end returned a bot-check page",
                context.started_at,
            ));
        }
        if !page.is_success() {
            return Ok(ProbeOutcome::failed(
                platform,
                format!("HTTP {}", page.status),
                context.started_at,
            ));
        }

        let hits = self.parse_results(&page.body)?;
        let matches = self.to_matches(hits, platform, identifier);
        Ok(context.classify(platform, matches))
    }
}

fn is_block_page(html: &str) -> bool {
    html.contains("anomaly-modal") || html.contains("/sorry/index") || html.contains("recaptcha")
}

/// Turns a result href into the target address, unwrapping the search
/// front end's `/l/?uddg=` click-through links.
fn resolve_result_link(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };

    let parsed = Url::parse(&absolute).ok()?;
    if parsed.path() == "/l/" {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, target)| target.into_owned())
    } else {
        Some(parsed.to_string())
    }
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmailValidator;

    fn identifier() -> Identifier {
        Identifier::parse("user@example.com", &EmailValidator).unwrap()
    }

    const RESULTS_HTML: &str = r#"
        <html><body>
            <div class="result">
                <h2 class="result__title">
                    <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fgroups.google.com%2Fg%2Fabc&rut=1">Thread about widgets</a>
                </h2>
                <a class="result__snippet">Contact user@example.com for the widget.</a>
            </div>
            <div class="result">
                <h2 class="result__title">
                    <a class="result__a" href="https://groups.google.com/g/other">Another thread</a>
                </h2>
                <a class="result__snippet">Nothing relevant shown here.</a>
            </div>
            <div class="result">
                <a class="result__snippet">A result without a title is skipped.</a>
            </div>
        </body></html>
    "#;

    #[test]
    fn test_web_search_new() {
        let strategy = WebSearchStrategy::new();
        assert_eq!(strategy.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(strategy.name(), "web_search");
        let platform = PlatformDescriptor::new("FB", "facebook.com", "m").requiring_authentication();
        assert!(strategy.applies_to(&platform));
    }

    #[test]
    fn test_query_and_url() {
        let platform = PlatformDescriptor::new("Groups", "https://groups.google.com/", "google");
        assert_eq!(
            WebSearchStrategy::query(&platform, &identifier()),
            "site:groups.google.com \"user@example.com\""
        );
        let url = WebSearchStrategy::new()
            .with_endpoint("http://localhost/html/")
            .search_url(&platform, &identifier());
        assert_eq!(
            url,
            "http://localhost/html/?q=site%3Agroups.google.com%20%22user%40example.com%22"
        );
    }

    #[test]
    fn test_parse_results() {
        let hits = WebSearchStrategy::new().parse_results(RESULTS_HTML).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://groups.google.com/g/abc");
        assert_eq!(hits[0].title, "Thread about widgets");
        assert_eq!(hits[0].snippet, "Contact user@example.com for the widget.");
        assert_eq!(hits[1].url, "https://groups.google.com/g/other");
    }

    #[test]
    fn test_parse_results_empty_html() {
        let hits = WebSearchStrategy::new()
            .parse_results("<html><body></body></html>")
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_to_matches_public_platform() {
        let strategy = WebSearchStrategy::new();
        let platform = PlatformDescriptor::new("Groups", "groups.google.com", "google");
        let hits = strategy.parse_results(RESULTS_HTML).unwrap();
        let matches = strategy.to_matches(hits, &platform, &identifier());
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].confidence_score, MENTION_CONFIDENCE);
        assert_eq!(matches[1].confidence_score, LISTED_CONFIDENCE);
        assert!(matches.iter().all(|m| m.source_strategy == "web_search"));
    }

    #[test]
    fn test_to_matches_gated_platform_is_capped() {
        let strategy = WebSearchStrategy::new();
        let platform = PlatformDescriptor::new("Docs", "docs.google.com", "google").requiring_authentication();
        let hits = strategy.parse_results(RESULTS_HTML).unwrap();
        let matches = strategy.to_matches(hits, &platform, &identifier());
        assert!(matches.iter().all(|m| m.confidence_score <= GATED_CEILING));
    }

    #[test]
    fn test_to_matches_limit() {
        let strategy = WebSearchStrategy::new();
        let platform = PlatformDescriptor::new("Groups", "groups.google.com", "google");
        let hits = (0..8)
            .map(|i| SearchHit {
                title: format!("t{}", i),
                url: format!("https://groups.google.com/{}", i),
                snippet: String::new(),
            })
            .collect();
        assert_eq!(strategy.to_matches(hits, &platform, &identifier()).len(), 5);
    }

    #[test]
    fn test_is_block_page() {
        assert!(is_block_page("<div class=\"anomaly-modal\"></div>"));
        assert!(is_block_page("<script src=\"recaptcha\"></script>"));
        assert!(!is_block_page("<div class=\"result\"></div>"));
    }

    #[test]
    fn test_resolve_result_link() {
        assert_eq!(
            resolve_result_link("//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpage&rut=abc"),
            Some("https://example.com/page".to_string())
        );
        assert_eq!(
            resolve_result_link("https://example.com/thread?id=7"),
            Some("https://example.com/thread?id=7".to_string())
        );
        assert_eq!(resolve_result_link("//duckduckgo.com/l/?rut=abc"), None);
        assert_eq!(resolve_result_link(""), None);
        assert_eq!(resolve_result_link("not a url"), None);
    }

    #[test]
    fn test_hit_without_link_is_skipped() {
        let html = r#"
            <div class="result">
                <h2 class="result__title"><a>No target</a></h2>
            </div>
            <div class="result">
                <h2 class="result__title"><a href="https://forum.example/t/1">  Kept
                    title </a></h2>
            </div>
        "#;
        let hits = WebSearchStrategy::new().parse_results(html).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Kept title");
        assert!(hits[0].snippet.is_empty());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }
}
