pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::{ExtractionConfig, ScraperConfig};
use crate::models::{CrawlParameters, HeroRecord, SearchMode};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use self::cleaner::card_to_record;
use self::http_client::FetchError;
use self::parsers::{parse_result_page, CardSelectors};

// ── Page fetcher ──────────────────────────────────────────────────────────────

/// Swappable page renderer: navigate to a URL, return the rendered HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn render(&self, url: &str) -> std::result::Result<String, FetchError>;
}

// ── Search URL ────────────────────────────────────────────────────────────────

/// Builds result-page URLs for the heroes search.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    base: Url,
    types: String,
}

impl SearchQuery {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid search base URL {:?}", config.base_url))?;
        Ok(Self {
            base,
            types: config.record_types.join(":"),
        })
    }

    /// URL for one result page (1-based). Terms are percent-encoded as-is.
    pub fn page_url(&self, mode: SearchMode, surname: &str, birthplace: &str, page: u32) -> String {
        let mut url = self.base.clone();
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("group", "all")
                .append_pair("types", &self.types)
                .append_pair("page", &page.to_string())
                .append_pair("grouppersons", "1");

            match mode {
                SearchMode::Surname => {
                    q.append_pair("last_name", surname);
                    if !birthplace.is_empty() {
                        q.append_pair("place_birth", birthplace);
                    }
                }
                SearchMode::Birthplace => {
                    q.append_pair("place_birth", birthplace);
                }
            }
        }
        url.into()
    }
}

// ── Extraction ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PageExtract {
    pub records: Vec<HeroRecord>,
    /// Containers found on the page, matched or not
    pub containers: usize,
}

impl PageExtract {
    pub fn matched(&self) -> usize {
        self.records.len()
    }
}

/// Turns rendered result pages into validated records.
pub struct PageExtractor {
    selectors: CardSelectors,
    rules: ExtractionConfig,
    site: Url,
}

impl PageExtractor {
    pub fn new(scraper: &ScraperConfig, rules: &ExtractionConfig) -> Result<Self> {
        let site = Url::parse(&scraper.site_url)
            .with_context(|| format!("Invalid site URL {:?}", scraper.site_url))?;
        Ok(Self {
            selectors: CardSelectors::compile(rules).context("Failed to compile card selectors")?,
            rules: rules.clone(),
            site,
        })
    }

    pub fn rules(&self) -> &ExtractionConfig {
        &self.rules
    }

    /// Records for one page, narrowed to the birthplace term when given.
    pub fn extract(&self, html: &str, params: &CrawlParameters) -> PageExtract {
        let cards = parse_result_page(html, &self.selectors);
        let containers = cards.len();
        let filter = params.birthplace_filter();

        let records: Vec<HeroRecord> = cards
            .iter()
            .filter_map(|card| card_to_record(card, &self.rules, &self.site, filter))
            .collect();

        debug!("{} containers, {} matched", containers, records.len());
        PageExtract { records, containers }
    }
}
