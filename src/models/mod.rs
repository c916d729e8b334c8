use serde::{Deserialize, Serialize};
use std::fmt;

// ── Search mode ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Search by surname; aggregates birthplace components
    #[default]
    Surname,
    /// Search by birthplace; aggregates surnames
    Birthplace,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Surname => f.write_str("surname"),
            SearchMode::Birthplace => f.write_str("birthplace"),
        }
    }
}

// ── Hero record ───────────────────────────────────────────────────────────────

/// One extracted person entry. `surname` is never empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HeroRecord {
    pub surname: String,
    pub given_name: String,
    pub patronymic: String,
    pub birth_year: String,      // 4 digits or empty
    pub birthplace: String,
    pub profile_url: String,     // absolute or empty
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BirthplaceComponents {
    pub region: Option<String>,
    pub district: Option<String>,
    pub settlement: Option<String>,
}

/// Raw fields read from one record container, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawHeroCard {
    pub name: Option<String>,
    pub href: Option<String>,
    pub year: Option<String>,
    pub birthplace: Option<String>,
    pub info: Option<String>,
}

// ── Crawl request ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlParameters {
    pub mode: SearchMode,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub birthplace: String,
    pub max_pages: u32,
}

impl CrawlParameters {
    /// Trims the search terms and checks that the request can start a session.
    pub fn validated(mut self) -> Result<Self, String> {
        self.surname = self.surname.trim().to_string();
        self.birthplace = self.birthplace.trim().to_string();

        if self.surname.is_empty() && self.birthplace.is_empty() {
            return Err("a surname or birthplace search term is required".into());
        }
        if self.max_pages == 0 {
            return Err("max_pages must be positive".into());
        }
        Ok(self)
    }

    /// Birthplace term used to narrow a surname search, if any.
    pub fn birthplace_filter(&self) -> Option<&str> {
        match self.mode {
            SearchMode::Surname if !self.birthplace.is_empty() => Some(&self.birthplace),
            _ => None,
        }
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlOutcome {
    /// Stop requested or the client went away
    Stopped,
    /// Page limit reached or too many consecutive empty pages
    Exhausted,
    /// Page fetch failed
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub outcome: CrawlOutcome,
    pub pages: u32,
    pub records: usize,
}

/// Ordered output of one crawl session. `End` is always the last event.
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlEvent {
    Record(HeroRecord),
    Page(u32),
    End(CrawlReport),
}

// ── Charts ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Regions,
    Districts,
    Settlements,
    Surnames,
}

impl std::str::FromStr for ChartKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "regions" => Ok(ChartKind::Regions),
            "districts" => Ok(ChartKind::Districts),
            "settlements" => Ok(ChartKind::Settlements),
            "surnames" => Ok(ChartKind::Surnames),
            other => Err(format!("unknown chart {:?}", other)),
        }
    }
}

impl ChartKind {
    /// Whether this chart is populated in the given search mode.
    pub fn belongs_to(self, mode: SearchMode) -> bool {
        match self {
            ChartKind::Surnames => mode == SearchMode::Birthplace,
            _ => mode == SearchMode::Surname,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartEntry {
    pub label: String,
    pub count: u64,
}
