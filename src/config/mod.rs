use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scraper: ScraperConfig,
    pub crawl: CrawlConfig,
    pub extraction: ExtractionConfig,
}

/// HTTP service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

/// Search site + page renderer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Origin used to absolutize site-relative profile links
    #[serde(default = "default_site_url")]
    pub site_url: String,

    #[serde(default = "default_record_types")]
    pub record_types: Vec<String>,

    #[serde(default = "default_browserless_url")]
    pub browserless_url: String,

    #[serde(default)]
    pub browserless_token: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long the renderer waits after navigation before returning the DOM
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

/// Crawl loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlConfig {
    #[serde(default = "default_max_pages")]
    pub default_max_pages: u32,

    /// Consecutive empty pages after which the crawl is considered exhausted
    #[serde(default = "default_empty_page_limit")]
    pub empty_page_limit: u32,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    #[serde(default = "default_chart_size")]
    pub chart_size: usize,

    /// Emit the rest of an already extracted page before honoring a stop request
    #[serde(default = "default_true")]
    pub finish_page_on_cancel: bool,
}

/// Selectors, keyword lists and noise patterns used on result pages.
///
/// The target site's markup changes over time; everything here can be
/// overridden from `config/local.toml` without touching the crawl loop.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_record_selector")]
    pub record_selector: String,
    #[serde(default = "default_name_selector")]
    pub name_selector: String,
    #[serde(default = "default_link_selector")]
    pub link_selector: String,
    #[serde(default = "default_year_selector")]
    pub year_selector: String,
    #[serde(default = "default_birthplace_selector")]
    pub birthplace_selector: String,
    #[serde(default = "default_info_selector")]
    pub info_selector: String,

    #[serde(default = "default_service_markers")]
    pub service_markers: Vec<String>,
    #[serde(default = "default_info_labels")]
    pub info_labels: Vec<String>,
    #[serde(default = "default_min_birthplace_len")]
    pub min_birthplace_len: usize,

    #[serde(default = "default_rank_prefixes")]
    pub rank_prefixes: Vec<String>,
    #[serde(default = "default_document_suffixes")]
    pub document_suffixes: Vec<String>,
    #[serde(default = "default_garbage_phrases")]
    pub garbage_phrases: Vec<String>,

    #[serde(default = "default_region_keywords")]
    pub region_keywords: Vec<String>,
    #[serde(default = "default_district_keywords")]
    pub district_keywords: Vec<String>,
    #[serde(default = "default_settlement_keywords")]
    pub settlement_keywords: Vec<String>,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_bind_addr() -> String {
    "0.0.0.0:10000".to_string()
}
fn default_base_url() -> String {
    "https://pamyat-naroda.ru/heroes/".to_string()
}
fn default_site_url() -> String {
    "https://pamyat-naroda.ru".to_string()
}
fn default_record_types() -> Vec<String> {
    strings(&[
        "pamyat_commander",
        "nagrady_nagrad_doc",
        "nagrady_uchet_kartoteka",
        "nagrady_ubilein_kartoteka",
        "pdv_kart_in",
        "pdv_kart_in_inostranec",
        "pamyat_voenkomat",
        "potery_vpp",
        "pamyat_zsp_parts",
        "kld_ran",
        "kld_bolezn",
        "kld_card",
        "kld_upk",
        "kld_vmf",
        "kld_partizan",
        "potery_doneseniya_o_poteryah",
        "potery_gospitali",
        "potery_utochenie_poter",
        "potery_spiski_zahoroneniy",
        "potery_voennoplen",
        "potery_iskluchenie_iz_spiskov",
        "potery_kartoteki",
        "potery_rvk_extra",
        "potery_isp_extra",
        "same_doroga",
        "same_rvk",
        "same_guk",
        "potery_knigi_pamyati",
    ])
}
fn default_browserless_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_settle_delay_ms() -> u64 {
    1000
}
fn default_max_retries() -> usize {
    2
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_max_pages() -> u32 {
    50
}
fn default_empty_page_limit() -> u32 {
    20
}
fn default_event_buffer() -> usize {
    64
}
fn default_chart_size() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_record_selector() -> String {
    ".card-person".to_string()
}
fn default_name_selector() -> String {
    ".card-person-title__name".to_string()
}
fn default_link_selector() -> String {
    ".card-person-title__name a".to_string()
}
fn default_year_selector() -> String {
    ".card-person-info__item--year .card-person-info__value".to_string()
}
fn default_birthplace_selector() -> String {
    ".card-person-info__item--birthPlace .card-person-info__value".to_string()
}
fn default_info_selector() -> String {
    ".card-person-info".to_string()
}
fn default_service_markers() -> Vec<String> {
    strings(&["место службы", "место призыва", "воинская часть"])
}
fn default_info_labels() -> Vec<String> {
    strings(&["дата рождения", "год рождения", "место рождения"])
}
fn default_min_birthplace_len() -> usize {
    3
}
fn default_rank_prefixes() -> Vec<String> {
    strings(&[
        "рядовой",
        "красноармеец",
        "ефрейтор",
        "мл. сержант",
        "младший сержант",
        "ст. сержант",
        "старший сержант",
        "сержант",
        "старшина",
        "мл. лейтенант",
        "лейтенант",
        "ст. лейтенант",
        "капитан",
        "майор",
        "подполковник",
        "полковник",
        "краснофлотец",
        "матрос",
    ])
}
fn default_document_suffixes() -> Vec<String> {
    strings(&[
        ". список",
        ". призыв",
        ". выбытие",
        ". учетная карточка",
        ". учётная карточка",
        ". наградной лист",
        ". картотека",
    ])
}
fn default_garbage_phrases() -> Vec<String> {
    strings(&[
        "донесение о потерях",
        "книга памяти",
        "данные об утрате документов",
        "донесение о безвозвратных потерях",
        "данные обд",
        "данные картотеки",
        "юбилейная картотека",
        "донесения о потерях",
        "картотека потерь",
        "печатная книга памяти",
        "уточнение потерь",
        "картотека захоронений",
    ])
}
fn default_region_keywords() -> Vec<String> {
    strings(&[
        "обл.",
        "область",
        "край",
        "асср",
        "респ.",
        "республика",
        "автономный округ",
        "губ.",
        "губерния",
    ])
}
fn default_district_keywords() -> Vec<String> {
    strings(&["р-н", "район", "г. ", "город ", "уезд"])
}
fn default_settlement_keywords() -> Vec<String> {
    strings(&[
        "с. ",
        "д. ",
        "п. ",
        "пос. ",
        "дер. ",
        "х. ",
        "ст. ",
        "рп ",
        "пгт ",
        "село ",
        "деревня ",
        "поселок ",
        "посёлок ",
        "хутор ",
        "станица ",
    ])
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            site_url: default_site_url(),
            record_types: default_record_types(),
            browserless_url: default_browserless_url(),
            browserless_token: None,
            timeout_secs: default_timeout_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            default_max_pages: default_max_pages(),
            empty_page_limit: default_empty_page_limit(),
            event_buffer: default_event_buffer(),
            chart_size: default_chart_size(),
            finish_page_on_cancel: true,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            record_selector: default_record_selector(),
            name_selector: default_name_selector(),
            link_selector: default_link_selector(),
            year_selector: default_year_selector(),
            birthplace_selector: default_birthplace_selector(),
            info_selector: default_info_selector(),
            service_markers: default_service_markers(),
            info_labels: default_info_labels(),
            min_birthplace_len: default_min_birthplace_len(),
            rank_prefixes: default_rank_prefixes(),
            document_suffixes: default_document_suffixes(),
            garbage_phrases: default_garbage_phrases(),
            region_keywords: default_region_keywords(),
            district_keywords: default_district_keywords(),
            settlement_keywords: default_settlement_keywords(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("HEROES").separator("__"))
            .build()
            .context("Failed to read configuration sources")?;

        cfg.try_deserialize()
            .context("Invalid configuration")
    }
}
