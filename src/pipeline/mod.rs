//! Crawl orchestrator: ties search URL → renderer → extractor → aggregator →
//! event channel together.
//!
//! ## Session lifecycle
//!
//! `Crawler::start()` validates the request, takes the session guard, clears
//! the charts and spawns `Pipeline::run()` on its own task. The caller gets the
//! receiving end of an ordered event channel:
//!   1. `Record` for every matched record, in page order
//!   2. `Page(n)` once page `n` is fully processed (empty pages included)
//!   3. `End(report)` exactly once, after the guard is released
//!
//! Stop requests are polled before every page; with `finish_page_on_cancel`
//! disabled they are also polled before every record.

use crate::aggregate::{Aggregator, SharedAggregator};
use crate::config::{AppConfig, CrawlConfig};
use crate::models::{
    ChartEntry, ChartKind, CrawlEvent, CrawlOutcome, CrawlParameters, CrawlReport, SearchMode,
};
use crate::scraper::http_client::FetchError;
use crate::scraper::{PageExtractor, PageFetcher, SearchQuery};
use crate::session::{SessionGuard, SessionPermit, SessionStatus};
use crate::utils::Timer;
use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("A crawl session is already active")]
    SessionConflict,
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Failed to fetch page {page}")]
    Fetch {
        page: u32,
        records: usize,
        #[source]
        source: FetchError,
    },
}

impl CrawlError {
    pub fn report(&self) -> CrawlReport {
        match self {
            CrawlError::Fetch { page, records, .. } => CrawlReport {
                outcome: CrawlOutcome::Errored,
                pages: page - 1,
                records: *records,
            },
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    config: CrawlConfig,
    query: SearchQuery,
    extractor: PageExtractor,
    fetcher: Arc<dyn PageFetcher>,
    aggregator: SharedAggregator,
}

impl Pipeline {
    pub fn new(config: &AppConfig, fetcher: Arc<dyn PageFetcher>) -> Result<Self> {
        Ok(Self {
            config: config.crawl.clone(),
            query: SearchQuery::new(&config.scraper)?,
            extractor: PageExtractor::new(&config.scraper, &config.extraction)?,
            fetcher,
            aggregator: Aggregator::shared(),
        })
    }

    /// Drive one session until it is stopped, exhausted or a fetch fails.
    pub async fn run(
        &self,
        params: &CrawlParameters,
        permit: &SessionPermit,
        tx: &mpsc::Sender<CrawlEvent>,
    ) -> Result<CrawlReport, CrawlError> {
        let mut records = 0usize;
        let mut empty_streak = 0u32;

        let report = |outcome, pages, records| CrawlReport { outcome, pages, records };

        for page in 1..=params.max_pages {
            if permit.is_cancelled() {
                info!("Stop requested before page {}", page);
                return Ok(report(CrawlOutcome::Stopped, page - 1, records));
            }

            let url = self.query.page_url(params.mode, &params.surname, &params.birthplace, page);
            info!("Fetching page {} ({})", page, url);

            let html = self
                .fetcher
                .render(&url)
                .await
                .map_err(|source| CrawlError::Fetch { page, records, source })?;

            let extract = self.extractor.extract(&html, params);
            let matched = extract.matched();
            info!("  Page {}: {} matched of {} cards", page, matched, extract.containers);

            for record in extract.records {
                if !self.config.finish_page_on_cancel && permit.is_cancelled() {
                    info!("Stop requested on page {}", page);
                    return Ok(report(CrawlOutcome::Stopped, page, records));
                }

                // counted only once the record has been handed to the client
                if tx.send(CrawlEvent::Record(record.clone())).await.is_err() {
                    warn!("Event receiver dropped, stopping");
                    return Ok(report(CrawlOutcome::Stopped, page, records));
                }
                self.aggregator
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .update(&record, params.mode, self.extractor.rules());
                records += 1;
            }

            if tx.send(CrawlEvent::Page(page)).await.is_err() {
                warn!("Event receiver dropped, stopping");
                return Ok(report(CrawlOutcome::Stopped, page, records));
            }

            if matched == 0 {
                empty_streak += 1;
                if empty_streak >= self.config.empty_page_limit {
                    info!("{} empty pages in a row, stopping", empty_streak);
                    return Ok(report(CrawlOutcome::Exhausted, page, records));
                }
            } else {
                empty_streak = 0;
            }
        }

        Ok(report(CrawlOutcome::Exhausted, params.max_pages, records))
    }
}

// ── Crawler ───────────────────────────────────────────────────────────────────

/// Service handle shared by the HTTP layer and the CLI.
pub struct Crawler {
    pipeline: Arc<Pipeline>,
    guard: Arc<SessionGuard>,
    config: CrawlConfig,
}

impl Crawler {
    pub fn new(config: &AppConfig, fetcher: Arc<dyn PageFetcher>) -> Result<Self> {
        Ok(Self {
            pipeline: Arc::new(Pipeline::new(config, fetcher)?),
            guard: SessionGuard::new(),
            config: config.crawl.clone(),
        })
    }

    pub fn default_max_pages(&self) -> u32 {
        self.config.default_max_pages
    }

    /// Start a session. Must be called from within a tokio runtime.
    pub fn start(&self, params: CrawlParameters) -> Result<mpsc::Receiver<CrawlEvent>, StartError> {
        let params = params.validated().map_err(StartError::InvalidRequest)?;
        let permit = self.guard.try_acquire().ok_or(StartError::SessionConflict)?;

        self.pipeline
            .aggregator
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .reset();

        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let pipeline = Arc::clone(&self.pipeline);

        tokio::spawn(async move {
            let timer = Timer::start(format!(
                "{} search {:?}/{:?}, up to {} pages",
                params.mode, params.surname, params.birthplace, params.max_pages
            ));

            let report = match pipeline.run(&params, &permit, &tx).await {
                Ok(report) => report,
                Err(e) => {
                    let report = e.report();
                    error!("Crawl failed: {:#}", anyhow::Error::new(e));
                    report
                }
            };

            drop(permit);
            drop(timer);
            info!(
                "Session ended: {:?} after {} pages, {} records",
                report.outcome, report.pages, report.records
            );
            let _ = tx.send(CrawlEvent::End(report)).await;
        });

        Ok(rx)
    }

    pub fn request_stop(&self) {
        self.guard.request_cancel();
    }

    pub fn status(&self) -> SessionStatus {
        self.guard.status()
    }

    /// Top entries of one chart; empty when the chart does not belong to `mode`.
    pub fn chart(&self, mode: SearchMode, kind: ChartKind) -> Vec<ChartEntry> {
        if !kind.belongs_to(mode) {
            return Vec::new();
        }
        self.pipeline
            .aggregator
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .top_n(kind, self.config.chart_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    const EMPTY_PAGE: &str = "<html><body><p>Ничего не найдено</p></body></html>";

    /// Serves canned HTML per page number and counts renders.
    #[derive(Default)]
    struct ScriptedFetcher {
        pages: HashMap<u32, String>,
        fail_on: Option<u32>,
        calls: AtomicU32,
    }

    impl ScriptedFetcher {
        fn with_page(mut self, page: u32, cards: &[(&str, &str)]) -> Self {
            let body: String = cards
                .iter()
                .enumerate()
                .map(|(i, (name, place))| card(i, name, place))
                .collect();
            self.pages.insert(page, format!("<html><body>{}</body></html>", body));
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn card(i: usize, name: &str, place: &str) -> String {
        format!(
            r#"<div class="card-person">
                 <div class="card-person-title__name"><a href="/heroes/person-{i}/">{name}</a></div>
                 <div class="card-person-info__item--year"><span class="card-person-info__value">1920</span></div>
                 <div class="card-person-info__item--birthPlace"><span class="card-person-info__value">{place}</span></div>
               </div>"#
        )
    }

    fn page_of(url: &str) -> u32 {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "page")
            .and_then(|(_, v)| v.parse().ok())
            .unwrap()
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn render(&self, url: &str) -> std::result::Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let page = page_of(url);
            if self.fail_on == Some(page) {
                return Err(FetchError::Api {
                    status: 502,
                    message: "bad gateway".into(),
                });
            }
            Ok(self.pages.get(&page).cloned().unwrap_or_else(|| EMPTY_PAGE.to_string()))
        }
    }

    fn crawler(fetcher: &Arc<ScriptedFetcher>, event_buffer: usize) -> Crawler {
        let mut config = AppConfig::default();
        config.crawl.event_buffer = event_buffer;
        Crawler::new(&config, Arc::clone(fetcher) as Arc<dyn PageFetcher>).unwrap()
    }

    fn params(mode: SearchMode, surname: &str, birthplace: &str, max_pages: u32) -> CrawlParameters {
        CrawlParameters {
            mode,
            surname: surname.into(),
            birthplace: birthplace.into(),
            max_pages,
        }
    }

    async fn drain(rx: &mut mpsc::Receiver<CrawlEvent>) -> Vec<CrawlEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn end_report(events: &[CrawlEvent]) -> CrawlReport {
        match events.last() {
            Some(CrawlEvent::End(report)) => *report,
            other => panic!("last event is not End: {:?}", other),
        }
    }

    #[test]
    fn test_birthplace_crawl_exhausts_at_max_pages() {
        tokio_test::block_on(async {
            let fetcher = Arc::new(ScriptedFetcher::default().with_page(
                1,
                &[
                    ("Орлов Степан Ильич", "Московская обл., г. Клин"),
                    ("Котов Иван", "Московская обл., Клинский р-н, д. Борщево"),
                ],
            ));
            let crawler = crawler(&fetcher, 64);

            let mut rx = crawler
                .start(params(SearchMode::Birthplace, "", "Клин", 3))
                .unwrap();
            let events = drain(&mut rx).await;

            let records: Vec<_> = events
                .iter()
                .filter_map(|e| match e {
                    CrawlEvent::Record(r) => Some(r),
                    _ => None,
                })
                .collect();
            assert_eq!(records.len(), 2);
            assert!(records.iter().all(|r| !r.surname.is_empty()));

            let n = events.len();
            assert_eq!(events[n - 2], CrawlEvent::Page(3));
            assert_eq!(
                events.iter().filter(|e| matches!(e, CrawlEvent::End(_))).count(),
                1
            );
            assert_eq!(
                end_report(&events),
                CrawlReport { outcome: CrawlOutcome::Exhausted, pages: 3, records: 2 }
            );

            let surnames = crawler.chart(SearchMode::Birthplace, ChartKind::Surnames);
            assert_eq!(surnames.len(), 2);
            assert_eq!(surnames.iter().map(|e| e.count).sum::<u64>(), 2);
            assert!(crawler.chart(SearchMode::Birthplace, ChartKind::Regions).is_empty());

            assert_eq!(fetcher.calls(), 3);
            assert!(!crawler.status().active);
        });
    }

    #[test]
    fn test_records_precede_their_page_marker() {
        tokio_test::block_on(async {
            let fetcher = Arc::new(
                ScriptedFetcher::default()
                    .with_page(1, &[("Иванов Пётр", "Иркутская обл., Тулунский р-н, с. Едогон")])
                    .with_page(2, &[("Иванов Сергей", "Иркутская обл., г. Тулун")]),
            );
            let crawler = crawler(&fetcher, 64);

            let mut rx = crawler
                .start(params(SearchMode::Surname, "Иванов", "", 2))
                .unwrap();
            let events = drain(&mut rx).await;

            let kinds: Vec<&str> = events
                .iter()
                .map(|e| match e {
                    CrawlEvent::Record(_) => "record",
                    CrawlEvent::Page(_) => "page",
                    CrawlEvent::End(_) => "end",
                })
                .collect();
            assert_eq!(kinds, ["record", "page", "record", "page", "end"]);

            let regions = crawler.chart(SearchMode::Surname, ChartKind::Regions);
            assert_eq!(regions[0].label, "Иркутская обл.");
            assert_eq!(regions[0].count, 2);
            assert_eq!(crawler.chart(SearchMode::Surname, ChartKind::Districts).len(), 2);
            assert_eq!(crawler.chart(SearchMode::Surname, ChartKind::Settlements).len(), 1);
        });
    }

    #[test]
    fn test_stops_after_exactly_twenty_empty_pages() {
        tokio_test::block_on(async {
            let fetcher = Arc::new(ScriptedFetcher::default());
            let crawler = crawler(&fetcher, 64);

            let mut rx = crawler
                .start(params(SearchMode::Surname, "Иванов", "", 50))
                .unwrap();
            let events = drain(&mut rx).await;

            assert_eq!(fetcher.calls(), 20);
            assert_eq!(
                events.iter().filter(|e| matches!(e, CrawlEvent::Page(_))).count(),
                20
            );
            assert_eq!(end_report(&events).outcome, CrawlOutcome::Exhausted);
            assert_eq!(end_report(&events).pages, 20);
        });
    }

    #[test]
    fn test_empty_streak_resets_on_matched_page() {
        tokio_test::block_on(async {
            let fetcher = Arc::new(
                ScriptedFetcher::default().with_page(15, &[("Жуков Егор", "Тульская обл.")]),
            );
            let crawler = crawler(&fetcher, 64);

            let mut rx = crawler
                .start(params(SearchMode::Surname, "Жуков", "", 50))
                .unwrap();
            drain(&mut rx).await;

            // 14 empty, 1 matched, then 20 more empty
            assert_eq!(fetcher.calls(), 35);
        });
    }

    #[test]
    fn test_max_pages_below_empty_limit() {
        tokio_test::block_on(async {
            let fetcher = Arc::new(ScriptedFetcher::default());
            let crawler = crawler(&fetcher, 64);

            let mut rx = crawler
                .start(params(SearchMode::Surname, "Иванов", "", 5))
                .unwrap();
            let events = drain(&mut rx).await;

            assert_eq!(fetcher.calls(), 5);
            assert_eq!(end_report(&events).pages, 5);
        });
    }

    #[tokio::test]
    async fn test_stop_finishes_current_page_then_ends() {
        let fetcher = Arc::new(ScriptedFetcher::default().with_page(
            1,
            &[
                ("Иванов Пётр", "Тульская обл., г. Алексин"),
                ("Иванов Олег", "Тульская обл., Ефремовский р-н"),
            ],
        ));
        // A one-slot channel keeps the crawl at most one event ahead of us.
        let crawler = crawler(&fetcher, 1);

        let mut rx = crawler
            .start(params(SearchMode::Surname, "Иванов", "", 50))
            .unwrap();

        assert!(matches!(rx.recv().await, Some(CrawlEvent::Record(_))));
        crawler.request_stop();

        let rest = drain(&mut rx).await;
        assert!(matches!(rest[0], CrawlEvent::Record(_)));
        assert_eq!(rest[1], CrawlEvent::Page(1));
        assert_eq!(
            end_report(&rest),
            CrawlReport { outcome: CrawlOutcome::Stopped, pages: 1, records: 2 }
        );
        assert_eq!(rest.len(), 3);

        assert_eq!(fetcher.calls(), 1);
        assert!(!crawler.status().active);
    }

    #[tokio::test]
    async fn test_stop_mid_page_when_not_finishing_pages() {
        let fetcher = Arc::new(ScriptedFetcher::default().with_page(
            1,
            &[
                ("Иванов Пётр", "Тульская обл., г. Алексин"),
                ("Иванов Олег", "Тульская обл., Ефремовский р-н"),
                ("Иванов Глеб", "Тульская обл., г. Тула"),
            ],
        ));
        let mut config = AppConfig::default();
        config.crawl.event_buffer = 1;
        config.crawl.finish_page_on_cancel = false;
        let crawler = Crawler::new(&config, Arc::clone(&fetcher) as Arc<dyn PageFetcher>).unwrap();

        let mut rx = crawler
            .start(params(SearchMode::Surname, "Иванов", "", 50))
            .unwrap();

        assert!(matches!(rx.recv().await, Some(CrawlEvent::Record(_))));
        crawler.request_stop();

        let rest = drain(&mut rx).await;
        let report = end_report(&rest);
        assert_eq!(report.outcome, CrawlOutcome::Stopped);
        assert_eq!(report.records, 2);
        assert!(!rest.contains(&CrawlEvent::Page(1)));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_streamed_records() {
        let fetcher = Arc::new(ScriptedFetcher {
            fail_on: Some(2),
            ..ScriptedFetcher::default()
        }
        .with_page(1, &[("Лебедев Иван", "Смоленская обл., Вяземский р-н")]));
        let crawler = crawler(&fetcher, 64);

        let mut rx = crawler
            .start(params(SearchMode::Surname, "Лебедев", "", 10))
            .unwrap();
        let events = drain(&mut rx).await;

        assert!(matches!(events[0], CrawlEvent::Record(_)));
        assert_eq!(events[1], CrawlEvent::Page(1));
        assert_eq!(
            end_report(&events),
            CrawlReport { outcome: CrawlOutcome::Errored, pages: 1, records: 1 }
        );
        assert!(!crawler.status().active);
        assert_eq!(crawler.chart(SearchMode::Surname, ChartKind::Regions)[0].count, 1);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_without_side_effects() {
        let fetcher = Arc::new(ScriptedFetcher::default().with_page(
            1,
            &[
                ("Орлов Степан", "Московская обл., г. Клин"),
                ("Котов Иван", "Московская обл., г. Клин"),
            ],
        ));
        let crawler = crawler(&fetcher, 1);

        let mut rx = crawler
            .start(params(SearchMode::Birthplace, "", "Клин", 50))
            .unwrap();
        assert!(matches!(rx.recv().await, Some(CrawlEvent::Record(_))));

        let before = crawler.chart(SearchMode::Birthplace, ChartKind::Surnames);
        assert!(!before.is_empty());

        let second = crawler.start(params(SearchMode::Surname, "Иванов", "", 5));
        assert!(matches!(second, Err(StartError::SessionConflict)));
        assert_eq!(crawler.chart(SearchMode::Birthplace, ChartKind::Surnames), before);
        assert!(crawler.status().active);
        assert!(!crawler.status().cancel_requested);

        crawler.request_stop();
        drain(&mut rx).await;
        assert!(!crawler.status().active);
    }

    #[tokio::test]
    async fn test_invalid_request_does_not_take_the_session() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let crawler = crawler(&fetcher, 64);

        let result = crawler.start(params(SearchMode::Surname, " ", "", 5));
        assert!(matches!(result, Err(StartError::InvalidRequest(_))));
        assert!(!crawler.status().active);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_new_session_resets_charts() {
        let fetcher = Arc::new(
            ScriptedFetcher::default().with_page(1, &[("Орлов Степан", "Московская обл., г. Клин")]),
        );
        let crawler = crawler(&fetcher, 64);

        for _ in 0..2 {
            let mut rx = crawler
                .start(params(SearchMode::Birthplace, "", "Клин", 1))
                .unwrap();
            drain(&mut rx).await;
        }

        let surnames = crawler.chart(SearchMode::Birthplace, ChartKind::Surnames);
        assert_eq!(surnames, vec![ChartEntry { label: "Орлов".into(), count: 1 }]);
    }

    #[tokio::test]
    async fn test_dropped_receiver_ends_session() {
        let fetcher = Arc::new(ScriptedFetcher::default().with_page(
            1,
            &[
                ("Орлов Степан", "Московская обл., г. Клин"),
                ("Котов Иван", "Московская обл., г. Клин"),
            ],
        ));
        let crawler = crawler(&fetcher, 1);

        let rx = crawler
            .start(params(SearchMode::Birthplace, "", "Клин", 50))
            .unwrap();
        drop(rx);

        for _ in 0..100 {
            if !crawler.status().active {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(!crawler.status().active);
        assert!(fetcher.calls() <= 1);
    }

    #[tokio::test]
    async fn test_unsent_record_is_not_charted() {
        let fetcher = Arc::new(
            ScriptedFetcher::default().with_page(1, &[("Орлов Степан", "Московская обл., г. Клин")]),
        );
        let crawler = crawler(&fetcher, 1);

        let rx = crawler
            .start(params(SearchMode::Birthplace, "", "Клин", 1))
            .unwrap();
        drop(rx);

        for _ in 0..100 {
            if !crawler.status().active {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(!crawler.status().active);
        assert!(crawler.chart(SearchMode::Birthplace, ChartKind::Surnames).is_empty());
    }
}
