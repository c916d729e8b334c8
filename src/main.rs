mod aggregate;
mod config;
mod models;
mod pipeline;
mod scraper;
mod server;
mod session;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::models::{ChartKind, CrawlEvent, CrawlParameters, SearchMode};
use crate::pipeline::Crawler;
use crate::scraper::http_client::BrowserlessFetcher;
use crate::scraper::SearchQuery;

#[derive(Parser)]
#[command(name = "heroes-crawler", about = "War memorial records crawler", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(clap::Args)]
struct SearchArgs {
    #[arg(short, long, value_enum, default_value = "surname")]
    mode: Mode,

    #[arg(short, long, default_value = "")]
    surname: String,

    #[arg(short, long, default_value = "")]
    birthplace: String,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Mode {
    Surname,
    Birthplace,
}

impl From<Mode> for SearchMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Surname => SearchMode::Surname,
            Mode::Birthplace => SearchMode::Birthplace,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (SSE stream, stop, charts)
    Serve,

    /// Run one crawl in the terminal, printing records as JSON lines
    Crawl {
        #[command(flatten)]
        search: SearchArgs,

        /// Pages to visit at most (default from config)
        #[arg(short = 'p', long)]
        max_pages: Option<u32>,
    },

    /// Print the search URL for one result page
    Url {
        #[command(flatten)]
        search: SearchArgs,

        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "heroes_crawler=info,warn",
        1 => "heroes_crawler=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Serve => {
            let crawler = build_crawler(&config)?;
            server::serve(&config.server, Arc::new(crawler)).await?;
        }

        Command::Crawl { search, max_pages } => {
            let crawler = build_crawler(&config)?;
            let mode = SearchMode::from(search.mode);
            let params = CrawlParameters {
                mode,
                surname: search.surname,
                birthplace: search.birthplace,
                max_pages: max_pages.unwrap_or(config.crawl.default_max_pages),
            };

            let mut rx = crawler.start(params)?;
            let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
            let mut interrupted = false;

            loop {
                let event = tokio::select! {
                    event = rx.recv() => event,
                    _ = &mut ctrl_c, if !interrupted => {
                        warn!("Interrupted, stopping after the current page");
                        crawler.request_stop();
                        interrupted = true;
                        continue;
                    }
                };

                match event {
                    Some(CrawlEvent::Record(record)) => {
                        println!("{}", serde_json::to_string(&record)?);
                    }
                    Some(CrawlEvent::Page(page)) => info!("Page {} done", page),
                    Some(CrawlEvent::End(report)) => {
                        info!(
                            "Done: {:?} | {} pages | {} records",
                            report.outcome, report.pages, report.records
                        );
                        break;
                    }
                    None => break,
                }
            }

            print_charts(&crawler, mode);
        }

        Command::Url { search, page } => {
            let query = SearchQuery::new(&config.scraper)?;
            println!(
                "{}",
                query.page_url(search.mode.into(), &search.surname, &search.birthplace, page)
            );
        }
    }

    Ok(())
}

fn build_crawler(config: &AppConfig) -> Result<Crawler> {
    let fetcher = BrowserlessFetcher::new(&config.scraper).context("Failed to build page fetcher")?;
    Crawler::new(config, Arc::new(fetcher))
}

fn print_charts(crawler: &Crawler, mode: SearchMode) {
    let kinds: &[ChartKind] = match mode {
        SearchMode::Surname => &[ChartKind::Regions, ChartKind::Districts, ChartKind::Settlements],
        SearchMode::Birthplace => &[ChartKind::Surnames],
    };

    for &kind in kinds {
        let entries = crawler.chart(mode, kind);
        if entries.is_empty() {
            continue;
        }
        let max = entries[0].count;
        println!("─────────────────────────────────");
        println!("  Top {:?}", kind);
        println!("─────────────────────────────────");
        for e in &entries {
            println!("  {:>5}  {:<20} {}", e.count, utils::bar(e.count, max, 20), e.label);
        }
    }
}
