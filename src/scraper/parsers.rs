use crate::config::ExtractionConfig;
use crate::models::RawHeroCard;
use anyhow::Result;
use scraper::{ElementRef, Html, Selector};

// ── Selectors ─────────────────────────────────────────────────────────────────

/// Compiled selectors for one result-page layout.
pub struct CardSelectors {
    record: Selector,
    name: Selector,
    link: Selector,
    year: Selector,
    birthplace: Selector,
    info: Selector,
}

impl CardSelectors {
    pub fn compile(cfg: &ExtractionConfig) -> Result<Self> {
        Ok(Self {
            record: selector(&cfg.record_selector)?,
            name: selector(&cfg.name_selector)?,
            link: selector(&cfg.link_selector)?,
            year: selector(&cfg.year_selector)?,
            birthplace: selector(&cfg.birthplace_selector)?,
            info: selector(&cfg.info_selector)?,
        })
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("selector {:?}: {:?}", css, e))
}

// ── Result page ───────────────────────────────────────────────────────────────

/// One raw row per record container, in document order.
/// An empty vec means the page had no containers at all.
pub fn parse_result_page(html: &str, sel: &CardSelectors) -> Vec<RawHeroCard> {
    let doc = Html::parse_document(html);

    doc.select(&sel.record)
        .map(|card| RawHeroCard {
            name: first_text(card, &sel.name),
            href: card
                .select(&sel.link)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty()),
            year: first_text(card, &sel.year),
            birthplace: first_text(card, &sel.birthplace),
            info: first_text(card, &sel.info),
        })
        .collect()
}

/// Whitespace-normalised text of the first match, if it has any.
fn first_text(el: ElementRef<'_>, sel: &Selector) -> Option<String> {
    let node = el.select(sel).next()?;
    let text = node.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ");
    if text.is_empty() { None } else { Some(text) }
}
