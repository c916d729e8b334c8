//! Running Top-N frequency tables for the charts.
//!
//! In surname mode every accepted record feeds the region / district /
//! settlement tables from its parsed birthplace; in birthplace mode it feeds
//! the surname table. Tables are cleared when a new session starts.

use crate::config::ExtractionConfig;
use crate::models::{ChartEntry, ChartKind, HeroRecord, SearchMode};
use crate::scraper::cleaner::parse_birthplace;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

// ── Counter ───────────────────────────────────────────────────────────────────

/// Label → count, remembering first-seen order to break ties.
#[derive(Debug, Default, Clone)]
pub struct TopNCounter {
    index: HashMap<String, usize>,
    entries: Vec<(String, u64)>,
}

impl TopNCounter {
    pub fn increment(&mut self, label: &str) {
        match self.index.get(label) {
            Some(&i) => self.entries[i].1 += 1,
            None => {
                self.index.insert(label.to_string(), self.entries.len());
                self.entries.push((label.to_string(), 1));
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, label: &str) -> u64 {
        self.index.get(label).map(|&i| self.entries[i].1).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
    }

    /// Highest counts first; equal counts keep first-seen order.
    pub fn top(&self, n: usize) -> Vec<ChartEntry> {
        let mut sorted: Vec<&(String, u64)> = self.entries.iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        sorted
            .into_iter()
            .take(n)
            .map(|(label, count)| ChartEntry {
                label: label.clone(),
                count: *count,
            })
            .collect()
    }
}

// ── Aggregator ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Aggregator {
    regions: TopNCounter,
    districts: TopNCounter,
    settlements: TopNCounter,
    surnames: TopNCounter,
}

pub type SharedAggregator = Arc<RwLock<Aggregator>>;

impl Aggregator {
    pub fn shared() -> SharedAggregator {
        Arc::new(RwLock::new(Aggregator::default()))
    }

    pub fn reset(&mut self) {
        self.regions.clear();
        self.districts.clear();
        self.settlements.clear();
        self.surnames.clear();
    }

    pub fn update(&mut self, record: &HeroRecord, mode: SearchMode, rules: &ExtractionConfig) {
        match mode {
            SearchMode::Surname => {
                let parts = parse_birthplace(&record.birthplace, rules);
                if let Some(region) = parts.region.filter(|s| !s.is_empty()) {
                    self.regions.increment(&region);
                }
                if let Some(district) = parts.district.filter(|s| !s.is_empty()) {
                    self.districts.increment(&district);
                }
                if let Some(settlement) = parts.settlement.filter(|s| !s.is_empty()) {
                    self.settlements.increment(&settlement);
                }
            }
            SearchMode::Birthplace => {
                if !record.surname.is_empty() {
                    self.surnames.increment(&record.surname);
                }
            }
        }
    }

    pub fn counter(&self, kind: ChartKind) -> &TopNCounter {
        match kind {
            ChartKind::Regions => &self.regions,
            ChartKind::Districts => &self.districts,
            ChartKind::Settlements => &self.settlements,
            ChartKind::Surnames => &self.surnames,
        }
    }

    pub fn top_n(&self, kind: ChartKind, n: usize) -> Vec<ChartEntry> {
        self.counter(kind).top(n)
    }
}
