//! Per-institution discovery state
//!
//! `DiscoveryState` is the single mutable record of crawl progress for one
//! institution. It is created on the first crawl, mutated at the end of every
//! cycle, and never deleted — only compacted. Invariants maintained here:
//!
//! - `unscraped_urls ⊆ known_urls`
//! - a URL never appears in both `unscraped_urls` and `seen`; it enters
//!   `seen` only once it has been dequeued and resolved (scraped, excluded,
//!   or recognized as a duplicate)

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Record of one link-discovery pass over a section of an institution's site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploredSection {
    /// The section URL the pass started from
    pub url: String,

    /// Exploration depth of this pass
    pub depth: u32,

    /// When the pass ran
    pub last_explored: DateTime<Utc>,

    /// Every URL the pass discovered (queued or not)
    pub discovered_urls: Vec<String>,
}

/// Durable crawl progress for one institution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryState {
    /// Every URL currently considered part of the crawl frontier history
    pub known_urls: HashSet<String>,

    /// Ordered queue of URLs awaiting a fetch attempt
    pub unscraped_urls: VecDeque<String>,

    /// Link-discovery passes, used to skip re-exploration in incremental mode
    pub explored_sections: Vec<ExploredSection>,

    /// Every URL ever resolved (scraped, excluded, or deduplicated)
    pub seen: HashSet<String>,

    /// Exploration depth recorded when each URL was queued; entries persist
    /// across defers so a requeued URL keeps its depth. Files written before
    /// depths were tracked lack this map, and such URLs default to depth 1.
    #[serde(default)]
    pub url_depths: HashMap<String, u32>,

    /// When the last cycle against this institution finished
    pub last_cycle: Option<DateTime<Utc>>,
}

impl DiscoveryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges newly discovered URLs into the frontier
    ///
    /// URLs already known or already resolved are skipped, so calling this
    /// twice with the same inputs leaves `known_urls` and `unscraped_urls`
    /// unchanged. Queued URLs are recorded one hop deeper than the section
    /// they were found on. The discovery pass itself is recorded in
    /// `explored_sections`: an existing entry for the same section URL is
    /// updated in place, otherwise a new entry is appended.
    ///
    /// # Arguments
    ///
    /// * `new_urls` - URLs to queue for fetching
    /// * `section_url` - The section URL the discovery pass started from
    /// * `depth` - Depth of the section the pass ran over
    /// * `discovered` - Every URL the pass found, queued or not
    /// * `now` - Timestamp recorded on the section entry
    pub fn advance(
        &mut self,
        new_urls: &[String],
        section_url: &str,
        depth: u32,
        discovered: Vec<String>,
        now: DateTime<Utc>,
    ) {
        for url in new_urls {
            if self.seen.contains(url) || self.known_urls.contains(url) {
                continue;
            }
            self.known_urls.insert(url.clone());
            self.url_depths.insert(url.clone(), depth + 1);
            self.unscraped_urls.push_back(url.clone());
        }

        match self
            .explored_sections
            .iter_mut()
            .find(|s| s.url == section_url)
        {
            Some(section) => {
                section.last_explored = now;
                section.depth = section.depth.max(depth);
                section.discovered_urls = discovered;
            }
            None => self.explored_sections.push(ExploredSection {
                url: section_url.to_string(),
                depth,
                last_explored: now,
                discovered_urls: discovered,
            }),
        }
    }

    /// Returns true if the section was explored within the freshness window
    ///
    /// Incremental discovery skips fresh sections entirely; deep discovery
    /// ignores this check.
    pub fn is_section_fresh(&self, section_url: &str, window_days: i64, now: DateTime<Utc>) -> bool {
        self.explored_sections
            .iter()
            .find(|s| s.url == section_url)
            .map(|s| now - s.last_explored < Duration::days(window_days))
            .unwrap_or(false)
    }

    /// Dequeues up to `n` URLs for fetching, each with its recorded depth
    ///
    /// Dequeued URLs stay in `known_urls` and are not yet `seen`; the caller
    /// must account for each one via [`resolve`](Self::resolve) or
    /// [`defer`](Self::defer) once its fetch settles.
    pub fn dequeue_batch(&mut self, n: usize) -> Vec<(String, u32)> {
        let take = n.min(self.unscraped_urls.len());
        self.unscraped_urls
            .drain(..take)
            .map(|url| {
                let depth = self.url_depths.get(&url).copied().unwrap_or(1);
                (url, depth)
            })
            .collect()
    }

    /// Marks a dequeued URL as resolved (scraped, excluded, or duplicate)
    pub fn resolve(&mut self, url: &str) {
        self.seen.insert(url.to_string());
    }

    /// Returns a dequeued URL to the frontier for the next cycle
    ///
    /// Used for transient fetch failures: the URL is requeued, never dropped.
    pub fn defer(&mut self, url: &str) {
        if !self.unscraped_urls.iter().any(|u| u == url) {
            self.unscraped_urls.push_back(url.to_string());
        }
        self.known_urls.insert(url.to_string());
    }

    /// Re-inserts a previously resolved URL into the frontier
    ///
    /// Used by the exclusion rechecker when a false positive is reversed.
    /// Idempotent: a URL already queued is not queued twice.
    pub fn reinstate(&mut self, url: &str) {
        self.seen.remove(url);
        self.known_urls.insert(url.to_string());
        self.url_depths.entry(url.to_string()).or_insert(1);
        if !self.unscraped_urls.iter().any(|u| u == url) {
            self.unscraped_urls.push_back(url.to_string());
        }
    }

    /// Prunes explored-section records older than `max_age_days`
    pub fn compact(&mut self, max_age_days: i64, now: DateTime<Utc>) {
        self.explored_sections
            .retain(|s| now - s.last_explored < Duration::days(max_age_days));
    }

    /// Checks the structural invariants; used by tests and state upgrades
    pub fn invariants_hold(&self) -> bool {
        self.unscraped_urls.iter().all(|u| self.known_urls.contains(u))
            && self.unscraped_urls.iter().all(|u| !self.seen.contains(u))
    }
}
