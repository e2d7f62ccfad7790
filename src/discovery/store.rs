//! Durable storage for discovery state
//!
//! One JSON file per institution under the configured state directory. Saves
//! are atomic (write to a temp file, then rename) so a crash mid-write never
//! leaves a truncated state file behind. Loads are forgiving: a missing or
//! corrupt file yields an empty state with a warning rather than an error,
//! because losing discovery state only costs re-crawling, never data.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::discovery::state::{DiscoveryState, ExploredSection};
use crate::StateError;

/// On-disk envelope for discovery state, tagged with a schema version
#[derive(Serialize, Deserialize)]
#[serde(tag = "version")]
enum DiscoveryStateFile {
    #[serde(rename = "1")]
    V1(StateV1),
    #[serde(rename = "2")]
    V2(DiscoveryState),
}

/// Schema version 1: no `seen` set, no cycle timestamp, camelCase keys
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateV1 {
    known_urls: Vec<String>,
    unscraped_urls: Vec<String>,
    #[serde(default)]
    explored_sections: Vec<SectionV1>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SectionV1 {
    seed_url: String,
    #[serde(default)]
    depth: u32,
    last_explored: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    discovered_urls: Vec<String>,
}

impl StateV1 {
    /// Upgrades a v1 state to the current schema
    ///
    /// Version 1 had no `seen` set; it is reconstructed as every known URL
    /// not still waiting in the queue, which preserves the invariant that a
    /// queued URL is never also seen.
    fn upgrade(self) -> DiscoveryState {
        let queued: HashSet<String> = self.unscraped_urls.iter().cloned().collect();
        let known: HashSet<String> = self.known_urls.into_iter().collect();
        let seen = known.difference(&queued).cloned().collect();

        DiscoveryState {
            known_urls: known,
            unscraped_urls: self.unscraped_urls.into_iter().collect(),
            explored_sections: self
                .explored_sections
                .into_iter()
                .map(|s| ExploredSection {
                    url: s.seed_url,
                    depth: s.depth,
                    last_explored: s.last_explored,
                    discovered_urls: s.discovered_urls,
                })
                .collect(),
            seen,
            // v1 never tracked depths; queued URLs default to depth 1
            url_depths: HashMap::new(),
            last_cycle: None,
        }
    }
}

impl DiscoveryStateFile {
    fn into_state(self) -> DiscoveryState {
        match self {
            DiscoveryStateFile::V1(v1) => {
                debug!("upgrading discovery state from schema v1");
                v1.upgrade()
            }
            DiscoveryStateFile::V2(state) => state,
        }
    }
}

/// Loads and saves per-institution discovery state files
pub struct DiscoveryStateStore {
    dir: PathBuf,
}

impl DiscoveryStateStore {
    /// Creates a store rooted at the given state directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn state_path(&self, institution_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", institution_id))
    }

    /// Loads the discovery state for an institution
    ///
    /// A missing file means the institution has never been crawled and yields
    /// an empty state. A corrupt file is logged and also yields an empty
    /// state; the next save overwrites it.
    pub fn load(&self, institution_id: &str) -> DiscoveryState {
        let path = self.state_path(institution_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(institution = institution_id, "no discovery state on disk, starting empty");
                return DiscoveryState::new();
            }
            Err(e) => {
                warn!(
                    institution = institution_id,
                    path = %path.display(),
                    error = %e,
                    "failed to read discovery state, starting empty"
                );
                return DiscoveryState::new();
            }
        };

        match decode(&bytes) {
            Some(state) => state,
            None => {
                warn!(
                    institution = institution_id,
                    path = %path.display(),
                    "corrupt discovery state file, starting empty"
                );
                DiscoveryState::new()
            }
        }
    }

    /// Atomically persists the discovery state for an institution
    ///
    /// The state is written to a sibling temp file first and renamed into
    /// place, so readers never observe a partially written file.
    pub fn save(&self, institution_id: &str, state: &DiscoveryState) -> Result<(), StateError> {
        fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_vec_pretty(&DiscoveryStateFile::V2(state.clone()))?;

        let path = self.state_path(institution_id);
        let tmp = self.dir.join(format!("{}.json.tmp", institution_id));
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &path)?;

        debug!(
            institution = institution_id,
            known = state.known_urls.len(),
            queued = state.unscraped_urls.len(),
            "saved discovery state"
        );
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> Option<DiscoveryState> {
    if let Ok(file) = serde_json::from_slice::<DiscoveryStateFile>(bytes) {
        return Some(file.into_state());
    }
    // Files written before the version tag existed have the v1 shape with no
    // envelope at all.
    if let Ok(v1) = serde_json::from_slice::<StateV1>(bytes) {
        debug!("upgrading untagged legacy discovery state");
        return Some(v1.upgrade());
    }
    None
}
