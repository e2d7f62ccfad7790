//! Discovery state tracking
//!
//! Keeps one durable frontier per institution so repeated cycles make
//! progress instead of re-crawling the same pages. See
//! [`DiscoveryState`] for the invariants.

mod state;
mod store;

pub use state::{DiscoveryState, ExploredSection};
pub use store::DiscoveryStateStore;
