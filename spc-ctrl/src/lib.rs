//! spc-ctrl: self-play control plane.
//!
//! Tracks the current model version, aggregates game outcomes per version,
//! decides when a version has produced enough samples and tunes the resign
//! threshold handed out with new requests.

pub mod record;
pub mod resign;
pub mod selfplay;

use thiserror::Error;

pub use record::{SelfPlayRecord, MOVE_BUCKETS};
pub use resign::{ResignThresholdCalculator, ResignWindowEntry, DEFAULT_MAX_DELTA};
pub use selfplay::{FeedOutcome, SampleStatus, SelfPlaySubCtrl};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum CtrlError {
    #[error("invalid resign config: {0}")]
    InvalidResignConfig(String),
    #[error("replay error: {0}")]
    Replay(#[from] spc_replay::ReplayError),
    #[error("no current model version")]
    NoCurrentVersion,
}


#[cfg(test)]
mod resign_tests;

#[cfg(test)]
mod record_tests;
