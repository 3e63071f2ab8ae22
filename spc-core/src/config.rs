//! Unified configuration schema for the self-play plane.
//!
//! One YAML file configures the control plane (resign estimation, sample
//! gating), the batch transport, and record persistence. Every section has
//! defaults so partial files load.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Server identity, used to name record shards.
    #[serde(default)]
    pub server: ServerConfig,
    /// Adaptive resign threshold settings.
    #[serde(default)]
    pub resign: ResignConfig,
    /// Self-play sample gating settings.
    #[serde(default)]
    pub selfplay: SelfplayConfig,
    /// Search options forwarded verbatim to workers with every request.
    #[serde(default)]
    pub search: SearchOptions,
    /// Batch transport settings.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Record persistence settings.
    #[serde(default)]
    pub records: RecordsConfig,
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Short server id, first component of every record prefix.
    #[serde(default = "default_server_id")]
    pub server_id: String,
    /// Time signature of this process run; defaults to the start time in seconds.
    #[serde(default = "default_time_signature")]
    pub time_signature: String,
}

fn default_server_id() -> String {
    "server".to_string()
}

fn default_time_signature() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_id: default_server_id(),
            time_signature: default_time_signature(),
        }
    }
}

/// Resign threshold estimation.
///
/// Thresholds live in "distance from a certain win" units, i.e. `1 + value`
/// from the winner's perspective, so the legal range is `[0, 2]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResignConfig {
    /// Number of never-resign games kept in the sliding window.
    #[serde(default = "default_resign_hist_size")]
    pub hist_size: usize,
    /// Tolerated false-positive resignation rate.
    #[serde(default = "default_resign_fp_rate")]
    pub fp_rate: f32,
    /// Threshold used before enough never-resign games have been seen.
    #[serde(default = "default_resign_initial")]
    pub initial_threshold: f32,
    #[serde(default = "default_resign_lower_bound")]
    pub lower_bound: f32,
    #[serde(default = "default_resign_upper_bound")]
    pub upper_bound: f32,
    /// Largest change applied by one threshold update.
    #[serde(default = "default_resign_max_delta")]
    pub max_delta: f32,
}

fn default_resign_hist_size() -> usize {
    2500
}

fn default_resign_fp_rate() -> f32 {
    0.05
}

fn default_resign_initial() -> f32 {
    0.05
}

fn default_resign_lower_bound() -> f32 {
    1e-3
}

fn default_resign_upper_bound() -> f32 {
    0.5
}

fn default_resign_max_delta() -> f32 {
    0.01
}

impl Default for ResignConfig {
    fn default() -> Self {
        Self {
            hist_size: default_resign_hist_size(),
            fp_rate: default_resign_fp_rate(),
            initial_threshold: default_resign_initial(),
            lower_bound: default_resign_lower_bound(),
            upper_bound: default_resign_upper_bound(),
            max_delta: default_resign_max_delta(),
        }
    }
}

/// Self-play sample gating.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelfplayConfig {
    /// Games required before the first checkpoint. `<= 0` disables gating.
    #[serde(default)]
    pub init_num: i64,
    /// Games required per consumed weight update after `init_num`.
    #[serde(default)]
    pub update_num: i64,
    /// Probability that a game is forced to play out without resigning.
    #[serde(default = "default_never_resign_prob")]
    pub never_resign_prob: f32,
    /// Whether workers may run games asynchronously to requests.
    #[serde(default)]
    pub selfplay_async: bool,
    /// Emit a per-version summary every N fed games.
    #[serde(default = "default_summary_every")]
    pub summary_every: u64,
}

fn default_never_resign_prob() -> f32 {
    0.1
}

fn default_summary_every() -> u64 {
    100
}

impl Default for SelfplayConfig {
    fn default() -> Self {
        Self {
            init_num: 0,
            update_num: 0,
            never_resign_prob: default_never_resign_prob(),
            selfplay_async: false,
            summary_every: default_summary_every(),
        }
    }
}

/// Tree-search options forwarded to workers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SearchOptions {
    #[serde(default = "default_num_rollouts")]
    pub num_rollouts: u32,
    #[serde(default = "default_c_puct")]
    pub c_puct: f32,
    #[serde(default = "default_search_threads")]
    pub threads: u32,
}

fn default_num_rollouts() -> u32 {
    800
}

fn default_c_puct() -> f32 {
    1.5
}

fn default_search_threads() -> u32 {
    1
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            num_rollouts: default_num_rollouts(),
            c_puct: default_c_puct(),
            threads: default_search_threads(),
        }
    }
}

/// How a remote batch is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// One message carries the whole batch.
    Whole,
    /// Each message carries one sample; the batch is ready once every slice is written.
    #[default]
    PerSlice,
}

/// Batch transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Number of local batch collectors on the receiving side.
    #[serde(default = "default_num_collectors")]
    pub num_collectors: usize,
    /// Number of remote peers replies are spread over.
    #[serde(default = "default_num_peers")]
    pub num_peers: usize,
    #[serde(default)]
    pub fill_mode: FillMode,
    /// Labels whose batches are forwarded to a remote peer instead of local inference.
    #[serde(default)]
    pub remote_labels: Vec<String>,
    /// Remote reply timeout in milliseconds. 0 waits forever.
    #[serde(default)]
    pub reply_timeout_ms: u64,
    /// Number of batch fills per stats window.
    #[serde(default = "default_stats_window")]
    pub stats_window: u64,
    /// Seed for the collector-assignment RNG.
    #[serde(default)]
    pub seed: u64,
}

fn default_num_collectors() -> usize {
    4
}

fn default_num_peers() -> usize {
    1
}

fn default_stats_window() -> u64 {
    5000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            num_collectors: default_num_collectors(),
            num_peers: default_num_peers(),
            fill_mode: FillMode::default(),
            remote_labels: Vec::new(),
            reply_timeout_ms: 0,
            stats_window: default_stats_window(),
            seed: 0,
        }
    }
}

/// Record persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordsConfig {
    /// Directory record shards are written to.
    #[serde(default = "default_records_out_dir")]
    pub out_dir: String,
}

fn default_records_out_dir() -> String {
    "records".to_string()
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            out_dir: default_records_out_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        let r = &self.resign;
        if r.hist_size == 0 {
            return invalid("resign.hist_size must be > 0");
        }
        if !(r.fp_rate > 1e-6 && r.fp_rate < 1.0 - 1e-6) {
            return invalid("resign.fp_rate must be in (0,1)");
        }
        if !(0.0 <= r.lower_bound && r.lower_bound <= r.upper_bound && r.upper_bound <= 2.0) {
            return invalid("resign bounds must satisfy 0 <= lower_bound <= upper_bound <= 2");
        }
        if !(r.max_delta.is_finite() && r.max_delta >= 0.0) {
            return invalid("resign.max_delta must be finite and >= 0");
        }
        if !(0.0..=1.0).contains(&self.selfplay.never_resign_prob) {
            return invalid("selfplay.never_resign_prob must be in [0,1]");
        }
        if self.selfplay.summary_every == 0 {
            return invalid("selfplay.summary_every must be >= 1");
        }

        let t = &self.transport;
        if t.num_collectors < 1 {
            return invalid("transport.num_collectors must be >= 1");
        }
        if t.num_peers < 1 {
            return invalid("transport.num_peers must be >= 1");
        }
        if t.stats_window < 1 {
            return invalid("transport.stats_window must be >= 1");
        }
        if self.server.server_id.trim().is_empty() {
            return invalid("server.server_id must be non-empty");
        }
        Ok(())
    }
}
