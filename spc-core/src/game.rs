//! Game assignment, outcome and trace types exchanged with workers.

use serde::{Deserialize, Serialize};

use crate::config::SearchOptions;

/// Monotonically assigned model version id.
pub type ModelVersion = i64;

/// Which model(s) a worker should play with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelPair {
    /// No model selected yet; the worker must not start a game.
    #[default]
    Wait,
    /// Both sides play the same version.
    SelfPlay { ver: ModelVersion },
    /// Two different versions play each other.
    Eval {
        black: ModelVersion,
        white: ModelVersion,
    },
}

impl ModelPair {
    pub fn is_selfplay(&self) -> bool {
        matches!(self, ModelPair::SelfPlay { .. })
    }

    pub fn is_wait(&self) -> bool {
        matches!(self, ModelPair::Wait)
    }

    pub fn black_ver(&self) -> Option<ModelVersion> {
        match *self {
            ModelPair::Wait => None,
            ModelPair::SelfPlay { ver } => Some(ver),
            ModelPair::Eval { black, .. } => Some(black),
        }
    }
}

/// One game assignment sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Request {
    pub vers: ModelPair,
    /// Resign once the side to move is within this distance of a certain loss.
    pub resign_threshold: f32,
    /// Probability that the worker plays this game out regardless of the threshold.
    pub never_resign_prob: f32,
    #[serde(rename = "async")]
    pub is_async: bool,
    #[serde(default)]
    pub search: SearchOptions,
}

impl Request {
    pub fn selfplay(ver: ModelVersion, resign_threshold: f32) -> Self {
        Self {
            vers: ModelPair::SelfPlay { ver },
            resign_threshold,
            ..Self::default()
        }
    }
}

/// Outcome of one completed game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GameResult {
    /// Final reward from black's perspective; positive means black won.
    pub reward: f32,
    /// Value estimate per move, black's move first, alternating sides.
    pub values: Vec<f32>,
    pub num_move: u32,
    /// The game was forced to play out without resigning.
    pub never_resign: bool,
}

impl GameResult {
    pub fn black_won(&self) -> bool {
        self.reward > 0.0
    }
}

/// Serializable game trace kept alongside its result for training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Record {
    pub game_id: u64,
    pub moves: Vec<u32>,
    /// Worker-defined payload (e.g. per-move policies).
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Identity of the worker asking for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClientInfo {
    pub id: String,
    #[serde(default)]
    pub peer: Option<u32>,
}

impl ClientInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            peer: None,
        }
    }
}
