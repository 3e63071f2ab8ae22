//! Wire messages exchanged between batch senders and receivers.
//!
//! A message carries one sample (per-slice mode) or one whole batch, plus the
//! routing key that lets the receiving side answer the exact peer, reply
//! channel and slice it came from.

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::error::TransportError;

pub type PeerId = u32;

/// Outcome attached to a batch after inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    #[default]
    Success,
    Failed,
    Unknown,
}

impl ReplyStatus {
    /// Combine two statuses, keeping the worse one.
    pub fn worst(self, other: ReplyStatus) -> ReplyStatus {
        use ReplyStatus::*;
        match (self, other) {
            (Failed, _) | (_, Failed) => Failed,
            (Unknown, _) | (_, Unknown) => Unknown,
            _ => Success,
        }
    }
}

/// Where a sample came from and where its reply must go.
///
/// `peer` is stamped by the link on arrival; senders leave it empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingKey {
    #[serde(default)]
    pub peer: Option<PeerId>,
    pub reply_idx: u64,
    /// Dispatch round on the reply channel; replies from an older round are stale.
    pub round: u64,
    pub slice: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub key: RoutingKey,
    pub label: String,
    #[serde(default)]
    pub status: ReplyStatus,
    pub body: Envelope,
}

/// Destination of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Server,
    Peer(PeerId),
}

pub fn encode_message(msg: &WireMessage) -> Result<Vec<u8>, TransportError> {
    Ok(serde_json::to_vec(msg)?)
}

pub fn decode_message(bytes: &[u8]) -> Result<WireMessage, TransportError> {
    Ok(serde_json::from_slice(bytes)?)
}
