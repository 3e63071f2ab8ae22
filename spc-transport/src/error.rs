use thiserror::Error;

use crate::frame::FrameError;
use crate::message::{Endpoint, PeerId};
use crate::slot::SlotError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("slot error: {0}")]
    Slot(#[from] SlotError),
    #[error("reply {reply_idx} timed out after {received}/{expected} replies")]
    ReplyTimeout {
        reply_idx: u64,
        received: usize,
        expected: usize,
    },
    #[error("cancelled")]
    Cancelled,
    #[error("peer disconnected")]
    Disconnected,
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),
    #[error("cannot send to {0:?} from this end")]
    BadEndpoint(Endpoint),
    #[error("no inbound handler registered")]
    NoHandler,
    #[error("transport stopped")]
    Stopped,
}
