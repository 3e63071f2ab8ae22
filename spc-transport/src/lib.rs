//! spc-transport: batches remote inference requests and routes the replies back.
//!
//! Remote peers run a [`BatchSender`]; the serving side runs a [`BatchReceiver`]
//! whose collectors fill [`BatchSlot`]s from a [`MessageQueue`] each and hand
//! ready batches to the inference loop through a [`BatchContext`].

pub mod context;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod link;
pub mod message;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod slot;
pub mod stats;
pub mod tcp;

pub use context::{BatchClient, BatchContext, ReadyBatch};
pub use envelope::{Column, Envelope, FieldKind, KeyFilter, KEY_HASH, KEY_STATE};
pub use error::TransportError;
pub use frame::FrameError;
pub use link::{InboundHandler, LoopbackLink, LoopbackNetwork, PeerLink};
pub use message::{Endpoint, PeerId, ReplyStatus, RoutingKey, WireMessage};
pub use queue::MessageQueue;
pub use receiver::{BatchReceiver, CollectorInfo, RemoteCollector};
pub use sender::{BatchSender, CancelToken, RemoteRoute, SenderRoute};
pub use slot::{BatchData, BatchSlot, BatchSpec, FieldSpec, SlotError};
pub use stats::{Stats, StatsSnapshot};
pub use tcp::{TcpClientLink, TcpServerLink};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
