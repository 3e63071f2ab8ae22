//! Message links between the serving side and its remote peers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::TransportError;
use crate::message::{Endpoint, PeerId, WireMessage};

/// Callback invoked for every inbound message. Must not block.
pub type InboundHandler = Arc<dyn Fn(WireMessage) + Send + Sync>;

pub trait PeerLink: Send + Sync {
    fn send(&self, to: Endpoint, msg: WireMessage) -> Result<(), TransportError>;

    /// Replace the inbound handler. Messages arriving with no handler are dropped.
    fn set_inbound(&self, handler: InboundHandler);

    /// Peers currently reachable from this end.
    fn num_peers(&self) -> usize;
}

#[derive(Default)]
struct Hub {
    server: Mutex<Option<InboundHandler>>,
    peers: Mutex<HashMap<PeerId, InboundHandler>>,
}

/// In-process network: one server end and any number of peer ends.
///
/// Delivery is synchronous on the sending thread. The peer end stamps its id on
/// everything it sends, as a real connection would.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    hub: Arc<Hub>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server_link(&self) -> Arc<LoopbackLink> {
        Arc::new(LoopbackLink {
            hub: Arc::clone(&self.hub),
            me: Endpoint::Server,
        })
    }

    pub fn peer_link(&self, id: PeerId) -> Arc<LoopbackLink> {
        Arc::new(LoopbackLink {
            hub: Arc::clone(&self.hub),
            me: Endpoint::Peer(id),
        })
    }
}

pub struct LoopbackLink {
    hub: Arc<Hub>,
    me: Endpoint,
}

impl PeerLink for LoopbackLink {
    fn send(&self, to: Endpoint, mut msg: WireMessage) -> Result<(), TransportError> {
        let handler = match (self.me, to) {
            (Endpoint::Peer(id), Endpoint::Server) => {
                msg.key.peer = Some(id);
                self.hub.server.lock().unwrap().clone()
            }
            (Endpoint::Server, Endpoint::Peer(id)) => {
                let h = self.hub.peers.lock().unwrap().get(&id).cloned();
                Some(h.ok_or(TransportError::UnknownPeer(id))?)
            }
            (Endpoint::Peer(_), Endpoint::Peer(_)) | (Endpoint::Server, Endpoint::Server) => {
                return Err(TransportError::BadEndpoint(to))
            }
        };
        let handler = handler.ok_or(TransportError::NoHandler)?;
        handler(msg);
        Ok(())
    }

    fn set_inbound(&self, handler: InboundHandler) {
        match self.me {
            Endpoint::Server => *self.hub.server.lock().unwrap() = Some(handler),
            Endpoint::Peer(id) => {
                self.hub.peers.lock().unwrap().insert(id, handler);
            }
        }
    }

    fn num_peers(&self) -> usize {
        match self.me {
            Endpoint::Server => self.hub.peers.lock().unwrap().len(),
            Endpoint::Peer(_) => 1,
        }
    }
}
