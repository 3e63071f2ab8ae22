//! Framed TCP links. Each frame carries one JSON-encoded [`WireMessage`].
//!
//! The server end numbers connections in accept order; that number is the peer
//! id stamped on everything read from the connection.

use std::collections::HashMap;
use std::io::{self, Write as _};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::context::POLL_INTERVAL;
use crate::error::TransportError;
use crate::frame::{encode_frame, read_frame};
use crate::link::{InboundHandler, PeerLink};
use crate::message::{decode_message, encode_message, Endpoint, PeerId, WireMessage};

#[derive(Default)]
struct Inbox {
    handler: Mutex<Option<InboundHandler>>,
    dropped: AtomicU64,
}

impl Inbox {
    fn deliver(&self, msg: WireMessage) {
        let handler = self.handler.lock().unwrap().clone();
        match handler {
            Some(h) => h(msg),
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn read_loop(mut stream: TcpStream, peer: Option<PeerId>, inbox: &Inbox) {
    loop {
        let payload = match read_frame(&mut stream) {
            Ok(p) => p,
            Err(_) => break,
        };
        match decode_message(&payload) {
            Ok(mut msg) => {
                if peer.is_some() {
                    msg.key.peer = peer;
                }
                inbox.deliver(msg);
            }
            Err(_) => {
                inbox.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn write_message(stream: &Mutex<TcpStream>, msg: &WireMessage) -> Result<(), TransportError> {
    let frame = encode_frame(&encode_message(msg)?)?;
    let mut s = stream.lock().unwrap();
    s.write_all(&frame)?;
    s.flush()?;
    Ok(())
}

struct ServerShared {
    inbox: Inbox,
    conns: Mutex<HashMap<PeerId, Arc<Mutex<TcpStream>>>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

/// Listening end: accepts peers and replies to them by id.
pub struct TcpServerLink {
    shared: Arc<ServerShared>,
    local_addr: SocketAddr,
    accept_handle: Option<JoinHandle<()>>,
}

impl TcpServerLink {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let shared = Arc::new(ServerShared {
            inbox: Inbox::default(),
            conns: Mutex::new(HashMap::new()),
            readers: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        });
        let shared_a = Arc::clone(&shared);
        let accept_handle = thread::Builder::new()
            .name("spc-tcp-accept".to_string())
            .spawn(move || accept_loop(listener, shared_a))?;
        Ok(Self {
            shared,
            local_addr,
            accept_handle: Some(accept_handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Inbound messages that could not be decoded or had no handler.
    pub fn dropped(&self) -> u64 {
        self.shared.inbox.dropped.load(Ordering::Relaxed)
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<ServerShared>) {
    let mut next_id: PeerId = 0;
    while !shared.shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(e) = register_peer(&shared, stream, next_id) {
                    eprintln!("spc-tcp: dropping peer {next_id}: {e}");
                    continue;
                }
                next_id += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
}

fn register_peer(shared: &Arc<ServerShared>, stream: TcpStream, id: PeerId) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true).ok();
    let reader = stream.try_clone()?;
    shared
        .conns
        .lock()
        .unwrap()
        .insert(id, Arc::new(Mutex::new(stream)));

    let shared_r = Arc::clone(shared);
    let h = thread::Builder::new()
        .name(format!("spc-tcp-peer-{id}"))
        .spawn(move || {
            read_loop(reader, Some(id), &shared_r.inbox);
            shared_r.conns.lock().unwrap().remove(&id);
        })?;
    shared.readers.lock().unwrap().push(h);
    Ok(())
}

impl PeerLink for TcpServerLink {
    fn send(&self, to: Endpoint, msg: WireMessage) -> Result<(), TransportError> {
        let Endpoint::Peer(id) = to else {
            return Err(TransportError::BadEndpoint(to));
        };
        let conn = self.shared.conns.lock().unwrap().get(&id).cloned();
        let conn = conn.ok_or(TransportError::UnknownPeer(id))?;
        write_message(&conn, &msg)
    }

    fn set_inbound(&self, handler: InboundHandler) {
        *self.shared.inbox.handler.lock().unwrap() = Some(handler);
    }

    fn num_peers(&self) -> usize {
        self.shared.conns.lock().unwrap().len()
    }
}

impl Drop for TcpServerLink {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        for conn in self.shared.conns.lock().unwrap().values() {
            let _ = conn.lock().unwrap().shutdown(Shutdown::Both);
        }
        self.accept_handle.take().map(|h| h.join().ok());
        let readers: Vec<_> = self.shared.readers.lock().unwrap().drain(..).collect();
        for h in readers {
            let _ = h.join();
        }
    }
}

/// Connecting end: talks to exactly one server.
pub struct TcpClientLink {
    writer: Mutex<TcpStream>,
    inbox: Arc<Inbox>,
    reader_handle: Option<JoinHandle<()>>,
}

impl TcpClientLink {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        let reader = stream.try_clone()?;
        let inbox = Arc::new(Inbox::default());
        let inbox_r = Arc::clone(&inbox);
        let reader_handle = thread::Builder::new()
            .name("spc-tcp-client".to_string())
            .spawn(move || read_loop(reader, None, &inbox_r))?;
        Ok(Self {
            writer: Mutex::new(stream),
            inbox,
            reader_handle: Some(reader_handle),
        })
    }

    pub fn dropped(&self) -> u64 {
        self.inbox.dropped.load(Ordering::Relaxed)
    }
}

impl PeerLink for TcpClientLink {
    fn send(&self, to: Endpoint, msg: WireMessage) -> Result<(), TransportError> {
        if to != Endpoint::Server {
            return Err(TransportError::BadEndpoint(to));
        }
        write_message(&self.writer, &msg)
    }

    fn set_inbound(&self, handler: InboundHandler) {
        *self.inbox.handler.lock().unwrap() = Some(handler);
    }

    fn num_peers(&self) -> usize {
        1
    }
}

impl Drop for TcpClientLink {
    fn drop(&mut self) {
        let _ = self.writer.lock().unwrap().shutdown(Shutdown::Both);
        self.reader_handle.take().map(|h| h.join().ok());
    }
}
