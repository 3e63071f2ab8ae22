//! Sending side: answers batches locally or forwards them to the serving side.
//!
//! Each remote allocation owns a reply channel keyed by a sequence number that
//! is never reused. A dispatch sends the input fields of every sample, then
//! waits until each slice has been answered, the reply timeout expires or the
//! cancel token fires.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use spc_core::{FillMode, TransportConfig};
use spc_logging::{Event, EventSink};

use crate::context::{BatchClient, POLL_INTERVAL};
use crate::envelope::KeyFilter;
use crate::error::TransportError;
use crate::link::PeerLink;
use crate::message::{Endpoint, ReplyStatus, RoutingKey, WireMessage};
use crate::slot::{BatchData, BatchSpec};

/// Shared flag that aborts in-flight remote waits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct ReplyTable {
    routes: Mutex<HashMap<u64, mpsc::Sender<WireMessage>>>,
    unknown: AtomicU64,
    sink: Arc<dyn EventSink>,
}

impl ReplyTable {
    fn deliver(&self, msg: WireMessage) {
        let idx = msg.key.reply_idx;
        let tx = self.routes.lock().unwrap().get(&idx).cloned();
        let delivered = match tx {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        };
        if !delivered {
            self.unknown.fetch_add(1, Ordering::Relaxed);
            self.sink.emit(&Event::transport_warning(
                "sender",
                format!("dropping reply for unknown reply index {idx}"),
            ));
        }
    }
}

/// Where an allocated batch goes on dispatch.
pub enum SenderRoute {
    Local { label: String },
    Remote(RemoteRoute),
}

impl SenderRoute {
    pub fn is_remote(&self) -> bool {
        matches!(self, SenderRoute::Remote(_))
    }

    pub fn reply_idx(&self) -> Option<u64> {
        match self {
            SenderRoute::Local { .. } => None,
            SenderRoute::Remote(r) => Some(r.reply_idx),
        }
    }
}

/// Reply channel of one remote allocation. Deregistered on drop.
pub struct RemoteRoute {
    label: String,
    reply_idx: u64,
    round: u64,
    rx: mpsc::Receiver<WireMessage>,
    table: Arc<ReplyTable>,
}

impl Drop for RemoteRoute {
    fn drop(&mut self) {
        self.table.routes.lock().unwrap().remove(&self.reply_idx);
    }
}

pub struct BatchSender {
    link: Arc<dyn PeerLink>,
    local: BatchClient,
    remote_labels: Mutex<BTreeSet<String>>,
    fill_mode: FillMode,
    reply_timeout: Option<Duration>,
    next_reply_idx: AtomicU64,
    table: Arc<ReplyTable>,
    cancel: CancelToken,
}

impl BatchSender {
    pub fn new(
        cfg: &TransportConfig,
        link: Arc<dyn PeerLink>,
        local: BatchClient,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let table = Arc::new(ReplyTable {
            routes: Mutex::new(HashMap::new()),
            unknown: AtomicU64::new(0),
            sink,
        });
        let table_in = Arc::clone(&table);
        link.set_inbound(Arc::new(move |msg: WireMessage| table_in.deliver(msg)));
        Self {
            link,
            local,
            remote_labels: Mutex::new(cfg.remote_labels.iter().cloned().collect()),
            fill_mode: cfg.fill_mode,
            reply_timeout: (cfg.reply_timeout_ms > 0)
                .then(|| Duration::from_millis(cfg.reply_timeout_ms)),
            next_reply_idx: AtomicU64::new(0),
            table,
            cancel: CancelToken::new(),
        }
    }

    pub fn set_remote_labels<I, S>(&self, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.remote_labels.lock().unwrap() = labels.into_iter().map(Into::into).collect();
    }

    pub fn is_remote(&self, label: &str) -> bool {
        self.remote_labels.lock().unwrap().contains(label)
    }

    pub fn allocate_batch(&self, spec: &BatchSpec) -> SenderRoute {
        if !self.is_remote(&spec.label) {
            return SenderRoute::Local {
                label: spec.label.clone(),
            };
        }
        let reply_idx = self.next_reply_idx.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        self.table.routes.lock().unwrap().insert(reply_idx, tx);
        SenderRoute::Remote(RemoteRoute {
            label: spec.label.clone(),
            reply_idx,
            round: 0,
            rx,
            table: Arc::clone(&self.table),
        })
    }

    /// Run `data` through inference and write the outputs back into it.
    ///
    /// Returns the worst status reported for any slice. On a local-path error the
    /// batch contents are lost; on a remote error the inputs are intact and the
    /// caller may dispatch again on the same route.
    pub fn dispatch(
        &self,
        route: &mut SenderRoute,
        data: &mut BatchData,
    ) -> Result<ReplyStatus, TransportError> {
        match route {
            SenderRoute::Local { .. } => {
                let spec = data.spec_arc();
                let owned = std::mem::replace(data, BatchData::empty(spec));
                let (back, status) = self.local.send_wait(owned)?;
                *data = back;
                Ok(status)
            }
            SenderRoute::Remote(r) => self.dispatch_remote(r, data),
        }
    }

    fn dispatch_remote(
        &self,
        route: &mut RemoteRoute,
        data: &mut BatchData,
    ) -> Result<ReplyStatus, TransportError> {
        route.round += 1;
        while route.rx.try_recv().is_ok() {}
        if data.is_empty() {
            return Ok(ReplyStatus::Success);
        }

        let spec = data.spec_arc();
        let inputs = KeyFilter::Only(&spec.input_keys);
        let key = |slice: u32| RoutingKey {
            peer: None,
            reply_idx: route.reply_idx,
            round: route.round,
            slice,
        };
        let expected = match self.fill_mode {
            FillMode::PerSlice => {
                for i in 0..data.len() {
                    self.link.send(
                        Endpoint::Server,
                        WireMessage {
                            key: key(i as u32),
                            label: route.label.clone(),
                            status: ReplyStatus::Success,
                            body: data.slice_envelope(i, inputs),
                        },
                    )?;
                }
                data.len()
            }
            FillMode::Whole => {
                self.link.send(
                    Endpoint::Server,
                    WireMessage {
                        key: key(0),
                        label: route.label.clone(),
                        status: ReplyStatus::Success,
                        body: data.to_envelope(inputs),
                    },
                )?;
                1
            }
        };

        let outputs = KeyFilter::Except(&spec.input_keys);
        let deadline = self.reply_timeout.map(|t| Instant::now() + t);
        let mut answered = vec![false; expected];
        let mut received = 0usize;
        let mut status = ReplyStatus::Success;
        while received < expected {
            if self.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            let mut wait = POLL_INTERVAL;
            if let Some(d) = deadline {
                let left = d.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(TransportError::ReplyTimeout {
                        reply_idx: route.reply_idx,
                        received,
                        expected,
                    });
                }
                wait = wait.min(left);
            }
            let msg = match route.rx.recv_timeout(wait) {
                Ok(m) => m,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(TransportError::Disconnected),
            };
            let slice = msg.key.slice as usize;
            if msg.key.round != route.round || slice >= expected || answered[slice] {
                continue;
            }
            match self.fill_mode {
                FillMode::PerSlice => data.write_slice(slice, &msg.body, outputs)?,
                FillMode::Whole => {
                    data.write_whole(&msg.body, outputs)?;
                }
            }
            answered[slice] = true;
            received += 1;
            status = status.worst(msg.status);
        }
        Ok(status)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Replies that matched no live allocation.
    pub fn unknown_replies(&self) -> u64 {
        self.table.unknown.load(Ordering::Relaxed)
    }

    pub fn pending_routes(&self) -> usize {
        self.table.routes.lock().unwrap().len()
    }
}
