//! Serving side: collects remote samples into batches, runs them through the
//! local batch context and replies to the peers the samples came from.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use spc_core::{FillMode, TransportConfig};
use spc_logging::{Event, EventSink};

use crate::context::{BatchClient, BatchContext, ReadyBatch, POLL_INTERVAL};
use crate::error::TransportError;
use crate::link::PeerLink;
use crate::message::{Endpoint, PeerId, ReplyStatus, WireMessage};
use crate::queue::MessageQueue;
use crate::slot::{BatchData, BatchSlot, BatchSpec};
use crate::stats::Stats;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorInfo {
    pub idx: usize,
    pub label: String,
    /// Stats label, unique per allocation.
    pub label_idx: u32,
    /// Reply target for messages that arrived without a peer id.
    pub home_peer: PeerId,
}

/// One batch-fill pipeline: a queue of inbound samples and the slot they fill.
pub struct RemoteCollector {
    info: CollectorInfo,
    queue: Arc<MessageQueue>,
    slot: BatchSlot,
    link: Arc<dyn PeerLink>,
    stats: Arc<Stats>,
    sink: Arc<dyn EventSink>,
}

impl RemoteCollector {
    pub fn new(
        info: CollectorInfo,
        spec: Arc<BatchSpec>,
        mode: FillMode,
        link: Arc<dyn PeerLink>,
        stats: Arc<Stats>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            info,
            queue: Arc::new(MessageQueue::new()),
            slot: BatchSlot::new(spec, mode),
            link,
            stats,
            sink,
        }
    }

    pub fn info(&self) -> &CollectorInfo {
        &self.info
    }

    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    pub fn slot(&self) -> &BatchSlot {
        &self.slot
    }

    pub fn push(&self, msg: WireMessage) -> bool {
        self.queue.push(msg)
    }

    /// Pop messages into the slot until it is ready. Returns false on timeout
    /// (partial progress is kept) or when the queue is closed.
    ///
    /// A zero timeout blocks until ready or closed. Malformed messages are dropped.
    pub fn wait_batch_fill(&mut self, timeout: Duration) -> bool {
        if self.slot.is_ready() {
            return true;
        }
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        loop {
            let wait = match deadline {
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return false;
                    }
                    left
                }
                None => Duration::ZERO,
            };
            let Some(msg) = self.queue.pop(wait) else {
                return false;
            };
            match self.slot.fill_next(&msg) {
                Ok(true) => {
                    self.stats.feed(self.info.label_idx, self.slot.filled());
                    return true;
                }
                Ok(false) => {}
                Err(e) => self.sink.emit(&Event::transport_warning(
                    format!("collector-{}", self.info.idx),
                    format!("dropping message from {:?}: {e}", msg.key.peer),
                )),
            }
        }
    }

    /// Run the ready batch through `client` and reply. Returns the number of samples released.
    pub fn serve(&mut self, client: &BatchClient) -> Result<usize, TransportError> {
        let data = self.slot.take_data();
        match client.send_wait(data) {
            Ok((data, status)) => {
                self.slot.put_data(data);
                Ok(self.release(status))
            }
            Err(e) => {
                // The batch is gone; forget its routes so the slot can refill.
                let spec = self.slot.data().spec_arc();
                self.slot.put_data(BatchData::new(spec));
                self.slot.reset();
                Err(e)
            }
        }
    }

    /// Reply to every filled slice, record the release and rewind the slot.
    pub fn release(&mut self, status: ReplyStatus) -> usize {
        for reply in self.slot.replies(status) {
            let peer = reply.key.peer.unwrap_or(self.info.home_peer);
            if let Err(e) = self.link.send(Endpoint::Peer(peer), reply) {
                self.sink.emit(&Event::transport_warning(
                    format!("collector-{}", self.info.idx),
                    format!("reply to peer {peer} failed: {e}"),
                ));
            }
        }
        let n = self.slot.filled();
        self.stats.record_release(n);
        self.slot.reset();
        n
    }
}

struct Router {
    queues: Mutex<Vec<(String, Arc<MessageQueue>)>>,
    rng: Mutex<ChaCha8Rng>,
    sink: Arc<dyn EventSink>,
}

impl Router {
    fn route(&self, msg: WireMessage) {
        let queues = self.queues.lock().unwrap();
        let candidates: Vec<&Arc<MessageQueue>> = queues
            .iter()
            .filter(|(label, _)| *label == msg.label)
            .map(|(_, q)| q)
            .collect();
        if candidates.is_empty() {
            self.sink.emit(&Event::transport_warning(
                "receiver",
                format!("no collector for label {:?}", msg.label),
            ));
            return;
        }
        let pick = self.rng.lock().unwrap().gen_range(0..candidates.len());
        candidates[pick].push(msg);
    }
}

pub struct BatchReceiver {
    fill_mode: FillMode,
    num_peers: usize,
    link: Arc<dyn PeerLink>,
    stats: Arc<Stats>,
    sink: Arc<dyn EventSink>,
    context: Arc<BatchContext>,
    router: Arc<Router>,
    next_label_idx: AtomicU32,
    infos: Mutex<Vec<CollectorInfo>>,
    idle: Mutex<Vec<RemoteCollector>>,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BatchReceiver {
    /// Allocate `num_collectors` collectors for `spec` and start routing inbound messages.
    pub fn new(
        cfg: &TransportConfig,
        spec: BatchSpec,
        link: Arc<dyn PeerLink>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, TransportError> {
        spec.validate()?;
        let router = Arc::new(Router {
            queues: Mutex::new(Vec::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(cfg.seed)),
            sink: Arc::clone(&sink),
        });
        let router_in = Arc::clone(&router);
        link.set_inbound(Arc::new(move |msg: WireMessage| router_in.route(msg)));

        let rx = Self {
            fill_mode: cfg.fill_mode,
            num_peers: cfg.num_peers.max(1),
            link,
            stats: Arc::new(Stats::new(cfg.stats_window, Arc::clone(&sink))),
            sink,
            context: Arc::new(BatchContext::new()),
            router,
            next_label_idx: AtomicU32::new(0),
            infos: Mutex::new(Vec::new()),
            idle: Mutex::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        };
        let spec = Arc::new(spec);
        for _ in 0..cfg.num_collectors {
            rx.allocate_batch(Arc::clone(&spec))?;
        }
        Ok(rx)
    }

    /// Add a collector for `spec`. Returns its index.
    pub fn allocate_batch(&self, spec: Arc<BatchSpec>) -> Result<usize, TransportError> {
        spec.validate()?;
        let label_idx = self.next_label_idx.fetch_add(1, Ordering::SeqCst);
        let mut infos = self.infos.lock().unwrap();
        let info = CollectorInfo {
            idx: infos.len(),
            label: spec.label.clone(),
            label_idx,
            home_peer: label_idx % self.num_peers as PeerId,
        };
        infos.push(info.clone());
        drop(infos);

        let idx = info.idx;
        let collector = RemoteCollector::new(
            info,
            spec,
            self.fill_mode,
            Arc::clone(&self.link),
            Arc::clone(&self.stats),
            Arc::clone(&self.sink),
        );
        self.router
            .queues
            .lock()
            .unwrap()
            .push((collector.info.label.clone(), Arc::clone(&collector.queue)));
        if self.running.load(Ordering::SeqCst) {
            self.spawn(collector);
        } else {
            self.idle.lock().unwrap().push(collector);
        }
        Ok(idx)
    }

    /// Start one fill thread per collector.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let idle: Vec<_> = self.idle.lock().unwrap().drain(..).collect();
        for c in idle {
            self.spawn(c);
        }
    }

    fn spawn(&self, mut collector: RemoteCollector) {
        let client = self.context.client();
        let running = Arc::clone(&self.running);
        let name = format!("spc-collector-{}", collector.info.idx);
        let h = thread::Builder::new().name(name).spawn(move || {
            while running.load(Ordering::SeqCst) {
                if !collector.wait_batch_fill(POLL_INTERVAL) {
                    if collector.queue.is_closed() {
                        break;
                    }
                    continue;
                }
                if let Err(TransportError::Stopped) = collector.serve(&client) {
                    break;
                }
            }
        });
        match h {
            Ok(h) => self.handles.lock().unwrap().push(h),
            Err(e) => self.sink.emit(&Event::transport_warning(
                "receiver",
                format!("failed to spawn collector thread: {e}"),
            )),
        }
    }

    /// Stop the batch context, close every queue and join the fill threads.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.context.stop();
        for (_, q) in self.router.queues.lock().unwrap().iter() {
            q.close();
        }
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for h in handles {
            let _ = h.join();
        }
    }

    pub fn wait(&self, timeout: Duration) -> Result<Option<ReadyBatch>, TransportError> {
        self.context.wait(timeout)
    }

    pub fn step(&self, ready: ReadyBatch, status: ReplyStatus) {
        self.context.step(ready, status);
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn collectors(&self) -> Vec<CollectorInfo> {
        self.infos.lock().unwrap().clone()
    }

    /// Messages waiting in each collector's queue, by collector index.
    pub fn queue_depths(&self) -> Vec<usize> {
        self.router
            .queues
            .lock()
            .unwrap()
            .iter()
            .map(|(_, q)| q.len())
            .collect()
    }

    /// Collectors per label.
    pub fn label_counts(&self) -> HashMap<String, usize> {
        let mut out = HashMap::new();
        for info in self.infos.lock().unwrap().iter() {
            *out.entry(info.label.clone()).or_insert(0) += 1;
        }
        out
    }
}

impl Drop for BatchReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}
