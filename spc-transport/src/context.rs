//! Pull-based hand-off between batch producers and the inference serving loop.
//!
//! Producers call [`BatchClient::send_wait`] with a full batch and block; the
//! serving loop pulls it with [`BatchContext::wait`], writes outputs in place and
//! hands it back with [`BatchContext::step`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::message::ReplyStatus;
use crate::slot::BatchData;

/// Granularity at which blocked callers notice `stop()`.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(20);

type Done = mpsc::Sender<(BatchData, ReplyStatus)>;

struct Job {
    data: BatchData,
    done: Done,
}

pub struct BatchContext {
    tx: mpsc::Sender<Job>,
    rx: Mutex<mpsc::Receiver<Job>>,
    stopped: Arc<AtomicBool>,
}

impl Default for BatchContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchContext {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn client(&self) -> BatchClient {
        BatchClient {
            tx: self.tx.clone(),
            stopped: Arc::clone(&self.stopped),
        }
    }

    /// Next batch submitted by a client. A zero timeout blocks until one arrives or the context stops.
    pub fn wait(&self, timeout: Duration) -> Result<Option<ReadyBatch>, TransportError> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let rx = self.rx.lock().unwrap();
        loop {
            if self.is_stopped() {
                return Err(TransportError::Stopped);
            }
            let mut wait = POLL_INTERVAL;
            if let Some(d) = deadline {
                let left = d.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Ok(None);
                }
                wait = wait.min(left);
            }
            match rx.recv_timeout(wait) {
                Ok(job) => {
                    return Ok(Some(ReadyBatch {
                        data: Some(job.data),
                        done: job.done,
                    }))
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(TransportError::Stopped),
            }
        }
    }

    /// Release a batch back to the client that submitted it.
    pub fn step(&self, ready: ReadyBatch, status: ReplyStatus) {
        ready.finish(status);
    }

    /// Fail every queued batch and make further calls return `Stopped`.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let rx = self.rx.lock().unwrap();
        while rx.try_recv().is_ok() {}
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// A batch checked out by the serving loop. Dropping it unreleased fails the batch.
pub struct ReadyBatch {
    data: Option<BatchData>,
    done: Done,
}

impl ReadyBatch {
    pub fn label(&self) -> &str {
        self.data().label()
    }

    pub fn data(&self) -> &BatchData {
        self.data.as_ref().expect("batch already released")
    }

    pub fn data_mut(&mut self) -> &mut BatchData {
        self.data.as_mut().expect("batch already released")
    }

    pub fn finish(mut self, status: ReplyStatus) {
        if let Some(data) = self.data.take() {
            let _ = self.done.send((data, status));
        }
    }
}

impl Drop for ReadyBatch {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            let _ = self.done.send((data, ReplyStatus::Failed));
        }
    }
}

#[derive(Clone)]
pub struct BatchClient {
    tx: mpsc::Sender<Job>,
    stopped: Arc<AtomicBool>,
}

impl BatchClient {
    /// Submit a full batch and block until the serving loop releases it.
    pub fn send_wait(&self, data: BatchData) -> Result<(BatchData, ReplyStatus), TransportError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TransportError::Stopped);
        }
        let (done, rx) = mpsc::channel();
        self.tx
            .send(Job { data, done })
            .map_err(|_| TransportError::Stopped)?;
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(r) => return Ok(r),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if self.stopped.load(Ordering::SeqCst) {
                        return Err(TransportError::Stopped);
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(TransportError::Stopped),
            }
        }
    }
}
