use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};
use std::time::Duration;

use crate::message::WireMessage;

/// Blocking FIFO of inbound messages for one collector.
///
/// Pushes come from link threads; only the collector's fill loop pops.
#[derive(Debug)]
pub struct MessageQueue {
    tx: Mutex<Option<mpsc::Sender<WireMessage>>>,
    rx: Mutex<mpsc::Receiver<WireMessage>>,
    len: AtomicUsize,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    /// Enqueue a message. Returns false once the queue is closed.
    pub fn push(&self, msg: WireMessage) -> bool {
        let g = self.tx.lock().unwrap();
        match g.as_ref() {
            Some(tx) => {
                self.len.fetch_add(1, Ordering::SeqCst);
                if tx.send(msg).is_err() {
                    self.len.fetch_sub(1, Ordering::SeqCst);
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// Pop the oldest message. A zero timeout blocks until a message arrives or the queue closes.
    ///
    /// Returns `None` on timeout, or once closed and drained.
    pub fn pop(&self, timeout: Duration) -> Option<WireMessage> {
        let rx = self.rx.lock().unwrap();
        let msg = if timeout.is_zero() {
            rx.recv().ok()
        } else {
            rx.recv_timeout(timeout).ok()
        };
        if msg.is_some() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        msg
    }

    /// Stop accepting pushes and wake a blocked `pop` once the backlog is drained.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap().is_none()
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
