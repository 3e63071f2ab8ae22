//! Batch-fill health counters. Observed only; never gates batching.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use spc_logging::{BatchStatsV1, Event, EventSink};

pub const DEFAULT_STATS_WINDOW: u64 = 5000;

#[derive(Debug, Default)]
struct Window {
    fills: BTreeMap<u32, u64>,
    feeds: u64,
    batch_size_sum: u64,
    total_samples: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub window_feeds: u64,
    pub window_fills: BTreeMap<u32, u64>,
    pub total_samples: u64,
    pub replied: u64,
}

impl StatsSnapshot {
    pub fn in_queue(&self) -> u64 {
        self.total_samples.saturating_sub(self.replied)
    }
}

pub struct Stats {
    window: u64,
    inner: Mutex<Window>,
    replied: AtomicU64,
    sink: Arc<dyn EventSink>,
}

impl Stats {
    pub fn new(window: u64, sink: Arc<dyn EventSink>) -> Self {
        Self {
            window: window.max(1),
            inner: Mutex::new(Window::default()),
            replied: AtomicU64::new(0),
            sink,
        }
    }

    /// Count one ready batch for `label`. Every `window` feeds a `BatchStats` event is emitted
    /// and the window starts over; lifetime totals carry on.
    pub fn feed(&self, label: u32, batch_size: usize) {
        let report = {
            let mut g = self.inner.lock().unwrap();
            *g.fills.entry(label).or_default() += 1;
            g.feeds += 1;
            g.batch_size_sum += batch_size as u64;
            g.total_samples += batch_size as u64;
            if g.feeds < self.window {
                None
            } else {
                let report = self.summarize(&g);
                g.fills.clear();
                g.feeds = 0;
                g.batch_size_sum = 0;
                Some(report)
            }
        };
        if let Some(r) = report {
            self.sink.emit(&Event::BatchStats(r));
        }
    }

    pub fn record_release(&self, batch_size: usize) {
        self.replied.fetch_add(batch_size as u64, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let g = self.inner.lock().unwrap();
        StatsSnapshot {
            window_feeds: g.feeds,
            window_fills: g.fills.clone(),
            total_samples: g.total_samples,
            replied: self.replied.load(Ordering::SeqCst),
        }
    }

    fn summarize(&self, g: &Window) -> BatchStatsV1 {
        let min_label = g.fills.keys().next().copied().unwrap_or(0);
        let max_label = g.fills.keys().next_back().copied().unwrap_or(0);
        let zero_labels = (min_label..=max_label)
            .filter(|l| !g.fills.contains_key(l))
            .collect();
        let replied = self.replied.load(Ordering::SeqCst);
        BatchStatsV1 {
            min_label,
            max_label,
            zero_labels,
            avg_batch_size: g.batch_size_sum as f32 / g.feeds.max(1) as f32,
            samples: g.total_samples,
            replied,
            in_queue: g.total_samples.saturating_sub(replied),
        }
    }
}

impl std::fmt::Debug for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stats")
            .field("window", &self.window)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use spc_logging::MemorySink;

    use super::*;

    #[test]
    fn window_report_flags_starved_labels() {
        let sink = Arc::new(MemorySink::new());
        let stats = Stats::new(4, sink.clone());
        stats.feed(0, 8);
        stats.feed(3, 8);
        stats.feed(0, 4);
        stats.record_release(8);
        assert_eq!(sink.count("batch_stats"), 0);
        stats.feed(3, 4);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let Event::BatchStats(r) = &events[0] else {
            panic!("unexpected event {events:?}");
        };
        assert_eq!((r.min_label, r.max_label), (0, 3));
        assert_eq!(r.zero_labels, vec![1, 2]);
        assert_eq!(r.avg_batch_size, 6.0);
        assert_eq!(r.samples, 24);
        assert_eq!(r.replied, 8);
        assert_eq!(r.in_queue, 16);
    }

    #[test]
    fn window_resets_but_totals_persist() {
        let stats = Stats::new(2, Arc::new(MemorySink::new()));
        stats.feed(1, 5);
        stats.feed(1, 5);
        stats.feed(2, 3);
        stats.record_release(10);

        let s = stats.snapshot();
        assert_eq!(s.window_feeds, 1);
        assert_eq!(s.window_fills.get(&2), Some(&1));
        assert_eq!(s.window_fills.get(&1), None);
        assert_eq!(s.total_samples, 13);
        assert_eq!(s.in_queue(), 3);
    }
}
