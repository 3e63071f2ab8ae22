//! Per-version self-play bookkeeping.

use std::sync::Arc;

use spc_core::{ClientInfo, Config, GameResult, ModelVersion, Record, Request};
use spc_logging::{Event, EventSink, RecordStatsV1};
use spc_replay::{PendingShard, RecordBuffer};

/// Upper bounds of the move-count buckets; the last bucket is open.
pub const MOVE_BUCKETS: [u32; 3] = [100, 200, 300];

/// Saves happen every this many games when init/update counts are unset.
const FALLBACK_CHECKPOINT_EVERY: u64 = 1000;

pub struct SelfPlayRecord {
    ver: ModelVersion,
    init_num: i64,
    update_num: i64,
    never_resign_prob: f32,
    is_async: bool,
    summary_every: u64,

    records: RecordBuffer<Record>,

    black_win: u64,
    white_win: u64,
    black_resign: u64,
    white_resign: u64,
    moves: [u64; 4],
    counter: u64,
    last_shown: u64,
    weight_updates: u64,
    resign_threshold: f32,

    sink: Arc<dyn EventSink>,
}

impl SelfPlayRecord {
    pub fn new(ver: ModelVersion, cfg: &Config, sink: Arc<dyn EventSink>) -> Self {
        let prefix = format!(
            "selfplay-{}-{}-{}",
            cfg.server.server_id, cfg.server.time_signature, ver
        );
        Self {
            ver,
            init_num: cfg.selfplay.init_num,
            update_num: cfg.selfplay.update_num,
            never_resign_prob: cfg.selfplay.never_resign_prob,
            is_async: cfg.selfplay.selfplay_async,
            summary_every: cfg.selfplay.summary_every.max(1),
            records: RecordBuffer::new(prefix),
            black_win: 0,
            white_win: 0,
            black_resign: 0,
            white_resign: 0,
            moves: [0; 4],
            counter: 0,
            last_shown: 0,
            weight_updates: 0,
            resign_threshold: 0.0,
            sink,
        }
    }

    pub fn version(&self) -> ModelVersion {
        self.ver
    }

    pub fn prefix(&self) -> &str {
        self.records.prefix()
    }

    pub fn feed(&mut self, _req: &Request, res: &GameResult, record: Record) {
        if res.black_won() {
            self.black_win += 1;
        } else {
            self.white_win += 1;
        }
        // A reward of exactly +-1 means the loser resigned before the end.
        if (res.reward - 1.0).abs() < 0.1 {
            self.white_resign += 1;
        } else if (res.reward + 1.0).abs() < 0.1 {
            self.black_resign += 1;
        }

        self.counter += 1;
        self.records.feed(record);

        let bucket = MOVE_BUCKETS
            .iter()
            .position(|&hi| res.num_move < hi)
            .unwrap_or(MOVE_BUCKETS.len());
        self.moves[bucket] += 1;

        if self.counter - self.last_shown >= self.summary_every {
            self.sink.emit(&Event::RecordStats(self.stats()));
            self.last_shown = self.counter;
        }
    }

    /// Games fed so far.
    pub fn n(&self) -> u64 {
        self.counter
    }

    pub fn is_check_point(&self) -> bool {
        let n = self.counter as i64;
        if self.init_num > 0 && self.update_num > 0 {
            n == self.init_num || (n > self.init_num && (n - self.init_num) % self.update_num == 0)
        } else {
            n > 0 && self.counter % FALLBACK_CHECKPOINT_EVERY == 0
        }
    }

    /// At a checkpoint, drain buffered records into a shard for the caller to write.
    pub fn check_and_save(&mut self) -> Option<PendingShard<Record>> {
        if self.is_check_point() {
            self.records.take_current()
        } else {
            None
        }
    }

    pub fn need_wait_for_more_sample(&self) -> bool {
        if self.init_num <= 0 {
            return false;
        }
        let n = self.counter as i64;
        if n < self.init_num {
            return true;
        }
        if self.update_num <= 0 {
            return false;
        }
        n < self.init_num + self.update_num * self.weight_updates as i64
    }

    /// Training consumed another round of this version's samples.
    pub fn notify_weight_update(&mut self) {
        self.weight_updates += 1;
    }

    pub fn weight_updates(&self) -> u64 {
        self.weight_updates
    }

    pub fn fill_in_request(&self, _client: &ClientInfo, req: &mut Request) {
        req.resign_threshold = self.resign_threshold;
        req.never_resign_prob = self.never_resign_prob;
        req.is_async = self.is_async;
    }

    pub fn resign_threshold(&self) -> f32 {
        self.resign_threshold
    }

    pub fn set_resign_threshold(&mut self, t: f32) {
        self.resign_threshold = t;
    }

    /// Records waiting for the next checkpoint.
    pub fn buffered(&self) -> usize {
        self.records.len()
    }

    pub fn stats(&self) -> RecordStatsV1 {
        RecordStatsV1 {
            ver: self.ver,
            black_win: self.black_win,
            white_win: self.white_win,
            black_resign: self.black_resign,
            white_resign: self.white_resign,
            resign_threshold: self.resign_threshold,
            moves: self.moves,
        }
    }
}
