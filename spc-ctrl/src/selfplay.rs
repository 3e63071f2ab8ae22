//! Self-play sub-controller: current version, per-version records and the
//! shared resign threshold.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use spc_core::{ClientInfo, Config, GameResult, ModelPair, ModelVersion, Record, Request};
use spc_logging::{hash_config_bytes, Event, EventSink, SelfplayProgressV1, VersionSwitchV1};
use spc_replay::{PendingShard, ShardWriter, ShardWriterConfig};

use crate::record::SelfPlayRecord;
use crate::resign::ResignThresholdCalculator;
use crate::CtrlError;

/// Lifetime progress is reported every this many self-play games.
const PROGRESS_EVERY: u64 = 1000;

/// What happened to a fed game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Accepted,
    /// Not a self-play game; only the resign statistics saw it.
    NotSelfPlay,
    /// Played with a version other than the current one.
    StaleVersion,
    /// Current version, but no record exists for it.
    UnknownVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleStatus {
    /// The asked version is older than the current one.
    VersionOld,
    /// No current version record to judge by.
    VersionInvalid,
    Insufficient,
    Sufficient,
}

struct State {
    curr_ver: Option<ModelVersion>,
    records: HashMap<ModelVersion, SelfPlayRecord>,
    total_selfplay: u64,
}

pub struct SelfPlaySubCtrl {
    cfg: Config,
    state: Mutex<State>,
    calc: Mutex<ResignThresholdCalculator>,
    writer: ShardWriter,
    sink: Arc<dyn EventSink>,
}

impl SelfPlaySubCtrl {
    pub fn new(cfg: &Config, sink: Arc<dyn EventSink>) -> Result<Self, CtrlError> {
        let calc = ResignThresholdCalculator::from_config(&cfg.resign)?;
        let config_hash = serde_json::to_vec(cfg).ok().map(|b| hash_config_bytes(&b));
        let writer = ShardWriter::new(ShardWriterConfig {
            out_dir: PathBuf::from(&cfg.records.out_dir),
            config_hash,
        })?;
        Ok(Self {
            cfg: cfg.clone(),
            state: Mutex::new(State {
                curr_ver: None,
                records: HashMap::new(),
                total_selfplay: 0,
            }),
            calc: Mutex::new(calc),
            writer,
            sink,
        })
    }

    /// Account one finished game.
    ///
    /// Every game feeds the resign statistics. Only current-version self-play
    /// games reach the per-version record; a checkpoint shard is written after
    /// the state lock is released.
    pub fn feed(
        &self,
        req: &Request,
        res: &GameResult,
        record: Record,
    ) -> Result<FeedOutcome, CtrlError> {
        self.calc.lock().unwrap().feed(req, res);

        let pending: Option<PendingShard<Record>> = {
            let mut st = self.state.lock().unwrap();
            let ver = match req.vers {
                ModelPair::SelfPlay { ver } => ver,
                _ => return Ok(FeedOutcome::NotSelfPlay),
            };
            if st.curr_ver != Some(ver) {
                return Ok(FeedOutcome::StaleVersion);
            }
            let Some(rec) = st.records.get_mut(&ver) else {
                return Ok(FeedOutcome::UnknownVersion);
            };
            rec.feed(req, res, record);
            let pending = rec.check_and_save();

            st.total_selfplay += 1;
            if st.total_selfplay % PROGRESS_EVERY == 0 {
                let resign = self.calc.lock().unwrap().summary();
                self.sink.emit(&Event::SelfplayProgress(SelfplayProgressV1 {
                    total_selfplay: st.total_selfplay,
                    resign,
                }));
            }
            pending
        };

        if let Some(shard) = pending {
            let path = shard.write(&self.writer)?;
            eprintln!(
                "spc-ctrl: saved {} records to {}",
                shard.records.len(),
                path.display()
            );
        }
        Ok(FeedOutcome::Accepted)
    }

    /// Switch the current version. Returns `false` when `ver` already is current.
    ///
    /// A version seen for the first time gets a record seeded with a freshly
    /// updated resign threshold.
    pub fn set_current_version(&self, ver: ModelVersion) -> bool {
        let mut st = self.state.lock().unwrap();
        if st.curr_ver == Some(ver) {
            return false;
        }
        let from = st.curr_ver.replace(ver);
        if !st.records.contains_key(&ver) {
            let thres = self
                .calc
                .lock()
                .unwrap()
                .update_threshold(self.cfg.resign.max_delta);
            let mut rec = SelfPlayRecord::new(ver, &self.cfg, Arc::clone(&self.sink));
            rec.set_resign_threshold(thres);
            st.records.insert(ver, rec);
        }
        let resign_threshold = st.records[&ver].resign_threshold();
        self.sink.emit(&Event::VersionSwitch(VersionSwitchV1 {
            from,
            to: ver,
            resign_threshold,
        }));
        true
    }

    /// Whether the current version still needs games. Any `ver` at or above
    /// the current one is judged by the current record.
    pub fn need_more_samples(&self, ver: ModelVersion) -> SampleStatus {
        let st = self.state.lock().unwrap();
        if matches!(st.curr_ver, Some(curr) if ver < curr) {
            return SampleStatus::VersionOld;
        }
        match st.curr_ver.and_then(|curr| st.records.get(&curr)) {
            None => SampleStatus::VersionInvalid,
            Some(rec) if rec.need_wait_for_more_sample() => SampleStatus::Insufficient,
            Some(_) => SampleStatus::Sufficient,
        }
    }

    /// Training consumed a batch of the current version's samples.
    pub fn notify_current_weight_update(&self) -> Result<(), CtrlError> {
        let mut st = self.state.lock().unwrap();
        let curr = st.curr_ver.ok_or(CtrlError::NoCurrentVersion)?;
        let rec = st
            .records
            .get_mut(&curr)
            .ok_or(CtrlError::NoCurrentVersion)?;
        rec.notify_weight_update();
        Ok(())
    }

    pub fn current_version(&self) -> Option<ModelVersion> {
        self.state.lock().unwrap().curr_ver
    }

    /// Threshold the current version hands out, if there is one.
    pub fn resign_threshold(&self) -> Option<f32> {
        let st = self.state.lock().unwrap();
        st.curr_ver
            .and_then(|v| st.records.get(&v))
            .map(|r| r.resign_threshold())
    }

    pub fn num_selfplay_current_version(&self) -> u64 {
        let st = self.state.lock().unwrap();
        st.curr_ver
            .and_then(|v| st.records.get(&v))
            .map_or(0, |r| r.n())
    }

    pub fn total_selfplay(&self) -> u64 {
        self.state.lock().unwrap().total_selfplay
    }

    pub fn fill_in_request(&self, client: &ClientInfo, req: &mut Request) {
        let st = self.state.lock().unwrap();
        let Some(ver) = st.curr_ver else {
            req.vers = ModelPair::Wait;
            return;
        };
        req.vers = ModelPair::SelfPlay { ver };
        req.search = self.cfg.search.clone();
        if let Some(rec) = st.records.get(&ver) {
            rec.fill_in_request(client, req);
        }
    }
}
