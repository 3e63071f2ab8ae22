//! Adaptive resign threshold from games that were forced to play out.
//!
//! For every never-resign game the calculator keeps the tightest value the
//! eventual winner showed. The `fp_target` quantile of those values estimates
//! the threshold that would have wrongly resigned that fraction of games.

use std::collections::VecDeque;

use spc_core::{GameResult, Request, ResignConfig};
use spc_logging::ResignSummaryV1;

use crate::CtrlError;

pub const DEFAULT_MAX_DELTA: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResignWindowEntry {
    /// Smallest distance from a sure win the winner showed, in `[0, 2]`.
    pub min_value: f32,
    /// The request's threshold would have resigned this game for the winner.
    pub false_positive: bool,
    pub black_won: bool,
}

impl ResignWindowEntry {
    pub fn from_game(req: &Request, res: &GameResult) -> Self {
        let black_won = res.black_won();
        let first = if black_won { 0 } else { 1 };
        let min_value = res
            .values
            .iter()
            .skip(first)
            .step_by(2)
            .map(|&v| if black_won { 1.0 + v } else { 1.0 - v })
            .fold(2.0f32, f32::min);
        Self {
            min_value,
            false_positive: req.resign_threshold > min_value,
            black_won,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResignThresholdCalculator {
    hist_size: usize,
    fp_target: f32,
    threshold: f32,
    lower: f32,
    upper: f32,

    games: u64,
    black_wins: u64,
    nr_games: u64,
    nr_black_wins: u64,

    window: VecDeque<ResignWindowEntry>,
    window_fp: u64,
    window_black_wins: u64,
}

impl ResignThresholdCalculator {
    pub fn new(
        hist_size: usize,
        fp_target: f32,
        initial: f32,
        lower: f32,
        upper: f32,
    ) -> Result<Self, CtrlError> {
        if hist_size == 0 {
            return Err(CtrlError::InvalidResignConfig("hist_size must be > 0".into()));
        }
        if !(fp_target > 1e-6 && fp_target < 1.0 - 1e-6) {
            return Err(CtrlError::InvalidResignConfig(format!(
                "fp_target {fp_target} outside (0, 1)"
            )));
        }
        if !(0.0 <= lower && lower <= upper && upper <= 2.0) {
            return Err(CtrlError::InvalidResignConfig(format!(
                "bounds [{lower}, {upper}] must satisfy 0 <= lower <= upper <= 2"
            )));
        }
        Ok(Self {
            hist_size,
            fp_target,
            threshold: initial,
            lower,
            upper,
            games: 0,
            black_wins: 0,
            nr_games: 0,
            nr_black_wins: 0,
            window: VecDeque::with_capacity(hist_size),
            window_fp: 0,
            window_black_wins: 0,
        })
    }

    pub fn from_config(cfg: &ResignConfig) -> Result<Self, CtrlError> {
        Self::new(
            cfg.hist_size,
            cfg.fp_rate,
            cfg.initial_threshold,
            cfg.lower_bound,
            cfg.upper_bound,
        )
    }

    pub fn feed(&mut self, req: &Request, res: &GameResult) {
        self.games += 1;
        if res.black_won() {
            self.black_wins += 1;
        }
        if !res.never_resign {
            return;
        }
        self.nr_games += 1;
        if res.black_won() {
            self.nr_black_wins += 1;
        }
        self.push(ResignWindowEntry::from_game(req, res));
    }

    fn push(&mut self, entry: ResignWindowEntry) {
        while self.window.len() >= self.hist_size {
            if let Some(old) = self.window.pop_front() {
                self.count(&old, false);
            }
        }
        self.count(&entry, true);
        self.window.push_back(entry);
    }

    fn count(&mut self, e: &ResignWindowEntry, add: bool) {
        let bump = |c: &mut u64, on: bool| {
            if on {
                if add {
                    *c += 1;
                } else {
                    *c -= 1;
                }
            }
        };
        bump(&mut self.window_fp, e.false_positive);
        bump(&mut self.window_black_wins, e.black_won);
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Move the threshold toward the `fp_target` quantile of the window, by at
    /// most `max_delta`, then clamp to the configured bounds.
    ///
    /// Leaves the threshold alone while the quantile sits within two entries of
    /// either end of the window.
    pub fn update_threshold(&mut self, max_delta: f32) -> f32 {
        let len = self.window.len();
        let position = (self.fp_target * len as f32) as usize;
        if position < 2 || position + 2 >= len {
            return self.threshold;
        }

        let mut values: Vec<f32> = self.window.iter().map(|e| e.min_value).collect();
        let (_, &mut candidate, _) = values.select_nth_unstable_by(position, f32::total_cmp);
        debug_assert!(candidate > -1e-9, "negative winner value {candidate}");

        let old = self.threshold;
        self.threshold = candidate
            .min(old + max_delta)
            .max(old - max_delta)
            .max(self.lower)
            .min(self.upper);
        self.threshold
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Window entries, oldest first.
    pub fn window(&self) -> impl Iterator<Item = &ResignWindowEntry> {
        self.window.iter()
    }

    pub fn summary(&self) -> ResignSummaryV1 {
        ResignSummaryV1 {
            threshold: self.threshold,
            fp_target: self.fp_target,
            games: self.games,
            black_wins: self.black_wins,
            never_resign_games: self.nr_games,
            never_resign_black_wins: self.nr_black_wins,
            window_games: self.window.len() as u64,
            window_fp: self.window_fp,
            window_black_wins: self.window_black_wins,
        }
    }
}
