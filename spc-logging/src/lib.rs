//! spc-logging: NDJSON events + the observability sink seam.
//!
//! Components never print directly; they receive an [`EventSink`] at
//! construction and emit typed [`Event`]s. The sink decides whether an event
//! becomes an NDJSON line, a human-readable stdout line, or a test capture.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn now_ms() -> u64 {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    d.as_millis() as u64
}

pub fn hash_config_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub fn read_json<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T, NdjsonError> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice::<T>(&bytes)?)
}

/// Write pretty JSON via a `.tmp` sibling + rename so readers never see a partial file.
pub fn write_json_atomic<T: Serialize>(path: impl AsRef<Path>, v: &T) -> Result<(), NdjsonError> {
    let path = path.as_ref();
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(v)?;
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Batch occupancy summary for one stats window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStatsV1 {
    pub min_label: u32,
    pub max_label: u32,
    /// Labels inside `[min_label, max_label]` that were never filled in this window.
    pub zero_labels: Vec<u32>,
    pub avg_batch_size: f32,
    pub samples: u64,
    pub replied: u64,
    pub in_queue: u64,
}

/// Per model version game statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordStatsV1 {
    pub ver: i64,
    pub black_win: u64,
    pub white_win: u64,
    pub black_resign: u64,
    pub white_resign: u64,
    pub resign_threshold: f32,
    /// Move-length buckets `[0,100)`, `[100,200)`, `[200,300)`, `[300,inf)`.
    pub moves: [u64; 4],
}

impl RecordStatsV1 {
    pub fn games(&self) -> u64 {
        self.black_win + self.white_win
    }

    pub fn no_resign(&self) -> u64 {
        self.games() - self.black_resign - self.white_resign
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResignSummaryV1 {
    pub threshold: f32,
    pub fp_target: f32,
    pub games: u64,
    pub black_wins: u64,
    pub never_resign_games: u64,
    pub never_resign_black_wins: u64,
    pub window_games: u64,
    pub window_fp: u64,
    pub window_black_wins: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelfplayProgressV1 {
    pub total_selfplay: u64,
    pub resign: ResignSummaryV1,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionSwitchV1 {
    pub from: Option<i64>,
    pub to: i64,
    pub resign_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportWarningV1 {
    pub component: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    BatchStats(BatchStatsV1),
    RecordStats(RecordStatsV1),
    SelfplayProgress(SelfplayProgressV1),
    VersionSwitch(VersionSwitchV1),
    TransportWarning(TransportWarningV1),
}

impl Event {
    pub fn transport_warning(component: impl Into<String>, message: impl Into<String>) -> Self {
        Event::TransportWarning(TransportWarningV1 {
            component: component.into(),
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::BatchStats(_) => "batch_stats",
            Event::RecordStats(_) => "record_stats",
            Event::SelfplayProgress(_) => "selfplay_progress",
            Event::VersionSwitch(_) => "version_switch",
            Event::TransportWarning(_) => "transport_warning",
        }
    }
}

fn pct(num: u64, den: u64) -> f64 {
    num as f64 * 100.0 / (den as f64 + 1e-10)
}

impl fmt::Display for ResignSummaryV1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resign threshold: {}, FP Target: {}, #game {}, Black win: {} ({:.2}%), \
             #game never resign: {} ({:.2}%), Black win: {} ({:.2}%), \
             #game in buffer: {}, #game fp in buffer: {} ({:.2}%)",
            self.threshold,
            self.fp_target,
            self.games,
            self.black_wins,
            pct(self.black_wins, self.games),
            self.never_resign_games,
            pct(self.never_resign_games, self.games),
            self.never_resign_black_wins,
            pct(self.never_resign_black_wins, self.never_resign_games),
            self.window_games,
            self.window_fp,
            pct(self.window_fp, self.window_games),
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::BatchStats(s) => {
                if !s.zero_labels.is_empty() {
                    let zeros: Vec<String> = s.zero_labels.iter().map(|l| l.to_string()).collect();
                    writeln!(f, "zero entry: {}", zeros.join(","))?;
                }
                write!(
                    f,
                    "Avg batchsize: {:.2}, #sample: {}, #replied: {}, #in_queue: {}",
                    s.avg_batch_size, s.samples, s.replied, s.in_queue
                )
            }
            Event::RecordStats(s) => {
                let n = s.games();
                writeln!(f, "=== Record Stats ({}) ====", s.ver)?;
                writeln!(
                    f,
                    "B/W/A: {}/{}/{} ({:.2}%). B #Resign: {} ({:.2}%), W #Resign: {} ({:.2}%), #NoResign: {} ({:.2}%)",
                    s.black_win,
                    s.white_win,
                    n,
                    pct(s.black_win, n),
                    s.black_resign,
                    pct(s.black_resign, n),
                    s.white_resign,
                    pct(s.white_resign, n),
                    s.no_resign(),
                    pct(s.no_resign(), n),
                )?;
                writeln!(f, "Dynamic resign threshold: {}", s.resign_threshold)?;
                writeln!(
                    f,
                    "Move: [0, 100): {}, [100, 200): {}, [200, 300): {}, [300, up): {}",
                    s.moves[0], s.moves[1], s.moves[2], s.moves[3]
                )?;
                write!(f, "=== End Record Stats ====")
            }
            Event::SelfplayProgress(p) => write!(
                f,
                "SelfPlaySubCtrl: #total selfplay feeded: {}, {}",
                p.total_selfplay, p.resign
            ),
            Event::VersionSwitch(v) => match v.from {
                Some(from) => write!(f, "SelfPlay: {} -> {} (resign threshold {})", from, v.to, v.resign_threshold),
                None => write!(f, "SelfPlay: none -> {} (resign threshold {})", v.to, v.resign_threshold),
            },
            Event::TransportWarning(w) => write!(f, "[{}] {}", w.component, w.message),
        }
    }
}

/// Observability side channel. Implementations must never block for long.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) {}
}

/// Prints the human-readable form of each event.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: &Event) {
        println!("{} {}", now_ms(), event);
    }
}

/// Keeps events in memory; used by tests and by embedders that poll.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[derive(Serialize)]
struct StampedEvent<'a> {
    ts_ms: u64,
    #[serde(flatten)]
    event: &'a Event,
}

/// Appends each event as one NDJSON line stamped with `ts_ms`.
pub struct NdjsonSink {
    w: Mutex<NdjsonWriter>,
}

impl NdjsonSink {
    pub fn open_append(path: impl AsRef<Path>, flush_every_lines: u64) -> Result<Self, NdjsonError> {
        Ok(Self {
            w: Mutex::new(NdjsonWriter::open_append_with_flush(path, flush_every_lines)?),
        })
    }

    pub fn flush(&self) -> Result<(), NdjsonError> {
        self.w.lock().unwrap().flush()
    }
}

impl EventSink for NdjsonSink {
    fn emit(&self, event: &Event) {
        let stamped = StampedEvent {
            ts_ms: now_ms(),
            event,
        };
        // Observability must not fail the caller; a lost line is acceptable.
        let _ = self.w.lock().unwrap().write_event(&stamped);
    }
}

#[derive(Debug, Error)]
pub enum NdjsonError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only NDJSON writer.
///
/// Contract: each call writes exactly one JSON object followed by a newline.
pub struct NdjsonWriter {
    w: BufWriter<File>,
    lines_since_flush: u64,
    flush_every_lines: u64,
}

impl NdjsonWriter {
    /// Open a file for append. Creates it if it doesn't exist.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self, NdjsonError> {
        Self::open_append_with_flush(path, 0)
    }

    /// `flush_every_lines=0` disables periodic flushing.
    pub fn open_append_with_flush(
        path: impl AsRef<Path>,
        flush_every_lines: u64,
    ) -> Result<Self, NdjsonError> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            w: BufWriter::new(f),
            lines_since_flush: 0,
            flush_every_lines,
        })
    }

    pub fn write_event<T: Serialize>(&mut self, event: &T) -> Result<(), NdjsonError> {
        let mut buf = serde_json::to_vec(event)?;
        buf.push(b'\n');
        self.w.write_all(&buf)?;
        self.lines_since_flush += 1;
        if self.flush_every_lines > 0 && self.lines_since_flush >= self.flush_every_lines {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), NdjsonError> {
        self.w.flush()?;
        self.lines_since_flush = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use serde_json::Value;

    fn read_ndjson_lenient(path: &Path) -> Vec<Value> {
        let s = fs::read_to_string(path).expect("read");
        let mut out = Vec::new();
        for line in s.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(v) = serde_json::from_str::<Value>(line) {
                out.push(v);
            }
        }
        out
    }

    fn switch_event(to: i64) -> Event {
        Event::VersionSwitch(VersionSwitchV1 {
            from: None,
            to,
            resign_threshold: 0.05,
        })
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn writes_one_valid_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let mut w = NdjsonWriter::open_append(&path).unwrap();

        #[derive(Serialize)]
        struct E {
            event: &'static str,
            x: u32,
        }

        w.write_event(&E { event: "e", x: 1 }).unwrap();
        w.write_event(&E { event: "e", x: 2 }).unwrap();
        w.flush().unwrap();

        let vals = read_ndjson_lenient(&path);
        assert_eq!(vals.len(), 2);
        assert_eq!(vals[0]["x"], 1);
        assert_eq!(vals[1]["x"], 2);
    }

    #[test]
    fn ndjson_sink_tags_and_stamps_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let sink = NdjsonSink::open_append(&path, 0).unwrap();
        sink.emit(&switch_event(3));
        sink.emit(&Event::transport_warning("receiver", "unknown peer"));
        sink.flush().unwrap();

        let vals = read_ndjson_lenient(&path);
        assert_eq!(vals.len(), 2);
        assert_eq!(vals[0]["event"], "version_switch");
        assert_eq!(vals[0]["to"], 3);
        assert!(vals[0]["ts_ms"].as_u64().unwrap() > 0);
        assert_eq!(vals[1]["event"], "transport_warning");
        assert_eq!(vals[1]["component"], "receiver");
    }

    #[test]
    fn lenient_reader_tolerates_trailing_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");

        {
            let sink = NdjsonSink::open_append(&path, 1).unwrap();
            sink.emit(&switch_event(1));
        }

        // Simulate crash: append a partial JSON line (no newline, invalid JSON).
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(br#"{"event":"version_switch","to":"#).unwrap();
        f.flush().unwrap();

        let vals = read_ndjson_lenient(&path);
        assert_eq!(vals.len(), 1);
        assert_eq!(vals[0]["to"], 1);
    }

    #[test]
    fn memory_sink_counts_by_name() {
        let sink = MemorySink::new();
        sink.emit(&switch_event(1));
        sink.emit(&switch_event(2));
        sink.emit(&Event::transport_warning("sender", "late reply"));
        assert_eq!(sink.count("version_switch"), 2);
        assert_eq!(sink.count("transport_warning"), 1);
        assert_eq!(sink.take().len(), 3);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn record_stats_display_reports_rates() {
        let e = Event::RecordStats(RecordStatsV1 {
            ver: 4,
            black_win: 3,
            white_win: 1,
            black_resign: 1,
            white_resign: 2,
            resign_threshold: 0.05,
            moves: [1, 2, 1, 0],
        });
        let s = e.to_string();
        assert!(s.contains("=== Record Stats (4) ===="));
        assert!(s.contains("B/W/A: 3/1/4"));
        assert!(s.contains("#NoResign: 1"));
    }

    #[test]
    fn json_write_is_atomic_wrt_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        write_json_atomic(&path, &serde_json::json!({"n": 1})).unwrap();

        // A stale tmp file from a crashed writer must not affect reads.
        fs::write(path.with_extension("json.tmp"), b"{not valid json").unwrap();
        let got: Value = read_json(&path).unwrap();
        assert_eq!(got["n"], 1);

        write_json_atomic(&path, &serde_json::json!({"n": 2})).unwrap();
        let got: Value = read_json(&path).unwrap();
        assert_eq!(got["n"], 2);
    }

    #[test]
    fn config_hash_is_stable() {
        assert_eq!(hash_config_bytes(b"a: 1"), hash_config_bytes(b"a: 1"));
        assert_ne!(hash_config_bytes(b"a: 1"), hash_config_bytes(b"a: 2"));
    }
}
