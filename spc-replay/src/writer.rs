use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::SHARD_FORMAT_VERSION;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("meta: {0}")]
    Meta(#[from] spc_logging::NdjsonError),
    #[error("shard already exists: {0}")]
    Exists(PathBuf),
    #[error("invalid prefix: {0:?}")]
    InvalidPrefix(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardMeta {
    pub shard_format_version: u32,
    pub prefix: String,
    pub shard_idx: u64,
    pub num_records: usize,
    pub created_ts_ms: u64,
    pub config_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ShardWriterConfig {
    pub out_dir: PathBuf,
    pub config_hash: Option<String>,
}

/// Writes record shards as `<prefix>-<idx>.ndjson` + `<prefix>-<idx>.meta.json`.
///
/// Both files go through a `.tmp` sibling and a rename, so a crash leaves at
/// worst a stray tmp file (removed by [`cleanup_tmp_files`] on the next start).
#[derive(Debug)]
pub struct ShardWriter {
    cfg: ShardWriterConfig,
}

impl ShardWriter {
    pub fn new(cfg: ShardWriterConfig) -> Result<Self, ReplayError> {
        fs::create_dir_all(&cfg.out_dir)?;
        cleanup_tmp_files(&cfg.out_dir)?;
        Ok(Self { cfg })
    }

    pub fn out_dir(&self) -> &Path {
        &self.cfg.out_dir
    }

    pub fn write_shard<R: Serialize>(
        &self,
        prefix: &str,
        idx: u64,
        records: &[R],
    ) -> Result<PathBuf, ReplayError> {
        if prefix.is_empty() || prefix.contains(['/', '\\']) {
            return Err(ReplayError::InvalidPrefix(prefix.to_string()));
        }
        let final_path = self.shard_path(prefix, idx);
        if final_path.exists() {
            return Err(ReplayError::Exists(final_path));
        }
        let tmp_path = final_path.with_extension("ndjson.tmp");

        let mut body = Vec::with_capacity(records.len() * 128);
        for r in records {
            serde_json::to_writer(&mut body, r)?;
            body.push(b'\n');
        }
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(&body)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;

        let meta = ShardMeta {
            shard_format_version: SHARD_FORMAT_VERSION,
            prefix: prefix.to_string(),
            shard_idx: idx,
            num_records: records.len(),
            created_ts_ms: spc_logging::now_ms(),
            config_hash: self.cfg.config_hash.clone(),
        };
        spc_logging::write_json_atomic(self.meta_path(prefix, idx), &meta)?;
        Ok(final_path)
    }

    pub fn shard_path(&self, prefix: &str, idx: u64) -> PathBuf {
        self.cfg.out_dir.join(format!("{prefix}-{idx:06}.ndjson"))
    }

    pub fn meta_path(&self, prefix: &str, idx: u64) -> PathBuf {
        self.cfg.out_dir.join(format!("{prefix}-{idx:06}.meta.json"))
    }
}

/// Records drained from a [`RecordBuffer`], waiting to be written.
///
/// Splitting "take" from "write" lets callers drain under a lock and do the
/// file I/O after releasing it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingShard<R> {
    pub prefix: String,
    pub idx: u64,
    pub records: Vec<R>,
}

impl<R: Serialize> PendingShard<R> {
    pub fn write(&self, writer: &ShardWriter) -> Result<PathBuf, ReplayError> {
        writer.write_shard(&self.prefix, self.idx, &self.records)
    }
}

/// In-memory record buffer under a fixed file prefix.
#[derive(Debug, Clone)]
pub struct RecordBuffer<R> {
    prefix: String,
    buf: Vec<R>,
    next_idx: u64,
}

impl<R: Serialize + Clone> RecordBuffer<R> {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            buf: Vec::new(),
            next_idx: 0,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Switch to a new prefix; shard numbering restarts at 0.
    pub fn reset_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
        self.next_idx = 0;
    }

    pub fn feed(&mut self, r: R) {
        self.buf.push(r);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Drain the buffer into a numbered shard. `None` when there is nothing to save.
    pub fn take_current(&mut self) -> Option<PendingShard<R>> {
        if self.buf.is_empty() {
            return None;
        }
        let idx = self.next_idx;
        self.next_idx += 1;
        Some(PendingShard {
            prefix: self.prefix.clone(),
            idx,
            records: std::mem::take(&mut self.buf),
        })
    }

    /// Write the current buffer without clearing it.
    pub fn save_current(&mut self, writer: &ShardWriter) -> Result<Option<PathBuf>, ReplayError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let path = writer.write_shard(&self.prefix, self.next_idx, &self.buf)?;
        self.next_idx += 1;
        Ok(Some(path))
    }
}

pub fn cleanup_tmp_files(dir: &Path) -> Result<(), ReplayError> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let e = entry?;
        let p = e.path();
        if let Some(name) = p.file_name().and_then(|s| s.to_str()) {
            if name.ends_with(".ndjson.tmp") || name.ends_with(".json.tmp") {
                let _ = fs::remove_file(&p);
            }
        }
    }
    Ok(())
}
