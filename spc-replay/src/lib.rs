//! spc-replay: persistence for self-play game records.

pub mod writer;

pub use writer::{
    cleanup_tmp_files, PendingShard, RecordBuffer, ReplayError, ShardMeta, ShardWriter,
    ShardWriterConfig,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod schema {
    /// Bump when the shard file layout changes.
    pub const SHARD_FORMAT_VERSION: u32 = 1;
}
