//! spc-core: shared data model (requests, results, records) and configuration.

pub mod config;
pub mod game;

pub use config::{
    Config, ConfigError, FillMode, RecordsConfig, ResignConfig, SearchOptions, SelfplayConfig,
    ServerConfig, TransportConfig,
};
pub use game::{ClientInfo, GameResult, ModelPair, ModelVersion, Record, Request};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_nonempty() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn model_pair_serializes_tagged() {
        let v = serde_json::to_value(ModelPair::SelfPlay { ver: 7 }).unwrap();
        assert_eq!(v["kind"], "self_play");
        assert_eq!(v["ver"], 7);

        let back: ModelPair = serde_json::from_value(v).unwrap();
        assert!(back.is_selfplay());
        assert_eq!(back.black_ver(), Some(7));
        assert_eq!(ModelPair::Wait.black_ver(), None);
    }

    #[test]
    fn request_async_field_uses_wire_name() {
        let mut r = Request::selfplay(3, 0.1);
        r.is_async = true;
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["async"], true);
    }
}
