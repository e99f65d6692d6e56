//! Configuration and statistics serialization tests.

use mipsrec_core::{Config, Stats};
use pretty_assertions::assert_eq;

#[test]
fn defaults() {
    let config = Config::default();
    assert!(config.first_pass);
    assert!(!config.trace_blocks);
    assert_eq!(config.max_block_words, 4096);
}

#[test]
fn deserializes_partial_json() {
    let config: Config =
        serde_json::from_str(r#"{ "first_pass": false, "max_block_words": 128 }"#)
            .expect("valid config");
    assert!(!config.first_pass);
    assert_eq!(config.max_block_words, 128);
    assert!(!config.trace_blocks, "unset fields keep their defaults");
}

#[test]
fn stats_serialize_as_counters() {
    let stats = Stats::default();
    let json = serde_json::to_value(&stats).expect("serializable stats");
    assert_eq!(json["blocks_compiled"], 0);
    assert_eq!(json["lut_invalidations"], 0);
}
