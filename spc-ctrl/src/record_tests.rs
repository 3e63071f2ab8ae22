use std::sync::Arc;

use spc_core::{ClientInfo, Config, GameResult, Record, Request};
use spc_logging::{Event, MemorySink};

use crate::record::SelfPlayRecord;

fn config(init: i64, update: i64) -> Config {
    let mut cfg = Config::default();
    cfg.server.server_id = "s1".to_string();
    cfg.server.time_signature = "t0".to_string();
    cfg.selfplay.init_num = init;
    cfg.selfplay.update_num = update;
    cfg
}

fn game(reward: f32, num_move: u32) -> GameResult {
    GameResult {
        reward,
        values: vec![0.0; num_move as usize],
        num_move,
        never_resign: false,
    }
}

fn feed_n(rec: &mut SelfPlayRecord, n: u64) {
    let req = Request::selfplay(rec.version(), 0.1);
    for i in 0..n {
        rec.feed(
            &req,
            &game(0.5, 10),
            Record {
                game_id: i,
                ..Record::default()
            },
        );
    }
}

#[test]
fn outcomes_resigns_and_move_buckets() {
    let sink = Arc::new(MemorySink::new());
    let mut rec = SelfPlayRecord::new(4, &config(0, 0), sink);
    let req = Request::selfplay(4, 0.1);
    for (reward, moves) in [(1.0, 50), (-1.0, 150), (0.5, 250), (-0.3, 300), (-1.05, 99)] {
        rec.feed(&req, &game(reward, moves), Record::default());
    }
    let s = rec.stats();
    assert_eq!((s.black_win, s.white_win), (2, 3));
    assert_eq!(s.white_resign, 1);
    assert_eq!(s.black_resign, 2);
    assert_eq!(s.moves, [2, 1, 1, 1]);
    assert_eq!(s.no_resign(), 2);
    assert_eq!(rec.n(), 5);
    assert_eq!(rec.prefix(), "selfplay-s1-t0-4");
}

#[test]
fn summary_is_emitted_every_n_games() {
    let sink = Arc::new(MemorySink::new());
    let mut cfg = config(0, 0);
    cfg.selfplay.summary_every = 3;
    let mut rec = SelfPlayRecord::new(1, &cfg, sink.clone());
    feed_n(&mut rec, 7);
    assert_eq!(sink.count("record_stats"), 2);
    match sink.events().last() {
        Some(Event::RecordStats(s)) => assert_eq!(s.games(), 6),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn checkpoints_follow_init_and_update_counts() {
    let sink = Arc::new(MemorySink::new());
    let mut rec = SelfPlayRecord::new(1, &config(5, 3), sink);
    let mut hits = Vec::new();
    for n in 1..=12 {
        feed_n(&mut rec, 1);
        if let Some(shard) = rec.check_and_save() {
            hits.push((n, shard.idx, shard.records.len()));
        }
    }
    assert_eq!(hits, vec![(5, 0, 5), (8, 1, 3), (11, 2, 3)]);
    assert_eq!(rec.buffered(), 1);
}

#[test]
fn checkpoints_fall_back_to_every_thousand() {
    let sink = Arc::new(MemorySink::new());
    let mut rec = SelfPlayRecord::new(1, &config(0, 0), sink);
    assert!(!rec.is_check_point());
    feed_n(&mut rec, 999);
    assert!(!rec.is_check_point());
    feed_n(&mut rec, 1);
    assert!(rec.is_check_point());
    let shard = rec.check_and_save().unwrap();
    assert_eq!(shard.records.len(), 1000);
}

#[test]
fn waits_for_initial_then_per_update_samples() {
    let sink = Arc::new(MemorySink::new());

    let rec = SelfPlayRecord::new(1, &config(0, 10), sink.clone());
    assert!(!rec.need_wait_for_more_sample());

    let mut rec = SelfPlayRecord::new(1, &config(4, 2), sink.clone());
    assert!(rec.need_wait_for_more_sample());
    feed_n(&mut rec, 4);
    assert!(!rec.need_wait_for_more_sample());

    rec.notify_weight_update();
    rec.notify_weight_update();
    assert_eq!(rec.weight_updates(), 2);
    // needs 4 + 2 * 2 = 8
    feed_n(&mut rec, 3);
    assert!(rec.need_wait_for_more_sample());
    feed_n(&mut rec, 1);
    assert!(!rec.need_wait_for_more_sample());

    let mut rec = SelfPlayRecord::new(1, &config(2, 0), sink);
    feed_n(&mut rec, 2);
    rec.notify_weight_update();
    assert!(!rec.need_wait_for_more_sample());
}

#[test]
fn request_carries_record_parameters() {
    let mut cfg = config(0, 0);
    cfg.selfplay.never_resign_prob = 0.25;
    cfg.selfplay.selfplay_async = true;
    let mut rec = SelfPlayRecord::new(2, &cfg, Arc::new(MemorySink::new()));
    rec.set_resign_threshold(0.07);

    let mut req = Request::default();
    rec.fill_in_request(&ClientInfo::new("w0"), &mut req);
    assert_eq!(req.resign_threshold, 0.07);
    assert_eq!(req.never_resign_prob, 0.25);
    assert!(req.is_async);
}
