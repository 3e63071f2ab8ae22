//! Drives the sub-controller the way a training loop does: hand out requests,
//! feed simulated games, bump the version once enough samples arrived.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use spc_core::{ClientInfo, Config, GameResult, ModelPair, Record, Request};
use spc_ctrl::{FeedOutcome, SampleStatus, SelfPlaySubCtrl};
use spc_logging::MemorySink;

fn play(rng: &mut ChaCha8Rng, req: &Request) -> GameResult {
    let black_won = rng.gen_bool(0.55);
    let never_resign = rng.gen::<f32>() < req.never_resign_prob;
    let n = rng.gen_range(20..350u32);
    let values = (0..n).map(|_| rng.gen_range(-0.95f32..0.95)).collect();
    let reward = match (black_won, never_resign) {
        (true, true) => 0.5,
        (true, false) => 1.0,
        (false, true) => -0.5,
        (false, false) => -1.0,
    };
    GameResult {
        reward,
        values,
        num_move: n,
        never_resign,
    }
}

#[test]
fn three_iterations_of_selfplay_and_training() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::default();
    cfg.records.out_dir = dir.path().to_string_lossy().into_owned();
    cfg.server.server_id = "it".to_string();
    cfg.server.time_signature = "0".to_string();
    cfg.selfplay.init_num = 40;
    cfg.selfplay.update_num = 20;
    cfg.selfplay.never_resign_prob = 0.5;
    cfg.resign.hist_size = 50;
    cfg.resign.fp_rate = 0.1;
    cfg.resign.max_delta = 0.05;

    let sink = Arc::new(MemorySink::new());
    let ctrl = SelfPlaySubCtrl::new(&cfg, sink.clone()).unwrap();
    let client = ClientInfo::new("worker-0");
    let mut rng = ChaCha8Rng::seed_from_u64(3);

    for ver in 0..3i64 {
        assert!(ctrl.set_current_version(ver));
        let mut games = 0u64;
        for round in 0..2 {
            if round == 1 {
                ctrl.notify_current_weight_update().unwrap();
            }
            while ctrl.need_more_samples(ver) == SampleStatus::Insufficient {
                let mut req = Request::default();
                ctrl.fill_in_request(&client, &mut req);
                assert_eq!(req.vers, ModelPair::SelfPlay { ver });
                let t = req.resign_threshold;
                assert!((cfg.resign.lower_bound..=cfg.resign.upper_bound).contains(&t));

                let res = play(&mut rng, &req);
                let rec = Record {
                    game_id: games,
                    ..Record::default()
                };
                assert_eq!(ctrl.feed(&req, &res, rec).unwrap(), FeedOutcome::Accepted);
                games += 1;
            }
            assert_eq!(ctrl.need_more_samples(ver), SampleStatus::Sufficient);
        }
        // 40 initial plus 20 for the consumed update.
        assert_eq!(games, 60);
        assert_eq!(ctrl.num_selfplay_current_version(), 60);
    }

    assert_eq!(ctrl.total_selfplay(), 180);
    assert_eq!(ctrl.need_more_samples(1), SampleStatus::VersionOld);

    // Checkpoints at 40 and 60 for each version.
    let shards = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "ndjson"))
        .count();
    assert_eq!(shards, 6);
    assert_eq!(sink.count("version_switch"), 3);
}
