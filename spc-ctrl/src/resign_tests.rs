use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use spc_core::{GameResult, Request, ResignConfig};

use crate::resign::{ResignThresholdCalculator, ResignWindowEntry};
use crate::CtrlError;

/// Never-resign game black won, where black's tightest value was `min_value`.
fn forced_black_win(min_value: f32) -> GameResult {
    GameResult {
        reward: 1.0,
        values: vec![min_value - 1.0, -0.9, 0.9],
        num_move: 3,
        never_resign: true,
    }
}

fn calc(hist: usize, fp: f32, initial: f32) -> ResignThresholdCalculator {
    ResignThresholdCalculator::new(hist, fp, initial, 0.0, 2.0).unwrap()
}

#[test]
fn constructor_rejects_bad_parameters() {
    let bad = [
        (0, 0.05, 0.0, 1.0),
        (10, 0.0, 0.0, 1.0),
        (10, 1.0, 0.0, 1.0),
        (10, 0.05, -0.1, 1.0),
        (10, 0.05, 0.6, 0.5),
        (10, 0.05, 0.0, 2.5),
    ];
    for (hist, fp, lo, hi) in bad {
        assert!(matches!(
            ResignThresholdCalculator::new(hist, fp, 0.1, lo, hi),
            Err(CtrlError::InvalidResignConfig(_))
        ));
    }
    assert!(ResignThresholdCalculator::from_config(&ResignConfig::default()).is_ok());
}

#[test]
fn ordinary_games_only_count_wins() {
    let mut c = calc(10, 0.2, 0.1);
    let req = Request::selfplay(1, 0.1);
    c.feed(
        &req,
        &GameResult {
            reward: 1.0,
            values: vec![0.0; 4],
            num_move: 4,
            never_resign: false,
        },
    );
    c.feed(
        &req,
        &GameResult {
            reward: -1.0,
            never_resign: false,
            ..GameResult::default()
        },
    );
    let s = c.summary();
    assert_eq!((s.games, s.black_wins), (2, 1));
    assert_eq!(s.never_resign_games, 0);
    assert_eq!(c.window_len(), 0);
}

#[test]
fn min_value_reads_only_the_winners_moves() {
    let req = Request::selfplay(1, 0.3);
    // Black won: indices 0, 2 are black's. Odd entries must be ignored.
    let black = GameResult {
        reward: 1.0,
        values: vec![-0.5, -0.99, 0.2],
        num_move: 3,
        never_resign: true,
    };
    let e = ResignWindowEntry::from_game(&req, &black);
    assert!((e.min_value - 0.5).abs() < 1e-6);
    assert!(e.black_won);
    assert!(!e.false_positive);

    // White won: indices 1, 3 are white's, measured as 1 - v.
    let white = GameResult {
        reward: -1.0,
        values: vec![-0.99, 0.8, 0.9, 0.1],
        num_move: 4,
        never_resign: true,
    };
    let e = ResignWindowEntry::from_game(&req, &white);
    assert!((e.min_value - 0.2).abs() < 1e-6);
    assert!(!e.black_won);
    assert!(e.false_positive);

    // No winner moves at all keeps the sentinel.
    let empty = GameResult {
        reward: -1.0,
        values: vec![0.0],
        num_move: 1,
        never_resign: true,
    };
    assert_eq!(ResignWindowEntry::from_game(&req, &empty).min_value, 2.0);
}

#[test]
fn window_is_bounded_fifo_with_lockstep_counters() {
    let mut c = calc(3, 0.2, 0.1);
    // Threshold 0.6 marks min values below it as false positives.
    let req = Request::selfplay(1, 0.6);
    for m in [0.5, 0.9, 0.4, 1.2, 1.5] {
        c.feed(&req, &forced_black_win(m));
        assert!(c.window_len() <= 3);
    }
    let kept: Vec<f32> = c.window().map(|e| e.min_value).collect();
    let want = [0.4f32, 1.2, 1.5];
    for (k, w) in kept.iter().zip(want) {
        assert!((k - w).abs() < 1e-6, "{kept:?}");
    }
    let s = c.summary();
    assert_eq!(s.window_games, 3);
    assert_eq!(s.window_fp, 1);
    assert_eq!(s.window_black_wins, 3);
    assert_eq!(s.never_resign_games, 5);
    assert_eq!(s.never_resign_black_wins, 5);
}

#[test]
fn small_window_keeps_threshold() {
    let mut c = calc(100, 0.05, 0.25);
    let req = Request::selfplay(1, 0.25);
    for i in 0..30 {
        c.feed(&req, &forced_black_win(0.01 * i as f32));
    }
    // floor(0.05 * 30) = 1 < 2
    assert_eq!(c.update_threshold(1.0), 0.25);

    let mut c = calc(100, 0.95, 0.25);
    for i in 0..30 {
        c.feed(&req, &forced_black_win(0.01 * i as f32));
    }
    // floor(0.95 * 30) = 28, 28 + 2 >= 30
    assert_eq!(c.update_threshold(1.0), 0.25);
}

#[test]
fn quantile_of_ten_games_is_rate_limited() {
    let mins = [0.9, 0.85, 0.8, 0.75, 0.7, 0.65, 0.6, 0.55, 0.5, 0.45];
    let req = Request::selfplay(1, 0.0);

    // Ascending order statistic at index 2 of the window is 0.55.
    let mut c = calc(10, 0.2, 0.5);
    for m in mins {
        c.feed(&req, &forced_black_win(m));
    }
    let t = c.update_threshold(0.01);
    assert!((t - 0.51).abs() < 1e-5, "{t}");

    let mut c = calc(10, 0.2, 0.6);
    for m in mins {
        c.feed(&req, &forced_black_win(m));
    }
    let t = c.update_threshold(1.0);
    assert!((t - 0.55).abs() < 1e-5, "{t}");

    let mut c = ResignThresholdCalculator::new(10, 0.2, 0.3, 0.0, 0.3).unwrap();
    for m in mins {
        c.feed(&req, &forced_black_win(m));
    }
    assert_eq!(c.update_threshold(1.0), 0.3);
}

#[test]
fn updates_stay_in_bounds_and_within_delta() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let (lo, hi, delta) = (0.05f32, 0.5f32, 0.02f32);
    let mut c = ResignThresholdCalculator::new(200, 0.05, 0.2, lo, hi).unwrap();
    let mut prev = c.threshold();
    for _ in 0..2000 {
        let req = Request::selfplay(1, prev);
        let black_won = rng.gen_range(0..2) == 0;
        let values: Vec<f32> = (0..rng.gen_range(1..40))
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect();
        c.feed(
            &req,
            &GameResult {
                reward: if black_won { 1.0 } else { -1.0 },
                num_move: values.len() as u32,
                values,
                never_resign: rng.gen_range(0..4) == 0,
            },
        );
        let t = c.update_threshold(delta);
        assert!((lo..=hi).contains(&t), "{t}");
        assert!((t - prev).abs() <= delta + 1e-6, "{prev} -> {t}");
        assert!(c.window_len() <= 200);
        prev = t;
    }
}
