use statcrab_api::AnalysisEnvironment;
use statcrab_core::combiner::ReduceOp;

fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

/// `shards` pairs of (keys, values) drawn over `num_keys` users.
fn gen_keyed_shards(seed: u64, shards: usize, rows: usize, num_keys: usize) -> Vec<(Vec<String>, Vec<f64>)> {
    let mut state = seed;
    (0..shards)
        .map(|_| {
            let mut keys = Vec::with_capacity(rows);
            let mut values = Vec::with_capacity(rows);
            for _ in 0..rows {
                keys.push(format!("u{}", lcg_next(&mut state) as usize % num_keys));
                values.push((lcg_next(&mut state) % 1000) as f64 / 10.0);
            }
            (keys, values)
        })
        .collect()
}

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_counts_sums_extremes_per_key() {
    let env = AnalysisEnvironment::new().with_parallelism(2);
    let series = env
        .keyed_series(vec![
            (keys(&["a", "b", "a"]), vec![1.0, 2.0, 3.0]),
            (keys(&["b", "c"]), vec![4.0, 9.0]),
        ])
        .unwrap();

    let counts = series.count_per_key().unwrap();
    assert_eq!(
        counts,
        vec![
            ("a".to_string(), 2),
            ("b".to_string(), 2),
            ("c".to_string(), 1)
        ]
    );

    let sums = series.sum_per_key().unwrap();
    assert_eq!(
        sums,
        vec![
            ("a".to_string(), 4.0),
            ("b".to_string(), 6.0),
            ("c".to_string(), 9.0)
        ]
    );

    let mins = series.min_per_key().unwrap();
    assert_eq!(mins[0], ("a".to_string(), 1.0));
    assert_eq!(mins[1], ("b".to_string(), 2.0));
    assert_eq!(mins[2], ("c".to_string(), 9.0));

    let maxes = series.max_per_key().unwrap();
    assert_eq!(maxes[0], ("a".to_string(), 3.0));
    assert_eq!(maxes[1], ("b".to_string(), 4.0));
    assert_eq!(maxes[2], ("c".to_string(), 9.0));
}

#[test]
fn test_mean_and_var_per_key() {
    let env = AnalysisEnvironment::new().with_parallelism(3);
    // "hot" gets 1..=8 spread over three shards, "cold" a single row.
    let series = env
        .keyed_series(vec![
            (keys(&["hot", "hot", "hot"]), vec![1.0, 2.0, 3.0]),
            (keys(&["hot", "cold", "hot"]), vec![4.0, 5.0, 5.0]),
            (keys(&["hot", "hot", "hot"]), vec![6.0, 7.0, 8.0]),
        ])
        .unwrap();

    let stats = series.mean_and_var_per_key().unwrap();
    assert_eq!(stats.len(), 2);

    let (key, (mean, var)) = &stats[0];
    assert_eq!(key, "cold");
    assert!((mean - 5.0).abs() < 1e-9);
    assert!(var.abs() < 1e-9);

    let (key, (mean, var)) = &stats[1];
    assert_eq!(key, "hot");
    assert!((mean - 4.5).abs() < 1e-9, "hot mean {mean}");
    assert!((var - 5.25).abs() < 1e-9, "hot var {var}");
}

#[test]
fn test_key_in_single_shard_carries_through_merges() {
    let env = AnalysisEnvironment::new().with_parallelism(4);
    // "solo" only ever appears in one of six shards.
    let mut shards = vec![
        (keys(&["w", "w"]), vec![1.0, 2.0]);
        5
    ];
    shards.push((keys(&["solo", "w"]), vec![42.0, 3.0]));
    let series = env.keyed_series(shards).unwrap();

    let stats = series.mean_and_var_per_key().unwrap();
    let solo = stats.iter().find(|(k, _)| k == "solo").unwrap();
    assert!((solo.1 .0 - 42.0).abs() < 1e-9);
    assert!(solo.1 .1.abs() < 1e-9);

    let counts = series.count_per_key().unwrap();
    let solo_count = counts.iter().find(|(k, _)| k == "solo").unwrap();
    assert_eq!(solo_count.1, 1);
}

#[test]
fn test_quantiles_per_key() {
    let env = AnalysisEnvironment::new().with_parallelism(2);
    let mut shards = Vec::new();
    // "ramp" holds 0..=100 split across shards, "flat" a constant.
    for chunk in (0..=100).collect::<Vec<i32>>().chunks(30) {
        let values: Vec<f64> = chunk.iter().map(|&v| f64::from(v)).collect();
        shards.push((vec!["ramp".to_string(); values.len()], values));
    }
    shards.push((vec!["flat".to_string(); 50], vec![7.0; 50]));
    let series = env.keyed_series(shards).unwrap();

    let per_key = series.quantiles_per_key(4, 0.01).unwrap();
    assert_eq!(per_key.len(), 2);

    let (key, boundaries) = &per_key[0];
    assert_eq!(key, "flat");
    assert!(boundaries.iter().all(|&b| b == 7.0), "{boundaries:?}");

    let (key, boundaries) = &per_key[1];
    assert_eq!(key, "ramp");
    assert_eq!(boundaries.len(), 3);
    for (k, boundary) in boundaries.iter().enumerate() {
        let target = 25.0 * (k + 1) as f64;
        assert!(
            (boundary - target).abs() <= 5.0,
            "quartile {k}: {boundary} vs {target}"
        );
    }
}

#[test]
fn test_reduce_per_key_rejects_slot_wise_mode() {
    let env = AnalysisEnvironment::new();
    let series = env
        .keyed_series(vec![(keys(&["a"]), vec![1.0])])
        .unwrap();
    let err = series.reduce_per_key(ReduceOp::Min, true).unwrap_err();
    assert!(
        err.to_string().contains("not supported per key"),
        "unexpected error: {err}"
    );
}

#[test]
fn test_keyed_series_rejects_mismatched_lanes() {
    let env = AnalysisEnvironment::new();
    assert!(env
        .keyed_series(vec![(keys(&["a", "b"]), vec![1.0, 2.0, 3.0])])
        .is_err());
}

#[test]
fn test_keyed_results_independent_of_parallelism() {
    let shards = gen_keyed_shards(2026, 8, 40, 6);

    let baseline = AnalysisEnvironment::new()
        .keyed_series(shards.clone())
        .unwrap()
        .mean_and_var_per_key()
        .unwrap();
    assert_eq!(baseline.len(), 6);

    for parallelism in [2, 4, 8] {
        let stats = AnalysisEnvironment::new()
            .with_parallelism(parallelism)
            .keyed_series(shards.clone())
            .unwrap()
            .mean_and_var_per_key()
            .unwrap();
        assert_eq!(stats.len(), baseline.len());
        for ((key_a, (mean_a, var_a)), (key_b, (mean_b, var_b))) in baseline.iter().zip(&stats) {
            assert_eq!(key_a, key_b);
            assert!(
                (mean_a - mean_b).abs() < 1e-9,
                "parallelism {parallelism} key {key_a}: {mean_a} vs {mean_b}"
            );
            assert!(
                (var_a - var_b).abs() < 1e-9,
                "parallelism {parallelism} key {key_a}: {var_a} vs {var_b}"
            );
        }
    }
}
