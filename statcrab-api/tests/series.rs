use statcrab_api::AnalysisEnvironment;
use statcrab_core::combiner::QuantilesOptions;
use statcrab_core::types::DType;

fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

/// Uniform in [0, 1) from the top 32 bits of the LCG state.
fn uniform(state: &mut u64) -> f64 {
    (lcg_next(state) >> 32) as f64 / 4294967296.0
}

/// Gaussian-like draw: sum of 12 uniforms minus 6 has mean 0, variance 1.
fn gaussian_like(state: &mut u64) -> f64 {
    (0..12).map(|_| uniform(state)).sum::<f64>() - 6.0
}

fn shard(values: Vec<f64>, shard_size: usize) -> Vec<Vec<f64>> {
    values.chunks(shard_size).map(<[f64]>::to_vec).collect()
}

#[test]
fn test_min_max_sum_size_over_shards() {
    let env = AnalysisEnvironment::new().with_parallelism(3);
    let values: Vec<f64> = (0..=100).map(f64::from).collect();
    let series = env.numeric_series(shard(values, 9));

    assert_eq!(series.min().unwrap(), 0.0);
    assert_eq!(series.max().unwrap(), 100.0);
    assert_eq!(series.min_and_max().unwrap(), (0.0, 100.0));
    assert_eq!(series.sum().unwrap(), 5050.0);
    assert_eq!(series.size().unwrap(), 101);
}

#[test]
fn test_mean_and_var_match_across_shardings() {
    let values: Vec<f64> = (1..=8).map(f64::from).collect();
    for shard_size in [1, 3, 8] {
        for parallelism in [1, 4] {
            let env = AnalysisEnvironment::new().with_parallelism(parallelism);
            let series = env.numeric_series(shard(values.clone(), shard_size));
            let (mean, var) = series.mean_and_var().unwrap();
            assert!(
                (mean - 4.5).abs() < 1e-9,
                "shard_size={shard_size} parallelism={parallelism}: mean {mean}"
            );
            assert!(
                (var - 5.25).abs() < 1e-9,
                "shard_size={shard_size} parallelism={parallelism}: var {var}"
            );
        }
    }
}

#[test]
fn test_weighted_mean_interleaved_shards() {
    let env = AnalysisEnvironment::new().with_parallelism(2);
    // Direct computation: (1*1 + 2*1 + 3*2 + 4*4) / (1 + 1 + 2 + 4) = 25/8.
    let series = env.numeric_series(vec![vec![1.0, 3.0], vec![2.0, 4.0]]);
    let weighted = series
        .weighted_mean(vec![vec![1.0, 2.0], vec![1.0, 4.0]])
        .unwrap();
    assert!((weighted - 3.125).abs() < 1e-9, "weighted mean {weighted}");
}

#[test]
fn test_weighted_mean_shard_count_mismatch() {
    let env = AnalysisEnvironment::new();
    let series = env.numeric_series(vec![vec![1.0, 2.0], vec![3.0]]);
    assert!(series.weighted_mean(vec![vec![1.0, 1.0]]).is_err());
}

#[test]
fn test_quantile_boundaries_track_deciles() {
    let env = AnalysisEnvironment::new().with_parallelism(4);
    // A permutation of 0..1000 so every shard mixes ranks.
    let values: Vec<f64> = (0..1000u32).map(|i| f64::from(i * 379 % 1000)).collect();
    let series = env.numeric_series(shard(values, 101));

    let boundaries = series.quantiles(10, 0.01).unwrap();
    assert_eq!(boundaries.len(), 9);
    for (k, boundary) in boundaries.iter().enumerate() {
        let target = 100.0 * (k + 1) as f64;
        assert!(
            (boundary - target).abs() <= 15.0,
            "decile {k}: {boundary} vs {target}"
        );
    }
}

#[test]
fn test_quantiles_with_options_keeps_extremes() {
    let env = AnalysisEnvironment::new();
    let values: Vec<f64> = (0..=100).map(f64::from).collect();
    let series = env.numeric_series(shard(values, 23));

    let boundaries = series
        .quantiles_with_options(QuantilesOptions {
            num_quantiles: 4,
            epsilon: 0.01,
            output_dtype: DType::F64,
            always_return_num_quantiles: false,
            has_weights: false,
            include_max_and_min: true,
            num_features: 1,
        })
        .unwrap();
    let first = boundaries.data.first().copied().unwrap();
    let last = boundaries.data.last().copied().unwrap();
    assert_eq!(first, 0.0);
    assert_eq!(last, 100.0);
}

#[test]
fn test_histogram_counts_per_bucket() {
    let env = AnalysisEnvironment::new().with_parallelism(2);
    let values: Vec<f64> = (0..100).map(f64::from).collect();
    let series = env.numeric_series(shard(values, 17));

    let counts = series.histogram(&[25.0, 50.0, 75.0]).unwrap();
    assert_eq!(counts, vec![25, 25, 25, 25]);
}

#[test]
fn test_histogram_zero_fills_empty_buckets() {
    let env = AnalysisEnvironment::new();
    let values: Vec<f64> = (0..100).map(f64::from).collect();
    let series = env.numeric_series(shard(values, 31));

    // Everything lands below the first boundary.
    let counts = series.histogram(&[200.0, 300.0]).unwrap();
    assert_eq!(counts, vec![100, 0, 0]);

    // [50, 50.5) catches only the value 50.
    let counts = series.histogram(&[25.0, 50.0, 50.5, 75.0]).unwrap();
    assert_eq!(counts, vec![25, 25, 1, 24, 25]);
}

#[test]
fn test_histogram_rejects_unsorted_boundaries() {
    let env = AnalysisEnvironment::new();
    let series = env.numeric_series(vec![vec![1.0]]);
    assert!(series.histogram(&[10.0, 5.0]).is_err());
}

#[test]
fn test_tukey_parameters_on_gaussian_like_data() {
    let mut state = 0x5eed_u64;
    let values: Vec<f64> = (0..4000).map(|_| 3.0 + 2.0 * gaussian_like(&mut state)).collect();

    let env = AnalysisEnvironment::new().with_parallelism(4);
    let series = env.numeric_series(shard(values, 500));
    let params = series.tukey_parameters().unwrap();

    assert!(
        (params.location - 3.0).abs() < 0.2,
        "location {}",
        params.location
    );
    assert!((params.scale - 2.0).abs() < 0.2, "scale {}", params.scale);
    assert!(params.h_left < 0.05, "h_left {}", params.h_left);
    assert!(params.h_right < 0.05, "h_right {}", params.h_right);

    // Each accessor reruns the fold; merge grouping varies with worker
    // scheduling, so compare within tolerance rather than bitwise.
    let (hl, hr) = series.tukey_h_params().unwrap();
    assert!((hl - params.h_left).abs() < 1e-6);
    assert!((hr - params.h_right).abs() < 1e-6);
    assert!((series.tukey_location().unwrap() - params.location).abs() < 1e-6);
    assert!((series.tukey_scale().unwrap() - params.scale).abs() < 1e-6);
}

#[test]
fn test_empty_series_degenerate_outputs() {
    let env = AnalysisEnvironment::new();
    let series = env.numeric_series(vec![]);

    assert_eq!(series.min().unwrap(), f64::INFINITY);
    assert_eq!(series.max().unwrap(), f64::NEG_INFINITY);
    assert_eq!(series.size().unwrap(), 0);
    assert_eq!(series.mean_and_var().unwrap(), (0.0, 0.0));
    assert_eq!(series.quantiles(10, 0.01).unwrap(), vec![0.0; 9]);

    let params = series.tukey_parameters().unwrap();
    assert_eq!(params.location, 0.0);
    assert_eq!(params.scale, 1.0);
    assert_eq!((params.h_left, params.h_right), (0.0, 0.0));
}

#[test]
fn test_vector_series_per_column_stats() {
    let env = AnalysisEnvironment::new().with_parallelism(2);
    let series = env
        .vector_series(2, vec![vec![1.0, 10.0, 2.0, 20.0], vec![3.0, 30.0, 4.0, 40.0]])
        .unwrap();

    assert_eq!(series.min().unwrap(), vec![1.0, 10.0]);
    assert_eq!(series.max().unwrap(), vec![4.0, 40.0]);
    assert_eq!(series.sum().unwrap(), vec![10.0, 100.0]);

    let (mean, var) = series.mean_and_var().unwrap();
    assert!((mean[0] - 2.5).abs() < 1e-9 && (mean[1] - 25.0).abs() < 1e-9);
    assert!((var[0] - 1.25).abs() < 1e-9 && (var[1] - 125.0).abs() < 1e-9);
}

#[test]
fn test_vector_series_rejects_ragged_shard() {
    let env = AnalysisEnvironment::new();
    assert!(env.vector_series(3, vec![vec![1.0, 2.0, 3.0, 4.0]]).is_err());
    assert!(env.vector_series(0, vec![vec![]]).is_err());
}

#[test]
fn test_vector_covariance_and_pca() {
    let env = AnalysisEnvironment::new().with_parallelism(2);
    // Rows (x, 2x) for x in 0..4: rank one, direction (1, 2)/sqrt(5).
    let series = env
        .vector_series(2, vec![vec![0.0, 0.0, 1.0, 2.0], vec![2.0, 4.0, 3.0, 6.0]])
        .unwrap();

    let cov = series.covariance().unwrap();
    assert_eq!(cov.shape, vec![2, 2]);
    let expected = [1.25, 2.5, 2.5, 5.0];
    for (got, want) in cov.data.iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "covariance {got} vs {want}");
    }

    let pca = series.pca(1).unwrap();
    assert_eq!(pca.shape, vec![2, 1]);
    let (v0, v1) = (pca.data[0], pca.data[1]);
    assert!((v0.abs() - 1.0 / 5.0_f64.sqrt()).abs() < 1e-6, "component {v0}");
    assert!((v1.abs() - 2.0 / 5.0_f64.sqrt()).abs() < 1e-6, "component {v1}");
    assert!(v0 * v1 > 0.0, "components flipped: {v0}, {v1}");
}

#[test]
fn test_vector_quantiles_have_exact_count_per_column() {
    let env = AnalysisEnvironment::new().with_parallelism(3);
    let rows: Vec<f64> = (0..500)
        .flat_map(|i| [f64::from(i), f64::from(1000 - i)])
        .collect();
    let series = env.vector_series(2, shard(rows, 100)).unwrap();

    let boundaries = series.quantiles(4, 0.01).unwrap();
    assert_eq!(boundaries.shape, vec![2, 3]);

    // Column 0 holds 0..500, column 1 holds 501..=1000.
    let expected = [[125.0, 250.0, 375.0], [626.0, 751.0, 876.0]];
    for feature in 0..2 {
        for (k, want) in expected[feature].iter().enumerate() {
            let got = boundaries.data[feature * 3 + k];
            assert!(
                (got - want).abs() <= 15.0,
                "feature {feature} quartile {k}: {got} vs {want}"
            );
        }
    }
}

#[test]
fn test_environment_clamps_parallelism() {
    assert_eq!(AnalysisEnvironment::default().parallelism(), 1);
    assert_eq!(AnalysisEnvironment::new().with_parallelism(0).parallelism(), 1);
    assert_eq!(AnalysisEnvironment::new().with_parallelism(8).parallelism(), 8);
}
