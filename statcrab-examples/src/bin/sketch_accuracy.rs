use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statcrab_api::AnalysisEnvironment;
use statcrab_core::combiner::QuantilesOptions;
use statcrab_core::types::DType;

const NUM_VALUES: usize = 200_000;
const NUM_BUCKETS: usize = 10;
const EPSILON: f64 = 0.005;

/// Rank distance from `target` to the span of `x` in `sorted`; 0 when the
/// target falls inside a run of equal values.
fn rank_error(sorted: &[f64], x: f64, target: usize) -> f64 {
    let lo = sorted.partition_point(|&v| v < x);
    let hi = sorted.partition_point(|&v| v <= x);
    if target < lo {
        (lo - target) as f64
    } else if target > hi {
        (target - hi) as f64
    } else {
        0.0
    }
}

fn check(name: &str, values: Vec<f64>) -> anyhow::Result<()> {
    let mut sorted = values.clone();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();

    let shards: Vec<Vec<f64>> = values.chunks(5_000).map(<[f64]>::to_vec).collect();
    let env = AnalysisEnvironment::new().with_parallelism(4);
    let series = env.numeric_series(shards);

    let options = QuantilesOptions {
        num_quantiles: NUM_BUCKETS,
        epsilon: EPSILON,
        output_dtype: DType::F64,
        always_return_num_quantiles: true,
        has_weights: false,
        include_max_and_min: false,
        num_features: 1,
    };
    // Exact-count mode queries the decile ranks directly, so each returned
    // value can be scored against its target rank.
    let approx = series.quantiles_with_options(options.clone())?;
    let mut worst = 0.0_f64;
    for (k, boundary) in approx.data.iter().enumerate() {
        let target = (k + 1) * n / NUM_BUCKETS;
        worst = worst.max(rank_error(&sorted, *boundary, target) / n as f64);
    }
    println!("{name}: worst decile rank error {worst:.5} (budget {EPSILON})");

    let with_extremes = series.quantiles_with_options(QuantilesOptions {
        always_return_num_quantiles: false,
        include_max_and_min: true,
        ..options
    })?;
    let first = with_extremes.data.first().copied().unwrap_or(f64::NAN);
    let last = with_extremes.data.last().copied().unwrap_or(f64::NAN);
    println!("{name}: observed extremes {first:.3} .. {last:.3}");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(42);

    let uniform: Vec<f64> = (0..NUM_VALUES).map(|_| rng.gen::<f64>() * 1000.0).collect();
    check("uniform", uniform)?;

    let clustered: Vec<f64> = (0..NUM_VALUES)
        .map(|_| (rng.gen::<f64>() * 8.0).floor())
        .collect();
    check("eight point masses", clustered)?;

    let heavy: Vec<f64> = (0..NUM_VALUES)
        .map(|_| {
            let u: f64 = rng.gen();
            // Pareto tail with alpha = 2.
            (1.0 - u).powf(-0.5)
        })
        .collect();
    check("pareto tail", heavy)?;

    Ok(())
}
