use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statcrab_api::AnalysisEnvironment;

fn main() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(7);

    // Right-skewed synthetic latencies: exp of a Gaussian-like sum.
    let shards: Vec<Vec<f64>> = (0..8)
        .map(|_| {
            (0..2_000)
                .map(|_| {
                    let z: f64 = (0..12).map(|_| rng.gen::<f64>()).sum::<f64>() - 6.0;
                    (z * 0.6).exp() * 20.0
                })
                .collect()
        })
        .collect();

    let env = AnalysisEnvironment::new().with_parallelism(4);
    let series = env.numeric_series(shards.clone());

    let (min, max) = series.min_and_max()?;
    let (mean, var) = series.mean_and_var()?;
    println!("observations: {}", series.size()?);
    println!("range: [{min:.2}, {max:.2}]");
    println!("mean: {mean:.2}  stddev: {:.2}", var.sqrt());

    let params = series.tukey_parameters()?;
    println!(
        "tukey fit: location={:.2} scale={:.2} h=({:.3}, {:.3})",
        params.location, params.scale, params.h_left, params.h_right
    );

    let deciles = series.quantiles(10, 0.01)?;
    let rendered: Vec<String> = deciles.iter().map(|b| format!("{b:.1}")).collect();
    println!("decile boundaries: [{}]", rendered.join(", "));
    println!("per-decile counts: {:?}", series.histogram(&deciles)?);

    // The same data grouped into coarse latency bands.
    let keyed: Vec<(Vec<String>, Vec<f64>)> = shards
        .iter()
        .map(|shard| {
            let keys = shard
                .iter()
                .map(|&x| {
                    let band = if x < 20.0 {
                        "fast"
                    } else if x < 60.0 {
                        "mid"
                    } else {
                        "slow"
                    };
                    band.to_string()
                })
                .collect();
            (keys, shard.clone())
        })
        .collect();
    let keyed_series = env.keyed_series(keyed)?;
    for (band, count) in keyed_series.count_per_key()? {
        println!("band {band}: {count} rows");
    }
    for (band, (mean, var)) in keyed_series.mean_and_var_per_key()? {
        println!("band {band}: mean={mean:.2} stddev={:.2}", var.sqrt());
    }

    Ok(())
}
