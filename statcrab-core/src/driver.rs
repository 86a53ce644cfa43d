//! Reference driver: folds shards across worker threads and merges the
//! resulting accumulators in fanout-bounded rounds.

use std::hash::{Hash, Hasher};

use ahash::AHasher;

use crate::combiner::{Combiner, PerKeyCombiner};
use crate::error::{CombineError, Result};
use crate::types::{KeyedBatch, KeyedOutput, Tensor, ValueBatch};

/// Accumulators merged per `merge_accumulators` call.
const MERGE_FANOUT: usize = 16;

/// Bound on the shard feed channel; feeding blocks once workers fall this
/// far behind.
const FEED_CAPACITY: usize = 64;

/// Run one combiner over a list of input shards with up to `parallelism`
/// worker threads, extracting exactly once.
pub fn run_combiner<C: Combiner>(
    combiner: &C,
    shards: Vec<C::Input>,
    parallelism: usize,
) -> Result<C::Output> {
    if shards.is_empty() {
        return combiner.extract_output(combiner.create_accumulator());
    }
    let workers = parallelism.max(1).min(shards.len());
    let accumulators = fold_shards(combiner, shards, workers)?;
    let merged = merge_tree(combiner, accumulators)?;
    combiner.extract_output(merged)
}

/// Fan shards out to `workers` threads over a bounded channel and collect
/// one accumulator per worker. The first failure (in worker order) wins;
/// a failed worker keeps draining its feed so the feeder cannot stall on
/// a full channel.
fn fold_shards<C: Combiner>(
    combiner: &C,
    shards: Vec<C::Input>,
    workers: usize,
) -> Result<Vec<C::Accumulator>> {
    let (sender, receiver) = crossbeam_channel::bounded::<C::Input>(FEED_CAPACITY);

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let receiver = receiver.clone();
            handles.push(scope.spawn(move || {
                let mut state: Result<C::Accumulator> = Ok(combiner.create_accumulator());
                for input in receiver.iter() {
                    state = match state {
                        Ok(accumulator) => combiner.add_input(accumulator, &input),
                        Err(err) => Err(err),
                    };
                }
                state
            }));
        }
        drop(receiver);

        for shard in shards {
            if sender.send(shard).is_err() {
                break;
            }
        }
        drop(sender);

        let mut accumulators = Vec::with_capacity(handles.len());
        let mut first_error: Option<CombineError> = None;
        for (worker, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(accumulator)) => accumulators.push(accumulator),
                Ok(Err(err)) => {
                    tracing::warn!("aggregation worker {} failed: {}", worker, err);
                    first_error.get_or_insert(err);
                }
                Err(_) => {
                    first_error.get_or_insert(CombineError::Resource(format!(
                        "aggregation worker {worker} panicked"
                    )));
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(accumulators),
        }
    })
}

/// Collapse accumulators in rounds of at most [`MERGE_FANOUT`] per merge
/// call until one remains.
fn merge_tree<C: Combiner>(
    combiner: &C,
    mut accumulators: Vec<C::Accumulator>,
) -> Result<C::Accumulator> {
    while accumulators.len() > 1 {
        let mut next = Vec::new();
        while !accumulators.is_empty() {
            let take = accumulators.len().min(MERGE_FANOUT);
            let chunk: Vec<C::Accumulator> = accumulators.drain(..take).collect();
            next.push(combiner.merge_accumulators(chunk)?);
        }
        accumulators = next;
    }
    match accumulators.pop() {
        Some(accumulator) => Ok(accumulator),
        None => Ok(combiner.create_accumulator()),
    }
}

fn key_partition(key: &str, num_partitions: usize) -> usize {
    let mut hasher = AHasher::default();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % num_partitions
}

/// Redistribute keyed rows into `num_partitions` batches by key hash, so
/// all rows of one key land in one batch. Empty partitions are dropped.
pub fn partition_by_key(
    shards: Vec<KeyedBatch>,
    num_partitions: usize,
) -> Result<Vec<KeyedBatch>> {
    let Some(first) = shards.first() else {
        return Ok(Vec::new());
    };
    let widths: Vec<usize> = first.inputs.iter().map(ValueBatch::width).collect();
    for shard in &shards {
        let shard_widths: Vec<usize> = shard.inputs.iter().map(ValueBatch::width).collect();
        if shard_widths != widths {
            return Err(CombineError::ShapeMismatch {
                context: "keyed partitioning",
                left: shard_widths,
                right: widths,
            });
        }
    }

    let mut keys: Vec<Vec<String>> = vec![Vec::new(); num_partitions];
    let mut lanes: Vec<Vec<Vec<f64>>> = vec![vec![Vec::new(); widths.len()]; num_partitions];
    for shard in shards {
        for (row, key) in shard.keys.iter().enumerate() {
            let partition = key_partition(key, num_partitions);
            keys[partition].push(key.clone());
            for (lane, batch) in shard.inputs.iter().enumerate() {
                lanes[partition][lane].extend_from_slice(batch.row(row));
            }
        }
    }

    let mut partitions = Vec::new();
    for (partition_keys, partition_lanes) in keys.into_iter().zip(lanes) {
        if partition_keys.is_empty() {
            continue;
        }
        let inputs = partition_lanes
            .into_iter()
            .zip(&widths)
            .map(|(data, &width)| ValueBatch::from_rows(width, data))
            .collect::<Result<Vec<ValueBatch>>>()?;
        partitions.push(KeyedBatch::new(partition_keys, inputs)?);
    }
    Ok(partitions)
}

/// Keyed variant of [`run_combiner`]: rows are re-sharded by key hash
/// first, so each worker folds complete rows for the keys it owns. The
/// merge stage unions keys either way, so overlap would only cost time.
pub fn run_keyed<C>(
    combiner: &PerKeyCombiner<C>,
    shards: Vec<KeyedBatch>,
    parallelism: usize,
) -> Result<KeyedOutput>
where
    C: Combiner<Input = Vec<ValueBatch>, Output = Vec<Tensor>>,
{
    if shards.is_empty() {
        return combiner.extract_output(combiner.create_accumulator());
    }
    let workers = parallelism.max(1).min(shards.len());
    let partitions = partition_by_key(shards, workers)?;
    run_combiner(combiner, partitions, workers)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combiner::{ElementwiseCombiner, MeanAndVarCombiner, ReduceOp};
    use crate::types::DType;

    fn scalar_shards(values: impl Iterator<Item = f64>, shard_size: usize) -> Vec<Vec<ValueBatch>> {
        let all: Vec<f64> = values.collect();
        all.chunks(shard_size)
            .map(|chunk| vec![ValueBatch::from_scalars(chunk.to_vec())])
            .collect()
    }

    #[test]
    fn test_empty_shard_list_extracts_identity() {
        let combiner =
            ElementwiseCombiner::new(ReduceOp::Sum, 0.0, vec![DType::F64], true).unwrap();
        let out = run_combiner(&combiner, vec![], 4).unwrap();
        assert_eq!(out[0].as_scalar(), Some(0.0));
    }

    #[test]
    fn test_result_is_independent_of_parallelism() {
        let combiner = MeanAndVarCombiner::new(DType::F64, true, true, false).unwrap();
        let mut outputs = Vec::new();
        for parallelism in [1, 2, 4, 8] {
            let shards = scalar_shards((0..100).map(f64::from), 7);
            let out = run_combiner(&combiner, shards, parallelism).unwrap();
            outputs.push((out[0].as_scalar().unwrap(), out[1].as_scalar().unwrap()));
        }
        for (mean, var) in &outputs {
            assert!((mean - 49.5).abs() < 1e-9);
            assert!((var - 833.25).abs() < 1e-9);
        }
    }

    #[test]
    fn test_many_shards_exercise_merge_fanout() {
        let combiner =
            ElementwiseCombiner::new(ReduceOp::Sum, 0.0, vec![DType::F64], true).unwrap();
        let shards = scalar_shards((1..=200).map(f64::from), 4);
        assert!(shards.len() > MERGE_FANOUT * 2);
        let out = run_combiner(&combiner, shards, 3).unwrap();
        assert_eq!(out[0].as_scalar(), Some(20100.0));
    }

    #[test]
    fn test_worker_error_propagates() {
        let combiner =
            ElementwiseCombiner::new(ReduceOp::Max, f64::NEG_INFINITY, vec![DType::F64], false)
                .unwrap();
        let shards = vec![
            vec![ValueBatch::from_rows(2, vec![1.0, 2.0]).unwrap()],
            vec![ValueBatch::from_rows(3, vec![1.0, 2.0, 3.0]).unwrap()],
        ];
        // Whichever worker sees both shards (or the merge stage) must fail.
        assert!(run_combiner(&combiner, shards, 1).is_err());
    }

    #[test]
    fn test_partitioning_covers_every_row_exactly_once() {
        let keys: Vec<String> = (0..50).map(|i| format!("key-{}", i % 7)).collect();
        let values: Vec<f64> = (0..50).map(f64::from).collect();
        let shard = KeyedBatch::new(keys, vec![ValueBatch::from_scalars(values)]).unwrap();

        let partitions = partition_by_key(vec![shard], 4).unwrap();
        let total_rows: usize = partitions.iter().map(KeyedBatch::rows).sum();
        assert_eq!(total_rows, 50);

        // All rows of one key share a partition.
        for key in (0..7).map(|k| format!("key-{k}")) {
            let owners = partitions
                .iter()
                .filter(|p| p.keys.contains(&key))
                .count();
            assert_eq!(owners, 1, "{key} split across partitions");
        }
    }

    #[test]
    fn test_keyed_run_agrees_with_single_fold() {
        let combiner = PerKeyCombiner::new(
            MeanAndVarCombiner::new(DType::F64, true, true, false).unwrap(),
        );

        let make_shards = || -> Vec<KeyedBatch> {
            (0..6)
                .map(|s| {
                    let keys = (0..10).map(|i| format!("k{}", (s + i) % 4)).collect();
                    let values = (0..10).map(|i| f64::from(s * 10 + i)).collect();
                    KeyedBatch::new(keys, vec![ValueBatch::from_scalars(values)]).unwrap()
                })
                .collect()
        };

        let mut direct = combiner.create_accumulator();
        for shard in make_shards() {
            direct = combiner.add_input(direct, &shard).unwrap();
        }
        let expected = combiner.extract_output(direct).unwrap();

        let actual = run_keyed(&combiner, make_shards(), 3).unwrap();
        assert_eq!(expected.len(), actual.len());
        for ((key_a, out_a), (key_b, out_b)) in expected.iter().zip(&actual) {
            assert_eq!(key_a, key_b);
            for (ta, tb) in out_a.iter().zip(out_b) {
                for (x, y) in ta.data.iter().zip(&tb.data) {
                    assert!((x - y).abs() < 1e-9, "{key_a}: {x} vs {y}");
                }
            }
        }
    }

    #[test]
    fn test_keyed_run_with_no_shards() {
        let combiner = PerKeyCombiner::new(
            MeanAndVarCombiner::new(DType::F64, true, true, false).unwrap(),
        );
        let out = run_keyed(&combiner, vec![], 2).unwrap();
        assert!(out.is_empty());
    }
}
