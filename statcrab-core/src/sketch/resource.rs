//! Shared sketch kernels: lock-protected scratch state reused across
//! combiner calls, handed out by a process-wide cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::error::{CombineError, Result};
use crate::sketch::summary::{FeatureSummary, QuantileSketch};

/// Contention-amelioration slots per cache key shape.
pub const NUM_RESOURCE_SLOTS: u8 = 10;

/// Pending pairs buffered per stream before folding into the summary.
const STREAM_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SketchOptions {
    pub num_quantiles: usize,
    pub epsilon: f64,
    pub num_features: usize,
}

// ============================================================================
// Kernel
// ============================================================================

/// Per-feature scratch stream. Not thread-safe; the kernel is only reached
/// through `SketchResource::lock`.
#[derive(Debug, Default)]
struct StreamState {
    buffer: Vec<(f64, f64)>,
    summary: FeatureSummary,
}

impl StreamState {
    fn fold_buffer(&mut self, eps_weight_fraction: f64) {
        if self.buffer.is_empty() {
            return;
        }
        let (values, weights): (Vec<f64>, Vec<f64>) = self.buffer.drain(..).unzip();
        let batch = FeatureSummary::from_batch(&values, &weights);
        self.summary.merge(&batch);
        let eps_weight = eps_weight_fraction * self.summary.total_weight();
        self.summary.compress(eps_weight);
    }
}

/// Stateful sketch scratchpad: ingests carried summaries and raw batches,
/// then flushes a compressed [`QuantileSketch`]. All summaries it builds are
/// compressed at ε/2 so the final merged result stays within ε.
#[derive(Debug)]
pub struct SketchKernel {
    options: SketchOptions,
    streams: Vec<StreamState>,
}

impl SketchKernel {
    fn new(options: SketchOptions) -> SketchKernel {
        let streams = (0..options.num_features).map(|_| StreamState::default()).collect();
        SketchKernel { options, streams }
    }

    fn half_epsilon(&self) -> f64 {
        self.options.epsilon / 2.0
    }

    /// Clear all streams. Callers reset before every operation; the streams
    /// are scratch, not state carried between combiner calls.
    pub fn reset(&mut self) {
        for stream in &mut self.streams {
            stream.buffer.clear();
            stream.summary = FeatureSummary::default();
        }
    }

    /// Merge an accumulator's carried summaries into the streams.
    pub fn ingest_sketch(&mut self, sketch: &QuantileSketch) {
        for (stream, summary) in self.streams.iter_mut().zip(&sketch.summaries) {
            stream.summary.merge(summary);
        }
    }

    /// Buffer one feature column of weighted values.
    pub fn ingest_column(&mut self, feature: usize, values: &[f64], weights: &[f64]) {
        let stream = &mut self.streams[feature];
        stream
            .buffer
            .extend(values.iter().copied().zip(weights.iter().copied()));
        if stream.buffer.len() >= STREAM_BLOCK_SIZE {
            let eps = self.half_epsilon();
            self.streams[feature].fold_buffer(eps);
        }
    }

    /// Finalize every stream into a compressed summary and return the
    /// resulting sketch, leaving the streams cleared.
    pub fn flush(&mut self) -> QuantileSketch {
        let eps = self.half_epsilon();
        let mut summaries = Vec::with_capacity(self.streams.len());
        for stream in &mut self.streams {
            stream.fold_buffer(eps);
            summaries.push(std::mem::take(&mut stream.summary));
        }
        QuantileSketch { summaries }
    }

    /// Per-feature boundary values for `extract_output`. With `generate`
    /// set, buckets come from exact rank queries (`num_buckets - 1`
    /// intervals); otherwise from compress-based boundary generation.
    pub fn boundaries(
        &mut self,
        sketch: &QuantileSketch,
        num_buckets: usize,
        generate: bool,
    ) -> Vec<Vec<f64>> {
        self.reset();
        self.ingest_sketch(sketch);
        self.streams
            .iter_mut()
            .map(|stream| {
                let summary = std::mem::take(&mut stream.summary);
                if generate {
                    summary.generate_quantiles(num_buckets - 1)
                } else {
                    summary.generate_boundaries(num_buckets)
                }
            })
            .collect()
    }
}

// ============================================================================
// Resource & cache
// ============================================================================

/// Cache key for kernel sharing. Epsilon does not participate: combiners
/// agreeing on shape share one kernel, and the first construction's epsilon
/// wins for all sharers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub num_quantiles: usize,
    pub num_features: usize,
    pub slot: u8,
}

/// A shared sketch kernel behind a lock. The lock is the only access path;
/// a poisoned lock surfaces as [`CombineError::Resource`].
#[derive(Debug)]
pub struct SketchResource {
    key: ResourceKey,
    kernel: Mutex<SketchKernel>,
}

impl SketchResource {
    fn new(key: ResourceKey, options: SketchOptions) -> SketchResource {
        tracing::debug!(
            "constructing sketch resource {:?} with epsilon {}",
            key,
            options.epsilon
        );
        SketchResource {
            key,
            kernel: Mutex::new(SketchKernel::new(options)),
        }
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, SketchKernel>> {
        self.kernel.lock().map_err(|_| {
            CombineError::Resource(format!("sketch kernel lock poisoned for {:?}", self.key))
        })
    }
}

/// Process-wide registry of sketch resources. Lives for the process
/// lifetime; combiners resolving equal keys share one resource.
#[derive(Debug, Default)]
pub struct ResourceCache {
    resources: Mutex<HashMap<ResourceKey, Arc<SketchResource>>>,
    next_slot: AtomicUsize,
}

impl ResourceCache {
    pub fn global() -> &'static ResourceCache {
        static CACHE: OnceLock<ResourceCache> = OnceLock::new();
        CACHE.get_or_init(ResourceCache::default)
    }

    /// Round-robin slot assignment, spreading combiner instances with the
    /// same shape over [`NUM_RESOURCE_SLOTS`] kernels.
    pub fn assign_slot(&self) -> u8 {
        (self.next_slot.fetch_add(1, Ordering::Relaxed) % NUM_RESOURCE_SLOTS as usize) as u8
    }

    pub fn resolve(&self, key: ResourceKey, options: SketchOptions) -> Result<Arc<SketchResource>> {
        let mut resources = self.resources.lock().map_err(|_| {
            CombineError::Resource("sketch resource cache lock poisoned".to_string())
        })?;
        let resource = resources
            .entry(key)
            .or_insert_with(|| Arc::new(SketchResource::new(key, options)));
        Ok(Arc::clone(resource))
    }
}
