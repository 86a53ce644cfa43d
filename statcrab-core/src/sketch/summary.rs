//! Weighted rank summaries: the mergeable core of the quantile sketch.

use serde::{Deserialize, Serialize};

/// One summary entry: a value with its weight and cumulative rank bounds.
///
/// `min_rank` is the weight known to lie strictly before the entry,
/// `max_rank` the weight up to and including it. Both are exact for a
/// freshly built batch summary and widen as summaries merge and compress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub value: f64,
    pub weight: f64,
    pub min_rank: f64,
    pub max_rank: f64,
}

impl SummaryEntry {
    fn next_min_rank(&self) -> f64 {
        self.min_rank + self.weight
    }

    fn prev_max_rank(&self) -> f64 {
        self.max_rank - self.weight
    }
}

/// Rank summary of a single feature, entries sorted by value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    entries: Vec<SummaryEntry>,
}

impl FeatureSummary {
    /// Exact summary of one weighted batch. NaN values and non-positive
    /// weights are skipped; equal values coalesce.
    pub fn from_batch(values: &[f64], weights: &[f64]) -> FeatureSummary {
        let mut pairs: Vec<(f64, f64)> = values
            .iter()
            .copied()
            .zip(weights.iter().copied())
            .filter(|&(v, w)| !v.is_nan() && w > 0.0)
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut entries: Vec<SummaryEntry> = Vec::with_capacity(pairs.len());
        let mut cumulative = 0.0;
        for (value, weight) in pairs {
            match entries.last_mut() {
                Some(last) if last.value == value => {
                    last.weight += weight;
                    last.max_rank += weight;
                }
                _ => entries.push(SummaryEntry {
                    value,
                    weight,
                    min_rank: cumulative,
                    max_rank: cumulative + weight,
                }),
            }
            cumulative += weight;
        }
        FeatureSummary { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[SummaryEntry] {
        &self.entries
    }

    /// Total observed weight, encoded in the final entry's rank.
    pub fn total_weight(&self) -> f64 {
        self.entries.last().map_or(0.0, |e| e.max_rank)
    }

    /// Worst-case rank error of a query against this summary, as a fraction
    /// of the total weight.
    pub fn approximation_error(&self) -> f64 {
        if self.entries.len() < 2 {
            return 0.0;
        }
        let mut max_gap: f64 = 0.0;
        for pair in self.entries.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            max_gap = max_gap
                .max(cur.max_rank - cur.min_rank + cur.weight)
                .max(cur.next_min_rank() - prev.prev_max_rank());
        }
        max_gap / (2.0 * self.total_weight())
    }

    /// Merge `other` into this summary in one pass over both entry lists.
    ///
    /// An entry taken from one side has the other side's not-yet-consumed
    /// rank mass added to its bounds; exactly equal values coalesce by
    /// adding weights and both rank fields.
    pub fn merge(&mut self, other: &FeatureSummary) {
        if other.entries.is_empty() {
            return;
        }
        if self.entries.is_empty() {
            self.entries = other.entries.clone();
            return;
        }

        let base = std::mem::take(&mut self.entries);
        let rhs = &other.entries;
        self.entries.reserve(base.len() + rhs.len());

        let (mut i, mut j) = (0, 0);
        let mut next_min_left = 0.0;
        let mut next_min_right = 0.0;
        while i < base.len() && j < rhs.len() {
            let a = base[i];
            let b = rhs[j];
            if a.value < b.value {
                self.entries.push(SummaryEntry {
                    value: a.value,
                    weight: a.weight,
                    min_rank: a.min_rank + next_min_right,
                    max_rank: a.max_rank + b.prev_max_rank(),
                });
                next_min_left = a.next_min_rank();
                i += 1;
            } else if b.value < a.value {
                self.entries.push(SummaryEntry {
                    value: b.value,
                    weight: b.weight,
                    min_rank: b.min_rank + next_min_left,
                    max_rank: b.max_rank + a.prev_max_rank(),
                });
                next_min_right = b.next_min_rank();
                j += 1;
            } else {
                self.entries.push(SummaryEntry {
                    value: a.value,
                    weight: a.weight + b.weight,
                    min_rank: a.min_rank + b.min_rank,
                    max_rank: a.max_rank + b.max_rank,
                });
                next_min_left = a.next_min_rank();
                next_min_right = b.next_min_rank();
                i += 1;
                j += 1;
            }
        }
        let last_left_max = base[base.len() - 1].max_rank;
        let last_right_max = rhs[rhs.len() - 1].max_rank;
        while i < base.len() {
            let a = base[i];
            self.entries.push(SummaryEntry {
                value: a.value,
                weight: a.weight,
                min_rank: a.min_rank + next_min_right,
                max_rank: a.max_rank + last_right_max,
            });
            i += 1;
        }
        while j < rhs.len() {
            let b = rhs[j];
            self.entries.push(SummaryEntry {
                value: b.value,
                weight: b.weight,
                min_rank: b.min_rank + next_min_left,
                max_rank: b.max_rank + last_left_max,
            });
            j += 1;
        }
    }

    /// Greedy compression. Interior entries are dropped while the rank gap
    /// from the previous kept entry stays within `eps_weight` (= ε·W); the
    /// first and last entries always survive.
    pub fn compress(&mut self, eps_weight: f64) {
        if self.entries.len() <= 2 {
            return;
        }
        let mut kept: Vec<SummaryEntry> = Vec::with_capacity(self.entries.len());
        kept.push(self.entries[0]);
        for idx in 1..self.entries.len() - 1 {
            let next = self.entries[idx + 1];
            if next.max_rank - kept[kept.len() - 1].min_rank > eps_weight {
                kept.push(self.entries[idx]);
            }
        }
        kept.push(self.entries[self.entries.len() - 1]);
        self.entries = kept;
    }

    /// Boundary values from a softly re-compressed copy. The second
    /// compression adds about `1/num_boundaries` of rank error on top of
    /// the summary's own, which callers account for in their ε budget.
    pub fn generate_boundaries(&self, num_boundaries: usize) -> Vec<f64> {
        if self.entries.is_empty() || num_boundaries == 0 {
            return Vec::new();
        }
        let mut compressed = self.clone();
        let eps = self.approximation_error() + 1.0 / num_boundaries as f64;
        compressed.compress(eps * self.total_weight());
        compressed.entries.iter().map(|e| e.value).collect()
    }

    /// `num_intervals + 1` quantile values (including both extremes) from
    /// successive rank queries. A query takes the last entry whose
    /// mid-rank does not exceed the target.
    pub fn generate_quantiles(&self, num_intervals: usize) -> Vec<f64> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        let n = num_intervals.max(2);
        let total = self.total_weight();
        let mut out = Vec::with_capacity(n + 1);
        let mut idx = 0;
        for rank in 0..=n {
            let doubled_target = 2.0 * (rank as f64 * total / n as f64);
            while idx + 1 < self.entries.len()
                && doubled_target >= self.entries[idx + 1].min_rank + self.entries[idx + 1].max_rank
            {
                idx += 1;
            }
            out.push(self.entries[idx].value);
        }
        out
    }
}

/// Per-feature summaries carried as the quantiles accumulator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantileSketch {
    pub summaries: Vec<FeatureSummary>,
}

impl QuantileSketch {
    pub fn empty(num_features: usize) -> QuantileSketch {
        QuantileSketch {
            summaries: vec![FeatureSummary::default(); num_features],
        }
    }

    /// True when no feature has observed any weight.
    pub fn is_empty(&self) -> bool {
        self.summaries.iter().all(FeatureSummary::is_empty)
    }

    pub fn num_features(&self) -> usize {
        self.summaries.len()
    }
}
