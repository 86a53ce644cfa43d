//! Shared accumulator utilities: ragged-shape reconciliation and non-finite
//! sanitization applied before cross-shard merges.

use std::cmp::Ordering;

/// Zero-pad the shorter of two slot vectors at the tail so both have equal
/// length.
///
/// Slots one side never observed contribute zero counts and zero sums, the
/// identity for every moment-style merge.
pub fn pad_to_match(a: &mut Vec<f64>, b: &mut Vec<f64>) {
    match a.len().cmp(&b.len()) {
        Ordering::Less => a.resize(b.len(), 0.0),
        Ordering::Greater => b.resize(a.len(), 0.0),
        Ordering::Equal => {}
    }
}

/// Replace non-finite values in place: NaN becomes 0, infinities clamp to
/// the largest finite magnitude.
pub fn sanitize_non_finite(xs: &mut [f64]) {
    for x in xs.iter_mut() {
        if x.is_nan() {
            *x = 0.0;
        } else if *x == f64::INFINITY {
            *x = f64::MAX;
        } else if *x == f64::NEG_INFINITY {
            *x = -f64::MAX;
        }
    }
}
