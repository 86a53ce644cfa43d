//! Tukey HH parameter estimation from L-moment ratios.
//!
//! The canonical Tukey HH variable is g(Z) for standard normal Z, with
//! g(z) = z·exp(hl·z²/2) on the left tail and z·exp(hr·z²/2) on the right,
//! hl, hr ∈ [0, 1). Its r-th L-moment is the integral of
//! g(z)·P*(Φ(z))·φ(z) against the shifted Legendre polynomial P* of degree
//! r−1 (Headrick & Pant characterization). The first two L-moments have
//! closed forms; the third and fourth are evaluated by Simpson quadrature,
//! and the inverse map (ratios to shape parameters) by bisection plus a
//! damped Newton iteration.

use super::special::{standard_normal_cdf, FRAC_1_SQRT_2PI};

/// L-kurtosis τ4 of the standard normal: 30·atan(√2)/π − 9 ≈ 0.122602.
/// Kurtosis at or below this level is treated as Gaussian (h = 0).
pub const GAUSSIAN_L_KURTOSIS: f64 = 0.12260280027688862;

/// Upper clamp on either shape parameter. The L-moment integrands decay
/// like exp(−(1−h)·z²/2), so the solver keeps a safety margin below 1.
const H_MAX: f64 = 0.95;

const NEWTON_MAX_ITERS: usize = 30;
const NEWTON_TOLERANCE: f64 = 1e-10;
const JACOBIAN_STEP: f64 = 1e-5;

/// Shifted Legendre polynomial P*_k on [0, 1], k ≤ 3.
fn shifted_legendre(k: usize, u: f64) -> f64 {
    match k {
        0 => 1.0,
        1 => 2.0 * u - 1.0,
        2 => (6.0 * u - 6.0) * u + 1.0,
        3 => ((20.0 * u - 30.0) * u + 12.0) * u - 1.0,
        _ => unreachable!("L-moment order is at most 4"),
    }
}

fn simpson<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, steps: usize) -> f64 {
    let h = (b - a) / steps as f64;
    let mut acc = f(a) + f(b);
    for i in 1..steps {
        let w = if i % 2 == 0 { 2.0 } else { 4.0 };
        acc += w * f(a + h * i as f64);
    }
    acc * h / 3.0
}

/// λ_{k+1} of the canonical Tukey HH distribution by quadrature.
///
/// The integrand is split at the origin, where the transform's third
/// derivative jumps when hl ≠ hr.
fn l_moment_quadrature(k: usize, hl: f64, hr: f64) -> f64 {
    // exp(−(1−h)·z_max²/2) below 4e-18 keeps the truncated tails negligible.
    let h_heaviest = hl.max(hr).min(H_MAX);
    let z_max = (80.0 / (1.0 - h_heaviest)).sqrt();
    // g(z)·φ(z) = z·exp(−(1−h)·z²/2)/√2π, with the exponent kept negative.
    let integrand = |z: f64| {
        let h = if z < 0.0 { hl } else { hr };
        z * (-0.5 * (1.0 - h) * z * z).exp()
            * FRAC_1_SQRT_2PI
            * shifted_legendre(k, standard_normal_cdf(z))
    };
    simpson(&integrand, -z_max, 0.0, 1000) + simpson(&integrand, 0.0, z_max, 1000)
}

/// Closed-form L-mean λ1 and L-scale λ2 of the canonical Tukey HH
/// distribution. λ2 reduces to 1/√π at hl = hr = 0.
pub fn tukey_hh_l_mean_and_scale(hl: f64, hr: f64) -> (f64, f64) {
    let (al, ar) = (1.0 - hl, 1.0 - hr);
    let l_mean = FRAC_1_SQRT_2PI * (1.0 / ar - 1.0 / al);
    let l_scale =
        FRAC_1_SQRT_2PI * (1.0 / (al * (1.0 + al).sqrt()) + 1.0 / (ar * (1.0 + ar).sqrt()));
    (l_mean, l_scale)
}

/// Forward map: L-skewness and L-kurtosis (τ3, τ4) at shape (hl, hr).
pub fn tukey_hh_l_skewness_kurtosis(hl: f64, hr: f64) -> (f64, f64) {
    let (_, l_scale) = tukey_hh_l_mean_and_scale(hl, hr);
    let l3 = l_moment_quadrature(2, hl, hr);
    let l4 = l_moment_quadrature(3, hl, hr);
    (l3 / l_scale, l4 / l_scale)
}

/// τ4 on the symmetric diagonal hl = hr = h.
fn symmetric_l_kurtosis(h: f64) -> f64 {
    tukey_hh_l_skewness_kurtosis(h, h).1
}

/// Bisection for h with symmetric_l_kurtosis(h) = target. τ4 is strictly
/// increasing on the diagonal; a target beyond the clamp saturates at H_MAX.
fn solve_symmetric(target: f64) -> f64 {
    if target >= symmetric_l_kurtosis(H_MAX) {
        return H_MAX;
    }
    let (mut lo, mut hi) = (0.0_f64, H_MAX);
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        if symmetric_l_kurtosis(mid) < target {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-13 {
            break;
        }
    }
    0.5 * (lo + hi)
}

fn residual(hl: f64, hr: f64, tau3: f64, tau4: f64) -> (f64, f64) {
    let (s, k) = tukey_hh_l_skewness_kurtosis(hl, hr);
    (s - tau3, k - tau4)
}

fn residual_norm(r: (f64, f64)) -> f64 {
    r.0.abs().max(r.1.abs())
}

/// Inverse map: Tukey HH shape parameters (hl, hr) matching the given
/// L-moment ratios.
///
/// Non-finite inputs and kurtosis at or below the Gaussian level map to
/// (0, 0). Negative skewness is solved through the mirror symmetry
/// τ3(hl, hr) = −τ3(hr, hl). When the Newton iteration cannot reach the
/// requested skewness (the feasible τ3 range shrinks with τ4), the
/// symmetric kurtosis-only fit is returned.
pub fn compute_tukey_hh_params(l_skewness: f64, l_kurtosis: f64) -> (f64, f64) {
    if !l_skewness.is_finite() || !l_kurtosis.is_finite() {
        return (0.0, 0.0);
    }
    if l_kurtosis <= GAUSSIAN_L_KURTOSIS {
        return (0.0, 0.0);
    }

    let negative_skew = l_skewness < 0.0;
    let tau3 = l_skewness.abs();
    let tau4 = l_kurtosis;

    let h0 = solve_symmetric(tau4);
    let (mut hl, mut hr) = (h0, h0);
    let mut res = residual(hl, hr, tau3, tau4);
    let mut converged = residual_norm(res) < NEWTON_TOLERANCE;

    for _ in 0..NEWTON_MAX_ITERS {
        if converged {
            break;
        }

        // Central-difference Jacobian; at the boundary the clamped points
        // degrade to a one-sided difference over the actual span.
        let dl = JACOBIAN_STEP;
        let dr = JACOBIAN_STEP;
        let (s_l_hi, k_l_hi) = tukey_hh_l_skewness_kurtosis((hl + dl).min(H_MAX), hr);
        let (s_l_lo, k_l_lo) = tukey_hh_l_skewness_kurtosis((hl - dl).max(0.0), hr);
        let (s_r_hi, k_r_hi) = tukey_hh_l_skewness_kurtosis(hl, (hr + dr).min(H_MAX));
        let (s_r_lo, k_r_lo) = tukey_hh_l_skewness_kurtosis(hl, (hr - dr).max(0.0));
        let span_l = (hl + dl).min(H_MAX) - (hl - dl).max(0.0);
        let span_r = (hr + dr).min(H_MAX) - (hr - dr).max(0.0);

        let j00 = (s_l_hi - s_l_lo) / span_l;
        let j01 = (s_r_hi - s_r_lo) / span_r;
        let j10 = (k_l_hi - k_l_lo) / span_l;
        let j11 = (k_r_hi - k_r_lo) / span_r;

        let det = j00 * j11 - j01 * j10;
        if det.abs() < 1e-14 {
            break;
        }
        let step_l = -(j11 * res.0 - j01 * res.1) / det;
        let step_r = -(-j10 * res.0 + j00 * res.1) / det;

        // Damped update: halve the step until the residual improves.
        let mut damping = 1.0;
        let mut improved = false;
        for _ in 0..8 {
            let cand_l = (hl + damping * step_l).clamp(0.0, H_MAX);
            let cand_r = (hr + damping * step_r).clamp(0.0, H_MAX);
            let cand_res = residual(cand_l, cand_r, tau3, tau4);
            if residual_norm(cand_res) < residual_norm(res) {
                hl = cand_l;
                hr = cand_r;
                res = cand_res;
                improved = true;
                break;
            }
            damping *= 0.5;
        }
        if !improved {
            break;
        }
        converged = residual_norm(res) < NEWTON_TOLERANCE;
    }

    if !converged && residual_norm(res) > 1e-4 {
        // Kurtosis-only fallback keeps extraction deterministic.
        hl = h0;
        hr = h0;
    }

    if negative_skew {
        (hr, hl)
    } else {
        (hl, hr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_constant_matches_quadrature() {
        let (tau3, tau4) = tukey_hh_l_skewness_kurtosis(0.0, 0.0);
        assert!(tau3.abs() < 1e-9);
        assert!((tau4 - GAUSSIAN_L_KURTOSIS).abs() < 1e-7);
    }

    #[test]
    fn test_l_scale_closed_form_matches_quadrature() {
        for &(hl, hr) in &[(0.0, 0.0), (0.1, 0.1), (0.2, 0.05), (0.0, 0.4)] {
            let quad = l_moment_quadrature(1, hl, hr);
            let (_, closed) = tukey_hh_l_mean_and_scale(hl, hr);
            assert!(
                (quad - closed).abs() < 1e-8,
                "l_scale mismatch at ({hl}, {hr}): {quad} vs {closed}"
            );
        }
    }

    #[test]
    fn test_l_mean_closed_form_matches_quadrature() {
        for &(hl, hr) in &[(0.0, 0.0), (0.3, 0.1), (0.05, 0.25)] {
            let quad = l_moment_quadrature(0, hl, hr);
            let (closed, _) = tukey_hh_l_mean_and_scale(hl, hr);
            assert!(
                (quad - closed).abs() < 1e-8,
                "l_mean mismatch at ({hl}, {hr}): {quad} vs {closed}"
            );
        }
    }

    #[test]
    fn test_gaussian_l_scale_is_one_over_sqrt_pi() {
        let (mean, scale) = tukey_hh_l_mean_and_scale(0.0, 0.0);
        assert!(mean.abs() < 1e-15);
        assert!((scale - 1.0 / std::f64::consts::PI.sqrt()).abs() < 1e-14);
    }

    #[test]
    fn test_kurtosis_increases_along_diagonal() {
        let low = symmetric_l_kurtosis(0.05);
        let mid = symmetric_l_kurtosis(0.2);
        let high = symmetric_l_kurtosis(0.4);
        assert!(GAUSSIAN_L_KURTOSIS < low);
        assert!(low < mid);
        assert!(mid < high);
    }

    #[test]
    fn test_heavier_right_tail_gives_positive_skewness() {
        let (tau3, _) = tukey_hh_l_skewness_kurtosis(0.05, 0.3);
        assert!(tau3 > 0.01);
        let (mirrored, _) = tukey_hh_l_skewness_kurtosis(0.3, 0.05);
        assert!((mirrored + tau3).abs() < 1e-9);
    }

    #[test]
    fn test_inverse_recovers_forward_map() {
        for &(hl, hr) in &[(0.1, 0.25), (0.0, 0.2), (0.15, 0.15)] {
            let (tau3, tau4) = tukey_hh_l_skewness_kurtosis(hl, hr);
            let (rl, rr) = compute_tukey_hh_params(tau3, tau4);
            assert!(
                (rl - hl).abs() < 1e-4 && (rr - hr).abs() < 1e-4,
                "expected ({hl}, {hr}), got ({rl}, {rr})"
            );
        }
    }

    #[test]
    fn test_sub_gaussian_kurtosis_is_treated_as_normal() {
        assert_eq!(compute_tukey_hh_params(0.1, 0.05), (0.0, 0.0));
        assert_eq!(compute_tukey_hh_params(0.0, GAUSSIAN_L_KURTOSIS), (0.0, 0.0));
        assert_eq!(compute_tukey_hh_params(f64::NAN, 0.3), (0.0, 0.0));
        assert_eq!(compute_tukey_hh_params(0.0, f64::INFINITY), (0.0, 0.0));
    }

    #[test]
    fn test_negative_skewness_swaps_parameters() {
        let (tau3, tau4) = tukey_hh_l_skewness_kurtosis(0.05, 0.3);
        let (pl, pr) = compute_tukey_hh_params(tau3, tau4);
        let (nl, nr) = compute_tukey_hh_params(-tau3, tau4);
        assert!((nl - pr).abs() < 1e-9);
        assert!((nr - pl).abs() < 1e-9);
    }

    #[test]
    fn test_unreachable_kurtosis_saturates_at_clamp() {
        let (hl, hr) = compute_tukey_hh_params(0.0, 0.99);
        assert_eq!(hl, hr);
        assert_eq!(hl, H_MAX);
        assert!(symmetric_l_kurtosis(H_MAX).is_finite());
    }

    #[test]
    fn test_symmetric_target_stays_symmetric() {
        let (hl, hr) = compute_tukey_hh_params(0.0, 0.2);
        assert!((hl - hr).abs() < 1e-6);
        let (_, tau4) = tukey_hh_l_skewness_kurtosis(hl, hr);
        assert!((tau4 - 0.2).abs() < 1e-6);
    }
}
