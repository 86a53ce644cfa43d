//! Normal-distribution special functions.
//!
//! Abramowitz & Stegun polynomial approximations, accurate enough for the
//! L-moment quadratures and solver tolerances used elsewhere in this crate.

/// 1/√(2π)
pub(crate) const FRAC_1_SQRT_2PI: f64 = 0.3989422804014326779399460599343818684758586311649;

/// Standard normal density φ(x) = (1/√(2π))·exp(−x²/2).
pub fn standard_normal_pdf(x: f64) -> f64 {
    FRAC_1_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF Φ(x), Abramowitz & Stegun 26.2.17.
///
/// Maximum absolute error below 7.5e-8.
///
/// ```
/// use statcrab_core::numeric::standard_normal_cdf;
/// assert!((standard_normal_cdf(0.0) - 0.5).abs() < 1e-8);
/// assert!((standard_normal_cdf(1.96) - 0.975).abs() < 1e-3);
/// ```
pub fn standard_normal_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x == f64::INFINITY {
        return 1.0;
    }
    if x == f64::NEG_INFINITY {
        return 0.0;
    }

    // Evaluate on |x| and mirror: Φ(−x) = 1 − Φ(x).
    let ax = x.abs();
    let k = 1.0 / (1.0 + 0.2316419 * ax);
    let poly = k
        * (0.319381530
            + k * (-0.356563782 + k * (1.781477937 + k * (-1.821255978 + k * 1.330274429))));
    let upper = standard_normal_pdf(ax) * poly;

    if x >= 0.0 {
        1.0 - upper
    } else {
        upper
    }
}

/// Error function erf(x), Abramowitz & Stegun 7.1.28.
///
/// Maximum absolute error below 1.5e-7. Used by the tests as an independent
/// cross-check of [`standard_normal_cdf`] through
/// Φ(x) = (1 + erf(x/√2))/2.
pub fn erf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let ax = x.abs();

    const P: f64 = 0.3275911;
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;

    let t = 1.0 / (1.0 + P * ax);
    let poly = t * (A1 + t * (A2 + t * (A3 + t * (A4 + t * A5))));
    sign * (1.0 - poly * (-ax * ax).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_peak_and_symmetry() {
        assert!((standard_normal_pdf(0.0) - FRAC_1_SQRT_2PI).abs() < 1e-15);
        assert_eq!(standard_normal_pdf(1.3), standard_normal_pdf(-1.3));
    }

    #[test]
    fn test_cdf_known_values() {
        // Table values to 4+ decimals.
        let cases = [
            (0.0, 0.5),
            (1.0, 0.8413447),
            (-1.0, 0.1586553),
            (1.96, 0.9750021),
            (2.575829, 0.995),
            (-3.0, 0.0013499),
        ];
        for (x, expected) in cases {
            assert!(
                (standard_normal_cdf(x) - expected).abs() < 1e-6,
                "Phi({x}) != {expected}"
            );
        }
    }

    #[test]
    fn test_cdf_limits_and_monotonicity() {
        assert_eq!(standard_normal_cdf(f64::INFINITY), 1.0);
        assert_eq!(standard_normal_cdf(f64::NEG_INFINITY), 0.0);
        assert!(standard_normal_cdf(f64::NAN).is_nan());

        let mut prev = 0.0;
        for i in 0..160 {
            let x = -8.0 + 0.1 * i as f64;
            let p = standard_normal_cdf(x);
            assert!(p >= prev - 1e-9, "CDF decreased at {x}");
            prev = p;
        }
    }

    #[test]
    fn test_cdf_agrees_with_erf() {
        for i in -40..=40 {
            let x = 0.1 * i as f64;
            let via_erf = 0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2));
            assert!(
                (standard_normal_cdf(x) - via_erf).abs() < 5e-7,
                "mismatch at {x}"
            );
        }
    }

    #[test]
    fn test_erf_known_values() {
        assert!(erf(0.0).abs() < 1e-12);
        assert!((erf(1.0) - 0.8427008).abs() < 1e-6);
        assert!((erf(-1.0) + 0.8427008).abs() < 1e-6);
        assert!((erf(3.0) - 0.9999779).abs() < 1e-6);
    }
}
