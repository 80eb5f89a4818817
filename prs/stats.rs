// ========================================================================================
//                  Converting association p-values into marginal correlations
// ========================================================================================

use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

/// The largest f64 below one; extreme statistics at tiny sample sizes saturate here.
const MAX_CORRELATION: f64 = 1.0 - f64::EPSILON / 2.0;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("p-value at row {index} is {value}; p-values must lie in (0, 1].")]
    InvalidPValue { index: usize, value: f64 },

    #[error("Sample size at row {index} is {value}; at least 3 participants are required.")]
    InvalidSampleSize { index: usize, value: f64 },

    #[error("Direction at row {index} is not a finite number.")]
    InvalidDirection { index: usize },

    #[error("{what} has {found} entries but {expected} p-values were supplied.")]
    LengthMismatch {
        what: &'static str,
        found: usize,
        expected: usize,
    },

    #[error("Could not construct the Student t distribution with {0} degrees of freedom.")]
    Distribution(f64),
}

/// Converts two-sided p-values into correlation coefficients.
///
/// With `t` the upper `p/2` quantile of a Student t distribution on `n - 2` degrees
/// of freedom, the correlation is `sign * t / sqrt(n - 2 + t^2)`. Only the sign of
/// `direction` is used (a beta, log odds ratio or z statistic). A direction of exactly
/// zero gives a zero correlation.
pub fn p_to_correlation(
    p_values: &[f64],
    sample_sizes: &[f64],
    direction: &[f64],
) -> Result<Vec<f64>, StatsError> {
    let expected = p_values.len();
    for (what, found) in [
        ("The sample-size vector", sample_sizes.len()),
        ("The direction vector", direction.len()),
    ] {
        if found != expected {
            return Err(StatsError::LengthMismatch {
                what,
                found,
                expected,
            });
        }
    }

    p_values
        .iter()
        .zip(sample_sizes)
        .zip(direction)
        .enumerate()
        .map(|(index, ((&p, &n), &d))| {
            if !(p > 0.0 && p <= 1.0) {
                return Err(StatsError::InvalidPValue { index, value: p });
            }
            if !(n.is_finite() && n > 2.0) {
                return Err(StatsError::InvalidSampleSize { index, value: n });
            }
            if !d.is_finite() {
                return Err(StatsError::InvalidDirection { index });
            }
            let df = n - 2.0;
            let dist = StudentsT::new(0.0, 1.0, df).map_err(|_| StatsError::Distribution(df))?;
            // Lower tail keeps precision far below 1e-16.
            let t = -dist.inverse_cdf(p / 2.0);
            let r = (1.0 / (df / (t * t) + 1.0).sqrt()).min(MAX_CORRELATION);
            let sign = if d > 0.0 {
                1.0
            } else if d < 0.0 {
                -1.0
            } else {
                0.0
            };
            Ok(sign * r)
        })
        .collect()
}
