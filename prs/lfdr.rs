// ========================================================================================
//
//                     LOCAL FALSE DISCOVERY RATES FOR CORRELATIONS
//
// ========================================================================================
//
// Marker-wise correlations are shrunk towards zero by their posterior probability of
// being null before pseudovalidation. Under the null a correlation r computed from
// kappa effective samples satisfies r^2 ~ Beta(1/2, (kappa - 1)/2). Kappa is estimated
// robustly from the bulk of the data, the null proportion by Storey's estimator and
// the marginal density of the null p-values by Grenander's estimator, i.e. the slopes
// of the least concave majorant of their empirical distribution function.

use statrs::function::beta::beta_reg;
use thiserror::Error;

/// Consistency constant turning a median absolute deviation into a standard deviation.
const MAD_SCALE: f64 = 1.4826;
/// Smallest admissible kappa; the null Beta needs (kappa - 1)/2 > 0.
const MIN_KAPPA: f64 = 3.0;
const MAX_KAPPA: f64 = 1e12;
/// Storey tuning parameter.
const STOREY_LAMBDA: f64 = 0.5;

#[derive(Error, Debug)]
pub enum LfdrError {
    #[error("Correlation at position {index} is {value}; correlations must lie strictly inside (-1, 1).")]
    InvalidCorrelation { index: usize, value: f64 },
}

/// Summary of a local FDR fit.
#[derive(Debug, Clone)]
pub struct LocalFdr {
    /// Posterior null probability of each correlation, in input order.
    pub lfdr: Vec<f64>,
    /// Estimated proportion of null markers.
    pub null_proportion: f64,
    /// Estimated effective sample size of the null correlation distribution.
    pub kappa: f64,
}

/// Estimates the local false discovery rate of every correlation.
pub fn local_fdr_correlation(correlations: &[f64]) -> Result<LocalFdr, LfdrError> {
    if let Some((index, &value)) = correlations
        .iter()
        .enumerate()
        .find(|(_, r)| !(r.is_finite() && r.abs() < 1.0))
    {
        return Err(LfdrError::InvalidCorrelation { index, value });
    }
    if correlations.is_empty() {
        return Ok(LocalFdr {
            lfdr: Vec::new(),
            null_proportion: 1.0,
            kappa: MIN_KAPPA,
        });
    }

    let kappa = estimate_kappa(correlations);
    let shape = (kappa - 1.0) / 2.0;
    let p_values: Vec<f64> = correlations
        .iter()
        .map(|&r| beta_reg(shape, 0.5, 1.0 - r * r))
        .collect();

    let m = p_values.len() as f64;
    let above = p_values.iter().filter(|&&p| p > STOREY_LAMBDA).count() as f64;
    let null_proportion = (above / ((1.0 - STOREY_LAMBDA) * m)).min(1.0);

    let majorant = least_concave_majorant(&p_values);
    let lfdr = p_values
        .iter()
        .map(|&p| {
            let density = majorant.density_at(p);
            if density.is_finite() && density > 0.0 {
                (null_proportion / density).min(1.0)
            } else {
                1.0
            }
        })
        .collect();

    log::debug!(
        "Local FDR: kappa = {kappa:.1}, estimated null proportion = {null_proportion:.3}"
    );

    Ok(LocalFdr {
        lfdr,
        null_proportion,
        kappa,
    })
}

fn estimate_kappa(correlations: &[f64]) -> f64 {
    let mut magnitudes: Vec<f64> = correlations.iter().map(|r| r.abs()).collect();
    magnitudes.sort_unstable_by(f64::total_cmp);
    let mid = magnitudes.len() / 2;
    let median = if magnitudes.len() % 2 == 0 {
        (magnitudes[mid - 1] + magnitudes[mid]) / 2.0
    } else {
        magnitudes[mid]
    };
    let sd = MAD_SCALE * median;
    (1.0 / (sd * sd)).clamp(MIN_KAPPA, MAX_KAPPA)
}

/// Vertices of the least concave majorant of an empirical CDF on [0, 1].
struct ConcaveMajorant {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl ConcaveMajorant {
    /// Slope of the majorant segment covering `p`, taking the left segment at a vertex.
    fn density_at(&self, p: f64) -> f64 {
        let k = self.x.partition_point(|&x| x < p).clamp(1, self.x.len() - 1);
        let dx = self.x[k] - self.x[k - 1];
        if dx > 0.0 {
            (self.y[k] - self.y[k - 1]) / dx
        } else {
            f64::INFINITY
        }
    }
}

fn least_concave_majorant(p_values: &[f64]) -> ConcaveMajorant {
    let mut sorted = p_values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    let m = sorted.len() as f64;

    // ECDF knots, keeping the highest step at tied values.
    let mut points: Vec<(f64, f64)> = vec![(0.0, 0.0)];
    for (i, &p) in sorted.iter().enumerate() {
        let height = (i + 1) as f64 / m;
        match points.last_mut() {
            Some(last) if last.0 == p => last.1 = height,
            _ => points.push((p, height)),
        }
    }
    if points.last().is_some_and(|&(x, _)| x < 1.0) {
        points.push((1.0, 1.0));
    }

    let mut hull: Vec<(f64, f64)> = Vec::with_capacity(points.len());
    for point in points {
        while hull.len() >= 2 {
            let (o, a) = (hull[hull.len() - 2], hull[hull.len() - 1]);
            let cross = (a.0 - o.0) * (point.1 - o.1) - (a.1 - o.1) * (point.0 - o.0);
            if cross >= 0.0 {
                hull.pop();
            } else {
                break;
            }
        }
        hull.push(point);
    }

    let (x, y) = hull.into_iter().unzip();
    ConcaveMajorant { x, y }
}
