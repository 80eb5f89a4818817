// ========================================================================================
//
//                       PENALIZED REGRESSION ON SUMMARY STATISTICS
//
// ========================================================================================
//
// For one LD block with standardized reference genotypes X (columns of unit norm, so
// that X'X = R is the empirical marker correlation matrix), marker-phenotype
// correlations r, shrinkage s and penalty lambda, the solver minimizes
//
//     f(b) = (1 - s) b'Rb + s b'b - 2 b'r + 2 lambda |b|_1
//
// by cyclic coordinate descent. The data term is carried as X scaled by sqrt(1 - s),
// with a running prediction yhat = sqrt(1 - s) X b, so each coordinate update costs
// one pass over the participants. At s = 1 the correlation term vanishes and the
// update reduces to the closed-form soft threshold of the independent fit.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Convergence settings for coordinate descent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// A sweep converges when no coefficient moved by this much or more.
    pub threshold: f64,
    /// Maximum number of full sweeps per penalty value.
    pub max_iterations: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            threshold: 1e-4,
            max_iterations: 10_000,
        }
    }
}

/// Reference genotypes for one block, standardized so each column has unit norm.
#[derive(Debug, Clone)]
pub struct StandardizedBlock {
    /// participants x markers.
    pub x: Array2<f64>,
    /// Sample standard deviation of each marker's observed dosages (zero when
    /// monomorphic or observed fewer than twice).
    pub sd: Array1<f64>,
}

/// Mean-imputes missing dosages, centers every column and scales it to unit norm.
/// Monomorphic columns, and every column when fewer than two participants are
/// present, become all-zero with a zero standard deviation.
pub fn standardize_block(mut dosages: Array2<f64>) -> StandardizedBlock {
    let n = dosages.nrows();
    let mut sd = Array1::<f64>::zeros(dosages.ncols());
    for (mut column, sd_slot) in dosages.axis_iter_mut(Axis(1)).zip(sd.iter_mut()) {
        let (sum, count) = column
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
        let mean = if count > 0 { sum / count as f64 } else { 0.0 };
        column.mapv_inplace(|v| if v.is_finite() { v - mean } else { 0.0 });
        let ss = column.dot(&column);
        if n < 2 || count < 2 || ss <= 0.0 {
            column.fill(0.0);
            continue;
        }
        // Imputed entries add nothing to ss, so this matches the observed-call sd.
        *sd_slot = (ss / (count - 1) as f64).sqrt();
        column.mapv_inplace(|v| v / ss.sqrt());
    }
    StandardizedBlock { x: dosages, sd }
}

/// Coefficients for one block along a penalty grid.
#[derive(Debug, Clone)]
pub struct PenaltyPath {
    /// markers x penalties.
    pub beta: Array2<f64>,
    pub converged: Vec<bool>,
    /// `f(b)` at each penalty.
    pub objective: Vec<f64>,
}

impl PenaltyPath {
    pub fn zeros(markers: usize, penalties: usize) -> Self {
        Self {
            beta: Array2::zeros((markers, penalties)),
            converged: vec![true; penalties],
            objective: vec![0.0; penalties],
        }
    }
}

#[inline]
pub fn soft_threshold(z: f64, lambda: f64) -> f64 {
    if z > lambda {
        z - lambda
    } else if z < -lambda {
        z + lambda
    } else {
        0.0
    }
}

/// The independent (no-LD) fit: `b = sign(r) * max(|r| - lambda, 0)` for every
/// penalty. Returns markers x penalties.
pub fn independent_path(correlations: ArrayView1<'_, f64>, lambdas: &[f64]) -> Array2<f64> {
    let mut beta = Array2::zeros((correlations.len(), lambdas.len()));
    for (mut column, &lambda) in beta.axis_iter_mut(Axis(1)).zip(lambdas) {
        column.assign(&correlations.mapv(|r| soft_threshold(r, lambda)));
    }
    beta
}

/// One run of cyclic coordinate descent at a fixed penalty. `beta` and `yhat` carry
/// the warm start in and the solution out. Returns whether the sweep converged.
fn coordinate_descent(
    x: ArrayView2<'_, f64>,
    diag: &[f64],
    correlations: ArrayView1<'_, f64>,
    lambda: f64,
    shrinkage: f64,
    settings: &SolverSettings,
    beta: &mut Array1<f64>,
    yhat: &mut Array1<f64>,
) -> bool {
    for _ in 0..settings.max_iterations {
        let mut max_change: f64 = 0.0;
        for (j, column) in x.axis_iter(Axis(1)).enumerate() {
            let previous = beta[j];
            let t = diag[j] * previous + correlations[j] - column.dot(&*yhat);
            let updated = soft_threshold(t, lambda) / (diag[j] + shrinkage);
            if updated == previous {
                continue;
            }
            let delta = updated - previous;
            beta[j] = updated;
            max_change = max_change.max(delta.abs());
            yhat.scaled_add(delta, &column);
        }
        if max_change < settings.threshold {
            return true;
        }
    }
    false
}

/// Solves one block along `lambdas`, strictly in the order given, starting each
/// penalty from the previous penalty's solution.
///
/// `x` must be a standardized block (see [`standardize_block`]) and `correlations`
/// must be aligned with its columns.
pub fn lasso_path(
    x: ArrayView2<'_, f64>,
    correlations: ArrayView1<'_, f64>,
    shrinkage: f64,
    lambdas: &[f64],
    settings: &SolverSettings,
) -> PenaltyPath {
    let (n, p) = x.dim();
    let scale = (1.0 - shrinkage).max(0.0).sqrt();
    let scaled = x.mapv(|v| v * scale);
    let diag: Vec<f64> = scaled
        .axis_iter(Axis(1))
        .map(|column| column.dot(&column))
        .collect();

    let mut path = PenaltyPath::zeros(p, lambdas.len());
    let mut beta = Array1::<f64>::zeros(p);
    let mut yhat = Array1::<f64>::zeros(n);

    for (l, &lambda) in lambdas.iter().enumerate() {
        let converged = coordinate_descent(
            scaled.view(),
            &diag,
            correlations,
            lambda,
            shrinkage,
            settings,
            &mut beta,
            &mut yhat,
        );
        let l1: f64 = beta.iter().map(|b| b.abs()).sum();
        let loss = yhat.dot(&yhat) - 2.0 * beta.dot(&correlations);
        path.objective[l] = loss + 2.0 * lambda * l1 + shrinkage * beta.dot(&beta);
        path.converged[l] = converged;
        path.beta.column_mut(l).assign(&beta);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Two perfectly correlated markers plus one independent marker, 4 participants.
    fn correlated_block() -> StandardizedBlock {
        let dosages = array![
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 0.0],
            [2.0, 2.0, 1.0],
            [1.0, 1.0, 2.0],
        ];
        standardize_block(dosages)
    }

    #[test]
    fn standardized_columns_have_unit_norm() {
        let block = correlated_block();
        for column in block.x.axis_iter(Axis(1)) {
            assert_abs_diff_eq!(column.dot(&column), 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(column.sum(), 0.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(block.sd[0], (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn monomorphic_and_tiny_blocks_standardize_to_zero() {
        let block = standardize_block(array![[1.0, 0.0], [1.0, 2.0], [1.0, f64::NAN]]);
        assert!(block.x.column(0).iter().all(|&v| v == 0.0));
        assert_eq!(block.sd[0], 0.0);
        assert!(block.sd[1] > 0.0);

        let single = standardize_block(array![[2.0, 1.0]]);
        assert!(single.x.iter().all(|&v| v == 0.0));
        assert!(single.sd.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn sd_byproduct_matches_observed_call_sd() {
        let dosages = array![
            [0.0, 1.0],
            [f64::NAN, 2.0],
            [2.0, f64::NAN],
            [1.0, 0.0],
            [f64::NAN, 2.0],
        ];
        let block = standardize_block(dosages.clone());
        let observed = crate::genotype::column_standard_deviations(&dosages);
        for (a, b) in block.sd.iter().zip(observed.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(block.sd[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn independent_path_soft_thresholds() {
        let r = array![0.3, -0.05, -0.2, 0.0];
        let beta = independent_path(r.view(), &[0.1, 0.25]);
        assert_eq!(beta.dim(), (4, 2));
        assert_abs_diff_eq!(beta[[0, 0]], 0.2, epsilon = 1e-15);
        assert_eq!(beta[[1, 0]], 0.0);
        assert_abs_diff_eq!(beta[[2, 0]], -0.1, epsilon = 1e-15);
        assert_abs_diff_eq!(beta[[0, 1]], 0.05, epsilon = 1e-15);
        assert_eq!(beta[[2, 1]], 0.0);
    }

    #[test]
    fn full_shrinkage_reproduces_the_independent_fit() {
        let block = correlated_block();
        let r = array![0.2, 0.15, -0.1];
        let lambdas = [0.01, 0.05, 0.12];
        let path = lasso_path(
            block.x.view(),
            r.view(),
            1.0,
            &lambdas,
            &SolverSettings::default(),
        );
        let independent = independent_path(r.view(), &lambdas);
        for (a, b) in path.beta.iter().zip(independent.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        assert!(path.converged.iter().all(|&c| c));
    }

    #[test]
    fn ld_fit_shares_signal_between_correlated_markers() {
        let block = correlated_block();
        let r = array![0.2, 0.2, 0.0];
        let path = lasso_path(
            block.x.view(),
            r.view(),
            0.5,
            &[0.01],
            &SolverSettings {
                threshold: 1e-10,
                max_iterations: 100_000,
            },
        );
        let b = path.beta.column(0);
        // The LD-aware estimate of the pair's combined effect is smaller than the
        // independent fit, which would double count the shared signal.
        let independent_total = 2.0 * soft_threshold(0.2, 0.01);
        assert!(b[0] + b[1] < independent_total);
        assert!(b[0] > 0.0 && b[1] > 0.0);
        assert!(path.converged[0]);
    }

    #[test]
    fn solution_satisfies_stationarity() {
        let block = correlated_block();
        let r = array![0.25, 0.1, -0.3];
        let s = 0.3;
        let lambda = 0.02;
        let path = lasso_path(
            block.x.view(),
            r.view(),
            s,
            &[lambda],
            &SolverSettings {
                threshold: 1e-12,
                max_iterations: 1_000_000,
            },
        );
        let b = path.beta.column(0).to_owned();
        let corr: Array2<f64> = block.x.t().dot(&block.x);
        let gradient = corr.dot(&b) * (1.0 - s) + &b * s - &r;
        for j in 0..3 {
            if b[j] != 0.0 {
                assert_abs_diff_eq!(gradient[j], -lambda * b[j].signum(), epsilon = 1e-8);
            } else {
                assert!(gradient[j].abs() <= lambda + 1e-8);
            }
        }
    }

    #[test]
    fn warm_started_path_matches_cold_starts() {
        let block = correlated_block();
        let r = array![0.25, 0.1, -0.3];
        let settings = SolverSettings {
            threshold: 1e-12,
            max_iterations: 1_000_000,
        };
        let lambdas = [0.2, 0.05, 0.01];
        let path = lasso_path(block.x.view(), r.view(), 0.4, &lambdas, &settings);
        for (l, &lambda) in lambdas.iter().enumerate() {
            let cold = lasso_path(block.x.view(), r.view(), 0.4, &[lambda], &settings);
            for j in 0..3 {
                assert_abs_diff_eq!(path.beta[[j, l]], cold.beta[[j, 0]], epsilon = 1e-8);
            }
            assert_abs_diff_eq!(path.objective[l], cold.objective[0], epsilon = 1e-10);
        }
    }

    #[test]
    fn non_convergence_is_reported() {
        let block = correlated_block();
        let r = array![0.25, 0.1, -0.3];
        let path = lasso_path(
            block.x.view(),
            r.view(),
            0.1,
            &[0.001],
            &SolverSettings {
                threshold: 0.0,
                max_iterations: 1,
            },
        );
        assert!(!path.converged[0]);
    }
}
