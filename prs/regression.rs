// ========================================================================================
//
//                       THE REGRESSION ENGINE: BLOCK-WISE LD-AWARE FITS
//
// ========================================================================================
//
// Drives the coordinate-descent solver over every LD block for every requested
// shrinkage value. Blocks are independent units of work and run in parallel; inside a
// block the reference dosages are read and standardized once, then each shrinkage
// value walks the penalty grid in the supplied order with warm starts. Each block
// writes only to its own rows of the assembled coefficient matrices.

use crate::blocks::BlockAssignment;
use crate::elnet::{PenaltyPath, SolverSettings, independent_path, lasso_path, standardize_block};
use crate::genotype::{GenotypeError, GenotypeService};
use crate::types::ParticipantSubset;
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegressionError {
    #[error("{what} has {found} entries but {expected} were expected.")]
    LengthMismatch {
        what: &'static str,
        found: usize,
        expected: usize,
    },

    #[error("Correlation at marker {index} is {value}; correlations must lie strictly inside (-1, 1).")]
    InvalidCorrelation { index: usize, value: f64 },

    #[error("Shrinkage value {0} is outside (0, 1].")]
    InvalidShrinkage(f64),

    #[error("Penalty value {0} must be positive and finite.")]
    InvalidPenalty(f64),

    #[error("The {0} grid is empty.")]
    EmptyGrid(&'static str),

    #[error("Reading reference genotypes failed: {0}")]
    Genotype(#[from] GenotypeError),
}

/// Checks that every correlation is finite and strictly inside (-1, 1).
pub fn validate_correlations(correlations: &[f64]) -> Result<(), RegressionError> {
    match correlations
        .iter()
        .enumerate()
        .find(|(_, r)| !(r.is_finite() && r.abs() < 1.0))
    {
        Some((index, &value)) => Err(RegressionError::InvalidCorrelation { index, value }),
        None => Ok(()),
    }
}

/// Checks the numeric contract of the hyperparameter grids: shrinkage values in
/// (0, 1], penalties positive. Monotonicity is not required.
pub fn validate_grids(shrinkage: &[f64], lambdas: &[f64]) -> Result<(), RegressionError> {
    if shrinkage.is_empty() {
        return Err(RegressionError::EmptyGrid("shrinkage"));
    }
    if lambdas.is_empty() {
        return Err(RegressionError::EmptyGrid("penalty"));
    }
    if let Some(&s) = shrinkage.iter().find(|&&s| !(s > 0.0 && s <= 1.0)) {
        return Err(RegressionError::InvalidShrinkage(s));
    }
    if let Some(&l) = lambdas.iter().find(|&&l| !(l.is_finite() && l > 0.0)) {
        return Err(RegressionError::InvalidPenalty(l));
    }
    Ok(())
}

/// Inputs of an LD-aware fit.
pub struct LdFitInput<'a> {
    /// Correlations oriented to the reference panel's counted alleles.
    pub correlations: &'a [f64],
    pub reference: &'a dyn GenotypeService,
    /// Reference-panel marker row of each correlation.
    pub reference_rows: &'a [usize],
    /// Block label of each correlation.
    pub blocks: &'a BlockAssignment,
    /// Reference participants contributing to the LD estimate.
    pub participants: &'a ParticipantSubset,
}

/// The coefficient path for one shrinkage value.
#[derive(Debug, Clone)]
pub struct ShrinkageFit {
    pub shrinkage: f64,
    /// markers x penalties.
    pub beta: Array2<f64>,
    /// True at a penalty when every block converged.
    pub converged: Vec<bool>,
    /// Objective summed over blocks at each penalty.
    pub objective: Vec<f64>,
}

/// Result of an LD-aware fit across a shrinkage grid.
#[derive(Debug, Clone)]
pub struct LdFit {
    pub fits: Vec<ShrinkageFit>,
    /// Reference-panel dosage standard deviation of each fitted marker, computed as a
    /// byproduct of standardization.
    pub sd: Array1<f64>,
}

impl LdFit {
    pub fn path(&self, shrinkage: f64) -> Option<&Array2<f64>> {
        self.fits
            .iter()
            .find(|fit| fit.shrinkage == shrinkage)
            .map(|fit| &fit.beta)
    }

    fn zeros(markers: usize, shrinkage: &[f64], penalties: usize) -> Self {
        Self {
            fits: shrinkage
                .iter()
                .map(|&s| {
                    let zero = PenaltyPath::zeros(markers, penalties);
                    ShrinkageFit {
                        shrinkage: s,
                        beta: zero.beta,
                        converged: zero.converged,
                        objective: zero.objective,
                    }
                })
                .collect(),
            sd: Array1::zeros(markers),
        }
    }
}

struct BlockOutcome {
    paths: Vec<PenaltyPath>,
    sd: Array1<f64>,
}

/// Fits every block of `input` for every shrinkage value in `shrinkage`.
///
/// Degenerate coverage is not an error: with fewer than two usable participants every
/// coefficient is zero, and empty blocks contribute nothing.
pub fn fit_ld(
    input: &LdFitInput<'_>,
    shrinkage: &[f64],
    lambdas: &[f64],
    settings: &SolverSettings,
) -> Result<LdFit, RegressionError> {
    let markers = input.correlations.len();
    if input.reference_rows.len() != markers {
        return Err(RegressionError::LengthMismatch {
            what: "reference row index",
            found: input.reference_rows.len(),
            expected: markers,
        });
    }
    if input.blocks.len() != markers {
        return Err(RegressionError::LengthMismatch {
            what: "block assignment",
            found: input.blocks.len(),
            expected: markers,
        });
    }
    validate_correlations(input.correlations)?;
    validate_grids(shrinkage, lambdas)?;

    let usable = input
        .participants
        .count(input.reference.participant_ids().len());
    if usable < 2 {
        log::warn!(
            "Only {usable} reference participant(s) remain after filtering; LD-aware coefficients are set to zero."
        );
        return Ok(LdFit::zeros(markers, shrinkage, lambdas.len()));
    }

    let groups = input.blocks.groups();
    log::info!(
        "Fitting {} markers in {} LD blocks over {} shrinkage x {} penalty values using {} reference participants.",
        markers,
        groups.len(),
        shrinkage.len(),
        lambdas.len(),
        usable
    );
    let start = Instant::now();

    let outcomes: Vec<BlockOutcome> = groups
        .par_iter()
        .map(|group| -> Result<BlockOutcome, RegressionError> {
            let rows: Vec<usize> = group.iter().map(|&i| input.reference_rows[i]).collect();
            let dosages = input.reference.dosages(&rows, input.participants)?;
            let block = standardize_block(dosages);
            let r: Array1<f64> = group.iter().map(|&i| input.correlations[i]).collect();
            let paths = shrinkage
                .iter()
                .map(|&s| lasso_path(block.x.view(), r.view(), s, lambdas, settings))
                .collect();
            Ok(BlockOutcome {
                paths,
                sd: block.sd,
            })
        })
        .collect::<Result<_, _>>()?;

    let mut fit = LdFit::zeros(markers, shrinkage, lambdas.len());
    let mut unconverged_blocks = vec![0usize; shrinkage.len()];
    for (group, outcome) in groups.iter().zip(&outcomes) {
        for (k, &marker) in group.iter().enumerate() {
            fit.sd[marker] = outcome.sd[k];
        }
        for (s_idx, path) in outcome.paths.iter().enumerate() {
            let target = &mut fit.fits[s_idx];
            for (k, &marker) in group.iter().enumerate() {
                target.beta.row_mut(marker).assign(&path.beta.row(k));
            }
            for (l, (&converged, &objective)) in
                path.converged.iter().zip(&path.objective).enumerate()
            {
                target.converged[l] &= converged;
                target.objective[l] += objective;
            }
            if path.converged.iter().any(|&c| !c) {
                unconverged_blocks[s_idx] += 1;
            }
        }
    }

    for (s_idx, &count) in unconverged_blocks.iter().enumerate() {
        if count > 0 {
            log::warn!(
                "Coordinate descent did not converge in {count} block(s) at shrinkage {} within {} iterations.",
                shrinkage[s_idx],
                settings.max_iterations
            );
        }
    }
    log::info!("> TIMING: LD-aware fit took {:.2?}", start.elapsed());

    Ok(fit)
}

/// The independent fit (implicit shrinkage 1) over all supplied correlations.
pub fn fit_independent(
    correlations: ArrayView1<'_, f64>,
    lambdas: &[f64],
) -> Result<Array2<f64>, RegressionError> {
    if let Some(slice) = correlations.as_slice() {
        validate_correlations(slice)?;
    } else {
        validate_correlations(&correlations.to_vec())?;
    }
    validate_grids(&[1.0], lambdas)?;
    Ok(independent_path(correlations, lambdas))
}
