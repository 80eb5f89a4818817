// ========================================================================================
//
//                       THE PSEUDOVALIDATOR: LABEL-FREE HYPERPARAMETER CHOICE
//
// ========================================================================================
//
// Ranks every (shrinkage, penalty) combination of a pipeline result without outcome
// data. For standardized coefficients b, shrunk correlations r and the polygenic score
// built from b, the statistic
//
//     r'b / sqrt(var(PGS))
//
// estimates the out-of-sample correlation between the score and the phenotype, since
// var(PGS) estimates b'Rb for the LD matrix R of the validation panel.

use crate::genotype::GenotypeError;
use crate::lfdr::{LfdrError, local_fdr_correlation};
use crate::matching::{MatchOptions, match_markers};
use crate::pipeline::{PanelSpec, PipelineResult};
use crate::select::{SelectionError, resolve_participants};
use crate::types::Marker;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("The pipeline result holds no (shrinkage, penalty) combination to validate.")]
    EmptyGrid,

    #[error("Participant selection failed: {0}")]
    Selection(#[from] SelectionError),

    #[error("Genotype access failed: {0}")]
    Genotype(#[from] GenotypeError),

    #[error("Local FDR estimation failed: {0}")]
    Lfdr(#[from] LfdrError),
}

/// The pseudovalidation statistic of one hyperparameter combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationEntry {
    pub shrinkage: f64,
    pub lambda: f64,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct Pseudovalidation {
    /// One entry per combination, shrinkage-major.
    pub table: Vec<ValidationEntry>,
    pub best: ValidationEntry,
    /// Validation-panel markers the coefficients below refer to.
    pub markers: Vec<Marker>,
    /// Coefficients of the best combination, on the scale stored in the result.
    pub best_beta: Array1<f64>,
    /// Roster IDs of the participants scored.
    pub participant_ids: Vec<String>,
    /// Scores of the best combination.
    pub best_scores: Array1<f64>,
}

/// Scores every combination stored in `result` against `validation` and picks the best.
///
/// Stored correlations are shrunk by `1 - lfdr` when `fdr_shrinkage` is set. Scores
/// cached in the result are reused when `validation` is the result's own test panel
/// with no new participant filter and the coefficients are on the dosage scale.
pub fn pseudovalidate(
    result: &PipelineResult,
    validation: PanelSpec<'_>,
    fdr_shrinkage: bool,
) -> Result<Pseudovalidation, ValidationError> {
    let penalties = result.lambda().len();
    let combinations = result.shrinkage().len() * penalties;
    if combinations == 0 {
        return Err(ValidationError::EmptyGrid);
    }
    let panel = validation.panel;

    let cached = result.is_destandardized()
        && validation.filter.is_unfiltered()
        && panel.source_id() == result.test_source()
        && result.scores().is_some()
        && result.sd().is_some();

    let subset = if cached {
        result.participants().clone()
    } else {
        resolve_participants(panel.participant_ids(), validation.filter)?
    };

    // Re-orient the stored rows to the validation panel.
    let correspondence = match_markers(
        result.markers(),
        panel.markers(),
        MatchOptions {
            exclude_ambiguous: false,
            drop_duplicates: true,
        },
    );
    let correlations = correspondence.orient(result.correlations());
    let matched = correspondence.len();
    let mut beta = Array2::<f64>::zeros((matched, combinations));
    let stored = result.weight_matrix();
    for (k, (&q, &sign)) in correspondence
        .query_index
        .iter()
        .zip(&correspondence.sign)
        .enumerate()
    {
        beta.row_mut(k).assign(&stored.row(q).mapv(|b| b * sign));
    }

    let shrunk: Vec<f64> = if fdr_shrinkage {
        let fdr = local_fdr_correlation(&correlations)?;
        correlations
            .iter()
            .zip(&fdr.lfdr)
            .map(|(r, l)| r * (1.0 - l))
            .collect()
    } else {
        correlations.clone()
    };

    let sd: Vec<f64> = match (cached, result.sd()) {
        (true, Some(stored_sd)) => correspondence
            .query_index
            .iter()
            .map(|&q| stored_sd[q])
            .collect(),
        _ => panel
            .standard_deviation(&correspondence.reference_mask, &subset)?
            .to_vec(),
    };

    // Standardized coefficients and the dosage-scale weights that produce the PGS.
    let (standardized, weights) = if result.is_destandardized() {
        let column = Array1::from(sd.clone()).insert_axis(Axis(1));
        (&beta * &column, beta)
    } else {
        let inverse: Array1<f64> = sd
            .iter()
            .map(|&v| if v > 0.0 { 1.0 / v } else { 0.0 })
            .collect();
        let column = inverse.insert_axis(Axis(1));
        let weights = &beta * &column;
        (beta, weights)
    };

    let scores = match (cached, result.scores()) {
        (true, Some(scores)) => {
            log::info!("Reusing the scores stored with the pipeline result.");
            scores.clone()
        }
        _ => {
            if matched == 0 {
                log::warn!(
                    "No stored marker matched the validation panel; every combination is undefined."
                );
            }
            panel.score(weights.view(), &correspondence.reference_mask, &subset)?
        }
    };

    let shrunk = Array1::from(shrunk);
    let table: Vec<ValidationEntry> = (0..combinations)
        .map(|c| ValidationEntry {
            shrinkage: result.shrinkage()[c / penalties],
            lambda: result.lambda()[c % penalties],
            value: statistic(
                shrunk.view(),
                standardized.column(c),
                scores.column(c),
            ),
        })
        .collect();

    let best_index = best_combination(&table);
    let best = table[best_index];
    log::info!(
        "Best combination: shrinkage {} with lambda {} (statistic {:.4}).",
        best.shrinkage,
        best.lambda,
        best.value
    );

    let participant_ids = subset
        .resolve(panel.participant_ids().len())
        .into_iter()
        .filter_map(|i| panel.participant_ids().get(i).cloned())
        .collect();
    let markers = correspondence
        .reference_index
        .iter()
        .map(|&r| panel.markers()[r].clone())
        .collect();

    Ok(Pseudovalidation {
        best,
        markers,
        best_beta: weights_or_beta(result, &standardized, &weights, best_index),
        participant_ids,
        best_scores: scores.column(best_index).to_owned(),
        table,
    })
}

/// The best column on the scale the result stores its coefficients on.
fn weights_or_beta(
    result: &PipelineResult,
    standardized: &Array2<f64>,
    weights: &Array2<f64>,
    column: usize,
) -> Array1<f64> {
    if result.is_destandardized() {
        weights.column(column).to_owned()
    } else {
        standardized.column(column).to_owned()
    }
}

/// `(r . b) / sqrt(var(pgs))`, with non-finite outcomes mapped to negative infinity.
fn statistic(shrunk: ArrayView1<'_, f64>, beta: ArrayView1<'_, f64>, pgs: ArrayView1<'_, f64>) -> f64 {
    let value = shrunk.dot(&beta) / pgs.var(0.0).sqrt();
    if value.is_finite() {
        value
    } else {
        f64::NEG_INFINITY
    }
}

/// Index of the maximal value, taking the first on ties.
fn best_combination(table: &[ValidationEntry]) -> usize {
    let mut best = 0;
    for (i, entry) in table.iter().enumerate() {
        if entry.value > table[best].value {
            best = i;
        }
    }
    best
}
