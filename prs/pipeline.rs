// ========================================================================================
//
//                       THE PIPELINE ORCHESTRATOR: FROM STATISTICS TO SCORES
//
// ========================================================================================
//
// Reconciles the three marker lists (summary statistics, reference panel, test panel),
// runs the LD-aware fit on the markers all three share, fills every other test-panel
// marker with the independent estimate, optionally rescales to the dosage scale and
// finally scores the test panel. The output is an immutable `PipelineResult`.
//
// Row conventions: every coefficient matrix in a result has one row per test-panel
// marker that matched the summary statistics, in ascending test-panel order, and one
// column per penalty value. Without a test panel the reference panel plays that role.

use crate::blocks::{BlockAssignment, BlockError, BlockSource, assign_blocks};
use crate::config::{ConfigError, LassosumConfig};
use crate::genotype::{GenotypeError, GenotypeService};
use crate::matching::{MatchOptions, match_markers};
use crate::regression::{
    LdFit, LdFitInput, RegressionError, fit_independent, fit_ld, validate_correlations,
};
use crate::select::{ParticipantFilter, SelectionError, resolve_participants};
use crate::types::{Marker, ParticipantSubset, SummaryStatistics};
use ahash::AHashMap;
use ndarray::{Array1, Array2, Axis, s};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Summary statistics list {markers} markers but {correlations} correlations.")]
    SummaryLength { markers: usize, correlations: usize },

    #[error(
        "Destandardization needs a test panel to compute standard deviations from; supply a test panel or disable destandardization."
    )]
    DestandardizeWithoutTest,

    #[error("A standard deviation vector of length {found} was supplied for {expected} markers.")]
    SdLength { found: usize, expected: usize },

    #[error("The coefficients are already on the dosage scale.")]
    AlreadyDestandardized,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid input to the regression: {0}")]
    Regression(#[from] RegressionError),

    #[error("Participant selection failed: {0}")]
    Selection(#[from] SelectionError),

    #[error("LD block assignment failed: {0}")]
    Block(#[from] BlockError),

    #[error("Genotype access failed: {0}")]
    Genotype(#[from] GenotypeError),

    #[error("Failed to read or write pipeline result file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML pipeline result file: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Failed to serialize pipeline result to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// A genotype panel together with the participant filter to apply to it.
#[derive(Clone, Copy)]
pub struct PanelSpec<'a> {
    pub panel: &'a dyn GenotypeService,
    pub filter: &'a ParticipantFilter,
}

impl<'a> PanelSpec<'a> {
    pub fn new(panel: &'a dyn GenotypeService, filter: &'a ParticipantFilter) -> Self {
        Self { panel, filter }
    }
}

/// The immutable product of one pipeline run.
///
/// Fields are ordered so that the TOML encoding lists plain values before tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    destandardized: bool,
    shrinkage: Vec<f64>,
    lambda: Vec<f64>,
    /// `source_id` of the panel the rows refer to.
    test_source: String,
    /// Whether `test_source` was a separate test panel (and hence was scored).
    has_test_panel: bool,
    /// Panel row of each coefficient row.
    test_rows: Vec<usize>,
    /// Extraction mask over the panel's markers; `true` exactly at `test_rows`.
    test_mask: Vec<bool>,
    /// Whether each row was estimated with LD (also present in the reference panel).
    in_reference: Vec<bool>,
    /// Summary-statistic correlations oriented to each row's counted allele.
    correlations: Vec<f64>,
    /// Dosage standard deviation of each row, when computed.
    sd: Option<Vec<f64>>,
    /// Roster IDs of the participants the scores belong to.
    participant_ids: Vec<String>,
    participants: ParticipantSubset,
    markers: Vec<Marker>,
    /// One rows x penalties matrix per shrinkage value, in `shrinkage` order.
    paths: Vec<Array2<f64>>,
    /// participants x (shrinkage x penalty), shrinkage-major.
    scores: Option<Array2<f64>>,
}

impl PipelineResult {
    pub fn shrinkage(&self) -> &[f64] {
        &self.shrinkage
    }

    pub fn lambda(&self) -> &[f64] {
        &self.lambda
    }

    pub fn is_destandardized(&self) -> bool {
        self.destandardized
    }

    pub fn test_source(&self) -> &str {
        &self.test_source
    }

    pub fn has_test_panel(&self) -> bool {
        self.has_test_panel
    }

    pub fn test_rows(&self) -> &[usize] {
        &self.test_rows
    }

    pub fn test_mask(&self) -> &[bool] {
        &self.test_mask
    }

    pub fn in_reference(&self) -> &[bool] {
        &self.in_reference
    }

    pub fn correlations(&self) -> &[f64] {
        &self.correlations
    }

    pub fn sd(&self) -> Option<&[f64]> {
        self.sd.as_deref()
    }

    pub fn participant_ids(&self) -> &[String] {
        &self.participant_ids
    }

    pub fn participants(&self) -> &ParticipantSubset {
        &self.participants
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn paths(&self) -> &[Array2<f64>] {
        &self.paths
    }

    /// The coefficient path of one shrinkage value.
    pub fn path(&self, shrinkage: f64) -> Option<&Array2<f64>> {
        self.shrinkage
            .iter()
            .position(|&s| s == shrinkage)
            .map(|i| &self.paths[i])
    }

    pub fn scores(&self) -> Option<&Array2<f64>> {
        self.scores.as_ref()
    }

    /// Number of coefficient rows.
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// All paths side by side as one rows x (shrinkage x penalty) weight matrix.
    pub fn weight_matrix(&self) -> Array2<f64> {
        stack_paths(&self.paths, self.len(), self.lambda.len())
    }

    /// A new bundle with every coefficient divided by the matching standard deviation.
    /// Scores are dropped since they no longer correspond to the coefficients.
    pub fn destandardize(&self, sd: &[f64]) -> Result<Self, PipelineError> {
        if self.destandardized {
            return Err(PipelineError::AlreadyDestandardized);
        }
        if sd.len() != self.len() {
            return Err(PipelineError::SdLength {
                found: sd.len(),
                expected: self.len(),
            });
        }
        Ok(Self {
            destandardized: true,
            sd: Some(sd.to_vec()),
            paths: destandardize_paths(&self.paths, sd),
            scores: None,
            ..self.clone()
        })
    }

    /// Saves the result to a file in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a result from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let toml_string = fs::read_to_string(path)?;
        let result = toml::from_str(&toml_string)?;
        Ok(result)
    }
}

/// Divides every row of every path by its standard deviation. Rows with a
/// non-positive or undefined standard deviation become zero.
pub fn destandardize_paths(paths: &[Array2<f64>], sd: &[f64]) -> Vec<Array2<f64>> {
    let inverse: Array1<f64> = sd
        .iter()
        .map(|&v| if v.is_finite() && v > 0.0 { 1.0 / v } else { 0.0 })
        .collect();
    let column = inverse.insert_axis(Axis(1));
    paths.iter().map(|path| path * &column).collect()
}

fn stack_paths(paths: &[Array2<f64>], rows: usize, penalties: usize) -> Array2<f64> {
    let mut weights = Array2::zeros((rows, paths.len() * penalties));
    for (i, path) in paths.iter().enumerate() {
        weights
            .slice_mut(s![.., i * penalties..(i + 1) * penalties])
            .assign(path);
    }
    weights
}

/// A marker shared by the summary statistics, the reference panel and the test panel.
struct SharedMarker {
    /// Coefficient row in the result.
    row: usize,
    /// Reference-panel marker row.
    reference_row: usize,
    /// Summary-statistic correlation oriented to the reference allele.
    correlation: f64,
    /// Sign taking a reference-allele coefficient to the test allele.
    sign: f64,
}

/// Runs the full pipeline.
///
/// Pre-computed `BlockSource::Labels` carry one label per reference-panel marker.
/// Without a test panel the reference panel defines the coefficient rows and no scores
/// are produced.
pub fn run_pipeline(
    sumstats: &SummaryStatistics,
    reference: PanelSpec<'_>,
    test: Option<PanelSpec<'_>>,
    blocks: &BlockSource,
    config: &LassosumConfig,
) -> Result<PipelineResult, PipelineError> {
    // --- Input contract, checked before any computation ---
    config.validate()?;
    if sumstats.markers.len() != sumstats.correlations.len() {
        return Err(PipelineError::SummaryLength {
            markers: sumstats.markers.len(),
            correlations: sumstats.correlations.len(),
        });
    }
    validate_correlations(&sumstats.correlations)?;
    if config.destandardize && test.is_none() {
        return Err(PipelineError::DestandardizeWithoutTest);
    }
    if let BlockSource::Labels(labels) = blocks {
        if labels.len() != reference.panel.markers().len() {
            return Err(BlockError::LabelCountMismatch {
                found: labels.len(),
                expected: reference.panel.markers().len(),
            }
            .into());
        }
    }
    let reference_subset =
        resolve_participants(reference.panel.participant_ids(), reference.filter)?;
    let target = test.unwrap_or(reference);
    let target_subset = match test {
        Some(spec) => resolve_participants(spec.panel.participant_ids(), spec.filter)?,
        None => reference_subset.clone(),
    };
    let same_panel = target.panel.source_id() == reference.panel.source_id();

    let options = MatchOptions {
        exclude_ambiguous: config.exclude_ambiguous,
        drop_duplicates: true,
    };
    let start = Instant::now();

    // --- Stage 1: Statistics against the reference panel ---
    log::info!("> Stage 1: Matching summary statistics to the reference panel...");
    let to_reference = match_markers(&sumstats.markers, reference.panel.markers(), options);
    let reference_correlations = to_reference.orient(&sumstats.correlations);
    let extracted: Vec<Marker> = to_reference
        .reference_index
        .iter()
        .map(|&r| reference.panel.markers()[r].clone())
        .collect();

    // --- Stage 2: Statistics and extracted reference markers against the test panel ---
    log::info!("> Stage 2: Matching against the test panel...");
    let to_target = if same_panel {
        to_reference.clone()
    } else {
        match_markers(&sumstats.markers, target.panel.markers(), options)
    };
    let row_of: AHashMap<usize, usize> = to_target
        .reference_index
        .iter()
        .enumerate()
        .map(|(row, &panel_row)| (panel_row, row))
        .collect();
    let mut shared: Vec<SharedMarker> = if same_panel {
        (0..to_reference.len())
            .map(|k| SharedMarker {
                row: k,
                reference_row: to_reference.reference_index[k],
                correlation: reference_correlations[k],
                sign: 1.0,
            })
            .collect()
    } else {
        let common = match_markers(&extracted, target.panel.markers(), options);
        common
            .query_index
            .iter()
            .zip(&common.reference_index)
            .zip(&common.sign)
            .filter_map(|((&k, panel_row), &sign)| {
                row_of.get(panel_row).map(|&row| SharedMarker {
                    row,
                    reference_row: to_reference.reference_index[k],
                    correlation: reference_correlations[k],
                    sign,
                })
            })
            .collect()
    };
    shared.sort_by_key(|m| m.reference_row);
    log::info!(
        "{} markers are shared by the summary statistics and the test panel, {} of them also by the reference panel.",
        to_target.len(),
        shared.len()
    );

    let rows = to_target.len();
    let penalties = config.lambda.len();
    let mut in_reference = vec![false; rows];
    for m in &shared {
        in_reference[m.row] = true;
    }

    // --- Stage 3: LD blocks over the shared markers ---
    log::info!("> Stage 3: Assigning LD blocks...");
    let assignment = shared_block_assignment(&shared, reference.panel, blocks)?;

    // --- Stage 4: LD-aware fit for shrinkage below one ---
    let ld_shrinkage: Vec<f64> = config.shrinkage.iter().copied().filter(|&s| s < 1.0).collect();
    let ld_fit: Option<LdFit> = if ld_shrinkage.is_empty() {
        None
    } else {
        log::info!(
            "> Stage 4: LD-aware fit at shrinkage {:?} on {} markers...",
            ld_shrinkage,
            shared.len()
        );
        if shared.is_empty() {
            log::warn!(
                "No marker is shared by all three marker lists; every coefficient comes from the independent fit."
            );
        }
        let correlations: Vec<f64> = shared.iter().map(|m| m.correlation).collect();
        let reference_rows: Vec<usize> = shared.iter().map(|m| m.reference_row).collect();
        Some(fit_ld(
            &LdFitInput {
                correlations: &correlations,
                reference: reference.panel,
                reference_rows: &reference_rows,
                blocks: &assignment,
                participants: &reference_subset,
            },
            &ld_shrinkage,
            &config.lambda,
            &config.solver,
        )?)
    };

    // --- Stage 5: Independent fit over statistics and test panel ---
    let target_correlations = to_target.orient(&sumstats.correlations);
    let independent = if config.shrinkage.contains(&1.0) {
        log::info!("> Stage 5: Independent fit on {rows} markers...");
        fit_independent(Array1::from(target_correlations.clone()).view(), &config.lambda)?
    } else {
        Array2::zeros((rows, penalties))
    };

    // --- Stage 6: Imputation ---
    let paths: Vec<Array2<f64>> = config
        .shrinkage
        .iter()
        .map(|&s| {
            let mut beta = independent.clone();
            if let Some(ld_beta) = ld_fit.as_ref().and_then(|fit| fit.path(s)) {
                for (j, m) in shared.iter().enumerate() {
                    beta.row_mut(m.row)
                        .assign(&ld_beta.row(j).mapv(|b| b * m.sign));
                }
            }
            beta
        })
        .collect();

    let markers: Vec<Marker> = to_target
        .reference_index
        .iter()
        .map(|&r| target.panel.markers()[r].clone())
        .collect();
    let participant_ids: Vec<String> = target_subset
        .resolve(target.panel.participant_ids().len())
        .into_iter()
        .filter_map(|i| target.panel.participant_ids().get(i).cloned())
        .collect();

    let mut result = PipelineResult {
        destandardized: false,
        shrinkage: config.shrinkage.clone(),
        lambda: config.lambda.clone(),
        test_source: target.panel.source_id().to_string(),
        has_test_panel: test.is_some(),
        test_rows: to_target.reference_index.clone(),
        test_mask: to_target.reference_mask.clone(),
        in_reference,
        correlations: target_correlations,
        sd: None,
        participant_ids,
        participants: target_subset.clone(),
        markers,
        paths,
        scores: None,
    };

    if test.is_none() {
        log::info!("No test panel supplied; returning coefficients without scores.");
        log::info!("> TIMING: Pipeline took {:.2?}", start.elapsed());
        return Ok(result);
    }

    // --- Stage 7: Optional destandardization ---
    if config.destandardize {
        log::info!("> Stage 7: Converting coefficients to the dosage scale...");
        let reusable = (same_panel && reference_subset == target_subset)
            .then_some(ld_fit.as_ref())
            .flatten();
        let sd = test_panel_sd(&result, &shared, reusable, target.panel, &target_subset)?;
        let non_positive = sd.iter().filter(|&&v| !(v > 0.0)).count();
        if non_positive > 0 {
            log::warn!(
                "{non_positive} marker(s) have a non-positive standard deviation in the test panel; their coefficients are set to zero."
            );
        }
        result = result.destandardize(&sd)?;
    }

    // --- Stage 8: Scoring ---
    log::info!(
        "> Stage 8: Scoring {} participants over {} coefficient sets...",
        result.participant_ids.len(),
        result.shrinkage.len() * penalties
    );
    let weights = result.weight_matrix();
    let scores = target
        .panel
        .score(weights.view(), &result.test_mask, &target_subset)?;
    result.scores = Some(scores);

    log::info!("> TIMING: Pipeline took {:.2?}", start.elapsed());
    Ok(result)
}

/// Block labels for the shared markers, in `shared` order.
fn shared_block_assignment(
    shared: &[SharedMarker],
    reference: &dyn GenotypeService,
    blocks: &BlockSource,
) -> Result<BlockAssignment, BlockError> {
    let reference_markers = reference.markers();
    let chromosomes: Vec<String> = shared
        .iter()
        .map(|m| reference_markers[m.reference_row].chromosome.clone())
        .collect();
    let positions: Vec<u64> = shared
        .iter()
        .map(|m| reference_markers[m.reference_row].position)
        .collect();
    let source = match blocks {
        BlockSource::Labels(labels) => {
            BlockSource::Labels(shared.iter().map(|m| labels[m.reference_row].clone()).collect())
        }
        BlockSource::Breakpoints(_) => blocks.clone(),
    };
    assign_blocks(&source, &chromosomes, &positions)
}

/// Standard deviations of every result row in the test panel, reusing the ones the
/// LD fit computed when it ran on the same panel and participants.
fn test_panel_sd(
    result: &PipelineResult,
    shared: &[SharedMarker],
    reusable: Option<&LdFit>,
    panel: &dyn GenotypeService,
    participants: &ParticipantSubset,
) -> Result<Vec<f64>, GenotypeError> {
    let mut sd = vec![f64::NAN; result.len()];
    if let Some(fit) = reusable {
        for (j, m) in shared.iter().enumerate() {
            sd[m.row] = fit.sd[j];
        }
    }
    let mut mask = vec![false; result.test_mask.len()];
    let mut pending = Vec::new();
    for (row, (&value, &panel_row)) in sd.iter().zip(&result.test_rows).enumerate() {
        if value.is_nan() {
            mask[panel_row] = true;
            pending.push(row);
        }
    }
    if !pending.is_empty() {
        log::debug!(
            "Requesting standard deviations of {} markers from the test panel.",
            pending.len()
        );
        let computed = panel.standard_deviation(&mask, participants)?;
        for (&row, &value) in pending.iter().zip(computed.iter()) {
            sd[row] = value;
        }
    }
    Ok(sd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::LdBreakpoints;
    use crate::genotype::DenseGenotypes;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use tempfile::tempdir;

    fn marker(pos: u64, a1: &str, a2: &str) -> Marker {
        Marker::new("1", pos, a1, Some(a2))
    }

    fn panel(id: &str, markers: Vec<Marker>, dosages: Array2<f64>) -> DenseGenotypes {
        let ids = (0..dosages.nrows()).map(|i| format!("{id}{i}")).collect();
        DenseGenotypes::new(id, markers, ids, dosages).unwrap()
    }

    fn dosages(rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(i, j)| ((i * 7 + j * 3 + i * j) % 3) as f64)
    }

    fn config(shrinkage: Vec<f64>) -> LassosumConfig {
        LassosumConfig {
            shrinkage,
            lambda: vec![0.02, 0.005],
            ..LassosumConfig::default()
        }
    }

    fn no_blocks() -> BlockSource {
        BlockSource::Breakpoints(LdBreakpoints::default())
    }

    #[test]
    fn markers_missing_from_reference_keep_the_independent_estimate() {
        let sumstats = SummaryStatistics {
            markers: vec![marker(10, "A", "G"), marker(20, "C", "T"), marker(30, "A", "C")],
            correlations: vec![0.1, -0.05, 0.08],
        };
        let reference = panel("ref", vec![marker(10, "A", "G"), marker(20, "C", "T")], dosages(8, 2));
        let test = panel(
            "test",
            vec![marker(10, "A", "G"), marker(20, "T", "C"), marker(30, "A", "C")],
            dosages(6, 3),
        );
        let none = ParticipantFilter::default();
        let result = run_pipeline(
            &sumstats,
            PanelSpec::new(&reference, &none),
            Some(PanelSpec::new(&test, &none)),
            &no_blocks(),
            &config(vec![0.5, 1.0]),
        )
        .unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result.in_reference(), &[true, true, false]);
        // Marker 20 is swapped in the test panel.
        assert_eq!(result.correlations(), &[0.1, 0.05, 0.08]);
        let independent = result.path(1.0).unwrap();
        let ld = result.path(0.5).unwrap();
        for l in 0..2 {
            assert_eq!(ld[[2, l]], independent[[2, l]]);
        }
        assert_abs_diff_eq!(independent[[2, 0]], 0.06, epsilon = 1e-12);
        assert_eq!(result.scores().unwrap().dim(), (6, 4));
    }

    #[test]
    fn zero_path_is_used_when_independent_fit_is_not_requested() {
        let sumstats = SummaryStatistics {
            markers: vec![marker(10, "A", "G"), marker(30, "A", "C")],
            correlations: vec![0.1, 0.08],
        };
        let reference = panel("ref", vec![marker(10, "A", "G")], dosages(8, 1));
        let test = panel("test", vec![marker(10, "A", "G"), marker(30, "A", "C")], dosages(5, 2));
        let none = ParticipantFilter::default();
        let result = run_pipeline(
            &sumstats,
            PanelSpec::new(&reference, &none),
            Some(PanelSpec::new(&test, &none)),
            &no_blocks(),
            &config(vec![0.5]),
        )
        .unwrap();
        let path = result.path(0.5).unwrap();
        assert_eq!(path.row(1).to_vec(), vec![0.0, 0.0]);
        assert!(path[[0, 1]] > 0.0);
        assert!(result.path(1.0).is_none());
    }

    #[test]
    fn destandardization_without_test_panel_is_rejected_up_front() {
        let sumstats = SummaryStatistics {
            markers: vec![marker(10, "A", "G")],
            correlations: vec![0.1],
        };
        let reference = panel("ref", vec![marker(10, "A", "G")], dosages(4, 1));
        let none = ParticipantFilter::default();
        let mut cfg = config(vec![0.5]);
        cfg.destandardize = true;
        let err = run_pipeline(&sumstats, PanelSpec::new(&reference, &none), None, &no_blocks(), &cfg)
            .unwrap_err();
        assert!(matches!(err, PipelineError::DestandardizeWithoutTest));
    }

    #[test]
    fn invalid_correlations_fail_before_matching() {
        let sumstats = SummaryStatistics {
            markers: vec![marker(10, "A", "G")],
            correlations: vec![1.0],
        };
        let reference = panel("ref", vec![marker(10, "A", "G")], dosages(4, 1));
        let none = ParticipantFilter::default();
        let err = run_pipeline(
            &sumstats,
            PanelSpec::new(&reference, &none),
            None,
            &no_blocks(),
            &config(vec![0.5]),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Regression(_)));
    }

    #[test]
    fn without_test_panel_rows_follow_the_reference() {
        let sumstats = SummaryStatistics {
            markers: vec![marker(20, "C", "T"), marker(10, "G", "A"), marker(99, "A", "G")],
            correlations: vec![0.05, 0.1, 0.2],
        };
        let reference = panel("ref", vec![marker(10, "A", "G"), marker(20, "C", "T")], dosages(8, 2));
        let none = ParticipantFilter::default();
        let result = run_pipeline(
            &sumstats,
            PanelSpec::new(&reference, &none),
            None,
            &no_blocks(),
            &config(vec![0.5, 1.0]),
        )
        .unwrap();
        assert_eq!(result.test_rows(), &[0, 1]);
        assert_eq!(result.correlations(), &[-0.1, 0.05]);
        assert!(result.scores().is_none());
        assert!(!result.has_test_panel());
    }

    #[test]
    fn destandardize_divides_by_sd_and_zeroes_degenerate_rows() {
        let paths = vec![array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]];
        let out = destandardize_paths(&paths, &[2.0, 0.0, -1.0]);
        assert_eq!(out[0], array![[0.5, 1.0], [0.0, 0.0], [0.0, 0.0]]);
    }

    #[test]
    fn same_panel_destandardization_reuses_reference_sd() {
        let markers = vec![marker(10, "A", "G"), marker(20, "C", "T"), marker(30, "A", "C")];
        let sumstats = SummaryStatistics {
            markers: markers.clone(),
            correlations: vec![0.1, -0.05, 0.08],
        };
        let reference = panel("shared", markers, dosages(9, 3));
        let none = ParticipantFilter::default();
        let mut cfg = config(vec![0.5, 1.0]);
        cfg.destandardize = true;
        let result = run_pipeline(
            &sumstats,
            PanelSpec::new(&reference, &none),
            Some(PanelSpec::new(&reference, &none)),
            &no_blocks(),
            &cfg,
        )
        .unwrap();
        let expected = reference
            .standard_deviation(&[true, true, true], &ParticipantSubset::All)
            .unwrap();
        for (a, b) in result.sd().unwrap().iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
        assert!(result.is_destandardized());
        assert_eq!(result.scores().unwrap().dim(), (9, 4));
    }

    #[test]
    fn reused_and_requested_sd_agree_with_missing_calls() {
        let markers = vec![marker(10, "A", "G"), marker(20, "C", "T"), marker(30, "A", "C")];
        let sumstats = SummaryStatistics {
            markers: markers.clone(),
            correlations: vec![0.1, -0.05, 0.08],
        };
        let mut values = dosages(9, 3);
        values[[1, 0]] = f64::NAN;
        values[[4, 1]] = f64::NAN;
        values[[7, 0]] = f64::NAN;
        let reference = panel("shared", markers.clone(), values.clone());
        let copy = panel("copy", markers, values);
        let none = ParticipantFilter::default();
        let mut cfg = config(vec![0.5, 1.0]);
        cfg.destandardize = true;
        let run = |test: &DenseGenotypes| {
            run_pipeline(
                &sumstats,
                PanelSpec::new(&reference, &none),
                Some(PanelSpec::new(test, &none)),
                &no_blocks(),
                &cfg,
            )
            .unwrap()
        };
        let reused = run(&reference);
        let requested = run(&copy);
        for (a, b) in reused.sd().unwrap().iter().zip(requested.sd().unwrap()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        for (a, b) in reused.paths().iter().zip(requested.paths()) {
            for (x, y) in a.iter().zip(b.iter()) {
                assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn label_vectors_are_per_reference_marker() {
        let markers = vec![marker(10, "A", "G"), marker(20, "C", "T")];
        let sumstats = SummaryStatistics {
            markers: markers.clone(),
            correlations: vec![0.1, -0.05],
        };
        let reference = panel("ref", markers, dosages(8, 2));
        let none = ParticipantFilter::default();
        let err = run_pipeline(
            &sumstats,
            PanelSpec::new(&reference, &none),
            None,
            &BlockSource::Labels(vec!["a".into()]),
            &config(vec![0.5]),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Block(_)));
    }

    #[test]
    fn results_survive_a_toml_round_trip() {
        let sumstats = SummaryStatistics {
            markers: vec![marker(10, "A", "G"), marker(20, "C", "T")],
            correlations: vec![0.1, -0.05],
        };
        let reference = panel("ref", vec![marker(10, "A", "G"), marker(20, "C", "T")], dosages(8, 2));
        let test = panel("test", vec![marker(10, "A", "G"), marker(20, "C", "T")], dosages(4, 2));
        let keep = ParticipantFilter::keep(vec!["test1".into(), "test3".into()]);
        let none = ParticipantFilter::default();
        let result = run_pipeline(
            &sumstats,
            PanelSpec::new(&reference, &none),
            Some(PanelSpec::new(&test, &keep)),
            &no_blocks(),
            &config(vec![0.5, 1.0]),
        )
        .unwrap();
        assert_eq!(result.participant_ids(), &["test1".to_string(), "test3".to_string()]);

        let dir = tempdir().unwrap();
        let path = dir.path().join("result.toml");
        result.save(&path).unwrap();
        let loaded = PipelineResult::load(&path).unwrap();
        assert_eq!(loaded, result);
    }
}
