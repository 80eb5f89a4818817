// ========================================================================================
//
//                       THE GENOTYPE SERVICE: PANEL ACCESS CONTRACT
//
// ========================================================================================
//
// Reference and test panels are external collaborators. The solver and the scorer only
// ever see them through `GenotypeService`, which hands out dosage blocks, per-marker
// standard deviations and polygenic scores for an explicit marker subset and an
// explicit participant subset. Implementations must behave as pure functions of those
// arguments so that blocks can be requested concurrently.

use crate::types::{Marker, ParticipantSubset};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenotypeError {
    #[error("Marker index {index} is out of range for a panel with {count} markers.")]
    MarkerOutOfRange { index: usize, count: usize },

    #[error("Participant index {index} is out of range for a panel with {count} participants.")]
    ParticipantOutOfRange { index: usize, count: usize },

    #[error("A marker mask of length {found} was supplied for a panel with {expected} markers.")]
    MaskLength { found: usize, expected: usize },

    #[error("The weight matrix has {found} rows but the marker mask selects {expected} markers.")]
    WeightRows { found: usize, expected: usize },

    #[error("Dosage matrix is {rows}x{cols}, expected {participants} participants by {markers} markers.")]
    Shape {
        rows: usize,
        cols: usize,
        participants: usize,
        markers: usize,
    },

    #[error("Genotype source '{source_id}' failed: {message}")]
    Source { source_id: String, message: String },
}

/// Access to a genotype panel.
///
/// Dosages count copies of each marker's `allele1`; missing calls are `NaN`.
pub trait GenotypeService: Send + Sync {
    /// A stable identifier for the underlying data (e.g. a file prefix). Two services
    /// with equal identifiers are treated as the same panel.
    fn source_id(&self) -> &str;

    /// The ordered marker list of the panel.
    fn markers(&self) -> &[Marker];

    /// The ordered participant roster of the panel.
    fn participant_ids(&self) -> &[String];

    /// Dosages for the requested markers (in the requested order) and participants,
    /// as a participants x markers matrix.
    fn dosages(
        &self,
        markers: &[usize],
        participants: &ParticipantSubset,
    ) -> Result<Array2<f64>, GenotypeError>;

    /// Sample standard deviation (divisor n - 1) of each masked marker over the
    /// selected participants, ignoring missing calls. Markers with fewer than two
    /// observed calls report zero.
    fn standard_deviation(
        &self,
        marker_mask: &[bool],
        participants: &ParticipantSubset,
    ) -> Result<Array1<f64>, GenotypeError> {
        let indices = mask_to_indices(marker_mask, self.markers().len())?;
        let dosages = self.dosages(&indices, participants)?;
        Ok(column_standard_deviations(&dosages))
    }

    /// Polygenic scores: for every selected participant and every weight column, the
    /// weighted sum of (mean-imputed) dosages over the masked markers. Returns a
    /// participants x weight-columns matrix.
    fn score(
        &self,
        weights: ArrayView2<'_, f64>,
        marker_mask: &[bool],
        participants: &ParticipantSubset,
    ) -> Result<Array2<f64>, GenotypeError> {
        let indices = mask_to_indices(marker_mask, self.markers().len())?;
        if weights.nrows() != indices.len() {
            return Err(GenotypeError::WeightRows {
                found: weights.nrows(),
                expected: indices.len(),
            });
        }
        let mut dosages = self.dosages(&indices, participants)?;
        impute_column_means(&mut dosages);
        Ok(dosages.dot(&weights))
    }
}

/// Converts a boolean mask into ascending indices after checking its length.
pub fn mask_to_indices(mask: &[bool], expected: usize) -> Result<Vec<usize>, GenotypeError> {
    if mask.len() != expected {
        return Err(GenotypeError::MaskLength {
            found: mask.len(),
            expected,
        });
    }
    Ok(mask
        .iter()
        .enumerate()
        .filter_map(|(i, &keep)| keep.then_some(i))
        .collect())
}

/// Replaces missing calls by the mean of the observed calls in the same column.
/// Columns without any observed call become zero.
pub fn impute_column_means(dosages: &mut Array2<f64>) {
    dosages
        .axis_iter_mut(Axis(1))
        .into_par_iter()
        .for_each(|mut column| {
            let (sum, count) = column
                .iter()
                .filter(|v| v.is_finite())
                .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
            let mean = if count > 0 { sum / count as f64 } else { 0.0 };
            column.mapv_inplace(|v| if v.is_finite() { v } else { mean });
        });
}

/// Sample standard deviation of each column over its observed (finite) entries.
pub fn column_standard_deviations(dosages: &Array2<f64>) -> Array1<f64> {
    let sds: Vec<f64> = dosages
        .axis_iter(Axis(1))
        .into_par_iter()
        .map(|column| {
            let observed: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
            if observed.len() < 2 {
                return 0.0;
            }
            let n = observed.len() as f64;
            let mean = observed.iter().sum::<f64>() / n;
            let ss: f64 = observed.iter().map(|v| (v - mean) * (v - mean)).sum();
            (ss / (n - 1.0)).sqrt()
        })
        .collect();
    Array1::from(sds)
}

/// An in-memory panel: a participants x markers dosage matrix with its marker list
/// and roster.
#[derive(Debug, Clone)]
pub struct DenseGenotypes {
    source_id: String,
    markers: Vec<Marker>,
    participant_ids: Vec<String>,
    dosages: Array2<f64>,
}

impl DenseGenotypes {
    pub fn new(
        source_id: impl Into<String>,
        markers: Vec<Marker>,
        participant_ids: Vec<String>,
        dosages: Array2<f64>,
    ) -> Result<Self, GenotypeError> {
        let (rows, cols) = dosages.dim();
        if rows != participant_ids.len() || cols != markers.len() {
            return Err(GenotypeError::Shape {
                rows,
                cols,
                participants: participant_ids.len(),
                markers: markers.len(),
            });
        }
        Ok(Self {
            source_id: source_id.into(),
            markers,
            participant_ids,
            dosages,
        })
    }

    pub fn n_participants(&self) -> usize {
        self.participant_ids.len()
    }

    pub fn n_markers(&self) -> usize {
        self.markers.len()
    }
}

impl GenotypeService for DenseGenotypes {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn markers(&self) -> &[Marker] {
        &self.markers
    }

    fn participant_ids(&self) -> &[String] {
        &self.participant_ids
    }

    fn dosages(
        &self,
        markers: &[usize],
        participants: &ParticipantSubset,
    ) -> Result<Array2<f64>, GenotypeError> {
        if let Some(&index) = markers.iter().find(|&&m| m >= self.n_markers()) {
            return Err(GenotypeError::MarkerOutOfRange {
                index,
                count: self.n_markers(),
            });
        }
        let rows = participants.resolve(self.n_participants());
        if let Some(&index) = rows.iter().find(|&&p| p >= self.n_participants()) {
            return Err(GenotypeError::ParticipantOutOfRange {
                index,
                count: self.n_participants(),
            });
        }
        Ok(self
            .dosages
            .select(Axis(0), &rows)
            .select(Axis(1), markers))
    }
}
