// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Strips a case-insensitive `chr` prefix and upper-cases the remainder so that
/// `chr1`, `CHR1` and `1` all compare equal.
pub fn normalize_chromosome(chromosome: &str) -> String {
    let mut normalized = chromosome.trim();
    if normalized
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("chr"))
    {
        normalized = &normalized[3..];
    }
    normalized.to_ascii_uppercase()
}

/// A genetic marker identified by its locus and alleles.
///
/// `allele1` is the counted allele: dosages in a genotype panel count copies of it and
/// summary-statistic correlations are signed with respect to it. `allele2` may be
/// absent when a summary-statistic file only reports the effect allele.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub chromosome: String,
    pub position: u64,
    pub allele1: String,
    pub allele2: Option<String>,
}

impl Marker {
    pub fn new(chromosome: &str, position: u64, allele1: &str, allele2: Option<&str>) -> Self {
        Self {
            chromosome: normalize_chromosome(chromosome),
            position,
            allele1: allele1.trim().to_ascii_uppercase(),
            allele2: allele2.map(|a| a.trim().to_ascii_uppercase()),
        }
    }

    /// The join key used by the matcher.
    #[inline]
    pub fn locus(&self) -> (&str, u64) {
        (self.chromosome.as_str(), self.position)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.allele2 {
            Some(a2) => write!(
                f,
                "{}:{}:{}:{}",
                self.chromosome, self.position, self.allele1, a2
            ),
            None => write!(f, "{}:{}:{}", self.chromosome, self.position, self.allele1),
        }
    }
}

/// GWAS summary statistics: one signed marker-phenotype correlation per marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub markers: Vec<Marker>,
    pub correlations: Vec<f64>,
}

impl SummaryStatistics {
    pub fn len(&self) -> usize {
        self.correlations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.correlations.is_empty()
    }
}

/// Defines the subset of participants of a panel that take part in a computation.
///
/// This enum makes the "all vs. subset" distinction explicit; it is threaded through
/// every call that touches participant-level data instead of relying on any shared
/// ordering state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantSubset {
    /// Every participant on the panel roster.
    All,
    /// Only the listed participants. Contains sorted, unique, 0-based roster indices.
    Indices(Vec<usize>),
}

impl ParticipantSubset {
    /// Number of selected participants on a roster of `total` people.
    pub fn count(&self, total: usize) -> usize {
        match self {
            ParticipantSubset::All => total,
            ParticipantSubset::Indices(indices) => indices.len(),
        }
    }

    /// Materializes the selected roster indices.
    pub fn resolve(&self, total: usize) -> Vec<usize> {
        match self {
            ParticipantSubset::All => (0..total).collect(),
            ParticipantSubset::Indices(indices) => indices.clone(),
        }
    }
}
