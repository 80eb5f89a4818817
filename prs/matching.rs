// ========================================================================================
//
//                       THE MARKER MATCHER: LOCUS JOIN AND ALLELE RECONCILIATION
//
// ========================================================================================
//
// Joins a query marker list (summary statistics, or an extracted panel) against a
// reference marker list on (chromosome, position), then decides per joined pair how
// the query's counted allele relates to the reference's. Matching never fails: when
// nothing overlaps, the returned correspondence is empty and its reference mask is
// all-false. Callers must check `is_empty`.
//
// Order of operations at a shared locus:
//   1. strand-ambiguous pairs are discarded (when requested),
//   2. alleles are reconciled, unreconcilable pairs are discarded,
//   3. duplicates are dropped among the survivors (when requested).

use crate::types::Marker;
use ahash::AHashMap;

/// Policy switches for one matching pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    /// Drop markers whose alleles are complementary bases (A/T, C/G).
    pub exclude_ambiguous: bool,
    /// Keep the correspondence one-to-one by retaining only the first pairing of any
    /// query or reference row.
    pub drop_duplicates: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            exclude_ambiguous: true,
            drop_duplicates: true,
        }
    }
}

/// How a query marker's alleles line up with a reference marker's alleles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Alleles agree verbatim.
    Same,
    /// The query's counted allele is the reference's other allele.
    Swapped,
    /// Alleles agree after taking the complementary strand.
    Complement,
    /// Complementary strand, and the counted allele is the reference's other allele.
    ComplementSwapped,
}

impl Orientation {
    /// The factor that re-expresses a query statistic in terms of the reference's
    /// counted allele.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Orientation::Same | Orientation::Complement => 1.0,
            Orientation::Swapped | Orientation::ComplementSwapped => -1.0,
        }
    }
}

/// The result of matching a query list against a reference list.
///
/// Entries `k` of `query_index`, `reference_index`, `orientation` and `sign` describe
/// one matched pair. Pairs are listed in ascending reference-row order, so
/// `reference_index` enumerates the `true` entries of `reference_mask` (exactly once
/// each when duplicates are dropped).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correspondence {
    pub query_index: Vec<usize>,
    pub reference_index: Vec<usize>,
    pub orientation: Vec<Orientation>,
    pub sign: Vec<f64>,
    /// Extraction mask over the reference list.
    pub reference_mask: Vec<bool>,
    /// Extraction mask over the query list.
    pub query_mask: Vec<bool>,
}

impl Correspondence {
    fn empty(query_len: usize, reference_len: usize) -> Self {
        Self {
            reference_mask: vec![false; reference_len],
            query_mask: vec![false; query_len],
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.query_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.query_index.is_empty()
    }

    /// Gathers per-query values into reference order and applies the orientation
    /// sign, e.g. to express summary-statistic correlations per reference allele.
    pub fn orient(&self, query_values: &[f64]) -> Vec<f64> {
        self.query_index
            .iter()
            .zip(&self.sign)
            .map(|(&q, &s)| query_values[q] * s)
            .collect()
    }

    /// True when no query row and no reference row appears in more than one pair.
    pub fn is_one_to_one(&self) -> bool {
        let mut seen_query = vec![false; self.query_mask.len()];
        let mut seen_reference = vec![false; self.reference_mask.len()];
        for (&q, &r) in self.query_index.iter().zip(&self.reference_index) {
            if seen_query[q] || seen_reference[r] {
                return false;
            }
            seen_query[q] = true;
            seen_reference[r] = true;
        }
        true
    }
}

/// Per-pass counters, logged after every match.
#[derive(Debug, Default)]
struct MatchDiagnostics {
    joined: usize,
    ambiguous: usize,
    allele_mismatch: usize,
    duplicates: usize,
}

/// A/T and C/G pairs cannot be strand-resolved from allele identity alone.
pub fn is_strand_ambiguous(a1: &str, a2: &str) -> bool {
    matches!(
        (a1, a2),
        ("A", "T") | ("T", "A") | ("C", "G") | ("G", "C")
    )
}

/// Complements a base string on the opposite strand. `None` for anything that is not
/// made of A/C/G/T (e.g. `*`, `-`, symbolic alleles).
pub fn complement(allele: &str) -> Option<String> {
    allele
        .chars()
        .map(|base| match base {
            'A' => Some('T'),
            'T' => Some('A'),
            'C' => Some('G'),
            'G' => Some('C'),
            _ => None,
        })
        .collect()
}

/// Compares a query allele pair against a reference allele pair on one strand.
/// Returns `Some(false)` for agreement, `Some(true)` for a swap.
fn compare_alleles(q1: &str, q2: Option<&str>, r1: &str, r2: Option<&str>) -> Option<bool> {
    match (q2, r2) {
        (Some(q2), Some(r2)) => {
            if q1 == r1 && q2 == r2 {
                Some(false)
            } else if q1 == r2 && q2 == r1 {
                Some(true)
            } else {
                None
            }
        }
        (None, Some(r2)) => {
            if q1 == r1 {
                Some(false)
            } else if q1 == r2 {
                Some(true)
            } else {
                None
            }
        }
        (Some(q2), None) => {
            if q1 == r1 {
                Some(false)
            } else if q2 == r1 {
                Some(true)
            } else {
                None
            }
        }
        (None, None) => (q1 == r1).then_some(false),
    }
}

/// Decides how `query` is oriented relative to `reference`, trying the verbatim
/// strand before the complementary one.
pub fn orient_alleles(query: &Marker, reference: &Marker) -> Option<Orientation> {
    let r1 = reference.allele1.as_str();
    let r2 = reference.allele2.as_deref();

    if let Some(swapped) = compare_alleles(&query.allele1, query.allele2.as_deref(), r1, r2) {
        return Some(if swapped {
            Orientation::Swapped
        } else {
            Orientation::Same
        });
    }

    let c1 = complement(&query.allele1)?;
    let c2 = match query.allele2.as_deref() {
        Some(a2) => Some(complement(a2)?),
        None => None,
    };
    compare_alleles(&c1, c2.as_deref(), r1, r2).map(|swapped| {
        if swapped {
            Orientation::ComplementSwapped
        } else {
            Orientation::Complement
        }
    })
}

/// Strand ambiguity is judged on the reference's allele pair, or on the query's pair
/// when the reference only reports one allele.
fn pair_is_ambiguous(query: &Marker, reference: &Marker) -> bool {
    match (&reference.allele2, &query.allele2) {
        (Some(r2), _) => is_strand_ambiguous(&reference.allele1, r2),
        (None, Some(q2)) => is_strand_ambiguous(&query.allele1, q2),
        (None, None) => false,
    }
}

/// Matches `query` against `reference` by (chromosome, position) and allele
/// orientation.
pub fn match_markers(query: &[Marker], reference: &[Marker], options: MatchOptions) -> Correspondence {
    let mut out = Correspondence::empty(query.len(), reference.len());
    let mut diagnostics = MatchDiagnostics::default();

    let mut query_by_locus: AHashMap<(&str, u64), Vec<usize>> =
        AHashMap::with_capacity(query.len());
    for (row, marker) in query.iter().enumerate() {
        query_by_locus.entry(marker.locus()).or_default().push(row);
    }

    let mut query_taken = vec![false; query.len()];
    let mut reference_taken = vec![false; reference.len()];

    for (reference_row, reference_marker) in reference.iter().enumerate() {
        let Some(candidates) = query_by_locus.get(&reference_marker.locus()) else {
            continue;
        };
        for &query_row in candidates {
            diagnostics.joined += 1;
            let query_marker = &query[query_row];

            if options.exclude_ambiguous && pair_is_ambiguous(query_marker, reference_marker) {
                diagnostics.ambiguous += 1;
                continue;
            }

            let Some(orientation) = orient_alleles(query_marker, reference_marker) else {
                diagnostics.allele_mismatch += 1;
                continue;
            };

            if options.drop_duplicates
                && (query_taken[query_row] || reference_taken[reference_row])
            {
                diagnostics.duplicates += 1;
                continue;
            }
            query_taken[query_row] = true;
            reference_taken[reference_row] = true;

            out.query_index.push(query_row);
            out.reference_index.push(reference_row);
            out.orientation.push(orientation);
            out.sign.push(orientation.sign());
            out.reference_mask[reference_row] = true;
            out.query_mask[query_row] = true;
        }
    }

    if out.is_empty() {
        log::warn!(
            "No markers matched between a list of {} and a reference list of {} ({} shared loci).",
            query.len(),
            reference.len(),
            diagnostics.joined
        );
    } else {
        log::info!(
            "Matched {} of {} markers ({} shared loci; dropped {} ambiguous, {} allele mismatches, {} duplicates).",
            out.len(),
            query.len(),
            diagnostics.joined,
            diagnostics.ambiguous,
            diagnostics.allele_mismatch,
            diagnostics.duplicates
        );
    }

    out
}
