// ========================================================================================
//
//                       THE BLOCK PARTITIONER: LD BLOCK ASSIGNMENT
//
// ========================================================================================
//
// The genome-wide LD matrix is approximated as block-diagonal. Every marker in a block
// is solved jointly with the rest of the block, and markers in different blocks never
// interact. This module produces one label per marker, either by cutting each
// chromosome at externally supplied breakpoints or by taking a caller-supplied label
// vector verbatim.

use ahash::AHashMap;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("chromosome and position arrays differ in length ({chromosomes} vs {positions}).")]
    LengthMismatch { chromosomes: usize, positions: usize },

    #[error(
        "A pre-computed block label vector has {found} entries but {expected} markers are included."
    )]
    LabelCountMismatch { found: usize, expected: usize },

    #[error("Breakpoint chromosome and position arrays differ in length ({chromosomes} vs {positions}).")]
    BreakpointLengthMismatch { chromosomes: usize, positions: usize },
}

/// Per-chromosome block boundaries. Positions need not be sorted or unique; they are
/// normalized on use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LdBreakpoints {
    pub chromosomes: Vec<String>,
    pub positions: Vec<u64>,
}

impl LdBreakpoints {
    pub fn new(chromosomes: Vec<String>, positions: Vec<u64>) -> Result<Self, BlockError> {
        if chromosomes.len() != positions.len() {
            return Err(BlockError::BreakpointLengthMismatch {
                chromosomes: chromosomes.len(),
                positions: positions.len(),
            });
        }
        let chromosomes = chromosomes
            .iter()
            .map(|c| crate::types::normalize_chromosome(c))
            .collect();
        Ok(Self {
            chromosomes,
            positions,
        })
    }

    fn sorted_by_chromosome(&self) -> AHashMap<&str, Vec<u64>> {
        let mut grouped: AHashMap<&str, BTreeSet<u64>> = AHashMap::new();
        for (chr, &pos) in self.chromosomes.iter().zip(&self.positions) {
            grouped.entry(chr.as_str()).or_default().insert(pos);
        }
        grouped
            .into_iter()
            .map(|(chr, set)| (chr, set.into_iter().collect()))
            .collect()
    }
}

/// Where block labels come from.
#[derive(Debug, Clone)]
pub enum BlockSource {
    /// Cut chromosomes at the given breakpoints. An empty set of breakpoints makes
    /// every chromosome a single block.
    Breakpoints(LdBreakpoints),
    /// One label per included marker, used as-is.
    Labels(Vec<String>),
}

/// One label per marker. All markers sharing a label form one coupled LD block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAssignment {
    labels: Vec<String>,
}

impl BlockAssignment {
    /// Wraps a pre-computed label vector after checking it covers every marker.
    pub fn from_labels(labels: Vec<String>, marker_count: usize) -> Result<Self, BlockError> {
        if labels.len() != marker_count {
            return Err(BlockError::LabelCountMismatch {
                found: labels.len(),
                expected: marker_count,
            });
        }
        Ok(Self { labels })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Marker indices grouped by label. Groups appear in order of first occurrence
    /// and indices within a group are ascending, so the union of groups covers every
    /// marker exactly once.
    pub fn groups(&self) -> Vec<Vec<usize>> {
        let mut slot_of: AHashMap<&str, usize> = AHashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (idx, label) in self.labels.iter().enumerate() {
            let slot = *slot_of.entry(label.as_str()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(idx);
        }
        groups
    }
}

/// Resolves a `BlockSource` for markers given by chromosome and position.
pub fn assign_blocks(
    source: &BlockSource,
    chromosomes: &[String],
    positions: &[u64],
) -> Result<BlockAssignment, BlockError> {
    match source {
        BlockSource::Breakpoints(breaks) => split_genome(chromosomes, positions, breaks),
        BlockSource::Labels(labels) => {
            BlockAssignment::from_labels(labels.clone(), chromosomes.len())
        }
    }
}

/// Index of the block containing `position` among the half-open intervals
/// `(breaks[i-1], breaks[i]]`, `i = 1..breaks.len()`. Positions outside the outermost
/// breakpoints are folded into the nearest terminal block.
fn block_index(breaks: &[u64], position: u64) -> usize {
    if breaks.len() < 2 {
        return 0;
    }
    let upper = breaks.partition_point(|&b| b < position);
    upper.clamp(1, breaks.len() - 1) - 1
}

/// Assigns each marker to the LD block containing it on its chromosome.
///
/// Labels are `"{chromosome}:{block}"`, with `block` counted from zero along the
/// chromosome. Markers on chromosomes with no breakpoints share a single block.
pub fn split_genome(
    chromosomes: &[String],
    positions: &[u64],
    breakpoints: &LdBreakpoints,
) -> Result<BlockAssignment, BlockError> {
    if chromosomes.len() != positions.len() {
        return Err(BlockError::LengthMismatch {
            chromosomes: chromosomes.len(),
            positions: positions.len(),
        });
    }

    let breaks_by_chr = breakpoints.sorted_by_chromosome();
    let no_breaks: Vec<u64> = Vec::new();

    let labels: Vec<String> = chromosomes
        .iter()
        .zip(positions)
        .map(|(chr, &pos)| {
            let chr = crate::types::normalize_chromosome(chr);
            let breaks = breaks_by_chr.get(chr.as_str()).unwrap_or(&no_breaks);
            format!("{chr}:{}", block_index(breaks, pos))
        })
        .collect();

    let distinct: BTreeSet<&str> = labels.iter().map(String::as_str).collect();
    log::info!(
        "Partitioned {} markers into {} LD blocks.",
        labels.len(),
        distinct.len()
    );
    if log::log_enabled!(log::Level::Debug) {
        let mut per_chromosome: AHashMap<&str, usize> = AHashMap::new();
        for label in &distinct {
            let chr = label.rsplit_once(':').map_or(*label, |(chr, _)| chr);
            *per_chromosome.entry(chr).or_default() += 1;
        }
        let mut counts: Vec<(&str, usize)> = per_chromosome.into_iter().collect();
        counts.sort_by(|a, b| compare_chromosomes(a.0, b.0));
        for (chr, count) in counts {
            log::debug!("  chromosome {chr}: {count} blocks");
        }
    }

    Ok(BlockAssignment { labels })
}

/// Natural ordering of chromosome labels (`2` before `10`, numbers before `X`).
pub fn compare_chromosomes(a: &str, b: &str) -> Ordering {
    natord::compare(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn markers_fall_into_half_open_intervals() {
        let breaks = LdBreakpoints::new(strings(&["1", "1", "1"]), vec![100, 200, 300]).unwrap();
        let chrs = strings(&["1", "1", "1", "1"]);
        let positions = vec![101, 200, 201, 300];
        let blocks = split_genome(&chrs, &positions, &breaks).unwrap();
        assert_eq!(blocks.labels(), strings(&["1:0", "1:0", "1:1", "1:1"]));
    }

    #[test]
    fn markers_outside_breakpoints_join_terminal_blocks() {
        let breaks = LdBreakpoints::new(strings(&["1", "1", "1"]), vec![300, 100, 200]).unwrap();
        let chrs = strings(&["1", "1", "1"]);
        let positions = vec![5, 150, 10_000];
        let blocks = split_genome(&chrs, &positions, &breaks).unwrap();
        assert_eq!(blocks.labels(), strings(&["1:0", "1:0", "1:1"]));
        assert_eq!(blocks.groups(), vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn chromosomes_without_breakpoints_form_one_block() {
        let breaks = LdBreakpoints::new(strings(&["chr1", "1"]), vec![100, 200]).unwrap();
        let chrs = strings(&["2", "1", "2", "chr1"]);
        let positions = vec![1, 150, 99_999, 160];
        let blocks = split_genome(&chrs, &positions, &breaks).unwrap();
        assert_eq!(blocks.labels(), strings(&["2:0", "1:0", "2:0", "1:0"]));
        assert_eq!(blocks.groups(), vec![vec![0, 2], vec![1, 3]]);
    }

    #[test]
    fn single_breakpoint_keeps_everything_together() {
        let breaks = LdBreakpoints::new(strings(&["3"]), vec![500]).unwrap();
        let blocks = split_genome(&strings(&["3", "3"]), &[1, 1000], &breaks).unwrap();
        assert_eq!(blocks.groups(), vec![vec![0, 1]]);
    }

    #[test]
    fn supplied_labels_must_cover_every_marker() {
        let source = BlockSource::Labels(strings(&["a", "b"]));
        let err = assign_blocks(&source, &strings(&["1", "1", "1"]), &[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            BlockError::LabelCountMismatch {
                found: 2,
                expected: 3
            }
        ));

        let source = BlockSource::Labels(strings(&["b", "a", "b"]));
        let blocks = assign_blocks(&source, &strings(&["1", "1", "1"]), &[1, 2, 3]).unwrap();
        assert_eq!(blocks.groups(), vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        assert!(LdBreakpoints::new(strings(&["1"]), vec![]).is_err());
        let err = split_genome(&strings(&["1"]), &[], &LdBreakpoints::default()).unwrap_err();
        assert!(matches!(err, BlockError::LengthMismatch { .. }));
    }

    #[test]
    fn chromosome_order_is_natural() {
        let mut chrs = vec!["10", "X", "2", "1"];
        chrs.sort_by(|a, b| compare_chromosomes(a, b));
        assert_eq!(chrs, vec!["1", "2", "10", "X"]);
    }
}
