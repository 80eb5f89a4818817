// ========================================================================================
//
//                       PLAIN-TEXT INPUTS AND TAB-DELIMITED OUTPUTS
//
// ========================================================================================
//
// Readers for summary statistics, LD block regions, participant ID lists and text
// genotype panels, all of which may be gzip-compressed, plus TSV writers for
// coefficients, scores and pseudovalidation tables.

use crate::blocks::{BlockError, LdBreakpoints};
use crate::genotype::{DenseGenotypes, GenotypeError};
use crate::pipeline::PipelineResult;
use crate::stats::{StatsError, p_to_correlation};
use crate::types::{Marker, SummaryStatistics, normalize_chromosome};
use crate::validate::Pseudovalidation;
use ahash::AHashSet;
use flate2::read::MultiGzDecoder;
use ndarray::Array2;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("Opening {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("Error reading {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("{path}, line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("{path} has no '{column}' column.")]
    MissingColumn { path: String, column: &'static str },

    #[error(
        "{0} reports p-values but no sample size; add an 'n' column or supply a fixed sample size."
    )]
    MissingSampleSize(String),

    #[error("Failed to write TSV output: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to write output: {0}")]
    Write(#[from] std::io::Error),

    #[error("Converting p-values to correlations failed: {0}")]
    Stats(#[from] StatsError),

    #[error("Invalid LD block file: {0}")]
    Block(#[from] BlockError),

    #[error("Invalid genotype panel: {0}")]
    Genotype(#[from] GenotypeError),
}

// ========================================================================================
//                                   Line-oriented sources
// ========================================================================================

/// Sequential, line-oriented access to text data regardless of compression.
pub trait TextSource: Send {
    /// The next line without its terminator, or `None` at end of input.
    fn next_line<'a>(&'a mut self) -> Result<Option<&'a [u8]>, IoError>;

    /// The 1-based number of the line last returned.
    fn line_number(&self) -> usize;

    fn path_display(&self) -> &str;
}

struct LocalTextSource {
    reader: Box<dyn BufRead + Send>,
    line: Vec<u8>,
    line_active: bool,
    line_number: usize,
    path_display: String,
}

impl TextSource for LocalTextSource {
    fn next_line<'a>(&'a mut self) -> Result<Option<&'a [u8]>, IoError> {
        if self.line_active {
            self.line.clear();
            self.line_active = false;
        }

        let bytes_read =
            self.reader
                .read_until(b'\n', &mut self.line)
                .map_err(|source| IoError::Read {
                    path: self.path_display.clone(),
                    source,
                })?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }

        self.line_number += 1;
        self.line_active = true;
        Ok(Some(&self.line))
    }

    fn line_number(&self) -> usize {
        self.line_number
    }

    fn path_display(&self) -> &str {
        &self.path_display
    }
}

/// Opens a local text file, transparently decompressing `.gz` files.
pub fn open_text_source(path: &Path) -> Result<Box<dyn TextSource>, IoError> {
    let path_display = path.display().to_string();
    let file = File::open(path).map_err(|source| IoError::Open {
        path: path_display.clone(),
        source,
    })?;
    let inner: Box<dyn Read + Send> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(LocalTextSource {
        reader: Box::new(BufReader::new(inner)),
        line: Vec::with_capacity(1024),
        line_active: false,
        line_number: 0,
        path_display,
    }))
}

fn parse_error(source: &dyn TextSource, message: impl Into<String>) -> IoError {
    IoError::Parse {
        path: source.path_display().to_string(),
        line: source.line_number(),
        message: message.into(),
    }
}

/// Reads every non-blank line as owned whitespace-separated fields.
fn read_records(source: &mut dyn TextSource) -> Result<Vec<(usize, Vec<String>)>, IoError> {
    let mut records = Vec::new();
    while let Some(line) = source.next_line()? {
        let fields: Vec<String> = String::from_utf8_lossy(line)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if fields.is_empty() || fields[0].starts_with('#') {
            continue;
        }
        records.push((source.line_number(), fields));
    }
    Ok(records)
}

fn is_missing(field: &str) -> bool {
    matches!(field, "NA" | "na" | "NaN" | "nan" | "." | "")
}

// ========================================================================================
//                                   Summary statistics
// ========================================================================================

fn find_column(header: &[String], aliases: &[&str]) -> Option<usize> {
    header
        .iter()
        .position(|h| aliases.iter().any(|a| h.eq_ignore_ascii_case(a)))
}

enum Effect {
    Correlation(usize),
    PValue {
        p: usize,
        direction: usize,
        log_scale: bool,
        n: Option<usize>,
    },
}

/// Reads headed summary statistics.
///
/// Required columns are `chr`, `pos` and `a1` (the allele the statistic counts),
/// `a2` is optional. Either a `cor` column is present, or a `p` column with a signed
/// `beta`, `z` or `or` column and a sample size (an `n` column or `sample_size`).
/// Rows with a missing value in a used column are skipped.
pub fn read_summary_statistics(
    path: &Path,
    sample_size: Option<f64>,
) -> Result<SummaryStatistics, IoError> {
    let mut source = open_text_source(path)?;
    let path_display = source.path_display().to_string();
    let header: Vec<String> = source
        .next_line()?
        .map(|line| {
            String::from_utf8_lossy(line)
                .split_whitespace()
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if header.is_empty() {
        return Err(parse_error(source.as_ref(), "missing header line"));
    }
    let missing = |column: &'static str| IoError::MissingColumn {
        path: path_display.clone(),
        column,
    };
    let chr_col = find_column(&header, &["chr", "chrom", "chromosome"]).ok_or_else(|| missing("chr"))?;
    let pos_col = find_column(&header, &["pos", "bp", "position"]).ok_or_else(|| missing("pos"))?;
    let a1_col = find_column(&header, &["a1", "effect_allele"]).ok_or_else(|| missing("a1"))?;
    let a2_col = find_column(&header, &["a2", "other_allele"]);

    let effect = match find_column(&header, &["cor", "r"]) {
        Some(col) => Effect::Correlation(col),
        None => {
            let p = find_column(&header, &["p", "pval", "p_value"]).ok_or_else(|| missing("cor"))?;
            let (direction, log_scale) = match find_column(&header, &["beta", "z"]) {
                Some(col) => (col, false),
                None => (
                    find_column(&header, &["or"]).ok_or_else(|| missing("beta"))?,
                    true,
                ),
            };
            let n = find_column(&header, &["n"]);
            if n.is_none() && sample_size.is_none() {
                return Err(IoError::MissingSampleSize(path_display.clone()));
            }
            Effect::PValue {
                p,
                direction,
                log_scale,
                n,
            }
        }
    };

    let records = read_records(source.as_mut())?;
    let mut markers = Vec::with_capacity(records.len());
    let mut correlations = Vec::with_capacity(records.len());
    let mut p_values = Vec::new();
    let mut sizes = Vec::new();
    let mut directions = Vec::new();
    let mut skipped = 0usize;

    let number = |fields: &[String], col: usize, line: usize| -> Result<Option<f64>, IoError> {
        let field = fields.get(col).ok_or_else(|| IoError::Parse {
            path: path_display.clone(),
            line,
            message: format!("expected at least {} fields, found {}", col + 1, fields.len()),
        })?;
        if is_missing(field) {
            return Ok(None);
        }
        field.parse::<f64>().map(Some).map_err(|e| IoError::Parse {
            path: path_display.clone(),
            line,
            message: format!("'{field}' is not a number: {e}"),
        })
    };

    for (line, fields) in &records {
        let line = *line;
        let width = fields.len();
        let field = |col: usize| {
            fields.get(col).map(String::as_str).ok_or_else(|| IoError::Parse {
                path: path_display.clone(),
                line,
                message: format!("expected at least {} fields, found {width}", col + 1),
            })
        };
        let position: u64 = field(pos_col)?.parse().map_err(|e| IoError::Parse {
            path: path_display.clone(),
            line,
            message: format!("invalid position: {e}"),
        })?;
        let a2 = match a2_col {
            Some(col) => Some(field(col)?),
            None => None,
        };
        let marker = Marker::new(field(chr_col)?, position, field(a1_col)?, a2);

        match &effect {
            Effect::Correlation(col) => match number(fields, *col, line)? {
                Some(r) => {
                    markers.push(marker);
                    correlations.push(r);
                }
                None => skipped += 1,
            },
            Effect::PValue {
                p,
                direction,
                log_scale,
                n,
            } => {
                let p = number(fields, *p, line)?;
                let d = number(fields, *direction, line)?;
                let size = match n {
                    Some(col) => number(fields, *col, line)?,
                    None => sample_size,
                };
                match (p, d, size) {
                    (Some(p), Some(d), Some(size)) => {
                        markers.push(marker);
                        p_values.push(p);
                        directions.push(if *log_scale { d.ln() } else { d });
                        sizes.push(size);
                    }
                    _ => skipped += 1,
                }
            }
        }
    }

    if !p_values.is_empty() {
        correlations = p_to_correlation(&p_values, &sizes, &directions)?;
    }
    if skipped > 0 {
        log::warn!("Skipped {skipped} summary-statistic rows with missing values in {path_display}.");
    }
    log::info!("Read {} summary statistics from {path_display}.", markers.len());

    Ok(SummaryStatistics {
        markers,
        correlations,
    })
}

// ========================================================================================
//                                   LD block regions
// ========================================================================================

/// Reads a `chr start stop` region file into breakpoints: the first start of every
/// chromosome plus every stop. A header line is skipped when present.
pub fn read_ld_blocks(path: &Path) -> Result<LdBreakpoints, IoError> {
    let mut source = open_text_source(path)?;
    let records = read_records(source.as_mut())?;
    let path_display = source.path_display().to_string();

    let mut chromosomes = Vec::new();
    let mut positions = Vec::new();
    let mut seen: AHashSet<String> = AHashSet::new();
    for (index, (line, fields)) in records.iter().enumerate() {
        if fields.len() < 3 {
            return Err(IoError::Parse {
                path: path_display.clone(),
                line: *line,
                message: format!("expected 'chr start stop', found {} fields", fields.len()),
            });
        }
        let (start, stop) = match (fields[1].parse::<u64>(), fields[2].parse::<u64>()) {
            (Ok(start), Ok(stop)) => (start, stop),
            _ if index == 0 => continue,
            _ => {
                return Err(IoError::Parse {
                    path: path_display.clone(),
                    line: *line,
                    message: format!("invalid region '{} {}'", fields[1], fields[2]),
                });
            }
        };
        let chr = normalize_chromosome(&fields[0]);
        if seen.insert(chr.clone()) {
            chromosomes.push(chr.clone());
            positions.push(start);
        }
        chromosomes.push(chr);
        positions.push(stop);
    }

    log::info!(
        "Read {} LD block breakpoints on {} chromosomes from {path_display}.",
        positions.len(),
        seen.len()
    );
    Ok(LdBreakpoints::new(chromosomes, positions)?)
}

// ========================================================================================
//                                   Participant ID lists
// ========================================================================================

/// Reads a keep/remove list: one ID per line, or `FID IID` pairs of which the IID is
/// used.
pub fn read_id_list(path: &Path) -> Result<Vec<String>, IoError> {
    let mut source = open_text_source(path)?;
    let records = read_records(source.as_mut())?;
    Ok(records
        .into_iter()
        .filter_map(|(_, mut fields)| match fields.len() {
            1 => fields.pop(),
            _ => fields.into_iter().nth(1),
        })
        .collect())
}

// ========================================================================================
//                                   Text genotype panels
// ========================================================================================

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Loads `prefix.markers` (`chr pos a1 [a2]`) and `prefix.dosages` (`IID d1 .. dp`,
/// counts of `a1`, with `NA` or `.` for missing calls) into an in-memory panel.
pub fn read_text_panel(prefix: &Path) -> Result<DenseGenotypes, IoError> {
    let marker_path = with_suffix(prefix, ".markers");
    let mut source = open_text_source(&marker_path)?;
    let records = read_records(source.as_mut())?;
    let mut markers = Vec::with_capacity(records.len());
    for (index, (line, fields)) in records.iter().enumerate() {
        let position = match fields.get(1).map(|f| f.parse::<u64>()) {
            Some(Ok(position)) if fields.len() >= 3 => position,
            _ if index == 0 => continue,
            _ => {
                return Err(IoError::Parse {
                    path: marker_path.display().to_string(),
                    line: *line,
                    message: "expected 'chr pos a1 [a2]'".to_string(),
                });
            }
        };
        markers.push(Marker::new(
            &fields[0],
            position,
            &fields[2],
            fields.get(3).map(String::as_str),
        ));
    }

    let dosage_path = with_suffix(prefix, ".dosages");
    let mut source = open_text_source(&dosage_path)?;
    let mut ids = Vec::new();
    let mut values: Vec<f64> = Vec::new();
    while let Some(line) = source.next_line()? {
        let text = String::from_utf8_lossy(line).into_owned();
        let mut fields = text.split_whitespace();
        let Some(id) = fields.next() else {
            continue;
        };
        let row: Vec<f64> = fields
            .map(|f| {
                if is_missing(f) {
                    Ok(f64::NAN)
                } else {
                    f.parse::<f64>()
                        .map_err(|e| parse_error(source.as_ref(), format!("'{f}': {e}")))
                }
            })
            .collect::<Result<_, _>>()?;
        if row.len() != markers.len() {
            return Err(parse_error(
                source.as_ref(),
                format!(
                    "participant '{id}' has {} dosages but {} markers are listed",
                    row.len(),
                    markers.len()
                ),
            ));
        }
        ids.push(id.to_string());
        values.extend(row);
    }

    let n_markers = markers.len();
    let dosages = Array2::from_shape_vec((ids.len(), n_markers), values).map_err(|e| {
        GenotypeError::Source {
            source_id: prefix.display().to_string(),
            message: e.to_string(),
        }
    })?;
    log::info!(
        "Loaded text panel {}: {} participants x {} markers.",
        prefix.display(),
        ids.len(),
        n_markers
    );
    Ok(DenseGenotypes::new(
        prefix.display().to_string(),
        markers,
        ids,
        dosages,
    )?)
}

// ========================================================================================
//                                   TSV writers
// ========================================================================================

fn tsv_writer(path: &Path) -> Result<csv::Writer<File>, IoError> {
    Ok(csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?)
}

fn combination_names(shrinkage: &[f64], lambda: &[f64]) -> Vec<String> {
    shrinkage
        .iter()
        .flat_map(|s| lambda.iter().map(move |l| format!("s{s}_lambda{l}")))
        .collect()
}

fn marker_fields(marker: &Marker) -> [String; 4] {
    [
        marker.chromosome.clone(),
        marker.position.to_string(),
        marker.allele1.clone(),
        marker.allele2.clone().unwrap_or_default(),
    ]
}

/// Writes one row per coefficient row: marker identity followed by one column per
/// (shrinkage, lambda) combination.
pub fn write_coefficients(path: &Path, result: &PipelineResult) -> Result<(), IoError> {
    let mut wtr = tsv_writer(path)?;
    let mut header: Vec<String> = ["chr", "pos", "a1", "a2"].map(String::from).to_vec();
    header.extend(combination_names(result.shrinkage(), result.lambda()));
    wtr.write_record(&header)?;

    let weights = result.weight_matrix();
    for (marker, row) in result.markers().iter().zip(weights.rows()) {
        let mut record: Vec<String> = marker_fields(marker).to_vec();
        record.extend(row.iter().map(f64::to_string));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes a participants x combinations score matrix with participant IDs.
pub fn write_scores(
    path: &Path,
    participant_ids: &[String],
    shrinkage: &[f64],
    lambda: &[f64],
    scores: &Array2<f64>,
) -> Result<(), IoError> {
    let mut wtr = tsv_writer(path)?;
    let mut header = vec!["IID".to_string()];
    header.extend(combination_names(shrinkage, lambda));
    wtr.write_record(&header)?;
    for (id, row) in participant_ids.iter().zip(scores.rows()) {
        let mut record = vec![id.clone()];
        record.extend(row.iter().map(f64::to_string));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the pseudovalidation table (`shrinkage lambda value best`).
pub fn write_validation(path: &Path, validation: &Pseudovalidation) -> Result<(), IoError> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["shrinkage", "lambda", "value", "best"])?;
    for entry in &validation.table {
        let best = entry.shrinkage == validation.best.shrinkage
            && entry.lambda == validation.best.lambda;
        wtr.write_record([
            entry.shrinkage.to_string(),
            entry.lambda.to_string(),
            entry.value.to_string(),
            u8::from(best).to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the coefficients of the best combination (`chr pos a1 a2 beta`).
pub fn write_best_coefficients(path: &Path, validation: &Pseudovalidation) -> Result<(), IoError> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["chr", "pos", "a1", "a2", "beta"])?;
    for (marker, beta) in validation.markers.iter().zip(&validation.best_beta) {
        let [chr, pos, a1, a2] = marker_fields(marker);
        wtr.write_record([chr, pos, a1, a2, beta.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the scores of the best combination (`IID score`).
pub fn write_best_scores(path: &Path, validation: &Pseudovalidation) -> Result<(), IoError> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["IID", "score"])?;
    for (id, score) in validation.participant_ids.iter().zip(&validation.best_scores) {
        wtr.write_record([id.clone(), score.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}
