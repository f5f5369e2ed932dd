//! Readers for stage result artifacts surfaced to the UI.
//!
//! These adapters only read convention-named files inside a run directory;
//! producing them is the batch jobs' business.

use std::path::Path;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::stage::Stage;
use crate::store::StoreError;

/// Maximum number of significant DEG rows returned for display.
///
/// The full table remains available through the download endpoint.
const MAX_DEG_ROWS: usize = 100;

/// The downloadable DESeq2 artifacts, as `(file_type, file_name)` pairs.
const DESEQ2_FILES: &[(&str, &str)] = &[
    ("summary", "summary.txt"),
    ("significant_degs", "significant_degs.csv"),
    ("full_results", "full_results.csv"),
    ("top_degs", "top_degs.csv"),
    ("counts_matrix", "normalized_counts.csv"),
];

/// Errors raised by the results adapters.
#[derive(Debug, Error)]
pub enum ResultsError {
    /// A state store failure (including unknown runs).
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The requested artifact does not exist.
    #[error("`{0}` was not found")]
    NotFound(PathBuf),
    /// The requested download type is not in the fixed set.
    #[error("unknown file type `{0}`")]
    UnknownFileType(String),
    /// The requested path is outside the run directory or malformed.
    #[error("invalid path `{0}`")]
    InvalidPath(String),
    /// An artifact exists but could not be read.
    #[error("failed to read `{path}`: {source}")]
    Io {
        /// The artifact path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// An artifact exists but is not in the expected format.
    #[error("`{path}` is malformed: {message}")]
    Malformed {
        /// The artifact path.
        path: PathBuf,
        /// What was wrong.
        message: String,
    },
}

/// Read a results file, mapping a missing file to [`ResultsError::NotFound`].
fn read_results_file(path: &Path) -> Result<String, ResultsError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ResultsError::NotFound(path.to_path_buf()))
        }
        Err(source) => Err(ResultsError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Per-sample read assignment counts from featureCounts.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SampleCounts {
    /// Sample name (BAM file name without its extension).
    pub sample: String,
    /// Reads assigned to features.
    pub assigned: u64,
    /// Total reads considered.
    pub total: u64,
    /// Assignment percentage, rounded to two decimals.
    pub assigned_pct: f64,
}

/// The featureCounts assignment summary for a run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FeatureCountsSummary {
    /// Per-sample assignment counts.
    pub samples: Vec<SampleCounts>,
}

/// Parse `featurecounts/counts.txt.summary` into a per-sample table.
pub fn featurecounts_summary(run_dir: &Path) -> Result<FeatureCountsSummary, ResultsError> {
    let path = run_dir.join("featurecounts/counts.txt.summary");
    let contents = read_results_file(&path)?;

    let malformed = |message: &str| ResultsError::Malformed {
        path: path.clone(),
        message: message.to_string(),
    };

    let mut lines = contents.lines();
    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| malformed("empty summary"))?
        .split('\t')
        .collect();

    if header.first() != Some(&"Status") {
        return Err(malformed("first column is not `Status`"));
    }

    let samples: Vec<String> = header[1..]
        .iter()
        .map(|column| {
            Path::new(column)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| column.to_string())
                .trim_end_matches(".bam")
                .to_string()
        })
        .collect();

    let mut assigned = vec![0u64; samples.len()];
    let mut totals = vec![0u64; samples.len()];

    for line in lines.filter(|line| !line.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        let status = fields[0];
        for (i, field) in fields[1..].iter().enumerate().take(samples.len()) {
            let count: u64 = field
                .trim()
                .parse()
                .map_err(|_| malformed(&format!("non-numeric count `{field}`")))?;
            totals[i] += count;
            if status == "Assigned" {
                assigned[i] = count;
            }
        }
    }

    let samples = samples
        .into_iter()
        .enumerate()
        .map(|(i, sample)| {
            let pct = if totals[i] == 0 {
                0.0
            } else {
                assigned[i] as f64 / totals[i] as f64 * 100.0
            };
            SampleCounts {
                sample,
                assigned: assigned[i],
                total: totals[i],
                assigned_pct: (pct * 100.0).round() / 100.0,
            }
        })
        .collect();

    Ok(FeatureCountsSummary { samples })
}

/// The significant DEG table, truncated for display.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DegTable {
    /// Column names from the CSV header.
    pub columns: Vec<String>,
    /// Row values; numeric cells are rounded to four decimals.
    pub rows: Vec<Vec<String>>,
    /// Total rows in the file before truncation.
    pub total: usize,
}

/// The DESeq2 results overview for a run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Deseq2Results {
    /// Key/value pairs from `deseq2/summary.txt`.
    #[schema(value_type = Object)]
    pub summary: IndexMap<String, String>,
    /// The significant DEG table, if present.
    pub significant_degs: Option<DegTable>,
    /// The downloadable file types currently present.
    pub files: Vec<String>,
}

/// Parse the DESeq2 summary and significant DEG table.
///
/// Fails with [`ResultsError::NotFound`] when the `deseq2/` directory is
/// absent or neither primary file exists.
pub fn deseq2_results(run_dir: &Path) -> Result<Deseq2Results, ResultsError> {
    let dir = run_dir.join("deseq2");
    if !dir.is_dir() {
        return Err(ResultsError::NotFound(dir));
    }

    let summary_path = dir.join("summary.txt");
    let degs_path = dir.join("significant_degs.csv");
    if !summary_path.is_file() && !degs_path.is_file() {
        return Err(ResultsError::NotFound(dir));
    }

    let mut summary = IndexMap::new();
    if summary_path.is_file() {
        for line in read_results_file(&summary_path)?.lines() {
            if let Some((key, value)) = line.split_once(':') {
                summary.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    let significant_degs = if degs_path.is_file() {
        Some(parse_deg_table(&degs_path)?)
    } else {
        None
    };

    let files = DESEQ2_FILES
        .iter()
        .filter(|(_, name)| dir.join(name).is_file())
        .map(|(file_type, _)| file_type.to_string())
        .collect();

    Ok(Deseq2Results {
        summary,
        significant_degs,
        files,
    })
}

/// Parse a DEG CSV with four-decimal display rounding of numeric cells.
fn parse_deg_table(path: &Path) -> Result<DegTable, ResultsError> {
    let contents = read_results_file(path)?;
    let mut lines = contents.lines().filter(|line| !line.trim().is_empty());

    let columns: Vec<String> = match lines.next() {
        Some(header) => header.split(',').map(|c| c.trim().to_string()).collect(),
        None => {
            return Err(ResultsError::Malformed {
                path: path.to_path_buf(),
                message: String::from("empty table"),
            });
        }
    };

    let all_rows: Vec<Vec<String>> = lines
        .map(|line| line.split(',').map(|cell| round_cell(cell.trim())).collect())
        .collect();

    let total = all_rows.len();
    let rows = all_rows.into_iter().take(MAX_DEG_ROWS).collect();

    Ok(DegTable {
        columns,
        rows,
        total,
    })
}

/// Round a numeric cell to four decimals for display; pass others through.
fn round_cell(cell: &str) -> String {
    match cell.parse::<f64>() {
        Ok(value) if value.is_finite() => {
            let rounded = (value * 10_000.0).round() / 10_000.0;
            format!("{rounded}")
        }
        _ => cell.to_string(),
    }
}

/// Resolve a DESeq2 artifact for download.
///
/// Returns the on-disk path and the download file name.
pub fn deseq2_download(
    run_dir: &Path,
    file_type: &str,
) -> Result<(PathBuf, &'static str), ResultsError> {
    let name = DESEQ2_FILES
        .iter()
        .find(|(kind, _)| *kind == file_type)
        .map(|(_, name)| *name)
        .ok_or_else(|| ResultsError::UnknownFileType(file_type.to_string()))?;

    let path = run_dir.join("deseq2").join(name);
    if !path.is_file() {
        return Err(ResultsError::NotFound(path));
    }

    Ok((path, name))
}

/// A stage's captured stdout and stderr.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StageLogs {
    /// The stage the logs belong to.
    pub stage: Stage,
    /// Captured standard output; empty when the job has not written yet.
    pub stdout: String,
    /// Captured standard error; empty when the job has not written yet.
    pub stderr: String,
    /// Path of the stdout file, relative to the run directory.
    pub stdout_file: String,
    /// Path of the stderr file, relative to the run directory.
    pub stderr_file: String,
}

/// Read a stage's log files.
///
/// The shipped templates direct `#SBATCH` output to
/// `logs/<stage>.{out,err}`; absent files read as empty.
pub fn stage_logs(run_dir: &Path, stage: Stage) -> StageLogs {
    let stdout_file = format!("logs/{stage}.out");
    let stderr_file = format!("logs/{stage}.err");

    let read = |rel: &str| std::fs::read_to_string(run_dir.join(rel)).unwrap_or_default();

    StageLogs {
        stage,
        stdout: read(&stdout_file),
        stderr: read(&stderr_file),
        stdout_file,
        stderr_file,
    }
}

/// The QC reports available for a run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QcReports {
    /// HTML reports under `qc_raw/`.
    pub qc_raw: Vec<String>,
    /// HTML reports under `qc_trimmed/`.
    pub qc_trimmed: Vec<String>,
}

/// List the FastQC HTML reports present for both QC stages.
pub fn qc_reports(run_dir: &Path) -> QcReports {
    QcReports {
        qc_raw: html_reports(&run_dir.join("qc_raw")),
        qc_trimmed: html_reports(&run_dir.join("qc_trimmed")),
    }
}

/// The HTML file names directly inside a directory, sorted.
fn html_reports(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();

    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".html") && entry.path().is_file() {
                names.push(name);
            }
        }
    }

    names.sort();
    names
}

/// Resolve a QC report file for serving.
///
/// Only the two QC stages are servable, and the relative path may not
/// traverse out of the stage directory.
pub fn qc_file(
    run_dir: &Path,
    stage: Stage,
    rel: &str,
) -> Result<(PathBuf, &'static str), ResultsError> {
    if !matches!(stage, Stage::QcRaw | Stage::QcTrimmed) {
        return Err(ResultsError::NotFound(run_dir.join(stage.name())));
    }

    if rel.split('/').any(|part| part == ".." || part.is_empty()) || rel.starts_with('/') {
        return Err(ResultsError::InvalidPath(rel.to_string()));
    }

    let path = run_dir.join(stage.name()).join(rel);
    if !path.is_file() {
        return Err(ResultsError::NotFound(path));
    }

    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    };

    Ok((path, content_type))
}
