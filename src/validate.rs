//! Stage preflight validation against the run directory.
//!
//! Validation inspects on-disk artifacts only; the rerun guard and
//! dependency enforcement at submission time live in the controller, which
//! also rechecks dependencies here so that the validation endpoint reports
//! them.

use std::path::Path;
use std::path::PathBuf;

use serde::Serialize;
use utoipa::ToSchema;

use crate::stage::Stage;
use crate::store::ADAPTER_TYPE_PARAM;
use crate::store::DEFAULT_ADAPTER;
use crate::store::Run;
use crate::store::StageStatus;

/// File suffixes recognized as FASTQ input.
const FASTQ_SUFFIXES: &[&str] = &[".fq.gz", ".fastq.gz"];

/// File suffixes recognized as FASTA references.
const FASTA_SUFFIXES: &[&str] = &[".fa", ".fasta"];

/// The outcome of a stage preflight check.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StageValidation {
    /// Whether the stage may be submitted.
    pub valid: bool,
    /// Conditions that block submission.
    pub errors: Vec<String>,
    /// Conditions worth surfacing that do not block submission.
    pub warnings: Vec<String>,
}

impl StageValidation {
    /// Build the outcome from collected errors and warnings.
    fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Validate a stage's prerequisites against the run directory.
///
/// `shared_dir` is the work-directory-level reference location consulted
/// when the run has no local reference files.
pub fn validate(run: &Run, stage: Stage, run_dir: &Path, shared_dir: &Path) -> StageValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for dep in stage.dependencies() {
        let completed = run
            .stages
            .get(dep)
            .is_some_and(|s| s.status == StageStatus::Completed);
        if !completed {
            errors.push(format!("dependency {dep} not completed"));
        }
    }

    match stage {
        Stage::QcRaw => check_raw_fastqs(run_dir, &mut errors, &mut warnings),
        Stage::Trim => {
            check_raw_fastqs(run_dir, &mut errors, &mut warnings);
            if !run.parameters.contains_key(ADAPTER_TYPE_PARAM) {
                warnings.push(format!(
                    "adapter_type is not set; defaulting to {DEFAULT_ADAPTER}"
                ));
            }
        }
        Stage::QcTrimmed => {
            let paired = files_with_suffix(&run_dir.join("trimmed"), &["_paired.fq.gz"]);
            if paired.is_empty() {
                errors.push(String::from(
                    "no trimmed paired FASTQ files found in trimmed/; run the trim stage first",
                ));
            }
        }
        Stage::Star => {
            let trimmed = run_dir.join("trimmed");
            let forward = files_with_suffix(&trimmed, &["_forward_paired.fq.gz"]);
            let reverse = files_with_suffix(&trimmed, &["_reverse_paired.fq.gz"]);

            if forward.is_empty() {
                errors.push(String::from(
                    "no trimmed forward reads (*_forward_paired.fq.gz) found in trimmed/",
                ));
            } else if forward.len() != reverse.len() {
                errors.push(format!(
                    "unequal trimmed read pairs in trimmed/: {} forward vs {} reverse",
                    forward.len(),
                    reverse.len()
                ));
            }

            if resolve_reference(run_dir, shared_dir, FASTA_SUFFIXES).is_none() {
                errors.push(String::from(
                    "no reference FASTA (*.fa, *.fasta) found in reference/ or the shared \
                     mapping_in/ location",
                ));
            }
            check_gtf(run_dir, shared_dir, &mut errors);
        }
        Stage::FeatureCounts => {
            let bams = files_with_suffix(&run_dir.join("star"), &[".bam"]);
            if bams.is_empty() {
                errors.push(String::from(
                    "no alignments (*.bam) found in star/; run the star stage first",
                ));
            }
            check_gtf(run_dir, shared_dir, &mut errors);
        }
        Stage::Deseq2 => {
            if !run_dir.join("featurecounts/counts.txt").is_file() {
                errors.push(String::from(
                    "featurecounts/counts.txt is missing; run the featurecounts stage first",
                ));
            }
            check_metadata(run_dir, &mut errors, &mut warnings);
        }
    }

    StageValidation::from_parts(errors, warnings)
}

/// Require at least one paired FASTQ in `raw/`; warn on odd counts.
fn check_raw_fastqs(run_dir: &Path, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let fastqs = files_with_suffix(&run_dir.join("raw"), FASTQ_SUFFIXES);

    if fastqs.is_empty() {
        errors.push(String::from(
            "no FASTQ files (*.fq.gz, *.fastq.gz) found in raw/; upload input reads first",
        ));
    } else if fastqs.len() % 2 != 0 {
        warnings.push(format!(
            "odd number of FASTQ files in raw/ ({}); paired-end input expected",
            fastqs.len()
        ));
    }
}

/// Require a resolvable GTF annotation.
fn check_gtf(run_dir: &Path, shared_dir: &Path, errors: &mut Vec<String>) {
    if resolve_reference(run_dir, shared_dir, &[".gtf"]).is_none() {
        errors.push(String::from(
            "no annotation (*.gtf) found in reference/ or the shared mapping_in/ location",
        ));
    }
}

/// Validate `metadata/metadata.csv` for DESeq2.
fn check_metadata(run_dir: &Path, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let path = run_dir.join("metadata/metadata.csv");
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(_) => {
            errors.push(String::from(
                "metadata/metadata.csv is missing; upload sample metadata first",
            ));
            return;
        }
    };

    let mut lines = contents.lines();
    let header: Vec<String> = match lines.next() {
        Some(header) => header
            .split(',')
            .map(|column| column.trim().to_string())
            .collect(),
        None => {
            errors.push(String::from("metadata/metadata.csv is empty"));
            return;
        }
    };

    let condition_index = header.iter().position(|c| c == "condition");
    if !header.iter().any(|c| c == "sample_name") {
        errors.push(String::from(
            "metadata/metadata.csv must contain a `sample_name` column",
        ));
    }
    let Some(condition_index) = condition_index else {
        errors.push(String::from(
            "metadata/metadata.csv must contain a `condition` column",
        ));
        return;
    };

    let mut condition_counts: Vec<(String, usize)> = Vec::new();
    for line in lines.filter(|line| !line.trim().is_empty()) {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let Some(condition) = fields.get(condition_index) else {
            continue;
        };
        match condition_counts.iter().position(|(c, _)| c == condition) {
            Some(index) => condition_counts[index].1 += 1,
            None => condition_counts.push((condition.to_string(), 1)),
        }
    }

    if condition_counts.len() < 2 {
        errors.push(String::from(
            "metadata/metadata.csv must define at least 2 distinct condition values",
        ));
        return;
    }

    for (condition, count) in &condition_counts {
        if *count < 2 {
            warnings.push(format!(
                "condition `{condition}` has fewer than 2 replicates ({count})"
            ));
        }
    }
}

/// Resolve a reference file, preferring the run-local `reference/` directory
/// over the shared location.
pub fn resolve_reference(run_dir: &Path, shared_dir: &Path, suffixes: &[&str]) -> Option<PathBuf> {
    for dir in [run_dir.join("reference"), shared_dir.to_path_buf()] {
        if let Some(name) = files_with_suffix(&dir, suffixes).first() {
            return Some(dir.join(name));
        }
    }
    None
}

/// The file names in `dir` ending with any of the given suffixes, sorted.
fn files_with_suffix(dir: &Path, suffixes: &[&str]) -> Vec<String> {
    let mut names = Vec::new();

    let Ok(entries) = std::fs::read_dir(dir) else {
        return names;
    };

    for entry in entries.flatten() {
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if suffixes.iter().any(|suffix| name.ends_with(suffix)) {
            names.push(name);
        }
    }

    names.sort();
    names
}

/// A forward/reverse FASTQ pair inferred from file names in `raw/`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SamplePair {
    /// Sample name derived from the shared file name stem.
    pub name: String,
    /// The forward (`*_1`) read file, if present.
    pub forward: Option<String>,
    /// The reverse (`*_2`) read file, if present.
    pub reverse: Option<String>,
    /// Whether both mates are present.
    pub complete: bool,
}

/// The sample pairing report for a run's uploaded reads.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SampleReport {
    /// Detected samples, sorted by name.
    pub samples: Vec<SamplePair>,
    /// Total FASTQ files found in `raw/`.
    pub total_files: usize,
    /// Pairing problems worth surfacing.
    pub warnings: Vec<String>,
}

/// Pair the FASTQ files in `raw/` by the `_1`/`_2` naming convention.
pub fn sample_report(raw_dir: &Path) -> SampleReport {
    let fastqs = files_with_suffix(raw_dir, FASTQ_SUFFIXES);
    let total_files = fastqs.len();

    let mut samples: Vec<SamplePair> = Vec::new();
    let mut warnings = Vec::new();

    for name in fastqs {
        let Some((stem, mate)) = split_mate(&name) else {
            warnings.push(format!(
                "`{name}` does not follow the *_1/*_2 naming convention"
            ));
            continue;
        };

        let index = match samples.iter().position(|s| s.name == stem) {
            Some(index) => index,
            None => {
                samples.push(SamplePair {
                    name: stem.clone(),
                    forward: None,
                    reverse: None,
                    complete: false,
                });
                samples.len() - 1
            }
        };

        match mate {
            Mate::Forward => samples[index].forward = Some(name),
            Mate::Reverse => samples[index].reverse = Some(name),
        }
    }

    for sample in &mut samples {
        sample.complete = sample.forward.is_some() && sample.reverse.is_some();
        if !sample.complete {
            let missing = if sample.forward.is_none() { "_1" } else { "_2" };
            warnings.push(format!(
                "sample `{}` is missing its {missing} mate",
                sample.name
            ));
        }
    }

    samples.sort_by(|a, b| a.name.cmp(&b.name));

    SampleReport {
        samples,
        total_files,
        warnings,
    }
}

/// Which mate of a pair a FASTQ file holds.
enum Mate {
    /// The `*_1` file.
    Forward,
    /// The `*_2` file.
    Reverse,
}

/// Split a FASTQ file name into its sample stem and mate marker.
fn split_mate(name: &str) -> Option<(String, Mate)> {
    for suffix in FASTQ_SUFFIXES {
        if let Some(base) = name.strip_suffix(suffix) {
            if let Some(stem) = base.strip_suffix("_1") {
                return Some((stem.to_string(), Mate::Forward));
            }
            if let Some(stem) = base.strip_suffix("_2") {
                return Some((stem.to_string(), Mate::Reverse));
            }
        }
    }
    None
}
