//! The fixed pipeline stage registry.
//!
//! Every stage of the pipeline is a variant of [`Stage`]; the registry data
//! hanging off each variant (dependencies, done-flag path, template name,
//! cleanup rules) is the single source of truth consulted by the controller,
//! validator, and template engine.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// A stage of the fixed RNA-seq pipeline, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Stage {
    /// FastQC over the uploaded raw reads.
    #[serde(rename = "qc_raw")]
    QcRaw,
    /// Trimmomatic adapter and quality trimming.
    #[serde(rename = "trim")]
    Trim,
    /// FastQC over the trimmed reads.
    #[serde(rename = "qc_trimmed")]
    QcTrimmed,
    /// STAR alignment against the reference genome.
    #[serde(rename = "star")]
    Star,
    /// featureCounts gene-level quantification.
    #[serde(rename = "featurecounts")]
    FeatureCounts,
    /// DESeq2 differential expression analysis.
    #[serde(rename = "deseq2")]
    Deseq2,
}

impl Stage {
    /// All stages in canonical pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::QcRaw,
        Stage::Trim,
        Stage::QcTrimmed,
        Stage::Star,
        Stage::FeatureCounts,
        Stage::Deseq2,
    ];

    /// The stage name as it appears in URLs, state documents, and template
    /// file names.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::QcRaw => "qc_raw",
            Stage::Trim => "trim",
            Stage::QcTrimmed => "qc_trimmed",
            Stage::Star => "star",
            Stage::FeatureCounts => "featurecounts",
            Stage::Deseq2 => "deseq2",
        }
    }

    /// The stages that must be `completed` before this one may be submitted.
    pub fn dependencies(&self) -> &'static [Stage] {
        match self {
            Stage::QcRaw => &[],
            Stage::Trim => &[Stage::QcRaw],
            Stage::QcTrimmed => &[Stage::Trim],
            Stage::Star => &[Stage::Trim],
            Stage::FeatureCounts => &[Stage::Star],
            Stage::Deseq2 => &[Stage::FeatureCounts],
        }
    }

    /// The done-flag path for this stage, relative to the run directory.
    ///
    /// The flag's presence authoritatively marks the stage completed,
    /// regardless of stored state.
    pub fn done_flag_rel(&self) -> &'static str {
        match self {
            Stage::QcRaw => "qc_raw/qc_raw_done.flag",
            Stage::Trim => "trimmed/trimming_done.flag",
            Stage::QcTrimmed => "qc_trimmed/qc_trimmed_done.flag",
            Stage::Star => "star/star_alignment_done.flag",
            Stage::FeatureCounts => "featurecounts/featurecounts_done.flag",
            Stage::Deseq2 => "logs/deseq2_done.flag",
        }
    }

    /// The absolute done-flag path within `run_dir`.
    pub fn done_flag(&self, run_dir: &Path) -> PathBuf {
        run_dir.join(self.done_flag_rel())
    }

    /// The file name of this stage's batch script template.
    pub fn template_file(&self) -> String {
        format!("{}.template", self.name())
    }

    /// Primary output artifacts removed on a confirmed rerun, as
    /// `(subdirectory, pattern)` pairs.
    ///
    /// Patterns are either an exact file name or a `*`-prefixed suffix match.
    /// Cleanup only removes plain files in the named subdirectory, so `logs/`
    /// subdirectories and `star/genome_index/` are never touched.
    pub fn cleanup_globs(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Stage::QcRaw => &[("qc_raw", "*.html"), ("qc_raw", "*.zip")],
            Stage::Trim => &[("trimmed", "*.fq.gz")],
            Stage::QcTrimmed => &[("qc_trimmed", "*.html"), ("qc_trimmed", "*.zip")],
            Stage::Star => &[
                ("star", "*.bam"),
                ("star", "*.sam"),
                ("star", "*.out"),
                ("star", "*.tab"),
            ],
            Stage::FeatureCounts => &[
                ("featurecounts", "counts.txt"),
                ("featurecounts", "counts.txt.summary"),
                ("counts", "*.txt"),
            ],
            Stage::Deseq2 => &[
                ("deseq2", "*.csv"),
                ("deseq2", "*.txt"),
                ("deseq2", "*.png"),
                ("deseq2", "*.pdf"),
            ],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error raised when parsing an unrecognized stage name.
#[derive(Debug, Clone, Error)]
#[error("unknown stage `{0}`")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qc_raw" => Ok(Stage::QcRaw),
            "trim" => Ok(Stage::Trim),
            "qc_trimmed" => Ok(Stage::QcTrimmed),
            "star" => Ok(Stage::Star),
            "featurecounts" => Ok(Stage::FeatureCounts),
            "deseq2" => Ok(Stage::Deseq2),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}
