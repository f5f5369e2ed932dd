//! Batch script generation from stage templates.
//!
//! Rendering is pure token substitution over a closed placeholder set;
//! templates containing any other `{TOKEN}` are rejected at render time
//! instead of producing a broken script. Shell parameter expansions such as
//! `${SLURM_CPUS_PER_TASK}` are left alone.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::config::Config;
use crate::stage::Stage;
use crate::store::Run;

/// Matches a `{TOKEN}` placeholder that is not a shell `${...}` expansion.
///
/// The token itself is capture group 2.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^$])\{([A-Z][A-Z0-9_]*)\}").expect("placeholder regex"));

/// Errors raised while generating a batch script.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The stage template does not exist in the install directory.
    #[error("template for stage `{stage}` not found at `{path}`")]
    Missing {
        /// The stage being rendered.
        stage: Stage,
        /// The expected template path.
        path: PathBuf,
    },
    /// The template contains a placeholder outside the closed set.
    #[error("template `{path}` contains unknown placeholder `{{{token}}}`")]
    UnknownPlaceholder {
        /// The template path.
        path: PathBuf,
        /// The offending token.
        token: String,
    },
    /// An I/O error reading the template or writing the script.
    #[error("i/o error at `{path}`: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Renders stage templates into executable batch scripts.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    /// The directory holding stage templates.
    templates_dir: PathBuf,
    /// The directory receiving generated scripts.
    output_dir: PathBuf,
    /// The work directory substituted for `{BASE_DIR}`.
    work_dir: PathBuf,
    /// The runs directory used to derive `{RUN_DIR}`.
    runs_dir: PathBuf,
}

impl TemplateEngine {
    /// Create an engine over the configured directories.
    pub fn new(config: &Config) -> Self {
        Self {
            templates_dir: config.templates_dir(),
            output_dir: config.generated_dir(),
            work_dir: config.work_dir.clone(),
            runs_dir: config.runs_dir(),
        }
    }

    /// The path a generated script is written to for a given stage and run.
    pub fn script_path(&self, stage: Stage, run: &Run) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.script", stage, run.run_id))
    }

    /// Render the stage template for a run and write the executable script.
    ///
    /// Any prior script for the same stage and run is overwritten. Rendering
    /// the same inputs twice produces byte-identical scripts.
    pub fn generate(&self, stage: Stage, run: &Run) -> Result<PathBuf, TemplateError> {
        let template_path = self.templates_dir.join(stage.template_file());

        let template = match fs::read_to_string(&template_path) {
            Ok(template) => template,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TemplateError::Missing {
                    stage,
                    path: template_path,
                });
            }
            Err(source) => {
                return Err(TemplateError::Io {
                    path: template_path,
                    source,
                });
            }
        };

        let rendered = self.render(&template, &template_path, run)?;

        let script_path = self.script_path(stage, run);
        fs::write(&script_path, rendered).map_err(|source| TemplateError::Io {
            path: script_path.clone(),
            source,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755)).map_err(
                |source| TemplateError::Io {
                    path: script_path.clone(),
                    source,
                },
            )?;
        }

        Ok(script_path)
    }

    /// Substitute the closed placeholder set and reject leftovers.
    fn render(
        &self,
        template: &str,
        template_path: &Path,
        run: &Run,
    ) -> Result<String, TemplateError> {
        let run_dir = self.runs_dir.join(run.run_id.to_string());

        let rendered = template
            .replace("{RUN_ID}", &run.run_id.to_string())
            .replace("{ACCOUNT}", &run.account)
            .replace("{BASE_DIR}", &self.work_dir.display().to_string())
            .replace("{RUN_DIR}", &run_dir.display().to_string())
            .replace("{ADAPTER_TYPE}", run.adapter_type());

        if let Some(captures) = PLACEHOLDER.captures(&rendered) {
            return Err(TemplateError::UnknownPlaceholder {
                path: template_path.to_path_buf(),
                token: captures[2].to_string(),
            });
        }

        Ok(rendered)
    }
}
