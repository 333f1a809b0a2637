//! Error taxonomy for the sizing pipeline.
//!
//! Configuration and template errors abort a run before the solver is ever
//! started. Solver and results errors are scoped to one candidate and are
//! collected rather than propagated. Fit errors only block the inversion.

use std::path::PathBuf;

use thiserror::Error;

/// Rejected configuration. Always fatal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be {requirement}")]
    Invalid {
        field: &'static str,
        requirement: &'static str,
    },

    #[error("unknown tail variant '{0}' (use 'conventional' or 'inverted-vee')")]
    UnknownVariant(String),

    #[error("unknown tail axis '{0}' (use 'position' or 'arm')")]
    UnknownAxis(String),

    #[error(
        "tail moment arm {arm:.4} <= 0 for candidate {candidate} (area {area:.4}); increase the lower tail bound"
    )]
    NonPositiveMomentArm { candidate: usize, area: f64, arm: f64 },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, requirement: &'static str) -> Self {
        Self::Invalid { field, requirement }
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("geometry format: {0}")]
    Format(String),

    #[error("'{0}' not found in geometry")]
    NotFound(String),

    #[error("failed to read geometry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a single external solver invocation.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver executable not found: {0}")]
    MissingExecutable(PathBuf),

    #[error("failed to run solver: {0}")]
    Io(#[from] std::io::Error),

    #[error("solver exited with status {0}")]
    ExitStatus(i32),

    #[error("solver timed out after {0:.1}s")]
    Timeout(f64),

    #[error("solver task cancelled")]
    Cancelled,
}

/// Failure to read one candidate's results file.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResultsParseError {
    #[error("results file {0} is missing or unreadable")]
    MissingFile(PathBuf),

    #[error("results file {path} has no line {line}")]
    MissingLine { path: PathBuf, line: usize },

    #[error("results file {path} line {line}: no value in column {column}")]
    MissingField {
        path: PathBuf,
        line: usize,
        column: usize,
    },

    #[error("results file {path} line {line}: '{token}' is not a number")]
    BadNumber {
        path: PathBuf,
        line: usize,
        token: String,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FitError {
    #[error("target margin {target} outside sampled range [{min}, {max}]")]
    OutOfRange { target: f64, min: f64, max: f64 },

    #[error("surface fit needs at least {needed} samples, got {got}")]
    TooFewSamples { needed: usize, got: usize },

    #[error("surface fit requires positive arm and area (got arm {arm}, area {area})")]
    NonPositiveSample { arm: f64, area: f64 },

    #[error("surface fit is degenerate: {0}")]
    Degenerate(&'static str),
}

/// Top-level error for operations that abort a run.
#[derive(Debug, Error)]
pub enum TailError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    Fit(#[from] FitError),

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to serialize summary: {0}")]
    Json(#[from] serde_json::Error),
}

impl TailError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn csv(path: &std::path::Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T, E = TailError> = std::result::Result<T, E>;
