//! Readers for solver results files and the stability metrics derived
//! from them.
//!
//! The solver writes fixed-layout text for a fixed command sequence, so
//! quantities are read by line and column offset. Each layout lives behind
//! its own [`ResultsReader`] so the offsets can be checked against recorded
//! files in isolation.

use std::fs;
use std::path::Path;

use log::warn;
use serde::Serialize;

use crate::error::ResultsParseError;
use crate::runner::AnalysisOutcome;

/// Zero-based line of the neutral point in a stability-derivative listing.
pub const NEUTRAL_POINT_LINE: usize = 50;

pub trait ResultsReader {
    type Output;

    fn parse(&self, text: &str, path: &Path) -> Result<Self::Output, ResultsParseError>;

    fn read(&self, path: &Path) -> Result<Self::Output, ResultsParseError> {
        let text = fs::read_to_string(path)
            .map_err(|_| ResultsParseError::MissingFile(path.to_path_buf()))?;
        self.parse(&text, path)
    }
}

#[derive(Debug, Clone, Copy)]
enum Column {
    At(usize),
    Last,
}

struct Listing<'a> {
    lines: Vec<&'a str>,
    path: &'a Path,
}

impl<'a> Listing<'a> {
    fn new(text: &'a str, path: &'a Path) -> Self {
        Self {
            lines: text.lines().collect(),
            path,
        }
    }

    fn tokens(&self, line: usize) -> Result<Vec<&'a str>, ResultsParseError> {
        self.lines
            .get(line)
            .map(|l| l.split_whitespace().collect())
            .ok_or_else(|| ResultsParseError::MissingLine {
                path: self.path.to_path_buf(),
                line,
            })
    }

    fn number(&self, line: usize, column: Column) -> Result<f64, ResultsParseError> {
        let tokens = self.tokens(line)?;
        let (index, token) = match column {
            Column::At(i) => (i, tokens.get(i)),
            Column::Last => (tokens.len().saturating_sub(1), tokens.last()),
        };
        let token = token.ok_or_else(|| ResultsParseError::MissingField {
            path: self.path.to_path_buf(),
            line,
            column: index,
        })?;
        self.parse_token(line, token)
    }

    fn row(&self, line: usize, skip: usize) -> Result<Vec<f64>, ResultsParseError> {
        self.tokens(line)?
            .iter()
            .skip(skip)
            .map(|t| self.parse_token(line, t))
            .collect()
    }

    fn parse_token(&self, line: usize, token: &str) -> Result<f64, ResultsParseError> {
        token.parse().map_err(|_| ResultsParseError::BadNumber {
            path: self.path.to_path_buf(),
            line,
            token: token.to_string(),
        })
    }
}

/// Neutral point from the stability-derivative listing: the last token of
/// a fixed line.
#[derive(Debug, Clone, Copy)]
pub struct NeutralPointReader {
    pub line: usize,
}

impl Default for NeutralPointReader {
    fn default() -> Self {
        Self {
            line: NEUTRAL_POINT_LINE,
        }
    }
}

impl ResultsReader for NeutralPointReader {
    type Output = f64;

    fn parse(&self, text: &str, path: &Path) -> Result<f64, ResultsParseError> {
        Listing::new(text, path).number(self.line, Column::Last)
    }
}

/// Force and lateral-stability coefficients from a trimmed operating point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Polar {
    pub cl: f64,
    pub cd: f64,
    pub cl_beta: f64,
    pub cl_p: f64,
    /// Spiral stability parameter; `None` when it cannot be formed.
    pub spiral: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PolarReader;

impl ResultsReader for PolarReader {
    type Output = Polar;

    fn parse(&self, text: &str, path: &Path) -> Result<Polar, ResultsParseError> {
        let l = Listing::new(text, path);
        let cl_beta = l.number(38, Column::At(8))?;

        // The listing only prints the spiral parameter when it is defined.
        let spiral = match l.number(52, Column::At(6)) {
            Ok(value) => Some(value),
            Err(ResultsParseError::MissingField { .. }) | Err(ResultsParseError::MissingLine { .. }) => {
                let cn_beta = l.number(40, Column::At(8))?;
                let cl_r = l.number(46, Column::At(11))?;
                let cn_r = l.number(48, Column::At(11))?;
                let denominator = cl_r * cn_beta;
                (denominator != 0.0).then(|| cl_beta * cn_r / denominator)
            }
            Err(e) => return Err(e),
        };

        Ok(Polar {
            cl: l.number(23, Column::At(2))?,
            cd: l.number(24, Column::At(2))?,
            cl_beta,
            cl_p: l.number(46, Column::At(5))?,
            spiral,
        })
    }
}

/// Lateral eigenvalues of interest from an eigenmode listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Eigenmodes {
    pub dutch_roll: Vec<f64>,
    pub roll: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EigenmodeReader;

impl ResultsReader for EigenmodeReader {
    type Output = Eigenmodes;

    fn parse(&self, text: &str, path: &Path) -> Result<Eigenmodes, ResultsParseError> {
        let l = Listing::new(text, path);
        Ok(Eigenmodes {
            dutch_roll: l.row(3, 1)?,
            roll: l.row(5, 1)?,
        })
    }
}

/// `(neutral_point - cg_x) / mac`.
pub fn static_margin(neutral_point: f64, cg_x: f64, mac: f64) -> f64 {
    (neutral_point - cg_x) / mac
}

/// CG position giving `target_margin`: `neutral_point - mac * target_margin`.
pub fn ideal_cg(neutral_point: f64, mac: f64, target_margin: f64) -> f64 {
    neutral_point - mac * target_margin
}

/// How a neutral point is turned into a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum StabilityMode {
    /// CG known: report the static margin.
    Margin { cg_x: f64 },
    /// CG unknown: report the CG that would give the target margin.
    Search { target_margin: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityMetric {
    StaticMargin(f64),
    IdealCg(f64),
}

/// Extracted stability of one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stability {
    pub candidate_id: usize,
    pub neutral_point: f64,
    pub metric: StabilityMetric,
}

impl Stability {
    pub fn static_margin(&self) -> Option<f64> {
        match self.metric {
            StabilityMetric::StaticMargin(sm) => Some(sm),
            StabilityMetric::IdealCg(_) => None,
        }
    }

    pub fn ideal_cg(&self) -> Option<f64> {
        match self.metric {
            StabilityMetric::IdealCg(x) => Some(x),
            StabilityMetric::StaticMargin(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Solver,
    Results,
}

/// A candidate excluded from fitting and reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateFailure {
    pub candidate_id: usize,
    pub stage: FailureStage,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub stability: Vec<Stability>,
    pub failures: Vec<CandidateFailure>,
}

/// Reads an outcome's results file with `reader`, or records why the run
/// cannot be used.
pub fn read_outcome<R: ResultsReader>(
    reader: &R,
    outcome: &AnalysisOutcome,
) -> Result<R::Output, CandidateFailure> {
    if !outcome.results_usable() {
        let message = match &outcome.status {
            Err(e) => e.to_string(),
            Ok(()) => String::new(),
        };
        return Err(CandidateFailure {
            candidate_id: outcome.candidate_id,
            stage: FailureStage::Solver,
            message,
        });
    }
    reader
        .read(&outcome.results_path)
        .map_err(|e| CandidateFailure {
            candidate_id: outcome.candidate_id,
            stage: FailureStage::Results,
            message: e.to_string(),
        })
}

pub struct ResultExtractor<R> {
    reader: R,
    mode: StabilityMode,
    mac: f64,
}

impl<R: ResultsReader<Output = f64>> ResultExtractor<R> {
    pub fn new(reader: R, mode: StabilityMode, mac: f64) -> Self {
        Self { reader, mode, mac }
    }

    pub fn metric(&self, neutral_point: f64) -> StabilityMetric {
        match self.mode {
            StabilityMode::Margin { cg_x } => {
                StabilityMetric::StaticMargin(static_margin(neutral_point, cg_x, self.mac))
            }
            StabilityMode::Search { target_margin } => {
                StabilityMetric::IdealCg(ideal_cg(neutral_point, self.mac, target_margin))
            }
        }
    }

    pub fn extract(&self, outcome: &AnalysisOutcome) -> Result<Stability, CandidateFailure> {
        let neutral_point = read_outcome(&self.reader, outcome)?;
        Ok(Stability {
            candidate_id: outcome.candidate_id,
            neutral_point,
            metric: self.metric(neutral_point),
        })
    }

    /// Extracts every outcome; a bad candidate never stops the rest.
    pub fn extract_all(&self, outcomes: &[AnalysisOutcome]) -> Extraction {
        let mut extraction = Extraction::default();
        for outcome in outcomes {
            match self.extract(outcome) {
                Ok(s) => extraction.stability.push(s),
                Err(failure) => {
                    warn!("candidate {} excluded: {}", failure.candidate_id, failure.message);
                    extraction.failures.push(failure);
                }
            }
        }
        extraction
    }
}
