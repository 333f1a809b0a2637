//! Report collation and file writers.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::error::{Result, TailError};
use crate::fit::{CurvePoint, SurfaceGrid};
use crate::generator::{TailCandidate, TailVariant};
use crate::results::{CandidateFailure, Stability};

const CONVENTIONAL_COLUMNS: &[&str] = &["ID", "SM", "Xnp", "Xt", "Lt", "Sh", "Sv", "ARh"];
const VEE_COLUMNS: &[&str] = &[
    "Plane ID",
    "Static Margin",
    "Xnp",
    "Xt",
    "Lt",
    "Span",
    "Chord",
    "Angle",
    "Sh",
    "Sv",
    "ARh",
];
const SEARCH_COLUMNS: &[&str] = &["ID", "Xcg", "np", "SM"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub candidate_id: usize,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportTable {
    pub columns: &'static [&'static str],
    pub rows: Vec<ReportRow>,
}

impl ReportTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn ids(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.candidate_id).collect()
    }
}

/// Filters analysed candidates against the target margin and lays them out
/// in the columns relevant to the tail variant.
#[derive(Debug, Clone, Copy)]
pub struct ReportCollation {
    pub target: f64,
    /// Absolute: `|margin - target| <= tolerance`.
    pub tolerance: f64,
    pub variant: TailVariant,
}

impl ReportCollation {
    pub fn accepts(&self, margin: f64) -> bool {
        (margin - self.target).abs() <= self.tolerance
    }

    /// Rows are in candidate order. Candidates with an ideal CG instead of a
    /// margin are all listed, since every one of them meets the target.
    pub fn collate(&self, candidates: &[TailCandidate], stability: &[Stability]) -> ReportTable {
        let by_id: HashMap<usize, &TailCandidate> = candidates.iter().map(|c| (c.id, c)).collect();
        let mut stability: Vec<&Stability> = stability.iter().collect();
        stability.sort_by_key(|s| s.candidate_id);

        let search = stability.iter().any(|s| s.ideal_cg().is_some());
        let columns = match (search, self.variant) {
            (true, _) => SEARCH_COLUMNS,
            (false, TailVariant::Conventional) => CONVENTIONAL_COLUMNS,
            (false, TailVariant::InvertedVee) => VEE_COLUMNS,
        };

        let rows: Vec<ReportRow> = stability
            .into_iter()
            .filter_map(|s| {
                let c = by_id.get(&s.candidate_id)?;
                let values = match (s.static_margin(), s.ideal_cg()) {
                    (Some(sm), _) if self.accepts(sm) => self.margin_row(c, s.neutral_point, sm),
                    (_, Some(cg)) => vec![cg, s.neutral_point, self.target],
                    _ => return None,
                };
                Some(ReportRow {
                    candidate_id: c.id,
                    values,
                })
            })
            .collect();

        if rows.is_empty() {
            warn!(
                "no candidates within {} of static margin {}; consider changing limits",
                self.tolerance, self.target
            );
        } else {
            info!("{} candidates meet the target margin", rows.len());
        }
        ReportTable { columns, rows }
    }

    fn margin_row(&self, c: &TailCandidate, np: f64, sm: f64) -> Vec<f64> {
        match self.variant {
            TailVariant::Conventional => vec![
                sm,
                np,
                c.position,
                c.arm,
                c.area,
                c.vertical_area,
                c.aspect_ratio,
            ],
            TailVariant::InvertedVee => vec![
                sm,
                np,
                c.position,
                c.arm,
                c.span,
                c.chord,
                c.dihedral_deg,
                c.area,
                c.vertical_area,
                c.aspect_ratio,
            ],
        }
    }
}

/// CSV file writer; quoting is left to the `csv` crate.
pub struct CsvWriter {
    w: csv::Writer<File>,
    path: PathBuf,
}

impl CsvWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let w = csv::Writer::from_path(path).map_err(|e| TailError::csv(path, e))?;
        Ok(Self {
            w,
            path: path.to_path_buf(),
        })
    }

    pub fn write_header(&mut self, columns: &[&str]) -> Result<()> {
        self.write_record(columns)
    }

    pub fn write_record<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<()> {
        self.w
            .write_record(fields.iter().map(|f| f.as_ref()))
            .map_err(|e| TailError::csv(&self.path, e))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.w
            .flush()
            .map_err(|e| TailError::io(format!("failed to write {}", self.path.display()), e))
    }
}

pub fn write_report(path: &Path, table: &ReportTable) -> Result<()> {
    let mut w = CsvWriter::create(path)?;
    w.write_header(table.columns)?;
    for row in &table.rows {
        let mut fields = vec![row.candidate_id.to_string()];
        fields.extend(row.values.iter().map(|v| format!("{v:.2}")));
        w.write_record(&fields)?;
    }
    w.flush()
}

/// Every candidate with its geometry and, when analysed, its stability.
pub fn write_grid(
    path: &Path,
    candidates: &[TailCandidate],
    stability: &[Stability],
    failures: &[CandidateFailure],
) -> Result<()> {
    let analysed: HashMap<usize, &Stability> = stability.iter().map(|s| (s.candidate_id, s)).collect();
    let failed: HashMap<usize, &CandidateFailure> = failures.iter().map(|f| (f.candidate_id, f)).collect();

    let mut w = CsvWriter::create(path)?;
    w.write_header(&[
        "id",
        "area",
        "position",
        "arm",
        "span",
        "chord",
        "aspect_ratio",
        "dihedral_deg",
        "vertical_area",
        "neutral_point",
        "static_margin",
        "ideal_cg",
        "failure",
    ])?;
    for c in candidates {
        let s = analysed.get(&c.id);
        let opt = |v: Option<f64>| v.map(|v| format!("{v:.6}")).unwrap_or_default();
        let failure = failed.get(&c.id).map(|f| f.message.clone()).unwrap_or_default();
        w.write_record(&[
            c.id.to_string(),
            format!("{:.6}", c.area),
            format!("{:.6}", c.position),
            format!("{:.6}", c.arm),
            format!("{:.6}", c.span),
            format!("{:.6}", c.chord),
            format!("{:.6}", c.aspect_ratio),
            format!("{:.4}", c.dihedral_deg),
            format!("{:.6}", c.vertical_area),
            opt(s.map(|s| s.neutral_point)),
            opt(s.and_then(|s| s.static_margin())),
            opt(s.and_then(|s| s.ideal_cg())),
            failure,
        ])?;
    }
    w.flush()
}

/// The target curve with tail position and vertical tail area alongside.
pub fn write_slice(
    path: &Path,
    curve: &[CurvePoint],
    position: impl Fn(&CurvePoint) -> f64,
    vertical_area: impl Fn(f64) -> f64,
) -> Result<()> {
    let mut w = CsvWriter::create(path)?;
    w.write_header(&["area", "arm", "position", "vertical_area"])?;
    for p in curve {
        w.write_record(&[
            format!("{:.6}", p.area),
            format!("{:.6}", p.arm),
            format!("{:.6}", position(p)),
            format!("{:.6}", vertical_area(p.arm)),
        ])?;
    }
    w.flush()
}

/// Long-format forward surface: one row per (area, arm) grid node.
pub fn write_surface(path: &Path, grid: &SurfaceGrid) -> Result<()> {
    let mut w = CsvWriter::create(path)?;
    w.write_header(&["area", "arm", "static_margin"])?;
    for (area, row) in grid.areas.iter().zip(&grid.margins) {
        for (arm, margin) in grid.arms.iter().zip(row) {
            w.write_record(&[
                format!("{area:.6}"),
                format!("{arm:.6}"),
                format!("{margin:.6}"),
            ])?;
        }
    }
    w.flush()
}
