//! End-to-end tail sizing run.
//!
//! Phases run strictly in sequence: template preparation, grid generation,
//! the analysis pool, extraction, fitting and collation. Configuration and
//! template problems abort before the workspace is touched; per-candidate
//! problems are collected into the report.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};
use serde::Serialize;

use crate::config::Root;
use crate::error::{FitError, Result, TailError, TemplateError};
use crate::fit::{ArmPositionMap, Sample, SurfaceFit, SurfaceModel, SLICE_POINTS, SURFACE_POINTS};
use crate::generator::{ConfigurationGenerator, TailGrid, TailCandidate, TailVariant};
use crate::geometry::{GeometryTemplate, ReferenceAirframe};
use crate::report::{self, ReportCollation, ReportTable};
use crate::results::{
    CandidateFailure, Extraction, NeutralPointReader, ResultExtractor, Stability, StabilityMode,
};
use crate::runner::{AnalysisRunner, CancelToken, Solver};
use crate::workspace::Workspace;

/// Loads the reference geometry and opens the splice point for the tail.
///
/// A missing elevator gets a fresh tail surface appended; a missing fin is
/// only worth a warning.
pub fn prepare_template(cfg: &Root) -> Result<GeometryTemplate> {
    let airframe = &cfg.airframe;
    let mut template = GeometryTemplate::load(&airframe.geometry, &airframe.wing_surface)?;

    match template.remove_section(&airframe.elevator_section) {
        Ok(()) => {}
        Err(TemplateError::NotFound(name)) => {
            warn!("'{name}' not in reference geometry; appending a new tail surface");
            template.append_surface(&name);
        }
        Err(e) => return Err(e.into()),
    }
    match template.remove_surface(&airframe.fin_surface) {
        Ok(()) => {}
        Err(TemplateError::NotFound(name)) => warn!("'{name}' not in reference geometry"),
        Err(e) => return Err(e.into()),
    }
    Ok(template)
}

/// A generated grid, written to a freshly reset workspace.
#[derive(Debug)]
pub struct Generated {
    pub template: GeometryTemplate,
    pub tail: TailGrid,
    pub workspace: Workspace,
    pub candidates: Vec<TailCandidate>,
}

/// Validates, sizes every candidate, then resets the workspace and writes
/// the geometries. Nothing on disk changes if any candidate is invalid.
pub fn generate(cfg: &Root) -> Result<Generated> {
    cfg.validate()?;
    let tail = cfg.tail_grid()?;
    let template = prepare_template(cfg)?;
    let generator = ConfigurationGenerator::new(&template, &tail);

    let workdir = &cfg.project.workdir;
    generator.plan(&Workspace::at(workdir))?;
    let workspace = Workspace::reset(workdir)?;
    let candidates = generator.generate(&workspace)?;
    Ok(Generated {
        template,
        tail,
        workspace,
        candidates,
    })
}

pub struct Sizing<'a, S: Solver> {
    cfg: &'a Root,
    solver: &'a S,
    cancel: CancelToken,
}

impl<'a, S: Solver> Sizing<'a, S> {
    pub fn new(cfg: &'a Root, solver: &'a S) -> Self {
        Self {
            cfg,
            solver,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(&self) -> Result<SizingReport> {
        let cfg = self.cfg;
        let Generated {
            template,
            tail,
            workspace,
            candidates,
        } = generate(cfg)?;
        let reference = *template.reference();

        let case_path = cfg.analysis_case().write(&workspace)?;
        let jobs = AnalysisRunner::<S>::jobs(&candidates, &case_path, &workspace);
        let outcomes = AnalysisRunner::new(self.solver, cfg.solver.threads)
            .with_cancel(self.cancel.clone())
            .run(&jobs)?;

        let mode = cfg.stability_mode();
        let extractor = ResultExtractor::new(NeutralPointReader::default(), mode, reference.mac);
        let Extraction {
            stability,
            failures,
        } = extractor.extract_all(&outcomes);
        info!(
            "{}/{} candidates usable, {} excluded",
            stability.len(),
            candidates.len(),
            failures.len()
        );

        let target = cfg.target.static_margin;
        let (fit, fit_error) = match mode {
            StabilityMode::Margin { .. } => {
                match SurfaceFit::new(samples(&candidates, &stability), target) {
                    Ok(fit) => (Some(fit), None),
                    Err(e) => {
                        warn!("surface fit skipped: {e}");
                        (None, Some(e))
                    }
                }
            }
            StabilityMode::Search { .. } => (None, None),
        };

        let table = ReportCollation {
            target,
            tolerance: cfg.target.tolerance,
            variant: tail.variant,
        }
        .collate(&candidates, &stability);

        Ok(SizingReport {
            reference,
            tail,
            mode,
            target,
            workspace,
            candidates,
            stability,
            failures,
            fit,
            fit_error,
            table,
        })
    }
}

/// Joins extracted margins back onto their candidates.
fn samples(candidates: &[TailCandidate], stability: &[Stability]) -> Vec<Sample> {
    let by_id: HashMap<usize, &TailCandidate> = candidates.iter().map(|c| (c.id, c)).collect();
    stability
        .iter()
        .filter_map(|s| {
            let c = by_id.get(&s.candidate_id)?;
            Some(Sample {
                arm: c.arm,
                area: c.area,
                margin: s.static_margin()?,
            })
        })
        .collect()
}

#[derive(Debug)]
pub struct SizingReport {
    pub reference: ReferenceAirframe,
    pub tail: TailGrid,
    pub mode: StabilityMode,
    pub target: f64,
    pub workspace: Workspace,
    pub candidates: Vec<TailCandidate>,
    pub stability: Vec<Stability>,
    pub failures: Vec<CandidateFailure>,
    /// Margin mode only.
    pub fit: Option<SurfaceFit>,
    pub fit_error: Option<FitError>,
    pub table: ReportTable,
}

impl SizingReport {
    pub fn usable(&self) -> usize {
        self.stability.len()
    }

    pub fn is_unstable(&self) -> bool {
        self.fit.as_ref().is_some_and(SurfaceFit::is_unstable)
    }

    /// Neutral point a tail must produce for the target margin at the
    /// configured CG.
    pub fn required_neutral_point(&self) -> Option<f64> {
        match self.mode {
            StabilityMode::Margin { cg_x } => Some(cg_x + self.reference.mac * self.target),
            StabilityMode::Search { .. } => None,
        }
    }

    /// Root leading-edge x of a tail of `area` at moment arm `arm`.
    pub fn position_at(&self, area: f64, arm: f64) -> f64 {
        self.tail.position_at(&self.reference, area, arm)
    }

    /// Interpolated arm/position lookup over the sampled grid.
    pub fn arm_positions(&self) -> ArmPositionMap {
        ArmPositionMap::new(self.candidates.iter().map(|c| (c.arm, c.position)))
    }

    pub fn vertical_area(&self, arm: f64) -> f64 {
        self.tail.vertical_volume_coefficient * self.reference.area * self.reference.span / arm
    }

    /// Writes the report files into `out_dir` and returns their paths.
    pub fn write_outputs(&self, out_dir: &Path, manifest: &Manifest) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(out_dir)
            .map_err(|e| TailError::io(format!("failed to create {}", out_dir.display()), e))?;
        let mut written = Vec::new();

        let path = out_dir.join("report.csv");
        report::write_report(&path, &self.table)?;
        written.push(path);

        let path = out_dir.join("grid.csv");
        report::write_grid(&path, &self.candidates, &self.stability, &self.failures)?;
        written.push(path);

        if let Some(fit) = &self.fit {
            let path = out_dir.join("surface.csv");
            report::write_surface(&path, &fit.surface(SURFACE_POINTS))?;
            written.push(path);

            if let Ok(curve) = fit.slice(SLICE_POINTS) {
                let path = out_dir.join("slice.csv");
                report::write_slice(
                    &path,
                    &curve,
                    |p| self.position_at(p.area, p.arm),
                    |arm| self.vertical_area(arm),
                )?;
                written.push(path);
            }
        }

        let path = out_dir.join("summary.json");
        let json = serde_json::to_string_pretty(&self.summary(manifest))?;
        fs::write(&path, json)
            .map_err(|e| TailError::io(format!("failed to write {}", path.display()), e))?;
        written.push(path);

        Ok(written)
    }

    fn summary<'r>(&'r self, manifest: &'r Manifest) -> Summary<'r> {
        Summary {
            manifest,
            mode: self.mode,
            variant: self.tail.variant,
            target_margin: self.target,
            total_candidates: self.candidates.len(),
            usable_candidates: self.usable(),
            reported_candidates: self.table.rows.len(),
            failures: &self.failures,
            fit: self.fit.as_ref().map(|fit| FitSummary {
                coefficients: *fit.model(),
                margin_range: fit.margin_range(),
                unstable: fit.is_unstable(),
            }),
            fit_error: self.fit_error.as_ref().map(ToString::to_string),
            required_neutral_point: self.required_neutral_point(),
        }
    }
}

#[derive(Serialize)]
struct FitSummary {
    coefficients: SurfaceModel,
    margin_range: (f64, f64),
    unstable: bool,
}

#[derive(Serialize)]
struct Summary<'r> {
    manifest: &'r Manifest,
    mode: StabilityMode,
    variant: TailVariant,
    target_margin: f64,
    total_candidates: usize,
    usable_candidates: usize,
    reported_candidates: usize,
    failures: &'r [CandidateFailure],
    fit: Option<FitSummary>,
    fit_error: Option<String>,
    required_neutral_point: Option<f64>,
}

/// Provenance recorded with every run.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub tool_version: String,
    pub timestamp_utc: String,
    pub platform: String,
    pub config_hash: String,
    pub config_snapshot: Root,
}

impl Manifest {
    pub fn new(cfg: &Root, cfg_text: &str) -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp_utc: timestamp(),
            platform: std::env::consts::OS.to_string(),
            config_hash: config_hash(cfg_text),
            config_snapshot: cfg.clone(),
        }
    }
}

fn config_hash(text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let days = now / 86_400;
    let secs = now % 86_400;
    let (year, month, day) = civil_date(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}Z",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

fn is_leap(year: u64) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

/// Calendar date for a count of days since 1970-01-01.
fn civil_date(mut days: u64) -> (u64, u64, u64) {
    let mut year = 1970;
    loop {
        let len = if is_leap(year) { 366 } else { 365 };
        if days < len {
            break;
        }
        days -= len;
        year += 1;
    }
    let mut month = 1;
    for len in [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31] {
        let len = if month == 2 && is_leap(year) { 29 } else { len };
        if days < len {
            break;
        }
        days -= len;
        month += 1;
    }
    (year, month, days + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_civil_date() {
        assert_eq!(civil_date(0), (1970, 1, 1));
        assert_eq!(civil_date(59), (1970, 3, 1));
        // 2000-02-29 is day 11016.
        assert_eq!(civil_date(11_016), (2000, 2, 29));
        assert_eq!(civil_date(11_017), (2000, 3, 1));
    }

    #[test]
    fn test_config_hash_is_stable() {
        assert_eq!(config_hash("a = 1"), config_hash("a = 1"));
        assert_ne!(config_hash("a = 1"), config_hash("a = 2"));
        assert_eq!(config_hash("").len(), 16);
    }
}
