//! Angle-of-attack sweep of one airframe for force polars and lateral
//! eigenmodes.
//!
//! Every angle gets its own case file. Each enabled analysis is a separate
//! solver run, so a failed eigenmode run never costs the polar at the same
//! angle.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::config::Root;
use crate::error::{ConfigError, Result, TailError};
use crate::geometry::GeometryTemplate;
use crate::report::CsvWriter;
use crate::results::{read_outcome, Eigenmodes, EigenmodeReader, FailureStage, Polar, PolarReader};
use crate::runner::{AnalysisJob, AnalysisRunner, CancelToken, CommandScript, Solver};
use crate::sizing::Manifest;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AeroAnalysis {
    Polar,
    Modes,
}

impl AeroAnalysis {
    fn extension(self) -> &'static str {
        match self {
            AeroAnalysis::Polar => "polars",
            AeroAnalysis::Modes => "eig",
        }
    }
}

/// Results at one angle of attack. Either side is `None` when disabled or
/// when its run failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AeroPoint {
    pub alpha: f64,
    pub polar: Option<Polar>,
    pub modes: Option<Eigenmodes>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AeroFailure {
    pub alpha: f64,
    pub analysis: AeroAnalysis,
    pub stage: FailureStage,
    pub message: String,
}

pub struct AeroSweep<'a, S: Solver> {
    cfg: &'a Root,
    solver: &'a S,
    cancel: CancelToken,
}

impl<'a, S: Solver> AeroSweep<'a, S> {
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

    pub fn run(&self) -> Result<AeroReport> {
        let cfg = self.cfg;
        cfg.validate()?;
        let aero = cfg
            .aero
            .as_ref()
            .ok_or_else(|| ConfigError::invalid("aero", "configured for an aero sweep"))?;

        let geometry = cfg.aero_geometry().to_path_buf();
        GeometryTemplate::load(&geometry, &cfg.airframe.wing_surface)?;
        let name = geometry
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| cfg.project.name.clone());

        let alphas = aero.alphas();
        let cases = alphas
            .iter()
            .map(|&alpha| cfg.aero_case(alpha))
            .collect::<Result<Vec<_>, _>>()?;
        let analyses: Vec<AeroAnalysis> = [
            (aero.polars, AeroAnalysis::Polar),
            (aero.modes, AeroAnalysis::Modes),
        ]
        .into_iter()
        .filter_map(|(on, analysis)| on.then_some(analysis))
        .collect();

        let workspace = Workspace::reset(&cfg.project.workdir)?;
        let mut jobs = Vec::with_capacity(alphas.len() * analyses.len());
        let mut tags = Vec::with_capacity(jobs.capacity());
        for (index, case) in cases.iter().enumerate() {
            let case_path = case.write(&workspace)?;
            for &analysis in &analyses {
                let results_path = workspace.results_dir().join(format!(
                    "{name}-{}deg.{}",
                    alphas[index],
                    analysis.extension()
                ));
                let script = match analysis {
                    AeroAnalysis::Polar => {
                        CommandScript::aero(&geometry, &case_path, None, Some(&results_path))
                    }
                    AeroAnalysis::Modes => {
                        CommandScript::eigenmodes(&geometry, &case_path, &results_path)
                    }
                };
                jobs.push(AnalysisJob {
                    candidate_id: jobs.len(),
                    script,
                    results_path,
                });
                tags.push((index, analysis));
            }
        }

        let outcomes = AnalysisRunner::new(self.solver, cfg.solver.threads)
            .with_cancel(self.cancel.clone())
            .run(&jobs)?;

        let mut points: Vec<AeroPoint> = alphas
            .iter()
            .map(|&alpha| AeroPoint {
                alpha,
                polar: None,
                modes: None,
            })
            .collect();
        let mut failures = Vec::new();
        for (outcome, &(index, analysis)) in outcomes.iter().zip(&tags) {
            let point = &mut points[index];
            let read = match analysis {
                AeroAnalysis::Polar => {
                    read_outcome(&PolarReader, outcome).map(|p| point.polar = Some(p))
                }
                AeroAnalysis::Modes => {
                    read_outcome(&EigenmodeReader, outcome).map(|m| point.modes = Some(m))
                }
            };
            if let Err(failure) = read {
                warn!("alpha {} {:?} excluded: {}", point.alpha, analysis, failure.message);
                failures.push(AeroFailure {
                    alpha: point.alpha,
                    analysis,
                    stage: failure.stage,
                    message: failure.message,
                });
            }
        }
        info!(
            "aero sweep: {} angles, {} runs, {} failed",
            points.len(),
            jobs.len(),
            failures.len()
        );

        Ok(AeroReport {
            geometry,
            workspace,
            analyses,
            points,
            failures,
        })
    }
}

#[derive(Debug)]
pub struct AeroReport {
    pub geometry: PathBuf,
    pub workspace: Workspace,
    pub analyses: Vec<AeroAnalysis>,
    pub points: Vec<AeroPoint>,
    pub failures: Vec<AeroFailure>,
}

impl AeroReport {
    fn runs(&self, analysis: AeroAnalysis) -> bool {
        self.analyses.contains(&analysis)
    }

    /// Writes `polars.csv` and `modes.csv` for the enabled analyses plus
    /// `aero_summary.json`, and returns their paths.
    pub fn write_outputs(&self, out_dir: &Path, manifest: &Manifest) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(out_dir)
            .map_err(|e| TailError::io(format!("failed to create {}", out_dir.display()), e))?;
        let mut written = Vec::new();

        if self.runs(AeroAnalysis::Polar) {
            let path = out_dir.join("polars.csv");
            write_polars(&path, &self.points)?;
            written.push(path);
        }
        if self.runs(AeroAnalysis::Modes) {
            let path = out_dir.join("modes.csv");
            write_modes(&path, &self.points)?;
            written.push(path);
        }

        let path = out_dir.join("aero_summary.json");
        let summary = AeroSummary {
            manifest,
            geometry: &self.geometry,
            analyses: &self.analyses,
            points: &self.points,
            failures: &self.failures,
        };
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(&path, json)
            .map_err(|e| TailError::io(format!("failed to write {}", path.display()), e))?;
        written.push(path);

        Ok(written)
    }
}

#[derive(Serialize)]
struct AeroSummary<'r> {
    manifest: &'r Manifest,
    geometry: &'r Path,
    analyses: &'r [AeroAnalysis],
    points: &'r [AeroPoint],
    failures: &'r [AeroFailure],
}

/// One row per angle with a readable polar; the spiral column is empty when
/// the parameter is undefined.
pub fn write_polars(path: &Path, points: &[AeroPoint]) -> Result<()> {
    let mut w = CsvWriter::create(path)?;
    w.write_header(&["alpha_deg", "cl", "cd", "cl_beta", "cl_p", "spiral"])?;
    for point in points {
        let Some(p) = &point.polar else { continue };
        w.write_record(&[
            format!("{}", point.alpha),
            format!("{:.6}", p.cl),
            format!("{:.6}", p.cd),
            format!("{:.6}", p.cl_beta),
            format!("{:.6}", p.cl_p),
            p.spiral.map(|v| format!("{v:.6}")).unwrap_or_default(),
        ])?;
    }
    w.flush()
}

/// Eigenvalues are written as space-separated components.
pub fn write_modes(path: &Path, points: &[AeroPoint]) -> Result<()> {
    let join = |values: &[f64]| {
        values
            .iter()
            .map(|v| format!("{v:.6}"))
            .collect::<Vec<_>>()
            .join(" ")
    };
    let mut w = CsvWriter::create(path)?;
    w.write_header(&["alpha_deg", "dutch_roll", "roll"])?;
    for point in points {
        let Some(m) = &point.modes else { continue };
        w.write_record(&[
            format!("{}", point.alpha),
            join(&m.dutch_roll),
            join(&m.roll),
        ])?;
    }
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(alpha: f64, spiral: Option<f64>) -> AeroPoint {
        AeroPoint {
            alpha,
            polar: Some(Polar {
                cl: 0.1 * alpha,
                cd: 0.02,
                cl_beta: -0.08,
                cl_p: -0.45,
                spiral,
            }),
            modes: Some(Eigenmodes {
                dutch_roll: vec![-1.2, 3.4],
                roll: vec![-8.5, 0.0],
            }),
        }
    }

    #[test]
    fn test_polars_csv_skips_missing_points() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("polars.csv");
        let mut points = vec![point(0.0, Some(1.2)), point(2.0, None), point(4.0, Some(0.9))];
        points[2].polar = None;
        write_polars(&path, &points).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "alpha_deg,cl,cd,cl_beta,cl_p,spiral");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "0,0.000000,0.020000,-0.080000,-0.450000,1.200000");
        assert!(lines[2].starts_with("2,0.200000,"));
        assert!(lines[2].ends_with(",-0.450000,"));
    }

    #[test]
    fn test_modes_csv() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("modes.csv");
        write_modes(&path, &[point(-1.5, None)]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text.lines().nth(1),
            Some("-1.5,-1.200000 3.400000,-8.500000 0.000000")
        );
    }
}
