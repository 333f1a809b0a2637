use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::case::AnalysisCase;
use crate::error::ConfigError;
use crate::generator::{linspace, TailAxis, TailGrid, TailVariant};
use crate::geometry::DEFAULT_WING;
use crate::results::StabilityMode;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Root {
    pub project: Project,
    pub solver: Solver,
    pub airframe: Airframe,
    pub case: Case,
    pub tail: Tail,
    pub target: Target,
    /// Optional angle-of-attack sweep for polars and eigenmodes.
    #[serde(default)]
    pub aero: Option<Aero>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Project {
    pub name: String,
    /// Root of the generated geometry, case and results directories.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
}

fn default_workdir() -> PathBuf {
    PathBuf::from("work")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Solver {
    pub executable: PathBuf,
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Per-run wall clock limit; runs are unbounded when absent.
    #[serde(default)]
    pub timeout_s: Option<f64>,
    /// Extra command-line arguments for the solver.
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_threads() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Airframe {
    /// Reference geometry the tail is spliced into.
    pub geometry: PathBuf,
    #[serde(default = "default_wing")]
    pub wing_surface: String,
    /// Surface whose sections are replaced by the generated tail.
    #[serde(default = "default_elevator")]
    pub elevator_section: String,
    /// Surface dropped from every candidate.
    #[serde(default = "default_fin")]
    pub fin_surface: String,
    #[serde(default = "default_aerofoil")]
    pub elevator_aerofoil: String,
}

fn default_wing() -> String {
    DEFAULT_WING.to_string()
}
fn default_elevator() -> String {
    "Elevator".to_string()
}
fn default_fin() -> String {
    "Fin".to_string()
}
fn default_aerofoil() -> String {
    "NACA_0012H.dat".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Case {
    /// Omit to search for the CG giving the target margin.
    #[serde(default)]
    pub cg: Option<[f64; 3]>,
    pub mass: f64,
    #[serde(default)]
    pub inertia: Option<[f64; 3]>,
    #[serde(default)]
    pub velocity: Option<f64>,
    #[serde(default)]
    pub density: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tail {
    /// "position" (tail leading edge) or "arm" (moment arm).
    #[serde(default = "default_axis")]
    pub axis: String,
    pub lower: f64,
    pub upper: f64,
    pub area_lower: f64,
    pub area_upper: f64,
    #[serde(default = "default_steps")]
    pub steps: usize,
    /// "conventional" or "inverted-vee".
    #[serde(default = "default_variant")]
    pub variant: String,
    #[serde(default)]
    pub horizontal_span: Option<f64>,
    #[serde(default = "default_volume_coefficient")]
    pub vertical_volume_coefficient: f64,
    #[serde(default = "default_aspect_ratio_factor")]
    pub aspect_ratio_factor: f64,
}

fn default_axis() -> String {
    "position".to_string()
}
fn default_steps() -> usize {
    7
}
fn default_variant() -> String {
    "conventional".to_string()
}
fn default_volume_coefficient() -> f64 {
    0.03
}
fn default_aspect_ratio_factor() -> f64 {
    2.0 / 3.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Target {
    pub static_margin: f64,
    /// Absolute tolerance on the static margin for the report.
    pub tolerance: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Aero {
    /// Airframe to sweep; the reference geometry when absent.
    #[serde(default)]
    pub geometry: Option<PathBuf>,
    /// Angle of attack range in degrees, both ends included.
    pub alpha_start: f64,
    pub alpha_end: f64,
    #[serde(default = "default_increment")]
    pub increment: f64,
    #[serde(default = "default_true")]
    pub polars: bool,
    #[serde(default = "default_true")]
    pub modes: bool,
    #[serde(default = "default_gravity")]
    pub gravity: f64,
}

fn default_increment() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_gravity() -> f64 {
    9.81
}

impl Aero {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.alpha_start.is_finite() && self.alpha_end.is_finite()) {
            return Err(ConfigError::invalid("aero.alpha_start", "finite, as is aero.alpha_end"));
        }
        if self.alpha_start > self.alpha_end {
            return Err(ConfigError::invalid("aero.alpha_start", "<= aero.alpha_end"));
        }
        if !(self.increment > 0.0 && self.increment.is_finite()) {
            return Err(ConfigError::invalid("aero.increment", "finite and positive"));
        }
        if !(self.polars || self.modes) {
            return Err(ConfigError::invalid("aero.polars", "enabled unless aero.modes is"));
        }
        if !(self.gravity > 0.0 && self.gravity.is_finite()) {
            return Err(ConfigError::invalid("aero.gravity", "finite and positive"));
        }
        Ok(())
    }

    /// Evenly spaced angles from start to end; the count is how many whole
    /// increments fit, plus one.
    pub fn alphas(&self) -> Vec<f64> {
        let n = 1 + ((self.alpha_end - self.alpha_start) / self.increment + 1e-9).floor() as usize;
        linspace(self.alpha_start, self.alpha_end, n)
    }
}

impl Root {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        Self::parse(&text, path)
    }

    /// Parses `text` read from `path`, resolving relative paths against the
    /// file's directory.
    pub fn parse(text: &str, path: &Path) -> anyhow::Result<Self> {
        let mut cfg: Root = toml::from_str(text)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        if let Some(dir) = path.parent() {
            cfg.resolve_paths(dir);
        }
        Ok(cfg)
    }

    /// Makes relative paths relative to `base` instead of the working
    /// directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.project.workdir,
            &mut self.solver.executable,
            &mut self.airframe.geometry,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        if let Some(path) = self.aero.as_mut().and_then(|a| a.geometry.as_mut()) {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.solver.threads == 0 {
            return Err(ConfigError::invalid("solver.threads", ">= 1"));
        }
        self.timeout()?;
        if !(self.case.mass >= 0.0 && self.case.mass.is_finite()) {
            return Err(ConfigError::invalid("case.mass", "non-negative"));
        }
        if !(self.target.tolerance > 0.0 && self.target.tolerance.is_finite()) {
            return Err(ConfigError::invalid("target.tolerance", "positive"));
        }
        if let Some(aero) = &self.aero {
            aero.validate()?;
        }
        self.tail_grid()?.validate()
    }

    pub fn variant(&self) -> Result<TailVariant, ConfigError> {
        self.tail.variant.parse()
    }

    pub fn tail_grid(&self) -> Result<TailGrid, ConfigError> {
        let axis: TailAxis = self.tail.axis.parse()?;
        Ok(TailGrid {
            axis,
            tail_lower: self.tail.lower,
            tail_upper: self.tail.upper,
            area_lower: self.tail.area_lower,
            area_upper: self.tail.area_upper,
            steps: self.tail.steps,
            variant: self.variant()?,
            horizontal_span: self.tail.horizontal_span,
            vertical_volume_coefficient: self.tail.vertical_volume_coefficient,
            aspect_ratio_factor: self.tail.aspect_ratio_factor,
            aerofoil: self.airframe.elevator_aerofoil.clone(),
        })
    }

    pub fn analysis_case(&self) -> AnalysisCase {
        AnalysisCase {
            inertia: self.case.inertia,
            velocity: self.case.velocity,
            density: self.case.density,
            ..AnalysisCase::stability(self.case.cg, self.case.mass)
        }
    }

    /// Case for one angle of the aero sweep. The sweep needs a known CG.
    pub fn aero_case(&self, alpha: f64) -> Result<AnalysisCase, ConfigError> {
        let aero = self
            .aero
            .as_ref()
            .ok_or_else(|| ConfigError::invalid("aero", "configured for an aero sweep"))?;
        if self.case.cg.is_none() {
            return Err(ConfigError::invalid("case.cg", "set for an aero sweep"));
        }
        Ok(AnalysisCase {
            alpha: Some(alpha),
            gravity: Some(aero.gravity),
            ..self.analysis_case()
        })
    }

    /// Airframe the aero sweep runs on.
    pub fn aero_geometry(&self) -> &Path {
        self.aero
            .as_ref()
            .and_then(|a| a.geometry.as_deref())
            .unwrap_or(&self.airframe.geometry)
    }

    /// Margin mode when the CG is configured, CG search otherwise.
    pub fn stability_mode(&self) -> StabilityMode {
        match self.case.cg {
            Some([x, _, _]) => StabilityMode::Margin { cg_x: x },
            None => StabilityMode::Search {
                target_margin: self.target.static_margin,
            },
        }
    }

    /// Per-run limit; `None` leaves runs unbounded.
    pub fn timeout(&self) -> Result<Option<Duration>, ConfigError> {
        let Some(t) = self.solver.timeout_s else {
            return Ok(None);
        };
        match Duration::try_from_secs_f64(t) {
            Ok(d) if !d.is_zero() => Ok(Some(d)),
            _ => Err(ConfigError::invalid(
                "solver.timeout_s",
                "finite and positive (omit for no limit)",
            )),
        }
    }
}
