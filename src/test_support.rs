//! Shared fixtures for unit and scenario tests.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::SolverError;
use crate::fit::{Sample, SurfaceModel};
use crate::generator::{linspace, TailAxis, TailCandidate, TailGrid, TailVariant};
use crate::results::NEUTRAL_POINT_LINE;
use crate::runner::{AnalysisJob, CancelToken, Solver};

/// A small glider with a wing, an elevator and a fin, in that order.
pub const SAMPLE_GEOMETRY: &str = "\
Aria
#Mach
0.0
#IYsym IZsym Zsym
0 0 0.0
#Sref Cref Bref
0.5 0.25 2.0
#Xref Yref Zref
0.2 0.0 0.0

#==============================================
SURFACE
Main Wing
#Nchordwise Cspace Nspanwise Sspace
12 1.0 20 -2.0
INDEX
1
YDUPLICATE
0.0
ANGLE
2.0
SECTION
#Xle Yle Zle Chord Ainc
0.1 0.0 0.0 0.3 2.0
AFIL 0.0 1.0
SD7037.dat
SECTION
#Xle Yle Zle Chord Ainc
0.15 1.0 0.05 0.2 0.0
AFIL 0.0 1.0
SD7037.dat

#==============================================
SURFACE
Elevator
13 1.0
INDEX
937
YDUPLICATE
0.0
SECTION
1.2 0.0 0.0 0.12 0.0 10 -1
AFIL 0.0 1.0
NACA_0009.dat
SECTION
1.2 0.3 0.0 0.12 0.0 10 -2
AFIL 0.0 1.0
NACA_0009.dat

#==============================================
SURFACE
Fin
10 1.0
SECTION
1.25 0.0 0.0 0.14 0.0 8 -1
SECTION
1.3 0.0 0.2 0.1 0.0 8 -2
";

/// Mean chord of [`SAMPLE_GEOMETRY`].
pub const SAMPLE_MAC: f64 = 0.25;

/// CG used by fake solver runs.
pub const FAKE_CG_X: f64 = 0.3;

pub fn tail_grid(axis: TailAxis, steps: usize) -> TailGrid {
    TailGrid {
        axis,
        tail_lower: 2.0,
        tail_upper: 4.0,
        area_lower: 1.0,
        area_upper: 2.0,
        steps,
        variant: TailVariant::Conventional,
        horizontal_span: None,
        vertical_volume_coefficient: 0.06,
        aspect_ratio_factor: 2.0 / 3.0,
        aerofoil: "NACA_0012H.dat".to_string(),
    }
}

pub fn candidates(n: usize) -> Vec<TailCandidate> {
    (0..n)
        .map(|id| TailCandidate {
            id,
            area: 1.0 + id as f64 * 0.1,
            position: 2.0,
            arm: 2.0 + id as f64 * 0.1,
            span: 2.0,
            chord: 0.5,
            aspect_ratio: 4.0,
            dihedral_deg: 0.0,
            tip_height: 0.0,
            vertical_area: 0.1,
            geometry_path: PathBuf::from(format!("planes/{id}.avl")),
        })
        .collect()
}

/// A stability listing with `neutral_point` at the line the solver uses.
pub fn stability_listing(neutral_point: f64) -> String {
    let mut lines: Vec<String> = (0..64)
        .map(|i| format!("  row {i:>2}   CLa =   4.1230   Cma =  -0.9870"))
        .collect();
    lines[0] = " ---------------------------------------------------------------".into();
    lines[1] = " Vortex Lattice Output -- Total Forces".into();
    lines[NEUTRAL_POINT_LINE] = format!(" Neutral point  Xnp =   {neutral_point:.6}");
    lines.join("\n") + "\n"
}

/// A listing cut off before the neutral point line.
pub fn truncated_listing() -> String {
    stability_listing(0.0)
        .lines()
        .take(30)
        .collect::<Vec<_>>()
        .join("\n")
}

/// `margin = 0.05 * area^0.8 * arm^1.2 - 0.2`
pub const PLANTED: SurfaceModel = SurfaceModel {
    a: 0.05,
    b: 0.8,
    c: 1.2,
    d: -0.2,
};

/// `n x n` exact samples of [`PLANTED`] over area [1, 2] and arm [2, 4].
pub fn planted_samples(n: usize) -> Vec<Sample> {
    let arms = linspace(2.0, 4.0, n);
    linspace(1.0, 2.0, n)
        .into_iter()
        .flat_map(|area| {
            arms.iter().map(move |&arm| Sample {
                arm,
                area,
                margin: PLANTED.margin(arm, area),
            })
        })
        .collect()
}

/// A polar listing with the coefficients at the offsets the solver uses.
pub fn polar_listing(cl: f64, cd: f64, cl_beta: f64, cl_p: f64, spiral: f64) -> String {
    let mut lines = vec!["  ".to_string(); 60];
    lines[23] = format!("  CLtot =   {cl:.6}");
    lines[24] = format!("  CDtot =   {cd:.6}");
    lines[38] = format!(" Clb  a b c d e f g {cl_beta:.6}");
    lines[46] = format!(" a b c d e {cl_p:.6}");
    lines[52] = format!(" a b c d e f {spiral:.6}");
    lines.join("\n") + "\n"
}

pub fn eigenmode_listing(dutch_roll: [f64; 2], roll: [f64; 2]) -> String {
    format!(
        "\n\n\n  1  {:.6}  {:.6}\n  2  0.0  0.0\n  3  {:.6}  {:.6}\n",
        dutch_roll[0], dutch_roll[1], roll[0], roll[1]
    )
}

/// Lift, drag and spiral parameter the fake solver reports at `alpha`.
pub fn fake_polar(alpha: f64) -> (f64, f64, f64) {
    (0.2 + 0.1 * alpha, 0.02 + 0.001 * alpha * alpha, 1.0 + 0.01 * alpha)
}

/// Angle of attack from the case file named in a command script.
fn case_alpha(script: &str) -> Option<f64> {
    let case = script.lines().find_map(|l| l.strip_prefix("case "))?;
    let text = fs::read_to_string(case).ok()?;
    text.lines()
        .find_map(|l| l.strip_prefix("alpha -> alpha ="))
        .and_then(|v| v.trim().parse().ok())
}

type MarginFn = Box<dyn Fn(usize) -> f64 + Send + Sync>;

/// In-process solver. Stability runs get a listing whose neutral point gives
/// a chosen static margin at [`FAKE_CG_X`]; polar and eigenmode runs answer
/// for the angle in their case file.
pub struct FakeSolver {
    margin: MarginFn,
    truncated: HashSet<usize>,
    calls: AtomicUsize,
}

impl FakeSolver {
    pub fn margins(margin: impl Fn(usize) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            margin: Box::new(margin),
            truncated: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Candidates whose results file comes back cut short.
    pub fn truncating(mut self, ids: impl IntoIterator<Item = usize>) -> Self {
        self.truncated = ids.into_iter().collect();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Solver for FakeSolver {
    fn execute(&self, job: &AnalysisJob, _cancel: &CancelToken) -> Result<(), SolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let extension = job.results_path.extension().and_then(|e| e.to_str());
        let text = if self.truncated.contains(&job.candidate_id) {
            truncated_listing()
        } else if let Some(ext @ ("polars" | "eig")) = extension {
            let alpha = case_alpha(job.script.as_str()).unwrap_or(f64::NAN);
            if ext == "polars" {
                let (cl, cd, spiral) = fake_polar(alpha);
                polar_listing(cl, cd, -0.08, -0.45, spiral)
            } else {
                eigenmode_listing([-1.2, 3.4], [-8.5 - 0.1 * alpha, 0.0])
            }
        } else {
            let margin = (self.margin)(job.candidate_id);
            stability_listing(FAKE_CG_X + SAMPLE_MAC * margin)
        };
        fs::write(&job.results_path, text)?;
        Ok(())
    }
}
