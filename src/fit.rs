//! Response surface over the candidate grid.
//!
//! Static margin is modelled as `margin = a * area^b * arm^c + d` and fitted
//! by Levenberg-Marquardt least squares. The model inverts in closed form
//! for the arm that gives a fixed margin at a given area, which traces the
//! curve of tail configurations meeting the target.

use log::{debug, warn};
use nalgebra::{Matrix4, Vector4};
use serde::Serialize;

use crate::error::FitError;
use crate::generator::linspace;

/// Points along the inverted target curve.
pub const SLICE_POINTS: usize = 20;
/// Points per axis of the forward surface grid.
pub const SURFACE_POINTS: usize = 20;

const MAX_ITERATIONS: usize = 500;
const STEP_TOLERANCE: f64 = 1e-12;
const COST_FLOOR: f64 = 1e-28;
const MAX_DAMPING: f64 = 1e16;

/// One analysed grid point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub arm: f64,
    pub area: f64,
    pub margin: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SurfaceModel {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl SurfaceModel {
    pub fn margin(&self, arm: f64, area: f64) -> f64 {
        self.a * area.powf(self.b) * arm.powf(self.c) + self.d
    }

    /// Arm giving `margin` at `area`. NaN where the model never reaches it.
    pub fn arm_at(&self, area: f64, margin: f64) -> f64 {
        ((1.0 / self.c) * ((margin - self.d) / (self.a * area.powf(self.b))).ln()).exp()
    }

    fn params(&self) -> Vector4<f64> {
        Vector4::new(self.a, self.b, self.c, self.d)
    }

    fn from_params(p: &Vector4<f64>) -> Self {
        Self {
            a: p[0],
            b: p[1],
            c: p[2],
            d: p[3],
        }
    }

    fn cost(&self, samples: &[Sample]) -> f64 {
        samples
            .iter()
            .map(|s| (self.margin(s.arm, s.area) - s.margin).powi(2))
            .sum()
    }
}

/// Starting point from a straight-line fit of margin against tail volume
/// `area * arm`, i.e. `b = c = 1`.
fn seed(samples: &[Sample]) -> Result<SurfaceModel, FitError> {
    let n = samples.len() as f64;
    let mean_w = samples.iter().map(|s| s.area * s.arm).sum::<f64>() / n;
    let mean_z = samples.iter().map(|s| s.margin).sum::<f64>() / n;
    let (sxx, sxz) = samples.iter().fold((0.0, 0.0), |(sxx, sxz), s| {
        let dw = s.area * s.arm - mean_w;
        (sxx + dw * dw, sxz + dw * (s.margin - mean_z))
    });
    if sxx == 0.0 {
        return Err(FitError::Degenerate("samples span a single tail volume"));
    }
    let a = sxz / sxx;
    Ok(SurfaceModel {
        a,
        b: 1.0,
        c: 1.0,
        d: mean_z - a * mean_w,
    })
}

/// Best local least-squares fit of the margin surface.
pub fn fit_surface(samples: &[Sample]) -> Result<SurfaceModel, FitError> {
    if samples.len() < 4 {
        return Err(FitError::TooFewSamples {
            needed: 4,
            got: samples.len(),
        });
    }
    if let Some(s) = samples.iter().find(|s| !(s.arm > 0.0 && s.area > 0.0)) {
        return Err(FitError::NonPositiveSample {
            arm: s.arm,
            area: s.area,
        });
    }

    let mut model = seed(samples)?;
    if model.a == 0.0 {
        // Flat margins: the constant term is the whole fit.
        return Ok(model);
    }

    let mut cost = model.cost(samples);
    let mut damping = 1e-3;

    for iteration in 0..MAX_ITERATIONS {
        if cost <= COST_FLOOR {
            break;
        }

        let mut jtj = Matrix4::<f64>::zeros();
        let mut gradient = Vector4::<f64>::zeros();
        for s in samples {
            let power = s.area.powf(model.b) * s.arm.powf(model.c);
            let residual = model.a * power + model.d - s.margin;
            let j = Vector4::new(
                power,
                model.a * power * s.area.ln(),
                model.a * power * s.arm.ln(),
                1.0,
            );
            jtj += j * j.transpose();
            gradient += j * residual;
        }

        let mut accepted = None;
        while damping < MAX_DAMPING {
            let mut lhs = jtj;
            for k in 0..4 {
                lhs[(k, k)] += damping * jtj[(k, k)].max(1e-12);
            }
            let Some(step) = lhs.lu().solve(&(-gradient)) else {
                damping *= 10.0;
                continue;
            };
            let candidate = SurfaceModel::from_params(&(model.params() + step));
            let candidate_cost = candidate.cost(samples);
            if candidate_cost.is_finite() && candidate_cost < cost {
                damping = (damping / 10.0).max(1e-12);
                accepted = Some((candidate, candidate_cost, step));
                break;
            }
            damping *= 10.0;
        }

        let Some((next, next_cost, step)) = accepted else {
            debug!("surface fit stalled after {iteration} iterations, cost {cost:.3e}");
            break;
        };
        let small_step = step.norm() <= STEP_TOLERANCE * (model.params().norm() + STEP_TOLERANCE);
        model = next;
        cost = next_cost;
        if small_step {
            break;
        }
    }

    if !(model.a.is_finite() && model.b.is_finite() && model.c.is_finite() && model.d.is_finite()) {
        return Err(FitError::Degenerate("fit diverged"));
    }
    debug!(
        "surface fit a={:.6e} b={:.6} c={:.6} d={:.6} cost={cost:.3e}",
        model.a, model.b, model.c, model.d
    );
    Ok(model)
}

/// Piecewise-linear interpolation clamped at the ends; `xp` ascending.
fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let (Some(&first), Some(&last)) = (xp.first(), xp.last()) else {
        return f64::NAN;
    };
    if x <= first {
        return fp[0];
    }
    if x >= last {
        return fp[fp.len() - 1];
    }
    let i = xp.partition_point(|&v| v <= x);
    let (x0, x1) = (xp[i - 1], xp[i]);
    let (y0, y1) = (fp[i - 1], fp[i]);
    if x1 == x0 {
        return y0;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

fn sorted_table(mut pairs: Vec<(f64, f64)>) -> (Vec<f64>, Vec<f64>) {
    pairs.sort_by(|l, r| l.0.total_cmp(&r.0));
    pairs.dedup_by(|next, kept| next.0 == kept.0);
    pairs.into_iter().unzip()
}

/// Converts between tail moment arm and tail leading-edge position using
/// the grid's own samples. A presentation aid, not a physical relation.
#[derive(Debug, Clone)]
pub struct ArmPositionMap {
    by_arm: (Vec<f64>, Vec<f64>),
    by_position: (Vec<f64>, Vec<f64>),
}

impl ArmPositionMap {
    pub fn new(pairs: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let pairs: Vec<(f64, f64)> = pairs.into_iter().collect();
        let swapped = pairs.iter().map(|&(arm, pos)| (pos, arm)).collect();
        Self {
            by_arm: sorted_table(pairs),
            by_position: sorted_table(swapped),
        }
    }

    pub fn position_at(&self, arm: f64) -> f64 {
        interp(arm, &self.by_arm.0, &self.by_arm.1)
    }

    pub fn arm_at(&self, position: f64) -> f64 {
        interp(position, &self.by_position.0, &self.by_position.1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurvePoint {
    pub area: f64,
    pub arm: f64,
}

/// Forward surface sampled on a regular grid; `margins[i][j]` belongs to
/// `areas[i]` and `arms[j]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceGrid {
    pub arms: Vec<f64>,
    pub areas: Vec<f64>,
    pub margins: Vec<Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct SurfaceFit {
    samples: Vec<Sample>,
    target: f64,
    range: (f64, f64),
    unstable: bool,
    model: SurfaceModel,
}

impl SurfaceFit {
    /// Fits the surface. A target outside the sampled margins marks the fit
    /// unstable; the forward surface stays usable either way.
    pub fn new(samples: Vec<Sample>, target: f64) -> Result<Self, FitError> {
        let model = fit_surface(&samples)?;
        let (min, max) = samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
                (lo.min(s.margin), hi.max(s.margin))
            });
        let unstable = !(min <= target && target <= max);
        if unstable {
            warn!(
                "no stable configurations: target margin {target} outside sampled [{min:.4}, {max:.4}]; consider changing limits"
            );
        }
        Ok(Self {
            samples,
            target,
            range: (min, max),
            unstable,
            model,
        })
    }

    pub fn is_unstable(&self) -> bool {
        self.unstable
    }

    pub fn model(&self) -> &SurfaceModel {
        &self.model
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn margin_range(&self) -> (f64, f64) {
        self.range
    }

    pub fn forward(&self, arm: f64, area: f64) -> f64 {
        self.model.margin(arm, area)
    }

    pub fn inverse(&self, area: f64, margin: f64) -> f64 {
        self.model.arm_at(area, margin)
    }

    pub fn surface(&self, n: usize) -> SurfaceGrid {
        let (arm_lo, arm_hi) = bounds(self.samples.iter().map(|s| s.arm));
        let (area_lo, area_hi) = bounds(self.samples.iter().map(|s| s.area));
        let arms = linspace(arm_lo, arm_hi, n);
        let areas = linspace(area_lo, area_hi, n);
        let margins = areas
            .iter()
            .map(|&area| arms.iter().map(|&arm| self.forward(arm, area)).collect())
            .collect();
        SurfaceGrid {
            arms,
            areas,
            margins,
        }
    }

    /// The target-margin curve over the sampled area range.
    pub fn slice(&self, n: usize) -> Result<Vec<CurvePoint>, FitError> {
        if self.unstable {
            return Err(FitError::OutOfRange {
                target: self.target,
                min: self.range.0,
                max: self.range.1,
            });
        }
        let (lo, hi) = bounds(self.samples.iter().map(|s| s.area));
        Ok(linspace(lo, hi, n)
            .into_iter()
            .map(|area| CurvePoint {
                area,
                arm: self.inverse(area, self.target),
            })
            .collect())
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{planted_samples, PLANTED};
    use approx::assert_relative_eq;

    #[test]
    fn test_recovers_planted_coefficients() {
        let samples = planted_samples(7);
        let m = fit_surface(&samples).unwrap();
        assert_relative_eq!(m.a, PLANTED.a, max_relative = 1e-6);
        assert_relative_eq!(m.b, PLANTED.b, max_relative = 1e-6);
        assert_relative_eq!(m.c, PLANTED.c, max_relative = 1e-6);
        assert_relative_eq!(m.d, PLANTED.d, epsilon = 1e-7);
    }

    #[test]
    fn test_forward_and_inverse_agree() {
        let fit = SurfaceFit::new(planted_samples(7), 0.1).unwrap();
        for s in fit.samples() {
            assert_relative_eq!(fit.forward(s.arm, s.area), s.margin, epsilon = 1e-8);
            assert_relative_eq!(fit.inverse(s.area, s.margin), s.arm, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_closed_form_inverse() {
        let arm = PLANTED.arm_at(1.3, 0.05);
        assert_relative_eq!(PLANTED.margin(arm, 1.3), 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_slice_is_monotonic() {
        let fit = SurfaceFit::new(planted_samples(7), 0.1).unwrap();
        assert!(!fit.is_unstable());
        let curve = fit.slice(SLICE_POINTS).unwrap();
        assert_eq!(curve.len(), SLICE_POINTS);
        assert_relative_eq!(curve[0].area, 1.0);
        assert_relative_eq!(curve[SLICE_POINTS - 1].area, 2.0);
        for pair in curve.windows(2) {
            assert!(pair[1].arm < pair[0].arm);
        }
        for p in &curve {
            assert_relative_eq!(fit.forward(p.arm, p.area), 0.1, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_target_on_range_boundary_is_stable() {
        let samples = planted_samples(5);
        let (lo, hi) = bounds(samples.iter().map(|s| s.margin));
        for target in [lo, hi] {
            let fit = SurfaceFit::new(samples.clone(), target).unwrap();
            assert!(!fit.is_unstable());
            assert!(fit.slice(SLICE_POINTS).is_ok());
        }
    }

    #[test]
    fn test_target_outside_range_blocks_slice() {
        let samples = planted_samples(5);
        let (_, hi) = bounds(samples.iter().map(|s| s.margin));
        let fit = SurfaceFit::new(samples, hi + 0.01).unwrap();
        assert!(fit.is_unstable());
        assert!(matches!(fit.slice(SLICE_POINTS), Err(FitError::OutOfRange { .. })));
        // Forward surface is still available.
        let grid = fit.surface(SURFACE_POINTS);
        assert_eq!(grid.margins.len(), SURFACE_POINTS);
        assert!(grid.margins.iter().all(|row| row.len() == SURFACE_POINTS));
    }

    #[test]
    fn test_too_few_and_non_positive_samples() {
        let s = Sample {
            arm: 1.0,
            area: 1.0,
            margin: 0.1,
        };
        assert!(matches!(
            fit_surface(&[s, s, s]),
            Err(FitError::TooFewSamples { got: 3, .. })
        ));
        let bad = Sample { arm: -1.0, ..s };
        assert!(matches!(
            fit_surface(&[s, s, s, bad]),
            Err(FitError::NonPositiveSample { .. })
        ));
        assert!(matches!(fit_surface(&[s, s, s, s]), Err(FitError::Degenerate(_))));
    }

    #[test]
    fn test_interp_clamps_and_interpolates() {
        let xp = [1.0, 2.0, 4.0];
        let fp = [10.0, 20.0, 0.0];
        assert_eq!(interp(0.0, &xp, &fp), 10.0);
        assert_eq!(interp(5.0, &xp, &fp), 0.0);
        assert_relative_eq!(interp(1.5, &xp, &fp), 15.0);
        assert_relative_eq!(interp(3.0, &xp, &fp), 10.0);
        assert!(interp(1.0, &[], &[]).is_nan());
    }

    #[test]
    fn test_arm_position_map_round_trip() {
        let map = ArmPositionMap::new((0..5).map(|i| {
            let arm = 1.0 + i as f64;
            (arm, arm + 0.3)
        }));
        assert_relative_eq!(map.position_at(2.5), 2.8);
        assert_relative_eq!(map.arm_at(map.position_at(3.7)), 3.7, epsilon = 1e-12);
    }
}
