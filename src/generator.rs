//! Candidate grid generation.
//!
//! Every grid point pairs one horizontal tail area with one tail station,
//! either the tail leading-edge position or the moment arm directly. Chord,
//! span, vertical tail area and vee angle follow from that pair and the
//! reference airframe.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use log::info;
use serde::Serialize;

use crate::error::{ConfigError, Result, TailError, TemplateError};
use crate::geometry::{GeometryTemplate, ReferenceAirframe, Section};
use crate::workspace::Workspace;

const ROOT_SPACING: f64 = -1.0;
const TIP_SPACING: f64 = -2.0;
const SPANWISE_VORTICES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TailVariant {
    /// Horizontal stabiliser with a separate fin.
    Conventional,
    /// Single inverted-vee surface sized for both pitch and yaw.
    InvertedVee,
}

impl FromStr for TailVariant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conventional" => Ok(Self::Conventional),
            "inverted-vee" | "vtail" => Ok(Self::InvertedVee),
            other => Err(ConfigError::UnknownVariant(other.to_string())),
        }
    }
}

impl fmt::Display for TailVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Conventional => "conventional",
            Self::InvertedVee => "inverted-vee",
        })
    }
}

/// Which longitudinal tail coordinate the grid bounds refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TailAxis {
    /// Leading-edge x of the tail root section; the arm is derived.
    Position,
    /// Tail moment arm; the leading-edge position is derived.
    Arm,
}

impl FromStr for TailAxis {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "position" => Ok(Self::Position),
            "arm" => Ok(Self::Arm),
            other => Err(ConfigError::UnknownAxis(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TailGrid {
    pub axis: TailAxis,
    pub tail_lower: f64,
    pub tail_upper: f64,
    pub area_lower: f64,
    pub area_upper: f64,
    pub steps: usize,
    pub variant: TailVariant,
    /// Fixed horizontal span, honoured for the inverted-vee variant only.
    pub horizontal_span: Option<f64>,
    pub vertical_volume_coefficient: f64,
    /// Tail aspect ratio as a fraction of the wing aspect ratio.
    pub aspect_ratio_factor: f64,
    pub aerofoil: String,
}

impl TailGrid {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps == 0 {
            return Err(ConfigError::invalid("tail.steps", ">= 1"));
        }
        for (field, value) in [
            ("tail.lower", self.tail_lower),
            ("tail.upper", self.tail_upper),
            ("tail.area_lower", self.area_lower),
            ("tail.area_upper", self.area_upper),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::invalid(field, "a finite number"));
            }
        }
        if !(self.tail_lower > 0.0) {
            return Err(ConfigError::invalid("tail.lower", "non-zero and positive"));
        }
        if !(self.area_lower > 0.0) {
            return Err(ConfigError::invalid("tail.area_lower", "non-zero and positive"));
        }
        if self.tail_lower > self.tail_upper {
            return Err(ConfigError::invalid("tail.lower", "<= tail.upper"));
        }
        if self.area_lower > self.area_upper {
            return Err(ConfigError::invalid("tail.area_lower", "<= tail.area_upper"));
        }
        if let Some(span) = self.horizontal_span {
            if !(span > 0.0 && span.is_finite()) {
                return Err(ConfigError::invalid(
                    "tail.horizontal_span",
                    "non-zero and positive (omit to size from aspect ratio)",
                ));
            }
        }
        if !(self.vertical_volume_coefficient > 0.0 && self.vertical_volume_coefficient.is_finite()) {
            return Err(ConfigError::invalid("tail.vertical_volume_coefficient", "positive"));
        }
        if !(self.aspect_ratio_factor > 0.0 && self.aspect_ratio_factor.is_finite()) {
            return Err(ConfigError::invalid("tail.aspect_ratio_factor", "positive"));
        }
        Ok(())
    }

    /// `(chord, span)` of a tail with planform area `area`.
    pub fn planform(&self, reference: &ReferenceAirframe, area: f64) -> (f64, f64) {
        match self.span_override() {
            Some(span) => (area / span, span),
            None => {
                let aspect_ratio = reference.aspect_ratio * self.aspect_ratio_factor;
                ((area / aspect_ratio).sqrt(), (area * aspect_ratio).sqrt())
            }
        }
    }

    /// Root leading-edge x of a tail of `area` sitting `arm` behind the
    /// wing quarter chord.
    pub fn position_at(&self, reference: &ReferenceAirframe, area: f64, arm: f64) -> f64 {
        let (chord, _) = self.planform(reference, area);
        arm + reference.quarter_chord_x() - 0.25 * chord
    }

    pub fn arm_at(&self, reference: &ReferenceAirframe, area: f64, position: f64) -> f64 {
        let (chord, _) = self.planform(reference, area);
        position + 0.25 * chord - reference.quarter_chord_x()
    }

    pub fn areas(&self) -> Vec<f64> {
        linspace(self.area_lower, self.area_upper, self.steps)
    }

    pub fn stations(&self) -> Vec<f64> {
        linspace(self.tail_lower, self.tail_upper, self.steps)
    }

    fn span_override(&self) -> Option<f64> {
        match self.variant {
            TailVariant::InvertedVee => self.horizontal_span,
            TailVariant::Conventional => None,
        }
    }
}

/// `n` evenly spaced samples over `[lo, hi]`, both ends included.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            if n > 1 {
                lo + (hi - lo) * (i as f64) / ((n - 1) as f64)
            } else {
                lo
            }
        })
        .collect()
}

/// One grid point. Immutable after generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TailCandidate {
    pub id: usize,
    /// Horizontal tail area.
    pub area: f64,
    /// Leading-edge x of the tail root section.
    pub position: f64,
    /// Tail moment arm, wing quarter chord to tail quarter chord.
    pub arm: f64,
    pub span: f64,
    pub chord: f64,
    pub aspect_ratio: f64,
    /// Vee angle in degrees, zero for conventional tails.
    pub dihedral_deg: f64,
    /// Root height above the tips, zero for conventional tails.
    pub tip_height: f64,
    /// Vertical tail area from the volume coefficient.
    pub vertical_area: f64,
    pub geometry_path: PathBuf,
}

impl TailCandidate {
    pub fn name(&self) -> String {
        self.id.to_string()
    }

    fn file_name(&self) -> String {
        format!("{}-{:.2}Sh-{:.2}Lt.avl", self.id, self.area, self.arm)
    }

    fn sections(&self, variant: TailVariant, aerofoil: &str) -> [Section; 2] {
        let root_z = match variant {
            TailVariant::Conventional => 0.0,
            TailVariant::InvertedVee => self.tip_height,
        };
        [
            Section {
                x_le: self.position,
                y_le: 0.0,
                z_le: root_z,
                chord: self.chord,
                n_span: SPANWISE_VORTICES,
                s_space: ROOT_SPACING,
                aerofoil: aerofoil.to_string(),
            },
            Section {
                x_le: self.position,
                y_le: self.span / 2.0,
                z_le: 0.0,
                chord: self.chord,
                n_span: SPANWISE_VORTICES,
                s_space: TIP_SPACING,
                aerofoil: aerofoil.to_string(),
            },
        ]
    }
}

pub struct ConfigurationGenerator<'a> {
    template: &'a GeometryTemplate,
    tail: &'a TailGrid,
}

impl<'a> ConfigurationGenerator<'a> {
    pub fn new(template: &'a GeometryTemplate, tail: &'a TailGrid) -> Self {
        Self { template, tail }
    }

    /// Sizes every grid point without writing anything. Fails on the first
    /// candidate whose moment arm is not strictly positive.
    pub fn plan(&self, workspace: &Workspace) -> Result<Vec<TailCandidate>, ConfigError> {
        self.tail.validate()?;
        let reference = self.template.reference();
        let stations = self.tail.stations();

        let mut candidates = Vec::with_capacity(self.tail.steps * self.tail.steps);
        for area in self.tail.areas() {
            for &station in &stations {
                let id = candidates.len();
                let mut candidate = size_tail(reference, self.tail, id, area, station)?;
                candidate.geometry_path = workspace.geometry_dir().join(candidate.file_name());
                candidates.push(candidate);
            }
        }
        Ok(candidates)
    }

    /// Plans the grid, then writes one geometry file per candidate.
    pub fn generate(&self, workspace: &Workspace) -> Result<Vec<TailCandidate>> {
        if !self.template.has_marker() {
            return Err(TemplateError::Format("template has no splice marker".into()).into());
        }
        let candidates = self.plan(workspace)?;

        for candidate in &candidates {
            let [root, tip] = candidate.sections(self.tail.variant, &self.tail.aerofoil);
            let text = self.template.render(&format!("{root}{tip}"));
            fs::write(&candidate.geometry_path, text).map_err(|e| {
                TailError::io(
                    format!("failed to write {}", candidate.geometry_path.display()),
                    e,
                )
            })?;
        }

        info!("{} tail geometries generated", candidates.len());
        Ok(candidates)
    }
}

/// Derives the full tail geometry for one (area, station) pair.
pub fn size_tail(
    reference: &ReferenceAirframe,
    tail: &TailGrid,
    id: usize,
    area: f64,
    station: f64,
) -> Result<TailCandidate, ConfigError> {
    let (chord, span) = tail.planform(reference, area);
    let (position, arm) = match tail.axis {
        TailAxis::Position => (station, tail.arm_at(reference, area, station)),
        TailAxis::Arm => (tail.position_at(reference, area, station), station),
    };
    if !(arm > 0.0) {
        return Err(ConfigError::NonPositiveMomentArm {
            candidate: id,
            area,
            arm,
        });
    }

    let vertical_area =
        tail.vertical_volume_coefficient * reference.area * reference.span / arm;
    let (tip_height, dihedral_deg) = match tail.variant {
        TailVariant::Conventional => (0.0, 0.0),
        TailVariant::InvertedVee => {
            let tip_height = vertical_area / (2.0 * chord);
            (tip_height, (tip_height / (span / 2.0)).atan().to_degrees())
        }
    };

    Ok(TailCandidate {
        id,
        area,
        position,
        arm,
        span,
        chord,
        aspect_ratio: span / chord,
        dihedral_deg,
        tip_height,
        vertical_area,
        geometry_path: PathBuf::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DEFAULT_WING;
    use crate::test_support::{tail_grid, SAMPLE_GEOMETRY};
    use approx::assert_relative_eq;

    fn template() -> GeometryTemplate {
        let mut t = GeometryTemplate::parse(SAMPLE_GEOMETRY, DEFAULT_WING).unwrap();
        t.remove_section("Elevator").unwrap();
        t.remove_surface("Fin").unwrap();
        t
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(1.0, 2.0, 3), vec![1.0, 1.5, 2.0]);
        assert_eq!(linspace(4.0, 9.0, 1), vec![4.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_variant_and_axis_parse() {
        assert_eq!("conventional".parse::<TailVariant>(), Ok(TailVariant::Conventional));
        assert_eq!("inverted-vee".parse::<TailVariant>(), Ok(TailVariant::InvertedVee));
        assert!(matches!(
            "canard".parse::<TailVariant>(),
            Err(ConfigError::UnknownVariant(_))
        ));
        assert_eq!("arm".parse::<TailAxis>(), Ok(TailAxis::Arm));
        assert!("x".parse::<TailAxis>().is_err());
    }

    #[test]
    fn test_grid_is_cartesian_product() {
        let t = template();
        let tail = tail_grid(TailAxis::Arm, 7);
        let ws = Workspace::at("unused");
        let candidates = ConfigurationGenerator::new(&t, &tail).plan(&ws).unwrap();
        assert_eq!(candidates.len(), 49);

        let areas = linspace(1.0, 2.0, 7);
        let arms = linspace(2.0, 4.0, 7);
        for (k, c) in candidates.iter().enumerate() {
            assert_eq!(c.id, k);
            assert_relative_eq!(c.area, areas[k / 7]);
            assert_relative_eq!(c.arm, arms[k % 7], epsilon = 1e-12);
            assert!(c.arm > 0.0);
        }
    }

    #[test]
    fn test_position_axis_derives_arm() {
        let t = template();
        let reference = *t.reference();
        let tail = tail_grid(TailAxis::Position, 3);
        let c = size_tail(&reference, &tail, 0, 1.5, 2.5).unwrap();

        let ar = 8.0 * 2.0 / 3.0;
        assert_relative_eq!(c.chord, (1.5f64 / ar).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(c.span, (1.5f64 * ar).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(c.arm, 2.5 + 0.25 * c.chord - 0.175, epsilon = 1e-12);
        assert_relative_eq!(c.aspect_ratio, ar, epsilon = 1e-12);
        assert_relative_eq!(c.vertical_area, 0.06 * 0.5 * 2.0 / c.arm, epsilon = 1e-12);
        assert_eq!(c.dihedral_deg, 0.0);
    }

    #[test]
    fn test_position_depends_on_area_at_fixed_arm() {
        let reference = *template().reference();
        let tail = tail_grid(TailAxis::Arm, 3);
        let small = size_tail(&reference, &tail, 0, 1.0, 3.0).unwrap();
        let large = size_tail(&reference, &tail, 1, 2.0, 3.0).unwrap();

        assert!(large.position < small.position);
        assert_relative_eq!(tail.position_at(&reference, 1.0, 3.0), small.position, epsilon = 1e-12);
        assert_relative_eq!(tail.position_at(&reference, 2.0, 3.0), large.position, epsilon = 1e-12);
        assert_relative_eq!(
            tail.position_at(&reference, 2.0, 3.0),
            3.0 + 0.175 - 0.25 * large.chord,
            epsilon = 1e-12
        );
        assert_relative_eq!(tail.arm_at(&reference, 2.0, large.position), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inverted_vee_with_span_override() {
        let t = template();
        let reference = *t.reference();
        let mut tail = tail_grid(TailAxis::Arm, 3);
        tail.variant = TailVariant::InvertedVee;
        tail.horizontal_span = Some(1.0);
        let c = size_tail(&reference, &tail, 0, 0.4, 2.0).unwrap();

        assert_relative_eq!(c.span, 1.0);
        assert_relative_eq!(c.chord, 0.4);
        let tip = c.vertical_area / (2.0 * 0.4);
        assert_relative_eq!(c.tip_height, tip, epsilon = 1e-12);
        assert_relative_eq!(c.dihedral_deg, (tip / 0.5).atan().to_degrees(), epsilon = 1e-12);
    }

    #[test]
    fn test_span_override_ignored_for_conventional() {
        let t = template();
        let reference = *t.reference();
        let mut tail = tail_grid(TailAxis::Arm, 3);
        tail.horizontal_span = Some(1.0);
        let c = size_tail(&reference, &tail, 0, 0.4, 2.0).unwrap();
        assert!((c.span - 1.0).abs() > 1e-3);
    }

    #[test]
    fn test_non_positive_arm_aborts_plan() {
        let t = template();
        let mut tail = tail_grid(TailAxis::Position, 3);
        tail.tail_lower = 0.01;
        let err = ConfigurationGenerator::new(&t, &tail)
            .plan(&Workspace::at("unused"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NonPositiveMomentArm { candidate: 0, .. }));
    }

    #[test]
    fn test_zero_lower_bound_rejected() {
        let mut tail = tail_grid(TailAxis::Position, 7);
        tail.tail_lower = 0.0;
        assert!(tail.validate().is_err());
        let mut tail = tail_grid(TailAxis::Position, 7);
        tail.horizontal_span = Some(0.0);
        assert!(tail.validate().is_err());
        let mut tail = tail_grid(TailAxis::Position, 7);
        tail.steps = 0;
        assert!(tail.validate().is_err());
    }

    #[test]
    fn test_generate_writes_unique_files() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::reset(tmp.path()).unwrap();
        let t = template();
        let tail = tail_grid(TailAxis::Arm, 3);
        let candidates = ConfigurationGenerator::new(&t, &tail).generate(&ws).unwrap();

        assert_eq!(candidates.len(), 9);
        let mut paths: Vec<_> = candidates.iter().map(|c| c.geometry_path.clone()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 9);

        let text = fs::read_to_string(&candidates[4].geometry_path).unwrap();
        assert!(!text.contains(crate::geometry::MARKER));
        assert_eq!(text.matches("SECTION\n").count(), 4);
        assert!(text.contains("NACA_0012H.dat"));
    }

    #[test]
    fn test_generate_requires_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::reset(tmp.path()).unwrap();
        let t = GeometryTemplate::parse(SAMPLE_GEOMETRY, DEFAULT_WING).unwrap();
        let tail = tail_grid(TailAxis::Arm, 2);
        let err = ConfigurationGenerator::new(&t, &tail).generate(&ws).unwrap_err();
        assert!(matches!(err, TailError::Template(TemplateError::Format(_))));
    }
}
