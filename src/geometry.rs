//! Reference airframe geometry in the solver's line-oriented text format.
//!
//! Comment lines start with `#` and blank lines are ignored. The fourth
//! significant line holds the reference area, mean aerodynamic chord and
//! span. Lifting surfaces are `SURFACE` blocks whose next line is the surface
//! name, each followed by one or more `SECTION` blocks. Generated tail
//! sections are spliced in at a single [`MARKER`] line.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::TemplateError;

/// Placeholder line where generated section text is substituted.
pub const MARKER: &str = "MARKER";

/// Surface name the wing root is read from unless configured otherwise.
pub const DEFAULT_WING: &str = "Main Wing";

const REFERENCE_LINE: usize = 3;

/// Reference dimensions of the loaded airframe. Immutable once loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceAirframe {
    /// Reference wing area.
    pub area: f64,
    /// Mean aerodynamic chord.
    pub mac: f64,
    /// Wing span.
    pub span: f64,
    /// Leading-edge x of the wing root section.
    pub root_le_x: f64,
    /// Chord of the wing root section.
    pub root_chord: f64,
    /// Wing aspect ratio as span over mean chord.
    pub aspect_ratio: f64,
}

impl ReferenceAirframe {
    /// Longitudinal position of the wing root quarter chord.
    pub fn quarter_chord_x(&self) -> f64 {
        self.root_le_x + 0.25 * self.root_chord
    }
}

#[derive(Debug, Clone)]
pub struct GeometryTemplate {
    lines: Vec<String>,
    reference: ReferenceAirframe,
}

impl GeometryTemplate {
    pub fn load(path: &Path, wing: &str) -> Result<Self, TemplateError> {
        let text = fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, wing)
    }

    pub fn parse(text: &str, wing: &str) -> Result<Self, TemplateError> {
        let lines: Vec<String> = text
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
            .map(|line| line.trim_end().to_string())
            .collect();

        let reference_line = lines.get(REFERENCE_LINE).ok_or_else(|| {
            TemplateError::Format(format!(
                "expected reference dimensions on significant line {}, file has {}",
                REFERENCE_LINE + 1,
                lines.len()
            ))
        })?;
        let dims = parse_numbers(reference_line, 3).ok_or_else(|| {
            TemplateError::Format(format!(
                "reference line '{reference_line}' must hold area, chord and span"
            ))
        })?;
        let (area, mac, span) = (dims[0], dims[1], dims[2]);
        if mac == 0.0 {
            return Err(TemplateError::Format("reference chord is zero".into()));
        }

        let (root_le_x, root_chord) = find_root_section(&lines, wing)?;

        Ok(Self {
            lines,
            reference: ReferenceAirframe {
                area,
                mac,
                span,
                root_le_x,
                root_chord,
                aspect_ratio: span / mac,
            },
        })
    }

    pub fn reference(&self) -> &ReferenceAirframe {
        &self.reference
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn has_marker(&self) -> bool {
        self.lines.iter().any(|l| l == MARKER)
    }

    /// Removes the `SECTION` blocks of the surface named `name`, leaving a
    /// [`MARKER`] at the next surface boundary (or at end of file when the
    /// surface is the last one). The template is unchanged on error.
    pub fn remove_section(&mut self, name: &str) -> Result<(), TemplateError> {
        let mut stripped = Vec::with_capacity(self.lines.len());
        let mut found = false;
        let mut in_surface = false;
        let mut in_section = false;

        for line in &self.lines {
            let keyword = first_token(line);
            if in_surface && keyword == Some("SURFACE") {
                stripped.push(MARKER.to_string());
                stripped.push(line.clone());
                in_surface = false;
                in_section = false;
                continue;
            }
            if line.trim() == name {
                found = true;
                in_surface = true;
            }
            if in_surface && keyword == Some("SECTION") {
                in_section = true;
            }
            if !in_section {
                stripped.push(line.clone());
            }
        }
        if in_surface {
            stripped.push(MARKER.to_string());
        }

        if !found {
            return Err(TemplateError::NotFound(name.to_string()));
        }
        self.lines = stripped;
        Ok(())
    }

    /// Removes the whole `SURFACE` block named `name`. The template is
    /// unchanged on error.
    pub fn remove_surface(&mut self, name: &str) -> Result<(), TemplateError> {
        let mut stripped = Vec::with_capacity(self.lines.len());
        let mut found = false;
        let mut skipping = false;

        for (i, line) in self.lines.iter().enumerate() {
            if first_token(line) == Some("SURFACE") {
                skipping = self
                    .lines
                    .get(i + 1)
                    .is_some_and(|next| next.trim() == name);
                found |= skipping;
            }
            if !skipping {
                stripped.push(line.clone());
            }
        }

        if !found {
            return Err(TemplateError::NotFound(name.to_string()));
        }
        self.lines = stripped;
        Ok(())
    }

    /// Appends an empty surface named `name` ending in a [`MARKER`], for
    /// references that never defined the surface being sized.
    pub fn append_surface(&mut self, name: &str) {
        let skeleton = [
            "SURFACE",
            name,
            "13 1.0",
            "INDEX",
            "937",
            "YDUPLICATE",
            "0.0",
            "SCALE",
            "1.0 1.0 1.0",
            "TRANSLATE",
            "0.0 0.0 0.0",
            MARKER,
        ];
        self.lines.extend(skeleton.iter().map(|s| s.to_string()));
    }

    /// Renders the template with every marker replaced by `splice`.
    pub fn render(&self, splice: &str) -> String {
        let mut out = String::new();
        for line in &self.lines {
            if line == MARKER {
                out.push_str(splice);
                if !splice.ends_with('\n') {
                    out.push('\n');
                }
            } else {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

fn first_token(line: &str) -> Option<&str> {
    line.split_whitespace().next()
}

fn parse_numbers(line: &str, count: usize) -> Option<Vec<f64>> {
    let values: Vec<f64> = line
        .split_whitespace()
        .take(count)
        .map(|t| t.parse::<f64>().ok())
        .collect::<Option<_>>()?;
    (values.len() == count).then_some(values)
}

fn find_root_section(lines: &[String], wing: &str) -> Result<(f64, f64), TemplateError> {
    let start = lines.iter().position(|l| l.trim() == wing).ok_or_else(|| {
        TemplateError::Format(format!(
            "wing surface not found; the wing should be defined by SURFACE / {wing}"
        ))
    })?;
    let section = lines[start..]
        .iter()
        .position(|l| first_token(l) == Some("SECTION"))
        .map(|offset| start + offset)
        .ok_or_else(|| TemplateError::Format(format!("surface '{wing}' has no SECTION")))?;
    let row = lines
        .get(section + 1)
        .ok_or_else(|| TemplateError::Format(format!("surface '{wing}' section row missing")))?;
    let values = parse_numbers(row, 4).ok_or_else(|| {
        TemplateError::Format(format!("wing root section row '{row}' is malformed"))
    })?;
    Ok((values[0], values[3]))
}

/// One `SECTION` block of a generated surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub x_le: f64,
    pub y_le: f64,
    pub z_le: f64,
    pub chord: f64,
    pub n_span: u32,
    pub s_space: f64,
    pub aerofoil: String,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SECTION")?;
        writeln!(f, "#Xle Yle Zle Chord Ainc Nspan Sspace")?;
        writeln!(
            f,
            "{} {} {} {} 0 {} {}",
            self.x_le, self.y_le, self.z_le, self.chord, self.n_span, self.s_space
        )?;
        writeln!(f, "AFIL 0.0 1.0")?;
        writeln!(f, "{}", self.aerofoil)
    }
}
