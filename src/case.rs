use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, TailError};
use crate::workspace::Workspace;

/// Flight and mass condition shared by every candidate of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisCase {
    /// Centre of gravity; `None` when the run searches for it.
    pub cg: Option<[f64; 3]>,
    pub mass: f64,
    pub inertia: Option<[f64; 3]>,
    pub velocity: Option<f64>,
    pub density: Option<f64>,
    pub alpha: Option<f64>,
    /// Gravitational acceleration, m/s^2.
    pub gravity: Option<f64>,
}

impl AnalysisCase {
    pub fn stability(cg: Option<[f64; 3]>, mass: f64) -> Self {
        Self {
            cg,
            mass,
            inertia: None,
            velocity: None,
            density: None,
            alpha: None,
            gravity: None,
        }
    }

    pub fn cg_x(&self) -> Option<f64> {
        self.cg.map(|cg| cg[0])
    }

    /// Case file text. Unknown CG is written as the origin; the neutral
    /// point does not depend on it.
    pub fn render(&self) -> String {
        let [x, y, z] = self.cg.unwrap_or([0.0; 3]);
        let mut s = String::from("\n---------------------------------------------\n");
        s.push_str("Run case  1:\n\n");
        if let Some(alpha) = self.alpha {
            let _ = writeln!(s, "alpha -> alpha = {alpha}");
        }
        let _ = writeln!(s, "X_cg={x} Lunit");
        let _ = writeln!(s, "Y_cg={y} Lunit");
        let _ = writeln!(s, "Z_cg={z} Lunit");
        let _ = writeln!(s, "mass={} kg", self.mass);
        if let Some([ixx, iyy, izz]) = self.inertia {
            let _ = writeln!(s, "Ixx={ixx} kg-m^2");
            let _ = writeln!(s, "Iyy={iyy} kg-m^2");
            let _ = writeln!(s, "Izz={izz} kg-m^2");
        }
        if let Some(v) = self.velocity {
            let _ = writeln!(s, "velocity={v} m/s");
        }
        if let Some(rho) = self.density {
            let _ = writeln!(s, "density={rho} kg-m^3");
        }
        if let Some(g) = self.gravity {
            let _ = writeln!(s, "grav.acc.={g} m/s^2");
        }
        s
    }

    fn file_name(&self) -> String {
        match self.alpha {
            Some(alpha) => format!("{alpha}deg.case"),
            None => "tail.case".to_string(),
        }
    }

    /// Writes the case file once into the workspace's case directory.
    pub fn write(&self, workspace: &Workspace) -> Result<PathBuf> {
        let path = workspace.cases_dir().join(self.file_name());
        write_text(&path, &self.render())?;
        Ok(path)
    }
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text)
        .map_err(|e| TailError::io(format!("failed to write {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stability_case_text() {
        let case = AnalysisCase::stability(Some([0.52, 0.0, 0.01]), 10.0);
        let text = case.render();
        assert!(text.starts_with("\n-----"));
        assert!(text.contains("Run case  1:\n\n"));
        assert!(text.contains("X_cg=0.52 Lunit\n"));
        assert!(text.contains("Z_cg=0.01 Lunit\n"));
        assert!(text.contains("mass=10 kg\n"));
        assert!(!text.contains("alpha"));
        assert!(!text.contains("Ixx"));
        assert!(!text.contains("grav.acc."));
    }

    #[test]
    fn test_unknown_cg_written_at_origin() {
        let case = AnalysisCase::stability(None, 4.5);
        assert_eq!(case.cg_x(), None);
        assert!(case.render().contains("X_cg=0 Lunit\n"));
    }

    #[test]
    fn test_aero_case_lines() {
        let case = AnalysisCase {
            cg: Some([0.3, 0.0, 0.0]),
            mass: 2.0,
            inertia: Some([0.1, 0.2, 0.3]),
            velocity: Some(15.0),
            density: Some(1.225),
            alpha: Some(4.0),
            gravity: Some(9.81),
        };
        let text = case.render();
        assert!(text.contains("alpha -> alpha = 4\n"));
        assert!(text.contains("Iyy=0.2 kg-m^2\n"));
        assert!(text.contains("velocity=15 m/s\n"));
        assert!(text.contains("density=1.225 kg-m^3\n"));
        assert!(text.ends_with("grav.acc.=9.81 m/s^2\n"));
        assert_eq!(case.file_name(), "4deg.case");
    }

    #[test]
    fn test_write_into_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::reset(tmp.path()).unwrap();
        let path = AnalysisCase::stability(Some([1.0, 0.0, 0.0]), 1.0)
            .write(&ws)
            .unwrap();
        assert_eq!(path, ws.cases_dir().join("tail.case"));
        assert!(fs::read_to_string(path).unwrap().contains("X_cg=1 Lunit"));
    }
}
