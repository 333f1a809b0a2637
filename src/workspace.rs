use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TailError};

/// The three working directories shared by one sizing run.
///
/// Generated geometries, case files and raw solver results each get their
/// own directory. Every candidate writes its own files, so no locking is
/// needed beyond per-file write atomicity.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    geometry: PathBuf,
    cases: PathBuf,
    results: PathBuf,
}

impl Workspace {
    pub const GEOMETRY_DIR: &'static str = "generated_planes";
    pub const CASES_DIR: &'static str = "cases";
    pub const RESULTS_DIR: &'static str = "results";

    /// Layout under `root` without touching the filesystem.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            geometry: root.join(Self::GEOMETRY_DIR),
            cases: root.join(Self::CASES_DIR),
            results: root.join(Self::RESULTS_DIR),
            root,
        }
    }

    /// Deletes and recreates all three directories under `root`.
    pub fn reset(root: impl Into<PathBuf>) -> Result<Self> {
        let ws = Self::at(root);
        for dir in ws.dirs() {
            if dir.is_dir() {
                fs::remove_dir_all(dir).map_err(|e| {
                    TailError::io(
                        format!("failed to clear {} (close any open result files)", dir.display()),
                        e,
                    )
                })?;
            }
            fs::create_dir_all(dir)
                .map_err(|e| TailError::io(format!("failed to create {}", dir.display()), e))?;
        }
        Ok(ws)
    }

    fn dirs(&self) -> [&Path; 3] {
        [&self.geometry, &self.cases, &self.results]
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn geometry_dir(&self) -> &Path {
        &self.geometry
    }

    pub fn cases_dir(&self) -> &Path {
        &self.cases
    }

    pub fn results_dir(&self) -> &Path {
        &self.results
    }

    pub fn results_file(&self, name: &str) -> PathBuf {
        self.results.join(format!("{name}.txt"))
    }
}
