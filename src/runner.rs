//! External solver orchestration.
//!
//! The solver is an interactive console program. Each candidate gets a short
//! lived process fed a keystroke script on stdin; results come back through
//! the solver's own save-to-file command, so stdout and stderr are discarded.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::error::{Result, SolverError};
use crate::generator::TailCandidate;
use crate::workspace::Workspace;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Keystroke sequence submitted to the solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandScript(String);

impl CommandScript {
    fn load(geometry: &Path, case: &Path) -> String {
        format!("load {}\ncase {}\n", geometry.display(), case.display())
    }

    /// Operating point followed by the stability-derivative listing.
    pub fn stability(geometry: &Path, case: &Path, results: &Path) -> Self {
        let mut s = Self::load(geometry, case);
        s.push_str("oper\n x\n");
        s.push_str("st\n");
        s.push_str(&format!("{}\n", results.display()));
        Self(s)
    }

    /// Eigenmode analysis written to `results`.
    pub fn eigenmodes(geometry: &Path, case: &Path, results: &Path) -> Self {
        Self::aero(geometry, case, Some(results), None)
    }

    /// Trimmed operating point with optional eigenmode and polar outputs.
    pub fn aero(geometry: &Path, case: &Path, modes: Option<&Path>, polars: Option<&Path>) -> Self {
        let mut s = Self::load(geometry, case);
        s.push_str("oper\no\nv\n\nx\n");
        if let Some(modes) = modes {
            s.push_str("\nmode\nN\nW\n");
            s.push_str(&format!("{}\n\n", modes.display()));
        }
        if let Some(polars) = polars {
            s.push_str("oper\nx\nst\n");
            s.push_str(&format!("{}\n", polars.display()));
        }
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One solver invocation.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub candidate_id: usize,
    pub script: CommandScript,
    pub results_path: PathBuf,
}

/// Cooperative cancellation shared by every task of a batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Anything that can execute a solver job and leave its results file behind.
pub trait Solver: Sync {
    fn execute(&self, job: &AnalysisJob, cancel: &CancelToken) -> Result<(), SolverError>;
}

/// The external solver as a subprocess.
#[derive(Debug, Clone)]
pub struct SolverProcess {
    executable: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl SolverProcess {
    /// Fails if the executable does not exist.
    pub fn new(executable: impl Into<PathBuf>) -> Result<Self, SolverError> {
        let executable = executable.into();
        if !executable.is_file() {
            return Err(SolverError::MissingExecutable(executable));
        }
        Ok(Self {
            executable,
            args: Vec::new(),
            timeout: None,
        })
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn wait(&self, child: &mut Child, cancel: &CancelToken) -> Result<(), SolverError> {
        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return if status.success() {
                    Ok(())
                } else {
                    Err(SolverError::ExitStatus(status.code().unwrap_or(-1)))
                };
            }
            if cancel.is_cancelled() {
                kill(child);
                return Err(SolverError::Cancelled);
            }
            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    kill(child);
                    return Err(SolverError::Timeout(timeout.as_secs_f64()));
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl Solver for SolverProcess {
    fn execute(&self, job: &AnalysisJob, cancel: &CancelToken) -> Result<(), SolverError> {
        let mut child = Command::new(&self.executable)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // An early exit closes the pipe; the exit status tells the story.
            if let Err(e) = stdin.write_all(job.script.as_str().as_bytes()) {
                if e.kind() != ErrorKind::BrokenPipe {
                    kill(&mut child);
                    return Err(e.into());
                }
            }
        }

        self.wait(&mut child, cancel)
    }
}

/// What one solver invocation produced.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub candidate_id: usize,
    pub results_path: PathBuf,
    pub status: Result<(), SolverError>,
}

impl AnalysisOutcome {
    /// Whether the results file is worth reading. A non-zero exit may still
    /// have saved results; a killed process may have left a partial file.
    pub fn results_usable(&self) -> bool {
        matches!(self.status, Ok(()) | Err(SolverError::ExitStatus(_)))
    }
}

/// Runs solver jobs on a bounded worker pool.
pub struct AnalysisRunner<'a, S: Solver> {
    solver: &'a S,
    threads: usize,
    cancel: CancelToken,
}

impl<'a, S: Solver> AnalysisRunner<'a, S> {
    pub fn new(solver: &'a S, threads: usize) -> Self {
        Self {
            solver,
            threads: threads.max(1),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn jobs(
        candidates: &[TailCandidate],
        case_path: &Path,
        workspace: &Workspace,
    ) -> Vec<AnalysisJob> {
        candidates
            .iter()
            .map(|c| {
                let results_path = workspace.results_file(&c.name());
                AnalysisJob {
                    candidate_id: c.id,
                    script: CommandScript::stability(&c.geometry_path, case_path, &results_path),
                    results_path,
                }
            })
            .collect()
    }

    /// Returns once every job has finished or failed. Outcomes come back in
    /// job order, though jobs complete in any order.
    pub fn run(&self, jobs: &[AnalysisJob]) -> Result<Vec<AnalysisOutcome>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()?;

        info!("solver: {} runs on {} workers", jobs.len(), self.threads);
        let started = Instant::now();

        let outcomes: Vec<AnalysisOutcome> = pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let status = if self.cancel.is_cancelled() {
                        Err(SolverError::Cancelled)
                    } else {
                        self.solver.execute(job, &self.cancel)
                    };
                    match &status {
                        Ok(()) => debug!("candidate {} analysed", job.candidate_id),
                        Err(e) => warn!("candidate {}: {e}", job.candidate_id),
                    }
                    AnalysisOutcome {
                        candidate_id: job.candidate_id,
                        results_path: job.results_path.clone(),
                        status,
                    }
                })
                .collect()
        });

        let failed = outcomes.iter().filter(|o| o.status.is_err()).count();
        info!(
            "solver runs complete: {}/{} clean in {:.1}s",
            outcomes.len() - failed,
            outcomes.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(outcomes)
    }
}
