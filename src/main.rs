use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tailsize::aero::{AeroReport, AeroSweep};
use tailsize::config::Root;
use tailsize::report;
use tailsize::runner::SolverProcess;
use tailsize::sizing::{self, Manifest, Sizing, SizingReport};

#[derive(Parser, Debug)]
#[command(name = "tailsize")]
#[command(version)]
#[command(about = "Parametric tail sizing against a target static margin")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output directory for reports
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate, analyse, fit and report
    Run,
    /// Write candidate geometries only
    Generate,
    /// Sweep angle of attack for polars and eigenmodes
    Aero,
    /// Validate a configuration file
    Validate,
    /// Print version information
    Version,
}

fn load(cfg_path: &Path) -> Result<(Root, String)> {
    let cfg_text = fs::read_to_string(cfg_path)
        .with_context(|| format!("failed to read config: {}", cfg_path.display()))?;
    let cfg = Root::parse(&cfg_text, cfg_path)?;
    cfg.validate()
        .with_context(|| format!("invalid config: {}", cfg_path.display()))?;
    Ok((cfg, cfg_text))
}

fn run(cfg: &Root, cfg_text: &str, out_dir: &Path) -> Result<()> {
    let solver = solver(cfg)?;
    let start = Instant::now();
    let report = Sizing::new(cfg, &solver).run()?;
    let wall_time_s = start.elapsed().as_secs_f64();

    let written = report.write_outputs(out_dir, &Manifest::new(cfg, cfg_text))?;
    print_summary(&report, wall_time_s);
    for path in written {
        eprintln!("[tailsize] wrote {}", path.display());
    }
    Ok(())
}

fn solver(cfg: &Root) -> Result<SolverProcess> {
    Ok(SolverProcess::new(&cfg.solver.executable)?
        .with_args(cfg.solver.args.iter().cloned())
        .with_timeout(cfg.timeout()?))
}

fn aero(cfg: &Root, cfg_text: &str, out_dir: &Path) -> Result<()> {
    let solver = solver(cfg)?;
    let start = Instant::now();
    let report = AeroSweep::new(cfg, &solver).run()?;
    let wall_time_s = start.elapsed().as_secs_f64();

    let written = report.write_outputs(out_dir, &Manifest::new(cfg, cfg_text))?;
    print_aero_summary(&report, wall_time_s);
    for path in written {
        eprintln!("[tailsize] wrote {}", path.display());
    }
    Ok(())
}

fn print_aero_summary(report: &AeroReport, wall_time_s: f64) {
    eprintln!(
        "[tailsize] aero sweep complete: {} angles, {} failed runs in {:.1}s",
        report.points.len(),
        report.failures.len(),
        wall_time_s
    );
    for failure in &report.failures {
        eprintln!(
            "  alpha {:>6} {:?} ({:?}): {}",
            failure.alpha, failure.analysis, failure.stage, failure.message
        );
    }
    eprintln!();
    eprintln!("  {:>7} | {:>8} | {:>8} | {:>8}", "alpha", "CL", "CD", "spiral");
    eprintln!("  {}", "-".repeat(42));
    for point in &report.points {
        let Some(p) = &point.polar else { continue };
        let spiral = p.spiral.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".into());
        eprintln!(
            "  {:>7} | {:>8.4} | {:>8.4} | {:>8}",
            point.alpha, p.cl, p.cd, spiral
        );
    }
}

fn print_summary(report: &SizingReport, wall_time_s: f64) {
    let total = report.candidates.len();
    eprintln!(
        "[tailsize] analysis complete: {}/{} usable ({:.1}%) in {:.1}s",
        report.usable(),
        total,
        100.0 * report.usable() as f64 / total.max(1) as f64,
        wall_time_s
    );
    for failure in &report.failures {
        eprintln!(
            "  candidate {:>4} ({:?}): {}",
            failure.candidate_id, failure.stage, failure.message
        );
    }
    if let Some(np) = report.required_neutral_point() {
        eprintln!(
            "[tailsize] neutral point required for SM {}: {:.4}",
            report.target, np
        );
    }
    if let Some(fit) = &report.fit {
        let m = fit.model();
        let (lo, hi) = fit.margin_range();
        eprintln!(
            "  fit: SM = {:.4e} * Sh^{:.4} * Lt^{:.4} + {:.4}, sampled SM [{:.4}, {:.4}]",
            m.a, m.b, m.c, m.d, lo, hi
        );
    }
    if report.is_unstable() {
        eprintln!("[tailsize] WARNING: no stable configurations; consider changing limits");
    }
    if let Some(e) = &report.fit_error {
        eprintln!("[tailsize] WARNING: {e}");
    }

    if report.table.is_empty() {
        eprintln!("[tailsize] no candidates within tolerance");
        return;
    }
    eprintln!();
    eprintln!("  {}", report.table.columns.join(" | "));
    eprintln!("  {}", "-".repeat(70));
    for row in &report.table.rows {
        let values: Vec<String> = row.values.iter().map(|v| format!("{v:.2}")).collect();
        eprintln!("  {:>4} | {}", row.candidate_id, values.join(" | "));
    }
}

fn generate(cfg: &Root, out_dir: &Path) -> Result<()> {
    let generated = sizing::generate(cfg)?;
    let candidates = &generated.candidates;
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let grid_path = out_dir.join("grid.csv");
    report::write_grid(&grid_path, candidates, &[], &[])?;

    eprintln!(
        "[tailsize] {} geometries in {}",
        candidates.len(),
        generated.workspace.geometry_dir().display()
    );
    eprintln!("[tailsize] wrote {}", grid_path.display());
    Ok(())
}

fn validate_config(cfg_path: &Path) -> Result<()> {
    let (cfg, _) = load(cfg_path)?;
    let tail = cfg.tail_grid()?;

    eprintln!("[tailsize] config valid: {}", cfg_path.display());
    eprintln!("  project: {} (workdir {})", cfg.project.name, cfg.project.workdir.display());
    eprintln!(
        "  solver: {} threads={} timeout={}",
        cfg.solver.executable.display(),
        cfg.solver.threads,
        cfg.solver
            .timeout_s
            .map(|t| format!("{t}s"))
            .unwrap_or_else(|| "none".to_string())
    );
    eprintln!(
        "  tail: {} {:?}=[{},{}] area=[{},{}] steps={} ({} candidates)",
        tail.variant,
        tail.axis,
        tail.tail_lower,
        tail.tail_upper,
        tail.area_lower,
        tail.area_upper,
        tail.steps,
        tail.steps * tail.steps
    );
    if let Some(aero) = &cfg.aero {
        eprintln!(
            "  aero: alpha=[{},{}] step={} ({} angles) polars={} modes={}",
            aero.alpha_start,
            aero.alpha_end,
            aero.increment,
            aero.alphas().len(),
            aero.polars,
            aero.modes
        );
    }
    match cfg.case.cg {
        Some(cg) => eprintln!(
            "  target: SM={} ±{} at cg={:?}",
            cfg.target.static_margin, cfg.target.tolerance, cg
        ),
        None => eprintln!(
            "  target: SM={} (cg search)",
            cfg.target.static_margin
        ),
    }
    Ok(())
}

fn print_version() {
    eprintln!("tailsize {}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("  Platform:          {}", std::env::consts::OS);
    eprintln!("  Architecture:      {}", std::env::consts::ARCH);
    eprintln!();
    eprintln!("Tail variants:");
    eprintln!("  - conventional:  horizontal stabiliser, fin sized by volume coefficient");
    eprintln!("  - inverted-vee:  single vee surface, angle from the vertical area");
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            print_version();
            Ok(())
        }
        Commands::Validate => {
            let cfg_path = args.config.context("--config required for validate")?;
            validate_config(&cfg_path)
        }
        Commands::Generate => {
            let cfg_path = args.config.context("--config required")?;
            let out_dir = args.out.unwrap_or_else(|| PathBuf::from("out"));
            let (cfg, _) = load(&cfg_path)?;
            eprintln!("[tailsize] {} - geometry generation", cfg.project.name);
            generate(&cfg, &out_dir)
        }
        Commands::Aero => {
            let cfg_path = args.config.context("--config required")?;
            let out_dir = args.out.unwrap_or_else(|| PathBuf::from("out"));
            let (cfg, cfg_text) = load(&cfg_path)?;
            eprintln!("[tailsize] {} - aero sweep", cfg.project.name);
            aero(&cfg, &cfg_text, &out_dir)
        }
        Commands::Run => {
            let cfg_path = args.config.context("--config required")?;
            let out_dir = args.out.unwrap_or_else(|| PathBuf::from("out"));
            let (cfg, cfg_text) = load(&cfg_path)?;
            eprintln!("[tailsize] {} - tail sizing", cfg.project.name);
            run(&cfg, &cfg_text, &out_dir)
        }
    }
}
