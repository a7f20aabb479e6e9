//! gradebox - sandboxed grading CLI
//!
//! ## Commands
//!
//! - `check-rubric`: validate a rubric TOML file and print its digest
//! - `compile`: compile unit-assembly files, optionally instrumented
//! - `grade`: grade a submission directory against a rubric
//! - `config`: print the effective grader configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, Level};

use gradebox_core::instrument::rewrite;
use gradebox_core::{
    compile_unit, list_criteria, GraderConfig, GradingService, MemoryRubricStore, MemoryRunStore,
    Orchestrator, ReportLookup, RubricDraft, RubricEngine, ScoreReport,
};

/// Source file extension for submission units.
const UNIT_EXTENSION: &str = "unit";

#[derive(Parser)]
#[command(name = "gradebox")]
#[command(version = gradebox_core::VERSION)]
#[command(about = "Sandboxed grading pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Grader configuration file (TOML)
    #[arg(long, global = true, env = "GRADEBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Inject checkpoint hooks (overrides the config file)
    #[arg(long, global = true, env = "GRADEBOX_TIMEOUT_ENFORCEMENT")]
    timeout_enforcement: Option<bool>,

    /// Concurrent sandbox processes
    #[arg(long, global = true, env = "GRADEBOX_POOL_SLOTS")]
    pool_slots: Option<usize>,

    /// Path to the gradebox-sandbox binary
    #[arg(long, global = true, env = "GRADEBOX_SANDBOX_PROGRAM")]
    sandbox_program: Option<PathBuf>,

    /// Extra milliseconds before the hard watchdog kills a sandbox
    #[arg(long, global = true, env = "GRADEBOX_WATCHDOG_GRACE_MS")]
    watchdog_grace_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a rubric and print its digest
    CheckRubric {
        /// Rubric TOML file
        rubric: PathBuf,
    },

    /// Compile unit-assembly files and report their shape
    Compile {
        /// Unit files; the unit name is the file stem
        #[arg(required = true)]
        units: Vec<PathBuf>,

        /// Apply checkpoint instrumentation
        #[arg(long)]
        instrument: bool,

        /// Print the IR as JSON
        #[arg(long)]
        emit_ir: bool,
    },

    /// Grade a submission directory against a rubric
    Grade {
        /// Rubric TOML file
        #[arg(long)]
        rubric: PathBuf,

        /// Directory of `.unit` files
        submission: PathBuf,

        /// Submission owner
        #[arg(long, default_value = "local")]
        owner: String,

        /// Report format
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    gradebox_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::CheckRubric { rubric } => cmd_check_rubric(&rubric),
        Commands::Compile {
            units,
            instrument,
            emit_ir,
        } => cmd_compile(&units, instrument, emit_ir),
        Commands::Grade {
            rubric,
            submission,
            owner,
            format,
        } => cmd_grade(config, &rubric, &submission, &owner, format).await,
        Commands::Config => cmd_config(&config),
    }
}

/// File values, then environment and flags on top.
fn load_config(cli: &Cli) -> Result<GraderConfig> {
    let mut config = match &cli.config {
        Some(path) => GraderConfig::load(path)?,
        None => GraderConfig::default(),
    };
    if let Some(enabled) = cli.timeout_enforcement {
        config.timeout_enforcement = enabled;
    }
    if let Some(slots) = cli.pool_slots {
        config.pool_slots = slots;
    }
    if let Some(program) = &cli.sandbox_program {
        config.sandbox_program = Some(program.clone());
    }
    if let Some(grace) = cli.watchdog_grace_ms {
        config.watchdog_grace_ms = grace;
    }
    config.validate()?;
    Ok(config)
}

fn read_draft(path: &Path) -> Result<RubricDraft> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rubric {}", path.display()))?;
    Ok(RubricDraft::from_toml_str(&text)?)
}

fn unit_name(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

fn cmd_check_rubric(path: &Path) -> Result<()> {
    let rubric = read_draft(path)?.seal()?;
    println!(
        "{} v{} ok ({} criteria, {} enabled, weight {})",
        rubric.assignment_id(),
        rubric.version(),
        rubric.criteria().len(),
        list_criteria(&rubric).len(),
        rubric.enabled_weight()
    );
    println!("digest {}", rubric.digest());
    Ok(())
}

fn cmd_compile(paths: &[PathBuf], instrument: bool, emit_ir: bool) -> Result<()> {
    let mut failed = 0usize;
    for path in paths {
        let name = unit_name(path)?;
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let unit = match compile_unit(&name, &source) {
            Ok(unit) => unit,
            Err(e) => {
                eprintln!("{e}");
                failed += 1;
                continue;
            }
        };
        let unit = if instrument { rewrite(&unit)? } else { unit };

        if emit_ir {
            println!("{}", serde_json::to_string_pretty(&unit)?);
        } else {
            println!(
                "{name}: {} functions, {} instructions, {} checkpoints",
                unit.functions.len(),
                unit.instruction_count(),
                unit.checkpoint_count()
            );
        }
    }
    if failed > 0 {
        bail!("{failed} unit(s) failed to compile");
    }
    Ok(())
}

fn read_submission(dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut units = BTreeMap::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(UNIT_EXTENSION) {
            continue;
        }
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        units.insert(unit_name(&path)?, source);
    }
    if units.is_empty() {
        bail!("no .{UNIT_EXTENSION} files in {}", dir.display());
    }
    debug!(units = units.len(), "submission loaded");
    Ok(units)
}

async fn cmd_grade(
    config: GraderConfig,
    rubric_path: &Path,
    submission: &Path,
    owner: &str,
    format: Format,
) -> Result<()> {
    let draft = read_draft(rubric_path)?;
    let units = read_submission(submission)?;

    let orchestrator = Orchestrator::from_config(&config)?;
    let service = GradingService::new(
        orchestrator,
        RubricEngine::new(Arc::new(MemoryRubricStore::new())),
        Arc::new(MemoryRunStore::new()),
    );
    let rubric = service.rubrics().publish(draft).await?;

    let run_id = service.submit(owner, rubric.assignment_id(), units).await?;
    service.wait(&run_id).await?;

    match service.get_score_report(&run_id).await? {
        ReportLookup::Ready(report) => match format {
            Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            Format::Text => print_report(&report),
        },
        ReportLookup::Failed { reason } => bail!("run {run_id} failed: {reason}"),
        ReportLookup::Cancelled => bail!("run {run_id} was cancelled"),
        ReportLookup::Pending | ReportLookup::NotFound => {
            bail!("run {run_id} finished without a report")
        }
    }
    Ok(())
}

fn print_report(report: &ScoreReport) {
    println!(
        "{} v{} run {}",
        report.assignment_id, report.rubric_version, report.run_id
    );
    if let Some(failure) = &report.failure {
        println!("FAILED: {failure}");
    }
    for row in &report.breakdown {
        let reason = row.reason.map(|r| format!(" ({r})")).unwrap_or_default();
        println!(
            "  {:<20} {:<8}{reason:<22} {:>6.2}/{:<6.2} {:>6}ms",
            row.criterion_id,
            row.result.to_string(),
            row.earned,
            row.weight,
            row.elapsed_ms
        );
        if !row.diagnostic.is_empty() {
            println!("      {}", row.diagnostic.replace('\n', "\n      "));
        }
    }
    println!(
        "score {:.1}% ({:.2}/{:.2})",
        report.total_score * 100.0,
        report.earned_weight,
        report.total_weight
    );
}

fn cmd_config(config: &GraderConfig) -> Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
