//! stageopt CLI: validate, explain, and run YAML stage plans.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use stageopt_exec::{Engine, RunOutcome};
use stageopt_planner::explain::render;
use stageopt_planner::{
    annotate_output_files, optimize, parse_yaml_stage_plan, validate_graph, OptimizationReport,
    ParsedStagePlan,
};

#[derive(Parser)]
#[command(name = "stageopt")]
#[command(about = "Stage-plan optimizer: accumulative mode and fragment-replicate join repair", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a stage plan for structural errors
    Validate {
        /// Path to the stage plan YAML file
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Optimize a stage plan and print the result (EXPLAIN)
    Explain {
        /// Path to the stage plan YAML file
        #[arg(short, long)]
        plan: PathBuf,

        /// Print the optimized graph and report as JSON
        #[arg(long)]
        json: bool,

        /// Override a config property (key=value); may be repeated
        #[arg(long = "set", value_name = "KEY=VALUE")]
        sets: Vec<String>,
    },

    /// Optimize and execute a stage plan against its inline datasets
    Run {
        /// Path to the stage plan YAML file
        #[arg(short, long)]
        plan: PathBuf,

        /// Override a config property (key=value); may be repeated
        #[arg(long = "set", value_name = "KEY=VALUE")]
        sets: Vec<String>,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { plan } => match validate_plan(&plan) {
            Ok(stages) => println!("✓ Stage plan is valid ({stages} stages)"),
            Err(e) => {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Explain { plan, json, sets } => {
            if let Err(e) = explain_plan(&plan, json, &sets) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Run { plan, sets } => {
            if let Err(e) = run_plan(&plan, &sets) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn load(path: &Path, sets: &[String]) -> CliResult<ParsedStagePlan> {
    let yaml_content = fs::read_to_string(path)?;
    let mut parsed = parse_yaml_stage_plan(&yaml_content)?;
    apply_overrides(&mut parsed, sets)?;
    Ok(parsed)
}

/// `key=value` pairs from `--set`, applied over the plan's own `config:`.
fn apply_overrides(parsed: &mut ParsedStagePlan, sets: &[String]) -> CliResult<()> {
    for set in sets {
        let (key, value) = set
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got `{set}`"))?;
        parsed.set_property(key.trim(), value.trim());
    }
    Ok(())
}

fn validate_plan(path: &Path) -> CliResult<usize> {
    let parsed = load(path, &[])?;
    Ok(validate_graph(&parsed.graph)?)
}

fn optimize_parsed(parsed: &mut ParsedStagePlan) -> CliResult<OptimizationReport> {
    let config = parsed.config();
    let catalog = parsed.file_catalog();
    annotate_output_files(&mut parsed.graph, &catalog, &config)?;
    Ok(optimize(&mut parsed.graph, &config)?)
}

fn explain_plan(path: &Path, json: bool, sets: &[String]) -> CliResult<()> {
    let mut parsed = load(path, sets)?;
    let report = optimize_parsed(&mut parsed)?;
    if json {
        let doc = serde_json::json!({
            "config": parsed.config(),
            "graph": parsed.graph,
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print!("{}", render(&parsed.graph, Some(&report)));
    }
    Ok(())
}

fn execute(parsed: ParsedStagePlan) -> CliResult<RunOutcome> {
    let engine = Engine::new(parsed.config());
    for (name, files) in parsed.datasets {
        engine.store().put_dataset(&name, files)?;
    }
    let (_, report, outcome) = engine.optimize_and_run(parsed.graph)?;
    tracing::info!(
        inserted = report.inserted_stages().len(),
        accumulative = report.accumulative_stages().len(),
        "plan optimized"
    );
    Ok(outcome)
}

fn run_plan(path: &Path, sets: &[String]) -> CliResult<()> {
    let outcome = execute(load(path, sets)?)?;

    println!("✓ Stage plan executed successfully");
    println!("  Jobs: {}", outcome.job_graph.len());
    for job in outcome.job_graph.jobs() {
        println!(
            "    {} ({}, {:?}): {} map, {} reduce, {} file(s)",
            job.id,
            job.stage,
            job.kind,
            job.stats.map_tasks,
            job.stats.reduce_tasks,
            job.stats.output_files
        );
    }
    for (target, rows) in &outcome.outputs {
        println!("  {target}: {} row(s)", rows.len());
    }
    println!("  Duration: {}ms", outcome.manifest.duration_ms());
    println!("  Plan hash: {}", outcome.manifest.plan_hash);
    Ok(())
}
