//! # Daily Income Configuration Validator
//!
//! Command-line tool for validating engine configuration before a run. Prints the
//! executor sizing and batch staircase the configuration resolves to.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use daily_income_engine::config::{ConfigManager, EngineConfig};
use daily_income_engine::execution::{BatchPlan, ExecutorSettings};

/// Reference volumes shown when no totals are given
const SAMPLE_TOTALS: [usize; 6] = [50, 1_000, 12_345, 20_000, 60_000, 150_000];

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate daily income engine configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Validate a single file instead of a directory
    #[arg(short, long, conflicts_with = "config_dir")]
    file: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate and print the resolved executor settings and batch staircase
    All,

    /// Show the chunk plan for specific pending row counts
    Staircase {
        /// Pending row counts
        totals: Vec<usize>,
    },

    /// List environment override files
    Environments,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all_config(&cli),
        Some(Commands::Staircase { totals }) => show_staircase(&cli, totals),
        Some(Commands::Environments) => list_environments(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    if let Some(file) = &cli.file {
        return ConfigManager::load_file(file)
            .with_context(|| format!("failed to load {}", file.display()));
    }

    let manager =
        ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
            .with_context(|| format!("failed to load environment '{}'", cli.environment))?;
    Ok(manager.config().clone())
}

fn validate_all_config(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let calculation = config.calculation_executor_settings();
    let summary = config.summary_executor_settings();
    let plans: Vec<BatchPlan> = SAMPLE_TOTALS
        .iter()
        .map(|&total| BatchPlan::for_total(total, &config.batch))
        .collect();

    if cli.format == OutputFormat::Json {
        let output = serde_json::json!({
            "environment": cli.environment,
            "shard_count": config.sharding.shard_count,
            "calculation_executor": calculation,
            "summary_executor": summary,
            "pipeline": config.pipeline,
            "batch_staircase": plans,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("🔧 Validating Daily Income Configuration");
    println!("Environment: {}", cli.environment);
    println!("✅ Configuration loaded and validated");
    println!();
    println!("🧩 Sharding: {} shards", config.sharding.shard_count);
    print_executor("🧮 Calculation executor", &calculation);
    print_executor("📥 Summary executor", &summary);
    println!(
        "⏱️  Timeouts: pipeline {}s, shard transaction {}s, summary {}s",
        config.pipeline.pipeline_timeout_seconds,
        config.pipeline.per_shard_transaction_timeout_seconds,
        config.pipeline.summary_timeout_seconds
    );
    println!(
        "🛑 Abort threshold: more than {} failed shards",
        config.pipeline.failure_abort_threshold
    );
    println!();
    print_plans(&plans);
    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn show_staircase(cli: &Cli, totals: &[usize]) -> Result<()> {
    let config = load_config(cli)?;
    let totals = if totals.is_empty() {
        SAMPLE_TOTALS.to_vec()
    } else {
        totals.to_vec()
    };
    let plans: Vec<BatchPlan> = totals
        .iter()
        .map(|&total| BatchPlan::for_total(total, &config.batch))
        .collect();

    if cli.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
    } else {
        print_plans(&plans);
    }
    Ok(())
}

fn list_environments(cli: &Cli) -> Result<()> {
    let dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("config"))
        .join("environments");
    let environments = environment_names(&dir)?;

    if cli.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&environments)?);
    } else {
        println!("📋 Available Environments ({}):", dir.display());
        for env in environments {
            println!("  • {env}");
        }
    }
    Ok(())
}

fn environment_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        bail!("directory not found: {}", dir.display());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            if let Some(stem) = path.file_stem() {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn print_executor(label: &str, settings: &ExecutorSettings) {
    println!(
        "{label}: core {} / max {} / queue {} (capacity {}), grace {}s, workers '{}-N'",
        settings.core_parallelism,
        settings.max_parallelism,
        settings.queue_capacity,
        settings.capacity(),
        settings.shutdown_grace.as_secs(),
        settings.name
    );
}

fn print_plans(plans: &[BatchPlan]) {
    println!("📦 Batch staircase:");
    println!("   {:>12} {:>10} {:>8}", "pending", "chunk", "chunks");
    for plan in plans {
        println!(
            "   {:>12} {:>10} {:>8}",
            plan.total, plan.batch_size, plan.total_batches
        );
    }
}
