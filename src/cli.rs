use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use gpuport_export::{
    execute_pipelines, load_export_config, validate_config, ExportConfig, PipelineResult,
};
use log::info;
use std::path::{Path, PathBuf};

use crate::collector::{fetch_with_retry, JsonFileCollector};
use crate::config::CollectorConfig;

#[derive(Parser)]
#[command(name = "gpuport")]
#[command(about = "Collect GPU rental offers and route them through export pipelines")]
#[command(version)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every export pipeline over collected offers
    Export(ExportArgs),
    /// Load an export configuration and print advisory warnings
    Validate {
        /// Export configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Args)]
pub struct ExportArgs {
    /// Export configuration (YAML)
    #[arg(short, long)]
    pub config: PathBuf,
    /// JSON array of offer records
    #[arg(short, long)]
    pub input: PathBuf,
    /// Provider label for records that do not carry one
    #[arg(long, default_value = "json")]
    pub provider: String,
    /// Collector timeout and retry settings (YAML)
    #[arg(long)]
    pub collector_config: Option<PathBuf>,
    /// Load and validate everything without running pipelines
    #[arg(long)]
    pub validate_only: bool,
}

/// Run a parsed command. `Ok(false)` means an enabled pipeline failed.
pub async fn run_cli(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Export(args) => handle_export(args).await,
        Commands::Validate { config } => {
            load_and_validate(&config)?;
            print_success("Configuration is valid");
            Ok(true)
        }
    }
}

fn load_and_validate(path: &Path) -> anyhow::Result<ExportConfig> {
    let config = load_export_config(path)
        .with_context(|| format!("loading export config {}", path.display()))?;
    for warning in validate_config(&config) {
        print_warning(&warning);
    }
    Ok(config)
}

async fn handle_export(args: ExportArgs) -> anyhow::Result<bool> {
    let export = load_and_validate(&args.config)?;
    let collector_config = CollectorConfig::load(args.collector_config.as_deref())
        .context("loading collector config")?;

    if args.validate_only {
        print_success(&format!(
            "Configuration is valid ({} pipeline(s))",
            export.pipelines.len()
        ));
        return Ok(true);
    }

    let collector = JsonFileCollector::new(args.provider, args.input);
    let instances = fetch_with_retry(&collector, &collector_config)
        .await
        .with_context(|| format!("collecting offers from {}", collector.path().display()))?;

    info!(
        "Running {} pipeline(s) over {} instance(s)",
        export.pipelines.len(),
        instances.len()
    );
    let results = execute_pipelines(&instances, &export.pipelines).await;

    print!("{}", render_summary(&results));
    Ok(results.iter().all(|r| !r.enabled || r.success()))
}

/// Per-pipeline report followed by a total line.
pub fn render_summary(results: &[PipelineResult]) -> String {
    let mut out = String::new();

    for result in results {
        if !result.enabled {
            out.push_str(&format!(
                "{} {} (disabled)\n",
                "-".dimmed(),
                result.pipeline_name
            ));
            continue;
        }

        let marker = if result.is_fully_successful() {
            "✓".green().bold()
        } else if result.success() {
            "⚠".yellow().bold()
        } else {
            "✗".red().bold()
        };
        out.push_str(&format!(
            "{} {}: {}/{} instance(s), {} output(s) ok, {} failed, {:.2}s\n",
            marker,
            result.pipeline_name.bold(),
            result.filtered_count,
            result.input_count,
            result.successful_outputs(),
            result.failed_outputs(),
            result.timings.total.as_secs_f64()
        ));

        if let Some(error) = &result.error {
            out.push_str(&format!("    {}\n", error.red()));
        }

        for output in &result.outputs {
            let label = match &output.name {
                Some(name) => format!("{} '{}'", output.output_type, name),
                None => output.output_type.to_string(),
            };
            match (&output.destination, &output.error) {
                (Some(destination), _) => {
                    out.push_str(&format!("    {} {}: {}\n", "→".green(), label, destination))
                }
                (None, Some(error)) => {
                    out.push_str(&format!("    {} {}: {}\n", "→".red(), label, error))
                }
                (None, None) => out.push_str(&format!("    {} {}\n", "→".dimmed(), label)),
            }
        }
    }

    let enabled: Vec<&PipelineResult> = results.iter().filter(|r| r.enabled).collect();
    let failed = enabled.iter().filter(|r| !r.success()).count();
    out.push_str(&format!(
        "Total: {} pipeline(s), {} run, {} failed\n",
        results.len(),
        enabled.len(),
        failed
    ));
    out
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}
