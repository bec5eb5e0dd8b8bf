use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use codegrade::adapters;
use codegrade::config;
use codegrade::core;

#[derive(Parser)]
#[command(name = "codegrade")]
#[command(about = "Grades commits with a language model and stores structured code-quality analyses", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    model: Option<String>,

    #[arg(long, global = true)]
    temperature: Option<f32>,

    #[arg(long, global = true)]
    max_tokens: Option<usize>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Analyze the commits of a repository inside a time window")]
    Analyze {
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        #[arg(long, help = "Start of the window (YYYY-MM-DD or RFC 3339)")]
        since: Option<String>,

        #[arg(long, help = "End of the window, inclusive (YYYY-MM-DD or RFC 3339)")]
        until: Option<String>,

        #[arg(long, help = "Branch or ref to walk (defaults to HEAD)")]
        branch: Option<String>,

        #[arg(long, help = "Re-analyze commits that are already stored")]
        force: bool,
    },
    #[command(about = "Diff two files with the line diff engine")]
    Diff {
        #[arg(long)]
        old_file: PathBuf,

        #[arg(long)]
        new_file: PathBuf,

        #[arg(long, value_enum, default_value = "unified")]
        format: DiffFormat,
    },
    #[command(about = "Turn a raw model reply into a structured analysis")]
    Interpret {
        #[arg(long, help = "Reply file (reads from stdin if not provided)")]
        input: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum DiffFormat {
    Script,
    Unified,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = config::Config::load().unwrap_or_else(|e| {
        warn!("Ignoring unreadable config: {:#}", e);
        config::Config::default()
    });
    config.merge_with_cli(cli.model, cli.temperature, cli.max_tokens);

    match cli.command {
        Commands::Analyze {
            repo,
            since,
            until,
            branch,
            force,
        } => {
            analyze_command(config, repo, since, until, branch, force).await?;
        }
        Commands::Diff {
            old_file,
            new_file,
            format,
        } => {
            diff_command(config, old_file, new_file, format).await?;
        }
        Commands::Interpret { input } => {
            interpret_command(config, input).await?;
        }
    }

    Ok(())
}

async fn analyze_command(
    config: config::Config,
    repo: PathBuf,
    since: Option<String>,
    until: Option<String>,
    branch: Option<String>,
    force: bool,
) -> Result<()> {
    let since = since.as_deref().map(|s| parse_date(s, false)).transpose()?;
    let until = until.as_deref().map(|s| parse_date(s, true)).transpose()?;

    let git = core::GitIntegration::new(&repo)?;
    let commits = git.commits_in_window(since, until, branch.as_deref())?;
    info!("Found {} commits to analyze", commits.len());

    let adapter: Arc<dyn adapters::llm::LLMAdapter> =
        Arc::from(adapters::llm::create_adapter(&config.model_config())?);
    let store = Arc::new(core::JsonFileStore::new(config.store_path.clone()));
    info!("Storing analyses in {}", store.root().display());
    let pipeline = core::AnalysisPipeline::new(config, adapter, store);

    let mut reports = Vec::new();
    for commit in &commits {
        match pipeline.analyze_commit(&git, commit, force).await {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => {}
            Err(e) => warn!("Failed to analyze commit {}: {:#}", commit.short_id, e),
        }
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

async fn diff_command(
    config: config::Config,
    old_file: PathBuf,
    new_file: PathBuf,
    format: DiffFormat,
) -> Result<()> {
    info!("Comparing files: {} vs {}", old_file.display(), new_file.display());

    let old_content = tokio::fs::read_to_string(&old_file)
        .await
        .with_context(|| format!("Failed to read {}", old_file.display()))?;
    let new_content = tokio::fs::read_to_string(&new_file)
        .await
        .with_context(|| format!("Failed to read {}", new_file.display()))?;

    let entries = core::compute_diff_with_limits(&old_content, &new_content, &config.diff_limits());
    let output = match format {
        DiffFormat::Script => core::diff_engine::render_edit_script(&entries),
        DiffFormat::Unified => format!(
            "--- {}\n+++ {}\n{}",
            old_file.display(),
            new_file.display(),
            core::diff_engine::render_unified(&entries, config.diff_context_lines, 0)
        ),
        DiffFormat::Json => serde_json::to_string_pretty(&entries)?,
    };

    print!("{}", output);
    if !output.ends_with('\n') {
        println!();
    }
    Ok(())
}

async fn interpret_command(config: config::Config, input: Option<PathBuf>) -> Result<()> {
    let raw = match input {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read reply from stdin")?;
            buffer
        }
    };

    let interpreter = core::ResponseInterpreter::new(&config.interpreter_config());
    let analysis = interpreter.interpret(&raw);
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

/// Accepts RFC 3339 timestamps or plain dates. A plain date is the start of
/// that day, or its last second when `end_of_day` is set.
fn parse_date(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD or RFC 3339", value))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .context("Invalid time of day")?;
    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_dates_as_day_bounds() {
        let start = parse_date("2024-02-29", false).unwrap();
        let end = parse_date("2024-02-29", true).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap());
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let parsed = parse_date("2024-05-01T10:00:00-03:00", true).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn rejects_garbage_dates() {
        assert!(parse_date("last tuesday", false).is_err());
        assert!(parse_date("2024-13-01", false).is_err());
    }

    #[test]
    fn cli_accepts_analyze_flags() {
        let cli = Cli::try_parse_from([
            "codegrade",
            "analyze",
            "--since",
            "2024-01-01",
            "--branch",
            "main",
            "--force",
            "--model",
            "ollama:llama3",
        ])
        .unwrap();
        assert_eq!(cli.model.as_deref(), Some("ollama:llama3"));
        match cli.command {
            Commands::Analyze {
                since,
                branch,
                force,
                ..
            } => {
                assert_eq!(since.as_deref(), Some("2024-01-01"));
                assert_eq!(branch.as_deref(), Some("main"));
                assert!(force);
            }
            _ => panic!("expected analyze"),
        }
    }
}
