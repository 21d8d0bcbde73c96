//! # prd-cli
//!
//! Command-line interface for releasing configuration between environments.
//!
//! ## Commands
//!
//! - `prd release` - Release the project in the current (or `--path`) directory
//!
//! ## Configuration
//!
//! Credentials are read from `credentials.json` in the project directory.
//! `PRD_MAX_CONCURRENCY` and `PRD_REQUEST_TIMEOUT_SECS` tune the remote calls;
//! `RUST_LOG` overrides the verbosity flags.

#![warn(missing_docs, clippy::pedantic)]

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use prd_adapters::http::{HttpObjectStore, HttpStoreConfig};
use prd_adapters::prompt::StdinPrompt;
use prd_adapters::source::DirectorySource;
use prd_adapters::store::ObjectStore;
use prd_config::{EnvironmentCredentials, ReleaseConfig};
use prd_kernel::{Release, ReleaseReport};
use prd_mapping::YamlMappingFile;
use prd_primitives::ObjectId;
use tracing::info;

/// Release configuration objects from a source to a target environment.
#[derive(Debug, Parser)]
#[command(name = "prd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (`-v` info, `-vv` debug, `-vvv` trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Release the project to the target environment.
    Release(ReleaseArgs),
}

/// Arguments for the release command.
#[derive(Debug, clap::Args)]
pub struct ReleaseArgs {
    /// Project directory holding `credentials.json`, `mapping.yaml` and `source/`.
    #[arg(long, short = 'p', default_value = ".")]
    pub path: PathBuf,

    /// Only validate attribute overrides; nothing is written.
    #[arg(long)]
    pub dry_run: bool,

    /// Target user owning released hooks, for cross-organization releases.
    #[arg(long, env = "PRD_TOKEN_OWNER")]
    pub token_owner: Option<u64>,

    /// Report format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Output format of the release report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    Text,
    /// JSON document.
    Json,
}

/// Runs a release as described by `args`.
///
/// # Errors
///
/// Returns an error when the project cannot be loaded, a store cannot be
/// configured, or the release aborts.
pub async fn release(args: &ReleaseArgs) -> Result<ReleaseReport> {
    let mut config = ReleaseConfig::load(&args.path)
        .await
        .with_context(|| format!("failed to load project at {}", args.path.display()))?
        .with_dry_run(args.dry_run);
    if let Some(owner) = args.token_owner {
        config = config.with_token_owner(ObjectId::new(owner));
    }

    let environments = config.environments().clone();
    let target = http_store(&environments.target, &config).context("target environment")?;
    let source = DirectorySource::open(config.source_path())
        .await
        .context("failed to read the source directory")?;
    let mappings = YamlMappingFile::new(config.mapping_path());
    info!(
        target = environments.target.api_url(),
        dry_run = config.dry_run(),
        "starting release"
    );

    let mut release = Release::new(config.clone(), target, Arc::new(source), Arc::new(mappings))
        .with_prompt(Arc::new(StdinPrompt::new()));
    if !environments.same_organization && environments.source.token.is_some() {
        release = release.with_source_store(http_store(&environments.source, &config)?);
    }

    Ok(release.run().await?)
}

fn http_store(
    credentials: &EnvironmentCredentials,
    config: &ReleaseConfig,
) -> Result<Arc<dyn ObjectStore>> {
    let token = credentials
        .token
        .clone()
        .with_context(|| format!("no API token configured for {}", credentials.api_url()))?;
    let store_config = HttpStoreConfig::new(credentials.api_url(), token)?
        .with_timeout(config.request_timeout());
    Ok(Arc::new(HttpObjectStore::new(store_config)))
}

/// Renders `report` in the requested format.
///
/// # Errors
///
/// Returns an error when the report cannot be serialized.
pub fn render(report: &ReleaseReport, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(report)?);
    }

    let mut out = String::new();
    if report.dry_run {
        writeln!(out, "Dry run: attribute overrides are valid, nothing was released.")?;
        return Ok(out);
    }
    writeln!(out, "Release {}", report.run_id)?;
    for (kind, count) in &report.released {
        writeln!(out, "  released {count} {kind}(s)")?;
    }
    if !report.ignored.is_empty() {
        writeln!(out, "  ignored {} object(s)", report.ignored.len())?;
    }
    if !report.created.is_empty() {
        let ids: Vec<String> = report.created.iter().map(ToString::to_string).collect();
        writeln!(out, "  created: {}", ids.join(", "))?;
    }
    writeln!(out, "  overrides applied: {}", report.overrides_applied)?;
    if !report.placeholder_hooks.is_empty() {
        writeln!(out, "Private hooks still using the placeholder URL:")?;
        for hook in &report.placeholder_hooks {
            writeln!(out, "  {hook}")?;
        }
    }
    if !report.failures.is_empty() {
        writeln!(out, "Failures:")?;
        for failure in &report.failures {
            writeln!(out, "  {failure}")?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prd_kernel::{Phase, UnitFailure};
    use prd_primitives::{ObjectKind, RunId};

    #[test]
    fn parses_release_flags() {
        let cli = Cli::try_parse_from(["prd", "-vv", "release", "--path", "proj", "--dry-run"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Release(args) = cli.command;
        assert_eq!(args.path, PathBuf::from("proj"));
        assert!(args.dry_run);
        assert_eq!(args.format, OutputFormat::Text);
    }

    #[test]
    fn text_report_lists_failures() {
        let mut report = ReleaseReport::new(RunId::random(), false);
        report.released.insert(ObjectKind::Hook, 2);
        report.failures.push(UnitFailure::new(
            Phase::Queues,
            ObjectKind::Queue,
            ObjectId::new(30),
            "boom",
        ));

        let text = render(&report, OutputFormat::Text).unwrap();
        assert!(text.contains("released 2 hook(s)"));
        assert!(text.contains("[queues] queue 30: boom"));
    }

    #[test]
    fn json_report_is_structured() {
        let report = ReleaseReport::new(RunId::random(), true);
        let rendered = render(&report, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["dry_run"], true);
    }
}
