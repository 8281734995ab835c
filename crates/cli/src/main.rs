use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use dotvault_core::{
    create_run_directory, followups_from_results, AppCandidate, AssistedFinding,
    BackupItemResult, BackupOptions, BackupOrchestrator, BackupRunSummary, BackupStatus, Context,
    ContextSettings, DiscoveryOptions, DiscoveryPipeline, DiscoveryReport, DiscoveryTier,
    PatternSources, PatternStore, SecretRedactor,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "dotvault",
    version,
    about = "Discover application configuration and back it up with secrets redacted."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve configuration locations for a list of applications.
    Discover(DiscoverArgs),
    /// Copy every discovered location into a timestamped run directory.
    Backup(BackupArgs),
    /// Rank applications that still need manual research.
    Followup(FollowupArgs),
    /// Print a file with secrets redacted.
    Redact(RedactArgs),
    /// Explain the eligibility verdicts for individual paths.
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct PatternArgs {
    /// Redaction and exclusion rules. Defaults to the built-in document.
    #[arg(long, value_name = "FILE")]
    security_patterns: Option<PathBuf>,

    /// Inclusion rules for conventions and assisted paths. Defaults to the built-in document.
    #[arg(long, value_name = "FILE")]
    config_patterns: Option<PathBuf>,
}

impl PatternArgs {
    fn sources(&self) -> PatternSources {
        PatternSources {
            security: self.security_patterns.clone(),
            config: self.config_patterns.clone(),
        }
    }
}

#[derive(Debug, Args)]
struct DiscoverArgs {
    /// Application list (YAML or JSON sequence of `{name, bundle_id?, location?}`).
    #[arg(long, value_name = "FILE")]
    apps: PathBuf,

    /// Hints database. Defaults to the built-in database.
    #[arg(long, value_name = "FILE")]
    hints: Option<PathBuf>,

    /// Assisted findings keyed by application name.
    #[arg(long, value_name = "FILE")]
    assisted: Option<PathBuf>,

    /// Home directory override.
    #[arg(long, value_name = "DIR")]
    home: Option<PathBuf>,

    /// XDG config home override; must live under home.
    #[arg(long, value_name = "DIR")]
    xdg_config_home: Option<PathBuf>,

    /// Output discovery report path.
    #[arg(long, default_value = "dotvault-discovery.json", value_name = "FILE")]
    output: PathBuf,

    /// Keep convention candidates even when nothing exists on disk.
    #[arg(long)]
    no_check_exists: bool,

    /// Include vendor system applications.
    #[arg(long)]
    include_system_apps: bool,

    #[command(flatten)]
    patterns: PatternArgs,
}

#[derive(Debug, Args)]
struct BackupArgs {
    /// Discovery report produced by `discover`.
    #[arg(long, value_name = "FILE")]
    discovery: PathBuf,

    /// Base directory; each run gets its own timestamped subdirectory.
    #[arg(long, value_name = "DIR")]
    output: PathBuf,

    /// Copy files verbatim without redacting secrets.
    #[arg(long)]
    include_secrets: bool,

    /// Leave permissions of written files untouched.
    #[arg(long)]
    no_normalize: bool,

    /// Optional JSON output for the run summary and item results.
    #[arg(long, value_name = "FILE")]
    summary: Option<PathBuf>,

    #[command(flatten)]
    patterns: PatternArgs,
}

#[derive(Debug, Args)]
struct FollowupArgs {
    /// Discovery report produced by `discover`.
    #[arg(long, value_name = "FILE")]
    discovery: PathBuf,

    /// Maximum number of candidates to print.
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Debug, Args)]
struct RedactArgs {
    /// File to redact.
    #[arg(long, value_name = "FILE")]
    file: PathBuf,

    /// Redaction rules. Defaults to the built-in document.
    #[arg(long, value_name = "FILE")]
    security_patterns: Option<PathBuf>,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliTier {
    Hints,
    Conventions,
    Assisted,
}

impl From<CliTier> for DiscoveryTier {
    fn from(value: CliTier) -> Self {
        match value {
            CliTier::Hints => DiscoveryTier::Hints,
            CliTier::Conventions => DiscoveryTier::Conventions,
            CliTier::Assisted => DiscoveryTier::Assisted,
        }
    }
}

#[derive(Debug, Args)]
struct CheckArgs {
    /// Paths to explain.
    #[arg(value_name = "PATH", num_args = 1.., action = ArgAction::Append, required = true)]
    paths: Vec<PathBuf>,

    /// Tier the paths would be sourced from.
    #[arg(long, default_value = "hints")]
    tier: CliTier,

    #[command(flatten)]
    patterns: PatternArgs,
}

#[derive(Debug, Serialize)]
struct BackupOutput<'a> {
    summary: &'a BackupRunSummary,
    results: &'a [BackupItemResult],
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Discover(args) => run_discover_command(args),
        Commands::Backup(args) => run_backup_command(args),
        Commands::Followup(args) => run_followup_command(args),
        Commands::Redact(args) => run_redact_command(args),
        Commands::Check(args) => run_check_command(args),
    }
}

fn run_discover_command(args: DiscoverArgs) -> Result<()> {
    let context = Context::from_settings(&ContextSettings {
        patterns: args.patterns.sources(),
        hints: args.hints.clone(),
        home: args.home.clone(),
        xdg_config_home: args.xdg_config_home.clone(),
    })?;

    let apps: Vec<AppCandidate> = read_document(&args.apps)?;
    let options = DiscoveryOptions {
        check_exists: !args.no_check_exists,
        skip_system_apps: !args.include_system_apps,
        ..DiscoveryOptions::default()
    };
    let mut pipeline = DiscoveryPipeline::new(&context, options);
    pipeline.discover_all(&apps);

    if let Some(path) = &args.assisted {
        let findings: BTreeMap<String, AssistedFinding> = read_document(path)?;
        let unmatched = pipeline.add_assisted_batch(findings);
        for name in unmatched {
            println!("Assisted finding ignored for unknown app: {name}");
        }
    }

    let report = pipeline.report();
    write_json(&args.output, &report, "discovery report")?;

    let stats = &report.statistics;
    println!("Discovery report written to {}", args.output.display());
    println!(
        "Apps: {} | with settings: {} | from hints: {} | needs follow-up: {}",
        stats.total_apps, stats.with_settings, stats.found_in_hints, stats.needs_followup
    );
    for (source, count) in &stats.by_source {
        println!("- source {source:?}: {count}");
    }
    for (confidence, count) in &stats.by_confidence {
        println!("- confidence {confidence:?}: {count}");
    }
    Ok(())
}

fn run_backup_command(args: BackupArgs) -> Result<()> {
    let report: DiscoveryReport = read_document(&args.discovery)?;
    let context = Context::from_settings(&ContextSettings {
        patterns: args.patterns.sources(),
        home: Some(report.locations.home.clone()),
        xdg_config_home: Some(report.locations.xdg_config_home.clone()),
        ..ContextSettings::default()
    })?;

    let run_dir = create_run_directory(&args.output, None)
        .with_context(|| format!("failed to prepare run directory under {}", args.output.display()))?;
    let options = BackupOptions {
        include_secrets: args.include_secrets,
        normalize_permissions: !args.no_normalize,
    };
    let mut orchestrator = BackupOrchestrator::new(&context, &run_dir, options)
        .with_context(|| format!("failed to start backup into {}", run_dir.display()))?;

    for result in &report.results {
        for item in orchestrator.backup_discovery(result) {
            if matches!(item.status, BackupStatus::Skipped | BackupStatus::Error) {
                println!(
                    "- [{:?}] {}: {}",
                    item.status,
                    item.source.display(),
                    item.reason.as_deref().unwrap_or("no reason recorded")
                );
            }
        }
    }

    let (summary, results) = orchestrator.finish();
    println!("Backup written to {}", run_dir.display());
    println!(
        "Operations: {} | success: {} | partial: {} | skipped: {} | errors: {}",
        summary.total_operations, summary.success, summary.partial, summary.skipped, summary.errors
    );
    println!("Secrets redacted: {}", summary.total_changes);
    for (pattern, count) in &summary.changes_by_pattern {
        println!("- {pattern}: {count}");
    }

    if let Some(path) = &args.summary {
        let output = BackupOutput {
            summary: &summary,
            results: &results,
        };
        write_json(path, &output, "backup summary")?;
        println!("Summary JSON written to {}", path.display());
    }
    Ok(())
}

fn run_followup_command(args: FollowupArgs) -> Result<()> {
    let report: DiscoveryReport = read_document(&args.discovery)?;
    let candidates = followups_from_results(&report.results, &report.locations, args.limit);
    if candidates.is_empty() {
        println!("No applications need follow-up.");
        return Ok(());
    }
    println!("{} application(s) worth researching:", candidates.len());
    for candidate in candidates {
        println!(
            "- {} (score {}){}",
            candidate.app_name,
            candidate.score,
            candidate
                .bundle_id
                .map(|bid| format!(" [{bid}]"))
                .unwrap_or_default()
        );
        for path in candidate.checked_paths {
            println!("    checked {}", path.display());
        }
    }
    Ok(())
}

fn run_redact_command(args: RedactArgs) -> Result<()> {
    let store = PatternStore::load(&PatternSources {
        security: args.security_patterns,
        config: None,
    })
    .context("failed to load pattern documents")?;
    let redactor = SecretRedactor::new(&store);

    let text = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let name = args
        .file
        .file_name()
        .map(|name| name.to_string_lossy().to_string());
    let (redacted, changes) = redactor.filter(&text, name.as_deref());

    print!("{redacted}");
    eprintln!("{} secret(s) redacted", changes.len());
    for change in changes {
        eprintln!("- line {}: {} ({})", change.line, change.pattern, change.original);
    }
    Ok(())
}

fn run_check_command(args: CheckArgs) -> Result<()> {
    let context = Context::from_settings(&ContextSettings {
        patterns: args.patterns.sources(),
        ..ContextSettings::default()
    })?;
    let tier = DiscoveryTier::from(args.tier);

    for path in &args.paths {
        println!("{}", path.display());
        if tier.requires_config_filter() {
            let verdict = if path.is_dir() {
                context.config_filter.is_config_directory(path)
            } else {
                context.config_filter.is_config_file(path)
            };
            println!(
                "  config filter: {} ({})",
                if verdict.accepted { "accept" } else { "reject" },
                verdict.reason
            );
        } else {
            println!("  config filter: bypassed for {tier:?}");
        }
        let decision = context.exclusion.can_backup(path);
        println!(
            "  exclusion policy: {}{}",
            if decision.allowed { "allow" } else { "deny" },
            decision
                .reason
                .map(|reason| format!(" ({reason})"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T, label: &str) -> Result<()> {
    let payload =
        serde_json::to_string_pretty(value).with_context(|| format!("failed to serialize {label}"))?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write {label} to {}", path.display()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
