use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use owner_remap::config::{ConfigError, Settings};
use owner_remap::engine::{
    ConcurrencyGate, IdentityResolver, RemapOptions, Resolution, run_remap,
};
use owner_remap::mapping::load_mapping;
use owner_remap::remote::{AtlassianClient, RemoteErrorKind};
use owner_remap::types::{ExitStatus, RunReport, ScopeFilter, TargetKind, UserField};

#[derive(Parser)]
#[command(name = "owner-remap", version)]
#[command(about = "Bulk reassignment of issue, filter and space ownership between accounts")]
struct Cli {
    /// Dotenv file consulted for settings the environment does not set
    /// (defaults to `.env` when present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify credentials against the site
    Check,
    /// Resolve identities (emails, usernames or account ids) to accounts
    Find {
        /// Comma-separated or repeated identity tokens
        #[arg(required = true, value_delimiter = ',')]
        tokens: Vec<String>,
    },
    /// Reassign everything each `old` identity owns to its `new` identity
    Remap(RemapArgs),
}

#[derive(Args)]
struct RemapArgs {
    /// CSV file with `old` and `new` columns
    mapping: PathBuf,

    /// What to reassign
    #[arg(value_enum)]
    target: TargetArg,

    /// Restrict issue searches to one project key
    #[arg(long)]
    project: Option<String>,

    /// Issue field that carries ownership
    #[arg(long, value_enum, default_value_t = FieldArg::Assignee)]
    field: FieldArg,

    /// Enumerate and report without changing anything
    #[arg(long)]
    dry_run: bool,

    /// Maximum concurrent remote calls (overrides REMAP_CONCURRENCY)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetArg {
    Issues,
    Filters,
    Spaces,
}

#[derive(Clone, Copy, ValueEnum)]
enum FieldArg {
    Assignee,
    Reporter,
}

impl RemapArgs {
    fn options(&self) -> RemapOptions {
        let kind = match self.target {
            TargetArg::Issues => TargetKind::Issue {
                field: match self.field {
                    FieldArg::Assignee => UserField::Assignee,
                    FieldArg::Reporter => UserField::Reporter,
                },
            },
            TargetArg::Filters => TargetKind::Filter,
            TargetArg::Spaces => TargetKind::Space,
        };
        RemapOptions::new(kind)
            .with_scope(self.project.clone().map(ScopeFilter::Project))
            .dry_run(self.dry_run)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "owner_remap=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let status = match cli.command {
        Command::Check => check(cli.env_file).await,
        Command::Find { tokens } => find(cli.env_file, tokens).await,
        Command::Remap(args) => remap(cli.env_file, args).await,
    };
    ExitCode::from(status.code())
}

fn config_failed(e: ConfigError) -> ExitStatus {
    error!(error = %e, "Configuration error");
    ExitStatus::ConfigError
}

fn connect(settings: &Settings) -> Option<AtlassianClient> {
    match AtlassianClient::new(settings) {
        Ok(client) => Some(client),
        Err(e) => {
            error!(error = %e, "Failed to build HTTP client");
            None
        }
    }
}

async fn check(env_file: Option<PathBuf>) -> ExitStatus {
    let settings = match Settings::from_env(env_file.as_deref()) {
        Ok(settings) => settings,
        Err(e) => return config_failed(e),
    };
    let Some(client) = connect(&settings) else {
        return ExitStatus::ConnectionFailed;
    };

    match client.current_user().await {
        Ok(me) => {
            println!("Connected to {} as {}", client.base_url(), me);
            ExitStatus::Success
        }
        Err(e) => {
            error!(error = %e, "Connection check failed");
            if e.kind == RemoteErrorKind::Unauthorized {
                warn!("Check REMAP_EMAIL and REMAP_API_TOKEN");
            }
            ExitStatus::ConnectionFailed
        }
    }
}

async fn find(env_file: Option<PathBuf>, tokens: Vec<String>) -> ExitStatus {
    let settings = match Settings::from_env(env_file.as_deref()) {
        Ok(settings) => settings,
        Err(e) => return config_failed(e),
    };
    let Some(client) = connect(&settings) else {
        return ExitStatus::ConnectionFailed;
    };

    let gate = Arc::new(ConcurrencyGate::new(settings.concurrency, settings.stagger_unit));
    let resolver = IdentityResolver::new(Arc::new(client), gate);
    let tokens = normalize_tokens(tokens);
    let resolved = resolver.resolve_all(tokens.iter().cloned()).await;

    let (lines, status) = find_lines(&tokens, &resolved);
    for line in lines {
        println!("{}", line);
    }
    status
}

/// Trims tokens and drops blank ones, keeping order.
fn normalize_tokens(tokens: Vec<String>) -> Vec<String> {
    tokens
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// One tab-separated line per token; any token that did not resolve makes the
/// run `CompletedWithFailures`.
fn find_lines(
    tokens: &[String],
    resolved: &HashMap<String, Resolution>,
) -> (Vec<String>, ExitStatus) {
    let mut status = ExitStatus::Success;
    let mut lines = Vec::with_capacity(tokens.len());
    for token in tokens {
        match resolved.get(token) {
            Some(Ok(identity)) => lines.push(format!(
                "{}\t{}\t{}",
                token, identity.account_id, identity.display_name
            )),
            Some(Err(e)) => {
                lines.push(format!("{}\t-\t{}", token, e));
                status = ExitStatus::CompletedWithFailures;
            }
            None => {
                lines.push(format!("{}\t-\tnot looked up", token));
                status = ExitStatus::CompletedWithFailures;
            }
        }
    }
    (lines, status)
}

async fn remap(env_file: Option<PathBuf>, args: RemapArgs) -> ExitStatus {
    let settings = match Settings::from_env(env_file.as_deref()) {
        Ok(settings) => settings,
        Err(e) => return config_failed(e),
    };
    let settings = match args.concurrency {
        Some(n) => match settings.with_concurrency(n) {
            Ok(settings) => settings,
            Err(e) => return config_failed(e),
        },
        None => settings,
    };
    let entries = match load_mapping(&args.mapping) {
        Ok(entries) => entries,
        Err(e) => return config_failed(e),
    };
    let Some(client) = connect(&settings) else {
        return ExitStatus::ConnectionFailed;
    };

    let options = args.options();
    info!(
        site = client.base_url(),
        entries = entries.len(),
        kind = %options.kind,
        dry_run = options.dry_run,
        concurrency = settings.concurrency,
        "Starting run"
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight calls");
            on_interrupt.cancel();
        }
    });

    let gate = Arc::new(ConcurrencyGate::new(settings.concurrency, settings.stagger_unit));
    let report = run_remap(Arc::new(client), gate, entries, options.clone(), cancel).await;

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => error!(error = %e, "Failed to serialize report"),
        }
    } else {
        print_summary(&report, &options);
    }
    report.exit_status()
}

fn print_summary(report: &RunReport, options: &RemapOptions) {
    let verb = if options.dry_run { "Would reassign" } else { "Reassigned" };
    println!(
        "{} {}: {} succeeded, {} failed, {} skipped ({} targets)",
        verb,
        options.kind,
        report.succeeded,
        report.failed,
        report.skipped,
        report.total()
    );

    if !report.failures.is_empty() {
        println!("Failed targets:");
        for outcome in &report.failures {
            println!(
                "  {}: {}",
                outcome.target,
                outcome.detail.as_deref().unwrap_or("unknown error")
            );
        }
    }
    if !report.entry_failures.is_empty() {
        println!("Failed entries:");
        for failure in &report.entry_failures {
            println!("  {}", failure);
        }
    }
    if report.aborted {
        println!("Run aborted before completion; rerun to pick up the remaining targets.");
    }
}
