//! NotebookLM RPC command line
//!
//! Thin command surface over `nlm-core`:
//! - `health`: verify the method IDs the client relies on
//! - `refresh`: re-derive session tokens from the stored cookies
//! - `call`: send one RPC and print the decoded payload
//! - `wait-source`, `wait-artifact`, `wait-research`: the long-running waits
//! - `upload`: resumable file upload into a notebook

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use nlm_core::artifacts::wait_for_completion;
use nlm_core::auth::load_cookies;
use nlm_core::config::{Config, Directories};
use nlm_core::health::{CheckStatus, HealthReport, run_health_check};
use nlm_core::research::wait_for_research;
use nlm_core::sources::{notebook_path, wait_for_sources};
use nlm_core::upload::upload_file;
use nlm_core::{PollConfig, ReqwestTransport, RpcClient, RpcMethod, RpcRequest, SessionCoordinator, Tree};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

type Client = RpcClient<ReqwestTransport>;

#[derive(Parser)]
#[command(name = "nlm")]
#[command(about = "NotebookLM RPC client - health checks, raw calls and waits")]
#[command(version)]
#[command(after_help = "\
Examples:
  nlm health                              Check read-only method IDs
  nlm health --notebook NB_ID             Also check notebook-scoped methods
  nlm health --full                       Also check create/delete on a temp notebook
  nlm call LIST_NOTEBOOKS '[null, 1]'     Call a method by name
  nlm call rLM1Ne '[\"NB_ID\"]' --raw     Print every envelope in the response
  nlm wait-source NB_ID SRC_A SRC_B       Wait until sources finish processing
  nlm upload NB_ID ./paper.pdf --wait     Upload a file and wait for it
")]
struct Cli {
    /// Playwright storage state with the session cookies
    #[arg(long, global = true, value_name = "PATH")]
    storage: Option<PathBuf>,

    /// Config file (defaults to config.json in the config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also write logs to this file (a bare name goes in the data directory)
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that each known method ID is still recognized by the service
    Health {
        /// Notebook used for notebook-scoped checks
        #[arg(long, value_name = "ID")]
        notebook: Option<String>,

        /// Also check create and delete methods against a temporary notebook
        #[arg(long)]
        full: bool,

        /// Pause between calls in milliseconds (defaults to config)
        #[arg(long, value_name = "MS")]
        delay_ms: Option<u64>,
    },

    /// Fetch fresh session tokens
    Refresh,

    /// Call one method and print its payload as JSON
    Call {
        /// Method name (e.g. `GET_NOTEBOOK`) or raw ID (e.g. `rLM1Ne`)
        method: String,

        /// Positional parameters as a JSON array
        #[arg(default_value = "[]")]
        params: String,

        /// Source path hint (e.g. `/notebook/<id>`)
        #[arg(long, value_name = "PATH", conflicts_with = "notebook")]
        source_path: Option<String>,

        /// Shorthand for `--source-path /notebook/<id>`
        #[arg(long, value_name = "ID")]
        notebook: Option<String>,

        /// Print every envelope instead of the selected payload
        #[arg(long)]
        raw: bool,
    },

    /// Wait until sources are ready
    #[command(name = "wait-source")]
    WaitSource {
        notebook: String,

        #[arg(required = true)]
        sources: Vec<String>,

        /// Override the profile timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Wait until an artifact generation task completes
    #[command(name = "wait-artifact")]
    WaitArtifact {
        notebook: String,
        task: String,

        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Wait until the notebook's research session completes
    #[command(name = "wait-research")]
    WaitResearch {
        notebook: String,

        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Upload a file as a new source
    Upload {
        notebook: String,
        file: PathBuf,

        /// Wait for the new source to finish processing
        #[arg(long)]
        wait: bool,
    },
}

/// Set up logging to stderr, plus a non-blocking file layer when requested.
/// The returned guard flushes the file writer on drop.
fn setup_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nlm={default_level}")));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose);

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(filter)
            .init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let filename = path
        .file_name()
        .with_context(|| format!("Invalid log file path: {}", path.display()))?;

    let file_appender = tracing_appender::rolling::never(dir, filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(filter)
        .init();

    Ok(Some(guard))
}

fn load_config(explicit: Option<&Path>, dirs: &Directories) -> Result<Config> {
    let path = explicit.unwrap_or(&dirs.config_file);
    let config = Config::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?
        .with_env_overrides(|key| std::env::var(key).ok());
    debug!(base_url = %config.base_url, "Config loaded");
    Ok(config)
}

async fn connect(cli: &Cli, config: &Config, dirs: &Directories) -> Result<Client> {
    let cookies = load_cookies(cli.storage.as_deref(), &dirs.storage_state)
        .context("Failed to load session cookies (log in with a browser first)")?;

    let transport = Arc::new(
        ReqwestTransport::new(config.request_timeout()).context("Failed to build HTTP client")?,
    );
    let session = SessionCoordinator::initialize(Arc::clone(&transport), config.home_url(), cookies)
        .await
        .context("Failed to initialize session")?;

    Ok(RpcClient::new(transport, Arc::new(session), config))
}

fn with_timeout(config: PollConfig, timeout: Option<u64>) -> PollConfig {
    match timeout {
        Some(secs) => config.with_timeout(Duration::from_secs(secs)),
        None => config,
    }
}

fn print_json(tree: &Tree) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(tree)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let dirs = Directories::new()?;
    dirs.ensure_exists()
        .with_context(|| format!("Failed to create {}", dirs.data.display()))?;
    let log_file = cli.log_file.as_deref().map(|file| dirs.log_path(file));
    let _guard = setup_logging(cli.verbose, log_file.as_deref())?;

    let config = load_config(cli.config.as_deref(), &dirs)?;
    let client = connect(&cli, &config, &dirs).await?;

    match &cli.command {
        Commands::Health {
            notebook,
            delay_ms,
            full,
        } => {
            let delay = delay_ms.map_or_else(|| config.health_call_delay(), Duration::from_millis);
            let report = run_health_check(&client, notebook.as_deref(), delay, *full).await;
            print_report(&report);
            return Ok(if report.passed() { ExitCode::SUCCESS } else { ExitCode::FAILURE });
        }
        Commands::Refresh => run_refresh(&client).await?,
        Commands::Call {
            method,
            params,
            source_path,
            notebook,
            raw,
        } => {
            let source_path = source_path
                .clone()
                .or_else(|| notebook.as_deref().map(notebook_path));
            run_call(&client, method, params, source_path.as_deref(), *raw).await?;
        }
        Commands::WaitSource {
            notebook,
            sources,
            timeout,
        } => {
            let poll = with_timeout(config.poll.sources.to_poll_config()?, *timeout);
            let ready = wait_for_sources(&client, notebook, sources, &poll).await?;
            for source in ready {
                println!(
                    "{}\t{}\t{}",
                    source.id,
                    source.status,
                    source.title.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::WaitArtifact {
            notebook,
            task,
            timeout,
        } => {
            let poll = with_timeout(config.poll.generation.to_poll_config()?, *timeout);
            let status = wait_for_completion(&client, notebook, task, &poll).await?;
            println!("{}\t{}", status.task_id, status.state);
        }
        Commands::WaitResearch { notebook, timeout } => {
            let poll = with_timeout(config.poll.research.to_poll_config()?, *timeout);
            let result = wait_for_research(&client, notebook, &poll).await?;
            println!("Status: {}", result.status.as_str());
            if let Some(query) = &result.query {
                println!("Query: {query}");
            }
            println!("Sources: {}", result.sources.len());
            for source in &result.sources {
                println!("  {}\t{}", source.title, source.url);
            }
            if let Some(summary) = &result.summary {
                println!("\n{summary}");
            }
        }
        Commands::Upload {
            notebook,
            file,
            wait,
        } => {
            let source_id = upload_file(&client, &config.upload_url, notebook, file)
                .await
                .with_context(|| format!("Failed to upload {}", file.display()))?;
            info!(%source_id, "Uploaded");
            if *wait {
                let poll = config.poll.sources.to_poll_config()?;
                wait_for_sources(&client, notebook, std::slice::from_ref(&source_id), &poll).await?;
            }
            println!("{source_id}");
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_refresh(client: &Client) -> Result<()> {
    let epoch = client
        .session()
        .refresh()
        .await
        .context("Session refresh failed")?;
    let (_, credentials) = client.session().snapshot().await;
    println!("Session refreshed (epoch {epoch}, sid {})", credentials.session_id);
    Ok(())
}

async fn run_call(
    client: &Client,
    method: &str,
    params: &str,
    source_path: Option<&str>,
    raw: bool,
) -> Result<()> {
    let method_id = RpcMethod::lookup(method).map_or_else(|| method.to_string(), |m| m.id().to_string());
    let params: Tree = serde_json::from_str(params).context("Parameters must be valid JSON")?;
    if params.as_seq().is_none() {
        bail!("Parameters must be a JSON array");
    }

    let mut request = RpcRequest::new(method_id, params);
    if let Some(path) = source_path {
        request = request.with_source_path(path);
    }

    if raw {
        let set = client.call_raw(&request).await?;
        for envelope in set.envelopes() {
            let status = envelope
                .status
                .map_or_else(|| "-".to_string(), |code| code.to_string());
            println!("{} ({:?}, status {status})", envelope.method_id, envelope.kind);
            if let Some(payload) = &envelope.payload {
                print_json(payload)?;
            }
        }
        return Ok(());
    }

    match client.call_request(&request).await? {
        Some(payload) => print_json(&payload)?,
        None => println!("null"),
    }
    Ok(())
}

fn print_report(report: &HealthReport) {
    println!("Method ID health check ({} methods)\n", report.results.len());
    for result in &report.results {
        let detail = match result.status {
            CheckStatus::Mismatch => format!("found {:?}", result.found_ids),
            _ => result.error.clone().unwrap_or_default(),
        };
        println!(
            "  {:<9} {:<20} {:<8} {detail}",
            result.status.to_string(),
            result.method.name(),
            result.expected_id
        );
    }

    let summary: Vec<String> = report
        .counts()
        .iter()
        .map(|(status, n)| format!("{n} {}", status.to_string().to_lowercase()))
        .collect();
    let elapsed = report.finished_at - report.started_at;
    println!("\n{} in {}ms", summary.join(", "), elapsed.num_milliseconds());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_call_defaults() {
        let cli = Cli::try_parse_from(["nlm", "call", "LIST_NOTEBOOKS"]).unwrap();
        match cli.command {
            Commands::Call {
                method,
                params,
                source_path,
                notebook,
                raw,
            } => {
                assert_eq!(method, "LIST_NOTEBOOKS");
                assert_eq!(params, "[]");
                assert_eq!(source_path, None);
                assert_eq!(notebook, None);
                assert!(!raw);
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn test_source_path_conflicts_with_notebook() {
        let result = Cli::try_parse_from([
            "nlm",
            "call",
            "rLM1Ne",
            "--source-path",
            "/",
            "--notebook",
            "nb_1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["nlm", "refresh", "-v", "--storage", "/tmp/state.json"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.storage, Some(PathBuf::from("/tmp/state.json")));
    }

    #[test]
    fn test_parse_health_full() {
        let cli = Cli::try_parse_from(["nlm", "health", "--full", "--delay-ms", "0"]).unwrap();
        match cli.command {
            Commands::Health {
                notebook,
                delay_ms,
                full,
            } => {
                assert!(full);
                assert_eq!(delay_ms, Some(0));
                assert_eq!(notebook, None);
            }
            _ => panic!("expected health"),
        }
    }

    #[test]
    fn test_wait_source_requires_ids() {
        assert!(Cli::try_parse_from(["nlm", "wait-source", "nb_1"]).is_err());
    }

    #[test]
    fn test_with_timeout_override() {
        let poll = with_timeout(PollConfig::SOURCES, Some(5));
        assert_eq!(poll.timeout, Duration::from_secs(5));
        assert_eq!(poll.initial_interval, PollConfig::SOURCES.initial_interval);
        assert_eq!(with_timeout(PollConfig::SOURCES, None), PollConfig::SOURCES);
    }
}
