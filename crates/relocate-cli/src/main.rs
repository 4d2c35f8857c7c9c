//! Relocate CLI: drive the adaptation engine from the command line.
//!
//! - `relocate run` reads requests from stdin, one per line, and prints one
//!   JSON response per request. Besides adaptation requests it accepts
//!   `status`, `put <policy> [<key>] <file>` and `stress <policy>`
//! - `relocate apply --policy N [--count K]` performs one adaptation
//! - `relocate config` prints the effective configuration

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relocate_core::config::EngineConfig;
use relocate_core::error::RelocateError;
use relocate_core::types::{AdaptationResponse, PolicyKind};
use relocate_core::Result;
use relocate_runtime::{AdaptationController, AdaptationEngine};

#[derive(Debug, Parser)]
#[command(name = "relocate", version, about = "Runtime data-placement adaptation engine")]
struct Cli {
    #[command(flatten)]
    source: ConfigSource,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ConfigSource {
    /// JSON configuration file.
    #[arg(long, global = true, conflicts_with = "aws")]
    config: Option<PathBuf>,

    /// Use the regional S3 buckets; credentials come from `AWS_*` variables.
    #[arg(long, global = true)]
    aws: bool,

    /// Directory for local backends.
    #[arg(long, global = true, default_value = "relocate-data")]
    local_root: PathBuf,
}

impl ConfigSource {
    fn resolve(&self) -> Result<EngineConfig> {
        match &self.config {
            Some(path) => EngineConfig::load(path),
            None if self.aws => Ok(EngineConfig::aws_defaults(&self.local_root)),
            None => Ok(EngineConfig::local(&self.local_root)),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve requests read from stdin until EOF or Ctrl-C.
    Run,
    /// Apply a single adaptation and exit.
    Apply {
        /// Policy code (1 = region, 2 = sensitivity) or name.
        #[arg(long)]
        policy: String,
        /// Number of toggles; only its parity matters.
        #[arg(long, default_value_t = 1)]
        count: i64,
    },
    /// Print the effective configuration as JSON.
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries responses, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("relocate: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let config = cli.source.resolve()?;
    match cli.command {
        Command::Config => {
            print_json(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Apply { policy, count } => {
            let engine = AdaptationEngine::start(config).await?;
            let response = engine.handle_text(&format!("{policy} {count}")).await;
            engine.shutdown().await;
            let success = response.iter().all(|r| r.success);
            for r in &response {
                print_json(r)?;
            }
            Ok(if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Run => {
            let engine = AdaptationEngine::start(config).await?;
            serve(&engine).await?;
            engine.shutdown().await;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Read stdin line by line, handling each request on its own task so
/// requests for different policies proceed concurrently.
async fn serve(engine: &AdaptationEngine) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();
    info!("Reading adaptation requests from stdin");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.map_err(|e| RelocateError::Internal {
                    message: format!("Failed to read stdin: {e}"),
                })?;
                let Some(line) = line else {
                    info!("End of input");
                    break;
                };
                match parse_line(&line) {
                    Ok(Line::Empty) => {}
                    Ok(Line::Status) => print_json(&engine.status())?,
                    Ok(line) => {
                        in_flight.spawn(handle_line(engine.controller(), line));
                    }
                    Err(e) => print_json(&AdaptationResponse::failed(e.to_string()))?,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                report_task(done);
            }
        }
    }

    // Requests already accepted run to completion
    while let Some(done) = in_flight.join_next().await {
        report_task(done);
    }
    Ok(())
}

/// One line of `run` input.
#[derive(Debug, PartialEq)]
enum Line {
    Empty,
    Status,
    Put {
        policy: PolicyKind,
        key: String,
        path: PathBuf,
    },
    Stress(PolicyKind),
    Requests(String),
}

fn parse_line(line: &str) -> Result<Line> {
    let line = line.trim();
    let words: Vec<&str> = line.split_whitespace().collect();
    let invalid = |usage: &str| RelocateError::InvalidRequest {
        message: format!("usage: {usage}"),
    };
    match words.as_slice() {
        [] => Ok(Line::Empty),
        ["status"] => Ok(Line::Status),
        ["put", policy, file] => {
            let path = PathBuf::from(*file);
            let key = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .ok_or_else(|| invalid("put <policy> [<key>] <file>"))?;
            Ok(Line::Put {
                policy: policy.parse()?,
                key,
                path,
            })
        }
        ["put", policy, key, file] => Ok(Line::Put {
            policy: policy.parse()?,
            key: key.to_string(),
            path: PathBuf::from(*file),
        }),
        ["put", ..] => Err(invalid("put <policy> [<key>] <file>")),
        ["stress", policy] => Ok(Line::Stress(policy.parse()?)),
        ["stress", ..] => Err(invalid("stress <policy>")),
        _ => Ok(Line::Requests(line.to_string())),
    }
}

async fn handle_line(controller: Arc<AdaptationController>, line: Line) {
    let responses = match line {
        Line::Put { policy, key, path } => vec![put_file(&controller, policy, &key, &path).await],
        Line::Stress(policy) => match controller.stress(policy).await {
            Ok(stats) => vec![AdaptationResponse::ok(format!(
                "{policy} stress pass read {} object(s), {} failure(s)",
                stats.reads, stats.read_failures
            ))],
            Err(e) => vec![AdaptationResponse::failed(format!(
                "{policy} stress pass failed: {e}"
            ))],
        },
        Line::Requests(text) => controller.handle_text(&text).await,
        Line::Empty | Line::Status => Vec::new(),
    };
    for response in responses {
        if let Err(e) = print_json(&response) {
            warn!(error = %e, "Failed to print response");
        }
    }
}

async fn put_file(
    controller: &AdaptationController,
    policy: PolicyKind,
    key: &str,
    path: &Path,
) -> AdaptationResponse {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) => {
            return AdaptationResponse::failed(format!(
                "cannot read {}: {e}",
                path.display()
            ))
        }
    };
    let size = data.len();
    match controller.ingest(policy, key, data.into()).await {
        Ok(()) => AdaptationResponse::ok(format!("{policy} stored {key} ({size} bytes)")),
        Err(e) => {
            warn!(policy = %policy, key, error = %e, "Ingest failed");
            AdaptationResponse::failed(format!("{policy} ingest failed: {e}"))
        }
    }
}

fn report_task(done: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = done {
        warn!(error = %e, "Request task failed");
        let response = AdaptationResponse::failed(format!("request aborted: {e}"));
        if let Err(e) = print_json(&response) {
            warn!(error = %e, "Failed to print response");
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json =
        serde_json::to_string(value).map_err(|e| RelocateError::Serialization(e.to_string()))?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_apply() {
        let cli = Cli::parse_from(["relocate", "apply", "--policy", "2", "--count", "3"]);
        match cli.command {
            Command::Apply { policy, count } => {
                assert_eq!(policy, "2");
                assert_eq!(count, 3);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.source.local_root, PathBuf::from("relocate-data"));
    }

    #[test]
    fn test_config_and_aws_conflict() {
        let parsed = Cli::try_parse_from(["relocate", "--config", "x.json", "--aws", "run"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_resolve_local_config() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().to_string_lossy().to_string();
        let cli = Cli::parse_from(["relocate", "config", "--local-root", root.as_str()]);
        let config = cli.source.resolve().unwrap();
        assert!(config.sensitivity.b.uri.starts_with("local://"));
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_run_lines() {
        assert_eq!(parse_line("  ").unwrap(), Line::Empty);
        assert_eq!(parse_line("status").unwrap(), Line::Status);
        assert_eq!(
            parse_line("stress region").unwrap(),
            Line::Stress(PolicyKind::RegionPlacement)
        );
        assert_eq!(
            parse_line("put 2 report.pdf /tmp/in/report.pdf").unwrap(),
            Line::Put {
                policy: PolicyKind::SensitivityPlacement,
                key: "report.pdf".to_string(),
                path: PathBuf::from("/tmp/in/report.pdf"),
            }
        );
        // Key defaults to the file name
        assert_eq!(
            parse_line("put 1 data/f1.csv").unwrap(),
            Line::Put {
                policy: PolicyKind::RegionPlacement,
                key: "f1.csv".to_string(),
                path: PathBuf::from("data/f1.csv"),
            }
        );
        assert_eq!(
            parse_line("1 3; 2 1").unwrap(),
            Line::Requests("1 3; 2 1".to_string())
        );
        assert!(parse_line("put 1").is_err());
        assert!(parse_line("stress 9").is_err());
        assert!(parse_line("stress").is_err());
    }

    #[tokio::test]
    async fn test_put_file_lands_in_active_backend() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine = AdaptationEngine::start(EngineConfig::local(tmp.path().join("data")))
            .await
            .unwrap();
        let input = tmp.path().join("note.txt");
        std::fs::write(&input, b"hello").unwrap();

        let controller = engine.controller();
        let response =
            put_file(&controller, PolicyKind::SensitivityPlacement, "note", &input).await;
        assert!(response.success, "{}", response.message);
        let stored = tmp.path().join("data").join("cloud").join("note");
        assert_eq!(std::fs::read(stored).unwrap(), b"hello");

        let missing = tmp.path().join("missing.txt");
        let response =
            put_file(&controller, PolicyKind::SensitivityPlacement, "m", &missing).await;
        assert!(!response.success);

        engine.shutdown().await;
    }

    #[test]
    fn test_resolve_aws_config() {
        let cli = Cli::parse_from(["relocate", "--aws", "config"]);
        let config = cli.source.resolve().unwrap();
        assert!(config.region.b.uri.starts_with("s3://eu-data-bucket"));
    }
}
