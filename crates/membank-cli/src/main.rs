//! Memory Bank CLI
//!
//! The `membank` command exposes the memory tools from a terminal or to a
//! parent process over stdio.
//!
//! ## Commands
//!
//! - `serve`: answer line-delimited JSON tool requests on stdin
//! - `call`: run a single tool and print its response
//! - `session`: show or create the saved session id
//! - `health`: print server health
//! - `tools`: list tool names

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn, Level};

use membank_core::{
    MemoryBank, RequestContext, SessionFile, Settings, ToolRouter, METRICS, TOOL_NAMES,
};

#[derive(Parser)]
#[command(name = "membank")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Short-term and shared memory for multi-agent assistants", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve tool requests: one JSON object per stdin line, one response per stdout line
    Serve {
        /// Per-request deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Run one tool and print the JSON response
    Call {
        /// Tool name (e.g. "spaces.list")
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Manage the saved session id
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Print server name, version and engine status
    Health,

    /// List available tool names
    Tools,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Print the saved session id, if any
    Show,
    /// Generate and save a new session id
    Init,
    /// Print the saved session id, creating one if none exists
    Ensure,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    membank_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Session { action } => {
            let file = SessionFile::default_location().context("Cannot locate home directory")?;
            cmd_session(&file, action)
        }
        Commands::Tools => {
            for name in TOOL_NAMES {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Serve { timeout_ms } => {
            let router = build_router().await?;
            cmd_serve(&router, timeout_ms.map(Duration::from_millis)).await
        }
        Commands::Call { tool, args } => {
            let router = build_router().await?;
            cmd_call(&router, &tool, &args).await
        }
        Commands::Health => {
            let router = build_router().await?;
            cmd_call(&router, "health", "{}").await
        }
    }
}

async fn build_router() -> Result<ToolRouter> {
    let settings = Settings::load().context("Failed to load settings")?;
    let bank = MemoryBank::from_settings(settings)
        .await
        .context("Failed to initialise memory bank")?;

    let router = ToolRouter::new(Arc::new(bank));
    Ok(match SessionFile::default_location() {
        Ok(file) => router.with_session_file(file),
        Err(e) => {
            warn!(error = %e, "session tools disabled");
            router
        }
    })
}

fn request_context(timeout: Option<Duration>) -> RequestContext {
    match timeout {
        Some(t) => RequestContext::with_timeout(t),
        None => RequestContext::background(),
    }
}

/// Answer every non-blank line of `reader` on `writer`. Returns the number
/// of requests served.
async fn serve<R, W>(
    router: &ToolRouter,
    reader: R,
    mut writer: W,
    timeout: Option<Duration>,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut served = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read request")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let response = router.call_line(&request_context(timeout), &line).await;
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer
            .write_all(&out)
            .await
            .context("Failed to write response")?;
        writer.flush().await?;
        served += 1;
    }

    Ok(served)
}

async fn cmd_serve(router: &ToolRouter, timeout: Option<Duration>) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let served = serve(router, stdin, tokio::io::stdout(), timeout).await?;
    info!(requests = served, "stdin closed, shutting down");
    METRICS.flush();
    Ok(())
}

async fn cmd_call(router: &ToolRouter, tool: &str, args: &str) -> Result<()> {
    let args: Value = serde_json::from_str(args).context("--args must be valid JSON")?;
    let response = router
        .call(&RequestContext::background(), tool, args)
        .await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if response["ok"] != Value::Bool(true) {
        anyhow::bail!("tool '{tool}' failed");
    }
    Ok(())
}

fn cmd_session(file: &SessionFile, action: SessionAction) -> Result<()> {
    match action {
        SessionAction::Show => match file.load()? {
            Some(id) => println!("{id}"),
            None => println!("No saved session. Run 'membank session init' first."),
        },
        SessionAction::Init => {
            let id = membank_core::new_session_id();
            file.save(&id)?;
            println!("{id}");
        }
        SessionAction::Ensure => {
            let (id, created) = file.get_or_create()?;
            if created {
                info!(path = %file.path().display(), "created new session");
            }
            println!("{id}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn router() -> ToolRouter {
        ToolRouter::new(Arc::new(MemoryBank::new(Settings::default(), None)))
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_call_with_args() {
        let cli = Cli::try_parse_from([
            "membank",
            "--json",
            "call",
            "spaces.list",
            "--args",
            r#"{"principal":"alice"}"#,
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Call { tool, args } => {
                assert_eq!(tool, "spaces.list");
                assert!(args.contains("alice"));
            }
            _ => panic!("expected call"),
        }
    }

    #[tokio::test]
    async fn serve_answers_one_line_per_request() {
        let input = concat!(
            r#"{"tool":"spaces.upsert","args":{"name":"team","acl":{"alice":"writer"}}}"#,
            "\n\n",
            r#"{"tool":"spaces.list","args":{"principal":"alice"}}"#,
            "\n",
            "not json\n",
        );
        let mut output = Vec::new();
        let served = serve(&router(), input.as_bytes(), &mut output, None)
            .await
            .unwrap();
        assert_eq!(served, 3);

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["ok"], true);
        assert_eq!(lines[1]["spaces"], serde_json::json!(["team"]));
        assert_eq!(lines[2]["ok"], false);
        assert_eq!(lines[2]["error"]["kind"], "validation");
    }

    #[tokio::test]
    async fn call_fails_on_error_envelope() {
        let router = router();
        assert!(cmd_call(&router, "health", "{}").await.is_ok());
        assert!(cmd_call(&router, "nope", "{}").await.is_err());
        assert!(cmd_call(&router, "health", "{broken").await.is_err());
    }

    #[test]
    fn session_commands_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = SessionFile::at(dir.path().join("session_id"));
        cmd_session(&file, SessionAction::Show).unwrap();
        cmd_session(&file, SessionAction::Ensure).unwrap();
        let first = file.load().unwrap().unwrap();
        cmd_session(&file, SessionAction::Ensure).unwrap();
        assert_eq!(file.load().unwrap().unwrap(), first);
        cmd_session(&file, SessionAction::Init).unwrap();
        assert_ne!(file.load().unwrap().unwrap(), first);
    }
}
