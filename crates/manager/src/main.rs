//! Parley CLI
//!
//! Chat with a session on an agent chat server, streaming the reply to
//! stdout as it arrives.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use parley::logging::{init_logging, LogFormat};
use parley::{paths, ManagerConfig, SessionRegistry, StartOutcome};
use parley_connectors::{HttpBackend, Transport};
use parley_protocol::{Role, StopRequest, StreamState};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "parley", version, about = "Stream conversations from an agent chat server")]
struct Cli {
    /// Base URL of the chat API.
    #[arg(long, env = "PARLEY_BASE_URL", default_value = "http://127.0.0.1:8080/api")]
    base_url: String,

    /// Data directory (logs). Defaults to `PARLEY_DATA_DIR` or `~/.parley`.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a message and print the reply as it streams.
    Chat { session: String, message: String },

    /// Print a session's transcript.
    Show {
        session: String,
        /// Print the full state as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask the server to stop a running turn.
    Stop { session: String },

    /// Re-attach to a turn still running on the server.
    Resume { session: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = paths::resolve_data_dir(cli.data_dir.as_deref());
    let _logging = init_logging(&data_dir, cli.log_format)?;

    let backend = Arc::new(HttpBackend::new(&cli.base_url)?);
    let registry = SessionRegistry::new(backend.clone(), backend.clone(), ManagerConfig::from_env());

    info!(
        component = "cli",
        event = "cli.started",
        base_url = %cli.base_url,
        "Parley started"
    );

    let result = match cli.command {
        Command::Chat { session, message } => chat(&registry, &session, &message).await,
        Command::Show { session, json } => show(&registry, &session, json).await,
        Command::Stop { session } => backend
            .cancel(StopRequest {
                session_id: session,
            })
            .await
            .context("cancel request failed"),
        Command::Resume { session } => resume(&registry, &session).await,
    };

    registry.shutdown().await;
    result
}

async fn chat(registry: &SessionRegistry, session: &str, message: &str) -> Result<()> {
    registry.initialize_session(session).await?;
    if registry.is_stream_active(session) {
        bail!("session {session} is already processing a turn; use `parley resume`");
    }
    let _printer = print_deltas(registry, session);
    match registry.start_stream(session, message).await? {
        StartOutcome::Ignored => bail!("nothing to send"),
        StartOutcome::Started { .. } => follow(registry, session).await,
    }
}

async fn resume(registry: &SessionRegistry, session: &str) -> Result<()> {
    let _printer = print_deltas(registry, session);
    registry.initialize_session(session).await?;
    if !registry.is_stream_active(session) {
        if registry.config().auto_resume {
            println!("Session {session} has no running turn.");
            return Ok(());
        }
        registry.resume_stream(session).await?;
    }
    follow(registry, session).await
}

async fn show(registry: &SessionRegistry, session: &str, json: bool) -> Result<()> {
    registry.initialize_session(session).await?;
    let state = registry.get_state(session);
    if json {
        println!("{}", serde_json::to_string_pretty(state.as_ref())?);
        return Ok(());
    }
    for message in &state.messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        println!("{role}: {}", message.content);
        for call in &message.tool_calls {
            let outcome = match call.success {
                Some(true) => "ok",
                Some(false) => "failed",
                None => "pending",
            };
            println!("  [{}] {outcome}", call.name);
        }
    }
    Ok(())
}

/// Wait for the turn to finish, stopping it on Ctrl-C.
async fn follow(registry: &SessionRegistry, session: &str) -> Result<()> {
    let mut view = registry.view(session);
    let state: Arc<StreamState> = tokio::select! {
        state = view.wait_for(|s| !s.chat_state.is_busy()) => state?,
        _ = tokio::signal::ctrl_c() => {
            registry.stop_stream(session).await?;
            registry.get_state(session)
        }
    };
    println!();

    if let Some(error) = &state.error {
        bail!("stream failed: {error}");
    }
    Ok(())
}

#[derive(Default)]
struct PrintCursor {
    message_id: Option<String>,
    printed: usize,
}

/// Print assistant text to stdout as it streams in.
fn print_deltas(registry: &SessionRegistry, session: &str) -> parley::Subscription {
    let cursor = Mutex::new(PrintCursor::default());
    registry.subscribe(session, move |state| {
        let Some(message) = state.messages.last().filter(|m| m.role == Role::Assistant) else {
            return;
        };
        let mut cursor = cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if cursor.message_id.as_deref() != Some(message.id.as_str()) {
            cursor.message_id = Some(message.id.clone());
            cursor.printed = 0;
        }
        let content = &message.content;
        if content.len() > cursor.printed && content.is_char_boundary(cursor.printed) {
            let mut stdout = std::io::stdout().lock();
            let written = stdout
                .write_all(content[cursor.printed..].as_bytes())
                .and_then(|()| stdout.flush());
            if let Err(e) = written {
                debug!(
                    component = "cli",
                    event = "cli.stdout.write_failed",
                    error = %e,
                    "Failed to print streamed text"
                );
            }
            cursor.printed = content.len();
        }
    })
}
