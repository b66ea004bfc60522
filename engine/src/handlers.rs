//! Command handlers for CLI operations
//!
//! - run: send a message and stream the agent's answer
//! - repl: chat turn by turn in one session
//! - sessions, history, stats: inspect stored sessions
//! - rename, clear, delete: manage stored sessions
//! - config: show, locate or initialize the configuration file

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentProfile, EngineContext, Orchestrator, RunEvent, RunOutcome};
use crate::approval::{ApprovalPrompter, DenyAllPrompter, TerminalPrompter};
use crate::cli::ConfigAction;
use crate::config::Config;
use crate::history::{SessionStats, SessionStore};
use crate::llm::{GenerationProvider, OllamaProvider, RetryingProvider};
use crate::record::{CallStatus, Message, Part, Session};
use crate::storage::FileStorage;
use crate::tools::CapabilityRegistry;

/// Longest session title derived from the first message
const MAX_TITLE_CHARS: usize = 60;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Options of `pilot run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub message: String,
    pub session: Option<String>,
    pub agent: String,
    pub auto_approve: bool,
    pub max_iterations: Option<usize>,
    pub non_interactive: bool,
    pub directory: Option<PathBuf>,
}

fn engine_context(config: &Config) -> EngineContext {
    let storage = Arc::new(FileStorage::new(config.storage_dir()));
    EngineContext::new(storage, config.to_run_config(), config.context_limits())
}

fn build_provider(config: &Config) -> Result<Arc<dyn GenerationProvider>> {
    match config.model.provider.as_str() {
        "ollama" => {
            let ollama = OllamaProvider::new(config.model.base_url.clone(), config.model_timeout());
            Ok(Arc::new(RetryingProvider::new(ollama, config.retry_policy())))
        }
        other => bail!("Unsupported provider '{}'", other),
    }
}

fn session_title(message: &str) -> String {
    let line = message.lines().next().unwrap_or_default().trim();
    match line.char_indices().nth(MAX_TITLE_CHARS) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}

/// Engine context with the command-line overrides applied
fn run_context(
    config: &Config,
    auto_approve: bool,
    max_iterations: Option<usize>,
) -> Result<EngineContext> {
    let mut ctx = engine_context(config);
    ctx.run.auto_approve |= auto_approve;
    if let Some(max_iterations) = max_iterations {
        if max_iterations == 0 {
            bail!("--max-iterations must be at least 1");
        }
        ctx.run.max_iterations = max_iterations;
    }
    Ok(ctx)
}

fn resolve_profile(agent: &str) -> Result<AgentProfile> {
    AgentProfile::builtin(agent).with_context(|| {
        format!(
            "Unknown agent '{}'. Available agents: {}",
            agent,
            AgentProfile::builtin_names().join(", ")
        )
    })
}

/// Open an existing session, or create one in `directory` (default: cwd)
async fn open_session(
    sessions: &SessionStore,
    config: &Config,
    session_id: Option<&str>,
    directory: Option<&Path>,
    title: String,
) -> Result<Session> {
    if let Some(id) = session_id {
        return sessions
            .find(id)
            .await
            .with_context(|| format!("Failed to open session {}", id));
    }

    let directory = match directory {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let directory = directory
        .canonicalize()
        .with_context(|| format!("Invalid directory {}", directory.display()))?;
    sessions
        .create(&config.core.project_id, directory, Some(title))
        .await
        .context("Failed to create session")
}

fn build_orchestrator(
    ctx: &EngineContext,
    config: &Config,
    session: Session,
    profile: AgentProfile,
    prompter: Arc<dyn ApprovalPrompter>,
) -> Result<Orchestrator> {
    tracing::info!("Using session {} in {}", session.id, session.directory.display());
    let registry = Arc::new(CapabilityRegistry::with_builtins(
        Some(&config.capabilities.enabled),
        config.shell_timeout(),
    ));
    Ok(Orchestrator::new(
        ctx,
        build_provider(config)?,
        registry,
        session,
        config.model.model_id.clone(),
    )
    .with_profile(profile)
    .with_prompter(prompter))
}

/// Run one turn, printing text as it streams in text mode
async fn stream_turn(
    orchestrator: &mut Orchestrator,
    message: String,
    format: OutputFormat,
    cancel: CancellationToken,
) -> (String, RunOutcome) {
    let mut text = String::new();
    let mut outcome = RunOutcome::Failed("run ended without an outcome".to_string());
    let mut events = orchestrator.run(message, cancel);
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            RunEvent::Text(chunk) => {
                if format == OutputFormat::Text {
                    print!("{}", chunk);
                    stdout.flush().ok();
                }
                text.push_str(&chunk);
            }
            RunEvent::Finished(finished) => outcome = finished,
        }
    }
    (text, outcome)
}

fn report_turn(
    orchestrator: &Orchestrator,
    text: &str,
    outcome: &RunOutcome,
    format: OutputFormat,
) -> Result<()> {
    let session_id = &orchestrator.session().id;
    match format {
        OutputFormat::Text => {
            if !text.ends_with('\n') {
                println!();
            }
            eprintln!("[session {}] {}", session_id, outcome);
        }
        OutputFormat::Json => {
            let output = json!({
                "session_id": session_id,
                "outcome": outcome.to_string(),
                "iterations": orchestrator.iteration_count(),
                "text": text,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Send a message to the agent
///
/// Streams text to stdout as it arrives (or prints one JSON object at the
/// end) and returns how the run ended.
pub async fn handle_run(
    options: RunOptions,
    config: &Config,
    format: OutputFormat,
    cancel: CancellationToken,
) -> Result<RunOutcome> {
    let ctx = run_context(config, options.auto_approve, options.max_iterations)?;
    let profile = resolve_profile(&options.agent)?;
    let session = open_session(
        &ctx.sessions(),
        config,
        options.session.as_deref(),
        options.directory.as_deref(),
        session_title(&options.message),
    )
    .await?;

    let prompter: Arc<dyn ApprovalPrompter> = if options.non_interactive {
        Arc::new(DenyAllPrompter)
    } else {
        Arc::new(TerminalPrompter)
    };
    let mut orchestrator = build_orchestrator(&ctx, config, session, profile, prompter)?;

    let (text, outcome) = stream_turn(&mut orchestrator, options.message, format, cancel).await;
    report_turn(&orchestrator, &text, &outcome, format)?;
    Ok(outcome)
}

/// Options of `pilot repl`
#[derive(Debug, Clone)]
pub struct ReplOptions {
    pub session: Option<String>,
    pub resume: bool,
    pub agent: String,
    pub auto_approve: bool,
    pub max_iterations: Option<usize>,
    pub directory: Option<PathBuf>,
}

/// A line typed at the REPL prompt
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplInput {
    Empty,
    Exit,
    Help,
    Clear,
    Stats,
    Unknown(String),
    Message(String),
}

impl ReplInput {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "" => Self::Empty,
            "/exit" | "/quit" => Self::Exit,
            "/help" => Self::Help,
            "/clear" => Self::Clear,
            "/stats" => Self::Stats,
            _ if line.starts_with('/') => Self::Unknown(line.to_string()),
            _ => Self::Message(line.to_string()),
        }
    }
}

const REPL_HELP: &str = "\
Commands:
  /stats   show message counts of this session
  /clear   delete the messages of this session
  /help    show this help
  /exit    leave (Ctrl-D works too)
Ctrl-C cancels the running turn.";

async fn read_prompt_line() -> Result<Option<String>> {
    eprint!("> ");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    let read = BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read from stdin")?;
    Ok((read > 0).then_some(line))
}

/// Chat with the agent in one session until `/exit` or end of input
///
/// A new session is created on the first message and titled after it.
pub async fn handle_repl(options: ReplOptions, config: &Config, format: OutputFormat) -> Result<()> {
    let ctx = run_context(config, options.auto_approve, options.max_iterations)?;
    let profile = resolve_profile(&options.agent)?;
    let sessions = ctx.sessions();

    let existing = if options.resume {
        sessions
            .recent(Some(&config.core.project_id))
            .await
            .context("Failed to look up the latest session")?
    } else if let Some(id) = &options.session {
        Some(open_session(&sessions, config, Some(id), None, String::new()).await?)
    } else {
        None
    };

    let mut orchestrator = match existing {
        Some(session) => {
            eprintln!("[session {}] {}", session.id, session.title);
            Some(build_orchestrator(
                &ctx,
                config,
                session,
                profile.clone(),
                Arc::new(TerminalPrompter),
            )?)
        }
        None => None,
    };
    eprintln!("Type /help for commands.");

    while let Some(line) = read_prompt_line().await? {
        match ReplInput::parse(&line) {
            ReplInput::Empty => {}
            ReplInput::Exit => break,
            ReplInput::Help => eprintln!("{}", REPL_HELP),
            ReplInput::Unknown(command) => eprintln!("Unknown command {} (try /help)", command),
            ReplInput::Clear | ReplInput::Stats if orchestrator.is_none() => {
                eprintln!("No session yet; send a message first");
            }
            ReplInput::Clear => {
                if let Some(orchestrator) = &orchestrator {
                    let session = orchestrator.session();
                    ctx.history(&session.project_id)
                        .clear(&session.id)
                        .await
                        .context("Failed to clear session")?;
                    eprintln!("Cleared the messages of session {}", session.id);
                }
            }
            ReplInput::Stats => {
                if let Some(orchestrator) = &orchestrator {
                    let session = orchestrator.session();
                    let stats = sessions
                        .stats(&session.project_id, &session.id)
                        .await
                        .context("Failed to read session stats")?;
                    print_stats(&stats, format)?;
                }
            }
            ReplInput::Message(message) => {
                if orchestrator.is_none() {
                    let session = open_session(
                        &sessions,
                        config,
                        None,
                        options.directory.as_deref(),
                        session_title(&message),
                    )
                    .await?;
                    eprintln!("[session {}] created", session.id);
                    orchestrator = Some(build_orchestrator(
                        &ctx,
                        config,
                        session,
                        profile.clone(),
                        Arc::new(TerminalPrompter),
                    )?);
                }
                let Some(active) = orchestrator.as_mut() else {
                    continue;
                };

                let turn = CancellationToken::new();
                let on_interrupt = turn.clone();
                let watcher = tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        on_interrupt.cancel();
                    }
                });
                let (text, outcome) = stream_turn(active, message, format, turn).await;
                watcher.abort();
                report_turn(active, &text, &outcome, format)?;
            }
        }
    }

    Ok(())
}

/// List sessions, newest first
pub async fn handle_sessions(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let store = engine_context(config).sessions();
    let mut sessions = store
        .list(Some(&config.core.project_id))
        .await
        .context("Failed to list sessions")?;
    sessions.truncate(limit);

    match format {
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No sessions");
                return Ok(());
            }

            println!("Sessions (last {}):", limit);
            println!();
            for session in &sessions {
                print_session(session);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "sessions": sessions,
                "count": sessions.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn print_session(session: &Session) {
    println!("Session ID: {}", session.id);
    println!("  Title: {}", session.title);
    println!("  Directory: {}", session.directory.display());
    println!("  Created: {}", format_time(session.time_created));
    println!("  Updated: {}", format_time(session.time_updated));
    if session.is_archived() {
        println!("  Archived");
    }
    println!();
}

/// Show the messages of a session
pub async fn handle_history(
    session_id: &str,
    limit: Option<usize>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let ctx = engine_context(config);
    let session = ctx
        .sessions()
        .find(session_id)
        .await
        .with_context(|| format!("Failed to open session {}", session_id))?;
    let messages = ctx
        .history(&session.project_id)
        .load(&session.id, limit)
        .await
        .context("Failed to load messages")?;

    match format {
        OutputFormat::Text => {
            print_session(&session);
            if messages.is_empty() {
                println!("No messages");
            }
            for message in &messages {
                print_message(message);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "session": session,
                "messages": messages,
                "count": messages.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn print_message(message: &Message) {
    println!("[{}] {} ({})", format_time(message.time_created), message.role, message.id);
    for part in &message.parts {
        match part {
            Part::Text(t) if !t.ignored => println!("  {}", t.text.replace('\n', "\n  ")),
            Part::Tool(call) => {
                let marker = match call.state.status {
                    CallStatus::Success => "ok",
                    CallStatus::Error => "error",
                    CallStatus::Rejected => "rejected",
                    CallStatus::Pending | CallStatus::Running => "interrupted",
                };
                println!(
                    "  -> {}({}) [{}]",
                    call.tool,
                    call.state.input.canonical_json(),
                    marker
                );
                if let Some(error) = &call.state.error {
                    println!("     {}", error);
                }
            }
            _ => {}
        }
    }
    if let Some(error) = &message.error {
        println!("  error ({}): {}", error.kind, error.message);
    }
    println!();
}

fn print_stats(stats: &SessionStats, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("Session ID: {}", stats.session_id);
            println!("  Title: {}", stats.title);
            println!("  Project: {}", stats.project_id);
            println!("  Created: {}", format_time(stats.time_created));
            println!("  Updated: {}", format_time(stats.time_updated));
            println!("  Messages: {}", stats.message_count);
            match stats.last_message_time {
                Some(ms) => println!("  Last message: {}", format_time(ms)),
                None => println!("  Last message: none"),
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(stats)?),
    }
    Ok(())
}

/// Show message counts and timestamps of a session
pub async fn handle_stats(session_id: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let sessions = engine_context(config).sessions();
    let session = sessions
        .find(session_id)
        .await
        .with_context(|| format!("Failed to open session {}", session_id))?;
    let stats = sessions
        .stats(&session.project_id, &session.id)
        .await
        .context("Failed to read session stats")?;
    print_stats(&stats, format)
}

/// Change the title of a session
pub async fn handle_rename(
    session_id: &str,
    title: &str,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let title = title.trim();
    if title.is_empty() {
        bail!("Title must not be empty");
    }
    let sessions = engine_context(config).sessions();
    let session = sessions
        .find(session_id)
        .await
        .with_context(|| format!("Failed to open session {}", session_id))?;
    let session = sessions
        .rename(&session.project_id, &session.id, title)
        .await
        .context("Failed to rename session")?;

    match format {
        OutputFormat::Text => println!("Renamed session {} to '{}'", session.id, session.title),
        OutputFormat::Json => println!("{}", json!({ "session_id": session.id, "title": session.title })),
    }
    Ok(())
}

/// Delete every message of a session but keep the session itself
pub async fn handle_clear(session_id: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let ctx = engine_context(config);
    let session = ctx
        .sessions()
        .find(session_id)
        .await
        .with_context(|| format!("Failed to open session {}", session_id))?;
    let history = ctx.history(&session.project_id);
    let removed = history
        .message_count(&session.id)
        .await
        .context("Failed to count messages")?;
    history
        .clear(&session.id)
        .await
        .context("Failed to clear session")?;

    match format {
        OutputFormat::Text => println!("Removed {} messages from session {}", removed, session.id),
        OutputFormat::Json => println!("{}", json!({ "session_id": session.id, "removed": removed })),
    }
    Ok(())
}

/// Delete a session and its messages
pub async fn handle_delete(session_id: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let sessions = engine_context(config).sessions();
    let session = sessions
        .find(session_id)
        .await
        .with_context(|| format!("Failed to open session {}", session_id))?;
    sessions
        .delete(&session.project_id, &session.id)
        .await
        .context("Failed to delete session")?;

    match format {
        OutputFormat::Text => println!("Deleted session {}", session.id),
        OutputFormat::Json => println!("{}", json!({ "session_id": session.id, "deleted": true })),
    }
    Ok(())
}

/// Show, locate or initialize the configuration file
pub fn handle_config(
    action: &ConfigAction,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path()?,
    };

    match action {
        ConfigAction::Path => match format {
            OutputFormat::Text => println!("{}", path.display()),
            OutputFormat::Json => println!("{}", json!({ "path": path })),
        },
        ConfigAction::Show => {
            let config = Config::load_or_create_at(&path)?;
            match format {
                OutputFormat::Text => print!("{}", config.to_toml()?),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
            }
        }
        ConfigAction::Init { force } => {
            if path.exists() && !*force {
                bail!(
                    "Configuration already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save(&path)?;
            println!("Configuration written to {}", path.display());
        }
    }

    Ok(())
}
