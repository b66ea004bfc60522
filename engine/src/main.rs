// Pilot coding agent
// Main entry point for the pilot binary

use clap::Parser;
use pilot_engine::cli::{Cli, Command};
use pilot_engine::config::Config;
use pilot_engine::handlers::{
    handle_clear, handle_config, handle_delete, handle_history, handle_rename, handle_repl,
    handle_run, handle_sessions, handle_stats, OutputFormat, ReplOptions, RunOptions,
};
use pilot_engine::telemetry::init_telemetry_with_level;
use tokio_util::sync::CancellationToken;

/// Load configuration (or use custom path if provided) and start telemetry.
///
/// `--log` wins over the config file; `RUST_LOG` wins over both.
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let config = match &cli.config {
        Some(config_path) => Config::load_or_create_at(config_path)?,
        None => Config::load_or_create()?,
    };
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    tracing::debug!(
        "Pilot v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match &cli.command {
        // Config commands must work even when the file is invalid
        Command::Config { action } => {
            init_telemetry_with_level(cli.log.as_deref().unwrap_or("warn"));
            handle_config(action, cli.config.as_deref(), format)
        }

        Command::Run {
            message,
            session,
            agent,
            auto_approve,
            max_iterations,
            non_interactive,
            directory,
        } => {
            let config = load_config(&cli)?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received, cancelling run");
                    on_interrupt.cancel();
                }
            });

            let options = RunOptions {
                message: message.join(" "),
                session: session.clone(),
                agent: agent.clone(),
                auto_approve: *auto_approve,
                max_iterations: *max_iterations,
                non_interactive: *non_interactive,
                directory: directory.clone(),
            };
            let outcome = handle_run(options, &config, format, cancel).await?;
            std::process::exit(outcome.exit_code());
        }

        Command::Repl {
            session,
            resume,
            agent,
            auto_approve,
            max_iterations,
            directory,
        } => {
            let config = load_config(&cli)?;
            let options = ReplOptions {
                session: session.clone(),
                resume: *resume,
                agent: agent.clone(),
                auto_approve: *auto_approve,
                max_iterations: *max_iterations,
                directory: directory.clone(),
            };
            handle_repl(options, &config, format).await
        }

        Command::Sessions { limit } => {
            let config = load_config(&cli)?;
            handle_sessions(*limit, &config, format).await
        }

        Command::History { session_id, limit } => {
            let config = load_config(&cli)?;
            handle_history(session_id, *limit, &config, format).await
        }

        Command::Stats { session_id } => {
            let config = load_config(&cli)?;
            handle_stats(session_id, &config, format).await
        }

        Command::Rename { session_id, title } => {
            let config = load_config(&cli)?;
            handle_rename(session_id, &title.join(" "), &config, format).await
        }

        Command::Clear { session_id } => {
            let config = load_config(&cli)?;
            handle_clear(session_id, &config, format).await
        }

        Command::Delete { session_id } => {
            let config = load_config(&cli)?;
            handle_delete(session_id, &config, format).await
        }
    }
}
