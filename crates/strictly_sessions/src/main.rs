//! Strictly Sessions - terminal front end
//!
//! Drives the session controller from the command line so two terminals
//! sharing a SQLite store can play the same game.

#![warn(missing_docs)]

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use strictly_sessions::{
    FileIdentity, IdentityProvider, JoinOutcome, Session, SessionController, SessionError,
    SessionId, SessionStatus, SessionsConfig, format_session_id, player_mark,
};
use strictly_tictactoe::winning_line;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let identity = FileIdentity::load_or_create(config.identity_path())?;
    let store = config.open_store()?;
    let controller = SessionController::new(store);
    let me = identity.player_id().clone();

    info!(player_id = %me, "Starting strictly_sessions");

    match cli.command {
        Command::Create => {
            let id = controller.create_session(&me).await?;
            println!("Created session {} (share code {})", id, format_session_id(&id));
        }
        Command::Solo => {
            let id = controller.create_solo_session(&me).await?;
            println!("Created solo session {}", id);
        }
        Command::Join { id } => {
            let id = SessionId::new(id);
            match controller.join_session(&id, &me).await? {
                JoinOutcome::Joined => println!("Joined session {} as O", id),
                JoinOutcome::Rejoined => println!("Already playing in session {}", id),
            }
            render(&controller.fetch_session(&id).await?, &identity);
        }
        Command::Move { id, cell } => {
            let id = SessionId::new(id);
            let snapshot = controller.fetch_session(&id).await?;
            let session = controller
                .apply_move(&id, &snapshot, &me, usize::from(cell - 1))
                .await?;
            render(&session, &identity);
        }
        Command::Restart { id } => {
            let id = SessionId::new(id);
            controller.restart_session(&id).await?;
            render(&controller.fetch_session(&id).await?, &identity);
        }
        Command::Show { id } => {
            let session = controller.fetch_session(&SessionId::new(id)).await?;
            render(&session, &identity);
        }
        Command::Watch { id } => watch(&controller, SessionId::new(id), identity).await?,
        Command::Open { limit } => {
            let limit = limit.unwrap_or(*config.open_sessions_limit());
            let sessions = controller.list_open_sessions(limit).await;
            if sessions.is_empty() {
                println!("No open sessions");
            }
            for session in sessions {
                println!(
                    "{}  created {}",
                    format_session_id(session.id()),
                    session.created_at().format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::Whoami => {
            println!("{} ({})", identity.display_name(), identity.player_id());
        }
    }

    Ok(())
}

/// Reads the config file if present, then applies environment overrides.
fn load_config(cli: &Cli) -> Result<SessionsConfig> {
    let config = if cli.config.exists() {
        SessionsConfig::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        debug!(path = %cli.config.display(), "No config file; using defaults");
        SessionsConfig::default()
    };
    Ok(config.with_env_overrides())
}

/// Follows a session until Ctrl-C.
async fn watch(controller: &SessionController, id: SessionId, identity: FileIdentity) -> Result<()> {
    let handle = controller
        .subscribe_session(
            &id,
            move |session| render(&session, &identity),
            |err: SessionError| eprintln!("{}", err),
        )
        .await?;

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    handle.cancel();
    Ok(())
}

/// Prints the board, status line and the viewer's seat.
fn render(session: &Session, viewer: &dyn IdentityProvider) {
    println!("\nSession {}", format_session_id(session.id()));
    println!("{}", session.board().display());

    let status = match session.status() {
        SessionStatus::Waiting => "Waiting for an opponent".to_string(),
        SessionStatus::InProgress => format!("{} to move", session.current_turn()),
        SessionStatus::Finished => match session.winner() {
            Some(mark) => {
                let line = winning_line(session.board())
                    .map(|l| format!(" ({})", l.map(|p| (p.to_index() + 1).to_string()).join("-")))
                    .unwrap_or_default();
                format!("{} wins{}", mark, line)
            }
            None => "Draw".to_string(),
        },
    };
    println!("{}", status);

    match player_mark(session, viewer.player_id()) {
        Some(_) if *session.is_solo() => println!("You play both marks"),
        Some(mark) => println!("You are {}", mark),
        None => println!("You are watching"),
    }
}
