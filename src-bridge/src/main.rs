mod browser;
mod commands;
mod state;

use anyhow::Context;
use clap::{Parser, Subcommand};
use state::AppState;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "cove-bridge", version, about = "Webmail bridge: notifications, local entity store and saved sessions")]
struct Args {
    /// Keep config and data under this directory instead of the platform default.
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read host messages from stdin (JSON lines) and print notifications to stdout
    Run {
        #[arg(long)]
        login: String,
    },
    /// Print the folder views of the local store, or one conversation
    Tree {
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Print the config file path and contents
    Config,
    /// Manage the saved provider session of a login
    Session {
        #[command(subcommand)]
        action: SessionCommand,
    },
}

#[derive(Subcommand)]
pub(crate) enum SessionCommand {
    /// Print the restorable client session, if any
    Show {
        #[arg(long)]
        login: String,
    },
    /// Save the current cookies together with a client session
    Save {
        #[arg(long)]
        login: String,
        #[arg(long)]
        window_name: String,
        /// Session storage item, repeatable
        #[arg(long = "item", value_parser = commands::parse_key_val)]
        items: Vec<(String, String)>,
    },
    /// Reset the browser session and restore the saved token cookies
    Apply {
        #[arg(long)]
        login: String,
    },
    /// Forget the saved session and clear the browser session
    Reset {
        #[arg(long)]
        login: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let state = AppState::initialize(args.home.as_deref())
        .await
        .context("failed to initialize bridge state")?;

    match args.command {
        Command::Run { login } => commands::run(&state, login).await,
        Command::Tree { conversation } => commands::tree(&state, conversation.as_deref()).await,
        Command::Config => commands::show_config(&state).await,
        Command::Session { action } => commands::session(&state, action).await,
    }
}
