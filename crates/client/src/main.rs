// notesyncd: keeps one note replica live against the sync server.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use notesync_client::config::ClientConfig;
use notesync_client::credential::{self, CredentialSource, KeychainCredentials, StaticCredentials};
use notesync_common::types::NoteId;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "notesyncd", about = "Real-time collaborative note synchronizer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a note and keep it synchronized until Ctrl-C
    Open {
        note_id: NoteId,
        /// Title to seed when the note has never been saved
        #[arg(long)]
        title: Option<String>,
        /// Bearer token to use instead of the stored one
        #[arg(long)]
        token: Option<String>,
    },
    /// Manage the stored bearer token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Store a bearer token in the OS keychain
    Set { value: String },
    /// Remove the stored bearer token
    Clear,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ClientConfig::load().context("failed to load client configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Open { note_id, title, token } => {
            let credentials: Arc<dyn CredentialSource> = match token {
                Some(token) => Arc::new(StaticCredentials::new(token)),
                None => Arc::new(KeychainCredentials::new()),
            };
            info!(%note_id, api = %config.api_base_url, ws = %config.ws_base_url, "opening note");
            notesync_client::runtime::run_note(&config, credentials, note_id, title.as_deref())
                .await
                .context("note session terminated unexpectedly")
        }
        Command::Token { action: TokenAction::Set { value } } => {
            credential::store_token(&value)?;
            println!("token stored");
            Ok(())
        }
        Command::Token { action: TokenAction::Clear } => {
            credential::clear_token()?;
            println!("token cleared");
            Ok(())
        }
    }
}
