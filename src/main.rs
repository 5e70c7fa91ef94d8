mod commands;
mod db;
mod error;
mod models;
mod services;
mod utils;

#[cfg(test)]
mod test_support;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::services::auth::SessionVault;
use crate::services::settings::load_settings;
use crate::services::state::AppState;

#[derive(Parser)]
#[command(name = "ledgerdrop", version, about = "Send receipts and images to processing workflows")]
struct Cli {
    /// Where the local database lives.
    #[arg(long, env = "LEDGERDROP_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload receipts or resize images
    #[command(subcommand)]
    Upload(UploadCommand),
    /// Browse and manage saved receipts
    #[command(subcommand)]
    Receipts(ReceiptsCommand),
    #[command(subcommand)]
    Account(AccountCommand),
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum UploadCommand {
    /// Files or directories of PDF, PNG, JPG, or JPEG documents
    Receipt {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    Resize {
        file: PathBuf,
        #[arg(long)]
        preset: String,
        #[arg(long)]
        format: String,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum ReceiptsCommand {
    List,
    Show { id: String },
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    Browse,
    /// Open the stored document link
    Open { id: String },
}

#[derive(Subcommand)]
enum AccountCommand {
    SignIn {
        /// ID token issued by the federated provider
        #[arg(long)]
        id_token: String,
        #[arg(long, default_value = "google")]
        provider: String,
    },
    SignOut,
    Status,
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let outcome = match open_database(cli.data_dir) {
        Ok(db) => dispatch(db, cli.command).await,
        Err(err) => Err(err.to_string()),
    };
    if let Err(message) = outcome {
        eprintln!("{}", message);
        std::process::exit(1);
    }
}

fn open_database(data_dir: Option<PathBuf>) -> Result<db::Database> {
    let data_dir = match data_dir {
        Some(dir) => dir,
        None => std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".ledgerdrop"))
            .ok_or_else(|| anyhow!("Cannot find a home directory; pass --data-dir"))?,
    };
    std::fs::create_dir_all(&data_dir)?;
    debug!(path = %data_dir.display(), "using data directory");
    Ok(db::Database::new(data_dir.join("ledgerdrop.sqlite"))?)
}

async fn open_state(db: db::Database) -> Result<AppState> {
    let settings = load_settings(&db)?;
    let db = Arc::new(Mutex::new(db));
    let vault = SessionVault::new(db.clone(), true);

    let state = AppState::new(db, settings, vault);
    state.restore().await?;
    Ok(state)
}

/// Configuration runs against the database alone so a half-finished setup can still be completed.
async fn dispatch(db: db::Database, command: Command) -> Result<(), String> {
    match command {
        Command::Config(ConfigCommand::Show) => commands::settings::show_settings(&db),
        Command::Config(ConfigCommand::Set { key, value }) => {
            commands::settings::set_setting(&db, &key, &value)
        }
        command => {
            let state = open_state(db).await.map_err(|e| e.to_string())?;
            run(&state, command).await
        }
    }
}

async fn run(state: &AppState, command: Command) -> Result<(), String> {
    match command {
        Command::Upload(UploadCommand::Receipt { paths }) => {
            commands::upload::upload_receipts(state, &paths).await
        }
        Command::Upload(UploadCommand::Resize {
            file,
            preset,
            format,
            out_dir,
        }) => commands::upload::resize_image(state, &file, &preset, &format, &out_dir).await,
        Command::Receipts(ReceiptsCommand::List) => commands::receipts::list_receipts(state).await,
        Command::Receipts(ReceiptsCommand::Show { id }) => {
            commands::receipts::show_receipt(state, &id).await
        }
        Command::Receipts(ReceiptsCommand::Delete { id, yes }) => {
            commands::receipts::delete_receipt(state, &id, yes).await
        }
        Command::Receipts(ReceiptsCommand::Browse) => {
            commands::receipts::browse_receipts(state).await
        }
        Command::Receipts(ReceiptsCommand::Open { id }) => {
            commands::receipts::open_receipt(state, &id).await
        }
        Command::Account(AccountCommand::SignIn { id_token, provider }) => {
            commands::account::sign_in(state, &provider, &id_token).await
        }
        Command::Account(AccountCommand::SignOut) => commands::account::sign_out(state).await,
        Command::Account(AccountCommand::Status) => commands::account::status(state).await,
        Command::Config(_) => Err("Configuration commands do not need a session".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_nested_subcommands() {
        let cli = Cli::try_parse_from([
            "ledgerdrop",
            "upload",
            "resize",
            "photo.jpg",
            "--preset",
            "story",
            "--format",
            "png",
        ])
        .unwrap();
        match cli.command {
            Command::Upload(UploadCommand::Resize { preset, out_dir, .. }) => {
                assert_eq!(preset, "story");
                assert_eq!(out_dir, PathBuf::from("."));
            }
            _ => panic!("wrong command"),
        }
    }

    #[tokio::test]
    async fn hosted_setup_can_be_finished_in_two_steps() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = Some(dir.path().to_path_buf());

        let db = open_database(data_dir.clone()).unwrap();
        commands::settings::set_setting(&db, "hosted_url", "https://proj.example.co").unwrap();
        drop(db);

        let state = open_state(open_database(data_dir.clone()).unwrap()).await.unwrap();
        assert!(state.receipt_store().is_err());
        drop(state);

        let db = open_database(data_dir.clone()).unwrap();
        commands::settings::set_setting(&db, "receipts_table", "expenses").unwrap();
        db.set_setting("hosted_anon_key", "anon").unwrap();
        drop(db);

        let state = open_state(open_database(data_dir).unwrap()).await.unwrap();
        assert_eq!(state.settings.storage_backend, models::StorageBackend::Hosted);
        assert!(state.receipt_store().is_ok());
        assert!(state.profile_store().is_ok());
    }

    #[test]
    fn sign_in_defaults_to_google() {
        let cli = Cli::try_parse_from(["ledgerdrop", "account", "sign-in", "--id-token", "t"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Account(AccountCommand::SignIn { ref provider, .. }) if provider == "google"
        ));
    }
}
