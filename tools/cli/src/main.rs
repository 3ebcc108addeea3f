//! vsync CLI - one-way secret synchronization between vault servers.
//!
//! Reads a subtree of secrets from a source server, writes what differs to
//! a destination server, and optionally removes destination secrets the
//! source no longer has.

mod commands;
mod config;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{AppConfig, GlobalArgs};

#[derive(Parser, Debug)]
#[command(name = "vsync")]
#[command(about = "vsync - one-way vault secrets sync")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the children of a folder (default: the entrypoint).
    #[command(alias = "ls")]
    List {
        path: Option<String>,

        /// Run against the destination vault.
        #[arg(short = 'd', long)]
        destination_vault: bool,
    },

    /// Read a single secret.
    #[command(alias = "rs")]
    ReadSecret {
        path: String,

        /// Run against the destination vault.
        #[arg(short = 'd', long)]
        destination_vault: bool,
    },

    /// Write a secret from key=value pairs. Overwrites, does not merge.
    #[command(alias = "ws")]
    WriteSecret {
        path: String,

        /// Comma-separated pairs: key=value[,key=value]
        data: String,

        /// Run against the destination vault.
        #[arg(short = 'd', long)]
        destination_vault: bool,
    },

    /// Sync a single secret from source to destination.
    #[command(alias = "ss")]
    SyncSecret { path: String },

    /// Sync every secret under the entrypoint to the destination.
    #[command(alias = "s")]
    SyncSecrets {
        /// Remove orphans in the destination vault after the sync.
        #[arg(long)]
        remove_orphans: bool,
    },

    /// Dump every secret under the entrypoint as JSON.
    #[command(alias = "ds")]
    DumpSecrets {
        /// Run against the destination vault.
        #[arg(short = 'd', long)]
        destination_vault: bool,
    },

    /// Remove destination secrets that no longer exist on the source.
    #[command(alias = "ro")]
    RemoveOrphans,

    /// List the mounts of a vault server.
    #[command(alias = "lm")]
    ListMounts {
        /// Run against the destination vault.
        #[arg(short = 'd', long)]
        destination_vault: bool,
    },

    /// Show the health status of a vault server.
    #[command(alias = "hc")]
    Health {
        /// Run against the destination vault.
        #[arg(short = 'd', long)]
        destination_vault: bool,
    },

    /// Make a raw request, e.g. `request GET /sys/health`.
    #[command(alias = "req")]
    Request {
        method: String,
        uri: String,

        /// JSON request body.
        #[arg(long)]
        body: Option<String>,

        /// Run against the destination vault.
        #[arg(short = 'd', long)]
        destination_vault: bool,
    },

    /// Show the effective configuration with secrets masked.
    #[command(alias = "sc")]
    ShowConfig,

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.global.log_level)?;

    let app = AppConfig::from_args(&cli.global);
    debug!(config = %app.masked(), "Configuration loaded");

    match cli.command {
        Commands::List {
            path,
            destination_vault,
        } => commands::list(&app, path.as_deref(), destination_vault).await,

        Commands::ReadSecret {
            path,
            destination_vault,
        } => commands::read_secret(&app, &path, destination_vault).await,

        Commands::WriteSecret {
            path,
            data,
            destination_vault,
        } => commands::write_secret(&app, &path, &data, destination_vault).await,

        Commands::SyncSecret { path } => commands::sync_secret(&app, &path).await,

        Commands::SyncSecrets { remove_orphans } => {
            commands::sync_secrets(&app, remove_orphans).await
        }

        Commands::DumpSecrets { destination_vault } => {
            commands::dump_secrets(&app, destination_vault).await
        }

        Commands::RemoveOrphans => commands::remove_orphans(&app).await,

        Commands::ListMounts { destination_vault } => {
            commands::list_mounts(&app, destination_vault).await
        }

        Commands::Health { destination_vault } => commands::health(&app, destination_vault).await,

        Commands::Request {
            method,
            uri,
            body,
            destination_vault,
        } => commands::request(&app, &method, &uri, body.as_deref(), destination_vault).await,

        Commands::ShowConfig => commands::show_config(&app),

        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "vsync", &mut std::io::stdout());
            Ok(())
        }
    }
}
