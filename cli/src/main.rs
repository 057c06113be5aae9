use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use docsync_core::controller::{Controller, HttpClientFactory};
use docsync_core::pending_queue::PendingQuery;
use docsync_core::store::StateStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "docsync", version = VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bind a local folder to a remote server.
    Bind {
        local_folder: PathBuf,
        server_url: String,
        username: String,
        password: String,
    },
    /// Unbind a previously bound local folder.
    Unbind { local_folder: PathBuf },
    /// Show the current proxy configuration.
    ProxyShow,
    /// List pairs awaiting synchronization.
    Pending {
        #[arg(long)]
        local_folder: Option<PathBuf>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Write the stop marker for a co-located sync worker.
    Stop,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config_folder = docsync_core::config::config_dir();
    std::fs::create_dir_all(&config_folder)?;
    let store = Arc::new(StateStore::open(&config_folder.join("state.db3"))?);
    let controller = Controller::new(store, config_folder, Arc::new(HttpClientFactory::new()));

    match cli.command {
        Command::Bind {
            local_folder,
            server_url,
            username,
            password,
        } => {
            let binding = controller.bind_server(&local_folder, &server_url, &username, Some(&password), None)?;
            info!(folder = %binding.local_folder, server = %binding.server_url, "bound");
        }
        Command::Unbind { local_folder } => {
            let folder = local_folder.to_string_lossy().to_string();
            controller.unbind_server(&folder)?;
            info!(%folder, "unbound");
        }
        Command::ProxyShow => {
            let resolved = controller.get_proxy_settings()?;
            println!("{resolved:#?}");
        }
        Command::Pending { local_folder, limit } => {
            let query = PendingQuery {
                local_folder: local_folder.map(|p| p.to_string_lossy().to_string()),
                ignore_in_error: None,
                limit,
            };
            for state in controller.list_pending(&query)? {
                println!(
                    "{:?} {} -> {}",
                    state.pair_state(),
                    state.local_path.unwrap_or_default(),
                    state.remote_ref.unwrap_or_default()
                );
            }
        }
        Command::Stop => {
            controller.stop()?;
            info!("stop marker written");
        }
    }

    controller.dispose();
    Ok(())
}
