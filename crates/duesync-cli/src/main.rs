use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod common;

#[derive(Parser)]
#[command(name = "duesync", version, about = "Duesync CLI")]
struct Cli {
    /// Owner (guardian account) id.
    #[arg(long, global = true, default_value_t = 1)]
    owner: i64,
    /// Student id the work items belong to.
    #[arg(long, global = true, default_value_t = 1)]
    student: i64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calendar account connections
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// Run calendar synchronization
    Sync {
        #[command(subcommand)]
        action: commands::sync::SyncAction,
    },
    /// Sync settings management
    Settings {
        #[command(subcommand)]
        action: commands::settings::SettingsAction,
    },
    /// Connection and settings overview
    Status,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let pair = common::Pair {
        owner_id: cli.owner,
        student_id: cli.student,
    };
    let result = match cli.command {
        Commands::Auth { action } => commands::auth::run(pair, action).await,
        Commands::Sync { action } => commands::sync::run(pair, action).await,
        Commands::Settings { action } => commands::settings::run(pair, action).await,
        Commands::Status => commands::status::run(pair).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
