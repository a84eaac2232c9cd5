//! PixlMe TV - terminal driver for sign-in, pairing, and live push updates.

mod app;
mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tv_config_and_utils::{init_logging, Config, Paths};

/// PixlMe TV command-line interface.
#[derive(Parser)]
#[command(name = "pixlme-tv")]
#[command(about = "PixlMe TV session and live-update client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, credentials, and logs. Defaults to ~/.pixlme-tv
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Skip device registration after signing in
        #[arg(long)]
        no_register: bool,
    },
    /// Pair this TV with the code shown on screen
    Pair {
        #[arg(long)]
        code: String,
        /// Skip device registration after pairing
        #[arg(long)]
        no_register: bool,
    },
    /// Sign out and clear stored credentials
    Logout,
    /// Show session status
    Status,
    /// Follow push updates, printing one JSON line per event until Ctrl-C
    Watch,
    /// List the signed-in user's collections
    Collections,
    /// Print the media links of a collection
    Collection {
        id: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = http_gateway::DEFAULT_COLLECTION_LIMIT)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, &paths)?;

    let app = app::App::start(config, paths).await?;

    let result = match cli.command {
        Commands::Login {
            email,
            password,
            no_register,
        } => commands::login(&app, &email, &password, !no_register).await,
        Commands::Pair { code, no_register } => commands::pair(&app, &code, !no_register).await,
        Commands::Logout => commands::logout(&app),
        Commands::Status => commands::status(&app),
        Commands::Watch => commands::watch(&app).await,
        Commands::Collections => commands::collections(&app).await,
        Commands::Collection { id, page, limit } => {
            commands::collection(&app, &id, page, limit).await
        }
    };

    app.shutdown();
    result
}
