mod commands;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tidemark::{LockManager, LockWait};

#[derive(Parser)]
#[command(name = "tidemark")]
#[command(about = "Schema migration runner for PostgreSQL")]
struct Cli {
    /// Database connection string
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Directory containing <timestamp>_<name>.sql migration files
    #[arg(long, default_value = "migrations", global = true)]
    dir: PathBuf,

    /// Ledger table name
    #[arg(long, default_value = tidemark::ledger::DEFAULT_TABLE, global = true)]
    table: String,

    /// Seconds to wait for the migration lock before failing
    #[arg(long, default_value_t = 30, global = true)]
    lock_timeout: u64,

    /// Block on a contended lock instead of timing out
    #[arg(long, global = true)]
    wait: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all pending migrations
    Up {
        /// Stop after the migration with this identifier
        #[arg(long = "to")]
        to: Option<String>,
    },

    /// Revert the most recently applied migrations
    Down {
        /// Number of migrations to revert
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },

    /// Show each migration's state (applied, pending, or orphaned)
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new migration file
    New {
        /// Migration name
        name: String,
    },
}

impl Cli {
    fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set (flag --database-url or environment)"))
    }

    fn lock_manager(&self) -> LockManager {
        let wait = if self.wait {
            LockWait::Block
        } else {
            LockWait::Timeout(Duration::from_secs(self.lock_timeout))
        };
        LockManager::new("tidemark").with_wait(wait)
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Up { to } => {
            let runner = commands::build_runner(cli).await?;
            commands::migrate::up(&runner, to.clone()).await
        }
        Commands::Down { steps } => {
            let runner = commands::build_runner(cli).await?;
            commands::migrate::down(&runner, *steps).await
        }
        Commands::Status { json } => {
            let runner = commands::build_runner(cli).await?;
            commands::migrate::status(&runner, *json).await
        }
        Commands::New { name } => commands::migrate::create(&cli.dir, name),
    }
}
