//! permd_init - One-time database initialization tool
//!
//! Creates a fresh permission database with `default` and `admin` groups.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// permd database initialization tool
#[derive(Parser, Debug)]
#[command(
    name = "permd_init",
    version,
    about = "Initialize a new permission database"
)]
struct Args {
    /// Path to SQLite database file to create (must not exist)
    #[arg(short, long)]
    database: PathBuf,

    /// Identity to place in the admin group
    #[arg(long)]
    admin: Option<Uuid>,

    /// Default permission node (can be specified multiple times)
    #[arg(long = "default-perm", allow_hyphen_values = true)]
    default_perms: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "permd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    permd::init::init_database(&args.database, args.admin, &args.default_perms).await?;

    Ok(())
}
