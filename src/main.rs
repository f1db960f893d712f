//! permd - permission administration CLI

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use permd::commands::{AdminCommand, ParseError};
use permd::{Config, Engine};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Administer a permission database
#[derive(Parser, Debug)]
#[command(name = "permd", version, about = "Administer a permission database")]
struct Args {
    /// Config file (defaults to ./permd.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file, overriding the config
    #[arg(short, long)]
    database: Option<String>,

    /// Print command output as JSON
    #[arg(long)]
    json: bool,

    /// Command words, e.g. `group admin addparent mod`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter.as_str().into());
    let registry = tracing_subscriber::registry().with(filter);
    // Logs go to stderr; stdout carries command output
    if config.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(database) = args.database {
        config.db_path = Some(database);
    }
    init_tracing(&config);

    let command = match AdminCommand::parse(args.command.as_slice()) {
        Ok(command) => command,
        Err(ParseError::Usage(topic)) => {
            eprintln!("{}", topic);
            return Ok(ExitCode::from(2));
        }
        Err(ParseError::Invalid(err)) => {
            eprintln!("{}", err);
            return Ok(ExitCode::from(2));
        }
    };

    let engine = Engine::open(config).await?;
    let output = engine.execute(command).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for line in &output.lines {
            println!("{}", line);
        }
    }

    Ok(if output.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
