//! farmrelay CLI - Command-line interface for the farmrelay broker
//!
//! This is the main entry point for running the relay.
//! It provides commands for serving, creating and inspecting configuration.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "farmrelay")]
#[command(author = "farmrelay Contributors")]
#[command(version)]
#[command(about = "Message relay between farm control panels and field nodes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind to
        #[arg(short, long)]
        bind: Option<IpAddr>,

        /// Number of concurrent sessions
        #[arg(short, long)]
        workers: Option<usize>,

        /// Close new connections instead of queueing them when all workers are busy
        #[arg(long)]
        reject: bool,

        /// Config file (defaults to the user config directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a default config file
    Init {
        /// Where to write it (defaults to the user config directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        /// Config file to read instead of the default location
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins over --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .init();

    let result = match cli.command {
        Commands::Serve {
            port,
            bind,
            workers,
            reject,
            config,
        } => {
            let overrides = commands::Overrides {
                port,
                bind,
                workers,
                reject,
            };
            commands::serve(config.as_deref(), &overrides).await
        }
        Commands::Init { path } => commands::init(path.as_deref()),
        Commands::Config { config } => commands::show_config(config.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
