//! CLI command implementations.

use colored::Colorize;
use farmrelay_server::{Backpressure, RelayServer, ServerConfig};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Command-line settings that take precedence over any config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub bind: Option<IpAddr>,
    pub workers: Option<usize>,
    pub reject: bool,
}

impl Overrides {
    fn apply(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(ip) = self.bind {
            config.addr.set_ip(ip);
        }
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(workers) = self.workers {
            config.worker_pool_size = workers;
        }
        if self.reject {
            config.backpressure = Backpressure::Reject;
        }
        config
    }
}

/// `<config dir>/farmrelay/config.json`, if the platform has a config dir.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("farmrelay").join("config.json"))
}

/// Loads the config named on the command line, else the user's default
/// file, else built-in defaults.
fn resolve_config(explicit: Option<&Path>) -> Result<(ServerConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        return Ok((ServerConfig::load(path)?, Some(path.to_path_buf())));
    }

    match default_config_path() {
        Some(path) if path.exists() => Ok((ServerConfig::load(&path)?, Some(path))),
        _ => Ok((ServerConfig::default(), None)),
    }
}

/// Start the relay and run until Ctrl+C.
pub async fn serve(config_path: Option<&Path>, overrides: &Overrides) -> Result<()> {
    let (config, source) = resolve_config(config_path)?;
    let config = overrides.apply(config);
    config.validate()?;

    match &source {
        Some(path) => debug!("Using config {}", path.display()),
        None => debug!("Using built-in defaults"),
    }

    println!("{}", "Starting farmrelay...".cyan());

    let server = RelayServer::bind(config).await?;
    let handle = server.handle();

    println!("{} Listening on {}", "✓".green(), handle.local_addr());
    println!("  Press {} to stop", "Ctrl+C".cyan());

    let signal = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received");
            signal.shutdown();
        }
    });

    server.run().await?;

    println!("{} Relay stopped", "✓".green());
    Ok(())
}

/// Write a default config file.
pub fn init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path().ok_or("no config directory on this platform, use --path")?,
    };

    if path.exists() {
        println!("{} Config already exists at {}", "✓".green(), path.display());
        return Ok(());
    }

    write_default_config(&path)?;

    println!("{} Wrote default config to {}", "✓".green(), path.display());
    println!("  Run {} to start the relay", "farmrelay serve".cyan());

    Ok(())
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(&ServerConfig::default())?)?;
    Ok(())
}

/// Print the effective configuration.
pub fn show_config(config_path: Option<&Path>) -> Result<()> {
    let (config, source) = resolve_config(config_path)?;

    match source {
        Some(path) => println!("{} {}", "Config:".bold(), path.display()),
        None => println!("{} built-in defaults", "Config:".bold()),
    }
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}
