/* src/main.rs */

use dotenvy::dotenv;
use fancy_log::{LogLevel, log, set_log_level};
use lazy_motd::lazy_motd;
use std::env;
use std::sync::Arc;
use zoneforge::{AppConfig, Builder, Committer, MemoryStore, Rndc};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // --- Initialization ---
    dotenv().ok();
    let level = env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase();
    let log_level = match level.as_str() {
        "debug" => LogLevel::Debug,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    };
    set_log_level(log_level);
    lazy_motd!();

    // --- Load Config ---
    let config = match AppConfig::load_or_create_default() {
        Ok(cfg) => cfg,
        Err(e) => {
            log(LogLevel::Error, &format!("Failed to load config: {}", e));
            return Err(e.into());
        }
    };

    // --- Initialize Services ---
    let store = match &config.store_path {
        Some(path) if path.exists() => Arc::new(MemoryStore::load(path)?),
        Some(path) => {
            log(
                LogLevel::Warn,
                &format!("Store file {:?} not found, starting with no zones.", path),
            );
            Arc::new(MemoryStore::new())
        }
        None => {
            log(
                LogLevel::Warn,
                "No store_path configured, starting with no zones.",
            );
            Arc::new(MemoryStore::new())
        }
    };
    let daemon = Arc::new(Rndc::new(config.cmd.clone(), config.command_deadline()));

    let builder = match Builder::new(store.clone(), daemon.clone(), &config) {
        Ok(builder) => Arc::new(builder),
        Err(e) => {
            log(LogLevel::Error, &format!("Invalid nameserver config: {}", e));
            return Err(e.into());
        }
    };
    let committer = Arc::new(Committer::new(store, builder.clone(), daemon, &config));

    // --- Start Workers ---
    let builder_task = builder.start();
    let committer_task = committer.start();

    tokio::signal::ctrl_c().await?;
    log(LogLevel::Info, "Shutting down.");
    builder_task.abort();
    if let Some(task) = committer_task {
        task.abort();
    }

    Ok(())
}
