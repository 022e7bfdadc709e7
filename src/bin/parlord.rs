use std::path::PathBuf;

use clap::Parser;

use parlor::{config, server, telemetry};

/// Presence-and-messaging server.
///
/// With no arguments: bind 127.0.0.1:8080, replay ./default.chatjournal, and
/// run until signaled.
#[derive(Parser, Debug)]
#[command(name = "parlord", version)]
struct Args {
    /// Path to a TOML config file (defaults to ./parlor.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address override.
    #[arg(long)]
    listen_addr: Option<String>,

    /// Journal file override.
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    telemetry::init(args.verbose);

    let mut cfg = match &args.config {
        Some(path) => match config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!("error: {}", e);
                std::process::exit(1);
            }
        },
        None => config::load_or_default(),
    };
    if let Some(addr) = args.listen_addr {
        cfg.listen_addr = addr;
    }
    if let Some(journal) = args.journal {
        cfg.journal_path = journal;
    }

    if let Err(e) = server::run(cfg) {
        tracing::error!("error: {}", e);
        std::process::exit(1);
    }
}
