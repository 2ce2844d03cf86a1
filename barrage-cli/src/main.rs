mod cli;
mod config;

use anyhow::bail;
use barrage::{HttpClient, Message, Registry, Sink};
use clap::Parser;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Args;
use crate::config::AppConfig;

fn init_logging(args: &Args, config: &AppConfig) {
    let default = if args.quiet {
        "warn"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config
            .log_filter
            .as_deref()
            .and_then(|f| f.parse().ok())
            .unwrap_or_else(|| EnvFilter::new(default))
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_sink() -> Sink {
    Arc::new(|msg: Message| match msg {
        Message::Chat {
            site,
            room,
            sender,
            text,
        } => info!(%site, %room, "{sender}: {text}"),
        Message::Other { site, room, payload } => {
            debug!(%site, %room, "non-chat record: {payload}")
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;
    init_logging(&args, &config);

    let registry = Arc::new(Registry::with_defaults(HttpClient::new(), log_sink()));

    for url in config.rooms.iter().chain(args.urls.iter()) {
        if let Err(e) = registry.add(url) {
            error!("skipping {url}: {e}");
        }
    }
    if registry.room_count() == 0 {
        bail!("no rooms to watch; pass room URLs or a config file");
    }

    let runner = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.run().await })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    registry.shutdown();
    runner.await?;

    Ok(())
}
