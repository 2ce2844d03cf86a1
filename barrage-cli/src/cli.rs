use clap::Parser;
use std::path::PathBuf;

/// Watch live chat streams and print them as they arrive.
#[derive(Debug, Parser)]
#[command(name = "barrage", version, about)]
pub struct Args {
    /// Room URLs to watch (in addition to any from the config file)
    pub urls: Vec<String>,

    /// Path to a toml config file
    #[arg(short, long, env = "BARRAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
