use std::path::PathBuf;

use clap::Parser;

/// Runs images through the moderation workflow and prints each final view.
#[derive(Parser, Debug)]
#[command(name = "memesense", version, arg_required_else_help = true)]
pub struct Cli {
    /// Settings file (TOML, YAML or JSON). `MEMESENSE__*` variables still apply.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Clear each run this many milliseconds after starting it.
    #[arg(long)]
    pub cancel_after_ms: Option<u64>,

    /// Images to classify, one run each.
    #[arg(required = true)]
    pub images: Vec<PathBuf>,
}
