use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "media-audit")]
#[command(about = "Audits media libraries for duplicates, missing hardlinks and safe deletions", long_about = None)]
pub struct Cli {
    /// Configuration file name (without extension)
    #[arg(short, long, default_value = "Config")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the full audit and print the deletion plan
    Audit {
        /// Also write the full report as JSON to this file
        #[arg(long)]
        json: Option<String>,
        /// Print every keeper decision, not just the plan
        #[arg(long)]
        verbose: bool,
        /// Stop cataloguing after this many media files
        #[arg(long)]
        max_files: Option<usize>,
        /// Let seeding files be planned for deletion
        #[arg(long)]
        no_protect_seeding: bool,
        /// Let arr-managed files be planned for deletion
        #[arg(long)]
        no_protect_arr_managed: bool,
    },
    /// Validate configuration without scanning
    CheckConfig,
    /// Print the effective configuration
    PrintConfig,
    /// Inspect or reset the probe cache
    ProbeCache {
        #[command(subcommand)]
        action: ProbeCacheAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ProbeCacheAction {
    /// Display the number of cached probe results
    Count,
    /// Delete the probe cache file
    Clear,
}
