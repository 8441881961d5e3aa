use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::utils::parse_size;

#[derive(Parser, Debug)]
#[command(
    name = "cleanbox",
    about = "Background disk-space guardian with one-click cleanup",
    version,
    long_about = "CleanBox watches your fixed drives and warns once when free space\n\
                  drops below a threshold. It empties a list of folders you choose\n\
                  (Downloads by default) plus the Trash / Recycle Bin on demand.\n\n\
                  Features:\n\
                  • Low-space warnings with no repeated nagging\n\
                  • Cleanup in the background with progress\n\
                  • Per-item failures are reported, never fatal\n\
                  • Start at login",
    after_help = "Examples:\n  \
                  cleanbox status\n  \
                  cleanbox targets add ~/Desktop/tmp --label Scratch\n  \
                  cleanbox targets disable trash\n  \
                  cleanbox clean --yes\n  \
                  cleanbox config set --threshold 20GB --interval 120\n  \
                  cleanbox monitor"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Use this configuration file instead of ~/.cleanbox/config.json
    #[arg(long, global = true, env = "CLEANBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show volumes, targets and the last cleanup
    Status,

    /// Manage cleanup targets
    #[command(subcommand)]
    Targets(TargetArgs),

    /// Empty every enabled target now
    Clean(CleanArgs),

    /// Watch free space until Enter is pressed
    Monitor,

    /// Show or change settings
    #[command(subcommand)]
    Config(ConfigArgs),

    /// Show the folders CleanBox would pick by default
    Detect,
}

#[derive(Subcommand, Debug)]
pub enum TargetArgs {
    /// List configured targets
    List {
        /// Measure each folder
        #[arg(short, long)]
        sizes: bool,
    },

    /// Add a folder, or "trash" for the Trash / Recycle Bin
    Add {
        /// Folder path or "trash"
        location: String,

        /// Display name
        #[arg(short, long)]
        label: Option<String>,
    },

    /// Remove a target
    Remove {
        /// Number from `targets list`, folder path or "trash"
        target: String,
    },

    /// Include a target in cleanups
    Enable {
        /// Number from `targets list`, folder path or "trash"
        target: String,
    },

    /// Keep a target configured but skip it
    Disable {
        /// Number from `targets list`, folder path or "trash"
        target: String,
    },
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Skip confirmation prompts
    #[arg(short = 'y', long)]
    pub yes: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigArgs {
    /// Print the current configuration
    Show,

    /// Change one or more settings
    Set {
        /// Low-space threshold, e.g. 10GB or 512MB
        #[arg(long, value_parser = parse_size)]
        threshold: Option<u64>,

        /// Seconds between checks
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,

        /// Start CleanBox at login
        #[arg(long)]
        auto_start: Option<bool>,
    },
}

impl Commands {
    /// Get the command name
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Status => "status",
            Commands::Targets(_) => "targets",
            Commands::Clean(_) => "clean",
            Commands::Monitor => "monitor",
            Commands::Config(_) => "config",
            Commands::Detect => "detect",
        }
    }

    /// Commands that only look at the configuration and must not write it.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Commands::Status
                | Commands::Targets(TargetArgs::List { .. })
                | Commands::Config(ConfigArgs::Show)
                | Commands::Detect
        )
    }
}
