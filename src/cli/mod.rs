//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};

pub mod commands;
pub mod progress;

/// docshift - move file attachments between two record stores
#[derive(Parser, Debug)]
#[command(name = "docshift", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Migrate the files attached to one object's records
    Run(RunArgs),

    /// Inspect and manage saved migration states
    States {
        #[command(subcommand)]
        command: StatesCommands,
    },

    /// List the fields of an object
    Describe {
        /// Object API name (e.g. Account)
        object: String,

        /// Describe the object in the target store instead of the source
        #[arg(long)]
        target: bool,
    },

    /// Print version information
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Object whose records carry the files
    #[arg(long, required_unless_present = "resume")]
    pub object: Option<String>,

    /// Source field used to match records across stores
    #[arg(long, required_unless_present = "resume")]
    pub match_field: Option<String>,

    /// Target field to match against (defaults to --match-field)
    #[arg(long)]
    pub target_match_field: Option<String>,

    /// WHERE predicate limiting the source records
    #[arg(long)]
    pub filter: Option<String>,

    /// Report what would be migrated without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Discard any saved state for this job and start over
    #[arg(long, conflicts_with = "resume")]
    pub fresh: bool,

    /// Resume a saved state by id
    #[arg(long, value_name = "STATE_ID", conflicts_with_all = ["object", "match_field", "target_match_field", "filter"])]
    pub resume: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum StatesCommands {
    /// List saved states, newest first
    List,

    /// Show one saved state
    Show {
        /// State ID
        id: String,
    },

    /// Delete a saved state and its scratch files
    Discard {
        /// State ID
        id: String,
    },
}
