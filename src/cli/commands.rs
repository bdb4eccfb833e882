use std::path::PathBuf;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Open the store, encrypting and migrating it as needed
    Open {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reconcile the store against an identity service snapshot
    Reconcile {
        /// JSON export of the identity service state
        #[arg(long)]
        snapshot: PathBuf,

        /// Only reconcile this owned identity (hex)
        #[arg(long)]
        owner: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one startup recovery pass immediately
    Recover {
        /// JSON export of the identity service state
        #[arg(long)]
        snapshot: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Keep the store open: reconcile on identity events and run the
    /// startup recovery pass after the settling delay
    Run {
        /// JSON export of the identity service state
        #[arg(long)]
        snapshot: PathBuf,

        /// Exit once the startup recovery pass has finished
        #[arg(long)]
        once: bool,
    },

    /// Show row counts of the store
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
