use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

/// Command-line operations client for a running staffetta server.
#[derive(Debug, Parser)]
#[command(name = "staffetta-cli", version, about = "Staffetta operations client")]
pub struct CliArgs {
    /// Base URL of the public API listener.
    #[arg(
        long = "server",
        env = "STAFFETTA_SERVER",
        default_value = "http://127.0.0.1:3000"
    )]
    pub server: String,

    /// Base URL of the operations listener.
    #[arg(
        long = "ops-server",
        env = "STAFFETTA_OPS_SERVER",
        default_value = "http://127.0.0.1:3001"
    )]
    pub ops_server: String,

    /// API key token (`sk_...`).
    #[arg(long = "token", env = "STAFFETTA_TOKEN", hide_env_values = true)]
    pub token: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect and manage render jobs.
    #[command(subcommand)]
    Jobs(JobsCommand),
    /// Submit a render request.
    Submit(SubmitArgs),
    /// Inspect and manage credits.
    #[command(subcommand)]
    Credits(CreditsCommand),
    /// Trigger a stuck-job sweep.
    Sweep(SweepArgs),
    /// Inspect and reset rate-limit windows.
    #[command(subcommand)]
    Ratelimit(RatelimitCommand),
}

#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// List the authenticated account's render jobs.
    List(JobsListArgs),
    /// Show one render job.
    Show { id: Uuid },
    /// Reset a failed job and resubmit it (operator).
    Retry { id: Uuid },
    /// Poll the provider for a job's status and apply the result (operator).
    Sync { id: Uuid },
}

#[derive(Debug, Args)]
pub struct JobsListArgs {
    /// Filter by status (pending|rendering|complete|failed).
    #[arg(long)]
    pub status: Option<String>,

    /// Filter by provider (shotstack|json2video).
    #[arg(long)]
    pub provider: Option<String>,

    #[arg(long, default_value_t = 50)]
    pub limit: u32,

    /// Resume listing from an opaque cursor.
    #[arg(long)]
    pub cursor: Option<String>,
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Target provider (shotstack|json2video).
    #[arg(long)]
    pub provider: String,

    /// Render cost in credit tokens.
    #[arg(long)]
    pub cost: i64,

    /// Path to a JSON file with the provider payload; reads stdin when absent.
    #[arg(long = "input-file", value_name = "PATH")]
    pub input_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum CreditsCommand {
    /// Show the authenticated account's balance.
    Show,
    /// Show the authenticated account's recent ledger entries.
    Ledger {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Grant credits to an account (operator).
    Grant {
        account_id: Uuid,
        #[arg(long)]
        amount: i64,
        #[arg(long, default_value = "operator grant")]
        reason: String,
    },
}

#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Override the stale threshold in minutes.
    #[arg(long = "stale-after-minutes")]
    pub stale_after_minutes: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum RatelimitCommand {
    /// Show the window for an action/identifier pair (operator).
    Status {
        #[arg(long)]
        action: String,
        #[arg(long)]
        identifier: String,
        #[arg(long, default_value = "standard")]
        tier: String,
    },
    /// Clear the window for an action/identifier pair (operator).
    Reset {
        #[arg(long)]
        action: String,
        #[arg(long)]
        identifier: String,
    },
}
