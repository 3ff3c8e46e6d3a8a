//! CAPI CLI
//!
//! Stages attack signals in the local store, ships them to the central API
//! and manages the machines that report them.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use tracing::info;

use capi_client::{CapiClient, SqliteStorage};
use capi_core::ClientConfig;
use capi_core::tracing_init::init_tracing;

mod machine_cmd;
mod signal_cmd;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test_support;

#[derive(Parser, Debug)]
#[command(name = "capi")]
#[command(version, about = "Share attack signals with the central threat API", long_about = None)]
struct Cli {
    /// Path to the SQLite signal store.
    #[arg(long, global = true, env = "CAPI_DATABASE")]
    database: Option<PathBuf>,

    /// JSON settings file (see `ClientConfig`).
    #[arg(long, global = true, env = "CAPI_CONFIG")]
    config: Option<PathBuf>,

    /// Talk to the production API instead of staging.
    #[arg(long, global = true, env = "CAPI_PROD")]
    prod: bool,

    /// Scenario declared by machines at login (repeatable).
    #[arg(long = "declare-scenario", global = true)]
    scenarios: Vec<String>,

    /// Answer yes to every confirmation prompt.
    #[arg(short, long, global = true)]
    yes: bool,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stage a signal for later delivery.
    AddSignal(signal_cmd::AddSignalArgs),
    /// Deliver pending signals of every healthy machine.
    Send {
        /// Delete delivered signals once the cycle is done, even with
        /// `prune_after_send` off.
        #[arg(long)]
        prune_sent: bool,
    },
    /// Delete unsent signals of quarantined machines.
    PruneFailing,
    /// Delete signals already delivered.
    PruneSent,
    /// List known machines and their health.
    Machines,
    /// Enroll machines to a console account.
    Enroll(machine_cmd::EnrollArgs),
    /// Pull the decision stream.
    Decisions {
        /// Machine to authenticate as (defaults to the primary machine).
        #[arg(long)]
        machine_id: Option<String>,
    },
    /// Lift quarantine and registration rejection of a machine.
    ResetMachine {
        /// Machine ID to reset.
        machine_id: String,
    },
}

impl Cli {
    /// Settings file (or defaults) with flags applied on top.
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)
                .with_context(|| format!("Cannot load settings from {}", path.display()))?,
            None => ClientConfig::default(),
        };
        config.prod |= self.prod;
        config.scenarios.extend(self.scenarios.iter().cloned());
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing("capi=info,capi_client=info,capi_core=warn", cli.log_json);

    let config = cli.client_config()?;
    let db_path = match &cli.database {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        api = %config.api_url(),
        path = %db_path.display(),
        "Starting capi"
    );

    let storage = SqliteStorage::open(&db_path)
        .await
        .with_context(|| format!("Cannot open signal store {}", db_path.display()))?;
    let client = CapiClient::with_http(storage, config)?;
    let mut out = io::stdout();

    match cli.command {
        Command::AddSignal(args) => signal_cmd::add_signal(&client, args, &mut out).await,
        Command::Send { prune_sent } => signal_cmd::send(&client, prune_sent, &mut out).await,
        Command::PruneFailing => signal_cmd::prune_failing(&client, cli.yes, &mut out).await,
        Command::PruneSent => signal_cmd::prune_sent(&client, &mut out).await,
        Command::Machines => machine_cmd::list(&client, &mut out).await,
        Command::Enroll(args) => machine_cmd::enroll(&client, args, cli.yes, &mut out).await,
        Command::Decisions { machine_id } => {
            machine_cmd::decisions(&client, machine_id.as_deref(), &mut out).await
        }
        Command::ResetMachine { machine_id } => {
            machine_cmd::reset(&client, &machine_id, cli.yes, &mut out).await
        }
    }
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let data =
        dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine data directory"))?;
    Ok(data.join("capi").join("signals.db"))
}

/// Ask before a destructive action unless `--yes` was given.
fn confirm(prompt: &str, assume_yes: bool) -> anyhow::Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(confirmed)
}

/// Note an aborted action on the user's terminal.
fn aborted(out: &mut impl Write) -> anyhow::Result<()> {
    writeln!(out, "Aborted")?;
    Ok(())
}
