use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use lab_agents::balance::{parse_weights, run_balance_check};
use lab_agents::serve::{cancel_on_ctrl_c, serve};
use lab_agents::LabConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "lab-agents", about = "Cohort chat experiment reactor host")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reactors until Ctrl-C
    Serve {
        /// JSON snapshot loaded at start and written back on shutdown
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Check condition assignment against its 95% binomial interval
    BalanceCheck {
        /// Condition weights as name=weight
        #[arg(required = true)]
        weights: Vec<String>,
        #[arg(long, default_value_t = 1000)]
        draws: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { snapshot } => {
            let config = LabConfig::load(cli.config.as_deref())?;
            info!(
                model_url = %config.model.url,
                model = %config.model.model,
                snapshot = ?snapshot,
                "Reactor host starting"
            );
            let shutdown = CancellationToken::new();
            cancel_on_ctrl_c(shutdown.clone());
            serve(config, snapshot, shutdown).await
        }
        Command::BalanceCheck { weights, draws } => {
            let weights = parse_weights(&weights)?;
            let tallies = run_balance_check(&weights, draws, &mut rand::thread_rng())?;

            let mut failed = 0;
            for tally in &tallies {
                let verdict = if tally.within_interval() { "ok" } else { "OUT" };
                println!(
                    "{:<16} observed {:>8}  expected {:>10.1}  95% CI [{:.1}, {:.1}]  {}",
                    tally.condition, tally.observed, tally.expected, tally.low, tally.high, verdict
                );
                if !tally.within_interval() {
                    failed += 1;
                }
            }
            if failed > 0 {
                bail!("{failed} condition(s) outside the 95% interval");
            }
            Ok(())
        }
    }
}
