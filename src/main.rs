//! Swap crank
//!
//! Runs one account-heavy swap through a managed Address Lookup Table:
//! resolves the addresses the trade will touch, registers whatever the table
//! is missing in size-bounded batches, waits for the table to be readable,
//! then submits setup and trade transactions through the custody vault.

mod accounts;
mod config;
mod ledger;
mod lut;
mod market;
mod orchestrator;
mod retry;
mod setup;
mod signer;
mod tx;

use clap::Parser;
use config::{Command, Config};
use ledger::{LedgerClient, RpcLedgerClient};
use market::{HttpMarketClient, MarketClient};
use orchestrator::{Orchestrator, OrchestratorSettings, PhaseOutcome};
use signer::VaultSigner;
use std::collections::HashSet;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::parse();

    info!("Swap Crank");
    info!("RPC URL: {}", config.rpc_url);

    let ledger = RpcLedgerClient::new(&config.rpc_url);
    let market = HttpMarketClient::new(config.market_url.clone(), config.authority)?;
    let intent = config.intent();

    match config.command {
        Some(Command::Quote) => {
            let out = market.estimate_output(&intent).await?;
            info!(
                "Estimate: {} {} of {} -> {} out (slippage {} bps)",
                intent.action.as_str(),
                intent.amount,
                intent.market,
                out,
                intent.slippage_bps
            );
            return Ok(());
        }
        Some(Command::Resolve) => {
            let discovery = market.build_instructions(&intent.shape_probe()).await?;
            let required = accounts::resolve_account_set(&discovery);
            info!("Trade references {} unique addresses", required.len());

            let existing: HashSet<_> = match config.lut_address {
                Some(address) => match ledger.get_lookup_table(&address).await? {
                    Some(table) => table.addresses.into_iter().collect(),
                    None => {
                        warn!("Lookup table {} not visible", address);
                        HashSet::new()
                    }
                },
                None => HashSet::new(),
            };

            let missing = accounts::diff_addresses(&required, &existing);
            let chunks = accounts::chunk_addresses(&missing, lut::MAX_EXTEND_PER_TX);
            info!(
                "{} address(es) to register in {} batch(es) of up to {}",
                missing.len(),
                chunks.len(),
                lut::MAX_EXTEND_PER_TX
            );
            for address in &missing {
                info!("  {}", address);
            }
            return Ok(());
        }
        Some(Command::ShowLut) => {
            let address = config.lut_address.ok_or("LUT_ADDRESS not set")?;
            match ledger.get_lookup_table(&address).await? {
                Some(table) => {
                    info!("LUT Address: {}", address);
                    info!("Contains {} addresses:", table.addresses.len());
                    for (i, registered) in table.addresses.iter().enumerate() {
                        info!("  [{}] {}", i, registered);
                    }
                }
                None => warn!("Lookup table {} not found", address),
            }
            return Ok(());
        }
        Some(Command::Run) | None => {
            // Continue to the pipeline
        }
    }

    // Credentials are required before anything is submitted; a missing one
    // aborts here, with nothing sent.
    let vault = match VaultSigner::from_env(config.signer_url.clone()) {
        Ok(vault) => vault,
        Err(e) => {
            error!("✗ {}", e);
            return Err(e.into());
        }
    };

    info!("Authority: {}", config.authority);
    info!("Priority fee: {} microlamports/CU", config.priority_fee);
    info!("Compute unit limit: {}", config.cu_limit);
    match config.lut_address {
        Some(address) => info!("Lookup table: {} (reuse)", address),
        None => info!("Lookup table: none supplied, will create"),
    }

    let orchestrator = Orchestrator::new(
        &ledger,
        &market,
        &vault,
        OrchestratorSettings::from(&config),
    );

    match orchestrator.run(&intent).await {
        Ok(report) => {
            info!("✓ Run complete via table {}", report.table);
            info!("Estimated output: {}", report.estimated_out);
            for (phase, outcome) in &report.phases {
                match outcome {
                    PhaseOutcome::Completed => info!("  {}: completed", phase),
                    PhaseOutcome::Submitted(reference) => {
                        info!("  {}: submitted ({})", phase, reference)
                    }
                    PhaseOutcome::Skipped => info!("  {}: skipped", phase),
                }
            }
            if !report.extension_batches.is_empty() {
                info!("  extension batch sizes: {:?}", report.extension_batches);
            }
            Ok(())
        }
        Err(e) => {
            // No rollback: whatever confirmed on-chain stays. The phase log
            // above tells the operator where to resume by hand.
            error!("✗ Pipeline aborted: {}", e);
            Err(e.into())
        }
    }
}
