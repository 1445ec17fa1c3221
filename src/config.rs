//! Configuration for the swap crank

use clap::{Parser, Subcommand, ValueEnum};
use solana_sdk::pubkey::Pubkey;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Sentinel amount used when only the shape of the instructions matters
/// (address discovery), before the final sized transaction is built.
pub const SHAPE_PROBE_AMOUNT: u64 = 1_000;

/// ALT-managed swap pipeline with custody signing
#[derive(Parser, Debug, Clone)]
#[command(name = "swap-crank")]
#[command(about = "Runs account-heavy swaps through a managed address lookup table", long_about = None)]
pub struct Config {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Option<Command>,

    /// RPC URL
    #[arg(long, env = "RPC_URL", default_value = "https://api.mainnet-beta.solana.com")]
    pub rpc_url: String,

    /// Market (token mint) to trade
    #[arg(long, env = "MARKET_MINT")]
    pub market: Pubkey,

    /// Trade direction
    #[arg(long, env = "TRADE_ACTION", value_enum, default_value_t = TradeAction::Buy)]
    pub action: TradeAction,

    /// Trade amount in the input token's smallest denomination
    #[arg(long, env = "TRADE_AMOUNT")]
    pub amount: u64,

    /// Slippage tolerance in basis points
    #[arg(long, env = "SLIPPAGE_BPS", default_value = "50")]
    pub slippage_bps: u16,

    /// The custody vault's on-chain address (payer and table authority)
    #[arg(long, env = "VAULT_ADDRESS")]
    pub authority: Pubkey,

    /// Pre-existing lookup table to reuse. When absent, the crank creates
    /// and owns its table for the run.
    #[arg(long, env = "LUT_ADDRESS")]
    pub lut_address: Option<Pubkey>,

    /// Pricing service base URL
    #[arg(long, env = "MARKET_API_URL")]
    pub market_url: String,

    /// Vault signing endpoint URL
    #[arg(long, env = "SIGNER_API_URL")]
    pub signer_url: String,

    /// Compute unit limit per transaction. High because these transactions
    /// are unusually account-heavy.
    #[arg(long, env = "COMPUTE_UNIT_LIMIT", default_value = "600000")]
    pub cu_limit: u32,

    /// Priority fee in microlamports per compute unit
    #[arg(long, env = "PRIORITY_FEE", default_value = "100000")]
    pub priority_fee: u64,

    /// Max polls while waiting for a lookup table to become readable
    #[arg(long, env = "LUT_WAIT_ATTEMPTS", default_value = "8")]
    pub lut_wait_attempts: u32,

    /// Base backoff delay in milliseconds (doubled per attempt)
    #[arg(long, env = "LUT_WAIT_BASE_MS", default_value = "250")]
    pub lut_wait_base_ms: u64,

    /// Ceiling on any single backoff delay in milliseconds
    #[arg(long, env = "LUT_WAIT_MAX_MS", default_value = "5000")]
    pub lut_wait_max_ms: u64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the full pipeline: table, extensions, setup, trade
    Run,
    /// Print the estimated output for the configured trade
    Quote,
    /// Print the resolved address set and extension chunk plan (dry run)
    Resolve,
    /// Show a lookup table's registered addresses (requires LUT_ADDRESS)
    ShowLut,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One trade, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct TradeIntent {
    pub market: Pubkey,
    pub action: TradeAction,
    pub amount: u64,
    pub slippage_bps: u16,
}

impl TradeIntent {
    /// The same intent with a sentinel amount, for address discovery.
    pub fn shape_probe(&self) -> TradeIntent {
        TradeIntent {
            amount: SHAPE_PROBE_AMOUNT,
            ..*self
        }
    }
}

impl Config {
    pub fn intent(&self) -> TradeIntent {
        TradeIntent {
            market: self.market,
            action: self.action,
            amount: self.amount,
            slippage_bps: self.slippage_bps,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.lut_wait_attempts,
            Duration::from_millis(self.lut_wait_base_ms),
            Duration::from_millis(self.lut_wait_max_ms),
        )
    }
}
