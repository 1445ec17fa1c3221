//! Market pricing / instruction-building collaborator
//!
//! The pricing service owns quote computation and trade instruction encoding;
//! this client only shapes requests and decodes the returned instructions.

use async_trait::async_trait;
use serde::Deserialize;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use std::str::FromStr;
use std::time::Duration;

use crate::config::TradeIntent;

/// Instructions for one trade: prerequisite account creation first, then the
/// trade itself. Read-only to the rest of the pipeline.
#[derive(Debug, Clone, Default)]
pub struct InstructionSet {
    pub setup_instructions: Vec<Instruction>,
    pub trade_instructions: Vec<Instruction>,
}

#[async_trait]
pub trait MarketClient: Send + Sync {
    /// Estimated output amount for the intent, in the output token's
    /// smallest denomination.
    async fn estimate_output(&self, intent: &TradeIntent) -> Result<u64, MarketError>;

    /// Full instruction set for the intent.
    async fn build_instructions(&self, intent: &TradeIntent) -> Result<InstructionSet, MarketError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("no estimate available for this trade")]
    Unavailable,
    #[error("network error: {0}")]
    Network(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// HTTP client for the pricing service.
pub struct HttpMarketClient {
    client: reqwest::Client,
    base_url: String,
    /// Trade owner; the pricing service derives token accounts from it
    owner: Pubkey,
}

#[derive(Deserialize)]
struct EstimateResponse {
    out_amount: Option<u64>,
}

#[derive(Deserialize)]
struct InstructionsResponse {
    setup: Vec<WireInstruction>,
    trade: Vec<WireInstruction>,
}

#[derive(Deserialize)]
struct WireInstruction {
    program_id: String,
    accounts: Vec<WireAccountMeta>,
    data: String,
}

#[derive(Deserialize)]
struct WireAccountMeta {
    pubkey: String,
    is_signer: bool,
    is_writable: bool,
}

impl HttpMarketClient {
    pub fn new(base_url: String, owner: Pubkey) -> Result<Self, MarketError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MarketError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            owner,
        })
    }

    fn intent_body(&self, intent: &TradeIntent) -> serde_json::Value {
        serde_json::json!({
            "market": intent.market.to_string(),
            "side": intent.action.as_str(),
            "amount": intent.amount,
            "slippage_bps": intent.slippage_bps,
            "owner": self.owner.to_string(),
        })
    }
}

fn decode_instruction(wire: &WireInstruction) -> Result<Instruction, MarketError> {
    let program_id = Pubkey::from_str(&wire.program_id)
        .map_err(|e| MarketError::Parse(format!("bad program id: {e}")))?;

    let mut accounts = Vec::with_capacity(wire.accounts.len());
    for meta in &wire.accounts {
        let pubkey = Pubkey::from_str(&meta.pubkey)
            .map_err(|e| MarketError::Parse(format!("bad account key: {e}")))?;
        accounts.push(AccountMeta {
            pubkey,
            is_signer: meta.is_signer,
            is_writable: meta.is_writable,
        });
    }

    let data = base64::decode(&wire.data)
        .map_err(|e| MarketError::Parse(format!("bad instruction data: {e}")))?;

    Ok(Instruction {
        program_id,
        accounts,
        data,
    })
}

#[async_trait]
impl MarketClient for HttpMarketClient {
    async fn estimate_output(&self, intent: &TradeIntent) -> Result<u64, MarketError> {
        let response = self
            .client
            .post(format!("{}/estimate", self.base_url))
            .json(&self.intent_body(intent))
            .send()
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;

        let estimate: EstimateResponse = response
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;

        estimate.out_amount.ok_or(MarketError::Unavailable)
    }

    async fn build_instructions(&self, intent: &TradeIntent) -> Result<InstructionSet, MarketError> {
        let response = self
            .client
            .post(format!("{}/instructions", self.base_url))
            .json(&self.intent_body(intent))
            .send()
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;

        let wire: InstructionsResponse = response
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;

        let setup_instructions = wire
            .setup
            .iter()
            .map(decode_instruction)
            .collect::<Result<Vec<_>, _>>()?;
        let trade_instructions = wire
            .trade
            .iter()
            .map(decode_instruction)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(InstructionSet {
            setup_instructions,
            trade_instructions,
        })
    }
}
