//! Ledger RPC surface
//!
//! Everything the pipeline reads from the chain goes through `LedgerClient`
//! so the orchestration logic can be exercised against in-memory doubles.

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    address_lookup_table::{state::AddressLookupTable, AddressLookupTableAccount},
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Deserialize error: {0}")]
    Deserialize(String),
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    async fn current_slot(&self) -> Result<u64, LedgerError>;

    /// Existence flags for `addresses`, in order, from one batched query.
    async fn accounts_exist(&self, addresses: &[Pubkey]) -> Result<Vec<bool>, LedgerError>;

    /// The lookup table at `address`, or `None` if it is not (yet) visible.
    async fn get_lookup_table(
        &self,
        address: &Pubkey,
    ) -> Result<Option<AddressLookupTableAccount>, LedgerError>;
}

/// `LedgerClient` backed by a standard Solana RPC endpoint.
pub struct RpcLedgerClient {
    rpc: RpcClient,
}

impl RpcLedgerClient {
    pub fn new(rpc_url: &str) -> Self {
        let rpc = RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed());
        Self { rpc }
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn current_slot(&self) -> Result<u64, LedgerError> {
        self.rpc
            .get_slot()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn accounts_exist(&self, addresses: &[Pubkey]) -> Result<Vec<bool>, LedgerError> {
        if addresses.is_empty() {
            return Ok(vec![]);
        }

        let accounts = self
            .rpc
            .get_multiple_accounts(addresses)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        Ok(accounts.iter().map(|a| a.is_some()).collect())
    }

    async fn get_lookup_table(
        &self,
        address: &Pubkey,
    ) -> Result<Option<AddressLookupTableAccount>, LedgerError> {
        let response = self
            .rpc
            .get_account_with_commitment(address, CommitmentConfig::confirmed())
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        let Some(account) = response.value else {
            return Ok(None);
        };

        let table = AddressLookupTable::deserialize(&account.data)
            .map_err(|e| LedgerError::Deserialize(format!("{e:?}")))?;

        Ok(Some(AddressLookupTableAccount {
            key: *address,
            addresses: table.addresses.to_vec(),
        }))
    }
}
