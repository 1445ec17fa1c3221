//! Address Lookup Table (LUT) lifecycle
//!
//! Owns table creation, batched extension, and read-back against the
//! ledger's eventual consistency. Table creation and table readability are
//! not atomic: the create transaction must reach a visible state before the
//! table can be referenced, so every reference is gated on `await_readable`.
//!
//! Handle lifecycle within one run:
//! Created -> (Extended)* -> Readable -> ReferencedByTrade.
//! The reuse path skips straight to Readable, optimistically.

use solana_sdk::{
    address_lookup_table::{
        instruction::{create_lookup_table, extend_lookup_table},
        AddressLookupTableAccount,
    },
    pubkey::Pubkey,
};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::ledger::{LedgerClient, LedgerError};
use crate::retry::RetryPolicy;
use crate::signer::{SignError, TxSubmitter};
use crate::tx::{self, ComposeError};

/// Ceiling on addresses per extension submission; one extension transaction
/// has the same size limit as everything else.
pub const MAX_EXTEND_PER_TX: usize = 20;

const CREATE_CU_LIMIT: u32 = 50_000;
const EXTEND_CU_LIMIT: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Created,
    Extended,
    Readable,
    ReferencedByTrade,
}

/// Our view of one lookup table during a run. The registered set only ever
/// grows, and only after the vault confirms an extension was accepted.
#[derive(Debug, Clone)]
pub struct TableHandle {
    pub address: Pubkey,
    pub authority: Pubkey,
    pub addresses: Vec<Pubkey>,
    pub state: TableState,
}

impl TableHandle {
    pub fn known_set(&self) -> HashSet<Pubkey> {
        self.addresses.iter().copied().collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LutError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error("no new addresses to add")]
    EmptyBatch,
    #[error("lookup table {address} not readable after {attempts} attempts")]
    Unavailable { address: Pubkey, attempts: u32 },
}

/// Creates, extends, and reads back lookup tables. The authority is also the
/// payer; both live in the custody vault.
pub struct LutLifecycle<'a, L, S> {
    ledger: &'a L,
    submitter: &'a S,
    authority: Pubkey,
    priority_fee: u64,
    policy: RetryPolicy,
}

impl<'a, L: LedgerClient, S: TxSubmitter> LutLifecycle<'a, L, S> {
    pub fn new(
        ledger: &'a L,
        submitter: &'a S,
        authority: Pubkey,
        priority_fee: u64,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            submitter,
            authority,
            priority_fee,
            policy,
        }
    }

    /// Reuse a caller-supplied table, or create a fresh one.
    ///
    /// The reuse path does no up-front verification: the registered set is
    /// seeded from a best-effort read and `await_readable` is the real gate
    /// before anything references the table.
    pub async fn create_or_reuse(&self, existing: Option<Pubkey>) -> Result<TableHandle, LutError> {
        if let Some(address) = existing {
            let known = match self.ledger.get_lookup_table(&address).await? {
                Some(table) => table.addresses,
                None => {
                    warn!(
                        "Supplied lookup table {} not visible yet; assuming empty",
                        address
                    );
                    Vec::new()
                }
            };
            info!(
                "Reusing lookup table {} ({} registered addresses)",
                address,
                known.len()
            );
            return Ok(TableHandle {
                address,
                authority: self.authority,
                addresses: known,
                state: TableState::Readable,
            });
        }

        let recent_slot = self.ledger.current_slot().await?;
        let (create_ix, address) = create_lookup_table(self.authority, self.authority, recent_slot);

        let blockhash = self.ledger.latest_blockhash().await?;
        let instructions =
            tx::with_compute_budget(CREATE_CU_LIMIT, self.priority_fee, vec![create_ix]);
        let message = tx::build_message(&self.authority, &instructions, &[], blockhash)?;

        let reference = self
            .submitter
            .submit(&message, "create-lookup-table")
            .await?
            .into_accepted()?;

        info!("Created lookup table {} ({})", address, reference);

        Ok(TableHandle {
            address,
            authority: self.authority,
            addresses: Vec::new(),
            state: TableState::Created,
        })
    }

    /// Submit one extension batch. The handle's registered set grows only
    /// after the vault reports acceptance; callers send batches one at a
    /// time so two extensions never race on the same table.
    pub async fn extend(&self, handle: &mut TableHandle, batch: &[Pubkey]) -> Result<String, LutError> {
        if batch.is_empty() {
            return Err(LutError::EmptyBatch);
        }

        let extend_ix = extend_lookup_table(
            handle.address,
            self.authority,
            Some(self.authority),
            batch.to_vec(),
        );

        let blockhash = self.ledger.latest_blockhash().await?;
        let instructions =
            tx::with_compute_budget(EXTEND_CU_LIMIT, self.priority_fee, vec![extend_ix]);
        let message = tx::build_message(&self.authority, &instructions, &[], blockhash)?;

        let reference = self
            .submitter
            .submit(&message, "extend-lookup-table")
            .await?
            .into_accepted()?;

        handle.addresses.extend_from_slice(batch);
        handle.state = TableState::Extended;

        debug!(
            "Extended lookup table {} with {} addresses ({} total, {})",
            handle.address,
            batch.len(),
            handle.addresses.len(),
            reference
        );

        Ok(reference)
    }

    /// Poll until the table is visible on the ledger, with bounded
    /// exponential backoff. This is the most failure-prone step of the whole
    /// pipeline: it depends entirely on external finality timing.
    pub async fn await_readable(
        &self,
        address: &Pubkey,
    ) -> Result<AddressLookupTableAccount, LutError> {
        self.await_table(address, &[]).await
    }

    /// Like `await_readable`, but also requires every address in `required`
    /// to be registered in the confirmed table state. Used before the trade
    /// is composed so it never references an incompletely-extended table.
    pub async fn await_registered(
        &self,
        address: &Pubkey,
        required: &[Pubkey],
    ) -> Result<AddressLookupTableAccount, LutError> {
        self.await_table(address, required).await
    }

    async fn await_table(
        &self,
        address: &Pubkey,
        required: &[Pubkey],
    ) -> Result<AddressLookupTableAccount, LutError> {
        for attempt in 1..=self.policy.max_attempts {
            if let Some(table) = self.ledger.get_lookup_table(address).await? {
                let registered: HashSet<Pubkey> = table.addresses.iter().copied().collect();
                if required.iter().all(|addr| registered.contains(addr)) {
                    debug!(
                        "Lookup table {} readable after {} attempt(s) ({} addresses)",
                        address,
                        attempt,
                        table.addresses.len()
                    );
                    return Ok(table);
                }
                debug!(
                    "Lookup table {} visible but missing required addresses (attempt {})",
                    address, attempt
                );
            } else {
                debug!("Lookup table {} not visible yet (attempt {})", address, attempt);
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.delay_for(attempt)).await;
            }
        }

        Err(LutError::Unavailable {
            address: *address,
            attempts: self.policy.max_attempts,
        })
    }
}
