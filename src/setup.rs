//! Setup instruction filtering
//!
//! Setup instructions create prerequisite token accounts. The account being
//! created is always the second key of the instruction (the associated token
//! account convention), so existence is checked positionally, in one batched
//! query, and instructions whose target already exists are dropped.

use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use std::collections::HashMap;
use tracing::debug;

use crate::ledger::{LedgerClient, LedgerError};

/// The account a setup instruction would create, if it names one.
fn target_of(ix: &Instruction) -> Option<Pubkey> {
    ix.accounts.get(1).map(|meta| meta.pubkey)
}

/// Keep only instructions whose target is known to not exist. An instruction
/// with no answer in `existence` (or no target at all) is kept: creation is
/// idempotent for the account types in scope, skipping is not.
pub fn filter_missing(
    ops: Vec<Instruction>,
    existence: &HashMap<Pubkey, bool>,
) -> Vec<Instruction> {
    ops.into_iter()
        .filter(|ix| match target_of(ix) {
            Some(target) => !existence.get(&target).copied().unwrap_or(false),
            None => true,
        })
        .collect()
}

/// Query existence for every setup target in one batch and filter. An empty
/// result means the setup phase is skipped entirely; callers must not submit
/// an empty instruction list.
pub async fn detect_missing<L: LedgerClient>(
    ledger: &L,
    ops: Vec<Instruction>,
) -> Result<Vec<Instruction>, LedgerError> {
    let targets: Vec<Pubkey> = ops.iter().filter_map(target_of).collect();
    if targets.is_empty() {
        return Ok(ops);
    }

    let flags = ledger.accounts_exist(&targets).await?;
    let existence: HashMap<Pubkey, bool> = targets.into_iter().zip(flags).collect();

    let kept = filter_missing(ops, &existence);
    debug!("Setup filter kept {} instruction(s)", kept.len());
    Ok(kept)
}
