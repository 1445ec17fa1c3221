//! Versioned message composition
//!
//! All submitting phases funnel through here so every transaction carries the
//! same compute-budget prelude and lookup-table reference handling.

use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    message::{v0::Message as V0Message, VersionedMessage},
    pubkey::Pubkey,
};

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("message compile error: {0}")]
    Compile(String),
}

/// Prepend compute unit limit and priority fee to `instructions`.
pub fn with_compute_budget(
    cu_limit: u32,
    priority_fee: u64,
    instructions: Vec<Instruction>,
) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(instructions.len() + 2);
    out.push(ComputeBudgetInstruction::set_compute_unit_limit(cu_limit));
    out.push(ComputeBudgetInstruction::set_compute_unit_price(priority_fee));
    out.extend(instructions);
    out
}

/// Compile a v0 message. The message is signed externally by the custody
/// service, so this never touches a keypair.
pub fn build_message(
    payer: &Pubkey,
    instructions: &[Instruction],
    lookup_tables: &[AddressLookupTableAccount],
    recent_blockhash: Hash,
) -> Result<VersionedMessage, ComposeError> {
    let message = V0Message::try_compile(payer, instructions, lookup_tables, recent_blockhash)
        .map_err(|e| ComposeError::Compile(e.to_string()))?;

    Ok(VersionedMessage::V0(message))
}
