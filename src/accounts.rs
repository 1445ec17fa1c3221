//! Address set resolution, lookup table diffing, and extension chunking
//!
//! Pure functions: the orchestrator uses these to decide what a trade needs
//! before anything touches the network.

use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use std::collections::HashSet;

use crate::market::InstructionSet;

/// Every address a trade's transactions will reference: each instruction's
/// program id plus every account key, deduplicated, in first-seen order.
/// An instruction with no accounts still contributes its program id.
pub fn resolve_account_set(set: &InstructionSet) -> Vec<Pubkey> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    let all = set
        .setup_instructions
        .iter()
        .chain(set.trade_instructions.iter());
    for ix in all {
        if seen.insert(ix.program_id) {
            out.push(ix.program_id);
        }
        for meta in &ix.accounts {
            if seen.insert(meta.pubkey) {
                out.push(meta.pubkey);
            }
        }
    }

    out
}

/// Addresses in `required` that are not yet in `existing`, order-stable over
/// `required` with duplicates removed. Exact key equality, no normalization.
pub fn diff_addresses(required: &[Pubkey], existing: &HashSet<Pubkey>) -> Vec<Pubkey> {
    let mut seen = HashSet::new();
    required
        .iter()
        .filter(|addr| !existing.contains(addr) && seen.insert(**addr))
        .copied()
        .collect()
}

/// Split into consecutive groups of at most `max_chunk`. The last group may
/// be short; empty input yields no groups (nothing to do, not an error).
pub fn chunk_addresses(addresses: &[Pubkey], max_chunk: usize) -> Vec<Vec<Pubkey>> {
    if addresses.is_empty() || max_chunk == 0 {
        return Vec::new();
    }
    addresses.chunks(max_chunk).map(|c| c.to_vec()).collect()
}
