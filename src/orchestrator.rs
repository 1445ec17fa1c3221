//! Pipeline orchestration
//!
//! Sequences the run: resolve or create the lookup table, register missing
//! addresses chunk by chunk, gate on table readability, then submit setup and
//! trade transactions in order. Strictly sequential; each phase depends on
//! the externally-confirmed side effects of the previous one. Any
//! unrecoverable failure aborts the rest of the run with no rollback:
//! already-confirmed on-chain effects stay, and an operator resumes by hand.
//!
//! Concurrent runs against the same table are not guarded; the table
//! authority is an implicit single-writer lock.

use solana_sdk::pubkey::Pubkey;
use std::fmt;
use tracing::{info, warn};

use crate::accounts::{chunk_addresses, diff_addresses, resolve_account_set};
use crate::config::{Config, TradeIntent};
use crate::ledger::{LedgerClient, LedgerError};
use crate::lut::{LutError, LutLifecycle, TableState, MAX_EXTEND_PER_TX};
use crate::market::{MarketClient, MarketError};
use crate::retry::RetryPolicy;
use crate::setup::detect_missing;
use crate::signer::{SignError, TxSubmitter};
use crate::tx::{self, ComposeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Table,
    Extension,
    Setup,
    Trade,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Table => "table",
            Phase::Extension => "extension",
            Phase::Setup => "setup",
            Phase::Trade => "trade",
        };
        f.write_str(name)
    }
}

/// "Skipped" is a real outcome, distinct from a submission: a skipped phase
/// sent nothing to the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Submitted(String),
    Skipped,
}

/// Per-run summary, printed at the end so an operator can resume by hand
/// from the last completed phase after an abort.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub table: Pubkey,
    pub estimated_out: u64,
    pub extension_batches: Vec<usize>,
    pub phases: Vec<(Phase, PhaseOutcome)>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Lut(#[from] LutError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Market(#[from] MarketError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Vault address: payer, table authority, trade owner
    pub authority: Pubkey,
    /// Reuse this table when set; create and own one when not
    pub table_address: Option<Pubkey>,
    pub cu_limit: u32,
    pub priority_fee: u64,
    pub policy: RetryPolicy,
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            authority: config.authority,
            table_address: config.lut_address,
            cu_limit: config.cu_limit,
            priority_fee: config.priority_fee,
            policy: config.retry_policy(),
        }
    }
}

pub struct Orchestrator<'a, L, M, S> {
    ledger: &'a L,
    market: &'a M,
    submitter: &'a S,
    settings: OrchestratorSettings,
}

impl<'a, L, M, S> Orchestrator<'a, L, M, S>
where
    L: LedgerClient,
    M: MarketClient,
    S: TxSubmitter,
{
    pub fn new(
        ledger: &'a L,
        market: &'a M,
        submitter: &'a S,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            ledger,
            market,
            submitter,
            settings,
        }
    }

    pub async fn run(&self, intent: &TradeIntent) -> Result<RunReport, PipelineError> {
        let mut phases = Vec::new();
        let settings = &self.settings;

        let lifecycle = LutLifecycle::new(
            self.ledger,
            self.submitter,
            settings.authority,
            settings.priority_fee,
            settings.policy,
        );

        // Phase: table, reuse or create.
        info!("Phase table: resolving lookup table");
        let mut handle = lifecycle.create_or_reuse(settings.table_address).await?;
        phases.push((Phase::Table, PhaseOutcome::Completed));

        // Estimate up front; an unpriceable trade aborts before anything
        // else is submitted.
        let estimated_out = self.market.estimate_output(intent).await?;
        info!(
            "Estimated output: {} (amount {}, slippage {} bps)",
            estimated_out, intent.amount, intent.slippage_bps
        );

        // Address discovery uses a sentinel-sized probe: only the shape of
        // the instructions matters here, the sized build comes later.
        let discovery = self.market.build_instructions(&intent.shape_probe()).await?;
        let required = resolve_account_set(&discovery);
        if required.is_empty() {
            // Legal: nothing to register, not an error.
            warn!("Trade resolves to zero required addresses");
        }

        // Phase: extension, diff then chunk then extend sequentially.
        let missing = diff_addresses(&required, &handle.known_set());
        let mut extension_batches = Vec::new();
        if missing.is_empty() {
            info!(
                "Phase extension: skipped, table already holds all {} required addresses",
                required.len()
            );
            phases.push((Phase::Extension, PhaseOutcome::Skipped));
        } else {
            let chunks = chunk_addresses(&missing, MAX_EXTEND_PER_TX);
            info!(
                "Phase extension: registering {} addresses in {} batch(es)",
                missing.len(),
                chunks.len()
            );
            for chunk in &chunks {
                // One batch at a time; each must be accepted before the
                // next so extensions never race on the table.
                lifecycle.extend(&mut handle, chunk).await?;
                extension_batches.push(chunk.len());
            }
            phases.push((Phase::Extension, PhaseOutcome::Completed));
        }

        // Nothing that references the table is built before it is readable.
        let table = lifecycle.await_readable(&handle.address).await?;
        handle.state = TableState::Readable;

        // Sized instruction set for the real submissions. It can resolve to
        // addresses the sentinel probe never saw; those get a late extension
        // round here so the trade never has to fall back to static keys.
        let instruction_set = self.market.build_instructions(intent).await?;
        let required = resolve_account_set(&instruction_set);
        let late_missing = diff_addresses(&required, &handle.known_set());
        if !late_missing.is_empty() {
            let chunks = chunk_addresses(&late_missing, MAX_EXTEND_PER_TX);
            info!(
                "Phase extension: sized instructions added {} address(es), registering in {} batch(es)",
                late_missing.len(),
                chunks.len()
            );
            for chunk in &chunks {
                lifecycle.extend(&mut handle, chunk).await?;
                extension_batches.push(chunk.len());
            }
        }

        // Phase: setup, dropping creations whose target already exists; an
        // empty remainder skips the submission entirely.
        let setup_ops =
            detect_missing(self.ledger, instruction_set.setup_instructions.clone()).await?;
        if setup_ops.is_empty() {
            info!("Phase setup: skipped, all prerequisite accounts exist");
            phases.push((Phase::Setup, PhaseOutcome::Skipped));
        } else {
            info!("Phase setup: submitting {} instruction(s)", setup_ops.len());
            let blockhash = self.ledger.latest_blockhash().await?;
            let instructions =
                tx::with_compute_budget(settings.cu_limit, settings.priority_fee, setup_ops);
            let message = tx::build_message(
                &settings.authority,
                &instructions,
                std::slice::from_ref(&table),
                blockhash,
            )?;
            let reference = self
                .submitter
                .submit(&message, "setup")
                .await?
                .into_accepted()?;
            info!("Phase setup: submitted ({reference})");
            phases.push((Phase::Setup, PhaseOutcome::Submitted(reference)));
        }

        // Fresh confirmed read before the trade, never the cached copy, and
        // gated on everything the sized instructions resolve to: the trade
        // must not reference a table missing any required address.
        let table = lifecycle.await_registered(&handle.address, &required).await?;

        // Phase: trade.
        info!(
            "Phase trade: submitting {} instruction(s) via table {}",
            instruction_set.trade_instructions.len(),
            table.key
        );
        let blockhash = self.ledger.latest_blockhash().await?;
        let instructions = tx::with_compute_budget(
            settings.cu_limit,
            settings.priority_fee,
            instruction_set.trade_instructions,
        );
        let message = tx::build_message(
            &settings.authority,
            &instructions,
            std::slice::from_ref(&table),
            blockhash,
        )?;
        let reference = self
            .submitter
            .submit(&message, "trade")
            .await?
            .into_accepted()?;
        info!("Phase trade: submitted ({reference})");
        handle.state = TableState::ReferencedByTrade;
        phases.push((Phase::Trade, PhaseOutcome::Submitted(reference)));

        Ok(RunReport {
            table: handle.address,
            estimated_out,
            extension_batches,
            phases,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradeAction;
    use crate::market::InstructionSet;
    use crate::signer::SubmissionResult;
    use async_trait::async_trait;
    use solana_sdk::{
        address_lookup_table::{
            instruction::derive_lookup_table_address, AddressLookupTableAccount,
        },
        hash::Hash,
        instruction::{AccountMeta, Instruction},
        message::VersionedMessage,
    };
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct StubLedger {
        tables: HashMap<Pubkey, Vec<Pubkey>>,
        existing: HashSet<Pubkey>,
        table_reads: AtomicUsize,
    }

    impl StubLedger {
        fn new(tables: HashMap<Pubkey, Vec<Pubkey>>, existing: HashSet<Pubkey>) -> Self {
            Self {
                tables,
                existing,
                table_reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LedgerClient for StubLedger {
        async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
            Ok(Hash::default())
        }

        async fn current_slot(&self) -> Result<u64, LedgerError> {
            Ok(100)
        }

        async fn accounts_exist(&self, addresses: &[Pubkey]) -> Result<Vec<bool>, LedgerError> {
            Ok(addresses
                .iter()
                .map(|a| self.existing.contains(a))
                .collect())
        }

        async fn get_lookup_table(
            &self,
            address: &Pubkey,
        ) -> Result<Option<AddressLookupTableAccount>, LedgerError> {
            self.table_reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.tables.get(address).map(|addresses| {
                AddressLookupTableAccount {
                    key: *address,
                    addresses: addresses.clone(),
                }
            }))
        }
    }

    struct StubMarket {
        set: InstructionSet,
        /// Returned for sized (non-probe) builds when present.
        sized: Option<InstructionSet>,
        estimate: Option<u64>,
    }

    #[async_trait]
    impl MarketClient for StubMarket {
        async fn estimate_output(&self, _intent: &TradeIntent) -> Result<u64, MarketError> {
            self.estimate.ok_or(MarketError::Unavailable)
        }

        async fn build_instructions(
            &self,
            intent: &TradeIntent,
        ) -> Result<InstructionSet, MarketError> {
            if intent.amount != crate::config::SHAPE_PROBE_AMOUNT {
                if let Some(sized) = &self.sized {
                    return Ok(sized.clone());
                }
            }
            Ok(self.set.clone())
        }
    }

    struct StubSubmitter {
        labels: Mutex<Vec<String>>,
        reject: Option<&'static str>,
    }

    impl StubSubmitter {
        fn accepting() -> Self {
            Self {
                labels: Mutex::new(Vec::new()),
                reject: None,
            }
        }

        fn rejecting(label: &'static str) -> Self {
            Self {
                labels: Mutex::new(Vec::new()),
                reject: Some(label),
            }
        }

        fn labels(&self) -> Vec<String> {
            self.labels.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TxSubmitter for StubSubmitter {
        async fn submit(
            &self,
            _message: &VersionedMessage,
            label: &str,
        ) -> Result<SubmissionResult, SignError> {
            let mut labels = self.labels.lock().unwrap();
            labels.push(label.to_string());
            let n = labels.len();

            if self.reject == Some(label) {
                return Ok(SubmissionResult {
                    accepted: false,
                    reference: String::new(),
                    error_detail: Some("rejected by test".to_string()),
                });
            }

            Ok(SubmissionResult {
                accepted: true,
                reference: format!("{label}-{n}"),
                error_detail: None,
            })
        }
    }

    fn intent() -> TradeIntent {
        TradeIntent {
            market: Pubkey::new_unique(),
            action: TradeAction::Buy,
            amount: 1_000_000,
            slippage_bps: 50,
        }
    }

    fn settings(authority: Pubkey, table: Option<Pubkey>) -> OrchestratorSettings {
        OrchestratorSettings {
            authority,
            table_address: table,
            cu_limit: 600_000,
            priority_fee: 1,
            policy: RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50)),
        }
    }

    fn trade_ix(program: Pubkey, keys: &[Pubkey], signer: Pubkey) -> Instruction {
        let mut accounts = vec![AccountMeta::new(signer, true)];
        accounts.extend(keys.iter().map(|k| AccountMeta::new_readonly(*k, false)));
        Instruction {
            program_id: program,
            accounts,
            data: vec![1, 2, 3],
        }
    }

    fn setup_ix(payer: Pubkey, target: Pubkey) -> Instruction {
        Instruction {
            program_id: spl_associated_token_account::id(),
            accounts: vec![
                AccountMeta::new(payer, true),
                AccountMeta::new(target, false),
            ],
            data: vec![],
        }
    }

    fn outcome(report: &RunReport, phase: Phase) -> &PhaseOutcome {
        &report
            .phases
            .iter()
            .find(|(p, _)| *p == phase)
            .expect("phase missing from report")
            .1
    }

    #[tokio::test]
    async fn reuse_path_with_populated_table_skips_extension() {
        let authority = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let keys: Vec<Pubkey> = (0..6).map(|_| Pubkey::new_unique()).collect();

        let set = InstructionSet {
            setup_instructions: vec![],
            trade_instructions: vec![trade_ix(program, &keys, authority)],
        };

        // Pre-populate the table with everything the trade resolves to.
        let mut all = vec![program, authority];
        all.extend(&keys);
        let table_address = Pubkey::new_unique();
        let ledger = StubLedger::new(
            HashMap::from([(table_address, all)]),
            HashSet::new(),
        );
        let market = StubMarket {
            set,
            sized: None,
            estimate: Some(42),
        };
        let submitter = StubSubmitter::accepting();

        let orchestrator = Orchestrator::new(
            &ledger,
            &market,
            &submitter,
            settings(authority, Some(table_address)),
        );
        let report = orchestrator.run(&intent()).await.unwrap();

        assert_eq!(*outcome(&report, Phase::Extension), PhaseOutcome::Skipped);
        assert!(report.extension_batches.is_empty());
        assert!(!submitter
            .labels()
            .iter()
            .any(|l| l == "extend-lookup-table"));
        assert!(matches!(
            outcome(&report, Phase::Trade),
            PhaseOutcome::Submitted(_)
        ));
    }

    #[tokio::test]
    async fn fresh_table_with_45_addresses_extends_in_three_batches() {
        let authority = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        // program + authority + 43 keys = 45 resolved addresses
        let keys: Vec<Pubkey> = (0..43).map(|_| Pubkey::new_unique()).collect();

        let set = InstructionSet {
            setup_instructions: vec![],
            trade_instructions: vec![trade_ix(program, &keys, authority)],
        };

        // The created table derives from (authority, slot); the stub reports
        // it fully propagated once read back.
        let (table_address, _) = derive_lookup_table_address(&authority, 100);
        let mut all = vec![program, authority];
        all.extend(&keys);
        let ledger = StubLedger::new(HashMap::from([(table_address, all)]), HashSet::new());
        let market = StubMarket {
            set,
            sized: None,
            estimate: Some(42),
        };
        let submitter = StubSubmitter::accepting();

        let orchestrator =
            Orchestrator::new(&ledger, &market, &submitter, settings(authority, None));
        let report = orchestrator.run(&intent()).await.unwrap();

        assert_eq!(report.table, table_address);
        assert_eq!(report.extension_batches, vec![20, 20, 5]);

        let labels = submitter.labels();
        assert_eq!(
            labels,
            vec![
                "create-lookup-table",
                "extend-lookup-table",
                "extend-lookup-table",
                "extend-lookup-table",
                "trade",
            ]
        );
    }

    #[tokio::test]
    async fn existing_setup_accounts_skip_setup_and_trade_uses_fresh_read() {
        let authority = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let keys: Vec<Pubkey> = (0..4).map(|_| Pubkey::new_unique()).collect();
        let token_accounts: Vec<Pubkey> = (0..2).map(|_| Pubkey::new_unique()).collect();

        let set = InstructionSet {
            setup_instructions: token_accounts
                .iter()
                .map(|t| setup_ix(authority, *t))
                .collect(),
            trade_instructions: vec![trade_ix(program, &keys, authority)],
        };

        let mut all = vec![spl_associated_token_account::id(), authority];
        all.extend(&token_accounts);
        all.push(program);
        all.extend(&keys);

        let table_address = Pubkey::new_unique();
        let ledger = StubLedger::new(
            HashMap::from([(table_address, all)]),
            token_accounts.iter().copied().collect(),
        );
        let market = StubMarket {
            set,
            sized: None,
            estimate: Some(42),
        };
        let submitter = StubSubmitter::accepting();

        let orchestrator = Orchestrator::new(
            &ledger,
            &market,
            &submitter,
            settings(authority, Some(table_address)),
        );
        let report = orchestrator.run(&intent()).await.unwrap();

        assert_eq!(*outcome(&report, Phase::Setup), PhaseOutcome::Skipped);
        assert!(matches!(
            outcome(&report, Phase::Trade),
            PhaseOutcome::Submitted(_)
        ));
        assert_eq!(submitter.labels(), vec!["trade"]);

        // Seed read + readability gate + fresh pre-trade read.
        assert_eq!(ledger.table_reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn missing_estimate_aborts_before_any_submission() {
        let authority = Pubkey::new_unique();
        let table_address = Pubkey::new_unique();
        let ledger = StubLedger::new(
            HashMap::from([(table_address, vec![])]),
            HashSet::new(),
        );
        let market = StubMarket {
            set: InstructionSet::default(),
            sized: None,
            estimate: None,
        };
        let submitter = StubSubmitter::accepting();

        let orchestrator = Orchestrator::new(
            &ledger,
            &market,
            &submitter,
            settings(authority, Some(table_address)),
        );
        let err = orchestrator.run(&intent()).await.unwrap_err();

        assert!(matches!(err, PipelineError::Market(MarketError::Unavailable)));
        assert!(submitter.labels().is_empty());
    }

    #[tokio::test]
    async fn trade_rejection_aborts_with_detail() {
        let authority = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let keys: Vec<Pubkey> = (0..2).map(|_| Pubkey::new_unique()).collect();

        let set = InstructionSet {
            setup_instructions: vec![],
            trade_instructions: vec![trade_ix(program, &keys, authority)],
        };

        let mut all = vec![program, authority];
        all.extend(&keys);
        let table_address = Pubkey::new_unique();
        let ledger = StubLedger::new(HashMap::from([(table_address, all)]), HashSet::new());
        let market = StubMarket {
            set,
            sized: None,
            estimate: Some(42),
        };
        let submitter = StubSubmitter::rejecting("trade");

        let orchestrator = Orchestrator::new(
            &ledger,
            &market,
            &submitter,
            settings(authority, Some(table_address)),
        );
        let err = orchestrator.run(&intent()).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Sign(SignError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn sized_instructions_with_new_addresses_get_late_extension() {
        let authority = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let keys: Vec<Pubkey> = (0..2).map(|_| Pubkey::new_unique()).collect();
        // Routing shifts between the probe and the sized build.
        let extra = Pubkey::new_unique();

        let probe_set = InstructionSet {
            setup_instructions: vec![],
            trade_instructions: vec![trade_ix(program, &keys, authority)],
        };
        let mut sized_keys = keys.clone();
        sized_keys.push(extra);
        let sized_set = InstructionSet {
            setup_instructions: vec![],
            trade_instructions: vec![trade_ix(program, &sized_keys, authority)],
        };

        let (table_address, _) = derive_lookup_table_address(&authority, 100);
        let mut all = vec![program, authority];
        all.extend(&sized_keys);
        let ledger = StubLedger::new(HashMap::from([(table_address, all)]), HashSet::new());
        let market = StubMarket {
            set: probe_set,
            sized: Some(sized_set),
            estimate: Some(42),
        };
        let submitter = StubSubmitter::accepting();

        let orchestrator =
            Orchestrator::new(&ledger, &market, &submitter, settings(authority, None));
        let report = orchestrator.run(&intent()).await.unwrap();

        // Probe resolves 4 addresses; the sized build adds one more, which
        // is registered in its own batch before the trade is composed.
        assert_eq!(report.extension_batches, vec![4, 1]);
        assert_eq!(
            submitter.labels(),
            vec![
                "create-lookup-table",
                "extend-lookup-table",
                "extend-lookup-table",
                "trade",
            ]
        );
    }
}
