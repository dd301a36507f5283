use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::U256;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use tipflow_chain_mock::{DemoAccounts, DemoScenario};
use tipflow_client::{
    ChainError, ClientConfig, EscrowChain, FileStore, FundingError, LedgerError, LedgerSnapshot,
    MemoryStore, MockChain, OnChainEffect, ReconcileOutcome, SessionStore, SettleOutcome,
    StoreError, StoredLedger, SubmissionError, TipFlowClient, TipFlowError, TipRecord,
};
use tipflow_crypto::{compute_commitment_hash, recover_eth_signer, SettlementSigner};
use tipflow_types::{
    contracts::ITipFlowSession, Address, Amount, CallKind, ContractCall, DomainSeparator,
    OnChainSession, SessionId, TokenDomain, TxReceipt,
};

const CHAIN_ID: u64 = 84532;

fn units(value: u64) -> Amount {
    Amount::from(value)
}

struct Harness {
    accounts: DemoAccounts,
    chain: MockChain,
    config: ClientConfig,
}

impl Harness {
    fn new() -> Self {
        let scenario = DemoScenario::new(CHAIN_ID).unwrap();
        let config = ClientConfig::new(CHAIN_ID, scenario.chain.escrow, scenario.chain.token);
        Self {
            accounts: scenario.accounts,
            chain: MockChain::new(scenario.chain),
            config,
        }
    }

    fn alice_signer(&self) -> SettlementSigner {
        SettlementSigner::direct(self.accounts.alice.clone())
    }

    fn bob_signer(&self) -> SettlementSigner {
        SettlementSigner::contract_account(self.accounts.bob.clone(), self.accounts.bob_account)
    }

    fn client<S: SessionStore>(
        &self,
        signer: SettlementSigner,
        store: S,
    ) -> TipFlowClient<MockChain, S> {
        TipFlowClient::new(self.chain.clone(), store, self.config.clone(), signer).unwrap()
    }

    fn alice(&self) -> TipFlowClient<MockChain, MemoryStore> {
        self.client(self.alice_signer(), MemoryStore::new())
    }

    fn bob(&self) -> TipFlowClient<MockChain, MemoryStore> {
        self.client(self.bob_signer(), MemoryStore::new())
    }

    fn count(&self, kind: CallKind) -> usize {
        self.chain
            .with_escrow(|escrow| escrow.count_calls(kind))
            .unwrap()
    }
}

#[tokio::test]
async fn scenario_a_rejects_overspend_and_keeps_ledger() {
    let harness = Harness::new();
    let (r1, r2) = (harness.accounts.creator_one, harness.accounts.creator_two);
    let mut alice = harness.alice();

    alice.open_session(units(100)).await.unwrap();
    assert_eq!(alice.tip(r1, units(40)).unwrap(), units(40));
    assert_eq!(alice.tip(r1, units(10)).unwrap(), units(50));

    let err = alice.tip(r2, units(60)).unwrap_err();
    assert!(matches!(
        err,
        TipFlowError::Ledger(LedgerError::InsufficientSessionBalance { .. })
    ));
    assert_eq!(err.on_chain_effect(), OnChainEffect::None);

    let status = alice.status();
    assert_eq!(status.tips.len(), 1);
    assert_eq!(status.tips[0].recipient, r1.to_string());
    assert_eq!(status.total_tipped, units(50));
    assert_eq!(status.remaining, units(50));
}

#[tokio::test]
async fn scenario_b_settles_in_first_tip_order() {
    let harness = Harness::new();
    let (r1, r2) = (harness.accounts.creator_one, harness.accounts.creator_two);
    let mut alice = harness.alice();

    let receipt = alice.open_session(units(100)).await.unwrap();
    alice.tip(r1, units(30)).unwrap();
    alice.tip(r2, units(30)).unwrap();

    let input = alice.ledger().settlement_input().unwrap();
    assert_eq!(input.recipients(), &[r1, r2]);
    assert_eq!(input.amounts(), &[units(30), units(30)]);
    let commitment = compute_commitment_hash(&input);
    let signature = alice
        .signer()
        .sign_commitment(&commitment, None)
        .unwrap();
    assert_eq!(
        recover_eth_signer(commitment.as_bytes(), &signature).unwrap(),
        receipt.creator
    );

    let outcome = alice.settle().await.unwrap();
    assert!(matches!(outcome, SettleOutcome::Settled { recipients: 2, .. }));
    assert!(!alice.ledger().is_open());
    assert!(alice.ledger().tips().is_empty());

    harness
        .chain
        .with_escrow(|escrow| {
            assert!(!escrow.session(receipt.session_id).active);
            assert_eq!(escrow.credited(r1), units(30));
            assert_eq!(escrow.credited(r2), units(30));
            assert_eq!(escrow.token_balance(harness.accounts.alice.address()), units(40));
        })
        .unwrap();
}

#[tokio::test]
async fn scenario_c_reconcile_clears_inactive_session() {
    let harness = Harness::new();
    let mut alice = harness.alice();
    let receipt = alice.open_session(units(100)).await.unwrap();
    alice.tip(harness.accounts.creator_one, units(20)).unwrap();

    harness
        .chain
        .with_escrow(|escrow| escrow.deactivate_session(receipt.session_id))
        .unwrap();
    assert_eq!(
        alice.reconcile_once().await.unwrap(),
        ReconcileOutcome::Invalidated(receipt.session_id)
    );
    let snapshot = alice.ledger().snapshot();
    assert_eq!(snapshot.session_id, None);
    assert!(snapshot.tips.is_empty());
    assert_eq!(snapshot.deposited_amount, Amount::ZERO);

    assert_eq!(alice.reconcile_once().await.unwrap(), ReconcileOutcome::Idle);
}

#[tokio::test]
async fn reconcile_clears_session_the_chain_never_saw() {
    let harness = Harness::new();
    let mut alice = harness.alice();
    let receipt = alice.open_session(units(100)).await.unwrap();
    harness
        .chain
        .with_escrow(|escrow| escrow.forget_session(receipt.session_id))
        .unwrap();
    assert_eq!(
        alice.reconcile_once().await.unwrap(),
        ReconcileOutcome::Invalidated(receipt.session_id)
    );
}

#[tokio::test]
async fn scenario_d_permits_only_the_shortfall() {
    let harness = Harness::new();
    let mut bob = harness.bob();
    let receipt = bob.open_session(units(100)).await.unwrap();
    assert_eq!(receipt.creator, harness.accounts.bob_account);
    assert_eq!(harness.count(CallKind::Permit), 1);
    assert_eq!(harness.count(CallKind::TransferFrom), 1);
    harness
        .chain
        .with_escrow(|escrow| {
            assert_eq!(escrow.permit_nonce(harness.accounts.bob.address()), U256::from(1u64));
            assert_eq!(escrow.token_balance(harness.accounts.bob.address()), units(960));
        })
        .unwrap();

    let covered = Harness::new();
    covered
        .chain
        .with_escrow(|escrow| escrow.mint(covered.accounts.bob_account, units(40)))
        .unwrap();
    covered.bob().open_session(units(100)).await.unwrap();
    assert_eq!(covered.count(CallKind::Permit), 0);
    assert_eq!(covered.count(CallKind::CreateSession), 1);
}

#[tokio::test]
async fn insufficient_combined_balance_sends_nothing() {
    let harness = Harness::new();
    let err = harness.bob().open_session(units(2_000)).await.unwrap_err();
    assert!(matches!(
        err,
        TipFlowError::Funding(FundingError::InsufficientFunds { shortfall, .. })
            if shortfall == units(940)
    ));
    assert_eq!(err.on_chain_effect(), OnChainEffect::None);
    assert!(harness.chain.with_escrow(|escrow| escrow.calls.is_empty()).unwrap());
}

#[tokio::test]
async fn settling_without_tips_refunds_the_deposit() {
    let harness = Harness::new();
    let mut alice = harness.alice();
    alice.open_session(units(70)).await.unwrap();

    let outcome = alice.settle().await.unwrap();
    assert!(matches!(
        outcome,
        SettleOutcome::Settled { recipients: 0, total, .. } if total == Amount::ZERO
    ));
    assert_eq!(
        harness
            .chain
            .with_escrow(|escrow| escrow.token_balance(harness.accounts.alice.address()))
            .unwrap(),
        units(100)
    );
}

#[tokio::test]
async fn contract_account_settles_through_bundle() {
    let harness = Harness::new();
    let mut bob = harness.bob();
    bob.open_session(units(100)).await.unwrap();
    bob.tip(harness.accounts.creator_two, units(25)).unwrap();

    let outcome = bob.settle().await.unwrap();
    assert!(matches!(outcome, SettleOutcome::Settled { total, .. } if total == units(25)));
    harness
        .chain
        .with_escrow(|escrow| {
            assert_eq!(escrow.credited(harness.accounts.creator_two), units(25));
            assert_eq!(escrow.token_balance(harness.accounts.bob_account), units(75));
            assert!(escrow
                .calls
                .iter()
                .filter(|call| call.sender == harness.accounts.bob_account)
                .all(|call| call.bundled));
        })
        .unwrap();
}

#[tokio::test]
async fn missing_domain_separator_keeps_tips() {
    let harness = Harness::new();
    let mut bob = harness.bob();
    bob.open_session(units(100)).await.unwrap();
    bob.tip(harness.accounts.creator_one, units(10)).unwrap();
    harness
        .chain
        .with_escrow(|escrow| escrow.faults.domain_separator_unavailable = true)
        .unwrap();

    let err = bob.settle().await.unwrap_err();
    assert!(matches!(err, TipFlowError::DomainSeparator { .. }));
    assert!(err.is_retryable());
    assert_eq!(bob.status().total_tipped, units(10));
    assert_eq!(harness.count(CallKind::SettleSession), 0);
}

#[tokio::test]
async fn stale_session_is_resolved_without_submitting() {
    let harness = Harness::new();
    let mut alice = harness.alice();
    let receipt = alice.open_session(units(100)).await.unwrap();
    alice.tip(harness.accounts.creator_one, units(10)).unwrap();
    harness
        .chain
        .with_escrow(|escrow| escrow.deactivate_session(receipt.session_id))
        .unwrap();

    assert_eq!(
        alice.settle().await.unwrap(),
        SettleOutcome::AlreadyResolved {
            session_id: receipt.session_id
        }
    );
    assert!(!alice.ledger().is_open());
    assert_eq!(harness.count(CallKind::SettleSession), 0);
}

#[tokio::test]
async fn failed_settlement_keeps_tips_for_retry() {
    let harness = Harness::new();
    let mut alice = harness.alice();
    alice.open_session(units(100)).await.unwrap();
    alice.tip(harness.accounts.creator_one, units(35)).unwrap();
    harness
        .chain
        .with_escrow(|escrow| escrow.faults.revert_next = Some(CallKind::SettleSession))
        .unwrap();

    let err = alice.settle().await.unwrap_err();
    assert!(matches!(
        err,
        TipFlowError::Settlement {
            source: SubmissionError::Sequential {
                failed: CallKind::SettleSession,
                ..
            },
            ..
        }
    ));
    assert_eq!(err.on_chain_effect(), OnChainEffect::None);
    assert!(err.is_retryable());
    assert_eq!(alice.status().total_tipped, units(35));

    assert!(matches!(
        alice.settle().await.unwrap(),
        SettleOutcome::Settled { .. }
    ));
    assert_eq!(
        harness
            .chain
            .with_escrow(|escrow| escrow.credited(harness.accounts.creator_one))
            .unwrap(),
        units(35)
    );
}

#[tokio::test]
async fn malformed_recipient_clears_session() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    let identity = harness.accounts.alice.address();
    let corrupted = LedgerSnapshot {
        session_id: Some(SessionId::new([0x44; 32])),
        deposited_amount: units(100),
        tips: vec![
            TipRecord {
                recipient: harness.accounts.creator_one.to_string(),
                amount: units(10),
            },
            TipRecord {
                recipient: "0xnot-an-address".to_string(),
                amount: units(5),
            },
        ],
    };
    FileStore::new(dir.path())
        .save(identity, &corrupted, 0)
        .unwrap();

    let mut alice = harness.client(harness.alice_signer(), FileStore::new(dir.path()));
    assert!(alice.ledger().is_open());
    let err = alice.settle().await.unwrap_err();
    assert!(matches!(
        err,
        TipFlowError::CorruptedLedger {
            source: LedgerError::MalformedRecipient(_),
            ..
        }
    ));
    assert!(!alice.ledger().is_open());
    assert_eq!(harness.count(CallKind::SettleSession), 0);

    let stored = FileStore::new(dir.path()).load(identity).unwrap().unwrap();
    assert_eq!(stored.snapshot, LedgerSnapshot::default());
}

#[tokio::test]
async fn funding_failure_reports_confirmed_steps() {
    let harness = Harness::new();
    let mut alice = harness.alice();
    harness
        .chain
        .with_escrow(|escrow| escrow.faults.revert_next = Some(CallKind::CreateSession))
        .unwrap();

    let err = alice.open_session(units(100)).await.unwrap_err();
    let TipFlowError::Funding(FundingError::Submission(submission)) = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(submission.confirmed(), &[CallKind::Approve]);
    assert_eq!(err.on_chain_effect(), OnChainEffect::Confirmed);
    assert!(!alice.ledger().is_open());
    harness
        .chain
        .with_escrow(|escrow| {
            let alice = harness.accounts.alice.address();
            assert_eq!(escrow.allowance(alice, escrow.escrow), units(100));
            assert_eq!(escrow.token_balance(alice), units(100));
        })
        .unwrap();
}

#[tokio::test]
async fn missing_creation_event_is_untracked() {
    let harness = Harness::new();
    let mut alice = harness.alice();
    harness
        .chain
        .with_escrow(|escrow| escrow.faults.omit_creation_event = true)
        .unwrap();

    let err = alice.open_session(units(100)).await.unwrap_err();
    assert!(matches!(
        err,
        TipFlowError::Funding(FundingError::UntrackedSession { .. })
    ));
    assert_eq!(err.on_chain_effect(), OnChainEffect::Confirmed);
    assert!(!alice.ledger().is_open());
}

#[tokio::test]
async fn ledger_survives_restart() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    let receipt = {
        let mut alice = harness.client(harness.alice_signer(), FileStore::new(dir.path()));
        let receipt = alice.open_session(units(100)).await.unwrap();
        alice.tip(harness.accounts.creator_one, units(12)).unwrap();
        alice.tip(harness.accounts.creator_two, units(8)).unwrap();
        receipt
    };

    let mut restarted = harness.client(harness.alice_signer(), FileStore::new(dir.path()));
    let status = restarted.status();
    assert_eq!(status.session.map(|session| session.id), Some(receipt.session_id));
    assert_eq!(status.total_tipped, units(20));
    assert_eq!(
        status.tips[0].recipient,
        harness.accounts.creator_one.to_string()
    );
    assert!(matches!(
        restarted.settle().await.unwrap(),
        SettleOutcome::Settled { recipients: 2, .. }
    ));
}

#[tokio::test]
async fn concurrent_writers_conflict_instead_of_clobbering() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    let mut first = harness.client(harness.alice_signer(), FileStore::new(dir.path()));
    first.open_session(units(100)).await.unwrap();
    let mut second = harness.client(harness.alice_signer(), FileStore::new(dir.path()));

    first.tip(harness.accounts.creator_one, units(10)).unwrap();
    let err = second
        .tip(harness.accounts.creator_two, units(10))
        .unwrap_err();
    assert!(matches!(err, TipFlowError::Store(StoreError::Conflict { .. })));
    assert_eq!(second.status().total_tipped, Amount::ZERO);

    let stored = FileStore::new(dir.path())
        .load(harness.accounts.alice.address())
        .unwrap()
        .unwrap();
    assert_eq!(stored.snapshot.tips.len(), 1);
}

/// Chain wrapper that interferes with `settleSession` submissions.
struct InterposedChain {
    inner: MockChain,
    fault: SettleFault,
    bundles: bool,
}

#[derive(Clone, Copy)]
enum SettleFault {
    /// The session ends on-chain between the liveness check and submission.
    DeactivateFirst,
    /// The settlement lands but its confirmation is lost.
    LoseConfirmation,
}

#[async_trait(?Send)]
impl EscrowChain for InterposedChain {
    async fn token_balance(&self, token: Address, account: Address) -> Result<Amount, ChainError> {
        self.inner.token_balance(token, account).await
    }

    async fn permit_nonce(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        self.inner.permit_nonce(token, owner).await
    }

    async fn token_domain(&self, token: Address) -> Result<TokenDomain, ChainError> {
        self.inner.token_domain(token).await
    }

    async fn session(
        &self,
        escrow: Address,
        session_id: SessionId,
    ) -> Result<OnChainSession, ChainError> {
        self.inner.session(escrow, session_id).await
    }

    async fn pending_withdrawal(
        &self,
        escrow: Address,
        account: Address,
    ) -> Result<Amount, ChainError> {
        self.inner.pending_withdrawal(escrow, account).await
    }

    async fn domain_separator(&self, account: Address) -> Result<DomainSeparator, ChainError> {
        self.inner.domain_separator(account).await
    }

    async fn latest_timestamp(&self) -> Result<u64, ChainError> {
        self.inner.latest_timestamp().await
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.inner.chain_id().await
    }

    async fn send_call(&self, from: Address, call: ContractCall) -> Result<TxReceipt, ChainError> {
        if call.kind != CallKind::SettleSession {
            return self.inner.send_call(from, call).await;
        }
        match self.fault {
            SettleFault::DeactivateFirst => {
                let decoded = ITipFlowSession::settleSessionCall::abi_decode(&call.data)
                    .map_err(|err| ChainError::Decode(err.to_string()))?;
                let session_id = SessionId::new(decoded.sessionId.0);
                self.inner
                    .with_escrow(|escrow| escrow.deactivate_session(session_id))?;
                self.inner.send_call(from, call).await
            }
            SettleFault::LoseConfirmation => {
                self.inner.send_call(from, call).await?;
                Err(ChainError::Timeout)
            }
        }
    }

    async fn send_bundle(
        &self,
        account: Address,
        calls: Vec<ContractCall>,
    ) -> Result<TxReceipt, ChainError> {
        self.inner.send_bundle(account, calls).await
    }

    fn supports_bundles(&self) -> bool {
        self.bundles
    }
}

fn interposed<S: SessionStore>(
    harness: &Harness,
    fault: SettleFault,
    store: S,
) -> TipFlowClient<InterposedChain, S> {
    let chain = InterposedChain {
        inner: harness.chain.clone(),
        fault,
        bundles: true,
    };
    TipFlowClient::new(chain, store, harness.config.clone(), harness.alice_signer()).unwrap()
}

/// Memory store whose saves can be switched to fail.
#[derive(Default)]
struct SwitchableStore {
    inner: MemoryStore,
    failing: Arc<AtomicBool>,
}

impl SessionStore for SwitchableStore {
    fn load(&self, identity: Address) -> Result<Option<StoredLedger>, StoreError> {
        self.inner.load(identity)
    }

    fn save(
        &self,
        identity: Address,
        snapshot: &LedgerSnapshot,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                path: PathBuf::from("ledger.json"),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.save(identity, snapshot, expected_revision)
    }
}

#[tokio::test]
async fn inactive_revert_during_settlement_clears_state() {
    let harness = Harness::new();
    let mut alice = interposed(&harness, SettleFault::DeactivateFirst, MemoryStore::new());
    let receipt = alice.open_session(units(100)).await.unwrap();
    alice.tip(harness.accounts.creator_one, units(10)).unwrap();

    assert_eq!(
        alice.settle().await.unwrap(),
        SettleOutcome::AlreadyResolved {
            session_id: receipt.session_id
        }
    );
    assert!(!alice.ledger().is_open());
    assert_eq!(harness.count(CallKind::SettleSession), 0);
}

#[tokio::test]
async fn lost_confirmation_defers_to_chain_state() {
    let harness = Harness::new();
    let mut alice = interposed(&harness, SettleFault::LoseConfirmation, MemoryStore::new());
    let receipt = alice.open_session(units(100)).await.unwrap();
    alice.tip(harness.accounts.creator_one, units(10)).unwrap();

    assert_eq!(
        alice.settle().await.unwrap(),
        SettleOutcome::AlreadyResolved {
            session_id: receipt.session_id
        }
    );
    assert!(!alice.ledger().is_open());
    assert_eq!(
        harness
            .chain
            .with_escrow(|escrow| escrow.credited(harness.accounts.creator_one))
            .unwrap(),
        units(10)
    );
}

#[tokio::test]
async fn lost_confirmation_with_failing_store_keeps_tips() {
    let harness = Harness::new();
    let store = SwitchableStore::default();
    let failing = Arc::clone(&store.failing);
    let mut alice = interposed(&harness, SettleFault::LoseConfirmation, store);
    let receipt = alice.open_session(units(100)).await.unwrap();
    alice.tip(harness.accounts.creator_one, units(10)).unwrap();

    failing.store(true, Ordering::SeqCst);
    let err = alice.settle().await.unwrap_err();
    assert!(matches!(
        err,
        TipFlowError::Unpersisted { session_id, source: StoreError::Io { .. } }
            if session_id == receipt.session_id
    ));
    assert_eq!(err.on_chain_effect(), OnChainEffect::Confirmed);
    assert!(alice.ledger().is_open());
    assert_eq!(alice.status().total_tipped, units(10));

    failing.store(false, Ordering::SeqCst);
    assert_eq!(
        alice.settle().await.unwrap(),
        SettleOutcome::AlreadyResolved {
            session_id: receipt.session_id
        }
    );
    assert!(!alice.ledger().is_open());
    assert_eq!(harness.count(CallKind::SettleSession), 1);
}

#[tokio::test]
async fn contract_account_needs_a_bundler() {
    let harness = Harness::new();
    let chain = InterposedChain {
        inner: harness.chain.clone(),
        fault: SettleFault::LoseConfirmation,
        bundles: false,
    };
    let err = TipFlowClient::new(
        chain,
        MemoryStore::new(),
        harness.config.clone(),
        harness.bob_signer(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, TipFlowError::Chain(ChainError::Unsupported(_))));
    assert!(!err.is_retryable());
    assert!(harness.chain.with_escrow(|escrow| escrow.calls.is_empty()).unwrap());
}

#[tokio::test]
async fn withdraw_claims_credited_tips() {
    let harness = Harness::new();
    let mut alice = harness.alice();
    alice.open_session(units(50)).await.unwrap();
    alice.tip(harness.accounts.bob.address(), units(20)).unwrap();
    alice.settle().await.unwrap();

    let bob_key = harness.client(
        SettlementSigner::direct(harness.accounts.bob.clone()),
        MemoryStore::new(),
    );
    assert_eq!(bob_key.pending_withdrawal().await.unwrap(), units(20));
    let withdrawal = bob_key.withdraw().await.unwrap().unwrap();
    assert_eq!(withdrawal.amount, units(20));
    assert_eq!(bob_key.pending_withdrawal().await.unwrap(), Amount::ZERO);
    assert!(bob_key.withdraw().await.unwrap().is_none());
    assert_eq!(
        harness
            .chain
            .with_escrow(|escrow| escrow.token_balance(harness.accounts.bob.address()))
            .unwrap(),
        units(1_020)
    );
}
