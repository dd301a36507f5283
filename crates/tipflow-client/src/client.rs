//! TipFlowClient: facade tying the ledger, its store, funding, reconciliation,
//! and settlement together for one payer identity.

use std::time::Duration;

use thiserror::Error;
use tipflow_crypto::{compute_commitment_hash, SettlementSigner};
use tipflow_types::{
    Address, Amount, ChainId, CryptoError, Session, SessionId, SessionReceipt, TxHash,
    ValidationError,
};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{
    calls,
    chain::{retry_with_backoff, ChainError, EscrowChain},
    config::ClientConfig,
    funding::{submit_calls, ExecutionPath, FundingError, FundingOrchestrator, SubmissionError},
    ledger::{LedgerError, SessionLedger, TipRecord},
    store::{SessionStore, StoreError},
};

/// Whether a failed operation left anything behind on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnChainEffect {
    /// Nothing was sent, or everything sent was rejected.
    None,
    /// At least one transaction confirmed; local tracking may lag the chain.
    Confirmed,
    /// A submission's fate is unknown (e.g. confirmation timed out).
    Unknown,
}

#[derive(Debug, Error)]
pub enum TipFlowError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Funding(#[from] FundingError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error("node serves chain {found}, client is configured for chain {expected}")]
    WrongNetwork { expected: ChainId, found: u64 },
    #[error("session {session_id} was created by {found}, not {expected}")]
    CreatorMismatch {
        session_id: SessionId,
        expected: Address,
        found: Address,
    },
    #[error("could not fetch domain separator for {account}: {source}")]
    DomainSeparator {
        account: Address,
        #[source]
        source: ChainError,
    },
    #[error("settlement of session {session_id} failed; tips kept for retry: {source}")]
    Settlement {
        session_id: SessionId,
        #[source]
        source: SubmissionError,
    },
    #[error("session {session_id} had corrupted tips and was cleared locally: {source}")]
    CorruptedLedger {
        session_id: SessionId,
        #[source]
        source: LedgerError,
    },
    #[error("on-chain change for session {session_id} confirmed but not persisted: {source}")]
    Unpersisted {
        session_id: SessionId,
        #[source]
        source: StoreError,
    },
}

impl TipFlowError {
    pub fn on_chain_effect(&self) -> OnChainEffect {
        match self {
            Self::Funding(FundingError::UntrackedSession { .. }) | Self::Unpersisted { .. } => {
                OnChainEffect::Confirmed
            }
            Self::Funding(FundingError::Submission(err)) | Self::Submission(err) => {
                submission_effect(err)
            }
            Self::Settlement { source, .. } => submission_effect(source),
            _ => OnChainEffect::None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Chain(err) | Self::Funding(FundingError::Chain(err)) => err.is_retryable(),
            Self::DomainSeparator { source, .. } => !source.is_permanent(),
            Self::Settlement { source, .. } => !submission_is_permanent(source),
            Self::Funding(FundingError::AuthorizationExpired { .. }) => true,
            Self::Funding(FundingError::Submission(err)) | Self::Submission(err) => {
                submission_effect(err) == OnChainEffect::None && !submission_is_permanent(err)
            }
            Self::Store(StoreError::Conflict { .. }) => true,
            _ => false,
        }
    }
}

fn submission_is_permanent(err: &SubmissionError) -> bool {
    match err.chain_error() {
        Some(source) => source.is_permanent(),
        None => true,
    }
}

fn submission_effect(err: &SubmissionError) -> OnChainEffect {
    if !err.confirmed().is_empty() {
        return OnChainEffect::Confirmed;
    }
    match err.chain_error() {
        Some(ChainError::Timeout) => OnChainEffect::Unknown,
        _ => OnChainEffect::None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No local session to check.
    Idle,
    Live(SessionId),
    /// The chain no longer knows the session as live; local state was cleared.
    Invalidated(SessionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled {
        session_id: SessionId,
        tx_hash: TxHash,
        recipients: usize,
        total: Amount,
    },
    /// The session had already ended on-chain; local state was cleared.
    AlreadyResolved { session_id: SessionId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Withdrawal {
    pub amount: Amount,
    pub tx_hash: TxHash,
}

/// Read-only view of the local session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub identity: Address,
    pub session: Option<Session>,
    pub tips: Vec<TipRecord>,
    pub total_tipped: Amount,
    pub remaining: Amount,
}

/// Owns the ledger for `signer.identity()`. Every mutation goes through
/// `&mut self` and is saved before it returns.
pub struct TipFlowClient<C, S> {
    chain: C,
    store: S,
    config: ClientConfig,
    signer: SettlementSigner,
    ledger: SessionLedger,
    revision: u64,
}

impl<C, S> TipFlowClient<C, S>
where
    C: EscrowChain,
    S: SessionStore,
{
    /// Loads any persisted session for the signer's identity. A snapshot that
    /// fails its conservation checks is discarded.
    ///
    /// Contract-account signers are refused on chains without a bundler,
    /// before anything is signed or sent.
    pub fn new(
        chain: C,
        store: S,
        config: ClientConfig,
        signer: SettlementSigner,
    ) -> Result<Self, TipFlowError> {
        let identity = signer.identity();
        if ExecutionPath::for_signer(signer.kind()) == ExecutionPath::SponsoredBundle
            && !chain.supports_bundles()
        {
            return Err(ChainError::Unsupported(
                "contract-account signers need a chain adapter with sponsored bundles",
            )
            .into());
        }
        let (ledger, revision, corrupted) = match store.load(identity)? {
            None => (SessionLedger::new(), 0, false),
            Some(stored) => match SessionLedger::restore(stored.snapshot) {
                Ok(ledger) => (ledger, stored.revision, false),
                Err(err) => {
                    warn!(%identity, error = %err, "discarding corrupted stored ledger");
                    (SessionLedger::new(), stored.revision, true)
                }
            },
        };

        let mut client = Self {
            chain,
            store,
            config,
            signer,
            ledger,
            revision,
        };
        if corrupted {
            client.persist()?;
        }
        if let Some(session) = client.ledger.session() {
            info!(
                %identity,
                session_id = %session.id,
                tips = client.ledger.tips().len(),
                "restored local session"
            );
        }
        Ok(client)
    }

    pub fn identity(&self) -> Address {
        self.signer.identity()
    }

    pub fn signer(&self) -> &SettlementSigner {
        &self.signer
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    /// Fails when the node serves a different chain than `config.chain_id`.
    pub async fn check_network(&self) -> Result<(), TipFlowError> {
        let found = retry_with_backoff(self.config.request_meta(), || self.chain.chain_id()).await?;
        if found != self.config.chain_id {
            return Err(TipFlowError::WrongNetwork {
                expected: self.config.chain_id,
                found,
            });
        }
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            identity: self.identity(),
            session: self.ledger.session(),
            tips: self.ledger.tips().to_vec(),
            total_tipped: self.ledger.total_tipped(),
            remaining: self.ledger.remaining(),
        }
    }

    /// Funds and opens a new session for `amount`. A cached session is first
    /// checked against the chain and dropped if it is no longer live.
    pub async fn open_session(&mut self, amount: Amount) -> Result<SessionReceipt, TipFlowError> {
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount.into());
        }
        if let ReconcileOutcome::Live(session_id) = self.reconcile_once().await? {
            return Err(LedgerError::SessionAlreadyOpen(session_id).into());
        }

        let receipt = FundingOrchestrator::new(&self.chain, &self.config)
            .open_session(&self.signer, amount)
            .await?;
        self.ledger.open(receipt.session_id, receipt.amount)?;
        self.persist().map_err(|source| TipFlowError::Unpersisted {
            session_id: receipt.session_id,
            source,
        })?;
        info!(
            session_id = %receipt.session_id,
            creator = %receipt.creator,
            amount = %receipt.amount,
            tx_hash = %receipt.tx_hash,
            "session opened"
        );
        Ok(receipt)
    }

    /// Records a tip locally. Returns the recipient's new running total.
    pub fn tip(&mut self, recipient: Address, amount: Amount) -> Result<Amount, TipFlowError> {
        let previous = self.ledger.clone();
        let total = self.ledger.tip(recipient, amount)?;
        if let Err(err) = self.persist() {
            self.ledger = previous;
            return Err(err.into());
        }
        debug!(
            %recipient,
            %amount,
            recipient_total = %total,
            remaining = %self.ledger.remaining(),
            "tip recorded"
        );
        Ok(total)
    }

    /// Checks the cached session against the chain and clears it when the
    /// chain reports it inactive or unknown.
    pub async fn reconcile_once(&mut self) -> Result<ReconcileOutcome, TipFlowError> {
        let Some(session) = self.ledger.session() else {
            return Ok(ReconcileOutcome::Idle);
        };
        let escrow = self.config.escrow;
        let record = retry_with_backoff(self.config.request_meta(), || {
            self.chain.session(escrow, session.id)
        })
        .await?;
        if record.is_live() {
            debug!(session_id = %session.id, "session still live");
            return Ok(ReconcileOutcome::Live(session.id));
        }

        warn!(
            session_id = %session.id,
            creator = %record.creator,
            active = record.active,
            "session no longer live on-chain, clearing local state"
        );
        self.invalidate()?;
        Ok(ReconcileOutcome::Invalidated(session.id))
    }

    /// Polls `reconcile_once` every `interval` until `shutdown` flips to true
    /// or its sender is dropped. Transient chain errors are logged and skipped.
    pub async fn reconciliation_loop(
        &mut self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TipFlowError> {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => match self.reconcile_once().await {
                    Ok(ReconcileOutcome::Invalidated(session_id)) => {
                        info!(%session_id, "reconciler invalidated session");
                    }
                    Ok(_) => {}
                    Err(err) if err.is_retryable() => {
                        warn!(error = %err, "reconciliation poll failed");
                    }
                    Err(err) => return Err(err),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("reconciliation loop stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Signs and submits the accumulated tips, clearing local state once the
    /// escrow has settled (or already ended) the session.
    pub async fn settle(&mut self) -> Result<SettleOutcome, TipFlowError> {
        let session = self.ledger.session().ok_or(LedgerError::NoActiveSession)?;
        let session_id = session.id;

        let input = match self.ledger.settlement_input() {
            Ok(input) => input,
            Err(source) => {
                warn!(%session_id, error = %source, "clearing corrupted session");
                self.invalidate()?;
                return Err(TipFlowError::CorruptedLedger { session_id, source });
            }
        };

        let identity = self.identity();
        let escrow = self.config.escrow;
        let meta = self.config.request_meta();
        let record =
            retry_with_backoff(meta.clone(), || self.chain.session(escrow, session_id)).await?;
        if !record.is_live() {
            info!(%session_id, "session already ended on-chain");
            return self.resolve(session_id);
        }
        if record.creator != identity {
            return Err(TipFlowError::CreatorMismatch {
                session_id,
                expected: identity,
                found: record.creator,
            });
        }

        let commitment = compute_commitment_hash(&input);
        let domain_separator = if self.signer.requires_domain_separator() {
            let separator = retry_with_backoff(meta, || self.chain.domain_separator(identity))
                .await
                .map_err(|source| TipFlowError::DomainSeparator {
                    account: identity,
                    source,
                })?;
            Some(separator)
        } else {
            None
        };
        let signature = self
            .signer
            .sign_commitment(&commitment, domain_separator.as_ref())?;
        debug!(%session_id, %commitment, kind = ?self.signer.kind(), "settlement signed");

        let call = calls::settle_session(escrow, &input, &signature);
        let path = ExecutionPath::for_signer(self.signer.kind());
        match submit_calls(&self.chain, path, identity, vec![call]).await {
            Ok(receipt) => {
                let total = input.total();
                self.ledger.clear();
                self.persist()
                    .map_err(|source| TipFlowError::Unpersisted { session_id, source })?;
                info!(
                    %session_id,
                    tx_hash = %receipt.tx_hash,
                    recipients = input.recipients().len(),
                    %total,
                    "session settled"
                );
                Ok(SettleOutcome::Settled {
                    session_id,
                    tx_hash: receipt.tx_hash,
                    recipients: input.recipients().len(),
                    total,
                })
            }
            Err(err) if err.chain_error().is_some_and(ChainError::is_session_inactive) => {
                info!(%session_id, "escrow reports session inactive, treating as resolved");
                self.resolve(session_id)
            }
            Err(source) => {
                warn!(%session_id, error = %source, "settlement failed, re-checking chain");
                // The transaction may still have landed; trust the chain over the cache.
                match self.reconcile_once().await {
                    Ok(ReconcileOutcome::Invalidated(_)) => {
                        Ok(SettleOutcome::AlreadyResolved { session_id })
                    }
                    Ok(_) => Err(TipFlowError::Settlement { session_id, source }),
                    Err(TipFlowError::Store(store)) => Err(TipFlowError::Unpersisted {
                        session_id,
                        source: store,
                    }),
                    Err(err) => {
                        warn!(%session_id, error = %err, "could not re-check session");
                        Err(TipFlowError::Settlement { session_id, source })
                    }
                }
            }
        }
    }

    /// Escrow balance credited to this identity by past settlements.
    pub async fn pending_withdrawal(&self) -> Result<Amount, TipFlowError> {
        let escrow = self.config.escrow;
        let identity = self.identity();
        Ok(retry_with_backoff(self.config.request_meta(), || {
            self.chain.pending_withdrawal(escrow, identity)
        })
        .await?)
    }

    /// Claims the credited balance. Returns `None` when there is nothing to claim.
    pub async fn withdraw(&self) -> Result<Option<Withdrawal>, TipFlowError> {
        let amount = self.pending_withdrawal().await?;
        if amount.is_zero() {
            debug!(identity = %self.identity(), "nothing to withdraw");
            return Ok(None);
        }
        let path = ExecutionPath::for_signer(self.signer.kind());
        let receipt = submit_calls(
            &self.chain,
            path,
            self.identity(),
            vec![calls::withdraw(self.config.escrow)],
        )
        .await?;
        info!(identity = %self.identity(), %amount, tx_hash = %receipt.tx_hash, "withdrew credited tips");
        Ok(Some(Withdrawal {
            amount,
            tx_hash: receipt.tx_hash,
        }))
    }

    /// Clears the session. A failed save restores it, so memory never
    /// disagrees with the store.
    fn invalidate(&mut self) -> Result<(), StoreError> {
        let previous = self.ledger.clone();
        if self.ledger.clear() {
            if let Err(err) = self.persist() {
                self.ledger = previous;
                return Err(err);
            }
        }
        Ok(())
    }

    fn resolve(&mut self, session_id: SessionId) -> Result<SettleOutcome, TipFlowError> {
        self.invalidate()
            .map_err(|source| TipFlowError::Unpersisted { session_id, source })?;
        Ok(SettleOutcome::AlreadyResolved { session_id })
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        self.revision = self
            .store
            .save(self.identity(), &self.ledger.snapshot(), self.revision)?;
        Ok(())
    }
}
