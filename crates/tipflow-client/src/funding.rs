//! Session funding: shortfall planning, permit authorization, and submission of
//! the ordered calls that lock a budget in the escrow.

use alloy_primitives::B256;
use alloy_sol_types::SolEvent;
use thiserror::Error;
use tipflow_crypto::{
    KeyPairSigner, PermitAuthorization, SettlementSigner, SignedPermit, SignerKind,
};
use tipflow_types::{
    contracts::ITipFlowSession, Address, Amount, CallKind, ContractCall, CryptoError,
    SessionReceipt, TxHash, TxReceipt,
};
use tracing::{debug, info};

use crate::calls;
use crate::chain::{retry_with_backoff, ChainError, EscrowChain};
use crate::config::ClientConfig;

/// How a call list reaches the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// One transaction per call, each awaited before the next.
    Sequential,
    /// All calls in one atomic transaction executed by a contract account.
    SponsoredBundle,
}

impl ExecutionPath {
    pub fn for_signer(kind: SignerKind) -> Self {
        match kind {
            SignerKind::Direct => Self::Sequential,
            SignerKind::ContractAccount => Self::SponsoredBundle,
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("no calls to submit")]
    Empty,
    #[error("{failed:?} failed after {} confirmed call(s): {source}", .confirmed.len())]
    Sequential {
        confirmed: Vec<CallKind>,
        failed: CallKind,
        #[source]
        source: ChainError,
    },
    #[error("sponsored bundle of {calls} call(s) failed: {source}")]
    Bundle {
        calls: usize,
        #[source]
        source: ChainError,
    },
}

impl SubmissionError {
    pub fn chain_error(&self) -> Option<&ChainError> {
        match self {
            Self::Empty => None,
            Self::Sequential { source, .. } | Self::Bundle { source, .. } => Some(source),
        }
    }

    /// Calls that were confirmed before the failure. Always empty for bundles.
    pub fn confirmed(&self) -> &[CallKind] {
        match self {
            Self::Sequential { confirmed, .. } => confirmed,
            Self::Empty | Self::Bundle { .. } => &[],
        }
    }
}

#[derive(Debug, Error)]
pub enum FundingError {
    #[error("session amount must be positive")]
    ZeroAmount,
    #[error("insufficient funds: need {required}, have {available} (short {shortfall})")]
    InsufficientFunds {
        required: Amount,
        available: Amount,
        shortfall: Amount,
    },
    #[error("funding authorization expired at {deadline}, chain time is {now}")]
    AuthorizationExpired { deadline: u64, now: u64 },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Signing(#[from] CryptoError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error("transaction {tx_hash} confirmed without a SessionCreated event")]
    UntrackedSession { tx_hash: TxHash },
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Where the budget comes from.
///
/// `primary` is the session creator. `secondary` is the owner key behind a
/// contract account, which tops up `shortfall` via permit when the primary
/// balance alone cannot cover the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingPlan {
    pub target: Amount,
    pub primary: Address,
    pub secondary: Option<Address>,
    pub primary_balance: Amount,
    pub secondary_balance: Amount,
    pub shortfall: Amount,
}

impl FundingPlan {
    pub fn needs_authorization(&self) -> bool {
        !self.shortfall.is_zero()
    }
}

pub fn plan_funding(
    target: Amount,
    primary: Address,
    primary_balance: Amount,
    secondary: Option<(Address, Amount)>,
) -> Result<FundingPlan, FundingError> {
    if target.is_zero() {
        return Err(FundingError::ZeroAmount);
    }
    let shortfall = target.saturating_sub(primary_balance);
    let secondary_balance = secondary.map_or(Amount::ZERO, |(_, balance)| balance);
    let available = primary_balance.saturating_add(secondary_balance);
    if available < target {
        return Err(FundingError::InsufficientFunds {
            required: target,
            available,
            shortfall: target - available,
        });
    }
    Ok(FundingPlan {
        target,
        primary,
        secondary: secondary.map(|(address, _)| address),
        primary_balance,
        secondary_balance,
        shortfall,
    })
}

/// Builds the ordered session-opening calls:
/// permit, transferFrom, approve, createSession (the first two only when a
/// permit is attached).
#[derive(Debug, Clone, Default)]
pub struct FundingCallBuilder {
    token: Option<Address>,
    escrow: Option<Address>,
    target: Option<Amount>,
    permit: Option<SignedPermit>,
}

impl FundingCallBuilder {
    pub fn new(token: Address, escrow: Address) -> Self {
        Self {
            token: Some(token),
            escrow: Some(escrow),
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: Amount) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_permit(mut self, permit: SignedPermit) -> Self {
        self.permit = Some(permit);
        self
    }

    pub fn build(self) -> Result<Vec<ContractCall>, FundingError> {
        let token = self.token.ok_or(FundingError::MissingField("token"))?;
        let escrow = self.escrow.ok_or(FundingError::MissingField("escrow"))?;
        let target = self.target.ok_or(FundingError::MissingField("target"))?;
        if target.is_zero() {
            return Err(FundingError::ZeroAmount);
        }

        let mut calls = Vec::with_capacity(4);
        if let Some(permit) = &self.permit {
            let authorization = &permit.authorization;
            calls.push(calls::permit(token, permit));
            calls.push(calls::transfer_from(
                token,
                authorization.owner,
                authorization.spender,
                authorization.value,
            ));
        }
        calls.push(calls::approve(token, escrow, target));
        calls.push(calls::create_session(escrow, target));
        Ok(calls)
    }
}

/// Extracts the `SessionCreated` event emitted by `escrow`, if any.
pub fn decode_session_receipt(escrow: Address, receipt: &TxReceipt) -> Option<SessionReceipt> {
    let topic = ITipFlowSession::SessionCreated::SIGNATURE_HASH.0;
    receipt
        .logs
        .iter()
        .filter(|log| log.address == escrow && log.topics.first() == Some(&topic))
        .find_map(|log| {
            ITipFlowSession::SessionCreated::decode_raw_log(
                log.topics.iter().map(|topic| B256::from(*topic)),
                &log.data,
            )
            .ok()
        })
        .map(|event| SessionReceipt {
            session_id: event.sessionId.into(),
            creator: event.creator.into(),
            amount: event.amount,
            tx_hash: receipt.tx_hash,
        })
}

/// Sends `calls` along `path`. Sequential submission stops at the first failure
/// and reports which calls already confirmed.
pub async fn submit_calls<C: EscrowChain + ?Sized>(
    chain: &C,
    path: ExecutionPath,
    sender: Address,
    calls: Vec<ContractCall>,
) -> Result<TxReceipt, SubmissionError> {
    match path {
        ExecutionPath::Sequential => {
            let mut confirmed = Vec::with_capacity(calls.len());
            let mut last = None;
            for call in calls {
                let kind = call.kind;
                debug!(?kind, %sender, "submitting call");
                match chain.send_call(sender, call).await {
                    Ok(receipt) => {
                        confirmed.push(kind);
                        last = Some(receipt);
                    }
                    Err(source) => {
                        return Err(SubmissionError::Sequential {
                            confirmed,
                            failed: kind,
                            source,
                        })
                    }
                }
            }
            last.ok_or(SubmissionError::Empty)
        }
        ExecutionPath::SponsoredBundle => {
            if calls.is_empty() {
                return Err(SubmissionError::Empty);
            }
            let count = calls.len();
            debug!(calls = count, account = %sender, "submitting sponsored bundle");
            chain
                .send_bundle(sender, calls)
                .await
                .map_err(|source| SubmissionError::Bundle {
                    calls: count,
                    source,
                })
        }
    }
}

pub struct FundingOrchestrator<'a, C: ?Sized> {
    chain: &'a C,
    config: &'a ClientConfig,
}

impl<'a, C: EscrowChain + ?Sized> FundingOrchestrator<'a, C> {
    pub fn new(chain: &'a C, config: &'a ClientConfig) -> Self {
        Self { chain, config }
    }

    pub async fn plan(
        &self,
        signer: &SettlementSigner,
        target: Amount,
    ) -> Result<FundingPlan, FundingError> {
        if target.is_zero() {
            return Err(FundingError::ZeroAmount);
        }
        let token = self.config.token;
        let primary = signer.identity();
        let owner = signer.owner().address();
        let secondary = (owner != primary).then_some(owner);
        let meta = self.config.request_meta();

        let primary_read =
            retry_with_backoff(meta.clone(), || self.chain.token_balance(token, primary));
        let secondary_read = async {
            match secondary {
                Some(address) => {
                    retry_with_backoff(meta.clone(), || self.chain.token_balance(token, address))
                        .await
                }
                None => Ok(Amount::ZERO),
            }
        };
        let (primary_balance, secondary_balance) =
            futures::try_join!(primary_read, secondary_read)?;

        let plan = plan_funding(
            target,
            primary,
            primary_balance,
            secondary.map(|address| (address, secondary_balance)),
        )?;
        debug!(
            %target,
            %primary_balance,
            %secondary_balance,
            shortfall = %plan.shortfall,
            "planned session funding"
        );
        Ok(plan)
    }

    /// Signs a permit moving exactly the shortfall from the owner key to the
    /// creator. The nonce is read right before signing.
    pub async fn authorize_shortfall(
        &self,
        plan: &FundingPlan,
        owner: &KeyPairSigner,
    ) -> Result<Option<SignedPermit>, FundingError> {
        let Some(secondary) = plan.secondary.filter(|_| plan.needs_authorization()) else {
            return Ok(None);
        };
        let token = self.config.token;
        let meta = self.config.request_meta();
        let (nonce, domain, now) = futures::try_join!(
            retry_with_backoff(meta.clone(), || self.chain.permit_nonce(token, secondary)),
            retry_with_backoff(meta.clone(), || self.chain.token_domain(token)),
            retry_with_backoff(meta.clone(), || self.chain.latest_timestamp()),
        )?;

        let authorization = PermitAuthorization {
            owner: secondary,
            spender: plan.primary,
            value: plan.shortfall,
            nonce,
            deadline: now.saturating_add(self.config.permit_validity.as_secs()),
        };
        let deadline = authorization.deadline;
        let permit = authorization.sign(&domain, owner)?;
        info!(
            owner = %secondary,
            spender = %plan.primary,
            value = %plan.shortfall,
            deadline,
            "signed funding permit"
        );
        Ok(Some(permit))
    }

    /// Plans, authorizes, and submits the funding calls, returning the
    /// confirmed session.
    pub async fn open_session(
        &self,
        signer: &SettlementSigner,
        target: Amount,
    ) -> Result<SessionReceipt, FundingError> {
        let plan = self.plan(signer, target).await?;
        let permit = self.authorize_shortfall(&plan, signer.owner()).await?;

        let mut builder =
            FundingCallBuilder::new(self.config.token, self.config.escrow).with_target(target);
        if let Some(permit) = permit {
            let now = retry_with_backoff(self.config.request_meta(), || {
                self.chain.latest_timestamp()
            })
            .await?;
            let deadline = permit.authorization.deadline;
            if permit.authorization.is_expired(now) {
                return Err(FundingError::AuthorizationExpired { deadline, now });
            }
            builder = builder.with_permit(permit);
        }
        let calls = builder.build()?;

        let path = ExecutionPath::for_signer(signer.kind());
        info!(?path, calls = calls.len(), creator = %plan.primary, %target, "opening session");
        let receipt = submit_calls(self.chain, path, plan.primary, calls).await?;
        decode_session_receipt(self.config.escrow, &receipt).ok_or(FundingError::UntrackedSession {
            tx_hash: receipt.tx_hash,
        })
    }
}
