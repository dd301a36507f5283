use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alloy_primitives::U256;
use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tipflow_chain_mock::{MockEscrow, Revert};
use tipflow_types::{
    contracts::SESSION_NOT_ACTIVE, Address, Amount, ContractCall, DomainSeparator,
    OnChainSession, SessionId, TokenDomain, TxReceipt,
};

/// Deadline and retry budget for one logical read.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub timeout_ms: u64,
    pub retry_policy: RetryPolicy,
}

/// Retry behavior for chain reads.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            jitter_ms: 50,
        }
    }
}

/// Error model for chain access.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("request timed out")]
    Timeout,
    #[error("node unavailable: {0}")]
    Unavailable(String),
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("could not decode chain response: {0}")]
    Decode(String),
    #[error("unsupported by this chain adapter: {0}")]
    Unsupported(&'static str),
    #[error("internal chain error: {0}")]
    Internal(String),
}

impl ChainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }

    /// Failures that repeat on every attempt: missing adapter support or a
    /// response the client cannot interpret.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Unsupported(_) | Self::Decode(_) | Self::Internal(_))
    }

    /// The escrow refused because the session is settled, cancelled, or unknown.
    pub fn is_session_inactive(&self) -> bool {
        self.to_string().contains(SESSION_NOT_ACTIVE)
    }
}

impl From<Revert> for ChainError {
    fn from(value: Revert) -> Self {
        Self::Reverted(value.reason)
    }
}

/// Chain access used by the client. Implementations may be in-memory or JSON-RPC.
///
/// Reads name the contract they target; writes are single transactions from
/// `from`, or one atomic sponsored bundle executed by a contract account.
#[async_trait(?Send)]
pub trait EscrowChain {
    async fn token_balance(&self, token: Address, account: Address) -> Result<Amount, ChainError>;

    async fn permit_nonce(&self, token: Address, owner: Address) -> Result<U256, ChainError>;

    async fn token_domain(&self, token: Address) -> Result<TokenDomain, ChainError>;

    async fn session(
        &self,
        escrow: Address,
        session_id: SessionId,
    ) -> Result<OnChainSession, ChainError>;

    async fn pending_withdrawal(
        &self,
        escrow: Address,
        account: Address,
    ) -> Result<Amount, ChainError>;

    async fn domain_separator(&self, account: Address) -> Result<DomainSeparator, ChainError>;

    async fn latest_timestamp(&self) -> Result<u64, ChainError>;

    async fn chain_id(&self) -> Result<u64, ChainError>;

    async fn send_call(&self, from: Address, call: ContractCall) -> Result<TxReceipt, ChainError>;

    async fn send_bundle(
        &self,
        account: Address,
        calls: Vec<ContractCall>,
    ) -> Result<TxReceipt, ChainError>;

    /// Whether `send_bundle` can reach a bundler at all.
    fn supports_bundles(&self) -> bool {
        true
    }
}

/// In-memory chain backed by `MockEscrow`, used for tests and the demo.
#[derive(Clone)]
pub struct MockChain {
    escrow: Arc<Mutex<MockEscrow>>,
}

impl MockChain {
    pub fn new(escrow: MockEscrow) -> Self {
        Self {
            escrow: Arc::new(Mutex::new(escrow)),
        }
    }

    /// Runs `f` against the simulated chain, e.g. to inject faults.
    pub fn with_escrow<R>(&self, f: impl FnOnce(&mut MockEscrow) -> R) -> Result<R, ChainError> {
        let mut lock = self
            .escrow
            .lock()
            .map_err(|_| ChainError::Unavailable("mutex poisoned".to_string()))?;
        Ok(f(&mut lock))
    }

    fn read<R>(&self, f: impl FnOnce(&MockEscrow) -> R) -> Result<R, ChainError> {
        self.with_escrow(|escrow| {
            if escrow.take_read_outage() {
                return Err(ChainError::Unavailable("injected outage".to_string()));
            }
            Ok(f(escrow))
        })?
    }

    fn expect_contract(actual: Address, expected: Address) -> Result<(), ChainError> {
        if actual != expected {
            return Err(ChainError::Reverted(format!("no contract at {actual}")));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl EscrowChain for MockChain {
    async fn token_balance(&self, token: Address, account: Address) -> Result<Amount, ChainError> {
        self.read(|escrow| {
            Self::expect_contract(token, escrow.token)?;
            Ok(escrow.token_balance(account))
        })?
    }

    async fn permit_nonce(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        self.read(|escrow| {
            Self::expect_contract(token, escrow.token)?;
            Ok(escrow.permit_nonce(owner))
        })?
    }

    async fn token_domain(&self, token: Address) -> Result<TokenDomain, ChainError> {
        self.read(|escrow| {
            Self::expect_contract(token, escrow.token)?;
            Ok(escrow.token_domain())
        })?
    }

    async fn session(
        &self,
        escrow_address: Address,
        session_id: SessionId,
    ) -> Result<OnChainSession, ChainError> {
        self.read(|escrow| {
            Self::expect_contract(escrow_address, escrow.escrow)?;
            Ok(escrow.session(session_id))
        })?
    }

    async fn pending_withdrawal(
        &self,
        escrow_address: Address,
        account: Address,
    ) -> Result<Amount, ChainError> {
        self.read(|escrow| {
            Self::expect_contract(escrow_address, escrow.escrow)?;
            Ok(escrow.credited(account))
        })?
    }

    async fn domain_separator(&self, account: Address) -> Result<DomainSeparator, ChainError> {
        self.read(|escrow| escrow.domain_separator(account).map_err(ChainError::from))?
    }

    async fn latest_timestamp(&self) -> Result<u64, ChainError> {
        self.read(|escrow| escrow.block_timestamp)
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.read(|escrow| escrow.token_domain().chain_id)
    }

    async fn send_call(&self, from: Address, call: ContractCall) -> Result<TxReceipt, ChainError> {
        Ok(self.with_escrow(|escrow| escrow.execute(from, &call))??)
    }

    async fn send_bundle(
        &self,
        account: Address,
        calls: Vec<ContractCall>,
    ) -> Result<TxReceipt, ChainError> {
        Ok(self.with_escrow(|escrow| escrow.execute_bundle(account, &calls))??)
    }
}

pub async fn retry_with_backoff<T, F, Fut>(meta: RequestMeta, mut op: F) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ChainError>>,
{
    let deadline = Instant::now() + Duration::from_millis(meta.timeout_ms);
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= meta.retry_policy.max_retries {
                    return Err(err);
                }
                let now = Instant::now();
                if now >= deadline {
                    return Err(ChainError::Timeout);
                }

                let delay = backoff_delay_ms(attempt, &meta.retry_policy);
                attempt += 1;
                let remaining = deadline.saturating_duration_since(now).as_millis() as u64;
                if delay > remaining {
                    return Err(ChainError::Timeout);
                }
                tracing::warn!(attempt, delay_ms = delay, error = %err, "retrying chain read");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

fn backoff_delay_ms(attempt: u32, policy: &RetryPolicy) -> u64 {
    let exp = policy
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    let capped = exp.min(policy.max_backoff_ms);
    let jitter = if policy.jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=policy.jitter_ms)
    };
    capped.saturating_add(jitter)
}
