//! JSON-RPC chain adapter over `alloy-provider`.

use std::future::IntoFuture;
use std::time::Duration;

use alloy_eips::BlockNumberOrTag;
use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::U256;
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use tipflow_crypto::KeyPairSigner;
use tipflow_types::{
    contracts::{IContractAccount, IERC20Permit, ITipFlowSession},
    Address, Amount, ContractCall, DomainSeparator, EventLog, OnChainSession, SessionId,
    TokenDomain, TxHash, TxReceipt,
};
use tracing::debug;

use crate::chain::{ChainError, EscrowChain};

/// Confirmation wait for one submitted transaction.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Talks to an Ethereum node with a local key wallet. Only the direct
/// transaction path is available; sponsored bundles need a bundler service.
pub struct RpcChain {
    provider: DynProvider,
    sender: Address,
    request_timeout: Duration,
    confirmation_timeout: Duration,
}

impl RpcChain {
    pub async fn connect(
        rpc_url: &str,
        signer: &KeyPairSigner,
        request_timeout: Duration,
    ) -> Result<Self, ChainError> {
        let wallet = EthereumWallet::from(signer.inner().clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect(rpc_url)
            .await
            .map_err(|err| ChainError::Unavailable(err.to_string()))?;
        debug!(rpc_url, sender = %signer.address(), "connected to node");
        Ok(Self {
            provider: provider.erased(),
            sender: signer.address(),
            request_timeout,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        })
    }

    pub fn with_confirmation_timeout(mut self, confirmation_timeout: Duration) -> Self {
        self.confirmation_timeout = confirmation_timeout;
        self
    }

    async fn bounded<T, E, F>(&self, fut: F) -> Result<T, ChainError>
    where
        F: IntoFuture<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| ChainError::Timeout)?
            .map_err(|err| classify(&err))
    }

    async fn read<Call: SolCall>(&self, to: Address, call: Call) -> Result<Call::Return, ChainError> {
        let tx = TransactionRequest::default()
            .with_to(to.into())
            .with_input(call.abi_encode());
        let output = self.bounded(self.provider.call(tx)).await?;
        Call::abi_decode_returns(&output).map_err(|err| ChainError::Decode(err.to_string()))
    }
}

/// Maps a node or transport error onto the client's error model by message.
fn classify(err: &dyn std::fmt::Display) -> ChainError {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("revert") {
        ChainError::Reverted(message)
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ChainError::Timeout
    } else {
        ChainError::Unavailable(message)
    }
}

#[async_trait(?Send)]
impl EscrowChain for RpcChain {
    async fn token_balance(&self, token: Address, account: Address) -> Result<Amount, ChainError> {
        self.read(
            token,
            IERC20Permit::balanceOfCall {
                owner: account.into(),
            },
        )
        .await
    }

    async fn permit_nonce(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        self.read(token, IERC20Permit::noncesCall { owner: owner.into() })
            .await
    }

    async fn token_domain(&self, token: Address) -> Result<TokenDomain, ChainError> {
        let name = self.read(token, IERC20Permit::nameCall {}).await?;
        let version = self.read(token, IERC20Permit::versionCall {}).await?;
        let chain_id = self.bounded(self.provider.get_chain_id()).await?;
        Ok(TokenDomain {
            name,
            version,
            chain_id,
            verifying_contract: token,
        })
    }

    async fn session(
        &self,
        escrow: Address,
        session_id: SessionId,
    ) -> Result<OnChainSession, ChainError> {
        let record = self
            .read(
                escrow,
                ITipFlowSession::sessionsCall {
                    sessionId: session_id.into(),
                },
            )
            .await?;
        Ok(OnChainSession {
            creator: record.creator.into(),
            amount: record.amount,
            active: record.active,
        })
    }

    async fn pending_withdrawal(
        &self,
        escrow: Address,
        account: Address,
    ) -> Result<Amount, ChainError> {
        self.read(
            escrow,
            ITipFlowSession::balanceOfCall {
                account: account.into(),
            },
        )
        .await
    }

    async fn domain_separator(&self, account: Address) -> Result<DomainSeparator, ChainError> {
        let separator = self
            .read(account, IContractAccount::domainSeparatorCall {})
            .await?;
        Ok(separator.into())
    }

    async fn latest_timestamp(&self) -> Result<u64, ChainError> {
        let block = self
            .bounded(self.provider.get_block_by_number(BlockNumberOrTag::Latest))
            .await?
            .ok_or_else(|| ChainError::Decode("node returned no latest block".to_string()))?;
        Ok(block.header.timestamp)
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.bounded(self.provider.get_chain_id()).await
    }

    async fn send_call(&self, from: Address, call: ContractCall) -> Result<TxReceipt, ChainError> {
        if from != self.sender {
            return Err(ChainError::Internal(format!(
                "wallet holds {}, cannot send from {from}",
                self.sender
            )));
        }
        let tx = TransactionRequest::default()
            .with_from(from.into())
            .with_to(call.to.into())
            .with_input(call.data);
        let pending = self.bounded(self.provider.send_transaction(tx)).await?;
        debug!(kind = ?call.kind, tx_hash = %pending.tx_hash(), "transaction submitted");
        let receipt = pending
            .with_timeout(Some(self.confirmation_timeout))
            .get_receipt()
            .await
            .map_err(|err| classify(&err))?;

        let tx_hash = TxHash::from(receipt.transaction_hash);
        if !receipt.status() {
            return Err(ChainError::Reverted(format!("transaction {tx_hash} reverted")));
        }
        let logs = receipt
            .inner
            .logs()
            .iter()
            .map(|log| EventLog {
                address: log.address().into(),
                topics: log.topics().iter().map(|topic| topic.0).collect(),
                data: log.data().data.to_vec(),
            })
            .collect();
        Ok(TxReceipt { tx_hash, logs })
    }

    async fn send_bundle(
        &self,
        _account: Address,
        _calls: Vec<ContractCall>,
    ) -> Result<TxReceipt, ChainError> {
        Err(ChainError::Unsupported(
            "sponsored bundles need a bundler endpoint",
        ))
    }

    fn supports_bundles(&self) -> bool {
        false
    }
}
