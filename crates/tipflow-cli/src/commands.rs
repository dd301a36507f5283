//! Subcommand execution against any chain adapter and store.

use std::time::Duration;

use thiserror::Error;
use tipflow_client::{
    ChainError, EscrowChain, OnChainEffect, ReconcileOutcome, SessionStatus, SessionStore,
    SettleOutcome, TipFlowClient, TipFlowError,
};
use tipflow_types::CryptoError;
use tokio::sync::watch;
use tracing::info;

use crate::amount::{format_amount, parse_amount, AmountError};
use crate::cli::Command;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("missing required flag {0}")]
    MissingFlag(&'static str),
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Client(#[from] TipFlowError),
}

impl CliError {
    /// Follow-up advice when a failure may have left state on-chain.
    pub fn hint(&self) -> Option<&'static str> {
        let Self::Client(err) = self else {
            return None;
        };
        match err.on_chain_effect() {
            OnChainEffect::None if err.is_retryable() => Some("nothing changed on-chain; safe to retry"),
            OnChainEffect::None => None,
            OnChainEffect::Confirmed => {
                Some("a transaction confirmed on-chain; run `tipflow reconcile` before retrying")
            }
            OnChainEffect::Unknown => {
                Some("a transaction may have landed; run `tipflow reconcile` before retrying")
            }
        }
    }
}

pub async fn execute<C, S>(
    client: &mut TipFlowClient<C, S>,
    command: Command,
    decimals: u8,
    shutdown: watch::Receiver<bool>,
) -> Result<String, CliError>
where
    C: EscrowChain,
    S: SessionStore,
{
    let show = |amount| format_amount(amount, decimals);
    let output = match command {
        Command::Open { amount } => {
            let amount = parse_amount(&amount, decimals)?;
            let receipt = client.open_session(amount).await?;
            format!(
                "opened session {} with {} (tx {})",
                receipt.session_id,
                show(receipt.amount),
                receipt.tx_hash
            )
        }
        Command::Tip { to, amount } => {
            let amount = parse_amount(&amount, decimals)?;
            let total = client.tip(to, amount)?;
            format!(
                "tipped {} to {to} (total {}, remaining {})",
                show(amount),
                show(total),
                show(client.status().remaining)
            )
        }
        Command::Settle => match client.settle().await? {
            SettleOutcome::Settled {
                session_id,
                tx_hash,
                recipients,
                total,
            } => format!(
                "settled session {session_id}: {} to {recipients} recipient(s) (tx {tx_hash})",
                show(total)
            ),
            SettleOutcome::AlreadyResolved { session_id } => {
                format!("session {session_id} had already ended on-chain; local state cleared")
            }
        },
        Command::Status => render_status(&client.status(), decimals),
        Command::Reconcile => match client.reconcile_once().await? {
            ReconcileOutcome::Idle => "no local session".to_string(),
            ReconcileOutcome::Live(session_id) => format!("session {session_id} is live"),
            ReconcileOutcome::Invalidated(session_id) => {
                format!("session {session_id} is no longer live; local state cleared")
            }
        },
        Command::Watch { interval_ms } => {
            info!(interval_ms, "watching session");
            client
                .reconciliation_loop(Duration::from_millis(interval_ms), shutdown)
                .await?;
            render_status(&client.status(), decimals)
        }
        Command::Withdraw => match client.withdraw().await? {
            Some(withdrawal) => format!(
                "withdrew {} (tx {})",
                show(withdrawal.amount),
                withdrawal.tx_hash
            ),
            None => "nothing to withdraw".to_string(),
        },
        Command::Pending => format!(
            "{} pending withdrawal for {}",
            show(client.pending_withdrawal().await?),
            client.identity()
        ),
    };
    Ok(output)
}

pub fn render_status(status: &SessionStatus, decimals: u8) -> String {
    let Some(session) = status.session else {
        return format!("identity  {}\nno open session", status.identity);
    };
    let mut lines = vec![
        format!("identity  {}", status.identity),
        format!("session   {}", session.id),
        format!("deposit   {}", format_amount(session.deposited_amount, decimals)),
        format!("tipped    {}", format_amount(status.total_tipped, decimals)),
        format!("remaining {}", format_amount(status.remaining, decimals)),
    ];
    lines.extend(
        status
            .tips
            .iter()
            .map(|tip| format!("  {} {}", tip.recipient, format_amount(tip.amount, decimals))),
    );
    lines.join("\n")
}
