//! TipFlow payer client library.
//!
//! This crate exposes:
//! - the local session ledger (`SessionLedger`) with its conservation checks,
//! - per-identity persistence (`SessionStore`, `MemoryStore`, `FileStore`),
//! - chain access (`EscrowChain`, `MockChain`, `RpcChain`) with retry/backoff,
//! - session funding (`FundingOrchestrator`) including permit top-ups,
//! - the high-level facade (`TipFlowClient`) for open/tip/settle/reconcile/withdraw.

pub mod calls;
pub mod chain;
pub mod client;
pub mod config;
pub mod funding;
pub mod ledger;
pub mod rpc;
pub mod store;

pub use chain::{
    retry_with_backoff, ChainError, EscrowChain, MockChain, RequestMeta, RetryPolicy,
};
pub use client::{
    OnChainEffect, ReconcileOutcome, SessionStatus, SettleOutcome, TipFlowClient, TipFlowError,
    Withdrawal,
};
pub use config::{ClientConfig, DEFAULT_PERMIT_VALIDITY, DEFAULT_REQUEST_TIMEOUT};
pub use funding::{
    decode_session_receipt, plan_funding, submit_calls, ExecutionPath, FundingCallBuilder,
    FundingError, FundingOrchestrator, FundingPlan, SubmissionError,
};
pub use ledger::{LedgerError, LedgerSnapshot, SessionLedger, TipRecord};
pub use rpc::RpcChain;
pub use store::{FileStore, MemoryStore, SessionStore, StoreError, StoredLedger};
