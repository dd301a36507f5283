//! Session data model: the locally cached session, the authoritative on-chain
//! record, and the call/receipt shapes exchanged with the chain.

use serde::{Deserialize, Serialize};

use crate::ids::{Address, Amount, SessionId, TxHash};

/// One escrow lock as the client believes it to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub deposited_amount: Amount,
}

/// The escrow contract's `sessions(id)` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainSession {
    pub creator: Address,
    pub amount: Amount,
    pub active: bool,
}

impl OnChainSession {
    /// A never-created session reads back as all zeroes.
    pub fn is_live(&self) -> bool {
        self.active && !self.creator.is_zero()
    }
}

/// What a contract call does, recovered from its selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    Permit,
    TransferFrom,
    Approve,
    CreateSession,
    SettleSession,
    Withdraw,
}

/// A single encoded contract invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub kind: CallKind,
    pub to: Address,
    pub data: Vec<u8>,
}

/// Raw event log as returned in a transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLog {
    pub address: Address,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
}

/// Confirmed transaction (or sponsored bundle) receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub logs: Vec<EventLog>,
}

/// Typed result of a successful `createSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReceipt {
    pub session_id: SessionId,
    pub creator: Address,
    pub amount: Amount,
    pub tx_hash: TxHash,
}

/// Token typed-data domain used to sign permits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}
