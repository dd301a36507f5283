//! Shared identifiers, data model, errors, and contract bindings for TipFlow.

pub mod contracts;
pub mod error;
pub mod ids;
pub mod session;

pub use error::{CryptoError, ValidationError};
pub use ids::{Address, Amount, ChainId, CommitmentHash, DomainSeparator, SessionId, TxHash};
pub use session::{
    CallKind, ContractCall, EventLog, OnChainSession, Session, SessionReceipt, TokenDomain,
    TxReceipt,
};
