//! Error types shared by the encoder, signer, and data model.

use thiserror::Error;

use crate::ids::Address;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid length for {kind}: expected {expected}, got {actual}")]
    InvalidLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid signature")]
    InvalidSignature,
    #[error("signature recovers to {recovered}, expected {expected}")]
    SignerMismatch { expected: Address, recovered: Address },
    #[error("contract-account signing requires the account's domain separator")]
    MissingDomainSeparator,
    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid length for {kind}: expected {expected}, got {actual}")]
    InvalidLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("recipient list has {recipients} entries but amount list has {amounts}")]
    LengthMismatch { recipients: usize, amounts: usize },
    #[error("invalid amount `{0}`")]
    InvalidAmount(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}
