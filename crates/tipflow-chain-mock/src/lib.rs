//! Deterministic in-memory escrow chain for tests and demos without a node.

pub mod mock_escrow;
pub mod scenarios;

pub use mock_escrow::{
    ContractAccount, FaultPlan, MockEscrow, Revert, SubmittedCall, DEFAULT_ESCROW, DEFAULT_TOKEN,
    GENESIS_TIMESTAMP,
};
pub use scenarios::{DemoAccounts, DemoScenario};
