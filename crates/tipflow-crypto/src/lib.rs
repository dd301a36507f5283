//! Settlement commitment encoding, payer signing schemes, and token permits.

pub mod hashing;
pub mod permit;
pub mod signer;

pub use hashing::{
    compute_commitment_hash, compute_contract_account_digest, encode_settlement,
    eth_signed_message_hash, safe_message_typehash, SettlementInput,
};
pub use permit::{eip712_domain, PermitAuthorization, SignedPermit};
pub use signer::{
    recover_contract_account_owner, recover_eth_signer, recover_prehash, verify_direct_signature,
    KeyPairSigner, SettlementSignature, SettlementSigner, SignerKind, ETH_SIGN_V_OFFSET,
};
