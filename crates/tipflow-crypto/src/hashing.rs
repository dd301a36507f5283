use alloy_primitives::{eip191_hash_message, keccak256};
use tipflow_types::{Address, Amount, CommitmentHash, DomainSeparator, SessionId, ValidationError};

const WORD: usize = 32;
const SAFE_MSG_TYPE: &[u8] = b"SafeMessage(bytes message)";
const TYPED_DATA_PREFIX: [u8; 2] = [0x19, 0x01];

/// Canonical encoding rules (Solidity `abi.encodePacked(bytes32, address[], uint256[])`):
/// 1. The session id contributes its 32 raw bytes.
/// 2. Array elements each occupy one 32-byte word: addresses are left-padded,
///    amounts are big-endian `uint256`.
/// 3. No length prefixes, offsets, or separators anywhere.
/// 4. Hash is Keccak-256 over the concatenation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementInput {
    session_id: SessionId,
    recipients: Vec<Address>,
    amounts: Vec<Amount>,
}

impl SettlementInput {
    pub fn new(
        session_id: SessionId,
        recipients: Vec<Address>,
        amounts: Vec<Amount>,
    ) -> Result<Self, ValidationError> {
        if recipients.len() != amounts.len() {
            return Err(ValidationError::LengthMismatch {
                recipients: recipients.len(),
                amounts: amounts.len(),
            });
        }
        Ok(Self {
            session_id,
            recipients,
            amounts,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    pub fn amounts(&self) -> &[Amount] {
        &self.amounts
    }

    pub fn total(&self) -> Amount {
        self.amounts
            .iter()
            .fold(Amount::ZERO, |acc, amount| acc.saturating_add(*amount))
    }
}

pub fn encode_settlement(input: &SettlementInput) -> Vec<u8> {
    let mut enc = Vec::with_capacity(WORD * (1 + 2 * input.recipients.len()));
    enc.extend_from_slice(input.session_id.as_bytes());
    for recipient in &input.recipients {
        put_address_word(&mut enc, recipient);
    }
    for amount in &input.amounts {
        enc.extend_from_slice(&amount.to_be_bytes::<WORD>());
    }
    enc
}

pub fn compute_commitment_hash(input: &SettlementInput) -> CommitmentHash {
    CommitmentHash::new(keccak256(encode_settlement(input)).0)
}

/// `keccak256("SafeMessage(bytes message)")`.
pub fn safe_message_typehash() -> [u8; 32] {
    keccak256(SAFE_MSG_TYPE).0
}

/// Wraps a commitment hash in the contract account's typed-message scheme and
/// returns the final typed-data digest the account owner must sign.
pub fn compute_contract_account_digest(
    domain_separator: &DomainSeparator,
    commitment: &CommitmentHash,
) -> [u8; 32] {
    // abi.encode(bytes32) is the word itself.
    let message_hash = keccak256(commitment.as_bytes());

    let mut struct_enc = Vec::with_capacity(WORD * 2);
    struct_enc.extend_from_slice(&safe_message_typehash());
    struct_enc.extend_from_slice(message_hash.as_slice());
    let struct_hash = keccak256(&struct_enc);

    let mut enc = Vec::with_capacity(2 + WORD * 2);
    enc.extend_from_slice(&TYPED_DATA_PREFIX);
    enc.extend_from_slice(domain_separator.as_bytes());
    enc.extend_from_slice(struct_hash.as_slice());
    keccak256(&enc).0
}

/// EIP-191 personal-message hash of a 32-byte digest.
pub fn eth_signed_message_hash(digest: &[u8; 32]) -> [u8; 32] {
    eip191_hash_message(digest).0
}

fn put_address_word(out: &mut Vec<u8>, address: &Address) {
    out.extend_from_slice(&[0u8; WORD - Address::LEN]);
    out.extend_from_slice(address.as_bytes());
}
