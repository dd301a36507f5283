//! Settlement signer adapter over plain key pairs and contract accounts.

use std::fmt;

use alloy_primitives::{Signature, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use serde::{Deserialize, Serialize};
use tipflow_types::{Address, CommitmentHash, CryptoError, DomainSeparator};

use crate::hashing::{compute_contract_account_digest, eth_signed_message_hash};

/// Added to `v` so a contract account's validator treats the signature as
/// an `eth_sign` (EIP-191) signature instead of a raw typed-data one.
pub const ETH_SIGN_V_OFFSET: u8 = 4;

const SIGNATURE_LEN: usize = 65;

/// `r ‖ s ‖ v` signature in the layout the escrow and token consume.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SettlementSignature([u8; SIGNATURE_LEN]);

impl SettlementSignature {
    pub const fn new(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; SIGNATURE_LEN] =
            bytes.try_into().map_err(|_| CryptoError::InvalidLength {
                kind: "signature",
                expected: SIGNATURE_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn r(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0[..32]);
        out
    }

    pub fn s(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0[32..64]);
        out
    }

    pub fn v(&self) -> u8 {
        self.0[64]
    }

    fn with_v_offset(mut self, offset: u8) -> Self {
        self.0[64] = self.0[64].wrapping_add(offset);
        self
    }

    fn from_alloy(signature: &Signature) -> Self {
        Self(signature.as_bytes())
    }

    fn to_alloy(self) -> Result<Signature, CryptoError> {
        let parity = match self.v() {
            0 | 27 => false,
            1 | 28 => true,
            _ => return Err(CryptoError::InvalidSignature),
        };
        Ok(Signature::new(
            U256::from_be_slice(&self.r()),
            U256::from_be_slice(&self.s()),
            parity,
        ))
    }
}

impl fmt::Debug for SettlementSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SettlementSignature(0x{})", hex::encode(self.0))
    }
}

/// secp256k1 key pair whose address is a plain externally-owned account.
#[derive(Clone)]
pub struct KeyPairSigner {
    inner: PrivateKeySigner,
    address: Address,
}

impl KeyPairSigner {
    pub fn from_private_key(private_key: [u8; 32]) -> Result<Self, CryptoError> {
        let inner = PrivateKeySigner::from_slice(&private_key)
            .map_err(|err| CryptoError::Signing(err.to_string()))?;
        let address = Address::from(inner.address());
        Ok(Self { inner, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn inner(&self) -> &PrivateKeySigner {
        &self.inner
    }

    /// Signs `digest` under the EIP-191 "signed message" prefix.
    pub fn sign_eth_message(&self, digest: &[u8; 32]) -> Result<SettlementSignature, CryptoError> {
        let signature = self
            .inner
            .sign_message_sync(digest)
            .map_err(|err| CryptoError::Signing(err.to_string()))?;
        Ok(SettlementSignature::from_alloy(&signature))
    }

    /// Signs a prehashed digest with no prefix (EIP-712 typed data).
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<SettlementSignature, CryptoError> {
        let signature = self
            .inner
            .sign_hash_sync(&B256::from(*digest))
            .map_err(|err| CryptoError::Signing(err.to_string()))?;
        Ok(SettlementSignature::from_alloy(&signature))
    }
}

impl fmt::Debug for KeyPairSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPairSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignerKind {
    Direct,
    ContractAccount,
}

/// The payer identity's settlement capability, chosen once per identity.
#[derive(Debug, Clone)]
pub enum SettlementSigner {
    /// The session creator is the key pair itself.
    Direct(KeyPairSigner),
    /// The session creator is `account`, a contract validating `owner`'s signatures.
    ContractAccount {
        owner: KeyPairSigner,
        account: Address,
    },
}

impl SettlementSigner {
    pub fn direct(owner: KeyPairSigner) -> Self {
        Self::Direct(owner)
    }

    pub fn contract_account(owner: KeyPairSigner, account: Address) -> Self {
        Self::ContractAccount { owner, account }
    }

    /// The on-chain identity that opens sessions and must match `creator`.
    pub fn identity(&self) -> Address {
        match self {
            Self::Direct(owner) => owner.address(),
            Self::ContractAccount { account, .. } => *account,
        }
    }

    pub fn owner(&self) -> &KeyPairSigner {
        match self {
            Self::Direct(owner) | Self::ContractAccount { owner, .. } => owner,
        }
    }

    pub fn kind(&self) -> SignerKind {
        match self {
            Self::Direct(_) => SignerKind::Direct,
            Self::ContractAccount { .. } => SignerKind::ContractAccount,
        }
    }

    pub fn requires_domain_separator(&self) -> bool {
        matches!(self, Self::ContractAccount { .. })
    }

    /// Produces the signature the escrow verifies for `commitment`.
    ///
    /// Contract accounts need their on-chain domain separator; a missing one
    /// is an error, never a fallback to the direct scheme.
    pub fn sign_commitment(
        &self,
        commitment: &CommitmentHash,
        domain_separator: Option<&DomainSeparator>,
    ) -> Result<SettlementSignature, CryptoError> {
        match self {
            Self::Direct(owner) => owner.sign_eth_message(commitment.as_bytes()),
            Self::ContractAccount { owner, .. } => {
                let domain = domain_separator.ok_or(CryptoError::MissingDomainSeparator)?;
                let digest = compute_contract_account_digest(domain, commitment);
                let raw = owner.sign_eth_message(&digest)?;
                Ok(raw.with_v_offset(ETH_SIGN_V_OFFSET))
            }
        }
    }
}

/// Recovers the address that signed `digest` under the EIP-191 prefix.
pub fn recover_eth_signer(
    digest: &[u8; 32],
    signature: &SettlementSignature,
) -> Result<Address, CryptoError> {
    recover_prehash(&eth_signed_message_hash(digest), signature)
}

/// Recovers the address that signed a prehashed digest with no prefix.
pub fn recover_prehash(
    prehash: &[u8; 32],
    signature: &SettlementSignature,
) -> Result<Address, CryptoError> {
    let recovered = signature
        .to_alloy()?
        .recover_address_from_prehash(&B256::from(*prehash))
        .map_err(|_| CryptoError::InvalidSignature)?;
    Ok(Address::from(recovered))
}

/// Recovers the owner behind an `eth_sign`-flavoured contract-account signature.
pub fn recover_contract_account_owner(
    domain_separator: &DomainSeparator,
    commitment: &CommitmentHash,
    signature: &SettlementSignature,
) -> Result<Address, CryptoError> {
    if signature.v() <= 30 {
        return Err(CryptoError::InvalidSignature);
    }
    let unadjusted = signature.with_v_offset(ETH_SIGN_V_OFFSET.wrapping_neg());
    let digest = compute_contract_account_digest(domain_separator, commitment);
    recover_eth_signer(&digest, &unadjusted)
}

/// Checks that `signature` over `commitment` maps back to `expected`.
pub fn verify_direct_signature(
    expected: Address,
    commitment: &CommitmentHash,
    signature: &SettlementSignature,
) -> Result<(), CryptoError> {
    let recovered = recover_eth_signer(commitment.as_bytes(), signature)?;
    if recovered != expected {
        return Err(CryptoError::SignerMismatch {
            expected,
            recovered,
        });
    }
    Ok(())
}
