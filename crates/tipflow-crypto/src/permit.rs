//! EIP-2612 permit authorizations for gasless token pulls.

use alloy_primitives::U256;
use alloy_sol_types::{Eip712Domain, SolStruct};
use serde::{Deserialize, Serialize};
use tipflow_types::{contracts::Permit, Address, Amount, CryptoError, TokenDomain};

use crate::signer::KeyPairSigner;

/// Unsigned permit: `owner` lets `spender` pull `value` until `deadline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitAuthorization {
    pub owner: Address,
    pub spender: Address,
    pub value: Amount,
    pub nonce: U256,
    /// Unix seconds.
    pub deadline: u64,
}

impl PermitAuthorization {
    pub fn is_expired(&self, now: u64) -> bool {
        self.deadline <= now
    }

    /// EIP-712 digest over the token's typed-data domain.
    pub fn digest(&self, domain: &TokenDomain) -> [u8; 32] {
        let typed = Permit {
            owner: self.owner.into(),
            spender: self.spender.into(),
            value: self.value,
            nonce: self.nonce,
            deadline: U256::from(self.deadline),
        };
        typed.eip712_signing_hash(&eip712_domain(domain)).0
    }

    pub fn sign(
        self,
        domain: &TokenDomain,
        owner: &KeyPairSigner,
    ) -> Result<SignedPermit, CryptoError> {
        if owner.address() != self.owner {
            return Err(CryptoError::Signing(format!(
                "permit owner {} does not match signer {}",
                self.owner,
                owner.address()
            )));
        }
        let signature = owner.sign_digest(&self.digest(domain))?;
        Ok(SignedPermit {
            authorization: self,
            v: signature.v(),
            r: signature.r(),
            s: signature.s(),
        })
    }
}

/// Permit plus the `v, r, s` split the token's `permit` entry point takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedPermit {
    pub authorization: PermitAuthorization,
    pub v: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

pub fn eip712_domain(domain: &TokenDomain) -> Eip712Domain {
    Eip712Domain::new(
        Some(domain.name.clone().into()),
        Some(domain.version.clone().into()),
        Some(U256::from(domain.chain_id)),
        Some(domain.verifying_contract.into()),
        None,
    )
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{keccak256, U256};
    use tipflow_types::{Address, Amount, CryptoError, TokenDomain};

    use super::{eip712_domain, PermitAuthorization};
    use crate::signer::{recover_prehash, KeyPairSigner, SettlementSignature};

    fn usdc() -> TokenDomain {
        TokenDomain {
            name: "USDC".to_string(),
            version: "2".to_string(),
            chain_id: 84532,
            verifying_contract: Address::new([0x03; 20]),
        }
    }

    fn authorization(owner: Address) -> PermitAuthorization {
        PermitAuthorization {
            owner,
            spender: Address::new([0x5a; 20]),
            value: Amount::from(40_000_000u64),
            nonce: U256::from(7u64),
            deadline: 1_700_003_600,
        }
    }

    #[test]
    fn digest_follows_typed_data_layout() {
        let auth = authorization(Address::new([0x0a; 20]));
        let domain = usdc();

        let typehash = keccak256(
            "Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)",
        );
        let mut struct_enc = Vec::new();
        struct_enc.extend_from_slice(typehash.as_slice());
        for address in [auth.owner, auth.spender] {
            struct_enc.extend_from_slice(&[0u8; 12]);
            struct_enc.extend_from_slice(address.as_bytes());
        }
        struct_enc.extend_from_slice(&auth.value.to_be_bytes::<32>());
        struct_enc.extend_from_slice(&auth.nonce.to_be_bytes::<32>());
        struct_enc.extend_from_slice(&U256::from(auth.deadline).to_be_bytes::<32>());
        let struct_hash = keccak256(&struct_enc);

        let mut enc = vec![0x19, 0x01];
        enc.extend_from_slice(eip712_domain(&domain).separator().as_slice());
        enc.extend_from_slice(struct_hash.as_slice());

        assert_eq!(auth.digest(&domain), keccak256(&enc).0);
    }

    #[test]
    fn signed_permit_recovers_to_owner() {
        let owner = KeyPairSigner::from_private_key([0x22; 32]).unwrap();
        let auth = authorization(owner.address());
        let signed = auth.sign(&usdc(), &owner).unwrap();

        let mut raw = [0u8; 65];
        raw[..32].copy_from_slice(&signed.r);
        raw[32..64].copy_from_slice(&signed.s);
        raw[64] = signed.v;
        let recovered =
            recover_prehash(&auth.digest(&usdc()), &SettlementSignature::new(raw)).unwrap();
        assert_eq!(recovered, owner.address());
    }

    #[test]
    fn refuses_foreign_owner() {
        let owner = KeyPairSigner::from_private_key([0x22; 32]).unwrap();
        let err = authorization(Address::new([0x0b; 20]))
            .sign(&usdc(), &owner)
            .unwrap_err();
        assert!(matches!(err, CryptoError::Signing(_)));
    }

    #[test]
    fn expiry_is_inclusive_of_deadline() {
        let auth = authorization(Address::new([0x0a; 20]));
        assert!(!auth.is_expired(auth.deadline - 1));
        assert!(auth.is_expired(auth.deadline));
    }
}
