use tipflow_crypto::KeyPairSigner;
use tipflow_types::{Address, Amount, CryptoError, DomainSeparator};

use crate::mock_escrow::MockEscrow;

const PAYER_KEY: [u8; 32] = [0xa1; 32];
const ACCOUNT_OWNER_KEY: [u8; 32] = [0xb0; 32];

/// Well-known identities shared by the demo binary and integration tests.
#[derive(Debug, Clone)]
pub struct DemoAccounts {
    /// Plain key-pair payer.
    pub alice: KeyPairSigner,
    /// Owner key of the contract-account payer.
    pub bob: KeyPairSigner,
    /// Bob's contract account.
    pub bob_account: Address,
    pub bob_domain: DomainSeparator,
    pub creator_one: Address,
    pub creator_two: Address,
}

#[derive(Debug, Clone)]
pub struct DemoScenario {
    pub accounts: DemoAccounts,
    pub chain: MockEscrow,
}

impl DemoScenario {
    /// Alice holds 100 tokens. Bob's account holds 60 and Bob's own key
    /// holds 1000, so a 100-token session from the account needs a permit.
    pub fn new(chain_id: u64) -> Result<Self, CryptoError> {
        let accounts = DemoAccounts {
            alice: KeyPairSigner::from_private_key(PAYER_KEY)?,
            bob: KeyPairSigner::from_private_key(ACCOUNT_OWNER_KEY)?,
            bob_account: Address::new([0x5a; 20]),
            bob_domain: DomainSeparator::new([0xdd; 32]),
            creator_one: Address::new([0x01; 20]),
            creator_two: Address::new([0x02; 20]),
        };

        let mut chain = MockEscrow::new(chain_id);
        chain.mint(accounts.alice.address(), Amount::from(100u64));
        chain.mint(accounts.bob_account, Amount::from(60u64));
        chain.mint(accounts.bob.address(), Amount::from(1_000u64));
        chain.register_contract_account(
            accounts.bob_account,
            accounts.bob.address(),
            accounts.bob_domain,
        );

        Ok(Self { accounts, chain })
    }
}
