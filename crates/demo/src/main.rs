use tipflow_chain_mock::DemoScenario;
use tipflow_client::{
    ClientConfig, MemoryStore, MockChain, ReconcileOutcome, SettleOutcome, TipFlowClient,
    TipFlowError,
};
use tipflow_crypto::SettlementSigner;
use tipflow_types::{Amount, CallKind};
use tracing::{info, warn};

const CHAIN_ID: u64 = 84532;

type DemoClient = TipFlowClient<MockChain, MemoryStore>;

fn make_client(
    chain: &MockChain,
    config: &ClientConfig,
    signer: SettlementSigner,
) -> Result<DemoClient, TipFlowError> {
    TipFlowClient::new(chain.clone(), MemoryStore::new(), config.clone(), signer)
}

fn units(value: u64) -> Amount {
    Amount::from(value)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .compact()
        .init();

    let scenario = DemoScenario::new(CHAIN_ID)?;
    let accounts = scenario.accounts;
    let config = ClientConfig::new(CHAIN_ID, scenario.chain.escrow, scenario.chain.token);
    let chain = MockChain::new(scenario.chain);

    let mut alice = make_client(&chain, &config, SettlementSigner::direct(accounts.alice.clone()))?;
    let mut bob = make_client(
        &chain,
        &config,
        SettlementSigner::contract_account(accounts.bob.clone(), accounts.bob_account),
    )?;
    let bob_key = make_client(&chain, &config, SettlementSigner::direct(accounts.bob.clone()))?;

    info!("Scenario A: conservation");
    alice.open_session(units(100)).await?;
    alice.tip(accounts.creator_one, units(40))?;
    alice.tip(accounts.creator_one, units(10))?;
    match alice.tip(accounts.creator_two, units(60)) {
        Ok(_) => return Err("overspending tip was accepted".into()),
        Err(err) => warn!(error = %err, "tip rejected as expected"),
    }
    let status = alice.status();
    info!(total = %status.total_tipped, remaining = %status.remaining, "ledger after Scenario A");
    alice.settle().await?;

    info!("Scenario B: settle two recipients");
    chain.with_escrow(|escrow| escrow.mint(accounts.alice.address(), units(50)))?;
    alice.open_session(units(100)).await?;
    alice.tip(accounts.creator_one, units(30))?;
    alice.tip(accounts.bob.address(), units(30))?;
    if let SettleOutcome::Settled { tx_hash, total, .. } = alice.settle().await? {
        info!(%tx_hash, %total, "Scenario B settled");
    }

    info!("Scenario C: chain invalidates the cached session");
    chain.with_escrow(|escrow| escrow.mint(accounts.alice.address(), units(100)))?;
    let receipt = alice.open_session(units(100)).await?;
    alice.tip(accounts.creator_two, units(5))?;
    chain.with_escrow(|escrow| escrow.deactivate_session(receipt.session_id))?;
    if let ReconcileOutcome::Invalidated(session_id) = alice.reconcile_once().await? {
        info!(%session_id, open = alice.ledger().is_open(), "Scenario C reconciled");
    }

    info!("Scenario D: contract account tops up with a permit");
    let opened = bob.open_session(units(100)).await?;
    let permits = chain.with_escrow(|escrow| escrow.count_calls(CallKind::Permit))?;
    info!(session_id = %opened.session_id, permits, "Scenario D opened");
    bob.tip(accounts.creator_two, units(25))?;
    bob.settle().await?;

    let pending = bob_key.pending_withdrawal().await?;
    info!(%pending, "Bob's key has credited tips");
    if let Some(withdrawal) = bob_key.withdraw().await? {
        info!(amount = %withdrawal.amount, tx_hash = %withdrawal.tx_hash, "withdrawn");
    }

    chain.with_escrow(|escrow| {
        info!(
            creator_one = %escrow.credited(accounts.creator_one),
            creator_two = %escrow.credited(accounts.creator_two),
            blocks = escrow.block_number,
            "final escrow credits"
        );
    })?;
    Ok(())
}
