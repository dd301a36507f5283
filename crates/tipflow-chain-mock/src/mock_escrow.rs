//! MockEscrow: in-memory escrow, settlement token, and contract accounts that
//! execute real ABI calldata with the deployed contracts' checks.

use std::collections::HashMap;

use alloy_primitives::{keccak256, U256};
use alloy_sol_types::{SolEvent, SolInterface};
use thiserror::Error;
use tipflow_crypto::{
    compute_commitment_hash, recover_contract_account_owner, recover_prehash,
    verify_direct_signature, PermitAuthorization, SettlementInput, SettlementSignature,
};
use tipflow_types::{
    contracts::{
        IERC20Permit::{self, IERC20PermitCalls},
        ITipFlowSession::{self, ITipFlowSessionCalls},
        SESSION_NOT_ACTIVE,
    },
    Address, Amount, CallKind, ChainId, CommitmentHash, ContractCall, DomainSeparator, EventLog,
    OnChainSession, SessionId, TokenDomain, TxHash, TxReceipt,
};

pub const DEFAULT_ESCROW: Address = Address::new([0xe5; 20]);
pub const DEFAULT_TOKEN: Address = Address::new([0x7c; 20]);
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_TIME_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("execution reverted: {reason}")]
pub struct Revert {
    pub reason: String,
}

fn revert(reason: impl Into<String>) -> Revert {
    Revert {
        reason: reason.into(),
    }
}

/// A smart-contract account that validates `eth_sign`-style owner signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAccount {
    pub owner: Address,
    pub domain_separator: DomainSeparator,
}

/// One call that made it on-chain, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedCall {
    pub sender: Address,
    pub kind: CallKind,
    pub bundled: bool,
}

/// Failure injection for exercising client error paths.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    pub domain_separator_unavailable: bool,
    pub omit_creation_event: bool,
    /// Reverts the next call of this kind, then disarms.
    pub revert_next: Option<CallKind>,
    /// Number of upcoming reads that report the node as unavailable.
    pub read_outages: u32,
}

#[derive(Debug, Clone, Default)]
struct Ledgers {
    balances: HashMap<Address, Amount>,
    allowances: HashMap<(Address, Address), Amount>,
    nonces: HashMap<Address, U256>,
    sessions: HashMap<SessionId, OnChainSession>,
    credits: HashMap<Address, Amount>,
}

impl Ledgers {
    fn balance(&self, account: Address) -> Amount {
        self.balances.get(&account).copied().unwrap_or_default()
    }

    fn transfer(&mut self, from: Address, to: Address, value: Amount) -> Result<(), Revert> {
        let from_balance = self.balance(from);
        if from_balance < value {
            return Err(revert("ERC20: transfer amount exceeds balance"));
        }
        self.balances.insert(from, from_balance - value);
        *self.balances.entry(to).or_default() += value;
        Ok(())
    }

    fn spend_allowance(
        &mut self,
        owner: Address,
        spender: Address,
        value: Amount,
    ) -> Result<(), Revert> {
        let allowance = self
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default();
        if allowance < value {
            return Err(revert("ERC20: transfer amount exceeds allowance"));
        }
        self.allowances.insert((owner, spender), allowance - value);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MockEscrow {
    pub escrow: Address,
    pub token: Address,
    token_domain: TokenDomain,
    state: Ledgers,
    contract_accounts: HashMap<Address, ContractAccount>,
    pub block_number: u64,
    pub block_timestamp: u64,
    tx_count: u64,
    pub calls: Vec<SubmittedCall>,
    pub faults: FaultPlan,
}

impl MockEscrow {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            escrow: DEFAULT_ESCROW,
            token: DEFAULT_TOKEN,
            token_domain: TokenDomain {
                name: "USDC".to_string(),
                version: "2".to_string(),
                chain_id,
                verifying_contract: DEFAULT_TOKEN,
            },
            state: Ledgers::default(),
            contract_accounts: HashMap::new(),
            block_number: 0,
            block_timestamp: GENESIS_TIMESTAMP,
            tx_count: 0,
            calls: Vec::new(),
            faults: FaultPlan::default(),
        }
    }

    pub fn mint(&mut self, account: Address, amount: Amount) {
        *self.state.balances.entry(account).or_default() += amount;
    }

    pub fn register_contract_account(
        &mut self,
        account: Address,
        owner: Address,
        domain_separator: DomainSeparator,
    ) {
        self.contract_accounts.insert(
            account,
            ContractAccount {
                owner,
                domain_separator,
            },
        );
    }

    pub fn advance_time(&mut self, secs: u64) {
        self.block_timestamp += secs;
    }

    /// Ends a session out of band, as a cancellation or chain reset would.
    pub fn deactivate_session(&mut self, session_id: SessionId) {
        if let Some(record) = self.state.sessions.get_mut(&session_id) {
            record.active = false;
        }
    }

    /// Forgets a session entirely, so it reads back as the zero record.
    pub fn forget_session(&mut self, session_id: SessionId) {
        self.state.sessions.remove(&session_id);
    }

    /// Consumes one armed read outage, if any.
    pub fn take_read_outage(&mut self) -> bool {
        if self.faults.read_outages == 0 {
            return false;
        }
        self.faults.read_outages -= 1;
        true
    }

    pub fn token_balance(&self, account: Address) -> Amount {
        self.state.balance(account)
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> Amount {
        self.state
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn permit_nonce(&self, owner: Address) -> U256 {
        self.state.nonces.get(&owner).copied().unwrap_or_default()
    }

    pub fn token_domain(&self) -> TokenDomain {
        self.token_domain.clone()
    }

    /// `sessions(id)`; unknown ids read back as the zero record.
    pub fn session(&self, session_id: SessionId) -> OnChainSession {
        self.state
            .sessions
            .get(&session_id)
            .copied()
            .unwrap_or(OnChainSession {
                creator: Address::ZERO,
                amount: Amount::ZERO,
                active: false,
            })
    }

    /// Escrow `balanceOf`: settled tips awaiting `withdraw()`.
    pub fn credited(&self, account: Address) -> Amount {
        self.state.credits.get(&account).copied().unwrap_or_default()
    }

    pub fn domain_separator(&self, account: Address) -> Result<DomainSeparator, Revert> {
        if self.faults.domain_separator_unavailable {
            return Err(revert("domainSeparator() unavailable"));
        }
        self.contract_accounts
            .get(&account)
            .map(|record| record.domain_separator)
            .ok_or_else(|| revert(format!("{account} is not a contract account")))
    }

    pub fn count_calls(&self, kind: CallKind) -> usize {
        self.calls.iter().filter(|call| call.kind == kind).count()
    }

    /// Executes one transaction from `sender`. State changes are all-or-nothing.
    pub fn execute(&mut self, sender: Address, call: &ContractCall) -> Result<TxReceipt, Revert> {
        self.mine_block();
        let mut scratch = self.state.clone();
        let mut logs = Vec::new();
        let kind = self.apply(&mut scratch, sender, call, &mut logs)?;
        self.state = scratch;
        self.calls.push(SubmittedCall {
            sender,
            kind,
            bundled: false,
        });
        Ok(self.receipt(sender, logs))
    }

    /// Executes `calls` atomically with the contract account as `msg.sender`,
    /// as a sponsored multi-call would.
    pub fn execute_bundle(
        &mut self,
        account: Address,
        calls: &[ContractCall],
    ) -> Result<TxReceipt, Revert> {
        if !self.contract_accounts.contains_key(&account) {
            return Err(revert(format!("{account} cannot execute bundles")));
        }
        self.mine_block();
        let mut scratch = self.state.clone();
        let mut logs = Vec::new();
        let mut kinds = Vec::with_capacity(calls.len());
        for call in calls {
            kinds.push(self.apply(&mut scratch, account, call, &mut logs)?);
        }
        self.state = scratch;
        self.calls.extend(kinds.into_iter().map(|kind| SubmittedCall {
            sender: account,
            kind,
            bundled: true,
        }));
        Ok(self.receipt(account, logs))
    }

    fn mine_block(&mut self) {
        self.block_number += 1;
        self.block_timestamp += BLOCK_TIME_SECS;
    }

    fn receipt(&mut self, sender: Address, logs: Vec<EventLog>) -> TxReceipt {
        self.tx_count += 1;
        let mut preimage = Vec::with_capacity(28);
        preimage.extend_from_slice(sender.as_bytes());
        preimage.extend_from_slice(&self.tx_count.to_be_bytes());
        TxReceipt {
            tx_hash: TxHash::new(keccak256(&preimage).0),
            logs,
        }
    }

    fn apply(
        &mut self,
        state: &mut Ledgers,
        sender: Address,
        call: &ContractCall,
        logs: &mut Vec<EventLog>,
    ) -> Result<CallKind, Revert> {
        let kind = if call.to == self.token {
            let decoded = IERC20PermitCalls::abi_decode(&call.data)
                .map_err(|_| revert("token: unrecognized calldata"))?;
            self.check_injected(token_call_kind(&decoded)?)?;
            self.apply_token(state, sender, decoded)?
        } else if call.to == self.escrow {
            let decoded = ITipFlowSessionCalls::abi_decode(&call.data)
                .map_err(|_| revert("escrow: unrecognized calldata"))?;
            self.check_injected(escrow_call_kind(&decoded)?)?;
            self.apply_escrow(state, sender, decoded, logs)?
        } else {
            return Err(revert(format!("no contract at {}", call.to)));
        };
        Ok(kind)
    }

    fn check_injected(&mut self, kind: CallKind) -> Result<(), Revert> {
        if self.faults.revert_next == Some(kind) {
            self.faults.revert_next = None;
            return Err(revert(format!("injected failure for {kind:?}")));
        }
        Ok(())
    }

    fn apply_token(
        &self,
        state: &mut Ledgers,
        sender: Address,
        call: IERC20PermitCalls,
    ) -> Result<CallKind, Revert> {
        match call {
            IERC20PermitCalls::permit(permit) => {
                let owner = Address::from(permit.owner);
                let deadline = permit.deadline.saturating_to::<u64>();
                if deadline < self.block_timestamp {
                    return Err(revert("FiatTokenV2: permit is expired"));
                }
                let nonce = state.nonces.get(&owner).copied().unwrap_or_default();
                let authorization = PermitAuthorization {
                    owner,
                    spender: Address::from(permit.spender),
                    value: permit.value,
                    nonce,
                    deadline,
                };
                let mut raw = [0u8; 65];
                raw[..32].copy_from_slice(permit.r.as_slice());
                raw[32..64].copy_from_slice(permit.s.as_slice());
                raw[64] = permit.v;
                let recovered = recover_prehash(
                    &authorization.digest(&self.token_domain),
                    &SettlementSignature::new(raw),
                )
                .map_err(|_| revert("EIP2612: invalid signature"))?;
                if recovered != owner {
                    return Err(revert("EIP2612: invalid signature"));
                }
                state.nonces.insert(owner, nonce + U256::from(1u64));
                state
                    .allowances
                    .insert((owner, authorization.spender), permit.value);
                Ok(CallKind::Permit)
            }
            IERC20PermitCalls::transferFrom(transfer) => {
                let from = Address::from(transfer.from);
                state.spend_allowance(from, sender, transfer.value)?;
                state.transfer(from, Address::from(transfer.to), transfer.value)?;
                Ok(CallKind::TransferFrom)
            }
            IERC20PermitCalls::approve(approve) => {
                state
                    .allowances
                    .insert((sender, Address::from(approve.spender)), approve.value);
                Ok(CallKind::Approve)
            }
            _ => Err(revert("token: view functions cannot be transacted")),
        }
    }

    fn apply_escrow(
        &self,
        state: &mut Ledgers,
        sender: Address,
        call: ITipFlowSessionCalls,
        logs: &mut Vec<EventLog>,
    ) -> Result<CallKind, Revert> {
        match call {
            ITipFlowSessionCalls::createSession(create) => {
                if create.amount.is_zero() {
                    return Err(revert("Amount must be greater than 0"));
                }
                state.spend_allowance(sender, self.escrow, create.amount)?;
                state.transfer(sender, self.escrow, create.amount)?;

                let session_id = self.derive_session_id(sender, create.amount);
                if state.sessions.contains_key(&session_id) {
                    return Err(revert("Session already exists"));
                }
                state.sessions.insert(
                    session_id,
                    OnChainSession {
                        creator: sender,
                        amount: create.amount,
                        active: true,
                    },
                );
                if !self.faults.omit_creation_event {
                    push_event(
                        logs,
                        self.escrow,
                        &ITipFlowSession::SessionCreated {
                            sessionId: session_id.into(),
                            creator: sender.into(),
                            amount: create.amount,
                        },
                    );
                }
                Ok(CallKind::CreateSession)
            }
            ITipFlowSessionCalls::settleSession(settle) => {
                let session_id = SessionId::from(settle.sessionId);
                let record = state
                    .sessions
                    .get(&session_id)
                    .copied()
                    .filter(OnChainSession::is_live)
                    .ok_or_else(|| revert(SESSION_NOT_ACTIVE))?;

                let recipients: Vec<Address> =
                    settle.recipients.iter().copied().map(Address::from).collect();
                let input = SettlementInput::new(session_id, recipients, settle.amounts.clone())
                    .map_err(|_| revert("Array length mismatch"))?;
                let total = input
                    .amounts()
                    .iter()
                    .try_fold(Amount::ZERO, |acc, amount| acc.checked_add(*amount))
                    .ok_or_else(|| revert("Total overflow"))?;
                if total > record.amount {
                    return Err(revert("Total exceeds session amount"));
                }

                let commitment = compute_commitment_hash(&input);
                let signature = SettlementSignature::from_slice(&settle.signature)
                    .map_err(|_| revert("Invalid signature length"))?;
                self.check_settlement_signer(record.creator, &commitment, &signature)?;

                state.sessions.insert(
                    session_id,
                    OnChainSession {
                        active: false,
                        ..record
                    },
                );
                for (recipient, amount) in input.recipients().iter().zip(input.amounts()) {
                    *state.credits.entry(*recipient).or_default() += *amount;
                    push_event(
                        logs,
                        self.escrow,
                        &ITipFlowSession::TipReceived {
                            recipient: (*recipient).into(),
                            tipper: record.creator.into(),
                            amount: *amount,
                        },
                    );
                }
                let residue = record.amount - total;
                if !residue.is_zero() {
                    state.transfer(self.escrow, record.creator, residue)?;
                }
                Ok(CallKind::SettleSession)
            }
            ITipFlowSessionCalls::withdraw(_) => {
                let credit = state.credits.remove(&sender).unwrap_or_default();
                if credit.is_zero() {
                    return Err(revert("No balance to withdraw"));
                }
                state.transfer(self.escrow, sender, credit)?;
                Ok(CallKind::Withdraw)
            }
            _ => Err(revert("escrow: view functions cannot be transacted")),
        }
    }

    fn check_settlement_signer(
        &self,
        creator: Address,
        commitment: &CommitmentHash,
        signature: &SettlementSignature,
    ) -> Result<(), Revert> {
        match self.contract_accounts.get(&creator) {
            Some(account) => {
                let owner =
                    recover_contract_account_owner(&account.domain_separator, commitment, signature)
                        .map_err(|_| revert("Invalid signature"))?;
                if owner != account.owner {
                    return Err(revert("Invalid signature"));
                }
                Ok(())
            }
            None => verify_direct_signature(creator, commitment, signature)
                .map_err(|_| revert("Invalid signature")),
        }
    }

    /// `keccak256(abi.encodePacked(msg.sender, block.timestamp, amount))`.
    fn derive_session_id(&self, creator: Address, amount: Amount) -> SessionId {
        let mut preimage = Vec::with_capacity(20 + 32 + 32);
        preimage.extend_from_slice(creator.as_bytes());
        preimage.extend_from_slice(&U256::from(self.block_timestamp).to_be_bytes::<32>());
        preimage.extend_from_slice(&amount.to_be_bytes::<32>());
        SessionId::new(keccak256(&preimage).0)
    }
}

fn token_call_kind(call: &IERC20PermitCalls) -> Result<CallKind, Revert> {
    match call {
        IERC20PermitCalls::permit(_) => Ok(CallKind::Permit),
        IERC20PermitCalls::transferFrom(_) => Ok(CallKind::TransferFrom),
        IERC20PermitCalls::approve(_) => Ok(CallKind::Approve),
        _ => Err(revert("token: view functions cannot be transacted")),
    }
}

fn escrow_call_kind(call: &ITipFlowSessionCalls) -> Result<CallKind, Revert> {
    match call {
        ITipFlowSessionCalls::createSession(_) => Ok(CallKind::CreateSession),
        ITipFlowSessionCalls::settleSession(_) => Ok(CallKind::SettleSession),
        ITipFlowSessionCalls::withdraw(_) => Ok(CallKind::Withdraw),
        _ => Err(revert("escrow: view functions cannot be transacted")),
    }
}

fn push_event<E: SolEvent>(logs: &mut Vec<EventLog>, address: Address, event: &E) {
    let encoded = event.encode_log_data();
    logs.push(EventLog {
        address,
        topics: encoded.topics().iter().map(|topic| topic.0).collect(),
        data: encoded.data.to_vec(),
    });
}
