//! ABI encoders for every transaction the client sends.

use alloy_primitives::U256;
use alloy_sol_types::SolCall;
use tipflow_crypto::{SettlementInput, SettlementSignature, SignedPermit};
use tipflow_types::{
    contracts::{IERC20Permit, ITipFlowSession},
    Address, Amount, CallKind, ContractCall,
};

pub fn permit(token: Address, permit: &SignedPermit) -> ContractCall {
    let authorization = &permit.authorization;
    ContractCall {
        kind: CallKind::Permit,
        to: token,
        data: IERC20Permit::permitCall {
            owner: authorization.owner.into(),
            spender: authorization.spender.into(),
            value: authorization.value,
            deadline: U256::from(authorization.deadline),
            v: permit.v,
            r: permit.r.into(),
            s: permit.s.into(),
        }
        .abi_encode(),
    }
}

pub fn transfer_from(token: Address, from: Address, to: Address, value: Amount) -> ContractCall {
    ContractCall {
        kind: CallKind::TransferFrom,
        to: token,
        data: IERC20Permit::transferFromCall {
            from: from.into(),
            to: to.into(),
            value,
        }
        .abi_encode(),
    }
}

pub fn approve(token: Address, spender: Address, value: Amount) -> ContractCall {
    ContractCall {
        kind: CallKind::Approve,
        to: token,
        data: IERC20Permit::approveCall {
            spender: spender.into(),
            value,
        }
        .abi_encode(),
    }
}

pub fn create_session(escrow: Address, amount: Amount) -> ContractCall {
    ContractCall {
        kind: CallKind::CreateSession,
        to: escrow,
        data: ITipFlowSession::createSessionCall { amount }.abi_encode(),
    }
}

pub fn settle_session(
    escrow: Address,
    input: &SettlementInput,
    signature: &SettlementSignature,
) -> ContractCall {
    ContractCall {
        kind: CallKind::SettleSession,
        to: escrow,
        data: ITipFlowSession::settleSessionCall {
            sessionId: input.session_id().into(),
            recipients: input
                .recipients()
                .iter()
                .map(|recipient| (*recipient).into())
                .collect(),
            amounts: input.amounts().to_vec(),
            signature: signature.to_vec().into(),
        }
        .abi_encode(),
    }
}

pub fn withdraw(escrow: Address) -> ContractCall {
    ContractCall {
        kind: CallKind::Withdraw,
        to: escrow,
        data: ITipFlowSession::withdrawCall {}.abi_encode(),
    }
}
