//! Solidity interfaces for the escrow, the settlement token, and contract accounts.
//!
//! Only the entry points the client touches are declared. Selectors and event
//! topics are derived from these declarations, so they must match the
//! deployed contracts exactly.

use alloy_sol_types::sol;

sol! {
    /// Session escrow: locks a budget once, settles a batch of tips once.
    #[derive(Debug, PartialEq, Eq)]
    interface ITipFlowSession {
        event SessionCreated(bytes32 indexed sessionId, address indexed creator, uint256 amount);
        event TipReceived(address indexed recipient, address indexed tipper, uint256 amount);

        function createSession(uint256 amount) external;
        function sessions(bytes32 sessionId) external view returns (address creator, uint256 amount, bool active);
        function settleSession(
            bytes32 sessionId,
            address[] recipients,
            uint256[] amounts,
            bytes signature
        ) external;
        function withdraw() external;
        function balanceOf(address account) external view returns (uint256);
    }

    /// ERC-20 subset plus EIP-2612 permit, as exposed by USDC.
    #[derive(Debug, PartialEq, Eq)]
    interface IERC20Permit {
        function balanceOf(address owner) external view returns (uint256);
        function approve(address spender, uint256 value) external returns (bool);
        function transferFrom(address from, address to, uint256 value) external returns (bool);
        function nonces(address owner) external view returns (uint256);
        function name() external view returns (string);
        function version() external view returns (string);
        function permit(
            address owner,
            address spender,
            uint256 value,
            uint256 deadline,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }

    /// Smart-contract account that validates signatures itself.
    #[derive(Debug, PartialEq, Eq)]
    interface IContractAccount {
        function domainSeparator() external view returns (bytes32);
    }

    /// EIP-2612 typed-data struct.
    #[derive(Debug, PartialEq, Eq)]
    struct Permit {
        address owner;
        address spender;
        uint256 value;
        uint256 nonce;
        uint256 deadline;
    }
}

/// Revert reason the escrow uses for a settled, cancelled, or unknown session.
pub const SESSION_NOT_ACTIVE: &str = "Session is not active";
