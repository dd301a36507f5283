//! Command-line surface of the `tipflow` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tipflow_client::ClientConfig;
use tipflow_crypto::{KeyPairSigner, SettlementSigner};
use tipflow_types::Address;

use crate::commands::CliError;

/// TipFlow payer client.
#[derive(Parser, Debug)]
#[command(name = "tipflow", about = "Lock a budget, tip off-chain, settle once")]
pub struct Cli {
    /// JSON-RPC endpoint of the node.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8545")]
    pub rpc_url: String,

    /// Session escrow contract address.
    #[arg(long, global = true)]
    pub escrow: Option<Address>,

    /// Settlement token (EIP-2612) address.
    #[arg(long, global = true)]
    pub token: Option<Address>,

    /// Chain ID.
    #[arg(long, global = true, default_value = "84532")]
    pub chain_id: u64,

    /// Payer private key (32-byte hex).
    #[arg(long, global = true)]
    pub private_key: Option<String>,

    /// Contract account the key owns; settles with the contract-account scheme.
    #[arg(long, global = true)]
    pub contract_account: Option<Address>,

    /// Directory holding one ledger document per payer.
    #[arg(long, global = true, default_value = ".tipflow")]
    pub store_dir: PathBuf,

    /// Token decimals used to read and print amounts.
    #[arg(long, global = true, default_value = "6")]
    pub decimals: u8,

    /// Funding permit lifetime after the latest block, in seconds.
    #[arg(long, global = true, default_value = "3600")]
    pub permit_validity_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fund and open a session for the given amount.
    Open {
        #[arg(long)]
        amount: String,
    },
    /// Record an off-chain tip against the open session.
    Tip {
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: String,
    },
    /// Settle all recorded tips on-chain.
    Settle,
    /// Show the local session and its tips.
    Status,
    /// Check the local session against the chain once.
    Reconcile,
    /// Keep reconciling until interrupted.
    Watch {
        #[arg(long, default_value = "5000")]
        interval_ms: u64,
    },
    /// Claim tips credited to this identity.
    Withdraw,
    /// Show tips credited to this identity and not yet withdrawn.
    Pending,
}

impl Cli {
    pub fn signer(&self) -> Result<SettlementSigner, CliError> {
        let raw = self
            .private_key
            .as_deref()
            .ok_or(CliError::MissingFlag("--private-key"))?;
        let key = parse_hex_32(raw).map_err(CliError::InvalidKey)?;
        let owner = KeyPairSigner::from_private_key(key)?;
        Ok(match self.contract_account {
            Some(account) => SettlementSigner::contract_account(owner, account),
            None => SettlementSigner::direct(owner),
        })
    }

    pub fn client_config(&self) -> Result<ClientConfig, CliError> {
        let escrow = self.escrow.ok_or(CliError::MissingFlag("--escrow"))?;
        let token = self.token.ok_or(CliError::MissingFlag("--token"))?;
        Ok(ClientConfig::new(self.chain_id, escrow, token)
            .with_permit_validity(Duration::from_secs(self.permit_validity_secs)))
    }
}

fn parse_hex_32(s: &str) -> Result<[u8; 32], String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| format!("invalid hex: {e}"))?;
    bytes
        .try_into()
        .map_err(|_| "expected 32 bytes (64 hex chars)".to_string())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use tipflow_crypto::SignerKind;
    use tipflow_types::Address;

    use super::{parse_hex_32, Cli, Command};
    use crate::commands::CliError;

    const KEY: &str = "a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1";

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tipflow",
            "tip",
            "--to",
            "0x0101010101010101010101010101010101010101",
            "--amount",
            "2.5",
            "--private-key",
            KEY,
            "--decimals",
            "2",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Tip {
                to: Address::new([0x01; 20]),
                amount: "2.5".to_string(),
            }
        );
        assert_eq!(cli.decimals, 2);
        assert_eq!(cli.signer().unwrap().kind(), SignerKind::Direct);
    }

    #[test]
    fn contract_account_flag_selects_scheme() {
        let prefixed = format!("0x{KEY}");
        let cli = Cli::try_parse_from([
            "tipflow",
            "--private-key",
            prefixed.as_str(),
            "--contract-account",
            "0x5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a",
            "settle",
        ])
        .unwrap();
        let signer = cli.signer().unwrap();
        assert_eq!(signer.kind(), SignerKind::ContractAccount);
        assert_eq!(signer.identity(), Address::new([0x5a; 20]));
    }

    #[test]
    fn rejects_bad_keys_and_addresses() {
        assert!(parse_hex_32("abcd").is_err());
        let cli = Cli::try_parse_from(["tipflow", "status"]).unwrap();
        assert!(matches!(cli.signer(), Err(CliError::MissingFlag("--private-key"))));
        assert!(matches!(cli.client_config(), Err(CliError::MissingFlag("--escrow"))));
        assert!(Cli::try_parse_from(["tipflow", "tip", "--to", "0x12", "--amount", "1"]).is_err());
    }
}
