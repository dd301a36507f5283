//! `tipflow` binary: a payer client over a JSON-RPC node.

use clap::Parser;
use tipflow_cli::{execute, Cli, CliError};
use tipflow_client::{FileStore, RpcChain, TipFlowClient};
use tokio::sync::watch;
use tracing::{error, info, warn};

async fn run(cli: Cli) -> Result<String, CliError> {
    let signer = cli.signer()?;
    let config = cli.client_config()?;
    let chain = RpcChain::connect(&cli.rpc_url, signer.owner(), config.request_timeout).await?;
    let store = FileStore::new(&cli.store_dir);
    info!(
        identity = %signer.identity(),
        kind = ?signer.kind(),
        chain_id = config.chain_id,
        escrow = %config.escrow,
        "tipflow client ready"
    );
    let mut client = TipFlowClient::new(chain, store, config, signer)?;
    client.check_network().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    execute(&mut client, cli.command, cli.decimals, shutdown_rx).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "command failed");
            if let Some(hint) = err.hint() {
                warn!("{hint}");
            }
            Err(err.into())
        }
    }
}
