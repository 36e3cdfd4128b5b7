//! chainplan deploys, upgrades and verifies a set of interrelated contracts from a declarative plan.

mod cli;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use chainplan_deploy::{
    AddressLedger, Deployer, EtherscanClient, JsonRpcChain, Orchestrator, PlanConfig, RunReport,
    Verifier,
    report::{self, LedgerFile},
};
use clap::Parser;
use tokio::sync::watch;

use cli::{Cli, Command, ReportFormat, RunArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut config = PlanConfig::load_from_file(&cli.config, &cli.seed_files)?;

    match cli.command {
        Command::Check => check(&config),
        Command::Run(args) => {
            if let Some(network) = &args.network {
                config.network = network.clone();
            }
            run(&config, &args).await
        }
    }
}

fn seed(config: &PlanConfig) -> impl Iterator<Item = (String, Address)> + '_ {
    config
        .seed
        .iter()
        .map(|(name, address)| (name.clone(), *address))
}

/// Validate the plan against the compiled artifacts and the seed addresses.
fn check(config: &PlanConfig) -> Result<()> {
    let registry = config.load_registry()?;

    let mut ledger = AddressLedger::new();
    ledger.seed(seed(config))?;

    let plan = config.plan();
    plan.check(&registry, &ledger)?;

    tracing::info!(
        steps = plan.len(),
        enabled = plan.enabled_count(),
        seeded = ledger.len(),
        "Plan is consistent"
    );
    Ok(())
}

fn build_verifier(config: &PlanConfig, cancel: watch::Receiver<bool>) -> Result<Verifier<EtherscanClient>> {
    let verification = &config.verification;
    let api_url = verification
        .api_url
        .clone()
        .context("`verification.api_url` is required when verification is enabled")?;
    let api_key = verification.api_key.clone().context(
        "`verification.api_key` is required when verification is enabled (or set CHAINPLAN_VERIFICATION__API_KEY)",
    )?;

    let backend = EtherscanClient::new(api_url, api_key)?.with_status_polling(
        verification.status_poll_interval(),
        verification.status_poll_attempts,
    );

    Ok(Verifier::new(backend)
        .with_settle_delay(verification.settle_delay())
        .with_cancel(cancel))
}

async fn run(config: &PlanConfig, args: &RunArgs) -> Result<()> {
    let network = config.active_network()?;
    let registry = config.load_registry()?;

    let chain = JsonRpcChain::new(network.rpc_url.clone(), network.sender)?;
    let chain_id = chain
        .chain_id()
        .await
        .with_context(|| format!("Failed to reach RPC endpoint {}", network.rpc_url))?;

    if let Some(expected) = network.chain_id {
        if expected != chain_id {
            anyhow::bail!(
                "Network `{}` expects chain ID {expected} but {} reports {chain_id}",
                config.network,
                network.rpc_url
            );
        }
    }

    tracing::info!(
        network = %config.network,
        chain_id,
        sender = %network.sender,
        rpc_url = %network.rpc_url,
        "Connected to network"
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step...");
            let _ = cancel_tx.send(true);
        }
    });

    let deployer = Deployer::new(chain)
        .with_confirmation_timeout(network.confirmation_timeout())
        .with_poll_interval(network.poll_interval());

    let mut orchestrator = Orchestrator::new(registry, deployer).with_cancel(cancel_rx.clone());
    if config.verification.enabled && !args.no_verify {
        orchestrator = orchestrator.with_verifier(build_verifier(config, cancel_rx)?);
    } else {
        tracing::info!("Source verification disabled for this run");
    }

    let report = orchestrator.run(&config.plan(), seed(config)).await;

    print_report(&report, args.format)?;

    if let Some(path) = &args.ledger_out {
        LedgerFile::from_report(&config.network, &report).save_to_file(path)?;
    }

    if let Some(reason) = report.abort_reason() {
        anyhow::bail!("Run aborted at {reason}");
    }

    Ok(())
}

fn print_report(report: &RunReport, format: ReportFormat) -> Result<()> {
    match format {
        ReportFormat::Table => {
            println!("{}", report::steps_table(&report.steps));
            println!("{}", report::ledger_table(&report.ledger));
            if report.verifications().next().is_some() {
                println!("{}", report::verification_table(report));
            }
        }
        ReportFormat::Json => {
            let summary = serde_json::json!({
                "completed": report.is_completed(),
                "abort": report.abort_reason().map(ToString::to_string),
                "ledger": report.ledger.to_map(),
                "steps": report.steps,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to serialize run report")?
            );
        }
    }
    Ok(())
}
