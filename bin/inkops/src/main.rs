//! inkops is a CLI tool to deploy and configure the liquid-staking
//! contract suite against a chain in one run.

mod cli;
mod plans;
mod registry;
mod rpc;
mod signer;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;
use inkops_deploy::{
    AgentTarget, ArtifactStore, ChainClient, ConfigurationTarget, ExecutionResult, PlanExecutor,
    Value, apply,
};

use cli::{AgentsArgs, Cli, Command, DeployArgs, PromoteArgs, Suite, ValidatorsArgs};
use registry::RegistryOps;
use rpc::HttpChainClient;
use signer::DevSigner;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::Deploy(args) => match args.suite {
            Suite::Staking => deploy_staking(args).await,
            Suite::Governance => deploy_governance(args).await,
        },
        Command::Promote(args) => promote(args).await,
        Command::Agents(args) => agents(args).await,
        Command::Validators(args) => validators(args).await,
    }
}

async fn deploy_staking(args: DeployArgs) -> Result<()> {
    if args.validators.is_empty() {
        anyhow::bail!("Must specify at least one validator address (--validators)");
    }
    // Duplicate validators are rejected here, before any transaction.
    let target = ConfigurationTarget::new(
        args.validators
            .iter()
            .map(|account| AgentTarget {
                account: account.clone(),
                weight: args.agent_weight,
            })
            .collect(),
    )?;

    let client = HttpChainClient::new(args.chain.rpc_url.clone())?;
    let chain_signer = DevSigner::from_seed(&args.signer_seed);
    let store = ArtifactStore::new(&args.chain.deployments_dir);
    let tx_timeout = Duration::from_secs(args.tx_timeout_secs);

    tracing::info!(
        network = %args.chain.network,
        rpc_url = %args.chain.rpc_url,
        signer = %chain_signer.address(),
        "Starting deployment..."
    );

    // Network parameters feeding the vault constructor.
    let min_nominator_bond = query_uint(&client, "staking.min_nominator_bond").await?;
    let session_period = query_uint(&client, "committee_management.session_period").await?;
    let sessions_per_era = query_uint(&client, "staking.sessions_per_era").await?;
    let era_duration_ms = 1000 * session_period * sessions_per_era;
    tracing::info!(min_nominator_bond, era_duration_ms, "Network parameters");

    let bindings = BTreeMap::from([(
        plans::BINDING_ERA_DURATION_MS.to_string(),
        Value::Uint(era_duration_ms),
    )]);

    let plan = match &args.plan {
        Some(path) => plans::load_plan(path)?,
        None => plans::staking_plan(!args.redeploy),
    };

    let executor = PlanExecutor::new(&client, &chain_signer, &store, &args.chain.network)
        .tx_timeout(tx_timeout);
    let result = executor.execute(&plan, &bindings).await?;
    report_halt(&result)?;

    // Agent configuration converges the registry onto the declared
    // validator set.
    let registry_address = record_address(&store, &args.chain.network, plans::REGISTRY)
        .await?
        .context("Registry address was not recorded by the deployment plan")?;

    let ops = RegistryOps {
        client: &client,
        signer: &chain_signer,
        registry_address,
        min_nominator_bond,
        tx_timeout,
    };

    let observed = ops.observe().await?;
    let report = apply(
        &target,
        || async { anyhow::Ok(observed.weights.clone()) },
        |action| ops.converge(action, &observed),
    )
    .await?;

    let mut table = contract_table(&store, &args.chain.network, &[
        plans::VAULT,
        plans::REGISTRY,
        plans::SHARE_TOKEN,
    ])
    .await?;
    let converged = ops.observe().await?;
    for (index, (validator, agent)) in converged.agent_of.iter().enumerate() {
        table.add_row([format!("agent[{index}] ({validator})"), agent.clone()]);
    }
    println!("{table}");

    if !report.all_applied() {
        for entry in report.failed() {
            tracing::error!(
                account = %entry.action.account,
                outcome = ?entry.outcome,
                "Agent configuration entry failed"
            );
        }
        anyhow::bail!(
            "{} agent configuration entries failed",
            report.failed().count()
        );
    }

    tracing::info!("Deployment complete");
    Ok(())
}

async fn deploy_governance(args: DeployArgs) -> Result<()> {
    let client = HttpChainClient::new(args.chain.rpc_url.clone())?;
    let chain_signer = DevSigner::from_seed(&args.signer_seed);
    let store = ArtifactStore::new(&args.chain.deployments_dir);

    tracing::info!(
        network = %args.chain.network,
        rpc_url = %args.chain.rpc_url,
        signer = %chain_signer.address(),
        "Starting governance deployment..."
    );

    // The governor is wired to an already-deployed staking suite.
    let vault_address = record_address(&store, &args.chain.network, plans::VAULT)
        .await?
        .with_context(|| {
            format!(
                "No vault deployed on network '{}'; deploy the staking suite first",
                args.chain.network
            )
        })?;
    let registry_address = record_address(&store, &args.chain.network, plans::REGISTRY)
        .await?
        .with_context(|| {
            format!(
                "No registry deployed on network '{}'; deploy the staking suite first",
                args.chain.network
            )
        })?;

    let bindings = BTreeMap::from([
        (
            plans::BINDING_VAULT_ADDRESS.to_string(),
            Value::Address(vault_address),
        ),
        (
            plans::BINDING_REGISTRY_ADDRESS.to_string(),
            Value::Address(registry_address),
        ),
    ]);

    let plan = match &args.plan {
        Some(path) => plans::load_plan(path)?,
        None => plans::governance_plan(!args.redeploy),
    };

    let executor = PlanExecutor::new(&client, &chain_signer, &store, &args.chain.network)
        .tx_timeout(Duration::from_secs(args.tx_timeout_secs));
    let result = executor.execute(&plan, &bindings).await?;
    report_halt(&result)?;

    let table = contract_table(&store, &args.chain.network, &plans::GOVERNANCE_SUITE).await?;
    println!("{table}");

    tracing::info!("Governance deployment complete");
    Ok(())
}

/// Bail with the halted step and the steps that remain persisted.
fn report_halt(result: &ExecutionResult) -> Result<()> {
    if let Some(failure) = &result.failure {
        let completed: Vec<_> = result.completed.iter().map(|c| c.name.as_str()).collect();
        anyhow::bail!(
            "Step '{}' failed: {}. Completed steps remain persisted: [{}]",
            failure.step,
            failure.reason,
            completed.join(", ")
        );
    }
    Ok(())
}

async fn record_address(
    store: &ArtifactStore,
    network: &str,
    contract: &str,
) -> Result<Option<String>> {
    Ok(store
        .read(network, contract)
        .await?
        .and_then(|record| record.address))
}

async fn contract_table(
    store: &ArtifactStore,
    network: &str,
    contracts: &[&str],
) -> Result<Table> {
    let mut table = Table::new();
    table.set_header(["Contract", "Address"]);
    for contract in contracts {
        let address = record_address(store, network, contract)
            .await?
            .unwrap_or_else(|| "-".to_string());
        table.add_row([contract.to_string(), address]);
    }
    Ok(table)
}

async fn promote(args: PromoteArgs) -> Result<()> {
    let store = ArtifactStore::new(&args.deployments_dir);
    let contracts: Vec<&str> = if args.contracts.is_empty() {
        plans::SUITE.to_vec()
    } else {
        args.contracts.iter().map(String::as_str).collect()
    };

    for contract in contracts {
        store.copy(contract, &args.from, &args.to).await?;
    }

    tracing::info!(from = %args.from, to = %args.to, "Artifacts promoted");
    Ok(())
}

async fn agents(args: AgentsArgs) -> Result<()> {
    let client = HttpChainClient::new(args.chain.rpc_url.clone())?;
    let store = ArtifactStore::new(&args.chain.deployments_dir);
    let registry_address = deployed_registry(&store, &args.chain.network).await?;

    let raw = client
        .query_contract(&registry_address, registry::METHOD_GET_AGENTS, &[])
        .await?;
    let agents = registry::decode_agents(&raw)?;

    let mut table = Table::new();
    table.set_header(["Agent", "Validator", "Commission", "Weight", "Staked", "Unbonding"]);

    for (agent, weight) in agents {
        let validator = client
            .query_contract(&agent, registry::METHOD_GET_VALIDATOR, &[])
            .await?;
        let staked = client
            .query_contract(&agent, registry::METHOD_GET_STAKED_VALUE, &[])
            .await?;
        let unbonding = client
            .query_contract(&agent, registry::METHOD_GET_UNBONDING_VALUE, &[])
            .await?;
        let commission = validator_commission(&client, &validator).await;

        table.add_row([
            agent,
            validator.to_string(),
            commission,
            weight.to_string(),
            staked.to_string(),
            unbonding.to_string(),
        ]);
    }

    println!("{table}");
    Ok(())
}

async fn validators(args: ValidatorsArgs) -> Result<()> {
    let client = HttpChainClient::new(args.chain.rpc_url.clone())?;
    let store = ArtifactStore::new(&args.chain.deployments_dir);
    let registry_address = deployed_registry(&store, &args.chain.network).await?;

    let raw = client
        .query_contract(&registry_address, registry::METHOD_GET_AGENTS, &[])
        .await?;
    let agents = registry::decode_agents(&raw)?;

    let mut table = Table::new();
    table.set_header(["Validator", "Commission", "Weight", "Agent"]);

    for (agent, weight) in agents {
        let validator = client
            .query_contract(&agent, registry::METHOD_GET_VALIDATOR, &[])
            .await?;
        let commission = validator_commission(&client, &validator).await;
        table.add_row([validator.to_string(), commission, weight.to_string(), agent]);
    }

    println!("{table}");
    Ok(())
}

async fn deployed_registry(store: &ArtifactStore, network: &str) -> Result<String> {
    record_address(store, network, plans::REGISTRY)
        .await?
        .with_context(|| {
            format!("No registry deployed on network '{network}'; run `inkops deploy` first")
        })
}

async fn validator_commission(client: &HttpChainClient, validator: &Value) -> String {
    client
        .query("staking.validators", std::slice::from_ref(validator))
        .await
        .map(|v| v.to_string())
        .unwrap_or_else(|_| "-".to_string())
}

async fn query_uint(client: &HttpChainClient, path: &str) -> Result<u128> {
    let value = client.query(path, &[]).await?;
    value
        .as_uint()
        .with_context(|| format!("{path} returned a non-integer value: {value}"))
}
