//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "inkops")]
#[command(
    author,
    version,
    about = "Deploy and configure the liquid-staking contract suite"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "INKOPS_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy the contract suite and register nomination agents.
    Deploy(DeployArgs),
    /// Promote build artifacts from one network namespace to another
    /// without redeploying.
    Promote(PromoteArgs),
    /// Print an overview of the registered nomination agents.
    Agents(AgentsArgs),
    /// Print an overview of the validators the agents nominate.
    Validators(ValidatorsArgs),
}

/// Which built-in contract suite to deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Suite {
    /// Vault, registry, share token and nomination agents.
    Staking,
    /// Governance token, multisig, staking, NFT and the governor.
    /// Requires a deployed staking suite on the same network.
    Governance,
}

/// Connection and artifact-location arguments shared by subcommands.
#[derive(Debug, Clone, Args)]
pub struct ChainArgs {
    /// Network identifier, also the artifact namespace.
    #[arg(long, env = "INKOPS_NETWORK", default_value = "development")]
    pub network: String,

    /// HTTP JSON-RPC endpoint of the target node.
    #[arg(long, alias = "rpc", env = "INKOPS_RPC_URL", default_value = "http://127.0.0.1:9944")]
    pub rpc_url: Url,

    /// Root directory of the per-network deployment artifacts.
    #[arg(long, env = "INKOPS_DEPLOYMENTS_DIR", default_value = "deployments")]
    pub deployments_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    #[clap(flatten)]
    pub chain: ChainArgs,

    /// Contract suite to deploy.
    #[arg(long, env = "INKOPS_SUITE", value_enum, default_value = "staking")]
    pub suite: Suite,

    /// Derivation URI or seed for the deploying account.
    #[arg(long, env = "INKOPS_SIGNER_SEED", default_value = "//Alice")]
    pub signer_seed: String,

    /// Validator addresses to register nomination agents for
    /// (comma-separated).
    #[arg(long, env = "INKOPS_VALIDATORS", value_delimiter = ',')]
    pub validators: Vec<String>,

    /// Relative weight assigned to every agent.
    #[arg(long, env = "INKOPS_AGENT_WEIGHT", default_value_t = 1000)]
    pub agent_weight: u64,

    /// Seconds to await each transaction's finalization.
    #[arg(long, env = "INKOPS_TX_TIMEOUT_SECS", default_value_t = 120)]
    pub tx_timeout_secs: u64,

    /// Redeploy contracts even when artifacts already exist for the
    /// target network.
    #[arg(long, env = "INKOPS_REDEPLOY", default_value_t = false)]
    pub redeploy: bool,

    /// Load the deployment plan from a TOML file instead of using the
    /// built-in plan.
    #[arg(long, alias = "plan-file", env = "INKOPS_PLAN")]
    pub plan: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PromoteArgs {
    /// Root directory of the per-network deployment artifacts.
    #[arg(long, env = "INKOPS_DEPLOYMENTS_DIR", default_value = "deployments")]
    pub deployments_dir: PathBuf,

    /// Source network namespace.
    #[arg(long, default_value = "development")]
    pub from: String,

    /// Destination network namespace.
    #[arg(long)]
    pub to: String,

    /// Contracts to promote. Defaults to the full suite.
    #[arg(long, value_delimiter = ',')]
    pub contracts: Vec<String>,
}

#[derive(Debug, Args)]
pub struct AgentsArgs {
    #[clap(flatten)]
    pub chain: ChainArgs,
}

#[derive(Debug, Args)]
pub struct ValidatorsArgs {
    #[clap(flatten)]
    pub chain: ChainArgs,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
