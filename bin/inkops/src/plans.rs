//! The built-in liquid-staking deployment plan.
//!
//! Mirrors the suite's deployment order: upload the registry, share-token
//! and nomination-agent code, instantiate the vault with the three code
//! hashes, then look up the contracts the vault instantiated internally.
//! Constructor argument order is plan data; a custom plan can be loaded
//! from a TOML file instead.

use std::path::Path;

use anyhow::Context;
use inkops_deploy::{DeploymentPlan, DeploymentStep, StepInput, Value, fields};

pub const REGISTRY: &str = "registry";
pub const SHARE_TOKEN: &str = "share_token";
pub const NOMINATION_AGENT: &str = "nomination_agent";
pub const VAULT: &str = "vault";

/// The staking contract suite, in artifact-namespace terms.
pub const SUITE: [&str; 4] = [REGISTRY, SHARE_TOKEN, NOMINATION_AGENT, VAULT];

pub const GOVERNANCE_TOKEN: &str = "governance_token";
pub const MULTISIG: &str = "multisig";
pub const GOVERNANCE_STAKING: &str = "governance_staking";
pub const GOVERNANCE_NFT: &str = "governance_nft";
pub const GOVERNANCE: &str = "governance";

/// The governance contract suite.
pub const GOVERNANCE_SUITE: [&str; 5] = [
    GOVERNANCE_TOKEN,
    MULTISIG,
    GOVERNANCE_STAKING,
    GOVERNANCE_NFT,
    GOVERNANCE,
];

/// Binding supplying the chain's era duration to the vault constructor.
pub const BINDING_ERA_DURATION_MS: &str = "era_duration_ms";
/// Bindings supplying the staking suite's addresses to the governor
/// constructor.
pub const BINDING_VAULT_ADDRESS: &str = "vault_address";
pub const BINDING_REGISTRY_ADDRESS: &str = "registry_address";

pub const STEP_UPLOAD_REGISTRY: &str = "upload-registry";
pub const STEP_UPLOAD_SHARE_TOKEN: &str = "upload-share-token";
pub const STEP_UPLOAD_NOMINATION_AGENT: &str = "upload-nomination-agent";
pub const STEP_DEPLOY_VAULT: &str = "deploy-vault";
pub const STEP_LOOKUP_REGISTRY: &str = "lookup-registry";
pub const STEP_LOOKUP_SHARE_TOKEN: &str = "lookup-share-token";

pub const STEP_DEPLOY_GOVERNANCE_TOKEN: &str = "deploy-governance-token";
pub const STEP_DEPLOY_MULTISIG: &str = "deploy-multisig";
pub const STEP_DEPLOY_GOVERNANCE_STAKING: &str = "deploy-governance-staking";
pub const STEP_DEPLOY_GOVERNANCE_NFT: &str = "deploy-governance-nft";
pub const STEP_DEPLOY_GOVERNANCE: &str = "deploy-governance";

/// Governor launch parameters.
const EXECUTION_THRESHOLD: u128 = 10_000;
const REJECTION_THRESHOLD: u128 = 10_000;
const ACCEPTANCE_THRESHOLD: u128 = 1_000_000;
const REWARDS_PER_SECOND: u128 = 100_000;

/// Build the staking suite plan. With `reuse_existing`, upload and
/// instantiation steps already satisfied by this network's artifacts are
/// skipped, making re-runs converge instead of redeploying.
pub fn staking_plan(reuse_existing: bool) -> DeploymentPlan {
    DeploymentPlan::new(vec![
        DeploymentStep::upload_code(STEP_UPLOAD_REGISTRY, REGISTRY).reuse_existing(reuse_existing),
        DeploymentStep::upload_code(STEP_UPLOAD_SHARE_TOKEN, SHARE_TOKEN)
            .reuse_existing(reuse_existing),
        DeploymentStep::upload_code(STEP_UPLOAD_NOMINATION_AGENT, NOMINATION_AGENT)
            .reuse_existing(reuse_existing),
        // The vault instantiates the registry and share token itself,
        // which is why their addresses are looked up afterwards.
        DeploymentStep::instantiate(STEP_DEPLOY_VAULT, VAULT, "new")
            .reuse_existing(reuse_existing)
            .input(StepInput::step_ref(STEP_UPLOAD_SHARE_TOKEN, fields::CODE_HASH))
            .input(StepInput::step_ref(STEP_UPLOAD_REGISTRY, fields::CODE_HASH))
            .input(StepInput::step_ref(
                STEP_UPLOAD_NOMINATION_AGENT,
                fields::CODE_HASH,
            ))
            .input(StepInput::binding(BINDING_ERA_DURATION_MS)),
        DeploymentStep::invoke(STEP_LOOKUP_REGISTRY, VAULT, "iVault::get_registry_contract")
            .target(StepInput::step_ref(STEP_DEPLOY_VAULT, fields::ADDRESS))
            .read_only()
            .persist_as(REGISTRY),
        DeploymentStep::invoke(
            STEP_LOOKUP_SHARE_TOKEN,
            VAULT,
            "iVault::get_share_token_contract",
        )
        .target(StepInput::step_ref(STEP_DEPLOY_VAULT, fields::ADDRESS))
        .read_only()
        .persist_as(SHARE_TOKEN),
    ])
}

/// Build the governance suite plan: instantiate the governance token,
/// multisig, governance staking and governance NFT (each uploading its
/// own bytecode), then the governor, which consumes the staking suite's
/// vault and registry addresses, the token address, the three code
/// hashes, and the launch parameters.
pub fn governance_plan(reuse_existing: bool) -> DeploymentPlan {
    DeploymentPlan::new(vec![
        DeploymentStep::instantiate(STEP_DEPLOY_GOVERNANCE_TOKEN, GOVERNANCE_TOKEN, "new")
            .reuse_existing(reuse_existing),
        DeploymentStep::instantiate(STEP_DEPLOY_MULTISIG, MULTISIG, "deploy_hash")
            .reuse_existing(reuse_existing),
        DeploymentStep::instantiate(
            STEP_DEPLOY_GOVERNANCE_STAKING,
            GOVERNANCE_STAKING,
            "governance_staking",
        )
        .reuse_existing(reuse_existing),
        DeploymentStep::instantiate(STEP_DEPLOY_GOVERNANCE_NFT, GOVERNANCE_NFT, "deploy_hash")
            .reuse_existing(reuse_existing),
        DeploymentStep::instantiate(STEP_DEPLOY_GOVERNANCE, GOVERNANCE, "new")
            .reuse_existing(reuse_existing)
            .input(StepInput::binding(BINDING_VAULT_ADDRESS))
            .input(StepInput::binding(BINDING_REGISTRY_ADDRESS))
            .input(StepInput::step_ref(
                STEP_DEPLOY_GOVERNANCE_TOKEN,
                fields::ADDRESS,
            ))
            .input(StepInput::step_ref(STEP_DEPLOY_MULTISIG, fields::CODE_HASH))
            .input(StepInput::step_ref(
                STEP_DEPLOY_GOVERNANCE_NFT,
                fields::CODE_HASH,
            ))
            .input(StepInput::step_ref(
                STEP_DEPLOY_GOVERNANCE_STAKING,
                fields::CODE_HASH,
            ))
            .input(StepInput::literal(Value::Uint(EXECUTION_THRESHOLD)))
            .input(StepInput::literal(Value::Uint(REJECTION_THRESHOLD)))
            .input(StepInput::literal(Value::Uint(ACCEPTANCE_THRESHOLD)))
            .input(StepInput::literal(Value::Uint(REWARDS_PER_SECOND))),
    ])
}

/// Load a deployment plan from a TOML file.
pub fn load_plan(path: &Path) -> anyhow::Result<DeploymentPlan> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan from {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("Failed to parse {} as TOML", path.display()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use inkops_deploy::Value;

    use super::*;

    #[test]
    fn built_in_plan_validates() {
        let bindings = BTreeMap::from([(
            BINDING_ERA_DURATION_MS.to_string(),
            Value::Uint(86_400_000),
        )]);
        staking_plan(true).validate(&bindings).unwrap();
        staking_plan(false).validate(&bindings).unwrap();
    }

    #[test]
    fn governance_plan_validates() {
        let bindings = BTreeMap::from([
            (
                BINDING_VAULT_ADDRESS.to_string(),
                Value::Address("5Vault".into()),
            ),
            (
                BINDING_REGISTRY_ADDRESS.to_string(),
                Value::Address("5Registry".into()),
            ),
        ]);
        governance_plan(true).validate(&bindings).unwrap();
        governance_plan(false).validate(&bindings).unwrap();

        // The governor constructor takes ten arguments, in launch order.
        let governor = governance_plan(false).steps.pop().unwrap();
        assert_eq!(governor.name, STEP_DEPLOY_GOVERNANCE);
        assert_eq!(governor.inputs.len(), 10);
    }

    #[test]
    fn built_in_plans_round_trip_through_toml() {
        for plan in [staking_plan(true), governance_plan(true)] {
            let toml = toml::to_string_pretty(&plan).unwrap();
            let back: DeploymentPlan = toml::from_str(&toml).unwrap();
            assert_eq!(back.steps.len(), plan.steps.len());
        }
    }
}
