//! Agent registry operations.
//!
//! Wires the registry contract's call surface into the configuration
//! applier: observing the registered agents and converging one delta
//! entry at a time.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use inkops_deploy::{
    ChainClient, DeltaAction, DeltaKind, Signer, TransactionOutcome, TxPayload, Value,
    submit_and_track,
};

pub const METHOD_GET_AGENTS: &str = "iRegistry::get_agents";
pub const METHOD_ADD_AGENT: &str = "iRegistry::add_agent";
pub const METHOD_UPDATE_AGENTS: &str = "iRegistry::update_agents";
pub const METHOD_GET_VALIDATOR: &str = "iNominationAgent::get_validator";
pub const METHOD_GET_STAKED_VALUE: &str = "iNominationAgent::get_staked_value";
pub const METHOD_GET_UNBONDING_VALUE: &str = "iNominationAgent::get_unbonding_value";

/// Snapshot of the registered agents, keyed by the validator account
/// each one nominates.
#[derive(Debug, Default)]
pub struct ObservedAgents {
    /// validator -> relative weight
    pub weights: BTreeMap<String, u64>,
    /// validator -> agent contract address
    pub agent_of: BTreeMap<String, String>,
}

pub struct RegistryOps<'a, C: ChainClient> {
    pub client: &'a C,
    pub signer: &'a dyn Signer,
    pub registry_address: String,
    /// Bond attached when registering a new agent.
    pub min_nominator_bond: u128,
    pub tx_timeout: Duration,
}

impl<'a, C: ChainClient> RegistryOps<'a, C> {
    /// Observe the current agent set. Each agent's validator is read
    /// from the agent contract itself.
    pub async fn observe(&self) -> anyhow::Result<ObservedAgents> {
        let raw = self
            .client
            .query_contract(&self.registry_address, METHOD_GET_AGENTS, &[])
            .await
            .context("Failed to query registered agents")?;
        let agents = decode_agents(&raw)?;

        let mut observed = ObservedAgents::default();
        for (agent_address, weight) in agents {
            let validator = self
                .client
                .query_contract(&agent_address, METHOD_GET_VALIDATOR, &[])
                .await
                .with_context(|| format!("Failed to query validator of agent {agent_address}"))?;
            let validator = validator
                .as_address()
                .with_context(|| {
                    format!("Agent {agent_address} returned a non-address validator")
                })?
                .to_string();
            observed.weights.insert(validator.clone(), weight);
            observed.agent_of.insert(validator, agent_address);
        }
        Ok(observed)
    }

    /// Converge one delta entry. An `Add` registers a new agent and then
    /// sets its weight (the agent's address is only knowable by
    /// re-observing after registration); an `Update` adjusts the
    /// existing agent's weight.
    pub async fn converge(
        &self,
        action: DeltaAction,
        observed: &ObservedAgents,
    ) -> TransactionOutcome {
        match action.kind {
            DeltaKind::Add => {
                let outcome = self
                    .submit(
                        METHOD_ADD_AGENT,
                        vec![
                            Value::Address(self.signer.address().to_string()),
                            Value::Address(action.account.clone()),
                        ],
                        self.min_nominator_bond,
                    )
                    .await;
                if !outcome.is_finalized() {
                    return outcome;
                }

                let agent = match self.observe().await {
                    Ok(observed) => observed.agent_of.get(&action.account).cloned(),
                    Err(err) => {
                        return TransactionOutcome::failed(format!(
                            "failed to re-observe agents after registration: {err:#}"
                        ));
                    }
                };
                match agent {
                    Some(agent) => self.set_weight(&agent, action.weight).await,
                    None => TransactionOutcome::failed(format!(
                        "no agent found for validator {} after registration",
                        action.account
                    )),
                }
            }
            DeltaKind::Update { .. } => match observed.agent_of.get(&action.account) {
                Some(agent) => self.set_weight(agent, action.weight).await,
                None => TransactionOutcome::failed(format!(
                    "no agent observed for validator {}",
                    action.account
                )),
            },
        }
    }

    async fn set_weight(&self, agent: &str, weight: u64) -> TransactionOutcome {
        self.submit(
            METHOD_UPDATE_AGENTS,
            vec![
                Value::List(vec![Value::Address(agent.to_string())]),
                Value::List(vec![Value::Uint(weight as u128)]),
            ],
            0,
        )
        .await
    }

    async fn submit(&self, method: &str, args: Vec<Value>, value: u128) -> TransactionOutcome {
        let payload = TxPayload::ContractCall {
            address: self.registry_address.clone(),
            method: method.to_string(),
            args,
            value,
        };
        submit_and_track(self.client, payload, self.signer, self.tx_timeout, |status| {
            tracing::debug!(%method, status = ?status, "Registry transaction status");
        })
        .await
    }
}

/// Decode the `(total_weight, agents)` tuple returned by
/// `iRegistry::get_agents` into `(agent_address, weight)` pairs.
pub fn decode_agents(value: &Value) -> anyhow::Result<Vec<(String, u64)>> {
    let parts = value
        .as_list()
        .context("Expected a (total_weight, agents) tuple")?;
    let agents = parts
        .get(1)
        .and_then(Value::as_list)
        .context("Expected an agent list in the second tuple field")?;

    agents
        .iter()
        .map(|agent| {
            let fields = agent.as_list().context("Expected an (address, weight) agent")?;
            let address = fields
                .first()
                .and_then(Value::as_address)
                .context("Agent entry has no address")?;
            let weight = fields
                .get(1)
                .and_then(Value::as_uint)
                .context("Agent entry has no weight")?;
            Ok((address.to_string(), weight as u64))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(tag: &str) -> String {
        format!("5{}{}", tag, "0".repeat(47 - tag.len()))
    }

    #[test]
    fn decode_agents_reads_tuple_shape() {
        let raw = Value::List(vec![
            Value::Uint(2000),
            Value::List(vec![
                Value::List(vec![Value::Address(address("a")), Value::Uint(1000)]),
                Value::List(vec![Value::Address(address("b")), Value::Uint(1000)]),
            ]),
        ]);
        let agents = decode_agents(&raw).unwrap();
        assert_eq!(agents, vec![(address("a"), 1000), (address("b"), 1000)]);
    }

    #[test]
    fn decode_agents_rejects_malformed_output() {
        assert!(decode_agents(&Value::Uint(0)).is_err());
        assert!(decode_agents(&Value::List(vec![Value::Uint(0)])).is_err());
    }
}
