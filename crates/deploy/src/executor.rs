//! Plan execution.
//!
//! Steps run strictly in plan order: dependencies may be implicit through
//! shared on-chain state even when not declared, so there is no
//! reordering and no parallelism. The first failed transaction halts the
//! plan; blockchain state is not transactionally reversible, so there is
//! no rollback — completed steps stay persisted and re-runs converge via
//! `reuse_existing` steps.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::artifacts::{ArtifactStore, DeploymentRecord};
use crate::chain::{self, ChainClient, CodeSource, Signer, TxPayload};
use crate::error::Result;
use crate::plan::{DeploymentPlan, DeploymentStep, StepInput, StepKind, StepOutput, fields};
use crate::tracker::{TransactionOutcome, submit_and_track};
use crate::value::Value;

/// Externally provided named inputs to a plan.
pub type Bindings = BTreeMap<String, Value>;

/// Cooperative cancellation flag, checked between steps (never mid-step:
/// a submitted transaction is never un-submitted).
pub type CancelFlag = Arc<AtomicBool>;

/// A step that ran (or was skipped) successfully.
#[derive(Debug, Clone)]
pub struct CompletedStep {
    pub name: String,
    pub contract: String,
    pub output: StepOutput,
    /// The step was satisfied by an existing artifact instead of a
    /// transaction.
    pub reused: bool,
}

/// The step at which the plan halted, and why.
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub step: String,
    pub reason: String,
}

/// Result of running a plan: the completed (already persisted) steps,
/// plus the failure that halted it, if any.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    pub completed: Vec<CompletedStep>,
    pub failure: Option<StepFailure>,
    pub cancelled: bool,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }

    pub fn output(&self, step: &str) -> Option<&StepOutput> {
        self.completed
            .iter()
            .find(|c| c.name == step)
            .map(|c| &c.output)
    }
}

/// Executes a [`DeploymentPlan`] against one network with one signer.
///
/// Transactions are issued sequentially through the signer; each terminal
/// outcome is awaited before the next submission, keeping the signer's
/// sequence numbers ordered.
pub struct PlanExecutor<'a, C: ChainClient> {
    client: &'a C,
    signer: &'a dyn Signer,
    store: &'a ArtifactStore,
    network: String,
    tx_timeout: Duration,
    cancel: Option<CancelFlag>,
}

impl<'a, C: ChainClient> PlanExecutor<'a, C> {
    pub fn new(
        client: &'a C,
        signer: &'a dyn Signer,
        store: &'a ArtifactStore,
        network: impl Into<String>,
    ) -> Self {
        Self {
            client,
            signer,
            store,
            network: network.into(),
            tx_timeout: Duration::from_secs(120),
            cancel: None,
        }
    }

    /// Bound on awaiting any single transaction's finalization.
    pub fn tx_timeout(mut self, timeout: Duration) -> Self {
        self.tx_timeout = timeout;
        self
    }

    /// Install a cancellation flag checked between steps.
    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Run the plan. Validation failures and artifact storage failures
    /// are returned as `Err`; every mid-run failure (a failed
    /// transaction, an output reference only resolvable at run time) is
    /// reported through [`ExecutionResult::failure`] alongside the steps
    /// that completed and were already persisted.
    pub async fn execute(
        &self,
        plan: &DeploymentPlan,
        bindings: &Bindings,
    ) -> Result<ExecutionResult> {
        plan.validate(bindings)?;

        let mut result = ExecutionResult::default();
        let mut outputs: BTreeMap<String, StepOutput> = BTreeMap::new();

        for step in &plan.steps {
            if self
                .cancel
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::SeqCst))
            {
                tracing::warn!(step = %step.name, "Cancelled before step");
                result.cancelled = true;
                return Ok(result);
            }

            if step.reuse_existing {
                if let Some(output) = self.existing_output(step).await? {
                    tracing::info!(
                        step = %step.name,
                        contract = %step.contract,
                        "Artifact already present, skipping step"
                    );
                    outputs.insert(step.name.clone(), output.clone());
                    result.completed.push(CompletedStep {
                        name: step.name.clone(),
                        contract: step.contract.clone(),
                        output,
                        reused: true,
                    });
                    continue;
                }
            }

            tracing::info!(step = %step.name, kind = %step.kind, contract = %step.contract, "Executing step");

            match self.run_step(step, bindings, &outputs).await? {
                Ok(output) => {
                    outputs.insert(step.name.clone(), output.clone());
                    result.completed.push(CompletedStep {
                        name: step.name.clone(),
                        contract: step.contract.clone(),
                        output,
                        reused: false,
                    });
                }
                Err(reason) => {
                    tracing::error!(step = %step.name, %reason, "Step failed, halting plan");
                    result.failure = Some(StepFailure {
                        step: step.name.clone(),
                        reason,
                    });
                    return Ok(result);
                }
            }
        }

        Ok(result)
    }

    /// Synthesize a step output from a previously persisted artifact, if
    /// the record carries what the step would have produced.
    async fn existing_output(&self, step: &DeploymentStep) -> Result<Option<StepOutput>> {
        let Some(record) = self.store.read(&self.network, &step.contract).await? else {
            return Ok(None);
        };

        let mut output = StepOutput::default();
        match step.kind {
            StepKind::UploadCode => match record.code_hash {
                Some(hash) => output = output.with(fields::CODE_HASH, Value::Hash(hash)),
                None => return Ok(None),
            },
            StepKind::Instantiate => match record.address {
                Some(address) => {
                    output = output.with(fields::ADDRESS, Value::Address(address));
                    if let Some(hash) = record.code_hash {
                        output = output.with(fields::CODE_HASH, Value::Hash(hash));
                    }
                }
                None => return Ok(None),
            },
            // Invoke steps have no persisted counterpart to reuse.
            StepKind::Invoke => return Ok(None),
        }
        if let Some(block_number) = record.block_number {
            output = output.with(fields::BLOCK_NUMBER, Value::Uint(block_number as u128));
        }
        Ok(Some(output))
    }

    /// Run one step. `Err` is fatal infrastructure failure; the inner
    /// `Result` carries the step's failure reason (a failed transaction
    /// or an unresolvable reference), if any.
    async fn run_step(
        &self,
        step: &DeploymentStep,
        bindings: &Bindings,
        outputs: &BTreeMap<String, StepOutput>,
    ) -> Result<std::result::Result<StepOutput, String>> {
        let args = match step
            .inputs
            .iter()
            .map(|input| resolve(input, bindings, outputs))
            .collect::<std::result::Result<Vec<_>, String>>()
        {
            Ok(args) => args,
            Err(reason) => return Ok(Err(reason)),
        };

        match step.kind {
            StepKind::UploadCode => self.run_upload(step).await,
            StepKind::Instantiate => self.run_instantiate(step, args, bindings, outputs).await,
            StepKind::Invoke => self.run_invoke(step, args, bindings, outputs).await,
        }
    }

    async fn run_upload(
        &self,
        step: &DeploymentStep,
    ) -> Result<std::result::Result<StepOutput, String>> {
        let artifact = self.store.load_contract(&self.network, &step.contract).await?;
        let code_hash = chain::code_hash(&artifact.wasm);

        let payload = TxPayload::UploadCode {
            contract: step.contract.clone(),
            wasm: artifact.wasm,
        };
        let outcome = self.submit(step, payload).await;

        let (block_number, tx_hash) = match outcome {
            TransactionOutcome::Finalized {
                block_number,
                tx_hash,
                ..
            } => (block_number, tx_hash),
            TransactionOutcome::Failed { reason } => return Ok(Err(reason)),
        };

        self.store
            .write(&self.network, &step.contract, &DeploymentRecord {
                code_hash: Some(code_hash.clone()),
                block_number: Some(block_number),
                tx_hash: Some(tx_hash.clone()),
                ..Default::default()
            })
            .await?;

        Ok(Ok(StepOutput::default()
            .with(fields::CODE_HASH, Value::Hash(code_hash))
            .with(fields::BLOCK_NUMBER, Value::Uint(block_number as u128))
            .with(fields::TX_HASH, Value::Hash(tx_hash))))
    }

    async fn run_instantiate(
        &self,
        step: &DeploymentStep,
        args: Vec<Value>,
        bindings: &Bindings,
        outputs: &BTreeMap<String, StepOutput>,
    ) -> Result<std::result::Result<StepOutput, String>> {
        // No declared code source means the contract's own bytecode is
        // uploaded together with the instantiation.
        let (code, code_hash) = match &step.code {
            Some(input) => {
                let value = match resolve(input, bindings, outputs) {
                    Ok(value) => value,
                    Err(reason) => return Ok(Err(reason)),
                };
                let Some(hash) = value.as_hash().map(str::to_owned) else {
                    return Ok(Err(format!(
                        "code source resolved to a {} value, expected a hash",
                        value.kind()
                    )));
                };
                (CodeSource::Existing(hash.clone()), hash)
            }
            None => {
                let artifact = self.store.load_contract(&self.network, &step.contract).await?;
                let hash = chain::code_hash(&artifact.wasm);
                (CodeSource::Wasm(artifact.wasm), hash)
            }
        };

        let constructor = step.selector.clone().unwrap_or_else(|| "new".to_string());
        let payload = TxPayload::Instantiate {
            contract: step.contract.clone(),
            code,
            constructor,
            args,
            value: step.value,
        };
        let outcome = self.submit(step, payload).await;

        let (block_number, tx_hash, events) = match outcome {
            TransactionOutcome::Finalized {
                block_number,
                tx_hash,
                events,
                ..
            } => (block_number, tx_hash, events),
            TransactionOutcome::Failed { reason } => return Ok(Err(reason)),
        };

        let Some(address) = chain::instantiated_address(&events) else {
            return Ok(Err(
                "finalized without an instantiation event; no contract address".to_string(),
            ));
        };

        self.store
            .write(&self.network, &step.contract, &DeploymentRecord {
                address: Some(address.clone()),
                code_hash: Some(code_hash.clone()),
                block_number: Some(block_number),
                tx_hash: Some(tx_hash.clone()),
                ..Default::default()
            })
            .await?;

        Ok(Ok(StepOutput::default()
            .with(fields::ADDRESS, Value::Address(address))
            .with(fields::CODE_HASH, Value::Hash(code_hash))
            .with(fields::BLOCK_NUMBER, Value::Uint(block_number as u128))
            .with(fields::TX_HASH, Value::Hash(tx_hash))))
    }

    async fn run_invoke(
        &self,
        step: &DeploymentStep,
        args: Vec<Value>,
        bindings: &Bindings,
        outputs: &BTreeMap<String, StepOutput>,
    ) -> Result<std::result::Result<StepOutput, String>> {
        // Shape violations are caught by validation; a missing target
        // here would be a bug, not bad input.
        let Some(target) = &step.target else {
            return Ok(Err("invoke step has no target".to_string()));
        };
        let target = match resolve(target, bindings, outputs) {
            Ok(target) => target,
            Err(reason) => return Ok(Err(reason)),
        };
        let Some(address) = target.as_address() else {
            return Ok(Err(format!(
                "target resolved to a {} value, expected an address",
                target.kind()
            )));
        };
        let method = step.selector.clone().unwrap_or_default();

        let mut output = StepOutput::default();

        if step.read_only {
            let decoded = match self.client.query_contract(address, &method, &args).await {
                Ok(decoded) => decoded,
                Err(err) => return Ok(Err(format!("contract query failed: {err:#}"))),
            };
            output = output.with(fields::OUTPUT, decoded);
        } else {
            let payload = TxPayload::ContractCall {
                address: address.to_string(),
                method,
                args,
                value: step.value,
            };
            match self.submit(step, payload).await {
                TransactionOutcome::Finalized {
                    block_number,
                    tx_hash,
                    ..
                } => {
                    output = output
                        .with(fields::BLOCK_NUMBER, Value::Uint(block_number as u128))
                        .with(fields::TX_HASH, Value::Hash(tx_hash));
                }
                TransactionOutcome::Failed { reason } => return Ok(Err(reason)),
            }
        }

        // Address-lookup steps persist the discovered address under the
        // named contract's record.
        if let Some(contract) = &step.persist_as {
            let Some(discovered) = output.get(fields::OUTPUT).and_then(Value::as_address) else {
                return Ok(Err(format!(
                    "persists as '{contract}' but produced no address output"
                )));
            };
            let mut record = self
                .store
                .read(&self.network, contract)
                .await?
                .unwrap_or_default();
            record.address = Some(discovered.to_string());
            self.store.write(&self.network, contract, &record).await?;
        }

        Ok(Ok(output))
    }

    async fn submit(&self, step: &DeploymentStep, payload: TxPayload) -> TransactionOutcome {
        let step_name = step.name.as_str();
        submit_and_track(self.client, payload, self.signer, self.tx_timeout, |status| {
            tracing::debug!(step = %step_name, status = ?status, "Status notification");
        })
        .await
    }

}

/// Resolve one step input against bindings and prior outputs. The error
/// is a step-failure reason, not a fatal one: validation catches every
/// statically checkable miss, but invoke outputs are only known at run
/// time.
fn resolve(
    input: &StepInput,
    bindings: &Bindings,
    outputs: &BTreeMap<String, StepOutput>,
) -> std::result::Result<Value, String> {
    match input {
        StepInput::Literal(value) => Ok(value.clone()),
        StepInput::Binding(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown binding '{name}'")),
        StepInput::Ref { step: source, field } => outputs
            .get(source)
            .and_then(|output| output.get(field))
            .cloned()
            .ok_or_else(|| format!("reference '{source}.{field}' is not available")),
    }
}
