//! Deployment plans.
//!
//! A plan is an ordered sequence of steps whose data dependencies are
//! declared, not rediscovered at runtime: later steps name the outputs of
//! earlier steps (or externally provided bindings) instead of re-querying
//! chain state. Constructor argument order is plan data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};
use crate::value::Value;

/// Standard output field names shared by step kinds.
pub mod fields {
    pub const ADDRESS: &str = "address";
    pub const CODE_HASH: &str = "code_hash";
    pub const BLOCK_NUMBER: &str = "block_number";
    pub const TX_HASH: &str = "tx_hash";
    pub const OUTPUT: &str = "output";
}

/// What a step does on-chain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepKind {
    /// Upload contract bytecode, recording its code hash.
    UploadCode,
    /// Instantiate a contract, recording the resulting address.
    Instantiate,
    /// Call (or dry-run) a contract method, recording its decoded output.
    Invoke,
}

impl StepKind {
    /// The output fields steps of this kind produce, when statically
    /// known. Invoke outputs depend on the call, so references into them
    /// are only checkable at run time.
    fn known_output_fields(self) -> Option<&'static [&'static str]> {
        match self {
            StepKind::UploadCode => Some(&[
                fields::CODE_HASH,
                fields::BLOCK_NUMBER,
                fields::TX_HASH,
            ]),
            StepKind::Instantiate => Some(&[
                fields::ADDRESS,
                fields::CODE_HASH,
                fields::BLOCK_NUMBER,
                fields::TX_HASH,
            ]),
            StepKind::Invoke => None,
        }
    }
}

/// One named input to a step: a literal value, an externally provided
/// binding, or a reference to an earlier step's output field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepInput {
    Literal(Value),
    Binding(String),
    Ref { step: String, field: String },
}

impl StepInput {
    pub fn literal(value: Value) -> Self {
        Self::Literal(value)
    }

    pub fn binding(name: impl Into<String>) -> Self {
        Self::Binding(name.into())
    }

    pub fn step_ref(step: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Ref {
            step: step.into(),
            field: field.into(),
        }
    }
}

/// A unit of deployment work. Executed exactly once per run, immutable
/// once executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStep {
    /// Symbolic name, unique within the plan.
    pub name: String,
    pub kind: StepKind,
    /// Contract this step concerns (artifact namespace).
    pub contract: String,
    /// Constructor or method selector. Unused for `upload-code`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Instantiate only: where the code hash comes from. When absent, the
    /// contract's own bytecode is uploaded together with instantiation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<StepInput>,
    /// Invoke only: the contract address to call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<StepInput>,
    /// Ordered call arguments. Order here is the on-wire encoding order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<StepInput>,
    /// Native value attached to the transaction.
    #[serde(
        default,
        skip_serializing_if = "is_zero",
        with = "crate::value::uint_serde"
    )]
    pub value: u128,
    /// Invoke only: read-only dry-run instead of a transaction.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    /// Skip this step when its artifact already exists for the target
    /// network, making re-runs converge instead of redeploying.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reuse_existing: bool,
    /// Invoke only: persist the decoded address output as this contract's
    /// deployment record (used for address-lookup steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_as: Option<String>,
}

fn is_zero(v: &u128) -> bool {
    *v == 0
}

impl DeploymentStep {
    pub fn upload_code(name: impl Into<String>, contract: impl Into<String>) -> Self {
        Self::new(name, StepKind::UploadCode, contract)
    }

    pub fn instantiate(
        name: impl Into<String>,
        contract: impl Into<String>,
        constructor: impl Into<String>,
    ) -> Self {
        let mut step = Self::new(name, StepKind::Instantiate, contract);
        step.selector = Some(constructor.into());
        step
    }

    pub fn invoke(
        name: impl Into<String>,
        contract: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        let mut step = Self::new(name, StepKind::Invoke, contract);
        step.selector = Some(method.into());
        step
    }

    fn new(name: impl Into<String>, kind: StepKind, contract: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            contract: contract.into(),
            selector: None,
            code: None,
            target: None,
            inputs: Vec::new(),
            value: 0,
            read_only: false,
            reuse_existing: false,
            persist_as: None,
        }
    }

    pub fn code(mut self, code: StepInput) -> Self {
        self.code = Some(code);
        self
    }

    pub fn target(mut self, target: StepInput) -> Self {
        self.target = Some(target);
        self
    }

    pub fn input(mut self, input: StepInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn reuse_existing(mut self, reuse: bool) -> Self {
        self.reuse_existing = reuse;
        self
    }

    pub fn persist_as(mut self, contract: impl Into<String>) -> Self {
        self.persist_as = Some(contract.into());
        self
    }

    fn referenced_inputs(&self) -> impl Iterator<Item = &StepInput> {
        self.inputs
            .iter()
            .chain(self.code.as_ref())
            .chain(self.target.as_ref())
    }
}

/// Output record of a successfully executed step, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutput {
    pub fields: BTreeMap<String, Value>,
}

impl StepOutput {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn address(&self) -> Option<&str> {
        self.get(fields::ADDRESS).and_then(Value::as_address)
    }

    pub fn code_hash(&self) -> Option<&str> {
        self.get(fields::CODE_HASH).and_then(Value::as_hash)
    }

    pub fn block_number(&self) -> Option<u64> {
        self.get(fields::BLOCK_NUMBER)
            .and_then(Value::as_uint)
            .map(|n| n as u64)
    }
}

/// Ordered sequence of deployment steps.
///
/// Acyclic by construction: every reference must name a strictly earlier
/// step. [`DeploymentPlan::validate`] enforces this before anything is
/// submitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub steps: Vec<DeploymentStep>,
}

impl DeploymentPlan {
    pub fn new(steps: Vec<DeploymentStep>) -> Self {
        Self { steps }
    }

    /// Validate step-name uniqueness, per-kind shape, and that every
    /// reference resolves to a provided binding or a strictly earlier
    /// step — including the referenced output field, where the target
    /// kind's outputs are statically known. Fails before any transaction
    /// is submitted.
    pub fn validate(&self, bindings: &BTreeMap<String, Value>) -> Result<()> {
        let mut seen: BTreeMap<&str, StepKind> = BTreeMap::new();

        for step in &self.steps {
            if seen.insert(&step.name, step.kind).is_some() {
                return Err(DeployError::PlanValidation(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }

            self.validate_shape(step)?;

            for input in step.referenced_inputs() {
                match input {
                    StepInput::Literal(_) => {}
                    StepInput::Binding(name) => {
                        if !bindings.contains_key(name) {
                            return Err(DeployError::PlanValidation(format!(
                                "step '{}' references unknown binding '{name}'",
                                step.name
                            )));
                        }
                    }
                    StepInput::Ref { step: target, field } => {
                        if target == &step.name {
                            return Err(DeployError::PlanValidation(format!(
                                "step '{}' references itself",
                                step.name
                            )));
                        }
                        let Some(kind) = seen.get(target.as_str()) else {
                            let reason = if self.steps.iter().any(|s| &s.name == target) {
                                "a later step (forward reference)"
                            } else {
                                "no step in the plan"
                            };
                            return Err(DeployError::PlanValidation(format!(
                                "step '{}' references '{target}', which names {reason}",
                                step.name
                            )));
                        };
                        if let Some(allowed) = kind.known_output_fields() {
                            if !allowed.contains(&field.as_str()) {
                                return Err(DeployError::PlanValidation(format!(
                                    "step '{}' references '{target}.{field}', but {kind} \
                                     steps produce only [{}]",
                                    step.name,
                                    allowed.join(", ")
                                )));
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn validate_shape(&self, step: &DeploymentStep) -> Result<()> {
        match step.kind {
            StepKind::UploadCode => {}
            StepKind::Instantiate => {
                if step.selector.is_none() {
                    return Err(DeployError::PlanValidation(format!(
                        "instantiate step '{}' has no constructor selector",
                        step.name
                    )));
                }
            }
            StepKind::Invoke => {
                if step.selector.is_none() {
                    return Err(DeployError::PlanValidation(format!(
                        "invoke step '{}' has no method selector",
                        step.name
                    )));
                }
                if step.target.is_none() {
                    return Err(DeployError::PlanValidation(format!(
                        "invoke step '{}' has no target contract",
                        step.name
                    )));
                }
                if step.persist_as.is_some() && !step.read_only {
                    return Err(DeployError::PlanValidation(format!(
                        "invoke step '{}' persists an address but is not a read-only lookup",
                        step.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_bindings() -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    #[test]
    fn valid_plan_passes() {
        let plan = DeploymentPlan::new(vec![
            DeploymentStep::upload_code("upload-registry", "registry"),
            DeploymentStep::instantiate("deploy-vault", "vault", "new")
                .input(StepInput::step_ref("upload-registry", fields::CODE_HASH)),
        ]);
        plan.validate(&no_bindings()).unwrap();
    }

    #[test]
    fn duplicate_step_names_rejected() {
        let plan = DeploymentPlan::new(vec![
            DeploymentStep::upload_code("upload", "registry"),
            DeploymentStep::upload_code("upload", "share_token"),
        ]);
        let err = plan.validate(&no_bindings()).unwrap_err();
        assert!(matches!(err, DeployError::PlanValidation(_)), "{err}");
    }

    #[test]
    fn forward_reference_rejected() {
        let plan = DeploymentPlan::new(vec![
            DeploymentStep::instantiate("deploy-vault", "vault", "new")
                .input(StepInput::step_ref("upload-registry", fields::CODE_HASH)),
            DeploymentStep::upload_code("upload-registry", "registry"),
        ]);
        let err = plan.validate(&no_bindings()).unwrap_err();
        assert!(err.to_string().contains("forward reference"), "{err}");
    }

    #[test]
    fn unknown_reference_rejected() {
        let plan = DeploymentPlan::new(vec![
            DeploymentStep::instantiate("deploy-vault", "vault", "new")
                .input(StepInput::step_ref("nowhere", fields::CODE_HASH)),
        ]);
        let err = plan.validate(&no_bindings()).unwrap_err();
        assert!(err.to_string().contains("no step in the plan"), "{err}");
    }

    #[test]
    fn reference_to_unknown_output_field_rejected() {
        let plan = DeploymentPlan::new(vec![
            DeploymentStep::upload_code("upload-registry", "registry"),
            DeploymentStep::instantiate("deploy-vault", "vault", "new")
                .input(StepInput::step_ref("upload-registry", "addresss")),
        ]);
        let err = plan.validate(&no_bindings()).unwrap_err();
        assert!(
            err.to_string().contains("upload-registry.addresss"),
            "{err}"
        );
        assert!(err.to_string().contains(fields::CODE_HASH), "{err}");
    }

    #[test]
    fn reference_into_invoke_output_is_not_checked_statically() {
        // Invoke outputs depend on the call, so the field is only
        // resolvable at run time.
        let plan = DeploymentPlan::new(vec![
            DeploymentStep::instantiate("deploy-vault", "vault", "new"),
            DeploymentStep::invoke("lookup", "vault", "iVault::get_registry_contract")
                .target(StepInput::step_ref("deploy-vault", fields::ADDRESS))
                .read_only(),
            DeploymentStep::invoke("configure", "registry", "iRegistry::update_agents")
                .target(StepInput::step_ref("lookup", "anything")),
        ]);
        plan.validate(&no_bindings()).unwrap();
    }

    #[test]
    fn unknown_binding_rejected() {
        let plan = DeploymentPlan::new(vec![
            DeploymentStep::instantiate("deploy-vault", "vault", "new")
                .input(StepInput::binding("era_duration_ms")),
        ]);
        let err = plan.validate(&no_bindings()).unwrap_err();
        assert!(err.to_string().contains("era_duration_ms"), "{err}");

        let mut bindings = BTreeMap::new();
        bindings.insert("era_duration_ms".to_string(), Value::Uint(86_400_000));
        plan.validate(&bindings).unwrap();
    }

    #[test]
    fn invoke_without_target_rejected() {
        let plan = DeploymentPlan::new(vec![DeploymentStep::invoke(
            "lookup",
            "registry",
            "iVault::get_registry_contract",
        )]);
        let err = plan.validate(&no_bindings()).unwrap_err();
        assert!(err.to_string().contains("no target contract"), "{err}");
    }

    #[test]
    fn plan_round_trips_through_serde() {
        let plan = DeploymentPlan::new(vec![
            DeploymentStep::upload_code("upload-registry", "registry").reuse_existing(true),
            DeploymentStep::instantiate("deploy-vault", "vault", "new")
                .input(StepInput::step_ref("upload-registry", fields::CODE_HASH))
                .input(StepInput::literal(Value::Uint(1000)))
                .value(5),
        ]);
        let json = serde_json::to_string(&plan).unwrap();
        let back: DeploymentPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.steps.len(), 2);
        assert_eq!(back.steps[1].value, 5);
    }

    #[test]
    fn plan_with_integer_literals_round_trips_through_toml() {
        // Integer constructor arguments and attached value both exceed
        // what a TOML integer can hold, so they travel as strings.
        let plan = DeploymentPlan::new(vec![
            DeploymentStep::instantiate("deploy-vault", "vault", "new")
                .input(StepInput::literal(Value::Uint(86_400_000)))
                .input(StepInput::literal(Value::Uint(u128::MAX)))
                .value(1_000_000_000_000_000_000_000),
        ]);
        let rendered = toml::to_string_pretty(&plan).unwrap();
        let back: DeploymentPlan = toml::from_str(&rendered).unwrap();
        assert_eq!(back.steps[0].inputs, plan.steps[0].inputs);
        assert_eq!(back.steps[0].value, plan.steps[0].value);
    }

    #[test]
    fn hand_written_toml_plans_accept_bare_integers() {
        let plan: DeploymentPlan = toml::from_str(
            r#"
            [[steps]]
            name = "deploy-vault"
            kind = "instantiate"
            contract = "vault"
            selector = "new"
            value = 5

            [[steps.inputs]]
            [steps.inputs.literal]
            kind = "uint"
            value = 86400000
            "#,
        )
        .unwrap();
        assert_eq!(plan.steps[0].value, 5);
        assert_eq!(
            plan.steps[0].inputs,
            vec![StepInput::literal(Value::Uint(86_400_000))]
        );
        plan.validate(&no_bindings()).unwrap();
    }
}
