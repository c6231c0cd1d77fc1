//! inkops-deploy - Deployment orchestration library.
//!
//! This crate sequences multi-contract deployments against a chain:
//! uploading code, instantiating contracts in dependency order, resolving
//! addresses knowable only after instantiation, applying declarative
//! configuration, and persisting deployment artifacts for later runs.

mod applier;
mod artifacts;
mod chain;
mod error;
mod executor;
mod plan;
mod tracker;
mod value;

pub use applier::{
    AgentTarget, ConfigurationTarget, DeltaAction, DeltaEntry, DeltaKind, DeltaReport,
    EntryOutcome, apply, compute_delta,
};
pub use artifacts::{
    ArtifactStore, ContractArtifact, DEPLOYMENT_RECORD_FILENAME, DeploymentRecord,
};
pub use chain::{
    ChainClient, ChainEvent, CodeSource, EVENT_INSTANTIATED, Signer, StatusEvent, Subscription,
    TxPayload, code_hash, instantiated_address,
};
pub use error::{DeployError, Result};
pub use executor::{
    Bindings, CancelFlag, CompletedStep, ExecutionResult, PlanExecutor, StepFailure,
};
pub use plan::{DeploymentPlan, DeploymentStep, StepInput, StepKind, StepOutput, fields};
pub use tracker::{TransactionOutcome, submit_and_track};
pub use value::Value;
