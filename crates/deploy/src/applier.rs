//! Idempotent configuration application.
//!
//! A [`ConfigurationTarget`] declares the desired agent set; [`apply`]
//! diffs it against observed on-chain state and issues only the
//! transactions still needed to converge. Entries present on-chain but
//! absent from the target are left untouched: removal is an explicit
//! separate operation, never implicit, so an agent holding funds is never
//! deregistered by accident.

use std::collections::BTreeMap;
use std::future::Future;

use crate::error::{DeployError, Result};
use crate::tracker::TransactionOutcome;

/// Desired state for one agent, keyed by its stable identity (the
/// validator account it nominates).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTarget {
    pub account: String,
    pub weight: u64,
}

/// The declared desired agent set.
#[derive(Debug, Clone)]
pub struct ConfigurationTarget {
    entries: Vec<AgentTarget>,
}

impl ConfigurationTarget {
    /// Build a target, rejecting duplicate identities before any chain
    /// interaction.
    pub fn new(entries: Vec<AgentTarget>) -> Result<Self> {
        let mut seen = BTreeMap::new();
        for entry in &entries {
            if seen.insert(entry.account.as_str(), ()).is_some() {
                return Err(DeployError::Precondition(format!(
                    "duplicate target identity '{}'",
                    entry.account
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[AgentTarget] {
        &self.entries
    }
}

/// How an entry diverges from observed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaKind {
    /// Absent from observed state.
    Add,
    /// Present with a different weight.
    Update { observed_weight: u64 },
}

/// One correcting operation still needed to converge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaAction {
    pub account: String,
    pub weight: u64,
    pub kind: DeltaKind,
}

/// Terminal outcome of one delta entry's transaction.
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    Applied { block_number: u64 },
    Failed { reason: String },
}

/// A delta entry annotated with its transaction outcome.
#[derive(Debug, Clone)]
pub struct DeltaEntry {
    pub action: DeltaAction,
    pub outcome: EntryOutcome,
}

/// Report of one `apply` pass.
#[derive(Debug, Clone, Default)]
pub struct DeltaReport {
    pub entries: Vec<DeltaEntry>,
}

impl DeltaReport {
    /// True when nothing needed to change: the observed state already
    /// matched the target.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failed(&self) -> impl Iterator<Item = &DeltaEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, EntryOutcome::Failed { .. }))
    }

    pub fn all_applied(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Compute the delta between a target and observed `account -> weight`
/// state. Observed-only entries produce no action.
pub fn compute_delta(
    target: &ConfigurationTarget,
    observed: &BTreeMap<String, u64>,
) -> Vec<DeltaAction> {
    target
        .entries()
        .iter()
        .filter_map(|entry| match observed.get(&entry.account) {
            None => Some(DeltaAction {
                account: entry.account.clone(),
                weight: entry.weight,
                kind: DeltaKind::Add,
            }),
            Some(&weight) if weight != entry.weight => Some(DeltaAction {
                account: entry.account.clone(),
                weight: entry.weight,
                kind: DeltaKind::Update {
                    observed_weight: weight,
                },
            }),
            Some(_) => None,
        })
        .collect()
}

/// Apply a declared target against observed state.
///
/// `observe` is a read-only query of current state; `submit` issues one
/// correcting transaction per delta action and must fully converge the
/// entry it is given. Unlike the plan executor, a failed entry does not
/// stop the remaining entries: failures are independent per entry and
/// reported in the returned [`DeltaReport`].
///
/// Re-running with the same target against the post-apply observed state
/// yields an empty report.
pub async fn apply<O, OFut, S, SFut>(
    target: &ConfigurationTarget,
    observe: O,
    submit: S,
) -> Result<DeltaReport>
where
    O: FnOnce() -> OFut,
    OFut: Future<Output = anyhow::Result<BTreeMap<String, u64>>>,
    S: Fn(DeltaAction) -> SFut,
    SFut: Future<Output = TransactionOutcome>,
{
    let observed = observe().await.map_err(|err| {
        DeployError::TransactionFailed(format!("failed to observe current state: {err:#}"))
    })?;

    let delta = compute_delta(target, &observed);
    tracing::info!(
        target_entries = target.entries().len(),
        observed_entries = observed.len(),
        delta_entries = delta.len(),
        "Computed configuration delta"
    );

    let mut report = DeltaReport::default();
    for action in delta {
        tracing::info!(account = %action.account, weight = action.weight, kind = ?action.kind, "Applying delta entry");
        let outcome = match submit(action.clone()).await {
            TransactionOutcome::Finalized { block_number, .. } => {
                EntryOutcome::Applied { block_number }
            }
            TransactionOutcome::Failed { reason } => {
                tracing::warn!(account = %action.account, %reason, "Delta entry failed, continuing");
                EntryOutcome::Failed { reason }
            }
        };
        report.entries.push(DeltaEntry { action, outcome });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    fn target(entries: &[(&str, u64)]) -> ConfigurationTarget {
        ConfigurationTarget::new(
            entries
                .iter()
                .map(|(account, weight)| AgentTarget {
                    account: account.to_string(),
                    weight: *weight,
                })
                .collect(),
        )
        .unwrap()
    }

    fn finalized() -> TransactionOutcome {
        TransactionOutcome::Finalized {
            tx_hash: "0x00".into(),
            block_hash: "0x01".into(),
            block_number: 1,
            events: vec![],
        }
    }

    #[test]
    fn duplicate_identities_rejected_up_front() {
        let err = ConfigurationTarget::new(vec![
            AgentTarget { account: "5Bob".into(), weight: 100 },
            AgentTarget { account: "5Bob".into(), weight: 200 },
        ])
        .unwrap_err();
        assert!(matches!(err, DeployError::Precondition(_)), "{err}");
    }

    #[test]
    fn delta_adds_without_touching_matches() {
        let target = target(&[("x", 100), ("y", 200)]);
        let observed = BTreeMap::from([("x".to_string(), 100)]);

        let delta = compute_delta(&target, &observed);
        assert_eq!(delta, vec![DeltaAction {
            account: "y".into(),
            weight: 200,
            kind: DeltaKind::Add,
        }]);
    }

    #[test]
    fn delta_never_removes_observed_only_entries() {
        let target = target(&[("x", 100)]);
        let observed = BTreeMap::from([("x".to_string(), 100), ("z".to_string(), 50)]);
        assert!(compute_delta(&target, &observed).is_empty());
    }

    #[test]
    fn delta_updates_mismatched_weights() {
        let target = target(&[("x", 1000)]);
        let observed = BTreeMap::from([("x".to_string(), 0)]);
        let delta = compute_delta(&target, &observed);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].kind, DeltaKind::Update { observed_weight: 0 });
    }

    #[tokio::test]
    async fn apply_twice_converges_to_empty_delta() {
        let target = target(&[("5Bob", 1000), ("5Eve", 1000)]);
        // Simulated on-chain state, converged by the submit closure.
        let state: Mutex<BTreeMap<String, u64>> = Mutex::new(BTreeMap::new());

        let first = apply(
            &target,
            || async { anyhow::Ok(state.lock().unwrap().clone()) },
            |action: DeltaAction| {
                state
                    .lock()
                    .unwrap()
                    .insert(action.account.clone(), action.weight);
                async { finalized() }
            },
        )
        .await
        .unwrap();
        assert_eq!(first.entries.len(), 2);
        assert!(first.all_applied());

        let second_submissions = Mutex::new(0_usize);
        let second = apply(
            &target,
            || async { anyhow::Ok(state.lock().unwrap().clone()) },
            |_: DeltaAction| {
                *second_submissions.lock().unwrap() += 1;
                async { finalized() }
            },
        )
        .await
        .unwrap();
        assert!(second.is_empty());
        assert_eq!(*second_submissions.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn entry_failures_are_isolated() {
        let target = target(&[("5Bob", 1000), ("5Eve", 1000)]);
        let submitted: Mutex<Vec<String>> = Mutex::new(Vec::new());

        let report = apply(
            &target,
            || async { anyhow::Ok(BTreeMap::new()) },
            |action: DeltaAction| {
                submitted.lock().unwrap().push(action.account.clone());
                let fail = action.account == "5Bob";
                async move {
                    if fail {
                        TransactionOutcome::failed("out of funds")
                    } else {
                        finalized()
                    }
                }
            },
        )
        .await
        .unwrap();

        // The failure of one entry did not stop the other.
        assert_eq!(submitted.lock().unwrap().len(), 2);
        assert_eq!(report.failed().count(), 1);
        assert!(!report.all_applied());
    }
}
