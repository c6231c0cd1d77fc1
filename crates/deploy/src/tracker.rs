//! Transaction finalization tracking.
//!
//! A submitted transaction produces an asynchronous stream of status
//! notifications. [`submit_and_track`] drives that stream to exactly one
//! terminal [`TransactionOutcome`], surfacing intermediate notifications to
//! an observer callback and guaranteeing the subscription is released on
//! every exit path.

use std::time::Duration;

use tokio::time::timeout;

use crate::chain::{ChainClient, ChainEvent, Signer, StatusEvent, Subscription, TxPayload};

/// Terminal result of one submitted transaction. Never both.
#[derive(Debug, Clone)]
pub enum TransactionOutcome {
    Finalized {
        tx_hash: String,
        block_hash: String,
        block_number: u64,
        events: Vec<ChainEvent>,
    },
    Failed { reason: String },
}

impl TransactionOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed { reason: reason.into() }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Finalized { .. })
    }
}

/// Submit one transaction and await its terminal outcome.
///
/// Non-terminal notifications are passed to `on_status` and otherwise
/// ignored. A synchronous submission failure, a terminal error
/// notification, a closed stream, or exceeding `tx_timeout` all resolve to
/// [`TransactionOutcome::Failed`]; only a finalized notification resolves
/// to [`TransactionOutcome::Finalized`].
///
/// No automatic retry: retry policy belongs to the caller. Callers sharing
/// one signer must await each outcome before submitting the next
/// transaction, to keep the signer's sequence numbers ordered.
pub async fn submit_and_track<C: ChainClient>(
    client: &C,
    payload: TxPayload,
    signer: &dyn Signer,
    tx_timeout: Duration,
    on_status: impl Fn(&StatusEvent),
) -> TransactionOutcome {
    let description = payload.describe();
    let subscription = match client.submit_transaction(payload, signer).await {
        Ok(sub) => sub,
        Err(err) => {
            tracing::warn!(tx = %description, error = %err, "Transaction submission failed");
            return TransactionOutcome::failed(format!("submission failed: {err:#}"));
        }
    };

    tracing::debug!(tx = %description, tx_hash = %subscription.tx_hash, "Transaction submitted");

    match timeout(tx_timeout, drive_to_terminal(subscription, &description, on_status)).await {
        Ok(outcome) => outcome,
        // The subscription was dropped inside the cancelled future, which
        // released the underlying stream.
        Err(_) => {
            tracing::warn!(tx = %description, ?tx_timeout, "Timed out awaiting finalization");
            TransactionOutcome::failed(crate::DeployError::Timeout(tx_timeout).to_string())
        }
    }
}

/// Consume status notifications until the first terminal one.
async fn drive_to_terminal(
    mut subscription: Subscription,
    description: &str,
    on_status: impl Fn(&StatusEvent),
) -> TransactionOutcome {
    let tx_hash = subscription.tx_hash.clone();

    let outcome = loop {
        match subscription.next_event().await {
            Some(event) => {
                on_status(&event);
                match event {
                    StatusEvent::Finalized {
                        block_hash,
                        block_number,
                        events,
                    } => {
                        tracing::info!(
                            tx = %description,
                            block_number,
                            block_hash = %block_hash,
                            "Transaction finalized"
                        );
                        break TransactionOutcome::Finalized {
                            tx_hash,
                            block_hash,
                            block_number,
                            events,
                        };
                    }
                    StatusEvent::Invalid { reason } => {
                        break TransactionOutcome::failed(format!("invalid: {reason}"));
                    }
                    StatusEvent::Dropped { reason } => {
                        break TransactionOutcome::failed(format!("dropped: {reason}"));
                    }
                    other => {
                        tracing::debug!(tx = %description, status = ?other, "Transaction status");
                    }
                }
            }
            None => {
                break TransactionOutcome::failed(
                    "status stream closed before a terminal notification",
                );
            }
        }
    };

    subscription.unsubscribe();
    outcome
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;

    fn subscription_with(
        events: Vec<StatusEvent>,
        unsubscribes: &Arc<AtomicUsize>,
    ) -> Subscription {
        let (tx, rx) = mpsc::channel(8);
        for event in events {
            tx.try_send(event).unwrap();
        }
        // Keep the sender alive inside the closure so the stream does not
        // close before the terminal event is read.
        let counter = unsubscribes.clone();
        Subscription::new("0xfeed", rx, move || {
            let _keep_alive = &tx;
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn finalized_stream_resolves_to_finalized() {
        let unsubscribes = Arc::new(AtomicUsize::new(0));
        let sub = subscription_with(
            vec![
                StatusEvent::Broadcast,
                StatusEvent::InBlock { block_hash: "0x01".into() },
                StatusEvent::Finalized {
                    block_hash: "0x02".into(),
                    block_number: 7,
                    events: vec![],
                },
            ],
            &unsubscribes,
        );

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = seen.clone();
        let outcome = drive_to_terminal(sub, "test", move |_| {
            seen_cb.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        match outcome {
            TransactionOutcome::Finalized { block_number, block_hash, tx_hash, .. } => {
                assert_eq!(block_number, 7);
                assert_eq!(block_hash, "0x02");
                assert_eq!(tx_hash, "0xfeed");
            }
            other => panic!("expected finalized, got {other:?}"),
        }
        // Observer saw all three notifications, terminal included.
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_stream_resolves_to_failed() {
        let unsubscribes = Arc::new(AtomicUsize::new(0));
        let sub = subscription_with(
            vec![
                StatusEvent::Broadcast,
                StatusEvent::Invalid { reason: "bad signature".into() },
            ],
            &unsubscribes,
        );

        let outcome = drive_to_terminal(sub, "test", |_| {}).await;
        match outcome {
            TransactionOutcome::Failed { reason } => {
                assert!(reason.contains("bad signature"), "reason: {reason}");
            }
            other => panic!("expected failed, got {other:?}"),
        }
        assert_eq!(unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_stream_resolves_to_failed() {
        let unsubscribes = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel::<StatusEvent>(1);
        drop(tx);
        let counter = unsubscribes.clone();
        let sub = Subscription::new("0x00", rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = drive_to_terminal(sub, "test", |_| {}).await;
        assert!(!outcome.is_finalized());
        assert_eq!(unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_resolves_to_failed_and_unsubscribes() {
        let unsubscribes = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(1);
        // Only a non-terminal event; the stream then stays silent.
        tx.try_send(StatusEvent::Broadcast).unwrap();
        let counter = unsubscribes.clone();
        let sub = Subscription::new("0x00", rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = timeout(
            Duration::from_millis(50),
            drive_to_terminal(sub, "test", |_| {}),
        )
        .await;
        assert!(outcome.is_err(), "expected the wait to time out");
        // Dropping the cancelled future released the subscription.
        assert_eq!(unsubscribes.load(Ordering::SeqCst), 1);
        drop(tx);
    }
}
