//! The narrow interface to the chain client.
//!
//! The core never talks to a node directly: it submits opaque transaction
//! payloads through [`ChainClient`] and consumes the resulting status
//! notification stream. Encoding, decoding and key management live behind
//! this seam.

use std::future::Future;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::value::Value;

/// Opaque signing capability.
///
/// The core only needs the signer's address (for constructor arguments and
/// logging) and the ability to sign a payload. Curve choice and key
/// derivation are the implementation's business.
pub trait Signer: Send + Sync {
    fn address(&self) -> &str;
    fn sign(&self, payload: &[u8]) -> Vec<u8>;
}

/// A decoded event emitted by a finalized transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    /// Qualified event name, e.g. `Contracts.Instantiated`.
    pub name: String,
    /// Decoded event fields.
    pub data: serde_json::Value,
}

/// Status notification for one submitted transaction.
///
/// The chain delivers a sequence of these per submission. `Finalized`,
/// `Invalid` and `Dropped` are terminal; everything else is progress.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    Broadcast,
    InBlock { block_hash: String },
    Finalized {
        block_hash: String,
        block_number: u64,
        events: Vec<ChainEvent>,
    },
    Invalid { reason: String },
    Dropped { reason: String },
}

impl StatusEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StatusEvent::Finalized { .. } | StatusEvent::Invalid { .. } | StatusEvent::Dropped { .. }
        )
    }
}

/// An unsigned transaction payload, one variant per step kind.
///
/// ABI encoding is the chain client's responsibility; argument order here
/// is exactly the order encoded on the wire.
#[derive(Debug, Clone)]
pub enum TxPayload {
    /// Upload contract bytecode without instantiating it.
    UploadCode { contract: String, wasm: Vec<u8> },
    /// Instantiate a contract from uploaded or attached code.
    Instantiate {
        contract: String,
        code: CodeSource,
        constructor: String,
        args: Vec<Value>,
        value: u128,
    },
    /// Call a method on an instantiated contract.
    ContractCall {
        address: String,
        method: String,
        args: Vec<Value>,
        value: u128,
    },
}

impl TxPayload {
    /// Short human-readable description for logging.
    pub fn describe(&self) -> String {
        match self {
            TxPayload::UploadCode { contract, .. } => format!("upload-code {contract}"),
            TxPayload::Instantiate { contract, constructor, .. } => {
                format!("instantiate {contract}::{constructor}")
            }
            TxPayload::ContractCall { address, method, .. } => {
                format!("call {address}::{method}")
            }
        }
    }
}

/// Where the code for an instantiation comes from.
#[derive(Debug, Clone)]
pub enum CodeSource {
    /// Fresh bytecode uploaded together with the instantiation.
    Wasm(Vec<u8>),
    /// A code hash already uploaded on-chain.
    Existing(String),
}

/// A live status subscription for one submitted transaction.
///
/// Owns the event receiver plus an unsubscribe handle that is released
/// exactly once, either explicitly by the tracker or on drop.
pub struct Subscription {
    /// Hash of the signed transaction, known at submission time.
    pub tx_hash: String,
    events: mpsc::Receiver<StatusEvent>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        tx_hash: impl Into<String>,
        events: mpsc::Receiver<StatusEvent>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            events,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Next status notification, or `None` if the stream closed.
    pub async fn next_event(&mut self) -> Option<StatusEvent> {
        self.events.recv().await
    }

    /// Release the underlying subscription. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.unsubscribe.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// The chain client capability consumed by the core.
///
/// `submit_transaction` signs and submits a payload and returns the status
/// subscription for it. `query` reads chain state (storage and constants);
/// `query_contract` performs a read-only contract call and returns its
/// decoded output.
pub trait ChainClient: Send + Sync {
    fn submit_transaction(
        &self,
        payload: TxPayload,
        signer: &dyn Signer,
    ) -> impl Future<Output = anyhow::Result<Subscription>> + Send;

    fn query(
        &self,
        path: &str,
        args: &[Value],
    ) -> impl Future<Output = anyhow::Result<Value>> + Send;

    fn query_contract(
        &self,
        address: &str,
        method: &str,
        args: &[Value],
    ) -> impl Future<Output = anyhow::Result<Value>> + Send;
}

/// Content-derived identifier of contract bytecode.
///
/// Computed client-side so upload steps can record their code hash without
/// parsing chain-specific events.
pub fn code_hash(wasm: &[u8]) -> String {
    format!("0x{}", hex::encode(Sha256::digest(wasm)))
}

/// Event name emitted when a contract is instantiated.
pub const EVENT_INSTANTIATED: &str = "Contracts.Instantiated";

/// Extract the new contract address from a finalized instantiation's events.
pub fn instantiated_address(events: &[ChainEvent]) -> Option<String> {
    events
        .iter()
        .find(|e| e.name == EVENT_INSTANTIATED)
        .and_then(|e| e.data.get("contract"))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_hash_is_stable_and_content_derived() {
        let a = code_hash(b"wasm-a");
        let b = code_hash(b"wasm-b");
        assert_ne!(a, b);
        assert_eq!(a, code_hash(b"wasm-a"));
        assert!(a.starts_with("0x"));
    }

    #[test]
    fn instantiated_address_reads_contract_field() {
        let events = vec![
            ChainEvent {
                name: "Balances.Transfer".into(),
                data: serde_json::json!({"amount": 1}),
            },
            ChainEvent {
                name: EVENT_INSTANTIATED.into(),
                data: serde_json::json!({"contract": "5Vault"}),
            },
        ];
        assert_eq!(instantiated_address(&events).as_deref(), Some("5Vault"));
        assert_eq!(instantiated_address(&events[..1]), None);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (_tx, rx) = mpsc::channel(1);
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut sub = Subscription::new("0x00", rx, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
