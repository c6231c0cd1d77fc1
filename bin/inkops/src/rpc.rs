//! HTTP JSON-RPC chain client.
//!
//! Implements the narrow [`ChainClient`] seam over a node's HTTP JSON-RPC
//! surface. Status subscriptions are synthesized by polling the node's
//! transaction-status endpoint and feeding notifications into a channel;
//! unsubscribing aborts the polling task.

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use inkops_deploy::{
    ChainClient, ChainEvent, CodeSource, Signer, StatusEvent, Subscription, TxPayload, Value,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use url::Url;

/// Timeout for individual RPC requests.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between transaction-status polls.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct HttpChainClient {
    client: reqwest::Client,
    url: Url,
}

impl HttpChainClient {
    pub fn new(url: Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, url })
    }

    /// Make a JSON-RPC call and deserialize the result.
    async fn rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> anyhow::Result<T> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .with_context(|| format!("Failed to send {method} request"))?;

        let result: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {method} response"))?;

        if let Some(error) = result.get("error") {
            anyhow::bail!(
                "RPC error from {method}: {}",
                error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown")
            );
        }

        let result_value = result
            .get("result")
            .with_context(|| format!("No result in {method} response"))?
            .clone();

        serde_json::from_value(result_value)
            .with_context(|| format!("Failed to deserialize {method} result"))
    }
}

impl ChainClient for HttpChainClient {
    fn submit_transaction(
        &self,
        payload: TxPayload,
        signer: &dyn Signer,
    ) -> impl Future<Output = anyhow::Result<Subscription>> + Send {
        async move {
            let call = encode_payload(&payload);
            let call_bytes =
                serde_json::to_vec(&call).context("Failed to encode transaction payload")?;
            let signed = serde_json::json!({
                "payload": call,
                "signer": signer.address(),
                "signature": format!("0x{}", hex::encode(signer.sign(&call_bytes))),
            });

            let tx_hash: String = self
                .rpc_call("author_submitExtrinsic", vec![signed])
                .await
                .with_context(|| format!("Failed to submit {}", payload.describe()))?;

            let (sender, receiver) = mpsc::channel(16);
            let poller = StatusPoller {
                client: self.clone(),
                tx_hash: tx_hash.clone(),
                sender,
            };
            let handle = tokio::spawn(poller.run());

            Ok(Subscription::new(tx_hash, receiver, move || {
                handle.abort()
            }))
        }
    }

    fn query(
        &self,
        path: &str,
        args: &[Value],
    ) -> impl Future<Output = anyhow::Result<Value>> + Send {
        async move {
            let params = vec![
                serde_json::json!(path),
                serde_json::to_value(args).context("Failed to encode query arguments")?,
            ];
            let result: serde_json::Value = self.rpc_call("state_query", params).await?;
            decode_value(&result).with_context(|| format!("Failed to decode result of {path}"))
        }
    }

    fn query_contract(
        &self,
        address: &str,
        method: &str,
        args: &[Value],
    ) -> impl Future<Output = anyhow::Result<Value>> + Send {
        async move {
            let params = vec![serde_json::json!({
                "dest": address,
                "method": method,
                "args": serde_json::to_value(args).context("Failed to encode call arguments")?,
            })];
            let result: serde_json::Value = self.rpc_call("contracts_call", params).await?;
            decode_value(&result)
                .with_context(|| format!("Failed to decode output of {address}::{method}"))
        }
    }
}

/// Background task polling one transaction's status until terminal.
struct StatusPoller {
    client: HttpChainClient,
    tx_hash: String,
    sender: mpsc::Sender<StatusEvent>,
}

impl StatusPoller {
    async fn run(self) {
        let mut last_status: Option<RpcTxStatus> = None;

        loop {
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;

            let response: TxStatusResponse = match self
                .client
                .rpc_call("author_transactionStatus", vec![
                    serde_json::json!(self.tx_hash),
                ])
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    // Transient: the tracker's timeout bounds the overall
                    // wait, so keep polling.
                    tracing::debug!(tx_hash = %self.tx_hash, error = %err, "Status poll failed");
                    continue;
                }
            };

            if last_status == Some(response.status) {
                continue;
            }
            last_status = Some(response.status);

            let Some(event) = response.into_event() else {
                continue;
            };
            let terminal = event.is_terminal();
            if self.sender.send(event).await.is_err() || terminal {
                return;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum RpcTxStatus {
    Pending,
    Broadcast,
    InBlock,
    Finalized,
    Invalid,
    Dropped,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxStatusResponse {
    status: RpcTxStatus,
    #[serde(default)]
    block_hash: Option<String>,
    #[serde(default)]
    block_number: Option<u64>,
    #[serde(default)]
    events: Vec<RpcEvent>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcEvent {
    name: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl TxStatusResponse {
    fn into_event(self) -> Option<StatusEvent> {
        let reason = self.reason.unwrap_or_else(|| "unknown".to_string());
        match self.status {
            RpcTxStatus::Pending => None,
            RpcTxStatus::Broadcast => Some(StatusEvent::Broadcast),
            RpcTxStatus::InBlock => Some(StatusEvent::InBlock {
                block_hash: self.block_hash.unwrap_or_default(),
            }),
            RpcTxStatus::Finalized => Some(StatusEvent::Finalized {
                block_hash: self.block_hash.unwrap_or_default(),
                block_number: self.block_number.unwrap_or_default(),
                events: self
                    .events
                    .into_iter()
                    .map(|e| ChainEvent {
                        name: e.name,
                        data: e.data,
                    })
                    .collect(),
            }),
            RpcTxStatus::Invalid => Some(StatusEvent::Invalid { reason }),
            RpcTxStatus::Dropped => Some(StatusEvent::Dropped { reason }),
        }
    }
}

/// Encode a transaction payload into the node's JSON call envelope.
/// Argument order in `args` is the on-wire order.
fn encode_payload(payload: &TxPayload) -> serde_json::Value {
    match payload {
        TxPayload::UploadCode { contract, wasm } => serde_json::json!({
            "call": "contracts.upload_code",
            "contract": contract,
            "wasm": format!("0x{}", hex::encode(wasm)),
        }),
        TxPayload::Instantiate {
            contract,
            code,
            constructor,
            args,
            value,
        } => {
            let code = match code {
                CodeSource::Wasm(wasm) => serde_json::json!({
                    "wasm": format!("0x{}", hex::encode(wasm)),
                }),
                CodeSource::Existing(hash) => serde_json::json!({ "code_hash": hash }),
            };
            serde_json::json!({
                "call": "contracts.instantiate",
                "contract": contract,
                "code": code,
                "constructor": constructor,
                "args": args,
                // Balances exceed 64-bit JSON numbers; sent as strings.
                "value": value.to_string(),
            })
        }
        TxPayload::ContractCall {
            address,
            method,
            args,
            value,
        } => serde_json::json!({
            "call": "contracts.call",
            "dest": address,
            "method": method,
            "args": args,
            "value": value.to_string(),
        }),
    }
}

/// Decode a JSON-RPC result into a step value.
///
/// Results produced by this tool round-trip through the tagged `Value`
/// encoding; plain JSON from the node is mapped heuristically (hex
/// strings are hashes, SS58-shaped strings are addresses).
fn decode_value(json: &serde_json::Value) -> anyhow::Result<Value> {
    if json.get("kind").is_some() && json.get("value").is_some() {
        return serde_json::from_value(json.clone()).context("Malformed tagged value");
    }

    match json {
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(|n| Value::Uint(n as u128))
            .context("Non-integer number in result"),
        serde_json::Value::String(s) => {
            if s.starts_with("0x") {
                Ok(Value::Hash(s.clone()))
            } else if s.len() == 48 && s.starts_with('5') {
                Ok(Value::Address(s.clone()))
            } else {
                Ok(Value::Str(s.clone()))
            }
        }
        serde_json::Value::Array(items) => items
            .iter()
            .map(decode_value)
            .collect::<anyhow::Result<Vec<_>>>()
            .map(Value::List),
        other => anyhow::bail!("Cannot decode {other} into a step value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_value_maps_json_shapes() {
        assert_eq!(decode_value(&serde_json::json!(7)).unwrap(), Value::Uint(7));
        assert_eq!(
            decode_value(&serde_json::json!("0xabcd")).unwrap(),
            Value::Hash("0xabcd".into())
        );
        let address = format!("5{}", "a".repeat(47));
        assert_eq!(
            decode_value(&serde_json::json!(address)).unwrap(),
            Value::Address(address.clone())
        );
        assert_eq!(
            decode_value(&serde_json::json!([1, "x"])).unwrap(),
            Value::List(vec![Value::Uint(1), Value::Str("x".into())])
        );
    }

    #[test]
    fn decode_value_round_trips_tagged_encoding() {
        let original = Value::List(vec![Value::Uint(5), Value::Address(format!("5{}", "b".repeat(47)))]);
        let json = serde_json::to_value(&original).unwrap();
        assert_eq!(decode_value(&json).unwrap(), original);
    }

    #[test]
    fn status_mapping_is_terminal_only_for_terminal_statuses() {
        let finalized = TxStatusResponse {
            status: RpcTxStatus::Finalized,
            block_hash: Some("0x01".into()),
            block_number: Some(3),
            events: vec![],
            reason: None,
        };
        assert!(finalized.into_event().unwrap().is_terminal());

        let pending = TxStatusResponse {
            status: RpcTxStatus::Pending,
            block_hash: None,
            block_number: None,
            events: vec![],
            reason: None,
        };
        assert!(pending.into_event().is_none());
    }

    #[test]
    fn instantiate_payload_encodes_args_in_order() {
        let payload = TxPayload::Instantiate {
            contract: "vault".into(),
            code: CodeSource::Existing("0xcafe".into()),
            constructor: "new".into(),
            args: vec![Value::Hash("0x01".into()), Value::Uint(9)],
            value: 340_282_366_920_938_463_463,
        };
        let json = encode_payload(&payload);
        assert_eq!(json["call"], "contracts.instantiate");
        assert_eq!(json["code"]["code_hash"], "0xcafe");
        let args = json["args"].as_array().unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0]["kind"], "hash");
        assert_eq!(args[1]["value"], "9");
        // The attached value exceeds u64 and still encodes.
        assert_eq!(json["value"], "340282366920938463463");
    }
}
