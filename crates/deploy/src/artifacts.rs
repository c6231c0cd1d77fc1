//! Durable deployment artifacts.
//!
//! Artifacts live under `<root>/<network>/<contract>/`: the compiled
//! bytecode (`<contract>.wasm`), the interface description
//! (`<contract>.json`) and a generated `deployment.json` record exposing
//! the deployed address and block number for later runs and external
//! tooling.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

/// Name of the generated per-contract deployment record.
pub const DEPLOYMENT_RECORD_FILENAME: &str = "deployment.json";

/// Persisted record for one (network, contract) pair.
///
/// Written once per successful step, overwritten on redeploy. Reads always
/// reflect the latest write; there is no caching layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Free-form extra metadata (e.g. token addresses).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Compiled code and interface description for one contract.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub wasm: Vec<u8>,
    pub abi: serde_json::Value,
}

/// File-backed artifact store rooted at a deployments directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn contract_dir(&self, network: &str, contract: &str) -> PathBuf {
        self.root.join(network).join(contract)
    }

    /// Persist a deployment record, creating the namespace if absent and
    /// overwriting any prior record for the same (network, contract).
    pub async fn write(
        &self,
        network: &str,
        contract: &str,
        record: &DeploymentRecord,
    ) -> Result<()> {
        let dir = self.contract_dir(network, contract);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DeployError::artifact_io(&dir, e))?;

        let path = dir.join(DEPLOYMENT_RECORD_FILENAME);
        let contents = serde_json::to_vec_pretty(record)
            .map_err(|e| DeployError::artifact_io(&path, e))?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| DeployError::artifact_io(&path, e))?;

        tracing::info!(network, contract, path = %path.display(), "Deployment record written");
        Ok(())
    }

    /// Read a previously written record. A missing record is not an error:
    /// first deployment is a valid state.
    pub async fn read(&self, network: &str, contract: &str) -> Result<Option<DeploymentRecord>> {
        let path = self
            .contract_dir(network, contract)
            .join(DEPLOYMENT_RECORD_FILENAME);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DeployError::artifact_io(&path, e)),
        };
        let record =
            serde_json::from_slice(&contents).map_err(|e| DeployError::artifact_io(&path, e))?;
        Ok(Some(record))
    }

    /// Duplicate build artifacts (code and interface, never addresses)
    /// from one network namespace to another, promoting a build without
    /// redeploying. A no-op when source and destination match.
    pub async fn copy(&self, contract: &str, from_network: &str, to_network: &str) -> Result<()> {
        if from_network == to_network {
            return Ok(());
        }

        let source = self.contract_dir(from_network, contract);
        let destination = self.contract_dir(to_network, contract);
        tokio::fs::create_dir_all(&destination)
            .await
            .map_err(|e| DeployError::artifact_io(&destination, e))?;

        for file in [format!("{contract}.wasm"), format!("{contract}.json")] {
            let from = source.join(&file);
            let to = destination.join(&file);
            tokio::fs::copy(&from, &to)
                .await
                .map_err(|e| DeployError::artifact_io(&from, e))?;
        }

        tracing::info!(
            contract,
            from = from_network,
            to = to_network,
            "Copied build artifacts"
        );
        Ok(())
    }

    /// Load the compiled bytecode and interface for a contract.
    pub async fn load_contract(&self, network: &str, contract: &str) -> Result<ContractArtifact> {
        let dir = self.contract_dir(network, contract);

        let wasm_path = dir.join(format!("{contract}.wasm"));
        let wasm = tokio::fs::read(&wasm_path).await.map_err(|e| {
            DeployError::artifact_io(
                &wasm_path,
                format!("{e}; did you build the contract first?"),
            )
        })?;

        let abi_path = dir.join(format!("{contract}.json"));
        let abi_bytes = tokio::fs::read(&abi_path)
            .await
            .map_err(|e| DeployError::artifact_io(&abi_path, e))?;
        let abi =
            serde_json::from_slice(&abi_bytes).map_err(|e| DeployError::artifact_io(&abi_path, e))?;

        Ok(ContractArtifact { wasm, abi })
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn store() -> (TempDir, ArtifactStore) {
        let dir = TempDir::new("inkops-artifacts").unwrap();
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_dir, store) = store();
        let record = DeploymentRecord {
            address: Some("5Vault".into()),
            block_number: Some(1234),
            ..Default::default()
        };
        store.write("test", "vault", &record).await.unwrap();

        let read = store.read("test", "vault").await.unwrap().unwrap();
        assert_eq!(read.address.as_deref(), Some("5Vault"));
        assert_eq!(read.block_number, Some(1234));
    }

    #[tokio::test]
    async fn read_of_never_written_key_is_absent_not_error() {
        let (_dir, store) = store();
        assert_eq!(store.read("test", "vault").await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_overwrites_prior_record() {
        let (_dir, store) = store();
        let first = DeploymentRecord {
            address: Some("5Old".into()),
            ..Default::default()
        };
        store.write("test", "vault", &first).await.unwrap();

        let second = DeploymentRecord {
            address: Some("5New".into()),
            ..Default::default()
        };
        store.write("test", "vault", &second).await.unwrap();

        let read = store.read("test", "vault").await.unwrap().unwrap();
        assert_eq!(read.address.as_deref(), Some("5New"));
    }

    #[tokio::test]
    async fn copy_promotes_code_but_not_records() {
        let (dir, store) = store();
        let source = dir.path().join("development").join("vault");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("vault.wasm"), b"\0asm").unwrap();
        std::fs::write(source.join("vault.json"), b"{}").unwrap();
        store
            .write("development", "vault", &DeploymentRecord {
                address: Some("5Dev".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        store.copy("vault", "development", "mainnet").await.unwrap();

        let artifact = store.load_contract("mainnet", "vault").await.unwrap();
        assert_eq!(artifact.wasm, b"\0asm");
        // Addresses never travel across networks.
        assert_eq!(store.read("mainnet", "vault").await.unwrap(), None);
    }

    #[tokio::test]
    async fn copy_to_same_network_is_noop() {
        let (_dir, store) = store();
        store
            .copy("vault", "development", "development")
            .await
            .unwrap();
    }
}
