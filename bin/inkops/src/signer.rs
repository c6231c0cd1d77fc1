//! Development signer.
//!
//! Derives a deterministic account from a seed URI (`//Alice` style).
//! This is a development-grade signing capability for local and test
//! networks; production deployments implement [`Signer`] over a real
//! keystore.

use inkops_deploy::Signer;
use sha2::{Digest, Sha256};

pub struct DevSigner {
    address: String,
    seed: Vec<u8>,
}

impl DevSigner {
    pub fn from_seed(seed: &str) -> Self {
        let digest = Sha256::digest(seed.as_bytes());
        // SS58-shaped development address, stable per seed.
        let address = format!("5{}", &hex::encode(digest)[..47]);
        Self {
            address,
            seed: seed.as_bytes().to_vec(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Signer for DevSigner {
    fn address(&self) -> &str {
        &self.address
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(&self.seed);
        hasher.update(payload);
        hasher.finalize().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_deterministic_per_seed() {
        let a = DevSigner::from_seed("//Alice");
        let b = DevSigner::from_seed("//Alice");
        let c = DevSigner::from_seed("//Bob");
        assert_eq!(a.address(), b.address());
        assert_ne!(a.address(), c.address());
        assert!(a.address().starts_with('5'));
        assert_eq!(a.address().len(), 48);
    }
}
