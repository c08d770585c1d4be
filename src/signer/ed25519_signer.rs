use anyhow::{anyhow, Result};
use async_trait::async_trait;
use did_key::{CoreSign, Ed25519KeyPair, Generate, KeyMaterial};

use crate::{
    key::{KeyType, PublicKey},
    signer::Signer,
};

/// Represents a signer that uses an Ed25519 key pair for signing.
#[derive(Debug, PartialEq, Clone)]
pub struct Ed25519Signer {
    secret_key: Vec<u8>,
    /// Public key derived from the secret key
    pub public_key: PublicKey,
}

impl Ed25519Signer {
    /// Creates a new Ed25519Signer instance with a randomly generated key pair.
    pub fn create() -> Result<Self> {
        let key_pair = Ed25519KeyPair::new();
        let signer = Ed25519Signer {
            secret_key: key_pair.private_key_bytes(),
            public_key: PublicKey::new(KeyType::ED25519, &key_pair.public_key_bytes()),
        };
        Ok(signer)
    }

    /// Imports an Ed25519Signer instance from a given secret key.
    ///
    /// # Arguments
    ///
    /// * `secret_key` - The 32-byte secret key to import.
    pub fn import(secret_key: &[u8]) -> Result<Self> {
        if secret_key.len() != 32 {
            return Err(anyhow!(
                "Ed25519 secret key must be 32 bytes, got {}",
                secret_key.len()
            ));
        }
        let key_pair = Ed25519KeyPair::from_secret_key(secret_key);
        let signer = Ed25519Signer {
            secret_key: secret_key.to_vec(),
            public_key: PublicKey::new(KeyType::ED25519, &key_pair.public_key_bytes()),
        };
        Ok(signer)
    }
}

#[async_trait]
impl Signer for Ed25519Signer {
    async fn sign(&self, data: &[u8]) -> Result<[u8; 64]> {
        log::trace!("Signing data with Ed25519 key");
        let keypair = Ed25519KeyPair::from_secret_key(&self.secret_key);
        let sig = keypair.sign(data);
        let sig_array = sig
            .try_into()
            .map_err(|_| anyhow!("Signature must be 64 bytes"))?;
        Ok(sig_array)
    }

    fn public_key(&self) -> PublicKey {
        self.public_key.clone()
    }
}
