use anyhow::{anyhow, Result};
use async_trait::async_trait;
use did_key::{CoreSign, Generate, KeyMaterial, P256KeyPair};

use crate::{
    key::{KeyType, PublicKey},
    signer::Signer,
};

/// Signer implementation using P-256 (secp256r1) elliptic curve.
#[derive(Debug, PartialEq, Clone)]
pub struct P256Signer {
    secret_key: Vec<u8>,
    /// SEC1 encoded public key derived from the secret key
    pub public_key: PublicKey,
}

impl P256Signer {
    /// Creates a new P256Signer instance with a randomly generated key pair.
    pub fn create() -> Result<Self> {
        let key_pair = P256KeyPair::new();
        let signer = P256Signer {
            secret_key: key_pair.private_key_bytes(),
            public_key: sec1_public_key(key_pair.public_key_bytes()),
        };
        Ok(signer)
    }

    /// Imports a P256Signer instance from a given secret key.
    ///
    /// # Arguments
    ///
    /// * `secret_key` - The secret key bytes to import.
    pub fn import(secret_key: &[u8]) -> Result<Self> {
        let key_pair = P256KeyPair::from_secret_key(secret_key);
        let signer = P256Signer {
            secret_key: secret_key.to_vec(),
            public_key: sec1_public_key(key_pair.public_key_bytes()),
        };
        Ok(signer)
    }
}

// bare x || y coordinates get the uncompressed SEC1 tag
fn sec1_public_key(mut bytes: Vec<u8>) -> PublicKey {
    if bytes.len() == 64 {
        bytes.insert(0, 0x04);
    }
    PublicKey::new(KeyType::ECDSA, &bytes)
}

#[async_trait]
impl Signer for P256Signer {
    async fn sign(&self, data: &[u8]) -> Result<[u8; 64]> {
        log::trace!("Signing data with P256 key");
        let keypair = P256KeyPair::from_secret_key(&self.secret_key);
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
