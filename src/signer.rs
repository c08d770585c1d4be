/// Ed25519 elliptic curve signer
#[cfg(feature = "signer-ed25519")]
pub mod ed25519_signer;
/// P-256 (secp256r1) elliptic curve signer
#[cfg(feature = "signer-p256")]
pub mod p256_signer;

use anyhow::Result;
use async_trait::async_trait;
#[cfg(feature = "signer-ed25519")]
pub use ed25519_signer::*;
#[cfg(feature = "signer-p256")]
pub use p256_signer::*;

use crate::key::PublicKey;

/// Trait for signing metadata documents.
///
/// Used by publishers and test fixtures; the update path only ever verifies.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Signs the provided data and returns a 64-byte signature.
    ///
    /// # Arguments
    ///
    /// * `data` - The data to sign.
    ///
    /// # Returns
    ///
    /// A 64-byte signature array.
    async fn sign(&self, data: &[u8]) -> Result<[u8; 64]>;

    /// Returns the public key that verifies this signer's signatures.
    fn public_key(&self) -> PublicKey;
}
