use anyhow::{anyhow, Result};
use base64::engine::{general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_json, sha256_hex};

/// Hex encoded sha256 of a key's canonical JSON form.
pub type KeyId = String;

/// Supported public key algorithms.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Debug,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
)]
pub enum KeyType {
    /// Ed25519 (EdDSA)
    #[serde(rename = "ed25519")]
    #[strum(serialize = "ed25519")]
    ED25519,
    /// ECDSA over secp256r1/P-256 with SHA-256
    #[serde(rename = "ecdsa")]
    #[strum(serialize = "ecdsa")]
    ECDSA,
}

/// Public portion of a key as it appears in root and delegation documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub keytype: KeyType,
    pub keyval: KeyValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Base64 encoded public key bytes (raw for ed25519, SEC1 for ecdsa)
    pub public: String,
}

impl PublicKey {
    pub fn new(keytype: KeyType, public: &[u8]) -> Self {
        Self {
            keytype,
            keyval: KeyValue {
                public: BASE64.encode(public),
            },
        }
    }

    /// Computes the key id: sha256 over the canonical JSON of this key.
    pub fn key_id(&self) -> Result<KeyId> {
        let canonical = canonical_json(self)?;
        Ok(sha256_hex(&canonical))
    }

    pub fn public_bytes(&self) -> Result<Vec<u8>> {
        Ok(BASE64.decode(&self.keyval.public)?)
    }

    /// Verifies `signature` over `message`.
    ///
    /// Malformed key material or signatures are reported as errors, never panics.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let public = self.public_bytes()?;
        match self.keytype {
            KeyType::ED25519 => verify_ed25519(&public, message, signature),
            KeyType::ECDSA => verify_p256(&public, message, signature),
        }
    }
}

fn verify_ed25519(public: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    let public: [u8; 32] = public
        .try_into()
        .map_err(|_| anyhow!("ed25519 public key must be 32 bytes, got {}", public.len()))?;
    let key = VerifyingKey::from_bytes(&public)?;
    let signature = Signature::from_slice(signature)?;
    key.verify(message, &signature)?;
    Ok(())
}

fn verify_p256(public: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};

    let key = VerifyingKey::from_sec1_bytes(public)?;
    let signature = Signature::from_slice(signature)?;
    key.verify(message, &signature)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_id_is_stable_and_distinct() {
        let a = PublicKey::new(KeyType::ED25519, &[1u8; 32]);
        let b = PublicKey::new(KeyType::ED25519, &[2u8; 32]);
        let a_ecdsa = PublicKey::new(KeyType::ECDSA, &[1u8; 32]);

        assert_eq!(a.key_id().unwrap(), a.clone().key_id().unwrap());
        assert_ne!(a.key_id().unwrap(), b.key_id().unwrap());
        assert_ne!(a.key_id().unwrap(), a_ecdsa.key_id().unwrap());
        assert_eq!(a.key_id().unwrap().len(), 64);
    }

    #[test]
    fn key_type_names() {
        assert_eq!(KeyType::ED25519.to_string(), "ed25519");
        assert_eq!("ecdsa".parse::<KeyType>().unwrap(), KeyType::ECDSA);
        let json = serde_json::to_string(&PublicKey::new(KeyType::ECDSA, b"k")).unwrap();
        assert_eq!(json, r#"{"keytype":"ecdsa","keyval":{"public":"aw=="}}"#);
    }

    #[test]
    fn garbage_key_material_is_an_error() {
        let short = PublicKey::new(KeyType::ED25519, &[7u8; 5]);
        assert!(short.verify(b"msg", &[0u8; 64]).is_err());

        let not_a_point = PublicKey::new(KeyType::ECDSA, &[4u8; 65]);
        assert!(not_a_point.verify(b"msg", &[0u8; 64]).is_err());

        let bad_base64 = PublicKey {
            keytype: KeyType::ED25519,
            keyval: KeyValue {
                public: "not base64!".to_owned(),
            },
        };
        assert!(bad_base64.verify(b"msg", &[0u8; 64]).is_err());
    }
}
