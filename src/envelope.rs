use std::{convert::TryFrom, sync::Arc};

use anyhow::{bail, Result};
use base64::engine::{general_purpose::STANDARD as BASE64, Engine};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    canonical::canonical_json,
    error::Rejection,
    key::KeyId,
    metadata::Metadata,
    signer::Signer,
};

/// Signed metadata envelope.
///
/// Signatures cover the canonical JSON form of `signed`, so the envelope keeps `signed` as an
/// untyped value: re-encoding a typed document would drop fields this client does not know.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// The signed document
    pub signed: Value,
    /// Signatures over the canonical form of `signed`
    pub signatures: Vec<Signature>,
}

/// Signature over an envelope's canonical `signed` bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// Id of the key that made the signature
    pub keyid: KeyId,
    /// Signature scheme, informational
    pub method: String,
    /// Raw signature bytes
    pub sig: Vec<u8>,
}

impl Envelope {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let envelope: models::Envelope = serde_json::from_slice(bytes)?;
        Self::try_from(envelope)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let envelope = models::Envelope::from(self.clone());
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Bytes signatures are computed over.
    pub fn canonical_signed(&self) -> Result<Vec<u8>> {
        canonical_json(&self.signed)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.signed.clone())?)
    }
}

/// A parsed document together with its envelope and the exact bytes it was read from.
///
/// The raw bytes are what gets hashed and persisted, never a re-encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedMetadata<T> {
    pub envelope: Envelope,
    pub signed: T,
    pub raw: Vec<u8>,
}

impl<T: Metadata> SignedMetadata<T> {
    /// Parses `raw` as an envelope holding a `T`. Does not check signatures.
    pub fn parse(raw: Vec<u8>) -> Result<Self, Rejection> {
        let envelope = Envelope::from_slice(&raw).map_err(Rejection::malformed)?;

        let found = envelope
            .signed
            .get("_type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if found != T::TYPE.to_string() {
            return Err(Rejection::WrongType {
                expected: T::TYPE,
                found: found.to_owned(),
            });
        }

        let signed: T = envelope.decode().map_err(Rejection::malformed)?;
        signed.check_structure()?;

        Ok(Self {
            envelope,
            signed,
            raw,
        })
    }

    pub fn version(&self) -> u64 {
        self.signed.version()
    }
}

/// Signs a document with every signer and serializes the envelope.
pub async fn sign_metadata<T: Metadata>(
    document: &T,
    signers: &[Arc<dyn Signer>],
) -> Result<SignedMetadata<T>> {
    let envelope = sign_envelope(serde_json::to_value(document)?, signers).await?;
    let raw = envelope.to_vec()?;
    let signed = envelope.decode()?;

    Ok(SignedMetadata {
        envelope,
        signed,
        raw,
    })
}

/// Signs an untyped `signed` value with every signer.
pub async fn sign_envelope(signed: Value, signers: &[Arc<dyn Signer>]) -> Result<Envelope> {
    if signers.is_empty() {
        bail!("At least one signer must be provided.");
    }

    let message = canonical_json(&signed)?;

    let mut signatures = Vec::with_capacity(signers.len());
    for signer in signers {
        let public_key = signer.public_key();
        let sig = signer.sign(&message).await?.to_vec();
        signatures.push(Signature {
            keyid: public_key.key_id()?,
            method: public_key.keytype.to_string(),
            sig,
        });
    }

    Ok(Envelope { signed, signatures })
}

/// Wire representation of an envelope.
pub mod models {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Envelope {
        pub signed: Value,
        pub signatures: Vec<Signature>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Signature {
        pub keyid: String,
        #[serde(default)]
        pub method: String,
        /// Base64 encoded signature bytes
        pub sig: String,
    }
}

impl TryFrom<models::Envelope> for Envelope {
    type Error = anyhow::Error;

    fn try_from(envelope: models::Envelope) -> Result<Self> {
        let models::Envelope { signed, signatures } = envelope;

        let signatures = signatures
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { signed, signatures })
    }
}

impl From<Envelope> for models::Envelope {
    fn from(envelope: Envelope) -> Self {
        let Envelope { signed, signatures } = envelope;

        let signatures = signatures.into_iter().map(Into::into).collect();

        Self { signed, signatures }
    }
}

impl TryFrom<models::Signature> for Signature {
    type Error = anyhow::Error;

    fn try_from(signature: models::Signature) -> Result<Self> {
        let models::Signature { keyid, method, sig } = signature;

        let sig = BASE64.decode(sig)?;

        Ok(Self { keyid, method, sig })
    }
}

impl From<Signature> for models::Signature {
    fn from(signature: Signature) -> Self {
        let Signature { keyid, method, sig } = signature;

        let sig = BASE64.encode(sig);

        Self { keyid, method, sig }
    }
}

#[cfg(all(test, feature = "signer-ed25519"))]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::{
        metadata::{DocumentType, Snapshot, Timestamp},
        signer::Ed25519Signer,
    };

    fn snapshot() -> Snapshot {
        Snapshot {
            kind: DocumentType::Snapshot,
            version: 4,
            expires: Utc::now() + Duration::days(1),
            meta: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn signed_metadata_parses_back() {
        let signer: Arc<dyn Signer> = Arc::new(Ed25519Signer::create().unwrap());
        let signed = sign_metadata(&snapshot(), &[signer.clone()]).await.unwrap();

        let parsed = SignedMetadata::<Snapshot>::parse(signed.raw.clone()).unwrap();
        assert_eq!(parsed.signed, signed.signed);
        assert_eq!(parsed.raw, signed.raw);
        assert_eq!(parsed.envelope.signatures.len(), 1);
        assert_eq!(
            parsed.envelope.signatures[0].keyid,
            signer.public_key().key_id().unwrap()
        );

        let message = parsed.envelope.canonical_signed().unwrap();
        signer
            .public_key()
            .verify(&message, &parsed.envelope.signatures[0].sig)
            .unwrap();
    }

    #[tokio::test]
    async fn parse_rejects_wrong_type_and_garbage() {
        let signer: Arc<dyn Signer> = Arc::new(Ed25519Signer::create().unwrap());
        let signed = sign_metadata(&snapshot(), &[signer]).await.unwrap();

        assert!(matches!(
            SignedMetadata::<Timestamp>::parse(signed.raw),
            Err(Rejection::WrongType {
                expected: DocumentType::Timestamp,
                ..
            })
        ));
        assert!(matches!(
            SignedMetadata::<Snapshot>::parse(b"{\"signed\": ".to_vec()),
            Err(Rejection::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn sign_requires_a_signer() {
        assert!(sign_metadata(&snapshot(), &[]).await.is_err());
    }
}
