//! Acceptance checks for a single metadata document.
//!
//! Nothing here touches the cache or the network: the caller supplies the candidate bytes, the
//! keys the document must be signed by, the version floor and, when a parent document
//! references it, the expected length and hash.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use log::debug;

use crate::{
    canonical::FileMeta,
    envelope::SignedMetadata,
    error::Rejection,
    metadata::{Authority, Metadata},
};

/// Validates documents against a fixed point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    now: DateTime<Utc>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Validator {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn check_size(&self, raw: &[u8], limit: u64) -> Result<(), Rejection> {
        let actual = raw.len() as u64;
        if actual > limit {
            return Err(Rejection::TooLarge { limit, actual });
        }
        Ok(())
    }

    /// Checks raw bytes against the length and hash a parent document lists for them.
    pub fn check_file_meta(&self, raw: &[u8], expected: &FileMeta) -> Result<(), Rejection> {
        self.check_size(raw, expected.length)?;
        expected.check(raw)
    }

    /// Counts distinct keys of `authority` with a verifying signature.
    ///
    /// Signatures by keys outside the authority are ignored, and a key signing twice counts
    /// once.
    pub fn check_signatures<T>(
        &self,
        document: &SignedMetadata<T>,
        authority: &Authority,
    ) -> Result<(), Rejection> {
        let message = document
            .envelope
            .canonical_signed()
            .map_err(Rejection::malformed)?;

        let mut valid = BTreeSet::new();
        for signature in &document.envelope.signatures {
            if valid.contains(&signature.keyid) {
                continue;
            }
            let Some(key) = authority.keys.get(&signature.keyid) else {
                debug!("ignoring signature by unknown key {}", signature.keyid);
                continue;
            };
            match key.verify(&message, &signature.sig) {
                Ok(()) => {
                    valid.insert(signature.keyid.clone());
                }
                Err(e) => debug!("signature by {} does not verify: {e}", signature.keyid),
            }
        }

        if valid.len() < authority.threshold as usize {
            return Err(Rejection::ThresholdNotMet {
                valid: valid.len(),
                threshold: authority.threshold,
            });
        }
        Ok(())
    }

    pub fn check_expiry(&self, expires: DateTime<Utc>) -> Result<(), Rejection> {
        if expires < self.now {
            return Err(Rejection::Expired(expires));
        }
        Ok(())
    }

    pub fn check_rollback(&self, version: u64, floor: u64) -> Result<(), Rejection> {
        if version < floor {
            return Err(Rejection::Rollback {
                trusted: floor,
                received: version,
            });
        }
        Ok(())
    }

    /// Full acceptance of a candidate document.
    ///
    /// Order: size, parent length and hash, parse, parent version, signatures, rollback,
    /// expiry.
    pub fn accept<T: Metadata>(
        &self,
        raw: Vec<u8>,
        authority: &Authority,
        min_version: u64,
        expected: Option<&FileMeta>,
        size_limit: u64,
    ) -> Result<SignedMetadata<T>, Rejection> {
        self.check_size(&raw, size_limit)?;
        if let Some(expected) = expected {
            self.check_file_meta(&raw, expected)?;
        }

        let document = SignedMetadata::<T>::parse(raw)?;
        if let Some(expected_version) = expected.and_then(|meta| meta.version) {
            if document.version() != expected_version {
                return Err(Rejection::VersionMismatch {
                    expected: expected_version,
                    received: document.version(),
                });
            }
        }

        self.check_signatures(&document, authority)?;
        self.check_rollback(document.version(), min_version)?;
        self.check_expiry(document.signed.expires())?;

        debug!(
            "accepted {} version {}",
            T::TYPE,
            document.version()
        );
        Ok(document)
    }
}

#[cfg(all(test, feature = "signer-ed25519"))]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use chrono::Duration;

    use super::*;
    use crate::{
        envelope::sign_metadata,
        key::PublicKey,
        metadata::{DocumentType, Snapshot},
        signer::{Ed25519Signer, Signer},
    };

    const LIMIT: u64 = 1024 * 1024;

    fn snapshot(version: u64, expires_in: Duration) -> Snapshot {
        Snapshot {
            kind: DocumentType::Snapshot,
            version,
            expires: Utc::now() + expires_in,
            meta: BTreeMap::new(),
        }
    }

    fn authority(signers: &[Arc<dyn Signer>], threshold: u32) -> Authority {
        let keys: BTreeMap<String, PublicKey> = signers
            .iter()
            .map(|s| (s.public_key().key_id().unwrap(), s.public_key()))
            .collect();
        Authority { keys, threshold }
    }

    fn signers(n: usize) -> Vec<Arc<dyn Signer>> {
        (0..n)
            .map(|_| Arc::new(Ed25519Signer::create().unwrap()) as Arc<dyn Signer>)
            .collect()
    }

    #[tokio::test]
    async fn accepts_threshold_of_distinct_keys() {
        let _ = env_logger::builder().is_test(true).try_init();
        let keys = signers(2);
        let signed = sign_metadata(&snapshot(2, Duration::days(1)), &keys)
            .await
            .unwrap();

        let validator = Validator::default();
        let accepted = validator
            .accept::<Snapshot>(signed.raw.clone(), &authority(&keys, 2), 1, None, LIMIT)
            .unwrap();
        assert_eq!(accepted.version(), 2);

        let outsider = signers(1);
        assert_eq!(
            validator
                .accept::<Snapshot>(signed.raw, &authority(&outsider, 1), 1, None, LIMIT)
                .unwrap_err(),
            Rejection::ThresholdNotMet {
                valid: 0,
                threshold: 1
            }
        );
    }

    #[tokio::test]
    async fn duplicate_signatures_count_once() {
        let keys = signers(2);
        let one = vec![keys[0].clone(), keys[0].clone()];
        let signed = sign_metadata(&snapshot(1, Duration::days(1)), &one)
            .await
            .unwrap();
        assert_eq!(signed.envelope.signatures.len(), 2);

        let result = Validator::default().check_signatures(&signed, &authority(&keys, 2));
        assert_eq!(
            result,
            Err(Rejection::ThresholdNotMet {
                valid: 1,
                threshold: 2
            })
        );
    }

    #[tokio::test]
    async fn tampered_signature_is_not_counted() {
        let keys = signers(1);
        let mut signed = sign_metadata(&snapshot(1, Duration::days(1)), &keys)
            .await
            .unwrap();
        signed.envelope.signatures[0].sig[0] ^= 0xff;

        assert!(matches!(
            Validator::default().check_signatures(&signed, &authority(&keys, 1)),
            Err(Rejection::ThresholdNotMet { valid: 0, .. })
        ));
    }

    #[tokio::test]
    async fn rejects_rollback_and_expiry() {
        let keys = signers(1);
        let validator = Validator::default();

        let old = sign_metadata(&snapshot(3, Duration::days(1)), &keys)
            .await
            .unwrap();
        assert_eq!(
            validator
                .accept::<Snapshot>(old.raw, &authority(&keys, 1), 4, None, LIMIT)
                .unwrap_err(),
            Rejection::Rollback {
                trusted: 4,
                received: 3
            }
        );

        let expired = sign_metadata(&snapshot(5, -Duration::days(1)), &keys)
            .await
            .unwrap();
        assert!(matches!(
            validator.accept::<Snapshot>(expired.raw, &authority(&keys, 1), 4, None, LIMIT),
            Err(Rejection::Expired(_))
        ));
    }

    #[tokio::test]
    async fn checks_parent_file_meta() {
        let keys = signers(1);
        let validator = Validator::default();
        let signed = sign_metadata(&snapshot(7, Duration::days(1)), &keys)
            .await
            .unwrap();

        let good = FileMeta::from_bytes(&signed.raw, Some(7));
        validator
            .accept::<Snapshot>(signed.raw.clone(), &authority(&keys, 1), 1, Some(&good), LIMIT)
            .unwrap();

        let wrong_version = FileMeta::from_bytes(&signed.raw, Some(8));
        assert_eq!(
            validator
                .accept::<Snapshot>(
                    signed.raw.clone(),
                    &authority(&keys, 1),
                    1,
                    Some(&wrong_version),
                    LIMIT
                )
                .unwrap_err(),
            Rejection::VersionMismatch {
                expected: 8,
                received: 7
            }
        );

        let shorter = FileMeta {
            length: 10,
            ..good.clone()
        };
        assert!(matches!(
            validator.accept::<Snapshot>(
                signed.raw.clone(),
                &authority(&keys, 1),
                1,
                Some(&shorter),
                LIMIT
            ),
            Err(Rejection::TooLarge { limit: 10, .. })
        ));

        assert!(matches!(
            validator.accept::<Snapshot>(signed.raw, &authority(&keys, 1), 1, None, 16),
            Err(Rejection::TooLarge { limit: 16, .. })
        ));
    }
}
