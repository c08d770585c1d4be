use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    envelope::SignedMetadata,
    error::Rejection,
    key::{KeyId, PublicKey},
    metadata::{check_key_ids, Authority, Metadata, Root},
    role::RoleName,
};

/// Cache entry holding the pinned root keys, stored next to but apart from `root`.
pub(crate) const PINNED_ROOT: &str = "pinned_root";

/// Root keys and threshold of the last root this client accepted.
///
/// When the cached root is lost or unreadable, a remote root is only trusted if it meets this
/// threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PinnedRoot {
    pub version: u64,
    pub threshold: u32,
    pub keys: BTreeMap<KeyId, PublicKey>,
}

impl PinnedRoot {
    pub fn of(root: &SignedMetadata<Root>) -> Result<Self, Rejection> {
        let Authority { keys, threshold } = root.signed.authority(&RoleName::Root)?;
        Ok(Self {
            version: root.version(),
            threshold,
            keys,
        })
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, Rejection> {
        let pinned: Self = serde_json::from_slice(raw).map_err(Rejection::malformed)?;
        if pinned.threshold == 0 || pinned.keys.is_empty() {
            return Err(Rejection::Malformed(
                "pinned root keys need a threshold and at least one key".to_owned(),
            ));
        }
        check_key_ids(&pinned.keys)?;
        Ok(pinned)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn authority(&self) -> Authority {
        Authority {
            keys: self.keys.clone(),
            threshold: self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyType;

    fn pinned(threshold: u32) -> PinnedRoot {
        let key = PublicKey::new(KeyType::ED25519, &[9u8; 32]);
        PinnedRoot {
            version: 4,
            threshold,
            keys: BTreeMap::from([(key.key_id().unwrap(), key)]),
        }
    }

    #[test]
    fn reads_back_what_it_writes() {
        let raw = pinned(1).to_vec().unwrap();
        let read = PinnedRoot::from_slice(&raw).unwrap();
        assert_eq!(read, pinned(1));
        assert_eq!(read.authority().threshold, 1);
    }

    #[test]
    fn rejects_unusable_pins() {
        let zero = pinned(0).to_vec().unwrap();
        assert!(PinnedRoot::from_slice(&zero).is_err());

        let mut mislabelled = pinned(1);
        let key = mislabelled.keys.pop_first().unwrap().1;
        mislabelled.keys.insert("00".repeat(32), key);
        assert!(PinnedRoot::from_slice(&mislabelled.to_vec().unwrap()).is_err());

        assert!(PinnedRoot::from_slice(b"{\"version\":1}").is_err());
    }
}
