//! Typed metadata documents.
//!
//! Every document is carried inside a signed envelope (see [`crate::envelope`]) and is tagged
//! with a `_type` field naming its kind.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    canonical::FileMeta,
    error::Rejection,
    key::{KeyId, PublicKey},
    role::RoleName,
};

/// Value of the `_type` field of a signed document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum DocumentType {
    Root,
    Timestamp,
    Snapshot,
    Targets,
}

/// Common behaviour of all signed documents.
pub trait Metadata: Serialize + DeserializeOwned {
    const TYPE: DocumentType;

    fn version(&self) -> u64;

    fn expires(&self) -> DateTime<Utc>;

    /// Structural checks beyond what deserialization enforces.
    fn check_structure(&self) -> Result<(), Rejection> {
        Ok(())
    }
}

/// Key ids and signing threshold for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKeys {
    pub keyids: Vec<KeyId>,
    pub threshold: u32,
}

/// Resolved key set a document's signatures are counted against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    pub keys: BTreeMap<KeyId, PublicKey>,
    pub threshold: u32,
}

impl Authority {
    fn resolve(
        keys: &BTreeMap<KeyId, PublicKey>,
        role_keys: &RoleKeys,
    ) -> Result<Self, Rejection> {
        if role_keys.threshold == 0 {
            return Err(Rejection::Malformed(
                "signing threshold must be at least 1".to_owned(),
            ));
        }

        let keys = role_keys
            .keyids
            .iter()
            .filter_map(|id| keys.get(id).map(|key| (id.clone(), key.clone())))
            .collect();

        Ok(Self {
            keys,
            threshold: role_keys.threshold,
        })
    }
}

pub(crate) fn check_key_ids(keys: &BTreeMap<KeyId, PublicKey>) -> Result<(), Rejection> {
    for (id, key) in keys {
        let computed = key.key_id().map_err(Rejection::malformed)?;
        if &computed != id {
            return Err(Rejection::Malformed(format!(
                "key listed as {id} hashes to {computed}"
            )));
        }
    }
    Ok(())
}

/// Root of trust: the keys and thresholds of every top-level role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Root {
    #[serde(rename = "_type")]
    pub kind: DocumentType,
    pub version: u64,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub consistent_snapshot: bool,
    pub keys: BTreeMap<KeyId, PublicKey>,
    pub roles: BTreeMap<String, RoleKeys>,
}

impl Root {
    /// Keys and threshold the root assigns to a top-level role.
    pub fn authority(&self, role: &RoleName) -> Result<Authority, Rejection> {
        if role.is_delegation() {
            return Err(Rejection::UnknownRole(role.to_string()));
        }
        let role_keys = self
            .roles
            .get(role.as_str())
            .ok_or_else(|| Rejection::UnknownRole(role.to_string()))?;
        Authority::resolve(&self.keys, role_keys)
    }
}

impl Metadata for Root {
    const TYPE: DocumentType = DocumentType::Root;

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn check_structure(&self) -> Result<(), Rejection> {
        check_version(self.version)?;
        check_key_ids(&self.keys)?;
        for role in RoleName::TOP_LEVEL {
            if !self.roles.contains_key(role.as_str()) {
                return Err(Rejection::UnknownRole(role.to_string()));
            }
        }
        Ok(())
    }
}

/// Points at the current snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamp {
    #[serde(rename = "_type")]
    pub kind: DocumentType,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, FileMeta>,
}

impl Timestamp {
    pub fn snapshot_meta(&self) -> Option<&FileMeta> {
        self.meta.get(RoleName::Snapshot.as_str())
    }
}

impl Metadata for Timestamp {
    const TYPE: DocumentType = DocumentType::Timestamp;

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn check_structure(&self) -> Result<(), Rejection> {
        check_version(self.version)
    }
}

/// Lists the expected document of every role other than timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "_type")]
    pub kind: DocumentType,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, FileMeta>,
}

impl Snapshot {
    pub fn role_meta(&self, role: &RoleName) -> Option<&FileMeta> {
        self.meta.get(role.as_str())
    }
}

impl Metadata for Snapshot {
    const TYPE: DocumentType = DocumentType::Snapshot;

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn check_structure(&self) -> Result<(), Rejection> {
        check_version(self.version)
    }
}

/// Artifacts and delegations of a targets role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Targets {
    #[serde(rename = "_type")]
    pub kind: DocumentType,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub targets: BTreeMap<String, FileMeta>,
    #[serde(default, skip_serializing_if = "Delegations::is_empty")]
    pub delegations: Delegations,
}

impl Metadata for Targets {
    const TYPE: DocumentType = DocumentType::Targets;

    fn version(&self) -> u64 {
        self.version
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn check_structure(&self) -> Result<(), Rejection> {
        check_version(self.version)?;
        check_key_ids(&self.delegations.keys)
    }
}

/// Sub-namespaces a targets role hands to other keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegations {
    pub keys: BTreeMap<KeyId, PublicKey>,
    pub roles: Vec<DelegatedRole>,
}

impl Delegations {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.roles.is_empty()
    }

    pub fn authority(&self, role: &DelegatedRole) -> Result<Authority, Rejection> {
        Authority::resolve(
            &self.keys,
            &RoleKeys {
                keyids: role.keyids.clone(),
                threshold: role.threshold,
            },
        )
    }
}

/// One delegation entry.
///
/// `paths` are target name prefixes the delegated role may sign for; an empty list delegates
/// nothing and `""` delegates everything the parent may sign for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedRole {
    pub name: String,
    pub keyids: Vec<KeyId>,
    pub threshold: u32,
    #[serde(default)]
    pub paths: Vec<String>,
}

impl DelegatedRole {
    pub fn matches(&self, target: &str) -> bool {
        self.paths.iter().any(|p| target.starts_with(p.as_str()))
    }
}

fn check_version(version: u64) -> Result<(), Rejection> {
    if version == 0 {
        return Err(Rejection::Malformed("version must be at least 1".to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::key::KeyType;

    fn root_with(keys: BTreeMap<KeyId, PublicKey>, threshold: u32) -> Root {
        let ids: Vec<KeyId> = keys.keys().cloned().collect();
        let roles = RoleName::TOP_LEVEL
            .iter()
            .map(|r| {
                (
                    r.to_string(),
                    RoleKeys {
                        keyids: ids.clone(),
                        threshold,
                    },
                )
            })
            .collect();
        Root {
            kind: DocumentType::Root,
            version: 1,
            expires: Utc::now() + Duration::days(1),
            consistent_snapshot: false,
            keys,
            roles,
        }
    }

    #[test]
    fn root_authority_only_includes_listed_keys() {
        let a = PublicKey::new(KeyType::ED25519, &[1u8; 32]);
        let b = PublicKey::new(KeyType::ED25519, &[2u8; 32]);
        let mut keys = BTreeMap::new();
        keys.insert(a.key_id().unwrap(), a.clone());
        keys.insert(b.key_id().unwrap(), b);

        let mut root = root_with(keys, 1);
        root.roles.get_mut("timestamp").unwrap().keyids = vec![a.key_id().unwrap()];
        root.check_structure().unwrap();

        let authority = root.authority(&RoleName::Timestamp).unwrap();
        assert_eq!(authority.keys.len(), 1);
        assert!(authority.keys.contains_key(&a.key_id().unwrap()));
        assert_eq!(root.authority(&RoleName::Root).unwrap().keys.len(), 2);
        assert!(root
            .authority(&RoleName::Delegated("targets/a".into()))
            .is_err());
    }

    #[test]
    fn root_structure_checks() {
        let a = PublicKey::new(KeyType::ED25519, &[1u8; 32]);
        let mut keys = BTreeMap::new();
        keys.insert("not-the-id".to_owned(), a);
        assert!(matches!(
            root_with(keys.clone(), 1).check_structure(),
            Err(Rejection::Malformed(_))
        ));

        let mut root = root_with(BTreeMap::new(), 1);
        root.roles.remove("snapshot");
        assert_eq!(
            root.check_structure(),
            Err(Rejection::UnknownRole("snapshot".to_owned()))
        );

        let root = root_with(BTreeMap::new(), 0);
        assert!(root.authority(&RoleName::Root).is_err());
    }

    #[test]
    fn delegated_role_path_matching() {
        let role = DelegatedRole {
            name: "targets/a".to_owned(),
            keyids: vec![],
            threshold: 1,
            paths: vec!["releases/".to_owned(), "docs".to_owned()],
        };
        assert!(role.matches("releases/1.0"));
        assert!(role.matches("docs/index"));
        assert!(!role.matches("other"));

        let nothing = DelegatedRole {
            paths: vec![],
            ..role
        };
        assert!(!nothing.matches("releases/1.0"));
    }

    #[test]
    fn document_type_round_trips_through_json() {
        let json = r#"{"_type":"Snapshot","version":3,"expires":"2030-01-01T00:00:00Z","meta":{}}"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.kind, DocumentType::Snapshot);
        assert_eq!(snapshot.version(), 3);
    }
}
