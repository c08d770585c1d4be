use std::collections::BTreeMap;

use crate::{
    canonical::FileMeta,
    envelope::SignedMetadata,
    metadata::{Root, Snapshot, Targets, Timestamp},
    role::RoleName,
};

/// The set of documents accepted by an update.
#[derive(Debug, Clone)]
pub struct TrustedMetadata {
    pub root: SignedMetadata<Root>,
    pub timestamp: SignedMetadata<Timestamp>,
    pub snapshot: SignedMetadata<Snapshot>,
    /// `targets` and every delegated role that was reachable and valid
    pub targets: BTreeMap<RoleName, SignedMetadata<Targets>>,
}

/// A target together with the role that lists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMatch<'a> {
    pub role: &'a RoleName,
    pub meta: &'a FileMeta,
}

impl TrustedMetadata {
    /// Looks up a target by name.
    ///
    /// Roles are searched depth first starting at `targets`, delegations in the order their
    /// parent lists them, skipping delegations whose paths do not cover `name`. The first role
    /// listing the target wins.
    pub fn find_target(&self, name: &str) -> Option<TargetMatch<'_>> {
        self.search(&RoleName::Targets, name)
    }

    fn search<'a>(&'a self, role: &RoleName, name: &str) -> Option<TargetMatch<'a>> {
        let (role, document) = self.targets.get_key_value(role)?;
        if let Some(meta) = document.signed.targets.get(name) {
            return Some(TargetMatch { role, meta });
        }

        document
            .signed
            .delegations
            .roles
            .iter()
            .filter(|delegation| delegation.matches(name))
            .filter_map(|delegation| delegation.name.parse::<RoleName>().ok())
            .find_map(|child| self.search(&child, name))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::Value;

    use super::*;
    use crate::{
        envelope::Envelope,
        metadata::{DelegatedRole, Delegations, DocumentType, Metadata},
    };

    fn wrap<T: Metadata>(signed: T) -> SignedMetadata<T> {
        SignedMetadata {
            envelope: Envelope {
                signed: Value::Null,
                signatures: vec![],
            },
            signed,
            raw: vec![],
        }
    }

    fn targets(entries: &[&str], delegations: &[(&str, &str)]) -> SignedMetadata<Targets> {
        wrap(Targets {
            kind: DocumentType::Targets,
            version: 1,
            expires: Utc::now() + Duration::days(1),
            targets: entries
                .iter()
                .map(|name| (name.to_string(), FileMeta::from_bytes(name.as_bytes(), None)))
                .collect(),
            delegations: Delegations {
                keys: BTreeMap::new(),
                roles: delegations
                    .iter()
                    .map(|(name, path)| DelegatedRole {
                        name: name.to_string(),
                        keyids: vec![],
                        threshold: 1,
                        paths: vec![path.to_string()],
                    })
                    .collect(),
            },
        })
    }

    fn trusted(roles: Vec<(&str, SignedMetadata<Targets>)>) -> TrustedMetadata {
        let expires = Utc::now() + Duration::days(1);
        TrustedMetadata {
            root: wrap(Root {
                kind: DocumentType::Root,
                version: 1,
                expires,
                consistent_snapshot: false,
                keys: BTreeMap::new(),
                roles: BTreeMap::new(),
            }),
            timestamp: wrap(Timestamp {
                kind: DocumentType::Timestamp,
                version: 1,
                expires,
                meta: BTreeMap::new(),
            }),
            snapshot: wrap(Snapshot {
                kind: DocumentType::Snapshot,
                version: 1,
                expires,
                meta: BTreeMap::new(),
            }),
            targets: roles
                .into_iter()
                .map(|(name, doc)| (name.parse().unwrap(), doc))
                .collect(),
        }
    }

    #[test]
    fn top_level_targets_win() {
        let metadata = trusted(vec![
            ("targets", targets(&["app"], &[("targets/a", "")])),
            ("targets/a", targets(&["app", "lib"], &[])),
        ]);

        let found = metadata.find_target("app").unwrap();
        assert_eq!(found.role, &RoleName::Targets);

        let found = metadata.find_target("lib").unwrap();
        assert_eq!(found.role.as_str(), "targets/a");
        assert_eq!(found.meta, &FileMeta::from_bytes(b"lib", None));
    }

    #[test]
    fn walks_delegations_in_order_and_respects_paths() {
        let metadata = trusted(vec![
            (
                "targets",
                targets(
                    &[],
                    &[
                        ("targets/docs", "docs/"),
                        ("targets/a", ""),
                        ("targets/b", ""),
                    ],
                ),
            ),
            ("targets/docs", targets(&[], &[])),
            ("targets/a", targets(&[], &[("targets/a/deep", "releases/")])),
            ("targets/a/deep", targets(&["releases/1.0"], &[])),
            ("targets/b", targets(&["releases/1.0", "docs/readme"], &[])),
        ]);

        assert_eq!(
            metadata.find_target("releases/1.0").unwrap().role.as_str(),
            "targets/a/deep"
        );
        // targets/docs covers the path but does not list the target
        assert_eq!(
            metadata.find_target("docs/readme").unwrap().role.as_str(),
            "targets/b"
        );
        assert!(metadata.find_target("missing").is_none());
    }

    #[test]
    fn unloaded_delegations_are_skipped() {
        let metadata = trusted(vec![(
            "targets",
            targets(&[], &[("targets/a", "")]),
        )]);
        assert!(metadata.find_target("anything").is_none());
    }
}
