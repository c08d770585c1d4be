use std::{fmt, str::FromStr};

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Name of a metadata role.
///
/// The four top-level roles are fixed. Delegated targets roles are named by their path below
/// `targets`, e.g. `targets/releases` or `targets/releases/stable`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleName {
    /// Root of trust, declares keys for every top-level role
    Root,
    /// Frequently re-signed pointer to the current snapshot
    Timestamp,
    /// Versions and hashes of every other role's document
    Snapshot,
    /// Top-level targets
    Targets,
    /// Targets role reached through a delegation
    Delegated(String),
}

impl RoleName {
    /// Top-level roles in update order.
    pub const TOP_LEVEL: [RoleName; 4] = [
        RoleName::Root,
        RoleName::Timestamp,
        RoleName::Snapshot,
        RoleName::Targets,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            RoleName::Root => "root",
            RoleName::Timestamp => "timestamp",
            RoleName::Snapshot => "snapshot",
            RoleName::Targets => "targets",
            RoleName::Delegated(name) => name,
        }
    }

    pub fn is_delegation(&self) -> bool {
        matches!(self, RoleName::Delegated(_))
    }

    /// True for `targets` and every delegated role.
    pub fn is_targets(&self) -> bool {
        matches!(self, RoleName::Targets | RoleName::Delegated(_))
    }

    /// Returns true if `self` is a direct delegation of `parent`.
    ///
    /// `targets/a` is a child of `targets`, `targets/a/b` is a child of `targets/a` but not of
    /// `targets`.
    pub fn is_child_of(&self, parent: &RoleName) -> bool {
        if !parent.is_targets() {
            return false;
        }
        match self {
            RoleName::Delegated(name) => name
                .strip_prefix(parent.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .map(|rest| !rest.is_empty() && !rest.contains('/'))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Name under which root version `version` is published.
    pub fn versioned_root(version: u64) -> String {
        format!("{version}.root")
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "root" => Ok(RoleName::Root),
            "timestamp" => Ok(RoleName::Timestamp),
            "snapshot" => Ok(RoleName::Snapshot),
            "targets" => Ok(RoleName::Targets),
            _ => {
                validate_delegated_name(s)?;
                Ok(RoleName::Delegated(s.to_owned()))
            }
        }
    }
}

fn validate_delegated_name(name: &str) -> Result<()> {
    let rest = name
        .strip_prefix("targets/")
        .ok_or_else(|| anyhow!("role '{name}' is not a top-level role or a targets delegation"))?;

    for segment in rest.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            bail!("role '{name}' has an empty or relative path segment");
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            bail!("role '{name}' contains characters outside [A-Za-z0-9._-]");
        }
    }

    Ok(())
}

impl Serialize for RoleName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RoleName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_top_level_and_delegated_roles() {
        assert_eq!("root".parse::<RoleName>().unwrap(), RoleName::Root);
        assert_eq!("targets".parse::<RoleName>().unwrap(), RoleName::Targets);
        assert_eq!(
            "targets/a/b".parse::<RoleName>().unwrap(),
            RoleName::Delegated("targets/a/b".to_owned())
        );
        assert_eq!(RoleName::Delegated("targets/a".into()).to_string(), "targets/a");
    }

    #[test]
    fn rejects_bad_delegation_names() {
        for name in ["mirrors", "targets/", "targets//a", "targets/../root", "targets/a b", "other/a"] {
            assert!(name.parse::<RoleName>().is_err(), "{name} should be rejected");
        }
    }

    #[test]
    fn child_relation_is_direct() {
        let a: RoleName = "targets/a".parse().unwrap();
        let ab: RoleName = "targets/a/b".parse().unwrap();
        let abc: RoleName = "targets/a/b/c".parse().unwrap();

        assert!(a.is_child_of(&RoleName::Targets));
        assert!(ab.is_child_of(&a));
        assert!(abc.is_child_of(&ab));
        assert!(!ab.is_child_of(&RoleName::Targets));
        assert!(!a.is_child_of(&RoleName::Snapshot));
        assert!(!RoleName::Targets.is_child_of(&RoleName::Targets));
        // prefix match on a segment boundary only
        let ax: RoleName = "targets/ax".parse().unwrap();
        assert!(!ax.is_child_of(&a));
    }

    #[test]
    fn versioned_root_name() {
        assert_eq!(RoleName::versioned_root(3), "3.root");
    }
}
