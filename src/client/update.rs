use std::collections::{BTreeMap, BTreeSet};

use anyhow::anyhow;
use futures::future::join_all;
use log::{debug, info, warn};

use super::{
    anchor,
    cache::LocalState,
    report::{AnchorOrigin, Persisted, RoleOutcome, Source, UpdateReport},
    rotation, Session,
};
use crate::{
    canonical::FileMeta,
    envelope::SignedMetadata,
    error::{Rejection, UpdateError},
    metadata::{Authority, Metadata, Root, Snapshot, Targets, Timestamp},
    role::RoleName,
    trusted::TrustedMetadata,
};

/// A document accepted for one role, not yet persisted.
struct Accepted<T> {
    document: SignedMetadata<T>,
    source: Source,
    /// The cache already holds exactly these bytes
    cached: bool,
}

impl<T: Metadata> Accepted<T> {
    fn from_cache(document: SignedMetadata<T>) -> Self {
        Self {
            document,
            source: Source::Cache,
            cached: true,
        }
    }

    fn from_remote(document: SignedMetadata<T>, local: &LocalState<T>) -> Self {
        let cached = local.raw() == Some(document.raw.as_slice());
        Self {
            document,
            source: Source::Remote,
            cached,
        }
    }
}

/// A delegated role waiting to be fetched.
struct Pending {
    role: RoleName,
    authority: Authority,
    expected: FileMeta,
    /// Target name prefixes the role may list
    paths: Vec<String>,
}

pub(crate) async fn run(session: &Session<'_>, for_write: bool) -> Result<UpdateReport, UpdateError> {
    let anchor = anchor::resolve(session).await?;
    let anchor_origin = anchor.origin;
    let rotated = rotation::rotate(session, anchor).await?;
    let root = rotated.root;

    let root_unchanged = anchor_origin == AnchorOrigin::Local && rotated.steps == 0;
    let mut roles = vec![RoleOutcome {
        role: RoleName::Root,
        version: root.version(),
        source: if root_unchanged {
            Source::Cache
        } else {
            Source::Remote
        },
        persisted: if root_unchanged {
            Persisted::NotNeeded
        } else {
            Persisted::Written
        },
    }];

    let timestamp_authority = root
        .signed
        .authority(&RoleName::Timestamp)
        .map_err(UpdateError::validation(&RoleName::Timestamp))?;
    let timestamp = update_timestamp(session, &timestamp_authority).await?;
    let timestamp = record(session, &RoleName::Timestamp, timestamp, &mut roles).await;

    let snapshot_meta = timestamp.signed.snapshot_meta().cloned().ok_or_else(|| {
        UpdateError::ValidationFailed {
            role: RoleName::Timestamp,
            reason: Rejection::Malformed("timestamp does not list a snapshot".to_owned()),
        }
    })?;
    let snapshot_authority = root
        .signed
        .authority(&RoleName::Snapshot)
        .map_err(UpdateError::validation(&RoleName::Snapshot))?;
    let snapshot =
        refresh::<Snapshot>(session, &RoleName::Snapshot, &snapshot_authority, &snapshot_meta)
            .await?;
    let snapshot = record(session, &RoleName::Snapshot, snapshot, &mut roles).await;

    check_cached_root(session, &root, &snapshot).await?;

    let targets = update_targets(session, &root.signed, &snapshot, &mut roles).await?;

    info!(
        "{} is up to date: root {}, timestamp {}, snapshot {}, {} targets roles",
        session.config.gun,
        root.version(),
        timestamp.version(),
        snapshot.version(),
        targets.len()
    );

    Ok(UpdateReport {
        for_write,
        anchor_origin,
        root_rotations: rotated.steps,
        roles,
        metadata: TrustedMetadata {
            root,
            timestamp,
            snapshot,
            targets,
        },
    })
}

/// The timestamp is always fetched. A valid cached copy is used only when the remote one
/// cannot be fetched or accepted.
async fn update_timestamp(
    session: &Session<'_>,
    authority: &Authority,
) -> Result<Accepted<Timestamp>, UpdateError> {
    let role = RoleName::Timestamp;
    let validator = &session.validator;
    let limit = session.size_limit();

    let local = session
        .cache
        .load::<Timestamp>(&role, authority, None, validator)
        .await;

    let error = match session.fetch(&role, role.as_str(), limit).await {
        Ok(Some(raw)) => {
            match validator.accept::<Timestamp>(raw, authority, local.version_floor(), None, limit)
            {
                Ok(document) => return Ok(Accepted::from_remote(document, &local)),
                Err(reason) => UpdateError::ValidationFailed {
                    role: role.clone(),
                    reason,
                },
            }
        }
        Ok(None) => UpdateError::MetaNotFound { role: role.clone() },
        Err(e) => e,
    };

    match local {
        LocalState::Valid(document) => {
            warn!("using cached timestamp, it may not be the latest: {error}");
            Ok(Accepted::from_cache(document))
        }
        _ => Err(error),
    }
}

/// Reuses the cached copy of `role` when it matches `expected`, otherwise fetches it.
async fn refresh<T: Metadata>(
    session: &Session<'_>,
    role: &RoleName,
    authority: &Authority,
    expected: &FileMeta,
) -> Result<Accepted<T>, UpdateError> {
    let validator = &session.validator;

    let local = session
        .cache
        .load::<T>(role, authority, Some(expected), validator)
        .await;
    let floor = match local {
        LocalState::Valid(document) => {
            debug!("cached {role} matches its parent");
            return Ok(Accepted::from_cache(document));
        }
        LocalState::Invalid {
            ref reason,
            version_floor,
        } => {
            debug!("refetching {role}: {reason}");
            version_floor
        }
        LocalState::Missing => 0,
    };

    let limit = session.size_limit().min(expected.length);
    let raw = session
        .fetch(role, role.as_str(), limit)
        .await?
        .ok_or_else(|| UpdateError::MetaNotFound { role: role.clone() })?;
    let document = validator
        .accept::<T>(raw, authority, floor, Some(expected), session.size_limit())
        .map_err(UpdateError::validation(role))?;

    Ok(Accepted::from_remote(document, &local))
}

/// Persists a fresh document and adds its outcome to the report.
async fn record<T: Metadata>(
    session: &Session<'_>,
    role: &RoleName,
    accepted: Accepted<T>,
    roles: &mut Vec<RoleOutcome>,
) -> SignedMetadata<T> {
    let Accepted {
        document,
        source,
        cached,
    } = accepted;

    let persisted = if cached {
        Persisted::NotNeeded
    } else {
        session.cache.persist(role, &document.raw).await
    };
    roles.push(RoleOutcome {
        role: role.clone(),
        version: document.version(),
        source,
        persisted,
    });
    document
}

/// The root held in the cache must be exactly the trusted root and match the snapshot entry.
async fn check_cached_root(
    session: &Session<'_>,
    root: &SignedMetadata<Root>,
    snapshot: &SignedMetadata<Snapshot>,
) -> Result<(), UpdateError> {
    let Some(expected) = snapshot.signed.role_meta(&RoleName::Root) else {
        debug!("snapshot does not list root");
        return Ok(());
    };

    let cached = session.cache.read_back_root().await?;
    if cached != root.raw {
        return Err(UpdateError::PersistenceFailed {
            role: RoleName::Root,
            source: anyhow!("cached root differs from the trusted root"),
        });
    }
    session
        .validator
        .check_file_meta(&cached, expected)
        .map_err(UpdateError::validation(&RoleName::Root))
}

/// Accepts `targets`, then delegated roles one delegation level at a time.
///
/// Roles on the same level are fetched and validated concurrently; persisting happens
/// afterwards in listing order.
async fn update_targets(
    session: &Session<'_>,
    root: &Root,
    snapshot: &SignedMetadata<Snapshot>,
    roles: &mut Vec<RoleOutcome>,
) -> Result<BTreeMap<RoleName, SignedMetadata<Targets>>, UpdateError> {
    let role = RoleName::Targets;
    let authority = root
        .authority(&role)
        .map_err(UpdateError::validation(&role))?;
    let expected = snapshot
        .signed
        .role_meta(&role)
        .cloned()
        .ok_or_else(|| UpdateError::ValidationFailed {
            role: RoleName::Snapshot,
            reason: Rejection::Malformed("snapshot does not list targets".to_owned()),
        })?;

    let top = refresh::<Targets>(session, &role, &authority, &expected).await?;
    let top = record(session, &role, top, roles).await;

    let mut seen = BTreeSet::from([role.clone()]);
    let mut level = delegations_of(&role, &top.signed, None, &snapshot.signed, &mut seen);
    let mut trusted = BTreeMap::from([(role, top)]);

    while !level.is_empty() {
        let results = join_all(level.iter().map(|pending| fetch_delegation(session, pending))).await;

        let mut next = Vec::new();
        for (pending, result) in level.into_iter().zip(results) {
            let accepted = match result {
                Ok(accepted) => accepted,
                Err(UpdateError::ValidationFailed {
                    role,
                    reason: reason @ (Rejection::Expired(_) | Rejection::ThresholdNotMet { .. }),
                }) => {
                    warn!("skipping delegated role {role} and its delegations: {reason}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let document = record(session, &pending.role, accepted, roles).await;
            next.extend(delegations_of(
                &pending.role,
                &document.signed,
                Some(pending.paths.as_slice()),
                &snapshot.signed,
                &mut seen,
            ));
            trusted.insert(pending.role, document);
        }
        level = next;
    }

    Ok(trusted)
}

/// Targets outside the delegated paths are left in the document; lookups never reach them.
async fn fetch_delegation(
    session: &Session<'_>,
    pending: &Pending,
) -> Result<Accepted<Targets>, UpdateError> {
    let accepted =
        refresh::<Targets>(session, &pending.role, &pending.authority, &pending.expected).await?;

    let outside = outside_paths(&accepted.document.signed, &pending.paths);
    if !outside.is_empty() {
        warn!(
            "ignoring {} targets of {} outside its delegated paths: {}",
            outside.len(),
            pending.role,
            outside.join(", ")
        );
    }
    Ok(accepted)
}

fn outside_paths<'a>(document: &'a Targets, paths: &[String]) -> Vec<&'a str> {
    document
        .targets
        .keys()
        .filter(|name| !paths.iter().any(|p| name.starts_with(p.as_str())))
        .map(String::as_str)
        .collect()
}

/// Valid delegations of `parent` that the snapshot lists.
fn delegations_of(
    parent: &RoleName,
    document: &Targets,
    parent_paths: Option<&[String]>,
    snapshot: &Snapshot,
    seen: &mut BTreeSet<RoleName>,
) -> Vec<Pending> {
    let mut pending = Vec::new();

    for delegation in &document.delegations.roles {
        let role = match delegation.name.parse::<RoleName>() {
            Ok(role) if role.is_child_of(parent) => role,
            Ok(_) => {
                warn!(
                    "{parent} delegates to {}, which is not its child",
                    delegation.name
                );
                continue;
            }
            Err(e) => {
                warn!("{parent} has an invalid delegation: {e}");
                continue;
            }
        };
        if seen.contains(&role) {
            warn!("{parent} delegates to {role} more than once");
            continue;
        }
        let authority = match document.delegations.authority(delegation) {
            Ok(authority) => authority,
            Err(reason) => {
                warn!("{parent} has an invalid delegation to {role}: {reason}");
                continue;
            }
        };
        let Some(expected) = snapshot.role_meta(&role) else {
            debug!("{role} is not in the snapshot, skipping");
            continue;
        };

        seen.insert(role.clone());
        pending.push(Pending {
            role,
            authority,
            expected: expected.clone(),
            paths: restrict_paths(parent_paths, &delegation.paths),
        });
    }

    pending
}

/// Intersects a delegation's path prefixes with those its parent was allowed.
///
/// `None` means the parent is unrestricted.
fn restrict_paths(parent: Option<&[String]>, paths: &[String]) -> Vec<String> {
    let Some(parent) = parent else {
        return paths.to_vec();
    };

    let mut allowed = Vec::new();
    for path in paths {
        for outer in parent {
            if path.starts_with(outer.as_str()) {
                allowed.push(path.clone());
            } else if outer.starts_with(path.as_str()) {
                allowed.push(outer.clone());
            }
        }
    }
    allowed.sort();
    allowed.dedup();
    allowed
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::metadata::{Delegations, DocumentType};

    fn paths(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unrestricted_parent_keeps_paths() {
        assert_eq!(
            restrict_paths(None, &paths(&["a/", "b/"])),
            paths(&["a/", "b/"])
        );
        assert!(restrict_paths(None, &[]).is_empty());
    }

    #[test]
    fn paths_narrow_through_ancestors() {
        let parent = paths(&["releases/"]);
        assert_eq!(
            restrict_paths(Some(parent.as_slice()), &paths(&[""])),
            paths(&["releases/"])
        );
        assert_eq!(
            restrict_paths(Some(parent.as_slice()), &paths(&["releases/stable/", "docs/"])),
            paths(&["releases/stable/"])
        );
        assert!(restrict_paths(Some(parent.as_slice()), &paths(&["docs/"])).is_empty());
        assert!(restrict_paths(Some(&[][..]), &paths(&[""])).is_empty());
    }

    #[test]
    fn lists_targets_outside_delegated_paths() {
        let document = Targets {
            kind: DocumentType::Targets,
            version: 1,
            expires: Utc::now() + Duration::days(1),
            targets: ["releases/1.0", "docs/index", "releases-old/0.9"]
                .into_iter()
                .map(|name| (name.to_owned(), FileMeta::from_bytes(name.as_bytes(), None)))
                .collect(),
            delegations: Delegations::default(),
        };

        assert_eq!(
            outside_paths(&document, &paths(&["releases/"])),
            vec!["docs/index", "releases-old/0.9"]
        );
        assert!(outside_paths(&document, &paths(&[""])).is_empty());
        assert_eq!(outside_paths(&document, &[]).len(), 3);
    }
}
