use log::{debug, info};

use super::{anchor::TrustAnchor, Session};
use crate::{
    envelope::SignedMetadata,
    error::{Rejection, UpdateError},
    metadata::{Authority, Metadata, Root},
    role::RoleName,
    validator::Validator,
};

/// Trusted root after walking every rotation the remote offers.
pub(crate) struct Rotated {
    pub root: SignedMetadata<Root>,
    pub steps: u64,
}

/// Walks `{N}.root` from the anchor's version upwards, then applies the remote `root` if it
/// differs from where the walk ended.
///
/// Every accepted step is persisted before the next one is fetched, so a failed step leaves
/// the cache at the last accepted root. An anchor the cache does not hold yet is persisted
/// only after the final checks.
pub(crate) async fn rotate(
    session: &Session<'_>,
    anchor: TrustAnchor,
) -> Result<Rotated, UpdateError> {
    let role = RoleName::Root;
    let validator = &session.validator;
    let limit = session.size_limit();
    let max_steps = session.config.max_root_rotations;

    let TrustAnchor {
        mut root,
        latest,
        cached,
        ..
    } = anchor;
    let mut steps = 0;

    if let Some(latest) = latest {
        loop {
            let next = root
                .version()
                .checked_add(1)
                .ok_or_else(|| malformed_root("root version overflow"))?;
            let Some(raw) = session.fetch(&role, &RoleName::versioned_root(next), limit).await?
            else {
                debug!("no root version {next} published");
                break;
            };

            steps += 1;
            check_steps(steps, max_steps)?;
            root = step(validator, &root, raw, Some(next), limit)
                .map_err(UpdateError::validation(&role))?;
            session.cache.persist_root(&root).await?;
            info!("rotated root to version {next}");
        }

        if latest != root.raw {
            steps += 1;
            check_steps(steps, max_steps)?;
            root = step(validator, &root, latest, None, limit)
                .map_err(UpdateError::validation(&role))?;
            session.cache.persist_root(&root).await?;
            info!("rotated root to latest version {}", root.version());
        }
    }

    let authority = root
        .signed
        .authority(&role)
        .map_err(UpdateError::validation(&role))?;
    validator
        .check_signatures(&root, &authority)
        .and_then(|()| validator.check_expiry(root.signed.expires()))
        .map_err(UpdateError::validation(&role))?;

    if steps == 0 {
        if cached {
            session.cache.ensure_pinned(&root).await?;
        } else {
            session.cache.persist_root(&root).await?;
        }
    }

    Ok(Rotated { root, steps })
}

/// One rotation: the candidate must meet the root threshold of both the trusted root and
/// itself.
fn step(
    validator: &Validator,
    trusted: &SignedMetadata<Root>,
    raw: Vec<u8>,
    exact_version: Option<u64>,
    size_limit: u64,
) -> Result<SignedMetadata<Root>, Rejection> {
    let authority = trusted.signed.authority(&RoleName::Root)?;
    accept_root(
        validator,
        &authority,
        trusted.version(),
        raw,
        exact_version,
        size_limit,
    )
}

/// Accepts a root signed by both `trusted` and its own root keys.
///
/// With `exact_version` the candidate must carry that version, otherwise it may not be older
/// than `trusted_version`.
pub(crate) fn accept_root(
    validator: &Validator,
    trusted: &Authority,
    trusted_version: u64,
    raw: Vec<u8>,
    exact_version: Option<u64>,
    size_limit: u64,
) -> Result<SignedMetadata<Root>, Rejection> {
    validator.check_size(&raw, size_limit)?;
    let candidate = SignedMetadata::<Root>::parse(raw)?;

    match exact_version {
        Some(expected) if candidate.version() != expected => {
            return Err(Rejection::VersionMismatch {
                expected,
                received: candidate.version(),
            })
        }
        Some(_) => {}
        None => validator.check_rollback(candidate.version(), trusted_version)?,
    }

    validator.check_signatures(&candidate, trusted)?;
    validator.check_signatures(&candidate, &candidate.signed.authority(&RoleName::Root)?)?;
    Ok(candidate)
}

fn check_steps(steps: u64, max_steps: u64) -> Result<(), UpdateError> {
    if steps > max_steps {
        return Err(UpdateError::ValidationFailed {
            role: RoleName::Root,
            reason: Rejection::TooManyRotations(max_steps),
        });
    }
    Ok(())
}

fn malformed_root(reason: &str) -> UpdateError {
    UpdateError::ValidationFailed {
        role: RoleName::Root,
        reason: Rejection::Malformed(reason.to_owned()),
    }
}
