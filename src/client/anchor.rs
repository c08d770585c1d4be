use log::{debug, info, warn};

use super::{pins::PinnedRoot, report::AnchorOrigin, rotation, Session};
use crate::{
    envelope::SignedMetadata,
    error::{Rejection, UpdateError},
    metadata::{Metadata, Root},
    role::RoleName,
    validator::Validator,
};

/// Root the update starts from.
pub(crate) struct TrustAnchor {
    pub root: SignedMetadata<Root>,
    pub origin: AnchorOrigin,
    /// Bytes of the remote `root`, `None` when the remote could not be reached
    pub latest: Option<Vec<u8>>,
    /// The cache already holds `root`
    pub cached: bool,
}

/// Picks the starting root.
///
/// A parseable cached root is used as is, even when expired or no longer validly signed: it is
/// only the anchor for checking rotations, and the rotated result is fully validated. Without
/// one the remote root must meet the pinned root keys, and is trusted on first use only when
/// nothing was ever pinned.
pub(crate) async fn resolve(session: &Session<'_>) -> Result<TrustAnchor, UpdateError> {
    let role = RoleName::Root;

    let local = match session.cache.read(role.as_str()).await {
        Some(raw) => match SignedMetadata::<Root>::parse(raw) {
            Ok(root) => Some(root),
            Err(reason) => {
                warn!("cached root is unreadable, falling back to the remote root: {reason}");
                None
            }
        },
        None => None,
    };

    let remote = session.fetch(&role, role.as_str(), session.size_limit()).await;
    match (local, remote) {
        (_, Ok(None)) => Err(UpdateError::RepositoryNotExist {
            gun: session.config.gun.clone(),
        }),
        (Some(root), Ok(Some(latest))) => {
            debug!("anchored on cached root version {}", root.version());
            Ok(TrustAnchor {
                root,
                origin: AnchorOrigin::Local,
                latest: Some(latest),
                cached: true,
            })
        }
        (Some(root), Err(e)) => {
            warn!("remote unavailable, continuing from cached root: {e}");
            Ok(TrustAnchor {
                root,
                origin: AnchorOrigin::Local,
                latest: None,
                cached: true,
            })
        }
        (None, Err(e)) => Err(e),
        (None, Ok(Some(latest))) => match session.cache.pinned_root().await {
            Some(pinned) => from_pinned(session, &pinned, latest).await,
            None => {
                let root = trust_on_first_use(&session.validator, latest, session.size_limit())
                    .map_err(UpdateError::validation(&role))?;
                info!("trusting root version {} on first use", root.version());

                let latest = Some(root.raw.clone());
                Ok(TrustAnchor {
                    root,
                    origin: AnchorOrigin::Remote,
                    latest,
                    cached: false,
                })
            }
        },
    }
}

/// Anchors on the remote copy of the pinned root version, or on the latest root when that
/// version is no longer published. Either must meet the pinned keys and its own.
async fn from_pinned(
    session: &Session<'_>,
    pinned: &PinnedRoot,
    latest: Vec<u8>,
) -> Result<TrustAnchor, UpdateError> {
    let role = RoleName::Root;
    let limit = session.size_limit();

    let versioned = RoleName::versioned_root(pinned.version);
    let (raw, exact_version) = match session.fetch(&role, &versioned, limit).await? {
        Some(raw) => (raw, Some(pinned.version)),
        None => {
            debug!("{versioned} is not published, checking the latest root against pinned keys");
            (latest.clone(), None)
        }
    };

    let root = rotation::accept_root(
        &session.validator,
        &pinned.authority(),
        pinned.version,
        raw,
        exact_version,
        limit,
    )
    .map_err(UpdateError::validation(&role))?;
    info!("re-anchored on root version {} through pinned keys", root.version());

    Ok(TrustAnchor {
        root,
        origin: AnchorOrigin::Pinned,
        latest: Some(latest),
        cached: false,
    })
}

/// A root with no prior anchor must be signed by its own root keys and not expired.
fn trust_on_first_use(
    validator: &Validator,
    raw: Vec<u8>,
    size_limit: u64,
) -> Result<SignedMetadata<Root>, Rejection> {
    validator.check_size(&raw, size_limit)?;
    let root = SignedMetadata::<Root>::parse(raw)?;
    validator.check_signatures(&root, &root.signed.authority(&RoleName::Root)?)?;
    validator.check_expiry(root.signed.expires())?;
    Ok(root)
}
