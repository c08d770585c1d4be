//! Fixtures for exercising a full update against an in-memory server.
//!
//! [`RepoFixture`] builds and signs a complete repository (root, timestamp, snapshot, targets
//! and optional delegations) into an [`InMemoryStore`] acting as the server, and can corrupt a
//! client's cached copies in the ways a damaged or tampered cache shows up in practice.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::{
    canonical::FileMeta,
    client::Repository,
    config::RepositoryConfig,
    envelope::{sign_envelope, sign_metadata, Envelope},
    key::KeyId,
    metadata::{
        DelegatedRole, Delegations, DocumentType, RoleKeys, Root, Snapshot, Targets, Timestamp,
    },
    metadata_store::{InMemoryStore, MetadataStore},
    remote::StoreRemote,
    role::RoleName,
    signer::{Ed25519Signer, Signer},
};

/// Ways a cached document can be damaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Corruption {
    /// Bytes no longer parse
    InvalidJson,
    /// Document removed from the cache
    Missing,
    /// Signature bytes flipped
    InvalidSignatures,
    /// Signed content edited after signing
    Tampered,
    /// Re-signed by a key the repository does not know
    WrongKey,
    /// Re-signed by the right key with an expiry in the past
    Expired,
}

impl Corruption {
    pub const ALL: [Corruption; 6] = [
        Corruption::InvalidJson,
        Corruption::Missing,
        Corruption::InvalidSignatures,
        Corruption::Tampered,
        Corruption::WrongKey,
        Corruption::Expired,
    ];
}

/// A signed repository published into an in-memory server.
pub struct RepoFixture {
    gun: String,
    server: Arc<InMemoryStore>,
    signers: BTreeMap<RoleName, Arc<dyn Signer>>,
    /// Previous root keys that co-sign the next published root
    root_cosigners: Vec<Arc<dyn Signer>>,
    versions: BTreeMap<RoleName, u64>,
    targets: BTreeMap<RoleName, BTreeMap<String, FileMeta>>,
    /// Delegated paths that differ from `[""]`
    paths: BTreeMap<RoleName, Vec<String>>,
    expires: DateTime<Utc>,
}

impl RepoFixture {
    /// Builds and publishes version 1 of every role.
    ///
    /// `delegations` are delegated role names; each one is delegated by its parent with paths
    /// `[""]` until [`delegate_paths`](Self::delegate_paths) says otherwise.
    pub async fn new(gun: &str, delegations: &[&str]) -> Result<Self> {
        let mut roles = RoleName::TOP_LEVEL.to_vec();
        for name in delegations {
            let role: RoleName = name.parse()?;
            if !role.is_delegation() {
                bail!("{name} is not a delegated role");
            }
            roles.push(role);
        }

        let mut signers = BTreeMap::new();
        let mut versions = BTreeMap::new();
        let mut targets = BTreeMap::new();
        for role in roles {
            let signer: Arc<dyn Signer> = Arc::new(Ed25519Signer::create()?);
            signers.insert(role.clone(), signer);
            versions.insert(role.clone(), 1);
            if role.is_targets() {
                let name = format!("{role}/artifact");
                let meta = FileMeta::from_bytes(name.as_bytes(), None);
                targets.insert(role, BTreeMap::from([(name, meta)]));
            }
        }

        let mut fixture = Self {
            gun: gun.to_owned(),
            server: Arc::new(InMemoryStore::new()),
            signers,
            root_cosigners: Vec::new(),
            versions,
            targets,
            paths: BTreeMap::new(),
            expires: Utc::now() + Duration::days(30),
        };
        fixture.publish().await?;
        Ok(fixture)
    }

    pub fn gun(&self) -> &str {
        &self.gun
    }

    /// The server side store.
    pub fn server(&self) -> &Arc<InMemoryStore> {
        &self.server
    }

    /// A repository reading from this fixture's server through `cache`.
    pub fn repository(&self, cache: Arc<dyn MetadataStore>) -> Repository {
        Repository::new(
            RepositoryConfig::new(&self.gun),
            cache,
            Arc::new(StoreRemote::new(self.server.clone())),
        )
    }

    pub fn version(&self, role: &RoleName) -> u64 {
        self.versions.get(role).copied().unwrap_or_default()
    }

    /// Roles published by this fixture, top-level first.
    pub fn roles(&self) -> Vec<RoleName> {
        let mut roles = RoleName::TOP_LEVEL.to_vec();
        roles.extend(self.signers.keys().filter(|r| r.is_delegation()).cloned());
        roles
    }

    /// Current server bytes of `role`.
    pub async fn published(&self, role: &RoleName) -> Result<Vec<u8>> {
        self.server
            .get(role.as_str())
            .await?
            .ok_or_else(|| anyhow!("{role} is not published"))
    }

    pub fn add_target(&mut self, role: &RoleName, name: &str, content: &[u8]) -> Result<()> {
        let targets = self
            .targets
            .get_mut(role)
            .ok_or_else(|| anyhow!("{role} is not a targets role of this fixture"))?;
        targets.insert(name.to_owned(), FileMeta::from_bytes(content, None));
        Ok(())
    }

    /// Changes the paths `role` is delegated with. Takes effect at the next publish.
    pub fn delegate_paths(&mut self, role: &RoleName, paths: &[&str]) -> Result<()> {
        if !role.is_delegation() || !self.signers.contains_key(role) {
            bail!("{role} is not a delegated role of this fixture");
        }
        self.paths
            .insert(role.clone(), paths.iter().map(|p| p.to_string()).collect());
        Ok(())
    }

    /// Increments the version of every role and republishes.
    pub async fn bump_versions(&mut self) -> Result<()> {
        for version in self.versions.values_mut() {
            *version += 1;
        }
        self.publish().await
    }

    /// Replaces the root key and publishes the next root version.
    ///
    /// With `cosign` the new root is also signed by the outgoing key, which is what a client
    /// needs to accept the rotation.
    pub async fn rotate_root_key(&mut self, cosign: bool) -> Result<()> {
        let new: Arc<dyn Signer> = Arc::new(Ed25519Signer::create()?);
        if let Some(old) = self.signers.insert(RoleName::Root, new) {
            if cosign {
                self.root_cosigners.push(old);
            }
        }
        for role in [RoleName::Root, RoleName::Snapshot, RoleName::Timestamp] {
            if let Some(version) = self.versions.get_mut(&role) {
                *version += 1;
            }
        }
        self.publish().await
    }

    /// Signs every document and writes it to the server, including `{N}.root`.
    pub async fn publish(&mut self) -> Result<()> {
        let mut root_signers = vec![self.signer(&RoleName::Root)?];
        root_signers.append(&mut self.root_cosigners);
        let root = sign_metadata(&self.root_document()?, &root_signers).await?;
        let root_version = self.version(&RoleName::Root);
        self.server.set(RoleName::Root.as_str(), &root.raw).await?;
        self.server
            .set(&RoleName::versioned_root(root_version), &root.raw)
            .await?;

        let mut snapshot_meta = BTreeMap::new();
        snapshot_meta.insert(
            RoleName::Root.to_string(),
            FileMeta::from_bytes(&root.raw, Some(root_version)),
        );
        let targets_roles: Vec<RoleName> = self.targets.keys().cloned().collect();
        for role in targets_roles {
            let document = self.targets_document(&role)?;
            let signed = sign_metadata(&document, &[self.signer(&role)?]).await?;
            self.server.set(role.as_str(), &signed.raw).await?;
            snapshot_meta.insert(
                role.to_string(),
                FileMeta::from_bytes(&signed.raw, Some(document.version)),
            );
        }

        let snapshot = Snapshot {
            kind: DocumentType::Snapshot,
            version: self.version(&RoleName::Snapshot),
            expires: self.expires,
            meta: snapshot_meta,
        };
        let snapshot = sign_metadata(&snapshot, &[self.signer(&RoleName::Snapshot)?]).await?;
        self.server
            .set(RoleName::Snapshot.as_str(), &snapshot.raw)
            .await?;

        let timestamp = Timestamp {
            kind: DocumentType::Timestamp,
            version: self.version(&RoleName::Timestamp),
            expires: self.expires,
            meta: BTreeMap::from([(
                RoleName::Snapshot.to_string(),
                FileMeta::from_bytes(&snapshot.raw, Some(snapshot.version())),
            )]),
        };
        let timestamp = sign_metadata(&timestamp, &[self.signer(&RoleName::Timestamp)?]).await?;
        self.server
            .set(RoleName::Timestamp.as_str(), &timestamp.raw)
            .await?;

        Ok(())
    }

    /// Damages the cached copy of `role` in `cache`.
    pub async fn corrupt(
        &self,
        cache: &dyn MetadataStore,
        role: &RoleName,
        corruption: Corruption,
    ) -> Result<()> {
        let name = role.as_str();
        let damaged = match corruption {
            Corruption::Missing => return cache.remove(name).await,
            Corruption::InvalidJson => {
                let raw = cached(cache, role).await?;
                raw.get(5..).unwrap_or_default().to_vec()
            }
            Corruption::InvalidSignatures => {
                let mut envelope = Envelope::from_slice(&cached(cache, role).await?)?;
                for signature in &mut envelope.signatures {
                    for byte in &mut signature.sig {
                        *byte ^= 0xff;
                    }
                }
                envelope.to_vec()?
            }
            Corruption::Tampered => {
                let mut envelope = Envelope::from_slice(&cached(cache, role).await?)?;
                set_field(&mut envelope.signed, "expires", Value::from(far_future()))?;
                envelope.to_vec()?
            }
            Corruption::WrongKey => {
                let envelope = Envelope::from_slice(&cached(cache, role).await?)?;
                let stranger: Arc<dyn Signer> = Arc::new(Ed25519Signer::create()?);
                sign_envelope(envelope.signed, &[stranger]).await?.to_vec()?
            }
            Corruption::Expired => {
                let mut envelope = Envelope::from_slice(&cached(cache, role).await?)?;
                let past = (Utc::now() - Duration::days(1)).to_rfc3339();
                set_field(&mut envelope.signed, "expires", Value::from(past))?;
                sign_envelope(envelope.signed, &[self.signer(role)?])
                    .await?
                    .to_vec()?
            }
        };

        cache.set(name, &damaged).await
    }

    fn signer(&self, role: &RoleName) -> Result<Arc<dyn Signer>> {
        self.signers
            .get(role)
            .cloned()
            .ok_or_else(|| anyhow!("no signer for {role}"))
    }

    fn key_id(&self, role: &RoleName) -> Result<KeyId> {
        self.signer(role)?.public_key().key_id()
    }

    fn root_document(&self) -> Result<Root> {
        let mut keys = BTreeMap::new();
        let mut roles = BTreeMap::new();
        for role in RoleName::TOP_LEVEL {
            let key = self.signer(&role)?.public_key();
            let id = key.key_id()?;
            keys.insert(id.clone(), key);
            roles.insert(
                role.to_string(),
                RoleKeys {
                    keyids: vec![id],
                    threshold: 1,
                },
            );
        }

        Ok(Root {
            kind: DocumentType::Root,
            version: self.version(&RoleName::Root),
            expires: self.expires,
            consistent_snapshot: false,
            keys,
            roles,
        })
    }

    fn targets_document(&self, role: &RoleName) -> Result<Targets> {
        let mut delegations = Delegations::default();
        for child in self.signers.keys().filter(|child| child.is_child_of(role)) {
            let key = self.signer(child)?.public_key();
            delegations.keys.insert(self.key_id(child)?, key);
            delegations.roles.push(DelegatedRole {
                name: child.to_string(),
                keyids: vec![self.key_id(child)?],
                threshold: 1,
                paths: self
                    .paths
                    .get(child)
                    .cloned()
                    .unwrap_or_else(|| vec![String::new()]),
            });
        }

        Ok(Targets {
            kind: DocumentType::Targets,
            version: self.version(role),
            expires: self.expires,
            targets: self.targets.get(role).cloned().unwrap_or_default(),
            delegations,
        })
    }
}

async fn cached(cache: &dyn MetadataStore, role: &RoleName) -> Result<Vec<u8>> {
    cache
        .get(role.as_str())
        .await?
        .ok_or_else(|| anyhow!("{role} is not cached"))
}

fn set_field(signed: &mut Value, field: &str, value: Value) -> Result<()> {
    let object = signed
        .as_object_mut()
        .ok_or_else(|| anyhow!("signed value is not an object"))?;
    object.insert(field.to_owned(), value);
    Ok(())
}

fn far_future() -> String {
    (Utc::now() + Duration::days(3650)).to_rfc3339()
}

/// Wraps a store and fails every write to the named documents.
pub struct UnwritableStore {
    inner: Arc<dyn MetadataStore>,
    unwritable: BTreeSet<String>,
}

impl UnwritableStore {
    pub fn new(inner: Arc<dyn MetadataStore>, unwritable: &[&RoleName]) -> Self {
        Self {
            inner,
            unwritable: unwritable.iter().map(|r| r.to_string()).collect(),
        }
    }
}

#[async_trait]
impl MetadataStore for UnwritableStore {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(name).await
    }

    async fn set(&self, name: &str, meta: &[u8]) -> Result<()> {
        if self.unwritable.contains(name) {
            bail!("{name} is not writable");
        }
        self.inner.set(name, meta).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.inner.remove(name).await
    }
}
