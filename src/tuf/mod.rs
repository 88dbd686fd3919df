//
// Copyright 2024 The Sigstore Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A TUF client for the trust root repository.
//!
//! [`TufClient::update`] walks the standard client workflow: root rotation,
//! then timestamp, snapshot and targets verification, each anchored on the
//! role keys the trusted root delegates. A refresh moves through the phases
//! `Idle -> RootRotating -> TimestampVerifying -> SnapshotVerifying ->
//! TargetsVerifying -> Ready`; a failure in any phase surfaces immediately
//! and leaves the on-disk store at its last `Ready` state, which anchors
//! the next `update()` call.
//!
//! [`TufClient::target_bytes`] then serves named target files, exact in
//! length and matching every digest the verified targets metadata declares.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod metadata;
pub mod store;
pub mod transport;

use metadata::{
    check_freshness, check_hashes, check_length, check_meta_constraints, check_type,
    verify_role_signatures, RootMetadata, SignedMetadata, SnapshotMetadata, TargetFile,
    TargetsMetadata, TimestampMetadata, ROOT, SNAPSHOT, TARGETS, TIMESTAMP,
};
pub use store::FileSystemStore;
pub use transport::{HttpTransport, MetadataTransport};

#[derive(Error, Debug)]
pub enum TufError {
    #[error("{role} metadata expired at {expired_at}")]
    ExpiredMetadata {
        role: String,
        expired_at: DateTime<Utc>,
    },

    #[error("rollback detected for {role}: stored version {stored}, fetched version {fetched}")]
    RollbackVersion {
        role: String,
        stored: u64,
        fetched: u64,
    },

    #[error("{role} version {actual} did not match the expected version {expected}")]
    VersionMismatch {
        role: String,
        expected: u64,
        actual: u64,
    },

    #[error("signature threshold not met for {role}: required {required}, valid {valid}")]
    SignatureThresholdNotMet {
        role: String,
        required: u32,
        valid: u32,
    },

    #[error("tracked metadata {name} was missing from the updated snapshot")]
    SnapshotTargetMissing { name: String },

    #[error(
        "tracked metadata {name} version {fetched} is lower than the current version {stored}"
    )]
    SnapshotTargetVersion {
        name: String,
        stored: u64,
        fetched: u64,
    },

    #[error("target {0} has no metadata")]
    TargetMetadataMissing(String),

    #[error("target {name} has length {actual} which does not match the declared length {expected}")]
    InvalidTargetLength {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error(
        "computed {algorithm} hash for {name} did not match: expected {expected}, computed {computed}"
    )]
    InvalidHash {
        name: String,
        algorithm: String,
        expected: String,
        computed: String,
    },

    #[error("hash algorithm {0} is not supported")]
    UnsupportedHashAlgorithm(String),

    #[error("metadata {0} was not found in the repository")]
    RoleMissing(String),

    #[error("target {0} was not found in the repository")]
    TargetContentMissing(String),

    #[error("malformed {role} metadata: {reason}")]
    Malformed { role: String, reason: String },

    #[error("TUF key cannot be decoded: {0}")]
    KeyDecode(String),

    #[error("update() must succeed before targets can be fetched")]
    NotInitialized,

    #[error("transport failure fetching {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The fully verified metadata a successful refresh leaves in memory.
/// The corresponding bytes live in the store.
struct TrustedState {
    root: RootMetadata,
    targets: TargetsMetadata,
    /// Verified delegated targets metadata, in delegation order.
    delegated: Vec<(String, TargetsMetadata)>,
}

/// A TUF repository client.
///
/// Construction takes a bootstrap root (embedded or distributed out of
/// band); once the local store holds a trusted root, that one anchors every
/// subsequent refresh instead.
pub struct TufClient<T: MetadataTransport> {
    transport: T,
    store: FileSystemStore,
    bootstrap_root: Vec<u8>,
    clock: fn() -> DateTime<Utc>,
    state: Option<TrustedState>,
}

impl<T: MetadataTransport> TufClient<T> {
    pub fn new(transport: T, store: FileSystemStore, bootstrap_root: Vec<u8>) -> Self {
        Self {
            transport,
            store,
            bootstrap_root,
            clock: Utc::now,
            state: None,
        }
    }

    /// Overrides the time source used for expiry checks.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Brings the local store to the latest consistent state anchored on
    /// the trusted root.
    pub async fn update(&mut self) -> Result<(), TufError> {
        let now = (self.clock)();

        let (root_bytes, root) = self.rotate_root(now).await?;
        let (timestamp_bytes, timestamp) = self.refresh_timestamp(&root, now).await?;
        let (snapshot_bytes, snapshot) =
            self.refresh_snapshot(&root, &timestamp, now).await?;
        let (targets_bytes, targets, delegated) =
            self.refresh_targets(&root, &snapshot, now).await?;

        // Everything verified: persist the new trusted state. Failures
        // before this point leave the store untouched.
        self.store.write_meta("root.json", &root_bytes)?;
        self.store.write_meta("timestamp.json", &timestamp_bytes)?;
        self.store.write_meta("snapshot.json", &snapshot_bytes)?;
        self.store.write_meta("targets.json", &targets_bytes)?;
        for (name, bytes, _) in &delegated {
            self.store.write_meta(&format!("{name}.json"), bytes)?;
        }

        self.state = Some(TrustedState {
            root,
            targets,
            delegated: delegated
                .into_iter()
                .map(|(name, _, targets)| (name, targets))
                .collect(),
        });
        tracing::debug!("refresh complete");
        Ok(())
    }

    /// Returns the bytes of a named target, guaranteed length-exact and
    /// hash-exact per the current targets metadata. Bytes are cached in the
    /// local store keyed by name; nothing is cached on failure.
    pub async fn target_bytes(&self, name: &str) -> Result<Vec<u8>, TufError> {
        let state = self.state.as_ref().ok_or(TufError::NotInitialized)?;

        let target = state
            .targets
            .targets
            .get(name)
            .or_else(|| {
                state
                    .delegated
                    .iter()
                    .find_map(|(_, targets)| targets.targets.get(name))
            })
            .ok_or_else(|| TufError::TargetMetadataMissing(name.to_string()))?;

        if let Some(cached) = self.store.read_target(name)? {
            if cached.len() as u64 == target.length
                && check_hashes(name, &target.hashes, &cached).is_ok()
            {
                tracing::debug!(target_name = name, "serving from disk cache");
                return Ok(cached);
            }
        }

        let fetch_name = if state.root.consistent_snapshot {
            consistent_target_name(name, target)?
        } else {
            name.to_string()
        };
        let bytes = self
            .transport
            .fetch_target(&fetch_name)
            .await?
            .ok_or_else(|| TufError::TargetContentMissing(name.to_string()))?;

        check_length(name, target.length, bytes.len())?;
        check_hashes(name, &target.hashes, &bytes)?;

        self.store.write_target(name, &bytes)?;
        Ok(bytes)
    }

    /// Phase `RootRotating`: load the trusted root, then walk
    /// `{N+1}.root.json` until the repository runs out of newer versions.
    async fn rotate_root(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(Vec<u8>, RootMetadata), TufError> {
        let mut root_bytes = match self.store.read_meta("root.json")? {
            Some(bytes) => bytes,
            None => self.bootstrap_root.clone(),
        };
        let mut signed = SignedMetadata::from_bytes(ROOT, &root_bytes)?;
        let mut root: RootMetadata = signed.parse_payload(ROOT)?;
        check_type(ROOT, ROOT, &root.metadata_type)?;

        // The trusted root must be valid under its own keys before it can
        // anchor anything.
        verify_role_signatures(
            ROOT,
            &signed.canonical_signed_bytes(ROOT)?,
            &signed.signatures,
            &root.keys,
            root.role(ROOT)?,
        )?;

        loop {
            let next_version = root.version + 1;
            let name = format!("{next_version}.root.json");
            let Some(bytes) = self.transport.fetch_meta(&name).await? else {
                break;
            };
            tracing::debug!(version = next_version, "rotating root");

            let next_signed = SignedMetadata::from_bytes(ROOT, &bytes)?;
            let next_root: RootMetadata = next_signed.parse_payload(ROOT)?;
            check_type(ROOT, ROOT, &next_root.metadata_type)?;
            let canonical = next_signed.canonical_signed_bytes(ROOT)?;

            // A new root must verify under the previous root's keys and
            // under its own, so a rotation can neither bypass the old
            // quorum nor ship a root that cannot sustain itself.
            verify_role_signatures(
                ROOT,
                &canonical,
                &next_signed.signatures,
                &root.keys,
                root.role(ROOT)?,
            )?;
            verify_role_signatures(
                ROOT,
                &canonical,
                &next_signed.signatures,
                &next_root.keys,
                next_root.role(ROOT)?,
            )?;

            if next_root.version != next_version {
                return Err(TufError::VersionMismatch {
                    role: ROOT.into(),
                    expected: next_version,
                    actual: next_root.version,
                });
            }

            root_bytes = bytes;
            signed = next_signed;
            root = next_root;
        }

        check_freshness(ROOT, root.expires, now)?;
        Ok((root_bytes, root))
    }

    /// Phase `TimestampVerifying`.
    async fn refresh_timestamp(
        &self,
        root: &RootMetadata,
        now: DateTime<Utc>,
    ) -> Result<(Vec<u8>, TimestampMetadata), TufError> {
        let bytes = self.fetch_required_meta("timestamp.json").await?;
        let signed = SignedMetadata::from_bytes(TIMESTAMP, &bytes)?;
        let timestamp: TimestampMetadata = signed.parse_payload(TIMESTAMP)?;
        check_type(TIMESTAMP, TIMESTAMP, &timestamp.metadata_type)?;

        verify_role_signatures(
            TIMESTAMP,
            &signed.canonical_signed_bytes(TIMESTAMP)?,
            &signed.signatures,
            &root.keys,
            root.role(TIMESTAMP)?,
        )?;

        if let Some(stored_bytes) = self.store.read_meta("timestamp.json")? {
            if let Ok(stored) = SignedMetadata::from_bytes(TIMESTAMP, &stored_bytes)
                .and_then(|s| s.parse_payload::<TimestampMetadata>(TIMESTAMP))
            {
                if timestamp.version < stored.version {
                    return Err(TufError::RollbackVersion {
                        role: TIMESTAMP.into(),
                        stored: stored.version,
                        fetched: timestamp.version,
                    });
                }
                // Equal versions must be the same bytes; two distinct
                // documents at one version is a rolled-back or forked log.
                if timestamp.version == stored.version && bytes != stored_bytes {
                    return Err(TufError::RollbackVersion {
                        role: TIMESTAMP.into(),
                        stored: stored.version,
                        fetched: timestamp.version,
                    });
                }
            }
        }

        check_freshness(TIMESTAMP, timestamp.expires, now)?;
        Ok((bytes, timestamp))
    }

    /// Phase `SnapshotVerifying`.
    async fn refresh_snapshot(
        &self,
        root: &RootMetadata,
        timestamp: &TimestampMetadata,
        now: DateTime<Utc>,
    ) -> Result<(Vec<u8>, SnapshotMetadata), TufError> {
        let declared = timestamp.snapshot_meta()?;
        let name = if root.consistent_snapshot {
            format!("{}.snapshot.json", declared.version)
        } else {
            "snapshot.json".to_string()
        };

        let bytes = self.fetch_required_meta(&name).await?;
        check_meta_constraints("snapshot.json", declared, &bytes)?;

        let signed = SignedMetadata::from_bytes(SNAPSHOT, &bytes)?;
        let snapshot: SnapshotMetadata = signed.parse_payload(SNAPSHOT)?;
        check_type(SNAPSHOT, SNAPSHOT, &snapshot.metadata_type)?;

        verify_role_signatures(
            SNAPSHOT,
            &signed.canonical_signed_bytes(SNAPSHOT)?,
            &signed.signatures,
            &root.keys,
            root.role(SNAPSHOT)?,
        )?;

        if snapshot.version != declared.version {
            return Err(TufError::VersionMismatch {
                role: SNAPSHOT.into(),
                expected: declared.version,
                actual: snapshot.version,
            });
        }

        // No tracked targets metadata may disappear or move backwards
        // relative to the currently trusted snapshot.
        if let Some(stored_bytes) = self.store.read_meta("snapshot.json")? {
            if let Ok(stored) = SignedMetadata::from_bytes(SNAPSHOT, &stored_bytes)
                .and_then(|s| s.parse_payload::<SnapshotMetadata>(SNAPSHOT))
            {
                for (name, stored_meta) in &stored.meta {
                    match snapshot.meta.get(name) {
                        None => {
                            return Err(TufError::SnapshotTargetMissing { name: name.clone() })
                        }
                        Some(new_meta) if new_meta.version < stored_meta.version => {
                            return Err(TufError::SnapshotTargetVersion {
                                name: name.clone(),
                                stored: stored_meta.version,
                                fetched: new_meta.version,
                            });
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        check_freshness(SNAPSHOT, snapshot.expires, now)?;
        Ok((bytes, snapshot))
    }

    /// Phase `TargetsVerifying`, including any delegated roles the snapshot
    /// tracks.
    async fn refresh_targets(
        &self,
        root: &RootMetadata,
        snapshot: &SnapshotMetadata,
        now: DateTime<Utc>,
    ) -> Result<(Vec<u8>, TargetsMetadata, Vec<(String, Vec<u8>, TargetsMetadata)>), TufError>
    {
        let declared = snapshot.targets_meta()?;
        let name = if root.consistent_snapshot {
            format!("{}.targets.json", declared.version)
        } else {
            "targets.json".to_string()
        };

        let bytes = self.fetch_required_meta(&name).await?;
        check_meta_constraints("targets.json", declared, &bytes)?;

        let signed = SignedMetadata::from_bytes(TARGETS, &bytes)?;
        let targets: TargetsMetadata = signed.parse_payload(TARGETS)?;
        check_type(TARGETS, TARGETS, &targets.metadata_type)?;

        verify_role_signatures(
            TARGETS,
            &signed.canonical_signed_bytes(TARGETS)?,
            &signed.signatures,
            &root.keys,
            root.role(TARGETS)?,
        )?;

        if targets.version != declared.version {
            return Err(TufError::VersionMismatch {
                role: TARGETS.into(),
                expected: declared.version,
                actual: targets.version,
            });
        }
        check_freshness(TARGETS, targets.expires, now)?;

        let mut delegated = Vec::new();
        if let Some(delegations) = &targets.delegations {
            for role in &delegations.roles {
                let meta_name = format!("{}.json", role.name);
                let Some(tracked) = snapshot.meta.get(&meta_name) else {
                    tracing::debug!(role = %role.name, "delegated role not tracked by snapshot");
                    continue;
                };

                let fetch_name = if root.consistent_snapshot {
                    format!("{}.{meta_name}", tracked.version)
                } else {
                    meta_name.clone()
                };
                let role_bytes = self.fetch_required_meta(&fetch_name).await?;
                check_meta_constraints(&meta_name, tracked, &role_bytes)?;

                let role_signed = SignedMetadata::from_bytes(&role.name, &role_bytes)?;
                let role_targets: TargetsMetadata = role_signed.parse_payload(&role.name)?;
                check_type(&role.name, TARGETS, &role_targets.metadata_type)?;

                verify_role_signatures(
                    &role.name,
                    &role_signed.canonical_signed_bytes(&role.name)?,
                    &role_signed.signatures,
                    &delegations.keys,
                    &metadata::RoleKeys {
                        keyids: role.keyids.clone(),
                        threshold: role.threshold,
                    },
                )?;

                if role_targets.version != tracked.version {
                    return Err(TufError::VersionMismatch {
                        role: role.name.clone(),
                        expected: tracked.version,
                        actual: role_targets.version,
                    });
                }
                check_freshness(&role.name, role_targets.expires, now)?;

                delegated.push((role.name.clone(), role_bytes, role_targets));
            }
        }

        Ok((bytes, targets, delegated))
    }

    async fn fetch_required_meta(&self, name: &str) -> Result<Vec<u8>, TufError> {
        self.transport
            .fetch_meta(name)
            .await?
            .ok_or_else(|| TufError::RoleMissing(name.to_string()))
    }
}

/// The repository path of a target under consistent snapshots:
/// `dir/<sha256>.<basename>`.
fn consistent_target_name(name: &str, target: &TargetFile) -> Result<String, TufError> {
    let digest = target
        .hashes
        .get("sha256")
        .ok_or_else(|| TufError::UnsupportedHashAlgorithm("sha256 digest missing".into()))?;
    Ok(match name.rsplit_once('/') {
        Some((dir, base)) => format!("{dir}/{digest}.{base}"),
        None => format!("{digest}.{name}"),
    })
}
