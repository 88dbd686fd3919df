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

//! TUF 1.0 role metadata: wire types, canonical signing bytes, and
//! threshold signature verification.
//!
//! Every role file is a JSON document `{signatures, signed}`. Signatures
//! are computed over the canonical JSON serialization of the `signed`
//! object, so that object is kept as a raw [`serde_json::Value`] alongside
//! its typed parse: re-serializing a typed struct would silently drop
//! fields unknown to this implementation and break signature checks.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};

use super::TufError;
use crate::canonical_json;
use crate::crypto::VerificationKey;

pub(crate) const ROOT: &str = "root";
pub(crate) const TIMESTAMP: &str = "timestamp";
pub(crate) const SNAPSHOT: &str = "snapshot";
pub(crate) const TARGETS: &str = "targets";

/// A role file as fetched from the repository: signatures plus the raw
/// `signed` object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignedMetadata {
    pub signatures: Vec<Signature>,
    pub signed: Value,
}

impl SignedMetadata {
    pub fn from_bytes(role: &str, bytes: &[u8]) -> Result<Self, TufError> {
        serde_json::from_slice(bytes).map_err(|e| TufError::Malformed {
            role: role.to_string(),
            reason: e.to_string(),
        })
    }

    /// The canonical bytes signatures are computed over.
    pub fn canonical_signed_bytes(&self, role: &str) -> Result<Vec<u8>, TufError> {
        canonical_json::to_canonical_bytes(&self.signed).map_err(|e| TufError::Malformed {
            role: role.to_string(),
            reason: e.to_string(),
        })
    }

    /// Parses the `signed` object into a typed role payload. Unknown fields
    /// are ignored.
    pub fn parse_payload<T: DeserializeOwned>(&self, role: &str) -> Result<T, TufError> {
        serde_json::from_value(self.signed.clone()).map_err(|e| TufError::Malformed {
            role: role.to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Signature {
    pub keyid: String,
    /// Hex-encoded signature bytes.
    pub sig: String,
}

/// A public key entry from a `keys` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Key {
    pub scheme: String,
    pub keyval: KeyVal,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyVal {
    pub public: String,
}

impl Key {
    /// Decodes the key material and constructs a verification key for the
    /// declared scheme. PEM and hex encodings are both in circulation.
    pub fn verification_key(&self) -> Result<VerificationKey, TufError> {
        let material = if self.keyval.public.trim_start().starts_with("-----BEGIN") {
            let section = pem::parse(self.keyval.public.as_bytes())
                .map_err(|e| TufError::KeyDecode(e.to_string()))?;
            section.contents().to_vec()
        } else {
            hex::decode(self.keyval.public.trim())
                .map_err(|e| TufError::KeyDecode(e.to_string()))?
        };

        VerificationKey::from_tuf_key(&material, &self.scheme)
            .map_err(|e| TufError::KeyDecode(e.to_string()))
    }
}

/// Key ids and threshold for one role.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoleKeys {
    pub keyids: Vec<String>,
    pub threshold: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootMetadata {
    #[serde(rename = "_type")]
    pub metadata_type: String,
    #[serde(default)]
    pub consistent_snapshot: bool,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub keys: HashMap<String, Key>,
    pub roles: HashMap<String, RoleKeys>,
}

impl RootMetadata {
    pub fn role(&self, name: &str) -> Result<&RoleKeys, TufError> {
        self.roles.get(name).ok_or_else(|| TufError::Malformed {
            role: ROOT.into(),
            reason: format!("no key delegation for role {name}"),
        })
    }
}

/// Version, and optionally length and hashes, of another metadata file.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaFile {
    pub version: u64,
    pub length: Option<u64>,
    pub hashes: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimestampMetadata {
    #[serde(rename = "_type")]
    pub metadata_type: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: HashMap<String, MetaFile>,
}

impl TimestampMetadata {
    pub fn snapshot_meta(&self) -> Result<&MetaFile, TufError> {
        self.meta
            .get("snapshot.json")
            .ok_or_else(|| TufError::Malformed {
                role: TIMESTAMP.into(),
                reason: "timestamp does not name snapshot.json".into(),
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotMetadata {
    #[serde(rename = "_type")]
    pub metadata_type: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: HashMap<String, MetaFile>,
}

impl SnapshotMetadata {
    pub fn targets_meta(&self) -> Result<&MetaFile, TufError> {
        self.meta
            .get("targets.json")
            .ok_or_else(|| TufError::Malformed {
                role: SNAPSHOT.into(),
                reason: "snapshot does not name targets.json".into(),
            })
    }
}

/// A named target file: exact length plus one digest per declared
/// algorithm, all of which must match.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetFile {
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelegatedRole {
    pub name: String,
    pub keyids: Vec<String>,
    pub threshold: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Delegations {
    pub keys: HashMap<String, Key>,
    pub roles: Vec<DelegatedRole>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetsMetadata {
    #[serde(rename = "_type")]
    pub metadata_type: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub targets: BTreeMap<String, TargetFile>,
    #[serde(default)]
    pub delegations: Option<Delegations>,
}

/// Counts valid signatures from the role's authorized keys over
/// `canonical` and enforces the role threshold.
///
/// Each authorized key gets at most one vote; signatures from keys outside
/// the role are ignored.
pub(crate) fn verify_role_signatures(
    role_name: &str,
    canonical: &[u8],
    signatures: &[Signature],
    keys: &HashMap<String, Key>,
    role: &RoleKeys,
) -> Result<(), TufError> {
    let mut satisfied: Vec<&str> = Vec::new();

    for signature in signatures {
        if !role.keyids.iter().any(|id| id == &signature.keyid) {
            continue;
        }
        if satisfied.iter().any(|id| *id == signature.keyid) {
            continue;
        }
        let Some(key) = keys.get(&signature.keyid) else {
            continue;
        };
        let Ok(verification_key) = key.verification_key() else {
            tracing::warn!(keyid = %signature.keyid, "skipping undecodable key");
            continue;
        };
        let Ok(raw) = hex::decode(&signature.sig) else {
            continue;
        };
        if verification_key.verify_signature(&raw, canonical).is_ok() {
            satisfied.push(&signature.keyid);
        } else {
            tracing::debug!(keyid = %signature.keyid, role = role_name, "signature did not verify");
        }
    }

    let valid = satisfied.len() as u32;
    if valid < role.threshold {
        return Err(TufError::SignatureThresholdNotMet {
            role: role_name.to_string(),
            required: role.threshold,
            valid,
        });
    }
    Ok(())
}

/// Rejects metadata whose expiry is not strictly in the future.
pub(crate) fn check_freshness(
    role: &str,
    expires: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), TufError> {
    if expires <= now {
        return Err(TufError::ExpiredMetadata {
            role: role.to_string(),
            expired_at: expires,
        });
    }
    Ok(())
}

/// Rejects metadata whose declared `_type` does not match the role being
/// verified.
pub(crate) fn check_type(role: &str, expected: &str, actual: &str) -> Result<(), TufError> {
    if expected != actual {
        return Err(TufError::Malformed {
            role: role.to_string(),
            reason: format!("declared type {actual} does not match role {expected}"),
        });
    }
    Ok(())
}

/// Checks `data` against an exact declared length.
pub(crate) fn check_length(name: &str, expected: u64, actual: usize) -> Result<(), TufError> {
    if actual as u64 != expected {
        return Err(TufError::InvalidTargetLength {
            name: name.to_string(),
            expected,
            actual: actual as u64,
        });
    }
    Ok(())
}

/// Checks `data` against every declared digest.
pub(crate) fn check_hashes(
    name: &str,
    hashes: &BTreeMap<String, String>,
    data: &[u8],
) -> Result<(), TufError> {
    for (algorithm, expected) in hashes {
        let computed = match algorithm.as_str() {
            "sha256" => hex::encode(Sha256::digest(data)),
            "sha512" => hex::encode(Sha512::digest(data)),
            other => return Err(TufError::UnsupportedHashAlgorithm(other.to_string())),
        };
        if &computed != expected {
            return Err(TufError::InvalidHash {
                name: name.to_string(),
                algorithm: algorithm.clone(),
                expected: expected.clone(),
                computed,
            });
        }
    }
    Ok(())
}

/// Checks optional metadata constraints (length and hashes) declared by a
/// referring role.
pub(crate) fn check_meta_constraints(
    name: &str,
    meta: &MetaFile,
    data: &[u8],
) -> Result<(), TufError> {
    if let Some(length) = meta.length {
        check_length(name, length, data.len())?;
    }
    if let Some(hashes) = &meta.hashes {
        check_hashes(name, hashes, data)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_are_ignored() {
        let doc = json!({
            "signatures": [],
            "signed": {
                "_type": "timestamp",
                "spec_version": "1.0",
                "version": 3,
                "expires": "2035-01-01T00:00:00Z",
                "meta": {"snapshot.json": {"version": 7}},
                "x-custom-extension": {"ignored": true},
            }
        });
        let signed =
            SignedMetadata::from_bytes(TIMESTAMP, doc.to_string().as_bytes()).unwrap();
        let payload: TimestampMetadata = signed.parse_payload(TIMESTAMP).unwrap();
        assert_eq!(payload.version, 3);
        assert_eq!(payload.snapshot_meta().unwrap().version, 7);

        // The raw value retains the unknown field for canonical signing.
        let canonical = signed.canonical_signed_bytes(TIMESTAMP).unwrap();
        assert!(String::from_utf8(canonical)
            .unwrap()
            .contains("x-custom-extension"));
    }

    #[test]
    fn hash_checks_cover_every_declared_algorithm() {
        let data = b"target contents";
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), hex::encode(Sha256::digest(data)));
        hashes.insert("sha512".to_string(), hex::encode(Sha512::digest(data)));
        check_hashes("t", &hashes, data).unwrap();

        hashes.insert("sha512".to_string(), "00".repeat(64));
        let err = check_hashes("t", &hashes, data).unwrap_err();
        assert!(matches!(err, TufError::InvalidHash { ref algorithm, .. } if algorithm == "sha512"));
    }

    #[test]
    fn unknown_hash_algorithm_is_rejected() {
        let mut hashes = BTreeMap::new();
        hashes.insert("md5".to_string(), "00".into());
        assert!(matches!(
            check_hashes("t", &hashes, b"x").unwrap_err(),
            TufError::UnsupportedHashAlgorithm(_)
        ));
    }

    #[test]
    fn freshness_is_strict() {
        let now = Utc::now();
        assert!(check_freshness(ROOT, now, now).is_err());
        assert!(check_freshness(ROOT, now + chrono::TimeDelta::seconds(1), now).is_ok());
    }
}
