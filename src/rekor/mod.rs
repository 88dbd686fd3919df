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

//! Client for the transparency log: uploads entries and verifies what the
//! log returns (signed entry timestamp and inclusion proof) before a
//! bundle is considered anchored.

pub mod models;

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as base64_std;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::canonical_json;
use crate::crypto::{merkle, ArtifactDigest, VerificationKey};
use crate::errors::{Result, SigstoreError};
use crate::trust::TrustRoot;
use models::{checkpoint_root_hash, hashedrekord, LogEntry, ProposedEntry};

/// Default public transparency log root URL.
pub const REKOR_ROOT: &str = "https://rekor.sigstore.dev/";

const ENTRIES_PATH: &str = "api/v1/log/entries";

/// Bounded retry for submissions that fail with transport errors or 5xx.
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum RekorError {
    #[error("log entry submission failed with status {status}: {body}")]
    SubmissionFailed { status: u16, body: String },

    #[error("malformed transparency log response: {0}")]
    MalformedResponse(String),

    #[error("inclusion proof does not verify: {0}")]
    InclusionProofInvalid(String),

    #[error("signed entry timestamp does not verify")]
    SETInvalid,

    #[error("no transparency log key for log id {log_id} at {timestamp}")]
    UnknownLog { log_id: String, timestamp: String },
}

/// Builds a hashedrekord entry for a detached signature over a digest.
pub fn proposed_hashedrekord(
    cert_pem: &str,
    digest: &ArtifactDigest,
    signature: &[u8],
) -> ProposedEntry {
    ProposedEntry::Hashedrekord {
        api_version: hashedrekord::API_VERSION.into(),
        spec: hashedrekord::Spec {
            signature: hashedrekord::Signature {
                content: base64_std.encode(signature),
                public_key: hashedrekord::PublicKey {
                    content: base64_std.encode(cert_pem.as_bytes()),
                },
            },
            data: hashedrekord::Data {
                hash: hashedrekord::Hash {
                    algorithm: hashedrekord::AlgorithmKind::sha256,
                    value: digest.to_hex(),
                },
            },
        },
    }
}

/// The UUID the log derives for an entry: the RFC 6962 leaf hash of the
/// canonical body, hex-encoded.
pub fn entry_uuid(proposed: &ProposedEntry) -> Result<String> {
    let body = serde_json::to_value(proposed)?;
    let canonical = canonical_json::to_canonical_bytes(&body)?;
    Ok(hex::encode(merkle::hash_leaf(canonical)))
}

/// Client for a transparency log instance.
pub struct RekorClient {
    root_url: Url,
    client: reqwest::Client,
}

impl RekorClient {
    pub fn new(root_url: Url, client: reqwest::Client) -> Self {
        Self { root_url, client }
    }

    /// Uploads a proposed entry and returns the integrated record.
    ///
    /// A 409 means the log already holds this entry; that is treated as
    /// success and the pre-existing record is fetched by its UUID.
    /// Transport failures and 5xx responses are retried with exponential
    /// backoff, at most three attempts; every other failure surfaces
    /// immediately.
    pub async fn create_entry(&self, proposed: &ProposedEntry) -> Result<LogEntry> {
        let url = self.root_url.join(ENTRIES_PATH)?;
        let mut backoff = INITIAL_BACKOFF;
        let mut last_error: Option<SigstoreError> = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            let response = match self.client.post(url.clone()).json(proposed).send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(attempt, "log submission transport failure: {e}");
                    last_error = Some(e.into());
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::CONFLICT {
                let uuid = entry_uuid(proposed)?;
                tracing::debug!(%uuid, "entry already present in the log");
                return self.get_entry(&uuid).await;
            }
            if status.is_success() {
                let body = response
                    .text()
                    .await
                    .map_err(|e| RekorError::MalformedResponse(e.to_string()))?;
                return parse_entry_response(&body);
            }

            let body = response.text().await.unwrap_or_default();
            let error = RekorError::SubmissionFailed {
                status: status.as_u16(),
                body,
            };
            if status.is_server_error() {
                tracing::debug!(attempt, %status, "log submission failed, will retry");
                last_error = Some(error.into());
                continue;
            }
            return Err(error.into());
        }

        Err(last_error.unwrap_or_else(|| {
            RekorError::SubmissionFailed {
                status: 0,
                body: "retries exhausted".into(),
            }
            .into()
        }))
    }

    /// Fetches an integrated entry by UUID.
    pub async fn get_entry(&self, uuid: &str) -> Result<LogEntry> {
        let url = self.root_url.join(&format!("{ENTRIES_PATH}/{uuid}"))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SigstoreError::RekorClientError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RekorError::SubmissionFailed {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        let body = response
            .text()
            .await
            .map_err(|e| RekorError::MalformedResponse(e.to_string()))?;
        parse_entry_response(&body)
    }
}

/// Parses the `{uuid: entry}` response shape the log returns for both
/// creations and lookups.
fn parse_entry_response(body: &str) -> Result<LogEntry> {
    let entries: HashMap<String, LogEntry> = serde_json::from_str(body)
        .map_err(|e| RekorError::MalformedResponse(e.to_string()))?;

    let (uuid, mut entry) = entries
        .into_iter()
        .next()
        .ok_or_else(|| RekorError::MalformedResponse("response holds no entry".into()))?;
    entry.uuid = uuid;
    Ok(entry)
}

/// Verifies everything the log returned for an entry: the signed entry
/// timestamp against the trust root's log key, and the inclusion proof
/// against the declared tree head.
pub fn verify_entry(entry: &LogEntry, trust_root: &TrustRoot) -> Result<()> {
    verify_signed_entry_timestamp(entry, trust_root)?;
    verify_inclusion_proof(entry)?;
    Ok(())
}

/// Checks the log's signature over (body, integratedTime, logID, logIndex),
/// using the trust-root log key valid at the integration time.
pub fn verify_signed_entry_timestamp(entry: &LogEntry, trust_root: &TrustRoot) -> Result<()> {
    let log_id = hex::decode(&entry.log_id)
        .map_err(|_| RekorError::MalformedResponse("logID is not hex".into()))?;
    let integrated_time = DateTime::<Utc>::from_timestamp(entry.integrated_time, 0)
        .ok_or_else(|| RekorError::MalformedResponse("integratedTime out of range".into()))?;

    let tlog = trust_root
        .tlog(&log_id, integrated_time)
        .ok_or_else(|| RekorError::UnknownLog {
            log_id: entry.log_id.clone(),
            timestamp: integrated_time.to_rfc3339(),
        })?;
    let key = VerificationKey::from_spki_der(&tlog.public_key)?;

    let payload = json!({
        "body": entry.body,
        "integratedTime": entry.integrated_time,
        "logID": entry.log_id,
        "logIndex": entry.log_index,
    });
    let canonical = canonical_json::to_canonical_bytes(&payload)?;

    let signature = base64_std
        .decode(&entry.verification.signed_entry_timestamp)
        .map_err(|_| RekorError::MalformedResponse("SET is not base64".into()))?;

    key.verify_signature(&signature, &canonical)
        .map_err(|_| RekorError::SETInvalid)?;
    Ok(())
}

/// Recomputes the tree root from the entry's leaf hash and audit path and
/// compares it with the declared root (and the checkpoint's, when one is
/// attached).
pub fn verify_inclusion_proof(entry: &LogEntry) -> Result<()> {
    let proof = entry
        .verification
        .inclusion_proof
        .as_ref()
        .ok_or_else(|| RekorError::InclusionProofInvalid("no inclusion proof".into()))?;

    let leaf_hash = merkle::hash_leaf(entry.decode_body()?);

    let root_hash: [u8; 32] = hex::decode(&proof.root_hash)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| {
            RekorError::MalformedResponse("root hash is not a 32 byte hex string".into())
        })?;
    let hashes = proof
        .hashes
        .iter()
        .map(|h| {
            hex::decode(h)
                .ok()
                .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
                .ok_or_else(|| {
                    RekorError::MalformedResponse("audit path hash is not 32 byte hex".into())
                })
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    merkle::verify_inclusion(
        proof.log_index as u64,
        &leaf_hash,
        proof.tree_size as u64,
        &hashes,
        &root_hash,
    )
    .map_err(|e| RekorError::InclusionProofInvalid(e.to_string()))?;

    if let Some(checkpoint) = &proof.checkpoint {
        let checkpoint_root = checkpoint_root_hash(checkpoint)?;
        if checkpoint_root != root_hash {
            return Err(RekorError::InclusionProofInvalid(
                "checkpoint root does not match the proof root".into(),
            )
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EphemeralKeyPair;
    use models::{InclusionProof, Verification};
    use prost_types::Timestamp;
    use sha2::Digest;
    use sigstore_protobuf_specs::dev::sigstore::common::v1::{LogId, PublicKey, TimeRange};
    use sigstore_protobuf_specs::dev::sigstore::trustroot::v1::{
        TransparencyLogInstance, TrustedRoot,
    };

    fn trust_root_with_log(key_der: &[u8]) -> (TrustRoot, String) {
        let log_id: [u8; 32] = sha2::Sha256::digest(key_der).into();
        let proto = TrustedRoot {
            tlogs: vec![TransparencyLogInstance {
                base_url: "https://rekor.test".into(),
                hash_algorithm: 1,
                public_key: Some(PublicKey {
                    raw_bytes: Some(key_der.to_vec()),
                    key_details: 5,
                    valid_for: Some(TimeRange {
                        start: Some(Timestamp {
                            seconds: 0,
                            nanos: 0,
                        }),
                        end: None,
                    }),
                }),
                log_id: Some(LogId {
                    key_id: log_id.to_vec(),
                }),
                ..Default::default()
            }],
            ..Default::default()
        };
        (
            TrustRoot::from_proto(&proto).unwrap(),
            hex::encode(log_id),
        )
    }

    fn set_payload(entry: &LogEntry) -> Vec<u8> {
        let payload = json!({
            "body": entry.body,
            "integratedTime": entry.integrated_time,
            "logID": entry.log_id,
            "logIndex": entry.log_index,
        });
        canonical_json::to_canonical_bytes(&payload).unwrap()
    }

    #[test]
    fn entry_uuid_is_the_leaf_hash_of_the_canonical_body() {
        let digest = ArtifactDigest::sha256(b"hello");
        let proposed = proposed_hashedrekord("-----BEGIN CERTIFICATE-----", &digest, b"sig");

        let uuid = entry_uuid(&proposed).unwrap();
        let canonical = canonical_json::to_canonical_bytes(
            &serde_json::to_value(&proposed).unwrap(),
        )
        .unwrap();
        assert_eq!(uuid, hex::encode(merkle::hash_leaf(canonical)));
        // Deterministic across calls.
        assert_eq!(uuid, entry_uuid(&proposed).unwrap());
    }

    #[test]
    fn parse_entry_response_keyed_by_uuid() {
        let body = serde_json::json!({
            "24296fb24b8ad77a": {
                "body": base64_std.encode(b"{}"),
                "integratedTime": 1656448131,
                "logID": "c0d23d6ad406973f9559f3ba2d1ca01f84147d8ffc5b8445c224f98b9591801d",
                "logIndex": 1688,
                "verification": {
                    "signedEntryTimestamp": base64_std.encode(b"sig"),
                },
            },
        })
        .to_string();

        let entry = parse_entry_response(&body).unwrap();
        assert_eq!(entry.uuid, "24296fb24b8ad77a");
        assert_eq!(entry.log_index, 1688);
        assert!(entry.verification.inclusion_proof.is_none());

        assert!(parse_entry_response("{}").is_err());
        assert!(parse_entry_response("[]").is_err());
    }

    #[test]
    fn set_round_trip() {
        let log_key = EphemeralKeyPair::generate();
        let key_der = log_key.public_key_to_der().unwrap();
        let (trust_root, log_id_hex) = trust_root_with_log(&key_der);

        let mut entry = LogEntry {
            uuid: "u".into(),
            body: base64_std.encode(b"entry body"),
            integrated_time: Utc::now().timestamp(),
            log_id: log_id_hex,
            log_index: 42,
            verification: Verification {
                inclusion_proof: None,
                signed_entry_timestamp: String::new(),
            },
        };
        let set = log_key.sign(&set_payload(&entry));
        entry.verification.signed_entry_timestamp = base64_std.encode(set);

        verify_signed_entry_timestamp(&entry, &trust_root).unwrap();

        // Any field change invalidates the SET.
        entry.log_index += 1;
        let err = verify_signed_entry_timestamp(&entry, &trust_root).unwrap_err();
        assert!(matches!(
            err,
            SigstoreError::RekorError(RekorError::SETInvalid)
        ));
    }

    #[test]
    fn set_requires_a_known_log() {
        let log_key = EphemeralKeyPair::generate();
        let key_der = log_key.public_key_to_der().unwrap();
        let (trust_root, _) = trust_root_with_log(&key_der);

        let entry = LogEntry {
            uuid: "u".into(),
            body: base64_std.encode(b"entry body"),
            integrated_time: Utc::now().timestamp(),
            log_id: "ab".repeat(32),
            log_index: 1,
            verification: Verification {
                inclusion_proof: None,
                signed_entry_timestamp: base64_std.encode(b"sig"),
            },
        };
        assert!(matches!(
            verify_signed_entry_timestamp(&entry, &trust_root).unwrap_err(),
            SigstoreError::RekorError(RekorError::UnknownLog { .. })
        ));
    }

    #[test]
    fn inclusion_proof_round_trip() {
        // A three-leaf tree with the entry at index 1.
        let body = b"{\"spec\":\"entry\"}";
        let leaves: Vec<[u8; 32]> = [b"l0".as_slice(), body.as_slice(), b"l2".as_slice()]
            .iter()
            .map(merkle::hash_leaf)
            .collect();
        let root = merkle::hash_children(
            merkle::hash_children(leaves[0], leaves[1]),
            leaves[2],
        );
        let checkpoint = format!(
            "rekor.test - 123\n3\n{}\n\n— rekor.test c2ln\n",
            base64_std.encode(root)
        );

        let entry = LogEntry {
            uuid: "u".into(),
            body: base64_std.encode(body),
            integrated_time: 0,
            log_id: "00".repeat(32),
            log_index: 9000,
            verification: Verification {
                inclusion_proof: Some(InclusionProof {
                    hashes: vec![hex::encode(leaves[0]), hex::encode(leaves[2])],
                    log_index: 1,
                    root_hash: hex::encode(root),
                    tree_size: 3,
                    checkpoint: Some(checkpoint),
                }),
                signed_entry_timestamp: String::new(),
            },
        };
        verify_inclusion_proof(&entry).unwrap();

        // Tampered root.
        let mut tampered = entry.clone();
        tampered
            .verification
            .inclusion_proof
            .as_mut()
            .unwrap()
            .root_hash = "11".repeat(32);
        assert!(verify_inclusion_proof(&tampered).is_err());

        // Checkpoint disagreeing with the proof root.
        let mut tampered = entry.clone();
        tampered
            .verification
            .inclusion_proof
            .as_mut()
            .unwrap()
            .checkpoint = Some(format!(
            "rekor.test - 123\n3\n{}\n\n— rekor.test c2ln\n",
            base64_std.encode([9u8; 32])
        ));
        assert!(verify_inclusion_proof(&tampered).is_err());

        // Entry without a proof at all.
        let mut missing = entry;
        missing.verification.inclusion_proof = None;
        assert!(matches!(
            verify_inclusion_proof(&missing).unwrap_err(),
            SigstoreError::RekorError(RekorError::InclusionProofInvalid(_))
        ));
    }
}
