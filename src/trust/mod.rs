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

//! The trust root: the set of certificate authorities and transparency logs
//! a signer considers authoritative.
//!
//! The wire format is the protobuf `TrustedRoot` message distributed through
//! the TUF repository as `trusted_root.json`. This module turns the parsed
//! message into an immutable domain model with validity window lookups.
//! The set is small (at most a few dozen entries), so every lookup is a
//! linear scan, first match wins.

use chrono::{DateTime, TimeZone, Utc};
use sigstore_protobuf_specs::dev::sigstore::common::v1::TimeRange;
use sigstore_protobuf_specs::dev::sigstore::trustroot::v1::{
    CertificateAuthority as ProtoCertificateAuthority, TransparencyLogInstance, TrustedRoot,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrustRootError {
    #[error("trust root entry is missing required field {0}")]
    MissingField(&'static str),

    #[error("trust root entry carries an unrepresentable timestamp")]
    MalformedTimestamp,

    #[error("trust root contains no current {kind}")]
    NoCurrentEntry { kind: &'static str },

    #[error("trust root contains {count} current {kind} entries, expected exactly one")]
    MultipleCurrentEntries { kind: &'static str, count: usize },

    #[error("certificate authority carries an empty certificate chain")]
    EmptyCertificateChain,

    #[error("malformed trusted root document: {0}")]
    Malformed(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, TrustRootError>;

/// The period during which a key or CA may be used.
///
/// A window with no end is "current". A point in time `t` matches iff
/// `start <= t` and (`end` is absent or `t <= end`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl ValidityWindow {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && self.end.map_or(true, |end| t <= end)
    }

    pub fn is_current(&self) -> bool {
        self.end.is_none()
    }

    fn from_proto(range: Option<&TimeRange>, field: &'static str) -> Result<Self> {
        let range = range.ok_or(TrustRootError::MissingField(field))?;
        let start = range
            .start
            .as_ref()
            .ok_or(TrustRootError::MissingField(field))?;
        let start = Utc
            .timestamp_opt(start.seconds, start.nanos as u32)
            .single()
            .ok_or(TrustRootError::MalformedTimestamp)?;
        let end = range
            .end
            .as_ref()
            .map(|end| {
                Utc.timestamp_opt(end.seconds, end.nanos as u32)
                    .single()
                    .ok_or(TrustRootError::MalformedTimestamp)
            })
            .transpose()?;
        Ok(ValidityWindow { start, end })
    }
}

/// A transparency log instance: either a binary transparency log or a
/// certificate transparency log.
#[derive(Debug, Clone)]
pub struct TransparencyLog {
    pub base_url: String,
    /// Opaque log id, in practice the SHA-256 of the log's DER-encoded key.
    pub log_id: Vec<u8>,
    /// DER-encoded SubjectPublicKeyInfo of the log's signing key.
    pub public_key: Vec<u8>,
    pub valid_for: ValidityWindow,
}

impl TransparencyLog {
    fn from_proto(proto: &TransparencyLogInstance) -> Result<Self> {
        let key = proto
            .public_key
            .as_ref()
            .ok_or(TrustRootError::MissingField("public_key"))?;
        Ok(TransparencyLog {
            base_url: proto.base_url.clone(),
            log_id: proto
                .log_id
                .as_ref()
                .ok_or(TrustRootError::MissingField("log_id"))?
                .key_id
                .clone(),
            public_key: key
                .raw_bytes
                .clone()
                .ok_or(TrustRootError::MissingField("public_key.raw_bytes"))?,
            valid_for: ValidityWindow::from_proto(key.valid_for.as_ref(), "public_key.valid_for")?,
        })
    }
}

/// A certificate authority trusted to issue short-lived signing
/// certificates. Issued end-entity certificates must chain to the root of
/// the subject chain carried here.
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    pub uri: String,
    /// DER-encoded subject chain, leaf-side intermediates first, root last.
    pub cert_chain: Vec<Vec<u8>>,
    pub valid_for: ValidityWindow,
}

impl CertificateAuthority {
    fn from_proto(proto: &ProtoCertificateAuthority) -> Result<Self> {
        let chain: Vec<Vec<u8>> = proto
            .cert_chain
            .as_ref()
            .ok_or(TrustRootError::MissingField("cert_chain"))?
            .certificates
            .iter()
            .map(|cert| cert.raw_bytes.clone())
            .collect();
        if chain.is_empty() {
            return Err(TrustRootError::EmptyCertificateChain);
        }
        Ok(CertificateAuthority {
            uri: proto.uri.clone(),
            cert_chain: chain,
            valid_for: ValidityWindow::from_proto(proto.valid_for.as_ref(), "valid_for")?,
        })
    }
}

/// An immutable trust root. Safe to share freely once constructed.
#[derive(Debug, Clone)]
pub struct TrustRoot {
    certificate_authorities: Vec<CertificateAuthority>,
    tlogs: Vec<TransparencyLog>,
    ctlogs: Vec<TransparencyLog>,
}

/// Constant-time byte equality, used for log id comparison.
fn log_id_eq(a: &[u8], b: &[u8]) -> bool {
    aws_lc_rs::constant_time::verify_slices_are_equal(a, b).is_ok()
}

impl TrustRoot {
    /// Parses a `trusted_root.json` document (protobuf JSON encoding).
    pub fn from_trusted_root_json(data: &[u8]) -> Result<Self> {
        let proto: TrustedRoot = serde_json::from_slice(data)?;
        Self::from_proto(&proto)
    }

    /// Builds the domain model from a parsed `TrustedRoot` message and
    /// checks its structural invariants: at most one CA and at most one
    /// log of each kind may have an open-ended validity window.
    pub fn from_proto(proto: &TrustedRoot) -> Result<Self> {
        let certificate_authorities = proto
            .certificate_authorities
            .iter()
            .map(CertificateAuthority::from_proto)
            .collect::<Result<Vec<_>>>()?;
        let tlogs = proto
            .tlogs
            .iter()
            .map(TransparencyLog::from_proto)
            .collect::<Result<Vec<_>>>()?;
        let ctlogs = proto
            .ctlogs
            .iter()
            .map(TransparencyLog::from_proto)
            .collect::<Result<Vec<_>>>()?;

        let root = TrustRoot {
            certificate_authorities,
            tlogs,
            ctlogs,
        };

        for (kind, count) in [
            ("certificate authority", root.count_current_cas()),
            ("transparency log", count_current(&root.tlogs)),
            ("certificate transparency log", count_current(&root.ctlogs)),
        ] {
            if count > 1 {
                return Err(TrustRootError::MultipleCurrentEntries { kind, count });
            }
        }

        Ok(root)
    }

    fn count_current_cas(&self) -> usize {
        self.certificate_authorities
            .iter()
            .filter(|ca| ca.valid_for.is_current())
            .count()
    }

    /// All certificate authorities whose validity window includes `t`.
    pub fn cas_valid_at(&self, t: DateTime<Utc>) -> Vec<&CertificateAuthority> {
        self.certificate_authorities
            .iter()
            .filter(|ca| ca.valid_for.contains(t))
            .collect()
    }

    /// Finds a transparency log by log id and a point in time within its
    /// key's validity period.
    pub fn tlog(&self, log_id: &[u8], t: DateTime<Utc>) -> Option<&TransparencyLog> {
        find_log(&self.tlogs, log_id, t)
    }

    /// Finds a certificate transparency log by log id and time.
    pub fn ctlog(&self, log_id: &[u8], t: DateTime<Utc>) -> Option<&TransparencyLog> {
        find_log(&self.ctlogs, log_id, t)
    }

    /// The one and only current transparency log.
    pub fn current_tlog(&self) -> Result<&TransparencyLog> {
        current_log(&self.tlogs, "transparency log")
    }

    /// The one and only current certificate transparency log.
    pub fn current_ctlog(&self) -> Result<&TransparencyLog> {
        current_log(&self.ctlogs, "certificate transparency log")
    }

    /// The one and only current certificate authority.
    pub fn current_ca(&self) -> Result<&CertificateAuthority> {
        let current: Vec<_> = self
            .certificate_authorities
            .iter()
            .filter(|ca| ca.valid_for.is_current())
            .collect();
        match current.as_slice() {
            [ca] => Ok(ca),
            [] => Err(TrustRootError::NoCurrentEntry {
                kind: "certificate authority",
            }),
            many => Err(TrustRootError::MultipleCurrentEntries {
                kind: "certificate authority",
                count: many.len(),
            }),
        }
    }

    /// (log id, DER key) pairs for every certificate transparency log,
    /// regardless of validity window. Window checks happen against the SCT
    /// timestamp at verification time.
    pub fn ctlog_keys(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.ctlogs
            .iter()
            .map(|log| (log.log_id.as_slice(), log.public_key.as_slice()))
    }
}

fn count_current(logs: &[TransparencyLog]) -> usize {
    logs.iter().filter(|l| l.valid_for.is_current()).count()
}

fn find_log<'a>(
    logs: &'a [TransparencyLog],
    log_id: &[u8],
    t: DateTime<Utc>,
) -> Option<&'a TransparencyLog> {
    logs.iter()
        .find(|log| log_id_eq(&log.log_id, log_id) && log.valid_for.contains(t))
}

fn current_log<'a>(
    logs: &'a [TransparencyLog],
    kind: &'static str,
) -> Result<&'a TransparencyLog> {
    let current: Vec<_> = logs.iter().filter(|l| l.valid_for.is_current()).collect();
    match current.as_slice() {
        [log] => Ok(log),
        [] => Err(TrustRootError::NoCurrentEntry { kind }),
        many => Err(TrustRootError::MultipleCurrentEntries {
            kind,
            count: many.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use prost_types::Timestamp;
    use sigstore_protobuf_specs::dev::sigstore::common::v1::{
        LogId, PublicKey, TimeRange, X509Certificate, X509CertificateChain,
    };

    fn ts(t: DateTime<Utc>) -> Timestamp {
        Timestamp {
            seconds: t.timestamp(),
            nanos: 0,
        }
    }

    fn proto_log(
        log_id: &[u8],
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> TransparencyLogInstance {
        TransparencyLogInstance {
            base_url: "https://log.example.com".into(),
            hash_algorithm: 1,
            public_key: Some(PublicKey {
                raw_bytes: Some(vec![4; 91]),
                key_details: 5,
                valid_for: Some(TimeRange {
                    start: Some(ts(start)),
                    end: end.map(ts),
                }),
            }),
            log_id: Some(LogId {
                key_id: log_id.to_vec(),
            }),
            ..Default::default()
        }
    }

    fn proto_ca(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> ProtoCertificateAuthority {
        ProtoCertificateAuthority {
            uri: "https://ca.example.com".into(),
            cert_chain: Some(X509CertificateChain {
                certificates: vec![X509Certificate {
                    raw_bytes: vec![0x30, 0x00],
                }],
            }),
            valid_for: Some(TimeRange {
                start: Some(ts(start)),
                end: end.map(ts),
            }),
            ..Default::default()
        }
    }

    fn root_with(
        cas: Vec<ProtoCertificateAuthority>,
        tlogs: Vec<TransparencyLogInstance>,
        ctlogs: Vec<TransparencyLogInstance>,
    ) -> TrustedRoot {
        TrustedRoot {
            media_type: "application/vnd.dev.sigstore.trustedroot+json;version=0.1".into(),
            certificate_authorities: cas,
            tlogs,
            ctlogs,
            ..Default::default()
        }
    }

    // Window [start, end] relative to "now" in seconds; does it contain now?
    #[rstest::rstest]
    #[case(-10, Some(10), true)]
    #[case(-10, Some(0), true)] // end is inclusive
    #[case(0, Some(10), true)] // start is inclusive
    #[case(-20, Some(-10), false)]
    #[case(10, Some(20), false)]
    #[case(-10, None, true)]
    #[case(10, None, false)]
    fn validity_window_matching(
        #[case] start: i64,
        #[case] end: Option<i64>,
        #[case] contains_now: bool,
    ) {
        let now = Utc::now();
        let window = ValidityWindow {
            start: now + TimeDelta::seconds(start),
            end: end.map(|e| now + TimeDelta::seconds(e)),
        };
        assert_eq!(window.contains(now), contains_now);
        assert_eq!(window.is_current(), end.is_none());
    }

    #[test]
    fn tlog_lookup_by_id_and_time() {
        let now = Utc::now();
        let old_start = now - TimeDelta::days(30);
        let rotation = now - TimeDelta::days(10);

        let proto = root_with(
            vec![proto_ca(old_start, None)],
            vec![
                proto_log(b"old-log-id", old_start, Some(rotation)),
                proto_log(b"new-log-id", rotation, None),
            ],
            vec![proto_log(b"ct-log-id", old_start, None)],
        );
        let root = TrustRoot::from_proto(&proto).unwrap();

        // Matching id and time.
        assert!(root.tlog(b"new-log-id", now).is_some());
        // Right id, but outside the key's validity period.
        assert!(root.tlog(b"old-log-id", now).is_none());
        // Historic lookup hits the retired key.
        assert!(root
            .tlog(b"old-log-id", now - TimeDelta::days(20))
            .is_some());
        // Unknown id.
        assert!(root.tlog(b"nope", now).is_none());
        // CT logs are a separate namespace.
        assert!(root.tlog(b"ct-log-id", now).is_none());
        assert!(root.ctlog(b"ct-log-id", now).is_some());
    }

    #[test]
    fn current_accessors_require_exactly_one_open_window() {
        let now = Utc::now();
        let start = now - TimeDelta::days(30);

        let proto = root_with(
            vec![proto_ca(start, None)],
            vec![
                proto_log(b"retired", start, Some(now - TimeDelta::days(1))),
                proto_log(b"active", start, None),
            ],
            vec![],
        );
        let root = TrustRoot::from_proto(&proto).unwrap();

        assert_eq!(root.current_tlog().unwrap().log_id, b"active");
        assert_eq!(root.current_ca().unwrap().uri, "https://ca.example.com");
        assert!(matches!(
            root.current_ctlog(),
            Err(TrustRootError::NoCurrentEntry { .. })
        ));
    }

    #[test]
    fn multiple_open_windows_are_structurally_invalid() {
        let now = Utc::now();
        let start = now - TimeDelta::days(30);

        let proto = root_with(
            vec![proto_ca(start, None), proto_ca(start, None)],
            vec![],
            vec![],
        );
        assert!(matches!(
            TrustRoot::from_proto(&proto),
            Err(TrustRootError::MultipleCurrentEntries { count: 2, .. })
        ));
    }

    #[test]
    fn overlapping_bounded_windows_are_allowed() {
        let now = Utc::now();
        let start = now - TimeDelta::days(30);

        // Two CAs valid at the same instant is fine as long as at most one
        // is open-ended.
        let proto = root_with(
            vec![
                proto_ca(start, Some(now + TimeDelta::days(5))),
                proto_ca(start, None),
            ],
            vec![],
            vec![],
        );
        let root = TrustRoot::from_proto(&proto).unwrap();
        assert_eq!(root.cas_valid_at(now).len(), 2);
        root.current_ca().unwrap();
    }
}
