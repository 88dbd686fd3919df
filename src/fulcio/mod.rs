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

//! Client for the certificate authority: submits a certificate request
//! with proof-of-possession and verifies the returned chain against the
//! trust root before anyone is allowed to sign with it.

pub mod models;

use base64::engine::general_purpose::STANDARD as base64_std;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use thiserror::Error;
use url::Url;
use webpki::types::{CertificateDer, UnixTime};
use x509_cert::der::{DecodePem, Encode};
use x509_cert::Certificate;

use crate::crypto::certificate_pool::CertificatePool;
use crate::crypto::keyring::Keyring;
use crate::crypto::transparency::{verify_sct, CertificateEmbeddedSCT, SCTError};
use crate::crypto::{EphemeralKeyPair, SigningScheme};
use crate::errors::{Result, SigstoreError};
use crate::oauth::IdentityToken;
use crate::trust::TrustRoot;
use models::{
    CertificateResponse, CreateSigningCertificateRequest, Credentials, PublicKey,
    PublicKeyRequest, SigningCertificateResponse,
};

/// Default public CA root URL.
pub const FULCIO_ROOT: &str = "https://fulcio.sigstore.dev/";

/// Path to obtain a signing certificate.
pub const SIGNING_CERT_PATH: &str = "api/v2/signingCert";

#[derive(Error, Debug)]
pub enum FulcioVerificationError {
    #[error("certificate chain does not verify against a trusted certificate authority")]
    CAVerificationFailed,

    #[error("issued certificate does not carry the requested public key")]
    PublicKeyMismatch,

    #[error("issued certificate cannot be used before {not_before}")]
    NotYetValid { not_before: String },

    #[error("issued certificate expired at {not_after}")]
    Expired { not_after: String },

    #[error("no certificate transparency log for SCT log id {log_id} at {timestamp}")]
    UnknownSCTLog { log_id: String, timestamp: String },

    #[error(transparent)]
    SCT(#[from] SCTError),

    #[error("malformed certificate response: {0}")]
    MalformedResponse(String),
}

/// The algorithm label the CA API expects for a signing scheme.
fn algorithm_name(scheme: SigningScheme) -> &'static str {
    match scheme {
        SigningScheme::ECDSA_P256_SHA256_ASN1 => "ECDSA",
        SigningScheme::ED25519 => "ED25519",
        SigningScheme::RSA_PKCS1_SHA256 => "RSA",
    }
}

/// Client for requesting certificates from the CA.
pub struct FulcioClient {
    root_url: Url,
    client: reqwest::Client,
}

impl FulcioClient {
    pub fn new(root_url: Url, client: reqwest::Client) -> Self {
        Self { root_url, client }
    }

    /// Requests a certificate for the keypair's public half.
    ///
    /// Proof-of-possession is the keypair's signature over the token's
    /// subject claim; the CA rejects requests where it does not verify
    /// against the presented public key.
    pub async fn request_cert(
        &self,
        token: &IdentityToken,
        key_pair: &EphemeralKeyPair,
    ) -> Result<CertificateResponse> {
        let proof = key_pair.sign(token.subject().as_bytes());

        let request = CreateSigningCertificateRequest {
            credentials: Credentials {
                oidc_identity_token: token.to_string(),
            },
            public_key_request: PublicKeyRequest {
                public_key: PublicKey {
                    algorithm: algorithm_name(SigningScheme::default()),
                    content: key_pair.public_key_to_pem()?,
                },
                proof_of_possession: base64_std.encode(proof),
            },
        };

        let response = self
            .client
            .post(self.root_url.join(SIGNING_CERT_PATH)?)
            .header("content-type", "application/json")
            .bearer_auth(token.to_string())
            .json(&request)
            .send()
            .await
            .map_err(|e| SigstoreError::FulcioClientError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SigstoreError::FulcioClientError(format!(
                "{status}: {body}"
            )));
        }

        let parsed: SigningCertificateResponse = response
            .json()
            .await
            .map_err(|e| SigstoreError::FulcioClientError(e.to_string()))?;

        let chain = parsed
            .signed_certificate_embedded_sct
            .or(parsed.signed_certificate_detached_sct)
            .ok_or_else(|| {
                FulcioVerificationError::MalformedResponse(
                    "response carries no certificate chain".into(),
                )
            })?
            .chain
            .certificates;

        let mut certs = chain
            .iter()
            .map(|pem| Certificate::from_pem(pem.as_bytes()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| FulcioVerificationError::MalformedResponse(e.to_string()))?;
        if certs.is_empty() {
            return Err(FulcioVerificationError::MalformedResponse(
                "response carries an empty certificate chain".into(),
            )
            .into());
        }

        let cert = certs.remove(0);
        Ok(CertificateResponse { cert, chain: certs })
    }
}

/// Verifies an issued certificate chain before it is used for signing:
///
/// 1. the leaf carries exactly the requested public key,
/// 2. the current time is inside the leaf's validity period,
/// 3. the chain builds up to a trust-root CA valid at the current time,
/// 4. an embedded SCT, if present, verifies against a trust-root CT log
///    whose validity window covers the SCT timestamp.
pub fn verify_issued_certificate(
    response: &CertificateResponse,
    trust_root: &TrustRoot,
    expected_spki_der: &[u8],
    now: DateTime<Utc>,
) -> Result<()> {
    let leaf = &response.cert;

    let leaf_spki = leaf
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| FulcioVerificationError::MalformedResponse(e.to_string()))?;
    if leaf_spki != expected_spki_der {
        return Err(FulcioVerificationError::PublicKeyMismatch.into());
    }

    let validity = &leaf.tbs_certificate.validity;
    let now_sys: std::time::SystemTime = now.into();
    if validity.not_before.to_system_time() > now_sys {
        return Err(FulcioVerificationError::NotYetValid {
            not_before: validity.not_before.to_string(),
        }
        .into());
    }
    if validity.not_after.to_system_time() < now_sys {
        return Err(FulcioVerificationError::Expired {
            not_after: validity.not_after.to_string(),
        }
        .into());
    }

    verify_chain_to_trust_root(response, trust_root, now)?;
    verify_embedded_sct(response, trust_root)?;

    Ok(())
}

fn verify_chain_to_trust_root(
    response: &CertificateResponse,
    trust_root: &TrustRoot,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut anchors: Vec<CertificateDer<'static>> = Vec::new();
    let mut intermediates: Vec<CertificateDer<'static>> = Vec::new();

    for ca in trust_root.cas_valid_at(now) {
        // The root of each CA chain anchors; everything before it helps
        // path building.
        let (root, rest) = ca
            .cert_chain
            .split_last()
            .expect("trust root CAs carry non-empty chains");
        anchors.push(CertificateDer::from(root.clone()));
        intermediates.extend(rest.iter().map(|der| CertificateDer::from(der.clone())));
    }
    intermediates.extend(
        response
            .chain_der()
            .map_err(|e| FulcioVerificationError::MalformedResponse(e.to_string()))?
            .into_iter()
            .map(CertificateDer::from),
    );

    let pool = CertificatePool::from_certificates(anchors, intermediates)
        .map_err(|_| FulcioVerificationError::CAVerificationFailed)?;

    let leaf_der = CertificateDer::from(
        response
            .cert_der()
            .map_err(|e| FulcioVerificationError::MalformedResponse(e.to_string()))?,
    );
    let time = UnixTime::since_unix_epoch(std::time::Duration::from_secs(
        now.timestamp().max(0) as u64,
    ));
    pool.verify_cert_with_time(&leaf_der, time).map_err(|e| {
        tracing::debug!("certificate path building failed: {e:?}");
        FulcioVerificationError::CAVerificationFailed
    })?;

    Ok(())
}

/// Checks the leaf's embedded SCT, when one is present. A leaf without an
/// SCT extension passes: not every deployment runs certificate
/// transparency.
fn verify_embedded_sct(response: &CertificateResponse, trust_root: &TrustRoot) -> Result<()> {
    let sct = match CertificateEmbeddedSCT::new(&response.cert, &response.chain) {
        Ok(sct) => sct,
        Err(SCTError::Parsing(_)) => {
            tracing::debug!("leaf carries no SCT, skipping CT verification");
            return Ok(());
        }
        Err(e) => return Err(FulcioVerificationError::from(e).into()),
    };

    let timestamp = DateTime::<Utc>::from_timestamp_millis(sct.timestamp_millis() as i64)
        .ok_or_else(|| {
            FulcioVerificationError::MalformedResponse("SCT timestamp out of range".into())
        })?;
    let log_id = sct.log_id();

    let ctlog = trust_root.ctlog(&log_id, timestamp).ok_or_else(|| {
        FulcioVerificationError::UnknownSCTLog {
            log_id: hex::encode(log_id),
            timestamp: timestamp.to_rfc3339(),
        }
    })?;

    let keyring = Keyring::new_with_ids([(&log_id, ctlog.public_key.as_slice())])
        .map_err(SigstoreError::KeyringError)?;
    verify_sct(&sct, &keyring).map_err(FulcioVerificationError::from)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use prost_types::Timestamp;
    use sigstore_protobuf_specs::dev::sigstore::common::v1::{
        TimeRange, X509Certificate, X509CertificateChain,
    };
    use sigstore_protobuf_specs::dev::sigstore::trustroot::v1::{
        CertificateAuthority as ProtoCertificateAuthority, TrustedRoot,
    };
    use std::str::FromStr;
    use std::time::Duration;
    use x509_cert::builder::{Builder, CertificateBuilder, Profile};
    use x509_cert::ext::pkix::ExtendedKeyUsage;
    use x509_cert::name::Name;
    use x509_cert::serial_number::SerialNumber;
    use x509_cert::spki::SubjectPublicKeyInfoOwned;
    use x509_cert::time::Validity;

    struct TestCa {
        key: p256::ecdsa::SigningKey,
        subject: Name,
        cert: Certificate,
    }

    fn spki_of(key: &p256::ecdsa::SigningKey) -> SubjectPublicKeyInfoOwned {
        use pkcs8::EncodePublicKey;
        let der = key.verifying_key().to_public_key_der().unwrap();
        SubjectPublicKeyInfoOwned::try_from(der.as_bytes()).unwrap()
    }

    fn test_ca() -> TestCa {
        let key = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let subject = Name::from_str("CN=sigstore test CA,O=sigstore.test").unwrap();
        let builder = CertificateBuilder::new(
            Profile::Root,
            SerialNumber::from(1u32),
            Validity::from_now(Duration::from_secs(3600)).unwrap(),
            subject.clone(),
            spki_of(&key),
            &key,
        )
        .unwrap();
        let cert = builder.build::<p256::ecdsa::DerSignature>().unwrap();
        TestCa { key, subject, cert }
    }

    fn issue_leaf(ca: &TestCa, key_pair: &EphemeralKeyPair) -> Certificate {
        let leaf_spki = SubjectPublicKeyInfoOwned::try_from(
            key_pair.public_key_to_der().unwrap().as_slice(),
        )
        .unwrap();
        let mut builder = CertificateBuilder::new(
            Profile::Leaf {
                issuer: ca.subject.clone(),
                enable_key_agreement: false,
                enable_key_encipherment: false,
            },
            SerialNumber::from(7u32),
            Validity::from_now(Duration::from_secs(600)).unwrap(),
            Name::from_str("CN=sigstore").unwrap(),
            leaf_spki,
            &ca.key,
        )
        .unwrap();
        builder
            .add_extension(&ExtendedKeyUsage(vec![
                const_oid::db::rfc5280::ID_KP_CODE_SIGNING,
            ]))
            .unwrap();
        builder.build::<p256::ecdsa::DerSignature>().unwrap()
    }

    fn trust_root_for(ca: &TestCa) -> TrustRoot {
        let proto = TrustedRoot {
            certificate_authorities: vec![ProtoCertificateAuthority {
                uri: "https://fulcio.test".into(),
                cert_chain: Some(X509CertificateChain {
                    certificates: vec![X509Certificate {
                        raw_bytes: ca.cert.to_der().unwrap(),
                    }],
                }),
                valid_for: Some(TimeRange {
                    start: Some(Timestamp {
                        seconds: (Utc::now() - TimeDelta::days(1)).timestamp(),
                        nanos: 0,
                    }),
                    end: None,
                }),
                ..Default::default()
            }],
            ..Default::default()
        };
        TrustRoot::from_proto(&proto).unwrap()
    }

    fn response_for(leaf: Certificate) -> CertificateResponse {
        CertificateResponse {
            cert: leaf,
            chain: Vec::new(),
        }
    }

    #[test]
    fn issued_chain_verifies() {
        let ca = test_ca();
        let key_pair = EphemeralKeyPair::generate();
        let response = response_for(issue_leaf(&ca, &key_pair));
        let trust_root = trust_root_for(&ca);

        verify_issued_certificate(
            &response,
            &trust_root,
            &key_pair.public_key_to_der().unwrap(),
            Utc::now() + TimeDelta::minutes(1),
        )
        .unwrap();
    }

    #[test]
    fn wrong_public_key_is_rejected() {
        let ca = test_ca();
        let key_pair = EphemeralKeyPair::generate();
        let other = EphemeralKeyPair::generate();
        let response = response_for(issue_leaf(&ca, &key_pair));
        let trust_root = trust_root_for(&ca);

        let err = verify_issued_certificate(
            &response,
            &trust_root,
            &other.public_key_to_der().unwrap(),
            Utc::now() + TimeDelta::minutes(1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SigstoreError::FulcioVerificationError(FulcioVerificationError::PublicKeyMismatch)
        ));
    }

    #[test]
    fn leaf_validity_window_is_enforced() {
        let ca = test_ca();
        let key_pair = EphemeralKeyPair::generate();
        let response = response_for(issue_leaf(&ca, &key_pair));
        let trust_root = trust_root_for(&ca);
        let spki = key_pair.public_key_to_der().unwrap();

        let err = verify_issued_certificate(
            &response,
            &trust_root,
            &spki,
            Utc::now() - TimeDelta::hours(1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SigstoreError::FulcioVerificationError(FulcioVerificationError::NotYetValid { .. })
        ));

        let err = verify_issued_certificate(
            &response,
            &trust_root,
            &spki,
            Utc::now() + TimeDelta::hours(2),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SigstoreError::FulcioVerificationError(FulcioVerificationError::Expired { .. })
        ));
    }

    #[test]
    fn chain_to_untrusted_ca_is_rejected() {
        let issuing_ca = test_ca();
        let trusted_ca = test_ca();
        let key_pair = EphemeralKeyPair::generate();
        let response = response_for(issue_leaf(&issuing_ca, &key_pair));
        let trust_root = trust_root_for(&trusted_ca);

        let err = verify_issued_certificate(
            &response,
            &trust_root,
            &key_pair.public_key_to_der().unwrap(),
            Utc::now() + TimeDelta::minutes(1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SigstoreError::FulcioVerificationError(
                FulcioVerificationError::CAVerificationFailed
            )
        ));
    }
}
