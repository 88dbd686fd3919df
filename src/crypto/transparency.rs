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

//! Certificate Transparency validation for issued signing certificates.
//!
//! A CA that participates in Certificate Transparency embeds a Signed
//! Certificate Timestamp into the leaf certificate it issues. Verifying the
//! SCT requires reconstructing the precertificate (the TBS certificate with
//! the SCT extension removed) and checking the CT log's signature over the
//! RFC 6962 `DigitallySigned` serialization of it.

use const_oid::db::rfc6962::CT_PRECERT_SCTS;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tls_codec::{SerializeBytes, TlsByteVecU16, TlsByteVecU24, TlsSerializeBytes, TlsSize};
use x509_cert::der::Encode;
use x509_cert::ext::pkix::sct::Version;
use x509_cert::ext::pkix::{
    BasicConstraints, SignedCertificateTimestamp, SignedCertificateTimestampList,
};
use x509_cert::Certificate;

use crate::crypto::keyring::{Keyring, KeyringError};

#[derive(Debug, Error)]
pub enum CertificateErrorKind {
    #[error("SCT list extension missing from leaf certificate")]
    LeafSCTMissing,

    #[error("cannot find leaf certificate's issuer")]
    IssuerMissing,

    #[error(transparent)]
    Der(#[from] x509_cert::der::Error),

    #[error(transparent)]
    Tls(#[from] tls_codec::Error),
}

impl From<x509_cert::ext::pkix::Error> for CertificateErrorKind {
    fn from(value: x509_cert::ext::pkix::Error) -> Self {
        match value {
            x509_cert::ext::pkix::Error::Der(e) => CertificateErrorKind::Der(e),
            x509_cert::ext::pkix::Error::Tls(e) => CertificateErrorKind::Tls(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum SCTError {
    #[error("failed to extract SCT from certificate")]
    Parsing(#[from] CertificateErrorKind),

    #[error("failed to reconstruct signed payload")]
    Serialization(#[source] tls_codec::Error),

    #[error("failed to verify SCT")]
    Verification(#[from] KeyringError),
}

#[derive(PartialEq, Debug, TlsSerializeBytes, TlsSize)]
#[repr(u8)]
enum SignatureType {
    CertificateTimestamp = 0,
}

#[derive(PartialEq, Debug)]
#[repr(u16)]
enum LogEntryType {
    PrecertEntry = 1,
}

#[derive(PartialEq, Debug, TlsSerializeBytes, TlsSize)]
struct PreCert {
    // opaque issuer_key_hash[32];
    issuer_key_hash: [u8; 32],
    // opaque TBSCertificate<1..2^24-1>;
    tbs_certificate: TlsByteVecU24,
}

#[derive(PartialEq, Debug, TlsSerializeBytes, TlsSize)]
#[repr(u16)]
enum SignedEntry {
    #[tls_codec(discriminant = "LogEntryType::PrecertEntry")]
    PrecertEntry(PreCert),
}

/// The RFC 6962 `digitally-signed struct` input for SCT verification.
#[derive(PartialEq, Debug, TlsSerializeBytes, TlsSize)]
pub struct DigitallySigned {
    version: Version,
    signature_type: SignatureType,
    timestamp: u64,
    signed_entry: SignedEntry,
    // opaque CtExtensions<0..2^16-1>;
    extensions: TlsByteVecU16,

    // Context carried alongside the TLS-encoded payload; not serialized.
    #[tls_codec(skip)]
    log_id: [u8; 32],
    #[tls_codec(skip)]
    signature: Vec<u8>,
}

/// An SCT embedded in an issued certificate, paired with the issuer key hash
/// needed to reconstruct the signed precertificate.
#[derive(Debug)]
pub struct CertificateEmbeddedSCT<'a> {
    cert: &'a Certificate,
    sct: SignedCertificateTimestamp,
    issuer_id: [u8; 32],
}

fn is_ca(cert: &Certificate) -> bool {
    matches!(
        cert.tbs_certificate.get::<BasicConstraints>(),
        Ok(Some((_, BasicConstraints { ca: true, .. })))
    )
}

impl<'a> CertificateEmbeddedSCT<'a> {
    /// Extracts the embedded SCT from `leaf`, locating the issuer within
    /// `chain` to compute the issuer key hash.
    pub fn new(leaf: &'a Certificate, chain: &[Certificate]) -> Result<Self, SCTError> {
        let issuer = chain
            .iter()
            .find(|c| is_ca(c))
            .ok_or(CertificateErrorKind::IssuerMissing)?;
        let issuer_spki = issuer
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(CertificateErrorKind::from)?;

        Self::new_with_issuer_spki(leaf, &issuer_spki)
    }

    fn new_with_issuer_spki(cert: &'a Certificate, issuer_spki: &[u8]) -> Result<Self, SCTError> {
        let scts: SignedCertificateTimestampList = match cert.tbs_certificate.get() {
            Ok(Some((_, ext))) => ext,
            _ => return Err(CertificateErrorKind::LeafSCTMissing.into()),
        };

        let sct = match scts
            .parse_timestamps()
            .map_err(CertificateErrorKind::from)?
            .as_slice()
        {
            [e] => e,
            // Exactly one embedded SCT is expected.
            _ => return Err(CertificateErrorKind::LeafSCTMissing.into()),
        }
        .parse_timestamp()
        .map_err(CertificateErrorKind::from)?;

        let issuer_id = Sha256::digest(issuer_spki).into();

        Ok(Self {
            cert,
            sct,
            issuer_id,
        })
    }

    /// The id of the log that issued this SCT.
    pub fn log_id(&self) -> [u8; 32] {
        self.sct.log_id.key_id
    }

    /// The SCT issuance time, in milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> u64 {
        self.sct.timestamp
    }
}

impl From<&CertificateEmbeddedSCT<'_>> for DigitallySigned {
    fn from(value: &CertificateEmbeddedSCT) -> Self {
        // Reconstruct the precert by filtering out the SCT extension.
        let mut tbs_precert = value.cert.tbs_certificate.clone();
        tbs_precert.extensions = tbs_precert.extensions.map(|exts| {
            exts.iter()
                .filter(|v| v.extn_id != CT_PRECERT_SCTS)
                .cloned()
                .collect()
        });

        let mut tbs_precert_der = Vec::new();
        tbs_precert
            .encode_to_vec(&mut tbs_precert_der)
            .expect("failed to re-encode precertificate");

        DigitallySigned {
            version: match value.sct.version {
                Version::V1 => Version::V1,
            },
            signature_type: SignatureType::CertificateTimestamp,
            timestamp: value.sct.timestamp,
            signed_entry: SignedEntry::PrecertEntry(PreCert {
                issuer_key_hash: value.issuer_id,
                tbs_certificate: tbs_precert_der.as_slice().into(),
            }),
            extensions: value.sct.extensions.clone(),

            log_id: value.sct.log_id.key_id,
            signature: value.sct.signature.signature.clone().into(),
        }
    }
}

/// Verifies a signing certificate's embedded Signed Certificate Timestamp
/// against a keyring of CT log keys.
///
/// Certificates that fail SCT verification are misissued and must not be
/// trusted.
pub fn verify_sct(sct: &CertificateEmbeddedSCT, keyring: &Keyring) -> Result<(), SCTError> {
    let signed: DigitallySigned = sct.into();
    let serialized = signed.tls_serialize().map_err(SCTError::Serialization)?;

    keyring.verify(&signed.log_id, &signed.signature, &serialized)?;

    Ok(())
}
