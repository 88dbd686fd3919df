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

//! Parsing of public key material into verification keys.
//!
//! Keys reach this crate in three shapes: PEM documents (TUF role keys,
//! transparency log keys exported for humans), raw DER SPKI blobs (trust
//! root entries), and TUF `keyval` contents tagged with a scheme name.
//! All of them end up as a [`VerificationKey`].

use const_oid::db::rfc5912::{ID_EC_PUBLIC_KEY, RSA_ENCRYPTION, SECP_256_R_1};
use const_oid::ObjectIdentifier;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15;
use sha2::Sha256;
use signature::hazmat::PrehashVerifier;
use signature::Verifier;
use x509_cert::der::Decode;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::errors::{Result, SigstoreError};

// Ed25519 OID: 1.3.101.112
const ID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// A key that can be used to verify signatures.
///
/// Currently the following key types are supported:
///
///   * RSA keys, using PKCS1 padding and SHA-256 as the digest algorithm
///   * ECDSA keys, ASN.1 DER-encoded, using the P-256 curve and SHA-256
///   * Ed25519 keys
#[allow(non_camel_case_types)]
#[derive(Debug, Clone)]
pub enum VerificationKey {
    RSA_PKCS1_SHA256(pkcs1v15::VerifyingKey<Sha256>),
    ECDSA_P256_SHA256_ASN1(p256::ecdsa::VerifyingKey),
    ED25519(ed25519_dalek::VerifyingKey),
}

impl VerificationKey {
    /// Builds a `VerificationKey` from a PEM document.
    ///
    /// The document must hold exactly one non-empty PEM section. A section
    /// tagged `RSA PUBLIC KEY` is read as a PKCS#1 `(modulus, exponent)`
    /// sequence; every other section is treated as a SubjectPublicKeyInfo.
    pub fn from_pem(pem_data: &[u8]) -> Result<Self> {
        let sections = pem::parse_many(pem_data)?;
        let section = match sections.as_slice() {
            [section] => section,
            [] => {
                return Err(SigstoreError::InvalidKeyFormat {
                    error: "no PEM section found".into(),
                })
            }
            _ => {
                return Err(SigstoreError::InvalidKeyFormat {
                    error: "public keys must be a single PEM encoded section".into(),
                })
            }
        };
        if section.contents().is_empty() {
            return Err(SigstoreError::InvalidKeyFormat {
                error: "empty PEM section".into(),
            });
        }

        if section.tag() == "RSA PUBLIC KEY" {
            let key = rsa::RsaPublicKey::from_pkcs1_der(section.contents())?;
            return Ok(VerificationKey::RSA_PKCS1_SHA256(
                pkcs1v15::VerifyingKey::new(key),
            ));
        }

        Self::from_spki_der(section.contents())
    }

    /// Builds a `VerificationKey` from a DER-encoded SubjectPublicKeyInfo.
    pub fn from_spki_der(der: &[u8]) -> Result<Self> {
        let spki = SubjectPublicKeyInfoOwned::from_der(der)
            .map_err(|e| SigstoreError::PKCS8SpkiError(e.to_string()))?;
        Self::from_spki(&spki)
    }

    /// Builds a `VerificationKey` from a parsed SubjectPublicKeyInfo,
    /// dispatching on the algorithm identifier.
    pub fn from_spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self> {
        let raw = spki.subject_public_key.raw_bytes();

        match spki.algorithm.oid {
            ID_EC_PUBLIC_KEY => {
                let curve: ObjectIdentifier = spki
                    .algorithm
                    .parameters
                    .as_ref()
                    .ok_or_else(|| {
                        SigstoreError::PublicKeyUnsupportedAlgorithmError(
                            "EC key without named curve".into(),
                        )
                    })?
                    .decode_as()
                    .map_err(|e| SigstoreError::PKCS8SpkiError(e.to_string()))?;
                if curve != SECP_256_R_1 {
                    return Err(SigstoreError::PublicKeyUnsupportedAlgorithmError(format!(
                        "EC curve {curve} is not supported"
                    )));
                }
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(raw)
                    .map_err(|e| SigstoreError::PKCS8SpkiError(e.to_string()))?;
                Ok(VerificationKey::ECDSA_P256_SHA256_ASN1(key))
            }
            RSA_ENCRYPTION => {
                let key = rsa::RsaPublicKey::from_pkcs1_der(raw)?;
                Ok(VerificationKey::RSA_PKCS1_SHA256(
                    pkcs1v15::VerifyingKey::new(key),
                ))
            }
            ID_ED25519 => {
                let bytes: [u8; 32] =
                    raw.try_into().map_err(|_| SigstoreError::InvalidKeyFormat {
                        error: format!("Ed25519 key must be 32 bytes, got {}", raw.len()),
                    })?;
                let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                    .map_err(|e| SigstoreError::PKCS8SpkiError(e.to_string()))?;
                Ok(VerificationKey::ED25519(key))
            }
            other => Err(SigstoreError::PublicKeyUnsupportedAlgorithmError(format!(
                "key with algorithm OID {other} is not supported"
            ))),
        }
    }

    /// Builds a `VerificationKey` from a DER-encoded SubjectPublicKeyInfo
    /// that arrives with an algorithm label, rejecting keys whose actual
    /// algorithm does not match the label.
    pub fn from_spki_der_with_algorithm(der: &[u8], algorithm: &str) -> Result<Self> {
        let key = Self::from_spki_der(der)?;
        let label_matches = matches!(
            (&key, algorithm),
            (VerificationKey::RSA_PKCS1_SHA256(_), "RSA")
                | (VerificationKey::ECDSA_P256_SHA256_ASN1(_), "EC" | "ECDSA")
                | (VerificationKey::ED25519(_), "Ed25519" | "EdDSA")
        );
        if !label_matches {
            return Err(SigstoreError::PublicKeyUnsupportedAlgorithmError(format!(
                "key material does not match declared algorithm {algorithm}"
            )));
        }
        Ok(key)
    }

    /// Builds a `VerificationKey` from TUF key material.
    ///
    /// `scheme` comes from the closed set the metadata format allows:
    /// `ed25519` and `ecdsa-sha2-nistp256`. Both SPKI-wrapped and raw
    /// encodings are accepted, since published roots have used either.
    pub fn from_tuf_key(contents: &[u8], scheme: &str) -> Result<Self> {
        match scheme {
            "ed25519" => {
                if let Ok(bytes) = <[u8; 32]>::try_from(contents) {
                    let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                        .map_err(|e| SigstoreError::PKCS8SpkiError(e.to_string()))?;
                    return Ok(VerificationKey::ED25519(key));
                }
                Self::from_spki_der(contents)
            }
            "ecdsa-sha2-nistp256" => {
                if let Ok(key) = p256::ecdsa::VerifyingKey::from_sec1_bytes(contents) {
                    return Ok(VerificationKey::ECDSA_P256_SHA256_ASN1(key));
                }
                Self::from_spki_der(contents)
            }
            other => Err(SigstoreError::PublicKeyUnsupportedAlgorithmError(format!(
                "TUF key scheme {other} is not supported"
            ))),
        }
    }

    /// Verifies `signature` over `msg`.
    ///
    /// ECDSA and RSA signatures hash the message with SHA-256 internally;
    /// ECDSA signatures are expected in ASN.1 DER form.
    pub fn verify_signature(&self, signature: &[u8], msg: &[u8]) -> Result<()> {
        match self {
            VerificationKey::RSA_PKCS1_SHA256(key) => {
                let signature = pkcs1v15::Signature::try_from(signature)
                    .map_err(|_| SigstoreError::PublicKeyVerificationError)?;
                key.verify(msg, &signature)
                    .map_err(|_| SigstoreError::PublicKeyVerificationError)
            }
            VerificationKey::ECDSA_P256_SHA256_ASN1(key) => {
                let signature = p256::ecdsa::Signature::from_der(signature)
                    .map_err(|_| SigstoreError::PublicKeyVerificationError)?;
                key.verify(msg, &signature)
                    .map_err(|_| SigstoreError::PublicKeyVerificationError)
            }
            VerificationKey::ED25519(key) => {
                let signature = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| SigstoreError::PublicKeyVerificationError)?;
                key.verify(msg, &signature)
                    .map_err(|_| SigstoreError::PublicKeyVerificationError)
            }
        }
    }

    /// Verifies an ECDSA `signature` over a message whose SHA-256 digest is
    /// already known. Only meaningful for ECDSA P-256 keys.
    pub fn verify_prehash(&self, signature: &[u8], digest: &[u8]) -> Result<()> {
        match self {
            VerificationKey::ECDSA_P256_SHA256_ASN1(key) => {
                let signature = p256::ecdsa::Signature::from_der(signature)
                    .map_err(|_| SigstoreError::PublicKeyVerificationError)?;
                key.verify_prehash(digest, &signature)
                    .map_err(|_| SigstoreError::PublicKeyVerificationError)
            }
            _ => Err(SigstoreError::PublicKeyUnsupportedAlgorithmError(
                "prehash verification is only supported for ECDSA P-256".into(),
            )),
        }
    }
}
