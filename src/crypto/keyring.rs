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

//! A set of log signing keys addressable by key id.

use std::collections::HashMap;

use aws_lc_rs::signature::{self as aws_lc_rs_signature, UnparsedPublicKey};
use const_oid::db::rfc5912::{ID_EC_PUBLIC_KEY, RSA_ENCRYPTION, SECP_256_R_1};
use const_oid::ObjectIdentifier;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_cert::der::{self, Decode};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

// Ed25519 OID: 1.3.101.112
const ID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

#[derive(Error, Debug)]
pub enum KeyringError {
    #[error("malformed key")]
    KeyMalformed(#[from] x509_cert::der::Error),

    #[error("unsupported algorithm")]
    AlgoUnsupported,

    #[error("requested key not in keyring: {0}")]
    KeyNotFound(String),

    #[error("verification failed")]
    VerificationFailed,
}

type Result<T> = std::result::Result<T, KeyringError>;

/// A single log signing key.
struct Key {
    inner: UnparsedPublicKey<Vec<u8>>,
    /// The key's RFC 6962-style key id.
    /// <https://datatracker.ietf.org/doc/html/rfc6962#section-3.2>
    fingerprint: [u8; 32],
}

impl Key {
    /// Creates a `Key` from a DER blob containing a SubjectPublicKeyInfo
    /// object. The key id is computed as the SHA-256 hash of the SPKI.
    fn new(spki_bytes: &[u8]) -> Result<Self> {
        let fingerprint = Sha256::digest(spki_bytes).into();
        Self::new_with_id(spki_bytes, fingerprint)
    }

    /// Creates a `Key` with an externally provided key id, e.g. from a
    /// trusted root entry.
    ///
    /// PKCS#1 RSA keys (not SPKI-wrapped) are also accepted here: some
    /// published trust roots carry them for their RSA log keys.
    fn new_with_id(spki_bytes: &[u8], fingerprint: [u8; 32]) -> Result<Self> {
        let spki = match SubjectPublicKeyInfoOwned::from_der(spki_bytes) {
            Ok(spki) => spki,
            Err(spki_err) => {
                // PKCS#1: SEQUENCE { INTEGER (modulus), INTEGER (exponent) }
                if spki_bytes.len() >= 5 && spki_bytes[0] == 0x30 && spki_bytes[4] == 0x02 {
                    tracing::debug!("loading key in legacy PKCS#1 RSA format");
                    return Ok(Key {
                        inner: UnparsedPublicKey::new(
                            &aws_lc_rs_signature::RSA_PKCS1_2048_8192_SHA256,
                            spki_bytes.to_owned(),
                        ),
                        fingerprint,
                    });
                }
                return Err(spki_err.into());
            }
        };

        // Ed25519 keys carry no algorithm parameters.
        if spki.algorithm.oid == ID_ED25519 {
            return Ok(Key {
                inner: UnparsedPublicKey::new(
                    &aws_lc_rs_signature::ED25519,
                    spki.subject_public_key.raw_bytes().to_owned(),
                ),
                fingerprint,
            });
        }

        let Some(params) = &spki.algorithm.parameters else {
            return Err(KeyringError::AlgoUnsupported);
        };

        if spki.algorithm.oid == RSA_ENCRYPTION && params == &der::Any::null() {
            return Ok(Key {
                inner: UnparsedPublicKey::new(
                    &aws_lc_rs_signature::RSA_PKCS1_2048_8192_SHA256,
                    spki.subject_public_key.raw_bytes().to_owned(),
                ),
                fingerprint,
            });
        }

        let curve: ObjectIdentifier = params.decode_as()?;
        match (spki.algorithm.oid, curve) {
            (ID_EC_PUBLIC_KEY, SECP_256_R_1) => Ok(Key {
                inner: UnparsedPublicKey::new(
                    &aws_lc_rs_signature::ECDSA_P256_SHA256_ASN1,
                    spki.subject_public_key.raw_bytes().to_owned(),
                ),
                fingerprint,
            }),
            _ => Err(KeyringError::AlgoUnsupported),
        }
    }
}

/// A set of log signing keys, each of which is potentially a valid signer
/// for Signed Certificate Timestamps or Signed Entry Timestamps.
pub struct Keyring(HashMap<[u8; 32], Key>);

impl Keyring {
    /// Creates a `Keyring` from DER-encoded SPKI public keys, computing
    /// RFC 6962-style key ids for each.
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a [u8]>) -> Result<Self> {
        Ok(Self(
            keys.into_iter()
                .filter_map(|key_bytes| match Key::new(key_bytes) {
                    Ok(key) => {
                        tracing::debug!("loaded key {}", hex::encode(key.fingerprint));
                        Some((key.fingerprint, key))
                    }
                    Err(e) => {
                        tracing::warn!("failed to load key: {e:?}");
                        None
                    }
                })
                .collect(),
        ))
    }

    /// Creates a `Keyring` from (key id, DER SPKI) pairs, for logs whose
    /// key ids are dictated by the trusted root rather than computed.
    pub fn new_with_ids<'a>(
        keys: impl IntoIterator<Item = (&'a [u8; 32], &'a [u8])>,
    ) -> Result<Self> {
        Ok(Self(
            keys.into_iter()
                .filter_map(|(key_id, key_bytes)| match Key::new_with_id(key_bytes, *key_id) {
                    Ok(key) => Some((key.fingerprint, key)),
                    Err(e) => {
                        tracing::warn!("failed to load key {}: {e:?}", hex::encode(key_id));
                        None
                    }
                })
                .collect(),
        ))
    }

    /// Verifies `data` against `signature` with the key identified by `key_id`.
    pub fn verify(&self, key_id: &[u8; 32], signature: &[u8], data: &[u8]) -> Result<()> {
        let key = self
            .0
            .get(key_id)
            .ok_or_else(|| KeyringError::KeyNotFound(hex::encode(key_id)))?;

        key.inner.verify(data, signature).map_err(|e| {
            tracing::debug!("keyring verification failed: {e:?}");
            KeyringError::VerificationFailed
        })
    }
}
