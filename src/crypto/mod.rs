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

//! Structures and constants required to perform cryptographic operations.

use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::errors::{Result, SigstoreError};

pub(crate) mod certificate_pool;
pub mod keyring;
pub mod merkle;
pub mod signing_key;
pub mod transparency;
pub mod verification_key;

pub use signing_key::EphemeralKeyPair;
pub use verification_key::VerificationKey;

/// The digital signature algorithms understood by this crate.
///
/// `ECDSA_P256_SHA256_ASN1` is the default scheme: it is what ephemeral
/// signing keys use and what the public-good infrastructure issues
/// certificates for.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SigningScheme {
    ECDSA_P256_SHA256_ASN1,
    ED25519,
    RSA_PKCS1_SHA256,
}

impl Default for SigningScheme {
    fn default() -> Self {
        SigningScheme::ECDSA_P256_SHA256_ASN1
    }
}

impl std::fmt::Display for SigningScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningScheme::ECDSA_P256_SHA256_ASN1 => write!(f, "ECDSA_P256_SHA256_ASN1"),
            SigningScheme::ED25519 => write!(f, "ED25519"),
            SigningScheme::RSA_PKCS1_SHA256 => write!(f, "RSA_PKCS1_SHA256"),
        }
    }
}

/// A SHA-256 digest of artifact content.
///
/// This is the only content digest the signing pipeline produces or accepts:
/// 32 bytes, computed over the raw artifact bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactDigest {
    bytes: [u8; 32],
}

impl ArtifactDigest {
    /// The algorithm label used on the wire.
    pub const ALGORITHM: &'static str = "sha256";

    /// Digest a byte span.
    pub fn sha256(data: impl AsRef<[u8]>) -> Self {
        Self {
            bytes: Sha256::digest(data).into(),
        }
    }

    /// Digest the contents of a file.
    ///
    /// The file is streamed through the hasher on a blocking task, so large
    /// artifacts are never buffered in memory.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let bytes = tokio::task::spawn_blocking(move || -> Result<[u8; 32]> {
            let mut file = std::fs::File::open(path)?;
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)?;
            Ok(hasher.finalize().into())
        })
        .await??;

        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl TryFrom<&[u8]> for ArtifactDigest {
    type Error = SigstoreError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = value.try_into().map_err(|_| SigstoreError::InvalidKeyFormat {
            error: format!("expected a 32 byte SHA-256 digest, got {} bytes", value.len()),
        })?;
        Ok(Self { bytes })
    }
}

impl From<[u8; 32]> for ArtifactDigest {
    fn from(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn sha256_known_vectors() {
        assert_eq!(
            ArtifactDigest::sha256(b"").as_bytes(),
            &hex!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"),
        );
        assert_eq!(
            ArtifactDigest::sha256(b"hello").as_bytes(),
            &hex!("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"),
        );
        assert_eq!(
            ArtifactDigest::sha256(b"world").as_bytes(),
            &hex!("486ea46224d1bb4fb680f34f7c9ad96a8f24ec88be73ea8e5a6c65260e9cb8a7"),
        );
    }

    #[tokio::test]
    async fn digest_empty_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let digest = ArtifactDigest::from_file(&path).await.unwrap();
        assert_eq!(
            digest.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_from_slice_enforces_length() {
        assert!(ArtifactDigest::try_from(&[0u8; 31][..]).is_err());
        assert!(ArtifactDigest::try_from(&[0u8; 32][..]).is_ok());
    }
}
