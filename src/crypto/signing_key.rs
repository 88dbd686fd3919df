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

//! Ephemeral signing keys.
//!
//! Keyless signing never persists a private key: a fresh ECDSA P-256 keypair
//! is generated per signing session, bound to an identity by the CA, used to
//! sign the artifacts in that session, and then dropped. The underlying
//! scalar is zeroized when the keypair is dropped, on every exit path.

use pkcs8::{EncodePublicKey, LineEnding};
use signature::hazmat::PrehashSigner;
use signature::Signer;

use crate::crypto::verification_key::VerificationKey;
use crate::errors::{Result, SigstoreError};

/// An in-memory ECDSA P-256 keypair with a one-signing-session lifetime.
pub struct EphemeralKeyPair {
    signing_key: p256::ecdsa::SigningKey,
}

impl EphemeralKeyPair {
    /// Generates a fresh keypair from the system RNG.
    pub fn generate() -> Self {
        let secret = p256::SecretKey::random(&mut rand::rngs::OsRng);
        Self {
            signing_key: p256::ecdsa::SigningKey::from(secret),
        }
    }

    /// Signs `msg`, hashing it with SHA-256. Returns an ASN.1 DER signature.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let signature: p256::ecdsa::Signature = self.signing_key.sign(msg);
        signature.to_der().as_bytes().to_vec()
    }

    /// Signs a message whose SHA-256 digest is already known.
    /// Returns an ASN.1 DER signature.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<Vec<u8>> {
        let signature: p256::ecdsa::Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(SigstoreError::ECDSAError)?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// DER-encoded SubjectPublicKeyInfo of the public half.
    pub fn public_key_to_der(&self) -> Result<Vec<u8>> {
        let doc = self
            .signing_key
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| SigstoreError::PKCS8SpkiError(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// PEM-encoded SubjectPublicKeyInfo of the public half.
    pub fn public_key_to_pem(&self) -> Result<String> {
        self.signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SigstoreError::PKCS8SpkiError(e.to_string()))
    }

    /// The public half as a [`VerificationKey`].
    pub fn verification_key(&self) -> VerificationKey {
        VerificationKey::ECDSA_P256_SHA256_ASN1(*self.signing_key.verifying_key())
    }
}

// `p256::ecdsa::SigningKey` zeroizes its scalar on drop, which gives the
// keypair its all-exit-paths cleanup guarantee without an explicit Drop impl.

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair").finish_non_exhaustive()
    }
}
