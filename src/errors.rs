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

//! The errors that can be raised by sigstore-keyless

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SigstoreError>;

#[derive(Error, Debug)]
pub enum SigstoreError {
    #[error("failed to parse URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("invalid key format: {error}")]
    InvalidKeyFormat { error: String },

    #[error("public key with unsupported algorithm: {0}")]
    PublicKeyUnsupportedAlgorithmError(String),

    #[error("public key verification error")]
    PublicKeyVerificationError,

    #[error("unable to parse identity token: {0}")]
    IdentityTokenError(String),

    #[error("OIDC flow failed: {0}")]
    OidcFlowError(String),

    #[error("no ambient OIDC credentials detected")]
    NoAmbientCredentials,

    #[error("failed to get id_token")]
    NoIDToken,

    #[error(transparent)]
    FromPEMError(#[from] pem::PemError),

    #[error(transparent)]
    Base64DecodeError(#[from] base64::DecodeError),

    #[error(transparent)]
    TufError(#[from] crate::tuf::TufError),

    #[error(transparent)]
    TrustRootError(#[from] crate::trust::TrustRootError),

    #[error("Fulcio request unsuccessful: {0}")]
    FulcioClientError(String),

    #[error(transparent)]
    FulcioVerificationError(#[from] crate::fulcio::FulcioVerificationError),

    #[error("Rekor request unsuccessful: {0}")]
    RekorClientError(String),

    #[error(transparent)]
    RekorError(#[from] crate::rekor::RekorError),

    #[error(transparent)]
    KeyringError(#[from] crate::crypto::keyring::KeyringError),

    #[error(transparent)]
    SCTError(#[from] crate::crypto::transparency::SCTError),

    #[error(transparent)]
    MerkleProofError(#[from] crate::crypto::merkle::MerkleProofError),

    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),

    #[error(transparent)]
    ECDSAError(#[from] ecdsa::Error),

    #[error(transparent)]
    X509ParseError(#[from] x509_cert::der::Error),

    #[error("PKCS#8 SPKI error: {0}")]
    PKCS8SpkiError(String),

    #[error(transparent)]
    PKCS1Error(#[from] pkcs1::Error),

    #[error(transparent)]
    Utf8Error(#[from] std::str::Utf8Error),

    #[error("{0}")]
    UnexpectedError(String),
}
