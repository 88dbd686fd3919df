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

//! Models for interfacing with the certificate authority.

use serde::{Deserialize, Serialize};
use x509_cert::der::Encode;
use x509_cert::Certificate;

/// Certificate request body.
///
/// Presents a public key and a signed challenge (proof-of-possession over
/// the OIDC subject) in exchange for a signed certificate chain.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateSigningCertificateRequest {
    pub credentials: Credentials,
    pub public_key_request: PublicKeyRequest,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub oidc_identity_token: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyRequest {
    pub public_key: PublicKey,
    /// Base64-encoded signature over the token's subject claim, made with
    /// the private half of `public_key`.
    pub proof_of_possession: String,
}

#[derive(Serialize, Debug)]
pub struct PublicKey {
    pub algorithm: &'static str,
    /// PEM-encoded SubjectPublicKeyInfo.
    pub content: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SigningCertificateResponse {
    pub signed_certificate_embedded_sct: Option<CertificateChainResponse>,
    pub signed_certificate_detached_sct: Option<CertificateChainResponse>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CertificateChainResponse {
    pub chain: Chain,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Chain {
    /// PEM-encoded certificates, leaf first.
    pub certificates: Vec<String>,
}

/// The issued certificate chain, leaf split out.
pub struct CertificateResponse {
    pub cert: Certificate,
    pub chain: Vec<Certificate>,
}

impl CertificateResponse {
    pub fn cert_der(&self) -> Result<Vec<u8>, x509_cert::der::Error> {
        self.cert.to_der()
    }

    pub fn chain_der(&self) -> Result<Vec<Vec<u8>>, x509_cert::der::Error> {
        self.chain.iter().map(|cert| cert.to_der()).collect()
    }
}
