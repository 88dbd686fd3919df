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

//! Ambient credential detection for workload environments.
//!
//! Detection order: GitHub Actions OIDC endpoint, GCP metadata server,
//! `SIGSTORE_ID_TOKEN` from the environment. The first provider that is
//! present must also succeed; its failure is surfaced rather than
//! falling through to a weaker source.

use serde::Deserialize;

use super::IdentityToken;
use crate::errors::{Result, SigstoreError};

/// The audience requested for ambient tokens.
pub const AUDIENCE: &str = "sigstore";

const GCP_IDENTITY_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/identity";

/// Detects and returns an identity token from the running environment.
pub async fn detect_token(client: &reqwest::Client) -> Result<IdentityToken> {
    if github_actions_available() {
        tracing::debug!("detected GitHub Actions OIDC credentials");
        return github_actions_token(client).await;
    }
    if gcp_available() {
        tracing::debug!("detected GCP metadata server");
        return gcp_token(client).await;
    }
    if let Ok(raw) = std::env::var("SIGSTORE_ID_TOKEN") {
        tracing::debug!("using token from SIGSTORE_ID_TOKEN");
        return IdentityToken::try_from(raw.as_str());
    }
    Err(SigstoreError::NoAmbientCredentials)
}

fn github_actions_available() -> bool {
    std::env::var("ACTIONS_ID_TOKEN_REQUEST_URL").is_ok()
        && std::env::var("ACTIONS_ID_TOKEN_REQUEST_TOKEN").is_ok()
}

#[derive(Deserialize)]
struct GithubTokenResponse {
    value: String,
}

/// Requests a token from the GitHub Actions OIDC endpoint. Requires the
/// workflow to grant `id-token: write`.
async fn github_actions_token(client: &reqwest::Client) -> Result<IdentityToken> {
    let url = std::env::var("ACTIONS_ID_TOKEN_REQUEST_URL")
        .map_err(|_| SigstoreError::NoAmbientCredentials)?;
    let bearer = std::env::var("ACTIONS_ID_TOKEN_REQUEST_TOKEN")
        .map_err(|_| SigstoreError::NoAmbientCredentials)?;

    let response: GithubTokenResponse = client
        .get(url)
        .query(&[("audience", AUDIENCE)])
        .bearer_auth(bearer)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    IdentityToken::try_from(response.value.as_str())
}

fn gcp_available() -> bool {
    // The conventional markers for Google compute environments; the
    // metadata server itself is only reachable from inside one.
    std::env::var("GOOGLE_CLOUD_PROJECT").is_ok()
        || std::env::var("GCLOUD_PROJECT").is_ok()
        || std::env::var("GCP_METADATA_HOST").is_ok()
        || std::path::Path::new("/run/google-mds").exists()
}

/// Requests an identity token from the GCP metadata server.
async fn gcp_token(client: &reqwest::Client) -> Result<IdentityToken> {
    let raw = client
        .get(GCP_IDENTITY_URL)
        .query(&[("audience", AUDIENCE), ("format", "full")])
        .header("Metadata-Flavor", "Google")
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    IdentityToken::try_from(raw.trim())
}
