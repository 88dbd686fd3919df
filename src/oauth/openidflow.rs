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

//! Human-involved OIDC flows: browser authorization code with PKCE, and
//! the RFC 8628 device authorization flow for hosts without a browser.

use openidconnect::core::{
    CoreAuthDisplay, CoreAuthenticationFlow, CoreClaimName, CoreClaimType, CoreClient,
    CoreClientAuthMethod, CoreDeviceAuthorizationResponse, CoreGrantType,
    CoreJsonWebKey, CoreJsonWebKeyType, CoreJsonWebKeyUse, CoreJweContentEncryptionAlgorithm,
    CoreJweKeyManagementAlgorithm, CoreJwsSigningAlgorithm, CoreProviderMetadata,
    CoreResponseMode, CoreResponseType, CoreSubjectIdentifierType,
};
use openidconnect::reqwest::async_http_client;
use openidconnect::{
    AdditionalProviderMetadata, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    DeviceAuthorizationUrl, IssuerUrl, Nonce, PkceCodeChallenge, ProviderMetadata, RedirectUrl,
    Scope, TokenResponse,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use super::IdentityToken;
use crate::errors::{Result, SigstoreError};

/// Default client id.
pub const DEFAULT_CLIENT_ID: &str = "sigstore";

/// Default issuer (the public-good OAuth provider).
pub const DEFAULT_ISSUER: &str = "https://oauth2.sigstore.dev/auth";

/// Default local redirect port.
pub const DEFAULT_REDIRECT_PORT: u16 = 8080;

const AUTH_OK_PAGE: &str = "<html><title>Sigstore Auth</title><body><h1>Sigstore Auth Successful</h1><p>You may now close this page.</p></body></html>";

fn flow_error(e: impl std::fmt::Display) -> SigstoreError {
    SigstoreError::OidcFlowError(e.to_string())
}

/// Token provider that performs a browser-interactive OIDC flow.
pub struct OauthTokenProvider {
    issuer: String,
    client_id: String,
    client_secret: Option<String>,
    redirect_port: u16,
}

impl Default for OauthTokenProvider {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.into(),
            client_id: DEFAULT_CLIENT_ID.into(),
            client_secret: None,
            redirect_port: DEFAULT_REDIRECT_PORT,
        }
    }
}

impl OauthTokenProvider {
    pub fn new(issuer: &str, client_id: &str) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// Set a non-default client secret.
    pub fn with_client_secret(mut self, client_secret: &str) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Set a non-default redirect port.
    pub fn with_redirect_port(mut self, port: u16) -> Self {
        self.redirect_port = port;
        self
    }

    /// Performs the authorization code flow: opens the provider's
    /// authorization URL in a browser, receives the code on a loopback
    /// listener, exchanges it, and verifies the returned id token claims
    /// against the request nonce.
    pub async fn get_token(&self) -> Result<IdentityToken> {
        let provider_metadata = CoreProviderMetadata::discover_async(
            IssuerUrl::new(self.issuer.clone())?,
            async_http_client,
        )
        .await
        .map_err(flow_error)?;

        let client = CoreClient::from_provider_metadata(
            provider_metadata,
            ClientId::new(self.client_id.clone()),
            self.client_secret.clone().map(ClientSecret::new),
        )
        .set_redirect_uri(RedirectUrl::new(format!(
            "http://localhost:{}/",
            self.redirect_port
        ))?);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (authorize_url, csrf_token, nonce) = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .add_scope(Scope::new("email".to_string()))
            .set_pkce_challenge(pkce_challenge)
            .url();

        if webbrowser::open(authorize_url.as_str()).is_err() {
            tracing::debug!("could not launch a browser automatically");
        }
        println!(
            "Open this URL in a browser if it does not automatically open for you:\n{authorize_url}\n"
        );

        let (code, state) = receive_authorization_code(self.redirect_port).await?;
        if state.secret() != csrf_token.secret() {
            return Err(SigstoreError::OidcFlowError(
                "authorization state did not match the request".into(),
            ));
        }

        let token_response = client
            .exchange_code(code)
            .set_pkce_verifier(pkce_verifier)
            .request_async(async_http_client)
            .await
            .map_err(flow_error)?;

        let id_token = token_response.id_token().ok_or(SigstoreError::NoIDToken)?;
        id_token
            .claims(&client.id_token_verifier(), &nonce)
            .map_err(flow_error)?;

        IdentityToken::try_from(id_token.to_string().as_str())
    }
}

/// Accepts one connection on the loopback redirect port and extracts the
/// `code` and `state` query parameters from the request line.
async fn receive_authorization_code(port: u16) -> Result<(AuthorizationCode, CsrfToken)> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let (mut stream, _) = listener.accept().await?;

    let mut buf = vec![0u8; 4096];
    let read = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..read]).into_owned();

    let request_path = request
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| SigstoreError::OidcFlowError("malformed redirect request".into()))?;
    let url = Url::parse(&format!("http://localhost{request_path}"))?;

    let param = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .ok_or_else(|| SigstoreError::OidcFlowError(format!("redirect missing {key}")))
    };
    let code = AuthorizationCode::new(param("code")?);
    let state = CsrfToken::new(param("state")?);

    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n{}",
        AUTH_OK_PAGE.len(),
        AUTH_OK_PAGE
    );
    stream.write_all(response.as_bytes()).await?;

    Ok((code, state))
}

// The device authorization endpoint is not part of the core discovery
// document, so it comes in through additional provider metadata.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct DeviceEndpointProviderMetadata {
    device_authorization_endpoint: DeviceAuthorizationUrl,
}

impl AdditionalProviderMetadata for DeviceEndpointProviderMetadata {}

type DeviceProviderMetadata = ProviderMetadata<
    DeviceEndpointProviderMetadata,
    CoreAuthDisplay,
    CoreClientAuthMethod,
    CoreClaimName,
    CoreClaimType,
    CoreGrantType,
    CoreJweContentEncryptionAlgorithm,
    CoreJweKeyManagementAlgorithm,
    CoreJwsSigningAlgorithm,
    CoreJsonWebKeyType,
    CoreJsonWebKeyUse,
    CoreJsonWebKey,
    CoreResponseMode,
    CoreResponseType,
    CoreSubjectIdentifierType,
>;

/// Token provider that performs the RFC 8628 device authorization flow:
/// the user visits a verification URL on another device and enters a code
/// while this process polls the token endpoint.
pub struct DeviceCodeTokenProvider {
    issuer: String,
    client_id: String,
}

impl DeviceCodeTokenProvider {
    pub fn new(issuer: &str, client_id: &str) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
        }
    }

    pub async fn get_token(&self) -> Result<IdentityToken> {
        let provider_metadata = DeviceProviderMetadata::discover_async(
            IssuerUrl::new(self.issuer.clone())?,
            async_http_client,
        )
        .await
        .map_err(flow_error)?;
        let device_endpoint = provider_metadata
            .additional_metadata()
            .device_authorization_endpoint
            .clone();

        let client = CoreClient::from_provider_metadata(
            provider_metadata,
            ClientId::new(self.client_id.clone()),
            None,
        )
        .set_device_authorization_uri(device_endpoint)
        .set_auth_type(openidconnect::AuthType::RequestBody);

        let details: CoreDeviceAuthorizationResponse = client
            .exchange_device_code()
            .map_err(flow_error)?
            .add_scope(Scope::new("email".to_string()))
            .request_async(async_http_client)
            .await
            .map_err(flow_error)?;

        println!(
            "On another device, open {} and enter the code: {}",
            details.verification_uri().as_str(),
            details.user_code().secret()
        );

        let token_response = client
            .exchange_device_access_token(&details)
            .request_async(async_http_client, tokio::time::sleep, None)
            .await
            .map_err(flow_error)?;

        let id_token = token_response.id_token().ok_or(SigstoreError::NoIDToken)?;
        IdentityToken::try_from(id_token.to_string().as_str())
    }
}
