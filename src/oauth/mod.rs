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

//! OIDC identity tokens and the flows that obtain them.
//!
//! The signing pipeline treats the token as opaque: it is parsed only far
//! enough to extract the subject used in the certificate request and the
//! validity period. Verification of the token is the CA's job.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use base64::engine::general_purpose::URL_SAFE_NO_PAD as base64_url;
use base64::Engine as _;

use crate::errors::{Result, SigstoreError};

pub mod ambient;
pub mod openidflow;

/// The **unverified** claim set of an identity token.
///
/// Nothing in here is used to enforce security invariants; the CA verifies
/// the token against the issuer before acting on it.
#[derive(Debug, Clone, Deserialize)]
struct UnverifiedClaims {
    iss: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    exp: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    nbf: Option<DateTime<Utc>>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    sub: Option<String>,
}

/// A signed OIDC identity token in compact JWT form.
#[derive(Clone)]
pub struct IdentityToken {
    original_token: String,
    claims: UnverifiedClaims,
}

impl IdentityToken {
    /// The identity the CA will bind into the issued certificate: the
    /// `email` claim when present (interactive flows), otherwise `sub`
    /// (workload identities).
    pub fn subject(&self) -> &str {
        self.claims
            .email
            .as_deref()
            .or(self.claims.sub.as_deref())
            .unwrap_or_default()
    }

    /// Whether the current time is within the token's validity period.
    pub fn in_validity_period(&self) -> bool {
        let now = Utc::now();
        match self.claims.nbf {
            Some(nbf) => nbf <= now && now < self.claims.exp,
            None => now < self.claims.exp,
        }
    }
}

impl TryFrom<&str> for IdentityToken {
    type Error = SigstoreError;

    fn try_from(value: &str) -> Result<Self> {
        let parts: Vec<_> = value.split('.').collect();
        let [_, claims, _] = parts.as_slice() else {
            return Err(SigstoreError::IdentityTokenError("malformed JWT".into()));
        };

        let claims = base64_url.decode(claims).map_err(|_| {
            SigstoreError::IdentityTokenError("unable to decode claims".into())
        })?;
        let claims: UnverifiedClaims = serde_json::from_slice(&claims)
            .map_err(|e| SigstoreError::IdentityTokenError(format!("claims malformed: {e}")))?;

        if claims.email.is_none() && claims.sub.is_none() {
            return Err(SigstoreError::IdentityTokenError(
                "token carries neither email nor sub".into(),
            ));
        }

        Ok(IdentityToken {
            original_token: value.to_owned(),
            claims,
        })
    }
}

impl std::fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.original_token)
    }
}

impl std::fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The raw token is a credential; keep it out of debug output.
        f.debug_struct("IdentityToken")
            .field("iss", &self.claims.iss)
            .field("subject", &self.subject())
            .finish_non_exhaustive()
    }
}

/// Provider for identity tokens, polymorphic over how the token is
/// obtained. Every variant resolves to the same `(token, subject)` pair.
pub enum TokenProvider {
    /// A token supplied out of band.
    Static(IdentityToken),
    /// Browser-interactive authorization code flow with PKCE.
    Interactive(openidflow::OauthTokenProvider),
    /// RFC 8628 device authorization flow, for hosts without a browser.
    DeviceCode(openidflow::DeviceCodeTokenProvider),
    /// Credentials detected from the running environment
    /// (CI identity endpoints, metadata servers, well-known variables).
    Ambient,
}

impl TokenProvider {
    /// Retrieve a token from the provider.
    pub async fn get_token(&self) -> Result<IdentityToken> {
        match self {
            TokenProvider::Static(token) => Ok(token.clone()),
            TokenProvider::Interactive(provider) => provider.get_token().await,
            TokenProvider::DeviceCode(provider) => provider.get_token().await,
            TokenProvider::Ambient => ambient::detect_token(&reqwest::Client::new()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_jwt(claims: serde_json::Value) -> String {
        let header = base64_url.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = base64_url.encode(claims.to_string().as_bytes());
        format!("{header}.{payload}.c2lnbmF0dXJl")
    }

    #[test]
    fn parse_interactive_token() {
        let exp = (Utc::now() + chrono::TimeDelta::minutes(5)).timestamp();
        let jwt = make_jwt(serde_json::json!({
            "iss": "https://oauth2.sigstore.dev/auth",
            "aud": "sigstore",
            "exp": exp,
            "email": "dev@example.com",
        }));

        let token = IdentityToken::try_from(jwt.as_str()).unwrap();
        assert_eq!(token.subject(), "dev@example.com");
        assert!(token.in_validity_period());
        assert_eq!(token.to_string(), jwt);
    }

    #[test]
    fn workload_tokens_fall_back_to_sub() {
        let exp = (Utc::now() + chrono::TimeDelta::minutes(5)).timestamp();
        let jwt = make_jwt(serde_json::json!({
            "iss": "https://token.actions.githubusercontent.com",
            "exp": exp,
            "sub": "repo:example/project:ref:refs/heads/main",
        }));

        let token = IdentityToken::try_from(jwt.as_str()).unwrap();
        assert_eq!(token.subject(), "repo:example/project:ref:refs/heads/main");
    }

    #[test]
    fn expired_token_is_out_of_validity() {
        let exp = (Utc::now() - chrono::TimeDelta::minutes(5)).timestamp();
        let jwt = make_jwt(serde_json::json!({
            "iss": "https://oauth2.sigstore.dev/auth",
            "exp": exp,
            "email": "dev@example.com",
        }));

        let token = IdentityToken::try_from(jwt.as_str()).unwrap();
        assert!(!token.in_validity_period());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(IdentityToken::try_from("not-a-jwt").is_err());
        assert!(IdentityToken::try_from("a.b").is_err());

        // Well-formed JWT without an identity claim.
        let exp = (Utc::now() + chrono::TimeDelta::minutes(5)).timestamp();
        let jwt = make_jwt(serde_json::json!({ "iss": "x", "exp": exp }));
        assert!(IdentityToken::try_from(jwt.as_str()).is_err());
    }
}
