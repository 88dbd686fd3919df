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

//! The keyless signing pipeline.
//!
//! One signing runs OIDC -> CA -> transparency log in sequence: obtain an
//! identity token, generate an ephemeral keypair, exchange both for a
//! short-lived certificate, sign the artifact digests, anchor each
//! signature in the log, and verify everything that came back before the
//! bundle is handed out. Batches share one token and one keypair; the
//! private key is dropped (and zeroized) on every exit path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as base64_std;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use url::Url;
use x509_cert::der::EncodePem;

use sigstore_protobuf_specs::dev::sigstore::bundle::v1::{
    bundle, verification_material, Bundle, VerificationMaterial,
};
use sigstore_protobuf_specs::dev::sigstore::common::v1::{
    HashAlgorithm, HashOutput, LogId, MessageSignature, X509Certificate,
};
use sigstore_protobuf_specs::dev::sigstore::rekor::v1::{
    Checkpoint, InclusionPromise, InclusionProof, KindVersion, TransparencyLogEntry,
};

use crate::crypto::{ArtifactDigest, EphemeralKeyPair};
use crate::errors::{Result, SigstoreError};
use crate::fulcio::{self, FulcioClient};
use crate::oauth::openidflow::{DeviceCodeTokenProvider, OauthTokenProvider};
use crate::oauth::TokenProvider;
use crate::rekor::models::LogEntry;
use crate::rekor::{self, RekorClient};
use crate::trust::TrustRoot;
use crate::tuf::{FileSystemStore, HttpTransport, TufClient};

/// Metadata base of the public-good TUF repository.
pub const SIGSTORE_METADATA_BASE: &str = "https://tuf-repo-cdn.sigstore.dev/";

/// Target base of the public-good TUF repository.
pub const SIGSTORE_TARGET_BASE: &str = "https://tuf-repo-cdn.sigstore.dev/targets/";

/// The TUF target holding the trust root.
pub const TRUSTED_ROOT_TARGET: &str = "trusted_root.json";

const BUNDLE_V03_MEDIA_TYPE: &str = "application/vnd.dev.sigstore.bundle.v0.3+json";

/// How the signer obtains its identity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OidcFlow {
    /// Browser authorization code flow with PKCE on a loopback redirect.
    Interactive,
    /// RFC 8628 device authorization flow, for hosts without a browser.
    DeviceCode,
    /// Workload credentials detected from the running environment.
    Ambient,
}

/// Signer configuration: a plain record with a preset for the public-good
/// instance. Every knob is an ordinary field; construct the preset and
/// overwrite what differs.
pub struct SignerConfig {
    /// TUF repository metadata base URL (must end in `/`).
    pub tuf_metadata_url: Url,
    /// TUF repository target base URL (must end in `/`).
    pub tuf_target_url: Url,
    /// Bootstrap TUF root document. When absent, the repository's
    /// `1.root.json` is fetched and trusted on first use.
    pub tuf_root: Option<Vec<u8>>,
    /// Directory for the local TUF store. Defaults to a per-user location
    /// under the system temp directory.
    pub tuf_cache_dir: Option<PathBuf>,
    pub oidc_issuer: String,
    pub oidc_client_id: String,
    pub fulcio_url: Url,
    pub rekor_url: Url,
    /// Which OIDC flow obtains the identity token.
    pub oidc_flow: OidcFlow,
    /// HTTP client shared by every component.
    pub http: reqwest::Client,
    /// Time source used for every validity decision.
    pub clock: fn() -> DateTime<Utc>,
}

impl SignerConfig {
    /// Configuration for the public-good instance.
    pub fn sigstore_public_defaults() -> Self {
        Self {
            tuf_metadata_url: Url::parse(SIGSTORE_METADATA_BASE)
                .expect("default TUF metadata URL fails to parse"),
            tuf_target_url: Url::parse(SIGSTORE_TARGET_BASE)
                .expect("default TUF target URL fails to parse"),
            tuf_root: None,
            tuf_cache_dir: None,
            oidc_issuer: crate::oauth::openidflow::DEFAULT_ISSUER.into(),
            oidc_client_id: crate::oauth::openidflow::DEFAULT_CLIENT_ID.into(),
            fulcio_url: Url::parse(fulcio::FULCIO_ROOT)
                .expect("default CA URL fails to parse"),
            rekor_url: Url::parse(rekor::REKOR_ROOT)
                .expect("default transparency log URL fails to parse"),
            oidc_flow: OidcFlow::Interactive,
            http: reqwest::Client::new(),
            clock: Utc::now,
        }
    }
}

/// The output of one signing: everything a verifier needs.
#[derive(Debug, Clone)]
pub struct SigningBundle {
    pub digest: ArtifactDigest,
    /// DER-encoded certificate chain, leaf first.
    pub cert_chain: Vec<Vec<u8>>,
    /// ASN.1 DER signature over the digest.
    pub signature: Vec<u8>,
    /// The verified transparency log entry, inclusion proof and SET
    /// included.
    pub entry: LogEntry,
}

impl SigningBundle {
    /// Serializes this bundle into the interchange `Bundle` message.
    pub fn to_bundle(&self) -> Result<Bundle> {
        let leaf = self
            .cert_chain
            .first()
            .ok_or_else(|| SigstoreError::UnexpectedError("bundle without certificate".into()))?
            .clone();

        let verification_material = Some(VerificationMaterial {
            timestamp_verification_data: None,
            tlog_entries: vec![tlog_entry_proto(&self.entry)?],
            content: Some(verification_material::Content::Certificate(
                X509Certificate { raw_bytes: leaf },
            )),
        });

        let message_signature = MessageSignature {
            message_digest: Some(HashOutput {
                algorithm: HashAlgorithm::Sha2256.into(),
                digest: self.digest.as_bytes().to_vec(),
            }),
            signature: self.signature.clone(),
        };

        Ok(Bundle {
            media_type: BUNDLE_V03_MEDIA_TYPE.to_string(),
            verification_material,
            content: Some(bundle::Content::MessageSignature(message_signature)),
        })
    }
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value)
        .map_err(|_| SigstoreError::UnexpectedError(format!("{field} is not hex")))
}

fn tlog_entry_proto(entry: &LogEntry) -> Result<TransparencyLogEntry> {
    let inclusion_proof = entry
        .verification
        .inclusion_proof
        .as_ref()
        .map(|proof| -> Result<InclusionProof> {
            Ok(InclusionProof {
                log_index: proof.log_index,
                root_hash: decode_hex("root hash", &proof.root_hash)?,
                tree_size: proof.tree_size,
                hashes: proof
                    .hashes
                    .iter()
                    .map(|h| decode_hex("audit path hash", h))
                    .collect::<Result<_>>()?,
                checkpoint: proof
                    .checkpoint
                    .clone()
                    .map(|envelope| Checkpoint { envelope }),
            })
        })
        .transpose()?;

    Ok(TransparencyLogEntry {
        log_index: entry.log_index,
        log_id: Some(LogId {
            key_id: decode_hex("log id", &entry.log_id)?,
        }),
        kind_version: Some(KindVersion {
            kind: "hashedrekord".into(),
            version: "0.0.1".into(),
        }),
        integrated_time: entry.integrated_time,
        inclusion_promise: Some(InclusionPromise {
            signed_entry_timestamp: base64_std
                .decode(&entry.verification.signed_entry_timestamp)
                .map_err(|_| SigstoreError::UnexpectedError("SET is not base64".into()))?,
        }),
        inclusion_proof,
        canonicalized_body: entry.decode_body().map_err(SigstoreError::RekorError)?,
    })
}

/// A keyless signer.
///
/// Construction refreshes the TUF repository and parses the trust root;
/// both are immutable for the signer's lifetime, so a constructed signer
/// can be shared across tasks.
pub struct KeylessSigner {
    trust_root: TrustRoot,
    token_provider: TokenProvider,
    fulcio: FulcioClient,
    rekor: RekorClient,
    clock: fn() -> DateTime<Utc>,
}

impl KeylessSigner {
    /// Builds a signer from the configuration, choosing the token provider
    /// from the configured OIDC flow.
    pub async fn new(config: SignerConfig) -> Result<Self> {
        let token_provider = match config.oidc_flow {
            OidcFlow::Interactive => TokenProvider::Interactive(OauthTokenProvider::new(
                &config.oidc_issuer,
                &config.oidc_client_id,
            )),
            OidcFlow::DeviceCode => TokenProvider::DeviceCode(DeviceCodeTokenProvider::new(
                &config.oidc_issuer,
                &config.oidc_client_id,
            )),
            OidcFlow::Ambient => TokenProvider::Ambient,
        };
        Self::new_with_token_provider(config, token_provider).await
    }

    /// Builds a signer with an explicit token provider.
    pub async fn new_with_token_provider(
        config: SignerConfig,
        token_provider: TokenProvider,
    ) -> Result<Self> {
        let trust_root = fetch_trust_root(&config).await?;

        Ok(Self {
            trust_root,
            token_provider,
            fulcio: FulcioClient::new(config.fulcio_url, config.http.clone()),
            rekor: RekorClient::new(config.rekor_url, config.http),
            clock: config.clock,
        })
    }

    /// The trust root this signer verifies against.
    pub fn trust_root(&self) -> &TrustRoot {
        &self.trust_root
    }

    /// Signs a single digest.
    pub async fn sign_digest(&self, digest: ArtifactDigest) -> Result<SigningBundle> {
        let mut bundles = self.sign_digests(std::slice::from_ref(&digest)).await?;
        bundles
            .pop()
            .ok_or_else(|| SigstoreError::UnexpectedError("signing produced no bundle".into()))
    }

    /// Signs a batch of digests with one identity token and one ephemeral
    /// keypair, one certificate reused across the batch.
    ///
    /// An empty batch returns an empty result without touching the
    /// network. The batch fails atomically: the first failing digest
    /// aborts, and no partial result is returned.
    pub async fn sign_digests(&self, digests: &[ArtifactDigest]) -> Result<Vec<SigningBundle>> {
        if digests.is_empty() {
            return Ok(Vec::new());
        }

        let token = self.token_provider.get_token().await?;
        let key_pair = EphemeralKeyPair::generate();

        let certs = self.fulcio.request_cert(&token, &key_pair).await?;
        fulcio::verify_issued_certificate(
            &certs,
            &self.trust_root,
            &key_pair.public_key_to_der()?,
            (self.clock)(),
        )?;

        let cert_pem = certs
            .cert
            .to_pem(pkcs8::LineEnding::LF)
            .map_err(|e| SigstoreError::UnexpectedError(e.to_string()))?;
        let mut cert_chain = vec![certs.cert_der()?];
        cert_chain.extend(certs.chain_der()?);

        let mut bundles = Vec::with_capacity(digests.len());
        for digest in digests {
            let signature = key_pair.sign_prehash(digest.as_bytes())?;
            // Self-check before anything leaves the process: the signature
            // must verify under the certified key.
            key_pair
                .verification_key()
                .verify_prehash(&signature, digest.as_bytes())?;

            let proposed = rekor::proposed_hashedrekord(&cert_pem, digest, &signature);
            let entry = self.rekor.create_entry(&proposed).await?;
            rekor::verify_entry(&entry, &self.trust_root)?;

            bundles.push(SigningBundle {
                digest: *digest,
                cert_chain: cert_chain.clone(),
                signature,
                entry,
            });
        }

        Ok(bundles)
    }

    /// Reads a file, digests it with SHA-256, and signs the digest.
    pub async fn sign_file(&self, path: impl AsRef<Path>) -> Result<SigningBundle> {
        let digest = ArtifactDigest::from_file(path).await?;
        self.sign_digest(digest).await
    }

    /// Signs a set of files, one bundle per distinct path. Duplicate paths
    /// collapse to a single signing.
    pub async fn sign_files(
        &self,
        paths: &[PathBuf],
    ) -> Result<HashMap<PathBuf, SigningBundle>> {
        let (unique, digests) = digest_files(paths).await?;
        let bundles = self.sign_digests(&digests).await?;
        Ok(unique.into_iter().zip(bundles).collect())
    }
}

/// Digests each distinct path, preserving first-occurrence order.
async fn digest_files(paths: &[PathBuf]) -> Result<(Vec<PathBuf>, Vec<ArtifactDigest>)> {
    let mut unique: Vec<PathBuf> = Vec::new();
    for path in paths {
        if !unique.contains(path) {
            unique.push(path.clone());
        }
    }

    let mut digests = Vec::with_capacity(unique.len());
    for path in &unique {
        digests.push(ArtifactDigest::from_file(path).await?);
    }
    Ok((unique, digests))
}

/// Refreshes the TUF repository and parses the trust root target.
async fn fetch_trust_root(config: &SignerConfig) -> Result<TrustRoot> {
    let bootstrap_root = match &config.tuf_root {
        Some(root) => root.clone(),
        None => {
            // Trust-on-first-use bootstrap. Deployments that care should
            // pin a root in the configuration.
            tracing::warn!("no TUF root pinned; trusting the repository's 1.root.json");
            config
                .http
                .get(config.tuf_metadata_url.join("1.root.json")?)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?
                .to_vec()
        }
    };

    let cache_dir = config
        .tuf_cache_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("sigstore-keyless-tuf"));

    let transport = HttpTransport::new(
        config.http.clone(),
        config.tuf_metadata_url.clone(),
        config.tuf_target_url.clone(),
    );
    let mut tuf = TufClient::new(transport, FileSystemStore::open(cache_dir)?, bootstrap_root)
        .with_clock(config.clock);

    tuf.update().await?;
    let data = tuf.target_bytes(TRUSTED_ROOT_TARGET).await?;
    Ok(TrustRoot::from_trusted_root_json(&data)?)
}
