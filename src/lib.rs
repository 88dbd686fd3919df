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

//! Keyless artifact signing for a [sigstore](https://sigstore.dev/)-style
//! ecosystem.
//!
//! A [`sign::KeylessSigner`] binds a short-lived certificate (issued by a
//! CA against an OIDC identity) to detached signatures over artifact
//! digests, anchors each signature in a transparency log, and returns a
//! verifiable [`sign::SigningBundle`]. The roots of trust used for every
//! verification step come from a TUF repository refreshed at signer
//! construction.
//!
//! ```no_run
//! use sigstore_keyless::sign::{KeylessSigner, SignerConfig};
//!
//! # async fn example() -> sigstore_keyless::errors::Result<()> {
//! let signer = KeylessSigner::new(SignerConfig::sigstore_public_defaults()).await?;
//! let bundle = signer.sign_file("artifact.tar.gz").await?;
//! println!("anchored at log index {}", bundle.entry.log_index);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub(crate) mod canonical_json;
pub mod crypto;
pub mod errors;
pub mod fulcio;
pub mod oauth;
pub mod rekor;
pub mod sign;
pub mod trust;
pub mod tuf;

pub use crate::errors::{Result, SigstoreError};
pub use crate::sign::{KeylessSigner, OidcFlow, SignerConfig, SigningBundle};
