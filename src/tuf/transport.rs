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

//! Transport abstraction for the metadata repository.
//!
//! The client distinguishes "the file does not exist" (a normal outcome:
//! root rotation probes for versions until one is absent) from transport
//! failure, so fetches return `Option<Vec<u8>>`.

use async_trait::async_trait;
use url::Url;

use super::TufError;

#[async_trait]
pub trait MetadataTransport: Send + Sync {
    /// Fetches a metadata file by name (e.g. `2.root.json`).
    /// Returns `None` if the repository does not have it.
    async fn fetch_meta(&self, name: &str) -> Result<Option<Vec<u8>>, TufError>;

    /// Fetches a target file by repository path.
    /// Returns `None` if the repository does not have it.
    async fn fetch_target(&self, name: &str) -> Result<Option<Vec<u8>>, TufError>;
}

/// HTTP transport over a metadata base URL and a target base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    metadata_base: Url,
    target_base: Url,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, metadata_base: Url, target_base: Url) -> Self {
        Self {
            client,
            metadata_base,
            target_base,
        }
    }

    async fn fetch(&self, base: &Url, name: &str) -> Result<Option<Vec<u8>>, TufError> {
        let url = base.join(name).map_err(|e| TufError::Transport {
            url: format!("{base}{name}"),
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| TufError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status().map_err(|e| TufError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let bytes = response.bytes().await.map_err(|e| TufError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(bytes.to_vec()))
    }
}

#[async_trait]
impl MetadataTransport for HttpTransport {
    async fn fetch_meta(&self, name: &str) -> Result<Option<Vec<u8>>, TufError> {
        self.fetch(&self.metadata_base, name).await
    }

    async fn fetch_target(&self, name: &str) -> Result<Option<Vec<u8>>, TufError> {
        self.fetch(&self.target_base, name).await
    }
}
