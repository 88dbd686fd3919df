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

//! Wire models for the transparency log.

use base64::engine::general_purpose::STANDARD as base64_std;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::RekorError;

/// A log entry proposed for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProposedEntry {
    Hashedrekord {
        #[serde(rename = "apiVersion")]
        api_version: String,
        spec: hashedrekord::Spec,
    },
}

pub mod hashedrekord {
    //! The hashedrekord entry kind: a detached signature over a digest.

    use serde::{Deserialize, Serialize};

    pub const API_VERSION: &str = "0.0.1";

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Spec {
        pub signature: Signature,
        pub data: Data,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Signature {
        /// Base64-encoded DER signature.
        pub content: String,
        #[serde(rename = "publicKey")]
        pub public_key: PublicKey,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PublicKey {
        /// Base64-encoded PEM document (the signing certificate).
        pub content: String,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Data {
        pub hash: Hash,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Hash {
        pub algorithm: AlgorithmKind,
        /// Hex-encoded digest.
        pub value: String,
    }

    #[allow(non_camel_case_types)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum AlgorithmKind {
        sha256,
    }
}

/// An integrated entry as returned by the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// The entry's UUID: the response keys entries by it.
    #[serde(skip)]
    pub uuid: String,
    /// Base64-encoded canonical entry body.
    pub body: String,
    pub integrated_time: i64,
    #[serde(rename = "logID")]
    pub log_id: String,
    pub log_index: i64,
    pub verification: Verification,
}

impl LogEntry {
    /// The canonical entry body bytes the log committed to.
    pub fn decode_body(&self) -> Result<Vec<u8>, RekorError> {
        base64_std
            .decode(&self.body)
            .map_err(|e| RekorError::MalformedResponse(format!("body is not base64: {e}")))
    }
}

/// The log's commitment to an entry: a signed entry timestamp, and an
/// inclusion proof once the entry is merged into the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inclusion_proof: Option<InclusionProof>,
    /// Base64-encoded signature over (body, integratedTime, logID, logIndex).
    pub signed_entry_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    /// Hex-encoded audit path, bottom-up.
    pub hashes: Vec<String>,
    /// The entry's index within the tree.
    pub log_index: i64,
    /// Hex-encoded root hash of the tree the proof applies to.
    pub root_hash: String,
    pub tree_size: i64,
    /// The signed checkpoint covering the tree head, in note format.
    #[serde(default)]
    pub checkpoint: Option<String>,
}

/// The tree head fields of a checkpoint note: origin line, tree size, and
/// base64 root hash, separated from the signature block by a blank line.
pub(crate) fn checkpoint_root_hash(checkpoint: &str) -> Result<[u8; 32], RekorError> {
    let note = checkpoint
        .split("\n\n")
        .next()
        .ok_or_else(|| RekorError::MalformedResponse("empty checkpoint".into()))?;
    let mut lines = note.lines();
    let (_origin, _size, hash_b64) = match (lines.next(), lines.next(), lines.next()) {
        (Some(origin), Some(size), Some(hash)) => (origin, size, hash),
        _ => {
            return Err(RekorError::MalformedResponse(
                "checkpoint note is not in origin/size/hash form".into(),
            ))
        }
    };

    let decoded = base64_std
        .decode(hash_b64)
        .map_err(|_| RekorError::MalformedResponse("checkpoint root hash is not base64".into()))?;
    decoded
        .try_into()
        .map_err(|_| RekorError::MalformedResponse("checkpoint root hash is not 32 bytes".into()))
}
