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

//! Merkle tree hashing and inclusion proofs as defined in
//! [RFC 6962](https://www.rfc-editor.org/rfc/rfc6962.html#section-2.1),
//! with SHA-256 as the hash function.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Domain separation prefixes added to the data before hashing.
const LEAF_HASH_PREFIX: u8 = 0;
const NODE_HASH_PREFIX: u8 = 1;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MerkleProofError {
    #[error("inclusion proof: leaf index {index} >= tree size {tree_size}")]
    IndexBeyondTreeSize { index: u64, tree_size: u64 },

    #[error("inclusion proof: wrong proof size (got {got}, want {want})")]
    WrongProofSize { got: usize, want: usize },

    #[error("inclusion proof: computed root {computed} does not match expected root {expected}")]
    MismatchedRoot { computed: String, expected: String },
}

/// Leaf hashes are calculated as `hash(0x00 || leaf)`.
pub fn hash_leaf(leaf: impl AsRef<[u8]>) -> [u8; 32] {
    Sha256::new()
        .chain_update([LEAF_HASH_PREFIX])
        .chain_update(leaf)
        .finalize()
        .into()
}

/// Interior node hashes are calculated as `hash(0x01 || left || right)`.
pub fn hash_children(left: impl AsRef<[u8]>, right: impl AsRef<[u8]>) -> [u8; 32] {
    Sha256::new()
        .chain_update([NODE_HASH_PREFIX])
        .chain_update(left)
        .chain_update(right)
        .finalize()
        .into()
}

/// Verifies the inclusion proof for the leaf with the given `leaf_hash` and
/// `index`, relative to a tree of `tree_size` entries with the given
/// `root_hash`. Requires `0 <= index < tree_size`.
pub fn verify_inclusion(
    index: u64,
    leaf_hash: &[u8; 32],
    tree_size: u64,
    proof_hashes: &[[u8; 32]],
    root_hash: &[u8; 32],
) -> Result<(), MerkleProofError> {
    let computed = root_from_inclusion_proof(index, leaf_hash, tree_size, proof_hashes)?;
    if &computed != root_hash {
        return Err(MerkleProofError::MismatchedRoot {
            computed: hex::encode(computed),
            expected: hex::encode(root_hash),
        });
    }
    Ok(())
}

/// Calculates the expected root hash for a tree of `tree_size` entries,
/// from a leaf index, leaf hash and the corresponding audit path.
pub fn root_from_inclusion_proof(
    index: u64,
    leaf_hash: &[u8; 32],
    tree_size: u64,
    proof_hashes: &[[u8; 32]],
) -> Result<[u8; 32], MerkleProofError> {
    if index >= tree_size {
        return Err(MerkleProofError::IndexBeyondTreeSize { index, tree_size });
    }

    let (inner, border) = decomp_inclusion_proof(index, tree_size);
    if proof_hashes.len() != inner + border {
        return Err(MerkleProofError::WrongProofSize {
            got: proof_hashes.len(),
            want: inner + border,
        });
    }

    let mut hash = *leaf_hash;
    // Lower part of the path: sibling order depends on the index bits.
    for (i, sibling) in proof_hashes[..inner].iter().enumerate() {
        hash = if (index >> i) & 1 == 0 {
            hash_children(hash, sibling)
        } else {
            hash_children(sibling, hash)
        };
    }
    // Border part: only left-side subtree hashes remain.
    for sibling in &proof_hashes[inner..] {
        hash = hash_children(sibling, hash);
    }

    Ok(hash)
}

/// Splits an inclusion proof for leaf `index` in a tree of `tree_size`
/// entries at the point where the paths to leaves `index` and `tree_size - 1`
/// diverge. Returns the lengths of the lower and border proof parts; their
/// sum is the expected proof length.
fn decomp_inclusion_proof(index: u64, tree_size: u64) -> (usize, usize) {
    let inner = (u64::BITS - (index ^ (tree_size - 1)).leading_zeros()) as usize;
    let border = (index >> inner).count_ones() as usize;
    (inner, border)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // Test data from the transparency-dev Merkle reference implementation.
    struct InclusionCase {
        leaf_index: u64,
        tree_size: u64,
        proof: &'static [[u8; 32]],
    }

    const SHA256_EMPTY_TREE_HASH: [u8; 32] =
        hex!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");

    const ROOTS: [[u8; 32]; 8] = [
        hex!("6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d"),
        hex!("fac54203e7cc696cf0dfcb42c92a1d9dbaf70ad9e621f4bd8d98662f00e3c125"),
        hex!("aeb6bcfe274b70a14fb067a5e5578264db0fa9b51af5e0ba159158f329e06e77"),
        hex!("d37ee418976dd95753c1c73862b9398fa2a2cf9b4ff0fdfe8b30cd95209614b7"),
        hex!("4e3bbb1f7b478dcfe71fb631631519a3bca12c9aefca1612bfce4c13a86264d4"),
        hex!("76e67dadbcdf1e10e1b74ddc608abd2f98dfb16fbce75277b5232a127f2087ef"),
        hex!("ddb89be403809e325750d3d263cd78929c2942b7942a34b77e122c9594a74c8c"),
        hex!("5dc9da79a70659a9ad559cb701ded9a2ab9d823aad2f4960cfe370eff4604328"),
    ];

    const LEAVES: &[&[u8]] = &[
        &hex!(""),
        &hex!("00"),
        &hex!("10"),
        &hex!("2021"),
        &hex!("3031"),
        &hex!("40414243"),
        &hex!("5051525354555657"),
        &hex!("606162636465666768696a6b6c6d6e6f"),
    ];

    const INCLUSION_CASES: &[InclusionCase] = &[
        InclusionCase {
            leaf_index: 0,
            tree_size: 8,
            proof: &[
                hex!("96a296d224f285c67bee93c30f8a309157f0daa35dc5b87e410b78630a09cfc7"),
                hex!("5f083f0a1a33ca076a95279832580db3e0ef4584bdff1f54c8a360f50de3031e"),
                hex!("6b47aaf29ee3c2af9af889bc1fb9254dabd31177f16232dd6aab035ca39bf6e4"),
            ],
        },
        InclusionCase {
            leaf_index: 5,
            tree_size: 8,
            proof: &[
                hex!("bc1a0643b12e4d2d7c77918f44e0f4f79a838b6cf9ec5b5c283e1f4d88599e6b"),
                hex!("ca854ea128ed050b41b35ffc1b87b8eb2bde461e9e3b5596ece6b9d5975a0ae0"),
                hex!("d37ee418976dd95753c1c73862b9398fa2a2cf9b4ff0fdfe8b30cd95209614b7"),
            ],
        },
        InclusionCase {
            leaf_index: 2,
            tree_size: 3,
            proof: &[hex!(
                "fac54203e7cc696cf0dfcb42c92a1d9dbaf70ad9e621f4bd8d98662f00e3c125"
            )],
        },
        InclusionCase {
            leaf_index: 1,
            tree_size: 5,
            proof: &[
                hex!("6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d"),
                hex!("5f083f0a1a33ca076a95279832580db3e0ef4584bdff1f54c8a360f50de3031e"),
                hex!("bc1a0643b12e4d2d7c77918f44e0f4f79a838b6cf9ec5b5c283e1f4d88599e6b"),
            ],
        },
    ];

    #[test]
    fn rfc6962_hasher_vectors() {
        assert_eq!(
            hash_leaf(b""),
            hex!("6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d")
        );
        assert_eq!(
            hash_leaf(b"L123456"),
            hex!("395aa064aa4c29f7010acfe3f25db9485bbd4b91897b6ad7ad547639252b4d56")
        );
        assert_eq!(
            hash_children(b"N123", b"N456"),
            hex!("aa217fe888e47007fa15edab33c2b492a722cb106c64667fc2b044444de66bbb")
        );
    }

    #[test]
    fn hasher_is_domain_separated() {
        let l1 = b"Hello".to_vec();
        let l2 = b"World".to_vec();
        assert_ne!(hash_leaf(&l1), hash_leaf(&l2));
        assert_ne!(hash_children(&l1, &l2), hash_children(&l2, &l1));
        assert_ne!(
            hash_children(&l1, &l2),
            hash_leaf([l1, l2].concat()),
            "hasher is not second-preimage resistant"
        );
    }

    #[test]
    fn verify_known_inclusion_proofs() {
        for case in INCLUSION_CASES {
            let leaf_hash = hash_leaf(LEAVES[case.leaf_index as usize]);
            verify_inclusion(
                case.leaf_index,
                &leaf_hash,
                case.tree_size,
                case.proof,
                &ROOTS[case.tree_size as usize - 1],
            )
            .unwrap_or_else(|e| {
                panic!(
                    "rejected valid proof for leaf {} in tree of {}: {e}",
                    case.leaf_index, case.tree_size
                )
            });
        }
    }

    #[test]
    fn reject_corrupted_inclusion_proofs() {
        for case in INCLUSION_CASES {
            let leaf_hash = hash_leaf(LEAVES[case.leaf_index as usize]);
            let root = &ROOTS[case.tree_size as usize - 1];

            // Wrong leaf index.
            assert!(verify_inclusion(
                case.leaf_index + 1,
                &leaf_hash,
                case.tree_size,
                case.proof,
                root
            )
            .is_err());
            // Wrong leaf hash.
            assert!(verify_inclusion(
                case.leaf_index,
                b"WrongLeafWrongLeafWrongLeafWrong",
                case.tree_size,
                case.proof,
                root
            )
            .is_err());
            // Wrong root.
            assert!(verify_inclusion(
                case.leaf_index,
                &leaf_hash,
                case.tree_size,
                case.proof,
                &SHA256_EMPTY_TREE_HASH
            )
            .is_err());
            // Trailing garbage in the path.
            let mut padded = case.proof.to_vec();
            padded.push([0; 32]);
            assert_eq!(
                verify_inclusion(case.leaf_index, &leaf_hash, case.tree_size, &padded, root),
                Err(MerkleProofError::WrongProofSize {
                    got: case.proof.len() + 1,
                    want: case.proof.len(),
                })
            );
        }
    }

    #[test]
    fn single_entry_tree() {
        let leaf_hash = hash_leaf(b"data");
        verify_inclusion(0, &leaf_hash, 1, &[], &leaf_hash).unwrap();
        assert!(verify_inclusion(0, &leaf_hash, 1, &[], &[0; 32]).is_err());
        assert_eq!(
            verify_inclusion(1, &leaf_hash, 1, &[], &leaf_hash),
            Err(MerkleProofError::IndexBeyondTreeSize {
                index: 1,
                tree_size: 1
            })
        );
    }
}
