use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;

/// Binary hash tree over a block's transactions.
///
/// Leaves are `sha256(serialized tx)`; each internal node is `sha256(left || right)`.
/// A level with an odd number of nodes pairs its last node with itself, at every level.
/// A single transaction's root is its own leaf hash.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// `levels[0]` holds the leaves, the last level holds only the root.
    levels: Vec<Vec<Vec<u8>>>,
}

/// Merkle inclusion proof for one leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf_hash: Vec<u8>,
    pub merkle_root: Vec<u8>,
    pub proof_path: Vec<ProofElement>,
    pub leaf_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofElement {
    pub hash: Vec<u8>,
    /// true if the sibling sits on the right
    pub is_right: bool,
}

impl MerkleTree {
    pub fn new(transactions: &[Transaction]) -> Result<Self> {
        let data = transactions
            .iter()
            .map(Transaction::serialize)
            .collect::<Result<Vec<_>>>()?;
        Self::from_data(&data)
    }

    /// Builds the tree from raw leaf payloads (each is hashed into a leaf).
    pub fn from_data(data: &[Vec<u8>]) -> Result<Self> {
        if data.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Cannot build a Merkle tree from an empty list".to_string(),
            ));
        }

        let mut levels = vec![data.iter().map(|d| sha256_digest(d)).collect::<Vec<_>>()];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next_level = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => Self::hash_pair(left, right),
                    [single] => Self::hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two elements"),
                })
                .collect();
            levels.push(next_level);
        }

        Ok(MerkleTree { levels })
    }

    pub fn root_hash(&self) -> &[u8] {
        // from_data guarantees a non-empty top level
        &self.levels[self.levels.len() - 1][0]
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn generate_proof(&self, leaf_index: usize) -> Result<MerkleProof> {
        if leaf_index >= self.leaf_count() {
            return Err(BlockchainError::InvalidBlock(format!(
                "Leaf index {leaf_index} out of bounds (leaves: {})",
                self.leaf_count()
            )));
        }

        let mut proof_path = Vec::new();
        let mut index = leaf_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_index = index ^ 1;
            let is_right = index % 2 == 0;
            let sibling = level.get(sibling_index).unwrap_or(&level[index]);
            proof_path.push(ProofElement {
                hash: sibling.clone(),
                is_right,
            });
            index /= 2;
        }

        Ok(MerkleProof {
            leaf_hash: self.levels[0][leaf_index].clone(),
            merkle_root: self.root_hash().to_vec(),
            proof_path,
            leaf_index,
        })
    }

    pub fn verify_proof(proof: &MerkleProof) -> bool {
        let computed = proof
            .proof_path
            .iter()
            .fold(proof.leaf_hash.clone(), |current, element| {
                if element.is_right {
                    Self::hash_pair(&current, &element.hash)
                } else {
                    Self::hash_pair(&element.hash, &current)
                }
            });
        computed == proof.merkle_root
    }

    fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut combined = Vec::with_capacity(left.len() + right.len());
        combined.extend_from_slice(left);
        combined.extend_from_slice(right);
        sha256_digest(&combined)
    }
}
