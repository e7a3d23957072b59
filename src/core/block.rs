use crate::core::{MerkleProof, MerkleTree, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    prev_block_hash: Vec<u8>, // empty for genesis
    hash: Vec<u8>,
    transactions: Vec<Transaction>,
    nonce: u64,
    height: usize,
    difficulty: u32,
}

impl Block {
    /// Assembles a block on top of `prev_block_hash` and mines it.
    pub fn new_block(
        prev_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
        difficulty: u32,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            timestamp: current_timestamp()?,
            prev_block_hash,
            hash: vec![],
            transactions: transactions.to_vec(),
            nonce: 0,
            height,
            difficulty,
        };

        let (nonce, hash) = ProofOfWork::new_proof_of_work(&block)?.run()?;
        block.nonce = nonce;
        block.hash = hash;
        info!(
            "Mined block {} at height {height} (difficulty {difficulty})",
            HEXLOWER.encode(&block.hash)
        );

        Ok(block)
    }

    pub fn generate_genesis_block(transaction: &Transaction, difficulty: u32) -> Result<Block> {
        Block::new_block(vec![], std::slice::from_ref(transaction), 0, difficulty)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_prev_block_hash(&self) -> &[u8] {
        self.prev_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_empty()
    }

    /// Merkle root over the serialized transactions; the header's transaction commitment.
    pub fn hash_transactions(&self) -> Result<Vec<u8>> {
        Ok(MerkleTree::new(&self.transactions)?.root_hash().to_vec())
    }

    pub fn generate_merkle_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        MerkleTree::new(&self.transactions)?.generate_proof(transaction_index)
    }

    /// A proof is accepted only if it verifies and commits to this block's root.
    pub fn verify_merkle_proof(&self, proof: &MerkleProof) -> Result<bool> {
        if proof.merkle_root != self.hash_transactions()? {
            return Ok(false);
        }
        Ok(MerkleTree::verify_proof(proof))
    }

    /// Unmined block with arbitrary contents, for codec and storage tests.
    #[cfg(test)]
    pub fn new_test_block(
        prev_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
    ) -> Block {
        Block {
            timestamp: 0,
            prev_block_hash,
            hash: vec![0xAB; 32],
            transactions: transactions.to_vec(),
            nonce: 0,
            height,
            difficulty: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_nonce(mut self, nonce: u64) -> Block {
        self.nonce = nonce;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_difficulty(mut self, difficulty: u32) -> Block {
        self.difficulty = difficulty;
        self
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "============ Block {} ============", HEXLOWER.encode(&self.hash))?;
        writeln!(f, "Height: {}", self.height)?;
        writeln!(f, "Prev. block: {}", HEXLOWER.encode(&self.prev_block_hash))?;
        writeln!(f, "Timestamp: {}", self.timestamp)?;
        writeln!(f, "Difficulty: {}, nonce: {}", self.difficulty, self.nonce)?;
        for tx in &self.transactions {
            write!(f, "{tx}")?;
        }
        Ok(())
    }
}
