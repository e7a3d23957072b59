use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::{debug, info};
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;

/// Upper bound of the nonce search. Running out means the difficulty is misconfigured.
pub const MAX_NONCE: u64 = i64::MAX as u64;

const HASH_BITS: u32 = 256;

pub struct ProofOfWork<'a> {
    block: &'a Block,
    merkle_root: Vec<u8>,
    target: BigInt,
    max_nonce: u64,
}

impl<'a> ProofOfWork<'a> {
    /// Target is `2^(256 - difficulty)`; a header hash below it is a valid proof.
    pub fn new_proof_of_work(block: &'a Block) -> Result<ProofOfWork<'a>> {
        let difficulty = block.get_difficulty();
        if difficulty > HASH_BITS {
            return Err(BlockchainError::Mining(format!(
                "Difficulty {difficulty} exceeds {HASH_BITS} bits"
            )));
        }
        let mut target = BigInt::from(1);
        target.shl_assign(HASH_BITS - difficulty);

        Ok(ProofOfWork {
            block,
            merkle_root: block.hash_transactions()?,
            target,
            max_nonce: MAX_NONCE,
        })
    }

    pub fn with_max_nonce(mut self, max_nonce: u64) -> Self {
        self.max_nonce = max_nonce;
        self
    }

    /// prev hash || merkle root || timestamp (decimal text) || difficulty || nonce
    fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(self.block.get_prev_block_hash());
        data_bytes.extend(&self.merkle_root);
        data_bytes.extend(self.block.get_timestamp().to_string().as_bytes());
        data_bytes.extend(self.block.get_difficulty().to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }

    /// Searches nonces from zero until the header hash meets the target.
    pub fn run(&self) -> Result<(u64, Vec<u8>)> {
        debug!(
            "Mining block at height {} (difficulty {})",
            self.block.get_height(),
            self.block.get_difficulty()
        );
        let mut nonce = 0;
        while nonce < self.max_nonce {
            let hash = sha256_digest(self.prepare_data(nonce).as_slice());
            if self.meets_target(&hash) {
                info!(
                    "Proof-of-work found: {} (nonce {nonce})",
                    HEXLOWER.encode(&hash)
                );
                return Ok((nonce, hash));
            }
            nonce += 1;
        }
        Err(BlockchainError::Mining(format!(
            "No nonce below {} satisfies difficulty {}",
            self.max_nonce,
            self.block.get_difficulty()
        )))
    }

    /// Recomputes the header hash with the stored nonce and checks it against both
    /// the target and the stored hash.
    pub fn validate(block: &Block) -> bool {
        let pow = match ProofOfWork::new_proof_of_work(block) {
            Ok(pow) => pow,
            Err(_) => return false,
        };
        let hash = sha256_digest(pow.prepare_data(block.get_nonce()).as_slice());
        hash.as_slice() == block.get_hash() && pow.meets_target(&hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::wallet::Wallet;

    fn create_test_block(difficulty: u32) -> Block {
        let address = Wallet::new().unwrap().get_address();
        let coinbase_tx = Transaction::new_coinbase_tx(&address, "pow test").unwrap();
        Block::new_block(vec![], &[coinbase_tx], 0, difficulty).unwrap()
    }

    #[test]
    fn test_mined_blocks_validate_across_difficulties() {
        for difficulty in [0, 1, 4, 8, 12] {
            let block = create_test_block(difficulty);
            assert!(ProofOfWork::validate(&block), "difficulty {difficulty}");
        }
    }

    #[test]
    fn test_difficulty_zero_accepts_first_nonce() {
        let block = create_test_block(0);
        assert_eq!(block.get_nonce(), 0);
    }

    #[test]
    fn test_higher_difficulty_has_smaller_target() {
        let easy_block = create_test_block(1);
        let hard_block = create_test_block(2);
        let easy_pow = ProofOfWork::new_proof_of_work(&easy_block).unwrap();
        let hard_pow = ProofOfWork::new_proof_of_work(&hard_block).unwrap();
        assert!(hard_pow.target < easy_pow.target);
    }

    #[test]
    fn test_prepare_data_depends_on_nonce() {
        let block = create_test_block(2);
        let pow = ProofOfWork::new_proof_of_work(&block).unwrap();

        assert_eq!(pow.prepare_data(12345), pow.prepare_data(12345));
        assert_ne!(pow.prepare_data(12345), pow.prepare_data(54321));
    }

    #[test]
    fn test_wrong_nonce_fails_validation() {
        let block = create_test_block(8);
        let tampered = block.clone().with_nonce(block.get_nonce() + 1);
        assert!(!ProofOfWork::validate(&tampered));
    }

    #[test]
    fn test_exhausted_nonce_range_is_an_error() {
        let block = create_test_block(0).with_difficulty(HASH_BITS);
        let pow = ProofOfWork::new_proof_of_work(&block)
            .unwrap()
            .with_max_nonce(16);
        assert!(matches!(pow.run(), Err(BlockchainError::Mining(_))));
    }

    #[test]
    fn test_difficulty_above_hash_width_rejected() {
        let block = create_test_block(0).with_difficulty(HASH_BITS + 1);
        assert!(ProofOfWork::new_proof_of_work(&block).is_err());
        assert!(!ProofOfWork::validate(&block));
    }
}
