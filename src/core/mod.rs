//! Core blockchain functionality
//!
//! Blocks, the sled-backed chain store, Merkle commitments, proof-of-work and
//! UTXO-model transactions.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator, GENESIS_COINBASE_DATA};
pub use merkle::{MerkleProof, MerkleTree, ProofElement};
pub use proof_of_work::{ProofOfWork, MAX_NONCE};
pub use transaction::{PrevTransactions, TXInput, TXOutput, Transaction, COINBASE_VOUT, SUBSIDY};
