//! # Ledger Node
//!
//! A minimal proof-of-work cryptocurrency node: an append-only ledger stored in
//! sled, an index of unspent outputs, ECDSA-signed UTXO transactions and a small
//! gossip protocol that keeps nodes in sync and lets miners turn pending
//! transactions into blocks.
//!
//! ## Layout
//! - `core/`: blocks, the chain store, Merkle trees, proof-of-work, transactions
//! - `storage/`: UTXO index, mempool, blocks in transit
//! - `wallet/`: key pairs, addresses, the wallet file
//! - `network/`: wire messages, transport, node state, the TCP server
//! - `config/`: node settings
//! - `utils/`: hashing, signing, base58 and the record codec
//! - `cli/`: command-line parsing for the binary

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    Block, Blockchain, BlockchainIterator, MerkleProof, MerkleTree, ProofOfWork, TXInput,
    TXOutput, Transaction, SUBSIDY,
};
pub use error::{BlockchainError, Result};
pub use network::{NodeContext, Server, TcpTransport, Transport};
pub use storage::{BlockInTransit, MemoryPool, UTXOSet, UnspentOutput};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    convert_address, hash_pub_key, pub_key_hash_from_address, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
