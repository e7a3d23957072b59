//! Wallets and addresses
//!
//! Key pair generation, address derivation and checksum validation, plus the
//! wallet file used by the CLI.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    convert_address, hash_pub_key, pub_key_hash_from_address, validate_address, Wallet,
    ADDRESS_CHECK_SUM_LEN,
};
pub use wallets::Wallets;
