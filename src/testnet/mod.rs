//! Test network fixtures
//!
//! Throwaway chains at low difficulty, funded wallets and a transport double that
//! records outbound messages instead of opening sockets.

pub mod test_utils;

pub use test_utils::*;
