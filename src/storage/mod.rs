//! Data storage and persistence
//!
//! The UTXO index lives in the node's sled database next to the chain. The memory
//! pool and the blocks-in-transit queue are in-memory node state, lost on restart.

pub mod memory_pool;
pub mod utxo_set;

pub use memory_pool::{BlockInTransit, MemoryPool};
pub use utxo_set::{UTXOSet, UnspentOutput, UtxoMap};
