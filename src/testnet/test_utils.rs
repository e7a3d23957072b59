//! Test utilities for chain and protocol tests

use crate::core::{Block, Blockchain, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::{Message, NodeContext, Transport};
use crate::storage::UTXOSet;
use crate::wallet::Wallet;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Easy enough that a block is found within a handful of nonces.
pub const TEST_DIFFICULTY: u32 = 2;

/// Records every message instead of delivering it; addresses in `unreachable` fail.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, Message)>>,
    unreachable: Vec<String>,
}

impl RecordingTransport {
    pub fn new() -> RecordingTransport {
        RecordingTransport::default()
    }

    pub fn with_unreachable(addrs: &[&str]) -> RecordingTransport {
        RecordingTransport {
            sent: Mutex::new(vec![]),
            unreachable: addrs.iter().map(|addr| addr.to_string()).collect(),
        }
    }

    pub fn sent(&self) -> Vec<(String, Message)> {
        self.sent.lock().unwrap().clone()
    }

    /// Messages with the given command, in send order.
    pub fn sent_with_command(&self, command: &str) -> Vec<(String, Message)> {
        self.sent()
            .into_iter()
            .filter(|(_, message)| message.command() == command)
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for RecordingTransport {
    fn send(&self, addr: &str, message: &Message) -> Result<()> {
        if self.unreachable.iter().any(|unreachable| unreachable == addr) {
            return Err(BlockchainError::Network(format!("{addr} refused connection")));
        }
        self.sent
            .lock()
            .unwrap()
            .push((addr.to_string(), message.clone()));
        Ok(())
    }
}

/// A fresh chain whose genesis reward goes to the returned wallet.
pub fn create_test_blockchain() -> Result<(Blockchain, Wallet, TempDir)> {
    let temp_dir = tempfile::tempdir()?;
    let wallet = Wallet::new()?;
    let blockchain = Blockchain::create_blockchain_with_path(
        &wallet.get_address(),
        temp_dir.path().join("chain"),
        TEST_DIFFICULTY,
    )?;
    Ok((blockchain, wallet, temp_dir))
}

/// Same as [`create_test_blockchain`] with a reindexed UTXO set on top.
pub fn create_test_utxo_set() -> Result<(UTXOSet, Wallet, TempDir)> {
    let (blockchain, wallet, temp_dir) = create_test_blockchain()?;
    let utxo_set = UTXOSet::new(blockchain)?;
    utxo_set.reindex()?;
    Ok((utxo_set, wallet, temp_dir))
}

/// A node with no chain yet, as a joining node starts out.
pub fn create_empty_utxo_set() -> Result<(UTXOSet, TempDir)> {
    let temp_dir = tempfile::tempdir()?;
    let blockchain = Blockchain::open_or_empty(temp_dir.path().join("chain"), TEST_DIFFICULTY)?;
    Ok((UTXOSet::new(blockchain)?, temp_dir))
}

/// Node state at `node_addr` knowing `seed_nodes`, wired to a recording transport.
pub fn create_test_context(
    node_addr: &str,
    seed_nodes: &[&str],
    utxo_set: UTXOSet,
) -> (NodeContext, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::new());
    let seeds: Vec<String> = seed_nodes.iter().map(|seed| seed.to_string()).collect();
    let ctx = NodeContext::new(node_addr, &seeds, utxo_set, transport.clone());
    (ctx, transport)
}

/// Mines a block holding only a coinbase to `miner` and folds it into the UTXO set.
pub fn mine_coinbase_block(utxo_set: &UTXOSet, miner: &Wallet, memo: &str) -> Result<Block> {
    let coinbase_tx = Transaction::new_coinbase_tx(&miner.get_address(), memo)?;
    let block = utxo_set.get_blockchain().mine_block(&[coinbase_tx])?;
    utxo_set.update(&block)?;
    Ok(block)
}

/// Every block of `blockchain`, oldest first.
pub fn collect_blocks(blockchain: &Blockchain) -> Result<Vec<Block>> {
    let mut blocks = blockchain.iterator()?.collect::<Result<Vec<Block>>>()?;
    blocks.reverse();
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::GetBlocksPayload;

    #[test]
    fn test_create_test_blockchain() {
        let (blockchain, _wallet, _dir) = create_test_blockchain().unwrap();
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
        assert_eq!(blockchain.get_difficulty(), TEST_DIFFICULTY);
    }

    #[test]
    fn test_collect_blocks_is_oldest_first() {
        let (utxo_set, wallet, _dir) = create_test_utxo_set().unwrap();
        mine_coinbase_block(&utxo_set, &wallet, "1").unwrap();
        mine_coinbase_block(&utxo_set, &wallet, "2").unwrap();

        let heights: Vec<usize> = collect_blocks(utxo_set.get_blockchain())
            .unwrap()
            .iter()
            .map(Block::get_height)
            .collect();
        assert_eq!(heights, vec![0, 1, 2]);
    }

    #[test]
    fn test_recording_transport_fails_unreachable() {
        let transport = RecordingTransport::with_unreachable(&["localhost:3009"]);
        let message = Message::GetBlocks(GetBlocksPayload {
            addr_from: "localhost:3001".to_string(),
        });

        assert!(transport.send("localhost:3009", &message).is_err());
        transport.send("localhost:3000", &message).unwrap();
        assert_eq!(
            transport.sent(),
            vec![("localhost:3000".to_string(), message)]
        );
    }
}
