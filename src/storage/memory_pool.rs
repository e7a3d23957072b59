use crate::core::Transaction;
use data_encoding::HEXLOWER;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// Pending transactions, ( K -> txid_hex, V => Transaction )
pub struct MemoryPool {
    inner: RwLock<HashMap<String, Transaction>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, txid_hex: &str) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.get(txid_hex).cloned(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                None
            }
        }
    }

    /// Inserts `tx`; returns false if a transaction with the same id was already pooled.
    pub fn add(&self, tx: Transaction) -> bool {
        match self.inner.write() {
            Ok(mut pool) => pool.insert(HEXLOWER.encode(tx.get_id()), tx).is_none(),
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
                false
            }
        }
    }

    pub fn contains(&self, txid_hex: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.contains_key(txid_hex),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                false
            }
        }
    }

    pub fn remove(&self, txid_hex: &str) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.remove(txid_hex);
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    /// Drops every transaction in `txs` from the pool.
    pub fn remove_all(&self, txs: &[Transaction]) {
        match self.inner.write() {
            Ok(mut pool) => {
                for tx in txs {
                    pool.remove(&HEXLOWER.encode(tx.get_id()));
                }
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the pooled transactions ordered by id.
    pub fn get_all(&self) -> Vec<Transaction> {
        match self.inner.read() {
            Ok(pool) => {
                let mut txs: Vec<Transaction> = pool.values().cloned().collect();
                txs.sort_by(|a, b| a.get_id().cmp(b.get_id()));
                txs
            }
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                Vec::new()
            }
        }
    }

    pub fn clear(&self) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.clear();
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }
}

/// Block hashes announced by a peer and not yet fetched, in request order.
pub struct BlockInTransit {
    inner: RwLock<VecDeque<Vec<u8>>>,
}

impl Default for BlockInTransit {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockInTransit {
    pub fn new() -> BlockInTransit {
        BlockInTransit {
            inner: RwLock::new(VecDeque::new()),
        }
    }

    /// Replaces the queue with `blocks`.
    pub fn replace_all(&self, blocks: &[Vec<u8>]) {
        match self.inner.write() {
            Ok(mut inner) => {
                inner.clear();
                inner.extend(blocks.iter().cloned());
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on block transit");
            }
        }
    }

    /// Removes and returns the next hash to request.
    pub fn take_first(&self) -> Option<Vec<u8>> {
        match self.inner.write() {
            Ok(mut inner) => inner.pop_front(),
            Err(_) => {
                log::error!("Failed to acquire write lock on block transit");
                None
            }
        }
    }

    pub fn clear(&self) {
        match self.inner.write() {
            Ok(mut inner) => {
                inner.clear();
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on block transit");
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(inner) => inner.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on block transit");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    fn coinbase() -> Transaction {
        let address = Wallet::new().unwrap().get_address();
        Transaction::new_coinbase_tx(&address, "").unwrap()
    }

    #[test]
    fn test_memory_pool_add_contains_remove() {
        let pool = MemoryPool::new();
        let tx = coinbase();
        let txid_hex = HEXLOWER.encode(tx.get_id());

        assert!(pool.add(tx.clone()));
        assert!(!pool.add(tx.clone()));
        assert!(pool.contains(&txid_hex));
        assert_eq!(pool.get(&txid_hex), Some(tx));
        assert_eq!(pool.len(), 1);

        pool.remove(&txid_hex);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_memory_pool_remove_all_and_ordering() {
        let pool = MemoryPool::new();
        let txs: Vec<Transaction> = (0..4).map(|_| coinbase()).collect();
        for tx in &txs {
            pool.add(tx.clone());
        }

        let all = pool.get_all();
        assert!(all.windows(2).all(|w| w[0].get_id() < w[1].get_id()));

        pool.remove_all(&txs[..3]);
        assert_eq!(pool.get_all(), vec![txs[3].clone()]);
        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_block_in_transit_queue() {
        let transit = BlockInTransit::new();
        transit.replace_all(&[vec![1], vec![2], vec![3]]);
        assert_eq!(transit.len(), 3);
        assert_eq!(transit.take_first(), Some(vec![1]));

        transit.replace_all(&[vec![9]]);
        assert_eq!(transit.take_first(), Some(vec![9]));
        assert_eq!(transit.take_first(), None);
        assert!(transit.is_empty());
    }
}
