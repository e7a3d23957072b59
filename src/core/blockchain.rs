// Chain store: an append-only, hash-linked block log in a sled tree.
// Blocks are keyed by their raw hash; one reserved key points at the tip.
// Every append runs "read tip, compare heights, write block and tip" in a single
// sled transaction so concurrent connection handlers cannot interleave.

use crate::core::transaction::PrevTransactions;
use crate::core::{Block, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::UnspentOutput;
use crate::wallet::validate_address;
use data_encoding::HEXLOWER;
use log::{info, warn};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Db, Tree};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const TIP_BLOCK_HASH_KEY: &str = "tip_block_hash";
const BLOCKS_TREE: &str = "blocks";

pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

#[derive(Clone)]
pub struct Blockchain {
    db: Db,
    blocks: Tree,
    db_path: PathBuf,
    difficulty: u32,
    // serialises UTXO reindex against incremental updates
    chainstate_lock: Arc<Mutex<()>>,
}

impl Blockchain {
    /// Creates a new chain whose genesis coinbase pays `genesis_address`.
    ///
    /// Fails if the database at `db_path` already holds a chain.
    pub fn create_blockchain_with_path(
        genesis_address: &str,
        db_path: impl AsRef<Path>,
        difficulty: u32,
    ) -> Result<Blockchain> {
        if !validate_address(genesis_address) {
            return Err(BlockchainError::InvalidAddress(genesis_address.to_string()));
        }

        let blockchain = Self::open(db_path.as_ref(), difficulty)?;
        if blockchain.blocks.get(TIP_BLOCK_HASH_KEY)?.is_some() {
            return Err(BlockchainError::Database(format!(
                "Blockchain already exists at {}",
                blockchain.db_path.display()
            )));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx = Transaction::new_coinbase_tx(genesis_address, GENESIS_COINBASE_DATA)?;
        let genesis = Block::generate_genesis_block(&coinbase_tx, difficulty)?;
        blockchain.add_block(&genesis)?;
        Ok(blockchain)
    }

    /// Opens an existing chain. A database without a tip is reported as `NotFound`.
    pub fn new_blockchain_with_path(
        db_path: impl AsRef<Path>,
        difficulty: u32,
    ) -> Result<Blockchain> {
        let blockchain = Self::open(db_path.as_ref(), difficulty)?;
        if blockchain.blocks.get(TIP_BLOCK_HASH_KEY)?.is_none() {
            return Err(BlockchainError::NotFound(
                "No existing blockchain found. Create one first.".to_string(),
            ));
        }
        Ok(blockchain)
    }

    /// Opens the database without requiring a chain; a syncing node starts empty.
    pub fn open_or_empty(db_path: impl AsRef<Path>, difficulty: u32) -> Result<Blockchain> {
        Self::open(db_path.as_ref(), difficulty)
    }

    fn open(path: &Path, difficulty: u32) -> Result<Blockchain> {
        let db = sled::open(path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;

        Ok(Blockchain {
            db,
            blocks,
            db_path: path.to_path_buf(),
            difficulty,
            chainstate_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_db_path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub(crate) fn lock_chainstate(&self) -> MutexGuard<'_, ()> {
        self.chainstate_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.blocks.get(TIP_BLOCK_HASH_KEY)?.is_none())
    }

    pub fn get_tip_hash(&self) -> Result<Vec<u8>> {
        self.blocks
            .get(TIP_BLOCK_HASH_KEY)?
            .map(|tip| tip.to_vec())
            .ok_or_else(|| BlockchainError::NotFound("tip block hash".to_string()))
    }

    /// Stores `block` and moves the tip to it if it is higher than the current tip.
    ///
    /// Returns whether the tip advanced. Already-stored hashes are a no-op.
    pub fn add_block(&self, block: &Block) -> Result<bool> {
        let block_hash = block.get_hash();
        let block_data = block.serialize()?;
        let height = block.get_height();

        let advanced = self.blocks.transaction(
            |tx_db| -> ConflictableTransactionResult<bool, BlockchainError> {
                if tx_db.get(block_hash)?.is_some() {
                    return Ok(false);
                }
                tx_db.insert(block_hash, block_data.as_slice())?;

                let advance = match tx_db.get(TIP_BLOCK_HASH_KEY)? {
                    None => true,
                    Some(tip_hash) => {
                        let tip_bytes = tx_db.get(&tip_hash)?.ok_or_else(|| {
                            ConflictableTransactionError::Abort(BlockchainError::NotFound(
                                format!("tip block {}", HEXLOWER.encode(&tip_hash)),
                            ))
                        })?;
                        let tip_block = Block::deserialize(tip_bytes.as_ref())
                            .map_err(ConflictableTransactionError::Abort)?;
                        height > tip_block.get_height()
                    }
                };
                if advance {
                    tx_db.insert(TIP_BLOCK_HASH_KEY, block_hash)?;
                }
                Ok(advance)
            },
        )?;

        if advanced {
            info!(
                "Added block {} at height {height} (new tip)",
                HEXLOWER.encode(block_hash)
            );
        }
        Ok(advanced)
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Block> {
        let block_bytes = self.blocks.get(block_hash)?.ok_or_else(|| {
            BlockchainError::NotFound(format!("block {}", HEXLOWER.encode(block_hash)))
        })?;
        Block::deserialize(block_bytes.as_ref())
    }

    pub fn block_exists(&self, block_hash: &[u8]) -> Result<bool> {
        Ok(self.blocks.contains_key(block_hash)?)
    }

    pub fn get_best_height(&self) -> Result<usize> {
        let tip_hash = self.get_tip_hash()?;
        Ok(self.get_block(&tip_hash)?.get_height())
    }

    /// Fresh walk from the current tip back to genesis.
    pub fn iterator(&self) -> Result<BlockchainIterator> {
        Ok(BlockchainIterator::new(self.get_tip_hash()?, self.blocks.clone()))
    }

    /// All block hashes on the canonical chain, genesis first.
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        let mut hashes = vec![];
        for block in self.iterator()? {
            hashes.push(block?.get_hash().to_vec());
        }
        hashes.reverse();
        Ok(hashes)
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        for block in self.iterator()? {
            if let Some(tx) = block?
                .get_transactions()
                .iter()
                .find(|tx| tx.get_id() == txid)
            {
                return Ok(Some(tx.clone()));
            }
        }
        Ok(None)
    }

    /// Full-chain scan of unspent outputs keyed by raw txid.
    ///
    /// Blocks are walked newest to oldest and transactions within a block last to
    /// first, so every spending input is seen before the output it consumes.
    pub fn find_utxo(&self) -> Result<BTreeMap<Vec<u8>, Vec<UnspentOutput>>> {
        let mut utxo: BTreeMap<Vec<u8>, Vec<UnspentOutput>> = BTreeMap::new();
        let mut spent_txos: HashMap<Vec<u8>, HashSet<usize>> = HashMap::new();
        if self.is_empty()? {
            return Ok(utxo);
        }

        for block in self.iterator()? {
            let block = block?;
            for tx in block.get_transactions().iter().rev() {
                let spent = spent_txos.get(tx.get_id());
                let unspent: Vec<UnspentOutput> = tx
                    .get_vout()
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| !spent.is_some_and(|outs| outs.contains(idx)))
                    .map(|(idx, out)| UnspentOutput::new(idx, out.clone()))
                    .collect();
                if !unspent.is_empty() {
                    utxo.insert(tx.get_id().to_vec(), unspent);
                }

                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    if let Some(out_idx) = txin.output_index() {
                        spent_txos
                            .entry(txin.get_txid().to_vec())
                            .or_default()
                            .insert(out_idx);
                    }
                }
            }
        }
        Ok(utxo)
    }

    /// Resolves every transaction referenced by `tx`'s inputs in one chain walk.
    pub fn previous_transactions(&self, tx: &Transaction) -> Result<PrevTransactions> {
        let mut prev_txs = PrevTransactions::new();
        if tx.is_coinbase() {
            return Ok(prev_txs);
        }

        let mut wanted: HashSet<&[u8]> = tx.get_vin().iter().map(|vin| vin.get_txid()).collect();
        for block in self.iterator()? {
            if wanted.is_empty() {
                break;
            }
            for candidate in block?.get_transactions() {
                if wanted.remove(candidate.get_id()) {
                    prev_txs.insert(candidate.get_id().to_vec(), candidate.clone());
                }
            }
        }

        match wanted.into_iter().next() {
            Some(missing) => Err(BlockchainError::MissingPreviousTransaction(
                HEXLOWER.encode(missing),
            )),
            None => Ok(prev_txs),
        }
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let prev_txs = self.previous_transactions(tx)?;
        tx.sign(pkcs8, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.previous_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    /// Verifies `transactions`, mines them on top of the current tip and appends the block.
    ///
    /// A transaction failing verification aborts mining. If another block became the
    /// tip while the nonce search ran, the mined block is kept but reported as an error.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        for tx in transactions {
            if !self.verify_transaction(tx)? {
                return Err(BlockchainError::Transaction(format!(
                    "Invalid transaction {}",
                    HEXLOWER.encode(tx.get_id())
                )));
            }
        }
        Self::check_for_double_spending(transactions)?;

        let tip_hash = self.get_tip_hash()?;
        let next_height = self.get_block(&tip_hash)?.get_height() + 1;
        info!(
            "Mining block at height {next_height} with {} transactions",
            transactions.len()
        );

        let block = Block::new_block(tip_hash, transactions, next_height, self.difficulty)?;
        if !self.add_block(&block)? {
            warn!(
                "Block {} lost the race for height {next_height}",
                HEXLOWER.encode(block.get_hash())
            );
            return Err(BlockchainError::Mining(
                "Chain tip moved while mining".to_string(),
            ));
        }
        Ok(block)
    }

    /// No two inputs in the block may consume the same output.
    fn check_for_double_spending(transactions: &[Transaction]) -> Result<()> {
        let mut spent_outputs: HashSet<(&[u8], i64)> = HashSet::new();

        for tx in transactions.iter().filter(|tx| !tx.is_coinbase()) {
            for input in tx.get_vin() {
                if !spent_outputs.insert((input.get_txid(), input.get_vout())) {
                    return Err(BlockchainError::Transaction(format!(
                        "Double spend in transaction {}: output {}:{} already spent in this block",
                        HEXLOWER.encode(tx.get_id()),
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Checks a block received from a peer before it is stored.
    pub fn validate_received_block(&self, block: &Block) -> Result<()> {
        let hash_hex = HEXLOWER.encode(block.get_hash());
        if block.get_difficulty() < self.difficulty {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {hash_hex} has difficulty {} below the required {}",
                block.get_difficulty(),
                self.difficulty
            )));
        }
        if !ProofOfWork::validate(block) {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {hash_hex} has an invalid proof-of-work"
            )));
        }

        if block.is_genesis() {
            if block.get_height() != 0 {
                return Err(BlockchainError::InvalidBlock(format!(
                    "Block {hash_hex} has no parent but height {}",
                    block.get_height()
                )));
            }
            return Ok(());
        }

        let parent = match self.get_block(block.get_prev_block_hash()) {
            Ok(parent) => parent,
            Err(BlockchainError::NotFound(_)) => {
                return Err(BlockchainError::InvalidBlock(format!(
                    "Block {hash_hex} references unknown parent {}",
                    HEXLOWER.encode(block.get_prev_block_hash())
                )))
            }
            Err(e) => return Err(e),
        };
        if block.get_height() != parent.get_height() + 1 {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {hash_hex} has height {} but its parent is at {}",
                block.get_height(),
                parent.get_height()
            )));
        }
        Ok(())
    }
}

/// Walks the chain from a tip back to genesis, inclusive.
///
/// Stops after the genesis block or after the first read error.
pub struct BlockchainIterator {
    blocks: Tree,
    current_hash: Option<Vec<u8>>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, blocks: Tree) -> BlockchainIterator {
        BlockchainIterator {
            blocks,
            current_hash: Some(tip_hash),
        }
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;
        let block = match self.blocks.get(&hash) {
            Ok(Some(bytes)) => Block::deserialize(bytes.as_ref()),
            Ok(None) => Err(BlockchainError::NotFound(format!(
                "block {}",
                HEXLOWER.encode(&hash)
            ))),
            Err(e) => Err(e.into()),
        };
        if let Ok(block) = &block {
            if !block.is_genesis() {
                self.current_hash = Some(block.get_prev_block_hash().to_vec());
            }
        }
        Some(block)
    }
}
