use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::Tree;
use std::collections::BTreeMap;

const UTXO_TREE: &str = "chainstate";

/// An unspent output together with its position in the creating transaction.
///
/// The position is kept so that spending one output of a transaction never
/// changes how the remaining outputs are referenced.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct UnspentOutput {
    index: usize,
    output: TXOutput,
}

impl UnspentOutput {
    pub fn new(index: usize, output: TXOutput) -> UnspentOutput {
        UnspentOutput { index, output }
    }

    pub fn get_index(&self) -> usize {
        self.index
    }

    pub fn get_output(&self) -> &TXOutput {
        &self.output
    }
}

/// Snapshot of the whole index, raw txid -> unspent outputs.
pub type UtxoMap = BTreeMap<Vec<u8>, Vec<UnspentOutput>>;

/// Index of unspent outputs in the `chainstate` tree, derived from the chain.
///
/// Entries are visited in sled key order, i.e. lexicographically by raw txid,
/// which fixes the order spend selection picks outputs in.
#[derive(Clone)]
pub struct UTXOSet {
    blockchain: Blockchain,
    tree: Tree,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> Result<UTXOSet> {
        let tree = blockchain
            .get_db()
            .open_tree(UTXO_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open UTXO tree: {e}")))?;
        Ok(UTXOSet { blockchain, tree })
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn entries(&self) -> impl Iterator<Item = Result<(Vec<u8>, Vec<UnspentOutput>)>> + '_ {
        self.tree.iter().map(|item| -> Result<(Vec<u8>, Vec<UnspentOutput>)> {
            let (k, v) = item?;
            let outs: Vec<UnspentOutput> = deserialize(v.as_ref())?;
            Ok((k.to_vec(), outs))
        })
    }

    /// Greedily collects outputs locked to `pub_key_hash` until `amount` is covered.
    ///
    /// Returns the accumulated value and the selected `(txid, output index)` pairs.
    /// The total may fall short of `amount`; the caller decides what that means.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, Vec<(Vec<u8>, usize)>)> {
        let mut selected = vec![];
        let mut accumulated = 0;

        'entries: for entry in self.entries() {
            let (txid, outs) = entry?;
            for unspent in outs {
                if accumulated >= amount {
                    break 'entries;
                }
                if unspent.output.is_locked_with_key(pub_key_hash) {
                    accumulated += unspent.output.get_value();
                    selected.push((txid.clone(), unspent.index));
                }
            }
        }
        Ok((accumulated, selected))
    }

    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let mut utxos = vec![];
        for entry in self.entries() {
            let (_, outs) = entry?;
            utxos.extend(
                outs.into_iter()
                    .filter(|unspent| unspent.output.is_locked_with_key(pub_key_hash))
                    .map(|unspent| unspent.output),
            );
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .map(TXOutput::get_value)
            .sum())
    }

    /// Whether output `vout` of transaction `txid` is still unspent.
    pub fn is_unspent(&self, txid: &[u8], vout: i64) -> Result<bool> {
        let Ok(index) = usize::try_from(vout) else {
            return Ok(false);
        };
        match self.tree.get(txid)? {
            Some(bytes) => {
                let outs: Vec<UnspentOutput> = deserialize(bytes.as_ref())?;
                Ok(outs.iter().any(|unspent| unspent.index == index))
            }
            None => Ok(false),
        }
    }

    pub fn count_transactions(&self) -> Result<usize> {
        let mut counter = 0;
        for item in self.tree.iter() {
            item?;
            counter += 1;
        }
        Ok(counter)
    }

    pub fn snapshot(&self) -> Result<UtxoMap> {
        self.entries().collect()
    }

    /// Rebuilds the index from a full chain scan, replacing the old contents atomically.
    pub fn reindex(&self) -> Result<()> {
        let _guard = self.blockchain.lock_chainstate();

        let utxo_map = self.blockchain.find_utxo()?;
        let encoded = utxo_map
            .iter()
            .map(|(txid, outs)| -> Result<(&[u8], Vec<u8>)> {
                Ok((txid.as_slice(), serialize(outs)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let stale_keys = self
            .tree
            .iter()
            .keys()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.tree.transaction(
            |tx_db| -> ConflictableTransactionResult<(), BlockchainError> {
                for key in &stale_keys {
                    tx_db.remove(&key[..])?;
                }
                for (txid, outs) in &encoded {
                    tx_db.insert(*txid, outs.as_slice())?;
                }
                Ok(())
            },
        )?;

        info!("UTXO index rebuilt: {} transactions", encoded.len());
        Ok(())
    }

    /// Folds one newly appended block into the index.
    ///
    /// Every input must consume an output present in the index; otherwise the whole
    /// update is rolled back with an error. Fully spent entries are removed.
    pub fn update(&self, block: &Block) -> Result<()> {
        let _guard = self.blockchain.lock_chainstate();

        self.tree.transaction(
            |tx_db| -> ConflictableTransactionResult<(), BlockchainError> {
                for tx in block.get_transactions() {
                    if !tx.is_coinbase() {
                        for vin in tx.get_vin() {
                            let missing = || {
                                ConflictableTransactionError::Abort(BlockchainError::Transaction(
                                    format!(
                                        "Output {}:{} is not in the UTXO set",
                                        HEXLOWER.encode(vin.get_txid()),
                                        vin.get_vout()
                                    ),
                                ))
                            };
                            let outs_bytes = tx_db.get(vin.get_txid())?.ok_or_else(missing)?;
                            let outs: Vec<UnspentOutput> = deserialize(outs_bytes.as_ref())
                                .map_err(ConflictableTransactionError::Abort)?;

                            let spent = vin.output_index();
                            let remaining: Vec<UnspentOutput> = outs
                                .iter()
                                .filter(|unspent| Some(unspent.index) != spent)
                                .cloned()
                                .collect();
                            if remaining.len() == outs.len() {
                                return Err(missing());
                            }

                            if remaining.is_empty() {
                                tx_db.remove(vin.get_txid())?;
                            } else {
                                let outs_bytes = serialize(&remaining)
                                    .map_err(ConflictableTransactionError::Abort)?;
                                tx_db.insert(vin.get_txid(), outs_bytes)?;
                            }
                        }
                    }

                    let new_outputs: Vec<UnspentOutput> = tx
                        .get_vout()
                        .iter()
                        .enumerate()
                        .map(|(idx, out)| UnspentOutput::new(idx, out.clone()))
                        .collect();
                    if !new_outputs.is_empty() {
                        let outs_bytes = serialize(&new_outputs)
                            .map_err(ConflictableTransactionError::Abort)?;
                        tx_db.insert(tx.get_id(), outs_bytes)?;
                    }
                }
                Ok(())
            },
        )?;
        Ok(())
    }
}
