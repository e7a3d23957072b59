// UTXO-model transactions: coinbase and spend construction, per-input signing and verification.
// Each input consumes exactly one earlier output; each output is locked to a public key hash.

use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, serialize,
    sha256_digest,
};
use crate::wallet::{hash_pub_key, pub_key_hash_from_address, Wallet};
use data_encoding::HEXLOWER;
use rand::RngCore;
use std::collections::HashMap;
use std::fmt;

/// Reward paid by every coinbase transaction.
pub const SUBSIDY: u64 = 10;

/// Output index carried by the single coinbase input.
pub const COINBASE_VOUT: i64 = -1;

const COINBASE_MEMO_LEN: usize = 20;

/// Previous transactions keyed by raw transaction id.
pub type PrevTransactions = HashMap<Vec<u8>, Transaction>;

#[derive(Debug, Clone, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i64,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i64) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    /// Whether this input was created by the owner of `pub_key_hash`.
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }

    /// Position of the referenced output, if the index is non-negative.
    pub fn output_index(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    /// Output of `value` locked to `address`.
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        if value == 0 {
            return Err(BlockchainError::Transaction(
                "Transaction value must be positive".to_string(),
            ));
        }

        Ok(TXOutput {
            value,
            pub_key_hash: pub_key_hash_from_address(address)?,
        })
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Builds the reward transaction for a mined block.
    ///
    /// The single input has no previous transaction and index `-1`; its public key
    /// field carries `memo`, or 20 random bytes (hex) when `memo` is empty so that
    /// coinbase ids stay unique across blocks.
    pub fn new_coinbase_tx(to: &str, memo: &str) -> Result<Transaction> {
        let memo = if memo.is_empty() {
            let mut random = [0u8; COINBASE_MEMO_LEN];
            rand::thread_rng().fill_bytes(&mut random);
            HEXLOWER.encode(&random)
        } else {
            memo.to_string()
        };

        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: vec![],
            pub_key: memo.into_bytes(),
        };
        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![TXOutput::new(SUBSIDY, to)?],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Builds and signs a payment of `amount` from `wallet` to `to`.
    ///
    /// Inputs are selected greedily from the UTXO index (in txid order); any excess
    /// comes back to the wallet as a change output.
    pub fn new_utxo_transaction(
        wallet: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }
        // Lock the payment output first so a bad recipient fails before any lookup.
        let payment = TXOutput::new(amount, to)?;

        let pub_key_hash = hash_pub_key(wallet.get_public_key());
        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(pub_key_hash.as_slice(), amount)?;
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid, out) in valid_outputs {
            let vout = i64::try_from(out).map_err(|_| {
                BlockchainError::Transaction(format!("Output index {out} out of range"))
            })?;
            inputs.push(TXInput {
                txid,
                vout,
                signature: vec![],
                pub_key: wallet.get_public_key().to_vec(),
            });
        }

        let mut outputs = vec![payment];
        if accumulated > amount {
            outputs.push(TXOutput::new(accumulated - amount, &wallet.get_address())?);
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;
        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, wallet.get_pkcs8())?;
        Ok(tx)
    }

    /// Copy with signatures and public keys cleared, used to build signing digests.
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput::new(input.get_txid(), input.get_vout()))
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    /// Digest authorising input `idx`: the trimmed copy with only that input's public
    /// key set to the referenced output's public key hash.
    fn input_digest(
        tx_copy: &mut Transaction,
        idx: usize,
        prev_pub_key_hash: &[u8],
    ) -> Result<Vec<u8>> {
        tx_copy.vin[idx].signature = vec![];
        tx_copy.vin[idx].pub_key = prev_pub_key_hash.to_vec();
        let digest = tx_copy.hash();
        tx_copy.vin[idx].pub_key = vec![];
        digest
    }

    fn referenced_output<'a>(
        input: &TXInput,
        prev_txs: &'a PrevTransactions,
    ) -> Result<Option<&'a TXOutput>> {
        let prev_tx = prev_txs.get(input.get_txid()).ok_or_else(|| {
            BlockchainError::MissingPreviousTransaction(HEXLOWER.encode(input.get_txid()))
        })?;
        Ok(input
            .output_index()
            .and_then(|idx| prev_tx.vout.get(idx)))
    }

    /// Signs every input with `pkcs8`. Coinbase transactions are left untouched.
    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &PrevTransactions) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut tx_copy = self.trimmed_copy();
        for idx in 0..self.vin.len() {
            let prev_out = Self::referenced_output(&self.vin[idx], prev_txs)?.ok_or_else(|| {
                BlockchainError::Transaction(format!(
                    "Input {idx} references output {} which does not exist",
                    self.vin[idx].vout
                ))
            })?;
            let digest = Self::input_digest(&mut tx_copy, idx, prev_out.get_pub_key_hash())?;
            self.vin[idx].signature = ecdsa_p256_sha256_sign_digest(pkcs8, &digest)?;
        }
        Ok(())
    }

    /// Checks every input signature. Coinbase transactions always pass.
    ///
    /// A missing previous transaction is an error; a bad signature, a dangling
    /// output index or a public key that does not own the referenced output makes
    /// the whole transaction invalid (`Ok(false)`).
    pub fn verify(&self, prev_txs: &PrevTransactions) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        for input in &self.vin {
            if !prev_txs.contains_key(input.get_txid()) {
                return Err(BlockchainError::MissingPreviousTransaction(
                    HEXLOWER.encode(input.get_txid()),
                ));
            }
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, input) in self.vin.iter().enumerate() {
            let prev_out = match Self::referenced_output(input, prev_txs)? {
                Some(out) => out,
                None => return Ok(false),
            };
            if !prev_out.is_locked_with_key(&hash_pub_key(input.get_pub_key())) {
                return Ok(false);
            }
            let digest = Self::input_digest(&mut tx_copy, idx, prev_out.get_pub_key_hash())?;
            if !ecdsa_p256_sha256_sign_verify(
                input.pub_key.as_slice(),
                input.signature.as_slice(),
                &digest,
            ) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// SHA-256 of the encoded transaction with its id cleared.
    pub fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }

    /// Signed spend of output `vout` of `prev` by `owner`, built without a chain so
    /// `prev` may still be unmined.
    #[cfg(test)]
    pub(crate) fn new_test_spend(
        owner: &Wallet,
        prev: &Transaction,
        vout: usize,
        to: &str,
        amount: u64,
    ) -> Result<Transaction> {
        let mut tx = Transaction {
            id: vec![],
            vin: vec![TXInput {
                txid: prev.id.clone(),
                vout: vout as i64,
                signature: vec![],
                pub_key: owner.get_public_key().to_vec(),
            }],
            vout: vec![TXOutput::new(amount, to)?],
        };
        tx.id = tx.hash()?;
        let mut prev_txs = PrevTransactions::new();
        prev_txs.insert(prev.id.clone(), prev.clone());
        tx.sign(owner.get_pkcs8(), &prev_txs)?;
        Ok(tx)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", HEXLOWER.encode(&self.id))?;
        for (i, input) in self.vin.iter().enumerate() {
            writeln!(f, "     Input {i}:")?;
            writeln!(f, "       TXID:      {}", HEXLOWER.encode(&input.txid))?;
            writeln!(f, "       Out:       {}", input.vout)?;
            writeln!(f, "       Signature: {}", HEXLOWER.encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", HEXLOWER.encode(&input.pub_key))?;
        }
        for (i, output) in self.vout.iter().enumerate() {
            writeln!(f, "     Output {i}:")?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(f, "       Script: {}", HEXLOWER.encode(&output.pub_key_hash))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Funding coinbase to `owner` plus an unsigned spend of its output to `to`.
    fn funded_spend(owner: &Wallet, to: &str) -> (Transaction, PrevTransactions) {
        let funding = Transaction::new_coinbase_tx(&owner.get_address(), "").unwrap();
        let mut tx = Transaction {
            id: vec![],
            vin: vec![TXInput {
                txid: funding.get_id().to_vec(),
                vout: 0,
                signature: vec![],
                pub_key: owner.get_public_key().to_vec(),
            }],
            vout: vec![
                TXOutput::new(4, to).unwrap(),
                TXOutput::new(6, &owner.get_address()).unwrap(),
            ],
        };
        tx.id = tx.hash().unwrap();

        let mut prev_txs = PrevTransactions::new();
        prev_txs.insert(funding.get_id().to_vec(), funding);
        (tx, prev_txs)
    }

    #[test]
    fn test_coinbase_shape() {
        let wallet = Wallet::new().unwrap();
        let tx = Transaction::new_coinbase_tx(&wallet.get_address(), "memo").unwrap();

        assert!(tx.is_coinbase());
        assert_eq!(tx.get_vin()[0].get_vout(), COINBASE_VOUT);
        assert!(tx.get_vin()[0].get_txid().is_empty());
        assert_eq!(tx.get_vout()[0].get_value(), SUBSIDY);
        assert_eq!(tx.get_id(), tx.hash().unwrap().as_slice());
        assert!(tx.verify(&PrevTransactions::new()).unwrap());
    }

    #[test]
    fn test_coinbase_ids_are_unique_without_memo() {
        let address = Wallet::new().unwrap().get_address();
        let a = Transaction::new_coinbase_tx(&address, "").unwrap();
        let b = Transaction::new_coinbase_tx(&address, "").unwrap();
        assert_ne!(a.get_id(), b.get_id());
    }

    #[test]
    fn test_coinbase_rejects_invalid_address() {
        assert!(matches!(
            Transaction::new_coinbase_tx("bogus", "x"),
            Err(BlockchainError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_sign_then_verify() {
        let owner = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let (mut tx, prev_txs) = funded_spend(&owner, &receiver.get_address());

        tx.sign(owner.get_pkcs8(), &prev_txs).unwrap();
        assert!(tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_signing_with_wrong_key_fails_verification() {
        let owner = Wallet::new().unwrap();
        let thief = Wallet::new().unwrap();
        let (mut tx, prev_txs) = funded_spend(&owner, &thief.get_address());

        tx.sign(thief.get_pkcs8(), &prev_txs).unwrap();
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_spending_with_own_key_fails_on_foreign_output() {
        let owner = Wallet::new().unwrap();
        let thief = Wallet::new().unwrap();
        let (mut tx, prev_txs) = funded_spend(&owner, &thief.get_address());

        // a consistent key and signature, but not the key the output is locked to
        tx.vin[0].pub_key = thief.get_public_key().to_vec();
        tx.id = tx.hash().unwrap();
        tx.sign(thief.get_pkcs8(), &prev_txs).unwrap();

        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_tampered_output_index_fails_verification() {
        let owner = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let (mut tx, prev_txs) = funded_spend(&owner, &receiver.get_address());
        tx.sign(owner.get_pkcs8(), &prev_txs).unwrap();

        tx.vin[0].vout = 1;
        assert!(!tx.verify(&prev_txs).unwrap());
        tx.vin[0].vout = 0;
        assert!(tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_tampered_value_fails_verification() {
        let owner = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let (mut tx, prev_txs) = funded_spend(&owner, &receiver.get_address());
        tx.sign(owner.get_pkcs8(), &prev_txs).unwrap();

        tx.vout[0].value += 1;
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_tampered_signature_fails_verification() {
        let owner = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let (mut tx, prev_txs) = funded_spend(&owner, &receiver.get_address());
        tx.sign(owner.get_pkcs8(), &prev_txs).unwrap();

        tx.vin[0].signature[5] ^= 0xFF;
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_missing_previous_transaction_is_an_error() {
        let owner = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let (mut tx, prev_txs) = funded_spend(&owner, &receiver.get_address());
        tx.sign(owner.get_pkcs8(), &prev_txs).unwrap();

        let empty = PrevTransactions::new();
        assert!(matches!(
            tx.verify(&empty),
            Err(BlockchainError::MissingPreviousTransaction(_))
        ));
        assert!(matches!(
            tx.sign(owner.get_pkcs8(), &empty),
            Err(BlockchainError::MissingPreviousTransaction(_))
        ));
    }

    #[test]
    fn test_serialize_round_trip() {
        let owner = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let (mut tx, prev_txs) = funded_spend(&owner, &receiver.get_address());
        tx.sign(owner.get_pkcs8(), &prev_txs).unwrap();

        let decoded = Transaction::deserialize(&tx.serialize().unwrap()).unwrap();
        assert_eq!(decoded, tx);
        assert!(decoded.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_serialize_round_trip_empty_single_and_multi() {
        let owner = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();

        let empty = Transaction::default();
        let coinbase = Transaction::new_coinbase_tx(&owner.get_address(), "").unwrap();

        let first = Transaction::new_coinbase_tx(&owner.get_address(), "a").unwrap();
        let second = Transaction::new_coinbase_tx(&owner.get_address(), "b").unwrap();
        let mut multi = Transaction {
            id: vec![],
            vin: vec![
                TXInput {
                    txid: first.get_id().to_vec(),
                    vout: 0,
                    signature: vec![],
                    pub_key: owner.get_public_key().to_vec(),
                },
                TXInput {
                    txid: second.get_id().to_vec(),
                    vout: 0,
                    signature: vec![],
                    pub_key: owner.get_public_key().to_vec(),
                },
            ],
            vout: vec![
                TXOutput::new(7, &receiver.get_address()).unwrap(),
                TXOutput::new(8, &receiver.get_address()).unwrap(),
                TXOutput::new(5, &owner.get_address()).unwrap(),
            ],
        };
        multi.id = multi.hash().unwrap();
        let mut prev_txs = PrevTransactions::new();
        prev_txs.insert(first.get_id().to_vec(), first);
        prev_txs.insert(second.get_id().to_vec(), second);
        multi.sign(owner.get_pkcs8(), &prev_txs).unwrap();

        for tx in [empty, coinbase, multi.clone()] {
            let decoded = Transaction::deserialize(&tx.serialize().unwrap()).unwrap();
            assert_eq!(decoded, tx);
        }
        let decoded = Transaction::deserialize(&multi.serialize().unwrap()).unwrap();
        assert_eq!(decoded.get_vin().len(), 2);
        assert_eq!(decoded.get_vout().len(), 3);
        assert!(decoded.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_zero_value_output_rejected() {
        let address = Wallet::new().unwrap().get_address();
        assert!(TXOutput::new(0, &address).is_err());
    }

    #[test]
    fn test_uses_key() {
        let owner = Wallet::new().unwrap();
        let (tx, _) = funded_spend(&owner, &owner.get_address());
        assert!(tx.get_vin()[0].uses_key(&hash_pub_key(owner.get_public_key())));
    }
}
