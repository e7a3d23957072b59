use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use log::info;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Address -> wallet map backed by a single file.
pub struct Wallets {
    wallets: BTreeMap<String, Wallet>,
    path: PathBuf,
}

impl Wallets {
    /// Loads the wallet file at `path`; a missing file yields an empty set.
    pub fn load(path: impl AsRef<Path>) -> Result<Wallets> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Wallets {
                wallets: BTreeMap::new(),
                path,
            });
        }

        let bytes = fs::read(&path)?;
        let wallets: Vec<Wallet> = deserialize(&bytes)
            .map_err(|e| BlockchainError::Wallet(format!("Corrupted wallet file: {e}")))?;
        let wallets = wallets
            .into_iter()
            .map(|wallet| (wallet.get_address(), wallet))
            .collect();
        Ok(Wallets { wallets, path })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let wallets: Vec<Wallet> = self.wallets.values().cloned().collect();
        writer.write_all(serialize(&wallets)?.as_slice())?;
        writer.flush()?;
        Ok(())
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save()?;
        info!("Created wallet {address}");
        Ok(address)
    }

    /// Addresses in sorted order.
    pub fn get_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let wallets = Wallets::load(dir.path().join("wallet.dat")).unwrap();
        assert!(wallets.get_addresses().is_empty());
    }

    #[test]
    fn test_create_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.dat");

        let mut wallets = Wallets::load(&path).unwrap();
        let first = wallets.create_wallet().unwrap();
        let second = wallets.create_wallet().unwrap();

        let reloaded = Wallets::load(&path).unwrap();
        let mut expected = vec![first.clone(), second];
        expected.sort();
        assert_eq!(reloaded.get_addresses(), expected);

        let original = wallets.get_wallet(&first).unwrap();
        let restored = reloaded.get_wallet(&first).unwrap();
        assert_eq!(original.get_public_key(), restored.get_public_key());
        assert_eq!(original.get_pkcs8(), restored.get_pkcs8());
    }

    #[test]
    fn test_corrupted_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.dat");
        fs::write(&path, b"garbage").unwrap();
        assert!(matches!(
            Wallets::load(&path),
            Err(BlockchainError::Wallet(_))
        ));
    }
}
