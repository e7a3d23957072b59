// Versioned record codec: one format byte followed by a bincode 2.0 body.
// Blocks, unspent-output lists, the wallet file and wire payloads all go through here.
use crate::error::{BlockchainError, Result};

/// Current record format. Bump when any encoded struct changes shape.
pub const FORMAT_VERSION: u8 = 1;

/// Serialize data using bincode 2.0 with standard configuration, prefixed with the format version
pub fn serialize<T: bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    let mut bytes = vec![FORMAT_VERSION];
    let body = bincode::encode_to_vec(data, config)
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))?;
    bytes.extend(body);
    Ok(bytes)
}

/// Deserialize a versioned record, rejecting unknown versions and trailing bytes
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: bincode::Decode<()>,
{
    let (version, body) = bytes
        .split_first()
        .ok_or_else(|| BlockchainError::Serialization("Empty record".to_string()))?;
    if *version != FORMAT_VERSION {
        return Err(BlockchainError::Serialization(format!(
            "Unsupported record version {version}"
        )));
    }

    let config = bincode::config::standard();
    let (data, read) = bincode::decode_from_slice(body, config)
        .map_err(|e| BlockchainError::Serialization(format!("Deserialization failed: {e}")))?;
    if read != body.len() {
        return Err(BlockchainError::Serialization(format!(
            "{} trailing bytes after record",
            body.len() - read
        )));
    }
    Ok(data)
}
