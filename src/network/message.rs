//! Wire messages of the gossip protocol
//!
//! A message is a 12-byte ASCII command name, zero padded, followed by the versioned
//! record encoding of the command's payload.

use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};

pub const COMMAND_LENGTH: usize = 12;
pub const NODE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum InvKind {
    Block,
    Tx,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct VersionPayload {
    pub version: u32,
    pub addr_from: String,
    pub best_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct GetBlocksPayload {
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct InvPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct GetDataPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct BlockPayload {
    pub addr_from: String,
    /// Encoded [`Block`]
    pub block: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TxPayload {
    pub addr_from: String,
    /// Encoded [`Transaction`]
    pub transaction: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct AddrPayload {
    pub addr_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    GetBlocks(GetBlocksPayload),
    Inv(InvPayload),
    GetData(GetDataPayload),
    Block(BlockPayload),
    Tx(TxPayload),
    Addr(AddrPayload),
}

impl Message {
    pub fn block(addr_from: &str, block: &Block) -> Result<Message> {
        Ok(Message::Block(BlockPayload {
            addr_from: addr_from.to_string(),
            block: block.serialize()?,
        }))
    }

    pub fn tx(addr_from: &str, tx: &Transaction) -> Result<Message> {
        Ok(Message::Tx(TxPayload {
            addr_from: addr_from.to_string(),
            transaction: tx.serialize()?,
        }))
    }

    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::GetBlocks(_) => "getblocks",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::Addr(_) => "addr",
        }
    }

    /// Address of the sending node; `addr` messages carry none.
    pub fn sender(&self) -> Option<&str> {
        match self {
            Message::Version(p) => Some(&p.addr_from),
            Message::GetBlocks(p) => Some(&p.addr_from),
            Message::Inv(p) => Some(&p.addr_from),
            Message::GetData(p) => Some(&p.addr_from),
            Message::Block(p) => Some(&p.addr_from),
            Message::Tx(p) => Some(&p.addr_from),
            Message::Addr(_) => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = command_to_bytes(self.command()).to_vec();
        let payload = match self {
            Message::Version(p) => serialize(p)?,
            Message::GetBlocks(p) => serialize(p)?,
            Message::Inv(p) => serialize(p)?,
            Message::GetData(p) => serialize(p)?,
            Message::Block(p) => serialize(p)?,
            Message::Tx(p) => serialize(p)?,
            Message::Addr(p) => serialize(p)?,
        };
        bytes.extend(payload);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Message> {
        if bytes.len() < COMMAND_LENGTH {
            return Err(BlockchainError::Network(format!(
                "Message of {} bytes is shorter than its command header",
                bytes.len()
            )));
        }
        let (header, payload) = bytes.split_at(COMMAND_LENGTH);
        let command = bytes_to_command(header)?;

        let message = match command.as_str() {
            "version" => Message::Version(deserialize(payload)?),
            "getblocks" => Message::GetBlocks(deserialize(payload)?),
            "inv" => Message::Inv(deserialize(payload)?),
            "getdata" => Message::GetData(deserialize(payload)?),
            "block" => Message::Block(deserialize(payload)?),
            "tx" => Message::Tx(deserialize(payload)?),
            "addr" => Message::Addr(deserialize(payload)?),
            other => {
                return Err(BlockchainError::Network(format!(
                    "Unknown command: {other}"
                )))
            }
        };
        Ok(message)
    }
}

fn command_to_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0u8; COMMAND_LENGTH];
    for (slot, b) in bytes.iter_mut().zip(command.bytes()) {
        *slot = b;
    }
    bytes
}

fn bytes_to_command(bytes: &[u8]) -> Result<String> {
    let name: Vec<u8> = bytes.iter().copied().take_while(|b| *b != 0).collect();
    if name.is_empty() || !name.is_ascii() {
        return Err(BlockchainError::Network(
            "Malformed command header".to_string(),
        ));
    }
    String::from_utf8(name).map_err(|e| BlockchainError::Network(e.to_string()))
}
