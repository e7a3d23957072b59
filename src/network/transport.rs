use crate::error::{BlockchainError, Result};
use crate::network::Message;
use log::debug;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

const TCP_WRITE_TIMEOUT: u64 = 5000;

/// Upper bound for one inbound message.
pub const MAX_MESSAGE_SIZE: u64 = 32 * 1024 * 1024;

/// Delivers one message to a peer.
///
/// Handlers only talk to peers through this seam, so the protocol can be driven
/// without sockets.
pub trait Transport: Send + Sync {
    fn send(&self, addr: &str, message: &Message) -> Result<()>;
}

/// One TCP connection per message: connect, write, close the write half.
pub struct TcpTransport {
    timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(TCP_WRITE_TIMEOUT))
    }
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> TcpTransport {
        TcpTransport { timeout }
    }
}

impl Transport for TcpTransport {
    fn send(&self, addr: &str, message: &Message) -> Result<()> {
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| BlockchainError::Network(format!("Invalid address {addr}: {e}")))?
            .next()
            .ok_or_else(|| BlockchainError::Network(format!("Address {addr} did not resolve")))?;
        let bytes = message.encode()?;
        debug!("Sending {} ({} bytes) to {addr}", message.command(), bytes.len());

        let mut stream = TcpStream::connect_timeout(&socket_addr, self.timeout)
            .map_err(|e| BlockchainError::Network(format!("Failed to connect to {addr}: {e}")))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| BlockchainError::Network(format!("Failed to set write timeout: {e}")))?;
        stream
            .write_all(&bytes)
            .and_then(|_| stream.flush())
            .map_err(|e| BlockchainError::Network(format!("Failed to send data to {addr}: {e}")))?;
        stream
            .shutdown(Shutdown::Write)
            .map_err(|e| BlockchainError::Network(format!("Failed to close connection: {e}")))?;
        Ok(())
    }
}

/// Reads a whole request (until the peer closes its write half) and decodes it.
pub fn read_message(stream: &mut impl Read) -> Result<Message> {
    let mut buf = Vec::new();
    stream.take(MAX_MESSAGE_SIZE + 1).read_to_end(&mut buf)?;
    if buf.len() as u64 > MAX_MESSAGE_SIZE {
        return Err(BlockchainError::Network(format!(
            "Message exceeds {MAX_MESSAGE_SIZE} bytes"
        )));
    }
    Message::decode(&buf)
}
