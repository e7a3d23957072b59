//! Peer-to-peer networking
//!
//! Wire messages, the transport seam, shared node state and the TCP server that
//! runs the sync and mining protocol.

pub mod context;
pub mod message;
pub mod node;
pub mod server;
pub mod transport;

pub use context::NodeContext;
pub use message::{InvKind, Message, COMMAND_LENGTH, NODE_VERSION};
pub use node::{Node, Nodes};
pub use server::{mine_pending_transactions, process_message, Server};
pub use transport::{read_message, TcpTransport, Transport};
