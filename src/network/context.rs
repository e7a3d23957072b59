use crate::core::{Block, Blockchain, Transaction};
use crate::error::Result;
use crate::network::message::{
    AddrPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, Message, VersionPayload,
    NODE_VERSION,
};
use crate::network::{Nodes, Transport};
use crate::storage::{BlockInTransit, MemoryPool, UTXOSet};
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

/// State shared by every connection handler of one node.
///
/// Peer set, mempool and blocks-in-transit are only touched through their own
/// synchronized accessors; chain and UTXO writes go through sled transactions.
pub struct NodeContext {
    node_addr: String,
    mining_addr: Option<String>,
    mempool_threshold: usize,
    known_nodes: Nodes,
    mempool: MemoryPool,
    blocks_in_transit: BlockInTransit,
    utxo_set: UTXOSet,
    transport: Arc<dyn Transport>,
    mining: Mutex<()>,
    shutdown: AtomicBool,
}

impl NodeContext {
    /// `seed_nodes` become the initial known peers; the first one is the seed.
    pub fn new(
        node_addr: &str,
        seed_nodes: &[String],
        utxo_set: UTXOSet,
        transport: Arc<dyn Transport>,
    ) -> NodeContext {
        let known_nodes = Nodes::new();
        for seed in seed_nodes {
            known_nodes.add_node(seed);
        }
        NodeContext {
            node_addr: node_addr.to_string(),
            mining_addr: None,
            mempool_threshold: 2,
            known_nodes,
            mempool: MemoryPool::new(),
            blocks_in_transit: BlockInTransit::new(),
            utxo_set,
            transport,
            mining: Mutex::new(()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Turns the node into a miner paying rewards to `mining_addr` once the
    /// mempool holds `mempool_threshold` transactions.
    pub fn with_miner(mut self, mining_addr: &str, mempool_threshold: usize) -> NodeContext {
        self.mining_addr = Some(mining_addr.to_string());
        self.mempool_threshold = mempool_threshold.max(1);
        self
    }

    pub fn node_addr(&self) -> &str {
        &self.node_addr
    }

    pub fn mining_addr(&self) -> Option<&str> {
        self.mining_addr.as_deref()
    }

    pub fn is_miner(&self) -> bool {
        self.mining_addr.is_some()
    }

    pub fn mempool_threshold(&self) -> usize {
        self.mempool_threshold
    }

    pub fn known_nodes(&self) -> &Nodes {
        &self.known_nodes
    }

    pub fn mempool(&self) -> &MemoryPool {
        &self.mempool
    }

    pub fn blocks_in_transit(&self) -> &BlockInTransit {
        &self.blocks_in_transit
    }

    pub fn utxo_set(&self) -> &UTXOSet {
        &self.utxo_set
    }

    pub fn blockchain(&self) -> &Blockchain {
        self.utxo_set.get_blockchain()
    }

    /// Whether this node is the seed, i.e. the first known peer.
    pub fn is_seed(&self) -> bool {
        self.known_nodes
            .first()
            .is_some_and(|node| node.get_addr() == self.node_addr)
    }

    /// Known peers other than this node.
    pub fn peers(&self) -> Vec<String> {
        self.known_nodes
            .get_addrs()
            .into_iter()
            .filter(|addr| *addr != self.node_addr)
            .collect()
    }

    /// Held while a mining round runs; `None` if another handler is already mining.
    pub(crate) fn try_start_mining(&self) -> Option<MutexGuard<'_, ()>> {
        match self.mining.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sends `message`; an unreachable peer is dropped from the known nodes.
    pub fn send(&self, addr: &str, message: &Message) {
        if let Err(e) = self.transport.send(addr, message) {
            warn!("{addr} is not available, evicting it: {e}");
            self.known_nodes.evict_node(addr);
        }
    }

    /// Local best height, or `None` while the chain is still empty.
    pub fn local_height(&self) -> Result<Option<usize>> {
        if self.blockchain().is_empty()? {
            return Ok(None);
        }
        Ok(Some(self.blockchain().get_best_height()?))
    }

    pub fn send_version(&self, addr: &str) -> Result<()> {
        let best_height = self.local_height()?.unwrap_or(0) as u64;
        self.send(
            addr,
            &Message::Version(VersionPayload {
                version: NODE_VERSION,
                addr_from: self.node_addr.clone(),
                best_height,
            }),
        );
        Ok(())
    }

    pub fn send_get_blocks(&self, addr: &str) {
        self.send(
            addr,
            &Message::GetBlocks(GetBlocksPayload {
                addr_from: self.node_addr.clone(),
            }),
        );
    }

    pub fn send_inv(&self, addr: &str, kind: InvKind, items: &[Vec<u8>]) {
        self.send(
            addr,
            &Message::Inv(InvPayload {
                addr_from: self.node_addr.clone(),
                kind,
                items: items.to_vec(),
            }),
        );
    }

    pub fn send_get_data(&self, addr: &str, kind: InvKind, id: &[u8]) {
        self.send(
            addr,
            &Message::GetData(GetDataPayload {
                addr_from: self.node_addr.clone(),
                kind,
                id: id.to_vec(),
            }),
        );
    }

    pub fn send_block(&self, addr: &str, block: &Block) -> Result<()> {
        self.send(addr, &Message::block(&self.node_addr, block)?);
        Ok(())
    }

    pub fn send_tx(&self, addr: &str, tx: &Transaction) -> Result<()> {
        self.send(addr, &Message::tx(&self.node_addr, tx)?);
        Ok(())
    }

    /// Advertises every known peer plus this node.
    pub fn send_addr(&self, addr: &str) {
        let mut addr_list = self.known_nodes.get_addrs();
        if !addr_list.contains(&self.node_addr) {
            addr_list.push(self.node_addr.clone());
        }
        self.send(addr, &Message::Addr(AddrPayload { addr_list }));
    }

    pub fn broadcast_inv(&self, kind: InvKind, items: &[Vec<u8>], except: Option<&str>) {
        for peer in self.peers() {
            if Some(peer.as_str()) == except {
                continue;
            }
            self.send_inv(&peer, kind, items);
        }
    }
}
