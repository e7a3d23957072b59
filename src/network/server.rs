use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::message::{
    AddrPayload, BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, Message,
    TxPayload, VersionPayload,
};
use crate::network::transport::read_message;
use crate::network::NodeContext;
use data_encoding::HEXLOWER;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TCP_READ_TIMEOUT: u64 = 60;

/// TCP front end of a node: one thread per inbound connection, each carrying one message.
pub struct Server {
    ctx: Arc<NodeContext>,
}

impl Server {
    pub fn new(ctx: Arc<NodeContext>) -> Server {
        Server { ctx }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    /// Binds the node address and serves until shutdown is requested.
    pub fn run(&self) -> Result<()> {
        let addr = self.ctx.node_addr();
        let listener = TcpListener::bind(addr)
            .map_err(|e| BlockchainError::Network(format!("Failed to bind to {addr}: {e}")))?;
        info!("Server listening on {addr}");

        self.announce()?;

        for stream in listener.incoming() {
            if self.ctx.is_shutdown() {
                info!("Shutdown requested, server on {addr} stops accepting");
                break;
            }
            match stream {
                Ok(stream) => {
                    let ctx = Arc::clone(&self.ctx);
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(&ctx, stream) {
                            error!("Error handling connection: {e}");
                        }
                    });
                }
                Err(e) => error!("Error accepting connection: {e}"),
            }
        }
        Ok(())
    }

    /// A non-seed node introduces itself to the seed; an empty one also asks for blocks.
    fn announce(&self) -> Result<()> {
        if self.ctx.is_seed() {
            return Ok(());
        }
        let Some(seed) = self.ctx.known_nodes().first() else {
            warn!("No seed node configured");
            return Ok(());
        };
        self.ctx.send_version(seed.get_addr())?;
        if self.ctx.local_height()?.is_none() {
            self.ctx.send_get_blocks(seed.get_addr());
        }
        Ok(())
    }
}

fn handle_connection(ctx: &NodeContext, mut stream: TcpStream) -> Result<()> {
    stream
        .set_read_timeout(Some(Duration::from_secs(TCP_READ_TIMEOUT)))
        .map_err(|e| BlockchainError::Network(format!("Failed to set read timeout: {e}")))?;
    let message = read_message(&mut stream)?;
    let _ = stream.shutdown(Shutdown::Both);
    process_message(ctx, message)
}

/// Applies one inbound message to the node state.
pub fn process_message(ctx: &NodeContext, message: Message) -> Result<()> {
    info!(
        "Received {} from {}",
        message.command(),
        message.sender().unwrap_or("unknown")
    );
    match message {
        Message::Version(payload) => handle_version(ctx, payload),
        Message::GetBlocks(payload) => handle_get_blocks(ctx, payload),
        Message::Inv(payload) => handle_inv(ctx, payload),
        Message::GetData(payload) => handle_get_data(ctx, payload),
        Message::Block(payload) => handle_block(ctx, payload),
        Message::Tx(payload) => handle_tx(ctx, payload),
        Message::Addr(payload) => handle_addr(ctx, payload),
    }
}

fn handle_version(ctx: &NodeContext, payload: VersionPayload) -> Result<()> {
    let VersionPayload {
        addr_from,
        best_height,
        ..
    } = payload;
    if ctx.known_nodes().add_node(&addr_from) {
        info!("Added {addr_from} to known nodes");
        if ctx.is_seed() {
            ctx.send_addr(&addr_from);
        }
    }

    match ctx.local_height()? {
        None => ctx.send_get_blocks(&addr_from),
        Some(local) if (local as u64) < best_height => ctx.send_get_blocks(&addr_from),
        Some(local) if (local as u64) > best_height => ctx.send_version(&addr_from)?,
        Some(_) => debug!("{addr_from} is at our height {best_height}"),
    }
    Ok(())
}

fn handle_get_blocks(ctx: &NodeContext, payload: GetBlocksPayload) -> Result<()> {
    if ctx.blockchain().is_empty()? {
        return Ok(());
    }
    let hashes = ctx.blockchain().get_block_hashes()?;
    ctx.send_inv(&payload.addr_from, InvKind::Block, &hashes);
    Ok(())
}

fn handle_inv(ctx: &NodeContext, payload: InvPayload) -> Result<()> {
    let InvPayload {
        addr_from,
        kind,
        items,
    } = payload;
    info!("Received inventory with {} {kind:?} items", items.len());

    match kind {
        InvKind::Block => {
            let mut missing = vec![];
            for hash in items {
                if !ctx.blockchain().block_exists(&hash)? {
                    missing.push(hash);
                }
            }
            ctx.blocks_in_transit().replace_all(&missing);
            if let Some(block_hash) = ctx.blocks_in_transit().take_first() {
                ctx.send_get_data(&addr_from, InvKind::Block, &block_hash);
            }
        }
        InvKind::Tx => {
            for txid in items {
                if !ctx.mempool().contains(&HEXLOWER.encode(&txid)) {
                    ctx.send_get_data(&addr_from, InvKind::Tx, &txid);
                }
            }
        }
    }
    Ok(())
}

fn handle_get_data(ctx: &NodeContext, payload: GetDataPayload) -> Result<()> {
    let GetDataPayload {
        addr_from,
        kind,
        id,
    } = payload;
    let id_hex = HEXLOWER.encode(&id);

    match kind {
        InvKind::Block => match ctx.blockchain().get_block(&id) {
            Ok(block) => ctx.send_block(&addr_from, &block)?,
            Err(BlockchainError::NotFound(_)) => debug!("Block {id_hex} requested but not held"),
            Err(e) => return Err(e),
        },
        InvKind::Tx => match ctx.mempool().get(&id_hex) {
            Some(tx) => ctx.send_tx(&addr_from, &tx)?,
            None => debug!("Transaction {id_hex} requested but not pooled"),
        },
    }
    Ok(())
}

fn handle_block(ctx: &NodeContext, payload: BlockPayload) -> Result<()> {
    let BlockPayload { addr_from, block } = payload;
    let block = Block::deserialize(&block)?;
    let hash_hex = HEXLOWER.encode(block.get_hash());

    if let Err(e) = ctx.blockchain().validate_received_block(&block) {
        warn!("Rejecting block {hash_hex} from {addr_from}: {e}");
        ctx.blocks_in_transit().clear();
        return Ok(());
    }

    ctx.blockchain().add_block(&block)?;
    ctx.mempool().remove_all(block.get_transactions());
    info!("Received block {hash_hex} at height {}", block.get_height());

    match ctx.blocks_in_transit().take_first() {
        Some(next_hash) => ctx.send_get_data(&addr_from, InvKind::Block, &next_hash),
        None => ctx.utxo_set().reindex()?,
    }
    Ok(())
}

fn handle_tx(ctx: &NodeContext, payload: TxPayload) -> Result<()> {
    let TxPayload {
        addr_from,
        transaction,
    } = payload;
    let tx = Transaction::deserialize(&transaction)?;
    let txid = tx.get_id().to_vec();

    if !ctx.mempool().add(tx) {
        debug!("Transaction {} already pooled", HEXLOWER.encode(&txid));
        return Ok(());
    }
    info!(
        "Transaction {} added to mempool ({} pending)",
        HEXLOWER.encode(&txid),
        ctx.mempool().len()
    );

    if ctx.is_seed() {
        ctx.broadcast_inv(InvKind::Tx, &[txid], Some(&addr_from));
    }
    if ctx.is_miner() && ctx.mempool().len() >= ctx.mempool_threshold() {
        mine_pending_transactions(ctx)?;
    }
    Ok(())
}

fn handle_addr(ctx: &NodeContext, payload: AddrPayload) -> Result<()> {
    for addr in &payload.addr_list {
        if addr != ctx.node_addr() && ctx.known_nodes().add_node(addr) {
            info!("Learned about {addr}");
        }
    }
    info!("There are {} known nodes", ctx.known_nodes().len());
    for peer in ctx.peers() {
        ctx.send_get_blocks(&peer);
    }
    Ok(())
}

/// Mines pooled transactions until the mempool is empty, holds nothing minable,
/// or shutdown is requested. The threshold only gates entry from the tx handler.
///
/// Only one mining loop runs per node; a handler arriving while another mines
/// returns immediately and its transaction is picked up by the running loop.
pub fn mine_pending_transactions(ctx: &NodeContext) -> Result<()> {
    let Some(mining_addr) = ctx.mining_addr() else {
        return Ok(());
    };
    let Some(_mining) = ctx.try_start_mining() else {
        debug!("Mining already in progress");
        return Ok(());
    };

    while !ctx.is_shutdown() && !ctx.mempool().is_empty() {
        let txs = select_transactions(ctx)?;
        if txs.is_empty() {
            info!("No minable transactions pending, waiting for new ones");
            break;
        }

        let mut block_txs = txs.clone();
        block_txs.push(Transaction::new_coinbase_tx(mining_addr, "")?);

        let block = match ctx.blockchain().mine_block(&block_txs) {
            Ok(block) => block,
            Err(BlockchainError::Mining(e)) => {
                warn!("Mining round abandoned: {e}");
                break;
            }
            Err(e) => return Err(e),
        };
        apply_mined_block(ctx, &block)?;
        ctx.mempool().remove_all(&txs);

        info!(
            "New block {} is mined with {} transactions",
            HEXLOWER.encode(block.get_hash()),
            txs.len()
        );
        ctx.broadcast_inv(InvKind::Block, &[block.get_hash().to_vec()], None);
    }
    Ok(())
}

/// Folds a freshly mined block into the UTXO index, reindexing when the block is
/// no longer the tip or the incremental update fails.
fn apply_mined_block(ctx: &NodeContext, block: &Block) -> Result<()> {
    if ctx.blockchain().get_tip_hash()? != block.get_hash() {
        warn!("Tip moved past the mined block, reindexing");
        return ctx.utxo_set().reindex();
    }
    if let Err(e) = ctx.utxo_set().update(block) {
        warn!("Incremental UTXO update failed ({e}), reindexing");
        ctx.utxo_set().reindex()?;
    }
    Ok(())
}

/// Pooled transactions that verify and spend only unspent, unclaimed outputs.
///
/// Transactions that can never be mined (bad signature, unknown or already spent
/// inputs) are evicted from the mempool. Those spending outputs of a still-pooled
/// transaction stay pooled for a later round.
fn select_transactions(ctx: &NodeContext) -> Result<Vec<Transaction>> {
    let mut selected = vec![];
    let mut claimed: HashSet<(Vec<u8>, i64)> = HashSet::new();

    for tx in ctx.mempool().get_all() {
        let txid_hex = HEXLOWER.encode(tx.get_id());
        let inputs: Vec<(Vec<u8>, i64)> = tx
            .get_vin()
            .iter()
            .map(|vin| (vin.get_txid().to_vec(), vin.get_vout()))
            .collect();

        let mut all_unspent = true;
        let mut waits_on_pool = false;
        for (txid, vout) in &inputs {
            if ctx.utxo_set().is_unspent(txid, *vout)? {
                continue;
            }
            if ctx.mempool().contains(&HEXLOWER.encode(txid)) {
                waits_on_pool = true;
            } else {
                all_unspent = false;
                break;
            }
        }
        if all_unspent && waits_on_pool && !tx.is_coinbase() {
            debug!("Transaction {txid_hex} waits for a pooled parent");
            continue;
        }
        if tx.is_coinbase() || !all_unspent {
            warn!("Evicting transaction {txid_hex}: spends unavailable outputs");
            ctx.mempool().remove(&txid_hex);
            continue;
        }

        match ctx.blockchain().verify_transaction(&tx) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Evicting transaction {txid_hex}: invalid signature");
                ctx.mempool().remove(&txid_hex);
                continue;
            }
            Err(BlockchainError::MissingPreviousTransaction(prev)) => {
                debug!("Skipping transaction {txid_hex}: previous transaction {prev} not mined");
                continue;
            }
            Err(e) => return Err(e),
        }

        if inputs.iter().any(|input| claimed.contains(input)) {
            debug!("Transaction {txid_hex} conflicts with one already selected");
            continue;
        }
        claimed.extend(inputs);
        selected.push(tx);
    }
    Ok(selected)
}
