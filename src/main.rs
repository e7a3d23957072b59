// Entry point for the node binary: parses the command line, loads the node's
// configuration and runs one command against the node's own database and wallet file.
use clap::Parser;
use data_encoding::HEXLOWER;
use ledger_node::network::Message;
use ledger_node::{
    pub_key_hash_from_address, validate_address, Blockchain, BlockchainError, Command, Config,
    NodeContext, Opt, Server, TcpTransport, Transaction, Transport, UTXOSet, Wallets,
};
use log::{error, info, LevelFilter};
use std::process;
use std::sync::Arc;

fn main() {
    // RUST_LOG still overrides the default Info level
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    let result = Config::load(opt.config.as_deref())
        .and_then(|config| run_command(&config, opt.command));
    if let Err(e) = result {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn require_address(address: &str) -> ledger_node::Result<()> {
    if validate_address(address) {
        Ok(())
    } else {
        Err(BlockchainError::InvalidAddress(address.to_string()))
    }
}

fn open_chain(config: &Config) -> ledger_node::Result<Blockchain> {
    Blockchain::new_blockchain_with_path(config.db_path(), config.difficulty)
}

fn run_command(config: &Config, command: Command) -> ledger_node::Result<()> {
    match command {
        Command::Createblockchain { address } => {
            require_address(&address)?;
            let blockchain = Blockchain::create_blockchain_with_path(
                &address,
                config.db_path(),
                config.difficulty,
            )?;
            UTXOSet::new(blockchain)?.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load(config.wallet_path())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            require_address(&address)?;
            let pub_key_hash = pub_key_hash_from_address(&address)?;
            let utxo_set = UTXOSet::new(open_chain(config)?)?;
            let balance = utxo_set.get_balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            for address in Wallets::load(config.wallet_path())?.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            require_address(&from)?;
            require_address(&to)?;

            let wallets = Wallets::load(config.wallet_path())?;
            let wallet = wallets
                .get_wallet(&from)
                .ok_or_else(|| BlockchainError::Wallet(format!("No local wallet for {from}")))?;
            let blockchain = open_chain(config)?;
            let utxo_set = UTXOSet::new(blockchain.clone())?;
            let tx = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;

            if mine {
                let coinbase_tx = Transaction::new_coinbase_tx(&from, "")?;
                let block = blockchain.mine_block(&[tx, coinbase_tx])?;
                utxo_set.update(&block)?;
            } else {
                let seed = config.seed_node();
                TcpTransport::default().send(seed, &Message::tx(&config.node_addr(), &tx)?)?;
                info!("Transaction {} sent to {seed}", HEXLOWER.encode(tx.get_id()));
            }
            println!("Success!")
        }
        Command::Printchain => {
            for block in open_chain(config)?.iterator()? {
                println!("{}", block?);
            }
        }
        Command::Reindexutxo => {
            let utxo_set = UTXOSet::new(open_chain(config)?)?;
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::GetHeight => {
            println!("{}", open_chain(config)?.get_best_height()?);
        }
        Command::StartNode { miner } => {
            let mining_addr = miner.or_else(|| config.mining_addr.clone());
            if let Some(addr) = &mining_addr {
                require_address(addr)?;
                println!("Mining is on. Address to receive rewards: {addr}");
            }

            // a joining node may start without a chain and sync it from the seed
            let blockchain = Blockchain::open_or_empty(config.db_path(), config.difficulty)?;
            let utxo_set = UTXOSet::new(blockchain)?;
            utxo_set.reindex()?;

            let node_addr = config.node_addr();
            let mut ctx = NodeContext::new(
                &node_addr,
                &config.seed_nodes,
                utxo_set,
                Arc::new(TcpTransport::default()),
            );
            if let Some(addr) = &mining_addr {
                ctx = ctx.with_miner(addr, config.mempool_threshold);
            }
            info!("Starting node {} on {node_addr}", config.node_id);
            Server::new(Arc::new(ctx)).run()?;
        }
    }
    Ok(())
}
