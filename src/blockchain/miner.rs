use log::{error, info};

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::crypto::Address;
use super::node::Node;
use super::pow::{CancelToken, SealOutcome};

/// A background thread mining blocks back to back for one address
#[derive(Debug)]
pub struct MinerHandle {
    address: Address,
    cancel: CancelToken,
    blocks_mined: Arc<AtomicU64>,
    thread: JoinHandle<()>,
}

impl MinerHandle {
    /// Spawns the miner thread. It runs until cancelled or until a block
    /// cannot be committed.
    pub fn spawn(node: Arc<Node>, address: Address) -> io::Result<Self> {
        let cancel = CancelToken::new();
        let blocks_mined = Arc::new(AtomicU64::new(0));

        let thread = {
            let cancel = cancel.clone();
            let blocks_mined = Arc::clone(&blocks_mined);
            let address = address.clone();
            thread::Builder::new()
                .name("bitscoin-miner".to_string())
                .spawn(move || run(&node, &address, &cancel, &blocks_mined))?
        };

        Ok(MinerHandle {
            address,
            cancel,
            blocks_mined,
            thread,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Cancels the current nonce search and joins the thread
    pub fn stop(self) -> u64 {
        self.cancel.cancel();
        if self.thread.join().is_err() {
            error!("Miner thread for {} panicked", self.address);
        }
        self.blocks_mined.load(Ordering::SeqCst)
    }
}

fn run(node: &Node, address: &Address, cancel: &CancelToken, blocks_mined: &AtomicU64) {
    loop {
        match node.mine_one(address, cancel) {
            Ok(SealOutcome::Sealed { .. }) => {
                blocks_mined.fetch_add(1, Ordering::SeqCst);
            }
            Ok(SealOutcome::Cancelled) => break,
            Err(err) => {
                error!("Miner for {} stopped: {}", address, err);
                return;
            }
        }
    }
    info!(
        "Miner for {} exiting after {} blocks",
        address,
        blocks_mined.load(Ordering::SeqCst)
    );
}
