//! The node: one chain, one wallet and a single serialized path for every
//! mutation.
//!
//! Readers take the chain's read guard and replay a consistent snapshot. Writers
//! (mined blocks, transfer blocks, new wallet addresses) first take the write
//! gate, so at most one mutation is in flight; the chain's write guard is held
//! only for the final push.

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use std::sync::Arc;

use super::amount::{Amount, AmountError};
use super::block::{self, Block};
use super::chain::{ChainIntegrityError, HashChain};
use super::crypto::{Address, CryptoError, DigitalSignature};
use super::event::{self, LedgerEvent};
use super::ledger::LedgerView;
use super::miner::MinerHandle;
use super::pow::{self, CancelToken, SealOutcome};
use super::storage::{ChainStore, StorageError};
use super::wallet::{AddressInfo, WalletError, WalletStore};
use crate::config::NodeConfig;

/// Errors returned by node operations
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Unknown address: {0}")]
    UnknownAddress(Address),

    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] CryptoError),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Ledger arithmetic error: {0}")]
    Ledger(#[from] AmountError),

    #[error("Reward of {reward} would raise the total supply past the largest amount")]
    SupplyExhausted { reward: Amount },

    #[error("Chain integrity error: {0}")]
    Integrity(#[from] ChainIntegrityError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Miner already running")]
    MiningActive,

    #[error("Miner not running")]
    MiningInactive,

    #[error("Failed to start miner thread: {0}")]
    MinerSpawn(#[source] std::io::Error),

    #[error("Node is shutting down")]
    ShuttingDown,
}

/// Snapshot of the node's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct NodeStatus {
    pub blocks: usize,
    pub difficulty: u32,
    #[schema(value_type = String, example = "50.00000000")]
    pub reward: Amount,
    /// Number of addresses in the wallet
    pub addresses: usize,
    pub mining: bool,
    pub miner_address: Option<Address>,
    pub tip_hash: String,
    #[schema(value_type = String, example = "150.00000000")]
    pub total_supply: Amount,
}

pub struct Node {
    chain: RwLock<HashChain>,
    /// Held for the whole of every mutation
    write_gate: Mutex<()>,
    wallet: Mutex<WalletStore>,
    store: Option<ChainStore>,
    reward: Amount,
    shutdown: CancelToken,
    miner: Mutex<Option<MinerHandle>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (blocks, difficulty) = {
            let chain = self.chain.read();
            (chain.len(), chain.difficulty())
        };
        f.debug_struct("Node")
            .field("blocks", &blocks)
            .field("difficulty", &difficulty)
            .field("reward", &self.reward)
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Opens the node's chain database and wallet file.
    ///
    /// A fresh database is seeded with the genesis block. A stored chain must
    /// pass full validation; any violation fails startup. When the database
    /// already records a difficulty it takes precedence over `config`.
    pub fn open(config: &NodeConfig) -> Result<Self, NodeError> {
        let store = ChainStore::open(config.chain_dir())?;

        let difficulty = match store.difficulty()? {
            Some(stored) if stored != config.difficulty => {
                warn!(
                    "Chain was sealed at difficulty {}, ignoring configured difficulty {}",
                    stored, config.difficulty
                );
                stored
            }
            Some(stored) => stored,
            None => config.difficulty,
        };

        let chain = if store.is_empty() {
            let chain = HashChain::new(difficulty);
            store.save_block(chain.last())?;
            info!("Initialized new chain at {}", config.chain_dir().display());
            chain
        } else {
            HashChain::from_blocks(store.load_blocks()?, difficulty)?
        };
        store.set_difficulty(difficulty)?;

        let wallet = WalletStore::open_with_iterations(
            &config.wallet_file,
            config.wallet_passphrase.as_deref(),
            config.kdf_iterations,
        )?;
        info!(
            "Loaded wallet {} with {} addresses",
            config.wallet_file.display(),
            wallet.len()
        );

        Ok(Self::assemble(chain, wallet, Some(store), config.reward))
    }

    /// A node whose chain lives only in memory
    pub fn in_memory(difficulty: u32, reward: Amount, wallet: WalletStore) -> Self {
        Self::assemble(HashChain::new(difficulty), wallet, None, reward)
    }

    fn assemble(chain: HashChain, wallet: WalletStore, store: Option<ChainStore>, reward: Amount) -> Self {
        Node {
            chain: RwLock::new(chain),
            write_gate: Mutex::new(()),
            wallet: Mutex::new(wallet),
            store,
            reward,
            shutdown: CancelToken::new(),
            miner: Mutex::new(None),
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.chain.read().difficulty()
    }

    pub fn reward(&self) -> Amount {
        self.reward
    }

    /// Token cancelled once the node shuts down
    pub fn shutdown_token(&self) -> CancelToken {
        self.shutdown.clone()
    }

    /// Mines one block paying the reward to `miner`.
    ///
    /// The nonce search runs without holding the write gate. If another block
    /// landed in the meantime the sealed block is stale; it is dropped and the
    /// search starts over on the new tip.
    pub fn mine_one(&self, miner: &Address, cancel: &CancelToken) -> Result<SealOutcome, NodeError> {
        loop {
            if cancel.is_cancelled() || self.shutdown.is_cancelled() {
                return Ok(SealOutcome::Cancelled);
            }

            let (template, difficulty) = {
                let chain = self.chain.read();
                ensure_issuable(&chain, self.reward)?;
                let template = next_template(&chain, vec![LedgerEvent::reward(miner.clone(), self.reward)]);
                (template, chain.difficulty())
            };

            let (block, elapsed) = match pow::seal(template, difficulty, cancel) {
                SealOutcome::Sealed { block, elapsed } => (block, elapsed),
                SealOutcome::Cancelled => return Ok(SealOutcome::Cancelled),
            };

            let _gate = self.write_gate.lock();
            // Another miner may have issued in the meantime.
            if let Err(err) = ensure_issuable(&self.chain.read(), self.reward) {
                warn!("Refusing to commit block #{}: {}", block.index, err);
                return Err(err);
            }
            match self.commit(&block) {
                Ok(()) => {
                    info!(
                        "Mined block #{} ({}) for {} in {:.2?}",
                        block.index, block.hash, miner, elapsed
                    );
                    return Ok(SealOutcome::Sealed { block, elapsed });
                }
                Err(NodeError::Integrity(
                    err @ (ChainIntegrityError::IndexGap { .. } | ChainIntegrityError::BrokenLink { .. }),
                )) => {
                    debug!("Discarding stale block #{}: {}", block.index, err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Balance of `address` replayed from the current chain
    pub fn balance(&self, address: &Address) -> Result<Amount, NodeError> {
        let chain = self.chain.read();
        Ok(LedgerView::new(chain.blocks()).compute_balance(address)?)
    }

    /// Balances for several addresses, all read from the same snapshot
    pub fn balances(&self, addresses: &[Address]) -> Result<Vec<(Address, Amount)>, NodeError> {
        let chain = self.chain.read();
        Ok(LedgerView::new(chain.blocks()).balances_for_all(addresses)?)
    }

    /// Every wallet address with its current balance, in creation order
    pub fn wallet_balances(&self) -> Result<Vec<(AddressInfo, Amount)>, NodeError> {
        let infos = self.wallet.lock().list_addresses();
        let addresses: Vec<Address> = infos.iter().map(|info| info.address.clone()).collect();
        let balances = self.balances(&addresses)?;

        Ok(infos
            .into_iter()
            .zip(balances)
            .map(|(info, (_, balance))| (info, balance))
            .collect())
    }

    /// Records a signed transfer from a wallet address in a new sealed block.
    ///
    /// The balance check, sealing and append all happen under the write gate,
    /// so two transfers can never spend the same funds.
    pub fn submit_transfer(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
        signature: &DigitalSignature,
    ) -> Result<Block, NodeError> {
        if amount.is_zero() {
            return Err(NodeError::InvalidAmount);
        }
        to.decode()?;

        let message = event::transfer_message(from, to, amount);
        {
            let wallet = self.wallet.lock();
            if !wallet.contains(from) {
                warn!("Rejected transfer from unknown address {}", from);
                return Err(NodeError::UnknownAddress(from.clone()));
            }
            if !wallet.verify(from, message.as_bytes(), signature) {
                warn!("Rejected transfer from {}: bad signature", from);
                return Err(NodeError::InvalidSignature);
            }
        }

        let _gate = self.write_gate.lock();

        let (template, difficulty) = {
            let chain = self.chain.read();
            let available = LedgerView::new(chain.blocks()).compute_balance(from)?;
            if available < amount {
                warn!(
                    "Rejected transfer of {} from {}: only {} available",
                    amount, from, available
                );
                return Err(NodeError::InsufficientFunds {
                    required: amount,
                    available,
                });
            }

            let transfer = LedgerEvent::transfer(
                from.clone(),
                to.clone(),
                amount,
                block::now_secs(),
                signature.clone(),
            );
            (next_template(&chain, vec![transfer]), chain.difficulty())
        };

        let block = pow::seal(template, difficulty, &self.shutdown)
            .into_block()
            .ok_or(NodeError::ShuttingDown)?;
        self.commit(&block)?;

        info!(
            "Recorded transfer of {} from {} to {} in block #{}",
            amount, from, to, block.index
        );
        Ok(block)
    }

    /// Creates a wallet address; the wallet file is flushed before returning.
    ///
    /// A blank label becomes `Address <n>`, numbered under the write gate so
    /// concurrent creations never share a default label.
    pub fn create_address(&self, label: &str) -> Result<Address, NodeError> {
        let _gate = self.write_gate.lock();
        let mut wallet = self.wallet.lock();
        let label = match label.trim() {
            "" => format!("Address {}", wallet.len() + 1),
            label => label.to_string(),
        };
        Ok(wallet.create_address(&label)?)
    }

    pub fn list_addresses(&self) -> Vec<AddressInfo> {
        self.wallet.lock().list_addresses()
    }

    pub fn owns(&self, address: &Address) -> bool {
        self.wallet.lock().contains(address)
    }

    /// Signs `message` with the wallet key of `address`
    pub fn sign(&self, address: &Address, message: &[u8]) -> Result<DigitalSignature, NodeError> {
        self.wallet
            .lock()
            .sign(address, message)
            .map_err(|err| match err {
                WalletError::UnknownAddress(address) => NodeError::UnknownAddress(address),
                other => NodeError::Wallet(other),
            })
    }

    /// Signs the canonical transfer message for a transfer from `from`
    pub fn sign_transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<DigitalSignature, NodeError> {
        self.sign(from, event::transfer_message(from, to, amount).as_bytes())
    }

    pub fn verify(&self, address: &Address, message: &[u8], signature: &DigitalSignature) -> bool {
        self.wallet.lock().verify(address, message, signature)
    }

    pub fn status(&self) -> Result<NodeStatus, NodeError> {
        let (blocks, difficulty, tip_hash, total_supply) = {
            let chain = self.chain.read();
            (
                chain.len(),
                chain.difficulty(),
                chain.last().hash.clone(),
                LedgerView::new(chain.blocks()).total_supply()?,
            )
        };
        let miner_address = self.mining_address();

        Ok(NodeStatus {
            blocks,
            difficulty,
            reward: self.reward,
            addresses: self.wallet.lock().len(),
            mining: miner_address.is_some(),
            miner_address,
            tip_hash,
            total_supply,
        })
    }

    /// Copy of every block in index order
    pub fn chain(&self) -> Vec<Block> {
        self.chain.read().blocks().to_vec()
    }

    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }

    /// Events touching `address`, tagged with their block index
    pub fn history(&self, address: &Address) -> Vec<(u64, LedgerEvent)> {
        let chain = self.chain.read();
        LedgerView::new(chain.blocks())
            .history(address)
            .into_iter()
            .map(|(index, event)| (index, event.clone()))
            .collect()
    }

    /// Re-runs full validation over the in-memory chain
    pub fn validate(&self) -> Result<(), ChainIntegrityError> {
        self.chain.read().validate_full()
    }

    /// Starts the background miner paying rewards to `address`
    pub fn start_mining(self: &Arc<Self>, address: Address) -> Result<(), NodeError> {
        if self.shutdown.is_cancelled() {
            return Err(NodeError::ShuttingDown);
        }
        if !self.owns(&address) {
            return Err(NodeError::UnknownAddress(address));
        }

        let mut slot = self.miner.lock();
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                return Err(NodeError::MiningActive);
            }
        }
        // A finished miner (e.g. after a storage error) is replaced.
        if let Some(finished) = slot.take() {
            finished.stop();
        }

        let handle = MinerHandle::spawn(Arc::clone(self), address).map_err(NodeError::MinerSpawn)?;
        info!("Started miner for {}", handle.address());
        *slot = Some(handle);
        Ok(())
    }

    /// Cancels the background miner and waits for it to exit; returns the number
    /// of blocks it mined
    pub fn stop_mining(&self) -> Result<u64, NodeError> {
        let handle = self.miner.lock().take().ok_or(NodeError::MiningInactive)?;
        let address = handle.address().clone();
        let mined = handle.stop();
        info!("Stopped miner for {} after {} blocks", address, mined);
        Ok(mined)
    }

    pub fn is_mining(&self) -> bool {
        self.miner
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Address of the running miner, if any
    pub fn mining_address(&self) -> Option<Address> {
        self.miner
            .lock()
            .as_ref()
            .filter(|handle| !handle.is_finished())
            .map(|handle| handle.address().clone())
    }

    /// Cancels every nonce search, stops the miner and waits for it
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Ok(mined) = self.stop_mining() {
            debug!("Miner exited during shutdown ({} blocks)", mined);
        }
        info!("Node shut down at height {}", self.len().saturating_sub(1));
    }

    /// Validates, persists, then publishes `block`. Callers hold the write gate.
    fn commit(&self, block: &Block) -> Result<(), NodeError> {
        self.chain.read().check_next(block)?;

        if let Some(store) = &self.store {
            if let Err(err) = store.save_block(block) {
                error!("Failed to persist block #{}: {}", block.index, err);
                return Err(err.into());
            }
        }

        self.chain.write().append(block.clone())?;
        Ok(())
    }
}

/// Fails unless one more `reward` still fits in the total supply
fn ensure_issuable(chain: &HashChain, reward: Amount) -> Result<(), NodeError> {
    let supply = LedgerView::new(chain.blocks()).total_supply()?;
    supply
        .checked_add(reward)
        .map(|_| ())
        .ok_or(NodeError::SupplyExhausted { reward })
}

/// Unsealed successor of the chain's tip carrying `events`
fn next_template(chain: &HashChain, events: Vec<LedgerEvent>) -> Block {
    let tip = chain.last();
    Block::new(tip.index + 1, tip.hash.clone(), block::now_secs(), events)
}
