// Blockchain module
//
// Core ledger implementation:
// - Fixed-precision amounts and typed ledger events
// - Blocks, the hash chain and proof of work
// - Balance replay over chain snapshots
// - Wallet keys, addresses and signatures
// - Block storage and the node coordinating all of it

pub mod amount;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod event;
pub mod ledger;
pub mod miner;
pub mod node;
pub mod pow;
pub mod storage;
pub mod vault;
pub mod wallet;

// Re-export main components for easier access
pub use amount::Amount;
pub use block::Block;
pub use chain::{ChainIntegrityError, HashChain};
pub use crypto::{Address, DigitalSignature, KeyPair};
pub use event::LedgerEvent;
pub use ledger::LedgerView;
pub use node::{Node, NodeError, NodeStatus};
pub use pow::{CancelToken, SealOutcome};
pub use storage::ChainStore;
pub use vault::DEFAULT_ITERATIONS;
pub use wallet::{AddressInfo, WalletStore};
