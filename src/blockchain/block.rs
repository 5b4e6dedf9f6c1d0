use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::event::LedgerEvent;

/// Fixed timestamp of the genesis block (2025-01-01T00:00:00Z)
pub const GENESIS_TIMESTAMP: u64 = 1_735_689_600;

/// Previous-hash marker carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Seconds since the Unix epoch when the block template was built
    pub timestamp: u64,

    /// Ledger events recorded in this block
    pub events: Vec<LedgerEvent>,

    /// Proof of work
    pub nonce: u64,

    /// Hash of the current block (calculated)
    pub hash: String,
}

/// Hash input minus the nonce. Field order here is the canonical order.
#[derive(Serialize)]
struct CanonicalHeader<'a> {
    index: u64,
    previous_hash: &'a str,
    timestamp: u64,
    events: &'a [LedgerEvent],
}

impl Block {
    /// Creates an unsealed block template with nonce 0
    pub fn new(index: u64, previous_hash: String, timestamp: u64, events: Vec<LedgerEvent>) -> Self {
        let mut block = Block {
            index,
            previous_hash,
            timestamp,
            events,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// The genesis block. Its payload is fixed so every node derives the same hash.
    pub fn genesis() -> Self {
        Block::new(0, GENESIS_PREVIOUS_HASH.to_string(), GENESIS_TIMESTAMP, Vec::new())
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Canonical hash input up to and including `"nonce":`.
    ///
    /// The full input is compact JSON
    /// `{"index":..,"previous_hash":"..","timestamp":..,"events":[..],"nonce":..}`
    /// with integer timestamps and amounts in their fixed 8-decimal text form.
    pub fn canonical_prefix(&self) -> Vec<u8> {
        let header = CanonicalHeader {
            index: self.index,
            previous_hash: &self.previous_hash,
            timestamp: self.timestamp,
            events: &self.events,
        };

        let mut bytes = serde_json::to_vec(&header)
            .expect("header holds only strings, integers and derived enums");
        bytes.pop(); // closing brace
        bytes.extend_from_slice(b",\"nonce\":");
        bytes
    }

    /// Calculates the SHA-256 hash of the block as lowercase hex
    pub fn calculate_hash(&self) -> String {
        let mut buf = Vec::new();
        hash_with_nonce(&self.canonical_prefix(), self.nonce, &mut buf)
    }

    /// Whether the stored hash matches the block's content
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        meets_difficulty(&self.hash, difficulty)
    }
}

/// Hashes `prefix || nonce || "}"`, reusing `buf` between calls
pub(crate) fn hash_with_nonce(prefix: &[u8], nonce: u64, buf: &mut Vec<u8>) -> String {
    buf.clear();
    buf.extend_from_slice(prefix);
    buf.extend_from_slice(nonce.to_string().as_bytes());
    buf.push(b'}');
    hex::encode(Sha256::digest(&buf[..]))
}

/// Number of leading `'0'` hex digits in `hash`
pub fn leading_zero_digits(hash: &str) -> usize {
    hash.bytes().take_while(|b| *b == b'0').count()
}

/// Whether `hash` has at least `difficulty` leading zero hex digits
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    leading_zero_digits(hash) >= difficulty as usize
}

/// Current time in whole seconds since the Unix epoch
pub fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}
