use std::path::Path;

use log::info;
use sled::{Db, Tree};
use thiserror::Error;

use super::block::Block;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Block stored under index {key} claims index {index}")]
    MisplacedBlock { key: u64, index: u64 },
}

/// Durable block storage.
///
/// Blocks live in one tree keyed by the big-endian block index, so iteration
/// returns them in chain order.
pub struct ChainStore {
    /// The database instance
    db: Db,

    /// Tree for blocks
    blocks: Tree,

    /// Tree for metadata
    metadata: Tree,
}

impl std::fmt::Debug for ChainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStore")
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

const DIFFICULTY_KEY: &str = "difficulty";

impl ChainStore {
    /// Opens (or creates) the block database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;

        let blocks = db.open_tree("blocks")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            metadata,
        })
    }

    /// Opens a throwaway database that is removed when dropped
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;

        let blocks = db.open_tree("blocks")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            metadata,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Saves a block under its index and flushes it to disk
    pub fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let value = bincode::serialize(block)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        self.blocks.insert(block.index.to_be_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    /// Loads every stored block in index order.
    ///
    /// Any undecodable record fails the whole load; a partial chain is never
    /// returned.
    pub fn load_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let mut blocks = Vec::with_capacity(self.blocks.len());

        for entry in self.blocks.iter() {
            let (key, value) = entry?;
            let key_bytes: [u8; 8] = key.as_ref().try_into().map_err(|_| {
                StorageError::DeserializationError(format!("invalid block key of {} bytes", key.len()))
            })?;
            let key = u64::from_be_bytes(key_bytes);

            let block: Block = bincode::deserialize(&value)
                .map_err(|e| StorageError::DeserializationError(format!("block {}: {}", key, e)))?;
            if block.index != key {
                return Err(StorageError::MisplacedBlock {
                    key,
                    index: block.index,
                });
            }
            blocks.push(block);
        }

        info!("Loaded {} blocks from storage", blocks.len());
        Ok(blocks)
    }

    /// Difficulty the stored chain was sealed under, if recorded
    pub fn difficulty(&self) -> Result<Option<u32>, StorageError> {
        match self.metadata.get(DIFFICULTY_KEY)? {
            Some(value) => {
                let bytes: [u8; 4] = value.as_ref().try_into().map_err(|_| {
                    StorageError::DeserializationError("invalid difficulty record".to_string())
                })?;
                Ok(Some(u32::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    pub fn set_difficulty(&self, difficulty: u32) -> Result<(), StorageError> {
        self.metadata.insert(DIFFICULTY_KEY, &difficulty.to_be_bytes()[..])?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::amount::Amount;
    use crate::blockchain::crypto::{Address, DigitalSignature};
    use crate::blockchain::event::LedgerEvent;
    use tempfile::TempDir;

    fn sample_block(index: u64) -> Block {
        Block::new(
            index,
            "0".repeat(64),
            1_700_000_000,
            vec![
                LedgerEvent::reward(Address("miner".to_string()), Amount::from_coins(50).unwrap()),
                LedgerEvent::transfer(
                    Address("a".to_string()),
                    Address("b".to_string()),
                    "1.5".parse().unwrap(),
                    1_700_000_001,
                    DigitalSignature("sig".to_string()),
                ),
            ],
        )
    }

    #[test]
    fn test_blocks_roundtrip_exactly_in_index_order() {
        let store = ChainStore::temporary().unwrap();
        // Insert out of order; keys sort by index.
        for index in [3u64, 1, 256, 2] {
            store.save_block(&sample_block(index)).unwrap();
        }

        let loaded = store.load_blocks().unwrap();
        let indices: Vec<u64> = loaded.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 256]);
        assert_eq!(loaded[0], sample_block(1));
    }

    #[test]
    fn test_reopen_reads_flushed_blocks() {
        let dir = TempDir::new().unwrap();
        {
            let store = ChainStore::open(dir.path()).unwrap();
            store.save_block(&Block::genesis()).unwrap();
            store.set_difficulty(3).unwrap();
        }

        let store = ChainStore::open(dir.path()).unwrap();
        assert_eq!(store.load_blocks().unwrap(), vec![Block::genesis()]);
        assert_eq!(store.difficulty().unwrap(), Some(3));
    }

    #[test]
    fn test_garbage_record_fails_load() {
        let store = ChainStore::temporary().unwrap();
        store.save_block(&Block::genesis()).unwrap();
        store.blocks.insert(1u64.to_be_bytes(), &b"garbage"[..]).unwrap();

        assert!(matches!(
            store.load_blocks(),
            Err(StorageError::DeserializationError(_))
        ));
    }

    #[test]
    fn test_misplaced_record_fails_load() {
        let store = ChainStore::temporary().unwrap();
        let value = bincode::serialize(&sample_block(5)).unwrap();
        store.blocks.insert(4u64.to_be_bytes(), value).unwrap();

        assert!(matches!(
            store.load_blocks(),
            Err(StorageError::MisplacedBlock { key: 4, index: 5 })
        ));
    }
}
