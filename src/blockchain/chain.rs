use log::info;
use thiserror::Error;

use super::block::Block;

/// Hash or link violations found while appending or loading blocks
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainIntegrityError {
    #[error("Chain has no blocks")]
    Empty,

    #[error("Invalid genesis block: {0}")]
    BadGenesis(String),

    #[error("Block {index} out of sequence: expected index {expected}")]
    IndexGap { index: u64, expected: u64 },

    #[error("Block {index} does not link to its predecessor: expected previous hash {expected}, found {found}")]
    BrokenLink {
        index: u64,
        expected: String,
        found: String,
    },

    #[error("Block {index} hash mismatch: stored {stored}, computed {computed}")]
    HashMismatch {
        index: u64,
        stored: String,
        computed: String,
    },

    #[error("Block {index} hash {hash} does not meet difficulty {difficulty}")]
    InsufficientWork {
        index: u64,
        hash: String,
        difficulty: u32,
    },
}

/// The ordered, append-only sequence of sealed blocks.
///
/// Always holds at least the genesis block. Blocks are only ever pushed, never
/// edited or removed.
#[derive(Debug, Clone)]
pub struct HashChain {
    blocks: Vec<Block>,
    difficulty: u32,
}

impl HashChain {
    /// Creates a chain holding only the genesis block
    pub fn new(difficulty: u32) -> Self {
        HashChain {
            blocks: vec![Block::genesis()],
            difficulty,
        }
    }

    /// Builds a chain from stored blocks, rejecting it unless it fully validates
    pub fn from_blocks(blocks: Vec<Block>, difficulty: u32) -> Result<Self, ChainIntegrityError> {
        let chain = HashChain { blocks, difficulty };
        chain.validate_full()?;
        info!("Validated chain of {} blocks at difficulty {}", chain.len(), difficulty);
        Ok(chain)
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Gets the last block in the chain
    pub fn last(&self) -> &Block {
        self.blocks
            .last()
            .expect("a hash chain always holds its genesis block")
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Checks that `block` may be appended next, without appending it
    pub fn check_next(&self, block: &Block) -> Result<(), ChainIntegrityError> {
        verify_successor(self.last(), block, self.difficulty)
    }

    /// Appends a sealed block after checking its link, content hash and work
    pub fn append(&mut self, block: Block) -> Result<(), ChainIntegrityError> {
        self.check_next(&block)?;
        self.blocks.push(block);
        Ok(())
    }

    /// Walks the whole chain verifying the genesis block, every link, every
    /// content hash and every non-genesis proof of work
    pub fn validate_full(&self) -> Result<(), ChainIntegrityError> {
        let genesis = self.blocks.first().ok_or(ChainIntegrityError::Empty)?;
        verify_genesis(genesis)?;

        for pair in self.blocks.windows(2) {
            verify_successor(&pair[0], &pair[1], self.difficulty)?;
        }

        Ok(())
    }
}

fn verify_genesis(block: &Block) -> Result<(), ChainIntegrityError> {
    let expected = Block::genesis();

    if block.index != 0 {
        return Err(ChainIntegrityError::BadGenesis(format!(
            "index is {}",
            block.index
        )));
    }
    if block.previous_hash != expected.previous_hash {
        return Err(ChainIntegrityError::BadGenesis(format!(
            "previous hash is {}",
            block.previous_hash
        )));
    }
    let computed = block.calculate_hash();
    if block.hash != computed {
        return Err(ChainIntegrityError::HashMismatch {
            index: 0,
            stored: block.hash.clone(),
            computed,
        });
    }
    if block.hash != expected.hash {
        return Err(ChainIntegrityError::BadGenesis(
            "payload differs from the fixed genesis".to_string(),
        ));
    }

    Ok(())
}

fn verify_successor(previous: &Block, block: &Block, difficulty: u32) -> Result<(), ChainIntegrityError> {
    let expected_index = previous.index + 1;
    if block.index != expected_index {
        return Err(ChainIntegrityError::IndexGap {
            index: block.index,
            expected: expected_index,
        });
    }

    if block.previous_hash != previous.hash {
        return Err(ChainIntegrityError::BrokenLink {
            index: block.index,
            expected: previous.hash.clone(),
            found: block.previous_hash.clone(),
        });
    }

    let computed = block.calculate_hash();
    if block.hash != computed {
        return Err(ChainIntegrityError::HashMismatch {
            index: block.index,
            stored: block.hash.clone(),
            computed,
        });
    }

    if !block.meets_difficulty(difficulty) {
        return Err(ChainIntegrityError::InsufficientWork {
            index: block.index,
            hash: block.hash.clone(),
            difficulty,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::amount::Amount;
    use crate::blockchain::crypto::Address;
    use crate::blockchain::event::LedgerEvent;
    use crate::blockchain::pow::{seal, CancelToken};

    const DIFFICULTY: u32 = 2;

    fn mine_next(chain: &HashChain, miner: &str) -> Block {
        let last = chain.last();
        let template = Block::new(
            last.index + 1,
            last.hash.clone(),
            last.timestamp + 1,
            vec![LedgerEvent::reward(
                Address(miner.to_string()),
                Amount::from_coins(50).unwrap(),
            )],
        );
        seal(template, chain.difficulty(), &CancelToken::new())
            .into_block()
            .unwrap()
    }

    fn chain_of(len: usize) -> HashChain {
        let mut chain = HashChain::new(DIFFICULTY);
        while chain.len() < len {
            let block = mine_next(&chain, "miner");
            chain.append(block).unwrap();
        }
        chain
    }

    #[test]
    fn test_new_chain() {
        let chain = HashChain::new(DIFFICULTY);

        assert_eq!(chain.len(), 1);
        assert_eq!(chain.last().index, 0);
        assert!(chain.validate_full().is_ok());
    }

    #[test]
    fn test_append_links_blocks() {
        let chain = chain_of(4);

        for pair in chain.blocks().windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].hash);
            assert!(pair[1].meets_difficulty(DIFFICULTY));
        }
        assert!(chain.validate_full().is_ok());
    }

    #[test]
    fn test_append_rejects_stale_parent() {
        let mut chain = chain_of(2);
        let stale = mine_next(&chain, "late-miner");
        let winner = mine_next(&chain, "fast-miner");
        chain.append(winner).unwrap();

        let err = chain.append(stale).unwrap_err();
        assert!(matches!(err, ChainIntegrityError::IndexGap { .. }));
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_append_rejects_wrong_link() {
        let mut chain = chain_of(2);
        let mut block = mine_next(&chain, "miner");
        block.previous_hash = "f".repeat(64);
        block.hash = block.calculate_hash();

        assert!(matches!(
            chain.append(block),
            Err(ChainIntegrityError::BrokenLink { .. })
        ));
    }

    #[test]
    fn test_append_rejects_unsealed_block() {
        let mut chain = HashChain::new(8);
        let template = Block::new(1, chain.last().hash.clone(), 1, Vec::new());

        assert!(matches!(
            chain.append(template),
            Err(ChainIntegrityError::InsufficientWork { difficulty: 8, .. })
        ));
    }

    #[test]
    fn test_validate_detects_mutated_events() {
        let chain = chain_of(3);
        let mut blocks = chain.blocks().to_vec();
        blocks[1].events.push(LedgerEvent::reward(
            Address("thief".to_string()),
            Amount::from_coins(1_000).unwrap(),
        ));

        assert!(matches!(
            HashChain::from_blocks(blocks, DIFFICULTY),
            Err(ChainIntegrityError::HashMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_validate_detects_rehashed_tampering() {
        let chain = chain_of(3);
        let mut blocks = chain.blocks().to_vec();

        // Re-hashing the edited block breaks the next block's link instead.
        blocks[1].timestamp += 10;
        blocks[1].hash = blocks[1].calculate_hash();

        let err = HashChain::from_blocks(blocks, DIFFICULTY).unwrap_err();
        assert!(matches!(
            err,
            ChainIntegrityError::InsufficientWork { index: 1, .. }
                | ChainIntegrityError::BrokenLink { index: 2, .. }
        ));
    }

    #[test]
    fn test_validate_rejects_foreign_genesis_and_empty() {
        assert_eq!(
            HashChain::from_blocks(Vec::new(), DIFFICULTY).unwrap_err(),
            ChainIntegrityError::Empty
        );

        let foreign = Block::new(0, "0".to_string(), 1, Vec::new());
        assert!(matches!(
            HashChain::from_blocks(vec![foreign], DIFFICULTY),
            Err(ChainIntegrityError::BadGenesis(_))
        ));
    }

    #[test]
    fn test_from_blocks_accepts_valid_chain() {
        let chain = chain_of(3);
        let restored = HashChain::from_blocks(chain.blocks().to_vec(), DIFFICULTY).unwrap();

        assert_eq!(restored.blocks(), chain.blocks());
        assert_eq!(restored.get(2), chain.get(2));
        assert!(restored.get(3).is_none());
    }
}
