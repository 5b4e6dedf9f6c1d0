use log::debug;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::block::{self, Block};

/// Thread-safe flag used to abort a nonce search.
///
/// Clones share the same flag; once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of a nonce search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealOutcome {
    /// The block's hash meets the target
    Sealed { block: Block, elapsed: Duration },

    /// The search was aborted through its [`CancelToken`]
    Cancelled,
}

impl SealOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SealOutcome::Cancelled)
    }

    pub fn into_block(self) -> Option<Block> {
        match self {
            SealOutcome::Sealed { block, .. } => Some(block),
            SealOutcome::Cancelled => None,
        }
    }
}

/// Searches for a nonce giving `template` a hash with `difficulty` leading zero
/// hex digits.
///
/// The search has no attempt cap; `cancel` is checked before every attempt. The
/// nonce starts at the template's nonce. If the nonce space runs out the
/// timestamp is bumped by one second and the search restarts from zero.
pub fn seal(template: Block, difficulty: u32, cancel: &CancelToken) -> SealOutcome {
    let start = Instant::now();
    let mut block = template;
    let mut prefix = block.canonical_prefix();
    let mut buf = Vec::with_capacity(prefix.len() + 21);
    let mut nonce = block.nonce;
    let mut attempts: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            debug!(
                "Nonce search for block #{} cancelled after {} attempts",
                block.index, attempts
            );
            return SealOutcome::Cancelled;
        }

        let hash = block::hash_with_nonce(&prefix, nonce, &mut buf);
        attempts += 1;

        if block::meets_difficulty(&hash, difficulty) {
            block.nonce = nonce;
            block.hash = hash;
            let elapsed = start.elapsed();
            debug!(
                "Sealed block #{} after {} attempts in {:?}",
                block.index, attempts, elapsed
            );
            return SealOutcome::Sealed { block, elapsed };
        }

        nonce = match nonce.checked_add(1) {
            Some(next) => next,
            None => {
                block.timestamp += 1;
                prefix = block.canonical_prefix();
                0
            }
        };
    }
}
