use std::collections::HashMap;

use super::amount::{Amount, AmountError};
use super::block::Block;
use super::crypto::Address;
use super::event::LedgerEvent;

/// Derives balances by replaying the events of a chain snapshot.
///
/// Nothing is cached: every query walks the blocks in index order, so callers
/// must hand in one consistent slice (e.g. under a single read guard).
#[derive(Debug, Clone, Copy)]
pub struct LedgerView<'a> {
    blocks: &'a [Block],
}

impl<'a> LedgerView<'a> {
    pub fn new(blocks: &'a [Block]) -> Self {
        LedgerView { blocks }
    }

    /// All events in chain order
    pub fn events(&self) -> impl Iterator<Item = &'a LedgerEvent> + 'a {
        self.blocks.iter().flat_map(|block| block.events.iter())
    }

    /// Balance of `address`: rewards and incoming transfers minus outgoing transfers.
    ///
    /// Fails with [`AmountError::Overflow`] if the replayed total does not fit
    /// in an [`Amount`].
    pub fn compute_balance(&self, address: &Address) -> Result<Amount, AmountError> {
        let total = self
            .events()
            .map(|event| delta(event, address))
            .sum::<i128>();
        Amount::from_signed_total(total)
    }

    /// Balances for several addresses computed in one pass over the same snapshot
    pub fn balances_for_all(&self, addresses: &[Address]) -> Result<Vec<(Address, Amount)>, AmountError> {
        let mut totals: HashMap<&Address, i128> = addresses.iter().map(|a| (a, 0)).collect();

        for event in self.events() {
            match event {
                LedgerEvent::Reward { address, amount } => {
                    if let Some(total) = totals.get_mut(address) {
                        *total += i128::from(amount.base_units());
                    }
                }
                LedgerEvent::Transfer { from, to, amount, .. } => {
                    let units = i128::from(amount.base_units());
                    if let Some(total) = totals.get_mut(to) {
                        *total += units;
                    }
                    if let Some(total) = totals.get_mut(from) {
                        *total -= units;
                    }
                }
            }
        }

        addresses
            .iter()
            .map(|address| {
                let total = totals.get(address).copied().unwrap_or(0);
                Amount::from_signed_total(total).map(|balance| (address.clone(), balance))
            })
            .collect()
    }

    /// Sum of all rewards ever issued; transfers only move value around
    pub fn total_supply(&self) -> Result<Amount, AmountError> {
        let total = self
            .events()
            .filter(|event| event.is_reward())
            .map(|event| i128::from(event.amount().base_units()))
            .sum::<i128>();
        Amount::from_signed_total(total)
    }

    /// Events touching `address`, tagged with the index of their block
    pub fn history(&self, address: &Address) -> Vec<(u64, &'a LedgerEvent)> {
        self.blocks
            .iter()
            .flat_map(|block| block.events.iter().map(move |event| (block.index, event)))
            .filter(|(_, event)| event.involves(address))
            .collect()
    }
}

fn delta(event: &LedgerEvent, target: &Address) -> i128 {
    match event {
        LedgerEvent::Reward { address, amount } if address == target => {
            i128::from(amount.base_units())
        }
        LedgerEvent::Reward { .. } => 0,
        LedgerEvent::Transfer { from, to, amount, .. } => {
            let units = i128::from(amount.base_units());
            let mut delta = 0;
            if to == target {
                delta += units;
            }
            if from == target {
                delta -= units;
            }
            delta
        }
    }
}
