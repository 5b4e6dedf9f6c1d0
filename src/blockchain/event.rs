use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::amount::Amount;
use super::crypto::{Address, DigitalSignature};

/// A typed ledger record embedded in a block.
///
/// Serialized externally tagged (`{"Reward":{..}}` / `{"Transfer":{..}}`) with
/// fields in declaration order; that encoding is part of the block hash input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum LedgerEvent {
    /// Block reward paid to the miner; exactly one per mined block
    Reward {
        address: Address,
        #[schema(value_type = String, example = "50.00000000")]
        amount: Amount,
    },

    /// Value moved between two addresses, authorized by the sender's signature
    Transfer {
        from: Address,
        to: Address,
        #[schema(value_type = String, example = "40.00000000")]
        amount: Amount,
        /// Seconds since the Unix epoch
        timestamp: u64,
        signature: DigitalSignature,
    },
}

impl LedgerEvent {
    pub fn reward(address: Address, amount: Amount) -> Self {
        LedgerEvent::Reward { address, amount }
    }

    pub fn transfer(
        from: Address,
        to: Address,
        amount: Amount,
        timestamp: u64,
        signature: DigitalSignature,
    ) -> Self {
        LedgerEvent::Transfer {
            from,
            to,
            amount,
            timestamp,
            signature,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            LedgerEvent::Reward { amount, .. } | LedgerEvent::Transfer { amount, .. } => *amount,
        }
    }

    pub fn is_reward(&self) -> bool {
        matches!(self, LedgerEvent::Reward { .. })
    }

    /// Whether the event credits or debits `address`
    pub fn involves(&self, address: &Address) -> bool {
        match self {
            LedgerEvent::Reward { address: to, .. } => to == address,
            LedgerEvent::Transfer { from, to, .. } => from == address || to == address,
        }
    }
}

/// The message a sender signs to authorize a transfer: `"{from}->{to}:{amount}"`
pub fn transfer_message(from: &Address, to: &Address, amount: Amount) -> String {
    format!("{}->{}:{}", from, to, amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::KeyPair;

    #[test]
    fn test_reward_encoding_is_tagged() {
        let event = LedgerEvent::reward(
            Address("miner".to_string()),
            Amount::from_coins(50).unwrap(),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"Reward":{"address":"miner","amount":"50.00000000"}}"#);
        assert_eq!(serde_json::from_str::<LedgerEvent>(&json).unwrap(), event);
    }

    #[test]
    fn test_transfer_encoding_keeps_field_order() {
        let event = LedgerEvent::transfer(
            Address("a".to_string()),
            Address("b".to_string()),
            Amount::from_base_units(1),
            7,
            DigitalSignature("sig".to_string()),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"Transfer":{"from":"a","to":"b","amount":"0.00000001","timestamp":7,"signature":"sig"}}"#
        );
    }

    #[test]
    fn test_untrusted_text_is_rejected_not_evaluated() {
        let payload = r#"{"Transfer":{"from":"a","to":"b","amount":"__import__('os')","timestamp":1,"signature":"s"}}"#;
        assert!(serde_json::from_str::<LedgerEvent>(payload).is_err());
    }

    #[test]
    fn test_involves() {
        let a = KeyPair::generate().address();
        let b = KeyPair::generate().address();
        let c = KeyPair::generate().address();
        let event = LedgerEvent::transfer(
            a.clone(),
            b.clone(),
            Amount::from_coins(1).unwrap(),
            0,
            DigitalSignature(String::new()),
        );

        assert!(event.involves(&a));
        assert!(event.involves(&b));
        assert!(!event.involves(&c));
        assert!(!event.is_reward());
    }

    #[test]
    fn test_transfer_message_uses_fixed_amount_form() {
        let from = Address("X".to_string());
        let to = Address("Y".to_string());
        let amount: Amount = "40".parse().unwrap();
        assert_eq!(transfer_message(&from, &to, amount), "X->Y:40.00000000");
    }
}
