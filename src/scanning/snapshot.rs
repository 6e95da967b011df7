//! Immutable view of the synced part of a store
//!
//! Coin selection runs against a snapshot so it never observes a store in
//! the middle of a refresh.

use std::collections::BTreeSet;

use crate::data_structures::OwnedOutput;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    synced_position: u64,
    outputs: Vec<OwnedOutput>,
}

impl StoreSnapshot {
    /// Outputs are kept in ledger order: received-position, then public key
    pub fn new(synced_position: u64, mut outputs: Vec<OwnedOutput>) -> Self {
        outputs.sort_by(|a, b| {
            a.received_position()
                .cmp(&b.received_position())
                .then_with(|| a.public_key().cmp(b.public_key()))
        });
        Self {
            synced_position,
            outputs,
        }
    }

    pub fn synced_position(&self) -> u64 {
        self.synced_position
    }

    pub fn outputs(&self) -> &[OwnedOutput] {
        &self.outputs
    }

    pub fn token_ids(&self) -> BTreeSet<u64> {
        self.outputs.iter().map(OwnedOutput::token_id).collect()
    }

    pub fn unspent_outputs(&self, token_id: u64) -> Vec<OwnedOutput> {
        self.unspent(token_id).cloned().collect()
    }

    /// Sum of unspent values; may exceed `u64::MAX`
    pub fn balance(&self, token_id: u64) -> u128 {
        self.unspent(token_id)
            .map(|output| output.value() as u128)
            .sum()
    }

    fn unspent(&self, token_id: u64) -> impl Iterator<Item = &OwnedOutput> {
        self.outputs
            .iter()
            .filter(move |output| output.token_id() == token_id && !output.is_spent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{OutputPayload, OutputPublicKey};

    fn output(key: u8, token_id: u64, value: u64, position: u64) -> OwnedOutput {
        OwnedOutput::from_payload(OutputPayload {
            public_key: OutputPublicKey([key; 32]),
            token_id,
            value,
            key_image: None,
            received_position: position,
            received_time: 0,
            subaddress_index: 0,
        })
    }

    #[test]
    fn test_ledger_order_and_per_token_balance() {
        let snapshot = StoreSnapshot::new(
            100,
            vec![
                output(3, 0, 30, 9),
                output(1, 0, 10, 9),
                output(2, 1, 20, 4),
            ],
        );
        let keys: Vec<u8> = snapshot
            .outputs()
            .iter()
            .map(|output| output.public_key().0[0])
            .collect();
        assert_eq!(keys, vec![2, 1, 3]);
        assert_eq!(snapshot.balance(0), 40);
        assert_eq!(snapshot.balance(1), 20);
        assert_eq!(snapshot.balance(7), 0);
        assert_eq!(snapshot.token_ids().into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_balance_exceeds_u64_and_skips_spent() {
        let mut spent = output(4, 0, 5, 1);
        spent.mark_spent(2, 0).unwrap();
        let snapshot = StoreSnapshot::new(
            10,
            vec![output(1, 0, u64::MAX, 1), output(2, 0, u64::MAX, 2), spent],
        );
        assert_eq!(snapshot.balance(0), 2 * u64::MAX as u128);
        assert_eq!(snapshot.unspent_outputs(0).len(), 2);
    }
}
