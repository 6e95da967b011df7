//! Fee projection across defragmentation rounds
//!
//! When a payment needs more inputs than one transaction allows, the
//! account first spends its smallest outputs back to itself. These
//! functions simulate that sequence on a copy of the candidate values so
//! callers can quote the full cost before anything is submitted.

use super::input_selector::{saturating_sum, InputSelector, SelectableOutput};
use crate::errors::SelectionError;

/// Outputs of the final transaction when the whole balance is sent
const SEND_ALL_OUTPUT_COUNT: usize = 1;

/// Projected cost of paying an amount
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeeProjection {
    /// Fee of each consolidation transaction, in execution order
    pub merge_fees: Vec<u128>,
    /// Fee of the final payment transaction
    pub payment_fee: u128,
    /// Inputs spent across all transactions
    pub inputs_consumed: usize,
}

impl FeeProjection {
    pub fn total_fee(&self) -> u128 {
        saturating_sum(self.merge_fees.iter().copied()).saturating_add(self.payment_fee)
    }

    pub fn defragmentation_rounds(&self) -> usize {
        self.merge_fees.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.merge_fees.len() + 1
    }
}

impl InputSelector {
    /// Total fee to pay `amount`, including every merge round the current
    /// fragmentation forces before the payment itself fits.
    pub fn calculate_fee<T: SelectableOutput>(
        &self,
        outputs: &[T],
        amount: u128,
        output_count: usize,
    ) -> Result<u128, SelectionError> {
        self.project_fee(outputs, amount, output_count)
            .map(|projection| projection.total_fee())
    }

    /// Round-by-round breakdown behind [`InputSelector::calculate_fee`]
    pub fn project_fee<T: SelectableOutput>(
        &self,
        outputs: &[T],
        amount: u128,
        output_count: usize,
    ) -> Result<FeeProjection, SelectionError> {
        let mut values: Vec<u128> = outputs.iter().map(SelectableOutput::selectable_value).collect();
        let mut projection = FeeProjection::default();
        loop {
            match self.select_prefix(&values, amount, output_count) {
                Ok((inputs, fee, _)) => {
                    projection.payment_fee = fee;
                    projection.inputs_consumed += inputs;
                    return Ok(projection);
                }
                Err(SelectionError::Fragmented { .. }) => {
                    self.simulate_merge(&mut values, &mut projection)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Value that can leave the account once fragmentation is paid for.
    ///
    /// Merges until every remaining output fits in one transaction, then
    /// charges a single-output transaction spending all of them.
    pub fn transferable_amount<T: SelectableOutput>(
        &self,
        outputs: &[T],
    ) -> Result<u128, SelectionError> {
        let mut values: Vec<u128> = outputs.iter().map(SelectableOutput::selectable_value).collect();
        let mut projection = FeeProjection::default();
        while values.len() > self.max_inputs() {
            self.simulate_merge(&mut values, &mut projection)?;
        }
        if values.is_empty() {
            return Ok(0);
        }
        let total = saturating_sum(values.iter().copied());
        let fee = self
            .fees()
            .transaction_fee(values.len(), SEND_ALL_OUTPUT_COUNT);
        Ok(total.saturating_sub(fee))
    }

    /// Apply one merge to the simulated candidate list. The consolidated
    /// output goes to the front, where the next selection pass meets it first.
    fn simulate_merge(
        &self,
        values: &mut Vec<u128>,
        projection: &mut FeeProjection,
    ) -> Result<(), SelectionError> {
        let (mut indices, fee, total) = self.select_merge_indices(values)?;
        indices.sort_unstable();
        for i in indices.iter().rev() {
            values.remove(*i);
        }
        values.insert(0, total - fee);
        projection.merge_fees.push(fee);
        projection.inputs_consumed += indices.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::{FeeSchedule, MAX_INPUTS, MERGE_OUTPUT_COUNT};

    fn selector() -> InputSelector {
        InputSelector::new(FeeSchedule::new(10, 1, 2))
    }

    #[test]
    fn test_no_defragmentation_needed() {
        let outputs = vec![100u64; 40];
        let projection = selector().project_fee(&outputs, 500, 2).unwrap();
        // six inputs: 600 >= 500 + 10 + 6 + 4
        assert_eq!(projection.defragmentation_rounds(), 0);
        assert_eq!(projection.payment_fee, 20);
        assert_eq!(selector().calculate_fee(&outputs, 500, 2).unwrap(), 20);
    }

    #[test]
    fn test_two_rounds_match_manual_merges() {
        let selector = selector();
        let outputs = vec![100u64; 40];
        let amount = 3_100;

        let projection = selector.project_fee(&outputs, amount, 2).unwrap();
        assert_eq!(projection.defragmentation_rounds(), 2);
        assert_eq!(projection.transaction_count(), 3);

        // replay the plans select_for_merging produces
        let first = selector.select_for_merging(&outputs).unwrap();
        assert_eq!(first.inputs.len(), MAX_INPUTS);
        let mut remaining: Vec<u128> = vec![first.consolidated_value()];
        remaining.extend(vec![100u128; 40 - MAX_INPUTS]);
        assert!(selector.requires_defragmentation(&remaining, amount, 2).unwrap());

        let second = selector.select_for_merging(&remaining).unwrap();
        assert_eq!(second.inputs, vec![100u128; MAX_INPUTS]);
        let mut last: Vec<u128> = vec![second.consolidated_value(), first.consolidated_value()];
        last.extend(vec![100u128; 40 - 2 * MAX_INPUTS]);
        let payment = selector.select_for_amount(&last, amount, 2).unwrap();
        assert_eq!(payment.inputs.len(), 2);

        let inputs_consumed = first.inputs.len() + second.inputs.len() + payment.inputs.len();
        assert_eq!(projection.inputs_consumed, inputs_consumed);

        let fees = selector.fees();
        let expected = fees.tx_fee * 3
            + fees.input_fee * inputs_consumed as u128
            + fees.output_fee * (MERGE_OUTPUT_COUNT as u128 * 3);
        assert_eq!(expected, 76);
        assert_eq!(selector.calculate_fee(&outputs, amount, 2).unwrap(), expected);
        assert_eq!(first.fee + second.fee + payment.fee, expected);
    }

    #[test]
    fn test_projection_insufficient() {
        let outputs = vec![100u64; 40];
        assert!(matches!(
            selector().calculate_fee(&outputs, 10_000, 2),
            Err(SelectionError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_transferable_amount() {
        let outputs = vec![100u64; 40];
        // two merges of 30 each, then 10 inputs into one output: 10 + 10 + 2
        assert_eq!(selector().transferable_amount(&outputs).unwrap(), 3_918);
        assert_eq!(selector().transferable_amount::<u64>(&[]).unwrap(), 0);
        assert_eq!(
            InputSelector::default().transferable_amount(&[5u64, 6]).unwrap(),
            11
        );
    }

    #[test]
    fn test_transferable_amount_symmetric_with_calculate_fee() {
        let selector = selector();
        let outputs = vec![100u64; 40];
        let total: u128 = 4_000;
        let transferable = selector.transferable_amount(&outputs).unwrap();
        let fee = selector.calculate_fee(&outputs, transferable, 1).unwrap();
        assert_eq!(transferable + fee, total);
    }

    #[test]
    fn test_max_inputs_is_clamped_for_projection() {
        let outputs = vec![1u64; 3];
        let clamped = InputSelector::default().with_max_inputs(1);
        assert_eq!(clamped.max_inputs(), 2);
        assert_eq!(clamped.calculate_fee(&outputs, 3, 1).unwrap(), 0);
        assert_eq!(clamped.transferable_amount(&outputs).unwrap(), 3);
    }

    #[test]
    fn test_unpayable_amount_fails_projection() {
        let outputs = vec![100u64; 40];
        assert!(matches!(
            selector().calculate_fee(&outputs, u128::MAX, 1),
            Err(SelectionError::InsufficientFunds {
                required: u128::MAX,
                ..
            })
        ));
        assert!(matches!(
            InputSelector::default().project_fee(&outputs, u128::MAX, 1),
            Err(SelectionError::InsufficientFunds { available: 4_000, .. })
        ));
    }

    #[test]
    fn test_dust_cannot_be_merged() {
        let selector = InputSelector::new(FeeSchedule::new(10, 5, 5));
        let outputs = vec![1u64; 40];
        assert!(matches!(
            selector.transferable_amount(&outputs),
            Err(SelectionError::InsufficientFunds { .. })
        ));
    }
}
