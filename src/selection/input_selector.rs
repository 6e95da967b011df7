use serde::{Deserialize, Serialize};

use crate::{data_structures::OwnedOutput, errors::SelectionError};

/// Maximum number of inputs a single transaction may spend
pub const MAX_INPUTS: usize = 16;

/// Outputs of a consolidation transaction: the merged output and change
pub const MERGE_OUTPUT_COUNT: usize = 2;

/// Anything with a spendable value
pub trait SelectableOutput {
    fn selectable_value(&self) -> u128;
}

impl SelectableOutput for OwnedOutput {
    fn selectable_value(&self) -> u128 {
        self.value() as u128
    }
}

impl SelectableOutput for u64 {
    fn selectable_value(&self) -> u128 {
        *self as u128
    }
}

impl SelectableOutput for u128 {
    fn selectable_value(&self) -> u128 {
        *self
    }
}

/// Per-transaction fee parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Flat fee charged once per transaction
    pub tx_fee: u128,
    /// Fee per spent input
    pub input_fee: u128,
    /// Fee per created output
    pub output_fee: u128,
}

impl FeeSchedule {
    pub fn new(tx_fee: u128, input_fee: u128, output_fee: u128) -> Self {
        Self {
            tx_fee,
            input_fee,
            output_fee,
        }
    }

    /// A schedule that charges nothing
    pub fn zero() -> Self {
        Self::default()
    }

    /// Fee for a transaction with the given shape, saturating at `u128::MAX`
    pub fn transaction_fee(&self, inputs: usize, outputs: usize) -> u128 {
        self.checked_transaction_fee(inputs, outputs)
            .unwrap_or(u128::MAX)
    }

    /// Fee for a transaction with the given shape; `None` on overflow
    pub fn checked_transaction_fee(&self, inputs: usize, outputs: usize) -> Option<u128> {
        let input_fees = self.input_fee.checked_mul(inputs as u128)?;
        let output_fees = self.output_fee.checked_mul(outputs as u128)?;
        self.tx_fee.checked_add(input_fees)?.checked_add(output_fees)
    }
}

/// Inputs chosen to fund a payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<T> {
    /// Chosen outputs, in the order they were supplied
    pub inputs: Vec<T>,
    /// Fee of the transaction spending `inputs`
    pub fee: u128,
    /// Sum of the input values
    pub total_value: u128,
}

impl<T> Selection<T> {
    /// Value left over after paying `amount` and the fee
    pub fn change(&self, amount: u128) -> u128 {
        amount
            .checked_add(self.fee)
            .map_or(0, |spent| self.total_value.saturating_sub(spent))
    }
}

/// One consolidation step: spend `inputs` back to the same account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan<T> {
    pub inputs: Vec<T>,
    pub fee: u128,
    pub total_value: u128,
}

impl<T> MergePlan<T> {
    /// Value of the single output the merge produces
    pub fn consolidated_value(&self) -> u128 {
        self.total_value - self.fee
    }

    /// How many outputs the account sheds by executing this plan
    pub fn fragments_removed(&self) -> usize {
        self.inputs.len().saturating_sub(1)
    }
}

/// Pure coin selection over a snapshot of unspent outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSelector {
    fees: FeeSchedule,
    /// At least 2, so every merge shrinks the candidate set
    max_inputs: usize,
}

impl InputSelector {
    pub fn new(fees: FeeSchedule) -> Self {
        Self {
            fees,
            max_inputs: MAX_INPUTS,
        }
    }

    pub fn with_max_inputs(mut self, max_inputs: usize) -> Self {
        self.max_inputs = max_inputs.max(2);
        self
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    pub fn max_inputs(&self) -> usize {
        self.max_inputs
    }

    /// Choose inputs paying `amount` plus fees for `output_count` outputs.
    ///
    /// Candidates are taken front to back in the order supplied until the
    /// accumulated value covers the amount and the fee for the inputs taken
    /// so far.
    pub fn select_for_amount<T: SelectableOutput + Clone>(
        &self,
        outputs: &[T],
        amount: u128,
        output_count: usize,
    ) -> Result<Selection<T>, SelectionError> {
        let values: Vec<u128> = outputs.iter().map(SelectableOutput::selectable_value).collect();
        let (count, fee, total_value) = self.select_prefix(&values, amount, output_count)?;
        Ok(Selection {
            inputs: outputs[..count].to_vec(),
            fee,
            total_value,
        })
    }

    /// Build one consolidation step from the smallest outputs.
    ///
    /// Takes up to `max_inputs` outputs in ascending value order (ties keep
    /// the supplied order). The merged value must stay positive after fees.
    pub fn select_for_merging<T: SelectableOutput + Clone>(
        &self,
        outputs: &[T],
    ) -> Result<MergePlan<T>, SelectionError> {
        let values: Vec<u128> = outputs.iter().map(SelectableOutput::selectable_value).collect();
        let (indices, fee, total_value) = self.select_merge_indices(&values)?;
        Ok(MergePlan {
            inputs: indices.into_iter().map(|i| outputs[i].clone()).collect(),
            fee,
            total_value,
        })
    }

    /// Whether paying `amount` needs a merge first.
    ///
    /// Fails with `InsufficientFunds` when no amount of merging would help.
    pub fn requires_defragmentation<T: SelectableOutput>(
        &self,
        outputs: &[T],
        amount: u128,
        output_count: usize,
    ) -> Result<bool, SelectionError> {
        let values: Vec<u128> = outputs.iter().map(SelectableOutput::selectable_value).collect();
        match self.select_prefix(&values, amount, output_count) {
            Ok(_) => Ok(false),
            Err(SelectionError::Fragmented { .. }) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Shortest funding prefix: `(input count, fee, prefix value)`
    pub(crate) fn select_prefix(
        &self,
        values: &[u128],
        amount: u128,
        output_count: usize,
    ) -> Result<(usize, u128, u128), SelectionError> {
        let mut total = 0u128;
        for (i, value) in values.iter().enumerate() {
            total = total.saturating_add(*value);
            let inputs = i + 1;
            // fees grow with the input count, so once the requirement
            // overflows no longer prefix can meet it
            let Some((fee, required)) = self
                .fees
                .checked_transaction_fee(inputs, output_count)
                .and_then(|fee| amount.checked_add(fee).map(|required| (fee, required)))
            else {
                break;
            };
            if total >= required {
                if inputs > self.max_inputs {
                    return Err(SelectionError::Fragmented {
                        required_inputs: inputs,
                        max_inputs: self.max_inputs,
                    });
                }
                return Ok((inputs, fee, total));
            }
        }
        Err(SelectionError::InsufficientFunds {
            available: saturating_sum(values.iter().copied()),
            required: amount
                .saturating_add(self.fees.transaction_fee(values.len().max(1), output_count)),
        })
    }

    /// Indices of the merge inputs with the merge fee and input value
    pub(crate) fn select_merge_indices(
        &self,
        values: &[u128],
    ) -> Result<(Vec<usize>, u128, u128), SelectionError> {
        if values.len() < 2 {
            return Err(SelectionError::NothingToMerge {
                candidates: values.len(),
            });
        }
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by_key(|&i| values[i]);
        order.truncate(self.max_inputs);

        // keep the merged value representable
        let mut total_value = 0u128;
        let mut take = 0;
        for &i in &order {
            match total_value.checked_add(values[i]) {
                Some(total) => {
                    total_value = total;
                    take += 1;
                }
                None => break,
            }
        }
        order.truncate(take);
        if order.len() < 2 {
            return Err(SelectionError::NothingToMerge {
                candidates: values.len(),
            });
        }

        let fee = self
            .fees
            .checked_transaction_fee(order.len(), MERGE_OUTPUT_COUNT)
            .ok_or(SelectionError::InsufficientFunds {
                available: total_value,
                required: u128::MAX,
            })?;
        if total_value <= fee {
            return Err(SelectionError::InsufficientFunds {
                available: total_value,
                required: fee.saturating_add(1),
            });
        }
        Ok((order, fee, total_value))
    }
}

pub(crate) fn saturating_sum(values: impl IntoIterator<Item = u128>) -> u128 {
    values
        .into_iter()
        .fold(0u128, |sum, value| sum.saturating_add(value))
}

impl Default for InputSelector {
    fn default() -> Self {
        Self::new(FeeSchedule::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_to_back_selection_keeps_order() {
        let selector = InputSelector::default();
        let selection = selector.select_for_amount(&[1u64, 10, 1], 3, 1).unwrap();
        assert_eq!(selection.inputs, vec![1, 10]);
        assert_eq!(selection.total_value, 11);
        assert_eq!(selection.fee, 0);
        assert_eq!(selection.change(3), 8);
    }

    #[test]
    fn test_insufficient_funds() {
        let selector = InputSelector::default();
        let err = selector.select_for_amount(&[10u64], 15, 1).unwrap_err();
        assert_eq!(
            err,
            SelectionError::InsufficientFunds {
                available: 10,
                required: 15
            }
        );
        assert!(matches!(
            selector.select_for_amount::<u64>(&[], 1, 1),
            Err(SelectionError::InsufficientFunds { available: 0, .. })
        ));
    }

    #[test]
    fn test_fragmented_instead_of_oversized_transaction() {
        let selector = InputSelector::default();
        let outputs = vec![1u64; 100];
        let err = selector.select_for_amount(&outputs, 50, 1).unwrap_err();
        assert_eq!(
            err,
            SelectionError::Fragmented {
                required_inputs: 50,
                max_inputs: MAX_INPUTS
            }
        );
        assert!(selector.requires_defragmentation(&outputs, 50, 1).unwrap());
        assert!(!selector.requires_defragmentation(&outputs, 16, 1).unwrap());
        assert!(selector.requires_defragmentation(&outputs, 101, 1).is_err());
    }

    #[test]
    fn test_fees_scale_with_inputs() {
        let selector = InputSelector::new(FeeSchedule::new(10, 2, 3));
        // one input: 5 < 20 + 18, two inputs: 45 >= 20 + 20
        let selection = selector.select_for_amount(&[5u64, 40, 100], 20, 2).unwrap();
        assert_eq!(selection.inputs, vec![5, 40]);
        assert_eq!(selection.fee, 20);
        assert_eq!(selection.change(20), 5);
    }

    #[test]
    fn test_exact_cover_is_sufficient() {
        let selector = InputSelector::new(FeeSchedule::new(1, 1, 1));
        let selection = selector.select_for_amount(&[4u64], 1, 1).unwrap();
        assert_eq!(selection.fee, 3);
        assert_eq!(selection.change(1), 0);
    }

    #[test]
    fn test_merge_prefers_smallest() {
        let selector = InputSelector::new(FeeSchedule::new(1, 0, 0)).with_max_inputs(3);
        let plan = selector.select_for_merging(&[50u64, 2, 9, 3, 7]).unwrap();
        assert_eq!(plan.inputs, vec![2, 3, 7]);
        assert_eq!(plan.fee, 1);
        assert_eq!(plan.consolidated_value(), 11);
        assert_eq!(plan.fragments_removed(), 2);
    }

    #[test]
    fn test_merge_ties_keep_supplied_order() {
        let selector = InputSelector::default().with_max_inputs(2);
        let (indices, fee, total) = selector.select_merge_indices(&[5, 5, 5]).unwrap();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(fee, 0);
        assert_eq!(total, 10);
    }

    #[test]
    fn test_single_input_merge_is_rejected() {
        // a one-input merge would leave the candidate set unchanged
        let stalled = InputSelector {
            max_inputs: 1,
            ..InputSelector::default()
        };
        let outputs = [1u64, 1, 1];
        assert_eq!(
            stalled.select_for_merging(&outputs).unwrap_err(),
            SelectionError::NothingToMerge { candidates: 3 }
        );
        assert_eq!(
            stalled.calculate_fee(&outputs, 3, 1).unwrap_err(),
            SelectionError::NothingToMerge { candidates: 3 }
        );
        assert_eq!(
            stalled.transferable_amount(&outputs).unwrap_err(),
            SelectionError::NothingToMerge { candidates: 3 }
        );
    }

    #[test]
    fn test_unpayable_amount_is_insufficient() {
        let selector = InputSelector::new(FeeSchedule::new(10, 1, 2));
        let outputs = [100u64, 200];
        assert_eq!(
            selector.select_for_amount(&outputs, u128::MAX, 1).unwrap_err(),
            SelectionError::InsufficientFunds {
                available: 300,
                required: u128::MAX
            }
        );
        assert!(selector.requires_defragmentation(&outputs, u128::MAX, 1).is_err());

        let fees = FeeSchedule::new(u128::MAX, 1, 0);
        assert_eq!(fees.checked_transaction_fee(1, 1), None);
        assert_eq!(fees.transaction_fee(1, 1), u128::MAX);
        assert!(matches!(
            InputSelector::new(fees).select_for_amount(&outputs, 1, 1),
            Err(SelectionError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_merge_stays_representable() {
        let selector = InputSelector::default();
        let (indices, _, total) = selector
            .select_merge_indices(&[u128::MAX - 1, 1, u128::MAX])
            .unwrap();
        assert_eq!(indices, vec![1, 0]);
        assert_eq!(total, u128::MAX);
        assert_eq!(
            selector.select_merge_indices(&[u128::MAX, u128::MAX]).unwrap_err(),
            SelectionError::NothingToMerge { candidates: 2 }
        );

        let selection = Selection {
            inputs: vec![5u64],
            total_value: 5,
            fee: 1,
        };
        assert_eq!(selection.change(u128::MAX), 0);
    }

    #[test]
    fn test_merge_failures() {
        let selector = InputSelector::new(FeeSchedule::new(10, 1, 1));
        assert_eq!(
            selector.select_for_merging(&[100u64]).unwrap_err(),
            SelectionError::NothingToMerge { candidates: 1 }
        );
        // fee = 10 + 2 + 2 = 14 swallows 7 + 7
        assert_eq!(
            selector.select_for_merging(&[7u64, 7]).unwrap_err(),
            SelectionError::InsufficientFunds {
                available: 14,
                required: 15
            }
        );
    }
}
