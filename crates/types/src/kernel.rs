//! Color transfer kernel: moves color quantities from the inputs of a
//! transaction to its outputs.

use bitcoin::Transaction;

use crate::padding::unpad;

/// Outputs with an index at or above this are never eligible for color.
pub const MAX_KERNEL_OUTPUTS: usize = 32;

/// Distribute the color of `color_ins` over the outputs of `tx`.
///
/// `color_ins[i]` is the color quantity carried by input `i`, `None` for an
/// input without color. Missing entries count as `None`. See
/// [`apply_kernel_to_values`] for the allocation rules.
pub fn apply_kernel(tx: &Transaction, color_ins: &[Option<u64>]) -> Vec<Option<u64>> {
    let sequences = tx
        .input
        .iter()
        .map(|input| input.sequence.0)
        .collect::<Vec<_>>();

    let output_values = tx
        .output
        .iter()
        .map(|output| output.value)
        .collect::<Vec<_>>();

    apply_kernel_to_values(&sequences, &output_values, color_ins)
}

/// Bucket allocation of color quantities.
///
/// Each output has a capacity equal to its unpadded native value, shared by
/// all inputs. Inputs are processed in order; input `i` fills, in output
/// index order, every output `j < 32` whose bit `j` is set in the input's
/// sequence number, up to the remaining capacity. Color an input cannot
/// place is destroyed.
///
/// Returns the quantity received by every output, `None` for outputs that
/// received nothing.
pub fn apply_kernel_to_values(
    sequences: &[u32],
    output_values: &[u64],
    color_ins: &[Option<u64>],
) -> Vec<Option<u64>> {
    let mut capacities = output_values
        .iter()
        .map(|value| unpad(*value))
        .collect::<Vec<_>>();

    let mut color_outs: Vec<Option<u64>> = vec![None; output_values.len()];

    for (input_index, sequence) in sequences.iter().enumerate() {
        let Some(Some(mut remaining)) = color_ins.get(input_index).copied() else {
            continue;
        };

        let eligible_outputs = capacities.len().min(MAX_KERNEL_OUTPUTS);

        for output_index in 0..eligible_outputs {
            if remaining == 0 {
                break;
            }

            if sequence & (1u32 << output_index) == 0 {
                continue;
            }

            let placed = remaining.min(capacities[output_index]);
            if placed == 0 {
                continue;
            }

            capacities[output_index] -= placed;
            remaining -= placed;

            let received = color_outs[output_index].get_or_insert(0);
            *received += placed;
        }
    }

    color_outs
}
