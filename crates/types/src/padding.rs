//! MSB-drop padding of color quantities inside native output values.
//!
//! The low bit of a padded value tells whether padding is present. When it
//! is set, the highest set bit is a padding marker: dropping it and the
//! indicator bit recovers the quantity.

/// Highest bit position a padding marker may occupy.
const MAX_MARKER_BIT: u32 = 63;

/// Recover the color quantity carried by a native output value.
pub fn unpad(value: u64) -> u64 {
    if value & 1 == 0 {
        return value >> 1;
    }

    let marker = 63 - value.leading_zeros();

    (value & !(1u64 << marker)) >> 1
}

/// Encode `quantity` so that the result is at least `minimum`.
///
/// The quantity is shifted left to free the indicator bit. If that is not
/// enough, the lowest marker bit above all quantity bits that lifts the
/// value to `minimum` is set along with the indicator bit.
///
/// Exact inverse of [`unpad`] for `quantity < 2^62` and `minimum < 2^63`.
pub fn pad(quantity: u64, minimum: u64) -> u64 {
    let shifted = quantity << 1;

    if shifted >= minimum {
        return shifted;
    }

    // The marker must be above every quantity bit to be found by `unpad`.
    let lowest_marker = (64 - shifted.leading_zeros()).max(1);

    for bit in lowest_marker..=MAX_MARKER_BIT {
        let padded = shifted | (1u64 << bit) | 1;

        if padded >= minimum {
            return padded;
        }
    }

    shifted | (1u64 << MAX_MARKER_BIT) | 1
}
