use std::ops::RangeInclusive;

/// Bit-manipulation helpers shared by the decoders and the translator.
/// Bit indices count from the LSB (index 0) to the MSB.
pub trait Bits:
    Copy
    + From<u8>
    + std::ops::Shl<u32, Output = Self>
    + std::ops::Shr<u32, Output = Self>
    + std::ops::BitAnd<Output = Self>
    + std::ops::BitOr<Output = Self>
    + std::ops::Not<Output = Self>
    + PartialEq
{
    const BITS: u32;

    fn get_bit(self, bit_idx: u32) -> bool {
        debug_assert!(bit_idx < Self::BITS);
        (self >> bit_idx) & Self::from(1) != Self::from(0)
    }

    fn is_bit_on(self, bit_idx: u32) -> bool {
        self.get_bit(bit_idx)
    }

    fn set_bit(&mut self, bit_idx: u32, value: bool) {
        debug_assert!(bit_idx < Self::BITS);
        let mask = Self::from(1) << bit_idx;
        *self = if value { *self | mask } else { *self & !mask };
    }

    /// Extracts an inclusive bit range, shifted down to position 0.
    fn get_bits(self, range: RangeInclusive<u32>) -> Self {
        let start = *range.start();
        let end = *range.end();
        debug_assert!(start <= end && end < Self::BITS);

        let kept = end - start + 1;
        // Shift out everything above the range first so a full-width
        // range never overflows the shift amount.
        (self << (Self::BITS - 1 - end)) >> (Self::BITS - kept)
    }
}

impl Bits for u32 {
    const BITS: u32 = 32;
}

impl Bits for u16 {
    const BITS: u32 = 16;
}

impl Bits for u64 {
    const BITS: u32 = 64;
}

impl Bits for u8 {
    const BITS: u32 = 8;
}

/// Sign-extends the low `bits` bits of `value` to a full `i32`.
#[must_use]
pub const fn sign_extend(value: u32, bits: u32) -> i32 {
    debug_assert!(bits >= 1 && bits <= 32);
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}
