//! GIRQ (16Z052) interrupt aggregator register map.
//!
//! The GIRQ unit collects the interrupt lines of all chameleon units into
//! one 64-bit request register and one 64-bit enable register. The enable
//! register is shared: this board handler, interrupt handlers of the unit
//! drivers, and drivers outside this process may all modify it.
//!
//! ```text
//! Offset  Width  Register
//! ──────  ─────  ──────────────────────────────────────────────
//! 0x00    64     IRQ_REQ   pending requests, bit n = table line n
//! 0x08    64     IRQ_EN    enable mask,      bit n = table line n
//! 0x10    32     API_VER   bits 31..24 = API version (0 = no IN_USE)
//! 0x14    32     IN_USE    bit 0 = register block busy
//! ```

/// Size of the mapped register window.
pub const SPACE_SIZE: usize = 0x20;

/// Interrupt request register (lower word; upper word at +4).
pub const IRQ_REQ: usize = 0x00;

/// Interrupt enable register (lower word; upper word at +4).
pub const IRQ_EN: usize = 0x08;

/// Offset of the upper 32 enable bits relative to [`IRQ_EN`].
pub const UPPER_WORD: usize = 4;

/// Register holding the API version in its topmost byte.
pub const API_VER: usize = 0x10;

/// Bit position of the API version inside [`API_VER`].
pub const API_VER_SHIFT: u32 = 24;

/// Hardware in-use register.
pub const IN_USE: usize = 0x14;

/// Busy bit in [`IN_USE`]. Reads as 1 while another agent holds the
/// block; writing 1 releases it.
pub const IN_USE_BIT: u32 = 0x1;

/// Number of interrupt lines covered by one enable word.
pub const LINES_PER_WORD: u8 = 32;

/// Location of one interrupt line inside the 64-bit enable register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnableBit {
    /// Register offset of the word holding the bit.
    pub offset: usize,
    /// Bit position inside that word.
    pub bit: u8,
}

impl EnableBit {
    /// Locate table interrupt line `line` (0..63) in the enable register.
    #[must_use]
    pub const fn for_line(line: u8) -> Self {
        if line >= LINES_PER_WORD {
            Self {
                offset: IRQ_EN + UPPER_WORD,
                bit: line - LINES_PER_WORD,
            }
        } else {
            Self {
                offset: IRQ_EN,
                bit: line,
            }
        }
    }

    /// Mask of this bit inside its word.
    #[must_use]
    pub const fn mask(&self) -> u32 {
        1 << self.bit
    }
}

/// Extract the API version from a raw [`API_VER`] value.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn api_version(raw: u32) -> u8 {
    (raw >> API_VER_SHIFT) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_lines_use_lower_word() {
        let b = EnableBit::for_line(5);
        assert_eq!(b.offset, IRQ_EN);
        assert_eq!(b.mask(), 1 << 5);
    }

    #[test]
    fn upper_lines_wrap_into_second_word() {
        let b = EnableBit::for_line(32);
        assert_eq!(b, EnableBit { offset: 0x0C, bit: 0 });
        assert_eq!(EnableBit::for_line(63).bit, 31);
    }

    #[test]
    fn api_version_is_top_byte() {
        assert_eq!(api_version(0x0200_1234), 2);
        assert_eq!(api_version(0x00FF_FFFF), 0);
    }

    #[test]
    fn registers_fit_window() {
        assert!(IN_USE + 4 <= SPACE_SIZE);
        assert!(IRQ_EN + UPPER_WORD + 4 <= SPACE_SIZE);
    }
}
