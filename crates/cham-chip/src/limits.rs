//! Capacities and sentinels of the board handler.

/// Number of caller-visible slots on one board.
pub const MAX_SLOTS: usize = 256;

/// Number of `GROUP_<g>` blocks a descriptor may declare, and the size of
/// the excluded-groups list kept during automatic enumeration.
pub const MAX_GROUPS: usize = 15;

/// Upper bound on the members held by one group.
pub const MAX_GROUP_MEMBERS: usize = 256;

/// Maximum number of entries in `AUTOENUM_EXCLUDING[V2]`.
pub const MAX_EXCLUSIONS: usize = 0xFF;

/// Maximum number of bridge hops in `PCI_BUS_PATH`.
pub const MAX_PCI_PATH: usize = 16;

/// Size reported for a unit whose table entry carries no size.
///
/// Chameleon V0/V1 tables do not record unit sizes.
pub const DEFAULT_UNIT_SIZE: u32 = 0x100;

/// Interrupt field value of a unit without interrupt capability
/// (all ones in the 6-bit table field).
pub const NO_INTERRUPT: u8 = 0x3F;

/// Device id that never names a real IP core.
pub const UNKNOWN_DEV_ID: u16 = 0xFFFF;

/// Board name reported to the framework.
pub const BOARD_NAME: &str = "Chameleon FPGA";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_sentinel_fills_six_bits() {
        assert_eq!(NO_INTERRUPT, (1 << 6) - 1);
    }

    #[test]
    fn group_capacity_fits_slot_table() {
        assert!(MAX_GROUPS < MAX_SLOTS);
        assert!(MAX_EXCLUSIONS < MAX_SLOTS);
    }
}
