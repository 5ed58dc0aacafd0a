//! PCI config-space constants used to locate the FPGA.
//!
//! Source: PCI Local Bus Spec 3.0, type 0/1 header layout.

/// Vendor id register (16 bit).
pub const VENDOR_ID: u16 = 0x00;
/// Device id register (16 bit).
pub const DEVICE_ID: u16 = 0x02;
/// Header type register (8 bit).
pub const HEADER_TYPE: u16 = 0x0E;
/// Secondary bus number of a PCI-to-PCI bridge (8 bit, type 1 header).
pub const SECONDARY_BUS: u16 = 0x19;
/// Interrupt line register (8 bit).
pub const INTERRUPT_LINE: u16 = 0x3C;
/// [`INTERRUPT_LINE`] value of a function with no interrupt routed.
pub const NO_INTERRUPT_LINE: u32 = 0xFF;

/// Value read from vendor/device id when no function responds.
pub const ABSENT: u32 = 0xFFFF;

/// Multi-function flag in [`HEADER_TYPE`].
pub const HEADER_TYPE_MULTIFUNCTION: u32 = 0x80;
/// Header layout of a PCI-to-PCI bridge.
pub const HEADER_TYPE_BRIDGE: u32 = 0x01;

/// Highest bus number probed when searching a non-zero domain.
pub const MAX_BUS: u8 = 0xFE;

/// Whether a raw header-type value describes a PCI-to-PCI bridge.
#[must_use]
pub const fn is_bridge(header_type: u32) -> bool {
    header_type & !HEADER_TYPE_MULTIFUNCTION == HEADER_TYPE_BRIDGE
}

/// One byte of a `PCI_BUS_PATH`: device in bits 0..4, function in 5..7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathHop {
    /// Device number (0..31).
    pub device: u8,
    /// Function number (0..7).
    pub function: u8,
}

impl PathHop {
    /// Decode a path byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self {
            device: b & 0x1F,
            function: b >> 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_detection_ignores_multifunction_bit() {
        assert!(is_bridge(0x01));
        assert!(is_bridge(0x81));
        assert!(!is_bridge(0x00));
        assert!(!is_bridge(0x80));
        assert!(!is_bridge(0x02));
    }

    #[test]
    fn path_byte_splits_device_and_function() {
        assert_eq!(PathHop::from_byte(0x1D), PathHop { device: 0x1D, function: 0 });
        assert_eq!(PathHop::from_byte(0x5E), PathHop { device: 0x1E, function: 2 });
    }
}
