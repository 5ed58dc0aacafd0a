//! Chameleon device identification.
//!
//! Every unit in a chameleon V2 table carries a 16-bit device id. For MEN
//! IP cores the id is the decimal core number: `16Z034_GPIO` has id 34
//! (`0x22`). Older descriptors name units by an 8-bit *module code*
//! instead, which must be translated before it can be compared with a
//! table entry.
//!
//! ```text
//! Code  Dev id  Core
//! ────  ──────  ──────────────
//! 0x07  0x19    16Z025_UART
//! 0x08  0x1D    16Z029_CAN
//! 0x0A  0x23    16Z035_SYSTEM
//! 0x20  0x34    16Z052_GIRQ
//! 0x25  0x2C    16Z044_DISP
//! ```

use crate::limits::UNKNOWN_DEV_ID;

/// Device ids of known IP cores.
pub mod dev_id {
    /// 16Z001 SMBus controller.
    pub const SMB: u16 = 1;
    /// 16Z024 SRAM.
    pub const SRAM: u16 = 24;
    /// 16Z025 UART.
    pub const UART: u16 = 25;
    /// 16Z029 CAN controller ("boromir").
    pub const CAN: u16 = 29;
    /// 16Z034 GPIO controller.
    pub const GPIO: u16 = 34;
    /// 16Z035 system unit.
    pub const SYSTEM: u16 = 35;
    /// 16Z043 SDRAM controller.
    pub const SDRAM: u16 = 43;
    /// 16Z044 display controller.
    pub const DISP: u16 = 44;
    /// 16Z045 flash interface.
    pub const FLASH: u16 = 45;
    /// 16Z052 interrupt aggregator.
    pub const GIRQ: u16 = 52;
    /// 16Z053 IDE controller.
    pub const IDE: u16 = 53;
    /// 16Z068 IDE target.
    pub const IDETGT: u16 = 68;
    /// 16Z070 IDE disk.
    pub const IDEDISK: u16 = 70;
    /// 16Z077 Ethernet MAC.
    pub const ETH: u16 = 77;
    /// 16Z125 high-speed UART.
    pub const UART_HS: u16 = 125;
}

/// Legacy chameleon module codes (`DEVICE_ID_<n>`, `AUTOENUM_EXCLUDING`).
pub mod modcode {
    /// 16Z025_UART.
    pub const UART: u8 = 0x07;
    /// 16Z029_CAN.
    pub const CAN: u8 = 0x08;
    /// 16Z035_SYSTEM.
    pub const SYSTEM: u8 = 0x0A;
    /// 16Z052_GIRQ.
    pub const GIRQ: u8 = 0x20;
    /// 16Z044_DISP.
    pub const DISP: u8 = 0x25;
}

const MODCODE_TABLE: &[(u8, u16)] = &[
    (modcode::UART, dev_id::UART),
    (modcode::CAN, dev_id::CAN),
    (modcode::SYSTEM, dev_id::SYSTEM),
    (modcode::GIRQ, dev_id::GIRQ),
    (modcode::DISP, dev_id::DISP),
];

const NAME_TABLE: &[(u16, &str)] = &[
    (dev_id::SMB, "16Z001_SMB"),
    (dev_id::SRAM, "16Z024_SRAM"),
    (dev_id::UART, "16Z025_UART"),
    (dev_id::CAN, "16Z029_CAN"),
    (dev_id::GPIO, "16Z034_GPIO"),
    (dev_id::SYSTEM, "16Z035_SYSTEM"),
    (dev_id::SDRAM, "16Z043_SDRAM"),
    (dev_id::DISP, "16Z044_DISP"),
    (dev_id::FLASH, "16Z045_FLASH"),
    (dev_id::GIRQ, "16Z052_GIRQ"),
    (dev_id::IDE, "16Z053_IDE"),
    (dev_id::IDETGT, "16Z068_IDETGT"),
    (dev_id::IDEDISK, "16Z070_IDEDISK"),
    (dev_id::ETH, "16Z077_ETH"),
    (dev_id::UART_HS, "16Z125_UART"),
];

/// Translate a legacy module code into the device-id space.
///
/// Unknown codes return `None`.
#[must_use]
pub fn modcode_to_dev_id(code: u8) -> Option<u16> {
    MODCODE_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, id)| *id)
}

/// Like [`modcode_to_dev_id`], but maps unknown codes to
/// [`UNKNOWN_DEV_ID`] so the result never matches a real unit.
#[must_use]
pub fn modcode_to_dev_id_or_unknown(code: u8) -> u16 {
    modcode_to_dev_id(code).unwrap_or(UNKNOWN_DEV_ID)
}

/// IP-core name for a device id (`"16Z029_CAN"`).
#[must_use]
pub fn dev_id_to_name(id: u16) -> Option<&'static str> {
    NAME_TABLE.iter().find(|(i, _)| *i == id).map(|(_, n)| *n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_codes_translate_to_core_numbers() {
        assert_eq!(modcode_to_dev_id(modcode::CAN), Some(0x1D));
        assert_eq!(modcode_to_dev_id(modcode::GIRQ), Some(0x34));
        assert_eq!(modcode_to_dev_id(0xEE), None);
        assert_eq!(modcode_to_dev_id_or_unknown(0xEE), UNKNOWN_DEV_ID);
    }

    #[test]
    fn every_translated_code_has_a_name() {
        for (_, id) in MODCODE_TABLE {
            assert!(dev_id_to_name(*id).is_some(), "no name for {id:#x}");
        }
        assert_eq!(dev_id_to_name(dev_id::IDEDISK), Some("16Z070_IDEDISK"));
        assert_eq!(dev_id_to_name(UNKNOWN_DEV_ID), None);
    }
}
