//! Host platform abstraction
//!
//! Everything the board handler needs from the operating system goes
//! through [`Platform`]: PCI config-space reads, mechanical-slot lookup,
//! mapping of register windows, microsecond delays and IRQ vector
//! translation.
//!
//! Two implementations ship with the crate:
//! - [`LinuxPlatform`]: sysfs config space, `/dev/mem` and `/dev/port` windows
//! - [`crate::sim::SimPlatform`]: programmable model for tests and demos

pub mod linux;

pub use linux::LinuxPlatform;

use crate::error::Result;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// PCI function address (domain, bus, device, function)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PciAddress {
    /// PCI domain (segment)
    pub domain: u16,
    /// Bus number
    pub bus: u8,
    /// Device number (0..31)
    pub device: u8,
    /// Function number (0..7)
    pub function: u8,
}

impl PciAddress {
    /// Create a new address
    #[must_use]
    pub const fn new(domain: u16, bus: u8, device: u8, function: u8) -> Self {
        Self {
            domain,
            bus,
            device,
            function,
        }
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

/// Width of a config-space access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    /// 8 bit
    Byte,
    /// 16 bit
    Word,
    /// 32 bit
    Dword,
}

impl AccessWidth {
    /// Access size in bytes
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Dword => 4,
        }
    }

    /// Value returned by a read that no function answers
    #[must_use]
    pub const fn all_ones(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Word => 0xFFFF,
            Self::Dword => 0xFFFF_FFFF,
        }
    }
}

/// Address space of a register window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddrSpace {
    /// Memory mapped
    #[default]
    Mem,
    /// I/O port mapped
    Io,
}

impl AddrSpace {
    /// Decode the descriptor / table convention (0 = mem, otherwise io)
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        if raw == 0 {
            Self::Mem
        } else {
            Self::Io
        }
    }
}

impl fmt::Display for AddrSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mem => write!(f, "MEM"),
            Self::Io => write!(f, "IO"),
        }
    }
}

/// Bus a board or device sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    /// PCI / PCIe
    Pci,
    /// ISA / LPC or any directly addressed bus
    Isa,
    /// Chameleon FPGA internal bus
    Cham,
    /// No bus
    None,
}

/// A mapped register window
///
/// Access goes through `&self`: device registers change under the
/// program's feet and are shared with interrupt handlers.
pub trait RegisterBlock: Debug + Send + Sync {
    /// Read the raw (little-endian) 32-bit register at `offset`
    fn read32(&self, offset: usize) -> u32;

    /// Write the raw (little-endian) 32-bit register at `offset`
    fn write32(&self, offset: usize, value: u32);
}

impl<T: RegisterBlock + ?Sized> RegisterBlock for Arc<T> {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value);
    }
}

/// Operating-system services used by the board handler
pub trait Platform: Debug + Send + Sync {
    /// Read a config-space register
    ///
    /// A function that does not exist reads as all ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the access itself fails.
    fn pci_config_read(&self, addr: PciAddress, register: u16, width: AccessWidth) -> Result<u32>;

    /// Convert a mechanical slot number on `bus` into a PCI device number
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is unknown.
    fn pci_slot_to_device(&self, bus: u8, mech_slot: u32) -> Result<u8>;

    /// Map `size` bytes of physical address space
    ///
    /// Dropping the returned block unmaps it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ChamError::Mapping`] if the window cannot be mapped.
    fn map_registers(
        &self,
        phys: u64,
        size: usize,
        space: AddrSpace,
        bus: u16,
    ) -> Result<Box<dyn RegisterBlock>>;

    /// Busy-wait for `us` microseconds
    fn delay_us(&self, us: u32);

    /// Translate an interrupt level into a CPU vector
    fn irq_level_to_vector(&self, bus: BusType, level: u32) -> u32;

    /// Identification string of the platform layer
    fn ident(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pci_address_formats_like_sysfs() {
        assert_eq!(PciAddress::new(0, 0x1d, 3, 1).to_string(), "0000:1d:03.1");
        assert_eq!(PciAddress::new(0x10, 2, 0, 0).to_string(), "0010:02:00.0");
    }

    #[test]
    fn absent_reads_match_width() {
        assert_eq!(AccessWidth::Byte.all_ones(), 0xFF);
        assert_eq!(AccessWidth::Word.all_ones(), 0xFFFF);
        assert_eq!(AccessWidth::Dword.bytes(), 4);
    }

    #[test]
    fn raw_addr_space() {
        assert_eq!(AddrSpace::from_raw(0), AddrSpace::Mem);
        assert_eq!(AddrSpace::from_raw(1), AddrSpace::Io);
    }
}
