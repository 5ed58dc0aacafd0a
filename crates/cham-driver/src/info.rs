//! Query and answer types of the board's info and status surface

use crate::platform::{AddrSpace, BusType};

/// Board-level question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardQuery {
    /// Bus the board sits on
    BusType,
    /// Bus the devices in `slot` sit on
    DeviceBusType {
        /// Slot number
        slot: usize,
    },
    /// Whether optional function `code` is supported
    Function {
        /// Function code
        code: u32,
    },
    /// Number of slots
    NumSlots,
    /// Interrupt capability of `slot`
    Interrupts {
        /// Slot number
        slot: usize,
    },
    /// Default address space of `slot`
    AddrSpace {
        /// Slot number
        slot: usize,
    },
    /// Board name
    BoardName,
}

/// Interrupt capability class of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqCapability {
    /// Each device has its own interrupt
    DeviceIrq,
}

/// Answer to a [`BoardQuery`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardInfo {
    /// Bus type
    BusType(BusType),
    /// Whether the function is supported
    FunctionSupported(bool),
    /// Slot count
    NumSlots(u32),
    /// Interrupt capability
    Interrupts(IrqCapability),
    /// Address space
    AddrSpace(AddrSpace),
    /// Board name
    BoardName(&'static str),
}

/// Per-slot question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigQuery {
    /// PCI bus of the FPGA
    BusNumber {
        /// Slot number
        slot: usize,
    },
    /// PCI domain of the FPGA
    PciDomain {
        /// Slot number
        slot: usize,
    },
    /// Interrupt of the slot
    Irq {
        /// Slot number
        slot: usize,
    },
    /// Exception interrupt of the slot
    ExceptionIrq {
        /// Slot number
        slot: usize,
    },
    /// Identification of the slot
    SlotInfo {
        /// Slot number
        slot: usize,
    },
    /// Address space of the slot's unit
    AddrSpace {
        /// Slot number
        slot: usize,
    },
}

/// How an interrupt is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqMode {
    /// No interrupt
    None,
    /// Shared line
    Shared,
    /// Exclusive line
    Exclusive,
}

/// Interrupt answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqInfo {
    /// CPU vector
    pub vector: u32,
    /// Interrupt level
    pub level: u32,
    /// Delivery mode
    pub mode: IrqMode,
}

impl IrqInfo {
    /// "No interrupt" answer
    pub const NONE: Self = Self {
        vector: 0,
        level: 0,
        mode: IrqMode::None,
    };
}

/// Whether a slot can hold a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    /// Always populated
    Always,
}

/// Identification of one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    /// Occupancy class
    pub occupied: Occupancy,
    /// Device id of the (base) unit
    pub dev_id: u16,
    /// Revision of the (base) unit
    pub revision: u16,
    /// `cham-slot N (is instance I[, group G])`
    pub slot_name: String,
    /// IP-core name, prefixed `IO_` for I/O-space units
    pub dev_name: String,
}

/// Answer to a [`ConfigQuery`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigInfo {
    /// Bus number
    BusNumber(u8),
    /// PCI domain
    PciDomain(u16),
    /// Interrupt
    Irq(IrqInfo),
    /// Slot identification
    SlotInfo(SlotInfo),
    /// Address space
    AddrSpace(AddrSpace),
}

/// Status code for [`crate::Board::set_stat`] / [`crate::Board::get_stat`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatCode {
    /// Board debug level
    DebugLevel,
    /// Identification strings of driver, descriptor layer and platform
    RevisionIds,
}

/// Answer to [`crate::Board::get_stat`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatValue {
    /// Debug level
    DebugLevel(u32),
    /// Identification strings
    RevisionIds(Vec<&'static str>),
}
