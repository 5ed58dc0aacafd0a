//! Board handler for MEN chameleon FPGA boards.
//!
//! A chameleon FPGA carries many IP cores ("units") and describes them in
//! an in-FPGA table. This crate locates the FPGA, decides which unit goes
//! into which of the board's 256 slots, answers address and interrupt
//! questions about each slot, and coordinates access to the shared GIRQ
//! interrupt-enable register.
//!
//! # Flow
//!
//! ```text
//! Descriptor ─► BoardConfig::load ─► [PCI_BUS_PATH] pci_path::resolve_bus
//!                     │
//!                     ▼
//!            Board::init ─► TableProvider::open_* ─► enumerate::{automatic,manual}
//!                     │                                   │
//!                     ▼                                   ▼
//!               Girq::map                             SlotTable
//!                     │                                   │
//!                     └──────► queries / irq_enable ◄─────┘
//! ```
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use cham_driver::prelude::*;
//! use cham_driver::sim::{girq_registers, walkthrough_table, SimPlatform, SimTableProvider,
//!                        WALKTHROUGH_GIRQ_ADDR};
//!
//! # fn main() -> cham_driver::Result<()> {
//! let fpga = PciAddress::new(0, 2, 0, 0);
//! let mut platform = SimPlatform::new();
//! platform.add_registers(WALKTHROUGH_GIRQ_ADDR, girq_registers(0));
//! let mut tables = SimTableProvider::new();
//! tables.add_pci(fpga, AddrSpace::Mem, walkthrough_table());
//!
//! let desc: Descriptor = "
//!     PCI_BUS_NUMBER    = U_INT32 2
//!     PCI_DEVICE_NUMBER = U_INT32 0
//!     AUTOENUM          = U_INT32 1
//! ".parse()?;
//!
//! let mut board = Board::configure(&desc, Arc::new(platform), Arc::new(tables))?;
//! board.init()?;
//! let (addr, size) = board.module_address(2, 0)?;
//! assert_eq!((addr, size), (0xF000_0200, 0x100));
//! board.irq_enable(2, true)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`descriptor`] | Typed key/value descriptor and its text format |
//! | [`config`] | Descriptor loader: location, mode, slot declarations |
//! | [`pci_path`] | Bridge-chain resolution |
//! | [`table`] | Chameleon table interface |
//! | [`enumerate`] | Automatic and manual slot assignment |
//! | [`registry`] | Slots and groups |
//! | [`girq`] | GIRQ interrupt-enable coordination |
//! | [`board`] | Board handle: lifecycle, queries, interrupt control |
//! | [`platform`] | Host services, Linux implementation |
//! | [`sim`] | Simulated platform and tables |

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod board;
pub mod config;
pub mod descriptor;
pub mod enumerate;
mod error;
pub mod girq;
pub mod info;
pub mod pci_path;
pub mod platform;
pub mod registry;
pub mod sim;
pub mod table;

pub use board::Board;
pub use config::{
    BoardConfig, BoardLocation, DirectLocation, EnumerationMode, IrqOverride, IrqSource,
};
pub use descriptor::{DescValue, Descriptor};
pub use enumerate::{EnumerationReport, ExclusionSet, ManualLayout, SlotRequest};
pub use error::{ChamError, Result};
pub use girq::Girq;
pub use info::{
    BoardInfo, BoardQuery, ConfigInfo, ConfigQuery, IrqInfo, IrqMode, SlotInfo, StatCode,
    StatValue,
};
pub use platform::{AddrSpace, BusType, LinuxPlatform, PciAddress, Platform, RegisterBlock};
pub use registry::{Group, SlotState, SlotTable};
pub use table::{ChamTable, ModuleRecord, TableProvider, UnitQuery};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        AddrSpace, Board, BoardConfig, BoardInfo, BoardQuery, ChamError, ChamTable, ConfigInfo,
        ConfigQuery, Descriptor, Group, IrqMode, ModuleRecord, PciAddress, Platform, Result,
        SlotState, StatCode, TableProvider,
    };
}
