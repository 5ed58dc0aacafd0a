//! Chameleon table service interface
//!
//! The FPGA publishes a table of its units (the "chameleon table"). Parsing
//! that table is not this crate's job: a [`TableProvider`] opens it and
//! hands back a [`ChamTable`] which yields [`ModuleRecord`]s by index or
//! by query. The handle is dropped as soon as board init is done.

use crate::error::Result;
use crate::platform::{AddrSpace, PciAddress};
use cham_chip::devid::dev_id_to_name;
use cham_chip::limits::{DEFAULT_UNIT_SIZE, NO_INTERRUPT};
use std::fmt::Debug;

/// One unit of the chameleon table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Device id (decimal core number)
    pub dev_id: u16,
    /// Instance among units with the same device id
    pub instance: u16,
    /// Core revision
    pub revision: u16,
    /// Core variant
    pub variant: u16,
    /// Group id, 0 = ungrouped
    pub group: u16,
    /// Bus id inside the FPGA
    pub bus_id: u16,
    /// BAR the unit lives in
    pub bar: u8,
    /// Offset inside the BAR
    pub offset: u32,
    /// Window size, 0 = unknown
    pub size: u32,
    /// Absolute address (BAR base + offset)
    pub addr: u64,
    /// GIRQ interrupt line, [`NO_INTERRUPT`] = none
    pub interrupt: u8,
}

impl ModuleRecord {
    /// Record with the given identity and everything else zero / absent
    #[must_use]
    pub const fn new(dev_id: u16, instance: u16) -> Self {
        Self {
            dev_id,
            instance,
            revision: 0,
            variant: 0,
            group: 0,
            bus_id: 0,
            bar: 0,
            offset: 0,
            size: 0,
            addr: 0,
            interrupt: NO_INTERRUPT,
        }
    }

    /// Set the group id
    #[must_use]
    pub const fn with_group(mut self, group: u16) -> Self {
        self.group = group;
        self
    }

    /// Set BAR and offset
    #[must_use]
    pub const fn with_bar(mut self, bar: u8, offset: u32) -> Self {
        self.bar = bar;
        self.offset = offset;
        self
    }

    /// Set the window size
    #[must_use]
    pub const fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Set the GIRQ interrupt line
    #[must_use]
    pub const fn with_interrupt(mut self, line: u8) -> Self {
        self.interrupt = line;
        self
    }

    /// Set the absolute address
    #[must_use]
    pub const fn with_addr(mut self, addr: u64) -> Self {
        self.addr = addr;
        self
    }

    /// Window size with the table's "unknown" (0) replaced by the default
    #[must_use]
    pub const fn effective_size(&self) -> u32 {
        if self.size == 0 {
            DEFAULT_UNIT_SIZE
        } else {
            self.size
        }
    }

    /// GIRQ line, or `None` if the unit cannot interrupt
    ///
    /// The table field is 6 bits wide; its all-ones value (and anything
    /// that does not fit the field) means "no interrupt".
    #[must_use]
    pub const fn interrupt_line(&self) -> Option<u8> {
        if self.interrupt >= NO_INTERRUPT {
            None
        } else {
            Some(self.interrupt)
        }
    }

    /// Whether the unit belongs to a group
    #[must_use]
    pub const fn is_grouped(&self) -> bool {
        self.group != 0
    }

    /// IP-core name, if the device id is known
    #[must_use]
    pub fn name(&self) -> Option<&'static str> {
        dev_id_to_name(self.dev_id)
    }
}

/// Filter for [`ChamTable::instance_find`]; `None` fields match anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitQuery {
    /// Device id
    pub dev_id: Option<u16>,
    /// Group id
    pub group: Option<u16>,
    /// Instance number
    pub instance: Option<u16>,
    /// Variant
    pub variant: Option<u16>,
    /// Bus id
    pub bus_id: Option<u16>,
}

impl UnitQuery {
    /// Query for one device id, everything else wildcard
    #[must_use]
    pub const fn device(dev_id: u16) -> Self {
        Self {
            dev_id: Some(dev_id),
            group: None,
            instance: None,
            variant: None,
            bus_id: None,
        }
    }

    /// Restrict the group
    #[must_use]
    pub const fn with_group(mut self, group: u16) -> Self {
        self.group = Some(group);
        self
    }

    /// Restrict the instance
    #[must_use]
    pub const fn with_instance(mut self, instance: u16) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Whether `unit` satisfies every set field
    #[must_use]
    pub fn matches(&self, unit: &ModuleRecord) -> bool {
        fn field(want: Option<u16>, have: u16) -> bool {
            want.map_or(true, |w| w == have)
        }
        field(self.dev_id, unit.dev_id)
            && field(self.group, unit.group)
            && field(self.instance, unit.instance)
            && field(self.variant, unit.variant)
            && field(self.bus_id, unit.bus_id)
    }
}

/// Table header identification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIdent {
    /// FPGA file name
    pub file: String,
    /// Model letter
    pub model: char,
    /// Table revision
    pub revision: u16,
}

/// One BAR as reported by the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarInfo {
    /// Physical base address
    pub addr: u64,
    /// Size in bytes
    pub size: u64,
    /// Address space
    pub space: AddrSpace,
}

/// Core info of the FPGA
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableInfo {
    /// BARs in index order
    pub bars: Vec<BarInfo>,
}

impl TableInfo {
    /// Address space of BAR `bar`, memory if the table does not list it
    #[must_use]
    pub fn bar_space(&self, bar: u8) -> AddrSpace {
        self.bars
            .get(usize::from(bar))
            .map_or(AddrSpace::Mem, |b| b.space)
    }
}

/// An open chameleon table
pub trait ChamTable: Debug {
    /// Header identification
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be read.
    fn ident(&self) -> Result<TableIdent>;

    /// Unit at table position `index`, `None` past the end
    fn unit_ident(&self, index: usize) -> Option<ModuleRecord>;

    /// `index`-th unit (0-based) matching `query`
    fn instance_find(&self, index: usize, query: &UnitQuery) -> Option<ModuleRecord> {
        (0..)
            .map_while(|i| self.unit_ident(i))
            .filter(|u| query.matches(u))
            .nth(index)
    }

    /// BAR layout of the FPGA
    ///
    /// # Errors
    ///
    /// Returns an error if the core info cannot be obtained.
    fn info(&self) -> Result<TableInfo>;
}

/// Opens chameleon tables
pub trait TableProvider: Debug + Send + Sync {
    /// Open the table of the FPGA at a PCI function
    ///
    /// # Errors
    ///
    /// Returns [`crate::ChamError::TableNotFound`] if there is no table in
    /// `space`, other errors if the table is unreadable.
    fn open_pci(&self, addr: PciAddress, space: AddrSpace) -> Result<Box<dyn ChamTable>>;

    /// Open the table at a fixed address
    ///
    /// # Errors
    ///
    /// Returns [`crate::ChamError::TableNotFound`] if there is no table at
    /// `addr`, other errors if the table is unreadable.
    fn open_at(&self, addr: u64, space: AddrSpace) -> Result<Box<dyn ChamTable>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use cham_chip::devid::dev_id;

    #[derive(Debug)]
    struct Fixed(Vec<ModuleRecord>);

    impl ChamTable for Fixed {
        fn ident(&self) -> Result<TableIdent> {
            Ok(TableIdent {
                file: "fixed".into(),
                model: 'A',
                revision: 1,
            })
        }

        fn unit_ident(&self, index: usize) -> Option<ModuleRecord> {
            self.0.get(index).copied()
        }

        fn info(&self) -> Result<TableInfo> {
            Ok(TableInfo::default())
        }
    }

    #[test]
    fn size_zero_means_default_window() {
        let r = ModuleRecord::new(dev_id::GPIO, 0);
        assert_eq!(r.effective_size(), 0x100);
        assert_eq!(r.with_size(0x40).effective_size(), 0x40);
    }

    #[test]
    fn interrupt_sentinel() {
        let r = ModuleRecord::new(dev_id::CAN, 0);
        assert_eq!(r.interrupt_line(), None);
        assert_eq!(r.with_interrupt(5).interrupt_line(), Some(5));
        assert_eq!(r.with_interrupt(0x3F).interrupt_line(), None);
    }

    #[test]
    fn instance_find_counts_matches_only() {
        let table = Fixed(vec![
            ModuleRecord::new(dev_id::CAN, 0),
            ModuleRecord::new(dev_id::GPIO, 0),
            ModuleRecord::new(dev_id::CAN, 1).with_group(2),
            ModuleRecord::new(dev_id::CAN, 2),
        ]);

        let any_can = UnitQuery::device(dev_id::CAN);
        assert_eq!(table.instance_find(1, &any_can).map(|u| u.instance), Some(1));

        let ungrouped = any_can.with_group(0);
        assert_eq!(table.instance_find(1, &ungrouped).map(|u| u.instance), Some(2));
        assert_eq!(table.instance_find(2, &ungrouped), None);

        let by_instance = ungrouped.with_instance(2);
        assert!(table.instance_find(0, &by_instance).is_some());
    }

    #[test]
    fn unlisted_bar_defaults_to_memory() {
        let info = TableInfo {
            bars: vec![BarInfo {
                addr: 0xe000,
                size: 0x100,
                space: AddrSpace::Io,
            }],
        };
        assert_eq!(info.bar_space(0), AddrSpace::Io);
        assert_eq!(info.bar_space(3), AddrSpace::Mem);
    }
}
