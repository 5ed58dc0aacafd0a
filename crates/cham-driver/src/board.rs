//! Chameleon board handle
//!
//! ```text
//! configure ──► init ──► queries / irq_enable ──► exit ──► drop
//!                ▲  │
//!                └──┘  (re-init rebuilds everything from the config)
//! ```

use crate::config::{BoardConfig, BoardLocation, EnumerationMode, IrqOverride, IrqSource};
use crate::descriptor::{self, Descriptor};
use crate::enumerate::{self, EnumerationReport};
use crate::error::{ChamError, Result};
use crate::girq::Girq;
use crate::info::{
    BoardInfo, BoardQuery, ConfigInfo, ConfigQuery, IrqCapability, IrqInfo, IrqMode, Occupancy,
    SlotInfo, StatCode, StatValue,
};
use crate::platform::{AccessWidth, AddrSpace, BusType, PciAddress, Platform};
use crate::registry::{SlotState, SlotTable};
use crate::table::{ChamTable, ModuleRecord, TableInfo, TableProvider, UnitQuery};
use cham_chip::devid::{dev_id, dev_id_to_name};
use cham_chip::limits::{BOARD_NAME, MAX_SLOTS};
use cham_chip::pci;
use std::sync::Arc;

/// Identification of the board handler
pub const IDENT: &str = concat!("cham-driver board handler ", env!("CARGO_PKG_VERSION"));

/// Result of one successful init, committed all at once
struct Generation {
    slots: SlotTable,
    table_info: TableInfo,
    table_space: AddrSpace,
    girq: Option<Girq>,
    report: EnumerationReport,
}

/// One chameleon FPGA board
#[derive(Debug)]
pub struct Board {
    config: BoardConfig,
    platform: Arc<dyn Platform>,
    tables: Arc<dyn TableProvider>,
    debug_level: u32,
    slots: SlotTable,
    table_info: TableInfo,
    table_space: AddrSpace,
    girq: Option<Girq>,
    report: EnumerationReport,
}

impl Board {
    /// Configure a board from its descriptor
    ///
    /// # Errors
    ///
    /// Any error of [`BoardConfig::load`].
    pub fn configure(
        desc: &Descriptor,
        platform: Arc<dyn Platform>,
        tables: Arc<dyn TableProvider>,
    ) -> Result<Self> {
        tracing::info!(
            "configuring board {}",
            desc.name().unwrap_or("<unnamed>")
        );
        let config = BoardConfig::load(desc, &*platform)?;
        Ok(Self::new(config, platform, tables))
    }

    /// Board from an already loaded configuration
    #[must_use]
    pub fn new(config: BoardConfig, platform: Arc<dyn Platform>, tables: Arc<dyn TableProvider>) -> Self {
        Self {
            debug_level: config.debug_level,
            config,
            platform,
            tables,
            slots: SlotTable::new(),
            table_info: TableInfo::default(),
            table_space: AddrSpace::Mem,
            girq: None,
            report: EnumerationReport::default(),
        }
    }

    /// Enumerate the FPGA and map its GIRQ
    ///
    /// May be called again; each call starts from the configuration, not
    /// from the previous result.
    ///
    /// # Errors
    ///
    /// - table errors if the chameleon table cannot be opened or read
    /// - [`ChamError::Mapping`] if the GIRQ block cannot be mapped
    ///
    /// On error the board is left with no slots and no GIRQ.
    pub fn init(&mut self) -> Result<()> {
        let span = tracing::info_span!("board_init", debug_level = self.debug_level);
        let _enter = span.enter();

        self.girq = None;
        self.slots.clear();
        self.table_info = TableInfo::default();
        self.report = EnumerationReport::default();

        let generation = self.build().map_err(|e| {
            tracing::error!("board init failed: {e}");
            e
        })?;

        tracing::info!(
            "board ready: {} slots assigned, {} excluded, {} unresolved",
            generation.report.assigned,
            generation.report.excluded,
            generation.report.unresolved.len()
        );

        self.slots = generation.slots;
        self.table_info = generation.table_info;
        self.table_space = generation.table_space;
        self.girq = generation.girq;
        self.report = generation.report;
        Ok(())
    }

    fn build(&self) -> Result<Generation> {
        let (table, table_space) = self.open_table()?;

        match table.ident() {
            Ok(id) => tracing::info!(
                "chameleon table {} model {} revision {} ({table_space})",
                id.file,
                id.model,
                id.revision
            ),
            Err(e) => tracing::warn!("cannot read table ident: {e}"),
        }

        let mut slots = SlotTable::new();
        let report = match &self.config.mode {
            EnumerationMode::Automatic(exclusions) => {
                enumerate::automatic(&*table, exclusions, &mut slots)
            }
            EnumerationMode::Manual(layout) => enumerate::manual(&*table, layout, &mut slots),
        };

        let table_info = table.info()?;
        let girq = self.map_girq(&*table, &table_info)?;

        Ok(Generation {
            slots,
            table_info,
            table_space,
            girq,
            report,
        })
    }

    fn open_table(&self) -> Result<(Box<dyn ChamTable>, AddrSpace)> {
        match &self.config.location {
            BoardLocation::Pci(addr) => match self.tables.open_pci(*addr, AddrSpace::Mem) {
                Ok(table) => Ok((table, AddrSpace::Mem)),
                Err(e) if e.is_table_not_found() => {
                    tracing::debug!("no memory-mapped table at {addr}, trying I/O space");
                    Ok((self.tables.open_pci(*addr, AddrSpace::Io)?, AddrSpace::Io))
                }
                Err(e) => Err(e),
            },
            BoardLocation::Direct(direct) => Ok((
                self.tables.open_at(direct.addr, direct.space)?,
                direct.space,
            )),
        }
    }

    fn map_girq(&self, table: &dyn ChamTable, info: &TableInfo) -> Result<Option<Girq>> {
        let query = UnitQuery::device(dev_id::GIRQ).with_group(0).with_instance(0);
        let Some(unit) = table.instance_find(0, &query) else {
            tracing::info!("no GIRQ unit, interrupt enable is a no-op");
            return Ok(None);
        };
        let space = info.bar_space(unit.bar);
        Girq::map(&*self.platform, &unit, space).map(Some)
    }

    /// Release the GIRQ mapping and every slot
    ///
    /// # Errors
    ///
    /// Currently infallible.
    pub fn exit(&mut self) -> Result<()> {
        tracing::info!("board exit");
        self.girq = None;
        self.slots.clear();
        self.table_info = TableInfo::default();
        Ok(())
    }

    /// Loaded configuration
    #[must_use]
    pub const fn config(&self) -> &BoardConfig {
        &self.config
    }

    /// Slot registry
    #[must_use]
    pub const fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Outcome of the last init
    #[must_use]
    pub const fn report(&self) -> &EnumerationReport {
        &self.report
    }

    /// Mapped GIRQ, if the FPGA has one
    #[must_use]
    pub const fn girq(&self) -> Option<&Girq> {
        self.girq.as_ref()
    }

    /// Address space the chameleon table was found in
    #[must_use]
    pub const fn table_space(&self) -> AddrSpace {
        self.table_space
    }

    /// Board-level information
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn board_info(&self, query: BoardQuery) -> BoardInfo {
        match query {
            BoardQuery::BusType => BoardInfo::BusType(self.config.location.bus_type()),
            BoardQuery::DeviceBusType { .. } => BoardInfo::BusType(BusType::Cham),
            BoardQuery::Function { .. } => BoardInfo::FunctionSupported(false),
            BoardQuery::NumSlots => BoardInfo::NumSlots(MAX_SLOTS as u32),
            BoardQuery::Interrupts { .. } => BoardInfo::Interrupts(IrqCapability::DeviceIrq),
            BoardQuery::AddrSpace { .. } => BoardInfo::AddrSpace(AddrSpace::Mem),
            BoardQuery::BoardName => BoardInfo::BoardName(BOARD_NAME),
        }
    }

    /// Per-slot information
    ///
    /// # Errors
    ///
    /// [`ChamError::SlotOutOfRange`] or [`ChamError::SlotEmpty`].
    pub fn config_info(&self, query: ConfigQuery) -> Result<ConfigInfo> {
        match query {
            ConfigQuery::BusNumber { slot } => {
                self.slots.primary(slot)?;
                Ok(ConfigInfo::BusNumber(self.config.location.bus_number()))
            }
            ConfigQuery::PciDomain { slot } => {
                self.slots.primary(slot)?;
                Ok(ConfigInfo::PciDomain(self.config.location.domain()))
            }
            ConfigQuery::Irq { slot } => Ok(ConfigInfo::Irq(self.irq_info(slot)?)),
            ConfigQuery::ExceptionIrq { slot } => {
                SlotTable::check(slot)?;
                Ok(ConfigInfo::Irq(IrqInfo::NONE))
            }
            ConfigQuery::SlotInfo { slot } => Ok(ConfigInfo::SlotInfo(self.slot_info(slot)?)),
            ConfigQuery::AddrSpace { slot } => {
                let unit = self.slots.primary(slot)?;
                Ok(ConfigInfo::AddrSpace(self.table_info.bar_space(unit.bar)))
            }
        }
    }

    fn irq_info(&self, slot: usize) -> Result<IrqInfo> {
        let unit = self.slots.primary(slot)?;

        // A unit carrying the table sentinel has no interrupt output, so it
        // reports no interrupt on PCI too instead of a shared line.
        let (mut level, mut mode) = match unit.interrupt_line() {
            Some(line) => (u32::from(line), IrqMode::Shared),
            None => (0, IrqMode::None),
        };

        match &self.config.location {
            BoardLocation::Direct(direct) => match direct.irq {
                IrqOverride::FromTable => {}
                IrqOverride::Disabled => return Ok(IrqInfo::NONE),
                IrqOverride::Level(l) => level = l,
            },
            BoardLocation::Pci(addr) => {
                if self.config.irq_source == IrqSource::PciConfig {
                    let line = self.read_interrupt_line(*addr)?;
                    if line == pci::NO_INTERRUPT_LINE {
                        return Ok(IrqInfo::NONE);
                    }
                    level = line;
                    mode = IrqMode::Shared;
                }
            }
        }

        if mode == IrqMode::None {
            return Ok(IrqInfo::NONE);
        }
        let vector = self
            .platform
            .irq_level_to_vector(self.config.location.bus_type(), level);
        Ok(IrqInfo {
            vector,
            level,
            mode,
        })
    }

    fn read_interrupt_line(&self, addr: PciAddress) -> Result<u32> {
        self.platform
            .pci_config_read(addr, pci::INTERRUPT_LINE, AccessWidth::Byte)
            .map_err(|e| ChamError::PciConfigAccess {
                domain: addr.domain,
                bus: addr.bus,
                device: addr.device,
                function: addr.function,
                register: pci::INTERRUPT_LINE,
                reason: e.to_string(),
            })
    }

    /// Identification of one slot
    ///
    /// # Errors
    ///
    /// [`ChamError::SlotOutOfRange`] or [`ChamError::SlotEmpty`].
    pub fn slot_info(&self, slot: usize) -> Result<SlotInfo> {
        let state = self.slots.get(slot)?;
        let unit = state.primary().ok_or(ChamError::SlotEmpty { slot })?;

        let slot_name = match state {
            SlotState::Group(group) => format!(
                "cham-slot {slot} (is instance {}, group {})",
                unit.instance,
                group.id()
            ),
            _ => format!("cham-slot {slot} (is instance {})", unit.instance),
        };

        let io = self.table_info.bar_space(unit.bar) == AddrSpace::Io;
        let dev_name = match (dev_id_to_name(unit.dev_id), io) {
            (Some(name), true) => format!("IO_{name}"),
            (Some(name), false) => name.to_owned(),
            (None, true) => "_IO".to_owned(),
            (None, false) => String::new(),
        };

        Ok(SlotInfo {
            occupied: Occupancy::Always,
            dev_id: unit.dev_id,
            revision: unit.revision,
            slot_name,
            dev_name,
        })
    }

    /// Address and window size of a slot's unit
    ///
    /// `member` selects a group member; single slots only have member 0.
    ///
    /// # Errors
    ///
    /// See [`SlotTable::base_address_and_size`].
    pub fn module_address(&self, slot: usize, member: usize) -> Result<(u64, u32)> {
        self.slots.base_address_and_size(slot, member)
    }

    /// Full table record of a slot's unit
    ///
    /// # Errors
    ///
    /// See [`SlotTable::member`].
    pub fn module_record(&self, slot: usize, member: usize) -> Result<&ModuleRecord> {
        self.slots.member(slot, member)
    }

    /// Enable or disable the interrupt of `slot` in the GIRQ
    ///
    /// Without a GIRQ this only validates the slot number.
    ///
    /// # Errors
    ///
    /// - [`ChamError::SlotOutOfRange`] / [`ChamError::SlotEmpty`]
    /// - [`ChamError::NoInterrupt`] if the unit has no interrupt line
    /// - [`ChamError::GirqBusy`] if the GIRQ stays in use
    pub fn irq_enable(&self, slot: usize, enable: bool) -> Result<()> {
        SlotTable::check(slot)?;
        let Some(girq) = &self.girq else {
            tracing::debug!("slot {slot}: no GIRQ, irq_enable({enable}) ignored");
            return Ok(());
        };

        let line = self
            .slots
            .interrupt_line(slot)?
            .ok_or(ChamError::NoInterrupt { slot })?;

        tracing::debug!("slot {slot}: GIRQ line {line} enable={enable}");
        girq.set_line(&*self.platform, line, enable)
    }

    /// Set a status value
    ///
    /// # Errors
    ///
    /// [`ChamError::UnknownCode`] for read-only codes.
    pub fn set_stat(&mut self, code: StatCode, value: u32) -> Result<()> {
        match code {
            StatCode::DebugLevel => {
                tracing::debug!("debug level {} -> {value}", self.debug_level);
                self.debug_level = value;
                Ok(())
            }
            StatCode::RevisionIds => Err(ChamError::unknown_code(format!("set {code:?}"))),
        }
    }

    /// Read a status value
    ///
    /// # Errors
    ///
    /// Currently infallible for every defined code.
    pub fn get_stat(&self, code: StatCode) -> Result<StatValue> {
        Ok(match code {
            StatCode::DebugLevel => StatValue::DebugLevel(self.debug_level),
            StatCode::RevisionIds => StatValue::RevisionIds(self.ident_table()),
        })
    }

    /// Identification strings of board handler, descriptor layer and platform
    #[must_use]
    pub fn ident_table(&self) -> Vec<&'static str> {
        vec![IDENT, descriptor::IDENT, self.platform.ident()]
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        tracing::debug!("board dropped ({} slots occupied)", self.slots.occupied_count());
    }
}
