//! Simulated platform and chameleon table
//!
//! Runs the whole board handler without hardware:
//!
//! - [`SimPlatform`]: PCI config space, mechanical slots and register
//!   blocks handed out by physical address
//! - [`SimRegisters`]: 32-bit register file with write counting and
//!   injectable lost writes
//! - [`SimTable`] / [`SimTableProvider`]: in-memory chameleon tables
//!
//! [`walkthrough_table`] builds the 15-unit FPGA used throughout the docs
//! and tests.

use crate::error::{ChamError, Result};
use crate::platform::{AccessWidth, AddrSpace, BusType, PciAddress, Platform, RegisterBlock};
use crate::table::{BarInfo, ChamTable, ModuleRecord, TableIdent, TableInfo, TableProvider};
use cham_chip::devid::dev_id;
use cham_chip::girq;
use cham_chip::pci;
use spin::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Size of a simulated config space
pub const CONFIG_SPACE_SIZE: usize = 256;

const SIM_VENDOR: u16 = 0x1172;
const SIM_BRIDGE_DEVICE: u16 = 0x0b00;

/// Simulated register file
#[derive(Debug)]
pub struct SimRegisters {
    words: Vec<AtomicU32>,
    writes: AtomicUsize,
    lost_writes: Mutex<Vec<(usize, u32)>>,
}

impl SimRegisters {
    /// `size` bytes of zeroed registers
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            words: (0..size.div_ceil(4)).map(|_| AtomicU32::new(0)).collect(),
            writes: AtomicUsize::new(0),
            lost_writes: Mutex::new(Vec::new()),
        }
    }

    fn word(&self, offset: usize) -> &AtomicU32 {
        assert!(offset % 4 == 0, "unaligned register offset {offset:#x}");
        &self.words[offset / 4]
    }

    /// Register value (host order), bypassing write accounting
    #[must_use]
    pub fn get(&self, offset: usize) -> u32 {
        self.word(offset).load(Ordering::SeqCst)
    }

    /// Set a register (host order) as the hardware would
    pub fn set(&self, offset: usize, value: u32) {
        self.word(offset).store(value, Ordering::SeqCst);
    }

    /// Drop the next `count` writes to `offset`
    ///
    /// Models an uncoordinated agent restoring the register right after
    /// each write.
    pub fn lose_writes(&self, offset: usize, count: u32) {
        self.lost_writes.lock().push((offset, count));
    }

    /// Writes seen through [`RegisterBlock::write32`]
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn swallow(&self, offset: usize) -> bool {
        let mut lost = self.lost_writes.lock();
        if let Some(entry) = lost.iter_mut().find(|(o, n)| *o == offset && *n > 0) {
            entry.1 -= 1;
            return true;
        }
        false
    }
}

impl RegisterBlock for SimRegisters {
    fn read32(&self, offset: usize) -> u32 {
        self.get(offset).to_le()
    }

    fn write32(&self, offset: usize, value: u32) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.swallow(offset) {
            tracing::trace!("sim: write {value:#x} @ {offset:#x} lost");
            return;
        }
        self.set(offset, u32::from_le(value));
    }
}

/// Register block handed out by [`SimPlatform::map_registers`]
#[derive(Debug)]
struct SimMapping {
    regs: Arc<SimRegisters>,
    live: Arc<AtomicUsize>,
}

impl RegisterBlock for SimMapping {
    fn read32(&self, offset: usize) -> u32 {
        self.regs.read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.regs.write32(offset, value);
    }
}

impl Drop for SimMapping {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Simulated host platform
#[derive(Debug, Default)]
pub struct SimPlatform {
    functions: HashMap<PciAddress, Vec<u8>>,
    failing: Vec<PciAddress>,
    slots: HashMap<(u8, u32), u8>,
    blocks: HashMap<u64, Arc<SimRegisters>>,
    config_reads: Mutex<Vec<(PciAddress, u16)>>,
    delay_us: AtomicU64,
    live_mappings: Arc<AtomicUsize>,
}

impl SimPlatform {
    /// Empty platform: no functions, no slots, no register blocks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function with the given ids and header type
    pub fn add_function(
        &mut self,
        addr: PciAddress,
        vendor: u16,
        device_id: u16,
        header_type: u8,
    ) -> &mut Self {
        let mut cfg = vec![0u8; CONFIG_SPACE_SIZE];
        cfg[usize::from(pci::VENDOR_ID)..][..2].copy_from_slice(&vendor.to_le_bytes());
        cfg[usize::from(pci::DEVICE_ID)..][..2].copy_from_slice(&device_id.to_le_bytes());
        cfg[usize::from(pci::HEADER_TYPE)] = header_type;
        self.functions.insert(addr, cfg);
        self
    }

    /// Add a PCI-to-PCI bridge forwarding to `secondary`
    pub fn add_bridge(&mut self, addr: PciAddress, secondary: u8) -> &mut Self {
        self.add_function(addr, SIM_VENDOR, SIM_BRIDGE_DEVICE, 0x01);
        if let Some(cfg) = self.functions.get_mut(&addr) {
            cfg[usize::from(pci::SECONDARY_BUS)] = secondary;
        }
        self
    }

    /// Set one config-space byte of `addr`, e.g. [`pci::INTERRUPT_LINE`]
    ///
    /// A function not added before gets an all-zero config space.
    pub fn set_config_byte(&mut self, addr: PciAddress, register: u16, value: u8) -> &mut Self {
        let cfg = self
            .functions
            .entry(addr)
            .or_insert_with(|| vec![0u8; CONFIG_SPACE_SIZE]);
        if let Some(byte) = cfg.get_mut(usize::from(register)) {
            *byte = value;
        }
        self
    }

    /// Make every config read of `addr` fail
    pub fn fail_config(&mut self, addr: PciAddress) -> &mut Self {
        self.failing.push(addr);
        self
    }

    /// Map mechanical slot `mech_slot` on `bus` to `device`
    pub fn add_slot(&mut self, bus: u8, mech_slot: u32, device: u8) -> &mut Self {
        self.slots.insert((bus, mech_slot), device);
        self
    }

    /// Serve `regs` for mappings of `phys`
    pub fn add_registers(&mut self, phys: u64, regs: Arc<SimRegisters>) -> &mut Self {
        self.blocks.insert(phys, regs);
        self
    }

    /// Config reads so far, in order
    #[must_use]
    pub fn config_reads(&self) -> Vec<(PciAddress, u16)> {
        self.config_reads.lock().clone()
    }

    /// Sum of all requested delays
    #[must_use]
    pub fn total_delay_us(&self) -> u64 {
        self.delay_us.load(Ordering::SeqCst)
    }

    /// Register blocks currently mapped
    #[must_use]
    pub fn live_mappings(&self) -> usize {
        self.live_mappings.load(Ordering::SeqCst)
    }
}

impl Platform for SimPlatform {
    fn pci_config_read(&self, addr: PciAddress, register: u16, width: AccessWidth) -> Result<u32> {
        self.config_reads.lock().push((addr, register));

        if self.failing.contains(&addr) {
            return Err(ChamError::platform("simulated config access failure"));
        }
        let Some(cfg) = self.functions.get(&addr) else {
            return Ok(width.all_ones());
        };

        let start = usize::from(register);
        let bytes = cfg
            .get(start..start + width.bytes())
            .ok_or_else(|| ChamError::platform(format!("register {register:#x} beyond config space")))?;
        let mut buf = [0u8; 4];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(u32::from_le_bytes(buf))
    }

    fn pci_slot_to_device(&self, bus: u8, mech_slot: u32) -> Result<u8> {
        self.slots
            .get(&(bus, mech_slot))
            .copied()
            .ok_or_else(|| ChamError::platform(format!("no mechanical slot {mech_slot} on bus {bus:#x}")))
    }

    fn map_registers(
        &self,
        phys: u64,
        size: usize,
        _space: AddrSpace,
        _bus: u16,
    ) -> Result<Box<dyn RegisterBlock>> {
        let regs = self.blocks.get(&phys).ok_or_else(|| ChamError::Mapping {
            phys,
            size,
            reason: "no simulated register block".into(),
        })?;
        self.live_mappings.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimMapping {
            regs: Arc::clone(regs),
            live: Arc::clone(&self.live_mappings),
        }))
    }

    fn delay_us(&self, us: u32) {
        self.delay_us.fetch_add(u64::from(us), Ordering::SeqCst);
    }

    fn irq_level_to_vector(&self, _bus: BusType, level: u32) -> u32 {
        level + 0x20
    }

    fn ident(&self) -> &'static str {
        "simulated platform"
    }
}

/// In-memory chameleon table
#[derive(Debug, Clone)]
pub struct SimTable {
    ident: TableIdent,
    bars: Vec<BarInfo>,
    units: Vec<ModuleRecord>,
    info_fails: bool,
}

impl SimTable {
    /// Empty table with one 64 KiB memory BAR at 0xF000_0000
    #[must_use]
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            ident: TableIdent {
                file: file.into(),
                model: 'A',
                revision: 1,
            },
            bars: vec![BarInfo {
                addr: 0xF000_0000,
                size: 0x1_0000,
                space: AddrSpace::Mem,
            }],
            units: Vec::new(),
            info_fails: false,
        }
    }

    /// Replace the BAR list
    #[must_use]
    pub fn with_bars(mut self, bars: Vec<BarInfo>) -> Self {
        self.bars = bars;
        self
    }

    /// Make [`ChamTable::info`] fail
    #[must_use]
    pub fn with_failing_info(mut self) -> Self {
        self.info_fails = true;
        self
    }

    /// Append a unit; a zero address is filled in from its BAR and offset
    pub fn push(&mut self, mut unit: ModuleRecord) -> &mut Self {
        if unit.addr == 0 {
            let base = self.bars.get(usize::from(unit.bar)).map_or(0, |b| b.addr);
            unit.addr = base + u64::from(unit.offset);
        }
        self.units.push(unit);
        self
    }

    /// Units in table order
    #[must_use]
    pub fn units(&self) -> &[ModuleRecord] {
        &self.units
    }
}

impl ChamTable for SimTable {
    fn ident(&self) -> Result<TableIdent> {
        Ok(self.ident.clone())
    }

    fn unit_ident(&self, index: usize) -> Option<ModuleRecord> {
        self.units.get(index).copied()
    }

    fn info(&self) -> Result<TableInfo> {
        if self.info_fails {
            return Err(ChamError::table("simulated info failure"));
        }
        Ok(TableInfo {
            bars: self.bars.clone(),
        })
    }
}

/// Serves [`SimTable`]s by location
#[derive(Debug, Default)]
pub struct SimTableProvider {
    pci: HashMap<(PciAddress, AddrSpace), SimTable>,
    direct: HashMap<(u64, AddrSpace), SimTable>,
    opens: AtomicUsize,
}

impl SimTableProvider {
    /// No tables anywhere
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `table` at a PCI function in `space`
    pub fn add_pci(&mut self, addr: PciAddress, space: AddrSpace, table: SimTable) -> &mut Self {
        self.pci.insert((addr, space), table);
        self
    }

    /// Publish `table` at a fixed address
    pub fn add_direct(&mut self, addr: u64, space: AddrSpace, table: SimTable) -> &mut Self {
        self.direct.insert((addr, space), table);
        self
    }

    /// Successful opens so far
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn opened(&self, table: &SimTable) -> Box<dyn ChamTable> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Box::new(table.clone())
    }
}

impl TableProvider for SimTableProvider {
    fn open_pci(&self, addr: PciAddress, space: AddrSpace) -> Result<Box<dyn ChamTable>> {
        self.pci
            .get(&(addr, space))
            .map(|t| self.opened(t))
            .ok_or_else(|| ChamError::table_not_found(format!("{addr} ({space})")))
    }

    fn open_at(&self, addr: u64, space: AddrSpace) -> Result<Box<dyn ChamTable>> {
        self.direct
            .get(&(addr, space))
            .map(|t| self.opened(t))
            .ok_or_else(|| ChamError::table_not_found(format!("{addr:#x} ({space})")))
    }
}

/// Physical address of the first GIRQ unit in [`walkthrough_table`]
pub const WALKTHROUGH_GIRQ_ADDR: u64 = 0xF000_0500;

/// The 15-unit example FPGA
///
/// ```text
/// Entry  Dev id  Group  Core      IRQ
/// ─────  ──────  ─────  ────────  ───
///   0    0x23    0      SYSTEM    -
///   1    0x19    0      UART      1
///   2    0x22    0      GPIO      2
///   3    0x1D    0      CAN       3
///   4    0x1D    0      CAN       4
///  5..8  0x34    0      GIRQ      -
///   9    0x2C    1      DISP      9
///  10    0x35    2      IDE       10
///  11    0x2B    1      SDRAM     -
///  12    0x2B    2      SDRAM     -
///  13    0x44    2      IDETGT    -
///  14    0x46    2      IDEDISK   -
/// ```
///
/// Units are 0x100 apart in BAR 0; GPIO and the IDE disk carry no size.
#[must_use]
pub fn walkthrough_table() -> SimTable {
    let layout: [(u16, u16, u16, u8, u32); 15] = [
        (dev_id::SYSTEM, 0, 0, 0x3F, 0x100),
        (dev_id::UART, 0, 0, 1, 0x100),
        (dev_id::GPIO, 0, 0, 2, 0),
        (dev_id::CAN, 0, 0, 3, 0x100),
        (dev_id::CAN, 1, 0, 4, 0x100),
        (dev_id::GIRQ, 0, 0, 0x3F, 0x100),
        (dev_id::GIRQ, 1, 0, 0x3F, 0x100),
        (dev_id::GIRQ, 2, 0, 0x3F, 0x100),
        (dev_id::GIRQ, 3, 0, 0x3F, 0x100),
        (dev_id::DISP, 0, 1, 9, 0x100),
        (dev_id::IDE, 0, 2, 10, 0x80),
        (dev_id::SDRAM, 0, 1, 0x3F, 0x100),
        (dev_id::SDRAM, 1, 2, 0x3F, 0x100),
        (dev_id::IDETGT, 0, 2, 0x3F, 0x100),
        (dev_id::IDEDISK, 0, 2, 0x3F, 0),
    ];

    let mut table = SimTable::new("SIM_WALKTHROUGH");
    for (offset, (dev, inst, group, irq, size)) in (0u32..).step_by(0x100).zip(layout) {
        table.push(
            ModuleRecord::new(dev, inst)
                .with_group(group)
                .with_bar(0, offset)
                .with_size(size)
                .with_interrupt(irq),
        );
    }
    table
}

/// GIRQ register block for [`walkthrough_table`] with the given API version
#[must_use]
pub fn girq_registers(api_version: u8) -> Arc<SimRegisters> {
    let regs = Arc::new(SimRegisters::new(girq::SPACE_SIZE));
    regs.set(girq::API_VER, u32::from(api_version) << girq::API_VER_SHIFT);
    regs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_space_reads() {
        let mut p = SimPlatform::new();
        let addr = PciAddress::new(0, 1, 2, 0);
        p.add_bridge(addr, 7);
        assert_eq!(p.pci_config_read(addr, pci::VENDOR_ID, AccessWidth::Word).unwrap(), 0x1172);
        assert_eq!(p.pci_config_read(addr, pci::SECONDARY_BUS, AccessWidth::Byte).unwrap(), 7);
        let absent = PciAddress::new(0, 1, 3, 0);
        assert_eq!(p.pci_config_read(absent, 0, AccessWidth::Dword).unwrap(), 0xFFFF_FFFF);
        assert_eq!(p.config_reads().len(), 3);
    }

    #[test]
    fn config_byte_is_settable() {
        let mut p = SimPlatform::new();
        let addr = PciAddress::new(0, 2, 0, 0);
        p.add_function(addr, SIM_VENDOR, 0x4d45, 0x00)
            .set_config_byte(addr, pci::INTERRUPT_LINE, 0x0B);
        assert_eq!(p.pci_config_read(addr, pci::INTERRUPT_LINE, AccessWidth::Byte).unwrap(), 0x0B);
        assert_eq!(p.pci_config_read(addr, pci::VENDOR_ID, AccessWidth::Word).unwrap(), 0x1172);
    }

    #[test]
    fn lost_writes_are_counted() {
        let regs = SimRegisters::new(8);
        regs.lose_writes(4, 1);
        regs.write32(4, 5);
        assert_eq!(regs.get(4), 0);
        regs.write32(4, 5);
        assert_eq!(regs.get(4), 5);
        assert_eq!(regs.write_count(), 2);
    }

    #[test]
    fn mappings_are_tracked() {
        let mut p = SimPlatform::new();
        p.add_registers(0x1000, Arc::new(SimRegisters::new(0x20)));
        let m = p.map_registers(0x1000, 0x20, AddrSpace::Mem, 0).unwrap();
        assert_eq!(p.live_mappings(), 1);
        drop(m);
        assert_eq!(p.live_mappings(), 0);
        assert!(p.map_registers(0x2000, 0x20, AddrSpace::Mem, 0).is_err());
    }

    #[test]
    fn walkthrough_addresses() {
        let t = walkthrough_table();
        assert_eq!(t.units().len(), 15);
        assert_eq!(t.units()[5].addr, WALKTHROUGH_GIRQ_ADDR);
        assert_eq!(t.units()[14].addr, 0xF000_0E00);
    }

    #[test]
    fn provider_reports_missing_tables() {
        let mut provider = SimTableProvider::new();
        let addr = PciAddress::new(0, 3, 0, 0);
        provider.add_pci(addr, AddrSpace::Io, SimTable::new("io"));
        assert!(provider.open_pci(addr, AddrSpace::Mem).unwrap_err().is_table_not_found());
        assert!(provider.open_pci(addr, AddrSpace::Io).is_ok());
        assert_eq!(provider.open_count(), 1);
    }
}
