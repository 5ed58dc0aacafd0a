//! Board configuration loaded from a descriptor
//!
//! # Keys
//!
//! | Key | Type | Meaning |
//! |-----|------|---------|
//! | `DEBUG_LEVEL` | u32 | Board debug level (default 0) |
//! | `PCI_DOMAIN_NUMBER` | u32 | PCI domain (default 0) |
//! | `PCI_BUS_NUMBER` / `PCI_BUS_PATH` | u32 / binary | FPGA bus, or bridge chain to it |
//! | `PCI_DEVICE_NUMBER` / `PCI_BUS_SLOT` | u32 | FPGA device, or mechanical slot |
//! | `PCI_FUNCTION_NUMBER` | u32 | FPGA function (default 0) |
//! | `DEVICE_ADDR` | u32 | Direct table address (selects the direct variant) |
//! | `DEVICE_ADDR_IO` | u32 | Non-zero: `DEVICE_ADDR` is in I/O space |
//! | `IRQ_NUMBER` | u32 | Direct variant: 0 = no interrupt, `0xFFFFFFFF` = table level, else the level |
//! | `IRQ_FROM_PCI_CONFIG` | u32 | PCI variant, non-zero: interrupt line from config space |
//! | `AUTOENUM` | u32 | Non-zero: automatic enumeration |
//! | `AUTOENUM_EXCLUDINGV2` | binary | Device ids to skip |
//! | `AUTOENUM_EXCLUDING` | binary | Module codes to skip (legacy) |
//! | `DEVICE_IDV2_<n>` | u32 | Slot n: `dev_id << 8 \| instance` |
//! | `DEVICE_ID_<n>` | u32 | Slot n: `modcode << 8 \| index` (legacy) |
//! | `GROUP_<g>/GROUP_ID` | u32 | Slot g holds table group `GROUP_ID` |
//! | `GROUP_<g>/DEVICE_IDV2_<m>` | u32 | Member m: `dev_id << 8 \| index` |

use crate::descriptor::Descriptor;
use crate::enumerate::{
    DeviceRequest, ExclusionSet, GroupRequest, Lookup, ManualLayout, MemberRequest, SlotRequest,
};
use crate::error::{ChamError, Result};
use crate::pci_path;
use crate::platform::{AddrSpace, BusType, PciAddress, Platform};
use cham_chip::devid::modcode_to_dev_id_or_unknown;
use cham_chip::limits::{
    MAX_EXCLUSIONS, MAX_GROUPS, MAX_GROUP_MEMBERS, MAX_PCI_PATH, MAX_SLOTS, UNKNOWN_DEV_ID,
};

/// Debug level used when the descriptor sets none
pub const DEFAULT_DEBUG_LEVEL: u32 = 0;

/// `IRQ_NUMBER` value meaning "take the level from the table"
pub const TABLE_IRQ: u32 = 0xFFFF_FFFF;

/// Interrupt setting of a directly addressed board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqOverride {
    /// Use the level from the chameleon table
    FromTable,
    /// Report no interrupt
    Disabled,
    /// Report this level
    Level(u32),
}

/// Table location of a directly addressed board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectLocation {
    /// Table address
    pub addr: u64,
    /// Address space of `addr`
    pub space: AddrSpace,
    /// Interrupt setting
    pub irq: IrqOverride,
}

/// Where the interrupt level of a PCI board comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IrqSource {
    /// Interrupt field of the chameleon table unit
    #[default]
    Table,
    /// Interrupt-line register of the FPGA's config space; `0xFF` = none
    PciConfig,
}

/// Where the FPGA is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardLocation {
    /// PCI function
    Pci(PciAddress),
    /// Fixed address on a non-PCI bus
    Direct(DirectLocation),
}

impl BoardLocation {
    /// Bus type of the board
    #[must_use]
    pub const fn bus_type(&self) -> BusType {
        match self {
            Self::Pci(_) => BusType::Pci,
            Self::Direct(_) => BusType::Isa,
        }
    }

    /// PCI bus number, 0 for direct boards
    #[must_use]
    pub const fn bus_number(&self) -> u8 {
        match self {
            Self::Pci(addr) => addr.bus,
            Self::Direct(_) => 0,
        }
    }

    /// PCI domain, 0 for direct boards
    #[must_use]
    pub const fn domain(&self) -> u16 {
        match self {
            Self::Pci(addr) => addr.domain,
            Self::Direct(_) => 0,
        }
    }
}

/// Enumeration mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumerationMode {
    /// Walk the table, skipping the listed device ids
    Automatic(ExclusionSet),
    /// Use the declared slot layout
    Manual(ManualLayout),
}

/// Everything the board needs from its descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    /// FPGA location
    pub location: BoardLocation,
    /// Debug level
    pub debug_level: u32,
    /// Interrupt level source
    pub irq_source: IrqSource,
    /// Enumeration mode
    pub mode: EnumerationMode,
}

impl BoardConfig {
    /// Load the board configuration
    ///
    /// Resolves `PCI_BUS_PATH` and `PCI_BUS_SLOT` through `platform`.
    ///
    /// # Errors
    ///
    /// - [`ChamError::MissingKey`] if a required location key is absent
    /// - [`ChamError::Descriptor`] if a value has the wrong type or range
    /// - [`ChamError::NoDevices`] if manual mode declares nothing
    /// - bridge-chain errors from [`pci_path::resolve_bus`]
    pub fn load(desc: &Descriptor, platform: &dyn Platform) -> Result<Self> {
        let debug_level = desc.get_u32("DEBUG_LEVEL")?.unwrap_or(DEFAULT_DEBUG_LEVEL);

        let location = if desc.contains("DEVICE_ADDR") {
            BoardLocation::Direct(load_direct(desc)?)
        } else {
            BoardLocation::Pci(load_pci(desc, platform)?)
        };

        let irq_source = load_irq_source(desc, &location)?;

        let mode = if desc.get_u32("AUTOENUM")?.unwrap_or(0) != 0 {
            EnumerationMode::Automatic(load_exclusions(desc)?)
        } else {
            let layout = load_layout(desc)?;
            if layout.is_empty() {
                return Err(ChamError::NoDevices);
            }
            EnumerationMode::Manual(layout)
        };

        tracing::info!("board location {location:?}, {}", mode_summary(&mode));

        Ok(Self {
            location,
            debug_level,
            irq_source,
            mode,
        })
    }
}

fn mode_summary(mode: &EnumerationMode) -> String {
    match mode {
        EnumerationMode::Automatic(ex) => format!("automatic, {} exclusions", ex.len()),
        EnumerationMode::Manual(layout) => format!("manual, {} slots declared", layout.declared()),
    }
}

fn load_irq_source(desc: &Descriptor, location: &BoardLocation) -> Result<IrqSource> {
    if desc.get_u32("IRQ_FROM_PCI_CONFIG")?.unwrap_or(0) == 0 {
        return Ok(IrqSource::Table);
    }
    match location {
        BoardLocation::Pci(_) => Ok(IrqSource::PciConfig),
        BoardLocation::Direct(_) => {
            tracing::warn!("IRQ_FROM_PCI_CONFIG ignored for a directly addressed board");
            Ok(IrqSource::Table)
        }
    }
}

fn narrow<T: TryFrom<u32>>(key: &str, value: u32) -> Result<T> {
    T::try_from(value).map_err(|_| ChamError::descriptor(key, format!("value {value:#x} out of range")))
}

fn load_direct(desc: &Descriptor) -> Result<DirectLocation> {
    let addr = desc
        .get_u32("DEVICE_ADDR")?
        .ok_or_else(|| ChamError::missing_key("DEVICE_ADDR"))?;
    let space = AddrSpace::from_raw(desc.get_u32("DEVICE_ADDR_IO")?.unwrap_or(0));
    let irq = match desc.get_u32("IRQ_NUMBER")? {
        None | Some(TABLE_IRQ) => IrqOverride::FromTable,
        Some(0) => IrqOverride::Disabled,
        Some(level) => IrqOverride::Level(level),
    };
    Ok(DirectLocation {
        addr: u64::from(addr),
        space,
        irq,
    })
}

fn load_pci(desc: &Descriptor, platform: &dyn Platform) -> Result<PciAddress> {
    let domain: u16 = narrow(
        "PCI_DOMAIN_NUMBER",
        desc.get_u32("PCI_DOMAIN_NUMBER")?.unwrap_or(0),
    )?;

    let bus: u8 = if let Some(bus) = desc.get_u32("PCI_BUS_NUMBER")? {
        narrow("PCI_BUS_NUMBER", bus)?
    } else if let Some(path) = desc.get_binary("PCI_BUS_PATH")? {
        if path.is_empty() {
            return Err(ChamError::descriptor("PCI_BUS_PATH", "empty path"));
        }
        if path.len() > MAX_PCI_PATH {
            return Err(ChamError::descriptor(
                "PCI_BUS_PATH",
                format!("{} hops, at most {MAX_PCI_PATH} allowed", path.len()),
            ));
        }
        pci_path::resolve_bus(platform, domain, path)?
    } else {
        return Err(ChamError::missing_key("PCI_BUS_NUMBER or PCI_BUS_PATH"));
    };

    let device: u8 = if let Some(dev) = desc.get_u32("PCI_DEVICE_NUMBER")? {
        narrow("PCI_DEVICE_NUMBER", dev)?
    } else if let Some(slot) = desc.get_u32("PCI_BUS_SLOT")? {
        let dev = platform.pci_slot_to_device(bus, slot)?;
        tracing::debug!("mechanical slot {slot} -> device {dev:#x}");
        dev
    } else {
        return Err(ChamError::missing_key("PCI_DEVICE_NUMBER or PCI_BUS_SLOT"));
    };
    if device > 0x1F {
        return Err(ChamError::descriptor(
            "PCI_DEVICE_NUMBER",
            format!("device {device:#x} out of range"),
        ));
    }

    let function = desc.get_u32("PCI_FUNCTION_NUMBER")?.unwrap_or(0);
    if function > 7 {
        return Err(ChamError::descriptor(
            "PCI_FUNCTION_NUMBER",
            format!("function {function} out of range"),
        ));
    }

    Ok(PciAddress::new(domain, bus, device, narrow("PCI_FUNCTION_NUMBER", function)?))
}

fn load_exclusions(desc: &Descriptor) -> Result<ExclusionSet> {
    let (key, set) = if let Some(ids) = desc.get_binary("AUTOENUM_EXCLUDINGV2")? {
        check_exclusion_len("AUTOENUM_EXCLUDINGV2", ids)?;
        ("AUTOENUM_EXCLUDINGV2", ExclusionSet::from_dev_ids(ids))
    } else if let Some(codes) = desc.get_binary("AUTOENUM_EXCLUDING")? {
        check_exclusion_len("AUTOENUM_EXCLUDING", codes)?;
        ("AUTOENUM_EXCLUDING", ExclusionSet::from_module_codes(codes))
    } else {
        return Ok(ExclusionSet::empty());
    };
    tracing::debug!("{key}: excluding {:04x?}", set.ids());
    Ok(set)
}

fn check_exclusion_len(key: &str, list: &[u8]) -> Result<()> {
    if list.len() > MAX_EXCLUSIONS {
        return Err(ChamError::descriptor(
            key,
            format!("{} entries, at most {MAX_EXCLUSIONS} allowed", list.len()),
        ));
    }
    Ok(())
}

/// Split a `dev_id << 8 | low` descriptor word
#[allow(clippy::cast_possible_truncation)]
const fn split_word(value: u32) -> (u16, u8) {
    ((value >> 8) as u16, (value & 0xFF) as u8)
}

/// Module code of a legacy `DEVICE_ID_<n>` word (bits 8..23)
fn legacy_code(key: &str, value: u32) -> Result<u16> {
    u16::try_from(value >> 8)
        .map_err(|_| ChamError::descriptor(key, format!("module code in {value:#x} exceeds 16 bits")))
}

fn load_layout(desc: &Descriptor) -> Result<ManualLayout> {
    let mut layout = ManualLayout::new();

    for slot in 0..MAX_SLOTS {
        let request = if let Some(v) = desc.get_u32(&format!("DEVICE_IDV2_{slot}"))? {
            let (dev_id, instance) = split_word(v);
            DeviceRequest {
                dev_id,
                lookup: Lookup::Instance(u16::from(instance)),
            }
        } else if let Some(v) = desc.get_u32(&format!("DEVICE_ID_{slot}"))? {
            let code = legacy_code(&format!("DEVICE_ID_{slot}"), v)?;
            let (_, index) = split_word(v);
            DeviceRequest {
                dev_id: u8::try_from(code).map_or(UNKNOWN_DEV_ID, modcode_to_dev_id_or_unknown),
                lookup: Lookup::Index(index),
            }
        } else {
            continue;
        };
        tracing::debug!("slot {slot}: declared {request:?}");
        layout.insert(slot, SlotRequest::Device(request));
    }

    for g in 0..MAX_GROUPS {
        let Some(id) = desc.get_u32(&format!("GROUP_{g}/GROUP_ID"))? else {
            continue;
        };
        let group_id: u16 = narrow("GROUP_ID", id)?;

        let mut members = Vec::new();
        for m in 0..MAX_GROUP_MEMBERS {
            if let Some(v) = desc.get_u32(&format!("GROUP_{g}/DEVICE_IDV2_{m}"))? {
                let (dev_id, index) = split_word(v);
                members.push(MemberRequest { dev_id, index });
            }
        }
        if members.is_empty() {
            tracing::warn!("GROUP_{g}: group {group_id} declares no members");
        }

        tracing::debug!("slot {g}: declared group {group_id} with {} members", members.len());
        if let Some(SlotRequest::Device(replaced)) =
            layout.insert(g, SlotRequest::Group(GroupRequest { group_id, members }))
        {
            tracing::warn!("slot {g}: GROUP_{g} replaces device {:#06x}", replaced.dev_id);
        }
    }

    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPlatform;
    use cham_chip::devid::{dev_id, modcode};

    fn pci_base() -> Descriptor {
        Descriptor::new()
            .with_u32("PCI_BUS_NUMBER", 2)
            .with_u32("PCI_DEVICE_NUMBER", 0x0d)
    }

    #[test]
    fn manual_words_are_split() {
        let desc = pci_base()
            .with_u32("DEVICE_IDV2_0", 0x2201)
            .with_u32("DEVICE_ID_3", 0x0802);
        let cfg = BoardConfig::load(&desc, &SimPlatform::new()).unwrap();
        let EnumerationMode::Manual(layout) = cfg.mode else {
            panic!("expected manual mode");
        };
        assert_eq!(
            layout.get(0),
            Some(&SlotRequest::Device(DeviceRequest {
                dev_id: dev_id::GPIO,
                lookup: Lookup::Instance(1),
            }))
        );
        assert_eq!(
            layout.get(3),
            Some(&SlotRequest::Device(DeviceRequest {
                dev_id: dev_id::CAN,
                lookup: Lookup::Index(2),
            }))
        );
        assert_eq!(cfg.location, BoardLocation::Pci(PciAddress::new(0, 2, 0x0d, 0)));
    }

    #[test]
    fn manual_without_devices_fails() {
        let err = BoardConfig::load(&pci_base(), &SimPlatform::new()).unwrap_err();
        assert!(matches!(err, ChamError::NoDevices));
    }

    #[test]
    fn v2_exclusions_win_over_legacy() {
        let desc = pci_base()
            .with_u32("AUTOENUM", 1)
            .with_binary("AUTOENUM_EXCLUDINGV2", [0x23])
            .with_binary("AUTOENUM_EXCLUDING", [modcode::UART]);
        let cfg = BoardConfig::load(&desc, &SimPlatform::new()).unwrap();
        assert_eq!(
            cfg.mode,
            EnumerationMode::Automatic(ExclusionSet::from_dev_ids(&[0x23]))
        );
    }

    #[test]
    fn location_keys_are_required() {
        let desc = Descriptor::new().with_u32("AUTOENUM", 1);
        let err = BoardConfig::load(&desc, &SimPlatform::new()).unwrap_err();
        assert!(matches!(err, ChamError::MissingKey { .. }));

        let desc = desc.with_u32("PCI_BUS_NUMBER", 1);
        let err = BoardConfig::load(&desc, &SimPlatform::new()).unwrap_err();
        assert!(matches!(err, ChamError::MissingKey { .. }));
    }

    #[test]
    fn direct_variant_irq_override() {
        let desc = Descriptor::new()
            .with_u32("DEVICE_ADDR", 0xd000_0000)
            .with_u32("IRQ_NUMBER", 0)
            .with_u32("AUTOENUM", 1);
        let cfg = BoardConfig::load(&desc, &SimPlatform::new()).unwrap();
        assert_eq!(
            cfg.location,
            BoardLocation::Direct(DirectLocation {
                addr: 0xd000_0000,
                space: AddrSpace::Mem,
                irq: IrqOverride::Disabled,
            })
        );
        assert_eq!(cfg.location.bus_type(), BusType::Isa);
    }

    #[test]
    fn table_irq_value_means_from_table() {
        let desc = Descriptor::new()
            .with_u32("DEVICE_ADDR", 0xd000_0000)
            .with_u32("IRQ_NUMBER", TABLE_IRQ)
            .with_u32("AUTOENUM", 1);
        let cfg = BoardConfig::load(&desc, &SimPlatform::new()).unwrap();
        let BoardLocation::Direct(direct) = cfg.location else {
            panic!("expected direct location");
        };
        assert_eq!(direct.irq, IrqOverride::FromTable);
    }

    #[test]
    fn irq_source_key_applies_to_pci_only() {
        let desc = pci_base()
            .with_u32("AUTOENUM", 1)
            .with_u32("IRQ_FROM_PCI_CONFIG", 1);
        let cfg = BoardConfig::load(&desc, &SimPlatform::new()).unwrap();
        assert_eq!(cfg.irq_source, IrqSource::PciConfig);

        let desc = Descriptor::new()
            .with_u32("DEVICE_ADDR", 0xd000_0000)
            .with_u32("IRQ_FROM_PCI_CONFIG", 1)
            .with_u32("AUTOENUM", 1);
        let cfg = BoardConfig::load(&desc, &SimPlatform::new()).unwrap();
        assert_eq!(cfg.irq_source, IrqSource::Table);
    }

    #[test]
    fn legacy_code_keeps_sixteen_bits() {
        // 0x0108 is not the CAN code 0x08
        let desc = pci_base().with_u32("DEVICE_ID_0", 0x01_0802);
        let cfg = BoardConfig::load(&desc, &SimPlatform::new()).unwrap();
        let EnumerationMode::Manual(layout) = cfg.mode else {
            panic!("expected manual mode");
        };
        assert_eq!(
            layout.get(0),
            Some(&SlotRequest::Device(DeviceRequest {
                dev_id: UNKNOWN_DEV_ID,
                lookup: Lookup::Index(2),
            }))
        );

        let desc = pci_base().with_u32("DEVICE_ID_0", 0x0100_0000);
        let err = BoardConfig::load(&desc, &SimPlatform::new()).unwrap_err();
        assert!(matches!(err, ChamError::Descriptor { ref key, .. } if key == "DEVICE_ID_0"));
    }

    #[test]
    fn overlong_bus_path_is_rejected() {
        let desc = Descriptor::new()
            .with_binary("PCI_BUS_PATH", vec![0u8; MAX_PCI_PATH + 1])
            .with_u32("PCI_DEVICE_NUMBER", 0)
            .with_u32("AUTOENUM", 1);
        let err = BoardConfig::load(&desc, &SimPlatform::new()).unwrap_err();
        assert!(matches!(err, ChamError::Descriptor { .. }));
    }

    #[test]
    fn group_replaces_device_at_same_slot() {
        let desc = pci_base()
            .with_u32("DEVICE_IDV2_1", 0x2200)
            .with_u32("GROUP_1/GROUP_ID", 2)
            .with_u32("GROUP_1/DEVICE_IDV2_0", 0x3500)
            .with_u32("GROUP_1/DEVICE_IDV2_1", 0x2B00);
        let cfg = BoardConfig::load(&desc, &SimPlatform::new()).unwrap();
        let EnumerationMode::Manual(layout) = cfg.mode else {
            panic!("expected manual mode");
        };
        let Some(SlotRequest::Group(g)) = layout.get(1) else {
            panic!("expected group at slot 1");
        };
        assert_eq!(g.group_id, 2);
        assert_eq!(g.members.len(), 2);
        assert_eq!(g.members[1].dev_id, dev_id::SDRAM);
        assert_eq!(layout.declared(), 1);
    }
}
