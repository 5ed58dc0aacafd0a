//! Slot assignment
//!
//! Two ways to fill the [`SlotTable`] from an open chameleon table:
//!
//! - **Automatic**: walk the table in order, skip excluded units, give
//!   every remaining unit (or group of units) the next free slot.
//! - **Manual**: the descriptor names, per slot, which unit (or group)
//!   goes there; each request is looked up in the table.
//!
//! # Exclusion cascade
//!
//! ```text
//! Entry  Dev id  Group  Core      Result (excluding 0x23,0x19,0x34,0x2C)
//! ─────  ──────  ─────  ────────  ──────────────────────────────────────
//!   0    0x23    0      SYSTEM    excluded
//!   1    0x19    0      UART      excluded
//!   2    0x22    0      GPIO      slot 0
//!   3    0x1D    0      CAN       slot 1
//!   4    0x1D    0      CAN       slot 2
//!  5..8  0x34    0      GIRQ      excluded
//!   9    0x2C    1      DISP      excluded, group 1 recorded
//!  10    0x35    2      IDE       slot 3 (group 2 base)
//!  11    0x2B    1      SDRAM     excluded through group 1
//!  12    0x2B    2      SDRAM     slot 3
//!  13    0x44    2      IDETGT    slot 3
//!  14    0x46    2      IDEDISK   slot 3
//! ```

use crate::registry::{Group, SlotState, SlotTable};
use crate::table::{ChamTable, ModuleRecord, UnitQuery};
use cham_chip::devid::modcode_to_dev_id_or_unknown;
use cham_chip::limits::{MAX_EXCLUSIONS, MAX_GROUPS};
use std::collections::BTreeMap;

/// Device ids skipped during automatic enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    ids: Vec<u16>,
}

impl ExclusionSet {
    /// No exclusions
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// From raw device ids (`AUTOENUM_EXCLUDINGV2`)
    #[must_use]
    pub fn from_dev_ids(bytes: &[u8]) -> Self {
        Self {
            ids: bytes
                .iter()
                .take(MAX_EXCLUSIONS)
                .map(|&b| u16::from(b))
                .collect(),
        }
    }

    /// From legacy module codes (`AUTOENUM_EXCLUDING`), translated
    ///
    /// Unknown codes become the unknown device id and never match.
    #[must_use]
    pub fn from_module_codes(bytes: &[u8]) -> Self {
        Self {
            ids: bytes
                .iter()
                .take(MAX_EXCLUSIONS)
                .map(|&b| modcode_to_dev_id_or_unknown(b))
                .collect(),
        }
    }

    /// Position of the first entry equal to `dev_id`
    #[must_use]
    pub fn position(&self, dev_id: u16) -> Option<usize> {
        self.ids.iter().position(|&id| id == dev_id)
    }

    /// Whether `dev_id` is listed
    #[must_use]
    pub fn contains(&self, dev_id: u16) -> bool {
        self.position(dev_id).is_some()
    }

    /// Excluded ids in descriptor order
    #[must_use]
    pub fn ids(&self) -> &[u16] {
        &self.ids
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether nothing is excluded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// How a manually declared single device is located in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// `DEVICE_IDV2_<n>`: the unit with this instance number
    Instance(u16),
    /// `DEVICE_ID_<n>`: the n-th unit of this device id
    Index(u8),
}

/// Single device declared for one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRequest {
    /// Device id
    pub dev_id: u16,
    /// How to pick among units with that id
    pub lookup: Lookup,
}

/// Member of a declared group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRequest {
    /// Device id
    pub dev_id: u16,
    /// Which match (0-based) among the group's units with that id
    pub index: u8,
}

/// Group declared for one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRequest {
    /// Group id in the table
    pub group_id: u16,
    /// Members in declaration order
    pub members: Vec<MemberRequest>,
}

/// What a descriptor declares for one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRequest {
    /// One unit
    Device(DeviceRequest),
    /// A group of units
    Group(GroupRequest),
}

/// Slot declarations of a manual descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualLayout {
    requests: BTreeMap<usize, SlotRequest>,
}

impl ManualLayout {
    /// No declarations
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `request` at `slot`, returning what it replaced
    pub fn insert(&mut self, slot: usize, request: SlotRequest) -> Option<SlotRequest> {
        self.requests.insert(slot, request)
    }

    /// Declaration at `slot`
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&SlotRequest> {
        self.requests.get(&slot)
    }

    /// Declarations in slot order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &SlotRequest)> {
        self.requests.iter().map(|(s, r)| (*s, r))
    }

    /// Number of declared slots
    #[must_use]
    pub fn declared(&self) -> usize {
        self.requests.len()
    }

    /// Whether nothing was declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Outcome of one enumeration pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerationReport {
    /// Slots that received a unit or group
    pub assigned: usize,
    /// Table units skipped by exclusion
    pub excluded: usize,
    /// Group members dropped because their group was full
    pub dropped: usize,
    /// Declared slots left empty because the lookup failed
    pub unresolved: Vec<usize>,
}

/// Fill `slots` from the table, in table order
///
/// `slots` is expected to be empty. Enumeration stops silently when the
/// table is exhausted or every slot is taken.
pub fn automatic(
    table: &dyn ChamTable,
    exclusions: &ExclusionSet,
    slots: &mut SlotTable,
) -> EnumerationReport {
    let mut report = EnumerationReport::default();
    let mut excluded_groups: Vec<u16> = Vec::with_capacity(MAX_GROUPS);
    let mut group_slots: BTreeMap<u16, usize> = BTreeMap::new();
    let mut next_slot = 0;

    for index in 0.. {
        if next_slot >= SlotTable::CAPACITY {
            tracing::debug!("all {} slots assigned, stopping", SlotTable::CAPACITY);
            break;
        }
        let Some(unit) = table.unit_ident(index) else {
            break;
        };

        if let Some(&slot) = group_slots.get(&unit.group) {
            append_member(slots, slot, unit, &mut report);
            continue;
        }

        if is_excluded(&unit, exclusions, &mut excluded_groups) {
            report.excluded += 1;
            continue;
        }

        let state = if unit.is_grouped() {
            group_slots.insert(unit.group, next_slot);
            SlotState::Group(Group::new(unit.group, unit))
        } else {
            SlotState::Single(unit)
        };

        tracing::debug!(
            "slot {next_slot}: dev {:#06x} inst {} group {} @ {:#x}",
            unit.dev_id,
            unit.instance,
            unit.group,
            unit.addr
        );
        // next_slot < CAPACITY, checked above
        let _ = slots.set(next_slot, state);
        next_slot += 1;
        report.assigned += 1;
    }

    report
}

fn append_member(slots: &mut SlotTable, slot: usize, unit: ModuleRecord, report: &mut EnumerationReport) {
    let Some(group) = slots.group_mut(slot) else {
        return;
    };
    if group.push(unit) {
        tracing::debug!(
            "slot {slot}: group {} member {} dev {:#06x}",
            unit.group,
            group.len() - 1,
            unit.dev_id
        );
    } else {
        tracing::warn!(
            "slot {slot}: group {} full, dropping dev {:#06x} inst {}",
            unit.group,
            unit.dev_id,
            unit.instance
        );
        report.dropped += 1;
    }
}

fn is_excluded(unit: &ModuleRecord, exclusions: &ExclusionSet, excluded_groups: &mut Vec<u16>) -> bool {
    if let Some(pos) = exclusions.position(unit.dev_id) {
        tracing::debug!(
            "dev {:#06x} inst {} excluded by entry {pos}",
            unit.dev_id,
            unit.instance
        );
        if unit.is_grouped() && !excluded_groups.contains(&unit.group) {
            if excluded_groups.len() < MAX_GROUPS {
                excluded_groups.push(unit.group);
            } else {
                tracing::warn!(
                    "excluded-group list full, members of group {} may still be enumerated",
                    unit.group
                );
            }
        }
        return true;
    }

    if unit.is_grouped() && excluded_groups.contains(&unit.group) {
        tracing::debug!(
            "dev {:#06x} inst {} excluded with group {}",
            unit.dev_id,
            unit.instance,
            unit.group
        );
        return true;
    }

    false
}

/// Fill `slots` from descriptor declarations
///
/// A declaration whose unit is not in the table leaves its slot empty; a
/// group with any missing member leaves the whole group slot empty.
pub fn manual(table: &dyn ChamTable, layout: &ManualLayout, slots: &mut SlotTable) -> EnumerationReport {
    let mut report = EnumerationReport::default();

    for (slot, request) in layout.iter() {
        let state = match request {
            SlotRequest::Device(dev) => find_device(table, dev).map(SlotState::Single),
            SlotRequest::Group(group) => find_group(table, group).map(SlotState::Group),
        };

        match state {
            Some(state) => {
                if let Some(unit) = state.primary() {
                    tracing::debug!(
                        "slot {slot}: dev {:#06x} inst {} @ {:#x}",
                        unit.dev_id,
                        unit.instance,
                        unit.addr
                    );
                }
                if slots.set(slot, state).is_ok() {
                    report.assigned += 1;
                }
            }
            None => {
                tracing::warn!("slot {slot}: declared unit not found in table, slot left empty");
                report.unresolved.push(slot);
            }
        }
    }

    report
}

fn find_device(table: &dyn ChamTable, req: &DeviceRequest) -> Option<ModuleRecord> {
    let query = UnitQuery::device(req.dev_id).with_group(0);
    match req.lookup {
        Lookup::Instance(instance) => table.instance_find(0, &query.with_instance(instance)),
        Lookup::Index(index) => table.instance_find(usize::from(index), &query),
    }
}

fn find_group(table: &dyn ChamTable, req: &GroupRequest) -> Option<Group> {
    let query = |dev_id| UnitQuery::device(dev_id).with_group(req.group_id);
    let members = req
        .members
        .iter()
        .map(|m| {
            let found = table.instance_find(usize::from(m.index), &query(m.dev_id));
            if found.is_none() {
                tracing::warn!(
                    "group {}: member dev {:#06x} index {} not found",
                    req.group_id,
                    m.dev_id,
                    m.index
                );
            }
            found
        })
        .collect::<Option<Vec<_>>>()?;

    Group::from_members(req.group_id, members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTable;
    use cham_chip::devid::{dev_id, modcode};

    fn can_table() -> SimTable {
        let mut t = SimTable::new("test");
        t.push(ModuleRecord::new(dev_id::CAN, 0));
        t.push(ModuleRecord::new(dev_id::GPIO, 0));
        t.push(ModuleRecord::new(dev_id::CAN, 1));
        t
    }

    #[test]
    fn legacy_codes_are_translated() {
        let set = ExclusionSet::from_module_codes(&[modcode::SYSTEM, modcode::UART, 0xEE]);
        assert_eq!(set.ids(), &[dev_id::SYSTEM, dev_id::UART, 0xFFFF]);
        assert!(!set.contains(0xEE));
    }

    #[test]
    fn automatic_without_exclusions_takes_everything() {
        let table = can_table();
        let mut slots = SlotTable::new();
        let report = automatic(&table, &ExclusionSet::empty(), &mut slots);
        assert_eq!(report.assigned, 3);
        assert_eq!(slots.primary(2).unwrap().instance, 1);
        assert!(!slots.is_occupied(3).unwrap());
    }

    #[test]
    fn manual_index_lookup() {
        let table = can_table();
        let mut layout = ManualLayout::new();
        layout.insert(
            0,
            SlotRequest::Device(DeviceRequest {
                dev_id: dev_id::CAN,
                lookup: Lookup::Index(1),
            }),
        );
        layout.insert(
            1,
            SlotRequest::Device(DeviceRequest {
                dev_id: dev_id::CAN,
                lookup: Lookup::Index(2),
            }),
        );
        let mut slots = SlotTable::new();
        let report = manual(&table, &layout, &mut slots);
        assert_eq!(slots.primary(0).unwrap().instance, 1);
        assert_eq!(report.unresolved, vec![1]);
    }
}
