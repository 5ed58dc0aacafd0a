//! Slot and group registry
//!
//! Board slots are what the framework addresses. Each slot is empty, holds
//! one unit, or holds a group of units that belong together (e.g. an IDE
//! controller with its target and disk cores). The registry owns every
//! record; re-init replaces the whole table at once.

use crate::error::{ChamError, Result};
use crate::table::ModuleRecord;
use cham_chip::limits::{MAX_GROUP_MEMBERS, MAX_SLOTS};

/// Units sharing a group id, in table order
///
/// Never empty: the first member is the group's base unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    id: u16,
    members: Vec<ModuleRecord>,
}

impl Group {
    /// New group seeded with its base unit
    #[must_use]
    pub fn new(id: u16, base: ModuleRecord) -> Self {
        Self {
            id,
            members: vec![base],
        }
    }

    /// Group built from resolved members, `None` if there are none
    #[must_use]
    pub fn from_members(id: u16, mut members: Vec<ModuleRecord>) -> Option<Self> {
        if members.is_empty() {
            return None;
        }
        members.truncate(MAX_GROUP_MEMBERS);
        Some(Self { id, members })
    }

    /// Append a member; `false` if the group is full
    pub fn push(&mut self, unit: ModuleRecord) -> bool {
        if self.members.len() >= MAX_GROUP_MEMBERS {
            return false;
        }
        self.members.push(unit);
        true
    }

    /// Group id
    #[must_use]
    pub const fn id(&self) -> u16 {
        self.id
    }

    /// Base (first) member
    #[must_use]
    pub fn base(&self) -> &ModuleRecord {
        &self.members[0]
    }

    /// All members
    #[must_use]
    pub fn members(&self) -> &[ModuleRecord] {
        &self.members
    }

    /// Member count
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Content of one slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SlotState {
    /// Nothing assigned, or the assigned unit was not found
    #[default]
    Empty,
    /// One unit
    Single(ModuleRecord),
    /// A group of units
    Group(Group),
}

impl SlotState {
    /// Whether the slot holds a usable unit
    #[must_use]
    pub const fn is_occupied(&self) -> bool {
        !matches!(self, Self::Empty)
    }

    /// The unit itself, or the base of a group
    #[must_use]
    pub fn primary(&self) -> Option<&ModuleRecord> {
        match self {
            Self::Empty => None,
            Self::Single(unit) => Some(unit),
            Self::Group(group) => Some(group.base()),
        }
    }

    /// Group id of a group slot, 0 otherwise
    #[must_use]
    pub const fn group_id(&self) -> u16 {
        match self {
            Self::Group(group) => group.id,
            _ => 0,
        }
    }
}

/// Fixed-capacity table of [`SlotState`]s
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    slots: Vec<SlotState>,
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotTable {
    /// Number of slots
    pub const CAPACITY: usize = MAX_SLOTS;

    /// All slots empty
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![SlotState::Empty; Self::CAPACITY],
        }
    }

    /// Reject slot numbers beyond capacity
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::SlotOutOfRange`].
    pub fn check(slot: usize) -> Result<()> {
        if slot >= Self::CAPACITY {
            return Err(ChamError::SlotOutOfRange {
                slot,
                capacity: Self::CAPACITY,
            });
        }
        Ok(())
    }

    /// State of `slot`
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::SlotOutOfRange`] for an illegal slot number.
    pub fn get(&self, slot: usize) -> Result<&SlotState> {
        Self::check(slot)?;
        Ok(&self.slots[slot])
    }

    /// Whether `slot` holds a usable unit
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::SlotOutOfRange`] for an illegal slot number.
    pub fn is_occupied(&self, slot: usize) -> Result<bool> {
        Ok(self.get(slot)?.is_occupied())
    }

    /// Unit of a single slot, or base of a group slot
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::SlotOutOfRange`] or [`ChamError::SlotEmpty`].
    pub fn primary(&self, slot: usize) -> Result<&ModuleRecord> {
        self.get(slot)?
            .primary()
            .ok_or(ChamError::SlotEmpty { slot })
    }

    /// Unit `member` of `slot`
    ///
    /// A single slot only has member 0.
    ///
    /// # Errors
    ///
    /// - [`ChamError::SlotOutOfRange`] / [`ChamError::SlotEmpty`]
    /// - [`ChamError::IllegalAddrMode`] for a member > 0 of a single slot
    /// - [`ChamError::IllegalMember`] for a member beyond a group's size
    pub fn member(&self, slot: usize, member: usize) -> Result<&ModuleRecord> {
        match self.get(slot)? {
            SlotState::Empty => Err(ChamError::SlotEmpty { slot }),
            SlotState::Single(unit) if member == 0 => Ok(unit),
            SlotState::Single(_) => Err(ChamError::IllegalAddrMode {
                slot,
                reason: format!("member {member} requested from a single-unit slot"),
            }),
            SlotState::Group(group) => {
                group
                    .members
                    .get(member)
                    .ok_or(ChamError::IllegalMember {
                        slot,
                        member,
                        count: group.len(),
                    })
            }
        }
    }

    /// Address and window size of unit `member` of `slot`
    ///
    /// A table size of 0 is reported as the default window size.
    ///
    /// # Errors
    ///
    /// Same as [`SlotTable::member`].
    pub fn base_address_and_size(&self, slot: usize, member: usize) -> Result<(u64, u32)> {
        let unit = self.member(slot, member)?;
        Ok((unit.addr, unit.effective_size()))
    }

    /// GIRQ line of the slot's unit (group base for groups)
    ///
    /// `Ok(None)` means the unit has no interrupt.
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::SlotOutOfRange`] or [`ChamError::SlotEmpty`].
    pub fn interrupt_line(&self, slot: usize) -> Result<Option<u8>> {
        Ok(self.primary(slot)?.interrupt_line())
    }

    /// Occupied slots with their numbers
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &SlotState)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_occupied())
    }

    /// Number of occupied slots
    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.occupied().count()
    }

    /// Store `state` in `slot`, returning the previous state
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::SlotOutOfRange`] for an illegal slot number.
    pub fn set(&mut self, slot: usize, state: SlotState) -> Result<SlotState> {
        Self::check(slot)?;
        Ok(std::mem::replace(&mut self.slots[slot], state))
    }

    /// Mutable group at `slot`, if that slot holds one
    pub(crate) fn group_mut(&mut self, slot: usize) -> Option<&mut Group> {
        match self.slots.get_mut(slot) {
            Some(SlotState::Group(group)) => Some(group),
            _ => None,
        }
    }

    /// Release every record
    pub fn clear(&mut self) {
        self.slots.fill(SlotState::Empty);
    }
}
