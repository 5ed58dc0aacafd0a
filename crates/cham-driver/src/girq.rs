//! GIRQ interrupt-enable coordination
//!
//! The GIRQ enable register is shared by three kinds of writers:
//!
//! 1. callers of this board on other execution contexts (interrupt
//!    handlers included), serialised by a spin lock
//! 2. drivers outside this process mapping the same block, serialised by
//!    the hardware in-use bit when the unit's API version is non-zero
//! 3. writers that follow neither protocol, caught by reading back every
//!    write and retrying
//!
//! ```text
//! lock ─► [api != 0] poll IN_USE until 0 ─► read EN ─► write EN ─► delay
//!                                               ▲                     │
//!                                               └── readback differs ─┘
//!      ─► [api != 0] write IN_USE = 1 ─► unlock
//! ```

use crate::error::{ChamError, Result};
use crate::platform::{AddrSpace, Platform, RegisterBlock};
use crate::table::ModuleRecord;
use cham_chip::girq::{self, EnableBit};
use spin::Mutex;

/// Polls of the in-use bit before giving up
pub const IN_USE_RETRIES: u32 = 1000;

/// Delay between in-use polls
pub const IN_USE_POLL_US: u32 = 10;

/// Write attempts before giving up on verification
pub const VERIFY_RETRIES: u32 = 10;

/// Settle time between an enable write and its readback
pub const VERIFY_DELAY_US: u32 = 100;

/// Mapped GIRQ unit
#[derive(Debug)]
pub struct Girq {
    regs: Mutex<Box<dyn RegisterBlock>>,
    phys: u64,
    space: AddrSpace,
    api_version: u8,
}

impl Girq {
    /// Wrap a mapped GIRQ register block
    #[must_use]
    pub fn new(regs: Box<dyn RegisterBlock>, phys: u64, space: AddrSpace) -> Self {
        let api_version = girq::api_version(u32::from_le(regs.read32(girq::API_VER)));
        let girq = Self {
            regs: Mutex::new(regs),
            phys,
            space,
            api_version,
        };
        tracing::info!(
            "GIRQ at {phys:#x} ({space}): enable mask {:#018x}, api version {api_version}",
            girq.enable_mask()
        );
        girq
    }

    /// Map the register block of `unit`
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::Mapping`] if the block cannot be mapped.
    pub fn map(platform: &dyn Platform, unit: &ModuleRecord, space: AddrSpace) -> Result<Self> {
        let regs = platform.map_registers(
            unit.addr,
            girq::SPACE_SIZE,
            space,
            unit.bus_id,
        )?;
        Ok(Self::new(regs, unit.addr, space))
    }

    /// Physical address of the block
    #[must_use]
    pub const fn phys(&self) -> u64 {
        self.phys
    }

    /// Address space of the block
    #[must_use]
    pub const fn space(&self) -> AddrSpace {
        self.space
    }

    /// API version probed at mapping time
    #[must_use]
    pub const fn api_version(&self) -> u8 {
        self.api_version
    }

    /// Whether the unit has the hardware in-use bit
    #[must_use]
    pub const fn has_in_use_bit(&self) -> bool {
        self.api_version != 0
    }

    /// Current 64-bit enable mask
    #[must_use]
    pub fn enable_mask(&self) -> u64 {
        let regs = self.regs.lock();
        read64(&**regs, girq::IRQ_EN)
    }

    /// Current 64-bit request (pending) mask
    #[must_use]
    pub fn pending(&self) -> u64 {
        let regs = self.regs.lock();
        read64(&**regs, girq::IRQ_REQ)
    }

    /// Enable or disable interrupt line `line`
    ///
    /// A write that never reads back is logged but not reported: the bit
    /// may still have reached the hardware.
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::GirqBusy`] if another agent holds the in-use
    /// bit for longer than the poll budget. No register is written then.
    pub fn set_line(&self, platform: &dyn Platform, line: u8, enable: bool) -> Result<()> {
        let bit = EnableBit::for_line(line);
        let regs = self.regs.lock();

        if self.has_in_use_bit() {
            acquire_in_use(&**regs, platform)?;
        }

        if !modify(&**regs, platform, bit, enable) {
            tracing::error!(
                "GIRQ line {line}: enable={enable} not verified after {VERIFY_RETRIES} writes"
            );
        }

        if self.has_in_use_bit() {
            regs.write32(girq::IN_USE, girq::IN_USE_BIT.to_le());
        }

        Ok(())
    }
}

fn read64(regs: &dyn RegisterBlock, offset: usize) -> u64 {
    let lo = u32::from_le(regs.read32(offset));
    let hi = u32::from_le(regs.read32(offset + girq::UPPER_WORD));
    (u64::from(hi) << 32) | u64::from(lo)
}

/// Wait until the in-use bit reads 0; the read itself takes the block
fn acquire_in_use(regs: &dyn RegisterBlock, platform: &dyn Platform) -> Result<()> {
    for attempt in 0..IN_USE_RETRIES {
        let in_use = u32::from_le(regs.read32(girq::IN_USE)) & girq::IN_USE_BIT;
        if in_use == 0 {
            if attempt > 0 {
                tracing::debug!("GIRQ in-use released after {attempt} polls");
            }
            return Ok(());
        }
        platform.delay_us(IN_USE_POLL_US);
    }
    tracing::warn!("GIRQ in-use bit still set after {IN_USE_RETRIES} polls");
    Err(ChamError::GirqBusy {
        retries: IN_USE_RETRIES,
    })
}

/// Read-modify-write with readback; `false` if never verified
fn modify(regs: &dyn RegisterBlock, platform: &dyn Platform, bit: EnableBit, enable: bool) -> bool {
    for attempt in 0..VERIFY_RETRIES {
        let current = u32::from_le(regs.read32(bit.offset));
        let wanted = if enable {
            current | bit.mask()
        } else {
            current & !bit.mask()
        };
        regs.write32(bit.offset, wanted.to_le());
        platform.delay_us(VERIFY_DELAY_US);

        let readback = u32::from_le(regs.read32(bit.offset));
        if readback == wanted {
            tracing::debug!(
                "GIRQ [{:#04x}] {current:#010x} -> {wanted:#010x}",
                bit.offset
            );
            return true;
        }
        tracing::warn!(
            "GIRQ [{:#04x}] overwritten (wrote {wanted:#010x}, read {readback:#010x}), attempt {}",
            bit.offset,
            attempt + 1
        );
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimPlatform, SimRegisters};
    use std::sync::Arc;

    fn girq_with(api: u8) -> (Girq, Arc<SimRegisters>) {
        let regs = Arc::new(SimRegisters::new(girq::SPACE_SIZE));
        regs.set(girq::API_VER, u32::from(api) << girq::API_VER_SHIFT);
        let g = Girq::new(Box::new(Arc::clone(&regs)), 0x1000, AddrSpace::Mem);
        (g, regs)
    }

    #[test]
    fn api_version_gates_in_use_bit() {
        assert!(!girq_with(0).0.has_in_use_bit());
        let (g, _) = girq_with(2);
        assert_eq!(g.api_version(), 2);
        assert!(g.has_in_use_bit());
    }

    #[test]
    fn enable_and_disable_touch_one_bit() {
        let (g, regs) = girq_with(0);
        let platform = SimPlatform::new();
        regs.set(girq::IRQ_EN, 0x8000_0001);

        g.set_line(&platform, 4, true).unwrap();
        assert_eq!(regs.get(girq::IRQ_EN), 0x8000_0011);

        g.set_line(&platform, 0, false).unwrap();
        assert_eq!(regs.get(girq::IRQ_EN), 0x8000_0010);
        assert_eq!(g.enable_mask(), 0x8000_0010);
    }

    #[test]
    fn stuck_in_use_bit_is_busy() {
        let (g, regs) = girq_with(1);
        let platform = SimPlatform::new();
        regs.set(girq::IN_USE, girq::IN_USE_BIT);

        let err = g.set_line(&platform, 3, true).unwrap_err();
        assert!(matches!(err, ChamError::GirqBusy { .. }));
        assert_eq!(regs.get(girq::IRQ_EN), 0);
    }

    #[test]
    fn in_use_bit_released_after_write() {
        let (g, regs) = girq_with(1);
        let platform = SimPlatform::new();

        g.set_line(&platform, 40, true).unwrap();
        assert_eq!(regs.get(girq::IRQ_EN + girq::UPPER_WORD), 1 << 8);
        assert_eq!(regs.get(girq::IN_USE), girq::IN_USE_BIT);
    }
}
