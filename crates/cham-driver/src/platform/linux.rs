//! Linux host platform
//!
//! - Config space: `/sys/bus/pci/devices/<addr>/config`
//! - Mechanical slots: `/sys/bus/pci/slots/<n>/address`
//! - Memory windows: `/dev/mem`, mapped with `rustix`
//! - I/O-port windows: `/dev/port`, accessed with `pread`/`pwrite`
//!
//! An access outside a window never touches the device: reads return
//! all-ones and writes are dropped, both logged at error level.

use super::{AccessWidth, AddrSpace, BusType, PciAddress, Platform, RegisterBlock};
use crate::error::{ChamError, Result};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::time::{Duration, Instant};

const SYSFS_PCI: &str = "/sys/bus/pci";
const DEV_MEM: &str = "/dev/mem";
const DEV_PORT: &str = "/dev/port";

/// Size of the x86 I/O port space
pub const PORT_SPACE_SIZE: u64 = 0x1_0000;

/// Platform backed by sysfs, `/dev/mem` and `/dev/port`
#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    sysfs_root: PathBuf,
    mem_device: PathBuf,
    port_device: PathBuf,
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxPlatform {
    /// Platform using the live system paths
    #[must_use]
    pub fn new() -> Self {
        Self::with_sysfs_root(SYSFS_PCI)
    }

    /// Platform reading config space below another sysfs root
    ///
    /// Used to run against a captured sysfs tree.
    #[must_use]
    pub fn with_sysfs_root(root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: root.into(),
            mem_device: PathBuf::from(DEV_MEM),
            port_device: PathBuf::from(DEV_PORT),
        }
    }

    /// Use another device file for I/O-port windows
    #[must_use]
    pub fn with_port_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.port_device = path.into();
        self
    }

    fn config_path(&self, addr: PciAddress) -> PathBuf {
        self.sysfs_root
            .join("devices")
            .join(addr.to_string())
            .join("config")
    }

    fn slots_dir(&self) -> PathBuf {
        self.sysfs_root.join("slots")
    }
}

/// Parse a sysfs slot address (`"0000:03:0a"`) into (bus, device)
fn parse_slot_address(text: &str) -> Option<(u8, u8)> {
    let mut parts = text.trim().rsplit(':');
    let device = u8::from_str_radix(parts.next()?, 16).ok()?;
    let bus = u8::from_str_radix(parts.next()?, 16).ok()?;
    Some((bus, device))
}

impl Platform for LinuxPlatform {
    fn pci_config_read(&self, addr: PciAddress, register: u16, width: AccessWidth) -> Result<u32> {
        let path = self.config_path(addr);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::trace!("No function at {addr}");
                return Ok(width.all_ones());
            }
            Err(e) => return Err(e.into()),
        };

        let mut buf = [0u8; 4];
        let bytes = &mut buf[..width.bytes()];
        file.read_exact_at(bytes, u64::from(register))?;
        let value = u32::from_le_bytes(buf);

        tracing::trace!("cfg {addr} [{register:#04x}] = {value:#x}");
        Ok(value)
    }

    fn pci_slot_to_device(&self, bus: u8, mech_slot: u32) -> Result<u8> {
        let path = self.slots_dir().join(mech_slot.to_string()).join("address");
        let text = std::fs::read_to_string(&path).map_err(|e| {
            ChamError::platform(format!("Cannot read {}: {e}", path.display()))
        })?;

        let (slot_bus, device) = parse_slot_address(&text).ok_or_else(|| {
            ChamError::platform(format!("Malformed slot address {:?}", text.trim()))
        })?;

        if slot_bus != bus {
            tracing::warn!(
                "Mechanical slot {mech_slot} sits on bus {slot_bus:#x}, expected {bus:#x}"
            );
        }

        Ok(device)
    }

    fn map_registers(
        &self,
        phys: u64,
        size: usize,
        space: AddrSpace,
        _bus: u16,
    ) -> Result<Box<dyn RegisterBlock>> {
        match space {
            AddrSpace::Mem => Ok(Box::new(PhysWindow::new(&self.mem_device, phys, size)?)),
            AddrSpace::Io => Ok(Box::new(PortWindow::new(&self.port_device, phys, size)?)),
        }
    }

    fn delay_us(&self, us: u32) {
        let deadline = Instant::now() + Duration::from_micros(u64::from(us));
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }

    fn irq_level_to_vector(&self, _bus: BusType, level: u32) -> u32 {
        level
    }

    fn ident(&self) -> &'static str {
        "linux sysfs/devmem platform"
    }
}

/// Physical address window mapped from `/dev/mem`
#[derive(Debug)]
pub struct PhysWindow {
    base: NonNull<u8>,
    map_len: usize,
    delta: usize,
    size: usize,
    phys: u64,
    _file: File,
}

impl PhysWindow {
    /// Map `size` bytes at physical address `phys`
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::Mapping`] if the memory device cannot be opened
    /// or the mapping fails.
    pub fn new(mem_device: &Path, phys: u64, size: usize) -> Result<Self> {
        let mapping_err = |reason: String| ChamError::Mapping { phys, size, reason };

        if size == 0 {
            return Err(mapping_err("empty window".into()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(mem_device)
            .map_err(|e| mapping_err(format!("Cannot open {}: {e}", mem_device.display())))?;

        let page = rustix::param::page_size();
        let page_base = phys & !(page as u64 - 1);
        let delta = usize::try_from(phys - page_base)
            .map_err(|_| mapping_err("page offset overflow".into()))?;
        let map_len = (delta + size).next_multiple_of(page);

        // SAFETY: mmap preconditions:
        // - fd is valid (just opened, kept alive in the struct)
        // - length is non-zero and page aligned
        // - offset is page aligned (page_base)
        // - MAP_SHARED so writes reach the device
        // The region is unmapped exactly once in Drop.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                map_len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                page_base,
            )
        }
        .map_err(|e| mapping_err(format!("mmap failed: {e}")))?;

        let base = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| mapping_err("mmap returned null".into()))?;

        tracing::debug!("Mapped phys {phys:#x} (+{size:#x}) at {base:p}");

        Ok(Self {
            base,
            map_len,
            delta,
            size,
            phys,
            _file: file,
        })
    }

    /// Physical address of the window start
    #[must_use]
    pub const fn phys(&self) -> u64 {
        self.phys
    }

    /// Usable window size in bytes
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Pointer to the register at `offset`, `None` outside the window
    #[allow(clippy::cast_ptr_alignment)]
    fn register_ptr(&self, offset: usize) -> Option<*mut u32> {
        match offset.checked_add(4) {
            Some(end) if end <= self.size => {
                // SAFETY: delta + offset + 4 <= delta + size <= map_len, so
                // the pointer stays inside the mapping.
                Some(unsafe { self.base.as_ptr().add(self.delta + offset).cast::<u32>() })
            }
            _ => {
                tracing::error!(
                    "Register offset {offset:#x} outside window {:#x} (+{:#x})",
                    self.phys,
                    self.size
                );
                None
            }
        }
    }
}

impl RegisterBlock for PhysWindow {
    fn read32(&self, offset: usize) -> u32 {
        let Some(ptr) = self.register_ptr(offset) else {
            return u32::MAX;
        };
        // SAFETY: in-bounds (checked in register_ptr); chameleon registers
        // are 32-bit aligned; volatile so the access is never elided.
        unsafe { ptr.read_volatile() }
    }

    fn write32(&self, offset: usize, value: u32) {
        let Some(ptr) = self.register_ptr(offset) else {
            return;
        };
        // SAFETY: see read32.
        unsafe { ptr.write_volatile(value) }
    }
}

impl Drop for PhysWindow {
    fn drop(&mut self) {
        tracing::debug!("Unmapping phys {:#x} (+{:#x})", self.phys, self.size);

        // SAFETY: base/map_len are exactly what mmap returned and took in
        // new(); Drop runs once, so the region is still mapped.
        unsafe {
            if let Err(e) = munmap(self.base.as_ptr().cast(), self.map_len) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: the mapping is owned by this struct alone and stays valid until
// Drop. Moving it to another thread does not invalidate it.
unsafe impl Send for PhysWindow {}

// SAFETY: every access is a bounds-checked volatile 32-bit load or store.
// Serialising read-modify-write sequences is the caller's job (the GIRQ
// keeps the window behind a lock).
unsafe impl Sync for PhysWindow {}

/// I/O-port window accessed through `/dev/port`
///
/// The device file performs one port access per byte, so a 32-bit
/// register is read or written as four consecutive byte ports.
#[derive(Debug)]
pub struct PortWindow {
    file: File,
    base: u64,
    size: usize,
}

impl PortWindow {
    /// Open `size` bytes of port space starting at port `base`
    ///
    /// # Errors
    ///
    /// Returns [`ChamError::Mapping`] if the window is empty, leaves the
    /// 64 KiB port space, or the port device cannot be opened.
    pub fn new(port_device: &Path, base: u64, size: usize) -> Result<Self> {
        let mapping_err = |reason: String| ChamError::Mapping {
            phys: base,
            size,
            reason,
        };

        if size == 0 {
            return Err(mapping_err("empty window".into()));
        }
        let end = u64::try_from(size)
            .ok()
            .and_then(|s| base.checked_add(s))
            .filter(|&end| end <= PORT_SPACE_SIZE)
            .ok_or_else(|| mapping_err("window leaves the I/O port space".into()))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(port_device)
            .map_err(|e| mapping_err(format!("Cannot open {}: {e}", port_device.display())))?;

        tracing::debug!("Opened ports {base:#x}..{end:#x} via {}", port_device.display());
        Ok(Self { file, base, size })
    }

    /// First port of the window
    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Window size in bytes
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    fn port(&self, offset: usize) -> Option<u64> {
        match offset.checked_add(4) {
            Some(end) if end <= self.size => Some(self.base + offset as u64),
            _ => {
                tracing::error!(
                    "Register offset {offset:#x} outside ports {:#x} (+{:#x})",
                    self.base,
                    self.size
                );
                None
            }
        }
    }
}

impl RegisterBlock for PortWindow {
    fn read32(&self, offset: usize) -> u32 {
        let Some(port) = self.port(offset) else {
            return u32::MAX;
        };
        let mut buf = [0u8; 4];
        match rustix::io::pread(&self.file, &mut buf, port) {
            Ok(4) => u32::from_ne_bytes(buf),
            Ok(n) => {
                tracing::error!("Short port read at {port:#x}: {n} of 4 bytes");
                u32::MAX
            }
            Err(e) => {
                tracing::error!("Port read at {port:#x} failed: {e}");
                u32::MAX
            }
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        let Some(port) = self.port(offset) else {
            return;
        };
        match rustix::io::pwrite(&self.file, &value.to_ne_bytes(), port) {
            Ok(4) => {}
            Ok(n) => tracing::error!("Short port write at {port:#x}: {n} of 4 bytes"),
            Err(e) => tracing::error!("Port write at {port:#x} failed: {e}"),
        }
    }
}
