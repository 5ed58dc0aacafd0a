//! PCI bridge-chain resolution
//!
//! A `PCI_BUS_PATH` lists the PCI-to-PCI bridges between the root bus and
//! the FPGA, one byte per hop (device in bits 0..4, function in 5..7).
//! Walking the chain yields the bus the FPGA sits on: the secondary bus of
//! the last bridge.
//!
//! On a non-zero domain the root bus number is not known up front. The
//! first hop is then searched on every bus of that domain and the first
//! bus where a function answers is used.

use crate::error::{ChamError, Result};
use crate::platform::{AccessWidth, PciAddress, Platform};
use cham_chip::pci::{self, PathHop};

/// Header fields read from one hop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Probe {
    vendor: u32,
    device_id: u32,
    header_type: u32,
}

fn read(platform: &dyn Platform, addr: PciAddress, register: u16, width: AccessWidth) -> Result<u32> {
    platform
        .pci_config_read(addr, register, width)
        .map_err(|e| ChamError::PciConfigAccess {
            domain: addr.domain,
            bus: addr.bus,
            device: addr.device,
            function: addr.function,
            register,
            reason: e.to_string(),
        })
}

/// Read id and header type; `None` if no function answers
fn probe(platform: &dyn Platform, addr: PciAddress) -> Result<Option<Probe>> {
    let vendor = read(platform, addr, pci::VENDOR_ID, AccessWidth::Word)?;
    let device_id = read(platform, addr, pci::DEVICE_ID, AccessWidth::Word)?;
    if vendor == pci::ABSENT && device_id == pci::ABSENT {
        return Ok(None);
    }
    let header_type = read(platform, addr, pci::HEADER_TYPE, AccessWidth::Byte)?;
    Ok(Some(Probe {
        vendor,
        device_id,
        header_type,
    }))
}

/// Find the first bus of `domain` on which `hop` answers
fn search_domain(
    platform: &dyn Platform,
    domain: u16,
    hop: PathHop,
) -> Result<(PciAddress, Probe)> {
    for bus in 0..=pci::MAX_BUS {
        let addr = PciAddress::new(domain, bus, hop.device, hop.function);
        match probe(platform, addr) {
            Ok(Some(found)) => {
                tracing::debug!("domain {domain:#x}: first hop found on bus {bus:#x}");
                return Ok((addr, found));
            }
            Ok(None) => {}
            Err(e) => tracing::trace!("domain {domain:#x} bus {bus:#x}: {e}"),
        }
    }
    Err(ChamError::DeviceNotFound {
        domain,
        bus: 0,
        device: hop.device,
        function: hop.function,
    })
}

/// Resolve the bus number behind a bridge chain
///
/// An empty path resolves to bus 0.
///
/// # Errors
///
/// - [`ChamError::DeviceNotFound`] if no function answers at a hop
/// - [`ChamError::NotABridge`] if a hop is not a PCI-to-PCI bridge
/// - [`ChamError::PciConfigAccess`] if a config read fails
pub fn resolve_bus(platform: &dyn Platform, domain: u16, path: &[u8]) -> Result<u8> {
    let mut bus = 0u8;

    for (i, &byte) in path.iter().enumerate() {
        let hop = PathHop::from_byte(byte);

        let (addr, found) = if i == 0 && domain != 0 {
            search_domain(platform, domain, hop)?
        } else {
            let addr = PciAddress::new(domain, bus, hop.device, hop.function);
            let found = probe(platform, addr)?.ok_or(ChamError::DeviceNotFound {
                domain,
                bus,
                device: hop.device,
                function: hop.function,
            })?;
            (addr, found)
        };

        if !pci::is_bridge(found.header_type) {
            return Err(ChamError::NotABridge {
                domain,
                bus: addr.bus,
                device: addr.device,
                function: addr.function,
                vendor: found.vendor,
                device_id: found.device_id,
                header_type: found.header_type,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let secondary = read(platform, addr, pci::SECONDARY_BUS, AccessWidth::Byte)? as u8;
        bus = secondary;

        tracing::debug!(
            "hop {i}: {addr} vendor={:#06x} device={:#06x} -> bus {bus:#x}",
            found.vendor,
            found.device_id
        );
    }

    tracing::info!("FPGA bus number {bus:#x}");
    Ok(bus)
}
