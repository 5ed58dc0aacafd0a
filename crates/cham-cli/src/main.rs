//! `cham`: command-line interface for chameleon FPGA boards.
//!
//! ```text
//! USAGE:
//!   cham descriptor <file>                 Parse a descriptor, show the board config
//!   cham pci-path [--domain D] <hop>...    Resolve a PCI bridge chain on this host
//!   cham simulate <file> [--irq SLOT]      Run a descriptor against the simulated FPGA
//! ```

use anyhow::{Context, Result};
use cham_chip::devid::dev_id_to_name;
use cham_driver::config::EnumerationMode;
use cham_driver::sim::{
    girq_registers, walkthrough_table, SimPlatform, SimTableProvider, WALKTHROUGH_GIRQ_ADDR,
};
use cham_driver::{AddrSpace, Board, BoardConfig, BoardLocation, Descriptor, LinuxPlatform, SlotState};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cham", about = "Chameleon FPGA board tool", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Parse a board descriptor and show the resulting configuration.
    Descriptor {
        /// Descriptor file.
        file: PathBuf,
    },
    /// Resolve a PCI_BUS_PATH against this host's PCI topology.
    PciPath {
        /// PCI domain.
        #[arg(long, default_value_t = 0)]
        domain: u16,
        /// Path bytes, one per bridge (e.g. 0x1c 0x00).
        #[arg(required = true, value_parser = parse_byte)]
        hops: Vec<u8>,
    },
    /// Enumerate the simulated 15-unit FPGA with a descriptor.
    ///
    /// The descriptor must locate the FPGA by PCI_BUS_NUMBER or DEVICE_ADDR.
    Simulate {
        /// Descriptor file.
        file: PathBuf,
        /// Enable the interrupt of this slot afterwards.
        #[arg(long)]
        irq: Option<usize>,
    },
}

fn parse_byte(s: &str) -> std::result::Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{s:?}: {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Descriptor { file } => cmd_descriptor(&file)?,
        Cmd::PciPath { domain, hops } => cmd_pci_path(domain, &hops)?,
        Cmd::Simulate { file, irq } => cmd_simulate(&file, irq)?,
    }

    Ok(())
}

fn load(file: &Path) -> Result<Descriptor> {
    Descriptor::from_file(file).with_context(|| format!("reading {}", file.display()))
}

fn print_config(cfg: &BoardConfig) {
    match &cfg.location {
        BoardLocation::Pci(addr) => {
            println!("Location     : PCI {addr}, irq from {:?}", cfg.irq_source);
        }
        BoardLocation::Direct(d) => println!(
            "Location     : {:#x} ({}), irq {:?}",
            d.addr, d.space, d.irq
        ),
    }
    println!("Debug level  : {:#x}", cfg.debug_level);
    match &cfg.mode {
        EnumerationMode::Automatic(ex) => {
            println!("Enumeration  : automatic, excluding {:04x?}", ex.ids());
        }
        EnumerationMode::Manual(layout) => {
            println!("Enumeration  : manual, {} slots", layout.declared());
            for (slot, request) in layout.iter() {
                println!("  [{slot:3}] {request:?}");
            }
        }
    }
}

fn cmd_descriptor(file: &Path) -> Result<()> {
    let desc = load(file)?;

    println!("Descriptor   : {}", desc.name().unwrap_or("<unnamed>"));
    for (key, value) in desc.iter() {
        println!("  {key:<28} {value}");
    }
    println!();

    let platform = LinuxPlatform::new();
    let cfg = BoardConfig::load(&desc, &platform).context("loading board configuration")?;
    print_config(&cfg);
    Ok(())
}

fn cmd_pci_path(domain: u16, hops: &[u8]) -> Result<()> {
    let platform = LinuxPlatform::new();
    let bus = cham_driver::pci_path::resolve_bus(&platform, domain, hops)?;
    println!("{domain:04x}: path {hops:02x?} -> bus {bus:#04x}");
    Ok(())
}

fn cmd_simulate(file: &Path, irq: Option<usize>) -> Result<()> {
    let desc = load(file)?;

    let mut platform = SimPlatform::new();
    platform.add_registers(WALKTHROUGH_GIRQ_ADDR, girq_registers(1));

    let cfg = BoardConfig::load(&desc, &platform).context("loading board configuration")?;
    print_config(&cfg);

    let mut tables = SimTableProvider::new();
    match &cfg.location {
        BoardLocation::Pci(addr) => tables.add_pci(*addr, AddrSpace::Mem, walkthrough_table()),
        BoardLocation::Direct(d) => tables.add_direct(d.addr, d.space, walkthrough_table()),
    };

    let mut board = Board::new(cfg, Arc::new(platform), Arc::new(tables));
    board.init()?;

    let report = board.report();
    println!();
    println!(
        "Slots        : {} assigned, {} excluded, {} dropped, unresolved {:?}",
        report.assigned, report.excluded, report.dropped, report.unresolved
    );

    for (slot, state) in board.slots().occupied() {
        match state {
            SlotState::Single(unit) => {
                let (addr, size) = board.module_address(slot, 0)?;
                println!(
                    "  [{slot:3}] {:<16} inst {:<2} {addr:#010x} +{size:#x}",
                    dev_id_to_name(unit.dev_id).unwrap_or("?"),
                    unit.instance
                );
            }
            SlotState::Group(group) => {
                println!("  [{slot:3}] group {}", group.id());
                for (m, unit) in group.members().iter().enumerate() {
                    println!(
                        "        .{m} {:<16} inst {:<2} {:#010x} +{:#x}",
                        dev_id_to_name(unit.dev_id).unwrap_or("?"),
                        unit.instance,
                        unit.addr,
                        unit.effective_size()
                    );
                }
            }
            SlotState::Empty => {}
        }
    }

    if let Some(slot) = irq {
        board.irq_enable(slot, true)?;
        if let Some(girq) = board.girq() {
            println!();
            println!("GIRQ enable  : {:#018x}", girq.enable_mask());
        }
    }

    board.exit()?;
    Ok(())
}
