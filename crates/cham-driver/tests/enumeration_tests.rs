//! Enumeration tests
//!
//! Automatic and manual slot assignment against the simulated FPGA

use cham_chip::devid::{dev_id, modcode};
use cham_driver::sim::{
    girq_registers, walkthrough_table, SimPlatform, SimTable, SimTableProvider,
    WALKTHROUGH_GIRQ_ADDR,
};
use cham_driver::{
    AddrSpace, Board, ChamError, ConfigInfo, ConfigQuery, Descriptor, IrqInfo, IrqMode,
    ModuleRecord, PciAddress, SlotState,
};
use std::sync::Arc;

const FPGA: PciAddress = PciAddress::new(0, 2, 0, 0);

fn base_desc() -> Descriptor {
    Descriptor::new()
        .with_u32("PCI_BUS_NUMBER", 2)
        .with_u32("PCI_DEVICE_NUMBER", 0)
}

fn board_on(desc: &Descriptor, table: SimTable) -> Board {
    let mut platform = SimPlatform::new();
    platform.add_registers(WALKTHROUGH_GIRQ_ADDR, girq_registers(0));
    let mut tables = SimTableProvider::new();
    tables.add_pci(FPGA, AddrSpace::Mem, table);
    Board::configure(desc, Arc::new(platform), Arc::new(tables)).expect("configure")
}

fn dev_ids(state: &SlotState) -> Vec<u16> {
    match state {
        SlotState::Empty => Vec::new(),
        SlotState::Single(unit) => vec![unit.dev_id],
        SlotState::Group(group) => group.members().iter().map(|u| u.dev_id).collect(),
    }
}

fn walkthrough_board(exclusions: &[u8]) -> Board {
    let desc = base_desc()
        .with_u32("AUTOENUM", 1)
        .with_binary("AUTOENUM_EXCLUDINGV2", exclusions);
    let mut board = board_on(&desc, walkthrough_table());
    board.init().expect("init");
    board
}

#[test]
fn walkthrough_exclusions_produce_expected_slots() {
    let board = walkthrough_board(&[0x23, 0x19, 0x34, 0x2C]);
    let slots = board.slots();

    assert_eq!(dev_ids(slots.get(0).unwrap()), vec![dev_id::GPIO]);
    assert_eq!(dev_ids(slots.get(1).unwrap()), vec![dev_id::CAN]);
    assert_eq!(dev_ids(slots.get(2).unwrap()), vec![dev_id::CAN]);
    assert_eq!(slots.primary(1).unwrap().instance, 0);
    assert_eq!(slots.primary(2).unwrap().instance, 1);

    assert_eq!(
        dev_ids(slots.get(3).unwrap()),
        vec![dev_id::IDE, dev_id::SDRAM, dev_id::IDETGT, dev_id::IDEDISK]
    );
    let SlotState::Group(group) = slots.get(3).unwrap() else {
        panic!("slot 3 should hold a group");
    };
    assert_eq!(group.id(), 2);
    assert!(group.members().iter().all(|u| u.group == 2));

    assert_eq!(slots.occupied_count(), 4);
    assert_eq!(board.report().assigned, 4);
}

#[test]
fn excluded_group_base_cascades_to_members() {
    let board = walkthrough_board(&[0x2C]);
    for (_, state) in board.slots().occupied() {
        if let SlotState::Group(group) = state {
            assert_ne!(group.id(), 1, "group 1 must be excluded entirely");
        }
        if let Some(unit) = state.primary() {
            assert_ne!(unit.group, 1);
        }
    }
    // SDRAM of group 2 is still present
    let sdram_in_group_2 = board.slots().occupied().any(|(_, s)| match s {
        SlotState::Group(g) => g.members().iter().any(|u| u.dev_id == dev_id::SDRAM),
        _ => false,
    });
    assert!(sdram_in_group_2);
}

#[test]
fn legacy_exclusion_codes_are_translated() {
    let desc = base_desc().with_u32("AUTOENUM", 1).with_binary(
        "AUTOENUM_EXCLUDING",
        [modcode::SYSTEM, modcode::UART, modcode::GIRQ, modcode::DISP],
    );
    let mut board = board_on(&desc, walkthrough_table());
    board.init().expect("init");
    assert_eq!(board.slots().occupied_count(), 4);
    assert_eq!(board.slots().primary(0).unwrap().dev_id, dev_id::GPIO);
}

#[test]
fn automatic_slots_follow_discovery_order_without_gaps() {
    let board = walkthrough_board(&[]);
    let occupied: Vec<usize> = board.slots().occupied().map(|(n, _)| n).collect();
    let expected: Vec<usize> = (0..occupied.len()).collect();
    assert_eq!(occupied, expected);

    // SYSTEM, UART, GPIO, CAN, CAN, 4x GIRQ, group 1, group 2
    assert_eq!(occupied.len(), 11);
    assert_eq!(board.slots().primary(0).unwrap().dev_id, dev_id::SYSTEM);
    assert_eq!(board.slots().get(9).unwrap().group_id(), 1);
    assert_eq!(board.slots().get(10).unwrap().group_id(), 2);
}

#[test]
fn group_members_keep_table_order() {
    let board = walkthrough_board(&[]);
    let SlotState::Group(group_1) = board.slots().get(9).unwrap() else {
        panic!("slot 9 should be group 1");
    };
    assert_eq!(
        group_1.members().iter().map(|u| u.dev_id).collect::<Vec<_>>(),
        vec![dev_id::DISP, dev_id::SDRAM]
    );
}

#[test]
fn slot_capacity_stops_enumeration_silently() {
    let mut table = SimTable::new("many");
    for i in 0..300u16 {
        table.push(ModuleRecord::new(dev_id::GPIO, i));
    }
    let desc = base_desc().with_u32("AUTOENUM", 1);
    let mut board = board_on(&desc, table);
    board.init().expect("init");
    assert_eq!(board.slots().occupied_count(), 256);
    assert_eq!(board.slots().primary(255).unwrap().instance, 255);
}

#[test]
fn manual_v2_instances_resolve_to_distinct_units() {
    let mut table = SimTable::new("gpio");
    table.push(ModuleRecord::new(dev_id::GPIO, 0).with_bar(0, 0x000));
    table.push(ModuleRecord::new(dev_id::GPIO, 1).with_bar(0, 0x100));

    let desc = base_desc()
        .with_u32("DEVICE_IDV2_0", 0x2200)
        .with_u32("DEVICE_IDV2_1", 0x2201);
    let mut board = board_on(&desc, table);
    board.init().expect("init");

    let a = board.module_record(0, 0).expect("slot 0");
    let b = board.module_record(1, 0).expect("slot 1");
    assert_eq!((a.dev_id, a.instance), (dev_id::GPIO, 0));
    assert_eq!((b.dev_id, b.instance), (dev_id::GPIO, 1));
    assert_ne!(a.addr, b.addr);
}

#[test]
fn manual_missing_index_leaves_only_that_slot_empty() {
    let mut table = SimTable::new("can");
    table.push(ModuleRecord::new(dev_id::CAN, 0));
    table.push(ModuleRecord::new(dev_id::CAN, 1));
    table.push(ModuleRecord::new(dev_id::GPIO, 0));

    let desc = base_desc()
        .with_u32("DEVICE_ID_5", 0x0802)
        .with_u32("DEVICE_ID_1", 0x0801)
        .with_u32("DEVICE_IDV2_2", 0x2200);
    let mut board = board_on(&desc, table);
    board.init().expect("init");

    assert!(!board.slots().is_occupied(5).unwrap());
    assert!(matches!(
        board.module_address(5, 0),
        Err(ChamError::SlotEmpty { slot: 5 })
    ));
    assert_eq!(board.slots().primary(1).unwrap().instance, 1);
    assert_eq!(board.slots().primary(2).unwrap().dev_id, dev_id::GPIO);
    assert_eq!(board.report().unresolved, vec![5]);
}

#[test]
fn manual_slots_never_hold_a_different_module() {
    let desc = base_desc()
        .with_u32("DEVICE_IDV2_0", 0x1D01)
        .with_u32("DEVICE_IDV2_3", 0x2200)
        .with_u32("DEVICE_IDV2_4", 0x4D00);
    let mut board = board_on(&desc, walkthrough_table());
    board.init().expect("init");

    let declared = [(0, dev_id::CAN), (3, dev_id::GPIO), (4, dev_id::ETH)];
    for (slot, dev) in declared {
        match board.slots().get(slot).unwrap() {
            SlotState::Empty => {}
            SlotState::Single(unit) => assert_eq!(unit.dev_id, dev),
            SlotState::Group(_) => panic!("slot {slot} became a group"),
        }
    }
    assert!(!board.slots().is_occupied(4).unwrap());
}

#[test]
fn manual_group_resolves_members_in_declaration_order() {
    let desc = base_desc()
        .with_u32("GROUP_0/GROUP_ID", 2)
        .with_u32("GROUP_0/DEVICE_IDV2_0", 0x3500)
        .with_u32("GROUP_0/DEVICE_IDV2_1", 0x4600)
        .with_u32("GROUP_0/DEVICE_IDV2_2", 0x2B00);
    let mut board = board_on(&desc, walkthrough_table());
    board.init().expect("init");

    assert_eq!(
        dev_ids(board.slots().get(0).unwrap()),
        vec![dev_id::IDE, dev_id::IDEDISK, dev_id::SDRAM]
    );
    // Group-2 SDRAM, not the group-1 one
    let sdram = board.module_record(0, 2).unwrap();
    assert_eq!(sdram.group, 2);
    assert_eq!(board.module_address(0, 1).unwrap().1, 0x100);
    assert!(matches!(
        board.module_address(0, 3),
        Err(ChamError::IllegalMember { member: 3, count: 3, .. })
    ));
}

#[test]
fn manual_group_with_missing_member_is_unusable() {
    let desc = base_desc()
        .with_u32("DEVICE_IDV2_0", 0x2200)
        .with_u32("GROUP_1/GROUP_ID", 2)
        .with_u32("GROUP_1/DEVICE_IDV2_0", 0x3500)
        .with_u32("GROUP_1/DEVICE_IDV2_1", 0x3501);
    let mut board = board_on(&desc, walkthrough_table());
    board.init().expect("init");

    assert!(board.slots().is_occupied(0).unwrap());
    assert!(!board.slots().is_occupied(1).unwrap());
}

#[test]
fn reinit_reproduces_identical_mapping() {
    let desc = base_desc()
        .with_u32("DEVICE_IDV2_0", 0x2200)
        .with_u32("DEVICE_ID_1", 0x0801)
        .with_u32("GROUP_2/GROUP_ID", 2)
        .with_u32("GROUP_2/DEVICE_IDV2_0", 0x3500)
        .with_u32("GROUP_2/DEVICE_IDV2_1", 0x4400);
    let mut board = board_on(&desc, walkthrough_table());

    board.init().expect("first init");
    let first = board.slots().clone();
    board.init().expect("second init");
    assert_eq!(board.slots(), &first);
    assert_eq!(board.slots().occupied_count(), 3);

    let mut auto = walkthrough_board(&[0x23]);
    let first = auto.slots().clone();
    auto.init().expect("re-init");
    assert_eq!(auto.slots(), &first);
}

#[test]
fn table_found_in_io_space_after_memory() {
    let mut io_table = SimTable::new("io").with_bars(vec![cham_driver::table::BarInfo {
        addr: 0xE000,
        size: 0x1000,
        space: AddrSpace::Io,
    }]);
    io_table.push(ModuleRecord::new(dev_id::UART, 0).with_interrupt(6));

    let mut tables = SimTableProvider::new();
    tables.add_pci(FPGA, AddrSpace::Io, io_table);
    let desc = base_desc().with_u32("AUTOENUM", 1);
    let mut board =
        Board::configure(&desc, Arc::new(SimPlatform::new()), Arc::new(tables)).expect("configure");
    board.init().expect("init");

    assert_eq!(board.table_space(), AddrSpace::Io);
    assert_eq!(
        board.config_info(ConfigQuery::AddrSpace { slot: 0 }).unwrap(),
        ConfigInfo::AddrSpace(AddrSpace::Io)
    );
    let ConfigInfo::SlotInfo(info) = board.config_info(ConfigQuery::SlotInfo { slot: 0 }).unwrap()
    else {
        panic!("expected slot info");
    };
    assert_eq!(info.dev_name, "IO_16Z025_UART");
    assert_eq!(info.slot_name, "cham-slot 0 (is instance 0)");
}

#[test]
fn missing_table_fails_init_and_leaves_board_empty() {
    let desc = base_desc().with_u32("AUTOENUM", 1);
    let mut board = Board::configure(
        &desc,
        Arc::new(SimPlatform::new()),
        Arc::new(SimTableProvider::new()),
    )
    .expect("configure");
    let err = board.init().unwrap_err();
    assert!(err.is_table_not_found());
    assert_eq!(board.slots().occupied_count(), 0);
}

#[test]
fn group_slot_info_and_irq() {
    let board = walkthrough_board(&[0x23, 0x19, 0x34, 0x2C]);

    let ConfigInfo::SlotInfo(info) = board.config_info(ConfigQuery::SlotInfo { slot: 3 }).unwrap()
    else {
        panic!("expected slot info");
    };
    assert_eq!(info.slot_name, "cham-slot 3 (is instance 0, group 2)");
    assert_eq!(info.dev_name, "16Z053_IDE");
    assert_eq!(info.dev_id, dev_id::IDE);

    let ConfigInfo::Irq(irq) = board.config_info(ConfigQuery::Irq { slot: 3 }).unwrap() else {
        panic!("expected irq info");
    };
    assert_eq!(irq.mode, IrqMode::Shared);
    assert_eq!(irq.level, 10);

    assert_eq!(
        board.config_info(ConfigQuery::BusNumber { slot: 3 }).unwrap(),
        ConfigInfo::BusNumber(2)
    );
    assert!(matches!(
        board.config_info(ConfigQuery::Irq { slot: 300 }),
        Err(ChamError::SlotOutOfRange { .. })
    ));
}

/// Walkthrough board taking its interrupt line from the FPGA's config space
fn config_line_board(platform: SimPlatform) -> Board {
    let desc = base_desc()
        .with_u32("AUTOENUM", 1)
        .with_u32("IRQ_FROM_PCI_CONFIG", 1);
    let mut tables = SimTableProvider::new();
    tables.add_pci(FPGA, AddrSpace::Mem, walkthrough_table());
    let mut board = Board::configure(&desc, Arc::new(platform), Arc::new(tables)).expect("configure");
    board.init().expect("init");
    board
}

fn platform_with_line(line: u8) -> SimPlatform {
    let mut platform = SimPlatform::new();
    platform.add_registers(WALKTHROUGH_GIRQ_ADDR, girq_registers(0));
    platform
        .add_function(FPGA, 0x1172, 0x4d45, 0x00)
        .set_config_byte(FPGA, cham_chip::pci::INTERRUPT_LINE, line);
    platform
}

#[test]
fn irq_level_from_config_space_line() {
    let board = config_line_board(platform_with_line(0x0B));
    let expected = ConfigInfo::Irq(IrqInfo {
        vector: 0x0B + 0x20,
        level: 0x0B,
        mode: IrqMode::Shared,
    });

    // UART has table line 1, the config-space line wins
    assert_eq!(board.config_info(ConfigQuery::Irq { slot: 1 }).unwrap(), expected);
    // the table sentinel of SYSTEM is overridden as well
    assert_eq!(board.config_info(ConfigQuery::Irq { slot: 0 }).unwrap(), expected);
}

#[test]
fn config_space_line_ff_means_no_interrupt() {
    let board = config_line_board(platform_with_line(0xFF));
    assert_eq!(
        board.config_info(ConfigQuery::Irq { slot: 1 }).unwrap(),
        ConfigInfo::Irq(IrqInfo::NONE)
    );
}

#[test]
fn config_space_line_read_failure_is_reported() {
    let mut platform = platform_with_line(0x0B);
    platform.fail_config(FPGA);
    let board = config_line_board(platform);
    assert!(matches!(
        board.config_info(ConfigQuery::Irq { slot: 1 }),
        Err(ChamError::PciConfigAccess { bus: 2, register: 0x3C, .. })
    ));
}

#[test]
fn without_config_source_table_line_is_used() {
    let desc = base_desc().with_u32("AUTOENUM", 1);
    let mut tables = SimTableProvider::new();
    tables.add_pci(FPGA, AddrSpace::Mem, walkthrough_table());
    let mut board = Board::configure(&desc, Arc::new(platform_with_line(0x0B)), Arc::new(tables))
        .expect("configure");
    board.init().expect("init");

    let ConfigInfo::Irq(irq) = board.config_info(ConfigQuery::Irq { slot: 1 }).unwrap() else {
        panic!("expected irq info");
    };
    assert_eq!(irq.level, 1);
}
