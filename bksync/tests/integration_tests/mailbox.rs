// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::time::{Duration, Instant};

use aal::fw::{self, Command, FwAbi, SysInfo};
use aal::{AsicError, Platform};
use asic::sim::{Handle, SimConfig, SimDeviceConfig};
use bksync::{DcbType, DeviceConfig, InitData, Subsystem, SubsystemConfig};

use super::common::{log, Switch};

#[test]
fn test_gettime_timeout() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let phc = sw.sub.phc(0).unwrap();
    sw.hdl.set_firmware_paused(0, true).unwrap();

    let start = Instant::now();
    let err = phc.gettime().unwrap_err();
    assert!(matches!(err, AsicError::MailboxTimeout { .. }));
    // 2000 polls 100us apart.
    assert!(start.elapsed() >= Duration::from_millis(200));
    let dev = sw.sub.device(0).unwrap();
    assert_eq!(dev.timeouts(Command::GetTime), 1);
    assert_eq!(dev.timeouts(Command::SetTime), 0);

    // The device stays usable once the firmware comes back.
    sw.hdl.set_firmware_paused(0, false).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    phc.gettime().unwrap();
    assert_eq!(dev.timeouts(Command::GetTime), 1);
}

#[test]
fn test_firmware_not_ready() {
    let sim = SimConfig {
        devices: vec![SimDeviceConfig {
            ready: false,
            ..Default::default()
        }],
        ..Default::default()
    };
    let hdl = Handle::new(&log(), &sim).unwrap();
    let sub = Subsystem::new(&log(), SubsystemConfig::default(), &hdl).unwrap();

    let err = sub.hw_init(0, InitData::default()).unwrap_err();
    assert!(matches!(err, AsicError::FirmwareNotReady(0)));
    assert!(!sub.device(0).unwrap().is_initialized());
    assert!(hdl.commands(0).unwrap().is_empty());
}

#[test]
fn test_bring_up_and_down() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let dev = sw.sub.device(0).unwrap();
    assert!(dev.is_initialized());
    assert!(sw.hdl.firmware_state(0).unwrap().initialized);

    let regs = sw.hdl.registers(0).unwrap();
    let base = fw::regs::cmc_base(true, 0);
    let msg = |n| regs.read32(fw::regs::msg(base, n)).unwrap();
    assert_eq!(msg(fw::regs::MSG_ENDIAN_COS), fw::regs::endian_cos(0));
    assert_eq!(msg(fw::regs::MSG_HOST_READY_0), 1);
    assert_eq!(msg(fw::regs::MSG_HOST_READY_1), 1);

    // A second bring-up changes nothing.
    sw.hdl.clear_commands(0).unwrap();
    sw.sub.hw_init(0, InitData::default()).unwrap();
    assert!(sw.hdl.commands(0).unwrap().is_empty());

    sw.sub.hw_deinit(0).unwrap();
    assert!(!dev.is_initialized());
    assert!(!sw.hdl.firmware_state(0).unwrap().initialized);
    assert_eq!(msg(fw::regs::MSG_HOST_READY_0), 0);
    assert!(matches!(
        sw.sub.phc(0).unwrap().gettime(),
        Err(AsicError::Uninitialized(_))
    ));
}

#[test]
fn test_bad_core_rejected() {
    let sw = Switch::new(FwAbi::Legacy, 1);
    let init = InitData {
        fw_core: 5,
        ..Default::default()
    };
    assert!(matches!(sw.sub.hw_init(0, init), Err(AsicError::InvalidArg(_))));
}

#[test]
fn test_dnx_sends_sysinfo() {
    let sim = SimConfig::default();
    let hdl = Handle::new(&log(), &sim).unwrap();
    let config = SubsystemConfig {
        devices: vec![DeviceConfig {
            dev_id: 0x8690,
            dcb_type: DcbType::Dcb39,
        }],
        ..Default::default()
    };
    let sub = Subsystem::new(&log(), config, &hdl).unwrap();
    let init = InitData {
        uc_port_num: 1,
        uc_sysport: 2,
        host_cpu_port: 3,
        host_cpu_sysport: 4,
        udh_len: 5,
        ..Default::default()
    };
    sub.hw_init(0, init).unwrap();

    let sysinfo = hdl.firmware_state(0).unwrap().sysinfo;
    assert_eq!(sysinfo.get(&(SysInfo::UcPortNum as u64)), Some(&1));
    assert_eq!(sysinfo.get(&(SysInfo::UdhLen as u64)), Some(&5));
    assert_eq!(sysinfo.len(), 5);
}

#[test]
fn test_edk_mailbox() {
    let sw = Switch::new(FwAbi::Edk, 1).up();
    let phc = sw.sub.phc(0).unwrap();
    phc.adjtime(1_000_000_000).unwrap();
    let now = phc.gettime().unwrap();
    assert!(now.sec >= 1);

    let cmds: Vec<Command> =
        sw.hdl.commands(0).unwrap().iter().map(|c| c.cmd).collect();
    assert_eq!(cmds, vec![Command::Init, Command::AdjTime, Command::GetTime]);
}

#[test]
fn test_edk_needs_command_block() {
    let sw = Switch::new(FwAbi::Edk, 1);
    let init = InitData {
        fw_comm_phys: 0x1234,
        ..Default::default()
    };
    assert!(matches!(sw.sub.hw_init(0, init), Err(AsicError::Resource(_))));
}

// Callers on different threads share one device.  The firmware must see
// every command exactly once with its own arguments, which cannot hold if
// two exchanges interleave their register writes.
#[test]
fn test_concurrent_commands_serialised() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    sw.hdl.clear_commands(0).unwrap();

    let callers: Vec<_> = (0..4i64)
        .map(|t| {
            let sub = sw.sub.clone();
            std::thread::spawn(move || {
                let phc = sub.phc(0).unwrap();
                for i in 0..25i64 {
                    phc.adjtime(t * 1000 + i + 1).unwrap();
                }
            })
        })
        .collect();
    for c in callers {
        c.join().unwrap();
    }

    let mut seen: Vec<i64> = sw
        .hdl
        .commands(0)
        .unwrap()
        .iter()
        .filter(|c| c.cmd == Command::AdjTime)
        .map(|c| c.arg1 as i64)
        .collect();
    seen.sort_unstable();
    let mut sent: Vec<i64> = (0..4i64)
        .flat_map(|t| (0..25i64).map(move |i| t * 1000 + i + 1))
        .collect();
    sent.sort_unstable();
    assert_eq!(seen, sent);
}
