// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::fw::{Command, FwAbi};
use aal::{AsicError, HwTimestampOps, IoctlCmd, TxType};
use bksync::ioctl::JR2_CONFIG_WORDS;
use bksync::{InitData, SubsystemConfig};
use pretty_assertions::assert_eq;

use super::common::Switch;

#[test]
fn test_init_through_ioctl() {
    let sw = Switch::new(FwAbi::Legacy, 1);
    assert!(matches!(
        sw.sub.ioctl(0, IoctlCmd::Version, &[]),
        Err(AsicError::NotFound(_))
    ));
    assert!(matches!(
        sw.sub.ioctl(0, IoctlCmd::HwInit, &[0, 0, 0]),
        Err(AsicError::InvalidArg(_))
    ));

    let init = InitData {
        pci_cos: 2,
        ..sw.init_data(0)
    };
    sw.sub.ioctl(0, IoctlCmd::HwInit, &init.to_words()).unwrap();
    let dev = sw.sub.device(0).unwrap();
    assert!(dev.is_initialized());
    assert_eq!(dev.init_data(), init);
    assert!(sw.sub.ioctl(0, IoctlCmd::Version, &[]).unwrap().is_empty());

    sw.sub.ioctl(0, IoctlCmd::HwDeinit, &[]).unwrap();
    assert!(!dev.is_initialized());
    assert!(matches!(
        sw.sub.ioctl(1, IoctlCmd::Version, &[]),
        Err(AsicError::NotFound(_))
    ));
}

#[test]
fn test_broadsync() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let ioctl = |cmd, data: &[i32]| sw.sub.ioctl(0, cmd, data);

    ioctl(IoctlCmd::BsConfigSet, &[1, 0, 10_000_000, 4000]).unwrap();
    let word = sw.hdl.firmware_state(0).unwrap().broadsync[1];
    assert_eq!(word, 1 | 4000 << 16 | 10_000_000 << 32);

    assert_eq!(ioctl(IoctlCmd::BsStatus, &[1]).unwrap(), vec![1, 0x20, 1]);

    ioctl(IoctlCmd::BsPhaseOffsetSet, &[1, 1, 0, 2, 500]).unwrap();
    let offset = sw.hdl.firmware_state(0).unwrap().bs_phase_offset[1];
    assert_eq!(offset as i64, -2_000_000_500);

    ioctl(IoctlCmd::BsConfigClear, &[1]).unwrap();
    assert_eq!(sw.hdl.firmware_state(0).unwrap().broadsync[1] & 1, 0);
    assert_eq!(ioctl(IoctlCmd::BsStatus, &[1]).unwrap(), vec![1, 0x20, 0]);

    assert!(ioctl(IoctlCmd::BsConfigSet, &[2, 0, 0, 0]).is_err());
    assert!(ioctl(IoctlCmd::BsStatus, &[]).is_err());
}

#[test]
fn test_gpio() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let ioctl = |cmd, data: &[i32]| sw.sub.ioctl(0, cmd, data);

    ioctl(IoctlCmd::GpioConfigSet, &[2, 1, 1, 1000, -40]).unwrap();
    let fw = sw.hdl.firmware_state(0).unwrap();
    assert_eq!(fw.gpio[2], 1 | 1 << 8 | 1000 << 16);
    assert_eq!(fw.gpio_phase_offset[2] as i64, -40);
    assert_eq!(
        ioctl(IoctlCmd::GpioConfigGet, &[2]).unwrap(),
        vec![2, 1, 1000, -40]
    );

    // An unchanged phase offset is not sent again.
    sw.hdl.clear_commands(0).unwrap();
    ioctl(IoctlCmd::GpioConfigSet, &[2, 0, 1, 1000, -40]).unwrap();
    let cmds: Vec<Command> =
        sw.hdl.commands(0).unwrap().iter().map(|c| c.cmd).collect();
    assert_eq!(cmds, vec![Command::Gpio]);
    assert!(ioctl(IoctlCmd::GpioConfigGet, &[6]).is_err());
}

#[test]
fn test_mirror_encap() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let ioctl = |cmd, data: &[i32]| sw.sub.ioctl(0, cmd, data);

    ioctl(IoctlCmd::MtpTsUpdateEnable, &[3]).unwrap();
    ioctl(IoctlCmd::MtpTsUpdateEnable, &[8]).unwrap();
    assert_eq!(sw.sub.mtp_bitmap(), 1 << 3 | 1 << 8);
    assert_eq!(sw.hdl.firmware_state(0).unwrap().mtp_bitmap, 1 << 3 | 1 << 8);

    ioctl(IoctlCmd::MtpTsUpdateDisable, &[3]).unwrap();
    assert_eq!(sw.sub.mtp_bitmap(), 1 << 8);

    sw.hdl.clear_commands(0).unwrap();
    assert!(matches!(
        ioctl(IoctlCmd::MtpTsUpdateDisable, &[3]),
        Err(AsicError::InvalidArg(_))
    ));
    assert!(matches!(
        ioctl(IoctlCmd::MtpTsUpdateEnable, &[9]),
        Err(AsicError::InvalidArg(_))
    ));
    assert!(sw.hdl.commands(0).unwrap().is_empty());
    assert_eq!(sw.sub.mtp_bitmap(), 1 << 8);
}

#[test]
fn test_port_disable() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    sw.sub.hw_tstamp_enable(0, 9, TxType::On).unwrap();
    sw.sub.ioctl(0, IoctlCmd::HwTsDisable, &[9]).unwrap();
    assert!(!sw.sub.device(0).unwrap().twostep_enabled(9));
}

#[test]
fn test_system_header_config() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let words = vec![0; JR2_CONFIG_WORDS];
    sw.sub.ioctl(0, IoctlCmd::DnxJr2devsSysConfig, &words).unwrap();
    assert!(sw
        .sub
        .ioctl(0, IoctlCmd::DnxJr2devsSysConfig, &words[..4])
        .is_err());
}

#[test]
fn test_time_of_day() -> anyhow::Result<()> {
    let sw = Switch::new(FwAbi::Edk, 1).up();
    let ioctl = |cmd, data: &[i32]| sw.sub.ioctl(0, cmd, data);

    ioctl(IoctlCmd::PtpTodOffsetSet, &[1, 0, 5, 100])?;
    assert_eq!(sw.hdl.firmware_state(0)?.ptp_tod, (1 << 47 | 5, 100));
    assert_eq!(ioctl(IoctlCmd::PtpTodOffsetGet, &[])?, vec![1, 0, 5, 100]);
    assert_eq!(ioctl(IoctlCmd::PtpTodGet, &[])?.len(), 3);

    ioctl(IoctlCmd::NtpTodOffsetSet, &[0, 1000])?;
    assert_eq!(sw.hdl.firmware_state(0)?.ntp_tod, (0, 1000));
    assert_eq!(ioctl(IoctlCmd::NtpTodOffsetGet, &[])?, vec![0, 1000]);
    let now = ioctl(IoctlCmd::NtpTodGet, &[])?;
    assert!(now[1] >= 1000);

    ioctl(IoctlCmd::LeapSecSet, &[1, 1])?;
    assert_eq!(sw.hdl.firmware_state(0)?.ntp_tod, (0b11, 0));
    assert_eq!(ioctl(IoctlCmd::LeapSecGet, &[])?, vec![1, 1]);
    // The epoch survives a leap second request.
    assert_eq!(ioctl(IoctlCmd::NtpTodOffsetGet, &[])?, vec![0, 1000]);
    Ok(())
}

#[test]
fn test_time_of_day_needs_edk() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    assert!(matches!(
        sw.sub.ioctl(0, IoctlCmd::PtpTodGet, &[]),
        Err(AsicError::OperationUnsupported)
    ));
}

#[test]
fn test_time_of_day_on_master() {
    let sw = Switch::with_config(
        SubsystemConfig {
            fw_abi: FwAbi::Edk,
            master_core: 1,
            ..Default::default()
        },
        2,
    )
    .up();
    sw.hdl.clear_commands(1).unwrap();
    sw.sub
        .ioctl(0, IoctlCmd::PtpTodOffsetSet, &[0, 0, 1, 0])
        .unwrap();
    assert_eq!(sw.hdl.firmware_state(1).unwrap().ptp_tod, (1, 0));
    assert_eq!(sw.hdl.firmware_state(0).unwrap().ptp_tod, (0, 0));
}
