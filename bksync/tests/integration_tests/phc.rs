// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use ::common::time::Timespec;
use aal::fw::{Command, FwAbi};
use aal::{AsicError, HwTimestampOps};
use bksync::extts::flags;
use bksync::{PhcRequest, SubsystemConfig, MAX_ADJ_PPB};

use super::common::Switch;

#[test]
fn test_settime_gettime() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let phc = sw.sub.phc(0).unwrap();
    let t = Timespec::new(1_700_000_000, 500);
    phc.settime(t).unwrap();
    let now = phc.gettime().unwrap();
    let delta = now.to_ns() - t.to_ns();
    assert!((0..1_000_000_000).contains(&delta), "delta {delta}");

    let (ptp, _) = sw.sub.device(0).unwrap().clock_sample();
    assert_eq!(ptp as i64, now.to_ns());
}

#[test]
fn test_frequency_bounds() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let phc = sw.sub.phc(0).unwrap();
    phc.adjfreq(MAX_ADJ_PPB).unwrap();
    assert_eq!(sw.hdl.firmware_state(0).unwrap().freq_ppb, MAX_ADJ_PPB);
    phc.adjfreq(-MAX_ADJ_PPB).unwrap();
    assert!(matches!(
        phc.adjfreq(-MAX_ADJ_PPB - 1),
        Err(AsicError::InvalidArg(_))
    ));
    assert_eq!(sw.hdl.firmware_state(0).unwrap().freq_ppb, -MAX_ADJ_PPB);

    // 1 ppm in 16-bit scaled ppm.
    phc.adjfine(65536).unwrap();
    assert_eq!(sw.hdl.firmware_state(0).unwrap().freq_ppb, 1000);
}

#[test]
fn test_enable_requests() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let phc = sw.sub.phc(0).unwrap();
    let extts = |index| PhcRequest::Extts {
        index,
        flags: flags::ENABLE | flags::RISING_EDGE,
    };
    phc.enable(extts(5), true).unwrap();
    assert!(matches!(
        phc.enable(extts(6), true),
        Err(AsicError::InvalidArg(_))
    ));
    assert!(matches!(
        phc.enable(PhcRequest::Pps, true),
        Err(AsicError::OperationUnsupported)
    ));
    assert!(matches!(
        phc.enable(
            PhcRequest::Extts {
                index: 0,
                flags: flags::ENABLE | flags::FALLING_EDGE
            },
            true
        ),
        Err(AsicError::OperationUnsupported)
    ));
}

#[test]
fn test_clock_numbering() {
    let sw = Switch::with_config(
        SubsystemConfig {
            base_dev_name: "ptp2".into(),
            ..Default::default()
        },
        2,
    );
    assert_eq!(sw.sub.phc_index_get(0).unwrap(), 2);
    assert_eq!(sw.sub.phc_index_get(1).unwrap(), 3);
    assert!(sw.sub.phc_index_get(2).is_err());
}

#[test]
fn test_shared_clock() {
    let sw = Switch::with_config(
        SubsystemConfig {
            shared_phc: true,
            master_core: 1,
            ..Default::default()
        },
        3,
    )
    .up();
    for dev_no in 0..3 {
        assert_eq!(sw.sub.phc_index_get(dev_no).unwrap(), 0);
    }
    assert!(sw.sub.device(1).unwrap().has_own_clock);
    assert!(!sw.sub.device(0).unwrap().has_own_clock);

    for dev_no in 0..3 {
        sw.hdl.clear_commands(dev_no).unwrap();
    }
    let phc = sw.sub.phc(2).unwrap();
    phc.settime(Timespec::new(100, 0)).unwrap();
    phc.adjfreq(42).unwrap();
    let cmds = |dev_no| -> Vec<Command> {
        sw.hdl.commands(dev_no).unwrap().iter().map(|c| c.cmd).collect()
    };
    assert_eq!(cmds(1), vec![Command::SetTime, Command::FreqCor]);
    assert!(cmds(0).is_empty());
    assert!(cmds(2).is_empty());

    // A non-owner reads the master's last sample without a command.
    sw.sub.phc(1).unwrap().gettime().unwrap();
    let master = sw.sub.device(1).unwrap().clock_sample();
    let t = phc.gettime().unwrap();
    assert_eq!(t.to_ns() as u64, master.0);
    assert_eq!(sw.sub.device(2).unwrap().clock_sample(), master);
    assert!(cmds(2).is_empty());
}

#[test]
fn test_time_keep_tick() {
    let sw = Switch::with_config(
        SubsystemConfig {
            shared_phc: true,
            ..Default::default()
        },
        2,
    )
    .up();
    sw.sub.time_keep_tick();
    let master = sw.sub.device(0).unwrap().clock_sample();
    assert_ne!(master.0, 0);
    assert_eq!(sw.sub.device(1).unwrap().clock_sample(), master);
}
