// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::fw::{Command, FwAbi};
use aal::AsicError;
use bksync::attrs::{Attr, AttrSetting};
use bksync::configure::GpioConfig;
use common::time::{FwTime, TimeOffset};
use pretty_assertions::assert_eq;

use super::common::Switch;

fn attr(name: &str) -> Attr {
    name.parse().unwrap()
}

#[test]
fn test_broadsync_attr() {
    let sw = Switch::new(FwAbi::Legacy, 2).up();
    let bs = attr("bs2");

    assert_eq!(
        sw.sub.attr_show(bs).unwrap(),
        "enable:0 mode:0 bc:0 hb:0 sign:0 offset:0.0 status:0(0)\n"
    );

    sw.sub
        .attr_store(bs, "enable:1 mode:0 bc:10000000 hb:4000 sign:1 offset:3.250")
        .unwrap();
    assert_eq!(
        sw.sub.attr_show(bs).unwrap(),
        "enable:1 mode:0 bc:10000000 hb:4000 sign:1 offset:3.250 status:1(32)\n"
    );
    let fw = sw.hdl.firmware_state(1).unwrap();
    assert_eq!(fw.broadsync[0], 1 | 4000 << 16 | 10_000_000 << 32);
    assert_eq!(fw.bs_phase_offset[0] as i64, -3_000_000_250);
    assert_eq!(sw.hdl.firmware_state(0).unwrap().broadsync[0], 0);

    // Fields left out keep their values.
    sw.sub.attr_store(bs, "enable:0").unwrap();
    assert_eq!(
        sw.sub.attr_show(bs).unwrap(),
        "enable:0 mode:0 bc:10000000 hb:4000 sign:1 offset:3.250 status:0(0)\n"
    );

    // Output mode drops the phase offset.
    sw.sub.attr_store(bs, "enable:1 mode:1").unwrap();
    assert!(sw.sub.attr_show(bs).unwrap().contains("sign:0 offset:0.0"));
}

#[test]
fn test_gpio_attr() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let gpio = attr("gpio4");

    sw.sub
        .attr_store(gpio, "enable:1 mode:1 period:1000000 phaseoffset:-200")
        .unwrap();
    assert_eq!(
        sw.sub.attr_show(gpio).unwrap(),
        "enable:1 mode:1 period:1000000 phaseoffset:-200\n"
    );
    let fw = sw.hdl.firmware_state(0).unwrap();
    assert_eq!(fw.gpio[4], 1 | 1 << 8 | 1_000_000 << 16);
    assert_eq!(fw.gpio_phase_offset[4] as i64, -200);
}

#[test]
fn test_event_log() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let bs0 = attr("evlog/bs0");

    sw.sub.attr_store(bs0, "enable:1").unwrap();
    assert!(sw.sub.device(0).unwrap().evlog_enabled(1));
    assert_ne!(sw.hdl.firmware_state(0).unwrap().evlog[&1], 0);

    assert!(sw
        .hdl
        .record_evlog(0, 1, FwTime::new(10, 5), FwTime::new(11, 7))
        .unwrap());
    assert_eq!(
        sw.sub.attr_show(bs0).unwrap(),
        "enable:1 Previous Time:10.000000005 Latest Time:11.000000007\n"
    );
    // Records are cleared once read.
    assert_eq!(
        sw.sub.attr_show(bs0).unwrap(),
        "enable:1 Previous Time:0.000000000 Latest Time:0.000000000\n"
    );

    sw.sub.attr_store(bs0, "enable:0").unwrap();
    assert_eq!(sw.hdl.firmware_state(0).unwrap().evlog[&1], 0);
}

#[test]
fn test_time_of_day_attrs() {
    let sw = Switch::new(FwAbi::Edk, 1).up();

    sw.sub
        .attr_store(Attr::PtpTod, "sign:0 offset_sec:37 offset_nsec:12")
        .unwrap();
    assert_eq!(sw.hdl.firmware_state(0).unwrap().ptp_tod, (37, 12));
    let shown = sw.sub.attr_show(Attr::PtpTod).unwrap();
    assert!(shown.starts_with("sign:0 offset_sec:37 offset_nsec:12 ptp_tod:"));

    sw.sub.attr_store(Attr::NtpTod, "epoch_offset:2208988800").unwrap();
    assert_eq!(sw.hdl.firmware_state(0).unwrap().ntp_tod, (0, 2208988800));

    // A leap second request leaves the epoch alone.
    sw.sub
        .attr_store(Attr::NtpTod, "leap_sec_ctrl_en:1 leap_sec_op:0")
        .unwrap();
    let tod = sw.sub.device(0).unwrap().ntp_tod();
    assert!(tod.leap_sec_ctrl_en);
    assert_eq!(tod.epoch_offset, 2208988800);
    assert!(sw
        .sub
        .attr_show(Attr::NtpTod)
        .unwrap()
        .starts_with("leap_sec_ctrl_en:1 leap_sec_op:0 epoch_offset:2208988800 ntp_tod:"));
}

// A write the firmware never answers must not show up in later reads.
#[test]
fn test_failed_write_keeps_shadow() {
    let sw = Switch::new(FwAbi::Edk, 1).up();
    let dev = sw.sub.device(0).unwrap();
    let bs = attr("bs0");
    sw.sub.attr_store(bs, "enable:1 mode:0 bc:10000000 hb:4000").unwrap();
    let bs_before = dev.broadsync(0).unwrap();

    sw.hdl.set_command_ignored(0, Command::BroadSync, true).unwrap();
    assert!(matches!(
        sw.sub.attr_store(bs, "enable:0 bc:5"),
        Err(AsicError::MailboxTimeout { .. })
    ));
    assert_eq!(dev.broadsync(0).unwrap(), bs_before);

    sw.hdl.set_command_ignored(0, Command::Gpio, true).unwrap();
    assert!(sw
        .sub
        .attr_store(attr("gpio1"), "enable:1 mode:1 period:500 phaseoffset:7")
        .is_err());
    assert_eq!(dev.gpio(1).unwrap(), GpioConfig::default());

    sw.hdl.set_command_ignored(0, Command::PtpTod, true).unwrap();
    assert!(sw
        .sub
        .attr_store(Attr::PtpTod, "sign:1 offset_sec:37 offset_nsec:12")
        .is_err());
    assert_eq!(dev.ptp_tod_offset(), TimeOffset::default());
    assert_eq!(sw.hdl.firmware_state(0).unwrap().ptp_tod, (0, 0));
}

#[test]
fn test_apply_settings() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let settings = vec![
        AttrSetting {
            attr: "gpio0".into(),
            value: "enable:1 period:500".into(),
        },
        AttrSetting {
            attr: "bs1".into(),
            value: "enable:1 bc:1000 hb:10".into(),
        },
    ];
    sw.sub.apply_attrs(&settings).unwrap();
    assert_eq!(sw.sub.device(0).unwrap().gpio(0).unwrap().period, 500);
    assert!(sw.sub.device(0).unwrap().broadsync(1).unwrap().enable);

    let bad = vec![AttrSetting {
        attr: "gpio99".into(),
        value: "enable:1".into(),
    }];
    assert!(matches!(
        sw.sub.apply_attrs(&bad),
        Err(AsicError::NotFound(_))
    ));
}

#[test]
fn test_bad_input() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    assert!(matches!(
        "bogus".parse::<Attr>(),
        Err(AsicError::NotFound(_))
    ));
    assert!(matches!(
        sw.sub.attr_store(attr("gpio0"), "speed:3"),
        Err(AsicError::InvalidArg(_))
    ));
    assert!(matches!(
        sw.sub.attr_store(attr("gpio0"), "period:fast"),
        Err(AsicError::InvalidArg(_))
    ));
    assert!(sw.sub.attr_show(Attr::PtpTod).is_err());
}
