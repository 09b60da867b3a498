// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::fw::{ts_event, Command, FwAbi};
use aal::PhcEvent;
use bksync::extts::flags;
use bksync::{DeviceConfig, PhcRequest, SubsystemConfig};

use super::common::Switch;

const GPIO1: u32 = ts_event::GPIO_1;
const GPIO2: u32 = ts_event::GPIO_1 + 1;

fn enable(sw: &Switch, dev_no: usize, index: u32) {
    sw.sub
        .phc(dev_no)
        .unwrap()
        .enable(
            PhcRequest::Extts {
                index,
                flags: flags::ENABLE,
            },
            true,
        )
        .unwrap();
}

fn drain(sw: &Switch, rx: &mut tokio::sync::mpsc::UnboundedReceiver<PhcEvent>) -> Vec<PhcEvent> {
    sw.sub.extts_poll();
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

#[test]
fn test_disabled_event_dropped() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let mut rx = sw.sub.take_events().unwrap();
    assert!(sw.sub.take_events().is_none());
    enable(&sw, 0, 0);

    assert!(sw.hdl.record_extts(0, GPIO1, 1, 10).unwrap());
    assert!(sw.hdl.record_extts(0, GPIO2, 1, 20).unwrap());
    assert!(sw.hdl.record_extts(0, GPIO1, 1, 30).unwrap());

    let events = drain(&sw, &mut rx);
    assert_eq!(
        events,
        vec![
            PhcEvent::Extts {
                index: 0,
                timestamp_ns: 1_000_000_010
            },
            PhcEvent::Extts {
                index: 0,
                timestamp_ns: 1_000_000_030
            },
        ]
    );
    assert_eq!(sw.sub.device(0).unwrap().extts_head(), 3);
    assert!(drain(&sw, &mut rx).is_empty());
}

#[test]
fn test_legacy_ring_handed_over() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    enable(&sw, 0, 2);
    let log = sw
        .hdl
        .commands(0)
        .unwrap()
        .into_iter()
        .find(|c| c.cmd == Command::ExttsLog)
        .unwrap();
    assert_eq!(log.arg1, (GPIO1 as u64 + 2) << 32 | 1);
    assert_ne!(log.arg2, 0);
    assert_eq!(sw.hdl.firmware_state(0).unwrap().extts_ring, Some(log.arg2));
}

#[test]
fn test_ring_wraps() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let mut rx = sw.sub.take_events().unwrap();
    enable(&sw, 0, 0);

    for i in 0..100 {
        assert!(sw.hdl.record_extts(0, GPIO1, 2, i).unwrap());
    }
    assert_eq!(drain(&sw, &mut rx).len(), 100);
    for i in 0..28 {
        assert!(sw.hdl.record_extts(0, GPIO1, 3, i).unwrap());
    }
    let events = drain(&sw, &mut rx);
    assert_eq!(events.len(), 28);
    assert_eq!(
        events[27],
        PhcEvent::Extts {
            index: 0,
            timestamp_ns: 3_000_000_027
        }
    );
    assert_eq!(sw.sub.device(0).unwrap().extts_head(), 0);
}

#[test]
fn test_ring_overflow_noticed() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let mut rx = sw.sub.take_events().unwrap();
    enable(&sw, 0, 0);

    // One slot always stays empty.
    let mut stored = 0;
    while sw.hdl.record_extts(0, GPIO1, 1, stored).unwrap() {
        stored += 1;
    }
    assert_eq!(stored, 127);
    assert_eq!(drain(&sw, &mut rx).len(), 127);
    assert_eq!(sw.sub.device(0).unwrap().extts_overflows(), 1);
}

#[test]
fn test_edk_ring_from_firmware() {
    let sw = Switch::new(FwAbi::Edk, 1).up();
    let mut rx = sw.sub.take_events().unwrap();
    enable(&sw, 0, 1);
    enable(&sw, 0, 1);

    let cmds: Vec<Command> =
        sw.hdl.commands(0).unwrap().iter().map(|c| c.cmd).collect();
    assert_eq!(
        cmds,
        vec![
            Command::Init,
            Command::GetExttsBuff,
            Command::ExttsLog,
            Command::ExttsLog
        ]
    );

    assert!(sw.hdl.record_extts(0, GPIO2, 5, 5).unwrap());
    assert_eq!(
        drain(&sw, &mut rx),
        vec![PhcEvent::Extts {
            index: 1,
            timestamp_ns: 5_000_000_005
        }]
    );
}

#[test]
fn test_channels_per_device() {
    // This part exposes twelve channels over its two cores.
    let dev = DeviceConfig {
        dev_id: 0x8870,
        ..Default::default()
    };
    let sw = Switch::with_config(
        SubsystemConfig {
            devices: vec![dev; 2],
            ..Default::default()
        },
        2,
    )
    .up();
    let mut rx = sw.sub.take_events().unwrap();
    // Channel 7 is the second channel of the second device.
    enable(&sw, 0, 7);
    assert!(sw.hdl.record_extts(1, GPIO2, 0, 7).unwrap());
    assert!(!sw.hdl.record_extts(0, GPIO2, 0, 7).unwrap());
    assert_eq!(
        drain(&sw, &mut rx),
        vec![PhcEvent::Extts {
            index: 7,
            timestamp_ns: 7
        }]
    );
}
