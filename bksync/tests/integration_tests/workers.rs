// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::time::Duration;

use aal::fw::{ts_event, FwAbi};
use aal::{HwTimestampOps, PhcEvent, TxType};
use bksync::extts::flags;
use bksync::{PhcRequest, SubsystemConfig};

use super::common::Switch;

const WAIT: Duration = Duration::from_secs(5);

fn fast_switch() -> Switch {
    Switch::with_config(
        SubsystemConfig {
            fw_abi: FwAbi::Legacy,
            phc_update_interval_ms: 10,
            ..Default::default()
        },
        1,
    )
    .up()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_events_delivered() {
    let sw = fast_switch();
    let mut rx = sw.sub.take_events().unwrap();
    sw.sub.start().unwrap();
    assert!(!sw.sub.time_keep_running());

    sw.sub
        .phc(0)
        .unwrap()
        .enable(
            PhcRequest::Extts {
                index: 2,
                flags: flags::ENABLE | flags::RISING_EDGE,
            },
            true,
        )
        .unwrap();
    assert!(sw
        .hdl
        .record_extts(0, ts_event::GPIO_1 + 2, 4, 500)
        .unwrap());

    let ev = tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no event before timeout")
        .unwrap();
    assert_eq!(
        ev,
        PhcEvent::Extts {
            index: 2,
            timestamp_ns: 4_000_000_500
        }
    );
    sw.sub.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_time_keep_follows_one_step() {
    let sw = fast_switch();
    let dev = sw.sub.device(0).unwrap();

    // Asking before the workers run defers the refresh until they do.
    sw.sub.hw_tstamp_enable(0, 4, TxType::OneStepSync).unwrap();
    assert!(!sw.sub.time_keep_running());
    sw.sub.start().unwrap();
    assert!(sw.sub.time_keep_running());

    let first = dev.clock_sample();
    let refreshed = async {
        while dev.clock_sample() == first {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(WAIT, refreshed)
        .await
        .expect("clock sample never refreshed");
    assert_ne!(dev.clock_sample().0, 0);

    sw.sub.teardown().await;
    assert!(!sw.sub.time_keep_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_teardown() {
    let sw = fast_switch();
    sw.sub.start().unwrap();
    sw.sub.hw_tstamp_enable(0, 4, TxType::OneStepSync).unwrap();
    assert!(sw.sub.time_keep_running());

    sw.sub.teardown().await;
    assert!(!sw.sub.time_keep_running());
    assert!(!sw.sub.device(0).unwrap().is_initialized());
    assert!(!sw.hdl.firmware_state(0).unwrap().initialized);
}

#[test]
fn test_start_needs_runtime() {
    let sw = fast_switch();
    assert!(sw.sub.start().is_err());
}
