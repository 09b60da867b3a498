// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use bytes::BytesMut;
use expectorate::assert_contents;
use pretty_assertions::assert_eq;

use aal::fw::FwAbi;
use aal::{AsicError, HwTimestampOps, TxType};
use bksync::SubsystemConfig;

use super::common::{l2_frame, Switch};

// Traffic whose counters do not depend on timing: received frames on
// port 3 and a one-step Sync on port 5, with two-step on ports 1 and 3.
fn traffic(sw: &Switch) {
    sw.sub.hw_tstamp_enable(0, 1, TxType::On).unwrap();
    sw.sub.hw_tstamp_enable(0, 3, TxType::On).unwrap();

    for seq in 0..2 {
        let mut frame = BytesMut::from(&l2_frame(0x0, seq)[..]);
        sw.sub.rx_time_upscale(0, 3, &mut frame, &[0; 8]).unwrap();
    }

    let mut sync = l2_frame(0x0, 7);
    sw.sub
        .tx_meta_set(0, 5, TxType::OneStepSync, 0, &mut sync)
        .unwrap();
    sw.sub
        .tx_time_get(0, 5, TxType::OneStepSync, &sync)
        .unwrap();
}

#[test]
fn test_stats_report() {
    let sw = Switch::new(FwAbi::Legacy, 2).up();
    traffic(&sw);
    assert_contents("tests/output/stats_report.txt", &sw.sub.stats_report());
}

#[test]
fn test_stats_clear() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    traffic(&sw);
    assert!(sw.sub.device_stats_report(0).unwrap().contains("***"));

    assert!(matches!(
        sw.sub.stats_store("reset"),
        Err(AsicError::InvalidArg(_))
    ));
    sw.sub.stats_store("clear\n").unwrap();
    let c = sw.sub.device(0).unwrap().port_counters(3).unwrap();
    assert_eq!(c.pkt_rxctr, 0);

    let report = sw.sub.device_stats_report(0).unwrap();
    assert_eq!(report.lines().count(), 3);
    // Clearing counters leaves the two-step ports alone.
    assert!(report.contains("Bitmap : 0000000000000005"));
    assert!(sw.sub.device_stats_report(1).is_err());
}

#[test]
fn test_dev_info_report() {
    let sw = Switch::with_config(
        SubsystemConfig {
            shared_phc: true,
            master_core: 1,
            ..Default::default()
        },
        2,
    );
    sw.sub.hw_init(1, sw.init_data(1)).unwrap();

    let expect = "\
Device information:
  dev_no:          0
     dev_id:          0xb880
     dev_init:        0
     dev_core:        2
     phc_index:       /dev/ptp0
  dev_no:          1
     dev_id:          0xb880
     dev_init:        1
     dev_core:        2
     phc_index:       /dev/ptp0

Shared PHC:      Yes
Master Dev:      1
";
    assert_eq!(sw.sub.dev_info_report(), expect);
}

#[test]
fn test_debug_mask() {
    let sw = Switch::new(FwAbi::Legacy, 1);
    assert_eq!(sw.sub.debug_report(), "Configuration:\n  debug:          0x0\n");

    sw.sub.debug_store("debug=0x41\n").unwrap();
    assert_eq!(sw.sub.debug(), 0x41);
    sw.sub.debug_store("debug=12").unwrap();
    assert_eq!(sw.sub.debug_report(), "Configuration:\n  debug:          0xc\n");

    assert!(sw.sub.debug_store("verbose=1").is_err());
    assert!(sw.sub.debug_store("debug=0xzz").is_err());
    assert_eq!(sw.sub.debug(), 12);
}
