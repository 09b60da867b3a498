// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use bytes::BytesMut;

use aal::fw::FwAbi;
use aal::{AsicError, HwTimestampOps, RxPreProcess};
use packet::encap;
use packet::ptp::Transport;

use super::common::{l2_frame, Switch};

// Descriptor metadata for a frame on COS 0.
const META: [u32; 8] = [0; 8];

#[test]
fn test_encap_stripped() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let payload = l2_frame(0x0, 9);
    let mut frame = encap::build(1, 0xEFCD_AB00_1234_5678, &payload);
    let before = frame.len();

    let ts = sw.sub.rx_time_upscale(0, 5, &mut frame, &META).unwrap();
    assert_eq!(ts, Some(0xEFCD_AB00_1234_5678));
    assert_eq!(frame.len(), before - 24);
    assert_eq!(&frame[..], &payload[..]);

    let c = sw.sub.device(0).unwrap().port_counters(5).unwrap();
    assert_eq!(c.pkt_rxctr, 1);
}

#[test]
fn test_plain_frame_untouched() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let payload = l2_frame(0x0, 9);
    let mut frame = BytesMut::from(&payload[..]);

    let ts = sw.sub.rx_time_upscale(0, 5, &mut frame, &META).unwrap();
    assert_eq!(ts, None);
    assert_eq!(&frame[..], &payload[..]);
    assert_eq!(
        sw.sub.device(0).unwrap().port_counters(5).unwrap().pkt_rxctr,
        1
    );
}

#[test]
fn test_other_queue_ignored() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let mut frame = encap::build(1, 77, &l2_frame(0x0, 9));
    let before = frame.clone();
    let mut meta = META;
    meta[6] = 3 << 22;

    let ts = sw.sub.rx_time_upscale(0, 5, &mut frame, &meta).unwrap();
    assert_eq!(ts, None);
    assert_eq!(frame, before);
    assert_eq!(
        sw.sub.device(0).unwrap().port_counters(5).unwrap().pkt_rxctr,
        0
    );
}

#[test]
fn test_pre_process() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let frame = encap::build(1, 77, &l2_frame(0x0, 9));
    assert_eq!(
        sw.sub.rx_pre_process(0, &frame, 100).unwrap(),
        RxPreProcess::FromFirmware
    );
    assert_eq!(
        sw.sub.rx_pre_process(0, &frame, 7).unwrap(),
        RxPreProcess::Encap { len: 24 }
    );
    assert!(matches!(
        sw.sub.rx_pre_process(0, &l2_frame(0x0, 9), 7),
        Err(AsicError::InvalidArg(_))
    ));
}

#[test]
fn test_transport_override() {
    let sw = Switch::new(FwAbi::Legacy, 1);
    assert_eq!(sw.sub.transport_get(&l2_frame(0x0, 1)), Transport::Ieee8023);

    let forced = Switch::with_config(
        bksync::SubsystemConfig {
            network_transport: 4,
            ..Default::default()
        },
        1,
    );
    assert_eq!(forced.sub.transport(), Transport::UdpIpv4);
    assert_eq!(forced.sub.transport_get(&l2_frame(0x0, 1)), Transport::UdpIpv4);

    let bogus = Switch::with_config(
        bksync::SubsystemConfig {
            network_transport: 5,
            ..Default::default()
        },
        1,
    );
    assert_eq!(bogus.sub.transport(), Transport::Unknown);
}
