// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::fw::{Command, FwAbi};
use aal::{AsicError, HwTimestampOps, TxType};

use super::common::{l2_frame, Switch};

const DELAY_REQ: u8 = 0x1;

#[test]
fn test_match_first_poll() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    sw.sub.hw_tstamp_enable(0, 12, TxType::On).unwrap();
    // The firmware numbers ports from zero.
    sw.hdl.push_tx_stamp(0, 11, 0x00AB, 0x2000).unwrap();
    sw.hdl.clear_commands(0).unwrap();

    let ts = sw
        .sub
        .tx_time_get(0, 12, TxType::On, &l2_frame(DELAY_REQ, 0x00AB))
        .unwrap();
    assert_eq!(ts, 0x2000);

    let cmds: Vec<Command> =
        sw.hdl.commands(0).unwrap().iter().map(|c| c.cmd).collect();
    assert_eq!(cmds, vec![Command::GetTsTime, Command::AckTsTime]);
    let key = sw.hdl.commands(0).unwrap()[1].arg1;
    assert_eq!(key, 11 | 0xAB << 16);

    let c = sw.sub.device(0).unwrap().port_counters(12).unwrap();
    assert_eq!(c.tsts_match, 1);
    assert_eq!(c.pkt_txctr, 1);
    assert_eq!(c.tsts_discard, 0);
    assert_eq!(c.fifo_rxctr, 1);
}

#[test]
fn test_stale_entry_discarded() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    sw.hdl.push_tx_stamp(0, 11, 0x00AA, 0x3000).unwrap();
    sw.hdl.push_tx_stamp(0, 11, 0x00AB, 0x4000).unwrap();

    let ts = sw
        .sub
        .tx_time_get(0, 12, TxType::On, &l2_frame(DELAY_REQ, 0x00AB))
        .unwrap();
    assert_eq!(ts, 0x4000);

    let c = sw.sub.device(0).unwrap().port_counters(12).unwrap();
    assert_eq!(c.tsts_discard, 1);
    assert_eq!(c.tsts_match, 1);
    assert_eq!(c.tsts_timeout, 0);
}

#[test]
fn test_fifo_gap_resync() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let dev = sw.sub.device(0).unwrap();

    sw.hdl.push_tx_stamp(0, 11, 1, 0x1000).unwrap();
    sw.sub
        .tx_time_get(0, 12, TxType::On, &l2_frame(DELAY_REQ, 1))
        .unwrap();
    assert_eq!(dev.port_counters(12).unwrap().fifo_rxctr, 1);

    // One capture never reached the host, so the next one is number 3.
    sw.hdl.lose_tx_stamps(0, 11, 1).unwrap();
    sw.hdl.push_tx_stamp(0, 11, 2, 0x2000).unwrap();
    let ts = sw
        .sub
        .tx_time_get(0, 12, TxType::On, &l2_frame(DELAY_REQ, 2))
        .unwrap();
    assert_eq!(ts, 0x2000);

    let c = dev.port_counters(12).unwrap();
    assert_eq!(c.fifo_rxctr, 3);
    assert_eq!(c.tsts_match, 2);
    assert_eq!(c.tsts_discard, 0);
}

#[test]
fn test_ack_failure_keeps_timestamp() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    sw.hdl.push_tx_stamp(0, 4, 9, 0x5000).unwrap();
    sw.hdl.set_command_ignored(0, Command::AckTsTime, true).unwrap();

    let ts = sw
        .sub
        .tx_time_get(0, 5, TxType::On, &l2_frame(DELAY_REQ, 9))
        .unwrap();
    assert_eq!(ts, 0x5000);

    let dev = sw.sub.device(0).unwrap();
    assert_eq!(dev.timeouts(Command::AckTsTime), 1);
    let c = dev.port_counters(5).unwrap();
    assert_eq!(c.pkt_txctr, 1);
    assert_eq!(c.tsts_match, 1);
}

#[test]
fn test_miss_after_retries() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let err = sw
        .sub
        .tx_time_get(0, 3, TxType::On, &l2_frame(DELAY_REQ, 7))
        .unwrap_err();
    assert!(matches!(err, AsicError::TimestampMiss { port: 3, seq_id: 7 }));

    let polls = sw
        .hdl
        .commands(0)
        .unwrap()
        .iter()
        .filter(|c| c.cmd == Command::GetTsTime)
        .count();
    assert_eq!(polls, sw.sub.config().tsts_retries as usize);

    let c = sw.sub.device(0).unwrap().port_counters(3).unwrap();
    assert_eq!(c.tsts_timeout, 1);
    assert_eq!(c.pkt_txctr, 1);
    assert_eq!(c.tsts_match, 0);
}

#[test]
fn test_one_step_uses_cached_time() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let phc = sw.sub.phc(0).unwrap();
    phc.gettime().unwrap();
    let (ptp, _) = sw.sub.device(0).unwrap().clock_sample();
    sw.hdl.clear_commands(0).unwrap();

    let ts = sw
        .sub
        .tx_time_get(0, 4, TxType::OneStepSync, &l2_frame(0, 1))
        .unwrap();
    assert_eq!(ts, ptp);
    assert!(sw.hdl.commands(0).unwrap().is_empty());
}

#[test]
fn test_bad_ports() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    let frame = l2_frame(DELAY_REQ, 1);
    for port in [0, 256, 600] {
        assert!(matches!(
            sw.sub.tx_time_get(0, port, TxType::On, &frame),
            Err(AsicError::InvalidArg(_))
        ));
    }
    assert!(sw.sub.hw_tstamp_enable(0, 0, TxType::On).is_err());
    assert!(sw.sub.hw_tstamp_enable(0, 512, TxType::On).is_err());
}

#[test]
fn test_port_bitmap() {
    let sw = Switch::new(FwAbi::Legacy, 1).up();
    sw.sub.hw_tstamp_enable(0, 1, TxType::On).unwrap();
    sw.sub.hw_tstamp_enable(0, 3, TxType::On).unwrap();
    sw.sub.hw_tstamp_enable(0, 66, TxType::On).unwrap();

    let dev = sw.sub.device(0).unwrap();
    assert_eq!(dev.portmap_word(0), 0b101);
    assert_eq!(dev.portmap_word(1), 0b10);
    let fw = sw.hdl.firmware_state(0).unwrap();
    assert_eq!(fw.portmap.get(&0), Some(&0b101));
    assert_eq!(fw.portmap.get(&1), Some(&0b10));

    sw.sub.hw_tstamp_disable(0, 1, TxType::On).unwrap();
    assert!(!dev.twostep_enabled(1));
    assert_eq!(sw.hdl.firmware_state(0).unwrap().portmap.get(&0), Some(&0b100));
}

#[test]
fn test_needs_bring_up() {
    let sw = Switch::new(FwAbi::Legacy, 1);
    assert!(matches!(
        sw.sub.hw_tstamp_enable(0, 1, TxType::On),
        Err(AsicError::Uninitialized(_))
    ));
    assert!(matches!(
        sw.sub.tx_time_get(0, 1, TxType::On, &l2_frame(DELAY_REQ, 1)),
        Err(AsicError::Uninitialized(_))
    ));
}
