// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::Arc;

use slog::{o, Logger};

use aal::fw::FwAbi;
use asic::sim::{Handle, SimConfig, SimDeviceConfig};
use bksync::{InitData, Subsystem, SubsystemConfig};
use packet::ptp;

pub fn log() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// A simulated switch and the subsystem running over it.  The handle must
/// outlive the subsystem's use of it, since dropping it stops the firmware.
pub struct Switch {
    pub hdl: Handle,
    pub sub: Arc<Subsystem>,
}

impl Switch {
    pub fn new(abi: FwAbi, devices: usize) -> Self {
        Self::with_config(
            SubsystemConfig {
                fw_abi: abi,
                ..Default::default()
            },
            devices,
        )
    }

    pub fn with_config(config: SubsystemConfig, devices: usize) -> Self {
        let log = log();
        let sim = SimConfig {
            fw_abi: config.fw_abi,
            devices: vec![SimDeviceConfig::default(); devices],
            ..Default::default()
        };
        let hdl = Handle::new(&log, &sim).unwrap();
        let sub = Subsystem::new(&log, config, &hdl).unwrap();
        Switch { hdl, sub }
    }

    /// The bring-up parameters for `dev_no`.
    pub fn init_data(&self, dev_no: usize) -> InitData {
        InitData {
            uc_sysport: 100,
            fw_comm_phys: self.hdl.fw_comm_addr(dev_no).unwrap(),
            ..Default::default()
        }
    }

    /// Bring every device up.
    pub fn up(self) -> Self {
        for dev_no in 0..self.sub.devices().len() {
            self.sub.hw_init(dev_no, self.init_data(dev_no)).unwrap();
        }
        self
    }
}

/// An untagged L2 PTP frame of message type `msg` and sequence id `seq`.
pub fn l2_frame(msg: u8, seq: u16) -> Vec<u8> {
    let mut f = vec![0u8; 64];
    f[..6].copy_from_slice(&[0x01, 0x1b, 0x19, 0x00, 0x00, 0x00]);
    f[12..14].copy_from_slice(&ptp::ETHER_PTP.to_be_bytes());
    f[14] = msg;
    f[15] = 0x02;
    f[16..18].copy_from_slice(&44u16.to_be_bytes());
    f[0x2c..0x2e].copy_from_slice(&seq.to_be_bytes());
    f
}
