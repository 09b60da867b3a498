// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Subsystem tunables and the per-device bring-up parameters.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use aal::fw::FwAbi;
use aal::{AsicError, AsicResult};
use common::DEFAULT_BASE_DEV_NAME;

use crate::dcb::DcbType;

/// Runtime-adjustable classes of debug output.
#[derive(Debug, Default)]
pub struct DebugFlags(AtomicU32);

impl DebugFlags {
    pub const VERB: u32 = 0x1;
    pub const WARN: u32 = 0x2;
    pub const TXTS: u32 = 0x4;
    pub const CMDS: u32 = 0x8;
    pub const TX: u32 = 0x10;
    pub const RX: u32 = 0x20;
    pub const TX_DUMP: u32 = 0x40;
    pub const RX_DUMP: u32 = 0x80;

    pub fn new(bits: u32) -> Self {
        DebugFlags(AtomicU32::new(bits))
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, bits: u32) {
        self.0.store(bits, Ordering::Relaxed)
    }

    pub fn is_set(&self, flag: u32) -> bool {
        self.get() & flag != 0
    }
}

/// One switch device (ASIC core) as known before bring-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// PCI device id, which decides the core count and EXTTS channels.
    pub dev_id: u32,
    pub dcb_type: DcbType,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            dev_id: 0xb880,
            dcb_type: DcbType::Dcb36,
        }
    }
}

impl DeviceConfig {
    /// Highest firmware core number the device has.
    pub fn max_core(&self) -> u32 {
        match self.dev_id {
            0x8870 | 0x8860 | 0x8890 | 0x8490 => 6,
            _ => 2,
        }
    }

    /// Number of EXTTS channels exposed for the device.
    pub fn n_ext_ts(&self) -> u32 {
        match self.dev_id {
            0x8870 => 12,
            _ => 6,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SubsystemConfig {
    /// Initial debug class bitmask; see [`DebugFlags`].
    pub debug: u32,
    /// PCI COS queue carrying timestamped frames to the host, used until a
    /// device is brought up with its own value.
    pub pci_cos: u32,
    /// Forced transport code (2, 4 or 6), or 0 to inspect each frame.
    pub network_transport: u32,
    /// Firmware core to use until bring-up names one.
    pub fw_core: u32,
    /// Priority written into untagged-priority VLAN headers on DNX.
    pub vlan_prio: u8,
    /// Interval of the background PHC refresh.
    pub phc_update_interval_ms: u64,
    /// Polls of the firmware for a two-step timestamp before giving up.
    pub tsts_retries: u32,
    /// Device whose clock is the time master for the others.
    pub master_core: usize,
    /// Whether all devices share the master's clock.
    pub shared_phc: bool,
    /// Name of the first clock device, e.g. "ptp0".
    pub base_dev_name: String,
    pub fw_abi: FwAbi,
    /// Devices in discovery order.  When empty, every device the platform
    /// reports is used with default settings.
    pub devices: Vec<DeviceConfig>,
}

impl Default for SubsystemConfig {
    fn default() -> Self {
        SubsystemConfig {
            debug: 0,
            pci_cos: 0,
            network_transport: 0,
            fw_core: 0,
            vlan_prio: 0,
            phc_update_interval_ms: 1000,
            tsts_retries: 5,
            master_core: 0,
            shared_phc: false,
            base_dev_name: DEFAULT_BASE_DEV_NAME.to_string(),
            fw_abi: FwAbi::default(),
            devices: Vec::new(),
        }
    }
}

impl SubsystemConfig {
    /// The clock number embedded in `base_dev_name`.
    pub fn base_phc_index(&self) -> u32 {
        self.base_dev_name
            .trim_start_matches(|c: char| !c.is_ascii_digit())
            .parse()
            .unwrap_or(0)
    }
}

/// Parameters handed over when a device is brought up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct InitData {
    pub pci_cos: u32,
    pub fw_core: u32,
    pub uc_port_num: u32,
    pub uc_sysport: u32,
    pub host_cpu_port: u32,
    pub host_cpu_sysport: u32,
    pub udh_len: u32,
    /// Bus address of the EDK firmware's command block.
    pub fw_comm_phys: u64,
    pub application_v2: bool,
}

impl InitData {
    /// Number of words in the HW_INIT request.
    pub const WORDS: usize = 10;

    pub fn from_words(data: &[i32]) -> AsicResult<Self> {
        if data.len() < Self::WORDS {
            return Err(AsicError::InvalidArg(format!(
                "init data needs {} words, got {}",
                Self::WORDS,
                data.len()
            )));
        }
        let w = |i: usize| data[i] as u32;
        Ok(InitData {
            pci_cos: w(0),
            fw_core: w(1),
            uc_port_num: w(2),
            uc_sysport: w(3),
            host_cpu_port: w(4),
            host_cpu_sysport: w(5),
            udh_len: w(6),
            fw_comm_phys: (w(7) as u64) << 32 | w(8) as u64,
            application_v2: w(9) != 0,
        })
    }

    pub fn to_words(&self) -> Vec<i32> {
        vec![
            self.pci_cos as i32,
            self.fw_core as i32,
            self.uc_port_num as i32,
            self.uc_sysport as i32,
            self.host_cpu_port as i32,
            self.host_cpu_sysport as i32,
            self.udh_len as i32,
            (self.fw_comm_phys >> 32) as i32,
            self.fw_comm_phys as i32,
            self.application_v2 as i32,
        ]
    }
}
