// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Human-readable views of the subsystem: per-port timestamping counters,
//! the device table, and the debug class mask.

use std::fmt::Write;

use slog::warn;

use aal::{AsicError, AsicResult};

use crate::device::Device;
use crate::Subsystem;

fn stats_table(out: &mut String, dev: &Device) {
    let _ = writeln!(out, "dev_no : {}", dev.dev_no);
    let _ = writeln!(
        out,
        "     TwoStep Port Bitmap : {:016x}",
        dev.portmap_word(0)
    );
    let _ = writeln!(
        out,
        "      {:>4}| {:>9}| {:>9}| {:>9}| {:>9}| {:>9}| {:>9}| {:>9}| {:>9}| {:>9}| {:>9}",
        "Port",
        "RxCounter",
        "TxCounter",
        "TxOneStep",
        "TSRead",
        "TSMatch",
        "TSDiscard",
        "TimeHi",
        "TimeLo",
        "TimeAvg",
        "FIFORx"
    );

    for idx in 0..dev.stats.len() {
        let Some(c) = dev.stats.index(idx).map(|s| s.snapshot()) else {
            continue;
        };
        if !c.is_active() {
            continue;
        }
        let _ = writeln!(
            out,
            "    {:>4} | {:>9}| {:>9}| {:>9}| {:>9}| {:>9}| {:>9}| {:>9}| {:>9} | {:>9}|{:>9} | {}",
            idx + 1,
            c.pkt_rxctr,
            c.pkt_txctr,
            c.pkt_txonestep,
            c.tsts_timeout,
            c.tsts_match,
            c.tsts_discard,
            c.tsts_worst_fetch_time,
            c.tsts_best_fetch_time,
            c.tsts_avg_fetch_time,
            c.fifo_rxctr,
            if c.pkt_txctr != c.tsts_match { "***" } else { "" }
        );
    }
}

impl Subsystem {
    /// The port counters of every device.  Only ports that have seen
    /// traffic are listed; a port whose TX count differs from its match
    /// count is flagged.
    pub fn stats_report(&self) -> String {
        let mut out = String::from("Port PTP statistics\n");
        for dev in &self.devices {
            stats_table(&mut out, dev);
        }
        out
    }

    /// The port counters of one device.
    pub fn device_stats_report(&self, dev_no: usize) -> AsicResult<String> {
        let mut out = String::new();
        stats_table(&mut out, self.device(dev_no)?);
        Ok(out)
    }

    /// Zero the packet and match counters of every port on every device.
    pub fn stats_clear(&self) {
        self.devices.iter().for_each(|d| d.stats.clear());
    }

    /// Handle a write to the statistics view.  Only "clear" is understood.
    pub fn stats_store(&self, input: &str) -> AsicResult<()> {
        if input.contains("clear") {
            self.stats_clear();
            Ok(())
        } else {
            warn!(self.log, "unknown statistics request"; "input" => input.trim());
            Err(AsicError::InvalidArg(format!("unknown request {:?}", input.trim())))
        }
    }

    pub fn dev_info_report(&self) -> String {
        let mut out = String::from("Device information:\n");
        for dev in &self.devices {
            let _ = writeln!(out, "  dev_no:          {}", dev.dev_no);
            let _ = writeln!(out, "     dev_id:          {:#x}", dev.cfg.dev_id);
            let _ = writeln!(out, "     dev_init:        {}", dev.is_initialized() as u32);
            let _ = writeln!(out, "     dev_core:        {}", dev.cfg.max_core());
            let _ = writeln!(out, "     phc_index:       /dev/ptp{}", dev.phc_index);
        }
        let _ = writeln!(
            out,
            "\nShared PHC:      {}",
            if self.config.shared_phc { "Yes" } else { "No" }
        );
        let _ = writeln!(out, "Master Dev:      {}", self.master);
        out
    }

    pub fn debug_report(&self) -> String {
        format!("Configuration:\n  debug:          {:#x}\n", self.debug())
    }

    /// Handle a write of the form `debug=<mask>`, in decimal or with a
    /// `0x` prefix.
    pub fn debug_store(&self, input: &str) -> AsicResult<()> {
        let bad = || AsicError::InvalidArg(format!("unknown configuration {:?}", input.trim()));
        let (_, val) = input.split_once("debug=").ok_or_else(bad)?;
        let val = val.split_whitespace().next().ok_or_else(bad)?;
        let bits = match val.strip_prefix("0x").or_else(|| val.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => val.parse(),
        }
        .map_err(|_| bad())?;
        self.set_debug(bits);
        Ok(())
    }
}
