// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The PTP hardware clock operations a device presents to the OS.

use slog::{debug, warn};

use aal::fw::{ts_event, Command};
use aal::{AsicError, AsicResult};
use common::time::{scaled_ppm_to_ppb, Timespec};

use crate::config::DebugFlags;
use crate::device::Device;
use crate::extts::flags;
use crate::Subsystem;

/// Largest frequency adjustment the firmware accepts, in parts per
/// billion.
pub const MAX_ADJ_PPB: i64 = 200_000;

/// Ancillary clock features the OS may ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhcRequest {
    /// Timestamp edges on external input `index`.
    Extts { index: u32, flags: u32 },
    /// A periodic output.
    PerOut { index: u32 },
    /// A pulse-per-second event.
    Pps,
}

impl Device {
    /// Read the clock, refreshing the cached pair.  The pair is published
    /// while the mailbox is still held, so concurrent readers publish in
    /// command order.
    pub(crate) fn gettime(&self) -> AsicResult<u64> {
        self.require_init()?;
        let (prev_ptp, prev_ref) = self.pair.read();
        let (ptp, reftime) = self.mailbox.execute_then(
            Command::GetTime,
            None,
            None,
            |ptp, reftime| {
                self.pair.publish(ptp, reftime);
                (ptp, reftime)
            },
        )?;

        if self.debug.is_set(DebugFlags::WARN) && prev_ptp != 0 {
            let dptp = ptp.wrapping_sub(prev_ptp);
            let dref = reftime.wrapping_sub(prev_ref);
            if dptp != dref {
                warn!(self.log, "clock and reference counter advanced apart";
                    "ptp_delta" => dptp, "ref_delta" => dref);
            }
        }
        Ok(ptp)
    }

    pub(crate) fn settime(&self, ns: i64) -> AsicResult<()> {
        self.execute(Command::SetTime, Some(ns as u64), Some(0))?;
        Ok(())
    }

    pub(crate) fn adjtime(&self, delta_ns: i64) -> AsicResult<()> {
        self.execute(Command::AdjTime, Some(delta_ns as u64), None)?;
        Ok(())
    }

    pub(crate) fn adjfreq(&self, ppb: i64) -> AsicResult<()> {
        if !(-MAX_ADJ_PPB..=MAX_ADJ_PPB).contains(&ppb) {
            return Err(AsicError::InvalidArg(format!(
                "frequency adjustment of {ppb} ppb exceeds {MAX_ADJ_PPB}"
            )));
        }
        self.execute(Command::FreqCor, Some(ppb as u64), None)?;
        Ok(())
    }

    /// The most recent `(ptptime, reftime)` sample of this device's clock.
    pub fn clock_sample(&self) -> (u64, u64) {
        self.pair.read()
    }

    /// Copy another device's cached pair into this one.
    pub(crate) fn mirror(&self, clock: &Device) -> u64 {
        let (ptp, reftime) = clock.pair.read();
        self.pair.publish(ptp, reftime);
        ptp
    }
}

/// The clock of one device.  When the PHC is shared, the clock of every
/// non-master device is the master's: reads mirror the master's cached
/// sample and writes go to the master.
pub struct Phc<'a> {
    sub: &'a Subsystem,
    dev: &'a Device,
}

impl<'a> Phc<'a> {
    pub(crate) fn new(sub: &'a Subsystem, dev: &'a Device) -> Self {
        Phc { sub, dev }
    }

    pub fn index(&self) -> u32 {
        self.dev.phc_index
    }

    pub fn device(&self) -> &'a Device {
        self.dev
    }

    fn clock(&self) -> &'a Device {
        self.sub.clock_device(self.dev)
    }

    fn is_mirror(&self) -> bool {
        self.clock().dev_no != self.dev.dev_no
    }

    pub fn gettime(&self) -> AsicResult<Timespec> {
        let ptp = if self.is_mirror() {
            self.dev.mirror(self.clock())
        } else {
            self.dev.gettime()?
        };
        Ok(Timespec::from_ns(ptp as i64))
    }

    pub fn settime(&self, ts: Timespec) -> AsicResult<()> {
        self.clock().settime(ts.to_ns())
    }

    pub fn adjtime(&self, delta_ns: i64) -> AsicResult<()> {
        self.clock().adjtime(delta_ns)
    }

    pub fn adjfreq(&self, ppb: i64) -> AsicResult<()> {
        self.clock().adjfreq(ppb)
    }

    /// Adjust by scaled parts per million (ppm with a 16-bit fraction).
    pub fn adjfine(&self, scaled_ppm: i64) -> AsicResult<()> {
        self.adjfreq(scaled_ppm_to_ppb(scaled_ppm))
    }

    /// Turn an ancillary feature on or off.  Only external timestamps are
    /// supported.  EXTTS channels are numbered across devices, six per
    /// device, so a channel may belong to a device other than this one.
    pub fn enable(&self, req: PhcRequest, on: bool) -> AsicResult<()> {
        let (index, req_flags) = match req {
            PhcRequest::Extts { index, flags } => (index, flags),
            _ => return Err(AsicError::OperationUnsupported),
        };
        if index >= self.dev.cfg.n_ext_ts() {
            return Err(AsicError::InvalidArg(format!("extts channel {index}")));
        }
        if req_flags & !(flags::ENABLE | flags::RISING_EDGE) != 0 {
            return Err(AsicError::OperationUnsupported);
        }

        let per_dev = ts_event::NUM_GPIO_EVENTS as u32;
        let dev_no = (index / per_dev) as usize;
        let target = self
            .sub
            .device(dev_no)
            .map_err(|_| AsicError::InvalidArg(format!("extts channel {index}")))?;
        target.extts_enable((index % per_dev) as usize, on)?;
        if self.dev.debug.is_set(DebugFlags::VERB) {
            debug!(self.dev.log, "extts request";
                "index" => index, "dev" => dev_no, "on" => on);
        }
        Ok(())
    }
}
