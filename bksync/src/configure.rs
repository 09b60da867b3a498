// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Firmware configuration: BroadSync, GPIO pulse outputs, time-of-day
//! offsets and the legacy event log.  Every write goes to the firmware;
//! the last value written is kept in the device's shadow so that reads
//! can be served without a round trip.

use serde::{Deserialize, Serialize};
use slog::debug;

use aal::fw::{self, broadsync, evlog, ts_event, Command};
use aal::{AsicError, AsicResult};
use common::time::{FwTime, TimeOffset};

use crate::config::DebugFlags;
use crate::device::Device;

/// BroadSync instances per device.
pub const NUM_BROADSYNC: usize = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BroadSyncConfig {
    pub enable: bool,
    /// 0 for input, 1 for output.
    pub mode: u32,
    /// Bit clock, in Hz.
    pub bc: u32,
    /// Heartbeat, in Hz.
    pub hb: u32,
    /// Phase offset.  Only kept in input mode.
    pub offset: TimeOffset,
}

impl BroadSyncConfig {
    fn data_word(&self) -> u64 {
        (self.enable as u64)
            | ((self.mode & 0x1) as u64) << 8
            | (self.hb as u64) << 16
            | (self.bc as u64) << 32
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadSyncStatus {
    pub status: u32,
    pub variance: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GpioConfig {
    pub enable: bool,
    pub mode: u32,
    /// Pulse period, in nanoseconds.
    pub period: u32,
    pub phase_offset: i64,
}

impl GpioConfig {
    fn data_word(&self) -> u64 {
        (self.enable as u64)
            | ((self.mode & 0x1) as u64) << 8
            | (self.period as u64) << 16
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NtpTod {
    pub leap_sec_ctrl_en: bool,
    pub leap_sec_op: u32,
    pub epoch_offset: u64,
}

fn check_index(what: &str, idx: usize, limit: usize) -> AsicResult<()> {
    if idx < limit {
        Ok(())
    } else {
        Err(AsicError::InvalidArg(format!("{what} {idx} out of range")))
    }
}

impl Device {
    fn config_cmd(&self, cmd: Command, subcmd: u64, data: u64) -> AsicResult<(u64, u64)> {
        let res = self.execute(cmd, Some(subcmd), Some(data));
        if self.debug.is_set(DebugFlags::VERB) {
            debug!(self.log, "config command";
                "cmd" => %cmd,
                "subcmd" => format!("{subcmd:#x}"),
                "data" => format!("{data:#x}"),
                "ok" => res.is_ok());
        }
        res
    }

    pub fn broadsync(&self, bs_id: usize) -> AsicResult<BroadSyncConfig> {
        check_index("broadsync", bs_id, NUM_BROADSYNC)?;
        Ok(self.state.lock().unwrap().bs[bs_id])
    }

    /// Program BroadSync instance `bs_id` with the enable, mode, bit clock
    /// and heartbeat of `cfg`.  The phase offset is set separately.
    pub fn broadsync_config(&self, bs_id: usize, cfg: BroadSyncConfig) -> AsicResult<()> {
        let bs = BroadSyncConfig {
            enable: cfg.enable,
            mode: cfg.mode,
            bc: cfg.bc,
            hb: cfg.hb,
            ..self.broadsync(bs_id)?
        };
        self.config_cmd(Command::BroadSync, broadsync::config(bs_id), bs.data_word())?;
        self.state.lock().unwrap().bs[bs_id] = bs;
        Ok(())
    }

    /// Turn BroadSync instance `bs_id` off, keeping the rest of its
    /// configuration.
    pub fn broadsync_clear(&self, bs_id: usize) -> AsicResult<()> {
        let bs = BroadSyncConfig {
            enable: false,
            ..self.broadsync(bs_id)?
        };
        self.config_cmd(Command::BroadSync, broadsync::config(bs_id), bs.data_word())?;
        self.state.lock().unwrap().bs[bs_id].enable = false;
        Ok(())
    }

    pub fn broadsync_status(&self, bs_id: usize) -> AsicResult<BroadSyncStatus> {
        check_index("broadsync", bs_id, NUM_BROADSYNC)?;
        let (_, r2) = self.config_cmd(Command::BroadSync, broadsync::status(bs_id), 0)?;
        Ok(BroadSyncStatus {
            status: r2 as u32,
            variance: (r2 >> 32) as u32,
        })
    }

    /// Set the phase offset of an input-mode BroadSync instance.  Output
    /// instances have their offset forced to zero.
    pub fn broadsync_phase_offset(&self, bs_id: usize, offset: TimeOffset) -> AsicResult<()> {
        let offset = if self.broadsync(bs_id)?.mode == 0 {
            offset
        } else {
            TimeOffset::default()
        };
        let ns = offset.to_signed_ns();
        self.config_cmd(Command::BroadSync, broadsync::phase_offset(bs_id), ns as u64)?;
        self.state.lock().unwrap().bs[bs_id].offset = offset;
        Ok(())
    }

    pub fn gpio(&self, gpio: usize) -> AsicResult<GpioConfig> {
        check_index("gpio", gpio, ts_event::NUM_GPIO_EVENTS)?;
        Ok(self.state.lock().unwrap().gpio[gpio])
    }

    /// Program GPIO output `gpio`.  The phase offset command is only sent
    /// when the offset actually changed.
    pub fn gpio_config(&self, gpio: usize, cfg: GpioConfig) -> AsicResult<()> {
        let current = self.gpio(gpio)?;
        let g = GpioConfig {
            phase_offset: current.phase_offset,
            ..cfg
        };
        self.config_cmd(Command::Gpio, fw::gpio_subcmd(gpio), g.data_word())?;
        self.state.lock().unwrap().gpio[gpio] = g;
        if current.phase_offset != cfg.phase_offset {
            self.gpio_phase_offset(gpio, cfg.phase_offset)?;
        }
        Ok(())
    }

    pub fn gpio_phase_offset(&self, gpio: usize, phase_offset: i64) -> AsicResult<()> {
        check_index("gpio", gpio, ts_event::NUM_GPIO_EVENTS)?;
        self.config_cmd(
            Command::GpioPhaseOffset,
            fw::gpio_subcmd(gpio),
            phase_offset as u64,
        )?;
        self.state.lock().unwrap().gpio[gpio].phase_offset = phase_offset;
        Ok(())
    }

    pub fn ptp_tod_offset(&self) -> TimeOffset {
        self.state.lock().unwrap().ptp_tod
    }

    /// Set the offset between the PHC and PTP time of day.
    pub fn ptp_tod_set(&self, offset: TimeOffset) -> AsicResult<()> {
        let offset = offset.masked();
        let d0 = (offset.negative as u64) << 47 | offset.sec;
        self.config_cmd(Command::PtpTod, d0, offset.nsec as u64)?;
        self.state.lock().unwrap().ptp_tod = offset;
        Ok(())
    }

    pub fn ptp_tod_get(&self) -> AsicResult<FwTime> {
        let (sec, nsec) = self.execute(Command::PtpTodGet, None, None)?;
        Ok(FwTime::new(sec, nsec as u32))
    }

    pub fn ntp_tod(&self) -> NtpTod {
        self.state.lock().unwrap().ntp_tod
    }

    pub(crate) fn set_ntp_tod_shadow(&self, tod: NtpTod) {
        self.state.lock().unwrap().ntp_tod = tod;
    }

    /// Send an NTP time-of-day command.  The firmware takes either a leap
    /// second operation or an epoch offset; the shadow is left to the
    /// caller.
    pub fn ntp_tod_cmd(
        &self,
        leap_sec_ctrl_en: bool,
        leap_sec_op: u32,
        epoch_offset: u64,
    ) -> AsicResult<()> {
        let d0 = (leap_sec_ctrl_en as u64) << 1 | (leap_sec_op & 0x1) as u64;
        self.config_cmd(Command::NtpTod, d0, epoch_offset)?;
        Ok(())
    }

    pub fn ntp_tod_get(&self) -> AsicResult<FwTime> {
        let (sec, nsec) = self.execute(Command::NtpTodGet, None, None)?;
        Ok(FwTime::new(sec, nsec as u32))
    }

    pub fn evlog_enabled(&self, event: usize) -> bool {
        self.state
            .lock()
            .unwrap()
            .evlog_enabled
            .get(event)
            .copied()
            .unwrap_or(false)
    }

    /// Start or stop firmware logging of `event` into the event log.
    pub fn evlog_enable(&self, event: usize, enable: bool) -> AsicResult<()> {
        check_index("event", event, ts_event::NUM_TS_EVENTS)?;
        let addr = {
            let state = self.state.lock().unwrap();
            let region = state.evlog.as_ref().ok_or_else(|| {
                AsicError::Uninitialized("event log not allocated".into())
            })?;
            if enable {
                region.bus_addr() + evlog::record_offset(event) as u64
            } else {
                0
            }
        };
        self.config_cmd(Command::EvLog, event as u64, addr)?;
        self.state.lock().unwrap().evlog_enabled[event] = enable;
        Ok(())
    }

    /// The previous and latest timestamps logged for `event`.  The record
    /// is cleared once read.
    pub fn evlog_read(&self, event: usize) -> AsicResult<(FwTime, FwTime)> {
        check_index("event", event, ts_event::NUM_TS_EVENTS)?;
        self.require_init()?;
        let region = self
            .state
            .lock()
            .unwrap()
            .evlog
            .clone()
            .ok_or_else(|| AsicError::NotFound("event log".into()))?;

        let off = evlog::record_offset(event);
        let mut raw = [0u8; evlog::RECORD_LEN];
        region.read(off, &mut raw)?;
        let mut prev = [0u8; FwTime::PACKED_LEN];
        let mut cur = [0u8; FwTime::PACKED_LEN];
        prev.copy_from_slice(&raw[..FwTime::PACKED_LEN]);
        cur.copy_from_slice(&raw[FwTime::PACKED_LEN..]);
        region.zero(off, evlog::RECORD_LEN)?;
        Ok((FwTime::from_le_bytes(&prev), FwTime::from_le_bytes(&cur)))
    }
}
