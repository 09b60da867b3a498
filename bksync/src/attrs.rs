// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Named configuration attributes.
//!
//! Each attribute is a row of `key:value` fields that can be shown and
//! stored: `bs0`..`bs3` for the BroadSync instances (two per device),
//! `gpio0`..`gpio11` for the GPIO outputs (six per device), `ptp_tod` and
//! `ntp_tod` for the time-of-day offsets, and `evlog/<event>` for the
//! event log.  Time-of-day and event log rows always address the master
//! device.  A stored row may leave out fields; those keep their current
//! values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use slog::debug;

use aal::fw::ts_event;
use aal::{AsicError, AsicResult};

use crate::config::DebugFlags;
use crate::configure::{BroadSyncStatus, NtpTod, NUM_BROADSYNC};
use crate::device::Device;
use crate::Subsystem;

/// Event log sources, in firmware event order.
const EVLOG_NAMES: [&str; 9] = [
    "cpu", "bs0", "bs1", "gpio0", "gpio1", "gpio2", "gpio3", "gpio4", "gpio5",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attr {
    BroadSync { dev_no: usize, bs_id: usize },
    Gpio { dev_no: usize, gpio: usize },
    PtpTod,
    NtpTod,
    EvLog { event: usize },
}

impl Attr {
    /// Every attribute a subsystem of `num_devices` devices has.
    pub fn all(num_devices: usize) -> Vec<Attr> {
        let mut attrs = Vec::new();
        for dev_no in 0..num_devices {
            attrs.extend((0..NUM_BROADSYNC).map(|bs_id| Attr::BroadSync { dev_no, bs_id }));
        }
        for dev_no in 0..num_devices {
            attrs.extend(
                (0..ts_event::NUM_GPIO_EVENTS).map(|gpio| Attr::Gpio { dev_no, gpio }),
            );
        }
        attrs.push(Attr::PtpTod);
        attrs.push(Attr::NtpTod);
        attrs.extend((0..EVLOG_NAMES.len()).map(|event| Attr::EvLog { event }));
        attrs
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attr::BroadSync { dev_no, bs_id } => {
                write!(f, "bs{}", dev_no * NUM_BROADSYNC + bs_id)
            }
            Attr::Gpio { dev_no, gpio } => {
                write!(f, "gpio{}", dev_no * ts_event::NUM_GPIO_EVENTS + gpio)
            }
            Attr::PtpTod => write!(f, "ptp_tod"),
            Attr::NtpTod => write!(f, "ntp_tod"),
            Attr::EvLog { event } => write!(f, "evlog/{}", EVLOG_NAMES[*event]),
        }
    }
}

impl FromStr for Attr {
    type Err = AsicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || AsicError::NotFound(format!("attribute {s:?}"));
        let numbered = |prefix: &str| -> Option<usize> {
            let n = s.strip_prefix(prefix)?;
            if n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            n.parse().ok()
        };

        if let Some(name) = s.strip_prefix("evlog/") {
            return EVLOG_NAMES
                .iter()
                .position(|n| *n == name)
                .map(|event| Attr::EvLog { event })
                .ok_or_else(unknown);
        }
        match s {
            "ptp_tod" => return Ok(Attr::PtpTod),
            "ntp_tod" => return Ok(Attr::NtpTod),
            _ => {}
        }
        if let Some(n) = numbered("bs") {
            return Ok(Attr::BroadSync {
                dev_no: n / NUM_BROADSYNC,
                bs_id: n % NUM_BROADSYNC,
            });
        }
        if let Some(n) = numbered("gpio") {
            return Ok(Attr::Gpio {
                dev_no: n / ts_event::NUM_GPIO_EVENTS,
                gpio: n % ts_event::NUM_GPIO_EVENTS,
            });
        }
        Err(unknown())
    }
}

/// An attribute row to apply at startup.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct AttrSetting {
    pub attr: String,
    pub value: String,
}

fn fields(input: &str) -> AsicResult<Vec<(&str, &str)>> {
    input
        .split_whitespace()
        .map(|tok| {
            tok.split_once(':')
                .ok_or_else(|| AsicError::InvalidArg(format!("malformed field {tok:?}")))
        })
        .collect()
}

fn num<T: FromStr>(key: &str, val: &str) -> AsicResult<T> {
    val.parse()
        .map_err(|_| AsicError::InvalidArg(format!("bad value for {key}: {val:?}")))
}

fn flag(key: &str, val: &str) -> AsicResult<bool> {
    num::<i64>(key, val).map(|v| v != 0)
}

fn unknown_field(key: &str) -> AsicError {
    AsicError::InvalidArg(format!("unknown field {key:?}"))
}

/// `sec.nsec`, as the BroadSync phase offset is written.
fn sec_nsec(key: &str, val: &str) -> AsicResult<(u64, u32)> {
    match val.split_once('.') {
        Some((sec, nsec)) => Ok((num(key, sec)?, num(key, nsec)?)),
        None => Ok((num(key, val)?, 0)),
    }
}

impl Subsystem {
    /// The master device, which must be up.
    pub(crate) fn tod_device(&self) -> AsicResult<&Device> {
        let dev = self.master_device();
        if dev.is_initialized() {
            Ok(dev)
        } else {
            Err(AsicError::NotFound(format!(
                "master device {} not initialized",
                dev.dev_no
            )))
        }
    }

    pub fn attr_show(&self, attr: Attr) -> AsicResult<String> {
        match attr {
            Attr::BroadSync { dev_no, bs_id } => {
                let dev = self.device(dev_no)?;
                let bs = dev.broadsync(bs_id)?;
                let st = if bs.enable {
                    dev.broadsync_status(bs_id)?
                } else {
                    BroadSyncStatus::default()
                };
                Ok(format!(
                    "enable:{} mode:{} bc:{} hb:{} sign:{} offset:{}.{} status:{}({})\n",
                    bs.enable as u32,
                    bs.mode,
                    bs.bc,
                    bs.hb,
                    bs.offset.negative as u32,
                    bs.offset.sec,
                    bs.offset.nsec,
                    st.status,
                    st.variance
                ))
            }
            Attr::Gpio { dev_no, gpio } => {
                let g = self.device(dev_no)?.gpio(gpio)?;
                Ok(format!(
                    "enable:{} mode:{} period:{} phaseoffset:{}\n",
                    g.enable as u32, g.mode, g.period, g.phase_offset
                ))
            }
            Attr::PtpTod => {
                let dev = self.tod_device()?;
                let off = dev.ptp_tod_offset();
                let now = dev.ptp_tod_get()?;
                Ok(format!(
                    "sign:{} offset_sec:{} offset_nsec:{} ptp_tod:{}sec:{}nsec\n",
                    off.negative as u32, off.sec, off.nsec, now.sec, now.nsec
                ))
            }
            Attr::NtpTod => {
                let dev = self.tod_device()?;
                let tod = dev.ntp_tod();
                let now = dev.ntp_tod_get()?;
                Ok(format!(
                    "leap_sec_ctrl_en:{} leap_sec_op:{} epoch_offset:{} ntp_tod:{}sec:{}nsec\n",
                    tod.leap_sec_ctrl_en as u32,
                    tod.leap_sec_op,
                    tod.epoch_offset,
                    now.sec,
                    now.nsec
                ))
            }
            Attr::EvLog { event } => {
                let dev = self.tod_device()?;
                let (prev, cur) = dev.evlog_read(event)?;
                Ok(format!(
                    "enable:{} Previous Time:{}.{:09} Latest Time:{}.{:09}\n",
                    dev.evlog_enabled(event) as u32,
                    prev.sec,
                    prev.nsec,
                    cur.sec,
                    cur.nsec
                ))
            }
        }
    }

    pub fn attr_store(&self, attr: Attr, input: &str) -> AsicResult<()> {
        let fields = fields(input)?;
        if self.debug.is_set(DebugFlags::VERB) {
            debug!(self.log, "attribute store"; "attr" => %attr, "input" => input.trim());
        }

        match attr {
            Attr::BroadSync { dev_no, bs_id } => {
                let dev = self.device(dev_no)?;
                let mut bs = dev.broadsync(bs_id)?;
                for (key, val) in fields {
                    match key {
                        "enable" => bs.enable = flag(key, val)?,
                        "mode" => bs.mode = num(key, val)?,
                        "bc" => bs.bc = num(key, val)?,
                        "hb" => bs.hb = num(key, val)?,
                        "sign" => bs.offset.negative = flag(key, val)?,
                        "offset" => {
                            (bs.offset.sec, bs.offset.nsec) = sec_nsec(key, val)?
                        }
                        _ => return Err(unknown_field(key)),
                    }
                }
                dev.broadsync_config(bs_id, bs)?;
                dev.broadsync_phase_offset(bs_id, bs.offset)
            }
            Attr::Gpio { dev_no, gpio } => {
                let dev = self.device(dev_no)?;
                let mut g = dev.gpio(gpio)?;
                for (key, val) in fields {
                    match key {
                        "enable" => g.enable = flag(key, val)?,
                        "mode" => g.mode = num(key, val)?,
                        "period" => g.period = num(key, val)?,
                        "phaseoffset" => g.phase_offset = num(key, val)?,
                        _ => return Err(unknown_field(key)),
                    }
                }
                dev.gpio_config(gpio, g)
            }
            Attr::PtpTod => {
                let dev = self.tod_device()?;
                let mut off = dev.ptp_tod_offset();
                for (key, val) in fields {
                    match key {
                        "sign" => off.negative = flag(key, val)?,
                        "offset_sec" => off.sec = num(key, val)?,
                        "offset_ns" | "offset_nsec" => off.nsec = num(key, val)?,
                        _ => return Err(unknown_field(key)),
                    }
                }
                dev.ptp_tod_set(off)
            }
            Attr::NtpTod => {
                let dev = self.tod_device()?;
                let cur = dev.ntp_tod();
                let mut req = cur;
                for (key, val) in fields {
                    match key {
                        "leap_sec_ctrl_en" => req.leap_sec_ctrl_en = flag(key, val)?,
                        "leap_sec_op" => req.leap_sec_op = num(key, val)?,
                        "epoch_offset" => req.epoch_offset = num(key, val)?,
                        _ => return Err(unknown_field(key)),
                    }
                }
                dev.ntp_tod_cmd(req.leap_sec_ctrl_en, req.leap_sec_op, req.epoch_offset)?;
                // A leap second operation and an epoch change are exclusive;
                // the epoch is only kept when no leap second is requested.
                dev.set_ntp_tod_shadow(NtpTod {
                    epoch_offset: if req.leap_sec_ctrl_en {
                        cur.epoch_offset
                    } else {
                        req.epoch_offset
                    },
                    ..req
                });
                Ok(())
            }
            Attr::EvLog { event } => {
                let dev = self.master_device();
                let mut enable = dev.evlog_enabled(event);
                for (key, val) in fields {
                    match key {
                        "enable" => enable = flag(key, val)?,
                        _ => return Err(unknown_field(key)),
                    }
                }
                dev.evlog_enable(event, enable)
            }
        }
    }

    /// Store each row in turn, stopping at the first failure.
    pub fn apply_attrs(&self, settings: &[AttrSetting]) -> AsicResult<()> {
        for s in settings {
            let attr: Attr = s.attr.parse()?;
            self.attr_store(attr, &s.value)?;
        }
        Ok(())
    }
}
