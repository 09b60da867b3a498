// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The packet driver's generic configuration entry point.  Requests and
//! responses are arrays of 32-bit words; 64-bit values travel as a high
//! word followed by a low word.

use slog::debug;

use aal::{AsicError, AsicResult, HwTimestampOps, IoctlCmd, TxType};
use common::time::{FwTime, TimeOffset};
use packet::dnx::{
    Jr2HeaderConfig, SystemHeadersMode, PPH_LIF_EXT_TYPE_MAX, UDH_DATA_TYPE_MAX,
};

use crate::config::{DebugFlags, InitData};
use crate::configure::{BroadSyncConfig, GpioConfig, NtpTod};
use crate::Subsystem;

/// Words in a DNX_JR2DEVS_SYS_CONFIG request.
pub const JR2_CONFIG_WORDS: usize = 3 + PPH_LIF_EXT_TYPE_MAX + 2 + UDH_DATA_TYPE_MAX + 2;

fn word(data: &[i32], idx: usize) -> AsicResult<i32> {
    data.get(idx).copied().ok_or_else(|| {
        AsicError::InvalidArg(format!("request needs {} words, got {}", idx + 1, data.len()))
    })
}

fn uword(data: &[i32], idx: usize) -> AsicResult<u32> {
    word(data, idx).map(|w| w as u32)
}

fn index(data: &[i32], idx: usize) -> AsicResult<usize> {
    let w = word(data, idx)?;
    usize::try_from(w).map_err(|_| AsicError::InvalidArg(format!("index {w}")))
}

fn hi_lo(data: &[i32], idx: usize) -> AsicResult<u64> {
    Ok((uword(data, idx)? as u64) << 32 | uword(data, idx + 1)? as u64)
}

fn split(val: u64) -> [i32; 2] {
    [(val >> 32) as i32, val as i32]
}

fn tod_words(t: FwTime) -> Vec<i32> {
    let [hi, lo] = split(t.sec);
    vec![hi, lo, t.nsec as i32]
}

fn jr2_config(data: &[i32]) -> AsicResult<Jr2HeaderConfig> {
    if data.len() < JR2_CONFIG_WORDS {
        return Err(AsicError::InvalidArg(format!(
            "system header config needs {JR2_CONFIG_WORDS} words, got {}",
            data.len()
        )));
    }
    let mut words = data.iter().map(|w| *w as u32);
    let mut next = || words.next().unwrap_or(0);
    Ok(Jr2HeaderConfig {
        ftmh_lb_key_ext_size: next(),
        ftmh_stacking_ext_size: next(),
        pph_base_size: next(),
        pph_lif_ext_size: std::array::from_fn(|_| next()),
        system_headers_mode: match next() {
            0 => SystemHeadersMode::Jericho,
            _ => SystemHeadersMode::Jericho2,
        },
        udh_enable: next() != 0,
        udh_data_len_per_type: std::array::from_fn(|_| next()),
        cosq_port_cpu_channel: next(),
        cosq_port_pp_port: next(),
    })
}

/// Run `cmd` on device `dev_no`.  Commands other than HW_INIT are refused
/// with `NotFound` until the device is up.  Getters return their results;
/// everything else returns no words.
pub fn handle(
    sub: &Subsystem,
    dev_no: usize,
    cmd: IoctlCmd,
    data: &[i32],
) -> AsicResult<Vec<i32>> {
    let dev = sub.device(dev_no)?;
    if !dev.is_initialized() && cmd != IoctlCmd::HwInit {
        return Err(AsicError::NotFound(format!(
            "{} on uninitialized device {dev_no}",
            cmd.name()
        )));
    }
    if sub.debug.is_set(DebugFlags::VERB) {
        debug!(sub.log, "ioctl"; "dev" => dev_no, "cmd" => cmd.name(), "words" => data.len());
    }

    let tod = || sub.tod_device();
    let mut out = Vec::new();
    match cmd {
        IoctlCmd::HwInit => dev.hw_init(InitData::from_words(data)?)?,
        IoctlCmd::HwDeinit => dev.hw_deinit()?,
        IoctlCmd::HwTsDisable => {
            sub.hw_tstamp_disable(dev_no, uword(data, 0)?, TxType::Off)?
        }
        IoctlCmd::MtpTsUpdateEnable => sub.mtp_ts_update(dev_no, uword(data, 0)?, true)?,
        IoctlCmd::MtpTsUpdateDisable => sub.mtp_ts_update(dev_no, uword(data, 0)?, false)?,
        IoctlCmd::Version => {}
        IoctlCmd::DnxJr2devsSysConfig => *dev.jr2.lock().unwrap() = jr2_config(data)?,
        IoctlCmd::BsConfigSet => {
            let bs_id = index(data, 0)?;
            let cfg = BroadSyncConfig {
                enable: true,
                mode: uword(data, 1)?,
                bc: uword(data, 2)?,
                hb: uword(data, 3)?,
                ..dev.broadsync(bs_id)?
            };
            dev.broadsync_config(bs_id, cfg)?;
        }
        IoctlCmd::BsConfigClear => dev.broadsync_clear(index(data, 0)?)?,
        IoctlCmd::BsStatus => {
            let bs_id = index(data, 0)?;
            let st = dev.broadsync_status(bs_id)?;
            out = vec![bs_id as i32, st.variance as i32, st.status as i32];
        }
        IoctlCmd::BsPhaseOffsetSet => {
            let offset = TimeOffset::new(word(data, 1)? != 0, hi_lo(data, 2)?, uword(data, 4)?);
            dev.broadsync_phase_offset(index(data, 0)?, offset)?;
        }
        IoctlCmd::GpioConfigSet => {
            let gpio = index(data, 0)?;
            let cfg = GpioConfig {
                enable: word(data, 1)? != 0,
                mode: uword(data, 2)?,
                period: uword(data, 3)?,
                phase_offset: word(data, 4)? as i64,
            };
            dev.gpio_config(gpio, cfg)?;
        }
        IoctlCmd::GpioConfigGet => {
            let gpio = index(data, 0)?;
            let g = dev.gpio(gpio)?;
            out = vec![gpio as i32, g.mode as i32, g.period as i32, g.phase_offset as i32];
        }
        IoctlCmd::PtpTodOffsetSet => {
            let offset = TimeOffset::new(word(data, 0)? != 0, hi_lo(data, 1)?, uword(data, 3)?);
            tod()?.ptp_tod_set(offset)?;
        }
        IoctlCmd::PtpTodOffsetGet => {
            let off = tod()?.ptp_tod_offset();
            let [hi, lo] = split(off.sec);
            out = vec![off.negative as i32, hi, lo, off.nsec as i32];
        }
        IoctlCmd::PtpTodGet => out = tod_words(tod()?.ptp_tod_get()?),
        IoctlCmd::NtpTodOffsetSet => {
            let dev = tod()?;
            let epoch_offset = hi_lo(data, 0)?;
            dev.ntp_tod_cmd(false, 0, epoch_offset)?;
            dev.set_ntp_tod_shadow(NtpTod {
                epoch_offset,
                ..dev.ntp_tod()
            });
        }
        IoctlCmd::NtpTodOffsetGet => out = split(tod()?.ntp_tod().epoch_offset).to_vec(),
        IoctlCmd::NtpTodGet => out = tod_words(tod()?.ntp_tod_get()?),
        IoctlCmd::LeapSecSet => {
            let dev = tod()?;
            let leap_sec_ctrl_en = word(data, 0)? != 0;
            let leap_sec_op = uword(data, 1)?;
            dev.ntp_tod_cmd(leap_sec_ctrl_en, leap_sec_op, 0)?;
            dev.set_ntp_tod_shadow(NtpTod {
                leap_sec_ctrl_en,
                leap_sec_op,
                ..dev.ntp_tod()
            });
        }
        IoctlCmd::LeapSecGet => {
            let tod = tod()?.ntp_tod();
            out = vec![tod.leap_sec_ctrl_en as i32, tod.leap_sec_op as i32];
        }
    }
    Ok(out)
}
