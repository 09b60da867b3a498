// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Time representations used when talking to a PHC.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const ONE_BILLION: u64 = 1_000_000_000;

/// Seconds and nanoseconds since the PTP epoch, as exchanged with the OS
/// clock interface.  `nsec` is always normalized into `0..ONE_BILLION`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize,
)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: u32,
}

impl Timespec {
    pub fn new(sec: i64, nsec: u32) -> Self {
        Timespec { sec, nsec }
    }

    /// Split a nanosecond count, rounding toward negative infinity so that
    /// the nanosecond field stays non-negative.
    pub fn from_ns(ns: i64) -> Self {
        let billion = ONE_BILLION as i64;
        Timespec {
            sec: ns.div_euclid(billion),
            nsec: ns.rem_euclid(billion) as u32,
        }
    }

    pub fn to_ns(&self) -> i64 {
        self.sec
            .wrapping_mul(ONE_BILLION as i64)
            .wrapping_add(i64::from(self.nsec))
    }
}

impl fmt::Display for Timespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

/// A seconds/nanoseconds pair as the firmware lays it out.  Seconds are
/// unsigned and may be wider than 32 bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FwTime {
    pub sec: u64,
    pub nsec: u32,
}

impl FwTime {
    /// Size of the packed `{u64 sec, u32 nsec}` layout.
    pub const PACKED_LEN: usize = 12;

    pub fn new(sec: u64, nsec: u32) -> Self {
        FwTime { sec, nsec }
    }

    pub fn from_le_bytes(b: &[u8; Self::PACKED_LEN]) -> Self {
        let mut sec = [0u8; 8];
        let mut nsec = [0u8; 4];
        sec.copy_from_slice(&b[0..8]);
        nsec.copy_from_slice(&b[8..12]);
        FwTime {
            sec: u64::from_le_bytes(sec),
            nsec: u32::from_le_bytes(nsec),
        }
    }

    pub fn to_le_bytes(&self) -> [u8; Self::PACKED_LEN] {
        let mut out = [0u8; Self::PACKED_LEN];
        out[0..8].copy_from_slice(&self.sec.to_le_bytes());
        out[8..12].copy_from_slice(&self.nsec.to_le_bytes());
        out
    }

    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    pub fn to_ns(&self) -> u64 {
        self.sec
            .wrapping_mul(ONE_BILLION)
            .wrapping_add(u64::from(self.nsec))
    }
}

impl fmt::Display for FwTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

/// A signed offset expressed as magnitude and sign, the shape used for
/// BroadSync phase offsets and the PTP time-of-day offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeOffset {
    pub negative: bool,
    /// Only the low 47 bits are meaningful to firmware.
    pub sec: u64,
    /// Only the low 30 bits are meaningful to firmware.
    pub nsec: u32,
}

impl TimeOffset {
    pub const SEC_MASK: u64 = 0x7FFF_FFFF_FFFF;
    pub const NSEC_MASK: u32 = 0x3FFF_FFFF;

    pub fn new(negative: bool, sec: u64, nsec: u32) -> Self {
        TimeOffset {
            negative,
            sec,
            nsec,
        }
    }

    /// Clamp the fields to the widths the firmware accepts.
    pub fn masked(self) -> Self {
        TimeOffset {
            negative: self.negative,
            sec: self.sec & Self::SEC_MASK,
            nsec: self.nsec & Self::NSEC_MASK,
        }
    }

    pub fn to_signed_ns(&self) -> i64 {
        let mag = (self.sec as i64)
            .wrapping_mul(ONE_BILLION as i64)
            .wrapping_add(i64::from(self.nsec));
        if self.negative {
            mag.wrapping_neg()
        } else {
            mag
        }
    }
}

/// Scaled parts-per-million, the unit the OS uses for `adjfine`: ppm with a
/// 16 bit binary fraction.
pub fn scaled_ppm_to_ppb(scaled_ppm: i64) -> i64 {
    ((1 + scaled_ppm) * 125) >> 13
}
