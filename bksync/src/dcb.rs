// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! DMA descriptor generations.  The generation decides where the device's
//! mailbox lives, which start-of-buffer metadata requests a timestamp, and
//! how the RX metadata reports the COS queue.

use std::fmt;

use serde::{Deserialize, Serialize};

use packet::ptp::Transport;

/// Words of SOBMH metadata per table.  A table holds six rows of four words,
/// selected by tagging and timestamping mode.
pub const SOBMH_WORDS: usize = 24;

/// Row offsets into a SOBMH table.
pub const MD_TAGGED: usize = 4;
pub const MD_ONE_STEP: usize = 8;
/// On DCB 26 one-step frames whose negated counter is non-negative use the
/// row past the one-step row.
pub const MD_ITS_SET: usize = 8;

type SobmhTable = [u32; SOBMH_WORDS];

// Every row carries a single non-zero word, in its second slot.
const fn sobmh(rows: [u32; 6]) -> SobmhTable {
    let mut t = [0u32; SOBMH_WORDS];
    let mut i = 0;
    while i < 6 {
        t[i * 4 + 1] = rows[i];
        i += 1;
    }
    t
}

static RAW_DCB26: SobmhTable = sobmh([
    0x00020E00, 0x00021200, 0x00100E00, 0x00101200, 0x00140E00, 0x00141200,
]);
static IPV4_DCB26: SobmhTable = sobmh([
    0x00022A00, 0x00022E00, 0x00182A00, 0x00182E00, 0x001C2A00, 0x001C2E00,
]);
static IPV6_DCB26: SobmhTable = sobmh([
    0x00023E00, 0x00024200, 0x00183E00, 0x00184200, 0x001C3E00, 0x001C4200,
]);

static RAW_DCB32: SobmhTable = sobmh([
    0x00010E00, 0x00011200, 0x00080E00, 0x00081200, 0x00080E00, 0x00081200,
]);
static IPV4_DCB32: SobmhTable = sobmh([
    0x00012A00, 0x00012E00, 0x000C2A00, 0x000C2E00, 0x000C2A00, 0x000C2E00,
]);
static IPV6_DCB32: SobmhTable = sobmh([
    0x00013E00, 0x00014200, 0x000C3E00, 0x000C4200, 0x000C3E00, 0x000C4200,
]);

static RAW_DCB35: SobmhTable = sobmh([
    0x0020E000, 0x00212000, 0x0100E000, 0x01012000, 0x0140E000, 0x01412000,
]);
static IPV4_DCB35: SobmhTable = sobmh([
    0x0022A000, 0x0022E000, 0x0182A000, 0x0182E000, 0x01C2A000, 0x01C2E000,
]);
static IPV6_DCB35: SobmhTable = sobmh([
    0x0023E000, 0x00242000, 0x0183E000, 0x01842000, 0x01C3E000, 0x01C42000,
]);

static RAW_DCB38: SobmhTable = sobmh([
    0x00080E00, 0x00081200, 0x00080E00, 0x00081200, 0x00080E00, 0x00081200,
]);
static IPV4_DCB38: SobmhTable = sobmh([
    0x00082A00, 0x00082E00, 0x000C2A00, 0x000C2E00, 0x000C2A00, 0x000C2E00,
]);
static IPV6_DCB38: SobmhTable = sobmh([
    0x00083E00, 0x00084200, 0x000C3E00, 0x000C4200, 0x000C3E00, 0x000C4200,
]);

/// The descriptor generations the subsystem knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum DcbType {
    Dcb26,
    /// DPP devices.
    Dcb28,
    Dcb32,
    Dcb35,
    Dcb36,
    Dcb37,
    Dcb38,
    /// DNX devices (Q2A, J2C).
    Dcb39,
}

impl DcbType {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            26 => Some(DcbType::Dcb26),
            28 => Some(DcbType::Dcb28),
            32 => Some(DcbType::Dcb32),
            35 => Some(DcbType::Dcb35),
            36 => Some(DcbType::Dcb36),
            37 => Some(DcbType::Dcb37),
            38 => Some(DcbType::Dcb38),
            39 => Some(DcbType::Dcb39),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            DcbType::Dcb26 => 26,
            DcbType::Dcb28 => 28,
            DcbType::Dcb32 => 32,
            DcbType::Dcb35 => 35,
            DcbType::Dcb36 => 36,
            DcbType::Dcb37 => 37,
            DcbType::Dcb38 => 38,
            DcbType::Dcb39 => 39,
        }
    }

    /// Devices with a CMICx, whose CMC registers sit at a different base.
    pub fn is_cmicx(self) -> bool {
        matches!(self, DcbType::Dcb36 | DcbType::Dcb38 | DcbType::Dcb39)
    }

    pub fn is_dpp(self) -> bool {
        self == DcbType::Dcb28
    }

    pub fn is_dnx(self) -> bool {
        self == DcbType::Dcb39
    }

    /// Whether the TX path sees device headers ahead of the Ethernet
    /// header.
    pub fn has_tx_header(self) -> bool {
        self.is_cmicx() || self.is_dpp()
    }

    fn sobmh_table(self, transport: Transport) -> Option<&'static SobmhTable> {
        use Transport::*;
        let t = match (self, transport) {
            (DcbType::Dcb26 | DcbType::Dcb37, Ieee8023) => &RAW_DCB26,
            (DcbType::Dcb26 | DcbType::Dcb37, UdpIpv6) => &IPV6_DCB26,
            (DcbType::Dcb26 | DcbType::Dcb37, _) => &IPV4_DCB26,
            (DcbType::Dcb32 | DcbType::Dcb36, Ieee8023) => &RAW_DCB32,
            (DcbType::Dcb32 | DcbType::Dcb36, UdpIpv6) => &IPV6_DCB32,
            (DcbType::Dcb32 | DcbType::Dcb36, _) => &IPV4_DCB32,
            (DcbType::Dcb35, Ieee8023) => &RAW_DCB35,
            (DcbType::Dcb35, UdpIpv6) => &IPV6_DCB35,
            (DcbType::Dcb35, _) => &IPV4_DCB35,
            (DcbType::Dcb38, Ieee8023) => &RAW_DCB38,
            (DcbType::Dcb38, UdpIpv6) => &IPV6_DCB38,
            (DcbType::Dcb38, _) => &IPV4_DCB38,
            (DcbType::Dcb28 | DcbType::Dcb39, _) => return None,
        };
        Some(t)
    }

    /// The four metadata words for a frame, given the row offset built from
    /// `MD_TAGGED`, `MD_ONE_STEP` and `MD_ITS_SET`.  Unknown transports use
    /// the IPv4 table.  DPP and DNX devices carry no SOBMH metadata.
    pub fn sobmh(self, transport: Transport, row: usize) -> Option<[u32; 4]> {
        let table = self.sobmh_table(transport)?;
        let mut md = [0u32; 4];
        md.copy_from_slice(table.get(row..row + 4)?);
        Some(md)
    }

    /// Whether a received frame's descriptor metadata shows it arrived on
    /// the COS queue reserved for timestamped traffic.  DPP and DNX frames
    /// are not filtered.
    pub fn rx_cos_matches(self, pci_cos: u32, meta: &[u32]) -> bool {
        let word = |i: usize| meta.get(i).copied();
        let cos = match self {
            DcbType::Dcb28 | DcbType::Dcb39 => return true,
            DcbType::Dcb26
            | DcbType::Dcb32
            | DcbType::Dcb35
            | DcbType::Dcb37 => word(4).map(|w| w & 0x3F),
            DcbType::Dcb38 => word(12).map(|w| (w >> 22) & 0x2F),
            DcbType::Dcb36 => word(6).map(|w| (w >> 22) & 0x2F),
        };
        cos == Some(pci_cos)
    }
}

impl fmt::Display for DcbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dcb{}", self.code())
    }
}

impl TryFrom<u32> for DcbType {
    type Error = String;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        DcbType::from_code(code).ok_or_else(|| format!("unknown dcb type {code}"))
    }
}

impl From<DcbType> for u32 {
    fn from(d: DcbType) -> u32 {
        d.code()
    }
}
