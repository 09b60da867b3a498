// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Locating the IEEE 1588 header inside an Ethernet frame.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{be16, byte, PacketError, PacketResult};

pub const ETHER_VLAN: u16 = 0x8100;
pub const ETHER_PTP: u16 = 0x88F7;
pub const ETHER_IPV4: u16 = 0x0800;
pub const ETHER_IPV6: u16 = 0x86DD;

/// Offset of the TPID/EtherType in an untagged Ethernet header.
pub const TPID_OFFSET: usize = 12;
pub const VLAN_TAG_LEN: usize = 4;

/// Offset of the correction field within the PTP common header.
pub const CORRECTION_OFFSET: usize = 8;
/// Offset of the originTimestamp in a SYNC/DELAY_REQ body.
pub const ORIGIN_TS_OFFSET: usize = 34;
pub const ORIGIN_TS_LEN: usize = 10;
/// Offset of messageLength within the PTP common header.
pub const MSG_LEN_OFFSET: usize = 2;

/// How a PTP message is carried.  The discriminants are the values used by
/// the driver interface to name a transport.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Unknown = 0,
    Ieee8023 = 2,
    UdpIpv4 = 4,
    UdpIpv6 = 6,
}

impl Transport {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Transport::Unknown),
            2 => Some(Transport::Ieee8023),
            4 => Some(Transport::UdpIpv4),
            6 => Some(Transport::UdpIpv6),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    fn from_ethertype(ethertype: u16) -> Self {
        match ethertype {
            ETHER_PTP => Transport::Ieee8023,
            ETHER_IPV4 => Transport::UdpIpv4,
            ETHER_IPV6 => Transport::UdpIpv6,
            _ => Transport::Unknown,
        }
    }

    /// Size of the headers in front of the PTP header on an untagged frame.
    /// Unknown transports are treated as UDP over IPv4.
    pub fn ptp_header_offset(self) -> usize {
        match self {
            Transport::Ieee8023 => 14,
            Transport::UdpIpv6 => 62,
            Transport::UdpIpv4 | Transport::Unknown => 42,
        }
    }

    /// Offset of the PTP sequenceId on an untagged frame.  Unknown
    /// transports are treated as raw L2.
    pub fn seq_id_offset(self) -> usize {
        match self {
            Transport::Ieee8023 | Transport::Unknown => 0x2c,
            Transport::UdpIpv4 => 0x48,
            Transport::UdpIpv6 => 0x5c,
        }
    }

    pub fn is_udp(self) -> bool {
        matches!(self, Transport::UdpIpv4 | Transport::UdpIpv6)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transport::Unknown => "auto",
            Transport::Ieee8023 => "l2",
            Transport::UdpIpv4 => "ipv4",
            Transport::UdpIpv6 => "ipv6",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Transport {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" | "0" => Ok(Transport::Unknown),
            "l2" | "2" => Ok(Transport::Ieee8023),
            "ipv4" | "4" => Ok(Transport::UdpIpv4),
            "ipv6" | "6" => Ok(Transport::UdpIpv6),
            x => Err(PacketError::Invalid(format!("transport: {x}"))),
        }
    }
}

/// IEEE 1588 messageType, the low nibble of the first header byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Sync,
    DelayReq,
    PdelayReq,
    PdelayResp,
    FollowUp,
    DelayResp,
    PdelayRespFollowUp,
    Announce,
    Signaling,
    Management,
    Reserved(u8),
}

impl MessageType {
    pub fn from_nibble(b: u8) -> Self {
        match b & 0x0F {
            0x0 => MessageType::Sync,
            0x1 => MessageType::DelayReq,
            0x2 => MessageType::PdelayReq,
            0x3 => MessageType::PdelayResp,
            0x8 => MessageType::FollowUp,
            0x9 => MessageType::DelayResp,
            0xA => MessageType::PdelayRespFollowUp,
            0xB => MessageType::Announce,
            0xC => MessageType::Signaling,
            0xD => MessageType::Management,
            x => MessageType::Reserved(x),
        }
    }

    /// Only SYNC and DELAY_REQ are stamped in one-step mode.
    pub fn is_one_step_event(self) -> bool {
        matches!(self, MessageType::Sync | MessageType::DelayReq)
    }
}

/// True if the frame starting at `data` carries an 802.1Q tag.
pub fn is_tagged(data: &[u8]) -> bool {
    matches!(be16(data, TPID_OFFSET), Ok(ETHER_VLAN))
}

/// Classify the frame by EtherType, skipping a single VLAN tag.  Frames
/// too short to carry an EtherType are `Unknown`.
pub fn transport_get(data: &[u8]) -> Transport {
    let offset = if is_tagged(data) {
        TPID_OFFSET + VLAN_TAG_LEN
    } else {
        TPID_OFFSET
    };
    match be16(data, offset) {
        Ok(ethertype) => Transport::from_ethertype(ethertype),
        Err(_) => Transport::Unknown,
    }
}

/// Resolve the transport for a frame: a non-`Unknown` override wins,
/// otherwise inspect the frame.
pub fn resolve_transport(data: &[u8], forced: Transport) -> Transport {
    match forced {
        Transport::Unknown => transport_get(data),
        t => t,
    }
}

/// Offset of the PTP header, accounting for a VLAN tag.
pub fn ptp_header_offset(data: &[u8], transport: Transport) -> usize {
    let tag = if is_tagged(data) { VLAN_TAG_LEN } else { 0 };
    transport.ptp_header_offset() + tag
}

/// Extract the PTP sequenceId of a frame.
pub fn seq_id(data: &[u8], transport: Transport) -> PacketResult<u16> {
    let tag = if is_tagged(data) { VLAN_TAG_LEN } else { 0 };
    be16(data, transport.seq_id_offset() + tag)
}

/// The messageType of the PTP header at `ptp_offset`.
pub fn message_type(data: &[u8], ptp_offset: usize) -> PacketResult<MessageType> {
    Ok(MessageType::from_nibble(byte(data, ptp_offset)?))
}

/// The messageLength field of the PTP header at `ptp_offset`.
pub fn message_len(data: &[u8], ptp_offset: usize) -> PacketResult<u16> {
    be16(data, ptp_offset + MSG_LEN_OFFSET)
}

/// Encode an originTimestamp: 48 bits of seconds followed by 32 bits of
/// nanoseconds, all big-endian.
pub fn origin_timestamp_bytes(sec: i64, nsec: u32) -> [u8; ORIGIN_TS_LEN] {
    let mut out = [0u8; ORIGIN_TS_LEN];
    let sec = sec as u64;
    out[0..2].copy_from_slice(&((sec >> 32) as u16).to_be_bytes());
    out[2..6].copy_from_slice(&(sec as u32).to_be_bytes());
    out[6..10].copy_from_slice(&nsec.to_be_bytes());
    out
}

/// Incrementally fold the new contents of the correction and origin
/// timestamp fields into a UDP checksum.  The incoming checksum is
/// complemented, the 16-bit words of both fields are added, and the sum is
/// folded back to 16 bits.  A result of zero is sent as 0xFFFF, since zero
/// means "no checksum" for UDP.
pub fn one_step_udp_checksum(
    old_csum: u16,
    correction: &[u8; 8],
    origin: &[u8; ORIGIN_TS_LEN],
) -> u16 {
    let mut ck = internet_checksum::Checksum::new();
    ck.add_bytes(&(!old_csum).to_be_bytes());
    ck.add_bytes(correction);
    ck.add_bytes(origin);
    match u16::from_be_bytes(ck.checksum()) {
        0 => 0xFFFF,
        c => c,
    }
}
