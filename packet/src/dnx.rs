// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Parsing of the JR2-format system headers that DNX devices prefix to
//! frames punted to the CPU.
//!
//! The stack is FTMH, its optional extensions, an optional timestamp
//! header, an optional PPH with its own extensions, and finally the UDH.
//! Most extension sizes are not self-describing; they come from the
//! device's header configuration.

use serde::{Deserialize, Serialize};

use crate::parse_error;
use crate::pbuf::ParseBuffer;
use crate::PacketResult;

pub const FTMH_HDR_LEN: usize = 10;
pub const FTMH_TM_DEST_EXT_LEN: usize = 3;
pub const FTMH_FLOWID_EXT_LEN: usize = 3;
pub const FTMH_BIER_BFR_EXT_LEN: usize = 3;
pub const FTMH_APP_SPECIFIC_EXT_LEN: usize = 6;
pub const TSH_HDR_LEN: usize = 4;
pub const PPH_BASE_HDR_LEN: usize = 12;
pub const PPH_LEARN_EXT_LEN: usize = 19;
pub const PPH_LIF_EXT_TYPE_MAX: usize = 8;
pub const UDH_BASE_HDR_LEN: usize = 1;
pub const UDH_DATA_TYPE_MAX: usize = 4;

/// Length of the PTCH/ITMH module header prepended on injection.
pub const MODULE_HDR_LEN: usize = 16;
pub const ITMH_HDR_LEN: usize = 5;

/// The FTMH "pph_type" field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PphType {
    None,
    PphBase,
    TshOnly,
    PphBaseTsh,
}

impl PphType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => PphType::None,
            1 => PphType::PphBase,
            2 => PphType::TshOnly,
            _ => PphType::PphBaseTsh,
        }
    }

    fn has_tsh(self) -> bool {
        matches!(self, PphType::TshOnly | PphType::PphBaseTsh)
    }

    fn has_pph(self) -> bool {
        matches!(self, PphType::PphBase | PphType::PphBaseTsh)
    }
}

/// How the system headers are laid out on this device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHeadersMode {
    Jericho,
    #[default]
    Jericho2,
}

/// Header-size parameters for a JR2-family device, supplied by the SDK.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Jr2HeaderConfig {
    pub ftmh_lb_key_ext_size: u32,
    pub ftmh_stacking_ext_size: u32,
    pub pph_base_size: u32,
    pub pph_lif_ext_size: [u32; PPH_LIF_EXT_TYPE_MAX],
    pub system_headers_mode: SystemHeadersMode,
    pub udh_enable: bool,
    pub udh_data_len_per_type: [u32; UDH_DATA_TYPE_MAX],
    pub cosq_port_cpu_channel: u32,
    pub cosq_port_pp_port: u32,
}

/// What the system headers tell us about a received frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DnxRxInfo {
    pub src_sys_port: u16,
    /// The 32-bit ingress timestamp from the TSH, if present.
    pub rx_hw_timestamp: u32,
    /// VLAN id recovered from a VLAN-edit FHEI extension.
    pub pph_vlan: u16,
    /// Offset of the first byte past the system headers.
    pub header_offset: usize,
    /// Packet size as recorded in the FTMH.
    pub frame_len: u16,
}

fn skip(pb: &mut ParseBuffer, len: u32) -> PacketResult<()> {
    pb.skip_bytes(len as usize)
}

fn fhei_vlan(ext: &[u8]) -> Option<u16> {
    // The last three bytes carry the outer VLAN edit, with the extension
    // type in the low bit of the final byte.
    let n = ext.len();
    let (b1, b2) = (ext[n - 2], ext[n - 1]);
    if b2 & 0x1 != 0 {
        return None;
    }
    Some(((b1 & 0x1f) as u16) << 7 | (b2 >> 1) as u16)
}

/// Walk the system headers at the start of `data`.  `first_header` is set
/// when the UDH is not present on this hop.
pub fn parse_rx_system_header(
    cfg: &Jr2HeaderConfig,
    data: &[u8],
    first_header: bool,
) -> PacketResult<DnxRxInfo> {
    let mut pb = ParseBuffer::new_from_slice(data);
    let mut info = DnxRxInfo::default();

    // FTMH base
    let w0 = pb.get_u32()?;
    let w1 = pb.get_u32()?;
    let _ = pb.get_u8()?;
    let flags = pb.get_u8()?;

    let aggr_1 = w0 & 0xff;
    let aggr_0 = (w0 >> 8) & 0x7f;
    let aggr_2 = w1 >> 31;
    info.src_sys_port = (aggr_0 << 9 | aggr_1 << 1 | aggr_2) as u16;
    let size_1 = (w0 >> 18) & 0x3f;
    let size_0 = w0 >> 24;
    info.frame_len = (size_0 << 6 | size_1) as u16;

    let bier = flags & 0x02 != 0;
    let flow_id = flags & 0x04 != 0;
    let app_specific = flags & 0x08 != 0;
    let tm_dest = flags & 0x10 != 0;
    let pph_type = PphType::from_bits(flags >> 5);

    skip(&mut pb, cfg.ftmh_lb_key_ext_size)?;
    skip(&mut pb, cfg.ftmh_stacking_ext_size)?;
    if bier {
        pb.skip_bytes(FTMH_BIER_BFR_EXT_LEN)?;
    }
    if tm_dest {
        pb.skip_bytes(FTMH_TM_DEST_EXT_LEN)?;
    }
    if app_specific {
        pb.skip_bytes(FTMH_APP_SPECIFIC_EXT_LEN)?;
    }
    if flow_id {
        pb.skip_bytes(FTMH_FLOWID_EXT_LEN)?;
    }

    if pph_type.has_tsh() {
        info.rx_hw_timestamp = pb.get_u32()?;
    }

    if pph_type.has_pph() {
        let pph = pb.remaining();
        if pph.len() < PPH_BASE_HDR_LEN {
            return Err(parse_error(&pb, "truncated PPH"));
        }
        let w2 = u32::from_be_bytes([pph[8], pph[9], pph[10], pph[11]]);
        let lif_ext_type = ((w2 >> 13) & 0x7) as usize;
        let fhei_size = (w2 >> 16) & 0x3;
        let learn_ext = (w2 >> 18) & 0x1 != 0;
        skip(&mut pb, cfg.pph_base_size)?;

        let fhei_len = match fhei_size {
            1 => 3,
            2 => 5,
            3 => 8,
            _ => 0,
        };
        if fhei_len > 0 {
            let ext = pb.get_bytes(fhei_len)?;
            if fhei_len < 8 {
                if let Some(vlan) = fhei_vlan(ext) {
                    info.pph_vlan = vlan;
                }
            }
        }

        if lif_ext_type > 0 {
            skip(&mut pb, cfg.pph_lif_ext_size[lif_ext_type])?;
        }
        if learn_ext {
            pb.skip_bytes(PPH_LEARN_EXT_LEN)?;
        }
    }

    if !first_header && cfg.udh_enable {
        let udh = pb.get_u8()?;
        for shift in [6, 4, 2, 0] {
            let ty = ((udh >> shift) & 0x3) as usize;
            skip(&mut pb, cfg.udh_data_len_per_type[ty])?;
        }
    }

    info.header_offset = pb.offset();
    Ok(info)
}
