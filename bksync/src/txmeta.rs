// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Preparing PTP frames for timestamped transmission.
//!
//! Depending on the device this means choosing the start-of-buffer
//! metadata that asks the pipeline for a timestamp, rewriting the internal
//! headers in front of the frame so the egress pipeline finds the PTP
//! header, and, for one-step frames, writing the correction and origin
//! timestamp fields from the cached clock sample.

use slog::debug;

use aal::{AsicResult, TxMeta, TxType};
use common::time::Timespec;
use packet::dnx::{FTMH_APP_SPECIFIC_EXT_LEN, ITMH_HDR_LEN, MODULE_HDR_LEN, TSH_HDR_LEN};
use packet::ptp::{self, MessageType, Transport};
use packet::{PacketError, PacketResult};

use crate::config::DebugFlags;
use crate::dcb::{DcbType, MD_ITS_SET, MD_ONE_STEP, MD_TAGGED};
use crate::device::Device;
use crate::hex_dump;

/// Device headers shorter than a two-byte PTCH carry nothing to rewrite.
const PTCH_2_LEN: usize = 2;
const PTCH_1_LEN: usize = 3;
const PPH_LEN: usize = 12;

/// Where the PPH and UDH are moved to once the ASE and TSH are in place.
const PPH_MOVED_OFFSET: usize = 34;
const UDH_MOVED_OFFSET: usize = 46;

/// Whether the frame's own headers already include a PPH and UDH that
/// must be moved behind the inserted ASE and TSH.  Below these offsets
/// the device header starts with a two-byte PTCH.
const IPV6_PPH_PRESENT_OFFSET: usize = 93;
const PPH_PRESENT_MIN_OFFSET: usize = 73;

fn too_short(what: &str) -> PacketError {
    PacketError::Invalid(format!("frame too short for {what}"))
}

/// DPP: mark the OAM-TS header as a 1588 stamp request and tell the
/// pipeline where the PTP header starts, relative to the packet.
fn rewrite_otsh(
    frame: &mut [u8],
    one_step: bool,
    transport: Transport,
    ptp_offset: usize,
) -> PacketResult<()> {
    *packet::byte_mut(frame, 2)? |= 0x80;

    let command: u8 = if one_step { 0x1 } else { 0x2 };
    let l2 = (transport == Transport::Ieee8023) as u8;
    *packet::byte_mut(frame, 6)? = 0x40 | command << 3 | l2 << 2 | 0x1;
    packet::zero(frame, 7, 4)?;
    *packet::byte_mut(frame, 11)? = ptp_offset as u8;
    Ok(())
}

fn move_pph_udh(frame: &mut [u8], itmh: usize) -> PacketResult<()> {
    let pph = itmh + ITMH_HDR_LEN;
    let udh = pph + PPH_LEN;
    let need = (udh + 1).max(UDH_MOVED_OFFSET + 1);
    if frame.len() < need {
        return Err(too_short("PPH relocation"));
    }
    frame.copy_within(pph..udh, PPH_MOVED_OFFSET);
    frame[UDH_MOVED_OFFSET] = frame[udh];
    Ok(())
}

/// Write the ASE-1588 extension after the ITMH and clear the TSH that
/// follows it.
fn write_ase(
    frame: &mut [u8],
    itmh: usize,
    l2: bool,
    command: Option<u8>,
    offset: usize,
) -> PacketResult<()> {
    let ase = itmh + ITMH_HDR_LEN;
    packet::zero(frame, ase, FTMH_APP_SPECIFIC_EXT_LEN)?;

    let mut b4 = (l2 as u8) << 7 | ((offset & 0xf0) >> 4) as u8;
    if let Some(cmd) = command {
        b4 |= cmd << 4;
    }
    *packet::byte_mut(frame, ase + 4)? |= b4;
    *packet::byte_mut(frame, ase + 5)? = ((offset & 0xf) << 4) as u8 | 0x1;

    packet::zero(frame, ase + FTMH_APP_SPECIFIC_EXT_LEN, TSH_HDR_LEN)
}

/// DNX: request the stamp through an ASE-1588 extension.  `ptp_hdr` is the
/// PTP header's offset from the start of the buffer.
fn rewrite_ase(
    frame: &mut [u8],
    ptp_hdr: usize,
    transport: Transport,
    one_step: bool,
    application_v2: bool,
) -> PacketResult<()> {
    let l2 = transport == Transport::Ieee8023;

    if transport == Transport::UdpIpv6 {
        let sys_hdr = if application_v2 {
            MODULE_HDR_LEN
        } else {
            MODULE_HDR_LEN - 1
        };
        let offset = ptp_hdr
            .checked_sub(sys_hdr)
            .ok_or_else(|| too_short("ASE offset"))?;

        let pph_present = offset == IPV6_PPH_PRESENT_OFFSET;
        let itmh = if pph_present {
            MODULE_HDR_LEN + PTCH_1_LEN
        } else {
            MODULE_HDR_LEN + PTCH_2_LEN
        };
        if pph_present {
            move_pph_udh(frame, itmh)?;
        }

        // ASE present, TSH and PPH follow.
        *packet::byte_mut(frame, itmh)? |= 1 << 3 | 0x3 << 1;
        // The 1588 command stays zero: the IPv6 path only updates the
        // correction field.
        write_ase(frame, itmh, l2, None, offset)?;

        if !pph_present {
            // Synthesize an internal header and an empty UDH.
            packet::zero(frame, 33, PPH_LEN)?;
            frame[42] = 0x10;
            frame[43] = 0x07;
            frame[44] = 0x42;
            *packet::byte_mut(frame, 45)? = 0;
        }
        return Ok(());
    }

    let sys_hdr = if application_v2 {
        MODULE_HDR_LEN
    } else {
        MODULE_HDR_LEN + PTCH_2_LEN + ITMH_HDR_LEN
    };
    let offset = ptp_hdr
        .checked_sub(sys_hdr)
        .ok_or_else(|| too_short("ASE offset"))?;

    let pph_present = offset >= PPH_PRESENT_MIN_OFFSET;
    let itmh = if pph_present {
        MODULE_HDR_LEN + PTCH_1_LEN
    } else {
        MODULE_HDR_LEN + PTCH_2_LEN
    };
    if pph_present {
        move_pph_udh(frame, itmh)?;
    }

    // ASE present, TSH follows.
    *packet::byte_mut(frame, itmh)? |= 1 << 3 | 0x2 << 1;
    let command = if one_step { 0x1 } else { 0x2 };
    write_ase(frame, itmh, l2, Some(command), offset)
}

impl Device {
    /// Prepare `frame`, about to be sent on `port`, for timestamping.
    /// `hdr_len` is the length of the device header ahead of the Ethernet
    /// header.
    pub(crate) fn tx_meta(
        &self,
        port: u32,
        tx_type: TxType,
        hdr_len: usize,
        frame: &mut [u8],
        forced: Transport,
        vlan_prio: u8,
    ) -> AsicResult<TxMeta> {
        self.require_init()?;
        let dcb = self.cfg.dcb_type;
        let (ptptime, reftime) = self.pair.read();
        let one_step = tx_type == TxType::OneStepSync;

        let pkt_offset = if dcb.has_tx_header() { hdr_len } else { 0 };
        let mut ptp_hdr = pkt_offset;
        let mut row = 0;

        let eth = frame.get(pkt_offset..).ok_or_else(|| too_short("device header"))?;
        if ptp::is_tagged(eth) {
            row += MD_TAGGED;
            ptp_hdr += ptp::VLAN_TAG_LEN;

            if dcb.is_dnx() && vlan_prio != 0 {
                let inner = ptp::TPID_OFFSET + ptp::VLAN_TAG_LEN;
                let ethertype = packet::be16(frame, hdr_len + inner)?;
                if matches!(
                    ethertype,
                    ptp::ETHER_PTP | ptp::ETHER_IPV4 | ptp::ETHER_IPV6
                ) {
                    let tci = packet::byte_mut(frame, hdr_len + ptp::TPID_OFFSET + 2)?;
                    if *tci == 0 {
                        *tci |= vlan_prio << 5;
                    }
                }
            }
        }

        let mut correction = 0u64;
        if one_step {
            row += MD_ONE_STEP;
            if dcb == DcbType::Dcb26 {
                let neg = (reftime as i32).wrapping_neg();
                correction = ((neg as i64) << 16) as u64;
                if neg >= 0 {
                    row += MD_ITS_SET;
                }
            } else {
                correction = (reftime as i64).wrapping_neg().wrapping_shl(16) as u64;
            }
        }

        let transport = ptp::resolve_transport(&frame[pkt_offset..], forced);
        ptp_hdr += transport.ptp_header_offset();
        let md = dcb.sobmh(transport, row);

        if self.debug.is_set(DebugFlags::TX_DUMP) {
            debug!(self.log, "tx frame before header updates";
                "bytes" => hex_dump(&frame[..]));
        }
        if dcb.is_dpp() && hdr_len > PTCH_2_LEN {
            rewrite_otsh(frame, one_step, transport, ptp_hdr - pkt_offset)?;
        } else if dcb.is_dnx() && hdr_len > PTCH_2_LEN {
            let v2 = self.init_data().application_v2;
            rewrite_ase(frame, ptp_hdr, transport, one_step, v2)?;
        }

        // Frames that end before a PTP header go out as they are.
        let msg = ptp::message_type(frame, ptp_hdr).ok();
        if self.debug.is_set(DebugFlags::TX) {
            debug!(self.log, "tx meta";
                "port" => port,
                "msg" => ?msg,
                "tx_type" => ?tx_type,
                "ptptime" => ptptime,
                "reftime" => reftime);
        }

        let mut tstamp = None;
        let origin_end = ptp_hdr + ptp::ORIGIN_TS_OFFSET + ptp::ORIGIN_TS_LEN;
        let rewritable = ptp_hdr >= 2 && origin_end <= frame.len();
        let stamp_in_frame = one_step && msg.is_some_and(|m| m.is_one_step_event());
        if stamp_in_frame && !rewritable {
            debug!(self.log, "one-step frame too short, sent unchanged";
                "port" => port,
                "len" => frame.len());
        } else if stamp_in_frame {
            let csum_offset = ptp_hdr - 2;
            let old_csum = packet::be16(frame, csum_offset)?;
            let regen = match transport {
                Transport::Ieee8023 => false,
                Transport::UdpIpv6 => true,
                _ => old_csum != 0,
            };

            let corr = correction.to_be_bytes();
            let ts = Timespec::from_ns(ptptime as i64);
            let origin = ptp::origin_timestamp_bytes(ts.sec, ts.nsec);
            packet::put_bytes(frame, ptp_hdr + ptp::CORRECTION_OFFSET, &corr)?;
            packet::put_bytes(frame, ptp_hdr + ptp::ORIGIN_TS_OFFSET, &origin)?;
            if regen {
                let csum = ptp::one_step_udp_checksum(old_csum, &corr, &origin);
                packet::put_be16(frame, csum_offset, csum)?;
            }

            if msg == Some(MessageType::DelayReq) {
                tstamp = Some(ptptime);
            }
            if let Some(stat) = self.stats.port(port) {
                stat.tx_onestep();
            }
        }

        if self.debug.is_set(DebugFlags::TX_DUMP) {
            debug!(self.log, "tx frame"; "bytes" => hex_dump(&frame[..]));
        }
        Ok(TxMeta { md, tstamp })
    }
}
