// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Received PTP frames.  Timestamped frames arrive on a dedicated COS
//! queue, wrapped in a custom encapsulation that carries the ingress time.

use bytes::BytesMut;
use slog::debug;

use aal::{AsicError, AsicResult, RxPreProcess};
use packet::{dnx, encap, ptp};

use crate::config::DebugFlags;
use crate::device::Device;
use crate::hex_dump;

impl Device {
    /// Classify a frame before the packet driver strips anything from it.
    pub(crate) fn rx_pre_process(
        &self,
        frame: &[u8],
        src_sys_port: u32,
    ) -> AsicResult<RxPreProcess> {
        self.require_init()?;
        if src_sys_port == self.init_data().uc_sysport {
            return Ok(RxPreProcess::FromFirmware);
        }

        match encap::encap_len(frame) {
            Ok(len) => Ok(RxPreProcess::Encap { len }),
            Err(_) if self.cfg.dcb_type.is_dnx() => {
                let cfg = self.jr2.lock().unwrap().clone();
                let info = dnx::parse_rx_system_header(&cfg, frame, false)?;
                Ok(RxPreProcess::SystemHeader(info))
            }
            Err(e) => Err(AsicError::from(e)),
        }
    }

    /// Recover the ingress time of `frame`, received on `port`, and strip
    /// the encapsulation that carried it.  Frames from other COS queues,
    /// and frames without a well-formed encapsulation, are left untouched
    /// and yield no timestamp.
    pub(crate) fn rx_time(
        &self,
        port: u32,
        frame: &mut BytesMut,
        meta: &[u32],
    ) -> AsicResult<Option<u64>> {
        self.require_init()?;
        let dcb = self.cfg.dcb_type;
        if !dcb.rx_cos_matches(self.init_data().pci_cos, meta) {
            return Ok(None);
        }

        if self.debug.is_set(DebugFlags::RX_DUMP) {
            debug!(self.log, "rx frame"; "bytes" => hex_dump(&frame[..]));
        }

        let mut ts = None;
        if let Some(hdr) = encap::strip(frame) {
            ts = hdr.rx_time;
            let transport = ptp::transport_get(frame);
            if dcb.is_dnx() && transport == ptp::Transport::Ieee8023 {
                // Drop the CRC and any padding behind the PTP message.
                let ptp_hdr = ptp::ptp_header_offset(frame, transport);
                if let Ok(len) = ptp::message_len(frame, ptp_hdr) {
                    frame.truncate(ptp_hdr + len as usize);
                }
            }
            if self.debug.is_set(DebugFlags::RX) {
                debug!(self.log, "rx encap stripped";
                    "port" => port,
                    "encap_len" => hdr.total_len,
                    "seq_id" => hdr.seq_id,
                    "ts" => ?ts);
            }
        }

        if let Some(stat) = self.stats.port(port) {
            stat.rx();
        }
        Ok(ts)
    }
}
