// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Two-step TX timestamps.
//!
//! For ports in the two-step bitmap the firmware captures the egress time
//! of each PTP event frame into a FIFO.  The host asks for the entry
//! matching a (port, sequence id) key and acknowledges it once found.  The
//! firmware also reports a running count of captured timestamps, which the
//! host checks for gaps.

use std::time::{Duration, Instant};

use slog::{debug, error};

use aal::fw::{self, Command};
use aal::{AsicError, AsicResult, TxType};
use packet::ptp::{self, Transport};

use crate::config::DebugFlags;
use crate::device::Device;

/// Pause after an attempt that found no valid timestamp.
const RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// The decoded first result word of GET_TSTIME.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TsTimeStatus {
    valid: bool,
    seq_id: u16,
    fifo_rxctr: u32,
}

impl From<u64> for TsTimeStatus {
    fn from(r1: u64) -> Self {
        TsTimeStatus {
            valid: r1 & 0x1 != 0,
            seq_id: (r1 >> 16) as u16,
            fifo_rxctr: (r1 >> 32) as u32,
        }
    }
}

impl Device {
    /// Enable or disable two-step timestamping on `port` and push the
    /// changed bitmap word to the firmware.
    pub(crate) fn twostep_update(&self, port: u32, on: bool) -> AsicResult<()> {
        self.require_init()?;
        let (idx, word) = self.set_twostep(port, on)?;
        self.execute(Command::PbmUpdate, Some(idx as u64), Some(word))?;
        Ok(())
    }

    /// The egress time of `frame`, sent on driver port `port`.
    pub(crate) fn tx_time_get(
        &self,
        port: u32,
        tx_type: TxType,
        frame: &[u8],
        transport: Transport,
        retries: u32,
    ) -> AsicResult<u64> {
        self.require_init()?;
        let stat = match self.stats.port(port) {
            Some(s) if port <= fw::MAX_TSTIME_PORT => s,
            _ => return Err(AsicError::InvalidArg(format!("port {port}"))),
        };

        // One-step frames were stamped from the cached clock.
        if tx_type == TxType::OneStepSync {
            stat.tx();
            return Ok(self.pair.read().0);
        }

        let transport = ptp::resolve_transport(frame, transport);
        let seq_id = ptp::seq_id(frame, transport)?;
        let key = (port - 1) as u64 | (seq_id as u64) << 16;

        let start = Instant::now();
        let mut found = None;
        for attempt in 0..retries {
            let (r1, ts) = match self.execute(Command::GetTsTime, Some(key), None) {
                Ok(r) => r,
                Err(e) => {
                    stat.tx();
                    return Err(e);
                }
            };
            let status = TsTimeStatus::from(r1);

            if !status.valid {
                if self.debug.is_set(DebugFlags::TXTS) {
                    debug!(self.log, "no timestamp yet";
                        "port" => port, "seq_id" => seq_id, "attempt" => attempt);
                }
                if attempt + 1 < retries {
                    std::thread::sleep(RETRY_INTERVAL);
                }
                continue;
            }

            if status.seq_id != seq_id {
                stat.discard();
                if self.debug.is_set(DebugFlags::TXTS) {
                    debug!(self.log, "discarding stale timestamp";
                        "port" => port,
                        "seq_id" => seq_id,
                        "fw_seq_id" => status.seq_id);
                }
                continue;
            }

            // The timestamp is already in hand; a lost ACK only leaves
            // the entry for the firmware to age out.
            if let Err(e) = self.execute(Command::AckTsTime, Some(key), None) {
                error!(self.log, "timestamp ack failed";
                    "port" => port, "seq_id" => seq_id, "error" => %e);
            }
            if status.fifo_rxctr != 0 {
                let prev = stat.swap_fifo(status.fifo_rxctr);
                if status.fifo_rxctr != prev.wrapping_add(1) {
                    error!(self.log, "timestamp fifo gap";
                        "port" => port,
                        "prev" => prev,
                        "cur" => status.fifo_rxctr);
                }
            }
            stat.matched(start.elapsed().as_micros() as u64);
            found = Some(ts);
            break;
        }

        stat.tx();
        match found {
            Some(ts) => {
                if self.debug.is_set(DebugFlags::TXTS) {
                    debug!(self.log, "two-step timestamp";
                        "port" => port, "seq_id" => seq_id, "ts" => ts);
                }
                Ok(ts)
            }
            None => {
                stat.timeout();
                Err(AsicError::TimestampMiss { port, seq_id })
            }
        }
    }
}
