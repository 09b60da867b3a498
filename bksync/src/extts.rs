// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! External timestamp (EXTTS) events.
//!
//! The firmware appends captured GPIO edges to a ring in shared memory and
//! advances the ring's tail.  The host consumes entries from its own head
//! and writes the head back, so each side only ever writes its own index.

use std::sync::Arc;

use slog::{debug, warn};

use aal::fw::{extts, ts_event, Command, FwAbi};
use aal::{AsicError, AsicResult, DmaRegion, PhcEvent};
use common::time::FwTime;

use crate::config::DebugFlags;
use crate::device::Device;

const RING_SIZE: u32 = extts::NUM_ENTRIES as u32;

/// `flags` bits of an EXTTS request, as the OS clock layer defines them.
pub mod flags {
    pub const ENABLE: u32 = 1 << 0;
    pub const RISING_EDGE: u32 = 1 << 1;
    pub const FALLING_EDGE: u32 = 1 << 2;
    pub const STRICT: u32 = 1 << 3;
}

/// The host's view of a device's EXTTS ring.
#[derive(Default)]
pub struct ExttsState {
    ring: Option<Arc<dyn DmaRegion>>,
    /// Next entry to consume.
    head: u32,
    pub enabled: [bool; ts_event::NUM_GPIO_EVENTS],
    overflows: u64,
}

impl ExttsState {
    pub fn attach(&mut self, ring: Arc<dyn DmaRegion>, head: u32) {
        self.ring = Some(ring);
        self.head = head % RING_SIZE;
    }

    pub fn detach(&mut self) {
        self.ring = None;
        self.head = 0;
    }

    pub fn has_ring(&self) -> bool {
        self.ring.is_some()
    }

    pub fn ring_addr(&self) -> Option<u64> {
        self.ring.as_ref().map(|r| r.bus_addr())
    }

    pub fn head(&self) -> u32 {
        self.head
    }

    /// Number of times the firmware was seen to have overrun the ring.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }
}

impl Device {
    /// Start or stop EXTTS capture on this device's GPIO input `local`.
    pub(crate) fn extts_enable(&self, local: usize, on: bool) -> AsicResult<()> {
        self.require_init()?;
        let event = ts_event::from_gpio(local)
            .ok_or_else(|| AsicError::InvalidArg(format!("extts channel {local}")))?;

        let mut ext = self.extts.lock().unwrap();
        ext.enabled[local] = on;

        let ring_addr = match self.abi() {
            FwAbi::Legacy => ext.ring_addr().unwrap_or(0),
            FwAbi::Edk => {
                // The firmware owns the ring; learn where it is on first
                // use.
                if !ext.has_ring() {
                    let (_, addr) = self.execute(Command::GetExttsBuff, None, None)?;
                    let ring = self.dma.map_phys(addr, extts::LOG_LEN).map_err(|e| {
                        AsicError::Resource(format!("mapping extts ring at {addr:#x}: {e}"))
                    })?;
                    let head = ring.read_u32(extts::HEAD_OFFSET)?;
                    ext.attach(ring, head);
                }
                0
            }
        };

        let arg1 = (event as u64) << 32 | on as u64;
        self.execute(Command::ExttsLog, Some(arg1), Some(ring_addr))?;
        if self.debug.is_set(DebugFlags::VERB) {
            debug!(self.log, "extts state change";
                "channel" => local, "event" => event, "enabled" => on);
        }
        Ok(())
    }

    /// The next ring entry the host will read.
    pub fn extts_head(&self) -> u32 {
        self.extts.lock().unwrap().head()
    }

    /// Drain passes that found the firmware's overflow flag set.
    pub fn extts_overflows(&self) -> u64 {
        self.extts.lock().unwrap().overflows()
    }

    /// Consume everything the firmware has logged since the last drain.
    /// Events on enabled channels are passed to `emit` in ring order, with
    /// `base` added to the channel number; entries for disabled or unknown
    /// events are cleared and skipped.  Returns the number of events
    /// emitted.
    pub(crate) fn extts_drain(
        &self,
        base: u32,
        mut emit: impl FnMut(PhcEvent),
    ) -> AsicResult<usize> {
        if !self.is_initialized() {
            return Ok(0);
        }
        let mut ext = self.extts.lock().unwrap();
        let Some(ring) = ext.ring.clone() else {
            return Ok(0);
        };

        if ring.read_u32(extts::OVERFLOW_OFFSET)? != 0 {
            ext.overflows += 1;
            if self.debug.is_set(DebugFlags::VERB) {
                warn!(self.log, "extts ring overflow";
                    "overflows" => ext.overflows);
            }
        }

        let tail = ring.read_u32(extts::TAIL_OFFSET)? % RING_SIZE;
        let mut emitted = 0;
        while ext.head != tail {
            let off = extts::entry_offset(ext.head as usize);
            let mut raw = [0u8; extts::ENTRY_LEN];
            ring.read(off, &mut raw)?;

            let mut id = [0u8; 4];
            let mut ts = [0u8; FwTime::PACKED_LEN];
            id.copy_from_slice(&raw[..4]);
            ts.copy_from_slice(&raw[4..]);
            let event = u32::from_le_bytes(id);
            let ts = FwTime::from_le_bytes(&ts);

            match ts_event::to_gpio(event).filter(|g| ext.enabled[*g]) {
                Some(gpio) => {
                    emit(PhcEvent::Extts {
                        index: base + gpio as u32,
                        timestamp_ns: ts.to_ns(),
                    });
                    emitted += 1;
                }
                None => ring.zero(off, extts::ENTRY_LEN)?,
            }

            ext.head = (ext.head + 1) % RING_SIZE;
            ring.write_u32(extts::HEAD_OFFSET, ext.head)?;
        }
        Ok(emitted)
    }
}
