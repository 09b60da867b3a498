// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Per-port timestamping counters.  Ports are indexed from zero here; the
//! packet driver's port `p` is entry `p - 1`, and only ports below the
//! table size are counted.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PortStat {
    pub pkt_rxctr: AtomicU32,
    pub pkt_txctr: AtomicU32,
    pub pkt_txonestep: AtomicU32,
    pub tsts_match: AtomicU32,
    pub tsts_timeout: AtomicU32,
    pub tsts_discard: AtomicU32,
    /// Fetch latencies of matched two-step timestamps, in microseconds.
    pub tsts_worst_fetch_time: AtomicU64,
    pub tsts_best_fetch_time: AtomicU64,
    pub tsts_avg_fetch_time: AtomicU64,
    /// Last FIFO counter value reported by the firmware.
    pub fifo_rxctr: AtomicU32,
}

fn bump(ctr: &AtomicU32) {
    ctr.fetch_add(1, Ordering::Relaxed);
}

impl PortStat {
    pub fn rx(&self) {
        bump(&self.pkt_rxctr)
    }

    pub fn tx(&self) {
        bump(&self.pkt_txctr)
    }

    pub fn tx_onestep(&self) {
        bump(&self.pkt_txonestep)
    }

    pub fn discard(&self) {
        bump(&self.tsts_discard)
    }

    pub fn timeout(&self) {
        bump(&self.tsts_timeout)
    }

    /// Count a matched timestamp that took `us` microseconds to fetch.
    pub fn matched(&self, us: u64) {
        let n = self.tsts_match.fetch_add(1, Ordering::Relaxed) as u64 + 1;

        let best = self.tsts_best_fetch_time.load(Ordering::Relaxed);
        if best == 0 || us < best {
            self.tsts_best_fetch_time.store(us, Ordering::Relaxed);
        }
        let worst = self.tsts_worst_fetch_time.load(Ordering::Relaxed);
        if worst == 0 || us > worst {
            self.tsts_worst_fetch_time.store(us, Ordering::Relaxed);
        }
        let avg = self.tsts_avg_fetch_time.load(Ordering::Relaxed);
        self.tsts_avg_fetch_time
            .store((us + (n - 1) * avg) / n, Ordering::Relaxed);
    }

    /// Record the firmware's FIFO counter, returning the previous value.
    pub fn swap_fifo(&self, val: u32) -> u32 {
        self.fifo_rxctr.swap(val, Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PortCounters {
        let ld32 = |c: &AtomicU32| c.load(Ordering::Relaxed);
        let ld64 = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PortCounters {
            pkt_rxctr: ld32(&self.pkt_rxctr),
            pkt_txctr: ld32(&self.pkt_txctr),
            pkt_txonestep: ld32(&self.pkt_txonestep),
            tsts_match: ld32(&self.tsts_match),
            tsts_timeout: ld32(&self.tsts_timeout),
            tsts_discard: ld32(&self.tsts_discard),
            tsts_worst_fetch_time: ld64(&self.tsts_worst_fetch_time),
            tsts_best_fetch_time: ld64(&self.tsts_best_fetch_time),
            tsts_avg_fetch_time: ld64(&self.tsts_avg_fetch_time),
            fifo_rxctr: ld32(&self.fifo_rxctr),
        }
    }

    /// Zero the packet and match counters.  Latencies and the FIFO counter
    /// are kept.
    fn clear(&self) {
        for c in [
            &self.pkt_rxctr,
            &self.pkt_txctr,
            &self.pkt_txonestep,
            &self.tsts_timeout,
            &self.tsts_match,
            &self.tsts_discard,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time copy of a port's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PortCounters {
    pub pkt_rxctr: u32,
    pub pkt_txctr: u32,
    pub pkt_txonestep: u32,
    pub tsts_match: u32,
    pub tsts_timeout: u32,
    pub tsts_discard: u32,
    pub tsts_worst_fetch_time: u64,
    pub tsts_best_fetch_time: u64,
    pub tsts_avg_fetch_time: u64,
    pub fifo_rxctr: u32,
}

impl PortCounters {
    /// Whether the port has seen any timestamping traffic.
    pub fn is_active(&self) -> bool {
        self.pkt_rxctr != 0
            || self.pkt_txctr != 0
            || self.pkt_txonestep != 0
            || self.tsts_discard != 0
            || self.tsts_timeout != 0
            || self.tsts_match != 0
    }
}

#[derive(Debug)]
pub struct PortStats {
    ports: Vec<PortStat>,
}

impl PortStats {
    pub fn new(num_ports: usize) -> Self {
        PortStats {
            ports: (0..num_ports).map(|_| PortStat::default()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// The counters of driver port `port`, if it is a physical port.
    pub fn port(&self, port: u32) -> Option<&PortStat> {
        if port == 0 || port as usize >= self.ports.len() {
            return None;
        }
        self.ports.get(port as usize - 1)
    }

    /// Entry `idx`, counting from zero.
    pub fn index(&self, idx: usize) -> Option<&PortStat> {
        self.ports.get(idx)
    }

    pub fn clear(&self) {
        self.ports.iter().for_each(PortStat::clear);
    }

    /// Zero everything, as at device bring-up.
    pub fn reset(&self) {
        for p in &self.ports {
            p.clear();
            p.tsts_worst_fetch_time.store(0, Ordering::Relaxed);
            p.tsts_best_fetch_time.store(0, Ordering::Relaxed);
            p.tsts_avg_fetch_time.store(0, Ordering::Relaxed);
            p.fifo_rxctr.store(0, Ordering::Relaxed);
        }
    }
}
