// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The cached (PTP time, reference counter) pair.
//!
//! The TX path stamps one-step frames from this cache and must never wait
//! for the writer.  Two copies are kept.  A writer fills the alternate copy,
//! raises the flag, fills the primary copy, and lowers the flag.  A reader
//! that sees the flag raised uses the alternate copy.  The flag is the low
//! bit of a sequence counter, so a reader that raced with a whole update
//! notices the counter moved and reads again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct PhcPair {
    seq: AtomicU64,
    ptptime: AtomicU64,
    reftime: AtomicU64,
    ptptime_alt: AtomicU64,
    reftime_alt: AtomicU64,
    writer: Mutex<()>,
}

impl PhcPair {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new sample.
    pub fn publish(&self, ptptime: u64, reftime: u64) {
        let _guard = self.writer.lock().unwrap();

        self.ptptime_alt.store(ptptime, Ordering::SeqCst);
        self.reftime_alt.store(reftime, Ordering::SeqCst);

        self.seq.fetch_add(1, Ordering::SeqCst);
        self.ptptime.store(ptptime, Ordering::SeqCst);
        self.reftime.store(reftime, Ordering::SeqCst);
        self.seq.fetch_add(1, Ordering::SeqCst);
    }

    /// The most recently published `(ptptime, reftime)`.
    pub fn read(&self) -> (u64, u64) {
        loop {
            let seq = self.seq.load(Ordering::SeqCst);
            let pair = if seq & 1 == 1 {
                (
                    self.ptptime_alt.load(Ordering::SeqCst),
                    self.reftime_alt.load(Ordering::SeqCst),
                )
            } else {
                (
                    self.ptptime.load(Ordering::SeqCst),
                    self.reftime.load(Ordering::SeqCst),
                )
            };
            if self.seq.load(Ordering::SeqCst) == seq {
                return pair;
            }
            std::hint::spin_loop();
        }
    }
}
