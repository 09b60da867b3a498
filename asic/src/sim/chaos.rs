// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use rand::random;
use serde::{Deserialize, Serialize};
use slog::Logger;

use aal::{AsicError, AsicResult};

/// Chaos that happens according to a probability.
#[derive(Default, Debug, Serialize, Deserialize, Copy, Clone)]
pub struct Chaos {
    /// A probability between 0.0 and 1.0
    pub value: f64,
}

impl Chaos {
    /// Create a new chaos value.
    pub fn new(value: f64) -> Self {
        let mut c = Self::default();
        c.set(value);
        c
    }

    /// Set the chaos value, clamped to the range [0.0, 1.0].
    pub fn set(&mut self, value: f64) {
        self.value = value.clamp(0.0, 1.0);
    }

    /// Get the underlying chaos value.
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Whether the fault fires this time.
    pub fn fires(&self) -> bool {
        self.value > 0.0 && self.value >= random()
    }

    /// Return a chaos error according to the underlying probability value.
    pub fn unfurled(&self, log: &Logger, message: &str) -> AsicResult<()> {
        if self.fires() {
            slog::error!(log, "chaos error: {}", message);
            return Err(AsicError::Synthetic(message.into()));
        }
        Ok(())
    }
}

/// Fault probabilities for each piece of the simulated device.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SimChaos {
    pub register_read: Chaos,
    pub register_write: Chaos,
    pub dma_alloc: Chaos,
    /// The firmware silently ignores a command, which the host sees as a
    /// mailbox timeout.
    pub command_drop: Chaos,
    /// The firmware reports a two-step timestamp as not yet valid.
    pub tstime_invalid: Chaos,
}

impl SimChaos {
    /// Apply a uniform underlying probability to every fault.
    pub fn uniform(v: f64) -> Self {
        Self {
            register_read: Chaos::new(v),
            register_write: Chaos::new(v),
            dma_alloc: Chaos::new(v),
            command_drop: Chaos::new(v),
            tstime_invalid: Chaos::new(v),
        }
    }
}

#[test]
fn test_chaos_bounds() {
    assert_eq!(Chaos::new(2.0).get(), 1.0);
    assert_eq!(Chaos::new(-1.0).get(), 0.0);
    assert!(!Chaos::default().fires());
    assert!(Chaos::new(1.0).fires());
}
