// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Platform backends for the timesync core.  `sim` runs a software model of
//! the switch and its firmware; `mmio` drives real devices from user space.
//! When both are built, `Handle` names the hardware backend.

#[cfg(not(any(feature = "sim", feature = "mmio")))]
compile_error! {"must set sim or mmio feature"}

#[cfg(feature = "sim")]
pub mod sim;

#[cfg(feature = "mmio")]
pub mod mmio;

cfg_if::cfg_if! {
    if #[cfg(feature = "mmio")] {
        mod plat {
            pub use super::mmio::Handle;
            pub use super::mmio::MmioConfig as Config;
        }
    } else {
        mod plat {
            pub use super::sim::Handle;
            pub use super::sim::SimConfig as Config;
        }
    }
}

pub use plat::Config;
pub use plat::Handle;
