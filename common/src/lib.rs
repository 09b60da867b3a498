// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Pieces shared by every crate in the workspace: logger construction and
//! PHC time arithmetic.

pub mod logging;
pub mod time;

/// Name of the first PHC device the subsystem registers.  Subsequent
/// devices are numbered upward from here.
pub const DEFAULT_BASE_DEV_NAME: &str = "ptp0";
