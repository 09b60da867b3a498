// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The abstraction layer between the timesync core and the hardware it
//! drives: the error type shared by every layer, the firmware ABI, the
//! platform traits a backend implements, and the capability set the
//! packet driver consumes.

use thiserror::Error;

pub mod fw;
pub mod hwts;
pub mod platform;

pub use hwts::*;
pub use platform::*;

/// A specialized Result type for ASIC operations
pub type AsicResult<T> = Result<T, AsicError>;

/// Error type conveying additional information about ASIC errors
#[derive(Error, Debug)]
pub enum AsicError {
    /// The firmware has not written its ready sentinel.  The value found
    /// in the status word is reported.
    #[error("Firmware not ready: status {0:#x}")]
    FirmwareNotReady(u32),
    /// The firmware did not complete a mailbox command within its retry
    /// budget.
    #[error("Mailbox command {cmd} timed out after {elapsed_us}us")]
    MailboxTimeout { cmd: String, elapsed_us: u64 },
    /// An argument passed to the ASIC layer is invalid or inappropriate.  This
    /// indicates misbehavior from the caller.
    #[error("Invalid argument: {}", .0)]
    InvalidArg(String),
    /// An Asic function was called before the ASIC layer was properly
    /// initialized.  Indicates misbehavior from the caller.
    #[error("ASIC layer uninitialized: {}", .0)]
    Uninitialized(String),
    /// This operation is unsupported by the ASIC model or firmware being used
    #[error("Operation unsupported by the ASIC")]
    OperationUnsupported,
    /// A device, command, or record that was asked for does not exist
    #[error("Not found: {}", .0)]
    NotFound(String),
    /// A mapping or allocation needed by the device could not be obtained
    #[error("Resource unavailable: {}", .0)]
    Resource(String),
    /// No two-step timestamp matching the frame was produced in time
    #[error("No TX timestamp for port {port} seq {seq_id}")]
    TimestampMiss { port: u32, seq_id: u16 },
    /// The ASIC encountered an error when interacting with the local file
    /// system.
    #[error("IO error: {ctx}: {err}")]
    Io { ctx: String, err: std::io::Error },
    /// An error derived from a purposely triggered synthetic fault for testing
    /// purposes.
    #[error("Synthetic ASIC error: {}", .0)]
    Synthetic(String),
}

impl From<packet::PacketError> for AsicError {
    fn from(e: packet::PacketError) -> Self {
        AsicError::InvalidArg(e.to_string())
    }
}
