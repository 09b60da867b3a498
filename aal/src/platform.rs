// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! What the timesync core needs from the platform: 32-bit register access
//! to each switch device and memory that both the host and the device's
//! embedded cores can see.

use std::sync::Arc;

use crate::AsicError;
use crate::AsicResult;

/// 32-bit access to a device's register window.  Offsets are in bytes.
pub trait RegisterIo: Send + Sync {
    fn read32(&self, offset: u32) -> AsicResult<u32>;
    fn write32(&self, offset: u32, val: u32) -> AsicResult<()>;
}

/// A region of memory shared with the device.  All multi-byte accessors are
/// little-endian, matching the firmware.
pub trait DmaRegion: Send + Sync {
    /// The address the device uses to reach this region.
    fn bus_addr(&self) -> u64;

    /// The size of the region in bytes.
    fn len(&self) -> usize;

    fn read(&self, offset: usize, buf: &mut [u8]) -> AsicResult<()>;
    fn write(&self, offset: usize, data: &[u8]) -> AsicResult<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_u32(&self, offset: usize) -> AsicResult<u32> {
        let mut b = [0u8; 4];
        self.read(offset, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn write_u32(&self, offset: usize, val: u32) -> AsicResult<()> {
        self.write(offset, &val.to_le_bytes())
    }

    fn read_u64(&self, offset: usize) -> AsicResult<u64> {
        let mut b = [0u8; 8];
        self.read(offset, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn write_u64(&self, offset: usize, val: u64) -> AsicResult<()> {
        self.write(offset, &val.to_le_bytes())
    }

    /// Zero `len` bytes starting at `offset`.
    fn zero(&self, offset: usize, len: usize) -> AsicResult<()> {
        self.write(offset, &vec![0u8; len])
    }
}

/// Verify that `[offset, offset + len)` lies within a region of `size`
/// bytes.  Shared by the region implementations.
pub fn check_bounds(size: usize, offset: usize, len: usize) -> AsicResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(AsicError::InvalidArg(format!(
            "access of {len} bytes at {offset:#x} exceeds region of {size:#x}"
        ))),
    }
}

/// Hands out device-visible memory.
pub trait DmaAllocator: Send + Sync {
    /// Allocate a new zeroed region of at least `len` bytes.
    fn alloc(&self, len: usize) -> AsicResult<Arc<dyn DmaRegion>>;

    /// Map a region whose bus address was chosen by the firmware.
    fn map_phys(
        &self,
        bus_addr: u64,
        len: usize,
    ) -> AsicResult<Arc<dyn DmaRegion>>;
}

/// The platform's set of switch devices.
pub trait Platform: Send + Sync {
    /// A short name for the backend, for logging.
    fn name(&self) -> &str;

    /// Number of devices (ASIC cores) present.
    fn device_count(&self) -> usize;

    /// The register window for device `dev_no`.
    fn registers(&self, dev_no: usize) -> AsicResult<Arc<dyn RegisterIo>>;

    /// The DMA allocator serving device `dev_no`.
    fn dma(&self, dev_no: usize) -> AsicResult<Arc<dyn DmaAllocator>>;
}

#[test]
fn test_check_bounds() {
    assert!(check_bounds(16, 0, 16).is_ok());
    assert!(check_bounds(16, 12, 4).is_ok());
    assert!(check_bounds(16, 13, 4).is_err());
    assert!(check_bounds(16, usize::MAX, 2).is_err());
}
