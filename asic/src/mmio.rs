// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Real hardware, driven from user space on Linux.  Each device's register
//! window is the PCI BAR exposed through sysfs, and DMA memory is carved out
//! of a physically contiguous window reserved at boot and mapped through
//! `/dev/mem`.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use slog::{info, o, Logger};

use aal::{
    check_bounds, AsicError, AsicResult, DmaAllocator, DmaRegion, Platform,
    RegisterIo,
};

const PAGE_SIZE: u64 = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MmioDeviceConfig {
    /// The BAR resource file, e.g.
    /// `/sys/bus/pci/devices/0000:01:00.0/resource0`.
    pub bar: PathBuf,
    /// Bytes of the BAR to map.
    pub bar_len: usize,
    /// Physical base of the DMA window reserved for this device.
    pub dma_base: u64,
    /// Size of the DMA window.
    pub dma_len: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MmioConfig {
    pub devices: Vec<MmioDeviceConfig>,
}

/// A shared mapping of device-visible memory, unmapped on drop.
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is plain memory shared with the device.  Every access goes
// through volatile reads and writes of at most the mapping's length.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    fn new(path: &Path, offset: u64, len: usize) -> AsicResult<Self> {
        let io_err = |err| AsicError::Io {
            ctx: format!("mapping {}", path.display()),
            err,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(io_err)?;

        // SAFETY: we ask for a fresh shared mapping of an open file and check
        // the result before using it.  The file may be closed afterwards.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io_err(std::io::Error::last_os_error()));
        }
        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| {
            AsicError::Resource(format!("null mapping of {}", path.display()))
        })?;
        Ok(Mapping { ptr, len })
    }

    fn read32(&self, offset: usize) -> AsicResult<u32> {
        check_bounds(self.len, offset, 4)?;
        // SAFETY: bounds were checked above and device registers are
        // naturally aligned.
        Ok(unsafe {
            std::ptr::read_volatile(self.ptr.as_ptr().add(offset) as *const u32)
        })
    }

    fn write32(&self, offset: usize, val: u32) -> AsicResult<()> {
        check_bounds(self.len, offset, 4)?;
        // SAFETY: as in read32.
        unsafe {
            std::ptr::write_volatile(
                self.ptr.as_ptr().add(offset) as *mut u32,
                val,
            )
        };
        Ok(())
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> AsicResult<()> {
        check_bounds(self.len, offset, buf.len())?;
        for (i, b) in buf.iter_mut().enumerate() {
            // SAFETY: offset + i lies within the checked range.
            *b = unsafe {
                std::ptr::read_volatile(self.ptr.as_ptr().add(offset + i))
            };
        }
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> AsicResult<()> {
        check_bounds(self.len, offset, data.len())?;
        for (i, b) in data.iter().enumerate() {
            // SAFETY: offset + i lies within the checked range.
            unsafe {
                std::ptr::write_volatile(self.ptr.as_ptr().add(offset + i), *b)
            };
        }
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr and len describe a mapping we created and nothing else
        // refers to it once the last owner goes away.
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// A device's register BAR.  When built with `byteswap`, every access is
/// byte-swapped to compensate for a bus that presents the registers in the
/// opposite order from the firmware.
pub struct Bar {
    map: Mapping,
}

impl Bar {
    fn swap(val: u32) -> u32 {
        if cfg!(feature = "byteswap") {
            val.swap_bytes()
        } else {
            val
        }
    }
}

impl RegisterIo for Bar {
    fn read32(&self, offset: u32) -> AsicResult<u32> {
        self.map.read32(offset as usize).map(Self::swap)
    }

    fn write32(&self, offset: u32, val: u32) -> AsicResult<()> {
        self.map.write32(offset as usize, Self::swap(val))
    }
}

/// A piece of a DMA mapping.
pub struct DmaSlice {
    map: Arc<Mapping>,
    start: usize,
    len: usize,
    bus_addr: u64,
}

impl DmaRegion for DmaSlice {
    fn bus_addr(&self) -> u64 {
        self.bus_addr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> AsicResult<()> {
        check_bounds(self.len, offset, buf.len())?;
        self.map.read(self.start + offset, buf)
    }

    fn write(&self, offset: usize, data: &[u8]) -> AsicResult<()> {
        check_bounds(self.len, offset, data.len())?;
        self.map.write(self.start + offset, data)
    }
}

/// Hands out pieces of the reserved window with a bump allocator.  Memory
/// is never returned; allocations happen once per device bring-up.
pub struct DmaWindow {
    map: Arc<Mapping>,
    base: u64,
    next: Mutex<usize>,
}

impl DmaWindow {
    fn slice(&self, start: usize, len: usize) -> Arc<dyn DmaRegion> {
        Arc::new(DmaSlice {
            map: self.map.clone(),
            start,
            len,
            bus_addr: self.base + start as u64,
        })
    }
}

impl DmaAllocator for DmaWindow {
    fn alloc(&self, len: usize) -> AsicResult<Arc<dyn DmaRegion>> {
        let mut next = self.next.lock().unwrap();
        let start = *next;
        check_bounds(self.map.len, start, len)
            .map_err(|_| AsicError::Resource("dma window exhausted".into()))?;
        let span = (len as u64).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        *next = start + span as usize;
        let region = self.slice(start, len);
        region.zero(0, len)?;
        Ok(region)
    }

    fn map_phys(
        &self,
        bus_addr: u64,
        len: usize,
    ) -> AsicResult<Arc<dyn DmaRegion>> {
        if bus_addr >= self.base
            && check_bounds(
                self.map.len,
                (bus_addr - self.base) as usize,
                len,
            )
            .is_ok()
        {
            return Ok(self.slice((bus_addr - self.base) as usize, len));
        }

        // Outside our window: map it directly, page aligned.
        let page = bus_addr & !(PAGE_SIZE - 1);
        let lead = (bus_addr - page) as usize;
        let map = Mapping::new(Path::new("/dev/mem"), page, lead + len)?;
        Ok(Arc::new(DmaSlice {
            map: Arc::new(map),
            start: lead,
            len,
            bus_addr,
        }))
    }
}

struct MmioDevice {
    bar: Arc<Bar>,
    dma: Arc<DmaWindow>,
}

/// A handle for memory-mapped switch devices.
pub struct Handle {
    devices: Vec<MmioDevice>,
}

impl Handle {
    pub fn new(log: &Logger, config: &MmioConfig) -> AsicResult<Self> {
        let log = log.new(o!("asic" => "mmio"));
        let mut devices = Vec::new();
        for (dev_no, cfg) in config.devices.iter().enumerate() {
            let bar = Mapping::new(&cfg.bar, 0, cfg.bar_len)?;
            let window =
                Mapping::new(Path::new("/dev/mem"), cfg.dma_base, cfg.dma_len)?;
            info!(log, "mapped device";
                "dev" => dev_no,
                "bar" => %cfg.bar.display(),
                "dma_base" => format!("{:#x}", cfg.dma_base));
            devices.push(MmioDevice {
                bar: Arc::new(Bar { map: bar }),
                dma: Arc::new(DmaWindow {
                    map: Arc::new(window),
                    base: cfg.dma_base,
                    next: Mutex::new(0),
                }),
            });
        }
        Ok(Handle { devices })
    }

    fn device(&self, dev_no: usize) -> AsicResult<&MmioDevice> {
        self.devices
            .get(dev_no)
            .ok_or_else(|| AsicError::NotFound(format!("device {dev_no}")))
    }

    pub fn is_model(&self) -> bool {
        false
    }

    pub fn fini(&self) {}
}

impl Platform for Handle {
    fn name(&self) -> &str {
        "mmio"
    }

    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn registers(&self, dev_no: usize) -> AsicResult<Arc<dyn RegisterIo>> {
        Ok(self.device(dev_no)?.bar.clone())
    }

    fn dma(&self, dev_no: usize) -> AsicResult<Arc<dyn DmaAllocator>> {
        Ok(self.device(dev_no)?.dma.clone())
    }
}
