// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Memory seen by both the host and the simulated firmware: a sparse
//! register file and a set of DMA regions keyed by bus address.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use slog::Logger;

use aal::{
    check_bounds, AsicError, AsicResult, DmaAllocator, DmaRegion, RegisterIo,
};

use super::chaos::Chaos;

/// Bus addresses handed out by the simulator start here, well clear of
/// zero so that a zeroed address word is recognizably unset.
const SIM_DMA_BASE: u64 = 0x8000_0000;
const SIM_DMA_ALIGN: u64 = 0x1000;

/// A sparse 32-bit register file.  Unwritten registers read as zero.
pub struct SimRegisters {
    regs: Mutex<BTreeMap<u32, u32>>,
    read_chaos: Chaos,
    write_chaos: Chaos,
    log: Logger,
}

impl SimRegisters {
    pub fn new(log: &Logger, read_chaos: Chaos, write_chaos: Chaos) -> Self {
        SimRegisters {
            regs: Mutex::new(BTreeMap::new()),
            read_chaos,
            write_chaos,
            log: log.clone(),
        }
    }

    /// Firmware-side access, which never suffers injected faults.
    pub fn peek(&self, offset: u32) -> u32 {
        let regs = self.regs.lock().unwrap();
        regs.get(&offset).copied().unwrap_or(0)
    }

    pub fn poke(&self, offset: u32, val: u32) {
        let mut regs = self.regs.lock().unwrap();
        regs.insert(offset, val);
    }
}

impl RegisterIo for SimRegisters {
    fn read32(&self, offset: u32) -> AsicResult<u32> {
        self.read_chaos.unfurled(&self.log, "register read")?;
        Ok(self.peek(offset))
    }

    fn write32(&self, offset: u32, val: u32) -> AsicResult<()> {
        self.write_chaos.unfurled(&self.log, "register write")?;
        self.poke(offset, val);
        Ok(())
    }
}

/// One DMA-visible allocation.
pub struct SimRegion {
    bus_addr: u64,
    data: Mutex<Vec<u8>>,
}

impl SimRegion {
    fn new(bus_addr: u64, len: usize) -> Self {
        SimRegion {
            bus_addr,
            data: Mutex::new(vec![0u8; len]),
        }
    }
}

impl DmaRegion for SimRegion {
    fn bus_addr(&self) -> u64 {
        self.bus_addr
    }

    fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> AsicResult<()> {
        let data = self.data.lock().unwrap();
        check_bounds(data.len(), offset, buf.len())?;
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&self, offset: usize, src: &[u8]) -> AsicResult<()> {
        let mut data = self.data.lock().unwrap();
        check_bounds(data.len(), offset, src.len())?;
        data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}

struct DmaMapInner {
    regions: BTreeMap<u64, Arc<SimRegion>>,
    next_addr: u64,
}

/// Every DMA region allocated for a device, by either side.
pub struct SimDmaMap {
    inner: Mutex<DmaMapInner>,
    alloc_chaos: Chaos,
    log: Logger,
}

impl SimDmaMap {
    pub fn new(log: &Logger, alloc_chaos: Chaos) -> Self {
        SimDmaMap {
            inner: Mutex::new(DmaMapInner {
                regions: BTreeMap::new(),
                next_addr: SIM_DMA_BASE,
            }),
            alloc_chaos,
            log: log.clone(),
        }
    }

    /// Allocate on behalf of the firmware.
    pub fn fw_alloc(&self, len: usize) -> Arc<SimRegion> {
        let mut inner = self.inner.lock().unwrap();
        let addr = inner.next_addr;
        let span = (len as u64).div_ceil(SIM_DMA_ALIGN).max(1) * SIM_DMA_ALIGN;
        inner.next_addr += span;
        let region = Arc::new(SimRegion::new(addr, len));
        inner.regions.insert(addr, region.clone());
        region
    }

    /// Find the region starting at `bus_addr`.
    pub fn lookup(&self, bus_addr: u64) -> Option<Arc<SimRegion>> {
        self.inner.lock().unwrap().regions.get(&bus_addr).cloned()
    }

    /// Find the region containing `bus_addr`, along with the offset of the
    /// address within it.
    pub fn resolve(&self, bus_addr: u64) -> Option<(Arc<SimRegion>, usize)> {
        let inner = self.inner.lock().unwrap();
        let (base, region) = inner.regions.range(..=bus_addr).next_back()?;
        let offset = (bus_addr - base) as usize;
        (offset < region.len()).then(|| (region.clone(), offset))
    }
}

impl DmaAllocator for SimDmaMap {
    fn alloc(&self, len: usize) -> AsicResult<Arc<dyn DmaRegion>> {
        self.alloc_chaos.unfurled(&self.log, "dma alloc")?;
        Ok(self.fw_alloc(len))
    }

    fn map_phys(
        &self,
        bus_addr: u64,
        len: usize,
    ) -> AsicResult<Arc<dyn DmaRegion>> {
        match self.lookup(bus_addr) {
            Some(region) if region.len() >= len => Ok(region),
            Some(region) => Err(AsicError::Resource(format!(
                "region at {bus_addr:#x} is {:#x} bytes, wanted {len:#x}",
                region.len()
            ))),
            None => Err(AsicError::Resource(format!(
                "no dma region at {bus_addr:#x}"
            ))),
        }
    }
}
