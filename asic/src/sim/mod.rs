// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A software switch: register files and DMA memory for each device, plus
//! a thread per device running a model of the timesync firmware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slog::{info, o, Logger};

use aal::fw::{self, fw_comm, regs, Command, FwAbi};
use aal::{
    AsicError, AsicResult, DmaAllocator, DmaRegion, Platform, RegisterIo,
};
use common::time::FwTime;

pub mod chaos;
pub mod firmware;
pub mod mem;

pub use chaos::{Chaos, SimChaos};
pub use firmware::{CommandRecord, FwSnapshot, TxStamp};

use firmware::{Firmware, MailboxView};
use mem::{SimDmaMap, SimRegion, SimRegisters};

/// How often the firmware checks its mailbox.
const FW_POLL_INTERVAL: Duration = Duration::from_micros(20);

/// One simulated device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SimDeviceConfig {
    /// Whether the device has a CMICx, which moves the mailbox registers.
    pub cmicx: bool,
    /// The embedded core running the firmware.
    pub fw_core: u32,
    /// Whether the firmware has posted its ready sentinel.
    pub ready: bool,
}

impl Default for SimDeviceConfig {
    fn default() -> Self {
        SimDeviceConfig {
            cmicx: true,
            fw_core: 0,
            ready: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub fw_abi: FwAbi,
    pub devices: Vec<SimDeviceConfig>,
    pub chaos: SimChaos,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            fw_abi: FwAbi::default(),
            devices: vec![SimDeviceConfig::default()],
            chaos: SimChaos::default(),
        }
    }
}

struct SimDevice {
    regs: Arc<SimRegisters>,
    dma: Arc<SimDmaMap>,
    fw_comm: Arc<SimRegion>,
    mailbox: MailboxView,
    firmware: Mutex<Firmware>,
    chaos: SimChaos,
}

impl SimDevice {
    fn new(
        log: &Logger,
        abi: FwAbi,
        cfg: &SimDeviceConfig,
        chaos: SimChaos,
    ) -> AsicResult<Self> {
        let regs = Arc::new(SimRegisters::new(
            log,
            chaos.register_read,
            chaos.register_write,
        ));
        let dma = Arc::new(SimDmaMap::new(log, chaos.dma_alloc));
        let fw_comm = dma.fw_alloc(fw_comm::LEN);
        let base = regs::cmc_base(cfg.cmicx, cfg.fw_core);

        let mailbox = match abi {
            FwAbi::Legacy => MailboxView::Registers {
                regs: regs.clone(),
                base,
            },
            FwAbi::Edk => MailboxView::SharedMemory(fw_comm.clone()),
        };
        if cfg.ready {
            match abi {
                FwAbi::Legacy => {
                    regs.poke(regs::msg(base, regs::MAILBOX[0]), fw::FW_READY)
                }
                FwAbi::Edk => {
                    fw_comm.write_u32(fw_comm::CMD_OFFSET, fw::FW_READY)?
                }
            }
        }

        Ok(SimDevice {
            regs,
            dma,
            fw_comm,
            mailbox,
            firmware: Mutex::new(Firmware::new(log, abi)),
            chaos,
        })
    }

    fn poll(&self) {
        let mut fw = self.firmware.lock().unwrap();
        fw.poll(&self.mailbox, &self.dma, &self.chaos);
    }
}

/// A handle for a simulated switch.
pub struct Handle {
    devices: Vec<Arc<SimDevice>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    log: Logger,
}

impl Handle {
    /// Create the simulated devices and start their firmware.
    pub fn new(log: &Logger, config: &SimConfig) -> AsicResult<Self> {
        let log = log.new(o!("asic" => "sim"));
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut devices = Vec::new();
        let mut threads = Vec::new();

        for (dev_no, cfg) in config.devices.iter().enumerate() {
            let dev_log = log.new(o!("dev" => dev_no));
            let dev = Arc::new(SimDevice::new(
                &dev_log,
                config.fw_abi,
                cfg,
                config.chaos,
            )?);

            let fw_dev = dev.clone();
            let stop = shutdown.clone();
            let thread = std::thread::Builder::new()
                .name(format!("sim-fw-{dev_no}"))
                .spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        fw_dev.poll();
                        std::thread::sleep(FW_POLL_INTERVAL);
                    }
                })
                .map_err(|e| AsicError::Io {
                    ctx: "spawning firmware thread".into(),
                    err: e,
                })?;
            devices.push(dev);
            threads.push(thread);
        }
        info!(log, "simulated switch ready";
            "devices" => devices.len(), "fw_abi" => %config.fw_abi);

        Ok(Handle {
            devices,
            threads: Mutex::new(threads),
            shutdown,
            log,
        })
    }

    fn device(&self, dev_no: usize) -> AsicResult<&Arc<SimDevice>> {
        self.devices
            .get(dev_no)
            .ok_or_else(|| AsicError::NotFound(format!("device {dev_no}")))
    }

    /// Stop the firmware threads.
    pub fn fini(&self) {
        if self.shutdown.swap(true, Ordering::Relaxed) {
            return;
        }
        info!(self.log, "stopping simulated firmware");
        let threads: Vec<_> = self.threads.lock().unwrap().drain(..).collect();
        for t in threads {
            let _ = t.join();
        }
    }

    /// Simulated devices are always models.
    pub fn is_model(&self) -> bool {
        true
    }

    /// Bus address of the EDK command block, to be passed to HW_INIT.
    pub fn fw_comm_addr(&self, dev_no: usize) -> AsicResult<u64> {
        Ok(self.device(dev_no)?.fw_comm.bus_addr())
    }

    /// Queue a two-step TX timestamp on `port`, numbered from zero.
    pub fn push_tx_stamp(
        &self,
        dev_no: usize,
        port: u32,
        seq_id: u16,
        timestamp: u64,
    ) -> AsicResult<()> {
        let dev = self.device(dev_no)?;
        let mut fw = dev.firmware.lock().unwrap();
        fw.push_tx_stamp(port, TxStamp { seq_id, timestamp });
        Ok(())
    }

    /// Advance the FIFO counter of `port` as though `n` timestamps had been
    /// captured and lost.
    pub fn lose_tx_stamps(
        &self,
        dev_no: usize,
        port: u32,
        n: u32,
    ) -> AsicResult<()> {
        let dev = self.device(dev_no)?;
        dev.firmware.lock().unwrap().lose_tx_stamps(port, n);
        Ok(())
    }

    /// Leave every `cmd` sent to the device unanswered, so the host times
    /// out on it.
    pub fn set_command_ignored(
        &self,
        dev_no: usize,
        cmd: Command,
        ignored: bool,
    ) -> AsicResult<()> {
        let dev = self.device(dev_no)?;
        dev.firmware.lock().unwrap().set_ignored(cmd, ignored);
        Ok(())
    }

    /// Capture an external event, as firmware event id `event`.  Returns
    /// whether it made it into the ring.
    pub fn record_extts(
        &self,
        dev_no: usize,
        event: u32,
        sec: u64,
        nsec: u32,
    ) -> AsicResult<bool> {
        let dev = self.device(dev_no)?;
        let mut fw = dev.firmware.lock().unwrap();
        Ok(fw.record_extts(&dev.dma, event, sec, nsec))
    }

    /// Update the event-log record for firmware event `event`.
    pub fn record_evlog(
        &self,
        dev_no: usize,
        event: u32,
        prev: FwTime,
        cur: FwTime,
    ) -> AsicResult<bool> {
        let dev = self.device(dev_no)?;
        let mut fw = dev.firmware.lock().unwrap();
        Ok(fw.record_evlog(&dev.dma, event, prev, cur))
    }

    /// Stop (or restart) servicing the mailbox.
    pub fn set_firmware_paused(
        &self,
        dev_no: usize,
        paused: bool,
    ) -> AsicResult<()> {
        let dev = self.device(dev_no)?;
        dev.firmware.lock().unwrap().set_paused(paused);
        Ok(())
    }

    /// Every command the firmware has received, oldest first.
    pub fn commands(&self, dev_no: usize) -> AsicResult<Vec<CommandRecord>> {
        let dev = self.device(dev_no)?;
        let fw = dev.firmware.lock().unwrap();
        Ok(fw.history())
    }

    pub fn clear_commands(&self, dev_no: usize) -> AsicResult<()> {
        let dev = self.device(dev_no)?;
        dev.firmware.lock().unwrap().clear_history();
        Ok(())
    }

    pub fn firmware_state(&self, dev_no: usize) -> AsicResult<FwSnapshot> {
        let dev = self.device(dev_no)?;
        let fw = dev.firmware.lock().unwrap();
        Ok(fw.snapshot())
    }

    /// The firmware's current PTP time.
    pub fn firmware_time(&self, dev_no: usize) -> AsicResult<i64> {
        let dev = self.device(dev_no)?;
        let fw = dev.firmware.lock().unwrap();
        Ok(fw.ptp_ns())
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.fini();
    }
}

impl Platform for Handle {
    fn name(&self) -> &str {
        "sim"
    }

    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn registers(&self, dev_no: usize) -> AsicResult<Arc<dyn RegisterIo>> {
        Ok(self.device(dev_no)?.regs.clone())
    }

    fn dma(&self, dev_no: usize) -> AsicResult<Arc<dyn DmaAllocator>> {
        Ok(self.device(dev_no)?.dma.clone())
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("devices", &self.devices.len())
            .finish()
    }
}
