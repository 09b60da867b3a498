// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Host-side coordination of the PTP hardware clocks on a switch.
//!
//! The clocks themselves are owned by firmware running next to each ASIC
//! core.  This crate talks to that firmware through a per-device mailbox,
//! presents each device's clock to the OS, supplies the packet driver with
//! what it needs to timestamp PTP frames, and delivers the external events
//! the firmware captures.  Everything hangs off a [`Subsystem`], which
//! owns the devices and the background workers.

use std::fmt::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::BytesMut;
use slog::{debug, error, info, o, warn, Logger};
use tokio::sync::mpsc;

use aal::fw::{self, ts_event, Command};
use packet::ptp::{self, Transport};

pub mod attrs;
pub mod config;
pub mod configure;
pub mod dcb;
pub mod device;
pub mod extts;
pub mod ioctl;
mod mailbox;
mod pair;
pub mod phc;
pub mod reports;
mod rx;
pub mod stats;
mod twostep;
mod txmeta;
mod workers;

pub use aal::{
    AsicError, AsicResult, HwTimestampOps, IoctlCmd, PhcEvent, Platform,
    RxPreProcess, TxMeta, TxType,
};
pub use config::{DebugFlags, DeviceConfig, InitData, SubsystemConfig};
pub use configure::{BroadSyncConfig, BroadSyncStatus, GpioConfig, NtpTod};
pub use dcb::DcbType;
pub use device::Device;
pub use phc::{Phc, PhcRequest, MAX_ADJ_PPB};
pub use stats::PortCounters;

use workers::Workers;

/// Render `data` as rows of sixteen hex bytes.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3 + data.len() / 16);
    for (i, chunk) in data.chunks(16).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(out, "{:04x}:", i * 16);
        for b in chunk {
            let _ = write!(out, " {b:02x}");
        }
    }
    out
}

/// The handle for the whole clock subsystem.  It owns every device, the
/// queue of events raised toward the OS, and the background workers, and
/// it is the capability set the packet driver calls into.
pub struct Subsystem {
    log: Logger,
    config: SubsystemConfig,
    /// Transport forced on every frame, or `Unknown` to inspect each one.
    transport: Transport,
    debug: Arc<DebugFlags>,
    devices: Vec<Device>,
    master: usize,
    /// Mirror-encap indices with timestamp updates running.
    mtp_bitmap: AtomicU32,
    events_tx: mpsc::UnboundedSender<PhcEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PhcEvent>>>,
    workers: Workers,
    me: Weak<Subsystem>,
}

impl Subsystem {
    /// Build the subsystem over the devices `platform` provides.  Devices
    /// come up uninitialized; each is brought up separately with
    /// [`Subsystem::hw_init`].
    pub fn new(
        log: &Logger,
        config: SubsystemConfig,
        platform: &dyn Platform,
    ) -> AsicResult<Arc<Self>> {
        let log = log.new(o!("unit" => "bksync"));

        let dev_cfgs = if config.devices.is_empty() {
            vec![DeviceConfig::default(); platform.device_count()]
        } else {
            config.devices.clone()
        };
        if dev_cfgs.is_empty() {
            return Err(AsicError::NotFound(format!(
                "no devices on platform {}",
                platform.name()
            )));
        }
        let master = config.master_core;
        if master >= dev_cfgs.len() {
            return Err(AsicError::InvalidArg(format!(
                "master core {master} with {} devices",
                dev_cfgs.len()
            )));
        }

        let transport = match Transport::from_code(config.network_transport) {
            Some(t) => t,
            None => {
                warn!(log, "ignoring invalid network transport";
                    "network_transport" => config.network_transport);
                Transport::Unknown
            }
        };

        // Clocks are numbered in registration order.  With a shared PHC
        // only the master registers one and everyone else reads it.
        let owns_clock =
            |dev_no: usize| !config.shared_phc || dev_no == master;
        let clock_index = |dev_no: usize| {
            config.base_phc_index() + (0..dev_no).filter(|d| owns_clock(*d)).count() as u32
        };

        let debug = Arc::new(DebugFlags::new(config.debug));
        let mut devices = Vec::with_capacity(dev_cfgs.len());
        for (dev_no, cfg) in dev_cfgs.into_iter().enumerate() {
            let own = owns_clock(dev_no);
            let phc_index = clock_index(if own { dev_no } else { master });
            devices.push(Device::new(
                &log,
                platform,
                dev_no,
                cfg,
                phc_index,
                own,
                config.fw_abi,
                debug.clone(),
            )?);
        }

        info!(log, "clock subsystem created";
            "platform" => platform.name(),
            "devices" => devices.len(),
            "master" => master,
            "shared_phc" => config.shared_phc,
            "fw_abi" => %config.fw_abi,
            "transport" => %transport);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Arc::new_cyclic(|me| Subsystem {
            workers: Workers::new(&log),
            log,
            config,
            transport,
            debug,
            devices,
            master,
            mtp_bitmap: AtomicU32::new(0),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            me: me.clone(),
        }))
    }

    pub fn config(&self) -> &SubsystemConfig {
        &self.config
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn debug(&self) -> u32 {
        self.debug.get()
    }

    pub fn set_debug(&self, bits: u32) {
        self.debug.set(bits);
        info!(self.log, "debug classes changed"; "debug" => format!("{bits:#x}"));
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, dev_no: usize) -> AsicResult<&Device> {
        self.devices
            .get(dev_no)
            .ok_or_else(|| AsicError::NotFound(format!("device {dev_no}")))
    }

    pub fn master(&self) -> usize {
        self.master
    }

    /// The device time-of-day and event log commands are routed to.
    pub fn master_device(&self) -> &Device {
        &self.devices[self.master]
    }

    /// The device whose clock `dev` keeps time by.
    pub fn clock_device<'a>(&'a self, dev: &'a Device) -> &'a Device {
        if dev.has_own_clock {
            dev
        } else {
            self.master_device()
        }
    }

    /// The clock of device `dev_no`, as presented to the OS.
    pub fn phc(&self, dev_no: usize) -> AsicResult<Phc<'_>> {
        Ok(Phc::new(self, self.device(dev_no)?))
    }

    /// Take the receiving end of the event queue.  There is only one.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PhcEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    pub fn hw_init(&self, dev_no: usize, init: InitData) -> AsicResult<()> {
        self.device(dev_no)?.hw_init(init)
    }

    pub fn hw_deinit(&self, dev_no: usize) -> AsicResult<()> {
        self.device(dev_no)?.hw_deinit()
    }

    /// Start or stop the firmware's timestamp updates for mirror-encap
    /// index `idx`.  Stopping an index that is not running fails without
    /// a command.
    pub fn mtp_ts_update(&self, dev_no: usize, idx: u32, start: bool) -> AsicResult<()> {
        if idx > fw::MAX_MTP_IDX {
            return Err(AsicError::InvalidArg(format!("mirror-encap index {idx}")));
        }
        let dev = self.device(dev_no)?;
        let bit = 1u32 << idx;
        let cmd = if start {
            self.mtp_bitmap.fetch_or(bit, Ordering::AcqRel);
            Command::MtpTsUpdateEnable
        } else {
            if self.mtp_bitmap.fetch_and(!bit, Ordering::AcqRel) & bit == 0 {
                return Err(AsicError::InvalidArg(format!(
                    "mirror-encap index {idx} not running"
                )));
            }
            Command::MtpTsUpdateDisable
        };
        let res = dev.execute(cmd, Some(idx as u64), None);
        if self.debug.is_set(DebugFlags::VERB) {
            debug!(self.log, "mirror-encap update";
                "idx" => idx, "start" => start, "ok" => res.is_ok());
        }
        res.map(|_| ())
    }

    pub fn mtp_bitmap(&self) -> u32 {
        self.mtp_bitmap.load(Ordering::Acquire)
    }

    /// Drain every device's EXTTS ring into the event queue.  Channel
    /// numbers count six per device.
    pub fn extts_poll(&self) -> usize {
        let mut total = 0;
        for dev in &self.devices {
            let base = (dev.dev_no * ts_event::NUM_GPIO_EVENTS) as u32;
            match dev.extts_drain(base, |ev| {
                // A closed queue means nobody is listening.
                let _ = self.events_tx.send(ev);
            }) {
                Ok(n) => total += n,
                Err(e) => {
                    error!(self.log, "extts drain failed";
                        "dev" => dev.dev_no, "error" => %e)
                }
            }
        }
        total
    }

    /// Refresh the cached sample of every clock, then copy the samples to
    /// the devices that share a clock.
    pub fn time_keep_tick(&self) {
        let up = || self.devices.iter().filter(|d| d.is_initialized());
        for dev in up().filter(|d| d.has_own_clock) {
            if let Err(e) = dev.gettime() {
                error!(self.log, "clock refresh failed";
                    "dev" => dev.dev_no, "error" => %e);
            }
        }
        for dev in up().filter(|d| !d.has_own_clock) {
            dev.mirror(self.clock_device(dev));
        }
    }

    fn time_keep_interval(&self) -> Duration {
        Duration::from_millis(self.config.phc_update_interval_ms.max(1))
    }

    /// Start the background workers on the current tokio runtime.
    pub fn start(&self) -> AsicResult<()> {
        self.workers.start(self.me.clone(), self.time_keep_interval())
    }

    /// Whether the periodic clock refresh is running.
    pub fn time_keep_running(&self) -> bool {
        self.workers.time_keep_running()
    }

    /// Stop the workers, waiting for any work in flight, and take every
    /// device down.
    pub async fn teardown(&self) {
        self.workers.stop().await;
        for dev in self.devices.iter().filter(|d| d.is_initialized()) {
            if let Err(e) = dev.hw_deinit() {
                warn!(self.log, "device teardown failed";
                    "dev" => dev.dev_no, "error" => %e);
            }
        }
        info!(self.log, "clock subsystem stopped");
    }
}

impl HwTimestampOps for Subsystem {
    fn hw_tstamp_enable(&self, dev_no: usize, port: u32, tx_type: TxType) -> AsicResult<()> {
        let dev = self.device(dev_no)?;
        if tx_type == TxType::OneStepSync {
            // One-step frames are stamped from the cached sample, which
            // has to be kept fresh from here on.
            self.workers
                .start_time_keep(self.me.clone(), self.time_keep_interval());
            return Ok(());
        }
        dev.twostep_update(port, true)
    }

    fn hw_tstamp_disable(&self, dev_no: usize, port: u32, tx_type: TxType) -> AsicResult<()> {
        let dev = self.device(dev_no)?;
        if tx_type == TxType::OneStepSync {
            return Ok(());
        }
        dev.twostep_update(port, false)
    }

    fn tx_time_get(
        &self,
        dev_no: usize,
        port: u32,
        tx_type: TxType,
        frame: &[u8],
    ) -> AsicResult<u64> {
        self.device(dev_no)?.tx_time_get(
            port,
            tx_type,
            frame,
            self.transport,
            self.config.tsts_retries,
        )
    }

    fn tx_meta_set(
        &self,
        dev_no: usize,
        port: u32,
        tx_type: TxType,
        hdr_len: usize,
        frame: &mut [u8],
    ) -> AsicResult<TxMeta> {
        self.device(dev_no)?.tx_meta(
            port,
            tx_type,
            hdr_len,
            frame,
            self.transport,
            self.config.vlan_prio,
        )
    }

    fn rx_pre_process(
        &self,
        dev_no: usize,
        frame: &[u8],
        src_sys_port: u32,
    ) -> AsicResult<RxPreProcess> {
        self.device(dev_no)?.rx_pre_process(frame, src_sys_port)
    }

    fn rx_time_upscale(
        &self,
        dev_no: usize,
        port: u32,
        frame: &mut BytesMut,
        meta: &[u32],
    ) -> AsicResult<Option<u64>> {
        self.device(dev_no)?.rx_time(port, frame, meta)
    }

    fn phc_index_get(&self, dev_no: usize) -> AsicResult<u32> {
        Ok(self.device(dev_no)?.phc_index)
    }

    fn transport_get(&self, frame: &[u8]) -> Transport {
        ptp::resolve_transport(frame, self.transport)
    }

    fn ioctl(&self, dev_no: usize, cmd: IoctlCmd, data: &[i32]) -> AsicResult<Vec<i32>> {
        ioctl::handle(self, dev_no, cmd, data)
    }
}
