// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! One switch device (ASIC core) and everything the subsystem keeps for it:
//! its mailbox, cached clock sample, port counters, two-step port bitmap,
//! and the shadows of what has been configured into its firmware.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slog::{info, o, warn, Logger};
use strum::IntoEnumIterator;

use aal::fw::{self, evlog, extts, fw_comm, regs, Command, FwAbi, SysInfo};
use aal::{
    AsicError, AsicResult, DmaAllocator, DmaRegion, Platform, RegisterIo,
};
use common::time::TimeOffset;
use packet::dnx::Jr2HeaderConfig;

use crate::config::{DebugFlags, DeviceConfig, InitData};
use crate::configure::{BroadSyncConfig, GpioConfig, NtpTod};
use crate::extts::ExttsState;
use crate::mailbox::{Mailbox, MailboxPath};
use crate::pair::PhcPair;
use crate::stats::{PortCounters, PortStats};

/// Words in the two-step port bitmap.
pub const PORTMAP_WORDS: usize = fw::MAX_NUM_PORTS / 64;

/// Firmware configuration as last written by the host.
#[derive(Default)]
pub struct DeviceState {
    pub evlog: Option<Arc<dyn DmaRegion>>,
    pub evlog_enabled: [bool; fw::ts_event::NUM_TS_EVENTS],
    pub bs: [BroadSyncConfig; 2],
    pub gpio: [GpioConfig; fw::ts_event::NUM_GPIO_EVENTS],
    pub ptp_tod: TimeOffset,
    pub ntp_tod: NtpTod,
}

pub struct Device {
    pub dev_no: usize,
    pub cfg: DeviceConfig,
    /// Index of the clock this device's time is read from.
    pub phc_index: u32,
    /// Whether this device registered a clock of its own.
    pub has_own_clock: bool,
    pub(crate) log: Logger,
    pub(crate) debug: Arc<DebugFlags>,
    regs: Arc<dyn RegisterIo>,
    pub(crate) dma: Arc<dyn DmaAllocator>,
    pub(crate) mailbox: Mailbox,
    pub(crate) pair: PhcPair,
    pub(crate) stats: PortStats,
    initialized: AtomicBool,
    init: Mutex<InitData>,
    portmap: [AtomicU64; PORTMAP_WORDS],
    pub(crate) state: Mutex<DeviceState>,
    pub(crate) extts: Mutex<ExttsState>,
    pub(crate) jr2: Mutex<Jr2HeaderConfig>,
}

impl Device {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log: &Logger,
        platform: &dyn Platform,
        dev_no: usize,
        cfg: DeviceConfig,
        phc_index: u32,
        has_own_clock: bool,
        abi: FwAbi,
        debug: Arc<DebugFlags>,
    ) -> AsicResult<Self> {
        let log = log.new(o!("dev" => dev_no));
        Ok(Device {
            dev_no,
            cfg,
            phc_index,
            has_own_clock,
            regs: platform.registers(dev_no)?,
            dma: platform.dma(dev_no)?,
            mailbox: Mailbox::new(&log, abi, debug.clone()),
            pair: PhcPair::new(),
            stats: PortStats::new(fw::MAX_NUM_PORTS),
            initialized: AtomicBool::new(false),
            init: Mutex::new(InitData::default()),
            portmap: std::array::from_fn(|_| AtomicU64::new(0)),
            state: Mutex::new(DeviceState::default()),
            extts: Mutex::new(ExttsState::default()),
            jr2: Mutex::new(Jr2HeaderConfig::default()),
            debug,
            log,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn require_init(&self) -> AsicResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(AsicError::Uninitialized(format!("device {}", self.dev_no)))
        }
    }

    /// Issue a firmware command on an initialized device.
    pub(crate) fn execute(
        &self,
        cmd: Command,
        arg1: Option<u64>,
        arg2: Option<u64>,
    ) -> AsicResult<(u64, u64)> {
        self.require_init()?;
        self.mailbox.execute(cmd, arg1, arg2)
    }

    pub fn init_data(&self) -> InitData {
        *self.init.lock().unwrap()
    }

    pub fn abi(&self) -> FwAbi {
        self.mailbox.abi()
    }

    pub fn timeouts(&self, cmd: Command) -> u64 {
        self.mailbox.timeouts(cmd)
    }

    fn write_msg(&self, n: u32, val: u32) -> AsicResult<()> {
        let base = regs::cmc_base(self.cfg.dcb_type.is_cmicx(), self.init_data().fw_core);
        self.regs.write32(regs::msg(base, n), val)
    }

    /// Bring the device up: set up the mailbox and shared memory, check
    /// that the firmware is alive, and initialize it.  A device that is
    /// already up is left alone.
    pub fn hw_init(&self, init: InitData) -> AsicResult<()> {
        let mut state = self.state.lock().unwrap();

        if init.fw_core > self.cfg.max_core() {
            return Err(AsicError::InvalidArg(format!(
                "firmware core {} exceeds {}",
                init.fw_core,
                self.cfg.max_core()
            )));
        }
        if self.is_initialized() {
            return Ok(());
        }

        let base = regs::cmc_base(self.cfg.dcb_type.is_cmicx(), init.fw_core);
        let path = match self.abi() {
            FwAbi::Legacy => MailboxPath::Registers {
                regs: self.regs.clone(),
                base,
            },
            FwAbi::Edk => {
                let region = self
                    .dma
                    .map_phys(init.fw_comm_phys, fw_comm::LEN)
                    .map_err(|e| {
                        AsicError::Resource(format!(
                            "mapping firmware command block at {:#x}: {e}",
                            init.fw_comm_phys
                        ))
                    })?;
                MailboxPath::SharedMemory(region)
            }
        };
        *self.init.lock().unwrap() = init;

        self.stats.reset();
        self.portmap
            .iter()
            .for_each(|w| w.store(0, Ordering::Relaxed));
        if self.abi() == FwAbi::Legacy {
            self.write_msg(regs::MSG_ENDIAN_COS, regs::endian_cos(init.pci_cos))?;
            self.write_msg(regs::MSG_HOST_READY_0, 1)?;
            self.write_msg(regs::MSG_HOST_READY_1, 1)?;

            state.evlog = Some(self.dma.alloc(evlog::LOG_LEN)?);
            let ring = self.dma.alloc(extts::LOG_LEN)?;
            ring.write_u32(extts::HEAD_OFFSET, 0)?;
            ring.write_u32(extts::TAIL_OFFSET, 0)?;
            self.extts.lock().unwrap().attach(ring, 0);
        }

        self.mailbox.attach(path);
        let status = self.mailbox.status_word()?;
        if status != fw::FW_READY {
            warn!(self.log, "firmware not ready"; "status" => format!("{status:#x}"));
            self.mailbox.detach();
            return Err(AsicError::FirmwareNotReady(status));
        }

        if let Err(e) = self.ptp_init(&init) {
            self.mailbox.detach();
            return Err(e);
        }
        self.initialized.store(true, Ordering::Release);
        info!(self.log, "device initialized";
            "fw_core" => init.fw_core,
            "pci_cos" => init.pci_cos,
            "fw_abi" => %self.abi(),
            "dcb" => %self.cfg.dcb_type);
        Ok(())
    }

    fn ptp_init(&self, init: &InitData) -> AsicResult<()> {
        self.mailbox.execute(Command::Init, None, None)?;
        std::thread::sleep(Duration::from_millis(1));

        let dcb = self.cfg.dcb_type;
        if dcb.is_dpp() || dcb.is_dnx() {
            for info in SysInfo::iter() {
                let val = match info {
                    SysInfo::UcPortNum => init.uc_port_num,
                    SysInfo::UcPortSysport => init.uc_sysport,
                    SysInfo::HostCpuPort => init.host_cpu_port,
                    SysInfo::HostCpuSysport => init.host_cpu_sysport,
                    SysInfo::UdhLen => init.udh_len,
                };
                self.mailbox.execute(
                    Command::SysInfo,
                    Some(info as u64),
                    Some(val as u64),
                )?;
            }
        }
        Ok(())
    }

    /// Take the device down.  The device is marked down even if the
    /// firmware fails to acknowledge.
    pub fn hw_deinit(&self) -> AsicResult<()> {
        let _state = self.state.lock().unwrap();
        if !self.is_initialized() {
            return Ok(());
        }

        if self.abi() == FwAbi::Legacy {
            self.write_msg(regs::MSG_HOST_READY_0, 0)?;
            self.write_msg(regs::MSG_HOST_READY_1, 0)?;
        }
        let res = self.mailbox.execute(Command::Deinit, None, None);
        self.initialized.store(false, Ordering::Release);
        self.mailbox.detach();
        self.extts.lock().unwrap().detach();
        info!(self.log, "device deinitialized");
        res.map(|_| ())
    }

    /// Record whether two-step timestamps are wanted on driver port `port`,
    /// returning the bitmap word that changed and its index.
    pub(crate) fn set_twostep(&self, port: u32, on: bool) -> AsicResult<(usize, u64)> {
        if port == 0 || port as usize >= fw::MAX_NUM_PORTS {
            return Err(AsicError::InvalidArg(format!("port {port}")));
        }
        let bit = port as usize - 1;
        let (idx, mask) = (bit / 64, 1u64 << (bit % 64));
        let old = if on {
            self.portmap[idx].fetch_or(mask, Ordering::AcqRel)
        } else {
            self.portmap[idx].fetch_and(!mask, Ordering::AcqRel)
        };
        let new = if on { old | mask } else { old & !mask };
        Ok((idx, new))
    }

    pub fn portmap_word(&self, idx: usize) -> u64 {
        self.portmap
            .get(idx)
            .map(|w| w.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// A copy of the counters of driver port `port`.
    pub fn port_counters(&self, port: u32) -> Option<PortCounters> {
        self.stats.port(port).map(|s| s.snapshot())
    }

    pub fn twostep_enabled(&self, port: u32) -> bool {
        match port.checked_sub(1) {
            Some(bit) => {
                self.portmap_word(bit as usize / 64) & (1 << (bit % 64)) != 0
            }
            None => false,
        }
    }
}
