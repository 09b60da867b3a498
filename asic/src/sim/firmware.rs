// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A model of the timesync firmware running on a device's embedded core.
//! It watches the mailbox, runs each command against a software clock, and
//! produces two-step timestamps and external events on request.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use slog::{debug, o, warn, Logger};

use aal::fw::{self, broadsync, extts, fw_comm, regs, Command, FwAbi};
use aal::DmaRegion;
use common::time::{FwTime, ONE_BILLION};

use super::chaos::SimChaos;
use super::mem::{SimDmaMap, SimRegion, SimRegisters};

/// Written to the command word when the firmware drops a command, so the
/// host never sees it complete.
const CMD_DROPPED: u32 = 0xFFFF_FFFF;

/// The firmware's free-running clock.  The reference counter is the raw
/// time since boot and the PTP time is derived from it through the offset
/// and frequency adjustment the host has applied.
#[derive(Debug)]
struct SimClock {
    boot: Instant,
    base_ns: i64,
    base_ref: u64,
    ppb: i64,
}

impl SimClock {
    fn new() -> Self {
        SimClock {
            boot: Instant::now(),
            base_ns: 0,
            base_ref: 0,
            ppb: 0,
        }
    }

    fn ref_ns(&self) -> u64 {
        self.boot.elapsed().as_nanos() as u64
    }

    fn ptp_ns_at(&self, now_ref: u64) -> i64 {
        let since = now_ref.saturating_sub(self.base_ref) as i64;
        self.base_ns + since + since * self.ppb / ONE_BILLION as i64
    }

    fn ptp_ns(&self) -> i64 {
        self.ptp_ns_at(self.ref_ns())
    }

    /// A consistent (PTP time, 48-bit reference counter) pair.
    fn sample(&self) -> (u64, u64) {
        let now_ref = self.ref_ns();
        (self.ptp_ns_at(now_ref) as u64, now_ref & 0xFFFF_FFFF_FFFF)
    }

    fn set(&mut self, ns: i64) {
        self.base_ref = self.ref_ns();
        self.base_ns = ns;
    }

    fn adjust(&mut self, delta: i64) {
        self.base_ns += delta;
    }

    fn set_freq(&mut self, ppb: i64) {
        let now_ref = self.ref_ns();
        self.base_ns = self.ptp_ns_at(now_ref);
        self.base_ref = now_ref;
        self.ppb = ppb;
    }
}

/// A mailbox command as the firmware received it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandRecord {
    pub cmd: Command,
    pub arg1: u64,
    pub arg2: u64,
}

/// A two-step timestamp waiting to be collected by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxStamp {
    pub seq_id: u16,
    pub timestamp: u64,
}

/// A copy of the firmware's configuration state, for inspection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FwSnapshot {
    pub initialized: bool,
    pub freq_ppb: i64,
    pub sysinfo: BTreeMap<u64, u64>,
    pub broadsync: [u64; 2],
    pub bs_phase_offset: [u64; 2],
    pub gpio: [u64; fw::ts_event::NUM_GPIO_EVENTS],
    pub gpio_phase_offset: [u64; fw::ts_event::NUM_GPIO_EVENTS],
    pub evlog: BTreeMap<u32, u64>,
    pub extts_enabled: BTreeMap<u32, bool>,
    pub extts_ring: Option<u64>,
    pub mtp_bitmap: u32,
    pub portmap: BTreeMap<u64, u64>,
    pub ptp_tod: (u64, u64),
    pub ntp_tod: (u64, u64),
}

pub struct Firmware {
    abi: FwAbi,
    clock: SimClock,
    tx_queues: BTreeMap<u32, VecDeque<TxStamp>>,
    fifo_rxctr: BTreeMap<u32, u32>,
    history: Vec<CommandRecord>,
    state: FwSnapshot,
    paused: bool,
    /// Commands received but never answered.
    ignored: Vec<Command>,
    log: Logger,
}

/// Where the firmware finds its half of the mailbox.
pub enum MailboxView {
    Registers { regs: Arc<SimRegisters>, base: u32 },
    SharedMemory(Arc<SimRegion>),
}

impl MailboxView {
    fn read_cmd(&self) -> u32 {
        match self {
            MailboxView::Registers { regs: r, base } => {
                r.peek(regs::msg(*base, regs::MAILBOX[0]))
            }
            MailboxView::SharedMemory(region) => {
                region.read_u32(fw_comm::CMD_OFFSET).unwrap_or(0)
            }
        }
    }

    fn write_cmd(&self, val: u32) {
        match self {
            MailboxView::Registers { regs: r, base } => {
                r.poke(regs::msg(*base, regs::MAILBOX[0]), val)
            }
            MailboxView::SharedMemory(region) => {
                let _ = region.write_u32(fw_comm::CMD_OFFSET, val);
            }
        }
    }

    fn read_args(&self) -> (u64, u64) {
        match self {
            MailboxView::Registers { regs: r, base } => {
                let word = |n: usize| r.peek(regs::msg(*base, regs::MAILBOX[n])) as u64;
                (word(1) | word(2) << 32, word(3) | word(4) << 32)
            }
            MailboxView::SharedMemory(region) => (
                region.read_u64(fw_comm::DW1_OFFSET).unwrap_or(0),
                region.read_u64(fw_comm::DW2_OFFSET).unwrap_or(0),
            ),
        }
    }

    fn write_results(&self, r1: u64, r2: u64) {
        match self {
            MailboxView::Registers { regs: r, base } => {
                let put =
                    |n: usize, v: u32| r.poke(regs::msg(*base, regs::MAILBOX[n]), v);
                put(1, r1 as u32);
                put(2, (r1 >> 32) as u32);
                put(3, r2 as u32);
                put(4, (r2 >> 32) as u32);
            }
            MailboxView::SharedMemory(region) => {
                let _ = region.write_u64(fw_comm::DW1_OFFSET, r1);
                let _ = region.write_u64(fw_comm::DW2_OFFSET, r2);
            }
        }
    }
}

impl Firmware {
    pub fn new(log: &Logger, abi: FwAbi) -> Self {
        Firmware {
            abi,
            clock: SimClock::new(),
            tx_queues: BTreeMap::new(),
            fifo_rxctr: BTreeMap::new(),
            history: Vec::new(),
            state: FwSnapshot::default(),
            paused: false,
            ignored: Vec::new(),
            log: log.new(o!("unit" => "firmware")),
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Stop (or resume) answering `cmd`.  Other commands are unaffected.
    pub fn set_ignored(&mut self, cmd: Command, ignored: bool) {
        self.ignored.retain(|c| *c != cmd);
        if ignored {
            self.ignored.push(cmd);
        }
    }

    pub fn history(&self) -> Vec<CommandRecord> {
        self.history.clone()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn snapshot(&self) -> FwSnapshot {
        let mut snap = self.state.clone();
        snap.freq_ppb = self.clock.ppb;
        snap
    }

    pub fn ptp_ns(&self) -> i64 {
        self.clock.ptp_ns()
    }

    /// Queue a two-step timestamp for `port`, which is numbered from zero as
    /// the firmware sees it.
    pub fn push_tx_stamp(&mut self, port: u32, stamp: TxStamp) {
        self.tx_queues.entry(port).or_default().push_back(stamp);
    }

    /// Count `n` captures on `port` that overflowed the FIFO before the
    /// host could fetch them.
    pub fn lose_tx_stamps(&mut self, port: u32, n: u32) {
        let ctr = self.fifo_rxctr.entry(port).or_insert(0);
        *ctr = ctr.wrapping_add(n);
    }

    /// Check the mailbox once, running any command found there.
    pub fn poll(
        &mut self,
        mailbox: &MailboxView,
        dma: &SimDmaMap,
        chaos: &SimChaos,
    ) {
        if self.paused {
            return;
        }
        let code = mailbox.read_cmd();
        let Some(cmd) = self.abi.command(code) else {
            return;
        };
        let (arg1, arg2) = mailbox.read_args();
        self.history.push(CommandRecord { cmd, arg1, arg2 });

        if chaos.command_drop.fires() || self.ignored.contains(&cmd) {
            warn!(self.log, "dropping command"; "cmd" => %cmd);
            mailbox.write_cmd(CMD_DROPPED);
            return;
        }

        let (r1, r2) = self.execute(cmd, arg1, arg2, dma, chaos);
        debug!(self.log, "command done";
            "cmd" => %cmd, "arg1" => arg1, "arg2" => arg2);
        mailbox.write_results(r1, r2);
        mailbox.write_cmd(self.abi.done());
    }

    fn execute(
        &mut self,
        cmd: Command,
        arg1: u64,
        arg2: u64,
        dma: &SimDmaMap,
        chaos: &SimChaos,
    ) -> (u64, u64) {
        match cmd {
            Command::Init => {
                self.state.initialized = true;
                (0, 0)
            }
            Command::Deinit => {
                self.state.initialized = false;
                (0, 0)
            }
            Command::GetTime => self.clock.sample(),
            Command::SetTime => {
                self.clock.set(arg1 as i64);
                (0, 0)
            }
            Command::AdjTime => {
                self.clock.adjust(arg1 as i64);
                (0, 0)
            }
            Command::FreqCor => {
                self.clock.set_freq(arg1 as i64);
                (0, 0)
            }
            Command::PbmUpdate => {
                self.state.portmap.insert(arg1, arg2);
                (0, 0)
            }
            Command::GetTsTime => {
                let port = (arg1 & 0xFFFF) as u32;
                if chaos.tstime_invalid.fires() {
                    return (0, 0);
                }
                match self.tx_queues.get_mut(&port).and_then(|q| q.pop_front())
                {
                    Some(stamp) => {
                        let ctr = self.fifo_rxctr.entry(port).or_insert(0);
                        *ctr = ctr.wrapping_add(1);
                        let r1 = 1 | (stamp.seq_id as u64) << 16
                            | (*ctr as u64) << 32;
                        (r1, stamp.timestamp)
                    }
                    None => (0, 0),
                }
            }
            Command::AckTsTime => (0, 0),
            Command::MtpTsUpdateEnable => {
                self.state.mtp_bitmap |= 1 << (arg1 & 0x1f);
                (0, 0)
            }
            Command::MtpTsUpdateDisable => {
                self.state.mtp_bitmap &= !(1 << (arg1 & 0x1f));
                (0, 0)
            }
            Command::SysInfo => {
                self.state.sysinfo.insert(arg1, arg2);
                (0, 0)
            }
            Command::BroadSync => self.broadsync(arg1, arg2),
            Command::Gpio => {
                if let Some(idx) = gpio_index(arg1) {
                    self.state.gpio[idx] = arg2;
                }
                (0, 0)
            }
            Command::GpioPhaseOffset => {
                if let Some(idx) = gpio_index(arg1) {
                    self.state.gpio_phase_offset[idx] = arg2;
                }
                (0, 0)
            }
            Command::EvLog => {
                self.state.evlog.insert(arg1 as u32, arg2);
                (0, 0)
            }
            Command::ExttsLog => {
                let event = (arg1 >> 32) as u32;
                let enable = arg1 & 1 != 0;
                self.state.extts_enabled.insert(event, enable);
                if arg2 != 0 {
                    self.state.extts_ring = Some(arg2);
                }
                (0, 0)
            }
            Command::GetExttsBuff => {
                let addr = match self.state.extts_ring {
                    Some(addr) => addr,
                    None => {
                        let region = dma.fw_alloc(extts::LOG_LEN);
                        self.state.extts_ring = Some(region.bus_addr());
                        region.bus_addr()
                    }
                };
                (0, addr)
            }
            Command::PtpTod => {
                self.state.ptp_tod = (arg1, arg2);
                (0, 0)
            }
            Command::NtpTod => {
                self.state.ntp_tod = (arg1, arg2);
                (0, 0)
            }
            Command::PtpTodGet => {
                let ns = self.clock.ptp_ns().max(0) as u64;
                (ns / ONE_BILLION, ns % ONE_BILLION)
            }
            Command::NtpTodGet => {
                let ns = self.clock.ptp_ns().max(0) as u64;
                let epoch = self.state.ntp_tod.1;
                (ns / ONE_BILLION + epoch, ns % ONE_BILLION)
            }
        }
    }

    fn broadsync(&mut self, subcmd: u64, data: u64) -> (u64, u64) {
        match subcmd {
            broadsync::BS0_CONFIG | broadsync::BS1_CONFIG => {
                let id = (subcmd - broadsync::BS0_CONFIG) as usize;
                self.state.broadsync[id] = data;
                (0, 0)
            }
            broadsync::BS0_STATUS_GET | broadsync::BS1_STATUS_GET => {
                let id = (subcmd - broadsync::BS0_STATUS_GET) as usize;
                // Locked when enabled, with a small fixed variance.
                let locked = self.state.broadsync[id] & 1;
                (0, (0x20u64 << 32) | locked)
            }
            broadsync::BS0_PHASE_OFFSET_SET
            | broadsync::BS1_PHASE_OFFSET_SET => {
                let id = (subcmd - broadsync::BS0_PHASE_OFFSET_SET) as usize;
                self.state.bs_phase_offset[id] = data;
                (0, 0)
            }
            _ => (0, 0),
        }
    }

    /// Record an external event in the EXTTS ring, as the hardware would on
    /// a pin transition.  Returns false if the ring is not set up or full.
    pub fn record_extts(
        &mut self,
        dma: &SimDmaMap,
        event: u32,
        sec: u64,
        nsec: u32,
    ) -> bool {
        let Some((ring, base)) =
            self.state.extts_ring.and_then(|addr| dma.resolve(addr))
        else {
            return false;
        };
        let n = extts::NUM_ENTRIES as u32;
        let head = ring.read_u32(base + extts::HEAD_OFFSET).unwrap_or(0) % n;
        let tail = ring.read_u32(base + extts::TAIL_OFFSET).unwrap_or(0) % n;
        let next = (tail + 1) % n;
        if next == head {
            let _ = ring.write_u32(base + extts::OVERFLOW_OFFSET, 1);
            return false;
        }

        let entry = base + extts::entry_offset(tail as usize);
        let mut raw = [0u8; extts::ENTRY_LEN];
        raw[0..4].copy_from_slice(&event.to_le_bytes());
        raw[4..12].copy_from_slice(&sec.to_le_bytes());
        raw[12..16].copy_from_slice(&nsec.to_le_bytes());
        if ring.write(entry, &raw).is_err() {
            return false;
        }
        let _ = ring.write_u32(base + extts::OVERFLOW_OFFSET, 0);
        ring.write_u32(base + extts::TAIL_OFFSET, next).is_ok()
    }

    /// Update an event-log record, if the host has enabled that event.
    pub fn record_evlog(
        &mut self,
        dma: &SimDmaMap,
        event: u32,
        prev: FwTime,
        cur: FwTime,
    ) -> bool {
        let Some((region, off)) = self
            .state
            .evlog
            .get(&event)
            .filter(|addr| **addr != 0)
            .and_then(|addr| dma.resolve(*addr))
        else {
            return false;
        };
        region.write(off, &prev.to_le_bytes()).is_ok()
            && region.write(off + fw::FW_TSTAMP_LEN, &cur.to_le_bytes()).is_ok()
    }
}

fn gpio_index(subcmd: u64) -> Option<usize> {
    let idx = subcmd.checked_sub(1)? as usize;
    (idx < fw::ts_event::NUM_GPIO_EVENTS).then_some(idx)
}
