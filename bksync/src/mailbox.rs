// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The request/response channel to a device's timesync firmware.
//!
//! A command is a code plus two 64-bit argument words.  The host writes the
//! arguments, then the code; the firmware runs the command, leaves two
//! result words in place of the arguments and overwrites the code with its
//! "done" value.  The firmware handles one command at a time, so every
//! exchange holds the mailbox lock from the first write to the last read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use slog::{debug, error, o, Logger};
use strum::EnumCount;

use aal::fw::{self, fw_comm, regs, Command, FwAbi};
use aal::{AsicError, AsicResult, DmaRegion, RegisterIo};

use crate::config::DebugFlags;

const POLL_INTERVAL: Duration = Duration::from_micros(fw::POLL_INTERVAL_US);
const SETTLE_READS: usize = 3;
const SETTLE_INTERVAL: Duration = Duration::from_micros(1);

/// Where a device's mailbox lives.
pub enum MailboxPath {
    /// Legacy firmware: five CMC message registers at `base`.
    Registers { regs: Arc<dyn RegisterIo>, base: u32 },
    /// EDK firmware: a command block in memory shared with the device.
    SharedMemory(Arc<dyn DmaRegion>),
}

impl MailboxPath {
    fn reg(base: u32, word: usize) -> u32 {
        regs::msg(base, regs::MAILBOX[word])
    }

    fn read_cmd(&self) -> AsicResult<u32> {
        match self {
            MailboxPath::Registers { regs, base } => {
                regs.read32(Self::reg(*base, 0))
            }
            MailboxPath::SharedMemory(region) => {
                region.read_u32(fw_comm::CMD_OFFSET)
            }
        }
    }

    fn write_cmd(&self, code: u32) -> AsicResult<()> {
        match self {
            MailboxPath::Registers { regs, base } => {
                regs.write32(Self::reg(*base, 0), code)
            }
            MailboxPath::SharedMemory(region) => {
                region.write_u32(fw_comm::CMD_OFFSET, code)
            }
        }
    }

    // Absent arguments are sent as zero, which also clears whatever the
    // previous command left behind.
    fn write_args(&self, arg1: u64, arg2: u64) -> AsicResult<()> {
        match self {
            MailboxPath::Registers { regs, base } => {
                regs.write32(Self::reg(*base, 1), arg1 as u32)?;
                regs.write32(Self::reg(*base, 2), (arg1 >> 32) as u32)?;
                regs.write32(Self::reg(*base, 3), arg2 as u32)?;
                regs.write32(Self::reg(*base, 4), (arg2 >> 32) as u32)
            }
            MailboxPath::SharedMemory(region) => {
                region.write_u64(fw_comm::DW1_OFFSET, arg1)?;
                region.write_u64(fw_comm::DW2_OFFSET, arg2)
            }
        }
    }

    /// Collect the result words.  With `settle`, the registers are re-read
    /// a few times, accumulating bits, until every word is non-zero; a time
    /// value can otherwise be caught half written.
    fn read_results(&self, settle: bool) -> AsicResult<(u64, u64)> {
        match self {
            MailboxPath::Registers { regs, base } => {
                let mut w = [0u32; 4];
                let reads = if settle { SETTLE_READS } else { 1 };
                for attempt in 0..reads {
                    for (n, word) in w.iter_mut().enumerate() {
                        *word |= regs.read32(Self::reg(*base, n + 1))?;
                    }
                    if w.iter().all(|word| *word != 0) {
                        break;
                    }
                    if attempt + 1 < reads {
                        std::thread::sleep(SETTLE_INTERVAL);
                    }
                }
                Ok((
                    w[0] as u64 | (w[1] as u64) << 32,
                    w[2] as u64 | (w[3] as u64) << 32,
                ))
            }
            MailboxPath::SharedMemory(region) => Ok((
                region.read_u64(fw_comm::DW1_OFFSET)?,
                region.read_u64(fw_comm::DW2_OFFSET)?,
            )),
        }
    }
}

pub struct Mailbox {
    abi: FwAbi,
    log: Logger,
    debug: Arc<DebugFlags>,
    path: Mutex<Option<MailboxPath>>,
    timeouts: [AtomicU64; Command::COUNT],
}

impl Mailbox {
    pub fn new(log: &Logger, abi: FwAbi, debug: Arc<DebugFlags>) -> Self {
        Mailbox {
            abi,
            log: log.new(o!("unit" => "mailbox")),
            debug,
            path: Mutex::new(None),
            timeouts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn abi(&self) -> FwAbi {
        self.abi
    }

    pub fn attach(&self, path: MailboxPath) {
        *self.path.lock().unwrap() = Some(path);
    }

    pub fn detach(&self) {
        *self.path.lock().unwrap() = None;
    }

    /// The current contents of the command word.  Before the first command
    /// this holds the firmware's ready sentinel.
    pub fn status_word(&self) -> AsicResult<u32> {
        match self.path.lock().unwrap().as_ref() {
            Some(path) => path.read_cmd(),
            None => Err(AsicError::Uninitialized("mailbox not attached".into())),
        }
    }

    /// Run `cmd` to completion, returning both result words.
    pub fn execute(
        &self,
        cmd: Command,
        arg1: Option<u64>,
        arg2: Option<u64>,
    ) -> AsicResult<(u64, u64)> {
        self.execute_then(cmd, arg1, arg2, |r1, r2| (r1, r2))
    }

    /// Run `cmd` and hand its results to `f` before the mailbox is
    /// released, so that whatever `f` records is ordered with the command.
    pub fn execute_then<T>(
        &self,
        cmd: Command,
        arg1: Option<u64>,
        arg2: Option<u64>,
        f: impl FnOnce(u64, u64) -> T,
    ) -> AsicResult<T> {
        let code = self.abi.code(cmd).ok_or(AsicError::OperationUnsupported)?;
        let arg1 = arg1.unwrap_or(0);
        let arg2 = arg2.unwrap_or(0);

        let guard = self.path.lock().unwrap();
        let path = guard
            .as_ref()
            .ok_or_else(|| AsicError::Uninitialized("mailbox not attached".into()))?;

        if self.debug.is_set(DebugFlags::CMDS) {
            debug!(self.log, "issuing command";
                "cmd" => %cmd, "arg1" => arg1, "arg2" => arg2);
        }
        path.write_args(arg1, arg2)?;
        path.write_cmd(code)?;

        let start = Instant::now();
        let done = self.abi.done();
        for _ in 0..cmd.retries() {
            std::thread::sleep(POLL_INTERVAL);
            if path.read_cmd()? != done {
                continue;
            }

            let elapsed_us = start.elapsed().as_micros() as u64;
            if elapsed_us > fw::SLOW_COMMAND_US
                && self.debug.is_set(DebugFlags::CMDS)
            {
                debug!(self.log, "slow command";
                    "cmd" => %cmd, "elapsed_us" => elapsed_us);
            }
            let settle = self.abi == FwAbi::Legacy && cmd.returns_time();
            let (r1, r2) = path.read_results(settle)?;
            return Ok(f(r1, r2));
        }

        let elapsed_us = start.elapsed().as_micros() as u64;
        self.timeouts[cmd.index()].fetch_add(1, Ordering::Relaxed);
        error!(self.log, "command timed out";
            "cmd" => %cmd,
            "arg1" => arg1,
            "arg2" => arg2,
            "elapsed_us" => elapsed_us);
        Err(AsicError::MailboxTimeout {
            cmd: cmd.to_string(),
            elapsed_us,
        })
    }

    /// Number of times `cmd` has timed out.
    pub fn timeouts(&self, cmd: Command) -> u64 {
        self.timeouts[cmd.index()].load(Ordering::Relaxed)
    }
}
