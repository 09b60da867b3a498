// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The host/firmware ABI of the timesync firmware running on the switch's
//! embedded cores: command codes, sub-commands, register locations, and the
//! layouts of the memory regions the two sides share.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Written by the firmware into the command register once it is ready to
/// accept INIT.
pub const FW_READY: u32 = 0xBADC_0DE1;

/// Time between polls of the command register.
pub const POLL_INTERVAL_US: u64 = 100;

/// Base number of polls before a command is declared timed out.
pub const BASE_RETRIES: u32 = 1000;

/// Commands slower than this are logged, though they still succeed.
pub const SLOW_COMMAND_US: u64 = 5000;

/// Maximum number of mirror-encap indices the firmware tracks.
pub const MAX_MTP_IDX: u32 = 8;

/// Number of ports with statistics and two-step state.
pub const MAX_NUM_PORTS: usize = 512;

/// Ports numbered above this cannot be queried for two-step timestamps.
pub const MAX_TSTIME_PORT: u32 = 255;

/// The two generations of firmware differ in command numbering and in how
/// commands are passed.  Legacy firmware uses the CMC message registers;
/// EDK firmware uses a small structure in host memory.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FwAbi {
    #[default]
    Legacy,
    Edk,
}

impl fmt::Display for FwAbi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FwAbi::Legacy => write!(f, "legacy"),
            FwAbi::Edk => write!(f, "edk"),
        }
    }
}

impl std::str::FromStr for FwAbi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "legacy" => Ok(FwAbi::Legacy),
            "edk" => Ok(FwAbi::Edk),
            x => Err(format!("invalid firmware abi: {x}")),
        }
    }
}

/// Every operation the host can ask of the firmware.  Not every ABI
/// implements every command.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::EnumIter,
    strum::IntoStaticStr,
    strum::EnumCount,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Init,
    Deinit,
    GetTime,
    SetTime,
    FreqCor,
    PbmUpdate,
    AdjTime,
    GetTsTime,
    MtpTsUpdateEnable,
    MtpTsUpdateDisable,
    AckTsTime,
    SysInfo,
    BroadSync,
    Gpio,
    EvLog,
    ExttsLog,
    GetExttsBuff,
    GpioPhaseOffset,
    PtpTod,
    NtpTod,
    PtpTodGet,
    NtpTodGet,
}

impl Command {
    /// Polls allowed before the command times out.
    pub fn retries(self) -> u32 {
        match self {
            Command::Init | Command::Deinit => BASE_RETRIES * 4,
            Command::GetTime | Command::AckTsTime => BASE_RETRIES * 2,
            Command::MtpTsUpdateEnable | Command::MtpTsUpdateDisable => {
                BASE_RETRIES * 6
            }
            Command::PtpTodGet | Command::NtpTodGet => BASE_RETRIES * 4,
            _ => BASE_RETRIES,
        }
    }

    /// Dense index, for per-command counters.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Commands whose results carry a timestamp split across both halves of
    /// both result slots.
    pub fn returns_time(self) -> bool {
        matches!(
            self,
            Command::GetTime
                | Command::GetTsTime
                | Command::PtpTodGet
                | Command::NtpTodGet
        )
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// Legacy firmware numbers its commands from 2, with DONE at 1, and has no
// ToD or EXTTS buffer commands.
const LEGACY_CODES: &[(Command, u32)] = &[
    (Command::Init, 0x2),
    (Command::Deinit, 0x3),
    (Command::GetTime, 0x4),
    (Command::SetTime, 0x5),
    (Command::FreqCor, 0x6),
    (Command::PbmUpdate, 0x7),
    (Command::AdjTime, 0x8),
    (Command::GetTsTime, 0x9),
    (Command::MtpTsUpdateEnable, 0xa),
    (Command::MtpTsUpdateDisable, 0xb),
    (Command::AckTsTime, 0xc),
    (Command::SysInfo, 0xd),
    (Command::BroadSync, 0xe),
    (Command::Gpio, 0xf),
    (Command::EvLog, 0x10),
    (Command::ExttsLog, 0x11),
    (Command::GpioPhaseOffset, 0x12),
];

const EDK_CODES: &[(Command, u32)] = &[
    (Command::Init, 0x1),
    (Command::Deinit, 0x2),
    (Command::GetTime, 0x3),
    (Command::SetTime, 0x4),
    (Command::FreqCor, 0x5),
    (Command::PbmUpdate, 0x6),
    (Command::AdjTime, 0x7),
    (Command::GetTsTime, 0x8),
    (Command::MtpTsUpdateEnable, 0x9),
    (Command::MtpTsUpdateDisable, 0xa),
    (Command::AckTsTime, 0xb),
    (Command::SysInfo, 0xc),
    (Command::BroadSync, 0xd),
    (Command::Gpio, 0xe),
    (Command::ExttsLog, 0x10),
    (Command::GetExttsBuff, 0x11),
    (Command::GpioPhaseOffset, 0x12),
    (Command::PtpTod, 0x13),
    (Command::NtpTod, 0x14),
    (Command::PtpTodGet, 0x15),
    (Command::NtpTodGet, 0x16),
];

impl FwAbi {
    fn codes(self) -> &'static [(Command, u32)] {
        match self {
            FwAbi::Legacy => LEGACY_CODES,
            FwAbi::Edk => EDK_CODES,
        }
    }

    /// The value the firmware writes back once a command completes.
    pub fn done(self) -> u32 {
        match self {
            FwAbi::Legacy => 0x1,
            FwAbi::Edk => 0x0,
        }
    }

    /// The wire code for `cmd`, if this ABI supports it.
    pub fn code(self, cmd: Command) -> Option<u32> {
        self.codes()
            .iter()
            .find(|(c, _)| *c == cmd)
            .map(|(_, code)| *code)
    }

    /// Decode a wire code back into a command.
    pub fn command(self, code: u32) -> Option<Command> {
        self.codes()
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(cmd, _)| *cmd)
    }
}

/// SYSINFO sub-commands, sent to DPP and DNX devices after INIT.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumIter)]
#[repr(u64)]
pub enum SysInfo {
    UcPortNum = 1,
    UcPortSysport = 2,
    HostCpuPort = 3,
    HostCpuSysport = 4,
    UdhLen = 5,
}

/// BROADSYNC sub-commands.
pub mod broadsync {
    pub const BS0_CONFIG: u64 = 0x1;
    pub const BS1_CONFIG: u64 = 0x2;
    pub const BS0_STATUS_GET: u64 = 0x3;
    pub const BS1_STATUS_GET: u64 = 0x4;
    pub const BS0_PHASE_OFFSET_SET: u64 = 0x5;
    pub const BS1_PHASE_OFFSET_SET: u64 = 0x6;

    pub fn config(bs_id: usize) -> u64 {
        if bs_id == 0 {
            BS0_CONFIG
        } else {
            BS1_CONFIG
        }
    }

    pub fn status(bs_id: usize) -> u64 {
        if bs_id == 0 {
            BS0_STATUS_GET
        } else {
            BS1_STATUS_GET
        }
    }

    pub fn phase_offset(bs_id: usize) -> u64 {
        if bs_id == 0 {
            BS0_PHASE_OFFSET_SET
        } else {
            BS1_PHASE_OFFSET_SET
        }
    }

    /// Whether a BROADSYNC sub-command returns data.
    pub fn is_status(subcmd: u64) -> bool {
        subcmd == BS0_STATUS_GET || subcmd == BS1_STATUS_GET
    }
}

/// GPIO and GPIO_PHASEOFFSET take the pin number plus one.
pub fn gpio_subcmd(gpio: usize) -> u64 {
    gpio as u64 + 1
}

/// Timestamp event sources, as numbered by the firmware.
pub mod ts_event {
    pub const CPU: u32 = 0;
    pub const BSHB_0: u32 = 1;
    pub const BSHB_1: u32 = 2;
    pub const GPIO_1: u32 = 3;
    pub const GPIO_6: u32 = 8;

    /// Number of event-log slots.
    pub const NUM_TS_EVENTS: usize = 14;

    /// Number of GPIO-driven EXTTS events per device.
    pub const NUM_GPIO_EVENTS: usize = 6;

    /// The firmware event for EXTTS index `idx` on a device.
    pub fn from_gpio(idx: usize) -> Option<u32> {
        (idx < NUM_GPIO_EVENTS).then(|| GPIO_1 + idx as u32)
    }

    /// The per-device EXTTS index for a firmware event.
    pub fn to_gpio(event: u32) -> Option<usize> {
        (GPIO_1..=GPIO_6)
            .contains(&event)
            .then(|| (event - GPIO_1) as usize)
    }
}

/// Location of the CMC message registers.
pub mod regs {
    /// Base of the CMC used to talk to firmware core `fw_core`.
    pub fn cmc_base(cmicx: bool, fw_core: u32) -> u32 {
        match (cmicx, fw_core != 0) {
            (true, true) => 0x10400,
            (true, false) => 0x10300,
            (false, true) => 0x33000,
            (false, false) => 0x32000,
        }
    }

    /// Offset of SCHAN message register `n` (10 through 21).
    pub fn msg(base: u32, n: u32) -> u32 {
        base + 0x34 + 4 * (n - 10)
    }

    /// Endianness and PCI COS, written at init.
    pub const MSG_ENDIAN_COS: u32 = 14;
    /// Host-ready handshake words, 1 at init and 0 at deinit.
    pub const MSG_HOST_READY_0: u32 = 15;
    pub const MSG_HOST_READY_1: u32 = 16;

    /// The five mailbox words in command, arg1 lo, arg1 hi, arg2 lo,
    /// arg2 hi order.
    pub const MAILBOX: [u32; 5] = [21, 20, 19, 18, 17];

    /// Value of MSG14 for a little-endian host using `pci_cos`.
    pub fn endian_cos(pci_cos: u32) -> u32 {
        pci_cos << 16
    }
}

/// A timestamp in the firmware's packed `{u64 sec, u32 nsec}` format.
pub const FW_TSTAMP_LEN: usize = 12;

/// The EXTTS ring: `head: u32, tail: u32, [{id: u32, sec: u64, nsec: u32};
/// 128], overflow: u32`, packed and little-endian.
pub mod extts {
    use super::FW_TSTAMP_LEN;

    pub const NUM_ENTRIES: usize = 128;
    pub const ENTRY_LEN: usize = 4 + FW_TSTAMP_LEN;
    pub const HEAD_OFFSET: usize = 0;
    pub const TAIL_OFFSET: usize = 4;
    pub const ENTRIES_OFFSET: usize = 8;
    pub const OVERFLOW_OFFSET: usize = ENTRIES_OFFSET + NUM_ENTRIES * ENTRY_LEN;
    pub const LOG_LEN: usize = OVERFLOW_OFFSET + 4;

    pub fn entry_offset(idx: usize) -> usize {
        ENTRIES_OFFSET + idx * ENTRY_LEN
    }
}

/// The legacy event log: fourteen `{prev, cur}` timestamp pairs.
pub mod evlog {
    use super::{ts_event::NUM_TS_EVENTS, FW_TSTAMP_LEN};

    pub const RECORD_LEN: usize = 2 * FW_TSTAMP_LEN;
    pub const LOG_LEN: usize = NUM_TS_EVENTS * RECORD_LEN;

    pub fn record_offset(event: usize) -> usize {
        event * RECORD_LEN
    }
}

/// The EDK command block: `{cmd, dw1[2], dw2[2], head, tail}`.
pub mod fw_comm {
    pub const CMD_OFFSET: usize = 0;
    pub const DW1_OFFSET: usize = 4;
    pub const DW2_OFFSET: usize = 12;
    pub const HEAD_OFFSET: usize = 20;
    pub const TAIL_OFFSET: usize = 24;
    pub const LEN: usize = 28;
}
