// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The surface the packet driver consumes: everything it needs to request
//! hardware timestamps for outgoing frames and to recover them for
//! incoming ones.

use bytes::BytesMut;
use packet::dnx::DnxRxInfo;
use packet::ptp::Transport;

use crate::AsicResult;

/// The `tx_type` requested by the stack for a port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TxType {
    #[default]
    Off = 0,
    On = 1,
    OneStepSync = 2,
}

impl TxType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(TxType::Off),
            1 => Some(TxType::On),
            2 => Some(TxType::OneStepSync),
            _ => None,
        }
    }
}

/// What `tx_meta_set` produced for a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxMeta {
    /// Start-of-buffer metadata words to OR into the DMA descriptor.
    pub md: Option<[u32; 4]>,
    /// The egress time, when it is already known without asking firmware
    /// (one-step DELAY_REQ).
    pub tstamp: Option<u64>,
}

/// Outcome of inspecting a received frame before it is handed to the
/// stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RxPreProcess {
    /// Sent by the firmware's own port; nothing to strip.
    FromFirmware,
    /// The frame leads with a custom encapsulation of `len` bytes.
    Encap { len: u16 },
    /// The frame carries DNX system headers.
    SystemHeader(DnxRxInfo),
}

/// Commands accepted by the ioctl-style configuration entry point.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::EnumIter,
    strum::FromRepr,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum IoctlCmd {
    HwInit = 0,
    HwDeinit,
    HwTsDisable,
    MtpTsUpdateEnable,
    MtpTsUpdateDisable,
    Version,
    DnxJr2devsSysConfig,
    BsConfigSet,
    BsConfigClear,
    BsStatus,
    BsPhaseOffsetSet,
    GpioConfigSet,
    GpioConfigGet,
    PtpTodOffsetSet,
    PtpTodOffsetGet,
    PtpTodGet,
    NtpTodOffsetSet,
    NtpTodOffsetGet,
    NtpTodGet,
    LeapSecSet,
    LeapSecGet,
}

impl IoctlCmd {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Events raised toward the OS clock interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhcEvent {
    /// An external timestamp captured on EXTTS channel `index`.
    Extts { index: u32, timestamp_ns: u64 },
}

/// The callbacks the packet driver invokes.  Device numbers are the
/// subsystem's dense device indices and ports are the driver's 1-based
/// physical port numbers.
pub trait HwTimestampOps: Send + Sync {
    /// Arrange for TX timestamps on `port`.  A one-step request starts the
    /// periodic PHC refresh instead of touching the port.
    fn hw_tstamp_enable(
        &self,
        dev_no: usize,
        port: u32,
        tx_type: TxType,
    ) -> AsicResult<()>;

    fn hw_tstamp_disable(
        &self,
        dev_no: usize,
        port: u32,
        tx_type: TxType,
    ) -> AsicResult<()>;

    /// Fetch the TX timestamp of `frame`, which was sent on `port`.  For
    /// one-step frames this is the cached PHC time; otherwise the firmware
    /// is polled for a two-step timestamp.
    fn tx_time_get(
        &self,
        dev_no: usize,
        port: u32,
        tx_type: TxType,
        frame: &[u8],
    ) -> AsicResult<u64>;

    /// Prepare `frame` for transmission on `port`.  `hdr_len` is the length
    /// of any device header in front of the Ethernet header.  The frame may
    /// be rewritten in place.
    fn tx_meta_set(
        &self,
        dev_no: usize,
        port: u32,
        tx_type: TxType,
        hdr_len: usize,
        frame: &mut [u8],
    ) -> AsicResult<TxMeta>;

    fn rx_pre_process(
        &self,
        dev_no: usize,
        frame: &[u8],
        src_sys_port: u32,
    ) -> AsicResult<RxPreProcess>;

    /// Recover the RX timestamp of `frame` and strip any encapsulation.
    /// `meta` is the RX DMA descriptor metadata.  Returns `None` when the
    /// frame carries no timestamp.
    fn rx_time_upscale(
        &self,
        dev_no: usize,
        port: u32,
        frame: &mut BytesMut,
        meta: &[u32],
    ) -> AsicResult<Option<u64>>;

    fn phc_index_get(&self, dev_no: usize) -> AsicResult<u32>;

    fn transport_get(&self, frame: &[u8]) -> Transport {
        packet::ptp::transport_get(frame)
    }

    /// The driver's generic configuration entry point.
    fn ioctl(
        &self,
        dev_no: usize,
        cmd: IoctlCmd,
        data: &[i32],
    ) -> AsicResult<Vec<i32>>;
}

#[test]
fn test_ioctl_numbering() {
    assert_eq!(IoctlCmd::from_repr(0), Some(IoctlCmd::HwInit));
    assert_eq!(IoctlCmd::from_repr(5), Some(IoctlCmd::Version));
    assert_eq!(IoctlCmd::from_repr(20), Some(IoctlCmd::LeapSecGet));
    assert_eq!(IoctlCmd::from_repr(21), None);
    assert_eq!(IoctlCmd::BsStatus.name(), "BS_STATUS");
}
