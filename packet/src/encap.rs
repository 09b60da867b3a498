// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The "BCMC" custom encapsulation some devices prepend to received PTP
//! frames to deliver the ingress timestamp.
//!
//! ```text
//! "BCMC" ver:u8 opc:u8 total_len:u16 seq_id:u32
//! TLV*  where TLV = { type:u8 reserved:u8 length:u16 value:[u8; length - 4] }
//! ```
//!
//! All multi-byte header fields are big-endian.  The RX time TLV carries two
//! 32-bit words, low word first.

use bytes::{Buf, BufMut, BytesMut};

use crate::parse_error;
use crate::pbuf::ParseBuffer;
use crate::PacketResult;

pub const SIGNATURE: &[u8; 4] = b"BCMC";
pub const VERSION: u8 = 1;
pub const OPCODE_PTP_RX: u8 = 1;
pub const TLV_PTP_RX_TIME: u8 = 1;

/// Signature, version, opcode, length, and sequence id.
pub const HEADER_LEN: usize = 12;
/// Type, reserved byte, and length of each TLV.
pub const TLV_HEADER_LEN: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CustomEncap {
    /// Length of the whole encapsulation, header and TLVs.
    pub total_len: u16,
    pub seq_id: u32,
    /// The ingress PTP time, if an RX time TLV was present.
    pub rx_time: Option<u64>,
}

fn parse_fixed(pb: &mut ParseBuffer) -> PacketResult<u16> {
    let sig = pb.get_bytes(SIGNATURE.len())?;
    if sig != &SIGNATURE[..] {
        return Err(parse_error(pb, "bad custom encap signature"));
    }
    let ver = pb.get_u8()?;
    if ver != VERSION {
        return Err(parse_error(pb, format!("bad custom encap version {ver}")));
    }
    let opc = pb.get_u8()?;
    if opc != OPCODE_PTP_RX {
        return Err(parse_error(pb, format!("bad custom encap opcode {opc}")));
    }
    pb.get_u16()
}

/// Validate the fixed header and return the declared encapsulation length,
/// without walking the TLVs.
pub fn encap_len(data: &[u8]) -> PacketResult<u16> {
    let mut pb = ParseBuffer::new_from_slice(data);
    parse_fixed(&mut pb)
}

/// Parse the full encapsulation including its TLVs.
pub fn parse(data: &[u8]) -> PacketResult<CustomEncap> {
    let mut pb = ParseBuffer::new_from_slice(data);
    let total_len = parse_fixed(&mut pb)?;
    let seq_id = pb.get_u32()?;
    let mut rx_time = None;

    let mut left = (total_len as usize).saturating_sub(HEADER_LEN);
    while left > 0 {
        let tlv_type = pb.get_u8()?;
        let reserved = pb.get_u8()?;
        let tlv_len = pb.get_u16()? as usize;
        if tlv_len < TLV_HEADER_LEN {
            return Err(parse_error(&pb, format!("runt tlv of length {tlv_len}")));
        }
        left = left.saturating_sub(tlv_len);
        let value_len = tlv_len - TLV_HEADER_LEN;

        if reserved != 0 || tlv_type != TLV_PTP_RX_TIME || value_len < 8 {
            pb.skip_bytes(value_len)?;
            continue;
        }

        let lo = pb.get_u32()? as u64;
        let hi = pb.get_u32()? as u64;
        rx_time = Some((hi << 32) | lo);
        pb.skip_bytes(value_len - 8)?;
    }

    Ok(CustomEncap {
        total_len,
        seq_id,
        rx_time,
    })
}

/// If `frame` starts with a well-formed encapsulation, remove it and return
/// what it carried.  Otherwise leave the frame untouched.
pub fn strip(frame: &mut BytesMut) -> Option<CustomEncap> {
    let encap = parse(&frame[..]).ok()?;
    let len = encap.total_len as usize;
    if len == 0 || len > frame.len() {
        return None;
    }
    frame.advance(len);
    Some(encap)
}

/// Prepend an encapsulation carrying `rx_time` to `payload`.
pub fn build(seq_id: u32, rx_time: u64, payload: &[u8]) -> BytesMut {
    const TLV_LEN: u16 = (TLV_HEADER_LEN + 8) as u16;
    let total_len = HEADER_LEN as u16 + TLV_LEN;

    let mut v = BytesMut::with_capacity(total_len as usize + payload.len());
    v.put_slice(SIGNATURE);
    v.put_u8(VERSION);
    v.put_u8(OPCODE_PTP_RX);
    v.put_u16(total_len);
    v.put_u32(seq_id);
    v.put_u8(TLV_PTP_RX_TIME);
    v.put_u8(0);
    v.put_u16(TLV_LEN);
    v.put_u32(rx_time as u32);
    v.put_u32((rx_time >> 32) as u32);
    v.put_slice(payload);
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const ENCAP: [u8; 24] = hex!(
        "42434d43 01 01 0018 00000001"
        "01 00 000c abcdef00 00000000"
    );

    #[test]
    fn test_parse_rx_time() {
        let e = parse(&ENCAP).unwrap();
        assert_eq!(e.total_len, 24);
        assert_eq!(e.seq_id, 1);
        assert_eq!(e.rx_time, Some(0xabcd_ef00));
    }

    #[test]
    fn test_strip() {
        let mut frame = BytesMut::from(&ENCAP[..]);
        frame.put_slice(&[0xaa; 30]);
        let before = frame.len();

        let e = strip(&mut frame).unwrap();
        assert_eq!(e.rx_time, Some(0xabcd_ef00));
        assert_eq!(frame.len(), before - ENCAP.len());
        assert_eq!(frame[0], 0xaa);
    }

    #[test]
    fn test_strip_without_encap_is_noop() {
        let mut frame = BytesMut::from(&[0x01u8; 40][..]);
        assert!(strip(&mut frame).is_none());
        assert_eq!(frame.len(), 40);
        assert!(strip(&mut frame).is_none());
        assert_eq!(frame.len(), 40);
    }

    #[test]
    fn test_bad_version() {
        let mut raw = ENCAP;
        raw[4] = 2;
        assert!(parse(&raw).is_err());
        let mut frame = BytesMut::from(&raw[..]);
        assert!(strip(&mut frame).is_none());
        assert_eq!(frame.len(), ENCAP.len());
    }

    #[test]
    fn test_reserved_tlv_skipped() {
        // A reserved TLV followed by the RX time.
        let raw = hex!(
            "42434d43 01 01 0020 00000007"
            "02 01 0008 11223344"
            "01 00 000c 00000010 00000002"
        );
        let e = parse(&raw).unwrap();
        assert_eq!(e.rx_time, Some(0x0000_0002_0000_0010));
    }

    #[test]
    fn test_runt_tlv() {
        let raw = hex!(
            "42434d43 01 01 0010 00000003"
            "01 00 0002"
        );
        match parse(&raw) {
            Err(crate::PacketError::Parse { offset, msg }) => {
                assert_eq!(offset, 16);
                assert_eq!(msg, "runt tlv of length 2");
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
        let mut frame = BytesMut::from(&raw[..]);
        assert!(strip(&mut frame).is_none());
        assert_eq!(frame.len(), raw.len());
    }

    #[test]
    fn test_build_round_trip() {
        let payload = [0x55u8; 60];
        let mut frame = build(9, 0x1234_5678_9abc_def0, &payload);
        let e = strip(&mut frame).unwrap();
        assert_eq!(e.rx_time, Some(0x1234_5678_9abc_def0));
        assert_eq!(e.seq_id, 9);
        assert_eq!(&frame[..], &payload[..]);
    }
}
