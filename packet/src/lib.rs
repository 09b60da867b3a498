// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Frame inspection for the PTP timestamping paths.  Nothing here allocates
//! per frame except where a caller explicitly asks for owned bytes.

use thiserror::Error;

pub mod dnx;
pub mod encap;
pub mod pbuf;
pub mod ptp;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Parse error at byte {offset}: {msg}")]
    Parse { offset: usize, msg: String },
    #[error("Frame too short: need {need} bytes, have {have}")]
    Short { need: usize, have: usize },
    #[error("Invalid {0}")]
    Invalid(String),
}

pub type PacketResult<T> = Result<T, PacketError>;

pub fn parse_error(pb: &pbuf::ParseBuffer, msg: impl ToString) -> PacketError {
    PacketError::Parse {
        offset: pb.offset(),
        msg: msg.to_string(),
    }
}

fn field(data: &[u8], offset: usize, len: usize) -> PacketResult<&[u8]> {
    data.get(offset..offset + len).ok_or(PacketError::Short {
        need: offset + len,
        have: data.len(),
    })
}

fn field_mut(
    data: &mut [u8],
    offset: usize,
    len: usize,
) -> PacketResult<&mut [u8]> {
    let have = data.len();
    data.get_mut(offset..offset + len)
        .ok_or(PacketError::Short {
            need: offset + len,
            have,
        })
}

/// Read a big-endian u16 at `offset`.
pub fn be16(data: &[u8], offset: usize) -> PacketResult<u16> {
    let b = field(data, offset, 2)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

/// Read a big-endian u32 at `offset`.
pub fn be32(data: &[u8], offset: usize) -> PacketResult<u32> {
    let b = field(data, offset, 4)?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Overwrite `bytes.len()` bytes of `data` starting at `offset`.
pub fn put_bytes(
    data: &mut [u8],
    offset: usize,
    bytes: &[u8],
) -> PacketResult<()> {
    field_mut(data, offset, bytes.len())?.copy_from_slice(bytes);
    Ok(())
}

pub fn put_be16(data: &mut [u8], offset: usize, val: u16) -> PacketResult<()> {
    put_bytes(data, offset, &val.to_be_bytes())
}

pub fn put_be64(data: &mut [u8], offset: usize, val: u64) -> PacketResult<()> {
    put_bytes(data, offset, &val.to_be_bytes())
}

/// Zero `len` bytes of `data` starting at `offset`.
pub fn zero(data: &mut [u8], offset: usize, len: usize) -> PacketResult<()> {
    field_mut(data, offset, len)?.fill(0);
    Ok(())
}

/// Read a single byte, reporting a short frame rather than panicking.
pub fn byte(data: &[u8], offset: usize) -> PacketResult<u8> {
    Ok(field(data, offset, 1)?[0])
}

/// Mutable access to a single byte.
pub fn byte_mut(data: &mut [u8], offset: usize) -> PacketResult<&mut u8> {
    Ok(&mut field_mut(data, offset, 1)?[0])
}

#[test]
fn test_short_reads() {
    let raw = [0x12u8, 0x34, 0x56];
    assert_eq!(be16(&raw, 1), Ok(0x3456));
    assert_eq!(
        be32(&raw, 0),
        Err(PacketError::Short { need: 4, have: 3 })
    );

    let mut buf = [0u8; 4];
    put_be16(&mut buf, 2, 0xabcd).unwrap();
    assert_eq!(buf, [0, 0, 0xab, 0xcd]);
    assert!(put_be64(&mut buf, 0, 1).is_err());
}
