// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use crate::parse_error;
use crate::PacketResult;

/// A forward-only cursor over the headers the switch prepends to a frame.
/// Multi-byte fields are big-endian.  Every read is bounds-checked and a
/// failed read leaves the cursor where it was.
pub struct ParseBuffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ParseBuffer<'a> {
    pub fn new_from_slice(data: &'a [u8]) -> ParseBuffer<'a> {
        ParseBuffer { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn bytes_left(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take<const N: usize>(&mut self) -> PacketResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.get_bytes(N)?);
        Ok(out)
    }

    pub fn get_bytes(&mut self, len: usize) -> PacketResult<&'a [u8]> {
        if self.bytes_left() < len {
            return Err(parse_error(
                self,
                format!("need {len} bytes, have {}", self.bytes_left()),
            ));
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> PacketResult<u8> {
        self.take::<1>().map(|b| b[0])
    }

    pub fn get_u16(&mut self) -> PacketResult<u16> {
        self.take().map(u16::from_be_bytes)
    }

    pub fn get_u32(&mut self) -> PacketResult<u32> {
        self.take().map(u32::from_be_bytes)
    }

    pub fn skip_bytes(&mut self, len: usize) -> PacketResult<()> {
        self.get_bytes(len).map(|_| ())
    }

    /// The unconsumed tail of the frame.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}
