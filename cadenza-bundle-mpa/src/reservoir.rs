// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use cadenza_core::errors::{decode_error, Error, Result};
use cadenza_core::io::{ReadBytes, SourceStream};

use log::debug;

/// The capacity of the bit reservoir. Before decoding a frame, the reservoir must hold the main
/// data from the byte pointed to by `main_data_begin` up-to the end of the frame. Therefore, it
/// must be as large as the largest layer 3 frame, less the header and the shortest side
/// information, plus the largest possible value of `main_data_begin`.
pub const RESERVOIR_LEN: usize = 1441 - 4 - 17 + 511;

/// `BitReservoir` buffers the main data of layer 3 frames. The main data of a frame may begin in
/// the audio data of any of the preceeding frames.
pub struct BitReservoir {
    buf: Box<[u8]>,
    limit: usize,
}

impl BitReservoir {
    pub fn new() -> Self {
        BitReservoir { buf: vec![0; RESERVOIR_LEN].into_boxed_slice(), limit: 0 }
    }

    /// Keep only the last `len` bytes of the reservoir, moving them to the start of the buffer.
    /// If the reservoir holds less than `len` bytes, it is left unchanged and an error is
    /// returned.
    pub fn set_size(&mut self, len: usize) -> Result<()> {
        if len > self.limit {
            return decode_error("mpa: not enough main data");
        }

        self.buf.copy_within(self.limit - len..self.limit, 0);
        self.limit = len;

        Ok(())
    }

    /// Move the next `len` bytes of the stream into the reservoir. Bytes that do not fit in the
    /// reservoir are consumed and discarded.
    pub fn load<R: io::Read>(&mut self, bs: &mut SourceStream<R>, len: usize) -> Result<()> {
        let end = self.limit + len;

        if end > self.buf.len() {
            let excess = end - self.buf.len();

            self.load_exact(bs, self.buf.len())?;
            bs.ignore_bytes(excess as u64)?;

            return decode_error("mpa: reservoir overflow");
        }

        self.load_exact(bs, end)
    }

    /// Fill the reservoir up-to `end`, keeping any partially read data on error.
    fn load_exact<R: io::Read>(&mut self, bs: &mut SourceStream<R>, end: usize) -> Result<()> {
        while self.limit < end {
            match bs.read_buf(&mut self.buf[self.limit..end]) {
                Ok(n) => self.limit += n,
                Err(err) => return Err(Error::from(err)),
            }
        }
        Ok(())
    }

    /// Move bytes from the stream into the reservoir until the next byte-aligned layer 3 sync
    /// word, or the end of the stream. Used for free format frames, the length of which is not
    /// known in advance.
    pub fn load_until_syncword<R: io::Read>(&mut self, bs: &mut SourceStream<R>) -> Result<()> {
        let mut res = Ok(());
        let mut overflow = false;

        while !bs.syncword3() {
            let byte = match bs.read_byte() {
                Ok(byte) => byte,
                Err(err) => {
                    res = Err(Error::from(err));
                    break;
                }
            };

            // Keep reading after the buffer is full so that the stream remains in sync, and the
            // reservoir holds the most recent data. The buffer is used as a ring until then.
            if self.limit == self.buf.len() {
                self.limit = 0;
                overflow = true;
            }

            self.buf[self.limit] = byte;
            self.limit += 1;
        }

        if overflow {
            debug!("mpa: free format frame overflowed the bit reservoir");

            self.buf.rotate_left(self.limit);
            self.limit = self.buf.len();

            if res.is_ok() {
                return decode_error("mpa: reservoir overflow");
            }
        }

        res
    }

    /// Returns the buffered main data.
    pub fn main_data(&self) -> &[u8] {
        &self.buf[..self.limit]
    }

    /// Empty the reservoir.
    pub fn clear(&mut self) {
        self.limit = 0;
    }
}

impl Default for BitReservoir {
    fn default() -> Self {
        BitReservoir::new()
    }
}
