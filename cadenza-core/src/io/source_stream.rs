// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;
use std::io;
use std::mem;

use log::debug;

use super::bit::private::FetchBitsLtr;
use super::{ReadBitsLtr, ReadBytes};
use crate::errors::no_progress_io_error;

/// The size of the read-ahead buffer. It holds more than two frames of the largest size.
const BUFFER_LEN: usize = 4096;

/// The number of consecutive reads that may make no progress before a refill gives up.
const MAX_EMPTY_READS: usize = 8;

fn end_of_stream_error<T>() -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream"))
}

/// `SourceStream` is a buffered bit- and byte-reader over any source implementing
/// [`std::io::Read`].
///
/// Bits are read most-significant first through [`ReadBitsLtr`]. Byte reads through
/// [`ReadBytes`] always start at the next byte boundary, discarding the rest of a partially read
/// byte. In addition, `SourceStream` can peek ahead of the current byte without consuming
/// anything, which is what frame synchronization relies on.
///
/// A source read returning `Ok(0)` marks the end of the stream. Reads failing with
/// `ErrorKind::Interrupted` or `ErrorKind::WouldBlock` are retried a bounded number of times.
pub struct SourceStream<R: io::Read> {
    inner: R,
    buf: Box<[u8]>,
    head: usize,
    limit: usize,
    pos: u64,
    bits: u64,
    n_bits_left: u32,
}

impl<R: io::Read> SourceStream<R> {
    /// Instantiate a new `SourceStream` reading from `inner`.
    pub fn new(inner: R) -> Self {
        SourceStream {
            inner,
            buf: vec![0; BUFFER_LEN].into_boxed_slice(),
            head: 0,
            limit: 0,
            pos: 0,
            bits: 0,
            n_bits_left: 0,
        }
    }

    /// Gets a reference to the underlying source.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Gets a mutable reference to the underlying source. Reading from it directly will desync
    /// the buffered data.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Replaces the underlying source, discarding all buffered data, and returns the old source.
    pub fn replace_inner(&mut self, inner: R) -> R {
        self.head = 0;
        self.limit = 0;
        self.pos = 0;
        self.discard_bits();
        mem::replace(&mut self.inner, inner)
    }

    /// Unwraps this `SourceStream`, returning the underlying source. Buffered data is lost.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Returns the 32-bit big-endian word starting `offset` bytes after the next byte boundary,
    /// without consuming it. Returns `None` if the source ends before then, or if the word lies
    /// beyond the reach of the read-ahead buffer.
    pub fn lookahead(&mut self, offset: usize) -> Option<u32> {
        let end = offset.checked_add(4)?;

        if !self.fill(end) {
            return None;
        }

        let at = self.head + offset;
        let word = [self.buf[at], self.buf[at + 1], self.buf[at + 2], self.buf[at + 3]];

        Some(u32::from_be_bytes(word))
    }

    /// Returns up to `len` bytes starting at the next byte boundary, without consuming them. Fewer
    /// bytes are returned if the source ends first.
    pub fn peek(&mut self, len: usize) -> &[u8] {
        let len = min(len, self.buf.len());
        self.fill(len);

        let end = min(self.head + len, self.limit);
        &self.buf[self.head..end]
    }

    /// Returns true if a layer 3 sync word (`1111_1111_1111_101x`) begins at the next byte
    /// boundary.
    pub fn syncword3(&mut self) -> bool {
        if !self.fill(2) {
            return false;
        }

        self.buf[self.head] == 0xff && self.buf[self.head + 1] & 0xfe == 0xfa
    }

    /// Try to make at least `len` bytes available after `head`. Errors are ignored.
    fn fill(&mut self, len: usize) -> bool {
        if len > self.buf.len() {
            return false;
        }

        while self.limit - self.head < len {
            if self.refill().is_err() {
                break;
            }
        }

        self.limit - self.head >= len
    }

    /// Moves the unread data to the front of the buffer, then reads more data after it. A full
    /// buffer is not an error.
    fn refill(&mut self) -> io::Result<()> {
        if self.head > 0 {
            self.buf.copy_within(self.head..self.limit, 0);
            self.limit -= self.head;
            self.head = 0;
        }

        if self.limit == self.buf.len() {
            return Ok(());
        }

        for _ in 0..MAX_EMPTY_READS {
            match self.inner.read(&mut self.buf[self.limit..]) {
                Ok(0) => return end_of_stream_error(),
                Ok(n) => {
                    self.limit += n;
                    return Ok(());
                }
                Err(ref err)
                    if err.kind() == io::ErrorKind::Interrupted
                        || err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err),
            }
        }

        debug!("source made no progress after {} reads", MAX_EMPTY_READS);

        Err(no_progress_io_error())
    }

    /// Reads the next whole byte, ignoring the bit cache.
    #[inline(always)]
    fn next_byte(&mut self) -> io::Result<u8> {
        if self.head == self.limit {
            self.refill()?;
        }

        let byte = self.buf[self.head];
        self.head += 1;
        self.pos += 1;

        Ok(byte)
    }

    #[inline(always)]
    fn discard_bits(&mut self) {
        self.bits = 0;
        self.n_bits_left = 0;
    }
}

impl<R: io::Read> FetchBitsLtr for SourceStream<R> {
    #[inline(always)]
    fn fetch_bits(&mut self) -> io::Result<()> {
        self.bits = u64::from(self.next_byte()?) << 56;
        self.n_bits_left = u8::BITS;
        Ok(())
    }

    #[inline(always)]
    fn get_bits(&self) -> u64 {
        self.bits
    }

    #[inline(always)]
    fn num_bits_left(&self) -> u32 {
        self.n_bits_left
    }

    #[inline(always)]
    fn consume_bits(&mut self, num: u32) {
        self.n_bits_left -= num;
        self.bits = self.bits.checked_shl(num).unwrap_or(0);
    }
}

impl<R: io::Read> ReadBitsLtr for SourceStream<R> {}

impl<R: io::Read> ReadBytes for SourceStream<R> {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        self.discard_bits();
        self.next_byte()
    }

    #[inline(always)]
    fn read_double_bytes(&mut self) -> io::Result<[u8; 2]> {
        let mut bytes = [0; 2];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_buf(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.discard_bits();

        let mut read = 0;

        while read < buf.len() {
            if self.head == self.limit {
                if let Err(err) = self.refill() {
                    // Report the error on the next call if some progress was made.
                    if read > 0 {
                        break;
                    }
                    return Err(err);
                }
            }

            let len = min(buf.len() - read, self.limit - self.head);

            buf[read..read + len].copy_from_slice(&self.buf[self.head..self.head + len]);

            self.head += len;
            self.pos += len as u64;
            read += len;
        }

        Ok(read)
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.discard_bits();

        let mut read = 0;

        while read < buf.len() {
            read += self.read_buf(&mut buf[read..])?;
        }

        Ok(())
    }

    fn ignore_bytes(&mut self, mut count: u64) -> io::Result<()> {
        self.discard_bits();

        while count > 0 {
            if self.head == self.limit {
                self.refill()?;
            }

            let len = min(count, (self.limit - self.head) as u64) as usize;

            self.head += len;
            self.pos += len as u64;
            count -= len as u64;
        }

        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos
    }
}
