// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;
use std::io;

use super::huffman::{HuffmanTree, Node};

fn end_of_bitstream_error<T>() -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::Other, "unexpected end of bitstream"))
}

fn invalid_code_error<T>() -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::InvalidData, "invalid huffman code"))
}

pub(crate) mod private {
    use std::io;

    pub trait FetchBitsLtr {
        /// Discard any remaining bits in the source and fetch new bits.
        fn fetch_bits(&mut self) -> io::Result<()>;

        /// Get all the bits in the source.
        fn get_bits(&self) -> u64;

        /// Get the number of bits left in the source.
        fn num_bits_left(&self) -> u32;

        /// Consume `num` bits from the source.
        fn consume_bits(&mut self, num: u32);
    }
}

/// `ReadBitsLtr` reads bits from most-significant to least-significant.
pub trait ReadBitsLtr: private::FetchBitsLtr {
    /// Ignores the specified number of bits from the stream or returns an error.
    #[inline(always)]
    fn ignore_bits(&mut self, mut num_bits: u32) -> io::Result<()> {
        // Consume whole bit caches directly.
        while num_bits > self.num_bits_left() {
            num_bits -= self.num_bits_left();
            self.fetch_bits()?;
        }

        if num_bits > 0 {
            // Shift out in two parts to prevent panicing when num_bits == 64.
            self.consume_bits(num_bits - 1);
            self.consume_bits(1);
        }

        Ok(())
    }

    /// Read a single bit as a boolean value or returns an error.
    #[inline(always)]
    fn read_bool(&mut self) -> io::Result<bool> {
        if self.num_bits_left() < 1 {
            self.fetch_bits()?;
        }

        let bit = self.get_bits() & (1 << 63) != 0;

        self.consume_bits(1);
        Ok(bit)
    }

    /// Read a single bit or returns an error.
    #[inline(always)]
    fn read_bit(&mut self) -> io::Result<u32> {
        Ok(u32::from(self.read_bool()?))
    }

    /// Reads up to 32-bits and interprets them as an unsigned integer or returns an error.
    ///
    /// Reading 0 bits always succeeds and returns 0.
    #[inline(always)]
    fn read_bits_leq32(&mut self, mut bit_width: u32) -> io::Result<u32> {
        debug_assert!(bit_width <= u32::BITS);

        // Shift in two 32-bit operations instead of a single 64-bit operation to avoid panicing
        // when bit_width == 0 (and thus shifting right 64-bits). This is preferred to branching
        // the bit_width == 0 case, since reading up-to 32-bits at a time is a hot code-path.
        let mut bits = (self.get_bits() >> u32::BITS) >> (u32::BITS - bit_width);

        while bit_width > self.num_bits_left() {
            bit_width -= self.num_bits_left();

            self.fetch_bits()?;

            // Unlike the first shift, bit_width is always > 0 here so this operation will never
            // shift by > 63 bits.
            bits |= self.get_bits() >> (u64::BITS - bit_width);
        }

        self.consume_bits(bit_width);

        Ok(bits as u32)
    }

    /// Reads a Huffman code by walking `tree` one bit at a time. Returns the decoded value and
    /// the length of the code in bits, or an error.
    ///
    /// Running out of bits mid-code returns the error of the underlying source. A bit sequence
    /// that leads off the tree returns an `InvalidData` error.
    fn read_code(&mut self, tree: &HuffmanTree) -> io::Result<(u16, u32)> {
        let mut node = 0;
        let mut code_len = 0;

        loop {
            let bit = self.read_bool()?;

            code_len += 1;

            match tree.child(node, bit) {
                Node::Branch(next) => node = next,
                Node::Leaf(value) => return Ok((value, code_len)),
                Node::Empty => return invalid_code_error(),
            }
        }
    }
}

/// `BitReaderLtr` reads bits from most-significant to least-significant from any `&[u8]`.
///
/// Stated another way, if N-bits are read from a `BitReaderLtr` then bit 0, the first bit read,
/// is the most-significant bit, and bit N-1, the last bit read, is the least-significant.
pub struct BitReaderLtr<'a> {
    buf: &'a [u8],
    bits: u64,
    n_bits_left: u32,
}

impl<'a> BitReaderLtr<'a> {
    /// Instantiate a new `BitReaderLtr` with the given buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        BitReaderLtr { buf, bits: 0, n_bits_left: 0 }
    }
}

impl<'a> private::FetchBitsLtr for BitReaderLtr<'a> {
    fn fetch_bits(&mut self) -> io::Result<()> {
        let mut buf = [0u8; std::mem::size_of::<u64>()];

        let read_len = min(self.buf.len(), std::mem::size_of::<u64>());

        if read_len == 0 {
            return end_of_bitstream_error();
        }

        buf[..read_len].copy_from_slice(&self.buf[..read_len]);

        self.buf = &self.buf[read_len..];

        self.bits = u64::from_be_bytes(buf);
        self.n_bits_left = (read_len as u32) << 3;

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

impl<'a> ReadBitsLtr for BitReaderLtr<'a> {}

#[cfg(test)]
mod tests {
    use super::{BitReaderLtr, ReadBitsLtr};
    use crate::io::HuffmanTree;

    #[test]
    fn verify_bitreaderltr_ignore_bits() {
        let mut bs = BitReaderLtr::new(&[
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, //
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, //
            0xc0, 0x10, 0x00, 0x01, 0x00, 0x00, 0x00, 0x0a,
        ]);

        assert!(bs.read_bool().unwrap());

        bs.ignore_bits(128).unwrap();

        assert!(bs.read_bool().unwrap());
        assert!(!bs.read_bool().unwrap());
        assert!(!bs.read_bool().unwrap());

        bs.ignore_bits(7).unwrap();

        assert!(bs.read_bool().unwrap());

        bs.ignore_bits(19).unwrap();

        assert!(bs.read_bool().unwrap());

        bs.ignore_bits(28).unwrap();

        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0b1010);

        // Lower limit test.
        let mut bs = BitReaderLtr::new(&[]);

        assert!(bs.ignore_bits(0).is_ok());
        assert!(bs.ignore_bits(1).is_err());

        // Upper limit test.
        let mut bs = BitReaderLtr::new(&[0xff; 24]);

        assert!(bs.ignore_bits(64).is_ok());
        assert!(bs.ignore_bits(64).is_ok());
        assert!(bs.ignore_bits(64).is_ok());
        assert!(bs.read_bool().is_err());
    }

    #[test]
    fn verify_bitreaderltr_read_bit() {
        let mut bs = BitReaderLtr::new(&[0b1010_1010]);

        for i in 0..8 {
            assert_eq!(bs.read_bit().unwrap(), (i + 1) & 1);
        }

        assert!(bs.read_bit().is_err());
    }

    #[test]
    fn verify_bitreaderltr_read_bits_leq32() {
        // General tests.
        let mut bs = BitReaderLtr::new(&[0b1010_0101, 0b0111_1110, 0b1101_0011]);

        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0b0000_0000_0000_1010);
        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0b0000_0000_0000_0101);
        assert_eq!(bs.read_bits_leq32(13).unwrap(), 0b0000_1111_1101_1010);
        assert_eq!(bs.read_bits_leq32(3).unwrap(), 0b0000_0000_0000_0011);

        // Lower limit test.
        let mut bs = BitReaderLtr::new(&[0xff, 0xff, 0xff, 0xff]);

        assert_eq!(bs.read_bits_leq32(0).unwrap(), 0);

        // Upper limit test.
        let mut bs = BitReaderLtr::new(&[0xff, 0xff, 0xff, 0xff, 0x01]);

        assert_eq!(bs.read_bits_leq32(32).unwrap(), u32::MAX);
        assert_eq!(bs.read_bits_leq32(8).unwrap(), 0x01);

        // Cache fetch test.
        let mut bs = BitReaderLtr::new(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);

        assert_eq!(bs.read_bits_leq32(32).unwrap(), u32::MAX);
        assert_eq!(bs.read_bits_leq32(32).unwrap(), u32::MAX);
        assert_eq!(bs.read_bits_leq32(8).unwrap(), 0x01);

        // Test error cases.
        let mut bs = BitReaderLtr::new(&[0xff]);

        assert!(bs.read_bits_leq32(9).is_err());
    }

    #[test]
    fn verify_bitreaderltr_read_code() {
        // A degenerate "chain" code: 1, 01, 001, ..., 0000000001, 0000000000.
        let codes: Vec<u32> = (0..10).map(|_| 1).chain(Some(0)).collect();
        let lens: Vec<u8> = (1..=10).chain(Some(10)).collect();
        let values: Vec<u16> = (0..=10).collect();

        let tree = HuffmanTree::new(&codes, &lens, &values);

        // Codes for 0, 3, 10, 9, 1.
        let mut bs = BitReaderLtr::new(&[0b1000_1000, 0b0000_0000, 0b0000_0000, 0b1010_0000]);

        assert_eq!(bs.read_code(&tree).unwrap(), (0, 1));
        assert_eq!(bs.read_code(&tree).unwrap(), (3, 4));
        assert_eq!(bs.read_code(&tree).unwrap(), (10, 10));
        assert_eq!(bs.read_code(&tree).unwrap(), (9, 10));
        assert_eq!(bs.read_code(&tree).unwrap(), (1, 2));

        // Exhaustion mid-code is an error.
        assert!(bs.read_code(&tree).is_err());
    }
}
