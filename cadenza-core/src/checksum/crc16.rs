// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// The CRC-16 ANSI generator polynomial, x^16 + x^15 + x^2 + 1, without the leading term.
const POLY: u16 = 0x8005;

const fn make_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;

        while bit < 8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ POLY } else { crc << 1 };
            bit += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

const CRC16_ANSI: [u16; 256] = make_table();

/// `Crc16Ansi` implements the CRC-16 algorithm using the ANSI polynomial (0x8005), processing
/// data most-significant bit first, without any input or output reflection.
///
/// Besides whole bytes, the checksum can absorb any number of bits, which is needed for data
/// that does not end on a byte boundary.
#[derive(Copy, Clone, Debug)]
pub struct Crc16Ansi {
    state: u16,
}

impl Crc16Ansi {
    /// Instantiate a `Crc16Ansi` instance with an initial state.
    pub fn new(state: u16) -> Self {
        Crc16Ansi { state }
    }

    /// Returns the computed CRC.
    pub fn crc(&self) -> u16 {
        self.state
    }

    #[inline(always)]
    pub fn process_byte(&mut self, byte: u8) {
        let index = ((self.state >> 8) as u8 ^ byte) as usize;
        self.state = (self.state << 8) ^ CRC16_ANSI[index];
    }

    pub fn process_buf_bytes(&mut self, buf: &[u8]) {
        for &byte in buf {
            self.process_byte(byte);
        }
    }

    /// Processes the `n_bits` least-significant bits of `bits`, most-significant first.
    pub fn process_bits(&mut self, bits: u32, n_bits: u32) {
        debug_assert!(n_bits <= 32);

        for i in (0..n_bits).rev() {
            let bit = ((bits >> i) & 1) as u16;
            let msb = self.state >> 15;

            self.state <<= 1;

            if msb ^ bit != 0 {
                self.state ^= POLY;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Crc16Ansi;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn verify_crc16_ansi() {
        // CRC-16/UMTS.
        let mut crc = Crc16Ansi::new(0);
        crc.process_buf_bytes(CHECK);
        assert_eq!(crc.crc(), 0xfee8);

        // CRC-16/CMS, the variant used by MPEG audio.
        let mut crc = Crc16Ansi::new(0xffff);
        crc.process_buf_bytes(CHECK);
        assert_eq!(crc.crc(), 0xaee7);
    }

    #[test]
    fn verify_crc16_ansi_bits() {
        let mut by_byte = Crc16Ansi::new(0xffff);
        by_byte.process_buf_bytes(CHECK);

        // The same data in uneven chunks of bits.
        let bits: Vec<bool> =
            CHECK.iter().flat_map(|&b| (0..8).rev().map(move |i| (b >> i) & 1 != 0)).collect();

        let mut by_bits = Crc16Ansi::new(0xffff);

        for chunk in bits.chunks(5) {
            let value = chunk.iter().fold(0u32, |acc, &b| (acc << 1) | u32::from(b));
            by_bits.process_bits(value, chunk.len() as u32);
        }

        assert_eq!(by_bits.crc(), by_byte.crc());
    }
}
