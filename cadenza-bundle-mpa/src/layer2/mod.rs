// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::{ReadBitsLtr, SourceStream};

use crate::common::*;
use crate::layer12::{dequantize, ungroup, Quant, SCALEFACTORS};

/// One row of a bit allocation table: the width of the allocation field of a sub-band, and the
/// quantization selected by each allocation value. A positive entry is the number of bits per
/// sample, a negative entry is the number of bits per grouped codeword.
#[derive(Debug)]
struct AllocRow {
    nbal: u32,
    quants: [i8; 16],
}

impl AllocRow {
    #[inline(always)]
    fn quant(&self, index: u32) -> Quant {
        match self.quants[index as usize] {
            0 => Quant::None,
            bits if bits < 0 => Quant::Grouped(u32::from(bits.unsigned_abs())),
            bits => Quant::Bits(bits as u32),
        }
    }
}

const ROW_4_3: AllocRow =
    AllocRow { nbal: 4, quants: [0, -5, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16] };

const ROW_4_5: AllocRow =
    AllocRow { nbal: 4, quants: [0, -5, -7, 3, -10, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 16] };

const ROW_3_5: AllocRow =
    AllocRow { nbal: 3, quants: [0, -5, -7, 3, -10, 4, 5, 16, 0, 0, 0, 0, 0, 0, 0, 0] };

const ROW_2_5: AllocRow =
    AllocRow { nbal: 2, quants: [0, -5, -7, 16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0] };

const ROW_4_LOW: AllocRow =
    AllocRow { nbal: 4, quants: [0, -5, -7, -10, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15] };

const ROW_3_LOW: AllocRow =
    AllocRow { nbal: 3, quants: [0, -5, -7, -10, 4, 5, 6, 7, 0, 0, 0, 0, 0, 0, 0, 0] };

/// A bit allocation table, given as runs of consecutive sub-bands sharing a row. Sub-bands after
/// the last run, starting at sblimit, have no allocation field and are always silent.
type AllocTable = &'static [(usize, &'static AllocRow)];

/// ISO/IEC 11172-3 Table 3-B.2a, for high bit-rates at 48 kHz.
const TABLE_A: AllocTable = &[(3, &ROW_4_3), (8, &ROW_4_5), (12, &ROW_3_5), (4, &ROW_2_5)];

/// ISO/IEC 11172-3 Table 3-B.2b, for high bit-rates at 44.1 kHz and 32 kHz.
const TABLE_B: AllocTable = &[(3, &ROW_4_3), (8, &ROW_4_5), (12, &ROW_3_5), (7, &ROW_2_5)];

/// ISO/IEC 11172-3 Table 3-B.2c, for low bit-rates at 44.1 kHz and 48 kHz.
const TABLE_C: AllocTable = &[(2, &ROW_4_LOW), (6, &ROW_3_LOW)];

/// ISO/IEC 11172-3 Table 3-B.2d, for low bit-rates at 32 kHz.
const TABLE_D: AllocTable = &[(2, &ROW_4_LOW), (10, &ROW_3_LOW)];

const A: Option<AllocTable> = Some(TABLE_A);
const B: Option<AllocTable> = Some(TABLE_B);
const C: Option<AllocTable> = Some(TABLE_C);
const D: Option<AllocTable> = Some(TABLE_D);
const X: Option<AllocTable> = None;

/// The bit allocation table of single channel frames, indexed by sampling_frequency and
/// bitrate_index. `None` marks bit-rates that are not allowed in single channel mode.
const MONO_TABLES: [[Option<AllocTable>; 16]; 3] = [
    [B, C, C, A, A, A, B, B, B, B, B, X, X, X, X, X],
    [A, C, C, A, A, A, A, A, A, A, A, X, X, X, X, X],
    [B, D, D, A, A, A, B, B, B, B, B, X, X, X, X, X],
];

/// The bit allocation table of two channel frames, indexed by sampling_frequency and
/// bitrate_index. `None` marks bit-rates that are not allowed in the stereo modes.
const STEREO_TABLES: [[Option<AllocTable>; 16]; 3] = [
    [B, X, X, X, C, X, C, A, A, A, B, B, B, B, B, X],
    [A, X, X, X, C, X, C, A, A, A, A, A, A, A, A, X],
    [B, X, X, X, D, X, D, A, A, A, B, B, B, B, B, X],
];

/// Get the bit allocation row of each sub-band for a frame with the given header.
fn find_alloc_rows(header: &FrameHeader) -> Result<[Option<&'static AllocRow>; 32]> {
    let tables = match header.n_channels() {
        1 => &MONO_TABLES,
        _ => &STEREO_TABLES,
    };

    let table = match tables[header.sample_rate_idx][header.bitrate_idx] {
        Some(table) => table,
        None => return decode_error("mpa: illegal combination of bit-rate and mode"),
    };

    let mut rows = [None; 32];
    let mut sb = 0;

    for &(count, row) in table {
        for entry in &mut rows[sb..sb + count] {
            *entry = Some(row);
        }
        sb += count;
    }

    Ok(rows)
}

/// The maximum length of the protected part of a layer 2 frame: a 4-bit allocation for each
/// sub-band of both channels, followed by a 2-bit SCFSI for each.
const MAX_PROTECTED_LEN: usize = (4 * 64 + 2 * 64) / 8;

/// Layer 2 has no state carried from one frame to the next.
#[derive(Default)]
pub struct Layer2;

impl Layer2 {
    pub fn new() -> Self {
        Layer2
    }
}

impl LayerDecoder for Layer2 {
    fn decode<R: io::Read>(
        &mut self,
        bs: &mut SourceStream<R>,
        header: &FrameHeader,
        crc: Option<FrameCrc>,
        out: &mut [[f32; MAX_SAMPLES_PER_FRAME]; 2],
    ) -> Result<()> {
        let n_channels = header.n_channels();
        let bound = header.bound();

        let rows = find_alloc_rows(header)?;

        // Take a copy of the protected bits before they are consumed.
        let mut protected = [0u8; MAX_PROTECTED_LEN];

        let protected_len = match crc {
            Some(_) => {
                let buf = bs.peek(MAX_PROTECTED_LEN);
                protected[..buf.len()].copy_from_slice(buf);
                buf.len()
            }
            None => 0,
        };

        let mut protected_bits = 0;

        // Read the bit allocations. Intensity coded sub-bands (bound..32) have one allocation
        // shared by both channels.
        let mut alloc = [[Quant::None; 32]; 2];

        for sb in 0..32 {
            let row = match rows[sb] {
                Some(row) => row,
                None => break,
            };

            let n_coded = if sb < bound { n_channels } else { 1 };

            for ch in 0..n_coded {
                alloc[ch][sb] = row.quant(bs.read_bits_leq32(row.nbal)?);
                protected_bits += row.nbal as usize;
            }

            if sb >= bound {
                alloc[1][sb] = alloc[0][sb];
            }
        }

        // Read the scale factor selection information.
        let mut scfsi = [[0u32; 32]; 2];

        for sb in 0..32 {
            for ch in 0..n_channels {
                if alloc[ch][sb].is_allocated() {
                    scfsi[ch][sb] = bs.read_bits_leq32(2)?;
                    protected_bits += 2;
                }
            }
        }

        if let Some(crc) = crc {
            crc.verify(&protected[..protected_len], protected_bits)?;
        }

        // Read the scale factors. Each of the three parts of a frame has its own scale factor, of
        // which SCFSI says which are transmitted:
        //
        // 0 = all three, 1 = the 1st, shared by the 1st and 2nd parts, and the 3rd,
        // 2 = one shared by all, 3 = the 1st, and the 2nd, shared by the 2nd and 3rd parts.
        let mut scalefacs = [[[0f32; 3]; 32]; 2];

        for sb in 0..32 {
            for ch in 0..n_channels {
                if !alloc[ch][sb].is_allocated() {
                    continue;
                }

                let sf0 = bs.read_bits_leq32(6)?;

                let sf1 = match scfsi[ch][sb] {
                    0 | 3 => bs.read_bits_leq32(6)?,
                    _ => sf0,
                };

                let sf2 = match scfsi[ch][sb] {
                    0 | 1 => bs.read_bits_leq32(6)?,
                    _ => sf1,
                };

                scalefacs[ch][sb] = [
                    SCALEFACTORS[sf0 as usize],
                    SCALEFACTORS[sf1 as usize],
                    SCALEFACTORS[sf2 as usize],
                ];
            }
        }

        // Read the samples. There are 12 granules of 3 time slots each. Every 4 granules, the
        // next scale factor is used.
        for gr in 0..12 {
            let part = gr / 4;

            for sb in 0..32 {
                let n_coded = if sb < bound { n_channels } else { 1 };

                for ch in 0..n_coded {
                    let quant = alloc[ch][sb];

                    // Intensity coded sub-bands share samples, but each channel has its own scale
                    // factors.
                    let channels = if sb < bound { ch..ch + 1 } else { 0..n_channels };

                    let raw = match quant {
                        Quant::None => {
                            for out_ch in channels {
                                for s in 0..3 {
                                    out[out_ch][32 * (3 * gr + s) + sb] = 0.0;
                                }
                            }
                            continue;
                        }
                        Quant::Bits(bits) => [
                            bs.read_bits_leq32(bits)?,
                            bs.read_bits_leq32(bits)?,
                            bs.read_bits_leq32(bits)?,
                        ],
                        Quant::Grouped(bits) => ungroup(bs.read_bits_leq32(bits)?, quant.levels()),
                    };

                    for out_ch in channels {
                        let scalefactor = scalefacs[out_ch][sb][part];

                        for (s, &raw) in raw.iter().enumerate() {
                            out[out_ch][32 * (3 * gr + s) + sb] =
                                dequantize(quant, raw, scalefactor);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::header::parse_frame_header;

    fn sblimit(rows: &[Option<&'static AllocRow>; 32]) -> usize {
        rows.iter().take_while(|row| row.is_some()).count()
    }

    #[test]
    fn verify_alloc_tables() {
        for table in [TABLE_A, TABLE_B, TABLE_C, TABLE_D] {
            assert!(table.iter().map(|&(count, _)| count).sum::<usize>() <= 32);
        }
    }

    #[test]
    fn verify_alloc_table_selection() {
        // Stereo, 44.1 kHz, 128 kbps: Table A.
        let header = parse_frame_header(0xfffd_8000).unwrap();
        assert_eq!(sblimit(&find_alloc_rows(&header).unwrap()), 27);

        // Stereo, 44.1 kHz, 192 kbps: Table B.
        let header = parse_frame_header(0xfffd_a000).unwrap();
        assert_eq!(sblimit(&find_alloc_rows(&header).unwrap()), 30);

        // Stereo, 48 kHz, 128 kbps: Table A.
        let header = parse_frame_header(0xfffd_8400).unwrap();
        assert_eq!(sblimit(&find_alloc_rows(&header).unwrap()), 27);

        // Stereo, 48 kHz, 64 kbps: Table C.
        let header = parse_frame_header(0xfffd_4400).unwrap();
        let rows = find_alloc_rows(&header).unwrap();
        assert_eq!(sblimit(&rows), 8);
        assert_eq!(rows[0].map(|row| row.nbal), Some(4));
        assert_eq!(rows[2].map(|row| row.nbal), Some(3));

        // Stereo, 32 kHz, 80 kbps: Table D.
        let header = parse_frame_header(0xfffd_6800).unwrap();
        assert_eq!(sblimit(&find_alloc_rows(&header).unwrap()), 12);

        // Stereo, 32 kbps is not allowed.
        let header = parse_frame_header(0xfffd_1000).unwrap();
        assert!(find_alloc_rows(&header).unwrap_err().is_malformed());

        // Mono, 44.1 kHz, 32 kbps: Table C.
        let header = parse_frame_header(0xfffd_10c0).unwrap();
        assert_eq!(sblimit(&find_alloc_rows(&header).unwrap()), 8);

        // Mono, 48 kHz, 56 kbps: Table A.
        let header = parse_frame_header(0xfffd_34c0).unwrap();
        assert_eq!(sblimit(&find_alloc_rows(&header).unwrap()), 27);

        // Mono, 384 kbps is not allowed.
        let header = parse_frame_header(0xfffd_e0c0).unwrap();
        assert!(find_alloc_rows(&header).is_err());

        // Free format.
        let header = parse_frame_header(0xfffd_0800).unwrap();
        assert_eq!(sblimit(&find_alloc_rows(&header).unwrap()), 30);
    }

    #[test]
    fn verify_alloc_row_quant() {
        assert_eq!(ROW_4_5.quant(0), Quant::None);
        assert_eq!(ROW_4_5.quant(1), Quant::Grouped(5));
        assert_eq!(ROW_4_5.quant(2), Quant::Grouped(7));
        assert_eq!(ROW_4_5.quant(3), Quant::Bits(3));
        assert_eq!(ROW_4_5.quant(4), Quant::Grouped(10));
        assert_eq!(ROW_4_5.quant(15), Quant::Bits(16));
        assert_eq!(ROW_2_5.quant(3), Quant::Bits(16));
    }

    #[test]
    fn verify_decode_silence() {
        // Layer 2, no CRC, 128 kbps, 48 kHz, stereo. All bit allocations are 0.
        let header = parse_frame_header(0xfffd_8400).unwrap();

        let data = vec![0u8; 64];

        let mut bs = SourceStream::new(&data[..]);
        let mut out = [[1.0; MAX_SAMPLES_PER_FRAME]; 2];

        Layer2::new().decode(&mut bs, &header, None, &mut out).unwrap();

        assert!(out.iter().all(|ch| ch.iter().all(|&s| s == 0.0)));
    }

    /// Write `value` as `width` bits at bit position `pos` of `buf`.
    fn put_bits(buf: &mut [u8], pos: &mut usize, width: usize, value: u32) {
        for i in (0..width).rev() {
            if (value >> i) & 1 != 0 {
                buf[*pos / 8] |= 0x80 >> (*pos % 8);
            }
            *pos += 1;
        }
    }

    #[test]
    fn verify_decode_two_sub_bands() {
        // Layer 2, no CRC, 128 kbps, 48 kHz, mono.
        let header = parse_frame_header(0xfffd_84c0).unwrap();
        let rows = find_alloc_rows(&header).unwrap();

        assert_eq!(rows[0].map(|row| row.quant(2)), Some(Quant::Bits(3)));
        assert_eq!(rows[1].map(|row| row.quant(1)), Some(Quant::Grouped(5)));

        let mut data = vec![0u8; 256];
        let mut pos = 0;

        // Sub-band 0 has 3 bits per sample, sub-band 1 has 3 level grouped samples. The rest are
        // silent.
        for (sb, row) in rows.iter().enumerate() {
            if let Some(row) = row {
                let alloc = match sb {
                    0 => 2,
                    1 => 1,
                    _ => 0,
                };
                put_bits(&mut data, &mut pos, row.nbal as usize, alloc);
            }
        }

        // Sub-band 0 has one scale factor for the whole frame, sub-band 1 has one per part.
        put_bits(&mut data, &mut pos, 2, 2);
        put_bits(&mut data, &mut pos, 2, 0);

        put_bits(&mut data, &mut pos, 6, 3);
        put_bits(&mut data, &mut pos, 6, 3);
        put_bits(&mut data, &mut pos, 6, 6);
        put_bits(&mut data, &mut pos, 6, 9);

        let raw = |gr: usize, s: usize| ((gr + s) % 7) as u32;
        let code = |gr: usize| (5 * gr % 27) as u32;

        for gr in 0..12 {
            for s in 0..3 {
                put_bits(&mut data, &mut pos, 3, raw(gr, s));
            }
            put_bits(&mut data, &mut pos, 5, code(gr));
        }

        let mut bs = SourceStream::new(&data[..]);
        let mut out = [[1.0; MAX_SAMPLES_PER_FRAME]; 2];

        Layer2::new().decode(&mut bs, &header, None, &mut out).unwrap();

        let grouped = [-2.0 / 3.0, 0.0, 2.0 / 3.0];
        let part_scale = [1.0, 0.5, 0.25];

        for gr in 0..12 {
            let digits = [code(gr) % 3, code(gr) / 3 % 3, code(gr) / 9];

            for s in 0..3 {
                let slot = &out[0][32 * (3 * gr + s)..32 * (3 * gr + s + 1)];

                // C = 8/7, D = 1/4 for 7 levels.
                let expected = 8.0 / 7.0 * ((raw(gr, s) as f32 - 4.0) / 4.0 + 0.25);
                assert!((slot[0] - expected).abs() < 1e-6, "gr = {}, s = {}", gr, s);

                let expected = grouped[digits[s] as usize] * part_scale[gr / 4];
                assert!((slot[1] - expected).abs() < 1e-6, "gr = {}, s = {}", gr, s);

                assert!(slot[2..].iter().all(|&x| x == 0.0));
            }
        }
    }
}
