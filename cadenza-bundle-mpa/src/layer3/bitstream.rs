// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cadenza_core::errors::Result;
use cadenza_core::io::ReadBitsLtr;

use crate::common::{FrameHeader, Mode};

use super::{BlockType, FrameData, GranuleChannel};

/// Pairs of bit lengths for scale factors, slen1 and slen2. The first N bands have scale factors
/// of bit length slen1, while the remaining bands have length slen2. The value of the switch
/// point, N, is determined by block type.
///
/// This table is indexed by scalefac_compress.
const SCALE_FACTOR_SLEN: [(u32, u32); 16] = [
    (0, 0),
    (0, 1),
    (0, 2),
    (0, 3),
    (3, 0),
    (1, 1),
    (1, 2),
    (1, 3),
    (2, 1),
    (2, 2),
    (2, 3),
    (3, 1),
    (3, 2),
    (3, 3),
    (4, 2),
    (4, 3),
];

/// The long scale factor bands of each of the 4 scale factor selection groups.
const SCFSI_BANDS: [(usize, usize); 4] = [(0, 6), (6, 11), (11, 16), (16, 21)];

/// Reads the side_info for a single channel in a granule.
fn read_granule_channel_side_info<B: ReadBitsLtr>(
    bs: &mut B,
    channel: &mut GranuleChannel,
) -> Result<()> {
    channel.part2_3_length = bs.read_bits_leq32(12)? as u16;
    // Up-to 288 (576/2) big_values are meaningful. Larger values are rejected when the Huffman
    // data is read.
    channel.big_values = bs.read_bits_leq32(9)? as u16;
    channel.global_gain = bs.read_bits_leq32(8)? as u8;
    channel.scalefac_compress = bs.read_bits_leq32(4)? as u8;
    channel.window_switching = bs.read_bool()?;

    if channel.window_switching {
        // A long block with window switching is forbidden, however the error is reported by the
        // caller once the side information is completely read.
        channel.block_type = match bs.read_bits_leq32(2)? {
            0b00 => BlockType::Long,
            0b01 => BlockType::Start,
            0b10 => BlockType::Short,
            _ => BlockType::End,
        };

        channel.is_mixed = bs.read_bool()?;

        // When window switching is used, there are only two regions, therefore there are only
        // two table selectors. The region boundaries are implicit.
        for i in 0..2 {
            channel.table_select[i] = bs.read_bits_leq32(5)? as u8;
        }
        channel.table_select[2] = 0;

        for i in 0..3 {
            channel.subblock_gain[i] = bs.read_bits_leq32(3)? as u8;
        }
    }
    else {
        // If window switching is not used, the block type is always Long.
        channel.block_type = BlockType::Long;
        channel.is_mixed = false;

        for i in 0..3 {
            channel.table_select[i] = bs.read_bits_leq32(5)? as u8;
        }

        channel.region0_count = bs.read_bits_leq32(4)? as u8;
        channel.region1_count = bs.read_bits_leq32(3)? as u8;
    }

    channel.preflag = bs.read_bool()?;
    channel.scalefac_scale = bs.read_bool()?;
    channel.count1table_select = bs.read_bool()?;

    Ok(())
}

/// Reads the side_info of a MPEG audio frame into `FrameData`.
pub(super) fn read_side_info<B: ReadBitsLtr>(
    bs: &mut B,
    header: &FrameHeader,
    frame_data: &mut FrameData,
) -> Result<()> {
    let n_channels = header.n_channels();

    // First 9 bits is main_data_begin.
    frame_data.main_data_begin = bs.read_bits_leq32(9)? as u16;

    // Next 3 (>1 channel) or 5 (1 channel) bits are private and should be ignored.
    match header.mode {
        Mode::Mono => bs.ignore_bits(5)?,
        _ => bs.ignore_bits(3)?,
    };

    // Next four (or 8, if more than one channel) are the SCFSI bits.
    for scfsi in &mut frame_data.scfsi[..n_channels] {
        for band in scfsi.iter_mut() {
            *band = bs.read_bool()?;
        }
    }

    // Read the side_info for each granule.
    for granule in frame_data.granules.iter_mut() {
        for channel in &mut granule.channels[..n_channels] {
            read_granule_channel_side_info(bs, channel)?;
        }
    }

    Ok(())
}

/// Reads the scale factors for a single channel in a granule, and returns the number of bits
/// read (part2_length).
pub(super) fn read_scale_factors<B: ReadBitsLtr>(
    bs: &mut B,
    gr: usize,
    ch: usize,
    frame_data: &mut FrameData,
) -> Result<u32> {
    let (granule0, granule1) = frame_data.granules.split_at_mut(1);

    // The first granule's long scale factors, for reuse by the second granule.
    let scalefac_l0 = granule0[0].channels[ch].scalefac_l;

    let channel =
        if gr == 0 { &mut granule0[0].channels[ch] } else { &mut granule1[0].channels[ch] };

    let (slen1, slen2) = SCALE_FACTOR_SLEN[usize::from(channel.scalefac_compress)];

    let mut bits_read = 0;

    // Short or Mixed windows...
    if channel.block_type == BlockType::Short {
        // If the block is mixed, the first 8 long scale factor bands are followed by the short
        // scale factor bands 3..12. Otherwise, there are only the short scale factor bands 0..12.
        // Long bands, and short bands 0..6, have scale factors slen1 bits long. Short bands 6..12
        // have scale factors slen2 bits long.
        let short_start = if channel.is_mixed {
            for sfb in 0..8 {
                channel.scalefac_l[sfb] = bs.read_bits_leq32(slen1)? as u8;
            }
            bits_read += 8 * slen1;
            3
        }
        else {
            0
        };

        for sfb in short_start..12 {
            let slen = if sfb < 6 { slen1 } else { slen2 };

            for win in 0..3 {
                channel.scalefac_s[sfb][win] = bs.read_bits_leq32(slen)? as u8;
            }
            bits_read += 3 * slen;
        }
    }
    // Normal (long, start, end) windows...
    else {
        // For normal windows there are 21 scale factor bands. These bands are divivided into four
        // band ranges. Scale factors in the first two band ranges: [0..6], [6..11], have scale
        // factors that are slen1 bits long, while the last two band ranges: [11..16], [16..21]
        // have scale factors that are slen2 bits long.
        for (i, &(start, end)) in SCFSI_BANDS.iter().enumerate() {
            let slen = if i < 2 { slen1 } else { slen2 };

            // If this is the second granule, and the scale factor selection information for this
            // channel indicates that the scale factors should be copied from the first granule,
            // do so.
            if gr > 0 && frame_data.scfsi[ch][i] {
                channel.scalefac_l[start..end].copy_from_slice(&scalefac_l0[start..end]);
            }
            // Otherwise, read the scale factors from the bitstream. A 0 bit read yields a 0
            // scale factor.
            else {
                for sfb in start..end {
                    channel.scalefac_l[sfb] = bs.read_bits_leq32(slen)? as u8;
                }
                bits_read += slen * (end - start) as u32;
            }
        }
    }

    Ok(bits_read)
}

#[cfg(test)]
mod tests {
    use super::*;

    use cadenza_core::io::BitReaderLtr;

    use crate::header::parse_frame_header;

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
    fn verify_read_side_info_mono() {
        let header = parse_frame_header(0xfffb_90c0).unwrap();

        let mut buf = [0u8; 17];
        let mut pos = 0;

        put_bits(&mut buf, &mut pos, 9, 300); // main_data_begin
        put_bits(&mut buf, &mut pos, 5, 0x1f); // private
        put_bits(&mut buf, &mut pos, 4, 0b1010); // scfsi

        // Granule 0: a long block.
        put_bits(&mut buf, &mut pos, 12, 1234); // part2_3_length
        put_bits(&mut buf, &mut pos, 9, 200); // big_values
        put_bits(&mut buf, &mut pos, 8, 150); // global_gain
        put_bits(&mut buf, &mut pos, 4, 11); // scalefac_compress
        put_bits(&mut buf, &mut pos, 1, 0); // window_switching
        put_bits(&mut buf, &mut pos, 15, (7 << 10) | (24 << 5) | 31); // table_select
        put_bits(&mut buf, &mut pos, 4, 9); // region0_count
        put_bits(&mut buf, &mut pos, 3, 5); // region1_count
        put_bits(&mut buf, &mut pos, 3, 0b101); // preflag, scalefac_scale, count1table_select

        // Granule 1: a mixed short block.
        put_bits(&mut buf, &mut pos, 12, 0);
        put_bits(&mut buf, &mut pos, 9, 0);
        put_bits(&mut buf, &mut pos, 8, 0);
        put_bits(&mut buf, &mut pos, 4, 0);
        put_bits(&mut buf, &mut pos, 1, 1); // window_switching
        put_bits(&mut buf, &mut pos, 2, 2); // block_type
        put_bits(&mut buf, &mut pos, 1, 1); // mixed_block_flag
        put_bits(&mut buf, &mut pos, 10, (3 << 5) | 5); // table_select
        put_bits(&mut buf, &mut pos, 9, (1 << 6) | (2 << 3) | 7); // subblock_gain
        put_bits(&mut buf, &mut pos, 3, 0b010);

        assert_eq!(pos, 17 * 8);

        let mut frame_data = FrameData::default();
        let mut bs = BitReaderLtr::new(&buf);
        read_side_info(&mut bs, &header, &mut frame_data).unwrap();

        assert_eq!(frame_data.main_data_begin, 300);
        assert_eq!(frame_data.scfsi[0], [true, false, true, false]);

        let ch = &frame_data.granules[0].channels[0];
        assert_eq!(ch.part2_3_length, 1234);
        assert_eq!(ch.big_values, 200);
        assert_eq!(ch.global_gain, 150);
        assert_eq!(ch.scalefac_compress, 11);
        assert_eq!(ch.block_type, BlockType::Long);
        assert_eq!(ch.table_select, [7, 24, 31]);
        assert_eq!((ch.region0_count, ch.region1_count), (9, 5));
        assert!(ch.preflag && !ch.scalefac_scale && ch.count1table_select);

        let ch = &frame_data.granules[1].channels[0];
        assert!(ch.window_switching);
        assert_eq!(ch.block_type, BlockType::Short);
        assert!(ch.is_mixed);
        assert_eq!(ch.table_select, [3, 5, 0]);
        assert_eq!(ch.subblock_gain, [1, 2, 7]);
        assert!(!ch.preflag && ch.scalefac_scale && !ch.count1table_select);
    }

    #[test]
    fn verify_read_scale_factors_long_scfsi() {
        let mut frame_data = FrameData::default();

        // slen1 = 2, slen2 = 3.
        frame_data.granules[0].channels[0].scalefac_compress = 10;
        frame_data.granules[1].channels[0].scalefac_compress = 10;
        frame_data.scfsi[0] = [false, true, false, true];

        let mut buf = [0u8; 16];
        let mut pos = 0;

        // Granule 0: all 21 bands.
        for sfb in 0..21 {
            let slen = if sfb < 11 { 2 } else { 3 };
            put_bits(&mut buf, &mut pos, slen, (sfb % 4) as u32);
        }
        let gr0_len = pos;

        // Granule 1: only bands 0..6 and 11..16 are transmitted.
        for _ in 0..6 {
            put_bits(&mut buf, &mut pos, 2, 3);
        }
        for _ in 11..16 {
            put_bits(&mut buf, &mut pos, 3, 7);
        }

        let mut bs = BitReaderLtr::new(&buf);

        assert_eq!(read_scale_factors(&mut bs, 0, 0, &mut frame_data).unwrap() as usize, gr0_len);
        assert_eq!(gr0_len, 11 * 2 + 10 * 3);

        assert_eq!(read_scale_factors(&mut bs, 1, 0, &mut frame_data).unwrap(), 6 * 2 + 5 * 3);

        let gr1 = &frame_data.granules[1].channels[0].scalefac_l;

        for sfb in 0..21 {
            let expected = match sfb {
                0..=5 => 3,
                11..=15 => 7,
                _ => (sfb % 4) as u8,
            };
            assert_eq!(gr1[sfb], expected);
        }
    }

    #[test]
    fn verify_read_scale_factors_mixed() {
        let mut frame_data = FrameData::default();

        let channel = &mut frame_data.granules[0].channels[0];
        // slen1 = 4, slen2 = 3.
        channel.scalefac_compress = 15;
        channel.block_type = BlockType::Short;
        channel.is_mixed = true;
        channel.scalefac_s[0] = [9, 9, 9];

        let mut buf = [0u8; 16];
        let mut pos = 0;

        for _ in 0..8 {
            put_bits(&mut buf, &mut pos, 4, 15);
        }
        for sfb in 3..12 {
            for win in 0..3 {
                let slen = if sfb < 6 { 4 } else { 3 };
                put_bits(&mut buf, &mut pos, slen, win as u32 + 1);
            }
        }

        let mut bs = BitReaderLtr::new(&buf);

        assert_eq!(read_scale_factors(&mut bs, 0, 0, &mut frame_data).unwrap(), 17 * 4 + 18 * 3);

        let channel = &frame_data.granules[0].channels[0];
        assert_eq!(channel.scalefac_l[..8], [15; 8]);
        // Short bands below the switch point are not transmitted.
        assert_eq!(channel.scalefac_s[0], [9, 9, 9]);
        assert_eq!(channel.scalefac_s[3], [1, 2, 3]);
        assert_eq!(channel.scalefac_s[11], [1, 2, 3]);
    }
}
