// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;

use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::ReadBitsLtr;

use lazy_static::lazy_static;
use log::trace;

use crate::common::*;

use super::codebooks::{big_values_tree, count1_tree, LINBITS};
use super::{BlockType, GranuleChannel};

lazy_static! {
    /// Lookup table for computing x(i) = s(i)^(4/3) where s(i) is a decoded Huffman sample. The
    /// largest sample is 15 plus a 13-bit linbits extension, 8206.
    ///
    /// Samples above 8191 are outside the range allowed by ISO/IEC 11172-3 and saturate.
    static ref REQUANTIZE_POW43: [f32; 8207] = {
        let mut pow43 = [0f32; 8207];

        for (i, x) in pow43.iter_mut().enumerate() {
            *x = f64::powf(min(i, 8191) as f64, 4.0 / 3.0) as f32;
        }

        pow43
    };

    /// Lookup table for 2^(i/4 - 81.5). The requantization exponent of a scale factor band is
    /// 116 + global_gain less the scale factor contribution, and is bound between 0..372.
    static ref REQUANTIZE_EXP2: [f32; 372] = {
        let mut exp2 = [0f32; 372];

        for (i, x) in exp2.iter_mut().enumerate() {
            *x = f64::exp2((i as f64 - 326.0) / 4.0) as f32;
        }

        exp2
    };
}

/// The pre-emphasis amount added to each long scale factor if preflag is set. From table B.6 in
/// ISO/IEC 11172-3.
const PRE_EMPHASIS: [u8; 21] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 3, 3, 3, 2];

/// The requantization exponent before scale factors are applied.
#[inline(always)]
fn base_exponent(channel: &GranuleChannel) -> i32 {
    326 - 210 + i32::from(channel.global_gain)
}

/// Reads the Huffman coded spectral samples for a granule channel into `buf`. Each sample is
/// returned as sign(s) * |s|^(4/3), the first step of requantization.
///
/// `part2_len` is the number of bits that were consumed by the scale factors of the granule
/// channel.
pub(super) fn read_huffman_samples<B: ReadBitsLtr>(
    bs: &mut B,
    header: &FrameHeader,
    channel: &GranuleChannel,
    part2_len: u32,
    buf: &mut [f32; 576],
) -> Result<()> {
    // The number of bits remaining for the Huffman coded samples (part3). It may become negative
    // if the bitstream is malformed.
    let mut bits = i32::from(channel.part2_3_length) - part2_len as i32;

    // The big_values partition is split into three regions, each with its own Huffman table.
    let mut regions = if channel.window_switching {
        // With window switching, region0 covers the first 36 samples, and region1 the rest of the
        // big_values partition. There is no region2.
        [36, 576, 2 * usize::from(channel.big_values)]
    }
    else {
        let region0 = usize::from(channel.region0_count) + 1;
        let region1 = region0 + usize::from(channel.region1_count) + 1;

        if region1 > 22 {
            return decode_error("mpa: region0_count + region1_count > 20");
        }

        let bands = &SFB_LONG_BANDS[header.sample_rate_idx];

        [bands[region0], bands[region1], 2 * usize::from(channel.big_values)]
    };

    if regions[2] > 576 {
        return decode_error("mpa: big_values too large");
    }

    // The big_values partition ends at region 2, regions 0 and 1 may not overrun it.
    regions[1] = min(regions[1], regions[2]);
    regions[0] = min(regions[0], regions[1]);

    let mut i = 0;

    // Iterate over each region in big_values.
    for (&region_end, &table_select) in regions.iter().zip(&channel.table_select) {
        let tree = big_values_tree(table_select);

        // If the table for a region is empty, fill the region with zeros and move on to the next
        // region. Only table 0 may be selected as the empty table.
        if tree.is_empty() {
            if table_select != 0 {
                return decode_error("mpa: invalid table_select");
            }

            if i < region_end {
                buf[i..region_end].fill(0.0);
                i = region_end;
            }
            continue;
        }

        let linbits = LINBITS[usize::from(table_select)];

        // Otherwise, read the big_values. Each Huffman code decodes to two samples, x and y,
        // each 4 bits long.
        while i < region_end {
            let (value, code_len) = bs.read_code(tree)?;
            bits -= code_len as i32;

            let pair = [usize::from(value >> 4), usize::from(value & 0xf)];

            for (j, mut s) in pair.iter().copied().enumerate() {
                // If the sample is saturated, read linbits more bits and add it to the sample.
                // The table may specify 0 linbits.
                if s == 15 {
                    s += bs.read_bits_leq32(linbits)? as usize;
                    bits -= linbits as i32;
                }

                // Non-zero samples are followed by a sign bit.
                buf[i + j] = if s != 0 {
                    bits -= 1;

                    if bs.read_bool()? {
                        -REQUANTIZE_POW43[s]
                    }
                    else {
                        REQUANTIZE_POW43[s]
                    }
                }
                else {
                    0.0
                };
            }

            i += 2;
        }
    }

    // Select the Huffman table for the count1 partition.
    let tree = count1_tree(channel.count1table_select);

    // Read the count1 partition. The partition stops when the part3 bits are exhausted, or
    // when there is no room left for another quadruple.
    while bits > 0 && i <= 572 {
        let (value, code_len) = bs.read_code(tree)?;
        bits -= code_len as i32;

        // In the count1 partition, each Huffman code decodes to 4 samples: v, w, x, and y. Each
        // sample is 1-bit long. A sample of 1 is followed by a sign bit.
        for j in 0..4 {
            buf[i + j] = if value & (0x8 >> j) != 0 {
                bits -= 1;

                if bs.read_bool()? {
                    -1.0
                }
                else {
                    1.0
                }
            }
            else {
                0.0
            };
        }

        i += 4;
    }

    // The final partition after the count1 partition is the rzero partition. Samples in this
    // partition are all 0.
    buf[i..].fill(0.0);

    if bits < 0 {
        return decode_error("mpa: huffman data overread");
    }

    // Ignore any extra "stuffing" bits. If the stuffing runs past the end of the main data, the
    // next granule channel will report it.
    if bs.ignore_bits(bits as u32).is_err() {
        trace!("mpa: stuffing bits overrun the main data");
    }

    Ok(())
}

/// Requantize the long scale factor bands `sfbs` of `buf`.
fn requantize_long(
    header: &FrameHeader,
    channel: &GranuleChannel,
    sfbs: std::ops::Range<usize>,
    buf: &mut [f32; 576],
) {
    // For long blocks dequantization and scaling is governed by the following equation:
    //
    //                     xr(i) = s(i)^(4/3) * 2^(0.25*A) * 2^(-B)
    // where:
    //       s(i) is the decoded Huffman sample
    //      xr(i) is the dequantized sample
    // and:
    //      A = global_gain[gr] - 210
    //      B = scalefac_multiplier * (scalefacs[gr][ch][sfb] + (preflag[gr] * pretab[sfb]))
    //
    // Both terms are folded into a single exponent of the REQUANTIZE_EXP2 table. Band 21 has no
    // scale factor.
    let bands = &SFB_LONG_BANDS[header.sample_rate_idx];

    let scalefac_shift = if channel.scalefac_scale { 2 } else { 1 };

    for sfb in sfbs {
        let mut exp = base_exponent(channel);

        if sfb < 21 {
            let pre_emphasis = if channel.preflag { PRE_EMPHASIS[sfb] } else { 0 };

            exp -= i32::from(channel.scalefac_l[sfb] + pre_emphasis) << scalefac_shift;
        }

        let scale = REQUANTIZE_EXP2[exp.max(0) as usize];

        for sample in &mut buf[bands[sfb]..bands[sfb + 1]] {
            *sample *= scale;
        }
    }
}

/// Requantize the short scale factor bands `sfbs` of `buf`.
fn requantize_short(
    header: &FrameHeader,
    channel: &GranuleChannel,
    sfbs: std::ops::Range<usize>,
    buf: &mut [f32; 576],
) {
    // For short blocks dequantization and scaling is governed by the following equation:
    //
    //                     xr(i) = s(i)^(4/3) * 2^(0.25*A) * 2^(-B)
    // where:
    //       s(i) is the decoded Huffman sample
    //      xr(i) is the dequantized sample
    // and:
    //      A = global_gain[gr] - 210 - (8 * subblock_gain[gr][win])
    //      B = scalefac_multiplier * scalefacs[gr][ch][sfb][win]
    //
    // The samples of a short scale factor band are stored window after window. Band 12 has no
    // scale factor.
    let bands = &SFB_SHORT_BANDS[header.sample_rate_idx];

    let scalefac_shift = if channel.scalefac_scale { 2 } else { 1 };

    for sfb in sfbs {
        let start = bands[sfb];
        let len = bands[sfb + 1] - start;

        for win in 0..3 {
            let mut exp = base_exponent(channel) - 8 * i32::from(channel.subblock_gain[win]);

            if sfb < 12 {
                exp -= i32::from(channel.scalefac_s[sfb][win]) << scalefac_shift;
            }

            let scale = REQUANTIZE_EXP2[exp.max(0) as usize];

            let win_start = 3 * start + win * len;

            for sample in &mut buf[win_start..win_start + len] {
                *sample *= scale;
            }
        }
    }
}

/// Requantize samples in `buf` regardless of block type.
pub(super) fn requantize(header: &FrameHeader, channel: &GranuleChannel, buf: &mut [f32; 576]) {
    // A mixed block is a combination of a long block and short blocks. The first 8 long scale
    // factor bands belong to the long block, while the short bands from 3 onwards belong to the
    // short blocks.
    let (long, short) = channel.sfb_ranges();

    debug_assert!(channel.block_type == BlockType::Short || short.is_empty());

    requantize_long(header, channel, long, buf);
    requantize_short(header, channel, short, buf);
}
