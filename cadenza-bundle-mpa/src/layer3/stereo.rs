// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;
use std::ops::Range;
use std::{f32, f64};

use lazy_static::lazy_static;

use crate::common::{FrameHeader, SFB_LONG_BANDS, SFB_SHORT_BANDS};

use super::Granule;

/// The invalid intensity position. Bands with this position are mid-side coded if mid-side
/// stereo is enabled, and left as-is otherwise.
const INTENSITY_INV_POS: u8 = 7;

lazy_static! {
    /// (Left, right) channel coeffcients for decoding intensity stereo.
    ///
    /// These coefficients are derived from section 2.4.3.4.9.3 of ISO/IEC 11172-3.
    ///
    /// As per the specification, for a given intensity position, is_pos (0 <= is_pos < 7), a ratio,
    /// is_ratio, is calculated as follows:
    ///
    /// ```text
    /// is_ratio = tan(is_pos * PI/12)
    /// ```
    ///
    /// Then, the channel coefficients, k_l and k_r, are calculated as follows:
    ///
    /// ```text
    /// k_l = is_ratio / (1 + is_ratio)
    /// k_r =        1 / (1 + is_ratio)
    /// ```
    ///
    /// This table is indexed by is_pos. Note that is_pos == 7 is invalid and is NOT included in the
    /// table.
    static ref INTENSITY_STEREO_RATIOS: [(f32, f32); 7] = {
        const PI_12: f64 = f64::consts::PI / 12.0;

        let mut ratios = [(0.0, 0.0); 7];

        for (is_pos, ratio) in ratios.iter_mut().enumerate() {
            let is_ratio = (PI_12 * is_pos as f64).tan();
            *ratio = (
                (is_ratio / (1.0 + is_ratio)) as f32,
                (1.0 / (1.0 + is_ratio)) as f32
            );
        }

        // tan(PI/2) is infinite.
        ratios[6] = (1.0, 0.0);

        ratios
    };
}

/// Decorrelates mid and side channels into left and right channels.
///
/// In mid-side (MS) stereo, the left and right channels are encoded as average (mid) and
/// difference (side) components.
///
/// As per ISO/IEC 11172-3, to reconstruct the left and right channels, the following calculation
/// is performed:
///
/// ```text
///      l[i] = (m[i] + s[i]) / sqrt(2)
///      r[i] = (m[i] - s[i]) / sqrt(2)
/// ```
/// where:
///      l[i], and r[i] are the left and right channels, respectively.
///      m[i], and s[i] are the mid and side channels, respectively.
///
/// In the bitstream, m[i] is transmitted in channel 0, while s[i] in channel 1. After decoding,
/// the left channel replaces m[i] in channel 0, and the right channel replaces s[i] in channel
/// 1.
fn process_mid_side(mid: &mut [f32], side: &mut [f32]) {
    debug_assert!(mid.len() == side.len());

    for (m, s) in mid.iter_mut().zip(side) {
        let left = (*m + *s) * f32::consts::FRAC_1_SQRT_2;
        let right = (*m - *s) * f32::consts::FRAC_1_SQRT_2;
        *m = left;
        *s = right;
    }
}

/// Decodes channel 0 of the intensity stereo coded signal into left and right channels.
///
/// As per ISO/IEC 11172-3, the following calculation may be performed to decode the intensity
/// stereo coded signal into left and right channels.
///
/// ```text
///      l[i] = ch0[i] * k_l
///      r[i] = ch0[i] * k_r
/// ```
///
/// where:
///      l[i], and r[i] are the left and right channels, respectively.
///      ch0[i] is the intensity stereo coded signal found in channel 0.
///      k_l, and k_r are the left and right channel ratios, respectively.
///
/// The band falls back to mid-side decoding if the intensity position is invalid.
fn process_intensity(intensity_pos: u8, mid_side: bool, ch0: &mut [f32], ch1: &mut [f32]) {
    if intensity_pos < INTENSITY_INV_POS {
        let (ratio_l, ratio_r) = INTENSITY_STEREO_RATIOS[usize::from(intensity_pos)];

        for (l, r) in ch0.iter_mut().zip(ch1) {
            let is = *l;
            *l = ratio_l * is;
            *r = ratio_r * is;
        }
    }
    else if mid_side {
        process_mid_side(ch0, ch1);
    }
}

/// Determines if a band is zeroed.
#[inline(always)]
fn is_zero_band(band: &[f32]) -> bool {
    !band.iter().any(|&x| x != 0.0)
}

/// Decodes a single band of both channels. Intensity stereo is used for bands at or above the
/// intensity bound, mid-side stereo otherwise.
#[inline(always)]
fn process_band(
    is_intensity: bool,
    intensity_pos: u8,
    mid_side: bool,
    ch0: &mut [f32],
    ch1: &mut [f32],
) {
    if is_intensity {
        process_intensity(intensity_pos, mid_side, ch0, ch1);
    }
    else if mid_side {
        process_mid_side(ch0, ch1);
    }
}

/// Returns the sample range of window `win` of short scale factor band `sfb`.
#[inline(always)]
fn short_window_range(bands: &[usize; 14], sfb: usize, win: usize) -> Range<usize> {
    let len = bands[sfb + 1] - bands[sfb];
    let start = 3 * bands[sfb] + win * len;
    start..start + len
}

/// Perform joint stereo decoding on the channel pair.
///
/// Channel 1 is the intensity coded channel. The scale factor bands above the last non-zero
/// band of channel 1 (the zero part) carry their intensity position in channel 1's scale
/// factors. The scale factor bands of channel 1 also select the block layout for both channels.
pub(super) fn stereo(header: &FrameHeader, granule: &Granule, ch: &mut [[f32; 576]; 2]) {
    // Determine whether mid-side, and/or intensity stereo coding is used.
    let mid_side = header.is_mid_side_stereo();
    let intensity = header.is_intensity_stereo();

    if !mid_side && !intensity {
        return;
    }

    let [ch0, ch1] = ch;

    let channel = &granule.channels[1];

    let long_bands = &SFB_LONG_BANDS[header.sample_rate_idx];
    let short_bands = &SFB_SHORT_BANDS[header.sample_rate_idx];

    let (long, short) = channel.sfb_ranges();

    // Find the intensity bound of each short window: the band after the last non-zero band.
    let mut short_bound = [short.start; 3];

    for (win, bound) in short_bound.iter_mut().enumerate() {
        let last = short
            .clone()
            .rev()
            .find(|&sfb| !is_zero_band(&ch1[short_window_range(short_bands, sfb, win)]));

        if let Some(sfb) = last {
            *bound = sfb + 1;
        }
    }

    let is_nonzero_short = short_bound.iter().any(|&bound| bound > short.start);

    // Likewise, find the intensity bound of the long block. If any short window has non-zero
    // bands, the long part of a mixed block is never intensity coded.
    let long_bound = if is_nonzero_short {
        long.end
    }
    else {
        long.clone()
            .rev()
            .find(|&sfb| !is_zero_band(&ch1[long_bands[sfb]..long_bands[sfb + 1]]))
            .map_or(long.start, |sfb| sfb + 1)
    };

    for (win, &bound) in short_bound.iter().enumerate() {
        for sfb in short.clone() {
            let range = short_window_range(short_bands, sfb, win);

            // The last band has no scale factor, the position of the previous band is used.
            let intensity_pos = channel.scalefac_s[min(sfb, 11)][win];

            process_band(
                intensity && sfb >= bound,
                intensity_pos,
                mid_side,
                &mut ch0[range.clone()],
                &mut ch1[range],
            );
        }
    }

    for sfb in long {
        let range = long_bands[sfb]..long_bands[sfb + 1];

        let intensity_pos = channel.scalefac_l[min(sfb, 20)];

        process_band(
            intensity && sfb >= long_bound,
            intensity_pos,
            mid_side,
            &mut ch0[range.clone()],
            &mut ch1[range],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::header::parse_frame_header;
    use crate::layer3::BlockType;

    /// Layer 3, 128 kbps, 44.1 kHz, joint stereo with the given mode extension.
    fn joint_stereo_header(mode_extension: u32) -> FrameHeader {
        parse_frame_header(0xfffb_9040 | (mode_extension << 4)).unwrap()
    }

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() <= 1e-6
    }

    #[test]
    fn verify_intensity_ratios() {
        let factors = [0.0, 0.211_324_87, 0.366_025_4, 0.5, 0.633_974_6, 0.788_675_1, 1.0];

        for (&(l, r), &factor) in INTENSITY_STEREO_RATIOS.iter().zip(factors.iter()) {
            assert!(approx_eq(l, factor));
            assert!(approx_eq(r, 1.0 - factor));
        }
    }

    #[test]
    fn verify_stereo_passthrough() {
        // Plain stereo, and joint stereo without mid-side or intensity coding.
        for &header_word in &[0xfffb_9000, 0xfffb_9040] {
            let header = parse_frame_header(header_word).unwrap();

            let granule = Granule::default();

            let mut ch = [[0.5; 576], [0.25; 576]];
            stereo(&header, &granule, &mut ch);

            assert!(ch[0].iter().all(|&s| s == 0.5));
            assert!(ch[1].iter().all(|&s| s == 0.25));
        }
    }

    #[test]
    fn verify_mid_side() {
        let header = joint_stereo_header(0b10);

        let granule = Granule::default();

        let mut ch = [[1.0; 576], [0.5; 576]];
        stereo(&header, &granule, &mut ch);

        assert!(ch[0].iter().all(|&s| approx_eq(s, 1.5 * f32::consts::FRAC_1_SQRT_2)));
        assert!(ch[1].iter().all(|&s| approx_eq(s, 0.5 * f32::consts::FRAC_1_SQRT_2)));
    }

    #[test]
    fn verify_intensity_long() {
        let header = joint_stereo_header(0b01);

        let mut granule = Granule::default();
        // Intensity position 3 is an equal split, 7 is invalid.
        granule.channels[1].scalefac_l = [3; 21];
        granule.channels[1].scalefac_l[19] = 7;

        let mut ch = [[1.0; 576], [0.0; 576]];

        // Channel 1 has non-zero samples up to and including long band 10.
        let last = SFB_LONG_BANDS[0][11] - 1;
        ch[1][last] = 0.25;

        stereo(&header, &granule, &mut ch);

        // Bands below the bound are left as-is.
        assert_eq!(ch[0][last], 1.0);
        assert_eq!(ch[1][last], 0.25);

        // Bands above the bound are intensity coded.
        let start = SFB_LONG_BANDS[0][11];
        assert!(approx_eq(ch[0][start], 0.5));
        assert!(approx_eq(ch[1][start], 0.5));

        // Band 19 has an invalid position and is left as-is.
        assert_eq!(ch[0][SFB_LONG_BANDS[0][19]], 1.0);
        assert_eq!(ch[1][SFB_LONG_BANDS[0][19]], 0.0);

        // Band 21 uses the position of band 20.
        assert!(approx_eq(ch[0][575], 0.5));
        assert!(approx_eq(ch[1][575], 0.5));
    }

    #[test]
    fn verify_intensity_short() {
        // Mid-side and intensity stereo.
        let header = joint_stereo_header(0b11);

        let mut granule = Granule::default();
        granule.channels[1].block_type = BlockType::Short;
        // Intensity position 6 is fully left.
        granule.channels[1].scalefac_s = [[6; 3]; 12];

        let mut ch = [[1.0; 576], [0.0; 576]];

        // Window 1 of channel 1 has non-zero samples in short band 2.
        let range = short_window_range(&SFB_SHORT_BANDS[0], 2, 1);
        ch[1][range.start] = 1.0;

        stereo(&header, &granule, &mut ch);

        // Window 0 is entirely intensity coded.
        let range = short_window_range(&SFB_SHORT_BANDS[0], 0, 0);
        assert!(ch[0][range.clone()].iter().all(|&s| s == 1.0));
        assert!(ch[1][range].iter().all(|&s| s == 0.0));

        // Window 1 is mid-side coded up to and including band 2.
        let range = short_window_range(&SFB_SHORT_BANDS[0], 2, 1);
        assert!(approx_eq(ch[0][range.start], f32::consts::SQRT_2));
        assert!(approx_eq(ch[1][range.start], 0.0));
        assert!(approx_eq(ch[0][range.start + 1], f32::consts::FRAC_1_SQRT_2));
        assert!(approx_eq(ch[1][range.start + 1], f32::consts::FRAC_1_SQRT_2));

        // And intensity coded from band 3.
        let range = short_window_range(&SFB_SHORT_BANDS[0], 3, 1);
        assert!(ch[0][range.clone()].iter().all(|&s| s == 1.0));
        assert!(ch[1][range].iter().all(|&s| s == 0.0));
    }
}
