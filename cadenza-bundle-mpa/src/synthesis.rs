// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `synthesis` module implements the polyphase synthesis filterbank of the MPEG audio standard.

use cadenza_core::dsp::dct::Dct;

/// Synthesis window D[i], defined in Table B.3 of ISO/IEC 11172-3.
#[allow(clippy::unreadable_literal)]
#[rustfmt::skip]
const SYNTHESIS_D: [f32; 512] = [
     0.000000000, -0.000015259, -0.000015259, -0.000015259,
    -0.000015259, -0.000015259, -0.000015259, -0.000030518,
    -0.000030518, -0.000030518, -0.000030518, -0.000045776,
    -0.000045776, -0.000061035, -0.000061035, -0.000076294,
    -0.000076294, -0.000091553, -0.000106812, -0.000106812,
    -0.000122070, -0.000137329, -0.000152588, -0.000167847,
    -0.000198364, -0.000213623, -0.000244141, -0.000259399,
    -0.000289917, -0.000320435, -0.000366211, -0.000396729,
    -0.000442505, -0.000473022, -0.000534058, -0.000579834,
    -0.000625610, -0.000686646, -0.000747681, -0.000808716,
    -0.000885010, -0.000961304, -0.001037598, -0.001113892,
    -0.001205444, -0.001296997, -0.001388550, -0.001480103,
    -0.001586914, -0.001693726, -0.001785278, -0.001907349,
    -0.002014160, -0.002120972, -0.002243042, -0.002349854,
    -0.002456665, -0.002578735, -0.002685547, -0.002792358,
    -0.002899170, -0.002990723, -0.003082275, -0.003173828,
     0.003250122,  0.003326416,  0.003387451,  0.003433228,
     0.003463745,  0.003479004,  0.003479004,  0.003463745,
     0.003417969,  0.003372192,  0.003280640,  0.003173828,
     0.003051758,  0.002883911,  0.002700806,  0.002487183,
     0.002227783,  0.001937866,  0.001617432,  0.001266479,
     0.000869751,  0.000442505, -0.000030518, -0.000549316,
    -0.001098633, -0.001693726, -0.002334595, -0.003005981,
    -0.003723145, -0.004486084, -0.005294800, -0.006118774,
    -0.007003784, -0.007919312, -0.008865356, -0.009841919,
    -0.010848999, -0.011886597, -0.012939453, -0.014022827,
    -0.015121460, -0.016235352, -0.017349243, -0.018463135,
    -0.019577026, -0.020690918, -0.021789551, -0.022857666,
    -0.023910522, -0.024932861, -0.025909424, -0.026840210,
    -0.027725220, -0.028533936, -0.029281616, -0.029937744,
    -0.030532837, -0.031005859, -0.031387329, -0.031661987,
    -0.031814575, -0.031845093, -0.031738281, -0.031478882,
     0.031082153,  0.030517578,  0.029785156,  0.028884888,
     0.027801514,  0.026535034,  0.025085449,  0.023422241,
     0.021575928,  0.019531250,  0.017257690,  0.014801025,
     0.012115479,  0.009231567,  0.006134033,  0.002822876,
    -0.000686646, -0.004394531, -0.008316040, -0.012420654,
    -0.016708374, -0.021179199, -0.025817871, -0.030609131,
    -0.035552979, -0.040634155, -0.045837402, -0.051132202,
    -0.056533813, -0.061996460, -0.067520142, -0.073059082,
    -0.078628540, -0.084182739, -0.089706421, -0.095169067,
    -0.100540161, -0.105819702, -0.110946655, -0.115921021,
    -0.120697021, -0.125259399, -0.129562378, -0.133590698,
    -0.137298584, -0.140670776, -0.143676758, -0.146255493,
    -0.148422241, -0.150115967, -0.151306152, -0.151962280,
    -0.152069092, -0.151596069, -0.150497437, -0.148773193,
    -0.146362305, -0.143264771, -0.139450073, -0.134887695,
    -0.129577637, -0.123474121, -0.116577148, -0.108856201,
     0.100311279,  0.090927124,  0.080688477,  0.069595337,
     0.057617187,  0.044784546,  0.031082153,  0.016510010,
     0.001068115, -0.015228271, -0.032379150, -0.050354004,
    -0.069168091, -0.088775635, -0.109161377, -0.130310059,
    -0.152206421, -0.174789429, -0.198059082, -0.221984863,
    -0.246505737, -0.271591187, -0.297210693, -0.323318481,
    -0.349868774, -0.376800537, -0.404083252, -0.431655884,
    -0.459472656, -0.487472534, -0.515609741, -0.543823242,
    -0.572036743, -0.600219727, -0.628295898, -0.656219482,
    -0.683914185, -0.711318970, -0.738372803, -0.765029907,
    -0.791213989, -0.816864014, -0.841949463, -0.866363525,
    -0.890090942, -0.913055420, -0.935195923, -0.956481934,
    -0.976852417, -0.996246338, -1.014617920, -1.031936646,
    -1.048156738, -1.063217163, -1.077117920, -1.089782715,
    -1.101211548, -1.111373901, -1.120223999, -1.127746582,
    -1.133926392, -1.138763428, -1.142211914, -1.144287109,
     1.144989014,  1.144287109,  1.142211914,  1.138763428,
     1.133926392,  1.127746582,  1.120223999,  1.111373901,
     1.101211548,  1.089782715,  1.077117920,  1.063217163,
     1.048156738,  1.031936646,  1.014617920,  0.996246338,
     0.976852417,  0.956481934,  0.935195923,  0.913055420,
     0.890090942,  0.866363525,  0.841949463,  0.816864014,
     0.791213989,  0.765029907,  0.738372803,  0.711318970,
     0.683914185,  0.656219482,  0.628295898,  0.600219727,
     0.572036743,  0.543823242,  0.515609741,  0.487472534,
     0.459472656,  0.431655884,  0.404083252,  0.376800537,
     0.349868774,  0.323318481,  0.297210693,  0.271591187,
     0.246505737,  0.221984863,  0.198059082,  0.174789429,
     0.152206421,  0.130310059,  0.109161377,  0.088775635,
     0.069168091,  0.050354004,  0.032379150,  0.015228271,
    -0.001068115, -0.016510010, -0.031082153, -0.044784546,
    -0.057617187, -0.069595337, -0.080688477, -0.090927124,
     0.100311279,  0.108856201,  0.116577148,  0.123474121,
     0.129577637,  0.134887695,  0.139450073,  0.143264771,
     0.146362305,  0.148773193,  0.150497437,  0.151596069,
     0.152069092,  0.151962280,  0.151306152,  0.150115967,
     0.148422241,  0.146255493,  0.143676758,  0.140670776,
     0.137298584,  0.133590698,  0.129562378,  0.125259399,
     0.120697021,  0.115921021,  0.110946655,  0.105819702,
     0.100540161,  0.095169067,  0.089706421,  0.084182739,
     0.078628540,  0.073059082,  0.067520142,  0.061996460,
     0.056533813,  0.051132202,  0.045837402,  0.040634155,
     0.035552979,  0.030609131,  0.025817871,  0.021179199,
     0.016708374,  0.012420654,  0.008316040,  0.004394531,
     0.000686646, -0.002822876, -0.006134033, -0.009231567,
    -0.012115479, -0.014801025, -0.017257690, -0.019531250,
    -0.021575928, -0.023422241, -0.025085449, -0.026535034,
    -0.027801514, -0.028884888, -0.029785156, -0.030517578,
     0.031082153,  0.031478882,  0.031738281,  0.031845093,
     0.031814575,  0.031661987,  0.031387329,  0.031005859,
     0.030532837,  0.029937744,  0.029281616,  0.028533936,
     0.027725220,  0.026840210,  0.025909424,  0.024932861,
     0.023910522,  0.022857666,  0.021789551,  0.020690918,
     0.019577026,  0.018463135,  0.017349243,  0.016235352,
     0.015121460,  0.014022827,  0.012939453,  0.011886597,
     0.010848999,  0.009841919,  0.008865356,  0.007919312,
     0.007003784,  0.006118774,  0.005294800,  0.004486084,
     0.003723145,  0.003005981,  0.002334595,  0.001693726,
     0.001098633,  0.000549316,  0.000030518, -0.000442505,
    -0.000869751, -0.001266479, -0.001617432, -0.001937866,
    -0.002227783, -0.002487183, -0.002700806, -0.002883911,
    -0.003051758, -0.003173828, -0.003280640, -0.003372192,
    -0.003417969, -0.003463745, -0.003479004, -0.003479004,
    -0.003463745, -0.003433228, -0.003387451, -0.003326416,
     0.003250122,  0.003173828,  0.003082275,  0.002990723,
     0.002899170,  0.002792358,  0.002685547,  0.002578735,
     0.002456665,  0.002349854,  0.002243042,  0.002120972,
     0.002014160,  0.001907349,  0.001785278,  0.001693726,
     0.001586914,  0.001480103,  0.001388550,  0.001296997,
     0.001205444,  0.001113892,  0.001037598,  0.000961304,
     0.000885010,  0.000808716,  0.000747681,  0.000686646,
     0.000625610,  0.000579834,  0.000534058,  0.000473022,
     0.000442505,  0.000396729,  0.000366211,  0.000320435,
     0.000289917,  0.000259399,  0.000244141,  0.000213623,
     0.000198364,  0.000167847,  0.000152588,  0.000137329,
     0.000122070,  0.000106812,  0.000106812,  0.000091553,
     0.000076294,  0.000076294,  0.000061035,  0.000061035,
     0.000045776,  0.000045776,  0.000030518,  0.000030518,
     0.000030518,  0.000030518,  0.000015259,  0.000015259,
     0.000015259,  0.000015259,  0.000015259,  0.000015259,
];

/// `SynthesisState` maintains the persistant state of sub-band synthesis for one channel.
pub struct SynthesisState {
    /// The V vector FIFO of the standard, as 16 slots of 64 samples.
    v_vec: [[f32; 64]; 16],
    /// The index of the slot that will be written next.
    v_front: usize,
    dct: Dct,
}

impl Default for SynthesisState {
    fn default() -> Self {
        SynthesisState { v_vec: [[0f32; 64]; 16], v_front: 0, dct: Dct::new(32) }
    }
}

impl SynthesisState {
    /// Clear the filter history.
    pub fn reset(&mut self) {
        self.v_vec = [[0f32; 64]; 16];
        self.v_front = 0;
    }

    /// Synthesize one time slot of 32 sub-band samples, `s_vec`, into 32 PCM samples, `o_vec`.
    /// The PCM samples are not clamped.
    fn synthesize_slot(&mut self, s_vec: &[f32; 32], o_vec: &mut [f32; 32]) {
        let mut d_vec = [0f32; 32];

        // Matrixing is performed first. As per the standard, matrixing would require 2048
        // multiplications per slot. However, following the method by Konstantinides published in
        // [1], it is possible to achieve the same result through the use of a 32-point DCT
        // followed by some reconstruction.
        //
        // There are a few key observations to this approach:
        //
        //     1) The "matrixing" operation as per the standard is simply a 32-point MDCT. Note that
        //        an N-point MDCT produces a 2N-point output.
        //
        //     2) The output of the MDCT contains repeated blocks of samples. If the result of a
        //        MDCT defined as is X[0..64), then:
        //
        //          1) X(16.. 0] =  X(48..32]
        //          2) X[48..64) = -X[16..32)
        //
        //        Only points [16..48) of the MDCT are actually required.
        //
        //      3) Points [16..48) of the MDCT can be mapped from a 32-point DCT of the input
        //         vector.
        //
        // Applying a 32-point DCT to s_vec gives d_vec. The quadrants of the MDCT output, v_vec,
        // are then copied and flipped from d_vec:
        //
        // d_vec        0              16             32
        //              .               .              .
        //              .     +---------+   +----------+
        //              +-----+    A    | /     B      |
        //              +---------------+--------------+
        //
        // v_vec        0              16             32             48              64
        //              .               .              .              .               .
        //              .   +-----------+              .              .               .
        //              . /      B      |              .              .               .
        //              +---------------+--------------+--------------+---------------+
        //              .               |     -B     / |   -A   +-----+-----+   -A    |
        //              .               +----------+   +--------+     .     +---------+
        //
        // The boundary samples are exceptions:
        //
        //     1) v_vec[ 0] =  d_vec[16]
        //     2) v_vec[32] = -d_vec[16]
        //     3) v_vec[48] = -d_vec[ 0]
        //     4) v_vec[16] =  0.0
        //
        // [1] K. Konstantinides, "Fast subband filtering in MPEG audio coding", Signal Processing
        // Letters IEEE, vol. 1, no. 2, pp. 26-28, 1994.
        self.dct.dct_ii(s_vec, &mut d_vec);

        let v_vec = &mut self.v_vec[self.v_front];

        for (d, s) in v_vec[48 - 15..48].iter_mut().rev().zip(&d_vec[1..16]) {
            *d = -s;
        }
        for (d, s) in v_vec[48 + 1..48 + 16].iter_mut().zip(&d_vec[1..16]) {
            *d = -s;
        }
        for (d, s) in v_vec[16 + 1..16 + 16].iter_mut().rev().zip(&d_vec[17..32]) {
            *d = -s;
        }
        for (d, s) in v_vec[1..16].iter_mut().zip(&d_vec[17..32]) {
            *d = *s;
        }

        v_vec[0] = d_vec[16];
        v_vec[32] = -d_vec[16];
        v_vec[48] = -d_vec[0];
        v_vec[16] = 0.0;

        // As per the standard, a vector, u_vec, is built from the first 32 samples of the even
        // numbered v_vec slots, and the last 32 samples of the odd numbered v_vec slots, counting
        // from the front of the FIFO. The PCM samples are then:
        //
        //         16
        // s[i] = SUM { u_vec[32*j + i] * D[32*j + i] }    for i=0..32
        //        j=0
        //
        // where D[0..512] is the synthesis window provided in table B.3 of ISO/IEC 11172-3.
        //
        // Rather than building u_vec, iterate straight through the slots of v_vec and accumulate
        // into the output vector.
        *o_vec = [0f32; 32];

        for j in 0..8 {
            let v_start = self.v_front + (j << 1);

            let v0 = &self.v_vec[(v_start + 0) & 0xf][0..32];
            let v1 = &self.v_vec[(v_start + 1) & 0xf][32..64];

            let k = j << 6;

            for i in 0..32 {
                o_vec[i] += v0[i] * SYNTHESIS_D[k + i + 0];
                o_vec[i] += v1[i] * SYNTHESIS_D[k + i + 32];
            }
        }

        // Shift the v_vec FIFO. Moving the front backwards by 1 slot overwrites the oldest slot
        // with the next, newest, slot.
        self.v_front = (self.v_front + 15) & 0xf;
    }
}

/// Sub-band synthesis transforms time slots of 32 sub-band samples each into blocks of 32 PCM
/// audio samples. Sample `sb` of slot `t` is `in_samples[32 * t + sb]`, and likewise for `out`.
///
/// The PCM samples are clamped to [-1.0, 1.0].
pub fn synthesis(state: &mut SynthesisState, in_samples: &[f32], out: &mut [f32]) {
    debug_assert!(in_samples.len() % 32 == 0);
    debug_assert!(out.len() >= in_samples.len());

    let mut s_vec = [0f32; 32];
    let mut o_vec = [0f32; 32];

    for (slot, pcm) in in_samples.chunks_exact(32).zip(out.chunks_exact_mut(32)) {
        s_vec.copy_from_slice(slot);

        state.synthesize_slot(&s_vec, &mut o_vec);

        for (o, &s) in pcm.iter_mut().zip(&o_vec) {
            *o = s.clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::f64;

    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    /// A direct implementation of the synthesis filterbank as given by Figure A.2 of
    /// ISO/IEC 11172-3.
    struct SynthesisAnalytical {
        v: Vec<f64>,
    }

    impl SynthesisAnalytical {
        fn new() -> Self {
            SynthesisAnalytical { v: vec![0.0; 1024] }
        }

        fn synthesize_slot(&mut self, s: &[f32; 32]) -> [f64; 32] {
            // Shift.
            self.v.rotate_right(64);

            // Matrixing.
            for i in 0..64 {
                self.v[i] = (0..32)
                    .map(|k| {
                        let n = ((16 + i) * (2 * k + 1)) as f64;
                        f64::from(s[k]) * (n * f64::consts::PI / 64.0).cos()
                    })
                    .sum();
            }

            // Build U.
            let mut u = [0.0; 512];

            for i in 0..8 {
                for j in 0..32 {
                    u[64 * i + j] = self.v[128 * i + j];
                    u[64 * i + 32 + j] = self.v[128 * i + 96 + j];
                }
            }

            // Window and sum.
            let mut out = [0.0; 32];

            for j in 0..32 {
                out[j] = (0..16).map(|i| u[32 * i + j] * f64::from(SYNTHESIS_D[32 * i + j])).sum();
            }

            out
        }
    }

    #[test]
    fn verify_synthesize_slot() {
        let mut rng = SmallRng::seed_from_u64(42);

        let mut state = SynthesisState::default();
        let mut analytical = SynthesisAnalytical::new();

        let mut s = [0f32; 32];
        let mut actual = [0f32; 32];

        for _ in 0..2000 {
            for x in s.iter_mut() {
                *x = rng.random_range(-1.0f32..1.0);
            }

            state.synthesize_slot(&s, &mut actual);
            let expected = analytical.synthesize_slot(&s);

            for (&a, &e) in actual.iter().zip(expected.iter()) {
                assert!((f64::from(a) - e).abs() < 1.0 / 65536.0);
            }
        }
    }

    #[test]
    fn verify_synthesis_clamps() {
        let mut state = SynthesisState::default();

        // A full-scale sub-band 0 saturates the output after a few slots.
        let mut slots = [0f32; 32 * 36];
        for slot in slots.chunks_exact_mut(32) {
            slot[0] = 8.0;
        }

        let mut out = [0f32; 32 * 36];
        synthesis(&mut state, &slots, &mut out);

        assert!(out.iter().all(|s| s.abs() <= 1.0));
        assert!(out.iter().any(|&s| s == 1.0 || s == -1.0));
    }

    #[test]
    fn verify_synthesis_reset() {
        let mut state = SynthesisState::default();

        let mut slots = [0f32; 32 * 12];
        for (i, s) in slots.iter_mut().enumerate() {
            *s = ((i % 7) as f32 - 3.0) / 8.0;
        }

        let mut first = [0f32; 32 * 12];
        synthesis(&mut state, &slots, &mut first);

        state.reset();

        let mut second = [0f32; 32 * 12];
        synthesis(&mut state, &slots, &mut second);

        assert_eq!(first[..], second[..]);
    }
}
