// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::f64;

use lazy_static::lazy_static;

use crate::common::{FrameHeader, SFB_SHORT_BANDS};

use super::{BlockType, GranuleChannel};

lazy_static! {
    /// Hybrid synthesesis IMDCT window coefficients for: Long, Start, Short, and End block, in that
    /// order.
    ///
    /// For long blocks:
    ///
    /// ```text
    /// W[ 0..36] = sin(PI/36.0 * (i + 0.5))
    /// ```
    ///
    /// For start blocks:
    ///
    /// ```text
    /// W[ 0..18] = sin(PI/36.0 * (i + 0.5))
    /// W[18..24] = 1.0
    /// W[24..30] = sin(PI/12.0 * ((i - 18) - 0.5))
    /// W[30..36] = 0.0
    /// ```
    ///
    /// For short blocks (to be applied to each 12 sample window):
    ///
    /// ```text
    /// W[ 0..12] = sin(PI/12.0 * (i + 0.5))
    /// W[12..36] = 0.0
    /// ```
    ///
    /// For end blocks:
    ///
    /// ```text
    /// W[ 0..6 ] = 0.0
    /// W[ 6..12] = sin(PI/12.0 * ((i - 6) + 0.5))
    /// W[12..18] = 1.0
    /// W[18..36] = sin(PI/36.0 * (i + 0.5))
    /// ```
    static ref IMDCT_WINDOWS: [[f32; 36]; 4] = {
        const PI_36: f64 = f64::consts::PI / 36.0;
        const PI_12: f64 = f64::consts::PI / 12.0;

        let mut windows = [[0f32; 36]; 4];

        // Window for Long blocks.
        for (i, w) in windows[0].iter_mut().enumerate() {
            *w = (PI_36 * (i as f64 + 0.5)).sin() as f32;
        }

        // Window for Start blocks (indicies 30..36 implictly 0.0).
        for i in 0..18 {
            windows[1][i] = (PI_36 * (i as f64 + 0.5)).sin() as f32;
        }
        for i in 18..24 {
            windows[1][i] = 1.0;
        }
        for i in 24..30 {
            windows[1][i] = (PI_12 * ((i - 18) as f64 + 0.5)).sin() as f32;
        }

        // Window for Short blocks.
        for i in 0..12 {
            windows[2][i] = (PI_12 * (i as f64 + 0.5)).sin() as f32;
        }

        // Window for End blocks (indicies 0..6 implicitly 0.0).
        for i in 6..12 {
            windows[3][i] = (PI_12 * ((i - 6) as f64 + 0.5)).sin() as f32;
        }
        for i in 12..18 {
            windows[3][i] = 1.0;
        }
        for i in 18..36 {
            windows[3][i] = (PI_36 * (i as f64 + 0.5)).sin() as f32;
        }

        windows
   };
}

lazy_static! {
    /// Pair of lookup tables, CS and CA, for alias reduction.
    ///
    /// As per ISO/IEC 11172-3, CS and CA are calculated as follows:
    ///
    /// ```text
    /// cs[i] =  1.0 / sqrt(1.0 + c[i]^2)
    /// ca[i] = c[i] / sqrt(1.0 + c[i]^2)
    /// ```
    ///
    /// where:
    /// ```text
    /// c[i] = [ -0.6, -0.535, -0.33, -0.185, -0.095, -0.041, -0.0142, -0.0037 ]
    /// ```
    static ref ANTIALIAS_CS_CA: ([f32; 8], [f32; 8]) = {
        const C: [f64; 8] = [ -0.6, -0.535, -0.33, -0.185, -0.095, -0.041, -0.0142, -0.0037 ];

        let mut cs = [0f32; 8];
        let mut ca = [0f32; 8];

        for i in 0..8 {
            let sqrt = f64::sqrt(1.0 + (C[i] * C[i]));
            cs[i] = (1.0 / sqrt) as f32;
            ca[i] = (C[i] / sqrt) as f32;
        }

        (cs, ca)
    };
}

/// Reorder samples that are part of short blocks into sub-band order.
pub(super) fn reorder(header: &FrameHeader, channel: &GranuleChannel, buf: &mut [f32; 576]) {
    // Only short blocks are reordered.
    if channel.block_type != BlockType::Short {
        return;
    }

    // Every short block is split into 3 equally sized windows as illustrated below (e.g. for
    // a short scale factor band with win_len=4):
    //
    //    <- Window #1 ->  <- Window #2 ->  <- Window #3 ->
    //   [ 0 | 1 | 2 | 3 ][ 4 | 5 | 6 | 7 ][ 8 | 9 | a | b ]
    //    <-----  3 * Short Scale Factor Band Width  ----->
    //
    // Reordering interleaves the samples of each window as follows:
    //
    //   [ 0 | 4 | 8 | 1 | 5 | 9 | 2 | 6 | a | 3 | 7 | b ]
    //    <----  3 * Short Scale Factor Band Width  ---->
    //
    // Basically, reordering interleaves the 3 windows the same way that 3 planar audio buffers
    // would be interleaved. In mixed blocks, only the short bands are reordered.
    let bands = &SFB_SHORT_BANDS[header.sample_rate_idx];

    let (_, short) = channel.sfb_ranges();

    let windows = *buf;

    for sfb in short {
        let start = 3 * bands[sfb];
        let len = bands[sfb + 1] - bands[sfb];

        let band = &windows[start..start + 3 * len];

        for (w, window) in band.chunks_exact(len).enumerate() {
            for (f, &sample) in window.iter().enumerate() {
                buf[start + 3 * f + w] = sample;
            }
        }
    }
}

/// Applies the anti-aliasing filter to sub-bands that are not part of short blocks.
pub(super) fn antialias(channel: &GranuleChannel, samples: &mut [f32; 576]) {
    // The number of sub-bands to anti-aliasing depends on block type.
    let sb_end = match channel.block_type {
        // Short blocks are never anti-aliased.
        BlockType::Short if !channel.is_mixed => return,
        // Mixed blocks have a long block span the first 36 samples (2 sub-bands). Therefore, only
        // anti-alias these two sub-bands.
        BlockType::Short => 2 * 18,
        // All other block types require all 32 sub-bands to be anti-aliased.
        _ => 32 * 18,
    };

    // Amortize the lazy_static fetch over the entire anti-aliasing operation.
    let (cs, ca): &([f32; 8], [f32; 8]) = &ANTIALIAS_CS_CA;

    // Anti-aliasing is performed using 8 butterfly calculations at the boundaries of ADJACENT
    // sub-bands. For each calculation, there are two samples: lower and upper. For each iteration,
    // the lower sample index advances backwards from the boundary, while the upper sample index
    // advances forward from the boundary.
    //
    // The butterfly calculation itself can be illustrated as follows:
    //
    //              * cs[i]
    //   l0 -------o------(-)------> l1
    //               \    /                  l1 = l0 * cs[i] - u0 * ca[i]
    //                \  / * ca[i]           u1 = u0 * cs[i] + l0 * ca[i]
    //                 \
    //               /  \  * ca[i]           where:
    //             /     \                       cs[i], ca[i] are constant values for iteration i,
    //   u0 ------o------(+)-------> u1          derived from table B.9 of ISO/IEC 11172-3.
    //             * cs[i]
    for sb in (18..sb_end).step_by(18) {
        for i in 0..8 {
            let li = sb - 1 - i;
            let ui = sb + i;
            let lower = samples[li];
            let upper = samples[ui];
            samples[li] = lower * cs[i] - upper * ca[i];
            samples[ui] = upper * cs[i] + lower * ca[i];
        }
    }
}

/// Performs the IMDCT and windowing of a single sub-band. The full 36 sample output is written
/// into `y`.
fn imdct_win(block_type: BlockType, x: &[f32; 18], y: &mut [f32; 36]) {
    match block_type {
        BlockType::Short => {
            let window = &IMDCT_WINDOWS[BlockType::Short.as_index()];

            *y = [0.0; 36];

            // Each of the 3 short windows is transformed with a 12-point IMDCT. The windows are
            // overlapped and added in the output, with the first and last 6 samples of the
            // output always being 0.
            //
            // 0             6           12           18           24           30            36
            // +-------------+------------+------------+------------+------------+-------------+
            // |      0      |  y0[..6]   |  y0[6..]   |  y1[6..]   |  y2[6..]   |      0      |
            // |     (6)     |            |  + y1[..6] |  + y2[..6] |            |     (6)     |
            // +-------------+------------+------------+------------+------------+-------------+
            for w in 0..3 {
                let mut input = [0.0; 6];

                for (k, s) in input.iter_mut().enumerate() {
                    *s = x[3 * k + w];
                }

                let mut output = [0.0; 12];
                imdct::imdct12(&input, &mut output);

                for (t, &s) in output.iter().enumerate() {
                    y[6 + 6 * w + t] += window[t] * s;
                }
            }
        }
        _ => {
            let window = &IMDCT_WINDOWS[block_type.as_index()];

            imdct::imdct36(x, y);

            for (s, &w) in y.iter_mut().zip(window.iter()) {
                *s *= w;
            }
        }
    }
}

/// Performs hybrid synthesis (IMDCT, windowing, and overlap-add).
pub(super) fn hybrid_synthesis(
    channel: &GranuleChannel,
    overlap: &mut [[f32; 18]; 32],
    samples: &mut [f32; 576],
) {
    for (sb, overlap) in overlap.iter_mut().enumerate() {
        let start = 18 * sb;

        let mut x = [0.0; 18];
        x.copy_from_slice(&samples[start..start + 18]);

        // The two lowest sub-bands of a block with the mixed block flag set always use the long
        // window. The flag is also honoured for start and end blocks.
        let block_type =
            if channel.is_mixed && sb < 2 { BlockType::Long } else { channel.block_type };

        let mut y = [0.0; 36];
        imdct_win(block_type, &x, &mut y);

        // Overlap-add. The second half of the output is saved for the next granule.
        for (i, (s, o)) in samples[start..start + 18].iter_mut().zip(overlap.iter_mut()).enumerate()
        {
            *s = *o + y[i];
            *o = y[18 + i];
        }
    }
}

/// Inverts odd samples in odd sub-bands.
pub(super) fn frequency_inversion(samples: &mut [f32; 576]) {
    // There are 32 sub-bands spanning 576 samples:
    //
    //        0    18    36    54    72    90   108       558    576
    //        +-----+-----+-----+-----+-----+-----+ . . . . +------+
    // s[i] = | sb0 | sb1 | sb2 | sb3 | sb4 | sb5 | . . . . | sb31 |
    //        +-----+-----+-----+-----+-----+-----+ . . . . +------+
    //
    // Each odd sample in the odd sub-bands must be negated.
    for sub_band in samples.chunks_exact_mut(18).skip(1).step_by(2) {
        for s in sub_band.iter_mut().skip(1).step_by(2) {
            *s = -*s;
        }
    }
}

mod imdct {
    //! Fast Inverse Modified Discrete Cosine Transforms (IMDCT) of sizes 4, 12, and 36 using the
    //! radix-3 decomposition published in article [1]. The size 4 transform is computed directly.
    //!
    //! The IMDCT of size N, transforming N/2 frequency-domain samples X into N time-domain
    //! samples x, is defined as:
    //!
    //! ```text
    //!        N/2-1
    //! x[n] =  SUM  { X[k] * cos(PI/2N * (2n + 1 + N/2) * (2k + 1)) }
    //!         k=0
    //! ```
    //!
    //! [1] H. Shu, X. Bao, C. Toumoulin, L. Luo, "Radix-3 Algorithm for the Fast Computation of
    //! Forward and Inverse MDCT", IEEE Signal Processing Letters, Vol. 14, No. 2, pp. 93-96,
    //! Feb. 2007.

    use std::f64::consts::PI;

    use lazy_static::lazy_static;

    /// sin(PI * (2k + 1) / 12)
    const SIN_12: [f32; 2] = [0.258819045102521, 0.707106781186547];
    /// cos(PI * (2k + 1) / 12)
    const COS_12: [f32; 2] = [0.965925826289068, 0.707106781186548];
    /// sqrt(3) * sin(PI * (2k + 1) / 12)
    const SIN3_12: [f32; 2] = [0.448287736084027, 1.224744871391589];
    /// sqrt(3) * cos(PI * (2k + 1) / 12)
    const COS3_12: [f32; 2] = [1.67303260747562, 1.22474487139159];

    /// cos(3PI/8) and -cos(PI/8).
    const COS_4: [f32; 2] = [0.382683432365090, -0.923879532511287];

    lazy_static! {
        /// Twiddle factors for the 36-point IMDCT. In order: sin(PI * (2k + 1) / 36),
        /// cos(PI * (2k + 1) / 36), and both again scaled by sqrt(3).
        static ref TWIDDLE_36: [[f32; 6]; 4] = {
            let mut twiddle = [[0f32; 6]; 4];

            for k in 0..6 {
                let theta = PI * (2 * k + 1) as f64 / 36.0;
                let sqrt3 = 3f64.sqrt();

                twiddle[0][k] = theta.sin() as f32;
                twiddle[1][k] = theta.cos() as f32;
                twiddle[2][k] = (sqrt3 * theta.sin()) as f32;
                twiddle[3][k] = (sqrt3 * theta.cos()) as f32;
            }

            twiddle
        };
    }

    /// Computes the 36-point IMDCT of `x` into `y`.
    pub fn imdct36(x: &[f32; 18], y: &mut [f32; 36]) {
        let [sin, cos, sin3, cos3]: &[[f32; 6]; 4] = &TWIDDLE_36;

        let mut xa = [0.0; 6];
        let mut xb = [0.0; 6];
        let mut xc = [0.0; 6];

        for k in 0..6 {
            let (f, g, h) = (x[k], x[6 + k], x[12 + k]);
            let (fr, gr, hr) = (x[5 - k], x[11 - k], x[17 - k]);

            xa[k] = f - gr - h;
            xb[k] = (2.0 * f + gr + h) * cos[k] + (h - gr) * sin3[k];
            xc[k] = (fr + g) * cos3[k] - (fr - g + 2.0 * hr) * sin[k];
        }

        let mut ya = [0.0; 12];
        let mut yb = [0.0; 12];
        let mut yc = [0.0; 12];

        imdct12(&xa, &mut ya);
        imdct12(&xb, &mut yb);
        imdct12(&xc, &mut yc);

        for n in (0..12).step_by(2) {
            yc[n] = -yc[n];
        }

        for n in 0..12 {
            y[3 * n + 0] = 0.5 * (yb[n] + yc[n]);
            y[3 * n + 1] = ya[n];
            y[3 * n + 2] = 0.5 * (yb[n] - yc[n]);
        }
    }

    /// Computes the 12-point IMDCT of `x` into `y`.
    pub fn imdct12(x: &[f32; 6], y: &mut [f32; 12]) {
        let mut xa = [0.0; 2];
        let mut xb = [0.0; 2];
        let mut xc = [0.0; 2];

        for k in 0..2 {
            let (f, g, h) = (x[k], x[2 + k], x[4 + k]);
            let (fr, gr, hr) = (x[1 - k], x[3 - k], x[5 - k]);

            xa[k] = f - gr - h;
            xb[k] = (2.0 * f + gr + h) * COS_12[k] + (h - gr) * SIN3_12[k];
            xc[k] = (fr + g) * COS3_12[k] - (fr - g + 2.0 * hr) * SIN_12[k];
        }

        let mut ya = [0.0; 4];
        let mut yb = [0.0; 4];
        let mut yc = [0.0; 4];

        imdct4(&xa, &mut ya);
        imdct4(&xb, &mut yb);
        imdct4(&xc, &mut yc);

        yc[0] = -yc[0];
        yc[2] = -yc[2];

        for n in 0..4 {
            y[3 * n + 0] = 0.5 * (yb[n] + yc[n]);
            y[3 * n + 1] = ya[n];
            y[3 * n + 2] = 0.5 * (yb[n] - yc[n]);
        }
    }

    /// Computes the 4-point IMDCT of `x` into `y`.
    pub fn imdct4(x: &[f32; 2], y: &mut [f32; 4]) {
        let t0 = x[0] * COS_4[0] + x[1] * COS_4[1];
        let t1 = x[0] * COS_4[1] - x[1] * COS_4[0];

        *y = [t0, -t0, t1, t1];
    }

}
