// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `dct` module implements the Discrete Cosine Transform (DCT).
//!
//! The DCT algorithms in this module are not general purpose and are specialized for use in
//! typical audio compression applications. Therefore, some constraints may apply.

use std::f64;

use lazy_static::lazy_static;

/// The largest supported transform size.
const MAX_N: usize = 32;

macro_rules! dct_cos_table {
    ($bi:expr, $name:ident) => {
        lazy_static! {
            static ref $name: [f32; 1 << ($bi - 1)] = {
                const N: usize = 1 << $bi;
                const N2: usize = N >> 1;
                const FREQ: f64 = f64::consts::PI / (N as f64);

                let mut table = [0f32; N2];

                for (i, c) in table.iter_mut().enumerate() {
                    *c = (2.0 * ((i as f64 + 0.5) * FREQ).cos()).recip() as f32;
                }

                table
            };
        }
    };
}

dct_cos_table!(1, DCT_COS_TABLE_2);
dct_cos_table!(2, DCT_COS_TABLE_4);
dct_cos_table!(3, DCT_COS_TABLE_8);
dct_cos_table!(4, DCT_COS_TABLE_16);
dct_cos_table!(5, DCT_COS_TABLE_32);

fn dct_cos_table(n: usize) -> &'static [f32] {
    match n {
        2 => DCT_COS_TABLE_2.as_ref(),
        4 => DCT_COS_TABLE_4.as_ref(),
        8 => DCT_COS_TABLE_8.as_ref(),
        16 => DCT_COS_TABLE_16.as_ref(),
        32 => DCT_COS_TABLE_32.as_ref(),
        _ => unreachable!(),
    }
}

/// Discrete Cosine Transform (DCT).
///
/// Implements the DCT-II, `X[i] = sum(x[j] * cos(PI * i * (j + 0.5) / N))`, using the fast
/// algorithm described in \[1\], without any output scaling.
///
/// \[1\] B.G. Lee, "A new algorithm to compute the discrete cosine transform", IEEE Transactions
///       on Acoustics, Speech, and Signal Processing, vol. 32, no. 6, pp. 1243-1245, 1984.
///
/// <https://ieeexplore.ieee.org/document/1164443>
pub struct Dct {
    temp: [f32; MAX_N],
    n: usize,
}

impl Dct {
    /// Instantiate a N-point DCT.
    ///
    /// The value of `n` must be a power-of-2, and less-than or equal to 32.
    pub fn new(n: usize) -> Dct {
        // The algorithm implemented requires a power-of-two N.
        assert!(n.is_power_of_two(), "n must be a power-of-two");
        assert!(n <= MAX_N, "maximum of 32-point dct");

        Dct { temp: [0.0; MAX_N], n }
    }

    /// Performs a N-point Discrete Cosine Transform.
    ///
    /// The number of input samples in `src`, N, must equal the value `Dct` was instantiated with.
    /// The length of the output slice, `dst`, must also equal N. Failing to meet these requirements
    /// will throw an assertion.
    pub fn dct_ii(&mut self, src: &[f32], dst: &mut [f32]) {
        assert_eq!(src.len(), self.n);
        assert_eq!(dst.len(), self.n);

        // Enter recursion.
        dst.copy_from_slice(src);
        dct_ii_step(dst, &mut self.temp[..self.n]);
    }

    /// Performs a N-point Discrete Cosine Transform in-place.
    ///
    /// The number of input samples in `src`, N, must equal the value `Dct` was instantiated with.
    pub fn dct_ii_inplace(&mut self, src: &mut [f32]) {
        assert_eq!(src.len(), self.n);

        // Enter recursion.
        dct_ii_step(src, &mut self.temp[..self.n]);
    }
}

/// One step of Lee's recursion. The N-point DCT of `x` is split into two N/2-point DCTs of the
/// folded sum and scaled difference of `x`. `t` is scratch space of the same length as `x`.
fn dct_ii_step(x: &mut [f32], t: &mut [f32]) {
    let n = x.len();

    // The 1-point DCT is the identity.
    if n < 2 {
        return;
    }

    let n_half = n >> 1;

    let (xl, xr) = x.split_at_mut(n_half);
    let (tl, tr) = t.split_at_mut(n_half);
    let table = dct_cos_table(n);

    for ((((tls, trs), &xls), &xrs), &c) in
        tl.iter_mut().zip(tr.iter_mut()).zip(xl.iter()).zip(xr.iter().rev()).zip(table.iter())
    {
        *tls = xls + xrs;
        *trs = (xls - xrs) * c;
    }

    dct_ii_step(tl, xl);
    dct_ii_step(tr, xr);

    // Even outputs come from the sum half. Odd outputs are sums of adjacent difference half
    // outputs, except the last.
    for ((xsc, &tls), trsw) in x.chunks_exact_mut(2).zip(tl.iter()).zip(tr.windows(2)) {
        xsc[0] = tls;
        xsc[1] = trsw[0] + trsw[1];
    }

    x[n - 2] = t[n_half - 1];
    x[n - 1] = t[n - 1];
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::f64;

    fn dct_analytical(x: &[f32], y: &mut [f64]) {
        let n = x.len();

        let w = f64::consts::PI / n as f64;

        for i in 0..n {
            let mut sum = 0.0;
            for j in 0..n {
                sum += (x[j] as f64) * (w * (i as f64) * ((j as f64) + 0.5)).cos();
            }
            y[i] = sum;
        }
    }

    #[test]
    fn verify_dct_ii_short() {
        #[rustfmt::skip]
        const TEST_VECTOR: [f32; 32] = [
            0.1710, 0.1705, 0.3476, 0.1866, 0.4784, 0.6525, 0.2690, 0.9996,
            0.1864, 0.7277, 0.1163, 0.6620, 0.0911, 0.3225, 0.1126, 0.5344,
            0.7839, 0.9741, 0.8757, 0.5763, 0.5926, 0.2756, 0.1757, 0.6531,
            0.7101, 0.7376, 0.1924, 0.0351, 0.8044, 0.2409, 0.9347, 0.9417,
        ];

        let mut actual = [0f32; 32];
        let mut expected = [0f64; 32];

        let mut dct = Dct::new(32);
        dct.dct_ii(&TEST_VECTOR, &mut actual);

        dct_analytical(&TEST_VECTOR, &mut expected);
        for i in 0..32 {
            assert!((f64::from(actual[i]) - expected[i]).abs() < 0.00001);
        }
    }

    #[test]
    fn verify_dct_ii_random() {
        let mut rng = SmallRng::seed_from_u64(42);

        for &n in &[2, 4, 8, 16, 32] {
            let mut dct = Dct::new(n);

            let mut x = [0f32; 32];
            let mut expected = [0f64; 32];
            let mut max = 0.0f64;

            for _ in 0..1000 {
                for s in x[..n].iter_mut() {
                    *s = rng.random_range(-1.0f32..1.0);
                }

                dct_analytical(&x[..n], &mut expected[..n]);
                dct.dct_ii_inplace(&mut x[..n]);

                for (&a, &e) in x[..n].iter().zip(&expected[..n]) {
                    max = max.max((f64::from(a) - e).abs());
                }
            }

            assert!(max < 1.0 / f64::from(1 << 16), "n = {}, max. difference = {}", n, max);
        }
    }
}
