// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dequantization shared by layers 1 and 2.

use lazy_static::lazy_static;

lazy_static! {
    /// Layer 1 and 2 scale factors, `2^(1 - i/3)`. Derived from ISO/IEC 11172-3 Table 3-B.1.
    ///
    /// Index 63 is not in the standard's table, however some encoders use it. It is treated as
    /// silence.
    pub static ref SCALEFACTORS: [f32; 64] = {
        let mut scalefactors = [0f32; 64];

        for (i, sf) in scalefactors.iter_mut().enumerate().take(63) {
            *sf = (1.0 - i as f64 / 3.0).exp2() as f32;
        }

        scalefactors
    };

    /// Requantization constants (C, D) indexed by the number of bits per sample, 2..=16.
    /// Derived from ISO/IEC 11172-3 Tables 3-B.2 and 3-B.4.
    ///
    /// For an nb-bit raw sample `raw`, the fraction `f = raw / 2^(nb-1) - 1` is in [-1, 1), and
    /// the requantized sample is `C * (f + D)`, where:
    ///
    /// C = 2^nb / (2^nb - 1)
    /// D = 2^(1 - nb)
    static ref REQUANTIZE: [(f32, f32); 17] = {
        let mut consts = [(0f32, 0f32); 17];

        for (nb, consts) in consts.iter_mut().enumerate().skip(2) {
            let steps = (1u32 << nb) as f64;
            *consts = ((steps / (steps - 1.0)) as f32, (2.0 / steps) as f32);
        }

        consts
    };
}

/// The quantization of the samples in a sub-band, as decoded from the bit allocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Quant {
    /// No bits are allocated. The sub-band is silent, and no samples or scale factors are coded.
    None,
    /// Each sample is coded separately in the given number of bits (2..=16).
    Bits(u32),
    /// Three consecutive samples share one codeword of the given number of bits (5, 7, or 10)
    /// for 3, 5, and 9 quantization levels respectively. Layer 2 only.
    Grouped(u32),
}

impl Quant {
    /// Returns true if the sub-band carries samples.
    #[inline(always)]
    pub fn is_allocated(&self) -> bool {
        !matches!(self, Quant::None)
    }

    /// For a grouped quantization, returns the number of levels of each sample.
    #[inline(always)]
    pub fn levels(&self) -> u32 {
        match self {
            Quant::Grouped(5) => 3,
            Quant::Grouped(7) => 5,
            Quant::Grouped(10) => 9,
            _ => 0,
        }
    }
}

/// Split a grouped codeword of `levels` levels into its three samples, in time order.
#[inline(always)]
pub fn ungroup(code: u32, levels: u32) -> [u32; 3] {
    [code % levels, (code / levels) % levels, code / levels / levels]
}

/// Dequantize the raw sample `raw` with quantization `quant`, and scale it by `scalefactor`.
///
/// For grouped samples, `raw` is one of the ungrouped samples.
#[inline(always)]
pub fn dequantize(quant: Quant, raw: u32, scalefactor: f32) -> f32 {
    let (nb, c, d) = match quant {
        Quant::None => return 0.0,
        Quant::Bits(nb) => {
            let (c, d) = REQUANTIZE[nb as usize];
            (nb, c, d)
        }
        Quant::Grouped(bits) => {
            // The samples of a grouped codeword are requantized as if they were 2, 3, or 4 bit
            // samples, but C is 2^nb / levels rather than 2^nb / (2^nb - 1).
            let (nb, c) = match bits {
                5 => (2, 4.0 / 3.0),
                7 => (3, 8.0 / 5.0),
                _ => (4, 16.0 / 9.0),
            };
            (nb, c, 0.5)
        }
    };

    let fraction = raw as f32 / (1u32 << (nb - 1)) as f32 - 1.0;

    c * (fraction + d) * scalefactor
}
