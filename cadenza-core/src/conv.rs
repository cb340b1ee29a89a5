// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `conv` module provides conversions from normalized floating point samples to integer PCM
//! codes of arbitrary bit width.

// Notes on the converters
//
// A normalized sample `x` lies in [-1.0, 1.0]. It is scaled by 2^(bits-1), rounded half away from
// zero, and then clamped to the range of the target code. Full-scale positive input therefore maps
// to the maximum code rather than wrapping. The arithmetic is performed in `f64` so that 32-bit
// codes are exact.

/// Converts the normalized sample `x` to a signed integer code of `bits` bits.
///
/// `bits` must be in the range 1..=32.
#[inline(always)]
pub fn to_signed(x: f32, bits: u32) -> i32 {
    debug_assert!(bits >= 1 && bits <= 32);

    let scale = (1u64 << (bits - 1)) as f64;
    let max = scale - 1.0;
    let min = -scale;

    let s = (f64::from(x) * scale).round();

    // NaN compares false on both sides and falls through as zero.
    if s >= max {
        max as i32
    }
    else if s <= min {
        min as i32
    }
    else if s.is_nan() {
        0
    }
    else {
        s as i32
    }
}

/// Converts the normalized sample `x` to an unsigned (offset binary) integer code of `bits` bits.
///
/// `bits` must be in the range 1..=32.
#[inline(always)]
pub fn to_unsigned(x: f32, bits: u32) -> u32 {
    debug_assert!(bits >= 1 && bits <= 32);

    let scale = (1u64 << (bits - 1)) as f64;
    let max = 2.0 * scale - 1.0;

    let s = ((f64::from(x) + 1.0) * scale).round();

    if s >= max {
        max as u32
    }
    else if s > 0.0 {
        s as u32
    }
    else {
        0
    }
}
