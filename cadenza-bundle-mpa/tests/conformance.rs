// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ISO/IEC 11172-4 compliance tests.
//!
//! The compliance bitstreams and their reference outputs are not distributed with Cadenza. Place
//! them in `iso11172-4/`, relative to the crate root, to run these tests. Missing streams are
//! skipped.

use std::fs;
use std::path::PathBuf;

use cadenza_bundle_mpa::{MpaDecoder, CH_LEFT, CH_RIGHT};
use cadenza_core::conv::to_signed;
use cadenza_core::errors::Error;

/// Per channel decoded samples, as 24-bit signed integers.
type Pcm = [Vec<i32>; 2];

fn path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("iso11172-4").join(name)
}

/// Reads a file of hexadecimal numbers, one per line.
fn read_hex(name: &str) -> Option<Vec<u32>> {
    let text = match fs::read_to_string(path(name)) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("skipping {}: {}", name, err);
            return None;
        }
    };

    let values = text
        .split_whitespace()
        .map(|word| u32::from_str_radix(word, 16).expect("invalid hex word"))
        .collect();

    Some(values)
}

/// Reads a layer 1 or 2 stream stored as hexadecimal words of `width` bytes.
fn read_hex_stream(name: &str, width: usize) -> Option<Vec<u8>> {
    let words = read_hex(name)?;

    Some(words.iter().flat_map(|word| word.to_be_bytes()[4 - width..].to_vec()).collect())
}

/// Reads a reference output of interleaved 24-bit samples.
fn read_reference(name: &str, n_channels: usize) -> Option<Pcm> {
    let words = read_hex(name)?;

    let mut pcm: Pcm = Default::default();

    for frame in words.chunks(n_channels) {
        for (ch, &word) in frame.iter().enumerate() {
            // Sign extend from 24 bits.
            pcm[ch].push(((word << 8) as i32) >> 8);
        }
    }

    Some(pcm)
}

fn decode(data: &[u8], n_channels: usize) -> Pcm {
    let mut decoder = MpaDecoder::new(data, &Default::default());

    let mut pcm: Pcm = Default::default();
    let mut buf = [0f32; 1152];

    loop {
        match decoder.decode_frame() {
            Ok(_) => (),
            Err(err) if err.is_malformed() => continue,
            Err(Error::EndOfStream) | Err(Error::UnexpectedEndOfStream) => break,
            Err(err) => panic!("decode failed: {}", err),
        }

        for (ch, &channel) in [CH_LEFT, CH_RIGHT].iter().take(n_channels).enumerate() {
            let n_samples = decoder.read_samples(channel, &mut buf);
            pcm[ch].extend(buf[..n_samples].iter().map(|&s| to_signed(s, 24)));
        }
    }

    pcm
}

/// Compares the first `n_samples` of each channel. The RMS error must stay below that of the
/// quantization noise of a 16-bit ALU, multiplied by `k`, and no sample may differ by more than
/// `k` 15-bit LSBs.
fn compare(name: &str, reference: &Pcm, test: &Pcm, n_channels: usize, n_samples: usize, k: f64) {
    let max_rms = 1.0 / (2f64.powi(15) * 12f64.sqrt());
    let max_diff = 2f64.powi(-14);

    for ch in 0..n_channels {
        assert!(
            test[ch].len() >= n_samples,
            "{}: decoded {} samples in channel {}, expected {}",
            name,
            test[ch].len(),
            ch,
            n_samples
        );
        assert!(reference[ch].len() >= n_samples, "{}: short reference", name);

        let mut sum = 0.0;
        let mut max = 0.0f64;

        for (&r, &t) in reference[ch][..n_samples].iter().zip(&test[ch][..n_samples]) {
            let d = (f64::from(r) - f64::from(t)).abs() / f64::from(1 << 23);
            sum += d * d;
            max = max.max(d);
        }

        let rms = (sum / n_samples as f64).sqrt() / max_rms;
        let max = max / max_diff;

        eprintln!("{}: channel {}: rms={:.6}, max={:.6}", name, ch, rms, max);

        assert!(rms < k && max <= k, "{}: channel {} is not compliant", name, ch);
    }
}

fn check_layer12(name: &str, n_channels: usize, n_samples: usize, width: usize) {
    let data = match read_hex_stream(&format!("{}.mpg", name), width) {
        Some(data) => data,
        None => return,
    };

    let reference = match read_reference(&format!("{}.pcm", name), n_channels) {
        Some(reference) => reference,
        None => return,
    };

    compare(name, &reference, &decode(&data, n_channels), n_channels, n_samples, 1.0);
}

fn check_layer3(name: &str, n_channels: usize, n_samples: usize) {
    let data = match fs::read(path(&format!("{}.bit", name))) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("skipping {}: {}", name, err);
            return;
        }
    };

    let reference = match read_reference(&format!("{}.hex", name), n_channels) {
        Some(reference) => reference,
        None => return,
    };

    compare(name, &reference, &decode(&data, n_channels), n_channels, n_samples, 1.0);
}

#[test]
fn verify_layer1_compliance() {
    check_layer12("fl1", 2, 18816, 4);
    check_layer12("fl2", 2, 18816, 4);
    check_layer12("fl3", 2, 18816, 4);
    check_layer12("fl4", 1, 18816, 4);
    check_layer12("fl5", 2, 18816, 4);
    check_layer12("fl6", 2, 18816, 4);
    check_layer12("fl7", 2, 24192, 4);
    check_layer12("fl8", 2, 18816, 4);
}

#[test]
fn verify_layer2_compliance() {
    check_layer12("fl10", 2, 56448, 1);
    check_layer12("fl11", 2, 56448, 1);
    check_layer12("fl12", 2, 56448, 1);
    check_layer12("fl13", 1, 56448, 1);
    check_layer12("fl14", 2, 18432, 1);
    check_layer12("fl15", 2, 18432, 1);
    check_layer12("fl16", 2, 72576, 1);
}

#[test]
fn verify_layer3_compliance() {
    check_layer3("compl", 1, 248832);
    check_layer3("hecommon", 2, 33408);
    check_layer3("he_32khz", 1, 171648);
    check_layer3("he_44khz", 1, 471168);
    check_layer3("he_48khz", 1, 171648);
    check_layer3("he_free", 2, 77184);
    check_layer3("si", 1, 134784);
    check_layer3("si_block", 1, 72576);
    check_layer3("si_huff", 1, 85248);
    check_layer3("sin1k0db", 2, 362880);
}

#[test]
fn verify_layer3_mode_change_compliance() {
    let data = match fs::read(path("he_mode.bit")) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("skipping he_mode: {}", err);
            return;
        }
    };

    // The reference output is a single column of samples, but frames 1-10 and 111-127 are mono
    // while the rest are stereo. Decoded mono frames are read on both channels.
    let column = match read_reference("he_mode.hex", 1) {
        Some(column) => column,
        None => return,
    };

    let n_samples = 127 * 1152;

    let mut reference: Pcm = Default::default();
    let mut samples = column[0].iter();

    for frame in 1..=127 {
        let is_mono = frame <= 10 || frame >= 111;

        for _ in 0..1152 {
            let left = samples.next().copied().unwrap_or(0);
            let right = if is_mono { left } else { samples.next().copied().unwrap_or(0) };

            reference[0].push(left);
            reference[1].push(right);
        }
    }

    // The reference decoder does not apply alias reduction to the long sub-bands of mixed
    // blocks, so allow a 6x larger error.
    compare("he_mode", &reference, &decode(&data, 2), 2, n_samples, 6.0);
}
