// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Feeds the decoder junk and corrupted streams. Decoding must never panic, and every error must
//! be one of the documented kinds.

use std::io;

use cadenza_bundle_mpa::{MpaDecoder, CH_LEFT, CH_RIGHT};
use cadenza_core::codecs::DecoderOptions;
use cadenza_core::errors::Error;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Yields `len` random bytes.
struct JunkReader {
    rng: SmallRng,
    len: usize,
}

impl io::Read for JunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.len);
        self.rng.fill(&mut buf[..n]);
        self.len -= n;
        Ok(n)
    }
}

/// Flips each bit of the wrapped reader with probability `p`.
struct BitFlipReader<R: io::Read> {
    inner: R,
    rng: SmallRng,
    p: f64,
}

impl<R: io::Read> io::Read for BitFlipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;

        for byte in buf[..n].iter_mut() {
            if self.rng.random_bool(8.0 * self.p) {
                *byte ^= 1u8 << self.rng.random_range(0..8u32);
            }
        }

        Ok(n)
    }
}

/// Decodes until the stream ends, querying every property of each frame. Returns the number of
/// frames decoded successfully.
fn decode_to_end<R: io::Read>(source: R, options: &DecoderOptions) -> usize {
    let mut decoder = MpaDecoder::new(source, options);
    let mut buf = [0f32; 2000];
    let mut n_frames = 0;

    loop {
        match decoder.decode_frame() {
            Ok(_) => n_frames += 1,
            Err(err) if err.is_malformed() => continue,
            Err(Error::EndOfStream) | Err(Error::UnexpectedEndOfStream) => break,
            Err(err) => panic!("unexpected error: {}", err),
        }

        let header = decoder.header().copied().expect("header of a decoded frame");

        assert_eq!(decoder.layer(), Some(header.layer));
        assert_eq!(decoder.bitrate(), header.bitrate());
        assert_eq!(decoder.sampling_frequency(), header.sample_rate());
        assert_eq!(decoder.mode(), Some(header.mode));
        assert_eq!(decoder.copyrighted(), header.is_copyrighted);
        assert_eq!(decoder.original(), header.is_original);
        assert_eq!(decoder.emphasis(), Some(header.emphasis));

        let n_samples = decoder.n_samples();
        assert!(n_samples == 384 || n_samples == 1152);

        for &ch in [CH_LEFT, CH_RIGHT].iter() {
            assert_eq!(decoder.read_samples(ch, &mut buf), n_samples);
            assert!(buf[..n_samples].iter().all(|s| s.abs() <= 1.0));
        }
    }

    n_frames
}

/// Builds a stream of frames with pseudo-random audio data following valid headers, alternating
/// between layers, channel modes, and error protection.
fn synthetic_stream(rng: &mut SmallRng) -> Vec<u8> {
    // (header, frame size) at 128 kbps, 44.1 kHz.
    let frames = [
        (0xffff_40c0u32, 136),
        (0xfffe_4000, 136),
        (0xfffd_80c0, 417),
        (0xfffc_8040, 417),
        (0xfffb_90c0, 417),
        (0xfffa_9060, 417),
        (0xfffb_9000, 417),
    ];

    let mut data = Vec::new();

    for &(header, size) in frames.iter() {
        for _ in 0..8 {
            data.extend_from_slice(&u32::to_be_bytes(header));

            // Mostly zero data, so that not every frame is rejected.
            for _ in 4..size {
                let byte = if rng.random_bool(0.1) { rng.random() } else { 0 };
                data.push(byte);
            }
        }
    }

    data
}

#[test]
fn verify_junk_tolerance() {
    let junk = JunkReader { rng: SmallRng::seed_from_u64(42), len: 1 << 22 };
    decode_to_end(junk, &Default::default());
}

#[test]
fn verify_bit_error_tolerance() {
    let mut rng = SmallRng::seed_from_u64(42);

    let data = synthetic_stream(&mut rng);

    // Without bit errors, every frame is found, though not every one decodes.
    assert!(decode_to_end(&data[..], &Default::default()) > 0);

    for &verify in [false, true].iter() {
        for &p in [1e-4, 1e-3, 1e-2].iter() {
            let source = BitFlipReader { inner: &data[..], rng: SmallRng::seed_from_u64(7), p };
            decode_to_end(source, &DecoderOptions { verify });
        }
    }
}

#[test]
fn verify_truncation_tolerance() {
    let mut rng = SmallRng::seed_from_u64(42);

    let data = synthetic_stream(&mut rng);

    for len in (0..data.len()).step_by(997) {
        decode_to_end(&data[..len], &Default::default());
    }
}
