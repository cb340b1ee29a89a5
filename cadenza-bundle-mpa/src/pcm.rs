// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `pcm` module converts decoded audio into interleaved integer PCM.

use std::cmp::min;
use std::io;

use cadenza_core::conv::{to_signed, to_unsigned};
use cadenza_core::errors::Error;

use log::debug;

use crate::common::MAX_SAMPLES_PER_FRAME;
use crate::decoder::{MpaDecoder, CH_LEFT, CH_RIGHT};

/// An integer PCM sample format.
///
/// Formats suffixed with `3` store their sample in a 3 byte container. `S24Le`, `S24Be`, `U24Le`,
/// and `U24Be` store a 24-bit sample in a 4 byte container.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    S8,
    U8,
    S16Le,
    S16Be,
    U16Le,
    U16Be,
    S18Le3,
    S18Be3,
    U18Le3,
    U18Be3,
    S20Le3,
    S20Be3,
    U20Le3,
    U20Be3,
    S24Le3,
    S24Be3,
    U24Le3,
    U24Be3,
    S24Le,
    S24Be,
    U24Le,
    U24Be,
    S32Le,
    S32Be,
    U32Le,
    U32Be,
}

impl SampleFormat {
    /// Gets the number of significant bits of a sample.
    pub fn bits(&self) -> u32 {
        use SampleFormat::*;

        match self {
            S8 | U8 => 8,
            S16Le | S16Be | U16Le | U16Be => 16,
            S18Le3 | S18Be3 | U18Le3 | U18Be3 => 18,
            S20Le3 | S20Be3 | U20Le3 | U20Be3 => 20,
            S24Le3 | S24Be3 | U24Le3 | U24Be3 | S24Le | S24Be | U24Le | U24Be => 24,
            S32Le | S32Be | U32Le | U32Be => 32,
        }
    }

    /// Gets the number of bytes a sample occupies.
    pub fn bytes_per_sample(&self) -> usize {
        use SampleFormat::*;

        match self {
            S8 | U8 => 1,
            S16Le | S16Be | U16Le | U16Be => 2,
            S18Le3 | S18Be3 | U18Le3 | U18Be3 => 3,
            S20Le3 | S20Be3 | U20Le3 | U20Be3 => 3,
            S24Le3 | S24Be3 | U24Le3 | U24Be3 => 3,
            S24Le | S24Be | U24Le | U24Be => 4,
            S32Le | S32Be | U32Le | U32Be => 4,
        }
    }

    /// Returns true if samples are two's complement signed integers.
    pub fn is_signed(&self) -> bool {
        use SampleFormat::*;

        matches!(
            self,
            S8 | S16Le
                | S16Be
                | S18Le3
                | S18Be3
                | S20Le3
                | S20Be3
                | S24Le3
                | S24Be3
                | S24Le
                | S24Be
                | S32Le
                | S32Be
        )
    }

    /// Returns true if samples are stored most significant byte first.
    pub fn is_big_endian(&self) -> bool {
        use SampleFormat::*;

        matches!(
            self,
            S16Be
                | U16Be
                | S18Be3
                | U18Be3
                | S20Be3
                | U20Be3
                | S24Be3
                | U24Be3
                | S24Be
                | U24Be
                | S32Be
                | U32Be
        )
    }

    /// Converts the normalized sample `x` and writes it to the start of `dst`.
    fn write(&self, x: f32, dst: &mut [u8]) {
        let bits = self.bits();
        let size = self.bytes_per_sample();

        let code = if self.is_signed() { to_signed(x, bits) as u32 } else { to_unsigned(x, bits) };

        if self.is_big_endian() {
            dst[..size].copy_from_slice(&code.to_be_bytes()[4 - size..]);
        }
        else {
            dst[..size].copy_from_slice(&code.to_le_bytes()[..size]);
        }
    }
}

/// Options for [`PcmReader`].
#[derive(Copy, Clone, Debug, Default)]
pub struct PcmOptions {
    /// Only emit the first channel.
    pub mono: bool,
    /// Exchange the left and right channels.
    pub swap: bool,
}

/// `PcmReader` decodes an MPEG audio stream into interleaved integer PCM, read through
/// [`std::io::Read`].
///
/// Unless [`PcmOptions::mono`] is set, two channels are always produced. The single channel of a
/// mono frame is emitted on both. Malformed frames are skipped, and the end of the MPEG audio
/// stream, truncated or not, is the end of the PCM stream.
pub struct PcmReader<R: io::Read> {
    decoder: MpaDecoder<R>,
    format: SampleFormat,
    options: PcmOptions,
    samples: Box<[[f32; MAX_SAMPLES_PER_FRAME]; 2]>,
    buf: Vec<u8>,
    pos: usize,
    is_done: bool,
}

impl<R: io::Read> PcmReader<R> {
    pub fn new(decoder: MpaDecoder<R>, format: SampleFormat, options: PcmOptions) -> Self {
        PcmReader {
            decoder,
            format,
            options,
            samples: Box::new([[0.0; MAX_SAMPLES_PER_FRAME]; 2]),
            buf: Vec::new(),
            pos: 0,
            is_done: false,
        }
    }

    /// Gets the number of interleaved channels produced.
    pub fn n_channels(&self) -> usize {
        if self.options.mono {
            1
        }
        else {
            2
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Gets a reference to the decoder.
    pub fn decoder(&self) -> &MpaDecoder<R> {
        &self.decoder
    }

    /// Unwraps the reader, returning the decoder. Buffered PCM is lost.
    pub fn into_inner(self) -> MpaDecoder<R> {
        self.decoder
    }

    /// Decode the next frame into the PCM buffer. The buffer is left empty if the frame was
    /// skipped or the stream ended.
    fn fill(&mut self) -> io::Result<()> {
        self.buf.clear();
        self.pos = 0;

        match self.decoder.decode_frame() {
            Ok(_) => (),
            Err(Error::EndOfStream) | Err(Error::UnexpectedEndOfStream) => {
                self.is_done = true;
                return Ok(());
            }
            Err(err) if err.is_malformed() => {
                debug!("mpa: skipping frame: {}", err);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        let (first, second) =
            if self.options.swap { (CH_RIGHT, CH_LEFT) } else { (CH_LEFT, CH_RIGHT) };

        let n_channels = self.n_channels();

        let [samples0, samples1] = &mut *self.samples;

        let n_samples = self.decoder.read_samples(first, samples0);
        self.decoder.read_samples(second, samples1);

        let size = self.format.bytes_per_sample();

        self.buf.resize(n_samples * n_channels * size, 0);

        for (i, frame) in self.buf.chunks_exact_mut(n_channels * size).enumerate() {
            self.format.write(samples0[i], &mut frame[..size]);

            if n_channels == 2 {
                self.format.write(samples1[i], &mut frame[size..]);
            }
        }

        Ok(())
    }
}

impl<R: io::Read> io::Read for PcmReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.pos == self.buf.len() {
            if self.is_done {
                return Ok(0);
            }
            self.fill()?;
        }

        let len = min(buf.len(), self.buf.len() - self.pos);

        buf[..len].copy_from_slice(&self.buf[self.pos..self.pos + len]);
        self.pos += len;

        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Read;

    fn write(format: SampleFormat, x: f32) -> Vec<u8> {
        let mut buf = vec![0; format.bytes_per_sample()];
        format.write(x, &mut buf);
        buf
    }

    #[test]
    fn verify_sample_format_write() {
        use SampleFormat::*;

        assert_eq!(write(S8, 1.0), [0x7f]);
        assert_eq!(write(S8, -1.0), [0x80]);
        assert_eq!(write(U8, 0.0), [0x80]);
        assert_eq!(write(U8, -1.0), [0x00]);
        assert_eq!(write(U8, 1.0), [0xff]);

        assert_eq!(write(S16Le, 1.0), [0xff, 0x7f]);
        assert_eq!(write(S16Be, 1.0), [0x7f, 0xff]);
        assert_eq!(write(S16Le, -1.0), [0x00, 0x80]);
        assert_eq!(write(S16Le, -0.5), [0x00, 0xc0]);
        assert_eq!(write(U16Be, 0.0), [0x80, 0x00]);

        assert_eq!(write(S18Be3, 1.0), [0x01, 0xff, 0xff]);
        assert_eq!(write(S18Le3, -1.0), [0x00, 0x00, 0xfe]);
        assert_eq!(write(U20Le3, 1.0), [0xff, 0xff, 0x0f]);
        assert_eq!(write(S24Be3, -1.0), [0x80, 0x00, 0x00]);
        assert_eq!(write(U24Le3, 0.0), [0x00, 0x00, 0x80]);

        // 24-bit samples in a 4 byte container are sign extended.
        assert_eq!(write(S24Le, -1.0), [0x00, 0x00, 0x80, 0xff]);
        assert_eq!(write(S24Be, 1.0), [0x00, 0x7f, 0xff, 0xff]);
        assert_eq!(write(U24Be, 1.0), [0x00, 0xff, 0xff, 0xff]);

        assert_eq!(write(S32Le, 1.0), [0xff, 0xff, 0xff, 0x7f]);
        assert_eq!(write(S32Be, -1.0), [0x80, 0x00, 0x00, 0x00]);
        assert_eq!(write(U32Be, 1.0), [0xff, 0xff, 0xff, 0xff]);
        assert_eq!(write(U32Le, -1.0), [0x00, 0x00, 0x00, 0x00]);
    }

    /// Layer 3, no CRC, 128 kbps, 44.1 kHz, unpadded, mono: 417 bytes per frame.
    const L3_MONO: u32 = 0xfffb_90c0;
    /// Layer 3, no CRC, 128 kbps, 44.1 kHz, unpadded, stereo: 417 bytes per frame.
    const L3_STEREO: u32 = 0xfffb_9000;

    fn silent_frames(header: u32, count: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for _ in 0..count {
            data.extend_from_slice(&header.to_be_bytes());
            data.resize(data.len() + 417 - 4, 0);
        }
        data
    }

    fn read_all(data: &[u8], format: SampleFormat, options: PcmOptions) -> Vec<u8> {
        let decoder = MpaDecoder::new(data, &Default::default());
        let mut reader = PcmReader::new(decoder, format, options);

        let mut pcm = Vec::new();
        reader.read_to_end(&mut pcm).unwrap();
        pcm
    }

    #[test]
    fn verify_pcm_reader_stereo() {
        let data = silent_frames(L3_STEREO, 3);

        let pcm = read_all(&data, SampleFormat::S16Le, Default::default());
        assert_eq!(pcm.len(), 3 * 1152 * 2 * 2);
        assert!(pcm.iter().all(|&b| b == 0));

        let pcm = read_all(&data, SampleFormat::U8, PcmOptions { mono: true, swap: false });
        assert_eq!(pcm.len(), 3 * 1152);
        assert!(pcm.iter().all(|&b| b == 0x80));
    }

    #[test]
    fn verify_pcm_reader_mono_frames() {
        let data = silent_frames(L3_MONO, 2);

        // Mono frames are emitted on both channels.
        let pcm = read_all(&data, SampleFormat::S24Le3, PcmOptions { mono: false, swap: true });
        assert_eq!(pcm.len(), 2 * 1152 * 2 * 3);
    }

    #[test]
    fn verify_pcm_reader_truncated() {
        let mut data = silent_frames(L3_STEREO, 2);
        data.truncate(417 + 100);

        // The truncated frame ends the stream.
        let pcm = read_all(&data, SampleFormat::S32Be, Default::default());
        assert_eq!(pcm.len(), 1152 * 2 * 4);
    }

    #[test]
    fn verify_pcm_reader_small_reads() {
        let data = silent_frames(L3_STEREO, 1);

        let decoder = MpaDecoder::new(&data[..], &Default::default());
        let mut reader = PcmReader::new(decoder, SampleFormat::U16Be, Default::default());

        let mut total = 0;
        let mut buf = [0u8; 7];

        loop {
            let len = reader.read(&mut buf).unwrap();
            if len == 0 {
                break;
            }
            assert!(buf[..len].iter().enumerate().all(|(i, &b)| {
                if (total + i) % 2 == 0 {
                    b == 0x80
                }
                else {
                    b == 0x00
                }
            }));
            total += len;
        }

        assert_eq!(total, 1152 * 2 * 2);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
