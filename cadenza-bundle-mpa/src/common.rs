// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use cadenza_core::checksum::Crc16Ansi;
use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::SourceStream;

use log::warn;

/// The number of audio samples per granule.
pub const SAMPLES_PER_GRANULE: usize = 576;

/// The maximum number of audio samples per channel in a frame.
pub const MAX_SAMPLES_PER_FRAME: usize = 1152;

/// Bit-rate lookup table for layer 1.
const BIT_RATES_L1: [u32; 15] = [
    0, 32_000, 64_000, 96_000, 128_000, 160_000, 192_000, 224_000, 256_000, 288_000, 320_000,
    352_000, 384_000, 416_000, 448_000,
];

/// Bit-rate lookup table for layer 2.
const BIT_RATES_L2: [u32; 15] = [
    0, 32_000, 48_000, 56_000, 64_000, 80_000, 96_000, 112_000, 128_000, 160_000, 192_000, 224_000,
    256_000, 320_000, 384_000,
];

/// Bit-rate lookup table for layer 3.
const BIT_RATES_L3: [u32; 15] = [
    0, 32_000, 40_000, 48_000, 56_000, 64_000, 80_000, 96_000, 112_000, 128_000, 160_000, 192_000,
    224_000, 256_000, 320_000,
];

/// Sample rate lookup table, indexed by the sampling_frequency field.
const SAMPLE_RATES: [u32; 3] = [44_100, 48_000, 32_000];

/// Starting indicies of each scale factor band at various sampling rates for long blocks, derived
/// from ISO/IEC 11172-3 Table B.8. The last entry of each row is the granule length.
pub const SFB_LONG_BANDS: [[usize; 23]; 3] = [
    // 44.1 kHz
    [
        0, 4, 8, 12, 16, 20, 24, 30, 36, 44, 52, 62, 74, 90, 110, 134, 162, 196, 238, 288, 342,
        418, 576,
    ],
    // 48 kHz
    [
        0, 4, 8, 12, 16, 20, 24, 30, 36, 42, 50, 60, 72, 88, 106, 128, 156, 190, 230, 276, 330,
        384, 576,
    ],
    // 32 kHz
    [
        0, 4, 8, 12, 16, 20, 24, 30, 36, 44, 54, 66, 82, 102, 126, 156, 194, 240, 296, 364, 448,
        550, 576,
    ],
];

/// Starting indicies of each scale factor band at various sampling rates for short blocks. Each
/// value must be multiplied by 3 since there are three equal length windows per short scale factor
/// band. The last entry of each row is the window length.
pub const SFB_SHORT_BANDS: [[usize; 14]; 3] = [
    // 44.1 kHz
    [0, 4, 8, 12, 16, 22, 30, 40, 52, 66, 84, 106, 136, 192],
    // 48 kHz
    [0, 4, 8, 12, 16, 22, 28, 38, 50, 64, 80, 100, 126, 192],
    // 32 kHz
    [0, 4, 8, 12, 16, 22, 30, 42, 58, 78, 104, 138, 180, 192],
];

/// The MPEG audio layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Layer {
    /// Layer 1
    Layer1,
    /// Layer 2
    Layer2,
    /// Layer 3
    Layer3,
}

/// The channel mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Stereo channels.
    Stereo,
    /// Joint Stereo encoded channels (decodes to Stereo). The mode extension describes which
    /// features of the stereo encoding are used.
    JointStereo,
    /// Dual mono audio channels.
    DualChannel,
    /// Single mono audio channel.
    Mono,
}

/// The emphasis applied during encoding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Emphasis {
    /// No emphasis
    None,
    /// 50/15us
    Fifty15,
    /// Reserved value, the de-emphasis to use is unknown.
    Reserved,
    /// CCITT J.17
    CcittJ17,
}

/// A MPEG-1 audio frame header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub layer: Layer,
    pub has_crc: bool,
    /// The bitrate_index field. Index 0 signals a free format stream.
    pub bitrate_idx: usize,
    /// The sampling_frequency field.
    pub sample_rate_idx: usize,
    pub has_padding: bool,
    pub mode: Mode,
    /// The mode_extension field. Only meaningful in joint stereo mode.
    pub mode_extension: u32,
    pub is_copyrighted: bool,
    pub is_original: bool,
    pub emphasis: Emphasis,
}

impl FrameHeader {
    /// Returns the bit-rate in bits per second, or 0 for free format frames.
    #[inline(always)]
    pub fn bitrate(&self) -> u32 {
        match self.layer {
            Layer::Layer1 => BIT_RATES_L1[self.bitrate_idx],
            Layer::Layer2 => BIT_RATES_L2[self.bitrate_idx],
            Layer::Layer3 => BIT_RATES_L3[self.bitrate_idx],
        }
    }

    /// Returns the sample rate in Hz.
    #[inline(always)]
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.sample_rate_idx]
    }

    /// Returns true if this a free format frame.
    #[inline(always)]
    pub fn is_free_format(&self) -> bool {
        self.bitrate_idx == 0
    }

    /// Returns the number of channels.
    #[inline(always)]
    pub fn n_channels(&self) -> usize {
        match self.mode {
            Mode::Mono => 1,
            _ => 2,
        }
    }

    /// Returns the number of audio samples per channel in the frame.
    #[inline(always)]
    pub fn n_samples(&self) -> usize {
        match self.layer {
            Layer::Layer1 => 384,
            _ => 1152,
        }
    }

    /// Returns the number of 32 sample time slots in the frame.
    #[inline(always)]
    pub fn n_slots(&self) -> usize {
        self.n_samples() / 32
    }

    /// Returns the total size of the frame in bytes, including the header, or `None` for free
    /// format frames.
    pub fn frame_size(&self) -> Option<usize> {
        if self.is_free_format() {
            return None;
        }

        Some(frame_size(self.layer, self.bitrate(), self.sample_rate(), self.has_padding))
    }

    /// Returns the first sub-band in which the channels share their samples. In layers 1 and 2,
    /// joint stereo is intensity stereo applied to the sub-bands `bound..32`.
    #[inline(always)]
    pub fn bound(&self) -> usize {
        match self.mode {
            Mode::JointStereo => 4 * (self.mode_extension as usize + 1),
            _ => 32,
        }
    }

    /// Returns true if layer 3 mid-side stereo coding is enabled.
    #[inline(always)]
    pub fn is_mid_side_stereo(&self) -> bool {
        self.mode == Mode::JointStereo && self.mode_extension & 0x2 != 0
    }

    /// Returns true if layer 3 intensity stereo coding is enabled.
    #[inline(always)]
    pub fn is_intensity_stereo(&self) -> bool {
        self.mode == Mode::JointStereo && self.mode_extension & 0x1 != 0
    }

    /// Get the layer 3 side information length.
    #[inline(always)]
    pub fn side_info_len(&self) -> usize {
        match self.mode {
            Mode::Mono => 17,
            _ => 32,
        }
    }
}

/// Computes the frame size in bytes as per ISO/IEC 11172-3 section 2.4.3.1. The frame size is
/// given in "slots". For layers 2 & 3 a slot is 1 byte, however for layer 1 a slot is 4 bytes.
pub fn frame_size(layer: Layer, bitrate: u32, sample_rate: u32, has_padding: bool) -> usize {
    let padding = usize::from(has_padding);

    match layer {
        Layer::Layer1 => 4 * ((12 * bitrate / sample_rate) as usize + padding),
        _ => (144 * bitrate / sample_rate) as usize + padding,
    }
}

/// `FrameCrc` verifies the CRC-16 error check word of a protected frame. The check covers the
/// last 16 bits of the header followed by a layer specific number of side information bits.
pub struct FrameCrc {
    crc: Crc16Ansi,
    expected: u16,
}

impl FrameCrc {
    /// Begin verifying the frame with the header word `header` and transmitted check word
    /// `expected`.
    pub fn new(header: u32, expected: u16) -> Self {
        let mut crc = Crc16Ansi::new(0xffff);
        crc.process_bits(header & 0xffff, 16);
        FrameCrc { crc, expected }
    }

    /// Completes the check over the first `n_bits` bits of `protected`.
    pub fn verify(mut self, protected: &[u8], n_bits: usize) -> Result<()> {
        let n_whole = n_bits >> 3;

        if protected.len() < (n_bits + 7) >> 3 {
            // Too little data left to hold the protected bits. Reading them will fail.
            return Ok(());
        }

        self.crc.process_buf_bytes(&protected[..n_whole]);

        let rem = (n_bits & 0x7) as u32;

        if rem > 0 {
            self.crc.process_bits(u32::from(protected[n_whole]) >> (8 - rem), rem);
        }

        if self.crc.crc() != self.expected {
            warn!(
                "mpa: crc mismatch, computed {:#06x}, expected {:#06x}",
                self.crc.crc(),
                self.expected
            );
            return decode_error("mpa: crc check failed");
        }

        Ok(())
    }
}

/// A layer decoder. It decodes the audio data of one frame, following the header and check word,
/// into time-slot ordered sub-band samples: sample `sb` of time slot `s` is stored at index
/// `32 * s + sb`.
pub trait LayerDecoder {
    fn decode<R: io::Read>(
        &mut self,
        bs: &mut SourceStream<R>,
        header: &FrameHeader,
        crc: Option<FrameCrc>,
        out: &mut [[f32; MAX_SAMPLES_PER_FRAME]; 2],
    ) -> Result<()>;

    /// Clears any state carried from one frame to the next.
    fn reset(&mut self);
}
