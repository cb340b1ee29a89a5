// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::io;
use std::ops::Range;

use cadenza_core::errors::{decode_error, Error, Result};
use cadenza_core::io::{BitReaderLtr, SourceStream};

use log::warn;

use crate::common::*;
use crate::reservoir::BitReservoir;

mod bitstream;
mod codebooks;
mod hybrid_synthesis;
mod requantize;
mod stereo;

/// The maximum length of the side information, which is entirely protected by the CRC.
const MAX_SIDE_INFO_LEN: usize = 32;

/// The block type of a granule channel. The block type selects the window used by the IMDCT.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BlockType {
    // Default case when window switching is off. Also the normal case when window switching is
    // on. Granule contains one long block.
    Long,
    Start,
    // Granule contains three short blocks, or a long block for the two lowest sub-bands followed
    // by short blocks if the mixed block flag is set.
    Short,
    End,
}

impl BlockType {
    /// The block_type field value.
    fn as_index(self) -> usize {
        match self {
            BlockType::Long => 0,
            BlockType::Start => 1,
            BlockType::Short => 2,
            BlockType::End => 3,
        }
    }
}

/// `FrameData` contains the side_info and main_data portions of a MPEG audio frame.
///
/// The frame data outlives a frame. Scale factors that are not transmitted in a frame keep their
/// previous values.
#[derive(Default, Debug)]
struct FrameData {
    /// The byte offset into the bit reservoir indicating the location of the first bit of
    /// main_data. If 0, main_data begins after the side_info of this frame.
    main_data_begin: u16,
    /// Scale factor selector information, per channel. Each channel has 4 groups of bands that
    /// may be scaled in each granule. Scale factors may optionally be used by both granules to
    /// save bits. Bands that share scale factors for both granules are indicated by a true.
    ///
    /// Mapping of array indicies to bands [0..6, 6..11, 11..16, 16..21].
    scfsi: [[bool; 4]; 2],
    /// The granules.
    granules: [Granule; 2],
}

#[derive(Default, Debug)]
struct Granule {
    /// Channels in the granule.
    channels: [GranuleChannel; 2],
}

struct GranuleChannel {
    /// Total number of bits used for scale factors (part2) and Huffman encoded data (part3).
    part2_3_length: u16,
    /// HALF the number of samples in the big_values partition.
    big_values: u16,
    /// Logarithmic quantization step size.
    global_gain: u8,
    /// A 4-bit index into `SCALE_FACTOR_SLEN` for the number of bits per scale factor.
    scalefac_compress: u8,
    /// If set, the block type is signalled explicitly and the big_values regions are implicit.
    window_switching: bool,
    block_type: BlockType,
    /// The two lowest sub-bands form a long block, while the rest are short blocks. Only
    /// meaningful with window switching.
    is_mixed: bool,
    /// The Huffman table to use for decoding `region[0..3]` of big_values.
    table_select: [u8; 3],
    /// Gain factors for each short window. Each gain factor has a maximum value of 7 (3 bits).
    subblock_gain: [u8; 3],
    /// The number of long scale factor bands in region0, minus 1.
    region0_count: u8,
    /// The number of long scale factor bands in region1, minus 1.
    region1_count: u8,
    /// Indicates if the pre-emphasis amount for each scale factor band should be added on to
    /// each scale factor before requantization.
    preflag: bool,
    /// A 0.5x (false) or 1x (true) multiplier for scale factors.
    scalefac_scale: bool,
    /// Use Huffman Quads table A (false) or B (true), for decoding the count1 partition.
    count1table_select: bool,
    /// Long window scale factors, per scale factor band.
    scalefac_l: [u8; 21],
    /// Short window scale factors, per scale factor band and window.
    scalefac_s: [[u8; 3]; 12],
}

impl GranuleChannel {
    /// Returns the range of long scale factor bands, and the range of short scale factor bands,
    /// that make up the granule channel.
    fn sfb_ranges(&self) -> (Range<usize>, Range<usize>) {
        match self.block_type {
            BlockType::Short if self.is_mixed => (0..8, 3..13),
            BlockType::Short => (22..22, 0..13),
            _ => (0..22, 13..13),
        }
    }
}

impl Default for GranuleChannel {
    fn default() -> Self {
        GranuleChannel {
            part2_3_length: 0,
            big_values: 0,
            global_gain: 0,
            scalefac_compress: 0,
            window_switching: false,
            block_type: BlockType::Long,
            is_mixed: false,
            table_select: [0; 3],
            subblock_gain: [0; 3],
            region0_count: 0,
            region1_count: 0,
            preflag: false,
            scalefac_scale: false,
            count1table_select: false,
            scalefac_l: [0; 21],
            scalefac_s: [[0; 3]; 12],
        }
    }
}

impl fmt::Debug for GranuleChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GranuleChannel {{")?;
        writeln!(f, "\tpart2_3_length={}", self.part2_3_length)?;
        writeln!(f, "\tbig_values={}", self.big_values)?;
        writeln!(f, "\tglobal_gain={}", self.global_gain)?;
        writeln!(f, "\tscalefac_compress={}", self.scalefac_compress)?;
        writeln!(f, "\twindow_switching={}", self.window_switching)?;
        writeln!(f, "\tblock_type={:?}", self.block_type)?;
        writeln!(f, "\tis_mixed={}", self.is_mixed)?;
        writeln!(f, "\ttable_select={:?}", self.table_select)?;
        writeln!(f, "\tsubblock_gain={:?}", self.subblock_gain)?;
        writeln!(f, "\tregion0_count={}", self.region0_count)?;
        writeln!(f, "\tregion1_count={}", self.region1_count)?;
        writeln!(f, "\tpreflag={}", self.preflag)?;
        writeln!(f, "\tscalefac_scale={}", self.scalefac_scale)?;
        writeln!(f, "\tcount1table_select={}", self.count1table_select)?;
        writeln!(f, "\tscalefac_l={:?}", self.scalefac_l)?;
        writeln!(f, "\tscalefac_s={:?}", self.scalefac_s)?;
        writeln!(f, "}}")
    }
}

/// Reads the main_data portion of a MPEG audio frame from the bit reservoir into `FrameData`, and
/// the Huffman decoded spectral samples into `samples`.
fn read_main_data(
    header: &FrameHeader,
    main_data: &[u8],
    frame_data: &mut FrameData,
    samples: &mut [[[f32; 576]; 2]; 2],
) -> Result<()> {
    let mut bs = BitReaderLtr::new(main_data);

    for gr in 0..2 {
        for ch in 0..header.n_channels() {
            // Read the scale factors (part2) and get the number of bits read.
            let part2_len = bitstream::read_scale_factors(&mut bs, gr, ch, frame_data)?;

            requantize::read_huffman_samples(
                &mut bs,
                header,
                &frame_data.granules[gr].channels[ch],
                part2_len,
                &mut samples[gr][ch],
            )?;
        }
    }

    Ok(())
}

/// Convert the errors of a bit reader over the main data into decode errors. The main data is
/// entirely buffered, therefore reading past its end indicates bad side information rather than
/// the end of the stream.
fn main_data_error(err: Error) -> Error {
    match err {
        Error::IoError(err) if err.kind() == io::ErrorKind::Other => {
            Error::DecodeError("mpa: reservoir overread")
        }
        Error::IoError(err) if err.kind() == io::ErrorKind::InvalidData => {
            Error::DecodeError("mpa: invalid huffman code")
        }
        err => err,
    }
}

/// The layer 3 decoder state.
pub struct Layer3 {
    frame_data: FrameData,
    reservoir: BitReservoir,
    /// Spectral samples, per granule and channel.
    samples: Box<[[[f32; 576]; 2]; 2]>,
    /// IMDCT overlap, per channel and sub-band.
    overlap: Box<[[[f32; 18]; 32]; 2]>,
}

impl Layer3 {
    pub fn new() -> Self {
        Layer3 {
            frame_data: Default::default(),
            reservoir: BitReservoir::new(),
            samples: Box::new([[[0.0; 576]; 2]; 2]),
            overlap: Box::new([[[0.0; 18]; 32]; 2]),
        }
    }

    /// Move the main data of the frame into the bit reservoir, and rewind the reservoir to the
    /// start of the main data of the frame.
    fn update_reservoir<R: io::Read>(
        &mut self,
        bs: &mut SourceStream<R>,
        header: &FrameHeader,
    ) -> Result<()> {
        // The main data of this frame must be loaded even if the reservoir holds too little data
        // for the main data to begin where it should. The next frame may need it.
        let rewind = self.reservoir.set_size(usize::from(self.frame_data.main_data_begin));

        match header.frame_size() {
            Some(frame_size) => {
                let crc_len = if header.has_crc { 2 } else { 0 };

                let len = frame_size.saturating_sub(4 + crc_len + header.side_info_len());

                self.reservoir.load(bs, len)?;
            }
            None => self.reservoir.load_until_syncword(bs)?,
        }

        if rewind.is_err() {
            warn!(
                "mpa: main data begins {} bytes back, but only {} are buffered",
                self.frame_data.main_data_begin,
                self.reservoir.main_data().len()
            );
        }

        rewind
    }
}

impl Default for Layer3 {
    fn default() -> Self {
        Layer3::new()
    }
}

impl LayerDecoder for Layer3 {
    fn decode<R: io::Read>(
        &mut self,
        bs: &mut SourceStream<R>,
        header: &FrameHeader,
        crc: Option<FrameCrc>,
        out: &mut [[f32; MAX_SAMPLES_PER_FRAME]; 2],
    ) -> Result<()> {
        let side_info_len = header.side_info_len();

        // Take a copy of the side information before it is consumed. It is entirely protected.
        let mut protected = [0u8; MAX_SIDE_INFO_LEN];

        let protected_len = match crc {
            Some(_) => {
                let buf = bs.peek(side_info_len);
                protected[..buf.len()].copy_from_slice(buf);
                buf.len()
            }
            None => 0,
        };

        bitstream::read_side_info(bs, header, &mut self.frame_data)?;

        self.update_reservoir(bs, header)?;

        if let Some(crc) = crc {
            crc.verify(&protected[..protected_len], 8 * side_info_len)?;
        }

        // Window switching with a long block is forbidden. It is only reported after the reservoir
        // is updated so that the decoder remains in sync.
        for granule in self.frame_data.granules.iter() {
            for channel in &granule.channels[..header.n_channels()] {
                if channel.window_switching && channel.block_type == BlockType::Long {
                    return decode_error("mpa: window switching with a long block");
                }
            }
        }

        read_main_data(header, self.reservoir.main_data(), &mut self.frame_data, &mut self.samples)
            .map_err(main_data_error)?;

        for gr in 0..2 {
            let granule = &self.frame_data.granules[gr];
            let samples = &mut self.samples[gr];

            for ch in 0..header.n_channels() {
                requantize::requantize(header, &granule.channels[ch], &mut samples[ch]);
            }

            if header.n_channels() == 2 {
                stereo::stereo(header, granule, samples);
            }

            for ch in 0..header.n_channels() {
                let channel = &granule.channels[ch];

                // Reorder the spectral samples in short blocks into sub-band order.
                hybrid_synthesis::reorder(header, channel, &mut samples[ch]);

                // Apply the anti-aliasing filter to all block types other than short.
                hybrid_synthesis::antialias(channel, &mut samples[ch]);

                // Perform hybrid-synthesis (IMDCT and windowing).
                hybrid_synthesis::hybrid_synthesis(
                    channel,
                    &mut self.overlap[ch],
                    &mut samples[ch],
                );

                // Invert every second sample in every second sub-band to negate the frequency
                // inversion of the polyphase filterbank.
                hybrid_synthesis::frequency_inversion(&mut samples[ch]);

                // Transpose the granule from sub-band order into time slot order.
                let slots = &mut out[ch][gr * SAMPLES_PER_GRANULE..(gr + 1) * SAMPLES_PER_GRANULE];

                for (sb, sub_band) in samples[ch].chunks_exact(18).enumerate() {
                    for (t, &sample) in sub_band.iter().enumerate() {
                        slots[32 * t + sb] = sample;
                    }
                }
            }
        }

        Ok(())
    }

    fn reset(&mut self) {
        self.frame_data = Default::default();
        self.reservoir.clear();
        *self.overlap = [[[0.0; 18]; 32]; 2];
    }
}
