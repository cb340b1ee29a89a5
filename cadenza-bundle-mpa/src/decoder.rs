// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use cadenza_core::codecs::DecoderOptions;
use cadenza_core::errors::{Error, Result};
use cadenza_core::io::{ReadBytes, SourceStream};

use log::{debug, trace};

use crate::common::*;
use crate::header;
use crate::layer1::Layer1;
use crate::layer2::Layer2;
use crate::layer3::Layer3;
use crate::synthesis::{self, SynthesisState};

/// The state of the decoder for the layer of the current frame.
enum LayerState {
    Layer1(Layer1),
    Layer2(Layer2),
    Layer3(Box<Layer3>),
}

impl LayerState {
    fn new(layer: Layer) -> Self {
        match layer {
            Layer::Layer1 => LayerState::Layer1(Layer1::new()),
            Layer::Layer2 => LayerState::Layer2(Layer2::new()),
            Layer::Layer3 => LayerState::Layer3(Box::new(Layer3::new())),
        }
    }

    fn layer(&self) -> Layer {
        match self {
            LayerState::Layer1(_) => Layer::Layer1,
            LayerState::Layer2(_) => Layer::Layer2,
            LayerState::Layer3(_) => Layer::Layer3,
        }
    }

    fn decode<R: io::Read>(
        &mut self,
        bs: &mut SourceStream<R>,
        header: &FrameHeader,
        crc: Option<FrameCrc>,
        out: &mut [[f32; MAX_SAMPLES_PER_FRAME]; 2],
    ) -> Result<()> {
        match self {
            LayerState::Layer1(layer) => layer.decode(bs, header, crc, out),
            LayerState::Layer2(layer) => layer.decode(bs, header, crc, out),
            LayerState::Layer3(layer) => layer.decode(bs, header, crc, out),
        }
    }

    fn reset(&mut self) {
        match self {
            LayerState::Layer1(layer) => layer.reset(),
            LayerState::Layer2(layer) => layer.reset(),
            LayerState::Layer3(layer) => layer.reset(),
        }
    }
}

/// The index of the left (or only) channel.
pub const CH_LEFT: usize = 0;
/// The index of the right channel.
pub const CH_RIGHT: usize = 1;

/// MPEG-1 Layer 1, 2, and 3 decoder.
///
/// `MpaDecoder` reads an MPEG audio elementary stream from `R` one frame at a time. Each call to
/// [`MpaDecoder::decode_frame`] decodes exactly one frame, after which the frame's properties and
/// PCM samples may be queried until the next call.
///
/// The decoder carries state from one frame to the next, so frames must be decoded in stream
/// order.
pub struct MpaDecoder<R: io::Read> {
    bs: SourceStream<R>,
    options: DecoderOptions,
    state: Option<LayerState>,
    /// The header of the last synchronized frame.
    header: Option<FrameHeader>,
    /// True if the last frame was decoded successfully.
    is_valid: bool,
    synthesis: [SynthesisState; 2],
    /// Sub-band samples of the current frame, in time slot order.
    slots: Box<[[f32; MAX_SAMPLES_PER_FRAME]; 2]>,
    /// PCM samples of the current frame.
    pcm: Box<[[f32; MAX_SAMPLES_PER_FRAME]; 2]>,
}

impl<R: io::Read> MpaDecoder<R> {
    /// Instantiate a new decoder reading from `source`.
    pub fn new(source: R, options: &DecoderOptions) -> Self {
        MpaDecoder {
            bs: SourceStream::new(source),
            options: *options,
            state: None,
            header: None,
            is_valid: false,
            synthesis: Default::default(),
            slots: Box::new([[0.0; MAX_SAMPLES_PER_FRAME]; 2]),
            pcm: Box::new([[0.0; MAX_SAMPLES_PER_FRAME]; 2]),
        }
    }

    /// Decode the next frame.
    ///
    /// Returns [`Error::EndOfStream`] once the source is exhausted between frames, and
    /// [`Error::UnexpectedEndOfStream`] if it ends partway through a frame. After a
    /// [`Error::DecodeError`], calling `decode_frame` again resynchronizes to the next frame.
    pub fn decode_frame(&mut self) -> Result<()> {
        self.is_valid = false;

        let (word, header) = header::read_frame_header(&mut self.bs, self.header.as_ref())?;

        self.header = Some(header);

        trace!(
            "mpa: {:?}, {} bps, {} Hz, {:?}, mode extension {}, crc {}",
            header.layer,
            header.bitrate(),
            header.sample_rate(),
            header.mode,
            header.mode_extension,
            header.has_crc,
        );

        // The header is valid, so the stream ending from here on truncates the frame.
        match self.decode_audio_data(word, &header) {
            Err(Error::EndOfStream) => return Err(Error::UnexpectedEndOfStream),
            Err(err) => return Err(err),
            Ok(_) => (),
        }

        let n_samples = header.n_samples();

        for ch in 0..header.n_channels() {
            synthesis::synthesis(
                &mut self.synthesis[ch],
                &self.slots[ch][..n_samples],
                &mut self.pcm[ch][..n_samples],
            );
        }

        self.is_valid = true;

        Ok(())
    }

    /// Decode the audio data that follows the header word `word` into sub-band samples.
    fn decode_audio_data(&mut self, word: u32, header: &FrameHeader) -> Result<()> {
        let start = self.bs.pos() - header::MPEG_HEADER_LEN as u64;

        let crc = if header.has_crc {
            let expected = self.bs.read_be_u16()?;

            if self.options.verify {
                Some(FrameCrc::new(word, expected))
            }
            else {
                None
            }
        }
        else {
            None
        };

        // Each layer has its own decoder. Switching layers starts the new layer afresh.
        let state = match self.state.take() {
            Some(state) if state.layer() == header.layer => self.state.insert(state),
            prev => {
                if prev.is_some() {
                    debug!("mpa: switched to {:?}", header.layer);
                }
                self.state.insert(LayerState::new(header.layer))
            }
        };

        state.decode(&mut self.bs, header, crc, &mut self.slots)?;

        // Skip the ancillary data at the end of layer 1 and 2 frames. Layer 3 loads the entire
        // frame into the bit reservoir.
        if header.layer != Layer::Layer3 {
            if let Some(frame_size) = header.frame_size() {
                let consumed = self.bs.pos() - start;

                if consumed < frame_size as u64 {
                    match self.bs.ignore_bytes(frame_size as u64 - consumed) {
                        // The frame itself is complete, the stream ends in the ancillary data.
                        Err(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => (),
                        Err(err) => return Err(err.into()),
                        Ok(_) => (),
                    }
                }
            }
        }

        Ok(())
    }

    /// Gets the header of the last decoded frame, if the last decode succeeded.
    pub fn header(&self) -> Option<&FrameHeader> {
        if self.is_valid {
            self.header.as_ref()
        }
        else {
            None
        }
    }

    /// Gets the layer of the last decoded frame.
    pub fn layer(&self) -> Option<Layer> {
        self.header().map(|header| header.layer)
    }

    /// Gets the number of samples per channel in the last decoded frame.
    pub fn n_samples(&self) -> usize {
        self.header().map_or(0, |header| header.n_samples())
    }

    /// Gets the bit-rate of the last decoded frame in bits per second, or 0 if it is free format.
    pub fn bitrate(&self) -> u32 {
        self.header().map_or(0, |header| header.bitrate())
    }

    /// Gets the sampling frequency of the last decoded frame in Hz.
    pub fn sampling_frequency(&self) -> u32 {
        self.header().map_or(0, |header| header.sample_rate())
    }

    /// Gets the channel mode of the last decoded frame.
    pub fn mode(&self) -> Option<Mode> {
        self.header().map(|header| header.mode)
    }

    /// Gets the number of channels of the last decoded frame.
    pub fn n_channels(&self) -> usize {
        self.header().map_or(0, |header| header.n_channels())
    }

    pub fn copyrighted(&self) -> bool {
        self.header().map_or(false, |header| header.is_copyrighted)
    }

    pub fn original(&self) -> bool {
        self.header().map_or(false, |header| header.is_original)
    }

    pub fn emphasis(&self) -> Option<Emphasis> {
        self.header().map(|header| header.emphasis)
    }

    /// Copies the PCM samples of channel `ch` of the last decoded frame into `dst`, and returns
    /// the number of samples copied. A channel the frame does not have reads as channel 0, so both
    /// channels of a mono frame may be read as if it were stereo.
    pub fn read_samples(&self, ch: usize, dst: &mut [f32]) -> usize {
        let header = match self.header() {
            Some(header) => header,
            None => return 0,
        };

        let ch = if ch < header.n_channels() { ch } else { CH_LEFT };

        let len = dst.len().min(header.n_samples());
        dst[..len].copy_from_slice(&self.pcm[ch][..len]);
        len
    }

    /// Clears all state carried from one frame to the next. The source is left untouched.
    pub fn reset(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.reset();
        }

        for synthesis in self.synthesis.iter_mut() {
            synthesis.reset();
        }

        self.header = None;
        self.is_valid = false;
    }

    /// Replaces the source with `source`, resets the decoder, and returns the old source.
    pub fn replace_source(&mut self, source: R) -> R {
        debug!("mpa: source replaced, resetting decoder");
        self.reset();
        self.bs.replace_inner(source)
    }

    /// Unwraps the decoder, returning the source. Buffered data is lost.
    pub fn into_inner(self) -> R {
        self.bs.into_inner()
    }
}
