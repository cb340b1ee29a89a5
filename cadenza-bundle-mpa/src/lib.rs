// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A pure Rust MPEG-1 Audio Layer I, II, and III decoder.
//!
//! [`MpaDecoder`] decodes an elementary stream one frame at a time into normalized floating point
//! samples. [`PcmReader`] adapts it into an [`std::io::Read`] of interleaved integer PCM.

// Shared modules.
mod common;
mod header;

// Decoder modules.
mod decoder;
mod pcm;
mod synthesis;

// Shared layer 1 & 2 decoder support module.
mod layer12;

// Layer-specific decoder support modules.
mod layer1;
mod layer2;
mod layer3;

// Layer 3 bit reservoir.
mod reservoir;

pub use common::{Emphasis, FrameHeader, Layer, Mode};
pub use decoder::{MpaDecoder, CH_LEFT, CH_RIGHT};
pub use pcm::{PcmOptions, PcmReader, SampleFormat};
