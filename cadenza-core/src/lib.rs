// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Project Cadenza core: the I/O, DSP and error primitives shared by the Cadenza decoders.

pub mod checksum;
pub mod codecs;
pub mod conv;
pub mod dsp;
pub mod errors;
pub mod io;
