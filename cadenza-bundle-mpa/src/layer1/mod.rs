// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::{ReadBitsLtr, SourceStream};

use crate::common::*;
use crate::layer12::{dequantize, Quant, SCALEFACTORS};

/// The maximum length of the protected part of a layer 1 frame: a 4-bit allocation for each
/// sub-band of both channels.
const MAX_PROTECTED_LEN: usize = 32;

/// Returns the number of bits covered by the CRC of a layer 1 frame.
fn protected_bits(header: &FrameHeader) -> usize {
    match header.n_channels() {
        1 => 4 * 32,
        _ => {
            let bound = header.bound();
            4 * (2 * bound + (32 - bound))
        }
    }
}

/// Read a 4-bit layer 1 bit allocation.
#[inline(always)]
fn read_allocation<B: ReadBitsLtr>(bs: &mut B) -> Result<Quant> {
    match bs.read_bits_leq32(4)? {
        0 => Ok(Quant::None),
        // The allocation 0b1111 is forbidden.
        15 => decode_error("mpa: invalid layer 1 bit allocation"),
        bits => Ok(Quant::Bits(bits + 1)),
    }
}

/// Layer 1 has no state carried from one frame to the next.
#[derive(Default)]
pub struct Layer1;

impl Layer1 {
    pub fn new() -> Self {
        Layer1
    }
}

impl LayerDecoder for Layer1 {
    fn decode<R: io::Read>(
        &mut self,
        bs: &mut SourceStream<R>,
        header: &FrameHeader,
        crc: Option<FrameCrc>,
        out: &mut [[f32; MAX_SAMPLES_PER_FRAME]; 2],
    ) -> Result<()> {
        let n_channels = header.n_channels();

        // Sub-bands bound..32 are intensity coded: the channels share their bit allocation and
        // samples, but not their scale factors.
        let bound = header.bound();

        // Take a copy of the protected bits before they are consumed.
        let mut protected = [0u8; MAX_PROTECTED_LEN];

        let protected_len = match crc {
            Some(_) => {
                let buf = bs.peek(MAX_PROTECTED_LEN);
                protected[..buf.len()].copy_from_slice(buf);
                buf.len()
            }
            None => 0,
        };

        let mut alloc = [[Quant::None; 32]; 2];

        // Read bit allocations for each non-intensity coded sub-band.
        for sb in 0..bound {
            for ch in 0..n_channels {
                alloc[ch][sb] = read_allocation(bs)?;
            }
        }

        // Read bit allocations for the intensity coded sub-bands.
        for sb in bound..32 {
            let quant = read_allocation(bs)?;

            alloc[0][sb] = quant;
            alloc[1][sb] = quant;
        }

        if let Some(crc) = crc {
            crc.verify(&protected[..protected_len], protected_bits(header))?;
        }

        // Read scale factors for each allocated sub-band.
        let mut scalefacs = [[0.0; 32]; 2];

        for sb in 0..32 {
            for ch in 0..n_channels {
                if alloc[ch][sb].is_allocated() {
                    scalefacs[ch][sb] = SCALEFACTORS[bs.read_bits_leq32(6)? as usize];
                }
            }
        }

        // Decode samples. There are 12 time slots of 32 sub-band samples each.
        for s in 0..12 {
            let slot = 32 * s;

            // Non-intensity coded sub-bands.
            for sb in 0..bound {
                for ch in 0..n_channels {
                    out[ch][slot + sb] = match alloc[ch][sb] {
                        Quant::Bits(bits) => {
                            let raw = bs.read_bits_leq32(bits)?;
                            dequantize(Quant::Bits(bits), raw, scalefacs[ch][sb])
                        }
                        _ => 0.0,
                    };
                }
            }

            // Intensity coded sub-bands. The sample is read once and scaled into each channel.
            for sb in bound..32 {
                match alloc[0][sb] {
                    Quant::Bits(bits) => {
                        let raw = bs.read_bits_leq32(bits)?;

                        for ch in 0..n_channels {
                            out[ch][slot + sb] =
                                dequantize(Quant::Bits(bits), raw, scalefacs[ch][sb]);
                        }
                    }
                    _ => {
                        for ch in 0..n_channels {
                            out[ch][slot + sb] = 0.0;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn reset(&mut self) {}
}
