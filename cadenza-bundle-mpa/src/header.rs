// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use cadenza_core::errors::{decode_error, unexpected_end_of_stream_error, Error, Result};
use cadenza_core::io::{ReadBytes, SourceStream};

use log::debug;

use crate::common::*;

/// The length in bytes of a MPEG frame header word.
pub const MPEG_HEADER_LEN: usize = 4;

/// Quickly check if a header word may be valid.
#[inline]
pub fn check_header(header: u32) -> bool {
    // Sync word.
    if header & 0xfff0_0000 != 0xfff0_0000 {
        return false;
    }
    // Version (only MPEG-1 is allowed).
    if (header >> 19) & 0x1 == 0x0 {
        return false;
    }
    // Layer (0x0 is not allowed).
    if (header >> 17) & 0x3 == 0x0 {
        return false;
    }
    // Bitrate (0xf is not allowed).
    if (header >> 12) & 0xf == 0xf {
        return false;
    }
    // Sample rate (0x3 is not allowed).
    if (header >> 10) & 0x3 == 0x3 {
        return false;
    }
    true
}

/// Returns true if the provided frame header word is synced.
#[inline(always)]
pub fn is_frame_header_word_synced(sync: u32) -> bool {
    (sync & 0xfff0_0000) == 0xfff0_0000
}

pub fn parse_frame_header(header: u32) -> Result<FrameHeader> {
    // The MPEG-1 audio header is structured as follows:
    //
    // 0b1111_1111 0b1111_vlly 0brrrr_hhpx 0bmmnn_coee
    // where:
    //     ll   = layer  , y  = crc (0 if present)
    //     rrrr = bitrate, hh = sample rate, p = padding , x  = private bit
    //     mm   = mode   , nn = mode ext.  , c = copyright, o = original, ee = emphasis
    if !is_frame_header_word_synced(header) {
        return decode_error("mpa: invalid sync word");
    }

    if header & 0x8_0000 == 0 {
        return decode_error("mpa: invalid MPEG version");
    }

    let layer = match (header & 0x6_0000) >> 17 {
        0b01 => Layer::Layer3,
        0b10 => Layer::Layer2,
        0b11 => Layer::Layer1,
        _ => return decode_error("mpa: invalid MPEG layer"),
    };

    let bitrate_idx = match (header & 0xf000) >> 12 {
        0b1111 => return decode_error("mpa: invalid bit-rate"),
        i => i as usize,
    };

    let sample_rate_idx = match (header & 0xc00) >> 10 {
        0b11 => return decode_error("mpa: invalid sample rate"),
        i => i as usize,
    };

    let mode = match (header & 0xc0) >> 6 {
        0b00 => Mode::Stereo,
        0b01 => Mode::JointStereo,
        0b10 => Mode::DualChannel,
        _ => Mode::Mono,
    };

    let emphasis = match header & 0x3 {
        0b00 => Emphasis::None,
        0b01 => Emphasis::Fifty15,
        0b10 => Emphasis::Reserved,
        _ => Emphasis::CcittJ17,
    };

    Ok(FrameHeader {
        layer,
        has_crc: header & 0x1_0000 == 0,
        bitrate_idx,
        sample_rate_idx,
        has_padding: header & 0x200 != 0,
        mode,
        mode_extension: (header & 0x30) >> 4,
        is_copyrighted: header & 0x8 != 0x0,
        is_original: header & 0x4 != 0x0,
        emphasis,
    })
}

/// Returns the frame size of a valid header word, 0 for a free format header, or `None` if the
/// word is not a valid header.
fn header_frame_size(header: u32) -> Option<usize> {
    if !check_header(header) {
        return None;
    }

    parse_frame_header(header).ok().map(|header| header.frame_size().unwrap_or(0))
}

/// Random data can look like a sync word. Increase confidence that the header word just read is
/// the start of a frame by checking that valid headers follow it where the next two frames should
/// begin. Free format frames cannot be located this way, so they are only accepted if
/// `free_format_allowed` is true.
fn is_true_header<R: io::Read>(
    bs: &mut SourceStream<R>,
    header: u32,
    free_format_allowed: bool,
) -> bool {
    let size1 = match header_frame_size(header) {
        Some(0) => return free_format_allowed,
        Some(size) => size,
        None => return false,
    };

    // The header word has already been consumed.
    let next = size1 - MPEG_HEADER_LEN;

    // If the stream ends before the next frame, there is nothing to contradict the header.
    let size2 = match bs.lookahead(next) {
        Some(word) => match header_frame_size(word) {
            Some(0) | None => return false,
            Some(size) => size,
        },
        None => return true,
    };

    match bs.lookahead(next + size2) {
        Some(word) => !matches!(header_frame_size(word), Some(0) | None),
        None => true,
    }
}

/// Synchronize the stream to the end of the next true frame header, and return the frame header
/// word. `prev` is the header of the previous frame, if any.
pub fn sync_frame<R: io::Read>(
    bs: &mut SourceStream<R>,
    prev: Option<&FrameHeader>,
) -> Result<u32> {
    let mut sync = 0u32;
    let mut consumed = 0usize;

    loop {
        // Synchronize stream to the next frame using the sync word. The MPEG audio frame header
        // always starts at a byte boundary with 0xfff (12 consecutive 1 bits.)
        while !is_frame_header_word_synced(sync) {
            let byte = match bs.read_byte() {
                Ok(byte) => byte,
                Err(err) => {
                    return match Error::from(err) {
                        // A partially read header is a truncated frame.
                        Error::EndOfStream if sync & 0xff_f000 == 0xff_f000 => {
                            unexpected_end_of_stream_error()
                        }
                        Error::EndOfStream if sync & 0xfff0 == 0xfff0 => {
                            unexpected_end_of_stream_error()
                        }
                        err => Err(err),
                    };
                }
            };

            consumed += 1;
            sync = (sync << 8) | u32::from(byte);
        }

        // Free format headers have a high false positive rate. Only accept them at the very
        // start of the stream, or if the previous frame was free format too.
        let free_format_allowed =
            consumed == MPEG_HEADER_LEN || prev.map_or(false, |prev| prev.is_free_format());

        if is_true_header(bs, sync, free_format_allowed) {
            break;
        }

        // Resume the search one byte later.
        sync &= 0x00ff_ffff;
    }

    if consumed > MPEG_HEADER_LEN {
        debug!("mpa: skipped {} bytes while searching for a frame header", consumed - 4);
    }

    Ok(sync)
}

/// Synchronize the stream to the start of the next MPEG audio frame header, then read and return
/// the frame header word and the parsed frame header.
pub fn read_frame_header<R: io::Read>(
    bs: &mut SourceStream<R>,
    prev: Option<&FrameHeader>,
) -> Result<(u32, FrameHeader)> {
    let word = sync_frame(bs, prev)?;
    Ok((word, parse_frame_header(word)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Layer 3, no CRC, 128 kbps, 44.1 kHz, unpadded, stereo: 417 bytes per frame.
    const L3_HEADER: u32 = 0xfffb_9000;

    fn frames(header: u32, size: usize, count: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        for _ in 0..count {
            buf.extend_from_slice(&header.to_be_bytes());
            buf.resize(buf.len() + size - 4, 0);
        }
        buf
    }

    #[test]
    fn verify_parse_frame_header() {
        let header = parse_frame_header(0xfffc_a4cd).unwrap();

        assert_eq!(header.layer, Layer::Layer2);
        assert!(header.has_crc);
        assert_eq!(header.bitrate(), 192_000);
        assert_eq!(header.sample_rate(), 48_000);
        assert!(!header.has_padding);
        assert_eq!(header.mode, Mode::Mono);
        assert_eq!(header.mode_extension, 0);
        assert!(header.is_copyrighted);
        assert!(header.is_original);
        assert_eq!(header.emphasis, Emphasis::Fifty15);

        let header = parse_frame_header(0xffff_0a6e).unwrap();

        assert_eq!(header.layer, Layer::Layer1);
        assert!(!header.has_crc);
        assert!(header.is_free_format());
        assert_eq!(header.sample_rate(), 32_000);
        assert!(header.has_padding);
        assert_eq!(header.mode, Mode::JointStereo);
        assert_eq!(header.mode_extension, 2);
        assert_eq!(header.emphasis, Emphasis::Reserved);

        // MPEG-2, reserved layer, bit-rate, and sample rate.
        assert!(parse_frame_header(0xfff3_9000).is_err());
        assert!(parse_frame_header(0xfff9_9000).is_err());
        assert!(parse_frame_header(0xfffb_f000).is_err());
        assert!(parse_frame_header(0xfffb_9c00).is_err());
        assert!(parse_frame_header(0xffeb_9000).is_err());
    }

    #[test]
    fn verify_sync_three_deep() {
        // Junk, then three frames.
        let mut buf = vec![0x12, 0xff, 0xfb, 0x90, 0x77];
        buf.extend(frames(L3_HEADER, 417, 3));

        let mut bs = SourceStream::new(&buf[..]);

        assert_eq!(sync_frame(&mut bs, None).unwrap(), L3_HEADER);
        assert_eq!(bs.pos(), 9);
    }

    #[test]
    fn verify_sync_rejects_broken_chain() {
        // The first sync word is followed by garbage where the second frame should begin.
        let mut buf = frames(L3_HEADER, 417, 1);
        buf.extend_from_slice(&[0x00; 4]);
        let start = buf.len();
        buf.extend(frames(L3_HEADER, 417, 3));

        let mut bs = SourceStream::new(&buf[..]);

        assert_eq!(sync_frame(&mut bs, None).unwrap(), L3_HEADER);
        assert_eq!(bs.pos() as usize, start + 4);
    }

    #[test]
    fn verify_sync_accepts_short_tail() {
        // A single frame at the end of a stream cannot be contradicted.
        let buf = frames(L3_HEADER, 417, 1);
        let mut bs = SourceStream::new(&buf[..]);

        assert_eq!(sync_frame(&mut bs, None).unwrap(), L3_HEADER);

        bs.ignore_bytes(413).unwrap();
        assert!(matches!(sync_frame(&mut bs, None), Err(Error::EndOfStream)));
    }

    #[test]
    fn verify_sync_free_format() {
        // Free format, layer 2, 48 kHz.
        let ff_header = 0xfffd_0400u32;

        let mut buf = vec![0u8; 3];
        buf.extend(frames(ff_header, 200, 3));

        // Not at the start of the stream, and no free format frame before it.
        let mut bs = SourceStream::new(&buf[..]);
        assert!(matches!(sync_frame(&mut bs, None), Err(Error::EndOfStream)));

        // At the start of the stream.
        let mut bs = SourceStream::new(&buf[3..]);
        assert_eq!(sync_frame(&mut bs, None).unwrap(), ff_header);

        // After a free format frame.
        let prev = parse_frame_header(ff_header).unwrap();
        let mut bs = SourceStream::new(&buf[..]);
        assert_eq!(sync_frame(&mut bs, Some(&prev)).unwrap(), ff_header);
        assert_eq!(bs.pos(), 7);
    }

    #[test]
    fn verify_sync_random_data() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let mut rng = SmallRng::seed_from_u64(0x6d70_6131);

        for _ in 0..2000 {
            // Favour 0xff so that sync words, and valid headers, are common.
            let len = rng.random_range(100..6000);
            let buf: Vec<u8> = (0..len)
                .map(|_| if rng.random_bool(0.5) { 0xff } else { rng.random() })
                .collect();

            let mut bs = SourceStream::new(&buf[..]);
            let mut prev = None;

            loop {
                let word = match sync_frame(&mut bs, prev.as_ref()) {
                    Ok(word) => word,
                    Err(Error::EndOfStream) | Err(Error::UnexpectedEndOfStream) => break,
                    Err(err) => panic!("unexpected error: {}", err),
                };

                let header = parse_frame_header(word).unwrap();
                let start = bs.pos() as usize - MPEG_HEADER_LEN;

                // An accepted header with a known size must be followed by another valid header
                // with a known size, unless the stream ends first.
                if let Some(size) = header.frame_size() {
                    let next = start + size;

                    if next + MPEG_HEADER_LEN <= buf.len() {
                        let mut word = [0u8; MPEG_HEADER_LEN];
                        word.copy_from_slice(&buf[next..next + MPEG_HEADER_LEN]);

                        assert!(matches!(
                            header_frame_size(u32::from_be_bytes(word)),
                            Some(size) if size > 0
                        ));
                    }
                }

                prev = Some(header);
            }
        }
    }

    #[test]
    fn verify_sync_truncated_header() {
        let buf = [0x00, 0x00, 0xff, 0xfb];
        let mut bs = SourceStream::new(&buf[..]);
        assert!(matches!(sync_frame(&mut bs, None), Err(Error::UnexpectedEndOfStream)));

        let buf = [0x00, 0x00, 0xff];
        let mut bs = SourceStream::new(&buf[..]);
        assert!(matches!(sync_frame(&mut bs, None), Err(Error::EndOfStream)));

        let buf = [0x00, 0x00, 0x01];
        let mut bs = SourceStream::new(&buf[..]);
        assert!(matches!(sync_frame(&mut bs, None), Err(Error::EndOfStream)));
    }
}
