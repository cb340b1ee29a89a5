// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by Cadenza.
#[derive(Debug)]
pub enum Error {
    /// An IO error occured while reading the stream.
    IoError(std::io::Error),
    /// The stream contained malformed data and the current frame could not be decoded. Decoding
    /// may resume by simply decoding the next frame.
    DecodeError(&'static str),
    /// The stream ended cleanly on a frame boundary.
    EndOfStream,
    /// The stream ended in the middle of a frame.
    UnexpectedEndOfStream,
    /// The underlying source repeatedly returned no data.
    NoProgress,
}

impl Error {
    /// Returns true if the error only affects the current frame, and the next frame may be
    /// decoded normally.
    pub fn is_malformed(&self) -> bool {
        matches!(*self, Error::DecodeError(_))
    }

    /// Returns true if the error signals the end of the stream, whether clean or not.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(*self, Error::EndOfStream | Error::UnexpectedEndOfStream)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IoError(ref err) => err.fmt(f),
            Error::DecodeError(msg) => {
                write!(f, "malformed stream: {}", msg)
            }
            Error::EndOfStream => {
                write!(f, "end of stream")
            }
            Error::UnexpectedEndOfStream => {
                write!(f, "unexpected end of stream")
            }
            Error::NoProgress => {
                write!(f, "multiple reads returned no data")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::EndOfStream,
            _ if is_no_progress(&err) => Error::NoProgress,
            _ => Error::IoError(err),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::IoError(err) => err,
            Error::DecodeError(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            Error::EndOfStream | Error::UnexpectedEndOfStream => {
                io::Error::new(io::ErrorKind::UnexpectedEof, err.to_string())
            }
            Error::NoProgress => no_progress_io_error(),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Marker payload of the `io::Error` returned when a source stops making progress.
#[derive(Debug)]
struct NoProgress;

impl fmt::Display for NoProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "multiple reads returned no data")
    }
}

impl error::Error for NoProgress {}

fn is_no_progress(err: &io::Error) -> bool {
    err.get_ref().map_or(false, |inner| inner.is::<NoProgress>())
}

/// Creates the `io::Error` a stream returns when its source repeatedly yields no data.
pub fn no_progress_io_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, NoProgress)
}

/// Convenience function to create a decode error.
pub fn decode_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::DecodeError(desc))
}

/// Convenience function to create an end-of-stream error.
pub fn end_of_stream_error<T>() -> Result<T> {
    Err(Error::EndOfStream)
}

/// Convenience function to create an unexpected end-of-stream error.
pub fn unexpected_end_of_stream_error<T>() -> Result<T> {
    Err(Error::UnexpectedEndOfStream)
}
