//! Writer for HEIF (ISO/IEC 23008-12) image files.
//!
//! Takes HEVC or AVC elementary streams in Annex-B form plus a declarative
//! [`Configuration`] describing images, their relationships (thumbnails,
//! auxiliary images, derivations, metadata, entity groups) and optional track
//! encapsulation, and writes a complete ISO Base Media File Format file in
//! one pass.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[macro_use]
extern crate log;

use std::convert::TryInto as _;
use std::path::PathBuf;

#[macro_use]
mod macros;

pub mod bitstream;
pub mod boxes;
pub mod codec;
pub mod config;
mod fourcc;
pub mod readback;
mod store;
mod writers;

pub use crate::config::Configuration;
pub use crate::fourcc::FourCC;
pub use crate::writers::planner::{write_file, write_file_to};

/// A trait to indicate a type can be infallibly converted to `u64`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
trait ToU64 {
    fn to_u64(self) -> u64;
}

/// Statically verify that the platform `usize` can fit within a `u64`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail TryInto<usize> is used, it may panic.
impl ToU64 for usize {
    fn to_u64(self) -> u64 {
        static_assertions::const_assert!(
            std::mem::size_of::<usize>() <= std::mem::size_of::<u64>()
        );
        self.try_into().expect("usize -> u64 conversion failed")
    }
}

/// A trait to indicate a type can be infallibly converted to `usize`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToUsize {
    fn to_usize(self) -> usize;
}

/// Statically verify that the given type can fit within a `usize`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail TryInto<usize> is used, it may panic.
macro_rules! impl_to_usize_from {
    ( $from_type:ty ) => {
        impl ToUsize for $from_type {
            fn to_usize(self) -> usize {
                static_assertions::const_assert!(
                    std::mem::size_of::<$from_type>() <= std::mem::size_of::<usize>()
                );
                self.try_into().expect(concat!(
                    stringify!($from_type),
                    " -> usize conversion failed"
                ))
            }
        }
    };
}

impl_to_usize_from!(u8);
impl_to_usize_from!(u16);
impl_to_usize_from!(u32);

/// Describes writer failures.
///
/// This enum wraps the standard `io::Error` type, unified with
/// our own validation and layout error states and those of crates we use.
#[derive(Debug)]
pub enum Error {
    /// The configuration failed validation.
    ConfigInvalid(String),
    /// A reference cited a `uniq_bsid` no declared content carries.
    UnresolvedReference(u32),
    /// Open/read/write failure on a named file.
    FileIo(PathBuf, std::io::Error),
    /// Malformed bitstream or box data.
    Parse {
        /// Input file the data came from, when known.
        file: Option<PathBuf>,
        /// Byte offset at which parsing failed.
        offset: u64,
        reason: &'static str,
    },
    /// Codec type not handled by this writer.
    UnsupportedCodec(FourCC),
    /// A box exceeded 2^32-1 bytes but its 64-bit size form was not enabled.
    BoxTooLarge(FourCC),
    /// An internal invariant was violated at layout time.
    Inconsistent(&'static str),
    /// A read was requested past the end of stream data.
    EndOfStream,
    /// Propagate underlying errors from `std::io`.
    Io(std::io::Error),
    /// Out of memory
    OutOfMemory,
}

impl Error {
    pub(crate) fn parse(offset: u64, reason: &'static str) -> Self {
        Self::Parse {
            file: None,
            offset,
            reason,
        }
    }

    pub(crate) fn malformed(reason: &'static str) -> Self {
        Self::parse(0, reason)
    }

    /// Attach the source file to a `Parse` error; other variants pass through.
    pub(crate) fn in_file(self, path: &std::path::Path) -> Self {
        match self {
            Self::Parse {
                file: None,
                offset,
                reason,
            } => Self::Parse {
                file: Some(path.to_path_buf()),
                offset,
                reason,
            },
            other => other,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigInvalid(why) => write!(f, "invalid configuration: {why}"),
            Self::UnresolvedReference(bsid) => {
                write!(f, "reference to undeclared uniq_bsid {bsid}")
            }
            Self::FileIo(path, cause) => write!(f, "{}: {cause}", path.display()),
            Self::Parse {
                file: Some(file),
                offset,
                reason,
            } => write!(f, "{}: parse error at offset {offset}: {reason}", file.display()),
            Self::Parse {
                file: None,
                offset,
                reason,
            } => write!(f, "parse error at offset {offset}: {reason}"),
            Self::UnsupportedCodec(code) => write!(f, "unsupported codec '{code}'"),
            Self::BoxTooLarge(tag) => {
                write!(f, "box '{tag}' exceeds the 32-bit size field")
            }
            Self::Inconsistent(why) => write!(f, "inconsistent file layout: {why}"),
            Self::EndOfStream => write!(f, "unexpected end of stream"),
            Self::Io(err) => write!(f, "{err}"),
            Self::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for Error {}

impl From<bitreader::BitReaderError> for Error {
    fn from(_: bitreader::BitReaderError) -> Error {
        Error::malformed("invalid data")
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::EndOfStream,
            _ => Error::Io(err),
        }
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_: std::string::FromUtf8Error) -> Error {
        Error::malformed("invalid utf8")
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Error {
        Error::Inconsistent("integer conversion failed")
    }
}

impl From<fallible_collections::TryReserveError> for Error {
    fn from(_: fallible_collections::TryReserveError) -> Error {
        Error::OutOfMemory
    }
}

/// Result shorthand using our Error enum.
pub(crate) type Result<T> = std::result::Result<T, Error>;
