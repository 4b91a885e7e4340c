// SPDX-FileCopyrightText: 2026 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#[derive(Debug)]
pub enum Error {
    /// A read or write range fell outside of the store.
    OutOfBounds {
        /// Start of the offending range.
        offset: u64,
        /// Length of the offending range.
        length: u64,
        /// Length of the store at the time of the access.
        size: u64,
    },
    /// The bytes do not describe a valid archive.
    MalformedArchive {
        /// What the parser choked on.
        reason: String,
    },
    /// The backing resource failed.
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::OutOfBounds {
                offset,
                length,
                size,
            } => write!(
                f,
                "range {offset:#x}..{:#x} is outside of the store (length {size:#x})",
                offset + length
            ),
            Error::MalformedArchive { reason } => write!(f, "malformed archive: {reason}"),
            Error::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<binrw::Error> for Error {
    fn from(err: binrw::Error) -> Self {
        Error::MalformedArchive {
            reason: err.to_string(),
        }
    }
}
