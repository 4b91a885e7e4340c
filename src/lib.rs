// SPDX-FileCopyrightText: 2026 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

/// Random-access byte stores, memory or disk backed, that archives and disc images live in.
pub mod store;

/// Reading and writing FSYS archive containers.
pub mod fsys;

/// Reading escaped game text strings.
pub mod text;

/// Entry type tags and their derived file extensions.
pub mod filetype;

/// Decoded sub-resources, and the extractor seam used to materialize them.
pub mod resource;

mod error;
pub use error::Error;

/// An owned byte sequence.
pub type ByteBuffer = Vec<u8>;

/// A borrowed byte sequence.
pub type ByteSpan<'a> = &'a [u8];
