// SPDX-FileCopyrightText: 2026 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

use crate::store::Store;
use crate::Error;

/// One decoded character of game text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextChar {
    /// A plain 16-bit code unit.
    Literal(u16),
    /// A control code introduced by an `0xFFFF` escape unit, with its payload
    /// bytes.
    Special { kind: u8, args: Vec<u8> },
}

/// A decoded game text string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameString {
    pub chars: Vec<TextChar>,
}

impl GameString {
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

impl fmt::Display for GameString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for c in &self.chars {
            if let TextChar::Literal(unit) = c {
                if let Some(c) = char::from_u32(*unit as u32) {
                    write!(f, "{c}")?;
                }
            }
        }
        Ok(())
    }
}

/// Number of payload bytes that follow an escape kind byte.
pub fn special_arg_count(kind: u8) -> usize {
    match kind {
        // text speed, pause, voice cue and window style codes
        0x03..=0x05 | 0x08 | 0x09 => 1,
        // text colour, RGBA
        0x07 => 4,
        // furigana grouping
        0x38 => 2,
        _ => 0,
    }
}

/// Reads an escaped game text string at `offset`, returning the decoded
/// characters and how many bytes were consumed (terminator included).
///
/// Code units are 16-bit big-endian. `0x0000` terminates the string and is
/// not part of the result. `0xFFFF` escapes into a kind byte and its
/// [special_arg_count] payload bytes, decoded as a single
/// [TextChar::Special]. Unterminated input stops at the end of the store.
pub fn read_string(store: &mut Store, offset: u64) -> Result<(GameString, u64), Error> {
    let size = store.len()?;
    let mut chars = Vec::new();
    let mut pos = offset;

    loop {
        if pos + 2 > size {
            break;
        }
        let unit = store.read_u16(pos)?;
        pos += 2;

        if unit == 0 {
            break;
        }

        if unit == 0xFFFF {
            if pos >= size {
                break;
            }
            let kind = store.read_u8(pos)?;
            pos += 1;

            let count = (special_arg_count(kind) as u64).min(size - pos);
            let args = store.read_bytes(pos, count as usize)?;
            pos += count;

            chars.push(TextChar::Special { kind, args });
        } else {
            chars.push(TextChar::Literal(unit));
        }
    }

    Ok((GameString { chars }, pos - offset))
}
