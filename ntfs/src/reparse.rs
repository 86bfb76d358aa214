// Reparse point buffer decoding.
//
// Junctions (MOUNT_POINT) and symlinks (SYMLINK) carry a substitute and a
// print name as UTF-16LE slices addressed by offset/length pairs. Whether
// the delivered buffer still carries the 8 byte tag/length header in front
// of the payload varies by supplier, so both base offsets are probed and
// the first one producing a plausible path wins.

use crate::interpreter::ReparseBuffer;
use log::debug;
use magpie_core::{MagpieError, Result};
use serde::{Deserialize, Serialize};

pub const IO_REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;
pub const IO_REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;

/// Bit 0 of the symlink flags word: the target is relative to the link.
pub const SYMLINK_FLAG_RELATIVE: u32 = 0x0000_0001;

const HEADER_LEN: usize = 8;
const MOUNT_POINT_FIXED_LEN: usize = 8;
const SYMLINK_FIXED_LEN: usize = 12;

/// How the payload was delivered, recorded for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderLayout {
    /// Payload starts at offset 0; the supplier stripped the header.
    Stripped,
    /// Payload starts after the 8 byte tag/length header.
    Embedded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReparseKind {
    MountPoint,
    Symlink { is_relative: bool },
}

/// Decoded reparse point data.
#[derive(Debug, Clone)]
pub struct ParsedReparse {
    pub kind: ReparseKind,
    pub substitute_name: String,
    pub print_name: String,
    pub layout: HeaderLayout,
}

/// Decode a reparse buffer. Tags other than MOUNT_POINT and SYMLINK fail
/// with `UnsupportedReparseTag`.
pub fn parse_reparse_buffer(buffer: &ReparseBuffer) -> Result<ParsedReparse> {
    match buffer.tag {
        IO_REPARSE_TAG_MOUNT_POINT | IO_REPARSE_TAG_SYMLINK => {}
        other => return Err(MagpieError::UnsupportedReparseTag(other)),
    }

    let mut fallback: Option<ParsedReparse> = None;
    for (base, layout) in [(0, HeaderLayout::Stripped), (HEADER_LEN, HeaderLayout::Embedded)] {
        if base >= buffer.content.len() {
            continue;
        }
        let Some(parsed) = parse_payload(buffer.tag, &buffer.content[base..], layout) else {
            continue;
        };
        if parsed.substitute_name.contains('\\') {
            debug!(
                "reparse tag {:#010x}: payload layout {:?}, target '{}'",
                buffer.tag, layout, parsed.substitute_name
            );
            return Ok(parsed);
        }
        // Keep a separator-less decode around in case neither base yields
        // a better one (bare relative symlink targets look like this).
        if fallback.is_none() && !parsed.substitute_name.is_empty() {
            fallback = Some(parsed);
        }
    }

    match fallback {
        Some(parsed) => {
            debug!(
                "reparse tag {:#010x}: payload layout {:?}, separator-less target '{}'",
                buffer.tag, parsed.layout, parsed.substitute_name
            );
            Ok(parsed)
        }
        None => Err(MagpieError::AttributeRead(format!(
            "reparse buffer with tag {:#010x} holds no decodable path",
            buffer.tag
        ))),
    }
}

fn parse_payload(tag: u32, payload: &[u8], layout: HeaderLayout) -> Option<ParsedReparse> {
    let fixed_len = match tag {
        IO_REPARSE_TAG_MOUNT_POINT => MOUNT_POINT_FIXED_LEN,
        _ => SYMLINK_FIXED_LEN,
    };
    if payload.len() < fixed_len {
        return None;
    }

    let subst_off = read_u16(payload, 0) as usize;
    let subst_len = read_u16(payload, 2) as usize;
    let print_off = read_u16(payload, 4) as usize;
    let print_len = read_u16(payload, 6) as usize;

    let kind = match tag {
        IO_REPARSE_TAG_MOUNT_POINT => ReparseKind::MountPoint,
        _ => {
            let flags = read_u32(payload, 8);
            ReparseKind::Symlink { is_relative: flags & SYMLINK_FLAG_RELATIVE != 0 }
        }
    };

    let path_buffer = &payload[fixed_len..];
    let substitute_name = decode_utf16le_at(path_buffer, subst_off, subst_len)?;
    let print_name =
        decode_utf16le_at(path_buffer, print_off, print_len).unwrap_or_else(|| substitute_name.clone());

    Some(ParsedReparse { kind, substitute_name, print_name, layout })
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

fn decode_utf16le_at(buffer: &[u8], offset: usize, length: usize) -> Option<String> {
    if length == 0 || length % 2 != 0 || offset + length > buffer.len() {
        return None;
    }
    let units: Vec<u16> = buffer[offset..offset + length]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let decoded = String::from_utf16(&units).ok()?;
    if decoded.chars().any(|c| c.is_control()) {
        return None;
    }
    Some(decoded)
}
