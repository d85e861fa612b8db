//! Minimal magic sniffing.
//!
//! Produces libmagic-style descriptions for the signatures the format
//! registry matches on, and nothing else. Anything unrecognised yields `None`.

use crate::error::Error;
use crate::handle::FileHandle;

/// Bytes read from the start of a file. Covers the ISO 9660 / UDF volume
/// descriptors that live past the 32 KiB system area.
pub const HEAD_WINDOW: usize = 0x9010;

const VHD_FOOTER: usize = 512;
const NSIS_MARKER: &[u8] = b"\xEF\xBE\xAD\xDENullsoftInst";

/// Describe the file the way `file(1)` would, for the registered formats.
pub fn describe(handle: &FileHandle) -> Result<Option<String>, Error> {
    let head = handle.head(HEAD_WINDOW)?;

    if let Some(description) = describe_head(&head) {
        return Ok(Some(description));
    }

    if head.starts_with(b"MZ") {
        let contents = handle.contents()?;
        if find(contents, NSIS_MARKER).is_some() {
            return Ok(Some(
                "PE32 executable (GUI) Intel 80386, for MS Windows, Nullsoft Installer self-extracting archive"
                    .to_string(),
            ));
        }
        return Ok(Some("PE32 executable, for MS Windows".to_string()));
    }

    // Fixed VHDs only carry their cookie in the trailing footer.
    let tail = handle.tail(VHD_FOOTER)?;
    if tail.len() == VHD_FOOTER && tail.starts_with(b"conectix") {
        return Ok(Some(
            "Microsoft Disk Image, Virtual Server or Virtual PC".to_string(),
        ));
    }

    Ok(None)
}

fn describe_head(head: &[u8]) -> Option<String> {
    if head.starts_with(b"PK\x05\x06") {
        return Some("Zip archive data (empty)".to_string());
    }
    if head.starts_with(b"PK\x03\x04") {
        let version = head.get(4).copied().unwrap_or(20);
        return Some(format!(
            "Zip archive data, at least v{}.{} to extract",
            version / 10,
            version % 10
        ));
    }
    if head.starts_with(b"7z\xBC\xAF\x27\x1C") {
        let major = head.get(6).copied().unwrap_or(0);
        let minor = head.get(7).copied().unwrap_or(0);
        return Some(format!("7-zip archive data, version {}.{}", major, minor));
    }
    if head.starts_with(b"\x1F\x8B") {
        return Some(describe_gzip(head));
    }
    if head.starts_with(b"\xFD7zXZ\x00") {
        return Some("XZ compressed data, checksum CRC64".to_string());
    }
    if head.starts_with(b"MSWIM\x00\x00\x00") {
        return Some("Windows imaging (WIM) image".to_string());
    }
    if head.starts_with(b"vhdxfile") {
        return Some("Microsoft Disk Image eXtended".to_string());
    }
    if head.starts_with(b"conectix") {
        return Some("Microsoft Disk Image, Virtual Server or Virtual PC".to_string());
    }
    if let Some(method) = lha_method(head) {
        return Some(format!("LHa (2.x) archive data [{}]", method));
    }
    if head.get(0x8001..0x8006) == Some(b"CD001".as_slice()) {
        return Some("ISO 9660 CD-ROM filesystem data".to_string());
    }
    if head.get(0x8001..0x8006) == Some(b"BEA01".as_slice()) {
        for offset in [0x8801usize, 0x9001] {
            match head.get(offset..offset + 5) {
                Some(b"NSR02") => return Some("UDF filesystem data (version 1.5)".to_string()),
                Some(b"NSR03") => return Some("UDF filesystem data (version 2.0)".to_string()),
                _ => {}
            }
        }
    }
    None
}

fn describe_gzip(head: &[u8]) -> String {
    const FEXTRA: u8 = 0x04;
    const FNAME: u8 = 0x08;

    let flags = head.get(3).copied().unwrap_or(0);
    if flags & FNAME == 0 {
        return "gzip compressed data".to_string();
    }

    let mut offset = 10;
    if flags & FEXTRA != 0 {
        let xlen = match head.get(10..12) {
            Some(b) => u16::from_le_bytes([b[0], b[1]]) as usize,
            None => return "gzip compressed data".to_string(),
        };
        offset += 2 + xlen;
    }

    let name = head
        .get(offset..)
        .and_then(|rest| rest.iter().position(|&b| b == 0).map(|end| &rest[..end]));
    match name {
        Some(name) => format!(
            "gzip compressed data, was \"{}\"",
            String::from_utf8_lossy(name)
        ),
        None => "gzip compressed data".to_string(),
    }
}

/// LHA level 0-2 headers carry `-lhN-` (or `-lzs-`) at offset 2.
fn lha_method(head: &[u8]) -> Option<String> {
    let id = head.get(2..7)?;
    if id[0] != b'-' || id[4] != b'-' {
        return None;
    }
    match &id[1..3] {
        b"lh" | b"lz" => Some(String::from_utf8_lossy(&id[1..4]).into_owned()),
        _ => None,
    }
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
