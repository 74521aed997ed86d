//! Shared verification plumbing: reads the emitted volumes back and walks
//! the wire format the way an extractor would.

#![allow(dead_code)]

use std::fs;
use std::io::Read;
use std::path::PathBuf;

pub const LFH_SIG: &[u8; 4] = b"PK\x03\x04";
pub const DD_SIG: &[u8; 4] = b"PK\x07\x08";
pub const CD_SIG: &[u8; 4] = b"PK\x01\x02";
pub const EOCD_SIG: &[u8; 4] = b"PK\x05\x06";

pub struct ParsedEntry {
    pub name: String,
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number_start: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
}

pub struct ParsedArchive {
    /// All volumes concatenated in order.
    pub bytes: Vec<u8>,
    pub volume_starts: Vec<usize>,
    pub volume_sizes: Vec<usize>,
    pub entries: Vec<ParsedEntry>,
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entry_count: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Parses the End Of Central Directory Record and the central directory out
/// of a finished archive, checking signatures and bookkeeping along the way.
pub fn parse_archive(volumes: &[PathBuf]) -> ParsedArchive {
    let mut bytes = Vec::new();
    let mut volume_starts = Vec::new();
    let mut volume_sizes = Vec::new();
    for path in volumes {
        let contents = fs::read(path).unwrap();
        volume_starts.push(bytes.len());
        volume_sizes.push(contents.len());
        bytes.extend_from_slice(&contents);
    }

    // These archives never carry a comment, so the EOCDR is the last 22 bytes.
    let eocd = bytes.len() - 22;
    assert_eq!(&bytes[eocd..eocd + 4], EOCD_SIG, "EOCDR signature");
    let disk_number = u16_at(&bytes, eocd + 4);
    let disk_with_central_directory = u16_at(&bytes, eocd + 6);
    let entries_on_this_disk = u16_at(&bytes, eocd + 8);
    let entry_count = u16_at(&bytes, eocd + 10);
    let central_directory_size = u32_at(&bytes, eocd + 12);
    let central_directory_offset = u32_at(&bytes, eocd + 16);
    assert_eq!(u16_at(&bytes, eocd + 20), 0, "comment length");

    assert_eq!(disk_number as usize, volumes.len() - 1);
    // The whole central directory lives on the final volume
    assert_eq!(disk_with_central_directory, disk_number);
    assert_eq!(entries_on_this_disk, entry_count);

    let cd_start =
        volume_starts[disk_with_central_directory as usize] + central_directory_offset as usize;
    let mut cursor = cd_start;
    let mut entries = Vec::new();
    for _ in 0..entry_count {
        assert_eq!(&bytes[cursor..cursor + 4], CD_SIG, "central directory signature");
        let flags = u16_at(&bytes, cursor + 8);
        let method = u16_at(&bytes, cursor + 10);
        let crc32 = u32_at(&bytes, cursor + 16);
        let compressed_size = u32_at(&bytes, cursor + 20);
        let uncompressed_size = u32_at(&bytes, cursor + 24);
        let name_len = u16_at(&bytes, cursor + 28) as usize;
        let extra_len = u16_at(&bytes, cursor + 30) as usize;
        let comment_len = u16_at(&bytes, cursor + 32) as usize;
        let disk_number_start = u16_at(&bytes, cursor + 34);
        let external_attributes = u32_at(&bytes, cursor + 38);
        let local_header_offset = u32_at(&bytes, cursor + 42);
        let name =
            String::from_utf8(bytes[cursor + 46..cursor + 46 + name_len].to_vec()).unwrap();
        entries.push(ParsedEntry {
            name,
            flags,
            method,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number_start,
            external_attributes,
            local_header_offset,
        });
        cursor += 46 + name_len + extra_len + comment_len;
    }
    assert_eq!(cursor, cd_start + central_directory_size as usize);
    // Nothing but the EOCDR follows the central directory
    assert_eq!(cursor, eocd);

    ParsedArchive {
        bytes,
        volume_starts,
        volume_sizes,
        entries,
        disk_number,
        disk_with_central_directory,
        entries_on_this_disk,
        entry_count,
        central_directory_size,
        central_directory_offset,
    }
}

fn volume_containing(archive: &ParsedArchive, pos: usize) -> (usize, usize) {
    for (start, size) in archive.volume_starts.iter().zip(&archive.volume_sizes) {
        if pos >= *start && pos < start + size {
            return (*start, start + size);
        }
    }
    panic!("position {} outside the archive", pos);
}

/// Follows a central directory entry to its local header, checks that the
/// header and data descriptor sit whole on their volumes, inflates the body,
/// and verifies the CRC before returning the uncompressed contents.
pub fn entry_data(archive: &ParsedArchive, entry: &ParsedEntry) -> Vec<u8> {
    let disk = entry.disk_number_start as usize;
    let volume_start = archive.volume_starts[disk];
    let volume_end = volume_start + archive.volume_sizes[disk];
    let lfh = volume_start + entry.local_header_offset as usize;

    assert_eq!(&archive.bytes[lfh..lfh + 4], LFH_SIG, "local header signature");
    let name_len = u16_at(&archive.bytes, lfh + 26) as usize;
    let extra_len = u16_at(&archive.bytes, lfh + 28) as usize;
    assert!(
        lfh + 30 + name_len + extra_len <= volume_end,
        "local header straddles a volume boundary"
    );
    assert_eq!(
        &archive.bytes[lfh + 30..lfh + 30 + name_len],
        entry.name.as_bytes()
    );

    let body = lfh + 30 + name_len + extra_len;
    let compressed = &archive.bytes[body..body + entry.compressed_size as usize];

    if entry.flags & (1 << 3) != 0 {
        let dd = body + entry.compressed_size as usize;
        assert_eq!(&archive.bytes[dd..dd + 4], DD_SIG, "data descriptor signature");
        assert_eq!(u32_at(&archive.bytes, dd + 4), entry.crc32);
        assert_eq!(u32_at(&archive.bytes, dd + 8), entry.compressed_size);
        assert_eq!(u32_at(&archive.bytes, dd + 12), entry.uncompressed_size);
        let (dd_volume_start, dd_volume_end) = volume_containing(archive, dd);
        assert!(
            dd >= dd_volume_start && dd + 16 <= dd_volume_end,
            "data descriptor straddles a volume boundary"
        );
    }

    let data = match entry.method {
        0 => compressed.to_vec(),
        8 => {
            let mut out = Vec::new();
            flate2::read::DeflateDecoder::new(compressed)
                .read_to_end(&mut out)
                .unwrap();
            out
        }
        other => panic!("unexpected compression method {}", other),
    };
    assert_eq!(data.len(), entry.uncompressed_size as usize);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&data);
    assert_eq!(hasher.finalize(), entry.crc32, "CRC mismatch for {}", entry.name);

    data
}
