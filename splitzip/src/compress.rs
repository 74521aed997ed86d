//! Per-entry transform: a running CRC32 over the uncompressed bytes,
//! plus raw DEFLATE (or store pass-through) of the stream.

use std::borrow::Cow;
use std::io::Write;
use std::mem;

use crc32fast::Hasher;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::result::*;

pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflated,
}

impl CompressionMethod {
    pub fn as_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
        }
    }

    /// The version-needed-to-extract a tool must advertise for this method.
    pub fn minimum_extract_version(self) -> u16 {
        match self {
            CompressionMethod::Stored => 10,
            CompressionMethod::Deflated => 20,
        }
    }
}

enum Codec {
    Stored,
    // Raw DEFLATE (no zlib framing), drained into a scratch buffer
    Deflated(DeflateEncoder<Vec<u8>>),
}

/// What an entry's body boiled down to once the stream ended.
#[derive(Debug)]
pub struct EntryDigest {
    /// Compressed bytes the codec held back until the end of the stream.
    pub tail: Vec<u8>,
    pub crc32: u32,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
}

pub struct EntryEncoder {
    hasher: Hasher,
    codec: Codec,
    uncompressed: u64,
    compressed: u64,
}

impl EntryEncoder {
    pub fn new(method: CompressionMethod, level: u32) -> Self {
        let codec = match method {
            CompressionMethod::Stored => Codec::Stored,
            CompressionMethod::Deflated => {
                Codec::Deflated(DeflateEncoder::new(Vec::new(), Compression::new(level)))
            }
        };
        EntryEncoder {
            hasher: Hasher::new(),
            codec,
            uncompressed: 0,
            compressed: 0,
        }
    }

    /// Feeds one chunk of uncompressed bytes and hands back whatever the
    /// codec produced for it. Stores are the identity; DEFLATE may return
    /// nothing until its window fills.
    pub fn update<'a>(&mut self, chunk: &'a [u8]) -> ZipResult<Cow<'a, [u8]>> {
        self.hasher.update(chunk);
        self.uncompressed += chunk.len() as u64;
        match &mut self.codec {
            Codec::Stored => {
                self.compressed += chunk.len() as u64;
                Ok(Cow::Borrowed(chunk))
            }
            Codec::Deflated(encoder) => {
                encoder
                    .write_all(chunk)
                    .map_err(|e| SplitZipError::Compression(e.to_string()))?;
                let produced = mem::take(encoder.get_mut());
                self.compressed += produced.len() as u64;
                Ok(Cow::Owned(produced))
            }
        }
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed
    }

    /// Flushes the codec and finalizes the checksum.
    pub fn finish(self) -> ZipResult<EntryDigest> {
        let EntryEncoder {
            hasher,
            codec,
            uncompressed,
            compressed,
        } = self;
        let tail = match codec {
            Codec::Stored => Vec::new(),
            Codec::Deflated(encoder) => encoder
                .finish()
                .map_err(|e| SplitZipError::Compression(e.to_string()))?,
        };
        Ok(EntryDigest {
            crc32: hasher.finalize(),
            uncompressed_size: uncompressed,
            compressed_size: compressed + tail.len() as u64,
            tail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn run(method: CompressionMethod, input: &[u8]) -> (Vec<u8>, EntryDigest) {
        let mut encoder = EntryEncoder::new(method, DEFAULT_COMPRESSION_LEVEL);
        let mut out = Vec::new();
        // Two-byte chunks to exercise the streaming path
        for chunk in input.chunks(2) {
            out.extend_from_slice(&encoder.update(chunk).unwrap());
        }
        let digest = encoder.finish().unwrap();
        out.extend_from_slice(&digest.tail);
        (out, digest)
    }

    #[test]
    fn stored_is_the_identity() {
        let (out, digest) = run(CompressionMethod::Stored, b"helloworld");
        assert_eq!(out, b"helloworld");
        assert_eq!(digest.uncompressed_size, 10);
        assert_eq!(digest.compressed_size, 10);
        assert_eq!(digest.crc32, 0xb1d4025b);
    }

    #[test]
    fn deflate_round_trips() {
        let input: Vec<u8> = b"to be or not to be, that is the question. "
            .iter()
            .cycle()
            .take(10_000)
            .copied()
            .collect();
        let (out, digest) = run(CompressionMethod::Deflated, &input);
        assert_eq!(digest.uncompressed_size, input.len() as u64);
        assert_eq!(digest.compressed_size, out.len() as u64);
        assert!(digest.compressed_size < digest.uncompressed_size);

        let mut inflated = Vec::new();
        flate2::read::DeflateDecoder::new(&out[..])
            .read_to_end(&mut inflated)
            .unwrap();
        assert_eq!(inflated, input);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&input);
        assert_eq!(digest.crc32, hasher.finalize());
    }

    #[test]
    fn empty_stream() {
        let (out, digest) = run(CompressionMethod::Stored, b"");
        assert!(out.is_empty());
        assert_eq!(digest.crc32, 0);
        assert_eq!(digest.uncompressed_size, 0);

        let (out, digest) = run(CompressionMethod::Deflated, b"");
        assert_eq!(digest.crc32, 0);
        assert_eq!(digest.compressed_size, out.len() as u64);
        let mut inflated = Vec::new();
        flate2::read::DeflateDecoder::new(&out[..])
            .read_to_end(&mut inflated)
            .unwrap();
        assert!(inflated.is_empty());
    }
}
