use flate2::write::DeflateEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};

/// Block-map granularity: hashes are taken over 64 KiB slices of the
/// uncompressed content.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// One 64 KiB slice of an entry's uncompressed content.
pub(crate) struct Block {
    /// SHA-256 of the uncompressed slice.
    pub digest: [u8; 32],
    /// Bytes this slice occupies in the entry's stored payload. Equals the
    /// slice length for stored entries; for deflated entries it is the length
    /// of the sync-flushed deflate segment covering the slice.
    pub compressed_size: u64,
}

/// A fully read entry: the payload bytes exactly as they will appear in the
/// archive, plus everything the central directory and block map need.
pub(crate) struct EntryData {
    pub data: Vec<u8>,
    pub crc32: u32,
    pub uncompressed_size: u64,
    /// SHA-256 of the whole uncompressed contents.
    pub sha256: [u8; 32],
    pub blocks: Vec<Block>,
}

#[derive(Debug)]
pub(crate) enum CompressError {
    /// The source reader failed.
    Io(io::Error),
    /// The deflate backend failed.
    Backend(io::Error),
}

/// Streams `reader` to completion, slicing the uncompressed content at 64 KiB
/// boundaries. With level 0 the payload is the verbatim content; with levels
/// 1-9 each slice ends in a sync flush so the deflate segments are
/// byte-aligned and concatenate to the entry's stored stream. Zero-length
/// input produces an empty payload and no blocks.
pub(crate) fn read_entry<R: Read>(mut reader: R, level: u32) -> Result<EntryData, CompressError> {
    let mut crc = crc32fast::Hasher::new();
    let mut whole = Sha256::new();
    let mut blocks = Vec::new();
    let mut uncompressed_size = 0u64;
    let mut attributed = 0u64;
    let mut slice = vec![0u8; BLOCK_SIZE];

    let mut encoder = match level {
        0 => None,
        level => Some(DeflateEncoder::new(Vec::new(), Compression::new(level))),
    };
    let mut stored = Vec::new();

    loop {
        let n = read_full(&mut reader, &mut slice).map_err(CompressError::Io)?;
        if n == 0 {
            break;
        }
        let slice = &slice[..n];
        uncompressed_size += n as u64;
        crc.update(slice);
        whole.update(slice);
        let digest: [u8; 32] = Sha256::digest(slice).into();
        let compressed_size = match &mut encoder {
            None => {
                stored.extend_from_slice(slice);
                n as u64
            }
            Some(encoder) => {
                encoder.write_all(slice).map_err(CompressError::Backend)?;
                encoder.flush().map_err(CompressError::Backend)?;
                let emitted = encoder.get_ref().len() as u64;
                let delta = emitted - attributed;
                attributed = emitted;
                delta
            }
        };
        blocks.push(Block {
            digest,
            compressed_size,
        });
    }

    let data = match encoder {
        None => stored,
        Some(_) if uncompressed_size == 0 => Vec::new(),
        Some(encoder) => {
            let data = encoder.finish().map_err(CompressError::Backend)?;
            // The terminating deflate block belongs to the last slice.
            if let Some(last) = blocks.last_mut() {
                last.compressed_size += data.len() as u64 - attributed;
            }
            data
        }
    };

    Ok(EntryData {
        data,
        crc32: crc.finalize(),
        uncompressed_size,
        sha256: whole.finalize().into(),
        blocks,
    })
}

/// Reads until `buf` is full or the reader is exhausted.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
