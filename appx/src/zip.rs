//! Minimal streaming ZIP encoder for package output.
//!
//! Entries are written as local-file-header + payload, with the header
//! carrying final sizes and CRC (no data descriptors). Every entry sets the
//! UTF-8 name flag. The central directory is serialized from recorded entry
//! metadata, which also lets the orchestrator digest the directory bytes
//! before they hit the output file.

use crate::compress::EntryData;
use crate::sink::{CountSink, HashSink};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

pub(crate) const METHOD_STORE: u16 = 0;
pub(crate) const METHOD_DEFLATE: u16 = 8;

const LOCAL_FILE_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_FILE_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIGNATURE: u32 = 0x0605_4b50;
const ZIP64_END_OF_CENTRAL_DIR_SIGNATURE: u32 = 0x0606_4b50;
const ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
const ZIP64_EXTRA_ID: u16 = 0x0001;

/// General purpose flag: file name is UTF-8 encoded.
const FLAG_UTF8: u16 = 0x0800;

const VERSION_DEFAULT: u16 = 20;
const VERSION_ZIP64: u16 = 45;

/// Unix "made by", regular file 0644 in the external attributes.
const VERSION_MADE_BY: u16 = (3 << 8) | VERSION_DEFAULT;
const EXTERNAL_ATTRS: u32 = 0o100644 << 16;

pub(crate) struct EntryRecord {
    pub name: String,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
}

pub(crate) struct ZipWriter<W: Write> {
    out: CountSink<HashSink<W>>,
    entries: Vec<EntryRecord>,
}

impl<W: Write> ZipWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            out: CountSink::new(HashSink::new(inner)),
            entries: Vec::new(),
        }
    }

    /// SHA-256 of every byte written to the output so far.
    pub fn stream_digest(&self) -> [u8; 32] {
        self.out.get_ref().digest()
    }

    pub fn entries(&self) -> &[EntryRecord] {
        &self.entries
    }

    /// Writes one complete local file record. `name` must already be
    /// sanitized.
    pub fn add_entry(&mut self, name: &str, method: u16, entry: &EntryData) -> io::Result<()> {
        debug_assert!(method != METHOD_STORE || entry.data.len() as u64 == entry.uncompressed_size);
        let record = EntryRecord {
            name: name.to_string(),
            method,
            crc32: entry.crc32,
            compressed_size: entry.data.len() as u64,
            uncompressed_size: entry.uncompressed_size,
            local_header_offset: self.out.bytes_written(),
        };

        let zip64 = record.compressed_size >= u32::MAX as u64
            || record.uncompressed_size >= u32::MAX as u64;
        let mut extra = Vec::new();
        if zip64 {
            extra.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
            extra.write_u16::<LittleEndian>(16)?;
            extra.write_u64::<LittleEndian>(record.uncompressed_size)?;
            extra.write_u64::<LittleEndian>(record.compressed_size)?;
        }

        let out = &mut self.out;
        out.write_u32::<LittleEndian>(LOCAL_FILE_SIGNATURE)?;
        out.write_u16::<LittleEndian>(if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT })?;
        out.write_u16::<LittleEndian>(FLAG_UTF8)?;
        out.write_u16::<LittleEndian>(record.method)?;
        out.write_u16::<LittleEndian>(0)?; // mod time
        out.write_u16::<LittleEndian>(0)?; // mod date
        out.write_u32::<LittleEndian>(record.crc32)?;
        out.write_u32::<LittleEndian>(size32(record.compressed_size))?;
        out.write_u32::<LittleEndian>(size32(record.uncompressed_size))?;
        out.write_u16::<LittleEndian>(record.name.len() as u16)?;
        out.write_u16::<LittleEndian>(extra.len() as u16)?;
        out.write_all(record.name.as_bytes())?;
        out.write_all(&extra)?;
        out.write_all(&entry.data)?;

        self.entries.push(record);
        Ok(())
    }

    /// Serialized central directory records for every entry added so far,
    /// byte-identical to what `finish` will emit.
    pub fn central_directory(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for record in &self.entries {
            central_directory_record(&mut buf, record);
        }
        buf
    }

    /// Writes the central directory and end-of-central-directory records,
    /// returning the underlying sink.
    pub fn finish(mut self) -> io::Result<W> {
        let cd_offset = self.out.bytes_written();
        let cd = self.central_directory();
        self.out.write_all(&cd)?;
        let cd_size = cd.len() as u64;

        let zip64 = self.entries.len() >= u16::MAX as usize
            || cd_offset >= u32::MAX as u64
            || cd_size >= u32::MAX as u64;
        if zip64 {
            let zip64_eocd_offset = self.out.bytes_written();
            let out = &mut self.out;
            out.write_u32::<LittleEndian>(ZIP64_END_OF_CENTRAL_DIR_SIGNATURE)?;
            out.write_u64::<LittleEndian>(44)?;
            out.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
            out.write_u16::<LittleEndian>(VERSION_ZIP64)?;
            out.write_u32::<LittleEndian>(0)?; // this disk
            out.write_u32::<LittleEndian>(0)?; // central directory disk
            out.write_u64::<LittleEndian>(self.entries.len() as u64)?;
            out.write_u64::<LittleEndian>(self.entries.len() as u64)?;
            out.write_u64::<LittleEndian>(cd_size)?;
            out.write_u64::<LittleEndian>(cd_offset)?;
            out.write_u32::<LittleEndian>(ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE)?;
            out.write_u32::<LittleEndian>(0)?;
            out.write_u64::<LittleEndian>(zip64_eocd_offset)?;
            out.write_u32::<LittleEndian>(1)?; // total disks
        }

        let entry_count = self.entries.len().min(u16::MAX as usize) as u16;
        let out = &mut self.out;
        out.write_u32::<LittleEndian>(END_OF_CENTRAL_DIR_SIGNATURE)?;
        out.write_u16::<LittleEndian>(0)?; // this disk
        out.write_u16::<LittleEndian>(0)?; // central directory disk
        out.write_u16::<LittleEndian>(entry_count)?;
        out.write_u16::<LittleEndian>(entry_count)?;
        out.write_u32::<LittleEndian>(size32(cd_size))?;
        out.write_u32::<LittleEndian>(size32(cd_offset))?;
        out.write_u16::<LittleEndian>(0)?; // comment length
        out.flush()?;
        Ok(self.out.into_inner().into_inner())
    }
}

fn size32(size: u64) -> u32 {
    if size >= u32::MAX as u64 {
        u32::MAX
    } else {
        size as u32
    }
}

fn central_directory_record(buf: &mut Vec<u8>, record: &EntryRecord) {
    let mut extra = Vec::new();
    if record.uncompressed_size >= u32::MAX as u64 {
        extra.extend_from_slice(&record.uncompressed_size.to_le_bytes());
    }
    if record.compressed_size >= u32::MAX as u64 {
        extra.extend_from_slice(&record.compressed_size.to_le_bytes());
    }
    if record.local_header_offset >= u32::MAX as u64 {
        extra.extend_from_slice(&record.local_header_offset.to_le_bytes());
    }
    let zip64 = !extra.is_empty();

    // Writes into a Vec cannot fail.
    buf.write_u32::<LittleEndian>(CENTRAL_FILE_SIGNATURE).unwrap();
    buf.write_u16::<LittleEndian>(VERSION_MADE_BY).unwrap();
    buf.write_u16::<LittleEndian>(if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT })
        .unwrap();
    buf.write_u16::<LittleEndian>(FLAG_UTF8).unwrap();
    buf.write_u16::<LittleEndian>(record.method).unwrap();
    buf.write_u16::<LittleEndian>(0).unwrap(); // mod time
    buf.write_u16::<LittleEndian>(0).unwrap(); // mod date
    buf.write_u32::<LittleEndian>(record.crc32).unwrap();
    buf.write_u32::<LittleEndian>(size32(record.compressed_size)).unwrap();
    buf.write_u32::<LittleEndian>(size32(record.uncompressed_size)).unwrap();
    buf.write_u16::<LittleEndian>(record.name.len() as u16).unwrap();
    let extra_len = if zip64 { 4 + extra.len() as u16 } else { 0 };
    buf.write_u16::<LittleEndian>(extra_len).unwrap();
    buf.write_u16::<LittleEndian>(0).unwrap(); // comment length
    buf.write_u16::<LittleEndian>(0).unwrap(); // disk number start
    buf.write_u16::<LittleEndian>(0).unwrap(); // internal attributes
    buf.write_u32::<LittleEndian>(EXTERNAL_ATTRS).unwrap();
    buf.write_u32::<LittleEndian>(size32(record.local_header_offset)).unwrap();
    buf.extend_from_slice(record.name.as_bytes());
    if zip64 {
        buf.write_u16::<LittleEndian>(ZIP64_EXTRA_ID).unwrap();
        buf.write_u16::<LittleEndian>(extra.len() as u16).unwrap();
        buf.extend_from_slice(&extra);
    }
}

/// Percent-encodes every byte outside the OPC part-name whitelist, keeping
/// `[Content_Types].xml` verbatim since its brackets are load-bearing.
pub(crate) fn sanitize_name(name: &str) -> String {
    if name == crate::CONTENT_TYPES_NAME {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(byte as char)
            }
            byte => {
                out.push('%');
                out.push_str(&format!("{:02X}", byte));
            }
        }
    }
    out
}
