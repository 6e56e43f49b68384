//! Writer for Microsoft APPX / APPXBUNDLE packages.
//!
//! A package is a ZIP archive following the Open Packaging Conventions, with
//! a generated `[Content_Types].xml`, a generated `AppxBlockMap.xml` of
//! per-64 KiB SHA-256 hashes, and optionally an `AppxSignature.p7x` entry
//! binding the archive bytes to a PKCS#12 signing certificate.

use crate::block_map::BlockMapBuilder;
use crate::compress::CompressError;
use crate::content_types::ContentTypesBuilder;
use crate::p7x::Digests;
use crate::zip::{ZipWriter, METHOD_DEFLATE, METHOD_STORE};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

mod block_map;
mod compress;
mod content_types;
mod error;
pub mod p7x;
mod pkcs7;
mod sign;
mod sink;
mod zip;

pub use crate::compress::BLOCK_SIZE;
pub use crate::error::{Error, Result};
pub use crate::sign::Signer;

pub const CONTENT_TYPES_NAME: &str = "[Content_Types].xml";
pub const BLOCK_MAP_NAME: &str = "AppxBlockMap.xml";
pub const SIGNATURE_NAME: &str = "AppxSignature.p7x";
pub const MANIFEST_NAME: &str = "AppxManifest.xml";
pub const BUNDLE_MANIFEST_NAME: &str = "AppxMetadata/AppxBundleManifest.xml";
pub const CODE_INTEGRITY_NAME: &str = "AppxMetadata/CodeIntegrity.cat";

/// Builder for a single package file.
///
/// Entries are written in lexicographic archive-name order, each streamed
/// exactly once from disk, followed by the generated `[Content_Types].xml`
/// and `AppxBlockMap.xml` entries and, when a [`Signer`] is supplied, the
/// signature entry. On any failure the partially written output is removed.
pub struct Appx {
    path: PathBuf,
    files: BTreeMap<String, PathBuf>,
    level: u32,
    bundle: bool,
}

impl Appx {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            files: BTreeMap::new(),
            level: 0,
            bundle: false,
        }
    }

    /// Compression level for user entries and `[Content_Types].xml`:
    /// 0 stores files verbatim, 1-9 select the deflate level.
    pub fn set_compression_level(&mut self, level: u32) {
        self.level = level.min(9);
    }

    /// Marks the package as an appxbundle. Writing then requires an
    /// `AppxMetadata/AppxBundleManifest.xml` entry.
    pub fn set_bundle(&mut self, bundle: bool) {
        self.bundle = bundle;
    }

    /// Schedules a file for inclusion. The first mapping for an archive name
    /// wins.
    pub fn add_file(&mut self, archive_name: impl Into<String>, source: impl Into<PathBuf>) {
        self.files.entry(archive_name.into()).or_insert(source.into());
    }

    /// Writes the package, signing it when `signer` is provided.
    pub fn write(self, signer: Option<Signer>) -> Result<()> {
        if self.bundle && !self.files.contains_key(BUNDLE_MANIFEST_NAME) {
            return Err(Error::MissingManifest);
        }
        let path = self.path.clone();
        let out = File::create(&path).map_err(Error::io(&path))?;
        let zip = ZipWriter::new(BufWriter::new(out));
        self.write_inner(zip, signer).map_err(|err| {
            let _ = std::fs::remove_file(&path);
            err
        })
    }

    fn write_inner(self, mut zip: ZipWriter<BufWriter<File>>, signer: Option<Signer>) -> Result<()> {
        let mut block_map = BlockMapBuilder::default();
        let mut content_types = ContentTypesBuilder::default();
        let mut axci = None;

        for (name, source) in &self.files {
            let sanitized = zip::sanitize_name(name);
            let file = File::open(source).map_err(Error::io(source))?;
            let entry = compress::read_entry(BufReader::new(file), self.level)
                .map_err(|err| entry_error(source, err))?;
            let method = entry_method(self.level, entry.uncompressed_size);
            zip.add_entry(&sanitized, method, &entry)
                .map_err(Error::io(&self.path))?;
            block_map.add(&sanitized, method, &entry);
            content_types.add(&sanitized);
            if name == CODE_INTEGRITY_NAME {
                axci = Some(entry.sha256);
            }
            tracing::debug!(
                "wrote {} ({} bytes, {} blocks)",
                sanitized,
                entry.uncompressed_size,
                entry.blocks.len()
            );
        }

        content_types.add_override(BLOCK_MAP_NAME, "application/vnd.ms-appx.blockmap+xml");
        if signer.is_some() {
            content_types.add_override(SIGNATURE_NAME, "application/vnd.ms-appx.signature");
        }
        if self.files.contains_key(MANIFEST_NAME) {
            content_types.add_override(MANIFEST_NAME, "application/vnd.ms-appx.manifest+xml");
        }
        if self.bundle {
            content_types.add_override(
                BUNDLE_MANIFEST_NAME,
                "application/vnd.ms-appx.bundlemanifest+xml",
            );
        }

        let content_types = to_xml(&content_types.finish(), true);
        let axct: [u8; 32] = Sha256::digest(&content_types).into();
        let entry = compress::read_entry(Cursor::new(&content_types), self.level)
            .map_err(|err| entry_error(&self.path, err))?;
        let method = entry_method(self.level, entry.uncompressed_size);
        zip.add_entry(CONTENT_TYPES_NAME, method, &entry)
            .map_err(Error::io(&self.path))?;
        block_map.add(CONTENT_TYPES_NAME, method, &entry);

        // The block map is always stored so verifiers can map it directly.
        let block_map = to_xml(&block_map.finish(), false);
        let axbm: [u8; 32] = Sha256::digest(&block_map).into();
        let entry = compress::read_entry(Cursor::new(&block_map), 0)
            .map_err(|err| entry_error(&self.path, err))?;
        zip.add_entry(BLOCK_MAP_NAME, METHOD_STORE, &entry)
            .map_err(Error::io(&self.path))?;
        tracing::debug!("generated manifests for {} entries", zip.entries().len());

        if let Some(signer) = signer {
            let digests = Digests {
                axpc: zip.stream_digest(),
                axcd: Sha256::digest(zip.central_directory()).into(),
                axct,
                axbm,
                axci: axci.unwrap_or_default(),
            };
            let signature = p7x::p7x(&signer, &digests)?;
            tracing::debug!("signed package ({} byte signature)", signature.len());
            let entry = compress::read_entry(Cursor::new(&signature), 0)
                .map_err(|err| entry_error(&self.path, err))?;
            zip.add_entry(SIGNATURE_NAME, METHOD_STORE, &entry)
                .map_err(Error::io(&self.path))?;
        }

        let mut out = zip.finish().map_err(Error::io(&self.path))?;
        out.flush().map_err(Error::io(&self.path))?;
        Ok(())
    }
}

fn entry_error(path: &Path, err: CompressError) -> Error {
    match err {
        CompressError::Io(source) => Error::Io {
            path: path.to_path_buf(),
            source,
        },
        CompressError::Backend(err) => Error::Compression(err.to_string()),
    }
}

fn entry_method(level: u32, uncompressed_size: u64) -> u16 {
    // Empty entries are stored: header only, no payload bytes at all.
    if level == 0 || uncompressed_size == 0 {
        METHOD_STORE
    } else {
        METHOD_DEFLATE
    }
}

fn to_xml<T: Serialize>(xml: &T, standalone: bool) -> Vec<u8> {
    let mut buf = vec![];
    let standalone = if standalone { "yes" } else { "no" };
    buf.extend_from_slice(
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="{}"?>"#,
            standalone
        )
        .as_bytes(),
    );
    quick_xml::se::to_writer(&mut buf, xml).unwrap();
    buf
}
