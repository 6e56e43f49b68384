use appx::{Appx, Error, BLOCK_SIZE};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;
use zip::{CompressionMethod, ZipArchive};

fn write_package(
    dir: &TempDir,
    level: u32,
    files: &[(&str, &[u8])],
) -> std::path::PathBuf {
    let out = dir.path().join("out.appx");
    let mut package = Appx::new(&out);
    package.set_compression_level(level);
    for (name, contents) in files {
        let local = dir.path().join(name.replace(['/', ' '], "_"));
        std::fs::write(&local, contents).unwrap();
        package.add_file(*name, &local);
    }
    package.write(None).unwrap();
    out
}

fn open(path: &Path) -> ZipArchive<File> {
    ZipArchive::new(File::open(path).unwrap()).unwrap()
}

fn entry_names(archive: &mut ZipArchive<File>) -> Vec<String> {
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

fn entry_string(archive: &mut ZipArchive<File>, name: &str) -> String {
    let mut out = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut out)
        .unwrap();
    out
}

/// The `<File .../>` element (with children) for one block-map entry.
fn file_element<'a>(block_map: &'a str, name: &str) -> &'a str {
    let start = block_map
        .find(&format!(r#"<File Name="{}""#, name))
        .unwrap_or_else(|| panic!("no entry for {} in {}", name, block_map));
    let rest = &block_map[start..];
    let end = rest[1..].find("<File ").map(|i| i + 1).unwrap_or(rest.len());
    &rest[..end]
}

#[test]
fn stored_package_lists_entries_and_block_hashes() {
    let dir = TempDir::new().unwrap();
    let out = write_package(&dir, 0, &[("hello.txt", b"hi\n")]);
    let mut archive = open(&out);
    assert_eq!(
        entry_names(&mut archive),
        ["hello.txt", "[Content_Types].xml", "AppxBlockMap.xml"]
    );
    assert_eq!(entry_string(&mut archive, "hello.txt"), "hi\n");
    {
        let entry = archive.by_name("hello.txt").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Stored);
    }

    let block_map = entry_string(&mut archive, "AppxBlockMap.xml");
    assert!(block_map.contains("http://schemas.microsoft.com/appx/2010/blockmap"));
    assert!(block_map.contains(r#"HashMethod="http://www.w3.org/2001/04/xmlenc#sha256""#));
    let element = file_element(&block_map, "hello.txt");
    let hash = BASE64.encode(Sha256::digest(b"hi\n"));
    assert!(element.contains(&format!(r#"Hash="{}""#, hash)), "{}", element);
    // Stored entries carry no per-block Size attribute.
    assert!(!element.contains(&format!(r#"Hash="{}" Size"#, hash)), "{}", element);

    let content_types = entry_string(&mut archive, "[Content_Types].xml");
    assert!(content_types.contains("http://schemas.openxmlformats.org/package/2006/content-types"));
    assert!(content_types.contains(r#"Extension="txt""#));
    assert!(content_types.contains(r#"PartName="/AppxBlockMap.xml""#));
    // Unsigned packages declare no signature part.
    assert!(!content_types.contains("AppxSignature"));
}

#[test]
fn deflated_package_annotates_compressed_block_sizes() {
    let dir = TempDir::new().unwrap();
    let out = write_package(&dir, 9, &[("hello.txt", b"hi\n")]);
    let mut archive = open(&out);
    let compressed_size = {
        let entry = archive.by_name("hello.txt").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Deflated);
        entry.compressed_size()
    };
    assert_eq!(entry_string(&mut archive, "hello.txt"), "hi\n");

    let block_map = entry_string(&mut archive, "AppxBlockMap.xml");
    let element = file_element(&block_map, "hello.txt");
    assert!(
        element.contains(&format!(r#"Size="{}""#, compressed_size)),
        "{}",
        element
    );
}

#[test]
fn block_counts_follow_64k_boundaries() {
    let dir = TempDir::new().unwrap();
    let exact = vec![0u8; BLOCK_SIZE];
    let spill = vec![0u8; BLOCK_SIZE + 1];
    let out = write_package(&dir, 9, &[("exact.bin", &exact), ("spill.bin", &spill)]);
    let mut archive = open(&out);
    let block_map = entry_string(&mut archive, "AppxBlockMap.xml");

    let element = file_element(&block_map, "exact.bin");
    assert_eq!(element.matches("<Block ").count(), 1, "{}", element);
    let element = file_element(&block_map, "spill.bin");
    assert_eq!(element.matches("<Block ").count(), 2, "{}", element);

    // The deflated payload still inflates to the original content.
    let mut contents = Vec::new();
    archive
        .by_name("spill.bin")
        .unwrap()
        .read_to_end(&mut contents)
        .unwrap();
    assert_eq!(contents, spill);
}

#[test]
fn compressed_blocks_partition_the_stored_payload() {
    let dir = TempDir::new().unwrap();
    let data: Vec<u8> = (0..BLOCK_SIZE * 2 + 431).map(|i| (i % 253) as u8).collect();
    let out = write_package(&dir, 6, &[("data.bin", &data)]);
    let mut archive = open(&out);
    let compressed_size = archive.by_name("data.bin").unwrap().compressed_size();

    let block_map = entry_string(&mut archive, "AppxBlockMap.xml");
    let element = file_element(&block_map, "data.bin");
    let total: u64 = element
        .split(r#"Size=""#)
        .skip(1)
        .map(|rest| rest[..rest.find('"').unwrap()].parse::<u64>().unwrap())
        .skip(1) // the first Size attribute is the file's uncompressed size
        .sum();
    assert_eq!(total, compressed_size, "{}", element);
}

#[test]
fn empty_entry_is_stored_with_no_blocks() {
    let dir = TempDir::new().unwrap();
    let out = write_package(&dir, 9, &[("empty.dat", b"")]);
    let mut archive = open(&out);
    {
        let entry = archive.by_name("empty.dat").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Stored);
        assert_eq!(entry.size(), 0);
        assert_eq!(entry.compressed_size(), 0);
    }
    let block_map = entry_string(&mut archive, "AppxBlockMap.xml");
    let element = file_element(&block_map, "empty.dat");
    assert!(element.contains(r#"Size="0""#), "{}", element);
    assert!(!element.contains("<Block"), "{}", element);
}

#[test]
fn archive_names_are_percent_encoded() {
    let dir = TempDir::new().unwrap();
    let out = write_package(&dir, 0, &[("x y.txt", b"z")]);
    let mut archive = open(&out);
    assert_eq!(entry_string(&mut archive, "x%20y.txt"), "z");
    let block_map = entry_string(&mut archive, "AppxBlockMap.xml");
    assert!(block_map.contains(r#"Name="x%20y.txt""#), "{}", block_map);
}

#[test]
fn entries_are_sorted_by_archive_name() {
    let dir = TempDir::new().unwrap();
    let out = write_package(
        &dir,
        0,
        &[("b.txt", b"b"), ("a.txt", b"a"), ("Assets/c.txt", b"c")],
    );
    let mut archive = open(&out);
    assert_eq!(
        entry_names(&mut archive),
        [
            "Assets/c.txt",
            "a.txt",
            "b.txt",
            "[Content_Types].xml",
            "AppxBlockMap.xml"
        ]
    );
}

#[test]
fn utf8_name_flag_is_set_on_local_headers() {
    let dir = TempDir::new().unwrap();
    let out = write_package(&dir, 0, &[("hello.txt", b"hi\n")]);
    let bytes = std::fs::read(&out).unwrap();
    assert_eq!(&bytes[0..4], b"PK\x03\x04");
    let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
    assert_eq!(flags & 0x0800, 0x0800);
    // Bit 3 (data descriptor) stays clear: sizes live in the header.
    assert_eq!(flags & 0x0008, 0);
}

#[test]
fn block_map_entry_is_always_stored() {
    let dir = TempDir::new().unwrap();
    let out = write_package(&dir, 9, &[("hello.txt", b"hi\n")]);
    let mut archive = open(&out);
    let entry = archive.by_name("AppxBlockMap.xml").unwrap();
    assert_eq!(entry.compression(), CompressionMethod::Stored);
}

#[test]
fn bundle_without_manifest_fails_and_removes_output() {
    let dir = TempDir::new().unwrap();
    let local = dir.path().join("file.txt");
    std::fs::write(&local, b"contents").unwrap();
    let out = dir.path().join("out.appxbundle");
    let mut package = Appx::new(&out);
    package.set_bundle(true);
    package.add_file("file.txt", &local);
    let err = package.write(None).unwrap_err();
    assert!(matches!(err, Error::MissingManifest), "{}", err);
    assert!(!out.exists());
}

#[test]
fn bundle_with_manifest_declares_its_content_type() {
    let dir = TempDir::new().unwrap();
    let manifest = br#"<Bundle xmlns="http://schemas.microsoft.com/appx/2013/bundle"/>"#;
    let out = dir.path().join("out.appxbundle");
    let local = dir.path().join("bundle_manifest.xml");
    std::fs::write(&local, manifest).unwrap();
    let mut package = Appx::new(&out);
    package.set_bundle(true);
    package.add_file("AppxMetadata/AppxBundleManifest.xml", &local);
    package.write(None).unwrap();

    let mut archive = open(&out);
    let content_types = entry_string(&mut archive, "[Content_Types].xml");
    assert!(
        content_types.contains(r#"PartName="/AppxMetadata/AppxBundleManifest.xml""#),
        "{}",
        content_types
    );
    assert!(
        content_types.contains("application/vnd.ms-appx.bundlemanifest+xml"),
        "{}",
        content_types
    );
}

#[test]
fn identical_inputs_produce_identical_packages() {
    let dir = TempDir::new().unwrap();
    let first = write_package(&dir, 9, &[("a.txt", b"aaa"), ("b.bin", &[0u8; 1000])]);
    let first = std::fs::read(first).unwrap();
    let dir2 = TempDir::new().unwrap();
    let second = write_package(&dir2, 9, &[("a.txt", b"aaa"), ("b.bin", &[0u8; 1000])]);
    let second = std::fs::read(second).unwrap();
    assert_eq!(first, second);
}

#[test]
fn missing_source_file_aborts_and_removes_output() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out.appx");
    let mut package = Appx::new(&out);
    package.add_file("gone.txt", dir.path().join("does-not-exist"));
    let err = package.write(None).unwrap_err();
    assert!(matches!(err, Error::Io { .. }), "{}", err);
    assert!(!out.exists());
}
