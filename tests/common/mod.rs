//! Epub fixtures built in memory with the `zip` writer.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

pub const OPF_PATH: &str = "OEBPS/content.opf";

/// A zip archive holding `entries` in order.
pub fn zip_with(entries: &[(&str, &[u8])], method: CompressionMethod) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(method);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    zip_with(entries, CompressionMethod::Stored)
}

pub fn container(full_path: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{full_path}" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#
    )
}

/// An OPF package document with the given `<metadata>` and `<manifest>`
/// bodies.
pub fn opf(metadata: &str, manifest: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
{metadata}
  </metadata>
  <manifest>
{manifest}
  </manifest>
</package>"#
    )
}

/// A complete epub: container, package document at [`OPF_PATH`] and
/// `extra` entries.
pub fn epub(metadata: &str, manifest: &str, extra: &[(&str, &[u8])]) -> Vec<u8> {
    let container = container(OPF_PATH);
    let package = opf(metadata, manifest);
    let mut entries: Vec<(&str, &[u8])> = vec![
        ("mimetype", &b"application/epub+zip"[..]),
        ("META-INF/container.xml", container.as_bytes()),
        (OPF_PATH, package.as_bytes()),
    ];
    entries.extend_from_slice(extra);
    archive(&entries)
}

pub const TEST_BOOK_METADATA: &str = r#"
    <dc:title>Test Book</dc:title>
    <dc:creator>Jane Doe</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier id="uid" opf:scheme="ISBN">123</dc:identifier>"#;

/// "Test Book" by Jane Doe, English, ISBN 123, no date, no cover.
pub fn test_book() -> Vec<u8> {
    epub(
        TEST_BOOK_METADATA,
        r#"<item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>"#,
        &[(
            "OEBPS/ch1.xhtml",
            &b"<html><body><p>Once.</p></body></html>"[..],
        )],
    )
}

/// A minimal valid epub with its own title, so every call with a new title
/// hashes differently.
pub fn book_titled(title: &str) -> Vec<u8> {
    epub(
        &format!(
            r#"<dc:title>{title}</dc:title>
    <dc:language>en</dc:language>
    <dc:identifier id="uid">urn:uuid:{title}</dc:identifier>"#
        ),
        "",
        &[],
    )
}
