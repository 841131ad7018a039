//! Metadata extraction and content hashing against in-memory epub fixtures.

mod common;

use bookshare::hash::{ContentHasher, hash_bytes, hash_reader};
use bookshare::library::{ExtractError, Identifier, extract, extract_bytes};
use chrono::NaiveDate;
use zip::CompressionMethod;

use common::{OPF_PATH, TEST_BOOK_METADATA, archive, container, epub, opf, test_book, zip_with};

const COVER_JPG: &[u8] = b"\xff\xd8\xff\xe0fake-jpeg";
const COVER_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-png";

#[test]
fn test_book_scenario() {
    let meta = extract_bytes(&test_book()).unwrap();
    assert_eq!(meta.title, "Test Book");
    assert_eq!(meta.creators, Some(vec!["Jane Doe".to_string()]));
    assert_eq!(meta.language, "en");
    assert_eq!(meta.identifiers, vec![Identifier::new("ISBN", "123")]);
    assert_eq!(meta.publication_date, None);
    assert!(meta.cover.is_none());
}

#[test]
fn extract_reads_from_any_seekable_source() {
    let data = test_book();
    let from_reader = extract(std::io::Cursor::new(data.clone())).unwrap();
    assert_eq!(from_reader, extract_bytes(&data).unwrap());
}

#[test]
fn deflated_entries_are_read() {
    let container = container(OPF_PATH);
    let package = opf(TEST_BOOK_METADATA, "");
    let data = zip_with(
        &[
            ("META-INF/container.xml", container.as_bytes()),
            (OPF_PATH, package.as_bytes()),
        ],
        CompressionMethod::Deflated,
    );
    assert_eq!(extract_bytes(&data).unwrap().title, "Test Book");
}

#[test]
fn missing_language_is_an_error() {
    let data = epub(
        r#"<dc:title>Test Book</dc:title>
    <dc:identifier opf:scheme="ISBN">123</dc:identifier>"#,
        "",
        &[],
    );
    let err = extract_bytes(&data).unwrap_err();
    assert!(matches!(
        err,
        ExtractError::MissingRequiredField { field: "language" }
    ));
}

#[test]
fn blank_title_is_an_error() {
    let data = epub(
        r#"<dc:title>   </dc:title>
    <dc:language>en</dc:language>
    <dc:identifier opf:scheme="ISBN">123</dc:identifier>"#,
        "",
        &[],
    );
    assert!(matches!(
        extract_bytes(&data).unwrap_err(),
        ExtractError::MissingRequiredField { field: "title" }
    ));
}

#[test]
fn identifiers_need_text_and_a_scheme() {
    let data = epub(
        r#"<dc:title>T</dc:title>
    <dc:language>en</dc:language>
    <dc:identifier opf:scheme="ISBN"></dc:identifier>
    <dc:identifier>no-scheme</dc:identifier>"#,
        "",
        &[],
    );
    assert!(matches!(
        extract_bytes(&data).unwrap_err(),
        ExtractError::MissingRequiredField {
            field: "identifiers"
        }
    ));
}

#[test]
fn identifier_scheme_falls_back_to_id() {
    let data = epub(
        r#"<dc:title>T</dc:title>
    <dc:creator>First</dc:creator>
    <dc:creator>Second</dc:creator>
    <dc:language>fr</dc:language>
    <dc:identifier id="bookid">urn:uuid:1234</dc:identifier>
    <dc:identifier id="isbn" opf:scheme="ISBN">978</dc:identifier>
    <dc:date>2020-05-17</dc:date>"#,
        "",
        &[],
    );
    let meta = extract_bytes(&data).unwrap();
    assert_eq!(
        meta.identifiers,
        vec![
            Identifier::new("bookid", "urn:uuid:1234"),
            Identifier::new("ISBN", "978"),
        ]
    );
    assert_eq!(
        meta.creators,
        Some(vec!["First".to_string(), "Second".to_string()])
    );
    assert_eq!(meta.publication_date, NaiveDate::from_ymd_opt(2020, 5, 17));
}

#[test]
fn empty_scheme_falls_back_to_id() {
    let data = epub(
        r#"<dc:title>T</dc:title>
    <dc:language>en</dc:language>
    <dc:identifier opf:scheme="" id="uid">1</dc:identifier>
    <dc:identifier opf:scheme="" id="">2</dc:identifier>"#,
        "",
        &[],
    );
    let meta = extract_bytes(&data).unwrap();
    assert_eq!(meta.identifiers, vec![Identifier::new("uid", "1")]);
}

#[test]
fn creators_are_trimmed_and_blanks_dropped() {
    let data = epub(
        r#"<dc:title>T</dc:title>
    <dc:creator>  Padded Name  </dc:creator>
    <dc:creator>   </dc:creator>
    <dc:creator>Second</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier id="uid">1</dc:identifier>"#,
        "",
        &[],
    );
    let meta = extract_bytes(&data).unwrap();
    assert_eq!(
        meta.creators,
        Some(vec!["Padded Name".to_string(), "Second".to_string()])
    );
}

#[test]
fn no_creators_is_none() {
    let data = epub(
        r#"<dc:title>T</dc:title>
    <dc:language>en</dc:language>
    <dc:identifier id="uid">1</dc:identifier>
    <dc:date>sometime</dc:date>"#,
        "",
        &[],
    );
    let meta = extract_bytes(&data).unwrap();
    assert_eq!(meta.creators, None);
    assert_eq!(meta.publication_date, None);
}

#[test]
fn prefixes_are_matched_literally() {
    // Same Dublin Core namespace, different prefix: not recognised.
    let data = epub(
        r#"<purl:title xmlns:purl="http://purl.org/dc/elements/1.1/">T</purl:title>
    <dc:language>en</dc:language>
    <dc:identifier id="uid">1</dc:identifier>"#,
        "",
        &[],
    );
    assert!(matches!(
        extract_bytes(&data).unwrap_err(),
        ExtractError::MissingRequiredField { field: "title" }
    ));
}

#[test]
fn structural_failures() {
    let package = opf(TEST_BOOK_METADATA, "");

    let no_container = archive(&[(OPF_PATH, package.as_bytes())]);
    assert!(matches!(
        extract_bytes(&no_container).unwrap_err(),
        ExtractError::ContainerNotFound
    ));

    let empty_container = archive(&[(
        "META-INF/container.xml",
        &b"<container><rootfiles/></container>"[..],
    )]);
    assert!(matches!(
        extract_bytes(&empty_container).unwrap_err(),
        ExtractError::MalformedContainer
    ));

    let container_xml = container("OEBPS/missing.opf");
    let dangling = archive(&[
        ("META-INF/container.xml", container_xml.as_bytes()),
        (OPF_PATH, package.as_bytes()),
    ]);
    match extract_bytes(&dangling).unwrap_err() {
        ExtractError::ManifestNotFound { path } => assert_eq!(path, "OEBPS/missing.opf"),
        other => panic!("unexpected {other:?}"),
    }

    let container_xml = container(OPF_PATH);
    let no_metadata = archive(&[
        ("META-INF/container.xml", container_xml.as_bytes()),
        (
            OPF_PATH,
            &b"<package><manifest></manifest></package>"[..],
        ),
    ]);
    assert!(matches!(
        extract_bytes(&no_metadata).unwrap_err(),
        ExtractError::MetadataBlockMissing
    ));
}

#[test]
fn image_cover_carries_its_media_type() {
    let data = epub(
        TEST_BOOK_METADATA,
        r#"<item id="cover" href="images/cover.png" media-type="image/png"/>"#,
        &[("OEBPS/images/cover.png", COVER_PNG)],
    );
    let cover = extract_bytes(&data).unwrap().cover.unwrap();
    assert_eq!(&cover.bytes[..], COVER_PNG);
    assert_eq!(cover.mime_type.as_deref(), Some("image/png"));
}

#[test]
fn xhtml_cover_page_resolves_its_image() {
    let page = br#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
  <body><div><img src="../images/cover.jpg" alt="cover"/></div></body>
</html>"#;
    let data = epub(
        TEST_BOOK_METADATA,
        r#"<item id="cover" href="text/cover.xhtml" media-type="application/xhtml+xml"/>"#,
        &[
            ("OEBPS/text/cover.xhtml", &page[..]),
            ("OEBPS/images/cover.jpg", COVER_JPG),
        ],
    );
    let cover = extract_bytes(&data).unwrap().cover.unwrap();
    assert_eq!(&cover.bytes[..], COVER_JPG);
    assert_eq!(cover.mime_type, None);
}

#[test]
fn cover_src_loses_only_one_parent_segment() {
    // `../../images/cover.jpg` becomes `../images/cover.jpg`, which no entry
    // ends with, even though `images/cover.jpg` exists.
    let page = br#"<html><body><img src="../../images/cover.jpg"/></body></html>"#;
    let data = epub(
        TEST_BOOK_METADATA,
        r#"<item id="cover" href="text/cover.xhtml" media-type="application/xhtml+xml"/>"#,
        &[
            ("OEBPS/text/cover.xhtml", &page[..]),
            ("OEBPS/images/cover.jpg", COVER_JPG),
        ],
    );
    let meta = extract_bytes(&data).unwrap();
    assert!(meta.cover.is_none());
    assert_eq!(meta.title, "Test Book");
}

#[test]
fn broken_covers_are_just_absent() {
    let cases = [
        // Referenced entry is missing.
        r#"<item id="cover" href="images/gone.png" media-type="image/png"/>"#,
        // No media type.
        r#"<item id="cover" href="images/cover.png"/>"#,
        // Unsupported media type.
        r#"<item id="cover" href="images/cover.png" media-type="application/pdf"/>"#,
        // Not called "cover".
        r#"<item id="cover-image" href="images/cover.png" media-type="image/png"/>"#,
    ];
    for manifest in cases {
        let data = epub(
            TEST_BOOK_METADATA,
            manifest,
            &[("OEBPS/images/cover.png", COVER_PNG)],
        );
        let meta = extract_bytes(&data).unwrap();
        assert!(meta.cover.is_none(), "{manifest}");
        assert_eq!(meta.title, "Test Book");
    }
}

#[test]
fn xhtml_cover_without_image_is_absent() {
    let data = epub(
        TEST_BOOK_METADATA,
        r#"<item id="cover" href="cover.xhtml" media-type="application/xhtml+xml"/>"#,
        &[("OEBPS/cover.xhtml", &b"<html><body>Title page</body></html>"[..])],
    );
    assert!(extract_bytes(&data).unwrap().cover.is_none());
}

#[test]
fn hash_is_deterministic_and_streams() {
    let data = test_book();
    let whole = hash_bytes(&data);
    assert_eq!(whole, hash_bytes(&data));
    assert!(whole.is_well_formed());
    assert!(whole.as_str().starts_with('b'));

    assert_eq!(hash_reader(&data[..]).unwrap(), whole);

    let mut hasher = ContentHasher::new();
    for chunk in data.chunks(7) {
        hasher.update(chunk);
    }
    assert_eq!(hasher.finish(), whole);

    assert_ne!(hash_bytes(&common::book_titled("Other")), whole);
}
