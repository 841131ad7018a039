//! Epub metadata extraction over the `zip` crate.
//!
//! `META-INF/container.xml` names the package document; its `<metadata>`
//! block supplies the bibliographic fields and its `<manifest>` the cover.

use std::io::{Read, Seek};

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::library::error::{ExtractError, ExtractResult};
use crate::library::model::{BookMetadata, Cover, Identifier};
use crate::library::parser::html;
use crate::library::parser::xml::{self, Element};

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Zip archive plus its entry names in central-directory order.
struct Archive<R> {
    zip: ZipArchive<R>,
    names: Vec<String>,
}

impl<R: Read + Seek> Archive<R> {
    fn open(reader: R) -> ExtractResult<Self> {
        let mut zip = ZipArchive::new(reader).map_err(|e| ExtractError::Archive {
            message: e.to_string(),
        })?;
        let mut names = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let entry = zip.by_index_raw(i).map_err(|e| ExtractError::Archive {
                message: format!("entry {i}: {e}"),
            })?;
            names.push(entry.name().to_string());
        }
        Ok(Self { zip, names })
    }

    /// Bytes of the entry called exactly `name`, `None` if there is none.
    fn read(&mut self, name: &str) -> ExtractResult<Option<Vec<u8>>> {
        let mut entry = match self.zip.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(ExtractError::Archive {
                    message: format!("{name}: {e}"),
                });
            }
        };
        let mut buf = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut buf)
            .map_err(|source| ExtractError::Io {
                entry: name.to_string(),
                source,
            })?;
        Ok(Some(buf))
    }

    fn read_text(&mut self, name: &str) -> ExtractResult<Option<String>> {
        Ok(self
            .read(name)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Bytes of the first entry whose name ends with `suffix`. Failures are
    /// folded into `None`; this only serves cover lookup.
    fn read_suffix(&mut self, suffix: &str) -> Option<Bytes> {
        if suffix.is_empty() {
            return None;
        }
        let name = self.names.iter().find(|n| n.ends_with(suffix))?.clone();
        match self.read(&name) {
            Ok(bytes) => bytes.map(Bytes::from),
            Err(e) => {
                tracing::debug!(entry = %name, error = %e, "cover entry unreadable");
                None
            }
        }
    }
}

/// Extract metadata from an epub archive.
pub fn extract<R: Read + Seek>(reader: R) -> ExtractResult<BookMetadata> {
    let mut archive = Archive::open(reader)?;

    let container = archive
        .read_text(CONTAINER_PATH)?
        .ok_or(ExtractError::ContainerNotFound)?;
    let container = xml::parse(&container, CONTAINER_PATH)?;
    let package_path = container
        .first("rootfile")
        .and_then(|rootfile| rootfile.attr("full-path"))
        .filter(|path| !path.is_empty())
        .ok_or(ExtractError::MalformedContainer)?
        .to_string();

    let package = archive
        .read_text(&package_path)?
        .ok_or_else(|| ExtractError::ManifestNotFound {
            path: package_path.clone(),
        })?;
    let document = xml::parse(&package, &package_path)?;
    let package = document
        .first("package")
        .ok_or(ExtractError::MetadataBlockMissing)?;
    let metadata = package
        .first("metadata")
        .ok_or(ExtractError::MetadataBlockMissing)?;

    let title = required_text(metadata, "dc:title", "title")?;
    let language = required_text(metadata, "dc:language", "language")?;

    let creators: Vec<String> = metadata
        .descendants("dc:creator")
        .into_iter()
        .map(|el| el.text().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();

    let identifiers: Vec<Identifier> = metadata
        .descendants("dc:identifier")
        .into_iter()
        .filter_map(|el| {
            let value = el.text().trim().to_string();
            if value.is_empty() {
                return None;
            }
            let scheme = el
                .attr("opf:scheme")
                .filter(|s| !s.is_empty())
                .or_else(|| el.attr("id").filter(|s| !s.is_empty()))?;
            Some(Identifier::new(scheme, value))
        })
        .collect();
    if identifiers.is_empty() {
        return Err(ExtractError::MissingRequiredField {
            field: "identifiers",
        });
    }

    let publication_date = metadata
        .first("dc:date")
        .and_then(|el| parse_date(&el.text()));

    let cover = resolve_cover(&mut archive, package);
    tracing::debug!(
        %title,
        identifiers = identifiers.len(),
        has_cover = cover.is_some(),
        "extracted epub metadata"
    );

    Ok(BookMetadata {
        title,
        creators: (!creators.is_empty()).then_some(creators),
        language,
        identifiers,
        publication_date,
        cover,
    })
}

fn required_text(metadata: &Element, name: &str, field: &'static str) -> ExtractResult<String> {
    metadata
        .first(name)
        .map(|el| el.text().trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(ExtractError::MissingRequiredField { field })
}

/// `dc:date` is W3CDTF: a full timestamp, or a date truncated to month or
/// year. Truncated dates land on the first day of the period.
fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{text}-01-01"), "%Y-%m-%d"))
        .ok()
}

/// Manifest item `id="cover"`, either an image or an XHTML page wrapping one.
fn resolve_cover<R: Read + Seek>(archive: &mut Archive<R>, package: &Element) -> Option<Cover> {
    let manifest = package.first("manifest")?;
    let item = manifest
        .descendants("item")
        .into_iter()
        .find(|item| item.attr("id") == Some("cover"))?;
    let href = item.attr("href")?;
    let media_type = item.attr("media-type")?;

    if media_type.starts_with("image/") {
        let bytes = archive.read_suffix(href)?;
        Some(Cover {
            bytes,
            mime_type: Some(media_type.to_string()),
        })
    } else if media_type == "application/xhtml+xml" {
        let page = archive.read_suffix(href)?;
        let src = html::first_image_src(&String::from_utf8_lossy(&page))?;
        let src = src.replacen("../", "", 1);
        let bytes = archive.read_suffix(&src)?;
        Some(Cover {
            bytes,
            mime_type: None,
        })
    } else {
        tracing::debug!(media_type, "cover item has unsupported media type");
        None
    }
}
