//! Payload-shape validation
//!
//! These validators answer one question: "are these bytes a well-formed
//! instance of the expected shape?" They run after transport succeeds and
//! before a feed parser interprets the content, and they never surface a raw
//! parser error without the origin URI attached.
//!
//! Validation is all-or-nothing: a payload is either fully accepted or fully
//! rejected, never partially.

use crate::error::{Result, ValidationError};
use serde_json::Value;
use std::io::{BufRead, Read, Seek};
use url::Url;

/// Name of the descriptor entry every package archive must carry
pub const PACKAGE_DESCRIPTOR_ENTRY: &str = "manifest.json";

/// Validate that the payload parses as a single JSON object
///
/// Arrays and scalars are rejected. Any parse failure is wrapped as
/// [`ValidationError::InvalidJsonObject`] with the origin URI.
pub fn validate_json_object<R: Read>(uri: &Url, reader: R) -> Result<()> {
    validate_json_object_with(uri, reader, |_| Ok(()))
}

/// Validate a JSON object payload and apply a caller-supplied structural check
///
/// The structural check runs only after the payload has parsed as an object.
/// Check failures propagate as-is; parse failures are wrapped with the URI.
pub fn validate_json_object_with<R, F>(uri: &Url, reader: R, check: F) -> Result<()>
where
    R: Read,
    F: FnOnce(&serde_json::Map<String, Value>) -> std::result::Result<(), ValidationError>,
{
    let value: Value =
        serde_json::from_reader(reader).map_err(|e| ValidationError::InvalidJsonObject {
            uri: uri.clone(),
            source: Box::new(e),
        })?;

    let object = value
        .as_object()
        .ok_or_else(|| ValidationError::InvalidJsonObject {
            uri: uri.clone(),
            source: Box::from("the document is not a JSON object"),
        })?;

    check(object)?;
    Ok(())
}

/// Validate a service index payload
///
/// Must be a JSON object; a `resources` property, if present, must be an
/// array.
pub fn validate_service_index<R: Read>(uri: &Url, reader: R) -> Result<()> {
    validate_json_object_with(uri, reader, |object| {
        require_absent_or_array(uri, object, "resources")
    })
}

/// Validate a per-package version index payload
///
/// Must be a JSON object; a `versions` property, if present, must be an
/// array.
pub fn validate_version_index<R: Read>(uri: &Url, reader: R) -> Result<()> {
    validate_json_object_with(uri, reader, |object| {
        require_absent_or_array(uri, object, "versions")
    })
}

fn require_absent_or_array(
    uri: &Url,
    object: &serde_json::Map<String, Value>,
    field: &'static str,
) -> std::result::Result<(), ValidationError> {
    match object.get(field) {
        None => Ok(()),
        Some(Value::Array(_)) => Ok(()),
        Some(_) => Err(ValidationError::IndexFieldNotArray {
            uri: uri.clone(),
            field,
        }),
    }
}

/// Validate a package archive payload
///
/// The payload must open as a ZIP archive and contain a readable
/// [`PACKAGE_DESCRIPTOR_ENTRY`]. Failures opening the archive or reading the
/// descriptor are wrapped as [`ValidationError::InvalidArchive`].
pub fn validate_package_archive<R: Read + Seek>(uri: &Url, reader: R) -> Result<()> {
    let wrap = |source: Box<dyn std::error::Error + Send + Sync>| ValidationError::InvalidArchive {
        uri: uri.clone(),
        source,
    };

    let mut archive = zip::ZipArchive::new(reader).map_err(|e| wrap(Box::new(e)))?;
    let mut descriptor = archive
        .by_name(PACKAGE_DESCRIPTOR_ENTRY)
        .map_err(|e| wrap(Box::new(e)))?;

    // Reading the entry end to end forces the CRC check, catching truncated
    // archives whose central directory is still intact.
    std::io::copy(&mut descriptor, &mut std::io::sink()).map_err(|e| wrap(Box::new(e)))?;

    Ok(())
}

/// Validate a markup payload
///
/// The payload must parse as a single well-formed XML document: matching
/// tags, exactly one root element.
pub fn validate_xml<R: BufRead>(uri: &Url, reader: R) -> Result<()> {
    let wrap = |source: Box<dyn std::error::Error + Send + Sync>| ValidationError::InvalidXml {
        uri: uri.clone(),
        source,
    };

    let mut xml = quick_xml::Reader::from_reader(reader);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut roots = 0usize;

    loop {
        use quick_xml::events::Event;

        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Empty(_)) => {
                if depth == 0 {
                    roots += 1;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(wrap(Box::new(e)).into()),
        }
        buf.clear();
    }

    if roots != 1 {
        return Err(wrap(Box::from("the document must have exactly one root element")).into());
    }

    Ok(())
}
