//! Per-mime-type file size limits
//!
//! Loaded once at startup from an XML document:
//!
//! ```xml
//! <Settings>
//!   <FileSizeLimiter>
//!     <MimeType name="application/pdf" sizeLimit="10000000"/>
//!   </FileSizeLimiter>
//! </Settings>
//! ```
use crate::error::{AppError, Result};
use crate::mime;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

pub const MB: u64 = 1_000_000;

/// Upper bound accepted for any configured limit
pub const INTERNAL_FILE_SIZE_LIMIT: u64 = 1000 * MB;

#[derive(Debug, Clone, Default)]
pub struct FileSizeLimiter {
    limits: HashMap<String, u64>,
}

impl FileSizeLimiter {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let limiter = Self::from_xml(&contents)?;
        debug!(settings = %path.display(), mime_types = limiter.limits.len(), "File size limits loaded");
        Ok(limiter)
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut limiter = Self::default();
        for (name, size_limit) in read_entries(xml)? {
            limiter.insert(name, size_limit)?;
        }
        Ok(limiter)
    }

    fn insert(&mut self, mime_type: String, size_limit: u64) -> Result<()> {
        if !mime::is_supported(&mime_type) {
            warn!(mime_type = %mime_type, "Skipping size limit for unsupported mime type");
            return Ok(());
        }
        if self.limits.contains_key(&mime_type) {
            return Err(AppError::DuplicateMimeType(mime_type));
        }
        if size_limit > INTERNAL_FILE_SIZE_LIMIT {
            return Err(AppError::LimitAboveInternalCap(mime_type));
        }

        self.limits.insert(mime_type, size_limit);
        Ok(())
    }

    /// Size limit in bytes for `mime_type`
    pub fn limit(&self, mime_type: &str) -> Result<u64> {
        self.limits
            .get(mime_type)
            .copied()
            .ok_or_else(|| AppError::MimeTypeNotAvailable(mime_type.to_string()))
    }

    pub fn check(&self, mime_type: &str, size: u64) -> Result<()> {
        let limit = self.limit(mime_type)?;
        if size > limit {
            return Err(AppError::FileTooBig { size, limit });
        }
        Ok(())
    }
}

fn read_entries(xml: &str) -> Result<Vec<(String, u64)>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut entries = Vec::new();
    let mut seen_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                check_root(&e, &path, &mut seen_root)?;
                if in_limiter_section(&path) && e.local_name().as_ref() == b"MimeType" {
                    entries.push(read_mime_type(&e)?);
                }
                path.push(e.local_name().as_ref().to_vec());
            }
            Ok(Event::Empty(e)) => {
                check_root(&e, &path, &mut seen_root)?;
                if in_limiter_section(&path) && e.local_name().as_ref() == b"MimeType" {
                    entries.push(read_mime_type(&e)?);
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(AppError::LimitSettings(e.to_string())),
        }
    }

    if !seen_root {
        return Err(AppError::LimitSettings("missing Settings element".into()));
    }

    Ok(entries)
}

fn check_root(element: &BytesStart<'_>, path: &[Vec<u8>], seen_root: &mut bool) -> Result<()> {
    if !path.is_empty() {
        return Ok(());
    }
    if *seen_root || element.local_name().as_ref() != b"Settings" {
        return Err(AppError::LimitSettings(format!(
            "unexpected root element '{}'",
            String::from_utf8_lossy(element.local_name().as_ref())
        )));
    }
    *seen_root = true;
    Ok(())
}

fn in_limiter_section(path: &[Vec<u8>]) -> bool {
    path.len() == 2 && path[0] == b"Settings" && path[1] == b"FileSizeLimiter"
}

fn read_mime_type(element: &BytesStart<'_>) -> Result<(String, u64)> {
    let mut name = None;
    let mut size_limit = None;

    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| AppError::LimitSettings(e.to_string()))?;
        let value = attribute
            .unescape_value()
            .map_err(|e| AppError::LimitSettings(e.to_string()))?;

        match attribute.key.as_ref() {
            b"name" => name = Some(value.into_owned()),
            b"sizeLimit" => {
                let parsed = value.trim().parse::<u64>().map_err(|e| {
                    AppError::LimitSettings(format!("invalid sizeLimit '{value}': {e}"))
                })?;
                size_limit = Some(parsed);
            }
            _ => {}
        }
    }

    match (name, size_limit) {
        (Some(name), Some(size_limit)) => Ok((name, size_limit)),
        _ => Err(AppError::LimitSettings(
            "MimeType requires name and sizeLimit attributes".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Settings>
    <FileSizeLimiter>
        <MimeType name="application/pdf" sizeLimit="1000"/>
        <MimeType name="application/msword" sizeLimit="5000000"></MimeType>
        <MimeType name="video/mp4" sizeLimit="1"/>
    </FileSizeLimiter>
</Settings>"#;

    #[test]
    fn test_loads_known_mime_types() {
        let limiter = FileSizeLimiter::from_xml(SETTINGS).unwrap();
        assert_eq!(limiter.limit("application/pdf").unwrap(), 1000);
        assert_eq!(limiter.limit("application/msword").unwrap(), 5_000_000);
    }

    #[test]
    fn test_bundled_settings_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/file_size_limits.xml");
        let limiter = FileSizeLimiter::from_file(&path).unwrap();
        assert_eq!(limiter.limit(mime::APPLICATION_PDF).unwrap(), 100 * MB);
        assert_eq!(limiter.limit(mime::APPLICATION_OOXML_DOCUMENT).unwrap(), 50 * MB);
    }

    #[test]
    fn test_skips_unsupported_mime_types() {
        let limiter = FileSizeLimiter::from_xml(SETTINGS).unwrap();
        let err = limiter.limit("video/mp4").unwrap_err();
        assert_eq!(err.to_string(), "mime type 'video/mp4' is not available");
    }

    #[test]
    fn test_check_against_limit() {
        let limiter = FileSizeLimiter::from_xml(SETTINGS).unwrap();
        assert!(limiter.check("application/pdf", 10).is_ok());
        assert!(limiter.check("application/pdf", 1000).is_ok());

        let err = limiter.check("application/pdf", 2000).unwrap_err();
        assert!(matches!(err, AppError::FileTooBig { size: 2000, limit: 1000 }));
    }

    #[test]
    fn test_rejects_duplicates() {
        let xml = r#"<Settings><FileSizeLimiter>
            <MimeType name="image/png" sizeLimit="10"/>
            <MimeType name="image/png" sizeLimit="20"/>
        </FileSizeLimiter></Settings>"#;

        let err = FileSizeLimiter::from_xml(xml).unwrap_err();
        assert_eq!(err.to_string(), "duplicate mime type 'image/png'");
    }

    #[test]
    fn test_rejects_limit_above_internal_cap() {
        let xml = r#"<Settings><FileSizeLimiter>
            <MimeType name="text/csv" sizeLimit="1000000001"/>
        </FileSizeLimiter></Settings>"#;

        assert!(matches!(
            FileSizeLimiter::from_xml(xml).unwrap_err(),
            AppError::LimitAboveInternalCap(_)
        ));
    }

    #[test]
    fn test_rejects_malformed_size() {
        let xml = r#"<Settings><FileSizeLimiter>
            <MimeType name="text/csv" sizeLimit="-5"/>
        </FileSizeLimiter></Settings>"#;

        assert!(matches!(
            FileSizeLimiter::from_xml(xml).unwrap_err(),
            AppError::LimitSettings(_)
        ));
    }

    #[test]
    fn test_rejects_wrong_root() {
        let xml = r#"<Config><FileSizeLimiter/></Config>"#;
        assert!(FileSizeLimiter::from_xml(xml).is_err());
    }

    #[test]
    fn test_ignores_entries_outside_limiter_section() {
        let xml = r#"<Settings>
            <MimeType name="application/pdf" sizeLimit="10"/>
            <FileSizeLimiter/>
        </Settings>"#;

        let limiter = FileSizeLimiter::from_xml(xml).unwrap();
        assert!(limiter.limit("application/pdf").is_err());
    }
}
