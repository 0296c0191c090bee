//! Supported mime types and their file extensions
use crate::error::{AppError, Result};

pub const APPLICATION_MICROSOFT_EXCEL: &str = "application/vnd.ms-excel";
pub const APPLICATION_MICROSOFT_WORD: &str = "application/msword";
pub const APPLICATION_MICROSOFT_WORD_MACRO: &str = "application/vnd.ms-word.document.macroEnabled.12";
pub const APPLICATION_OASIS_TEXT: &str = "application/vnd.oasis.opendocument.text";
pub const APPLICATION_OASIS_SPREADSHEET: &str = "application/vnd.oasis.opendocument.spreadsheet";
pub const APPLICATION_OOXML_DOCUMENT: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const APPLICATION_OOXML_WORKBOOK: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const APPLICATION_PDF: &str = "application/pdf";
pub const APPLICATION_POSTSCRIPT: &str = "application/postscript";
pub const APPLICATION_RTF: &str = "application/rtf";
pub const APPLICATION_APPLE_NUMBERS: &str = "application/vnd.apple.numbers";
pub const APPLICATION_APPLE_PAGES: &str = "application/vnd.apple.pages";
pub const APPLICATION_WORD_PERFECT: &str = "application/vnd.wordperfect";
pub const APPLICATION_WORD_PERFECT_51: &str = "application/wordperfect5.1";
pub const IMAGE_PNG: &str = "image/png";
pub const FONT_OTF: &str = "font/otf";
pub const FONT_TTF: &str = "font/ttf";
pub const TEXT_CSV: &str = "text/csv";
pub const TEXT_RTF: &str = "text/rtf";

pub const EXTENSION_SEPARATOR: &str = ".";

static EXTENSIONS: &[(&str, &[&str])] = &[
    (APPLICATION_MICROSOFT_WORD, &["doc"]),
    (APPLICATION_OOXML_DOCUMENT, &["docx"]),
    (APPLICATION_MICROSOFT_WORD_MACRO, &["docm"]),
    (APPLICATION_APPLE_NUMBERS, &["numbers"]),
    (APPLICATION_OASIS_SPREADSHEET, &["ods"]),
    (APPLICATION_OASIS_TEXT, &["odt"]),
    (FONT_OTF, &["otf"]),
    (APPLICATION_APPLE_PAGES, &["pages"]),
    (APPLICATION_PDF, &["pdf"]),
    (APPLICATION_POSTSCRIPT, &["eps"]),
    (APPLICATION_RTF, &["rtf"]),
    (TEXT_RTF, &["rtf"]),
    (FONT_TTF, &["ttf"]),
    (APPLICATION_WORD_PERFECT, &["wpd"]),
    (APPLICATION_WORD_PERFECT_51, &["wpd"]),
    (APPLICATION_MICROSOFT_EXCEL, &["xls"]),
    (APPLICATION_OOXML_WORKBOOK, &["xlsx"]),
    (IMAGE_PNG, &["png"]),
    (TEXT_CSV, &["csv"]),
];

/// All known extensions of a mime type
pub fn extensions(mime_type: &str) -> Result<&'static [&'static str]> {
    EXTENSIONS
        .iter()
        .find(|(known, _)| *known == mime_type)
        .map(|(_, extensions)| *extensions)
        .ok_or_else(|| AppError::MimeTypeNotAvailable(mime_type.to_string()))
}

/// Primary extension of a mime type
pub fn extension(mime_type: &str) -> Result<&'static str> {
    extensions(mime_type)?
        .first()
        .copied()
        .ok_or_else(|| AppError::MimeTypeHasNoExtensions(mime_type.to_string()))
}

pub fn is_supported(mime_type: &str) -> bool {
    extensions(mime_type).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extensions() {
        assert_eq!(extension(APPLICATION_PDF).unwrap(), "pdf");
        assert_eq!(extension(IMAGE_PNG).unwrap(), "png");
        assert_eq!(extension(TEXT_RTF).unwrap(), "rtf");
        assert_eq!(extension(APPLICATION_OOXML_WORKBOOK).unwrap(), "xlsx");
    }

    #[test]
    fn test_unknown_mime_type() {
        let err = extension("video/mp4").unwrap_err();
        assert_eq!(err.to_string(), "mime type 'video/mp4' is not available");
        assert!(!is_supported("video/mp4"));
    }
}
