//! Parser for the renderer's conversion summary line
//!
//! `convert /tmp/x/doc.docx -> /tmp/x/doc.pdf using filter : writer_pdf_Export`
use crate::error::{AppError, Result};
use std::path::PathBuf;

const ARROW: &str = "->";
const COLON: &str = ":";
const PREFIX_CONVERT: &str = "convert";
const SUFFIX_USING_FILTER: &str = "using filter";
const EXPECTED_PARTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSummary {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub filter: String,
}

/// First line of `lines` that matches the summary grammar
pub fn parse_summary<S: AsRef<str>>(lines: &[S]) -> Result<ConversionSummary> {
    let mut first_rejection = None;

    for line in lines.iter().map(|l| l.as_ref().trim()).filter(|l| !l.is_empty()) {
        match parse_line(line) {
            Ok(summary) => return Ok(summary),
            Err(e) => {
                if first_rejection.is_none() {
                    first_rejection = Some(e);
                }
            }
        }
    }

    Err(first_rejection.unwrap_or(AppError::NoOutputLines))
}

pub fn parse_line(line: &str) -> Result<ConversionSummary> {
    let halves: Vec<&str> = line.split(ARROW).collect();
    if halves.len() != EXPECTED_PARTS {
        return Err(AppError::OutputPartsMismatch {
            found: halves.len(),
            expected: EXPECTED_PARTS,
        });
    }

    let source = halves[0].trim();
    let source = source.strip_prefix(PREFIX_CONVERT).unwrap_or(source).trim();

    let tail: Vec<&str> = halves[1].split(COLON).collect();
    if tail.len() != EXPECTED_PARTS {
        return Err(AppError::OutputPartsMismatch {
            found: tail.len(),
            expected: EXPECTED_PARTS,
        });
    }

    let destination = tail[0].trim();
    let destination = destination
        .strip_suffix(SUFFIX_USING_FILTER)
        .unwrap_or(destination)
        .trim();

    Ok(ConversionSummary {
        source: PathBuf::from(source),
        destination: PathBuf::from(destination),
        filter: tail[1].trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pdf_summary() {
        let summary = parse_line(
            "convert /data/a1/doc.docx -> /data/a1/doc.pdf using filter : writer_pdf_Export",
        )
        .unwrap();

        assert_eq!(summary.source, PathBuf::from("/data/a1/doc.docx"));
        assert_eq!(summary.destination, PathBuf::from("/data/a1/doc.pdf"));
        assert_eq!(summary.filter, "writer_pdf_Export");
    }

    #[test]
    fn test_skips_leading_warnings() {
        let lines = vec![
            "javaldx: Could not find a Java Runtime Environment!",
            "",
            "convert /w/doc.pdf -> /w/doc.png using filter : draw_png_Export",
        ];

        let summary = parse_summary(&lines).unwrap();
        assert_eq!(summary.destination, PathBuf::from("/w/doc.png"));
    }

    #[test]
    fn test_no_lines() {
        let lines: Vec<String> = vec![String::new(), "   ".to_string()];
        assert!(matches!(parse_summary(&lines), Err(AppError::NoOutputLines)));
        let empty: Vec<&str> = Vec::new();
        assert!(matches!(parse_summary(&empty), Err(AppError::NoOutputLines)));
    }

    #[test]
    fn test_reports_first_rejected_line() {
        let lines = vec!["Error: source file could not be loaded"];
        let err = parse_summary(&lines).unwrap_err();
        assert_eq!(
            err.to_string(),
            "arrow/colon separated parts count mismatch, 1 vs 2"
        );
    }

    #[test]
    fn test_rejects_extra_colons() {
        let err = parse_line("convert C:/a.doc -> C:/a.pdf using filter : x").unwrap_err();
        assert!(matches!(
            err,
            AppError::OutputPartsMismatch {
                found: 3,
                expected: 2
            }
        ));
    }
}
