//! File extraction for the command-line front end
//!
//! The engine only ever sees plain text; this module turns text and PDF files
//! into that text.

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text;
use std::fs;
use std::path::Path;

/// Source formats the reader can extract text from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Text,
}

impl SourceFormat {
    /// Pick the extractor for a MIME type
    pub fn from_mime(mime_type: &str) -> Result<Self> {
        if mime_type.starts_with("application/pdf") {
            Ok(SourceFormat::Pdf)
        } else if mime_type.starts_with("text/") {
            Ok(SourceFormat::Text)
        } else {
            bail!(
                "Unsupported document format: {}. Only text and PDF files are supported.",
                mime_type
            )
        }
    }

    /// Extracted text of the file at `path`
    ///
    /// Text files are returned verbatim. PDF text is normalised because the
    /// extractor pads it with blank lines and runs of spaces.
    pub fn extract(self, path: &Path) -> Result<String> {
        match self {
            SourceFormat::Text => fs::read_to_string(path)
                .with_context(|| format!("Failed to read text file: {}", path.display())),
            SourceFormat::Pdf => {
                let raw = extract_text(path).with_context(|| {
                    format!("Failed to extract text from PDF: {}", path.display())
                })?;
                let text = normalize_whitespace(&raw);
                if text.is_empty() {
                    warn!("No text extracted from {}", path.display());
                }
                Ok(text)
            }
        }
    }
}

/// A file read from disk, ready for ingestion
#[derive(Debug, Clone)]
pub struct Document {
    pub content: String,
    /// Default document id, the file name
    pub document_id: String,
    pub filename: String,
    pub mime_type: String,
    pub format: SourceFormat,
}

impl Document {
    /// Read a text or PDF file
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("Invalid file name: {}", path.display()))?
            .to_string();

        let mime_type = from_path(path).first_or_octet_stream().to_string();
        let format = SourceFormat::from_mime(&mime_type)?;
        debug!("Reading {} as {:?} ({})", filename, format, mime_type);

        let content = format.extract(path)?;
        info!("Read {} chars from {}", content.chars().count(), filename);

        Ok(Document {
            content,
            document_id: filename.clone(),
            filename,
            mime_type,
            format,
        })
    }

    /// Replace the default document id
    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = document_id.into();
        self
    }
}

/// Single spaces inside lines, at most one blank line between paragraphs
fn normalize_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut blank_lines = 0;

    for line in text.lines() {
        let words: Vec<&str> = line.split(' ').filter(|w| !w.is_empty()).collect();
        if words.is_empty() {
            blank_lines += 1;
            continue;
        }

        if !normalized.is_empty() {
            normalized.push_str(if blank_lines > 0 { "\n\n" } else { "\n" });
        }
        normalized.push_str(&words.join(" "));
        blank_lines = 0;
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_normalize_whitespace() {
        let text = "This  has   multiple    spaces.\n\n\nAnd multiple newlines.\r\nAnd Windows line endings.\n\n";
        let expected =
            "This has multiple spaces.\n\nAnd multiple newlines.\nAnd Windows line endings.";
        assert_eq!(normalize_whitespace(text), expected);
    }

    #[test]
    fn test_normalize_whitespace_drops_edge_blank_lines() {
        assert_eq!(normalize_whitespace("\n\n  page one  \n\n\n\npage two\n"), "page one\n\npage two");
        assert_eq!(normalize_whitespace(" \n \n"), "");
    }

    #[test]
    fn test_format_from_mime() {
        assert_eq!(SourceFormat::from_mime("application/pdf").unwrap(), SourceFormat::Pdf);
        assert_eq!(SourceFormat::from_mime("text/markdown").unwrap(), SourceFormat::Text);
        assert!(SourceFormat::from_mime("image/png").is_err());
    }

    #[test]
    fn test_text_file_is_read_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "He said \"hi\"\n\n\nit's  fine").unwrap();

        let document = Document::from_file(&path).unwrap();

        assert_eq!(document.content, "He said \"hi\"\n\n\nit's  fine");
        assert_eq!(document.document_id, "notes.txt");
        assert_eq!(document.filename, "notes.txt");
        assert!(document.mime_type.starts_with("text/"));
        assert_eq!(document.format, SourceFormat::Text);
    }

    #[test]
    fn test_document_id_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");
        fs::write(&path, "# Report").unwrap();

        let document = Document::from_file(&path).unwrap().with_document_id("q3-report");

        assert_eq!(document.document_id, "q3-report");
        assert_eq!(document.filename, "report.md");
    }

    #[test]
    fn test_unsupported_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.png");
        fs::write(&path, [0u8, 1, 2]).unwrap();

        let err = Document::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Unsupported document format"));
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Document::from_file(dir.path().join("absent.txt")).is_err());
    }
}
