//! Plain-text document parser
//!
//! Default [`DocumentParser`] for text-like uploads. Rich formats (PDF, DOCX)
//! are expected to come from a dedicated parsing service implementing the
//! same trait.

use chrono::Utc;
use knowledge_engine_core::{DocumentParser, Error, MetadataMap, ParsedDocument, Result};
use std::path::Path;

/// Extensions accepted by [`PlainTextParser`]
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown", "csv"];

/// Parser for UTF-8 text files
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextParser;

impl PlainTextParser {
    pub fn new() -> Self {
        Self
    }

    fn extension(filename: &str) -> Option<String> {
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

impl DocumentParser for PlainTextParser {
    fn parse(&self, bytes: &[u8], filename: &str) -> Result<ParsedDocument> {
        let extension = Self::extension(filename)
            .filter(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
            .ok_or_else(|| Error::UnsupportedFileType(filename.to_string()))?;

        let content = std::str::from_utf8(bytes)
            .map_err(|e| Error::Parse(format!("{} is not valid UTF-8: {}", filename, e)))?;
        // Editors on Windows like to prepend a BOM
        let content = content.trim_start_matches('\u{feff}').to_string();

        let mut metadata = MetadataMap::new();
        metadata.insert("filename".to_string(), filename.into());
        metadata.insert("extension".to_string(), extension.into());
        metadata.insert("size_bytes".to_string(), bytes.len().into());
        metadata.insert("uploaded_at".to_string(), Utc::now().to_rfc3339().into());

        Ok(ParsedDocument { content, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_engine_core::MetadataValue;

    #[test]
    fn test_parse_text_file() {
        let doc = PlainTextParser::new()
            .parse("\u{feff}Cats are great pets.".as_bytes(), "Notes.MD")
            .unwrap();

        assert_eq!(doc.content, "Cats are great pets.");
        assert_eq!(doc.metadata.get("filename"), Some(&MetadataValue::from("Notes.MD")));
        assert_eq!(doc.metadata.get("extension"), Some(&MetadataValue::from("md")));
        assert_eq!(doc.metadata.get("size_bytes"), Some(&MetadataValue::Number(23.0)));
        assert!(doc.metadata.contains_key("uploaded_at"));
    }

    #[test]
    fn test_unsupported_extension() {
        let parser = PlainTextParser::new();
        assert!(matches!(
            parser.parse(b"%PDF-1.7", "report.pdf"),
            Err(Error::UnsupportedFileType(_))
        ));
        assert!(matches!(
            parser.parse(b"no extension", "README"),
            Err(Error::UnsupportedFileType(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_is_parse_error() {
        let err = PlainTextParser::new()
            .parse(&[0xff, 0xfe, 0x00, 0x80], "broken.txt")
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}
