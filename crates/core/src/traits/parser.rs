//! Document parsing seam

use crate::{ParsedDocument, Result};

/// Extracts text and document metadata from an uploaded file
///
/// Errors are [`Error::UnsupportedFileType`](crate::Error::UnsupportedFileType)
/// or [`Error::Parse`](crate::Error::Parse).
pub trait DocumentParser: Send + Sync {
    fn parse(&self, bytes: &[u8], filename: &str) -> Result<ParsedDocument>;
}
