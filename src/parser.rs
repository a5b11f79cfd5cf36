use std::path::Path;

use dicom::object::{InMemDicomObject, OpenFileOptions};
use dicom_dictionary_std::tags;
use thiserror::Error;

use crate::enums::RowOrder;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("{0}")]
    Other(String),
}

/// Header of one file, without its pixel payload.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub header: InMemDicomObject,
    pub transfer_syntax: String,
    /// Row order of the stored pixel payload. DICOM stores rows top-down.
    pub native_row_order: RowOrder,
}

/// Turns a file path into the attributes the reader needs.
pub trait Parser: Send + Sync {
    fn name(&self) -> &str {
        "custom"
    }

    fn parse(&self, path: &Path) -> Result<ParsedFile, ParseError>;
}

/// Reads DICOM part 10 files up to the pixel data element.
#[derive(Debug, Default, Clone, Copy)]
pub struct DicomParser;

impl Parser for DicomParser {
    fn name(&self) -> &str {
        DESCRIPTIVE_NAME
    }

    fn parse(&self, path: &Path) -> Result<ParsedFile, ParseError> {
        let object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)?;
        let transfer_syntax = object.meta().transfer_syntax().to_string();
        Ok(ParsedFile {
            header: object.into_inner(),
            transfer_syntax,
            native_row_order: RowOrder::TopDown,
        })
    }
}

/// File extensions read when scanning a directory.
pub const FILE_EXTENSIONS: &[&str] = &["dcm", "dc"];

pub const DESCRIPTIVE_NAME: &str = "DICOM";

pub fn has_dicom_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| FILE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}
