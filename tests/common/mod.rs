#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, PrimitiveValue, Tag, VR, dicom_value};
use dicom::object::InMemDicomObject;
use dicom::object::mem::InMemElement;
use dicom_dictionary_std::tags;

use dicom_stack::RowOrder;
use dicom_stack::codec::{Codec, CodecError, Payload};
use dicom_stack::metadata::FileRecord;
use dicom_stack::parser::{ParseError, ParsedFile, Parser};

pub const AXIAL: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

pub fn ds(tag: Tag, values: &[f64]) -> InMemElement {
    let strings: Vec<String> = values.iter().map(|value| value.to_string()).collect();
    DataElement::new(tag, VR::DS, PrimitiveValue::Strs(strings.into_iter().collect()))
}

pub fn us(tag: Tag, value: u16) -> InMemElement {
    DataElement::new(tag, VR::US, dicom_value!(U16, [value]))
}

pub fn text(tag: Tag, vr: VR, value: &str) -> InMemElement {
    DataElement::new(tag, vr, PrimitiveValue::from(value))
}

pub fn sequence(tag: Tag, items: Vec<InMemDicomObject>) -> InMemElement {
    DataElement::new(tag, VR::SQ, DataSetSequence::from(items))
}

/// Image pixel module of a monochrome image.
pub fn image(rows: u16, columns: u16, bits_allocated: u16, signed: bool) -> Vec<InMemElement> {
    vec![
        us(tags::ROWS, rows),
        us(tags::COLUMNS, columns),
        us(tags::BITS_ALLOCATED, bits_allocated),
        us(tags::BITS_STORED, bits_allocated),
        us(tags::HIGH_BIT, bits_allocated.saturating_sub(1)),
        us(tags::PIXEL_REPRESENTATION, signed as u16),
        us(tags::SAMPLES_PER_PIXEL, 1),
        text(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2"),
    ]
}

pub fn axial_at(z: f64) -> Vec<InMemElement> {
    vec![
        ds(tags::IMAGE_POSITION_PATIENT, &[0.0, 0.0, z]),
        ds(tags::IMAGE_ORIENTATION_PATIENT, &AXIAL),
        ds(tags::PIXEL_SPACING, &[1.0, 1.0]),
    ]
}

pub fn u16_bytes(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

#[derive(Clone, Debug)]
pub struct MemoryFile {
    pub header: InMemDicomObject,
    pub payload: Vec<u8>,
    pub native_row_order: RowOrder,
}

impl MemoryFile {
    pub fn new(elements: Vec<InMemElement>, payload: Vec<u8>) -> Self {
        Self {
            header: InMemDicomObject::from_element_iter(elements),
            payload,
            native_row_order: RowOrder::TopDown,
        }
    }

    /// A 2x2 16-bit axial slice at `z` holding `first..first + 4`.
    pub fn slice(z: f64, first: u16) -> Self {
        let mut elements = image(2, 2, 16, false);
        elements.extend(axial_at(z));
        Self::new(elements, u16_bytes(&[first, first + 1, first + 2, first + 3]))
    }

    pub fn with(mut self, element: InMemElement) -> Self {
        self.header.put(element);
        self
    }
}

/// Parser and codec serving files from memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    files: Arc<HashMap<PathBuf, MemoryFile>>,
    names: Vec<PathBuf>,
}

impl MemoryStore {
    pub fn new(files: Vec<MemoryFile>) -> Self {
        let names: Vec<PathBuf> = (0..files.len())
            .map(|index| PathBuf::from(format!("memory/{index:03}.dcm")))
            .collect();
        Self {
            files: Arc::new(names.iter().cloned().zip(files).collect()),
            names,
        }
    }

    /// File names in the order the files were given.
    pub fn names(&self) -> Vec<PathBuf> {
        self.names.clone()
    }

    fn get(&self, path: &Path) -> Option<&MemoryFile> {
        self.files.get(path)
    }
}

impl Parser for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn parse(&self, path: &Path) -> Result<ParsedFile, ParseError> {
        let file = self
            .get(path)
            .ok_or_else(|| ParseError::Other(format!("no such file {}", path.display())))?;
        Ok(ParsedFile {
            header: file.header.clone(),
            transfer_syntax: "1.2.840.10008.1.2.1".to_string(),
            native_row_order: file.native_row_order,
        })
    }
}

impl Codec for MemoryStore {
    fn decode(&self, file: &FileRecord) -> Result<Payload, CodecError> {
        let stored = self
            .get(&file.path)
            .ok_or_else(|| CodecError::MissingPixelData(file.path.display().to_string()))?;
        Ok(Payload {
            data: stored.payload.clone(),
            packing: file.packing.clone(),
        })
    }
}
