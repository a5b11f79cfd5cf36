//! Attribute store for the files and frames of one metadata pass.
//!
//! Files and frames live in two flat tables. Frames refer to their file by
//! index and files refer to their frames by a range into the frame table, so
//! the slice maps produced by sorting can use plain integers throughout.

use std::ops::Range;
use std::path::{Path, PathBuf};

use dicom::core::Tag;
use dicom::object::InMemDicomObject;
use dicom::object::mem::InMemElement;
use dicom_dictionary_std::tags;
use thiserror::Error;

use crate::enums::{PhotometricInterpretation, RowOrder, ScalarType};

#[derive(Debug, Error, PartialEq)]
pub enum AttributeError {
    #[error("missing required attribute {0}")]
    Missing(&'static str),

    #[error("invalid value for {attribute}: {value}")]
    Invalid {
        attribute: &'static str,
        value: String,
    },
}

/// How the samples of one file are stored in its pixel payload.
#[derive(Clone, Debug, PartialEq)]
pub struct PackingDescriptor {
    pub rows: usize,
    pub columns: usize,
    pub samples_per_pixel: usize,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub signed: bool,
    /// Colour-by-plane layout (Planar Configuration 1).
    pub planar: bool,
    /// Native YBR_FULL_422 payload storing two luma samples per chroma pair.
    pub subsampled: bool,
    pub photometric: PhotometricInterpretation,
}

impl PackingDescriptor {
    pub fn monochrome(rows: usize, columns: usize, bits_allocated: u16, signed: bool) -> Self {
        Self {
            rows,
            columns,
            samples_per_pixel: 1,
            bits_allocated,
            bits_stored: bits_allocated.max(1),
            signed,
            planar: false,
            subsampled: false,
            photometric: PhotometricInterpretation::Monochrome2,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.columns
    }

    /// Number of decoded samples in one frame.
    pub fn frame_samples(&self) -> usize {
        self.pixel_count() * self.samples_per_pixel
    }

    /// Number of samples physically stored for one frame.
    pub fn stored_frame_samples(&self) -> usize {
        if self.subsampled {
            self.pixel_count() * 2
        } else {
            self.frame_samples()
        }
    }

    /// Frames of 1-bit data are not byte aligned, so frame sizes are in bits.
    pub fn frame_bits(&self) -> usize {
        self.stored_frame_samples() * self.bits_allocated as usize
    }

    pub fn scalar_type(&self) -> Option<ScalarType> {
        ScalarType::for_bits(self.bits_allocated, self.signed)
    }

    /// The attributes that must agree between all slices of one volume.
    pub fn layout_matches(&self, other: &PackingDescriptor) -> bool {
        self.rows == other.rows
            && self.columns == other.columns
            && self.samples_per_pixel == other.samples_per_pixel
            && self.bits_allocated == other.bits_allocated
            && self.signed == other.signed
    }

    pub fn summary(&self) -> String {
        format!(
            "{}x{}x{} {}-bit {}",
            self.columns,
            self.rows,
            self.samples_per_pixel,
            self.bits_allocated,
            if self.signed { "signed" } else { "unsigned" }
        )
    }
}

/// One decodable frame of one file.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRecord {
    pub file_index: usize,
    pub frame_index: usize,
    pub position: Option<[f64; 3]>,
    pub orientation: Option<[f64; 6]>,
    /// Row spacing followed by column spacing.
    pub pixel_spacing: Option<[f64; 2]>,
    pub slice_thickness: Option<f64>,
    pub stack_id: Option<String>,
    pub in_stack_position: Option<i32>,
    pub temporal_position: Option<i32>,
    /// Trigger time in milliseconds.
    pub trigger_time: Option<f64>,
    /// Acquisition time in seconds since midnight.
    pub acquisition_time: Option<f64>,
    pub instance_number: Option<i32>,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    /// Offset of the first bit of this frame within the file's pixel payload.
    pub payload_bit_offset: usize,
}

impl FrameRecord {
    pub fn new(file_index: usize, frame_index: usize) -> Self {
        Self {
            file_index,
            frame_index,
            position: None,
            orientation: None,
            pixel_spacing: None,
            slice_thickness: None,
            stack_id: None,
            in_stack_position: None,
            temporal_position: None,
            trigger_time: None,
            acquisition_time: None,
            instance_number: None,
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            payload_bit_offset: 0,
        }
    }

    pub fn key(&self) -> FrameKey {
        FrameKey {
            file_index: self.file_index,
            frame_index: self.frame_index,
        }
    }

    pub fn has_geometry(&self) -> bool {
        self.position.is_some() && self.orientation.is_some()
    }

    pub fn rescale(&self) -> (f64, f64) {
        (self.rescale_slope, self.rescale_intercept)
    }
}

/// A (file, frame) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameKey {
    pub file_index: usize,
    pub frame_index: usize,
}

impl FrameKey {
    pub fn new(file_index: usize, frame_index: usize) -> Self {
        Self {
            file_index,
            frame_index,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileRecord {
    pub index: usize,
    pub path: PathBuf,
    pub transfer_syntax: String,
    pub series_instance_uid: Option<String>,
    pub packing: PackingDescriptor,
    pub native_row_order: RowOrder,
    /// Range of this file's frames in [`MetaData::frames`].
    pub frames: Range<usize>,
}

impl FileRecord {
    pub fn number_of_frames(&self) -> usize {
        self.frames.len()
    }
}

#[derive(Debug, Default)]
pub struct MetaData {
    files: Vec<FileRecord>,
    frames: Vec<FrameRecord>,
    headers: Vec<InMemDicomObject>,
}

impl MetaData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn number_of_files(&self) -> usize {
        self.files.len()
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn file(&self, file_index: usize) -> Option<&FileRecord> {
        self.files.get(file_index)
    }

    /// All frames, grouped by file in input order.
    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    pub fn frames_of(&self, file_index: usize) -> &[FrameRecord] {
        match self.files.get(file_index) {
            Some(file) => &self.frames[file.frames.clone()],
            None => &[],
        }
    }

    pub fn frame(&self, key: FrameKey) -> Option<&FrameRecord> {
        self.frames_of(key.file_index).get(key.frame_index)
    }

    /// Look up an attribute for one frame of one file.
    ///
    /// Per-frame functional groups take precedence over shared functional
    /// groups, which take precedence over the top-level data set.
    pub fn attribute(&self, key: FrameKey, tag: Tag) -> Option<&InMemElement> {
        let header = self.headers.get(key.file_index)?;
        functional_attribute(header, key.frame_index, tag)
    }

    /// Named stacks in the order they were first seen.
    pub fn stack_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.frames.iter().filter_map(|frame| frame.stack_id.as_ref()) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// Add a file from its parsed header. Returns the new file index.
    pub fn add_file(
        &mut self,
        path: impl AsRef<Path>,
        header: InMemDicomObject,
        transfer_syntax: &str,
    ) -> Result<usize, AttributeError> {
        let file_index = self.files.len();
        let packing = read_packing(&header)?;
        let number_of_frames = get_int(&header, tags::NUMBER_OF_FRAMES)
            .filter(|&frames| frames > 0)
            .unwrap_or(1) as usize;

        let frames = (0..number_of_frames)
            .map(|frame_index| {
                let mut frame = read_frame(&header, file_index, frame_index);
                frame.payload_bit_offset = frame_index * packing.frame_bits();
                frame
            })
            .collect();

        let series_instance_uid = get_string(&header, tags::SERIES_INSTANCE_UID);
        let record = FileRecord {
            index: file_index,
            path: path.as_ref().to_path_buf(),
            transfer_syntax: transfer_syntax.trim_end_matches('\0').to_string(),
            series_instance_uid,
            packing,
            native_row_order: RowOrder::TopDown,
            frames: 0..0,
        };
        self.push(record, frames, header);
        Ok(file_index)
    }

    pub fn set_native_row_order(&mut self, file_index: usize, order: RowOrder) {
        if let Some(file) = self.files.get_mut(file_index) {
            file.native_row_order = order;
        }
    }

    /// Add a file whose records were produced elsewhere. The record's index
    /// and frame range are assigned here.
    pub fn add_record(&mut self, mut record: FileRecord, mut frames: Vec<FrameRecord>) -> usize {
        let file_index = self.files.len();
        record.index = file_index;
        for (frame_index, frame) in frames.iter_mut().enumerate() {
            frame.file_index = file_index;
            frame.frame_index = frame_index;
        }
        self.push(record, frames, InMemDicomObject::new_empty());
        file_index
    }

    fn push(&mut self, mut record: FileRecord, frames: Vec<FrameRecord>, header: InMemDicomObject) {
        let start = self.frames.len();
        record.frames = start..start + frames.len();
        self.frames.extend(frames);
        self.files.push(record);
        self.headers.push(header);
    }
}

fn read_packing(header: &InMemDicomObject) -> Result<PackingDescriptor, AttributeError> {
    let rows = get_int(header, tags::ROWS).ok_or(AttributeError::Missing("Rows"))?;
    let columns = get_int(header, tags::COLUMNS).ok_or(AttributeError::Missing("Columns"))?;
    let bits_allocated =
        get_int(header, tags::BITS_ALLOCATED).ok_or(AttributeError::Missing("BitsAllocated"))?;
    if rows <= 0 || columns <= 0 {
        return Err(AttributeError::Invalid {
            attribute: "Rows/Columns",
            value: format!("{rows}x{columns}"),
        });
    }
    if !matches!(bits_allocated, 1 | 8 | 12 | 16 | 32) {
        return Err(AttributeError::Invalid {
            attribute: "BitsAllocated",
            value: bits_allocated.to_string(),
        });
    }
    let bits_allocated = bits_allocated as u16;
    let samples_per_pixel = get_int(header, tags::SAMPLES_PER_PIXEL).unwrap_or(1).max(1) as usize;
    let bits_stored = get_int(header, tags::BITS_STORED)
        .map(|bits| bits.clamp(1, bits_allocated as i64) as u16)
        .unwrap_or(bits_allocated);
    let photometric = get_string(header, tags::PHOTOMETRIC_INTERPRETATION)
        .map(|value| PhotometricInterpretation::parse(&value))
        .unwrap_or_default();
    let subsampled = photometric == PhotometricInterpretation::YbrFull422 && samples_per_pixel == 3;

    Ok(PackingDescriptor {
        rows: rows as usize,
        columns: columns as usize,
        samples_per_pixel,
        bits_allocated,
        bits_stored,
        signed: get_int(header, tags::PIXEL_REPRESENTATION) == Some(1),
        planar: samples_per_pixel > 1 && get_int(header, tags::PLANAR_CONFIGURATION) == Some(1),
        subsampled,
        photometric,
    })
}

fn read_frame(header: &InMemDicomObject, file_index: usize, frame_index: usize) -> FrameRecord {
    let lookup = |tag: Tag| functional_attribute(header, frame_index, tag);
    let floats = |tag: Tag| lookup(tag).and_then(|element| element.to_multi_float64().ok());
    let float = |tag: Tag| lookup(tag).and_then(|element| element.to_float64().ok());
    let int = |tag: Tag| lookup(tag).and_then(|element| element.to_int::<i32>().ok());

    let mut frame = FrameRecord::new(file_index, frame_index);
    frame.position = floats(tags::IMAGE_POSITION_PATIENT)
        .and_then(|values| <[f64; 3]>::try_from(values.get(..3)?).ok());
    frame.orientation = floats(tags::IMAGE_ORIENTATION_PATIENT)
        .and_then(|values| <[f64; 6]>::try_from(values.get(..6)?).ok());
    frame.pixel_spacing = floats(tags::PIXEL_SPACING)
        .and_then(|values| <[f64; 2]>::try_from(values.get(..2)?).ok())
        .filter(|spacing| spacing.iter().all(|&value| value > 0.0));
    frame.slice_thickness = float(tags::SLICE_THICKNESS).filter(|&value| value > 0.0);
    frame.stack_id = lookup(tags::STACK_ID)
        .and_then(|element| element.to_str().ok())
        .map(|value| value.trim_matches(|c: char| c == ' ' || c == '\0').to_string())
        .filter(|value| !value.is_empty());
    frame.in_stack_position = int(tags::IN_STACK_POSITION_NUMBER);
    frame.temporal_position =
        int(tags::TEMPORAL_POSITION_INDEX).or_else(|| int(tags::TEMPORAL_POSITION_IDENTIFIER));
    frame.trigger_time =
        float(tags::NOMINAL_CARDIAC_TRIGGER_DELAY_TIME).or_else(|| float(tags::TRIGGER_TIME));
    frame.acquisition_time = lookup(tags::ACQUISITION_TIME)
        .and_then(|element| element.to_str().ok())
        .and_then(|value| parse_time(&value));
    frame.instance_number = int(tags::INSTANCE_NUMBER);
    frame.rescale_slope = float(tags::RESCALE_SLOPE)
        .filter(|&slope| slope != 0.0)
        .unwrap_or(1.0);
    frame.rescale_intercept = float(tags::RESCALE_INTERCEPT).unwrap_or(0.0);
    frame
}

fn functional_attribute(
    header: &InMemDicomObject,
    frame_index: usize,
    tag: Tag,
) -> Option<&InMemElement> {
    let per_frame = header
        .get(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)
        .and_then(|element| element.items())
        .and_then(|items| items.get(frame_index));
    let shared = header
        .get(tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE)
        .and_then(|element| element.items())
        .and_then(|items| items.first());

    [per_frame, shared]
        .into_iter()
        .flatten()
        .find_map(|group| find_in_group(group, tag))
        .or_else(|| header.get(tag))
}

/// Functional groups wrap their attributes in single-item macro sequences.
fn find_in_group(group: &InMemDicomObject, tag: Tag) -> Option<&InMemElement> {
    group.get(tag).or_else(|| {
        group
            .iter()
            .filter_map(|element| element.items())
            .filter_map(|items| items.first())
            .find_map(|item| item.get(tag))
    })
}

fn get_int(header: &InMemDicomObject, tag: Tag) -> Option<i64> {
    header.get(tag)?.to_int::<i64>().ok()
}

fn get_string(header: &InMemDicomObject, tag: Tag) -> Option<String> {
    header
        .get(tag)?
        .to_str()
        .ok()
        .map(|value| value.trim_matches(|c: char| c == ' ' || c == '\0').to_string())
}

/// Parse a TM value (`HHMMSS.FFFFFF`, optionally `HH:MM:SS`) into seconds.
fn parse_time(value: &str) -> Option<f64> {
    let value: String = value.trim().chars().filter(|&c| c != ':').collect();
    let (whole, fraction) = value.split_once('.').unwrap_or((value.as_str(), ""));
    if whole.len() < 2 || whole.len() % 2 == 1 || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let field = |range: Range<usize>| whole.get(range).map_or(Ok(0), str::parse::<u32>);
    let hours = field(0..2).ok()?;
    let minutes = field(2..4).ok()?;
    let seconds = field(4..6).ok()?;
    let fraction = if fraction.is_empty() {
        0.0
    } else {
        format!("0.{fraction}").parse::<f64>().ok()?
    };
    Some(f64::from(hours * 3600 + minutes * 60 + seconds) + fraction)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR, dicom_value};
    use dicom::object::mem::InMemElement;
    use rstest::rstest;

    pub(crate) fn ds(tag: Tag, values: &[f64]) -> InMemElement {
        let strings: Vec<String> = values.iter().map(|value| value.to_string()).collect();
        DataElement::new(tag, VR::DS, PrimitiveValue::Strs(strings.into_iter().collect()))
    }

    pub(crate) fn us(tag: Tag, value: u16) -> InMemElement {
        DataElement::new(tag, VR::US, dicom_value!(U16, [value]))
    }

    pub(crate) fn text(tag: Tag, vr: VR, value: &str) -> InMemElement {
        DataElement::new(tag, vr, PrimitiveValue::from(value))
    }

    fn basic_header() -> Vec<InMemElement> {
        vec![
            us(tags::ROWS, 2),
            us(tags::COLUMNS, 3),
            us(tags::BITS_ALLOCATED, 16),
            us(tags::BITS_STORED, 12),
            us(tags::PIXEL_REPRESENTATION, 1),
            text(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2"),
        ]
    }

    #[test]
    fn reads_single_frame_attributes() {
        let mut elements = basic_header();
        elements.extend([
            ds(tags::IMAGE_POSITION_PATIENT, &[-10.0, 5.0, 42.5]),
            ds(tags::IMAGE_ORIENTATION_PATIENT, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            ds(tags::PIXEL_SPACING, &[0.5, 0.75]),
            ds(tags::RESCALE_SLOPE, &[2.0]),
            ds(tags::RESCALE_INTERCEPT, &[-1024.0]),
            text(tags::ACQUISITION_TIME, VR::TM, "101502.5"),
        ]);
        let mut metadata = MetaData::new();
        let index = metadata
            .add_file(
                "a.dcm",
                InMemDicomObject::from_element_iter(elements),
                "1.2.840.10008.1.2.1\0",
            )
            .unwrap();

        let file = metadata.file(index).unwrap();
        assert_eq!(file.transfer_syntax, "1.2.840.10008.1.2.1");
        assert_eq!(file.packing.rows, 2);
        assert_eq!(file.packing.columns, 3);
        assert_eq!(file.packing.bits_stored, 12);
        assert!(file.packing.signed);
        assert_eq!(file.packing.scalar_type(), Some(ScalarType::I16));

        let frame = metadata.frame(FrameKey::new(index, 0)).unwrap();
        assert_eq!(frame.position, Some([-10.0, 5.0, 42.5]));
        assert_eq!(frame.pixel_spacing, Some([0.5, 0.75]));
        assert_eq!(frame.rescale(), (2.0, -1024.0));
        assert_eq!(frame.acquisition_time, Some(36902.5));
        assert!(frame.has_geometry());
    }

    #[test]
    fn missing_rows_is_rejected() {
        let header = InMemDicomObject::from_element_iter([us(tags::COLUMNS, 3)]);
        let error = MetaData::new().add_file("a.dcm", header, "").unwrap_err();
        assert_eq!(error, AttributeError::Missing("Rows"));
    }

    #[test]
    fn per_frame_groups_override_shared_groups() {
        let plane = |z: f64| {
            InMemDicomObject::from_element_iter([ds(tags::IMAGE_POSITION_PATIENT, &[0.0, 0.0, z])])
        };
        let content = |stack: &str| {
            InMemDicomObject::from_element_iter([text(tags::STACK_ID, VR::SH, stack)])
        };
        let per_frame = |z: f64, stack: &str| {
            InMemDicomObject::from_element_iter([
                DataElement::new(
                    tags::PLANE_POSITION_SEQUENCE,
                    VR::SQ,
                    dicom::core::value::DataSetSequence::from(vec![plane(z)]),
                ),
                DataElement::new(
                    tags::FRAME_CONTENT_SEQUENCE,
                    VR::SQ,
                    dicom::core::value::DataSetSequence::from(vec![content(stack)]),
                ),
            ])
        };
        let shared = InMemDicomObject::from_element_iter([DataElement::new(
            tags::PLANE_ORIENTATION_SEQUENCE,
            VR::SQ,
            dicom::core::value::DataSetSequence::from(vec![InMemDicomObject::from_element_iter([
                ds(tags::IMAGE_ORIENTATION_PATIENT, &[0.0, 1.0, 0.0, 0.0, 0.0, -1.0]),
            ])]),
        )]);

        let mut elements = basic_header();
        elements.extend([
            text(tags::NUMBER_OF_FRAMES, VR::IS, "2"),
            DataElement::new(
                tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE,
                VR::SQ,
                dicom::core::value::DataSetSequence::from(vec![
                    per_frame(3.0, "1"),
                    per_frame(6.0, "2"),
                ]),
            ),
            DataElement::new(
                tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE,
                VR::SQ,
                dicom::core::value::DataSetSequence::from(vec![shared]),
            ),
        ]);

        let mut metadata = MetaData::new();
        let index = metadata
            .add_file("multi.dcm", InMemDicomObject::from_element_iter(elements), "")
            .unwrap();

        let frames = metadata.frames_of(index);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].position, Some([0.0, 0.0, 6.0]));
        assert_eq!(frames[1].orientation, Some([0.0, 1.0, 0.0, 0.0, 0.0, -1.0]));
        assert_eq!(frames[0].stack_id.as_deref(), Some("1"));
        assert_eq!(frames[1].payload_bit_offset, 2 * 3 * 16);
        assert_eq!(metadata.stack_ids(), vec!["1".to_string(), "2".to_string()]);
        assert!(metadata.attribute(FrameKey::new(index, 1), tags::STACK_ID).is_some());
    }

    #[rstest]
    #[case("120000", Some(43200.0))]
    #[case("0930", Some(34200.0))]
    #[case("08:15:30.25", Some(29730.25))]
    #[case("1", None)]
    #[case("ab0000", None)]
    fn parses_time_values(#[case] value: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_time(value), expected);
    }

    #[test]
    fn records_added_directly_get_their_indices_assigned() {
        let mut metadata = MetaData::new();
        let packing = PackingDescriptor::monochrome(1, 1, 8, false);
        let record = FileRecord {
            index: 99,
            path: PathBuf::from("x"),
            transfer_syntax: String::new(),
            series_instance_uid: None,
            packing,
            native_row_order: RowOrder::TopDown,
            frames: 0..0,
        };
        metadata.add_record(record.clone(), vec![FrameRecord::new(7, 7)]);
        let second =
            metadata.add_record(record, vec![FrameRecord::new(0, 0), FrameRecord::new(0, 0)]);
        assert_eq!(second, 1);
        assert_eq!(metadata.file(1).unwrap().frames, 1..3);
        assert_eq!(metadata.frames_of(1)[1].key(), FrameKey::new(1, 1));
        assert_eq!(metadata.frames_of(0)[0].key(), FrameKey::new(0, 0));
    }
}
