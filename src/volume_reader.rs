use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array5;
use rayon::prelude::*;

use crate::codec::{Codec, DicomCodec, Payload};
use crate::decoder::decode_frame;
use crate::enums::{PhotometricInterpretation, ReaderState, RowOrder, ScalarType};
use crate::error::{ReaderError, StructureError};
use crate::geometry::{GeometryBuilder, VolumeGeometry, flip_rows};
use crate::metadata::{FileRecord, FrameRecord, MetaData};
use crate::parser::{DicomParser, Parser, has_dicom_extension};
use crate::photometric::{RescaleParameters, rescale_slice, ybr_to_rgb};
use crate::sorter::{DefaultSliceSorter, SliceSorter, SortedFrames};
use crate::validator::{SliceMap, validate};
use crate::volume::{Element, Volume, Voxels};

/// Options of one read.
#[derive(Clone, Debug, PartialEq)]
pub struct ReaderConfig {
    /// Stack to read. The first named stack is used when unset.
    pub desired_stack_id: Option<String>,
    /// Read a single time step instead of all of them.
    pub desired_time_index: Option<usize>,
    /// Sort frames spatially. When off, frames are read in input order.
    pub sorting: bool,
    pub row_order: RowOrder,
    /// Remap all slices onto one rescale slope and intercept.
    pub auto_rescale: bool,
    /// Slope and intercept to remap onto instead of the first slice's.
    pub rescale_target: Option<(f64, f64)>,
    pub auto_ybr_to_rgb: bool,
    /// Store time steps as extra components of each voxel.
    pub time_as_vector: bool,
    /// Allowed deviation of each slice gap, relative to the mean gap.
    pub spacing_tolerance: f64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            desired_stack_id: None,
            desired_time_index: None,
            sorting: true,
            row_order: RowOrder::BottomUp,
            auto_rescale: true,
            rescale_target: None,
            auto_ybr_to_rgb: true,
            time_as_vector: false,
            spacing_tolerance: 1e-2,
        }
    }
}

impl ReaderConfig {
    pub fn with_stack_id(mut self, stack_id: impl Into<String>) -> Self {
        self.desired_stack_id = Some(stack_id.into());
        self
    }

    pub fn with_time_index(mut self, time_index: usize) -> Self {
        self.desired_time_index = Some(time_index);
        self
    }

    pub fn with_sorting(mut self, sorting: bool) -> Self {
        self.sorting = sorting;
        self
    }

    pub fn with_row_order(mut self, row_order: RowOrder) -> Self {
        self.row_order = row_order;
        self
    }

    pub fn with_auto_rescale(mut self, auto_rescale: bool) -> Self {
        self.auto_rescale = auto_rescale;
        self
    }

    pub fn with_rescale_target(mut self, slope: f64, intercept: f64) -> Self {
        self.rescale_target = Some((slope, intercept));
        self
    }

    pub fn with_auto_ybr_to_rgb(mut self, auto_ybr_to_rgb: bool) -> Self {
        self.auto_ybr_to_rgb = auto_ybr_to_rgb;
        self
    }

    pub fn with_time_as_vector(mut self, time_as_vector: bool) -> Self {
        self.time_as_vector = time_as_vector;
        self
    }

    pub fn with_spacing_tolerance(mut self, tolerance: f64) -> Self {
        self.spacing_tolerance = tolerance;
        self
    }
}

/// Result of the metadata phase.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeInfo {
    pub geometry: VolumeGeometry,
    /// Frames to read, restricted to the desired time step if one is set.
    pub slice_map: SliceMap,
    /// Every named stack found in the input.
    pub stack_ids: Vec<String>,
    pub active_stack: Option<String>,
    pub rescale: RescaleParameters,
    pub scalar_type: ScalarType,
    /// Photometric interpretation recorded in the files.
    pub photometric: PhotometricInterpretation,
    /// Name of the sorter used, `None` when sorting was disabled.
    pub sorter: Option<String>,
}

impl VolumeInfo {
    /// Interpretation of the voxels after the data phase.
    pub fn memory_photometric(&self, auto_ybr_to_rgb: bool) -> PhotometricInterpretation {
        if auto_ybr_to_rgb && self.photometric.is_ybr() {
            PhotometricInterpretation::Rgb
        } else {
            self.photometric.clone()
        }
    }
}

/// Assembles the frames of a set of DICOM files into one volume.
///
/// Reading happens in two phases: [`update_information`] parses every file,
/// selects the stack and sorts and validates its frames; [`read_data`]
/// decodes and normalizes the pixel data. Changing the input or any option
/// discards the results of both.
///
/// [`update_information`]: VolumeReader::update_information
/// [`read_data`]: VolumeReader::read_data
pub struct VolumeReader {
    file_names: Vec<PathBuf>,
    config: ReaderConfig,
    parser: Box<dyn Parser>,
    codec: Box<dyn Codec>,
    sorter: Box<dyn SliceSorter>,
    metadata: MetaData,
    info: Option<VolumeInfo>,
    state: ReaderState,
}

impl VolumeReader {
    pub fn new<P: Into<PathBuf>>(
        file_names: impl IntoIterator<Item = P>,
        config: ReaderConfig,
    ) -> Self {
        Self {
            file_names: file_names.into_iter().map(Into::into).collect(),
            config,
            parser: Box::new(DicomParser),
            codec: Box::new(DicomCodec),
            sorter: Box::new(DefaultSliceSorter),
            metadata: MetaData::new(),
            info: None,
            state: ReaderState::Uninitialized,
        }
    }

    /// Read all files with a DICOM extension in `path`, in name order.
    pub fn from_directory(
        path: impl AsRef<Path>,
        config: ReaderConfig,
    ) -> Result<Self, ReaderError> {
        let mut paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_dicom_extension(path))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(ReaderError::Configuration(format!(
                "no DICOM files in {}",
                path.as_ref().display()
            )));
        }
        Ok(Self::new(paths, config))
    }

    pub fn with_parser(mut self, parser: impl Parser + 'static) -> Self {
        self.parser = Box::new(parser);
        self.invalidate();
        self
    }

    pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Box::new(codec);
        self.invalidate();
        self
    }

    pub fn with_sorter(mut self, sorter: impl SliceSorter + 'static) -> Self {
        self.set_sorter(sorter);
        self
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn file_names(&self) -> &[PathBuf] {
        &self.file_names
    }

    /// Attributes of the last metadata phase.
    pub fn metadata(&self) -> &MetaData {
        &self.metadata
    }

    pub fn info(&self) -> Option<&VolumeInfo> {
        self.info.as_ref()
    }

    pub fn stack_ids(&self) -> Vec<String> {
        self.metadata.stack_ids()
    }

    pub fn sorter_name(&self) -> &str {
        self.sorter.name()
    }

    pub fn set_file_names<P: Into<PathBuf>>(&mut self, file_names: impl IntoIterator<Item = P>) {
        self.file_names = file_names.into_iter().map(Into::into).collect();
        self.invalidate();
    }

    pub fn set_config(&mut self, config: ReaderConfig) {
        self.config = config;
        self.invalidate();
    }

    pub fn set_desired_stack_id(&mut self, stack_id: Option<String>) {
        self.config.desired_stack_id = stack_id;
        self.invalidate();
    }

    pub fn set_desired_time_index(&mut self, time_index: Option<usize>) {
        self.config.desired_time_index = time_index;
        self.invalidate();
    }

    pub fn set_sorting(&mut self, sorting: bool) {
        self.config.sorting = sorting;
        self.invalidate();
    }

    pub fn set_sorter(&mut self, sorter: impl SliceSorter + 'static) {
        self.sorter = Box::new(sorter);
        self.invalidate();
    }

    pub fn set_row_order(&mut self, row_order: RowOrder) {
        self.config.row_order = row_order;
        self.invalidate();
    }

    pub fn set_auto_rescale(&mut self, auto_rescale: bool) {
        self.config.auto_rescale = auto_rescale;
        self.invalidate();
    }

    pub fn set_auto_ybr_to_rgb(&mut self, auto_ybr_to_rgb: bool) {
        self.config.auto_ybr_to_rgb = auto_ybr_to_rgb;
        self.invalidate();
    }

    pub fn set_time_as_vector(&mut self, time_as_vector: bool) {
        self.config.time_as_vector = time_as_vector;
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.metadata = MetaData::new();
        self.info = None;
        self.state = ReaderState::Uninitialized;
    }

    /// Run the metadata phase.
    pub fn update_information(&mut self) -> Result<&VolumeInfo, ReaderError> {
        self.info = None;
        match self.read_information() {
            Ok(info) => {
                self.state = ReaderState::MetadataReady;
                Ok(self.info.insert(info))
            }
            Err(error) => {
                log::error!("{} stage failed: {error}", error.stage());
                self.state = ReaderState::Error;
                Err(error)
            }
        }
    }

    /// Run the data phase, preceded by the metadata phase if its results
    /// are not available.
    pub fn read_data(&mut self) -> Result<Volume, ReaderError> {
        if !matches!(
            self.state,
            ReaderState::MetadataReady | ReaderState::DataReady
        ) {
            self.update_information()?;
        }
        let info = self
            .info
            .clone()
            .ok_or_else(|| ReaderError::Configuration("metadata phase has not run".into()))?;

        let voxels = match info.scalar_type {
            ScalarType::U8 => self.assemble::<u8>(&info),
            ScalarType::I8 => self.assemble::<i8>(&info),
            ScalarType::U16 => self.assemble::<u16>(&info),
            ScalarType::I16 => self.assemble::<i16>(&info),
            ScalarType::U32 => self.assemble::<u32>(&info),
            ScalarType::I32 => self.assemble::<i32>(&info),
        };
        match voxels {
            Ok(voxels) => {
                self.state = ReaderState::DataReady;
                Ok(Volume {
                    voxels,
                    memory_photometric: info.memory_photometric(self.config.auto_ybr_to_rgb),
                    geometry: info.geometry,
                    slice_map: info.slice_map,
                    rescale: info.rescale,
                    photometric: info.photometric,
                })
            }
            Err(error) => {
                log::error!("{} stage failed: {error}", error.stage());
                self.state = ReaderState::Error;
                Err(error)
            }
        }
    }

    fn read_information(&mut self) -> Result<VolumeInfo, ReaderError> {
        if self.file_names.is_empty() {
            return Err(ReaderError::Configuration("no input files".into()));
        }
        if let Some((slope, intercept)) = self.config.rescale_target {
            if slope == 0.0 || !slope.is_finite() || !intercept.is_finite() {
                return Err(ReaderError::Configuration(format!(
                    "invalid rescale target: slope {slope} intercept {intercept}"
                )));
            }
        }
        log::info!(
            "reading {} files with the {} parser",
            self.file_names.len(),
            self.parser.name()
        );

        let parser = &*self.parser;
        let parsed = self
            .file_names
            .par_iter()
            .enumerate()
            .map(|(file_index, path)| {
                parser.parse(path).map_err(|error| ReaderError::Parse {
                    file_index,
                    path: path.clone(),
                    message: error.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut metadata = MetaData::new();
        for (path, parsed) in self.file_names.iter().zip(parsed) {
            let file_index = metadata
                .add_file(path, parsed.header, &parsed.transfer_syntax)
                .map_err(|error| ReaderError::Parse {
                    file_index: metadata.number_of_files(),
                    path: path.clone(),
                    message: error.to_string(),
                })?;
            metadata.set_native_row_order(file_index, parsed.native_row_order);
        }
        self.metadata = metadata;

        let stack_ids = self.metadata.stack_ids();
        let active_stack = match &self.config.desired_stack_id {
            Some(id) if !stack_ids.contains(id) => {
                return Err(ReaderError::Configuration(format!(
                    "stack {id:?} not found, available: {stack_ids:?}"
                )));
            }
            Some(id) => Some(id.clone()),
            None => stack_ids.first().cloned(),
        };
        if stack_ids.len() > 1 {
            log::info!("found stacks {stack_ids:?}, reading {active_stack:?}");
        }

        let frames: Vec<&FrameRecord> = self
            .metadata
            .frames()
            .iter()
            .filter(|frame| active_stack.is_none() || frame.stack_id == active_stack)
            .collect();

        let sorted = if self.config.sorting {
            log::debug!("sorting {} frames with the {} sorter", frames.len(), self.sorter.name());
            self.sorter.sort(&self.metadata, &frames)?
        } else {
            SortedFrames::input_order(&frames)
        };
        let mut slice_map = validate(&self.metadata, &sorted, self.config.spacing_tolerance)?;
        let time_spacing = GeometryBuilder::time_spacing(&self.metadata, &slice_map);

        if let Some(time) = self.config.desired_time_index {
            if time >= slice_map.time_dimension {
                return Err(ReaderError::Configuration(format!(
                    "time index {time} out of range, volume has {} time steps",
                    slice_map.time_dimension
                )));
            }
            slice_map = slice_map.restrict_to_time(time);
        }

        let first = slice_map
            .file_indices
            .first()
            .and_then(|&index| self.metadata.file(index))
            .ok_or(StructureError::EmptyStack)?;
        let scalar_type = first.packing.scalar_type().ok_or_else(|| {
            StructureError::Layout(format!("no voxel type for {}", first.packing.summary()))
        })?;
        let photometric = first.packing.photometric.clone();

        let mut geometry = GeometryBuilder::build(
            &self.metadata,
            &slice_map,
            self.config.row_order,
            self.config.time_as_vector,
        )?;
        geometry.time_spacing = time_spacing;
        let rescale = RescaleParameters::harmonize(
            &self.metadata,
            &slice_map,
            self.config.auto_rescale,
            self.config.rescale_target,
        );
        if rescale.applied {
            log::debug!(
                "remapping slices onto slope {} intercept {}",
                rescale.slope,
                rescale.intercept
            );
        }

        let (times, slices, rows, columns, components) = geometry.dim();
        log::info!(
            "volume of {columns}x{rows}x{slices}, {times} time steps, \
             {components} components, {scalar_type:?}"
        );

        Ok(VolumeInfo {
            geometry,
            slice_map,
            stack_ids,
            active_stack,
            rescale,
            scalar_type,
            photometric,
            sorter: self.config.sorting.then(|| self.sorter.name().to_string()),
        })
    }

    fn assemble<T: Element>(&self, info: &VolumeInfo) -> Result<Voxels, ReaderError> {
        let entries = info
            .slice_map
            .keys()
            .map(|key| {
                let file = self.metadata.file(key.file_index);
                let frame = self.metadata.frame(key);
                file.zip(frame)
                    .ok_or_else(|| StructureError::Layout(format!("unknown frame {key:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let payloads = self.decode_payloads(&entries)?;

        let geometry = &info.geometry;
        let (times, slices, rows, columns, components) = geometry.dim();
        let samples = geometry.samples_per_pixel;
        let per_slice = components / samples;
        let plane = rows * columns * components;
        let stored_components = info.slice_map.components();
        let auto_ybr_to_rgb = self.config.auto_ybr_to_rgb;

        let mut data = vec![T::default(); times * slices * plane];
        data.par_chunks_mut(plane)
            .enumerate()
            .try_for_each(|(index, output)| {
                let (time, slice) = (index / slices, index % slices);
                let mut buffer = vec![T::default(); rows * columns * samples];
                for component in 0..per_slice {
                    let stored = if geometry.time_as_vector {
                        component
                    } else {
                        time * info.slice_map.vector_dimension + component
                    };
                    let (file, frame) = entries[slice * stored_components + stored];
                    let payload = payloads.get(&file.index).ok_or_else(|| ReaderError::Decode {
                        file_index: file.index,
                        frame_index: Some(frame.frame_index),
                        message: "no payload".into(),
                    })?;
                    decode_slice(info, auto_ybr_to_rgb, file, frame, payload, &mut buffer)?;

                    for (pixel, values) in buffer.chunks_exact(samples).enumerate() {
                        let offset = pixel * components + component * samples;
                        output[offset..offset + samples].copy_from_slice(values);
                    }
                }
                Ok::<_, ReaderError>(())
            })?;

        let array = Array5::from_shape_vec((times, slices, rows, columns, components), data)
            .map_err(|error| StructureError::Layout(error.to_string()))?;
        Ok(T::into_voxels(array))
    }

    /// Fetch the payload of every file referenced by `entries`, in parallel.
    fn decode_payloads(
        &self,
        entries: &[(&FileRecord, &FrameRecord)],
    ) -> Result<HashMap<usize, Payload>, ReaderError> {
        let mut files: Vec<&FileRecord> = entries.iter().map(|(file, _)| *file).collect();
        files.sort_by_key(|file| file.index);
        files.dedup_by_key(|file| file.index);

        let codec = &*self.codec;
        files
            .par_iter()
            .map(|file| {
                log::debug!("decoding {} ({})", file.path.display(), file.transfer_syntax);
                let decode_error = |message: String| ReaderError::Decode {
                    file_index: file.index,
                    frame_index: None,
                    message,
                };
                let payload = codec.decode(file).map_err(|error| decode_error(error.to_string()))?;
                if payload.packing.frame_samples() != file.packing.frame_samples() {
                    return Err(decode_error(format!(
                        "codec produced {} samples per frame, expected {}",
                        payload.packing.frame_samples(),
                        file.packing.frame_samples()
                    )));
                }
                Ok((file.index, payload))
            })
            .collect()
    }
}

/// Decode one frame into `output` and normalize it.
fn decode_slice<T: Element>(
    info: &VolumeInfo,
    auto_ybr_to_rgb: bool,
    file: &FileRecord,
    frame: &FrameRecord,
    payload: &Payload,
    output: &mut [T],
) -> Result<(), ReaderError> {
    let packing = &payload.packing;
    let bit_offset = if *packing == file.packing {
        frame.payload_bit_offset
    } else {
        frame.frame_index * packing.frame_bits()
    };
    decode_frame(&payload.data, packing, bit_offset, output).map_err(|error| {
        ReaderError::Decode {
            file_index: file.index,
            frame_index: Some(frame.frame_index),
            message: error.to_string(),
        }
    })?;

    if info.rescale.applied {
        rescale_slice(output, frame.rescale(), info.rescale.target());
    }

    if auto_ybr_to_rgb && packing.photometric.is_ybr() {
        if packing.samples_per_pixel != 3 {
            return Err(ReaderError::Normalize {
                file_index: file.index,
                frame_index: frame.frame_index,
                message: format!(
                    "{} with {} samples per pixel",
                    packing.photometric, packing.samples_per_pixel
                ),
            });
        }
        ybr_to_rgb(output, packing.bits_stored, packing.photometric.is_partial_range());
    }

    if info.geometry.row_order != file.native_row_order {
        flip_rows(output, packing.columns * packing.samples_per_pixel);
    }
    Ok(())
}
