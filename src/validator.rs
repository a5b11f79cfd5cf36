use std::collections::HashSet;

use crate::error::StructureError;
use crate::metadata::{FrameKey, MetaData};
use crate::sorter::SortedFrames;

/// Slice index to (file, frame) map of a validated volume.
///
/// Entries are stored as `slice * components + component`, where
/// `component = time * vector_dimension + vector`.
#[derive(Clone, Debug, PartialEq)]
pub struct SliceMap {
    pub file_indices: Vec<usize>,
    pub frame_indices: Vec<usize>,
    pub slices: usize,
    pub time_dimension: usize,
    pub vector_dimension: usize,
    /// Mean distance between locations, when the frames carry geometry.
    pub slice_spacing: Option<f64>,
}

impl SliceMap {
    pub fn components(&self) -> usize {
        self.time_dimension * self.vector_dimension
    }

    pub fn len(&self) -> usize {
        self.file_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file_indices.is_empty()
    }

    pub fn get(&self, slice: usize, component: usize) -> Option<FrameKey> {
        if component >= self.components() {
            return None;
        }
        let index = slice * self.components() + component;
        Some(FrameKey::new(
            *self.file_indices.get(index)?,
            *self.frame_indices.get(index)?,
        ))
    }

    pub fn keys(&self) -> impl Iterator<Item = FrameKey> + '_ {
        self.file_indices
            .iter()
            .zip(self.frame_indices.iter())
            .map(|(&file, &frame)| FrameKey::new(file, frame))
    }

    /// Keep only the frames of one time step.
    pub fn restrict_to_time(&self, time: usize) -> SliceMap {
        let components = self.components();
        let mut file_indices = Vec::with_capacity(self.slices * self.vector_dimension);
        let mut frame_indices = Vec::with_capacity(self.slices * self.vector_dimension);
        for slice in 0..self.slices {
            let start = slice * components + time * self.vector_dimension;
            let range = start..start + self.vector_dimension;
            file_indices.extend_from_slice(&self.file_indices[range.clone()]);
            frame_indices.extend_from_slice(&self.frame_indices[range]);
        }
        SliceMap {
            file_indices,
            frame_indices,
            time_dimension: 1,
            ..self.clone()
        }
    }
}

/// Check that sorted frames form one rectangular, evenly spaced volume.
///
/// `tolerance` is relative to the mean slice spacing.
pub fn validate(
    metadata: &MetaData,
    sorted: &SortedFrames,
    tolerance: f64,
) -> Result<SliceMap, StructureError> {
    let first = sorted.locations.first().ok_or(StructureError::EmptyStack)?;
    let frames_per_location = first.len();
    let time_dimension = first.time_groups.len();
    if frames_per_location == 0 || sorted.order.is_empty() {
        return Err(StructureError::EmptyStack);
    }
    if frames_per_location % time_dimension != 0 {
        return Err(StructureError::TimeSteps {
            frames: frames_per_location,
            time_steps: time_dimension,
        });
    }
    let vector_dimension = frames_per_location / time_dimension;

    for (location, slice) in sorted.locations.iter().enumerate() {
        if slice.len() != frames_per_location {
            return Err(StructureError::FramesPerLocation {
                location,
                expected: frames_per_location,
                found: slice.len(),
            });
        }
        if slice.time_groups.iter().any(|&size| size != vector_dimension) {
            return Err(StructureError::TimeSteps {
                frames: slice.len(),
                time_steps: time_dimension,
            });
        }
    }
    if sorted.order.len() != frames_per_location * sorted.locations.len() {
        return Err(StructureError::Layout(format!(
            "{} frames for {} locations of {}",
            sorted.order.len(),
            sorted.locations.len(),
            frames_per_location
        )));
    }

    let mut seen = HashSet::with_capacity(sorted.order.len());
    for key in &sorted.order {
        if !seen.insert(*key) {
            return Err(StructureError::DuplicateFrame {
                file_index: key.file_index,
                frame_index: key.frame_index,
            });
        }
    }

    validate_pixels(metadata, sorted)?;
    let slice_spacing = validate_spacing(sorted, tolerance)?;

    Ok(SliceMap {
        file_indices: sorted.order.iter().map(|key| key.file_index).collect(),
        frame_indices: sorted.order.iter().map(|key| key.frame_index).collect(),
        slices: sorted.locations.len(),
        time_dimension,
        vector_dimension,
        slice_spacing,
    })
}

fn validate_pixels(metadata: &MetaData, sorted: &SortedFrames) -> Result<(), StructureError> {
    let mut files = sorted.order.iter().map(|key| key.file_index);
    let Some(reference) = files.next().and_then(|index| metadata.file(index)) else {
        return Err(StructureError::Layout("unknown file index".into()));
    };
    for index in files {
        let file = metadata
            .file(index)
            .ok_or_else(|| StructureError::Layout(format!("unknown file index {index}")))?;
        if !file.packing.layout_matches(&reference.packing) {
            return Err(StructureError::InconsistentPixels {
                file_index: index,
                expected: reference.packing.summary(),
                found: file.packing.summary(),
            });
        }
    }
    Ok(())
}

fn validate_spacing(sorted: &SortedFrames, tolerance: f64) -> Result<Option<f64>, StructureError> {
    let distances: Option<Vec<f64>> = sorted.locations.iter().map(|slice| slice.distance).collect();
    let Some(distances) = distances else {
        return Ok(None);
    };
    if distances.len() < 2 {
        return Ok(None);
    }

    let gaps: Vec<f64> = distances.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let expected = (distances[distances.len() - 1] - distances[0]) / gaps.len() as f64;
    for (slice, gap) in gaps.iter().enumerate() {
        if (gap - expected).abs() > tolerance * expected.abs() {
            return Err(StructureError::NonUniformSpacing {
                slice,
                next: slice + 1,
                spacing: *gap,
                expected,
            });
        }
    }
    Ok(Some(expected))
}
