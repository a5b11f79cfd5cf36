//! Ordering of frames into slices.
//!
//! A sorter receives the frames of the active stack in input order and
//! returns them grouped by spatial location. Within a location frames are
//! grouped into time steps; frames sharing a location and a time step form
//! the vector components of that slice.

use std::cmp::Ordering;

use nalgebra::Vector3;

use crate::error::{ReaderError, StructureError};
use crate::metadata::{FrameKey, FrameRecord, MetaData};

/// Positions closer than this along the slice normal share a location (mm).
pub const LOCATION_TOLERANCE: f64 = 1e-3;

/// Maximum difference between direction cosines of one orientation group.
pub const ORIENTATION_TOLERANCE: f64 = 1e-4;

/// One spatial location of the sorted output.
#[derive(Clone, Debug, PartialEq)]
pub struct SliceLocation {
    /// Distance along the slice normal, when the frames carry geometry.
    pub distance: Option<f64>,
    /// Number of frames in each consecutive time step.
    pub time_groups: Vec<usize>,
}

impl SliceLocation {
    pub fn single(distance: Option<f64>) -> Self {
        Self {
            distance,
            time_groups: vec![1],
        }
    }

    pub fn len(&self) -> usize {
        self.time_groups.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sorter output: all frames, location-major, then time, then component.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SortedFrames {
    pub order: Vec<FrameKey>,
    pub locations: Vec<SliceLocation>,
    /// Unit normal used for the distances, if any.
    pub normal: Option<[f64; 3]>,
}

impl SortedFrames {
    /// One slice per frame, in the order given.
    pub fn input_order(frames: &[&FrameRecord]) -> Self {
        Self {
            order: frames.iter().map(|frame| frame.key()).collect(),
            locations: frames.iter().map(|_| SliceLocation::single(None)).collect(),
            normal: None,
        }
    }
}

pub trait SliceSorter: Send + Sync {
    fn name(&self) -> &str {
        "custom"
    }

    fn sort(
        &self,
        metadata: &MetaData,
        frames: &[&FrameRecord],
    ) -> Result<SortedFrames, ReaderError>;
}

/// Sorts by position along the normal of the image plane.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSliceSorter;

impl SliceSorter for DefaultSliceSorter {
    fn name(&self) -> &str {
        "position"
    }

    fn sort(
        &self,
        _metadata: &MetaData,
        frames: &[&FrameRecord],
    ) -> Result<SortedFrames, ReaderError> {
        if frames.is_empty() {
            return Err(StructureError::EmptyStack.into());
        }

        if frames.iter().all(|frame| !frame.has_geometry()) {
            log::warn!(
                "no frame carries ImagePositionPatient/ImageOrientationPatient, \
                 keeping input order"
            );
            return Ok(SortedFrames::input_order(frames));
        }
        if let Some(frame) = frames.iter().find(|frame| !frame.has_geometry()) {
            return Err(ReaderError::Sort {
                file_index: Some(frame.file_index),
                frame_index: Some(frame.frame_index),
                message: "frame has no position or orientation while others do".into(),
            });
        }

        let reference = frames[0].orientation.unwrap_or_default();
        if let Some(frame) = frames.iter().find(|frame| {
            let orientation = frame.orientation.unwrap_or_default();
            orientation
                .iter()
                .zip(reference.iter())
                .any(|(a, b)| (a - b).abs() > ORIENTATION_TOLERANCE)
        }) {
            return Err(ReaderError::Sort {
                file_index: Some(frame.file_index),
                frame_index: Some(frame.frame_index),
                message: "the stack contains more than one image orientation".into(),
            });
        }

        let normal = slice_normal(&reference)
            .ok_or_else(|| ReaderError::sort("degenerate ImageOrientationPatient"))?;

        let mut keyed: Vec<(f64, usize, &FrameRecord)> = frames
            .iter()
            .enumerate()
            .map(|(input, frame)| {
                let position = Vector3::from(frame.position.unwrap_or_default());
                (position.dot(&normal), input, *frame)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut sorted = SortedFrames {
            normal: Some([normal.x, normal.y, normal.z]),
            ..SortedFrames::default()
        };
        let mut start = 0;
        while start < keyed.len() {
            let distance = keyed[start].0;
            let end = keyed[start..]
                .iter()
                .position(|(d, _, _)| d - distance > LOCATION_TOLERANCE)
                .map_or(keyed.len(), |offset| start + offset);

            let group = &mut keyed[start..end];
            group.sort_by(|a, b| compare_time(a.2, b.2).then(a.1.cmp(&b.1)));

            let mut time_groups: Vec<usize> = Vec::new();
            for (i, (_, _, frame)) in group.iter().enumerate() {
                if i == 0 || compare_time(group[i - 1].2, frame) != Ordering::Equal {
                    time_groups.push(1);
                } else if let Some(last) = time_groups.last_mut() {
                    *last += 1;
                }
            }

            sorted.order.extend(group.iter().map(|(_, _, frame)| frame.key()));
            sorted.locations.push(SliceLocation {
                distance: Some(distance),
                time_groups,
            });
            start = end;
        }
        Ok(sorted)
    }
}

/// Unit normal of the image plane, row direction cross column direction.
pub fn slice_normal(orientation: &[f64; 6]) -> Option<Vector3<f64>> {
    let row = Vector3::new(orientation[0], orientation[1], orientation[2]);
    let column = Vector3::new(orientation[3], orientation[4], orientation[5]);
    row.cross(&column).try_normalize(f64::EPSILON)
}

fn compare_time(a: &FrameRecord, b: &FrameRecord) -> Ordering {
    fn float(a: Option<f64>, b: Option<f64>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (a, b) => a.is_some().cmp(&b.is_some()),
        }
    }
    a.temporal_position
        .cmp(&b.temporal_position)
        .then_with(|| float(a.trigger_time, b.trigger_time))
        .then_with(|| float(a.acquisition_time, b.acquisition_time))
}
