//! Patient-space geometry of an assembled volume.

use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

use crate::enums::RowOrder;
use crate::error::{ReaderError, StructureError};
use crate::metadata::MetaData;
use crate::sorter::slice_normal;
use crate::validator::SliceMap;

/// Extents, spacing and orientation of a volume as laid out in memory.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeGeometry {
    pub columns: usize,
    pub rows: usize,
    pub slices: usize,
    /// Number of time steps read.
    pub time_steps: usize,
    pub vector_dimension: usize,
    pub samples_per_pixel: usize,
    /// Time steps are stored as extra components instead of a time axis.
    pub time_as_vector: bool,
    /// Column, row and slice spacing in mm.
    pub spacing: [f64; 3],
    /// Mean interval between time steps (ms when trigger times are known).
    /// Measured over the whole series, also when one time step is selected.
    pub time_spacing: f64,
    /// Patient position of voxel (0, 0, 0).
    pub origin: [f64; 3],
    /// Columns are the directions of increasing column, row and slice index.
    pub direction: Matrix3<f64>,
    /// Maps `(column, row, slice, 1)` to patient coordinates.
    ///
    /// Slices always ascend along row x column, so a flipped (bottom-up)
    /// volume has a left-handed direction matrix with determinant -1.
    pub patient_matrix: Matrix4<f64>,
    /// Row order of the voxel buffer.
    pub row_order: RowOrder,
    /// Whether rows are reversed relative to the files' storage order.
    pub flip_rows: bool,
}

impl VolumeGeometry {
    /// Length of the output time axis.
    pub fn time_dimension(&self) -> usize {
        if self.time_as_vector { 1 } else { self.time_steps }
    }

    /// Scalar components per voxel.
    pub fn components(&self) -> usize {
        let per_step = self.vector_dimension * self.samples_per_pixel;
        if self.time_as_vector {
            per_step * self.time_steps
        } else {
            per_step
        }
    }

    /// Shape of the voxel array: (time, slice, row, column, component).
    pub fn dim(&self) -> (usize, usize, usize, usize, usize) {
        (
            self.time_dimension(),
            self.slices,
            self.rows,
            self.columns,
            self.components(),
        )
    }

    pub fn index_to_patient(&self, column: f64, row: f64, slice: f64) -> [f64; 3] {
        let point = self.patient_matrix * Vector4::new(column, row, slice, 1.0);
        [point.x, point.y, point.z]
    }
}

pub struct GeometryBuilder;

impl GeometryBuilder {
    /// Derive the geometry from the first slice of `slice_map`.
    ///
    /// Spacing falls back to slice thickness, then 1, along each axis the
    /// files do not describe. Without position and orientation the volume
    /// is axis aligned at the origin.
    pub fn build(
        metadata: &MetaData,
        slice_map: &SliceMap,
        row_order: RowOrder,
        time_as_vector: bool,
    ) -> Result<VolumeGeometry, ReaderError> {
        let key = slice_map.get(0, 0).ok_or(StructureError::EmptyStack)?;
        let layout = |message: &str| StructureError::Layout(format!("{message} {key:?}"));
        let frame = metadata.frame(key).ok_or_else(|| layout("unknown frame"))?;
        let file = metadata.file(key.file_index).ok_or_else(|| layout("unknown file"))?;
        let packing = &file.packing;

        let [row_spacing, column_spacing] = frame.pixel_spacing.unwrap_or([1.0, 1.0]);
        let slice_spacing = slice_map
            .slice_spacing
            .filter(|&spacing| spacing > 0.0)
            .or(frame.slice_thickness)
            .unwrap_or(1.0);
        let spacing = [column_spacing, row_spacing, slice_spacing];

        let (mut origin, row_direction, mut column_direction, normal) =
            match (frame.position, frame.orientation) {
                (Some(position), Some(orientation)) => match slice_normal(&orientation) {
                    Some(normal) => (
                        Vector3::from(position),
                        Vector3::new(orientation[0], orientation[1], orientation[2]),
                        Vector3::new(orientation[3], orientation[4], orientation[5]),
                        normal,
                    ),
                    None => Self::axis_aligned(),
                },
                _ => Self::axis_aligned(),
            };

        let resolved = row_order.resolve(file.native_row_order);
        let flip_rows = row_order.needs_flip(file.native_row_order);
        if flip_rows {
            origin += column_direction * row_spacing * packing.rows.saturating_sub(1) as f64;
            column_direction = -column_direction;
        }

        let direction = Matrix3::from_columns(&[row_direction, column_direction, normal]);
        let (r, c, n, o) = (
            row_direction * spacing[0],
            column_direction * spacing[1],
            normal * spacing[2],
            origin,
        );
        #[rustfmt::skip]
        let patient_matrix = Matrix4::new(
            r.x, c.x, n.x, o.x,
            r.y, c.y, n.y, o.y,
            r.z, c.z, n.z, o.z,
            0.0, 0.0, 0.0, 1.0,
        );

        Ok(VolumeGeometry {
            columns: packing.columns,
            rows: packing.rows,
            slices: slice_map.slices,
            time_steps: slice_map.time_dimension,
            vector_dimension: slice_map.vector_dimension,
            samples_per_pixel: packing.samples_per_pixel,
            time_as_vector,
            spacing,
            time_spacing: Self::time_spacing(metadata, slice_map),
            origin: [origin.x, origin.y, origin.z],
            direction,
            patient_matrix,
            row_order: resolved,
            flip_rows,
        })
    }

    fn axis_aligned() -> (Vector3<f64>, Vector3<f64>, Vector3<f64>, Vector3<f64>) {
        (Vector3::zeros(), Vector3::x(), Vector3::y(), Vector3::z())
    }

    /// Mean trigger time difference between the time steps of the first slice.
    pub fn time_spacing(metadata: &MetaData, slice_map: &SliceMap) -> f64 {
        let steps = slice_map.time_dimension;
        if steps < 2 {
            return 1.0;
        }
        let times: Option<Vec<f64>> = (0..steps)
            .map(|time| {
                let key = slice_map.get(0, time * slice_map.vector_dimension)?;
                metadata.frame(key)?.trigger_time
            })
            .collect();
        match times {
            Some(times) => {
                let spacing = (times[steps - 1] - times[0]) / (steps - 1) as f64;
                if spacing > 0.0 { spacing } else { 1.0 }
            }
            None => 1.0,
        }
    }
}

/// Reverse the order of the rows of one slice in place.
pub fn flip_rows<T>(data: &mut [T], row_len: usize) {
    if row_len == 0 {
        return;
    }
    let rows = data.len() / row_len;
    for row in 0..rows / 2 {
        let (top, bottom) = data.split_at_mut((rows - 1 - row) * row_len);
        top[row * row_len..(row + 1) * row_len].swap_with_slice(&mut bottom[..row_len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FrameRecord;
    use crate::sorter::tests::{axial, store};
    use crate::sorter::{DefaultSliceSorter, SliceSorter};
    use crate::validator::validate;

    fn geometry(frames: Vec<FrameRecord>, row_order: RowOrder) -> VolumeGeometry {
        let metadata = store(frames);
        let refs: Vec<&FrameRecord> = metadata.frames().iter().collect();
        let sorted = DefaultSliceSorter.sort(&metadata, &refs).unwrap();
        let map = validate(&metadata, &sorted, 1e-2).unwrap();
        GeometryBuilder::build(&metadata, &map, row_order, false).unwrap()
    }

    fn spaced(z: f64) -> FrameRecord {
        let mut frame = axial(z);
        frame.position = Some([-20.0, 10.0, z]);
        frame.pixel_spacing = Some([0.5, 0.25]);
        frame
    }

    #[test]
    fn top_down_matrix_includes_spacing_and_origin() {
        let geometry = geometry(vec![spaced(3.0), spaced(1.0)], RowOrder::TopDown);
        assert!(!geometry.flip_rows);
        assert_eq!(geometry.spacing, [0.25, 0.5, 2.0]);
        assert_eq!(geometry.origin, [-20.0, 10.0, 1.0]);
        assert_eq!(geometry.index_to_patient(4.0, 2.0, 1.0), [-19.0, 11.0, 3.0]);
        assert_eq!(geometry.dim(), (1, 2, 2, 2, 1));
    }

    #[test]
    fn bottom_up_moves_origin_to_last_row() {
        let geometry = geometry(vec![spaced(0.0)], RowOrder::BottomUp);
        assert!(geometry.flip_rows);
        assert_eq!(geometry.row_order, RowOrder::BottomUp);
        // store() uses two rows, so the last row sits one row spacing down
        assert_eq!(geometry.origin, [-20.0, 10.5, 0.0]);
        assert_eq!(geometry.index_to_patient(0.0, 1.0, 0.0), [-20.0, 10.0, 0.0]);
        assert_eq!(geometry.direction.column(1).into_owned(), Vector3::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn only_bottom_up_direction_is_left_handed() {
        let frames = || vec![spaced(0.0), spaced(2.0)];
        assert_eq!(geometry(frames(), RowOrder::TopDown).direction.determinant(), 1.0);
        assert_eq!(geometry(frames(), RowOrder::BottomUp).direction.determinant(), -1.0);
    }

    #[test]
    fn missing_geometry_is_axis_aligned() {
        let geometry = geometry(vec![FrameRecord::new(0, 0)], RowOrder::FileNative);
        assert_eq!(geometry.origin, [0.0; 3]);
        assert_eq!(geometry.direction, Matrix3::identity());
        assert_eq!(geometry.spacing, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn single_slice_uses_slice_thickness() {
        let mut frame = axial(0.0);
        frame.slice_thickness = Some(5.0);
        assert_eq!(geometry(vec![frame], RowOrder::TopDown).spacing[2], 5.0);
    }

    #[test]
    fn time_spacing_from_trigger_times() {
        let timed = |time: f64| {
            let mut frame = axial(0.0);
            frame.trigger_time = Some(time);
            frame
        };
        let geometry = geometry(vec![timed(0.0), timed(80.0), timed(40.0)], RowOrder::TopDown);
        assert_eq!(geometry.time_steps, 3);
        assert_eq!(geometry.time_spacing, 40.0);
    }

    #[test]
    fn folded_time_becomes_components() {
        let mut geometry = geometry(vec![axial(0.0), axial(0.0)], RowOrder::TopDown);
        geometry.time_steps = 3;
        geometry.time_as_vector = true;
        assert_eq!(geometry.time_dimension(), 1);
        assert_eq!(geometry.components(), 6);
    }

    #[test]
    fn flipping_reverses_rows() {
        let mut data = [1, 2, 3, 4, 5, 6, 7, 8, 9];
        flip_rows(&mut data, 3);
        assert_eq!(data, [7, 8, 9, 4, 5, 6, 1, 2, 3]);

        let mut even = [1, 2, 3, 4];
        flip_rows(&mut even, 1);
        assert_eq!(even, [4, 3, 2, 1]);
    }
}
