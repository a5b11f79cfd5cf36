use image::{DynamicImage, ImageBuffer, Luma, Rgb};
use ndarray::{Array5, ArrayView3, s};
use rayon::prelude::*;

use crate::decoder::Scalar;
use crate::enums::{PhotometricInterpretation, RowOrder, ScalarType};
use crate::geometry::VolumeGeometry;
use crate::photometric::RescaleParameters;
use crate::validator::SliceMap;

/// Voxel buffer in the scalar type of the source data, shaped
/// (time, slice, row, column, component).
#[derive(Clone, Debug, PartialEq)]
pub enum Voxels {
    U8(Array5<u8>),
    I8(Array5<i8>),
    U16(Array5<u16>),
    I16(Array5<i16>),
    U32(Array5<u32>),
    I32(Array5<i32>),
}

macro_rules! with_array {
    ($voxels:expr, $array:ident => $body:expr) => {
        match $voxels {
            Voxels::U8($array) => $body,
            Voxels::I8($array) => $body,
            Voxels::U16($array) => $body,
            Voxels::I16($array) => $body,
            Voxels::U32($array) => $body,
            Voxels::I32($array) => $body,
        }
    };
}

/// Scalars that can be stored in [`Voxels`].
pub trait Element: Scalar {
    fn into_voxels(array: Array5<Self>) -> Voxels;
    fn from_voxels(voxels: &Voxels) -> Option<&Array5<Self>>;
}

macro_rules! impl_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                fn into_voxels(array: Array5<Self>) -> Voxels {
                    Voxels::$variant(array)
                }

                fn from_voxels(voxels: &Voxels) -> Option<&Array5<Self>> {
                    match voxels {
                        Voxels::$variant(array) => Some(array),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_element!(u8 => U8, i8 => I8, u16 => U16, i16 => I16, u32 => U32, i32 => I32);

impl Voxels {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Voxels::U8(_) => ScalarType::U8,
            Voxels::I8(_) => ScalarType::I8,
            Voxels::U16(_) => ScalarType::U16,
            Voxels::I16(_) => ScalarType::I16,
            Voxels::U32(_) => ScalarType::U32,
            Voxels::I32(_) => ScalarType::I32,
        }
    }

    pub fn dim(&self) -> (usize, usize, usize, usize, usize) {
        with_array!(self, array => array.dim())
    }

    /// The typed array, if `T` is the stored scalar type.
    pub fn array<T: Element>(&self) -> Option<&Array5<T>> {
        T::from_voxels(self)
    }

    /// Copy of all voxels converted to `f64`, in memory order.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_array!(self, array => array.iter().map(|&value| value.to_f64()).collect())
    }
}

/// An assembled volume.
#[derive(Clone, Debug)]
pub struct Volume {
    pub voxels: Voxels,
    pub geometry: VolumeGeometry,
    /// Frame each (slice, component) was read from.
    pub slice_map: SliceMap,
    pub rescale: RescaleParameters,
    /// Photometric interpretation recorded in the files. It keeps describing
    /// the source encoding after YBR data has been converted to RGB.
    pub photometric: PhotometricInterpretation,
    /// Interpretation of the samples in `voxels`.
    pub memory_photometric: PhotometricInterpretation,
}

impl Volume {
    /// Get the dimensions of the volume (time, slice, row, column, component)
    pub fn dim(&self) -> (usize, usize, usize, usize, usize) {
        self.voxels.dim()
    }

    pub fn slice_to_file(&self) -> &[usize] {
        &self.slice_map.file_indices
    }

    pub fn slice_to_frame(&self) -> &[usize] {
        &self.slice_map.frame_indices
    }

    /// Render one slice as an 8-bit image for previews, windowed to the
    /// slice's value range. RGB volumes give colour images, anything else
    /// shows the first component.
    pub fn slice_image(&self, time: usize, slice: usize) -> Option<DynamicImage> {
        let (times, slices, ..) = self.dim();
        if time >= times || slice >= slices {
            return None;
        }
        let rgb = self.memory_photometric == PhotometricInterpretation::Rgb
            && self.geometry.components() >= 3;
        let bottom_up = self.geometry.row_order == RowOrder::BottomUp;
        with_array!(&self.voxels, array => {
            slice_to_image(array.slice(s![time, slice, .., .., ..]), rgb, bottom_up)
        })
    }
}

#[inline]
fn normalize_to_u8(value: f64, min: f64, range: f64) -> u8 {
    if range <= 0.0 {
        return 0;
    }
    (((value - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8
}

fn slice_to_image<T: Scalar>(
    slice: ArrayView3<'_, T>,
    rgb: bool,
    bottom_up: bool,
) -> Option<DynamicImage> {
    let (height, width, _) = slice.dim();
    let channels = if rgb { 3 } else { 1 };
    let (min, max) = slice
        .iter()
        .map(|&value| value.to_f64())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), value| {
            (min.min(value), max.max(value))
        });
    let range = max - min;

    // image rows run top to bottom
    let slice = &slice;
    let pixel_data: Vec<u8> = (0..height)
        .into_par_iter()
        .flat_map_iter(move |y| {
            let row = if bottom_up { height - 1 - y } else { y };
            (0..width).flat_map(move |x| {
                (0..channels).map(move |c| normalize_to_u8(slice[[row, x, c]].to_f64(), min, range))
            })
        })
        .collect();

    if rgb {
        ImageBuffer::<Rgb<u8>, _>::from_raw(width as u32, height as u32, pixel_data)
            .map(DynamicImage::ImageRgb8)
    } else {
        ImageBuffer::<Luma<u8>, _>::from_raw(width as u32, height as u32, pixel_data)
            .map(DynamicImage::ImageLuma8)
    }
}
