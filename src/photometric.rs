//! Intensity harmonization and colour conversion of decoded slices.

use crate::decoder::Scalar;
use crate::metadata::MetaData;
use crate::validator::SliceMap;

/// Rescale slope and intercept of an assembled volume.
///
/// When `applied` is set, every slice has been remapped so that
/// `slope * v + intercept` yields calibrated values for the whole volume.
/// Otherwise the pair is that of the first slice and is informational only:
/// callers needing calibrated values must use [`per_slice`] instead.
///
/// [`per_slice`]: RescaleParameters::per_slice
#[derive(Clone, Debug, PartialEq)]
pub struct RescaleParameters {
    pub slope: f64,
    pub intercept: f64,
    pub applied: bool,
    /// (slope, intercept) of each slice map entry.
    pub per_slice: Vec<(f64, f64)>,
}

impl Default for RescaleParameters {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
            applied: false,
            per_slice: Vec::new(),
        }
    }
}

impl RescaleParameters {
    /// Pick the volume-wide pair.
    ///
    /// The target is `target` when given, else the first slice's pair.
    /// Remapping is applied only if `enabled` and some slice differs from the
    /// target.
    pub fn harmonize(
        metadata: &MetaData,
        slice_map: &SliceMap,
        enabled: bool,
        target: Option<(f64, f64)>,
    ) -> Self {
        let per_slice: Vec<(f64, f64)> = slice_map
            .keys()
            .map(|key| metadata.frame(key).map_or((1.0, 0.0), |frame| frame.rescale()))
            .collect();
        let (slope, intercept) = target
            .or_else(|| per_slice.first().copied())
            .unwrap_or((1.0, 0.0));
        let applied = enabled && per_slice.iter().any(|&pair| pair != (slope, intercept));
        Self {
            slope,
            intercept,
            applied,
            per_slice,
        }
    }

    pub fn target(&self) -> (f64, f64) {
        (self.slope, self.intercept)
    }
}

/// Remap values stored with `source` parameters onto `target` parameters:
/// `v' = (v * slope_i + intercept_i - intercept_t) / slope_t`.
///
/// This is lossy: results are rounded and saturate at the type range.
pub fn rescale_slice<T: Scalar>(data: &mut [T], source: (f64, f64), target: (f64, f64)) {
    if source == target {
        return;
    }
    let scale = source.0 / target.0;
    let shift = (source.1 - target.1) / target.0;
    for value in data.iter_mut() {
        *value = T::from_f64(value.to_f64() * scale + shift);
    }
}

/// Convert interleaved three-sample YBR pixels to RGB in place.
///
/// Full-range data uses the JPEG (JFIF) equations, partial-range data the
/// ITU-R BT.601 equations with offsets scaled to `bits_stored`.
pub fn ybr_to_rgb<T: Scalar>(data: &mut [T], bits_stored: u16, partial: bool) {
    let bits = bits_stored.clamp(2, 32) as u32;
    let max = ((1u64 << bits) - 1) as f64;
    let half = (1u64 << (bits - 1)) as f64;
    let (luma_offset, luma_gain, chroma_gain) = if partial {
        let unit = (1u64 << bits) as f64 / 256.0;
        (16.0 * unit, 255.0 / 219.0, 255.0 / 224.0)
    } else {
        (0.0, 1.0, 1.0)
    };

    for pixel in data.chunks_exact_mut(3) {
        let y = (pixel[0].to_f64() - luma_offset) * luma_gain;
        let cb = (pixel[1].to_f64() - half) * chroma_gain;
        let cr = (pixel[2].to_f64() - half) * chroma_gain;

        let r = y + 1.402 * cr;
        let g = y - 0.3441362862 * cb - 0.7141362862 * cr;
        let b = y + 1.772 * cb;

        pixel[0] = T::from_f64(r.clamp(0.0, max));
        pixel[1] = T::from_f64(g.clamp(0.0, max));
        pixel[2] = T::from_f64(b.clamp(0.0, max));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FrameRecord;
    use crate::sorter::tests::store;
    use crate::validator::SliceMap;

    fn map(slices: usize) -> SliceMap {
        SliceMap {
            file_indices: (0..slices).collect(),
            frame_indices: vec![0; slices],
            slices,
            time_dimension: 1,
            vector_dimension: 1,
            slice_spacing: None,
        }
    }

    fn with_rescale(slope: f64, intercept: f64) -> FrameRecord {
        let mut frame = FrameRecord::new(0, 0);
        frame.rescale_slope = slope;
        frame.rescale_intercept = intercept;
        frame
    }

    #[test]
    fn second_slice_maps_onto_first_slice_parameters() {
        let metadata = store(vec![with_rescale(1.0, 0.0), with_rescale(2.0, 100.0)]);
        let rescale = RescaleParameters::harmonize(&metadata, &map(2), true, None);
        assert!(rescale.applied);
        assert_eq!(rescale.target(), (1.0, 0.0));

        let mut values = [0u16, 7, 1000];
        rescale_slice(&mut values, rescale.per_slice[1], rescale.target());
        assert_eq!(values, [100, 114, 2100]);
    }

    #[test]
    fn identical_parameters_need_no_rescale() {
        let metadata = store(vec![with_rescale(2.0, -5.0), with_rescale(2.0, -5.0)]);
        let rescale = RescaleParameters::harmonize(&metadata, &map(2), true, None);
        assert!(!rescale.applied);
        assert_eq!(rescale.target(), (2.0, -5.0));
    }

    #[test]
    fn disabled_rescale_reports_first_slice_without_applying() {
        let metadata = store(vec![with_rescale(1.0, -1024.0), with_rescale(0.5, 0.0)]);
        let rescale = RescaleParameters::harmonize(&metadata, &map(2), false, None);
        assert!(!rescale.applied);
        assert_eq!(rescale.target(), (1.0, -1024.0));
        assert_eq!(rescale.per_slice, vec![(1.0, -1024.0), (0.5, 0.0)]);
    }

    #[test]
    fn explicit_target_overrides_first_slice() {
        let metadata = store(vec![with_rescale(1.0, 0.0)]);
        let rescale = RescaleParameters::harmonize(&metadata, &map(1), true, Some((0.5, 10.0)));
        assert!(rescale.applied);
        assert_eq!(rescale.target(), (0.5, 10.0));
    }

    #[test]
    fn inverse_rescale_recovers_raw_values() {
        let source = (2.5, -30.0);
        let target = (0.5, 12.0);
        let raw: Vec<i32> = vec![-400, -1, 0, 3, 1234];
        let mut values = raw.clone();
        rescale_slice(&mut values, source, target);
        for (original, remapped) in raw.iter().zip(values) {
            let recovered = (remapped as f64 * target.0 + target.1 - source.1) / source.0;
            assert!((recovered - *original as f64).abs() <= 0.5 * target.0 / source.0 + 1e-9);
        }
    }

    #[test]
    fn rescale_saturates_at_type_range() {
        let mut values = [200u8, 10];
        rescale_slice(&mut values, (2.0, 0.0), (1.0, 0.0));
        assert_eq!(values, [255, 20]);
    }

    #[test]
    fn converts_full_range_ybr() {
        // white, black, neutral grey and pure red
        let mut pixels = [255u8, 128, 128, 0, 128, 128, 128, 128, 128, 76, 85, 255];
        ybr_to_rgb(&mut pixels, 8, false);
        assert_eq!(&pixels[0..3], &[255, 255, 255]);
        assert_eq!(&pixels[3..6], &[0, 0, 0]);
        assert_eq!(&pixels[6..9], &[128, 128, 128]);
        assert!(pixels[9] >= 250 && pixels[10] <= 2 && pixels[11] <= 2);
    }

    #[test]
    fn converts_partial_range_ybr() {
        let mut pixels = [235u16, 128, 128, 16, 128, 128];
        ybr_to_rgb(&mut pixels, 8, true);
        assert!(pixels[0..3].iter().all(|&v| v >= 254));
        assert!(pixels[3..6].iter().all(|&v| v <= 2));
    }
}
