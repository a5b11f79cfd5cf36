//! Unpacking of stored pixel samples into the common voxel layout.
//!
//! Every frame is decoded into interleaved samples (`R G B R G B ...` for
//! colour data) of the volume's scalar type, with rows in file order.
//! Samples narrower than a byte are widened to one byte each, 12-bit samples
//! to 16 bits. Packed samples are read as a little-endian bit stream, least
//! significant bit first, so three 12-bit bytes `a b c` hold the samples
//! `a | (b & 0x0f) << 8` and `(b >> 4) | c << 4`.

use std::fmt::Debug;

use thiserror::Error;

use crate::enums::ScalarType;
use crate::metadata::PackingDescriptor;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("payload too short: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unsupported packing: {0}")]
    Unsupported(String),

    #[error("output holds {found} samples, frame has {expected}")]
    OutputSize { expected: usize, found: usize },
}

/// Voxel scalar types the reader produces.
pub trait Scalar: bytemuck::Pod + Default + Debug + PartialEq + Send + Sync {
    const TYPE: ScalarType;

    /// Convert a sign-corrected stored sample, saturating at the type range.
    fn from_sample(value: i64) -> Self;

    fn to_f64(self) -> f64;

    /// Round to nearest and saturate.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const TYPE: ScalarType = ScalarType::$variant;

                #[inline]
                fn from_sample(value: i64) -> Self {
                    value.clamp(<$ty>::MIN as i64, <$ty>::MAX as i64) as $ty
                }

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }

                #[inline]
                fn from_f64(value: f64) -> Self {
                    // `as` saturates and maps NaN to zero
                    value.round() as $ty
                }
            }
        )*
    };
}

impl_scalar!(u8 => U8, i8 => I8, u16 => U16, i16 => I16, u32 => U32, i32 => I32);

/// Read `count` samples of `bits` bits (at most 16) starting `bit_offset`
/// bits into `source`.
pub fn unpack_bits(
    source: &[u8],
    bit_offset: usize,
    bits: u16,
    count: usize,
) -> Result<Vec<u32>, DecodeError> {
    let bits = bits as usize;
    if bits == 0 || bits > 16 {
        return Err(DecodeError::Unsupported(format!("{bits}-bit unpacking")));
    }
    let needed = (bit_offset + bits * count).div_ceil(8);
    if source.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            available: source.len(),
        });
    }

    let mask = (1u32 << bits) - 1;
    Ok((0..count)
        .map(|index| {
            let start = bit_offset + index * bits;
            let byte = start / 8;
            // a 24-bit window covers any shift (< 8) plus 16 bits
            let window = (0..3).fold(0u32, |word, i| {
                word | (source.get(byte + i).copied().unwrap_or(0) as u32) << (8 * i)
            });
            (window >> (start % 8)) & mask
        })
        .collect())
}

/// Stored samples of one frame as unsigned words, in stored order.
fn stored_samples(
    payload: &[u8],
    packing: &PackingDescriptor,
    bit_offset: usize,
) -> Result<Vec<u32>, DecodeError> {
    let count = packing.stored_frame_samples();
    match packing.bits_allocated {
        1 | 12 => unpack_bits(payload, bit_offset, packing.bits_allocated, count),
        8 | 16 | 32 => {
            let width = packing.bits_allocated as usize / 8;
            let start = bit_offset / 8;
            let needed = start + count * width;
            let bytes = payload.get(start..needed).ok_or(DecodeError::Truncated {
                needed,
                available: payload.len(),
            })?;
            Ok(match width {
                1 => bytes.iter().map(|&b| b as u32).collect(),
                2 => bytes
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]) as u32)
                    .collect(),
                _ => bytes
                    .chunks_exact(4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            })
        }
        other => Err(DecodeError::Unsupported(format!("{other} bits allocated"))),
    }
}

/// Mask unused high bits and sign-extend signed samples.
#[inline]
fn sample_value(raw: u32, bits_stored: u16, signed: bool) -> i64 {
    let bits = bits_stored.clamp(1, 32) as u32;
    let raw = if bits == 32 { raw } else { raw & ((1u32 << bits) - 1) };
    if signed && bits > 1 && raw >> (bits - 1) == 1 {
        raw as i64 - (1i64 << bits)
    } else {
        raw as i64
    }
}

/// Decode one frame, starting `bit_offset` bits into `payload`, into
/// interleaved samples in `output`.
pub fn decode_frame<T: Scalar>(
    payload: &[u8],
    packing: &PackingDescriptor,
    bit_offset: usize,
    output: &mut [T],
) -> Result<(), DecodeError> {
    let expected = packing.frame_samples();
    if output.len() != expected {
        return Err(DecodeError::OutputSize {
            expected,
            found: output.len(),
        });
    }

    if can_copy_directly::<T>(packing) && bit_offset % 8 == 0 {
        let start = bit_offset / 8;
        let needed = start + std::mem::size_of_val(output);
        let bytes = payload.get(start..needed).ok_or(DecodeError::Truncated {
            needed,
            available: payload.len(),
        })?;
        bytemuck::cast_slice_mut::<T, u8>(output).copy_from_slice(bytes);
        return Ok(());
    }

    let samples: Vec<T> = stored_samples(payload, packing, bit_offset)?
        .into_iter()
        .map(|raw| T::from_sample(sample_value(raw, packing.bits_stored, packing.signed)))
        .collect();

    let spp = packing.samples_per_pixel;
    let pixels = packing.pixel_count();
    if packing.subsampled {
        if pixels % 2 == 1 || spp != 3 {
            return Err(DecodeError::Unsupported("YBR_FULL_422 with odd pixel count".into()));
        }
        // Y0 Y1 Cb Cr -> Y0 Cb Cr Y1 Cb Cr
        for (pair, stored) in output.chunks_exact_mut(6).zip(samples.chunks_exact(4)) {
            let [y0, y1, cb, cr] = [stored[0], stored[1], stored[2], stored[3]];
            pair.copy_from_slice(&[y0, cb, cr, y1, cb, cr]);
        }
    } else if packing.planar && spp > 1 {
        for (pixel, out) in output.chunks_exact_mut(spp).enumerate() {
            for (sample, value) in out.iter_mut().enumerate() {
                *value = samples[sample * pixels + pixel];
            }
        }
    } else {
        output.copy_from_slice(&samples);
    }
    Ok(())
}

/// Byte-aligned, interleaved samples using every allocated bit can be copied
/// straight into the output on little-endian targets.
fn can_copy_directly<T: Scalar>(packing: &PackingDescriptor) -> bool {
    cfg!(target_endian = "little")
        && packing.scalar_type() == Some(T::TYPE)
        && packing.bits_allocated as usize == 8 * T::TYPE.size()
        && packing.bits_stored == packing.bits_allocated
        && !packing.planar
        && !packing.subsampled
}
