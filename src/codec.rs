use dicom::object::open_file;
use dicom::pixeldata::{PixelDecoder, PixelRepresentation, PlanarConfiguration};
use dicom_dictionary_std::tags;
use thiserror::Error;

use crate::enums::PhotometricInterpretation;
use crate::metadata::{FileRecord, PackingDescriptor};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("no pixel data: {0}")]
    MissingPixelData(String),

    #[error("pixel data decoder failed on frame {frame}: {message}")]
    Delegate { frame: usize, message: String },
}

/// The raw pixel payload of one file and the packing it is stored in.
///
/// Frames are stored back to back. For uncompressed files this is the
/// file's own packing; delegated decoders may report a different one, for
/// example after undoing chroma subsampling.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub data: Vec<u8>,
    pub packing: PackingDescriptor,
}

/// Supplies the pixel payload of one file.
pub trait Codec: Send + Sync {
    fn decode(&self, file: &FileRecord) -> Result<Payload, CodecError>;
}

/// Reads uncompressed pixel data directly and hands encapsulated pixel data
/// to the dicom-rs pixel data decoders.
#[derive(Debug, Default, Clone, Copy)]
pub struct DicomCodec;

impl Codec for DicomCodec {
    fn decode(&self, file: &FileRecord) -> Result<Payload, CodecError> {
        let object = open_file(&file.path)?;
        let element = object
            .element(tags::PIXEL_DATA)
            .map_err(|e| CodecError::MissingPixelData(e.to_string()))?;

        if element.value().fragments().is_none() {
            let data = element
                .to_bytes()
                .map_err(|e| CodecError::MissingPixelData(e.to_string()))?;
            return Ok(Payload {
                data: data.into_owned(),
                packing: file.packing.clone(),
            });
        }

        log::debug!(
            "delegating encapsulated pixel data of {} ({})",
            file.path.display(),
            file.transfer_syntax
        );
        let mut data = Vec::new();
        let mut packing = file.packing.clone();
        for frame in 0..file.number_of_frames() {
            let decoded = object
                .decode_pixel_data_frame(frame as u32)
                .map_err(|e| CodecError::Delegate {
                    frame,
                    message: e.to_string(),
                })?;
            packing = PackingDescriptor {
                rows: decoded.rows() as usize,
                columns: decoded.columns() as usize,
                samples_per_pixel: decoded.samples_per_pixel() as usize,
                bits_allocated: decoded.bits_allocated(),
                bits_stored: decoded.bits_stored(),
                signed: decoded.pixel_representation() == PixelRepresentation::Signed,
                planar: decoded.samples_per_pixel() > 1
                    && decoded.planar_configuration() != PlanarConfiguration::Standard,
                subsampled: false,
                photometric: PhotometricInterpretation::parse(
                    decoded.photometric_interpretation().as_str(),
                ),
            };
            data.extend_from_slice(decoded.data());
        }
        Ok(Payload { data, packing })
    }
}
