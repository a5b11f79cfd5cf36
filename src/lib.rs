//! # DICOM stack library
//!
//! This crate assembles a set of DICOM files into one volume. Each file may
//! hold one or many frames, and a series may multiplex several unrelated
//! volumes ("stacks"). The reader picks one stack, sorts its frames along
//! the slice normal, groups frames at one location into time steps and
//! vector components, and validates that the result is one rectangular,
//! evenly spaced volume.
//!
//! Reading happens in two phases:
//!  - [`VolumeReader::update_information`] parses the headers of every file
//!    and derives extents, spacing and the patient matrix
//!  - [`VolumeReader::read_data`] decodes the pixel data of every slice into
//!    one [`ndarray::Array5`] shaped (time, slice, row, column, component)
//!
//! Headers are parsed and payloads are decoded in parallel using rayon.
//! While decoding, the reader can
//!  - harmonize the rescale slope and intercept of all slices
//!  - convert YBR colour data to RGB
//!  - flip rows so that row 0 is the bottom of the image (the default)
//!
//! Uncompressed pixel data is unpacked by the reader itself (1, 8, 12, 16
//! and 32 bits allocated, packed or planar colour); encapsulated transfer
//! syntaxes are handed to the dicom-rs pixel data decoders.
//!
//! # Examples
//!
//! ## Reading a directory into a volume
//!
//! To read all DICOM files from the dicom/ directory, keeping the raw stored
//! values of every slice, and save the middle slice as a PNG preview:
//!
//! ```no_run
//! # use dicom_stack::{ReaderConfig, VolumeReader};
//! let config = ReaderConfig::default().with_auto_rescale(false);
//! let mut reader = VolumeReader::from_directory("dicom", config)
//!     .expect("should have found DICOM files");
//! let info = reader
//!     .update_information()
//!     .expect("should have read the headers");
//! println!("stacks: {:?}", info.stack_ids);
//!
//! let volume = reader.read_data().expect("should have decoded the volume");
//! let (_, slices, ..) = volume.dim();
//! volume
//!     .slice_image(0, slices / 2)
//!     .expect("should have rendered the middle slice")
//!     .save("result.png")
//!     .expect("should have written the preview");
//! ```

pub mod codec;
pub mod decoder;
pub mod enums;
pub mod error;
pub mod geometry;
pub mod metadata;
pub mod parser;
pub mod photometric;
pub mod sorter;
pub mod validator;
pub mod volume;
pub mod volume_reader;

pub use enums::{PhotometricInterpretation, ReaderState, RowOrder, ScalarType, Stage};
pub use error::{ReaderError, StructureError};
pub use geometry::VolumeGeometry;
pub use volume::{Volume, Voxels};
pub use volume_reader::{ReaderConfig, VolumeInfo, VolumeReader};
