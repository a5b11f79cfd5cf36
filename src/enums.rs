use std::fmt;

/// Order of the image rows in memory.
///
/// DICOM stores rows top-to-bottom. `BottomUp` flips every slice while it
/// is read so that row 0 in memory is the bottom row of the image.
///
/// Slice order is not reversed for `BottomUp`: slices stay ascending along
/// the plane normal and only the column direction is negated, so the
/// resulting patient matrix is left-handed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RowOrder {
    FileNative,
    TopDown,
    #[default]
    BottomUp,
}

impl RowOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowOrder::FileNative => "FileNative",
            RowOrder::TopDown => "TopDown",
            RowOrder::BottomUp => "BottomUp",
        }
    }

    /// Resolve the order actually used for data stored in `native` order.
    pub fn resolve(self, native: RowOrder) -> RowOrder {
        match self {
            RowOrder::FileNative => native,
            forced => forced,
        }
    }

    /// Whether data stored in `native` order must be flipped to honor `self`.
    pub fn needs_flip(self, native: RowOrder) -> bool {
        self.resolve(native) != native
    }
}

impl fmt::Display for RowOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PhotometricInterpretation {
    Monochrome1,
    #[default]
    Monochrome2,
    PaletteColor,
    Rgb,
    YbrFull,
    YbrFull422,
    YbrPartial422,
    YbrPartial420,
    YbrIct,
    YbrRct,
    Other(String),
}

impl PhotometricInterpretation {
    pub fn parse(value: &str) -> Self {
        match value.trim_matches(|c: char| c == ' ' || c == '\0') {
            "MONOCHROME1" => Self::Monochrome1,
            "MONOCHROME2" => Self::Monochrome2,
            "PALETTE COLOR" => Self::PaletteColor,
            "RGB" => Self::Rgb,
            "YBR_FULL" => Self::YbrFull,
            "YBR_FULL_422" => Self::YbrFull422,
            "YBR_PARTIAL_422" => Self::YbrPartial422,
            "YBR_PARTIAL_420" => Self::YbrPartial420,
            "YBR_ICT" => Self::YbrIct,
            "YBR_RCT" => Self::YbrRct,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Monochrome1 => "MONOCHROME1",
            Self::Monochrome2 => "MONOCHROME2",
            Self::PaletteColor => "PALETTE COLOR",
            Self::Rgb => "RGB",
            Self::YbrFull => "YBR_FULL",
            Self::YbrFull422 => "YBR_FULL_422",
            Self::YbrPartial422 => "YBR_PARTIAL_422",
            Self::YbrPartial420 => "YBR_PARTIAL_420",
            Self::YbrIct => "YBR_ICT",
            Self::YbrRct => "YBR_RCT",
            Self::Other(value) => value,
        }
    }

    /// YBR encodings that are converted to RGB by the reader. `YBR_ICT` and
    /// `YBR_RCT` are JPEG 2000 internal transforms undone by the codec.
    pub fn is_ybr(&self) -> bool {
        matches!(
            self,
            Self::YbrFull | Self::YbrFull422 | Self::YbrPartial422 | Self::YbrPartial420
        )
    }

    pub fn is_partial_range(&self) -> bool {
        matches!(self, Self::YbrPartial422 | Self::YbrPartial420)
    }
}

impl fmt::Display for PhotometricInterpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar type of the assembled voxel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
}

impl ScalarType {
    /// Output type for samples of `bits_allocated` bits. Single bit and
    /// 12-bit samples are widened to the next byte-aligned type.
    pub fn for_bits(bits_allocated: u16, signed: bool) -> Option<Self> {
        match (bits_allocated, signed) {
            (1, _) => Some(ScalarType::U8),
            (8, false) => Some(ScalarType::U8),
            (8, true) => Some(ScalarType::I8),
            (12 | 16, false) => Some(ScalarType::U16),
            (12 | 16, true) => Some(ScalarType::I16),
            (32, false) => Some(ScalarType::U32),
            (32, true) => Some(ScalarType::I32),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            ScalarType::U8 | ScalarType::I8 => 1,
            ScalarType::U16 | ScalarType::I16 => 2,
            ScalarType::U32 | ScalarType::I32 => 4,
        }
    }
}

/// Pipeline stage an error originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Parse,
    Sort,
    Validate,
    Decode,
    Normalize,
    Configure,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Parse => "parse",
            Stage::Sort => "sort",
            Stage::Validate => "validate",
            Stage::Decode => "decode",
            Stage::Normalize => "normalize",
            Stage::Configure => "configure",
        })
    }
}

/// Lifecycle of a [`VolumeReader`](crate::volume_reader::VolumeReader).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ReaderState {
    #[default]
    Uninitialized,
    MetadataReady,
    DataReady,
    Error,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReaderState::Uninitialized => "uninitialized",
            ReaderState::MetadataReady => "metadata ready",
            ReaderState::DataReady => "data ready",
            ReaderState::Error => "error",
        })
    }
}
