use std::path::PathBuf;

use thiserror::Error;

use crate::enums::Stage;

/// Reasons a sorted slice list does not form a volume.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructureError {
    #[error("the selected stack contains no frames")]
    EmptyStack,

    #[error("location {location} has {found} frames, expected {expected}")]
    FramesPerLocation {
        location: usize,
        expected: usize,
        found: usize,
    },

    #[error("{frames} frames at one location cannot be split into {time_steps} time steps")]
    TimeSteps { frames: usize, time_steps: usize },

    #[error(
        "non-uniform slice spacing between slices {slice} and {next}: \
         {spacing} (expected {expected})"
    )]
    NonUniformSpacing {
        slice: usize,
        next: usize,
        spacing: f64,
        expected: f64,
    },

    #[error("file {file_index} has pixel description {found}, expected {expected}")]
    InconsistentPixels {
        file_index: usize,
        expected: String,
        found: String,
    },

    #[error("file {file_index}, frame {frame_index} is referenced more than once")]
    DuplicateFrame {
        file_index: usize,
        frame_index: usize,
    },

    #[error("slice map does not match extents: {0}")]
    Layout(String),
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("failed to parse file {file_index} ({}): {message}", path.display())]
    Parse {
        file_index: usize,
        path: PathBuf,
        message: String,
    },

    #[error("failed to sort frames: {message}")]
    Sort {
        file_index: Option<usize>,
        frame_index: Option<usize>,
        message: String,
    },

    #[error("invalid volume structure: {0}")]
    Structure(#[from] StructureError),

    #[error("failed to decode file {file_index}, frame {}: {message}", frame_display(*frame_index))]
    Decode {
        file_index: usize,
        frame_index: Option<usize>,
        message: String,
    },

    #[error("failed to normalize file {file_index}, frame {frame_index}: {message}")]
    Normalize {
        file_index: usize,
        frame_index: usize,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn frame_display(frame_index: Option<usize>) -> String {
    frame_index.map_or_else(|| "*".to_string(), |frame| frame.to_string())
}

impl ReaderError {
    pub fn stage(&self) -> Stage {
        match self {
            ReaderError::Parse { .. } | ReaderError::Io(_) => Stage::Parse,
            ReaderError::Sort { .. } => Stage::Sort,
            ReaderError::Structure(_) => Stage::Validate,
            ReaderError::Decode { .. } => Stage::Decode,
            ReaderError::Normalize { .. } => Stage::Normalize,
            ReaderError::Configuration(_) => Stage::Configure,
        }
    }

    pub fn file_index(&self) -> Option<usize> {
        match self {
            ReaderError::Parse { file_index, .. }
            | ReaderError::Decode { file_index, .. }
            | ReaderError::Normalize { file_index, .. } => Some(*file_index),
            ReaderError::Sort { file_index, .. } => *file_index,
            ReaderError::Structure(StructureError::InconsistentPixels { file_index, .. })
            | ReaderError::Structure(StructureError::DuplicateFrame { file_index, .. }) => {
                Some(*file_index)
            }
            _ => None,
        }
    }

    pub fn frame_index(&self) -> Option<usize> {
        match self {
            ReaderError::Decode { frame_index, .. } | ReaderError::Sort { frame_index, .. } => {
                *frame_index
            }
            ReaderError::Normalize { frame_index, .. }
            | ReaderError::Structure(StructureError::DuplicateFrame { frame_index, .. }) => {
                Some(*frame_index)
            }
            _ => None,
        }
    }

    pub(crate) fn sort(message: impl Into<String>) -> Self {
        ReaderError::Sort {
            file_index: None,
            frame_index: None,
            message: message.into(),
        }
    }
}
