//! Data model for a parsed imzML header.
//!
//! The header file is parsed once, eagerly, into an immutable [`Dataset`]
//! value that every later pipeline stage consumes. No payload (`.ibd`) bytes
//! are read at parse time; the records only carry offsets and lengths.

use std::path::PathBuf;

/// Binary layout of the payload file, declared in the header's file content.
///
/// Exactly one of the two markers must be present in a valid header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    /// All pixels share a single m/z axis; only intensities vary per pixel.
    Continuous,
    /// Both m/z and intensity arrays vary per pixel, with ragged lengths.
    Processed,
}

impl LayoutMode {
    /// Tag used in provenance metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutMode::Continuous => "continuous",
            LayoutMode::Processed => "processed",
        }
    }
}

/// Element type of a binary data array in the payload file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// 32-bit float (MS:1000521)
    F32,
    /// 64-bit float (MS:1000523)
    F64,
    /// 32-bit integer (MS:1000519)
    I32,
    /// 64-bit integer (MS:1000522)
    I64,
}

impl DataType {
    /// Determine the element type from a CV accession.
    pub fn from_cv_accession(accession: &str) -> Option<Self> {
        match accession {
            "MS:1000521" => Some(DataType::F32),
            "MS:1000523" => Some(DataType::F64),
            "MS:1000519" => Some(DataType::I32),
            "MS:1000522" => Some(DataType::I64),
            _ => None,
        }
    }

    /// Byte size of one element.
    pub fn item_size(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F64 | DataType::I64 => 8,
        }
    }

    /// Zarr v2 dtype string (little-endian, matching the payload encoding).
    pub fn zarr_dtype(&self) -> &'static str {
        match self {
            DataType::F32 => "<f4",
            DataType::F64 => "<f8",
            DataType::I32 => "<i4",
            DataType::I64 => "<i8",
        }
    }
}

/// One pixel's spectrum: grid position plus the byte offsets and element
/// counts of its two binary runs in the payload file.
///
/// Coordinates are 0-based (the header uses a 1-based convention).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectrumRecord {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    /// Byte offset of the m/z run in the payload file.
    pub mz_offset: u64,
    /// Byte offset of the intensity run in the payload file.
    pub intensity_offset: u64,
    /// Element count of the m/z run.
    pub mz_length: usize,
    /// Element count of the intensity run.
    pub intensity_length: usize,
}

/// Immutable description of an imzML header/payload pair.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// One record per declared pixel, in header order.
    pub records: Vec<SpectrumRecord>,
    pub mz_dtype: DataType,
    pub intensity_dtype: DataType,
    /// Pixel grid as `(depth, height, width)`; depth is fixed at 1.
    pub pixel_grid: (usize, usize, usize),
    pub layout_mode: LayoutMode,
    /// Identifying token from the header, kept opaque as written.
    pub uuid: String,
    /// Path of the header this dataset was parsed from.
    pub source_imzml: PathBuf,
}

impl Dataset {
    /// Spatial shape as `[depth, height, width]`.
    pub fn spatial_shape(&self) -> [usize; 3] {
        [self.pixel_grid.0, self.pixel_grid.1, self.pixel_grid.2]
    }
}
