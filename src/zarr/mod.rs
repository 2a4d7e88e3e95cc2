//! Minimal Zarr v2 directory store writer.
//!
//! The conversion pipeline only needs three operations from its destination:
//! create an array of a given shape/chunks/dtype, write a rectangular
//! region, and attach JSON attributes. This module implements exactly that
//! surface on top of a plain directory tree:
//!
//! ```text
//! dest.zarr/
//! ├── .zgroup                    {"zarr_format": 2}
//! ├── .zattrs                    root attributes
//! ├── 0/
//! │   ├── .zarray                shape/chunks/dtype metadata
//! │   ├── .zattrs
//! │   └── 0.0.0.0               raw little-endian chunk, C order
//! └── labels/...
//! ```
//!
//! Chunks are stored uncompressed (`compressor: null`), fill value 0,
//! dot-separated chunk keys. Edge chunks are stored full-size and padded
//! with the fill value, per the Zarr v2 spec.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

mod array;

pub use array::ZarrArray;

/// Errors from the destination store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error on the store directory
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error for metadata documents
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Region does not fit the array or the data buffer has the wrong size
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// Unsupported dtype string
    #[error("unsupported dtype: {0}")]
    UnsupportedDtype(String),
}

/// `.zarray` metadata document.
#[derive(Serialize)]
struct ArrayMeta {
    zarr_format: u32,
    shape: Vec<usize>,
    chunks: Vec<usize>,
    dtype: String,
    compressor: Option<()>,
    fill_value: u64,
    order: String,
    filters: Option<()>,
    dimension_separator: String,
}

#[derive(Serialize)]
struct GroupMeta {
    zarr_format: u32,
}

/// A Zarr v2 group rooted at a directory.
pub struct ZarrStore {
    root: PathBuf,
}

impl ZarrStore {
    /// Create a new store at `path`. Fails if the directory already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir(&root)?;
        let store = Self { root };
        store.write_group_meta("")?;
        Ok(store)
    }

    /// Root directory of the store.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create a sub-group (directory + `.zgroup`).
    pub fn create_group(&self, name: &str) -> Result<(), StoreError> {
        fs::create_dir_all(self.root.join(name))?;
        self.write_group_meta(name)
    }

    /// Write (or replace) the `.zattrs` document of a group or array.
    pub fn write_attrs(&self, name: &str, attrs: &serde_json::Value) -> Result<(), StoreError> {
        let dir = self.root.join(name);
        fs::write(dir.join(".zattrs"), serde_json::to_string(attrs)?)?;
        Ok(())
    }

    /// Create an empty array under `name` and return a handle for writing.
    ///
    /// The array starts out entirely at the fill value (0); chunk files are
    /// only materialized by region writes.
    pub fn create_array(
        &self,
        name: &str,
        shape: &[usize],
        chunks: &[usize],
        dtype: &str,
    ) -> Result<ZarrArray, StoreError> {
        debug_assert_eq!(shape.len(), chunks.len());

        let dir = self.root.join(name);
        fs::create_dir_all(&dir)?;

        let meta = ArrayMeta {
            zarr_format: 2,
            shape: shape.to_vec(),
            chunks: chunks.to_vec(),
            dtype: dtype.to_string(),
            compressor: None,
            fill_value: 0,
            order: "C".to_string(),
            filters: None,
            dimension_separator: ".".to_string(),
        };
        fs::write(dir.join(".zarray"), serde_json::to_string(&meta)?)?;

        ZarrArray::new(dir, shape.to_vec(), chunks.to_vec(), dtype)
    }

    fn write_group_meta(&self, name: &str) -> Result<(), StoreError> {
        let meta = GroupMeta { zarr_format: 2 };
        let dir = self.root.join(name);
        fs::write(dir.join(".zgroup"), serde_json::to_string(&meta)?)?;
        Ok(())
    }
}
