//! # imzML header handling
//!
//! imzML splits a mass spectrometry imaging dataset across two files: an
//! XML header (mzML dialect with IMS controlled-vocabulary terms) and a flat
//! binary payload (`.ibd`) addressed by byte offsets declared in the header.
//!
//! ```text
//! sample.imzML                         sample.ibd
//! ├── fileDescription                  ├── [0..16)  UUID
//! │   └── fileContent                  ├── m/z run of pixel A
//! │       ├── continuous | processed   ├── intensity run of pixel A
//! │       └── UUID                     ├── m/z run of pixel B
//! ├── scanSettings (pixel grid)        └── ...
//! └── run/spectrumList
//!     └── spectrum* (one per pixel)
//!         ├── scan (position x/y/z)
//!         └── binaryDataArray* (external offset + length)
//! ```
//!
//! This module parses the header into an immutable [`Dataset`] and provides
//! the pair-resolution collaborators used by format detection.

mod error;
mod models;
mod pair;
pub mod parser;

pub use error::ImzMLError;
pub use models::{DataType, Dataset, LayoutMode, SpectrumRecord};
pub use pair::{find_pair, uuids_match};
pub use parser::parse_dataset;
