//! # imzarr - imzML to Zarr conversion
//!
//! `imzarr` converts mass spectrometry imaging datasets from the imzML
//! format (an XML header paired with a flat `.ibd` binary payload) into a
//! chunked Zarr v2 directory store suitable for random-access reading by
//! image viewers.
//!
//! ## Pipeline
//!
//! A conversion runs as a single-threaded, sequential pipeline:
//!
//! 1. **Parse** the header into an immutable [`imzml::Dataset`]: one record
//!    per pixel carrying grid coordinates plus the byte offsets and element
//!    counts of its spectrum in the payload file.
//! 2. **Plan** the output array shape and a chunk shape bounded by a
//!    per-chunk byte budget ([`convert::plan_chunks`]). The channel axis is
//!    never split; spatial axes are halved round-robin until a chunk fits.
//! 3. **Assign** every spectrum to its destination chunk
//!    ([`convert::ChunkAssignment`]).
//! 4. **Transcode** chunk group by chunk group: seek+read each record's run
//!    from the payload, scatter it into an in-memory chunk buffer, commit
//!    the buffer with one region write ([`convert::Transcoder`]).
//!
//! The two imzML binary layouts are both supported: *continuous* (one m/z
//! axis shared by every pixel) and *processed* (ragged per-pixel spectra
//! padded to a common length, with a side array recording true lengths).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use imzarr::convert::{convert, convert_dir, ConvertOptions};
//!
//! // explicit pair
//! let ok = convert("sample.imzML", "sample.ibd", "sample.zarr", &ConvertOptions::default());
//!
//! // or resolve the pair from a directory
//! let ok = convert_dir("acquisition/", "sample.zarr", &ConvertOptions::default());
//! assert!(ok);
//! ```
//!
//! `convert` returns a plain boolean: `true` means the destination exists
//! and is fully populated; `false` means it does not exist at all. There is
//! no partially written state; any failure tears the destination down.
//!
//! ## Output layout
//!
//! ```text
//! sample.zarr/
//! ├── .zattrs                  multiscales + provenance metadata
//! ├── 0/                       intensities, shape (channels, 1, h, w)
//! └── labels/
//!     ├── mzs/0/               m/z values
//!     └── lengths/0/           true spectrum lengths (processed only)
//! ```

pub mod convert;
pub mod imzml;
pub mod zarr;

pub use convert::{convert, convert_dir, ConvertError, ConvertOptions};
pub use imzml::{find_pair, parse_dataset, uuids_match, Dataset, LayoutMode};
