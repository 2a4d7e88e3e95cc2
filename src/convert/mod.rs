//! # imzML → Zarr conversion pipeline
//!
//! The conversion is a strict linear sequence driven by [`convert`]:
//!
//! ```text
//! parse header → plan chunks → create empty arrays → transcode → commit
//! (Planning)     (Planning)    (Allocating)          (Transcoding)
//! ```
//!
//! The destination is all-or-nothing: it is created up front, guarded by a
//! scoped deletion handle, and only a fully populated store survives. Any
//! error at any stage removes the destination directory and surfaces as a
//! `false` result; no partial artifact is ever left behind.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::imzml::{self, Dataset, ImzMLError};
use crate::zarr::{StoreError, ZarrStore};

mod index;
mod plan;
mod transcode;

pub use index::ChunkAssignment;
pub use plan::{plan_chunks, ChunkPlan, DEFAULT_MAX_CHUNK_BYTES};
pub use transcode::{PayloadReader, Transcoder, DISK_COPY_THRESHOLD};

/// Errors that can occur during conversion.
///
/// None of these escape the [`convert`] boundary; they are logged with
/// enough context to diagnose and turned into a `false` result.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// No imzML/ibd pair could be resolved in the source directory
    #[error("no imzML/ibd file pair found in {0}")]
    InputPairNotFound(PathBuf),

    /// The destination path already exists (checked before any side effect)
    #[error("destination already exists: {0}")]
    DestinationExists(PathBuf),

    /// No spatial chunk shrink satisfies the byte budget
    #[error(
        "chunk budget exceeded: a single pixel ({channels} channels x {item_size} bytes) \
         does not fit under {max_chunk_bytes} bytes"
    )]
    ChunkBudgetExceeded {
        channels: usize,
        item_size: usize,
        max_chunk_bytes: u64,
    },

    /// Error parsing the imzML header
    #[error("header error: {0}")]
    HeaderError(#[from] ImzMLError),

    /// Error from the destination store
    #[error("store error: {0}")]
    StoreError(#[from] StoreError),

    /// I/O error reading the payload file
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Pipeline stage, used for diagnostics when a conversion fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Planning,
    Allocating,
    Transcoding,
    Committed,
    Aborted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Planning => "planning",
            Stage::Allocating => "allocating",
            Stage::Transcoding => "transcoding",
            Stage::Committed => "committed",
            Stage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Knobs for a conversion job.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Image name recorded in the multiscales metadata; defaults to the
    /// destination file stem.
    pub name: Option<String>,
    /// Spatial chunk shape `[z, y, x]` to start planning from, instead of
    /// the full extent.
    pub chunk_hint: Option<[usize; 3]>,
    /// Per-chunk byte budget enforced by the planner.
    pub max_chunk_bytes: u64,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            name: None,
            chunk_hint: None,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }
}

/// Removes the destination directory on drop unless committed.
struct DestinationGuard {
    path: PathBuf,
    committed: bool,
}

impl DestinationGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for DestinationGuard {
    fn drop(&mut self) {
        if !self.committed {
            warn!("removing partial destination {}", self.path.display());
            if let Err(e) = fs::remove_dir_all(&self.path) {
                error!("failed to remove {}: {e}", self.path.display());
            }
        }
    }
}

/// Convert an imzML header/payload pair into a Zarr store at `destination`.
///
/// Returns `true` only when the destination exists, fully populated and
/// internally consistent. On `false` the destination does not exist: a
/// pre-existing path is left byte-for-byte untouched, and a partially
/// written one is deleted.
pub fn convert<P, Q, R>(imzml: P, ibd: Q, destination: R, options: &ConvertOptions) -> bool
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: AsRef<Path>,
{
    let imzml = imzml.as_ref();
    let destination = destination.as_ref();

    // pre-condition, checked before any side effect occurs
    if destination.exists() {
        error!(
            "{}",
            ConvertError::DestinationExists(destination.to_path_buf())
        );
        return false;
    }

    let mut stage = Stage::Planning;
    match try_convert(imzml, ibd.as_ref(), destination, options, &mut stage) {
        Ok(()) => true,
        Err(e) => {
            error!(
                "conversion of {} failed while {stage}: {e}",
                imzml.display()
            );
            debug!("stage {stage} -> {}", Stage::Aborted);
            false
        }
    }
}

/// Convert the imzML/ibd pair found in `directory`.
///
/// Fails (with `false`) when the directory holds no resolvable pair.
pub fn convert_dir<P, R>(directory: P, destination: R, options: &ConvertOptions) -> bool
where
    P: AsRef<Path>,
    R: AsRef<Path>,
{
    let directory = directory.as_ref();
    match imzml::find_pair(directory) {
        Some((imzml, ibd)) => convert(imzml, ibd, destination, options),
        None => {
            error!(
                "{}",
                ConvertError::InputPairNotFound(directory.to_path_buf())
            );
            false
        }
    }
}

fn try_convert(
    imzml: &Path,
    ibd: &Path,
    destination: &Path,
    options: &ConvertOptions,
    stage: &mut Stage,
) -> Result<(), ConvertError> {
    let name = options.name.clone().unwrap_or_else(|| {
        destination
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string())
    });

    // the destination exists from here on; the guard deletes it on every
    // exit path short of commit
    let store = ZarrStore::create(destination)?;
    let guard = DestinationGuard::new(destination);

    *stage = Stage::Planning;
    let dataset = imzml::parse_dataset(imzml)?;
    info!(
        "parsed {}: {} spectra, {} layout, grid {}x{}",
        imzml.display(),
        dataset.records.len(),
        dataset.layout_mode.as_str(),
        dataset.pixel_grid.2,
        dataset.pixel_grid.1,
    );
    let plan = plan_chunks(&dataset, options.chunk_hint, options.max_chunk_bytes)?;
    debug!(
        "intensity shape {:?}, chunk shape {:?}",
        plan.intensity_shape, plan.intensity_chunks
    );
    let transcoder = Transcoder::for_mode(dataset.layout_mode);

    *stage = Stage::Allocating;
    write_base_metadata(&store, &name, &dataset, &transcoder)?;
    let arrays = transcoder.create_arrays(&store, &dataset, &plan)?;

    *stage = Stage::Transcoding;
    let assignment = ChunkAssignment::new(
        &dataset.records,
        plan.spatial_shape(),
        plan.spatial_chunks(),
    );
    debug!("{} spectra over {} chunks", dataset.records.len(), assignment.group_count());
    let mut payload = PayloadReader::open(ibd)?;
    transcoder.read_binary_data(&mut payload, &dataset, &plan, &assignment, &arrays)?;

    guard.commit();
    *stage = Stage::Committed;
    info!("conversion committed to {}", destination.display());
    Ok(())
}

/// Descriptive attribute blocks, written once before array population.
fn write_base_metadata(
    store: &ZarrStore,
    name: &str,
    dataset: &Dataset,
    transcoder: &Transcoder,
) -> Result<(), StoreError> {
    store.write_attrs(
        "",
        &serde_json::json!({
            "multiscales": [{
                "version": "0.3",
                "name": name,
                // intensities live in dataset 0
                "datasets": [{ "path": "0" }],
                "axes": ["c", "z", "y", "x"],
                "type": "none",
            }],
            "imzarr": {
                "version": env!("CARGO_PKG_VERSION"),
                "source": dataset.source_imzml.display().to_string(),
                "uuid": dataset.uuid,
                "binary_mode": dataset.layout_mode.as_str(),
            },
        }),
    )?;

    store.create_group("labels")?;
    store.write_attrs(
        "labels",
        &serde_json::json!({ "labels": transcoder.labels() }),
    )
}
