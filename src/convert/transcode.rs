//! Binary transcoding: streaming spectra from the payload file into the
//! destination arrays, one chunk group at a time.
//!
//! Both layout modes share one skeleton: allocate a buffer for the chunk
//! (clipped at the dataset boundary), seek to each record's run in the
//! payload, scatter it down the channel axis at the record's local spatial
//! position, then commit the buffer with a single region write. Continuous
//! data additionally reads the shared m/z axis exactly once; processed data
//! runs the chunk loop twice (m/z and intensities) and records each pixel's
//! true spectrum length in a side array, since the main arrays are padded
//! to the dataset-wide maximum.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use super::index::ChunkAssignment;
use super::plan::ChunkPlan;
use super::ConvertError;
use crate::imzml::{Dataset, LayoutMode, SpectrumRecord};
use crate::zarr::{StoreError, ZarrArray, ZarrStore};

/// Byte size over which bulk transfers are streamed chunk by chunk instead
/// of being committed as one whole-array write.
pub const DISK_COPY_THRESHOLD: u64 = 8 * 1_000_000_000;

/// Random-access reader for the payload (`.ibd`) file.
///
/// Pixel order in the destination space does not match byte order in the
/// payload, so every run is fetched with an explicit seek.
pub struct PayloadReader {
    file: File,
}

impl PayloadReader {
    /// Open a payload file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self { file })
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    fn read_into(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }
}

/// Destination array handles created by [`Transcoder::create_arrays`].
pub struct DestinationArrays {
    pub intensities: ZarrArray,
    pub mzs: ZarrArray,
    pub lengths: Option<ZarrArray>,
}

/// Which of a record's two binary runs to transfer.
#[derive(Clone, Copy)]
enum RunSource {
    Mz,
    Intensity,
}

impl RunSource {
    fn offset(&self, record: &SpectrumRecord) -> u64 {
        match self {
            RunSource::Mz => record.mz_offset,
            RunSource::Intensity => record.intensity_offset,
        }
    }

    fn length(&self, record: &SpectrumRecord) -> usize {
        match self {
            RunSource::Mz => record.mz_length,
            RunSource::Intensity => record.intensity_length,
        }
    }
}

/// The two structurally different binary layouts, selected once at planning
/// time and never re-checked afterwards.
pub enum Transcoder {
    Continuous,
    Processed,
}

impl Transcoder {
    pub fn for_mode(mode: LayoutMode) -> Self {
        match mode {
            LayoutMode::Continuous => Transcoder::Continuous,
            LayoutMode::Processed => Transcoder::Processed,
        }
    }

    /// Side-array labels advertised in the labels group.
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            Transcoder::Continuous => &["mzs/0"],
            Transcoder::Processed => &["mzs/0", "lengths/0"],
        }
    }

    /// Create the destination arrays, empty (all fill value).
    pub fn create_arrays(
        &self,
        store: &ZarrStore,
        dataset: &Dataset,
        plan: &ChunkPlan,
    ) -> Result<DestinationArrays, ConvertError> {
        let intensities = store.create_array(
            "0",
            &plan.intensity_shape,
            &plan.intensity_chunks,
            dataset.intensity_dtype.zarr_dtype(),
        )?;
        // xarray zarr encoding
        store.write_attrs(
            "0",
            &serde_json::json!({ "_ARRAY_DIMENSIONS": ["c", "z", "y", "x"] }),
        )?;

        store.create_group("labels/mzs")?;
        let mzs = match self {
            Transcoder::Continuous => store.create_array(
                "labels/mzs/0",
                &[plan.channels(), 1, 1, 1],
                &[plan.channels(), 1, 1, 1],
                dataset.mz_dtype.zarr_dtype(),
            )?,
            Transcoder::Processed => store.create_array(
                "labels/mzs/0",
                &plan.intensity_shape,
                &plan.intensity_chunks,
                dataset.mz_dtype.zarr_dtype(),
            )?,
        };

        let lengths = match self {
            Transcoder::Continuous => None,
            Transcoder::Processed => {
                store.create_group("labels/lengths")?;
                let [sz, sy, sx] = plan.spatial_shape();
                let [cz, cy, cx] = plan.spatial_chunks();
                Some(store.create_array(
                    "labels/lengths/0",
                    &[1, sz, sy, sx],
                    &[1, cz, cy, cx],
                    "<u4",
                )?)
            }
        };

        Ok(DestinationArrays {
            intensities,
            mzs,
            lengths,
        })
    }

    /// Fill the destination arrays from the payload file.
    pub fn read_binary_data(
        &self,
        payload: &mut PayloadReader,
        dataset: &Dataset,
        plan: &ChunkPlan,
        assignment: &ChunkAssignment,
        arrays: &DestinationArrays,
    ) -> Result<(), ConvertError> {
        match self {
            Transcoder::Continuous => {
                // one shared m/z axis, read from the first record
                if let Some(first) = dataset.records.first() {
                    let item = dataset.mz_dtype.item_size();
                    let mut buffer = vec![0u8; first.mz_length * item];
                    payload.read_into(first.mz_offset, &mut buffer)?;
                    write_bulk(&arrays.mzs, &buffer)?;
                }

                fill_chunks(
                    &arrays.intensities,
                    payload,
                    dataset,
                    plan,
                    assignment,
                    RunSource::Intensity,
                )?;
            }
            Transcoder::Processed => {
                if let Some(lengths) = &arrays.lengths {
                    write_bulk(lengths, &length_buffer(dataset, plan))?;
                }

                fill_chunks(&arrays.mzs, payload, dataset, plan, assignment, RunSource::Mz)?;
                fill_chunks(
                    &arrays.intensities,
                    payload,
                    dataset,
                    plan,
                    assignment,
                    RunSource::Intensity,
                )?;
            }
        }
        Ok(())
    }
}

/// Per-pixel true spectrum lengths, as the u32 contents of the whole
/// `(1, z, y, x)` side array. Cheap enough to build in one pass.
fn length_buffer(dataset: &Dataset, plan: &ChunkPlan) -> Vec<u8> {
    let [_, height, width] = plan.spatial_shape();
    let mut buffer = vec![0u8; height * width * 4];
    for record in &dataset.records {
        let position = (record.y * width + record.x) * 4;
        LittleEndian::write_u32(
            &mut buffer[position..position + 4],
            record.mz_length as u32,
        );
    }
    buffer
}

/// Stream one array's worth of spectra from the payload, chunk group by
/// chunk group. Pixels never referenced by a record keep the fill value.
fn fill_chunks(
    array: &ZarrArray,
    payload: &mut PayloadReader,
    dataset: &Dataset,
    plan: &ChunkPlan,
    assignment: &ChunkAssignment,
    source: RunSource,
) -> Result<(), ConvertError> {
    let channels = plan.channels();
    let item = array.item_size();
    let spatial_shape = plan.spatial_shape();
    let spatial_chunks = plan.spatial_chunks();

    let mut run = Vec::new();
    for (flat, indices) in assignment.groups() {
        let coord = assignment.chunk_coord(flat);

        // chunk extent, clipped at the dataset boundary
        let mut lo = [0usize; 3];
        let mut dims = [0usize; 3];
        for d in 0..3 {
            lo[d] = coord[d] * spatial_chunks[d];
            dims[d] = spatial_shape[d].min(lo[d] + spatial_chunks[d]) - lo[d];
        }

        let spatial_len = dims[0] * dims[1] * dims[2];
        let mut buffer = vec![0u8; channels * spatial_len * item];

        for &index in indices {
            let record = &dataset.records[index];
            let length = source.length(record).min(channels);

            run.resize(length * item, 0);
            payload.read_into(source.offset(record), &mut run)?;

            // scatter the run down the channel axis at the record's local
            // spatial position (C order: channels are the slowest axis)
            let base = (record.z - lo[0]) * dims[1] * dims[2]
                + (record.y - lo[1]) * dims[2]
                + (record.x - lo[2]);
            for k in 0..length {
                let dst = (k * spatial_len + base) * item;
                buffer[dst..dst + item].copy_from_slice(&run[k * item..(k + 1) * item]);
            }
        }

        array.write_region(
            &[0, lo[0], lo[1], lo[2]],
            &[channels, dims[0], dims[1], dims[2]],
            &buffer,
        )?;
        debug!(
            "chunk {:?}: committed {} spectra ({} bytes)",
            coord,
            indices.len(),
            buffer.len()
        );
    }
    Ok(())
}

/// Commit a whole array's contents, choosing transfer granularity by size:
/// below the disk-copy threshold a single region write is faster; above it
/// the data is committed chunk by chunk.
fn write_bulk(array: &ZarrArray, data: &[u8]) -> Result<(), StoreError> {
    write_bulk_with(array, data, DISK_COPY_THRESHOLD)
}

fn write_bulk_with(array: &ZarrArray, data: &[u8], threshold: u64) -> Result<(), StoreError> {
    let shape = array.shape().to_vec();
    let rank = shape.len();

    if array.nbytes() < threshold {
        return array.write_region(&vec![0; rank], &shape, data);
    }

    let chunks = array.chunks().to_vec();
    let item = array.item_size();

    let mut coord = vec![0usize; rank];
    'chunks: loop {
        let mut lo = vec![0usize; rank];
        let mut dims = vec![0usize; rank];
        for d in 0..rank {
            lo[d] = coord[d] * chunks[d];
            dims[d] = shape[d].min(lo[d] + chunks[d]) - lo[d];
        }
        let sub = copy_region_from(data, &shape, &lo, &dims, item);
        array.write_region(&lo, &dims, &sub)?;

        for d in (0..rank).rev() {
            coord[d] += 1;
            if coord[d] * chunks[d] < shape[d] {
                continue 'chunks;
            }
            coord[d] = 0;
        }
        break;
    }
    Ok(())
}

/// Extract a rectangular sub-region of a C-order byte buffer.
fn copy_region_from(
    data: &[u8],
    full_shape: &[usize],
    lo: &[usize],
    dims: &[usize],
    item: usize,
) -> Vec<u8> {
    let rank = full_shape.len();
    let mut full_strides = vec![1usize; rank];
    let mut region_strides = vec![1usize; rank];
    for d in (0..rank - 1).rev() {
        full_strides[d] = full_strides[d + 1] * full_shape[d + 1];
        region_strides[d] = region_strides[d + 1] * dims[d + 1];
    }

    let mut region = vec![0u8; dims.iter().product::<usize>() * item];
    let row_len = dims[rank - 1] * item;
    let mut pos = vec![0usize; rank];
    'rows: loop {
        let mut src = 0usize;
        let mut dst = 0usize;
        for d in 0..rank {
            let p = if d == rank - 1 { 0 } else { pos[d] };
            src += (lo[d] + p) * full_strides[d];
            dst += p * region_strides[d];
        }
        let src = src * item;
        let dst = dst * item;
        region[dst..dst + row_len].copy_from_slice(&data[src..src + row_len]);

        if rank == 1 {
            break;
        }
        for d in (0..rank - 1).rev() {
            pos[d] += 1;
            if pos[d] < dims[d] {
                continue 'rows;
            }
            pos[d] = 0;
        }
        break;
    }
    region
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zarr::ZarrStore;
    use byteorder::WriteBytesExt;

    #[test]
    fn test_write_bulk_streaming_matches_single_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = ZarrStore::create(dir.path().join("test.zarr")).unwrap();
        let single = store.create_array("one", &[2, 3], &[1, 2], "<u4").unwrap();
        let streamed = store.create_array("two", &[2, 3], &[1, 2], "<u4").unwrap();

        let mut data = Vec::new();
        for value in 0u32..6 {
            data.write_u32::<LittleEndian>(value).unwrap();
        }

        write_bulk_with(&single, &data, u64::MAX).unwrap();
        write_bulk_with(&streamed, &data, 1).unwrap();

        for key in ["0.0", "0.1", "1.0", "1.1"] {
            let a = std::fs::read(store.path().join("one").join(key)).unwrap();
            let b = std::fs::read(store.path().join("two").join(key)).unwrap();
            assert_eq!(a, b, "chunk {key} differs");
        }
    }

    #[test]
    fn test_copy_region_from() {
        // 2x4 array of single bytes
        let data: Vec<u8> = (0..8).collect();
        let region = copy_region_from(&data, &[2, 4], &[0, 1], &[2, 2], 1);
        assert_eq!(region, vec![1, 2, 5, 6]);
    }
}
