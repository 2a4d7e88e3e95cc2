use std::fs;
use std::path::PathBuf;

use super::StoreError;

/// Handle to an array inside a [`super::ZarrStore`].
///
/// Data is addressed in C order; regions are written through
/// [`ZarrArray::write_region`], which performs read-modify-write on every
/// chunk file the region touches. Chunk-aligned writes (the common case in
/// the conversion pipeline) create each chunk file exactly once.
pub struct ZarrArray {
    dir: PathBuf,
    shape: Vec<usize>,
    chunks: Vec<usize>,
    item_size: usize,
}

impl ZarrArray {
    pub(super) fn new(
        dir: PathBuf,
        shape: Vec<usize>,
        chunks: Vec<usize>,
        dtype: &str,
    ) -> Result<Self, StoreError> {
        let item_size = item_size_of(dtype)?;
        Ok(Self {
            dir,
            shape,
            chunks,
            item_size,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn chunks(&self) -> &[usize] {
        &self.chunks
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Total byte size of the array when fully materialized.
    pub fn nbytes(&self) -> u64 {
        self.shape.iter().product::<usize>() as u64 * self.item_size as u64
    }

    /// Write a rectangular region of the array.
    ///
    /// `data` holds the region contents in C order, `shape.len()` must match
    /// the array rank, and the region must lie within the array bounds.
    pub fn write_region(
        &self,
        origin: &[usize],
        shape: &[usize],
        data: &[u8],
    ) -> Result<(), StoreError> {
        let rank = self.shape.len();
        if origin.len() != rank || shape.len() != rank {
            return Err(StoreError::InvalidRegion(format!(
                "rank mismatch: array is {rank}-dimensional, region is {}-dimensional",
                shape.len()
            )));
        }
        for d in 0..rank {
            if origin[d] + shape[d] > self.shape[d] {
                return Err(StoreError::InvalidRegion(format!(
                    "axis {d}: region [{}, {}) exceeds array extent {}",
                    origin[d],
                    origin[d] + shape[d],
                    self.shape[d]
                )));
            }
        }

        let elements: usize = shape.iter().product();
        if data.len() != elements * self.item_size {
            return Err(StoreError::InvalidRegion(format!(
                "buffer holds {} bytes, region needs {}",
                data.len(),
                elements * self.item_size
            )));
        }
        if elements == 0 {
            return Ok(());
        }

        let first: Vec<usize> = (0..rank).map(|d| origin[d] / self.chunks[d]).collect();
        let last: Vec<usize> = (0..rank)
            .map(|d| (origin[d] + shape[d] - 1) / self.chunks[d])
            .collect();

        let mut chunk_idx = first.clone();
        'chunks: loop {
            self.write_chunk_overlap(&chunk_idx, origin, shape, data)?;
            for d in (0..rank).rev() {
                if chunk_idx[d] < last[d] {
                    chunk_idx[d] += 1;
                    continue 'chunks;
                }
                chunk_idx[d] = first[d];
            }
            break;
        }
        Ok(())
    }

    /// Merge the part of the region overlapping one chunk into its file.
    fn write_chunk_overlap(
        &self,
        chunk_idx: &[usize],
        origin: &[usize],
        region_shape: &[usize],
        data: &[u8],
    ) -> Result<(), StoreError> {
        let rank = self.shape.len();
        let chunk_lo: Vec<usize> = (0..rank).map(|d| chunk_idx[d] * self.chunks[d]).collect();

        // intersection of region and chunk, in global coordinates
        let lo: Vec<usize> = (0..rank).map(|d| chunk_lo[d].max(origin[d])).collect();
        let hi: Vec<usize> = (0..rank)
            .map(|d| (chunk_lo[d] + self.chunks[d]).min(origin[d] + region_shape[d]))
            .collect();

        // edge chunks are stored full-size, padded with the fill value
        let chunk_bytes = self.chunks.iter().product::<usize>() * self.item_size;
        let chunk_path = self.dir.join(chunk_key(chunk_idx));
        let mut chunk_buf = match fs::read(&chunk_path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => vec![0u8; chunk_bytes],
            Err(e) => return Err(StoreError::IoError(e)),
        };
        if chunk_buf.len() != chunk_bytes {
            chunk_buf.resize(chunk_bytes, 0);
        }

        let chunk_strides = c_strides(&self.chunks);
        let region_strides = c_strides(region_shape);

        // copy one contiguous run along the innermost axis at a time
        let row_len = (hi[rank - 1] - lo[rank - 1]) * self.item_size;
        let mut pos = lo.clone();
        'rows: loop {
            let mut src = 0usize;
            let mut dst = 0usize;
            for d in 0..rank {
                let p = if d == rank - 1 { lo[d] } else { pos[d] };
                src += (p - origin[d]) * region_strides[d];
                dst += (p - chunk_lo[d]) * chunk_strides[d];
            }
            let src = src * self.item_size;
            let dst = dst * self.item_size;
            chunk_buf[dst..dst + row_len].copy_from_slice(&data[src..src + row_len]);

            if rank == 1 {
                break;
            }
            for d in (0..rank - 1).rev() {
                pos[d] += 1;
                if pos[d] < hi[d] {
                    continue 'rows;
                }
                pos[d] = lo[d];
            }
            break;
        }

        fs::write(&chunk_path, &chunk_buf)?;
        Ok(())
    }
}

/// Dot-separated chunk key, e.g. `0.0.1.2`.
fn chunk_key(chunk_idx: &[usize]) -> String {
    chunk_idx
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// C-order strides, in elements.
fn c_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// Byte size per element of a Zarr v2 dtype string such as `<f4` or `<u4`.
fn item_size_of(dtype: &str) -> Result<usize, StoreError> {
    dtype
        .get(2..)
        .and_then(|digits| digits.parse::<usize>().ok())
        .filter(|&size| size > 0)
        .ok_or_else(|| StoreError::UnsupportedDtype(dtype.to_string()))
}
