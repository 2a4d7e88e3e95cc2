//! Chunk assignment: grouping spectra by destination chunk.
//!
//! Each record's spatial chunk coordinate is `coordinate / chunk_size` per
//! axis. The 3-axis coordinate `(cz, cy, cx)` is flattened to a single id
//! with z varying fastest: strides `(1, nz, nz * ny)`, where `nz`/`ny` are
//! the chunk counts along z and y. The forward and reverse mappings below
//! both use this convention; it is internal and has no observable effect on
//! the output.

use std::collections::BTreeMap;

use crate::imzml::SpectrumRecord;

/// Read-only mapping between spectra and destination chunks.
#[derive(Debug)]
pub struct ChunkAssignment {
    /// flat chunk id -> indices into the dataset's record list
    groups: BTreeMap<u64, Vec<usize>>,
    /// chunk counts along (z, y, x)
    chunk_counts: [usize; 3],
}

impl ChunkAssignment {
    /// Assign every record to its destination chunk.
    pub fn new(
        records: &[SpectrumRecord],
        spatial_shape: [usize; 3],
        spatial_chunks: [usize; 3],
    ) -> Self {
        // ceil() for trailing partial chunks
        let mut chunk_counts = [0usize; 3];
        for d in 0..3 {
            chunk_counts[d] = spatial_shape[d].div_euclid(spatial_chunks[d])
                + usize::from(spatial_shape[d] % spatial_chunks[d] != 0);
        }

        let mut groups: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (index, record) in records.iter().enumerate() {
            let coord = [
                record.z / spatial_chunks[0],
                record.y / spatial_chunks[1],
                record.x / spatial_chunks[2],
            ];
            let flat = Self::flatten(coord, chunk_counts);
            groups.entry(flat).or_default().push(index);
        }

        Self {
            groups,
            chunk_counts,
        }
    }

    /// Iterate over chunk groups in flat-id order.
    pub fn groups(&self) -> impl Iterator<Item = (u64, &[usize])> {
        self.groups.iter().map(|(&flat, indices)| (flat, indices.as_slice()))
    }

    /// Number of non-empty chunks.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Reverse mapping: flat id back to the per-axis chunk coordinate.
    pub fn chunk_coord(&self, flat: u64) -> [usize; 3] {
        let [nz, ny, _] = self.chunk_counts;
        let flat = flat as usize;
        [flat % nz, (flat / nz) % ny, flat / (nz * ny)]
    }

    fn flatten(coord: [usize; 3], chunk_counts: [usize; 3]) -> u64 {
        let [nz, ny, _] = chunk_counts;
        (coord[0] + coord[1] * nz + coord[2] * nz * ny) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(x: usize, y: usize) -> SpectrumRecord {
        SpectrumRecord {
            x,
            y,
            z: 0,
            mz_offset: 0,
            intensity_offset: 0,
            mz_length: 1,
            intensity_length: 1,
        }
    }

    #[test]
    fn test_forward_reverse_consistency() {
        let records: Vec<SpectrumRecord> = (0..5)
            .flat_map(|y| (0..7).map(move |x| record(x, y)))
            .collect();
        let assignment = ChunkAssignment::new(&records, [1, 5, 7], [1, 2, 3]);

        for (flat, indices) in assignment.groups() {
            let [cz, cy, cx] = assignment.chunk_coord(flat);
            for &index in indices {
                let r = &records[index];
                assert_eq!(r.z / 1, cz);
                assert_eq!(r.y / 2, cy);
                assert_eq!(r.x / 3, cx);
            }
        }
    }

    #[test]
    fn test_all_records_grouped_once() {
        let records: Vec<SpectrumRecord> = (0..4)
            .flat_map(|y| (0..4).map(move |x| record(x, y)))
            .collect();
        let assignment = ChunkAssignment::new(&records, [1, 4, 4], [1, 2, 2]);

        assert_eq!(assignment.group_count(), 4);
        let total: usize = assignment.groups().map(|(_, indices)| indices.len()).sum();
        assert_eq!(total, records.len());
    }

    #[test]
    fn test_partial_trailing_chunk() {
        // 3 columns with chunk width 2 -> 2 chunks along x
        let records = vec![record(0, 0), record(2, 0)];
        let assignment = ChunkAssignment::new(&records, [1, 1, 3], [1, 1, 2]);

        assert_eq!(assignment.group_count(), 2);
        let coords: Vec<[usize; 3]> = assignment
            .groups()
            .map(|(flat, _)| assignment.chunk_coord(flat))
            .collect();
        assert!(coords.contains(&[0, 0, 0]));
        assert!(coords.contains(&[0, 0, 1]));
    }

    #[test]
    fn test_single_chunk_dataset() {
        let records = vec![record(0, 0), record(1, 1)];
        let assignment = ChunkAssignment::new(&records, [1, 2, 2], [1, 2, 2]);

        assert_eq!(assignment.group_count(), 1);
        let (flat, indices) = assignment.groups().next().unwrap();
        assert_eq!(flat, 0);
        assert_eq!(indices, &[0, 1]);
    }
}
