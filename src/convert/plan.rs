//! Layout planning: output array shape and a chunk shape bounded by a
//! per-chunk byte budget.
//!
//! The payload lays every pixel's spectrum out as one contiguous run, so a
//! chunk always spans the full channel axis; only the spatial axes are
//! eligible for shrinking. Starting from the full spatial extent (or the
//! caller's hint), the planner halves spatial axes in round-robin order
//! until a chunk buffer fits the budget.

use super::ConvertError;
use crate::imzml::{Dataset, LayoutMode};

/// Default per-chunk byte budget (4 GiB).
pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Shape and chunking of the destination intensity array, `(c, z, y, x)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub intensity_shape: [usize; 4],
    pub intensity_chunks: [usize; 4],
}

impl ChunkPlan {
    /// Channel count (spectrum length after padding, for processed data).
    pub fn channels(&self) -> usize {
        self.intensity_shape[0]
    }

    /// Spatial part of the shape, `[z, y, x]`.
    pub fn spatial_shape(&self) -> [usize; 3] {
        [
            self.intensity_shape[1],
            self.intensity_shape[2],
            self.intensity_shape[3],
        ]
    }

    /// Spatial part of the chunk shape, `[z, y, x]`.
    pub fn spatial_chunks(&self) -> [usize; 3] {
        [
            self.intensity_chunks[1],
            self.intensity_chunks[2],
            self.intensity_chunks[3],
        ]
    }
}

/// Derive the output shape and a budgeted chunk shape for a dataset.
pub fn plan_chunks(
    dataset: &Dataset,
    chunk_hint: Option<[usize; 3]>,
    max_chunk_bytes: u64,
) -> Result<ChunkPlan, ConvertError> {
    let channels = match dataset.layout_mode {
        // identical for all pixels by construction
        LayoutMode::Continuous => dataset.records.first().map_or(0, |r| r.mz_length),
        // ragged spectra are padded to the dataset-wide maximum
        LayoutMode::Processed => dataset
            .records
            .iter()
            .map(|r| r.mz_length)
            .max()
            .unwrap_or(0),
    };

    // in processed mode the m/z array shares the spatial chunking, so size
    // chunks for the wider of the two element types
    let mut item_size = dataset.intensity_dtype.item_size();
    if dataset.layout_mode == LayoutMode::Processed {
        item_size = item_size.max(dataset.mz_dtype.item_size());
    }

    let spatial_shape = dataset.spatial_shape();
    let mut chunks = match chunk_hint {
        Some(hint) => {
            let mut chunks = [0usize; 3];
            for d in 0..3 {
                chunks[d] = hint[d].clamp(1, spatial_shape[d].max(1));
            }
            chunks
        }
        None => spatial_shape,
    };

    let mut axis = 0;
    loop {
        let cost = channels as u128
            * chunks.iter().product::<usize>() as u128
            * item_size as u128;
        if cost < max_chunk_bytes as u128 {
            break;
        }
        if chunks == [1, 1, 1] {
            // a single pixel's spectrum alone does not fit the budget
            return Err(ConvertError::ChunkBudgetExceeded {
                channels,
                item_size,
                max_chunk_bytes,
            });
        }
        while chunks[axis] == 1 {
            axis = (axis + 1) % 3;
        }
        chunks[axis] = (chunks[axis] + 1) / 2;
        axis = (axis + 1) % 3;
    }

    Ok(ChunkPlan {
        intensity_shape: [
            channels,
            spatial_shape[0],
            spatial_shape[1],
            spatial_shape[2],
        ],
        intensity_chunks: [channels, chunks[0], chunks[1], chunks[2]],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imzml::{DataType, SpectrumRecord};
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn continuous_dataset(channels: usize, height: usize, width: usize) -> Dataset {
        Dataset {
            records: vec![SpectrumRecord {
                x: 0,
                y: 0,
                z: 0,
                mz_offset: 16,
                intensity_offset: 16 + channels as u64 * 8,
                mz_length: channels,
                intensity_length: channels,
            }],
            mz_dtype: DataType::F64,
            intensity_dtype: DataType::F32,
            pixel_grid: (1, height, width),
            layout_mode: LayoutMode::Continuous,
            uuid: "00000000-0000-0000-0000-000000000000".to_string(),
            source_imzml: PathBuf::from("test.imzML"),
        }
    }

    #[test]
    fn test_small_dataset_is_one_chunk() {
        let dataset = continuous_dataset(3, 2, 2);
        let plan = plan_chunks(&dataset, None, DEFAULT_MAX_CHUNK_BYTES).unwrap();

        assert_eq!(plan.intensity_shape, [3, 1, 2, 2]);
        assert_eq!(plan.intensity_chunks, [3, 1, 2, 2]);
    }

    #[test]
    fn test_round_robin_shrink() {
        // 16 channels of f32 = 64 bytes per pixel; budget of 257 bytes
        // forces shrinking down to 4 pixels per chunk
        let dataset = continuous_dataset(16, 8, 8);
        let plan = plan_chunks(&dataset, None, 257).unwrap();

        assert_eq!(plan.intensity_chunks, [16, 1, 2, 2]);
    }

    #[test]
    fn test_channel_axis_never_split() {
        let dataset = continuous_dataset(1000, 4, 4);
        let plan = plan_chunks(&dataset, None, 5000).unwrap();

        assert_eq!(plan.intensity_chunks[0], 1000);
        // 1000 * 4 bytes = 4000 < 5000 only with a single pixel per chunk
        assert_eq!(plan.spatial_chunks(), [1, 1, 1]);
    }

    #[test]
    fn test_budget_exceeded() {
        let dataset = continuous_dataset(1000, 4, 4);
        let err = plan_chunks(&dataset, None, 4000).unwrap_err();
        assert!(matches!(err, ConvertError::ChunkBudgetExceeded { .. }));
    }

    #[test]
    fn test_chunk_hint_is_starting_point() {
        let dataset = continuous_dataset(3, 8, 8);
        let plan = plan_chunks(&dataset, Some([1, 2, 2]), DEFAULT_MAX_CHUNK_BYTES).unwrap();
        assert_eq!(plan.intensity_chunks, [3, 1, 2, 2]);

        // oversized hints are clamped to the array extent
        let plan = plan_chunks(&dataset, Some([5, 100, 100]), DEFAULT_MAX_CHUNK_BYTES).unwrap();
        assert_eq!(plan.intensity_chunks, [3, 1, 8, 8]);
    }

    proptest! {
        #[test]
        fn prop_plan_cost_is_under_budget(
            channels in 1usize..=64,
            height in 1usize..=32,
            width in 1usize..=32,
            max_chunk_bytes in 1u64..=(1 << 20),
        ) {
            let dataset = continuous_dataset(channels, height, width);
            match plan_chunks(&dataset, None, max_chunk_bytes) {
                Ok(plan) => {
                    let cost = plan.channels() as u64
                        * plan.spatial_chunks().iter().product::<usize>() as u64
                        * dataset.intensity_dtype.item_size() as u64;
                    prop_assert!(cost < max_chunk_bytes);
                    for d in 0..4 {
                        prop_assert!(plan.intensity_chunks[d] <= plan.intensity_shape[d]);
                        prop_assert!(plan.intensity_chunks[d] >= 1);
                    }
                }
                Err(ConvertError::ChunkBudgetExceeded { .. }) => {
                    // only legal when one pixel alone blows the budget
                    let single = channels as u64
                        * dataset.intensity_dtype.item_size() as u64;
                    prop_assert!(single >= max_chunk_bytes);
                }
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }
    }
}
