//! Deterministic reconciliation of embedding widths against a fixed index.
//!
//! Embedding providers change native output width across models and over
//! time, while a vector index is created with one fixed dimension. Rather
//! than migrating the index, vectors are projected to the index width with a
//! stable, parameter-free transform: block means going down, nearest-neighbor
//! sampling going up. The same `(vector, target_width)` input always yields
//! the same output, so vectors written months apart stay comparable.

/// Projects `vector` to exactly `target_width` values.
///
/// * Equal widths: returns a copy, unchanged.
/// * Wider source (`m > target_width`): partitions the source into
///   `target_width` contiguous blocks with boundaries
///   `floor(j*m/n)..floor((j+1)*m/n)` (minimum block length 1) and outputs
///   each block's arithmetic mean.
/// * Narrower source (`m < target_width`): output `j` is the source value at
///   `floor(j*m/n)`, clamped to the last valid index.
///
/// An empty source projects to all zeros. Output length is always exactly
/// `target_width`.
pub fn project(vector: &[f32], target_width: usize) -> Vec<f32> {
    let source_width = vector.len();

    if target_width == 0 {
        return Vec::new();
    }
    if source_width == 0 {
        return vec![0.0; target_width];
    }
    if source_width == target_width {
        return vector.to_vec();
    }

    if source_width > target_width {
        downsample(vector, target_width)
    } else {
        upsample(vector, target_width)
    }
}

fn downsample(vector: &[f32], target_width: usize) -> Vec<f32> {
    let m = vector.len();
    (0..target_width)
        .map(|j| {
            let start = j * m / target_width;
            let end = usize::max((j + 1) * m / target_width, start + 1);
            let block = &vector[start..end.min(m)];
            block.iter().sum::<f32>() / block.len() as f32
        })
        .collect()
}

fn upsample(vector: &[f32], target_width: usize) -> Vec<f32> {
    let m = vector.len();
    (0..target_width)
        .map(|j| vector[usize::min(j * m / target_width, m - 1)])
        .collect()
}
