//! Exact-scan kernel shared by the engine implementations

use std::cmp::Ordering;

use crate::engine::{QueryMatrix, SearchHit, SearchResponse};
use crate::error::{VectorDbError, VectorDbResult};
use crate::models::{MetricType, VectorId};

/// L1 distance, or squared L2
pub fn distance(metric: MetricType, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        MetricType::L1 => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
        MetricType::L2 => a
            .iter()
            .zip(b)
            .map(|(x, y)| {
                let d = x - y;
                d * d
            })
            .sum(),
    }
}

fn rank(a: &SearchHit, b: &SearchHit) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.id.cmp(&b.id))
}

/// The `k` rows of `data` closest to `query`, closest first; ties break on id
pub fn top_k(
    metric: MetricType,
    data: &[f32],
    ids: &[VectorId],
    dimension: usize,
    query: &[f32],
    k: usize,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = data
        .chunks_exact(dimension)
        .zip(ids)
        .map(|(row, &id)| SearchHit {
            id,
            distance: distance(metric, row, query),
        })
        .collect();

    if k < hits.len() {
        hits.select_nth_unstable_by(k, rank);
        hits.truncate(k);
    }
    hits.sort_by(rank);
    hits
}

/// Check that a flat buffer holds exactly `count` rows of `dimension`
pub fn check_rows(count: usize, vectors: &[f32], dimension: usize) -> VectorDbResult<()> {
    if dimension == 0 || vectors.len() != count * dimension {
        return Err(VectorDbError::DimensionMismatch {
            expected: count * dimension,
            actual: vectors.len(),
        });
    }
    Ok(())
}

/// Answer every query row against the stored rows
pub fn search(
    metric: MetricType,
    data: &[f32],
    ids: &[VectorId],
    dimension: usize,
    queries: &QueryMatrix,
    k: usize,
) -> VectorDbResult<SearchResponse> {
    if queries.dimension != dimension {
        return Err(VectorDbError::DimensionMismatch {
            expected: dimension,
            actual: queries.dimension,
        });
    }

    let results = (0..queries.rows)
        .map(|i| top_k(metric, data, ids, dimension, queries.row(i), k))
        .collect();
    Ok(SearchResponse { results })
}
