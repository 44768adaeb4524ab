//! Euclidean connected-component clustering over an R-tree.
//!
//! Replaces the external clustering filter of the original toolchain: points
//! closer than `tolerance` (in 2D or 3D) belong to the same component, and
//! components smaller than `min_points` are noise. Noise keeps cluster id 0;
//! real clusters are numbered densely from 1 in order of their
//! lowest-indexed member, so the labelling is deterministic under a fixed
//! point order.

use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::Deserialize;

use crate::tile::Tile;

/// Clustering parameters, shared by every component that clusters points.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterParams {
    /// Components with fewer members than this are noise.
    pub min_points: u32,
    /// Euclidean connectivity radius, in the tile's coordinate unit.
    pub tolerance: f64,
    /// Cluster in 3D; otherwise Z is ignored.
    pub is3d: bool,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self { min_points: 10, tolerance: 0.5, is3d: true }
    }
}

type IndexedPosition = GeomWithData<[f64; 3], usize>;

/// Cluster the points of `tile` selected by `mask`, returning one cluster id
/// per tile point (0 for unselected and noise points).
pub fn cluster_tile_where(tile: &Tile, mask: &[bool], params: &ClusterParams) -> Vec<u32> {
    debug_assert_eq!(mask.len(), tile.len(), "mask length must equal tile length");

    let selected: Vec<usize> = (0..tile.len()).filter(|&i| mask[i]).collect();
    let positions: Vec<[f64; 3]> = selected
        .iter()
        .map(|&i| {
            let (x, y, z) = tile.xyz(i);
            [x, y, z]
        })
        .collect();

    let local_ids = cluster_positions(&positions, params);

    let mut ids = vec![0u32; tile.len()];
    for (local, &i) in selected.iter().enumerate() {
        ids[i] = local_ids[local];
    }
    ids
}

/// Connected-component labelling of a position set. Returns one id per
/// input position. With `is3d` unset, Z is flattened before neighbourhood
/// queries.
pub fn cluster_positions(positions: &[[f64; 3]], params: &ClusterParams) -> Vec<u32> {
    let mut ids = vec![0u32; positions.len()];
    if positions.is_empty() {
        return ids;
    }

    let positions: Vec<[f64; 3]> = positions
        .iter()
        .map(|&[x, y, z]| [x, y, if params.is3d { z } else { 0.0 }])
        .collect();
    let tree: RTree<IndexedPosition> = RTree::bulk_load(
        positions.iter().enumerate().map(|(i, &p)| GeomWithData::new(p, i)).collect(),
    );

    let squared_tolerance = params.tolerance * params.tolerance;
    let mut visited = vec![false; positions.len()];
    let mut next_id = 1u32;

    for seed in 0..positions.len() {
        if visited[seed] {
            continue;
        }
        // Flood-fill the component reachable from the seed.
        let mut component = vec![seed];
        visited[seed] = true;
        let mut cursor = 0;
        while cursor < component.len() {
            let current = component[cursor];
            cursor += 1;
            for neighbor in tree.locate_within_distance(positions[current], squared_tolerance) {
                let j = neighbor.data;
                if !visited[j] {
                    visited[j] = true;
                    component.push(j);
                }
            }
        }

        if component.len() >= params.min_points as usize {
            for i in component {
                ids[i] = next_id;
            }
            next_id += 1;
        }
    }

    ids
}

/// Indices of each positive cluster id, in ascending id order. The noise
/// group (id 0) is excluded; callers that need it can filter on the raw ids.
pub fn group_indices(ids: &[u32]) -> Vec<(u32, Vec<usize>)> {
    let mut groups: std::collections::BTreeMap<u32, Vec<usize>> = std::collections::BTreeMap::new();
    for (i, &id) in ids.iter().enumerate() {
        if id > 0 {
            groups.entry(id).or_default().push(i);
        }
    }
    groups.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(min_points: u32, tolerance: f64, is3d: bool) -> ClusterParams {
        ClusterParams { min_points, tolerance, is3d }
    }

    fn blob(cx: f64, cy: f64, n: usize) -> Vec<[f64; 3]> {
        (0..n).map(|i| [cx + 0.1 * (i % 4) as f64, cy + 0.1 * (i / 4) as f64, 0.0]).collect()
    }

    #[test]
    fn two_separated_blobs_get_distinct_ids() {
        let mut positions = blob(0.0, 0.0, 12);
        positions.extend(blob(100.0, 0.0, 12));
        let ids = cluster_positions(&positions, &params(3, 1.0, false));

        assert!(ids[..12].iter().all(|&id| id == 1));
        assert!(ids[12..].iter().all(|&id| id == 2));
    }

    #[test]
    fn small_components_are_noise() {
        let mut positions = blob(0.0, 0.0, 12);
        positions.push([500.0, 500.0, 0.0]);
        positions.push([500.2, 500.0, 0.0]);
        let ids = cluster_positions(&positions, &params(3, 1.0, false));

        assert!(ids[..12].iter().all(|&id| id == 1));
        assert_eq!(&ids[12..], &[0, 0]);
    }

    #[test]
    fn vertical_stack_splits_in_3d_but_not_in_2d() {
        // Two layers 10 m apart in Z, identical XY footprints.
        let mut positions: Vec<[f64; 3]> = blob(0.0, 0.0, 8);
        positions.extend(blob(0.0, 0.0, 8).iter().map(|p| [p[0], p[1], 10.0]));

        let flat = cluster_positions(&positions, &params(3, 1.0, false));
        assert!(flat.iter().all(|&id| id == 1));

        let ids = cluster_positions(&positions, &params(3, 1.0, true));
        assert!(ids[..8].iter().all(|&id| id == 1));
        assert!(ids[8..].iter().all(|&id| id == 2));
    }

    #[test]
    fn ids_are_ordered_by_first_member() {
        let mut positions = blob(50.0, 0.0, 5);
        positions.extend(blob(0.0, 0.0, 5));
        let ids = cluster_positions(&positions, &params(3, 1.0, false));

        // The blob containing point 0 is cluster 1 regardless of coordinates.
        assert!(ids[..5].iter().all(|&id| id == 1));
        assert!(ids[5..].iter().all(|&id| id == 2));
    }

    #[test]
    fn group_indices_orders_by_id_and_skips_noise() {
        let ids = vec![0, 2, 1, 2, 0, 1, 1];
        let groups = group_indices(&ids);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], (1, vec![2, 5, 6]));
        assert_eq!(groups[1], (2, vec![1, 3]));
    }
}
