//! Vector-layer overlay: flag tile points lying under reference polygons.
//!
//! The layer is a 2D polygon shapefile carrying a `PRESENCE` attribute
//! (always 1 for the building database). Z and M variants are accepted and
//! flattened. Candidate polygons are pre-filtered through an R-tree of
//! bounding boxes before the exact point-in-polygon test.

use std::path::Path;

use geo::{BoundingRect, Intersects};
use rstar::{RTree, RTreeObject, AABB};
use shapefile::dbase::FieldValue;
use shapefile::{PolygonRing, Shape};

use crate::error::{Error, Result};
use crate::tile::Tile;

/// A polygon's planar extent in the R-tree, keyed back to the layer by index.
#[derive(Debug, Clone)]
struct PolygonEnvelope {
    idx: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for PolygonEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// An in-memory vector layer: polygons plus their `PRESENCE` values.
pub struct VectorLayer {
    polygons: Vec<geo::MultiPolygon<f64>>,
    presence: Vec<u8>,
    rtree: RTree<PolygonEnvelope>,
}

impl VectorLayer {
    /// Load a polygon shapefile. Features without a `PRESENCE` attribute
    /// default to 1; non-polygon shapes are rejected.
    pub fn from_shapefile(path: &Path) -> Result<VectorLayer> {
        let mut reader = shapefile::Reader::from_path(path).map_err(|e| Error::io(path, e))?;

        let mut polygons = Vec::new();
        let mut presence = Vec::new();
        for feature in reader.iter_shapes_and_records() {
            let (shape, record) = feature.map_err(|e| Error::io(path, e))?;
            let polygon = match shape {
                Shape::NullShape => continue,
                Shape::Polygon(p) => rings_to_geo(
                    p.rings().iter().map(|ring| ring_coords(ring, |pt| (pt.x, pt.y))),
                ),
                Shape::PolygonZ(p) => rings_to_geo(
                    p.rings().iter().map(|ring| ring_coords(ring, |pt| (pt.x, pt.y))),
                ),
                Shape::PolygonM(p) => rings_to_geo(
                    p.rings().iter().map(|ring| ring_coords(ring, |pt| (pt.x, pt.y))),
                ),
                _ => {
                    return Err(Error::io(
                        path,
                        "unexpected non-polygon shape in building layer".to_string(),
                    ))
                }
            };
            polygons.push(polygon);
            presence.push(presence_value(record.get("PRESENCE")));
        }

        Ok(VectorLayer::new(polygons, presence))
    }

    /// Build a layer from already-converted geometries (one `PRESENCE`
    /// value per polygon).
    pub fn new(polygons: Vec<geo::MultiPolygon<f64>>, presence: Vec<u8>) -> VectorLayer {
        debug_assert_eq!(polygons.len(), presence.len(), "one presence value per polygon");
        let envelopes = polygons
            .iter()
            .enumerate()
            .filter_map(|(idx, polygon)| {
                polygon.bounding_rect().map(|rect| PolygonEnvelope {
                    idx,
                    aabb: AABB::from_corners(rect.min().into(), rect.max().into()),
                })
            })
            .collect();
        VectorLayer { polygons, presence, rtree: RTree::bulk_load(envelopes) }
    }

    #[inline] pub fn len(&self) -> usize { self.polygons.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.polygons.is_empty() }

    /// `PRESENCE` of the first polygon covering `(x, y)`, boundary included.
    pub fn presence_at(&self, x: f64, y: f64) -> Option<u8> {
        let probe = AABB::from_point([x, y]);
        let point = geo::Point::new(x, y);
        self.rtree
            .locate_in_envelope_intersecting(&probe)
            .filter(|envelope| self.polygons[envelope.idx].intersects(&point))
            .map(|envelope| self.presence[envelope.idx])
            .next()
    }

    /// Write the layer's presence flag into `dim` for every covered point;
    /// uncovered points keep their current value. The dimension must already
    /// exist on the tile.
    pub fn overlay(&self, tile: &mut Tile, dim: &str) -> Result<()> {
        let flags: Vec<Option<u8>> = (0..tile.len())
            .map(|i| {
                let (x, y) = tile.xy(i);
                self.presence_at(x, y)
            })
            .collect();

        let column = tile.u8_dim_mut(dim)?;
        for (target, flag) in column.iter_mut().zip(flags) {
            if let Some(value) = flag {
                *target = value;
            }
        }
        Ok(())
    }
}

fn presence_value(field: Option<&FieldValue>) -> u8 {
    match field {
        Some(FieldValue::Numeric(Some(v))) => *v as u8,
        Some(FieldValue::Float(Some(v))) => *v as u8,
        Some(FieldValue::Integer(v)) => *v as u8,
        Some(FieldValue::Double(v)) => *v as u8,
        _ => 1,
    }
}

fn ring_coords<P>(
    ring: &PolygonRing<P>,
    to_xy: impl Fn(&P) -> (f64, f64),
) -> (Vec<geo::Coord<f64>>, bool) {
    let points = match ring {
        PolygonRing::Outer(points) => points,
        PolygonRing::Inner(points) => points,
    };
    let mut coords: Vec<geo::Coord<f64>> = points
        .iter()
        .map(|p| {
            let (x, y) = to_xy(p);
            geo::Coord { x, y }
        })
        .collect();
    // geo requires closed rings.
    if let (Some(&first), Some(&last)) = (coords.first(), coords.last()) {
        if first != last {
            coords.push(first);
        }
    }
    (coords, matches!(ring, PolygonRing::Outer(_)))
}

/// Assemble shapefile rings into a MultiPolygon. Shapefiles store each outer
/// ring followed by its holes, so grouping is sequential.
fn rings_to_geo(
    rings: impl Iterator<Item = (Vec<geo::Coord<f64>>, bool)>,
) -> geo::MultiPolygon<f64> {
    let mut polygons: Vec<geo::Polygon<f64>> = Vec::new();
    let mut exterior: Option<geo::LineString<f64>> = None;
    let mut holes: Vec<geo::LineString<f64>> = Vec::new();

    for (coords, is_outer) in rings {
        let ring = geo::LineString(coords);
        if is_outer {
            if let Some(previous) = exterior.take() {
                polygons.push(geo::Polygon::new(previous, std::mem::take(&mut holes)));
            }
            exterior = Some(ring);
        } else if exterior.is_some() {
            holes.push(ring);
        }
    }
    if let Some(previous) = exterior {
        polygons.push(geo::Polygon::new(previous, holes));
    }

    geo::MultiPolygon(polygons)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, side: f64) -> geo::MultiPolygon<f64> {
        geo::MultiPolygon(vec![geo::Polygon::new(
            geo::LineString::from(vec![
                (x0, y0),
                (x0 + side, y0),
                (x0 + side, y0 + side),
                (x0, y0 + side),
                (x0, y0),
            ]),
            vec![],
        )])
    }

    #[test]
    fn presence_inside_outside_and_boundary() {
        let layer = VectorLayer::new(vec![square(0.0, 0.0, 10.0)], vec![1]);
        assert_eq!(layer.presence_at(5.0, 5.0), Some(1));
        assert_eq!(layer.presence_at(10.0, 5.0), Some(1)); // boundary counts
        assert_eq!(layer.presence_at(15.0, 5.0), None);
    }

    #[test]
    fn hole_is_not_covered() {
        let outer = (square(0.0, 0.0, 10.0), true);
        let inner = (square(4.0, 4.0, 2.0), false);
        let rings = [outer, inner].into_iter().map(|(mp, is_outer)| {
            (mp.0[0].exterior().0.clone(), is_outer)
        });
        let polygon = rings_to_geo(rings);
        let layer = VectorLayer::new(vec![polygon], vec![1]);
        assert_eq!(layer.presence_at(5.0, 5.0), None);
        assert_eq!(layer.presence_at(1.0, 1.0), Some(1));
    }

    #[test]
    fn overlay_writes_only_covered_points() {
        use crate::tile::test_support::tile_from_xyz;
        use crate::tile::DataType;

        let mut tile = tile_from_xyz(&[(5.0, 5.0, 0.0), (50.0, 50.0, 0.0)]);
        tile.add_dim("BDTopoOverlay", DataType::U8).unwrap();

        let layer = VectorLayer::new(vec![square(0.0, 0.0, 10.0)], vec![1]);
        layer.overlay(&mut tile, "BDTopoOverlay").unwrap();
        assert_eq!(tile.u8_dim("BDTopoOverlay").unwrap(), &[1, 0]);
    }
}
