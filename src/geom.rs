use std::fmt;

use crate::tile::Tile;

/// An axis-aligned XY bounding box with integer bounds, as expected by the
/// vector-database envelope queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntBbox {
    pub x_min: i64,
    pub y_min: i64,
    pub x_max: i64,
    pub y_max: i64,
}

impl fmt::Display for IntBbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x_min, self.y_min, self.x_max, self.y_max)
    }
}

/// Compute the integer XY bounding box of a tile, inflated by `buffer`.
/// Min bounds are floored and max bounds are ceiled, so the box always
/// contains every point. An empty tile yields the degenerate zero box.
pub fn integer_bbox(tile: &Tile, buffer: f64) -> IntBbox {
    if tile.is_empty() {
        return IntBbox { x_min: 0, y_min: 0, x_max: 0, y_max: 0 };
    }

    let mut x_min = f64::INFINITY;
    let mut y_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    for i in 0..tile.len() {
        let (x, y) = tile.xy(i);
        x_min = x_min.min(x);
        y_min = y_min.min(y);
        x_max = x_max.max(x);
        y_max = y_max.max(y);
    }

    IntBbox {
        x_min: (x_min - buffer).floor() as i64,
        y_min: (y_min - buffer).floor() as i64,
        x_max: (x_max + buffer).ceil() as i64,
        y_max: (y_max + buffer).ceil() as i64,
    }
}
