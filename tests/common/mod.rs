#![allow(dead_code)]

//! Synthetic tiles and vector layers for the integration suite.
//!
//! Tiles are built around a Lambert-93-like origin with centimetre
//! quantisation, written and reread through the real LAS codec wherever a
//! test exercises persistence.

use std::path::Path;

use lidarfuse::las;
use lidarfuse::{DataType, Tile};

pub const ORIGIN: (f64, f64) = (870000.0, 6618000.0);

/// One synthetic point with the channels the pipeline consumes.
#[derive(Debug, Clone, Copy)]
pub struct PointSpec {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub classification: u8,
    pub building: f32,
    pub entropy: f32,
}

impl PointSpec {
    pub fn new(x: f64, y: f64, z: f64, classification: u8) -> PointSpec {
        PointSpec { x, y, z, classification, building: 0.0, entropy: 0.0 }
    }

    pub fn building(mut self, probability: f32) -> PointSpec {
        self.building = probability;
        self
    }

    pub fn entropy(mut self, entropy: f32) -> PointSpec {
        self.entropy = entropy;
        self
    }
}

/// A point-format-6 header whose offsets sit at the tile origin, so
/// Lambert-93-sized coordinates survive the i32 raw encoding.
pub fn synthetic_header() -> las::Header {
    let mut builder = las::Builder::from((1, 4));
    builder.point_format = las::point::Format::new(6).unwrap();
    builder.transforms = las::Vector {
        x: las::Transform { scale: 0.01, offset: ORIGIN.0 },
        y: las::Transform { scale: 0.01, offset: ORIGIN.1 },
        z: las::Transform { scale: 0.01, offset: 0.0 },
    };
    builder.into_header().unwrap()
}

/// Assemble an in-memory tile carrying the four probability/entropy
/// channels the pipeline expects.
pub fn build_tile(specs: &[PointSpec]) -> Tile {
    let points = specs
        .iter()
        .map(|spec| las::Point {
            x: spec.x,
            y: spec.y,
            z: spec.z,
            classification: las::point::Classification::new(spec.classification).unwrap(),
            gps_time: Some(0.0),
            ..Default::default()
        })
        .collect();

    let mut tile = Tile::new(synthetic_header(), points);
    for name in ["building", "vegetation", "unclassified", "entropy"] {
        tile.add_dim(name, DataType::F32).unwrap();
    }
    let building: Vec<f32> = specs.iter().map(|s| s.building).collect();
    tile.f32_dim_mut("building").unwrap().copy_from_slice(&building);
    let entropy: Vec<f32> = specs.iter().map(|s| s.entropy).collect();
    tile.f32_dim_mut("entropy").unwrap().copy_from_slice(&entropy);
    tile
}

/// A dense square patch of `side * side` points at `spacing` metres.
pub fn square_patch(
    center: (f64, f64),
    side: usize,
    spacing: f64,
    z: f64,
    classification: u8,
) -> Vec<PointSpec> {
    let half = (side as f64 - 1.0) * spacing / 2.0;
    (0..side * side)
        .map(|i| {
            let column = (i % side) as f64;
            let row = (i / side) as f64;
            PointSpec::new(
                center.0 - half + column * spacing,
                center.1 - half + row * spacing,
                z,
                classification,
            )
        })
        .collect()
}

/// Write a polygon shapefile with `PRESENCE = 1` rectangles
/// (x_min, y_min, x_max, y_max).
pub fn write_presence_shapefile(path: &Path, rectangles: &[(f64, f64, f64, f64)]) {
    use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};

    let table =
        TableWriterBuilder::new().add_numeric_field(FieldName::try_from("PRESENCE").unwrap(), 10, 0);
    let mut writer = shapefile::Writer::from_path(path, table).unwrap();
    for &(x_min, y_min, x_max, y_max) in rectangles {
        // Clockwise outer ring, closed, per shapefile convention.
        let ring = vec![
            shapefile::Point::new(x_min, y_min),
            shapefile::Point::new(x_min, y_max),
            shapefile::Point::new(x_max, y_max),
            shapefile::Point::new(x_max, y_min),
            shapefile::Point::new(x_min, y_min),
        ];
        let polygon = shapefile::Polygon::with_rings(vec![shapefile::PolygonRing::Outer(ring)]);
        let mut record = Record::default();
        record.insert("PRESENCE".to_string(), FieldValue::Numeric(Some(1.0)));
        writer.write_shape_and_record(&polygon, &record).unwrap();
    }
}

/// A rectangle covering every point of the patch plus a margin.
pub fn covering_rectangle(specs: &[PointSpec], margin: f64) -> (f64, f64, f64, f64) {
    let mut x_min = f64::INFINITY;
    let mut y_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    for spec in specs {
        x_min = x_min.min(spec.x);
        y_min = y_min.min(spec.y);
        x_max = x_max.max(spec.x);
        y_max = y_max.max(spec.y);
    }
    (x_min - margin, y_min - margin, x_max + margin, y_max + margin)
}
