//! Columnar point-cloud tile buffer.
//!
//! A [`Tile`] holds the core LAS attributes of every point plus a spill map of
//! named extra dimensions (deep-learning probabilities, entropy, and the
//! derived flags and cluster ids this pipeline adds). Components mutate the
//! buffer in place, either by adding a dimension (O(N)) or by overwriting
//! whole slices indexed by cluster membership; geometry is never touched.

mod extra_bytes;
mod io;

pub use extra_bytes::{DataType, ExtraBytesDescriptor};
pub use io::{read_tile, write_tile};

use crate::error::{Error, Result};

/// A single extra-dimension column.
#[derive(Debug, Clone, PartialEq)]
pub enum DimValues {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    U64(Vec<u64>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! per_variant {
    ($self:expr, $values:ident => $body:expr) => {
        match $self {
            DimValues::U8($values) => $body,
            DimValues::I8($values) => $body,
            DimValues::U16($values) => $body,
            DimValues::I16($values) => $body,
            DimValues::U32($values) => $body,
            DimValues::I32($values) => $body,
            DimValues::U64($values) => $body,
            DimValues::I64($values) => $body,
            DimValues::F32($values) => $body,
            DimValues::F64($values) => $body,
        }
    };
}

impl DimValues {
    /// A zero-filled column of `len` elements.
    pub fn zeroed(data_type: DataType, len: usize) -> DimValues {
        match data_type {
            DataType::U8 => DimValues::U8(vec![0; len]),
            DataType::I8 => DimValues::I8(vec![0; len]),
            DataType::U16 => DimValues::U16(vec![0; len]),
            DataType::I16 => DimValues::I16(vec![0; len]),
            DataType::U32 => DimValues::U32(vec![0; len]),
            DataType::I32 => DimValues::I32(vec![0; len]),
            DataType::U64 => DimValues::U64(vec![0; len]),
            DataType::I64 => DimValues::I64(vec![0; len]),
            DataType::F32 => DimValues::F32(vec![0.0; len]),
            DataType::F64 => DimValues::F64(vec![0.0; len]),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            DimValues::U8(_) => DataType::U8,
            DimValues::I8(_) => DataType::I8,
            DimValues::U16(_) => DataType::U16,
            DimValues::I16(_) => DataType::I16,
            DimValues::U32(_) => DataType::U32,
            DimValues::I32(_) => DataType::I32,
            DimValues::U64(_) => DataType::U64,
            DimValues::I64(_) => DataType::I64,
            DimValues::F32(_) => DataType::F32,
            DimValues::F64(_) => DataType::F64,
        }
    }

    pub fn len(&self) -> usize {
        per_variant!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `i` widened to `f64` (lossy only beyond 2^53 integers).
    pub fn as_f64(&self, i: usize) -> f64 {
        per_variant!(self, values => values[i] as f64)
    }

    /// Decode one element from little-endian bytes and append it.
    fn push_from_le(&mut self, bytes: &[u8]) {
        match self {
            DimValues::U8(v) => v.push(bytes[0]),
            DimValues::I8(v) => v.push(bytes[0] as i8),
            DimValues::U16(v) => v.push(u16::from_le_bytes([bytes[0], bytes[1]])),
            DimValues::I16(v) => v.push(i16::from_le_bytes([bytes[0], bytes[1]])),
            DimValues::U32(v) => v.push(u32::from_le_bytes(bytes.try_into().unwrap())),
            DimValues::I32(v) => v.push(i32::from_le_bytes(bytes.try_into().unwrap())),
            DimValues::U64(v) => v.push(u64::from_le_bytes(bytes.try_into().unwrap())),
            DimValues::I64(v) => v.push(i64::from_le_bytes(bytes.try_into().unwrap())),
            DimValues::F32(v) => v.push(f32::from_le_bytes(bytes.try_into().unwrap())),
            DimValues::F64(v) => v.push(f64::from_le_bytes(bytes.try_into().unwrap())),
        }
    }

    /// Append element `i` to `out` as little-endian bytes.
    fn write_le(&self, i: usize, out: &mut Vec<u8>) {
        match self {
            DimValues::U8(v) => out.push(v[i]),
            DimValues::I8(v) => out.push(v[i] as u8),
            DimValues::U16(v) => out.extend_from_slice(&v[i].to_le_bytes()),
            DimValues::I16(v) => out.extend_from_slice(&v[i].to_le_bytes()),
            DimValues::U32(v) => out.extend_from_slice(&v[i].to_le_bytes()),
            DimValues::I32(v) => out.extend_from_slice(&v[i].to_le_bytes()),
            DimValues::U64(v) => out.extend_from_slice(&v[i].to_le_bytes()),
            DimValues::I64(v) => out.extend_from_slice(&v[i].to_le_bytes()),
            DimValues::F32(v) => out.extend_from_slice(&v[i].to_le_bytes()),
            DimValues::F64(v) => out.extend_from_slice(&v[i].to_le_bytes()),
        }
    }
}

/// A named extra dimension with its VLR descriptor.
#[derive(Debug, Clone)]
pub struct ExtraColumn {
    pub descriptor: ExtraBytesDescriptor,
    pub values: DimValues,
}

/// An in-memory tile: core LAS attributes plus named extra dimensions.
///
/// The header the tile was read with is kept verbatim so that writing the
/// tile back preserves format version, point data format and SRS records.
#[derive(Debug, Clone)]
pub struct Tile {
    header: las::Header,
    epsg: Option<u32>,
    points: Vec<las::Point>,
    classification: Vec<u8>,
    extras: Vec<ExtraColumn>,
}

impl Tile {
    /// Build a tile from raw LAS points. Any extra-byte payload carried by
    /// the points is discarded; extra dimensions are added explicitly.
    pub fn new(header: las::Header, mut points: Vec<las::Point>) -> Tile {
        let classification = points.iter().map(|p| u8::from(p.classification)).collect();
        for point in &mut points {
            point.extra_bytes.clear();
        }
        Tile { header, epsg: None, points, classification, extras: Vec::new() }
    }

    pub(crate) fn from_parts(
        header: las::Header,
        epsg: Option<u32>,
        points: Vec<las::Point>,
        classification: Vec<u8>,
        extras: Vec<ExtraColumn>,
    ) -> Tile {
        Tile { header, epsg, points, classification, extras }
    }

    #[inline] pub fn len(&self) -> usize { self.points.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.points.is_empty() }

    #[inline] pub fn header(&self) -> &las::Header { &self.header }

    /// EPSG code of the tile's SRS, if known (config override or SRS VLR).
    #[inline] pub fn epsg(&self) -> Option<u32> { self.epsg }

    pub fn set_epsg(&mut self, epsg: Option<u32>) {
        self.epsg = epsg;
    }

    /// Planimetric coordinates of point `i`.
    #[inline]
    pub fn xy(&self, i: usize) -> (f64, f64) {
        (self.points[i].x, self.points[i].y)
    }

    /// Full coordinates of point `i`.
    #[inline]
    pub fn xyz(&self, i: usize) -> (f64, f64, f64) {
        (self.points[i].x, self.points[i].y, self.points[i].z)
    }

    #[inline]
    pub fn intensity(&self, i: usize) -> u16 {
        self.points[i].intensity
    }

    /// The classification channel (the only core dimension this pipeline
    /// rewrites).
    #[inline] pub fn classification(&self) -> &[u8] { &self.classification }

    #[inline] pub fn classification_mut(&mut self) -> &mut [u8] { &mut self.classification }

    pub(crate) fn points(&self) -> &[las::Point] {
        &self.points
    }

    pub(crate) fn extras(&self) -> &[ExtraColumn] {
        &self.extras
    }

    /// Names of the extra dimensions, in file order.
    pub fn extra_dim_names(&self) -> impl Iterator<Item = &str> {
        self.extras.iter().map(|column| column.descriptor.name.as_str())
    }

    pub fn has_dim(&self, name: &str) -> bool {
        self.extras.iter().any(|column| column.descriptor.name == name)
    }

    fn find(&self, name: &str) -> Option<&ExtraColumn> {
        self.extras.iter().find(|column| column.descriptor.name == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut ExtraColumn> {
        self.extras.iter_mut().find(|column| column.descriptor.name == name)
    }

    /// Add a zero-filled extra dimension. A no-op when the dimension already
    /// exists with the same element type; an existing dimension with another
    /// type is a contract violation.
    pub fn add_dim(&mut self, name: &str, data_type: DataType) -> Result<()> {
        if let Some(column) = self.find(name) {
            if column.values.data_type() == data_type {
                return Ok(());
            }
            return Err(Error::MissingDimension(format!(
                "{name} (exists with element type {:?}, expected {data_type:?})",
                column.values.data_type()
            )));
        }
        self.extras.push(ExtraColumn {
            descriptor: ExtraBytesDescriptor::new(name, data_type),
            values: DimValues::zeroed(data_type, self.len()),
        });
        Ok(())
    }

    /// Untyped read access to an extra dimension.
    pub fn dim(&self, name: &str) -> Result<&DimValues> {
        self.find(name)
            .map(|column| &column.values)
            .ok_or_else(|| Error::MissingDimension(name.to_string()))
    }

    pub fn u8_dim(&self, name: &str) -> Result<&[u8]> {
        match self.dim(name)? {
            DimValues::U8(values) => Ok(values),
            other => Err(type_mismatch(name, DataType::U8, other)),
        }
    }

    pub fn u8_dim_mut(&mut self, name: &str) -> Result<&mut [u8]> {
        let name_owned = name.to_string();
        match self.find_mut(name) {
            Some(ExtraColumn { values: DimValues::U8(values), .. }) => Ok(values),
            Some(column) => Err(type_mismatch(&name_owned, DataType::U8, &column.values)),
            None => Err(Error::MissingDimension(name_owned)),
        }
    }

    pub fn u32_dim(&self, name: &str) -> Result<&[u32]> {
        match self.dim(name)? {
            DimValues::U32(values) => Ok(values),
            other => Err(type_mismatch(name, DataType::U32, other)),
        }
    }

    pub fn u32_dim_mut(&mut self, name: &str) -> Result<&mut [u32]> {
        let name_owned = name.to_string();
        match self.find_mut(name) {
            Some(ExtraColumn { values: DimValues::U32(values), .. }) => Ok(values),
            Some(column) => Err(type_mismatch(&name_owned, DataType::U32, &column.values)),
            None => Err(Error::MissingDimension(name_owned)),
        }
    }

    pub fn f32_dim(&self, name: &str) -> Result<&[f32]> {
        match self.dim(name)? {
            DimValues::F32(values) => Ok(values),
            other => Err(type_mismatch(name, DataType::F32, other)),
        }
    }

    pub fn f32_dim_mut(&mut self, name: &str) -> Result<&mut [f32]> {
        let name_owned = name.to_string();
        match self.find_mut(name) {
            Some(ExtraColumn { values: DimValues::F32(values), .. }) => Ok(values),
            Some(column) => Err(type_mismatch(&name_owned, DataType::F32, &column.values)),
            None => Err(Error::MissingDimension(name_owned)),
        }
    }

    /// Drop every extra dimension whose name fails the predicate.
    pub fn retain_dims(&mut self, keep: impl Fn(&str) -> bool) {
        self.extras.retain(|column| keep(&column.descriptor.name));
    }

    /// Total extra-byte width of one point, as written to disk.
    pub(crate) fn extra_bytes_width(&self) -> usize {
        self.extras.iter().map(|column| column.descriptor.data_type.size()).sum()
    }

    /// Encode the extra-dimension payload of point `i`.
    pub(crate) fn encode_extra_bytes(&self, i: usize, out: &mut Vec<u8>) {
        out.clear();
        for column in &self.extras {
            column.values.write_le(i, out);
        }
    }
}

fn type_mismatch(name: &str, expected: DataType, found: &DimValues) -> Error {
    Error::MissingDimension(format!(
        "{name} (exists with element type {:?}, expected {expected:?})",
        found.data_type()
    ))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A bare tile from XYZ triples; header defaults are irrelevant for
    /// in-memory geometry tests.
    pub(crate) fn tile_from_xyz(coords: &[(f64, f64, f64)]) -> Tile {
        let points = coords
            .iter()
            .map(|&(x, y, z)| las::Point { x, y, z, ..Default::default() })
            .collect();
        Tile::new(las::Header::default(), points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::tile_from_xyz;

    #[test]
    fn add_dim_is_idempotent_and_zeroed() {
        let mut tile = tile_from_xyz(&[(0.0, 0.0, 0.0), (1.0, 1.0, 1.0)]);
        tile.add_dim("building", DataType::F32).unwrap();
        tile.f32_dim_mut("building").unwrap()[0] = 0.9;

        // Re-adding must not reset the column.
        tile.add_dim("building", DataType::F32).unwrap();
        assert_eq!(tile.f32_dim("building").unwrap(), &[0.9, 0.0]);
    }

    #[test]
    fn add_dim_rejects_conflicting_type() {
        let mut tile = tile_from_xyz(&[(0.0, 0.0, 0.0)]);
        tile.add_dim("flag", DataType::U8).unwrap();
        assert!(matches!(
            tile.add_dim("flag", DataType::U32),
            Err(Error::MissingDimension(_))
        ));
    }

    #[test]
    fn missing_dim_is_typed_error() {
        let tile = tile_from_xyz(&[(0.0, 0.0, 0.0)]);
        assert!(matches!(tile.f32_dim("entropy"), Err(Error::MissingDimension(name)) if name == "entropy"));
    }

    #[test]
    fn retain_dims_drops_unlisted_columns() {
        let mut tile = tile_from_xyz(&[(0.0, 0.0, 0.0)]);
        tile.add_dim("building", DataType::F32).unwrap();
        tile.add_dim("entropy", DataType::F32).unwrap();
        tile.retain_dims(|name| name == "entropy");
        assert!(!tile.has_dim("building"));
        assert!(tile.has_dim("entropy"));
    }

    #[test]
    fn extra_bytes_row_encoding_follows_column_order() {
        let mut tile = tile_from_xyz(&[(0.0, 0.0, 0.0)]);
        tile.add_dim("flag", DataType::U8).unwrap();
        tile.add_dim("proba", DataType::F32).unwrap();
        tile.u8_dim_mut("flag").unwrap()[0] = 1;
        tile.f32_dim_mut("proba").unwrap()[0] = 0.5;

        assert_eq!(tile.extra_bytes_width(), 5);
        let mut row = Vec::new();
        tile.encode_extra_bytes(0, &mut row);
        assert_eq!(row[0], 1);
        assert_eq!(f32::from_le_bytes(row[1..5].try_into().unwrap()), 0.5);
    }
}
