//! LAS/LAZ tile reading and writing.
//!
//! The writer forwards the input header (format version, point data format,
//! SRS and other VLRs) and re-encodes only the Extra Bytes records, so a
//! read-then-write round trip leaves XYZ and header metadata byte-identical.

use std::fs;
use std::io::BufWriter;
use std::path::Path;

use tempfile::NamedTempFile;

use super::extra_bytes::{
    encode_descriptors, parse_descriptors, EXTRA_BYTES_RECORD_ID, EXTRA_BYTES_USER_ID,
};
use super::{DimValues, ExtraColumn, Tile};
use crate::error::{Error, Result};

/// Read a tile from a `.las` / `.laz` file.
///
/// `epsg_override` takes precedence over whatever SRS the header declares;
/// without it the EPSG code is recovered from the WKT or GeoTIFF VLR when
/// possible.
pub fn read_tile(path: &Path, epsg_override: Option<u32>) -> Result<Tile> {
    let mut reader = las::Reader::from_path(path).map_err(|e| Error::io(path, e))?;
    let header = reader.header().clone();

    let descriptors = match extra_bytes_vlr(&header) {
        Some(data) => parse_descriptors(data).map_err(|e| Error::io(path, e.to_string()))?,
        None => Vec::new(),
    };
    let width: usize = descriptors.iter().map(|d| d.data_type.size()).sum();
    if width != usize::from(header.point_format().extra_bytes) {
        return Err(Error::io(
            path,
            format!(
                "extra bytes VLR describes {width} bytes per point but the point format carries {}",
                header.point_format().extra_bytes
            ),
        ));
    }

    let mut extras: Vec<ExtraColumn> = descriptors
        .into_iter()
        .map(|descriptor| {
            let values = DimValues::zeroed(descriptor.data_type, 0);
            ExtraColumn { descriptor, values }
        })
        .collect();

    let mut points = Vec::new();
    let mut classification = Vec::new();
    for point in reader.points() {
        let mut point = point.map_err(|e| Error::io(path, e))?;
        if point.extra_bytes.len() != width {
            return Err(Error::io(path, "point extra bytes shorter than declared".to_string()));
        }
        let mut offset = 0;
        for column in &mut extras {
            let size = column.descriptor.data_type.size();
            column.values.push_from_le(&point.extra_bytes[offset..offset + size]);
            offset += size;
        }
        point.extra_bytes.clear();
        classification.push(u8::from(point.classification));
        points.push(point);
    }

    let epsg = epsg_override.or_else(|| epsg_from_header(&header));
    Ok(Tile::from_parts(header, epsg, points, classification, extras))
}

/// Write a tile, preserving the header it was read with. The output is
/// staged in a sibling temporary file and renamed into place, so a failed
/// write never leaves a partial tile behind.
pub fn write_tile(tile: &Tile, path: &Path) -> Result<()> {
    let header = output_header(tile, path).map_err(|e| Error::io(path, e.to_string()))?;

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| Error::io(path, e))?;
    let tmp = NamedTempFile::new_in(parent).map_err(|e| Error::io(path, e))?;

    {
        let file = tmp.reopen().map_err(|e| Error::io(path, e))?;
        let mut writer =
            las::Writer::new(BufWriter::new(file), header).map_err(|e| Error::io(path, e))?;
        let mut row = Vec::with_capacity(tile.extra_bytes_width());
        for (i, point) in tile.points().iter().enumerate() {
            let mut point = point.clone();
            point.classification = las::point::Classification::new(tile.classification()[i])
                .map_err(|e| Error::io(path, e))?;
            tile.encode_extra_bytes(i, &mut row);
            point.extra_bytes = row.clone();
            writer.write_point(point).map_err(|e| Error::io(path, e))?;
        }
        writer.close().map_err(|e| Error::io(path, e))?;
    }

    tmp.persist(path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// Rebuild the header for writing: same raw fields and VLRs, with the Extra
/// Bytes record replaced by the tile's current dimension set and compression
/// chosen by the output extension.
fn output_header(tile: &Tile, path: &Path) -> anyhow::Result<las::Header> {
    let mut builder = las::Builder::new(tile.header().clone().into_raw()?)?;

    builder.vlrs = tile
        .header()
        .vlrs()
        .iter()
        .filter(|vlr| !is_extra_bytes_vlr(vlr))
        .cloned()
        .collect();
    if !tile.extras().is_empty() {
        builder.vlrs.push(las::Vlr {
            user_id: EXTRA_BYTES_USER_ID.to_string(),
            record_id: EXTRA_BYTES_RECORD_ID,
            description: "Extra dimensions".to_string(),
            data: encode_descriptors(tile.extras().iter().map(|c| &c.descriptor)),
        });
    }
    builder.evlrs = tile.header().evlrs().to_vec();

    builder.point_format.extra_bytes = tile.extra_bytes_width() as u16;
    builder.point_format.is_compressed = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("laz"));

    Ok(builder.into_header()?)
}

fn is_extra_bytes_vlr(vlr: &las::Vlr) -> bool {
    vlr.user_id.trim_end_matches('\0') == EXTRA_BYTES_USER_ID
        && vlr.record_id == EXTRA_BYTES_RECORD_ID
}

fn extra_bytes_vlr(header: &las::Header) -> Option<&[u8]> {
    header.vlrs().iter().find(|vlr| is_extra_bytes_vlr(vlr)).map(|vlr| vlr.data.as_slice())
}

/// Recover the EPSG code from the header's SRS VLRs (WKT first, then the
/// GeoTIFF key directory).
fn epsg_from_header(header: &las::Header) -> Option<u32> {
    for vlr in header.vlrs().iter().chain(header.evlrs()) {
        let user_id = vlr.user_id.trim_end_matches('\0');
        if user_id == "LASF_Projection" && vlr.record_id == 2112 {
            let wkt = String::from_utf8_lossy(&vlr.data);
            if let Some(epsg) = parse_epsg_from_wkt(&wkt) {
                return Some(epsg);
            }
        }
        if user_id == "LASF_Projection" && vlr.record_id == 34735 {
            if let Some(epsg) = parse_epsg_from_geotiff(&vlr.data) {
                return Some(epsg);
            }
        }
    }
    None
}

/// Pull the authority code out of a WKT string. The outermost authority is
/// declared last, e.g. `AUTHORITY["EPSG","2154"]` or `ID["EPSG",2154]`.
fn parse_epsg_from_wkt(wkt: &str) -> Option<u32> {
    let mut result = None;
    let mut rest = wkt;
    while let Some(at) = rest.find("EPSG") {
        let tail = &rest[at + 4..];
        let digits: String = tail
            .chars()
            .skip_while(|c| matches!(c, '"' | '\'' | ',' | ' ' | ':'))
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Ok(code) = digits.parse::<u32>() {
            result = Some(code);
        }
        rest = tail;
    }
    result
}

/// Walk the GeoTIFF key directory for the projected (3072) or geographic
/// (2048) CRS key; inline values are EPSG codes.
fn parse_epsg_from_geotiff(data: &[u8]) -> Option<u32> {
    let words: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    if words.len() < 4 {
        return None;
    }
    let number_of_keys = usize::from(words[3]);
    let mut geographic = None;
    for key in 0..number_of_keys {
        let at = 4 + key * 4;
        if at + 4 > words.len() {
            break;
        }
        let (key_id, location, _count, value) = (words[at], words[at + 1], words[at + 2], words[at + 3]);
        if location != 0 {
            continue;
        }
        match key_id {
            3072 => return Some(u32::from(value)),
            2048 => geographic = Some(u32::from(value)),
            _ => {}
        }
    }
    geographic
}
