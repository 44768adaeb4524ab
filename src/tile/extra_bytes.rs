//! Codec for the LAS "Extra Bytes" VLR (user id `LASF_Spec`, record id 4).
//!
//! Each extra dimension is described by a fixed 192-byte record; the point
//! payload carries the dimension values after the standard attributes, in
//! record order. Only scalar data types are supported (the deprecated tuple
//! types never occur in the tiles this pipeline consumes).

use anyhow::{bail, Result};

pub const EXTRA_BYTES_USER_ID: &str = "LASF_Spec";
pub const EXTRA_BYTES_RECORD_ID: u16 = 4;

const DESCRIPTOR_LEN: usize = 192;

// Field offsets within a descriptor record.
const DATA_TYPE_OFFSET: usize = 2;
const NAME_OFFSET: usize = 4;
const NAME_LEN: usize = 32;
const DESCRIPTION_OFFSET: usize = 160;
const DESCRIPTION_LEN: usize = 32;

/// Element type of an extra dimension, restricted to the scalar LAS types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl DataType {
    /// LAS data-type code (1..=10).
    pub fn code(self) -> u8 {
        match self {
            DataType::U8 => 1,
            DataType::I8 => 2,
            DataType::U16 => 3,
            DataType::I16 => 4,
            DataType::U32 => 5,
            DataType::I32 => 6,
            DataType::U64 => 7,
            DataType::I64 => 8,
            DataType::F32 => 9,
            DataType::F64 => 10,
        }
    }

    pub fn from_code(code: u8) -> Option<DataType> {
        Some(match code {
            1 => DataType::U8,
            2 => DataType::I8,
            3 => DataType::U16,
            4 => DataType::I16,
            5 => DataType::U32,
            6 => DataType::I32,
            7 => DataType::U64,
            8 => DataType::I64,
            9 => DataType::F32,
            10 => DataType::F64,
            _ => return None,
        })
    }

    /// Parse a configuration-level type name (`float`, `uint32`, ...).
    pub fn parse_name(name: &str) -> Option<DataType> {
        Some(match name {
            "uint8" | "u8" => DataType::U8,
            "int8" | "i8" => DataType::I8,
            "uint16" | "u16" => DataType::U16,
            "int16" | "i16" => DataType::I16,
            "uint32" | "u32" => DataType::U32,
            "int32" | "i32" => DataType::I32,
            "uint64" | "u64" => DataType::U64,
            "int64" | "i64" => DataType::I64,
            "float" | "float32" | "f32" => DataType::F32,
            "double" | "float64" | "f64" => DataType::F64,
            _ => return None,
        })
    }

    /// Size in bytes of one element.
    pub fn size(self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::U64 | DataType::I64 | DataType::F64 => 8,
        }
    }
}

/// One extra-dimension descriptor, as stored in the Extra Bytes VLR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraBytesDescriptor {
    pub name: String,
    pub data_type: DataType,
    pub description: String,
}

impl ExtraBytesDescriptor {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self { name: name.to_string(), data_type, description: String::new() }
    }
}

fn fixed_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Decode the descriptor list from the VLR payload.
pub fn parse_descriptors(data: &[u8]) -> Result<Vec<ExtraBytesDescriptor>> {
    if data.len() % DESCRIPTOR_LEN != 0 {
        bail!("extra bytes VLR length {} is not a multiple of {DESCRIPTOR_LEN}", data.len());
    }

    let mut descriptors = Vec::with_capacity(data.len() / DESCRIPTOR_LEN);
    for record in data.chunks_exact(DESCRIPTOR_LEN) {
        let name = fixed_string(&record[NAME_OFFSET..NAME_OFFSET + NAME_LEN]);
        let code = record[DATA_TYPE_OFFSET];
        let Some(data_type) = DataType::from_code(code) else {
            bail!("unsupported extra bytes data type {code} for dimension `{name}`");
        };
        let description =
            fixed_string(&record[DESCRIPTION_OFFSET..DESCRIPTION_OFFSET + DESCRIPTION_LEN]);
        descriptors.push(ExtraBytesDescriptor { name, data_type, description });
    }
    Ok(descriptors)
}

/// Encode a descriptor list into a VLR payload.
pub fn encode_descriptors<'a>(descriptors: impl IntoIterator<Item = &'a ExtraBytesDescriptor>) -> Vec<u8> {
    let mut data = Vec::new();
    for descriptor in descriptors {
        let mut record = [0u8; DESCRIPTOR_LEN];
        record[DATA_TYPE_OFFSET] = descriptor.data_type.code();
        copy_fixed(&mut record[NAME_OFFSET..NAME_OFFSET + NAME_LEN], &descriptor.name);
        copy_fixed(
            &mut record[DESCRIPTION_OFFSET..DESCRIPTION_OFFSET + DESCRIPTION_LEN],
            &descriptor.description,
        );
        data.extend_from_slice(&record);
    }
    data
}

fn copy_fixed(target: &mut [u8], text: &str) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(target.len());
    target[..len].copy_from_slice(&bytes[..len]);
}
