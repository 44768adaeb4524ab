//! Extra-dimension housekeeping: keep only the dimensions a stage needs.
//!
//! Specs use the `name` or `name=type` syntax of the configuration file;
//! the single entry `all` keeps everything. Dimensions can only be added
//! when their spec carries a type.

use std::path::Path;

use tracing::{info, warn};

use crate::error::Result;
use crate::tile::{read_tile, write_tile, DataType, Tile};

#[derive(Debug, Clone)]
struct DimSpec {
    name: String,
    data_type: Option<DataType>,
}

/// Keeps a configured set of extra dimensions, dropping the rest.
#[derive(Debug, Clone)]
pub struct Cleaner {
    specs: Vec<DimSpec>,
    keep_all: bool,
}

impl Cleaner {
    /// Parse `name` / `name=type` specs. Unknown type names are tolerated:
    /// the dimension can still be kept, only `add_dimensions` needs types.
    pub fn new(extra_dims: &[String]) -> Cleaner {
        let keep_all = extra_dims.len() == 1 && extra_dims[0] == "all";
        let specs = if keep_all {
            Vec::new()
        } else {
            extra_dims
                .iter()
                .filter(|spec| !spec.is_empty())
                .map(|spec| match spec.split_once('=') {
                    Some((name, type_name)) => DimSpec {
                        name: name.to_string(),
                        data_type: DataType::parse_name(type_name),
                    },
                    None => DimSpec { name: spec.clone(), data_type: None },
                })
                .collect()
        };
        Cleaner { specs, keep_all }
    }

    /// Copy `src` to `target`, keeping only the listed extra dimensions.
    pub fn run(&self, src: &Path, target: &Path, epsg: Option<u32>) -> Result<()> {
        let mut tile = read_tile(src, epsg)?;
        self.remove_dimensions(&mut tile);
        write_tile(&tile, target)?;
        info!("saved cleaned tile to {}", target.display());
        Ok(())
    }

    /// Drop every extra dimension not in the kept set.
    pub fn remove_dimensions(&self, tile: &mut Tile) {
        if self.keep_all {
            return;
        }
        tile.retain_dims(|name| self.specs.iter().any(|spec| spec.name == name));
    }

    /// Add the kept dimensions that are missing from the tile. Specs
    /// without a type cannot be materialised and are skipped.
    pub fn add_dimensions(&self, tile: &mut Tile) -> Result<()> {
        if self.keep_all {
            return Ok(());
        }
        for spec in &self.specs {
            let Some(data_type) = spec.data_type else {
                warn!("{} has no type and thus is not added as a dimension", spec.name);
                continue;
            };
            if !tile.has_dim(&spec.name) {
                tile.add_dim(&spec.name, data_type)?;
            }
        }
        Ok(())
    }
}
