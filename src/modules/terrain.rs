use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::modules::grid::Grid;

#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("failed to read terrain map {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("terrain map {path} holds {actual} cells, expected {width}x{height}")]
    SizeMismatch {
        path: PathBuf,
        width: usize,
        height: usize,
        actual: usize,
    },
}

/// Immutable soil/grass layout. `true` cells are soil and can grow crops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terrain {
    soil: Grid<bool>,
}

impl Terrain {
    pub fn uniform(width: usize, height: usize, soil: bool) -> Self {
        Self {
            soil: Grid::filled(width, height, soil),
        }
    }

    pub fn from_cells(width: usize, height: usize, cells: Vec<bool>) -> Option<Self> {
        Grid::from_cells(width, height, cells).map(|soil| Self { soil })
    }

    pub fn width(&self) -> usize {
        self.soil.width()
    }

    pub fn height(&self) -> usize {
        self.soil.height()
    }

    #[inline]
    pub fn is_soil(&self, r: usize, c: usize) -> bool {
        *self.soil.get(r, c)
    }

    pub fn set(&mut self, r: usize, c: usize, soil: bool) {
        *self.soil.get_mut(r, c) = soil;
    }

    pub fn cells(&self) -> &[bool] {
        self.soil.cells()
    }

    pub fn soil_fraction(&self) -> f32 {
        let soil = self.cells().iter().filter(|&&s| s).count();
        soil as f32 / self.cells().len().max(1) as f32
    }
}

/// Supplies the static terrain for a world. Called once when a simulation is
/// built; the result is never written afterwards.
pub trait TerrainProvider {
    fn load(
        &self,
        map_name: Option<&str>,
        width: usize,
        height: usize,
    ) -> Result<Terrain, TerrainError>;
}

/// Every cell has the same terrain type regardless of map name.
#[derive(Debug, Clone, Copy)]
pub struct UniformTerrain {
    pub soil: bool,
}

impl Default for UniformTerrain {
    fn default() -> Self {
        Self { soil: true }
    }
}

impl TerrainProvider for UniformTerrain {
    fn load(
        &self,
        _map_name: Option<&str>,
        width: usize,
        height: usize,
    ) -> Result<Terrain, TerrainError> {
        Ok(Terrain::uniform(width, height, self.soil))
    }
}

/// Reads one byte per cell (non-zero = soil), row-major. The default map is
/// `is_soil_<width>_<height>.bin`; a named map is `<name>.bin`.
#[derive(Debug, Clone)]
pub struct FileTerrain {
    dir: PathBuf,
}

impl FileTerrain {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn map_path(&self, map_name: Option<&str>, width: usize, height: usize) -> PathBuf {
        match map_name {
            Some(name) => self.dir.join(format!("{}.bin", name)),
            None => self.dir.join(format!("is_soil_{}_{}.bin", width, height)),
        }
    }
}

impl Default for FileTerrain {
    fn default() -> Self {
        Self::new("resources")
    }
}

impl TerrainProvider for FileTerrain {
    fn load(
        &self,
        map_name: Option<&str>,
        width: usize,
        height: usize,
    ) -> Result<Terrain, TerrainError> {
        let path = self.map_path(map_name, width, height);
        read_soil_file(&path, width, height)
    }
}

fn read_soil_file(path: &Path, width: usize, height: usize) -> Result<Terrain, TerrainError> {
    let bytes = fs::read(path).map_err(|source| TerrainError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.len() != width * height {
        return Err(TerrainError::SizeMismatch {
            path: path.to_path_buf(),
            width,
            height,
            actual: bytes.len(),
        });
    }
    let cells = bytes.into_iter().map(|b| b != 0).collect();
    Terrain::from_cells(width, height, cells).ok_or_else(|| TerrainError::SizeMismatch {
        path: path.to_path_buf(),
        width,
        height,
        actual: 0,
    })
}
