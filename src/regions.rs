//! Named capture regions persisted as JSON

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::Region;
use crate::error::RegionError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegionFile {
    #[serde(default)]
    regions: BTreeMap<String, Region>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<String>,
}

/// Keyed region storage backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct RegionStore {
    path: PathBuf,
}

impl RegionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `~/.config/witness/regions.json`.
    pub fn open_default() -> Result<Self, RegionError> {
        let dir = crate::config_dir().ok_or_else(|| RegionError::Io {
            path: PathBuf::from("~/.config/witness"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "HOME is not set"),
        })?;
        Ok(Self::new(dir.join("regions.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, name: &str, region: Region) -> Result<(), RegionError> {
        if name.trim().is_empty() {
            return Err(RegionError::Invalid("region name must not be empty".into()));
        }
        let mut file = self.read()?;
        file.regions.insert(name.to_string(), region);
        self.write(&file)
    }

    pub fn load(&self, name: &str) -> Result<Region, RegionError> {
        self.read()?
            .regions
            .get(name)
            .copied()
            .ok_or_else(|| RegionError::NotFound(name.to_string()))
    }

    /// Saved region names in sorted order.
    pub fn list(&self) -> Result<Vec<String>, RegionError> {
        Ok(self.read()?.regions.into_keys().collect())
    }

    pub fn delete(&self, name: &str) -> Result<(), RegionError> {
        let mut file = self.read()?;
        if file.regions.remove(name).is_none() {
            return Err(RegionError::NotFound(name.to_string()));
        }
        if file.default.as_deref() == Some(name) {
            file.default = None;
        }
        self.write(&file)
    }

    pub fn set_default(&self, name: &str) -> Result<(), RegionError> {
        let mut file = self.read()?;
        if !file.regions.contains_key(name) {
            return Err(RegionError::NotFound(name.to_string()));
        }
        file.default = Some(name.to_string());
        self.write(&file)
    }

    pub fn default_name(&self) -> Result<Option<String>, RegionError> {
        Ok(self.read()?.default)
    }

    pub fn default_region(&self) -> Result<Region, RegionError> {
        let file = self.read()?;
        let name = file.default.ok_or(RegionError::NoDefault)?;
        file.regions
            .get(&name)
            .copied()
            .ok_or(RegionError::NotFound(name))
    }

    /// `name: WxH at (X,Y)`
    pub fn describe(&self, name: &str) -> Result<String, RegionError> {
        let r = self.load(name)?;
        Ok(format!(
            "{}: {}x{} at ({},{})",
            name,
            r.width(),
            r.height(),
            r.x(),
            r.y()
        ))
    }

    fn read(&self) -> Result<RegionFile, RegionError> {
        match fs::read(&self.path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegionFile::default()),
            Err(source) => Err(RegionError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write(&self, file: &RegionFile) -> Result<(), RegionError> {
        let io_err = |source| RegionError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(io_err)?;

        let data = serde_json::to_vec_pretty(file)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&data).map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        debug!(path = %self.path.display(), regions = file.regions.len(), "Saved regions");
        Ok(())
    }
}
