use crate::utils::MrzError;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tempfile::NamedTempFile;

/// Binarisation and scaling parameters for the specialised engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessParams {
    pub block_size: u32,
    pub offset: i32,
    pub scale: f32,
    pub blur_radius: u32,
}

impl PreprocessParams {
    pub fn new(block_size: u32, offset: i32, scale: f32, blur_radius: u32) -> Result<Self, MrzError> {
        let params = PreprocessParams {
            block_size,
            offset,
            scale,
            blur_radius,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), MrzError> {
        if self.block_size < 3 || self.block_size % 2 == 0 {
            return Err(MrzError::invalid(format!(
                "block size must be odd and >= 3, got {}",
                self.block_size
            )));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(MrzError::invalid("scale must be positive"));
        }
        Ok(())
    }

    /// Static catalog, in default trial order.
    pub fn catalog() -> [PreprocessParams; 4] {
        [
            PreprocessParams { block_size: 15, offset: 5, scale: 2.0, blur_radius: 0 },
            PreprocessParams { block_size: 17, offset: 7, scale: 2.25, blur_radius: 1 },
            PreprocessParams { block_size: 21, offset: 9, scale: 2.5, blur_radius: 1 },
            PreprocessParams { block_size: 13, offset: 3, scale: 1.75, blur_radius: 0 },
        ]
    }

    /// Catalog with the cached winner moved to the front.
    pub fn trial_order(cached: Option<PreprocessParams>) -> Vec<PreprocessParams> {
        let mut order = Vec::with_capacity(5);
        if let Some(c) = cached.filter(|c| c.validate().is_ok()) {
            order.push(c);
        }
        for p in Self::catalog() {
            if !order.contains(&p) {
                order.push(p);
            }
        }
        order
    }
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self::catalog()[0]
    }
}

/// Camera identity and resolution a preset was learned for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresetKey {
    pub camera_id: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl PresetKey {
    pub fn new(camera_id: Option<String>, width: u32, height: u32) -> Self {
        PresetKey {
            camera_id,
            width,
            height,
        }
    }

    /// `preprocess_params:<camera|unknown>:<w>x<h>`, or `None` for an empty resolution.
    pub fn storage_key(&self) -> Option<String> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let camera = self
            .camera_id
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or("unknown");
        Some(format!("preprocess_params:{}:{}x{}", camera, self.width, self.height))
    }
}

/// Key-value store for learned presets.
pub trait PresetStore: Send + Sync {
    fn load(&self, key: &PresetKey) -> Result<Option<PreprocessParams>, MrzError>;
    fn save(&self, key: &PresetKey, params: &PreprocessParams) -> Result<(), MrzError>;
}

#[derive(Debug, Default)]
pub struct InMemoryPresetStore {
    entries: RwLock<HashMap<String, PreprocessParams>>,
}

impl InMemoryPresetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresetStore for InMemoryPresetStore {
    fn load(&self, key: &PresetKey) -> Result<Option<PreprocessParams>, MrzError> {
        let Some(k) = key.storage_key() else {
            return Ok(None);
        };
        let entries = self
            .entries
            .read()
            .map_err(|_| MrzError::PresetStore("preset map lock poisoned".to_string()))?;
        Ok(entries.get(&k).copied())
    }

    fn save(&self, key: &PresetKey, params: &PreprocessParams) -> Result<(), MrzError> {
        let Some(k) = key.storage_key() else {
            return Ok(());
        };
        params.validate()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| MrzError::PresetStore("preset map lock poisoned".to_string()))?;
        entries.insert(k, *params);
        Ok(())
    }
}

/// Presets persisted as one JSON object; writes go through a temp file and rename.
#[derive(Debug)]
pub struct JsonFilePresetStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, PreprocessParams>>,
}

impl JsonFilePresetStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MrzError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let text = fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                HashMap::new()
            } else {
                match serde_json::from_str::<HashMap<String, PreprocessParams>>(&text) {
                    Ok(map) => map,
                    Err(e) => {
                        warn!("ignoring unreadable preset file {}: {}", path.display(), e);
                        HashMap::new()
                    }
                }
            }
        } else {
            HashMap::new()
        };
        debug!("loaded {} presets from {}", entries.len(), path.display());
        Ok(JsonFilePresetStore {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, PreprocessParams>) -> Result<(), MrzError> {
        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(serde_json::to_string_pretty(entries)?.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| MrzError::PresetStore(format!("failed to persist presets: {}", e.error)))?;
        Ok(())
    }
}

impl PresetStore for JsonFilePresetStore {
    fn load(&self, key: &PresetKey) -> Result<Option<PreprocessParams>, MrzError> {
        let Some(k) = key.storage_key() else {
            return Ok(None);
        };
        let entries = self
            .entries
            .read()
            .map_err(|_| MrzError::PresetStore("preset map lock poisoned".to_string()))?;
        Ok(entries.get(&k).copied())
    }

    fn save(&self, key: &PresetKey, params: &PreprocessParams) -> Result<(), MrzError> {
        let Some(k) = key.storage_key() else {
            return Ok(());
        };
        params.validate()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| MrzError::PresetStore("preset map lock poisoned".to_string()))?;
        if entries.get(&k) == Some(params) {
            return Ok(());
        }
        entries.insert(k, *params);
        self.persist(&entries)
    }
}
