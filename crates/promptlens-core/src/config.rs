use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::MetadataCache;
use crate::error::ConfigError;
use crate::extractor::MetadataExtractor;
use crate::image_cache::{ImageCache, DEFAULT_IMAGE_CACHE_CAPACITY};
use crate::record::DEFAULT_MAX_DIAGNOSTICS;

fn default_image_cache_capacity() -> usize {
    DEFAULT_IMAGE_CACHE_CAPACITY
}

fn default_max_diagnostics() -> usize {
    DEFAULT_MAX_DIAGNOSTICS
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Runtime settings, read from a JSON file. Every field is optional in the
/// file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_image_cache_capacity")]
    pub image_cache_capacity: usize,
    /// `None` keeps every record for the lifetime of the process.
    #[serde(default)]
    pub metadata_cache_capacity: Option<usize>,
    #[serde(default = "default_max_diagnostics")]
    pub max_diagnostics: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Descend into subdirectories when listing a folder.
    #[serde(default)]
    pub recursive: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image_cache_capacity: default_image_cache_capacity(),
            metadata_cache_capacity: None,
            max_diagnostics: default_max_diagnostics(),
            log_level: default_log_level(),
            recursive: false,
        }
    }
}

impl Settings {
    /// Load and validate settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings from `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image_cache_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("image_cache_capacity"));
        }
        if self.metadata_cache_capacity == Some(0) {
            return Err(ConfigError::ZeroCapacity("metadata_cache_capacity"));
        }
        Ok(())
    }

    pub fn extractor(&self) -> MetadataExtractor {
        MetadataExtractor::new(self.max_diagnostics)
    }

    pub fn metadata_cache(&self) -> Result<MetadataCache, ConfigError> {
        match self.metadata_cache_capacity {
            Some(cap) => MetadataCache::with_capacity(self.extractor(), cap),
            None => Ok(MetadataCache::unbounded(self.extractor())),
        }
    }

    pub fn image_cache(&self) -> Result<ImageCache, ConfigError> {
        ImageCache::new(self.image_cache_capacity)
    }
}
