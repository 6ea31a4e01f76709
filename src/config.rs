use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::io::raster::Resampling;

/// Options shared by every product opened with them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Where preprocessed (orthorectified) bands are written
    pub output_dir: PathBuf,
    /// Turn degraded-mode fallbacks into errors
    pub strict: bool,
    /// Keep loaded bands in memory, keyed by band and pixel request
    pub cache_bands: bool,
    /// Kernel used when a band read changes the pixel size. Masks always use nearest.
    pub resampling: Resampling,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            strict: false,
            cache_bands: true,
            resampling: Resampling::Bilinear,
        }
    }
}

impl ReaderConfig {
    /// Default configuration overridden by `EOBANDS_OUTPUT_DIR` and `EOBANDS_STRICT`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("EOBANDS_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                config.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(strict) = std::env::var("EOBANDS_STRICT") {
            config.strict = matches!(strict.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        log::debug!("Reader configuration: {:?}", config);
        config
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, output_dir: P) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

fn default_output_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("eobands")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReaderConfig::default();
        assert!(!config.strict);
        assert!(config.cache_bands);
        assert_eq!(config.resampling, Resampling::Bilinear);
        assert!(config.output_dir.ends_with("eobands"));
    }

    #[test]
    fn test_serde_round_trip() {
        let config = ReaderConfig::default().with_output_dir("/tmp/out").strict(true);
        let json = serde_json::to_string(&config).unwrap();
        let back: ReaderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
