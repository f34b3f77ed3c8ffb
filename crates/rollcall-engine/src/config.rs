use rollcall_core::ModelFamily;
use rollcall_index::IndexConfig;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Recognition thresholds accepted on the raw cosine scale. Below the range
/// the wrong student gets marked present; above it almost nobody matches.
pub const THRESHOLD_SAFE_RANGE: RangeInclusive<f32> = 0.30..=0.95;

pub const DEFAULT_RECOGNITION_THRESHOLD: f32 = 0.45;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error(
        "recognition threshold {0} outside safe range [{lo}, {hi}]",
        lo = THRESHOLD_SAFE_RANGE.start(),
        hi = THRESHOLD_SAFE_RANGE.end()
    )]
    ThresholdOutOfRange(f32),
    #[error("top_k must be at least 1")]
    InvalidTopK,
    #[error("min_usable_samples ({min}) must be between 1 and max_enrollment_images ({max})")]
    InvalidSampleBounds { min: usize, max: usize },
}

/// Reject thresholds outside [`THRESHOLD_SAFE_RANGE`].
pub fn validate_threshold(threshold: f32) -> Result<f32, ConfigError> {
    if THRESHOLD_SAFE_RANGE.contains(&threshold) {
        Ok(threshold)
    } else {
        Err(ConfigError::ThresholdOutOfRange(threshold))
    }
}

/// Engine configuration.
///
/// Built from defaults, then the TOML file named by `ROLLCALL_CONFIG`, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Preferred embedding model family; falls back to legacy if unavailable.
    pub model_family: ModelFamily,
    pub index: IndexConfig,
    /// Minimum cosine similarity for a recognition match.
    pub recognition_threshold: f32,
    /// Candidates fetched per detected face.
    pub top_k: usize,
    /// Usable enrollment samples required to store a reference.
    pub min_usable_samples: usize,
    pub max_enrollment_images: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: rollcall_core::default_model_dir(),
            model_family: ModelFamily::Arcface,
            index: IndexConfig::Sqlite {
                path: default_index_path(),
            },
            recognition_threshold: DEFAULT_RECOGNITION_THRESHOLD,
            top_k: 5,
            min_usable_samples: 3,
            max_enrollment_images: 25,
        }
    }
}

fn default_index_path() -> PathBuf {
    rollcall_core::default_data_dir().join("faces.db")
}

impl Config {
    /// Load from the process environment and validate.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `ROLLCALL_*` overrides.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(dir) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(family) = lookup("ROLLCALL_MODEL_FAMILY") {
            self.model_family = family.parse().map_err(|_| ConfigError::InvalidValue {
                key: "ROLLCALL_MODEL_FAMILY",
                value: family,
            })?;
        }

        let kind = lookup("ROLLCALL_INDEX_KIND");
        let path = lookup("ROLLCALL_INDEX_PATH").map(PathBuf::from);
        if kind.is_some() || path.is_some() {
            let kind = kind.unwrap_or_else(|| self.index.kind().to_string());
            let kind = kind.trim().to_ascii_lowercase();
            // A path only carries over when the backend kind stays the same.
            let current = match &self.index {
                IndexConfig::Memory { path } if kind == "memory" => path.clone(),
                IndexConfig::Sqlite { path } if kind == "sqlite" => Some(path.clone()),
                _ => None,
            };
            self.index = match kind.as_str() {
                "memory" => IndexConfig::Memory { path: path.or(current) },
                "sqlite" => IndexConfig::Sqlite {
                    path: path.or(current).unwrap_or_else(default_index_path),
                },
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "ROLLCALL_INDEX_KIND",
                        value: kind,
                    })
                }
            };
        }

        if let Some(v) = parse_env(&lookup, "ROLLCALL_RECOGNITION_THRESHOLD")? {
            self.recognition_threshold = v;
        }
        if let Some(v) = parse_env(&lookup, "ROLLCALL_TOP_K")? {
            self.top_k = v;
        }
        if let Some(v) = parse_env(&lookup, "ROLLCALL_MIN_USABLE_SAMPLES")? {
            self.min_usable_samples = v;
        }
        if let Some(v) = parse_env(&lookup, "ROLLCALL_MAX_ENROLLMENT_IMAGES")? {
            self.max_enrollment_images = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_threshold(self.recognition_threshold)?;
        if self.top_k == 0 {
            return Err(ConfigError::InvalidTopK);
        }
        if self.min_usable_samples == 0 || self.min_usable_samples > self.max_enrollment_images {
            return Err(ConfigError::InvalidSampleBounds {
                min: self.min_usable_samples,
                max: self.max_enrollment_images,
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::load_with(env(&[])).unwrap();
        assert_eq!(config.recognition_threshold, 0.45);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.min_usable_samples, 3);
        assert_eq!(config.max_enrollment_images, 25);
        assert_eq!(config.model_family, ModelFamily::Arcface);
        assert_eq!(config.index.kind(), "sqlite");
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::load_with(env(&[
            ("ROLLCALL_MODEL_DIR", "/opt/models"),
            ("ROLLCALL_MODEL_FAMILY", "legacy"),
            ("ROLLCALL_INDEX_KIND", "memory"),
            ("ROLLCALL_INDEX_PATH", "/var/lib/rollcall/index.json"),
            ("ROLLCALL_RECOGNITION_THRESHOLD", "0.6"),
            ("ROLLCALL_TOP_K", "3"),
        ]))
        .unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(config.model_family, ModelFamily::Legacy);
        assert_eq!(
            config.index,
            IndexConfig::Memory {
                path: Some("/var/lib/rollcall/index.json".into())
            }
        );
        assert_eq!(config.recognition_threshold, 0.6);
        assert_eq!(config.top_k, 3);
    }

    #[test]
    fn test_index_path_override_keeps_kind() {
        let config = Config::load_with(env(&[("ROLLCALL_INDEX_PATH", "/tmp/x.db")])).unwrap();
        assert_eq!(config.index, IndexConfig::Sqlite { path: "/tmp/x.db".into() });
    }

    #[test]
    fn test_index_kind_switch_drops_other_backends_path() {
        let config = Config::load_with(env(&[("ROLLCALL_INDEX_KIND", "memory")])).unwrap();
        assert_eq!(config.index, IndexConfig::Memory { path: None });

        let mut config = Config {
            index: IndexConfig::Memory {
                path: Some("/srv/rollcall/index.json".into()),
            },
            ..Config::default()
        };
        config.apply_env(env(&[("ROLLCALL_INDEX_KIND", "sqlite")])).unwrap();
        assert_eq!(config.index, IndexConfig::Sqlite { path: default_index_path() });

        // Same kind keeps the configured path.
        let mut config = Config {
            index: IndexConfig::Memory {
                path: Some("/srv/rollcall/index.json".into()),
            },
            ..Config::default()
        };
        config.apply_env(env(&[("ROLLCALL_INDEX_KIND", "Memory")])).unwrap();
        assert_eq!(
            config.index,
            IndexConfig::Memory {
                path: Some("/srv/rollcall/index.json".into())
            }
        );
    }

    #[test]
    fn test_threshold_outside_safe_range_rejected() {
        for bad in ["0.1", "0.29", "0.96", "1.5", "NaN"] {
            let err = Config::load_with(env(&[("ROLLCALL_RECOGNITION_THRESHOLD", bad)])).unwrap_err();
            assert!(matches!(err, ConfigError::ThresholdOutOfRange(_)), "{bad}: {err}");
        }
        assert!(validate_threshold(0.30).is_ok());
        assert!(validate_threshold(0.95).is_ok());
    }

    #[test]
    fn test_unparsable_values_rejected() {
        let err = Config::load_with(env(&[("ROLLCALL_TOP_K", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "ROLLCALL_TOP_K", .. }));
        let err = Config::load_with(env(&[("ROLLCALL_INDEX_KIND", "redis")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "ROLLCALL_INDEX_KIND", .. }));
        let err = Config::load_with(env(&[("ROLLCALL_MODEL_FAMILY", "vgg")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_sample_bounds_validated() {
        let err = Config::load_with(env(&[("ROLLCALL_MIN_USABLE_SAMPLES", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSampleBounds { .. }));
        let err = Config::load_with(env(&[
            ("ROLLCALL_MIN_USABLE_SAMPLES", "6"),
            ("ROLLCALL_MAX_ENROLLMENT_IMAGES", "5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSampleBounds { min: 6, max: 5 }));
        let err = Config::load_with(env(&[("ROLLCALL_TOP_K", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTopK));
    }

    #[test]
    fn test_toml_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(
            &path,
            r#"
model_family = "legacy"
recognition_threshold = 0.55

[index]
kind = "memory"
"#,
        )
        .unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let config = Config::load_with(env(&[("ROLLCALL_CONFIG", path_str.as_str())])).unwrap();
        assert_eq!(config.model_family, ModelFamily::Legacy);
        assert_eq!(config.recognition_threshold, 0.55);
        assert_eq!(config.index, IndexConfig::Memory { path: None });
        assert_eq!(config.top_k, 5);

        let config = Config::load_with(env(&[
            ("ROLLCALL_CONFIG", path_str.as_str()),
            ("ROLLCALL_RECOGNITION_THRESHOLD", "0.7"),
        ]))
        .unwrap();
        assert_eq!(config.recognition_threshold, 0.7);
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::load_with(env(&[("ROLLCALL_CONFIG", "/nonexistent/rollcall.toml")])).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
