// Carbon Configuration
// Optional `carbon.json` next to the script

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "carbon.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum depth of nested scripted calls
    pub max_call_depth: usize,
    pub warnings_as_errors: bool,
    pub print_warnings: bool,
    /// Default tracing filter when CARBON_LOG is unset
    pub log_level: String,
    /// Extra directories searched by `import`
    pub import_paths: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_call_depth: 1000,
            warnings_as_errors: false,
            print_warnings: true,
            log_level: "warn".to_string(),
            import_paths: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Config, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// `carbon.json` in `dir` if present, defaults otherwise
    pub fn discover(dir: &Path) -> Result<Config, ConfigError> {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = Config::from_json(r#"{ "max_call_depth": 64 }"#).unwrap();
        assert_eq!(config.max_call_depth, 64);
        assert!(config.print_warnings);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_invalid_json() {
        assert!(Config::from_json("{ max_call_depth: }").is_err());
    }

    #[test]
    fn test_discover_without_file() {
        let dir = std::env::temp_dir().join("carbon-config-test-empty");
        let _ = std::fs::create_dir_all(&dir);
        let _ = std::fs::remove_file(dir.join(CONFIG_FILE));
        assert_eq!(Config::discover(&dir).unwrap(), Config::default());
    }
}
