//! Engine configuration (`<root>/config.toml`)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Overrides the root directory
pub const ROOT_ENV: &str = "WORKSHED_ROOT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot find home directory; set {ROOT_ENV}")]
    NoHome,
    #[error("Failed to read config: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

/// Configuration loaded from config.toml, plus the resolved root directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkshedConfig {
    #[serde(skip)]
    pub root: PathBuf,
    #[serde(default)]
    pub exec: ExecSection,
    #[serde(default)]
    pub clone: CloneSection,
    #[serde(default)]
    pub handles: HandleSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecSection {
    #[serde(default)]
    pub parallel: bool,
    /// Default deadline for a whole exec batch; 0 disables it
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
}

impl Default for ExecSection {
    fn default() -> Self {
        Self {
            parallel: false,
            timeout_secs: 0,
            max_output_bytes: default_max_output(),
        }
    }
}

fn default_max_output() -> usize {
    10000
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CloneSection {
    pub depth: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleSection {
    #[serde(default = "default_words")]
    pub words: u8,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for HandleSection {
    fn default() -> Self {
        Self {
            words: default_words(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_words() -> u8 {
    3
}

fn default_max_attempts() -> u32 {
    10
}

impl WorkshedConfig {
    /// Default configuration rooted at `root`, without reading config.toml
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exec: ExecSection::default(),
            clone: CloneSection::default(),
            handles: HandleSection::default(),
        }
    }

    /// Resolve the root directory: `$WORKSHED_ROOT`, else `~/.workshed`
    pub fn default_root() -> Result<PathBuf, ConfigError> {
        if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(root));
        }
        dirs::home_dir()
            .map(|home| home.join(".workshed"))
            .ok_or(ConfigError::NoHome)
    }

    /// Load config from the default root
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&Self::default_root()?)
    }

    /// Load `<root>/config.toml`; a missing file yields defaults
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let config_path = root.join("config.toml");
        if !config_path.exists() {
            return Ok(Self::with_root(root));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let mut config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.root = root.to_path_buf();
        Ok(config)
    }

    /// Directory holding one subdirectory per workspace
    pub fn workspaces_dir(&self) -> PathBuf {
        self.root.join("workspaces")
    }

    pub fn exec_timeout(&self) -> Option<Duration> {
        match self.exec.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = WorkshedConfig::with_root("/tmp/ws");
        assert_eq!(config.handles.words, 3);
        assert_eq!(config.exec.max_output_bytes, 10000);
        assert!(config.exec_timeout().is_none());
        assert_eq!(config.workspaces_dir(), PathBuf::from("/tmp/ws/workspaces"));
    }

    #[test]
    fn test_parse_config() {
        let temp = TempDir::new().unwrap();
        let toml_str = r#"
[exec]
parallel = true
timeout_secs = 30

[clone]
depth = 1

[handles]
words = 2
"#;
        fs::write(temp.path().join("config.toml"), toml_str).unwrap();
        let config = WorkshedConfig::load(temp.path()).unwrap();
        assert_eq!(config.root, temp.path());
        assert!(config.exec.parallel);
        assert_eq!(config.exec_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.exec.max_output_bytes, 10000);
        assert_eq!(config.clone.depth, Some(1));
        assert_eq!(config.handles.words, 2);
        assert_eq!(config.handles.max_attempts, 10);
    }

    #[test]
    fn test_missing_config_is_default() {
        let temp = TempDir::new().unwrap();
        let config = WorkshedConfig::load(temp.path()).unwrap();
        assert!(!config.exec.parallel);
        assert!(config.clone.depth.is_none());
    }
}
