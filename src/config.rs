use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::adapters::llm::ModelConfig;
use crate::core::diff_engine::{DiffLimits, DEFAULT_MAX_CHARS, DEFAULT_MAX_LINES};
use crate::core::interpret::{default_sentinel_tokens, InterpreterConfig};

const CONFIG_FILE_NAMES: &[&str] = &[".codegrade.yml", ".codegrade.yaml"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    pub system_prompt: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,

    /// Cap on the rendered diff sent in one prompt.
    #[serde(default = "default_max_diff_chars")]
    pub max_diff_chars: usize,

    #[serde(default = "default_diff_context_lines")]
    pub diff_context_lines: usize,

    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,

    #[serde(default = "default_max_file_lines")]
    pub max_file_lines: usize,

    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Files past this count in one commit are skipped.
    #[serde(default = "default_max_files_per_commit")]
    pub max_files_per_commit: usize,

    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default = "default_sentinel_tokens")]
    pub sentinel_tokens: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
            api_key: None,
            base_url: None,
            max_diff_chars: default_max_diff_chars(),
            diff_context_lines: default_diff_context_lines(),
            max_file_chars: default_max_file_chars(),
            max_file_lines: default_max_file_lines(),
            exclude_patterns: Vec::new(),
            max_parallel: default_max_parallel(),
            max_files_per_commit: default_max_files_per_commit(),
            store_path: default_store_path(),
            sentinel_tokens: default_sentinel_tokens(),
        }
    }
}

impl Config {
    /// `.codegrade.yml` or `.codegrade.yaml` in the working directory, then
    /// `~/.codegrade.yml`, then defaults.
    pub fn load() -> Result<Self> {
        for name in CONFIG_FILE_NAMES {
            let path = PathBuf::from(name);
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(CONFIG_FILE_NAMES[0]);
            if home_config.exists() {
                return Self::load_from_path(&home_config);
            }
        }

        debug!("No config file found, using defaults");
        Ok(Config::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.normalize();
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn merge_with_cli(
        &mut self,
        cli_model: Option<String>,
        cli_temperature: Option<f32>,
        cli_max_tokens: Option<usize>,
    ) {
        if let Some(model) = cli_model {
            self.model = model;
        }
        if let Some(temperature) = cli_temperature {
            self.temperature = temperature;
        }
        if let Some(max_tokens) = cli_max_tokens {
            self.max_tokens = max_tokens;
        }
        self.normalize();
    }

    fn normalize(&mut self) {
        if !(0.0..=2.0).contains(&self.temperature) {
            warn!("Temperature {} out of range, clamping to [0, 2]", self.temperature);
            self.temperature = self.temperature.clamp(0.0, 2.0);
        }
        self.max_parallel = self.max_parallel.max(1);
        self.max_files_per_commit = self.max_files_per_commit.max(1);
        self.max_file_lines = self.max_file_lines.max(1);
        self.max_file_chars = self.max_file_chars.max(1);
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            model_name: self.model.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn diff_limits(&self) -> DiffLimits {
        DiffLimits {
            max_chars: self.max_file_chars,
            max_lines: self.max_file_lines,
        }
    }

    pub fn interpreter_config(&self) -> InterpreterConfig {
        InterpreterConfig {
            sentinel_tokens: self.sentinel_tokens.clone(),
        }
    }

    /// Whether `path` matches one of `exclude_patterns`. Invalid patterns
    /// are logged and ignored.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_patterns
            .iter()
            .any(|pattern| match glob::Pattern::new(pattern) {
                Ok(pattern) => pattern.matches(path),
                Err(e) => {
                    warn!("Ignoring invalid exclude pattern '{}': {}", pattern, e);
                    false
                }
            })
    }
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> usize {
    4000
}

fn default_max_diff_chars() -> usize {
    40_000
}

fn default_diff_context_lines() -> usize {
    3
}

fn default_max_file_chars() -> usize {
    DEFAULT_MAX_CHARS
}

fn default_max_file_lines() -> usize {
    DEFAULT_MAX_LINES
}

fn default_max_parallel() -> usize {
    4
}

fn default_max_files_per_commit() -> usize {
    50
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".codegrade/analyses")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".codegrade.yml");
        std::fs::write(
            &path,
            "model: claude-3-5-sonnet-20241022\nmax_parallel: 0\nexclude_patterns:\n  - \"**/*.lock\"\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.model, "claude-3-5-sonnet-20241022");
        assert_eq!(config.max_parallel, 1);
        assert_eq!(config.max_file_lines, 1_000);
        assert_eq!(config.diff_context_lines, 3);
        assert_eq!(config.sentinel_tokens, default_sentinel_tokens());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yml");
        std::fs::write(&path, "temperature: [not a number").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn cli_values_override_and_clamp() {
        let mut config = Config::default();
        config.merge_with_cli(Some("ollama:llama3".to_string()), Some(3.5), Some(512));
        assert_eq!(config.model, "ollama:llama3");
        assert_eq!(config.temperature, 2.0);
        assert_eq!(config.max_tokens, 512);

        let model = config.model_config();
        assert_eq!(model.model_name, "ollama:llama3");
        assert_eq!(model.max_tokens, 512);
    }

    #[test]
    fn exclude_patterns_use_globs() {
        let config = Config {
            exclude_patterns: vec!["**/*.lock".to_string(), "docs/*".to_string(), "[".to_string()],
            ..Config::default()
        };
        assert!(config.is_excluded("Cargo.lock"));
        assert!(config.is_excluded("web/package.lock"));
        assert!(config.is_excluded("docs/index.md"));
        assert!(!config.is_excluded("src/main.rs"));
    }

    #[test]
    fn builds_engine_settings() {
        let config = Config {
            max_file_chars: 10,
            max_file_lines: 2,
            sentinel_tokens: vec!["<END>".to_string()],
            ..Config::default()
        };
        assert_eq!(config.diff_limits(), DiffLimits { max_chars: 10, max_lines: 2 });
        assert_eq!(config.interpreter_config().sentinel_tokens, vec!["<END>".to_string()]);
    }
}
