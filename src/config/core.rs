use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::{Deserialize, Serialize};

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

const ENV_PREFIX: &str = "ISOCMD_";

/// Typed view of the merged configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsoConfig {
    pub engine: EngineConfig,
    pub search: SearchConfig,
    pub convert: ConvertConfig,
    pub transfer: TransferConfig,
    pub mount: MountConfig,
    pub database: DatabaseConfig,
}

/// Batch execution knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 0 means no explicit limit
    pub max_threads: usize,
    /// Share of logical CPUs used when deriving the worker count
    pub thread_percentage: u8,
    pub max_chunk_size: usize,
    pub progress_interval_ms: u64,
    pub show_progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_threads: 0,
            thread_percentage: 100,
            max_chunk_size: crate::engine::DEFAULT_MAX_CHUNK_SIZE,
            progress_interval_ms: 100,
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// File extensions treated as images, without the dot
    pub extensions: Vec<String>,
    pub follow_links: bool,
    /// 0 means unlimited
    pub max_depth: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["iso".to_string()],
            follow_links: false,
            max_depth: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    pub extensions: Vec<String>,
    /// Sectors written between two cancellation checks
    pub cancel_poll_sectors: u64,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            extensions: ["bin", "img", "mdf", "nrg"].iter().map(|e| e.to_string()).collect(),
            cancel_poll_sectors: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub buffer_size_kb: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self { buffer_size_kb: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub base_dir: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            base_dir: "/mnt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Empty selects the per-user default location
    pub path: String,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        if self.path.is_empty() {
            PathBuf::from(home_dir()).join(".local/share/isocmd/iso_database.txt")
        } else {
            PathBuf::from(&self.path)
        }
    }
}

/// Explicit command-line overrides, applied after extraction
#[derive(Debug, Clone, Copy, Default)]
pub struct CliOverrides {
    pub threads: Option<usize>,
    pub no_progress: bool,
}

impl IsoConfig {
    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(threads) = overrides.threads {
            tracing::debug!("CLI override: engine.max_threads = {}", threads);
            self.engine.max_threads = threads;
        }
        if overrides.no_progress {
            self.engine.show_progress = false;
        }
    }
}

/// The layered configuration sources and their merged result
pub struct ConfigStack {
    figment: Figment,
    files: Vec<PathBuf>,
}

impl ConfigStack {
    pub fn load(custom_config: Option<&str>) -> Result<Self> {
        Self::load_with_env(custom_config, ENV_PREFIX)
    }

    fn load_with_env(custom_config: Option<&str>, env_prefix: &str) -> Result<Self> {
        tracing::trace!("CONFIG LOAD: Starting");

        let user_base = Self::user_config_base_path();
        let mut files = vec![
            user_base.with_extension("toml"),
            user_base.with_extension("json"),
            user_base.with_extension("yaml"),
            PathBuf::from("isocmd.toml"),
        ];

        let mut figment = Figment::new()
            .merge(Toml::string(DEFAULT_CONFIG))                  // 1. Defaults (lowest)
            .merge(Toml::file(&files[0]))                         // 2. User config
            .merge(Json::file(&files[1]))
            .merge(Yaml::file(&files[2]))
            .merge(Toml::file(&files[3]));                        // 3. Working directory

        if let Some(path) = custom_config {                       // 4. Explicit file
            let path = Path::new(path);
            if !path.is_file() {
                bail!("Config file not found: {}", path.display());
            }
            let path = path
                .canonicalize()
                .with_context(|| format!("Failed to resolve config file: {}", path.display()))?;
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => figment.merge(Json::file(&path)),
                Some("yaml") | Some("yml") => figment.merge(Yaml::file(&path)),
                _ => figment.merge(Toml::file(&path)),
            };
            files.push(path);
        }

        let figment = figment.merge(Env::prefixed(env_prefix).split("__")); // 5. Environment

        Ok(ConfigStack { figment, files })
    }

    /// Extract the typed configuration
    pub fn extract(&self) -> Result<IsoConfig> {
        self.figment
            .extract()
            .context("Invalid configuration")
    }

    /// Get the full merged configuration as a structured value
    pub fn get_full_config(&self) -> Result<serde_json::Value> {
        Ok(self.figment.extract()?)
    }

    /// Files consulted, lowest priority first
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn user_config_base_path() -> PathBuf {
        PathBuf::from(home_dir()).join(".config/isocmd/config")
    }
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| "~".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_loads_defaults() {
        let stack = ConfigStack::load_with_env(None, "ISOCMD_TEST_DEFAULTS_").unwrap();
        let config = stack.extract().unwrap();
        assert_eq!(config.engine.max_chunk_size, 5);
        assert_eq!(config.engine.progress_interval_ms, 100);
        assert_eq!(config.convert.cancel_poll_sectors, 1024);
        assert!(config.convert.extensions.contains(&"nrg".to_string()));
        assert_eq!(config.search.extensions, vec!["iso".to_string()]);
    }

    #[test]
    fn test_embedded_defaults_match_struct_defaults() {
        let config: IsoConfig = Figment::new()
            .merge(Toml::string(DEFAULT_CONFIG))
            .extract()
            .unwrap();
        assert_eq!(config, IsoConfig::default());
    }

    #[test]
    fn test_custom_config_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[engine]\nmax_chunk_size = 9\n\n[mount]\nbase_dir = \"/tmp/iso\"").unwrap();

        let path = file.path().to_str().unwrap();
        let stack = ConfigStack::load_with_env(Some(path), "ISOCMD_TEST_CUSTOM_").unwrap();
        let config = stack.extract().unwrap();
        assert_eq!(config.engine.max_chunk_size, 9);
        assert_eq!(config.mount.base_dir, "/tmp/iso");
        assert_eq!(config.engine.progress_interval_ms, 100);
        assert!(stack.files().iter().any(|f| f.ends_with(file.path().file_name().unwrap())));
    }

    #[test]
    fn test_custom_json_config() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"transfer": {{"buffer_size_kb": 64}}}}"#).unwrap();

        let path = file.path().to_str().unwrap();
        let config = ConfigStack::load_with_env(Some(path), "ISOCMD_TEST_JSON_")
            .unwrap()
            .extract()
            .unwrap();
        assert_eq!(config.transfer.buffer_size_kb, 64);
    }

    #[test]
    fn test_missing_custom_config_is_an_error() {
        let result = ConfigStack::load_with_env(Some("definitely/not/here.toml"), "ISOCMD_TEST_MISSING_");
        assert!(result.is_err());
    }

    #[test]
    fn test_environment_overrides_files() {
        unsafe {
            std::env::set_var("ISOCMD_TEST_ENV_ENGINE__MAX_THREADS", "3");
        }
        let config = ConfigStack::load_with_env(None, "ISOCMD_TEST_ENV_")
            .unwrap()
            .extract()
            .unwrap();
        assert_eq!(config.engine.max_threads, 3);
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = IsoConfig::default();
        config.apply_overrides(&CliOverrides {
            threads: Some(2),
            no_progress: true,
        });
        assert_eq!(config.engine.max_threads, 2);
        assert!(!config.engine.show_progress);

        let mut untouched = IsoConfig::default();
        untouched.apply_overrides(&CliOverrides::default());
        assert_eq!(untouched, IsoConfig::default());
    }

    #[test]
    fn test_database_path_resolution() {
        let custom = DatabaseConfig {
            path: "/var/lib/isos.txt".to_string(),
        };
        assert_eq!(custom.resolved_path(), PathBuf::from("/var/lib/isos.txt"));
        assert!(
            DatabaseConfig::default()
                .resolved_path()
                .ends_with(".local/share/isocmd/iso_database.txt")
        );
    }
}
