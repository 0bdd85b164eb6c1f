//! Configuration parser for loading the deployment catalog.
//!
//! This module handles loading the catalog from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, DeployError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::DeployConfig;

/// Configuration parser for loading deployment catalogs.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading catalog from: {}", path.display());

        if !path.exists() {
            return Err(DeployError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;
        self.resolve_paths(&mut config);
        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        debug!("Parsing YAML catalog");

        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            DeployError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed catalog for {} with {} entries",
            config.app.name,
            config.catalog.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `APPDEPLOY_<SECTION>_<KEY>` (e.g., `APPDEPLOY_APP_VERSION`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut DeployConfig) {
        if let Ok(name) = std::env::var("APPDEPLOY_APP_NAME") {
            debug!("Overriding app.name from environment");
            config.app.name = name;
        }

        if let Ok(version) = std::env::var("APPDEPLOY_APP_VERSION") {
            debug!("Overriding app.version from environment");
            config.app.version = Some(version);
        }

        if let Ok(path) = std::env::var("APPDEPLOY_STATE_PATH") {
            debug!("Overriding state.path from environment");
            config.state.path = Some(PathBuf::from(path));
        }
    }

    /// Resolves artifact paths relative to the files directory.
    fn resolve_paths(&self, config: &mut DeployConfig) {
        let Some(base) = &self.base_path else {
            return;
        };

        let files_dir = config
            .app
            .files_dir
            .as_ref()
            .map_or_else(|| base.clone(), |dir| join_relative(base, dir));

        for entry in &mut config.catalog {
            if let Some(installer) = &entry.installer {
                entry.installer = Some(join_relative(&files_dir, installer));
            }
            if let Some(transform) = &entry.transform {
                entry.transform = Some(join_relative(&files_dir, transform));
            }
            for patch in &mut entry.patches {
                *patch = join_relative(&files_dir, patch);
            }
        }

        config.app.files_dir = Some(files_dir);
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                DeployError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

fn join_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["appdeploy.yaml", "appdeploy.yml", "deploy.yaml"];

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found catalog file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(DeployError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClosureModeKind, PackageAction};

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
app:
  name: acme-suite
catalog: []
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).unwrap();

        assert_eq!(config.app.name, "acme-suite");
        assert!(config.catalog.is_empty());
        assert_eq!(config.session.max_deferrals, 3);
        assert_eq!(config.session.closure.mode, ClosureModeKind::Countdown);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
app:
  name: acme-suite
  vendor: Acme
  version: "5.2"
  files_dir: Files

session:
  blocking_processes: [acme.exe, acmehelper.exe]
  closure:
    mode: close_immediate
  allow_defer: true
  max_deferrals: 2
  benign_codes: [1641]
  required_disk_space_mb: 500

catalog:
  - product_key: "{AAAA-0001}"
    action: uninstall
    display_name: Acme Suite 4.0
    detect_path: C:\Program Files\Acme\4.0\acme.exe
  - product_key: "{AAAA-0002}"
    action: uninstall
    enabled: false
  - product_key: "{BBBB-0001}"
    action: install
    installer: acme-5.2.msi
    transform: acme.mst
"#;
        let parser = ConfigParser::new().with_base_path("/deploy");
        let mut config = parser.parse_yaml(yaml, None).unwrap();
        parser.resolve_paths(&mut config);

        assert_eq!(config.catalog.len(), 3);
        assert_eq!(config.count_action(PackageAction::Uninstall), 2);
        assert_eq!(config.enabled_entries().count(), 2);
        assert_eq!(
            config.catalog[2].installer.as_deref(),
            Some(Path::new("/deploy/Files/acme-5.2.msi"))
        );
        assert_eq!(config.session.benign_codes, vec![1641]);
    }

    #[test]
    fn test_parse_rejects_unknown_action() {
        let yaml = r#"
app:
  name: acme-suite
catalog:
  - product_key: "{AAAA-0001}"
    action: repair
"#;
        let result = ConfigParser::new().parse_yaml(yaml, None);
        assert!(matches!(
            result,
            Err(DeployError::Config(ConfigError::ParseError { .. }))
        ));
    }

    #[test]
    fn test_find_config_file_in_parent() {
        let temp = tempfile::TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join("appdeploy.yaml"), "app: {name: x}\n").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, temp.path().join("appdeploy.yaml"));
    }
}
