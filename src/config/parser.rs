//! Topology parser for loading topology files.
//!
//! This module handles loading the topology from YAML files and environment
//! variables, with proper precedence and error handling. Script sources
//! referenced by provisioning steps are read here so the fingerprint sees
//! their content.

use crate::error::{ConfigError, ForgeError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::TopologyConfig;

/// Default build root directory name.
pub const DEFAULT_BUILD_ROOT: &str = ".rangeforge";

/// Parser for loading topology files.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new topology parser.
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

    /// Loads a topology from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a
    /// script source it references cannot be read.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<TopologyConfig> {
        let path = path.as_ref();
        info!("Loading topology from: {}", path.display());

        if !path.exists() {
            return Err(ForgeError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ForgeError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;
        self.resolve_scripts(&mut config)?;
        Ok(config)
    }

    /// Parses a topology from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<TopologyConfig> {
        debug!("Parsing YAML topology");

        let config: TopologyConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ForgeError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed topology for environment: {}", config.environment.id);
        Ok(config)
    }

    /// Loads a topology with environment variable overrides.
    ///
    /// Recognized variables: `RANGEFORGE_BUILD_ROOT`, `RANGEFORGE_WORKERS`
    /// and `RANGEFORGE_TEAM_COUNT`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or an override is not
    /// a valid number.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<TopologyConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Applies environment variable overrides to the topology.
    fn apply_env_overrides(config: &mut TopologyConfig) -> Result<()> {
        if let Ok(root) = std::env::var("RANGEFORGE_BUILD_ROOT") {
            debug!("Overriding settings.build_root from environment");
            config.settings.build_root = Some(root);
        }

        if let Ok(workers) = std::env::var("RANGEFORGE_WORKERS") {
            debug!("Overriding settings.workers from environment");
            config.settings.workers = parse_env_number("RANGEFORGE_WORKERS", &workers)?;
        }

        if let Ok(count) = std::env::var("RANGEFORGE_TEAM_COUNT") {
            debug!("Overriding environment.team_count from environment");
            config.environment.team_count = parse_env_number("RANGEFORGE_TEAM_COUNT", &count)?;
        }

        Ok(())
    }

    /// Reads script bodies for steps that only name a source file.
    fn resolve_scripts(&self, config: &mut TopologyConfig) -> Result<()> {
        let base = self.base_path.clone().unwrap_or_else(|| PathBuf::from("."));

        for network in &mut config.networks {
            for host in &mut network.hosts {
                for step in &mut host.steps {
                    let Some(script) = step.script.as_mut() else {
                        continue;
                    };
                    if !script.content.is_empty() || script.source.is_empty() {
                        continue;
                    }

                    let path = base.join(&script.source);
                    debug!("Reading script source: {}", path.display());
                    script.content = std::fs::read_to_string(&path).map_err(|e| {
                        ForgeError::Config(ConfigError::ParseError {
                            message: format!("Failed to read script {}: {e}", script.source),
                            location: Some(format!(
                                "networks.{}.hosts.{}.steps.{}",
                                network.name, host.name, step.step
                            )),
                        })
                    })?;
                }
            }
        }

        Ok(())
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
                ForgeError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Resolves the build root for a topology loaded from `config_file`.
    ///
    /// Relative roots are anchored next to the topology file.
    #[must_use]
    pub fn build_root(config: &TopologyConfig, config_file: &Path) -> PathBuf {
        let anchor = config_file.parent().unwrap_or_else(|| Path::new("."));
        config.settings.build_root.as_ref().map_or_else(
            || anchor.join(DEFAULT_BUILD_ROOT),
            |root| {
                let root = PathBuf::from(root);
                if root.is_absolute() { root } else { anchor.join(root) }
            },
        )
    }
}

fn parse_env_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ForgeError::Config(ConfigError::InvalidEnvVar {
            name: name.to_string(),
            value: value.to_string(),
        })
    })
}

/// Default topology file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["rangeforge.yaml", "rangeforge.yml"];

/// Finds the topology file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no topology file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found topology file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ForgeError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_topology() {
        let yaml = r"
environment:
  id: practice
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).expect("minimal topology parses");

        assert_eq!(config.environment.id, "practice");
        assert_eq!(config.environment.team_count, 1);
        assert_eq!(config.settings.workers, 4);
        assert!(config.networks.is_empty());
    }

    #[test]
    fn test_parse_full_topology() {
        let yaml = r#"
environment:
  id: regionals
  name: Regional Qualifier
  team_count: 3
  vars:
    season: fall
settings:
  workers: 8
  platform: windows
  retry:
    max_attempts: 5
  hooks:
    host:
      apply: "./hooks/host.sh"
      destroy: "./hooks/host.sh --destroy"
competition:
  id: cptc
  dns:
    type: route53
    root_domain: range.local
  records:
    - name: scoreboard
      zone: range.local
      values: ["10.0.0.5"]
remote_states:
  - id: main
    type: s3
    config:
      bucket: tfstate
networks:
  - name: corp
    cidr: 10.0.1.0/24
    hosts:
      - name: dc01
        os: w2k16
        last_octet: 10
        connections:
          - name: mgmt
            protocol: winrm
            port: 5986
        dns:
          - name: dc
            zone: corp.local
            values: ["10.0.1.10"]
        steps:
          - step: 1
            script:
              content: "Install-WindowsFeature AD-Domain-Services"
              interpreter: powershell
          - step: 2
            command:
              program: shutdown
              args: ["/r", "/t", "0"]
"#;
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).expect("full topology parses");

        assert_eq!(config.environment.team_count, 3);
        assert_eq!(config.settings.workers, 8);
        assert_eq!(config.settings.retry.max_attempts, 5);
        assert_eq!(config.settings.retry.initial_backoff_ms, 500);
        assert!(config.settings.hooks.contains_key("host"));
        assert_eq!(config.networks[0].hosts[0].steps.len(), 2);
        assert_eq!(config.total_hosts(), 3);
    }

    #[test]
    fn test_script_sources_are_resolved() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("setup.sh"), "echo hello\n").expect("write script");
        std::fs::write(
            dir.path().join("rangeforge.yaml"),
            r"
environment:
  id: practice
networks:
  - name: corp
    cidr: 10.0.1.0/24
    hosts:
      - name: web
        os: ubuntu
        last_octet: 20
        steps:
          - step: 1
            script:
              source: setup.sh
",
        )
        .expect("write topology");

        let parser = ConfigParser::new().with_base_path(dir.path());
        let config = parser
            .load_file(dir.path().join("rangeforge.yaml"))
            .expect("topology loads");

        let script = config.networks[0].hosts[0].steps[0]
            .script
            .as_ref()
            .expect("script payload");
        assert_eq!(script.content, "echo hello\n");
    }

    #[test]
    fn test_build_root_is_anchored_to_topology_file() {
        let parser = ConfigParser::new();
        let mut config = parser
            .parse_yaml("environment:\n  id: practice\n", None)
            .expect("parses");
        let file = Path::new("/srv/ranges/rangeforge.yaml");

        assert_eq!(
            ConfigParser::build_root(&config, file),
            PathBuf::from("/srv/ranges/.rangeforge")
        );

        config.settings.build_root = Some(String::from("out"));
        assert_eq!(
            ConfigParser::build_root(&config, file),
            PathBuf::from("/srv/ranges/out")
        );
    }

    #[test]
    fn test_find_config_file_missing() {
        let dir = TempDir::new().expect("temp dir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join("rangeforge.yml"), "environment:\n  id: x\n")
            .expect("write");

        let found = find_config_file(&nested).expect("found in parent");
        assert_eq!(found, dir.path().join("rangeforge.yml"));
    }
}
