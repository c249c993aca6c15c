//! The per-project agent home and profile resolution.
//!
//! Everything the agent writes lives under `<workdir>/.stepwise/`:
//! profiles in `configs/`, trajectories in `data/`, logs in `logs/`.

use std::path::{Path, PathBuf};

use crate::{AppConfig, ConfigError};

/// Name of the agent home directory inside the working directory.
pub const AGENT_DIR_NAME: &str = ".stepwise";

const DEFAULT_GITIGNORE: &str = "# Stepwise agent files
# Keep configs/ under version control, ignore data and logs

data/
logs/
*.log
";

/// Paths of the agent home for one working directory.
#[derive(Debug, Clone)]
pub struct AgentHome {
    workdir: PathBuf,
    root: PathBuf,
}

impl AgentHome {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        let workdir = workdir.into();
        let root = workdir.join(AGENT_DIR_NAME);
        Self { workdir, root }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.root.join("configs")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// `configs/.env`, loaded before configuration is resolved.
    pub fn env_file(&self) -> PathBuf {
        self.configs_dir().join(".env")
    }

    /// Default trajectory location.
    pub fn last_run_path(&self) -> PathBuf {
        self.data_dir().join("last_run.traj.json")
    }

    /// Create the directory tree, the `live` profile and a `.gitignore`.
    ///
    /// Existing files are never overwritten. Returns `true` if a file was
    /// created.
    pub fn initialize(&self) -> Result<bool, ConfigError> {
        let home_err = |e: std::io::Error| ConfigError::HomeError {
            path: self.root.clone(),
            reason: e.to_string(),
        };

        for dir in [self.configs_dir(), self.data_dir(), self.logs_dir()] {
            std::fs::create_dir_all(&dir).map_err(home_err)?;
        }

        let mut created = false;

        let live = self.configs_dir().join("live.toml");
        if !live.exists() {
            std::fs::write(&live, AppConfig::default_toml()).map_err(home_err)?;
            created = true;
        }

        let gitignore = self.root.join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, DEFAULT_GITIGNORE).map_err(home_err)?;
            created = true;
        }

        if created {
            tracing::info!(path = %self.root.display(), "Initialized agent home");
        }
        Ok(created)
    }

    /// Load `configs/.env` into the process environment.
    ///
    /// Variables already set in the environment win. Returns whether the
    /// file existed.
    pub fn load_env(&self) -> Result<bool, ConfigError> {
        let path = self.env_file();
        if !path.is_file() {
            return Ok(false);
        }
        dotenvy::from_path(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "Loaded environment file");
        Ok(true)
    }
}

/// Locate a config file by name or path.
///
/// `.toml` is appended when missing. Candidates, in order: the path as
/// given, `<home>/configs/<name>`, then `<config_dir>/<spec>` where
/// `config_dir` is usually `$STEPWISE_CONFIG_DIR`.
pub fn resolve_config_path(
    spec: &str,
    home: &AgentHome,
    config_dir: Option<&Path>,
) -> Result<PathBuf, ConfigError> {
    let mut spec_path = PathBuf::from(spec);
    if spec_path.extension().and_then(|e| e.to_str()) != Some("toml") {
        spec_path.as_mut_os_string().push(".toml");
    }

    let mut candidates = vec![spec_path.clone()];
    if let Some(name) = spec_path.file_name() {
        candidates.push(home.configs_dir().join(name));
    }
    candidates.push(config_dir.unwrap_or(Path::new(".")).join(&spec_path));

    match candidates.iter().find(|c| c.is_file()) {
        Some(found) => Ok(found.canonicalize().unwrap_or_else(|_| found.clone())),
        None => Err(ConfigError::NotFound {
            spec: spec_path.display().to_string(),
            searched: candidates,
        }),
    }
}

/// Where the run's configuration comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    SafeMode,
}

impl ConfigSource {
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        match self {
            Self::File(path) => AppConfig::load_from(path),
            Self::SafeMode => Ok(AppConfig::safe_mode()),
        }
    }
}

/// Pick the configuration for a run.
///
/// An explicit `--config` that cannot be found is an error. A missing
/// `--profile` falls back to safe mode with a warning. With neither, the
/// `default` profile is used when present, else safe mode.
pub fn select_config(
    config: Option<&str>,
    profile: Option<&str>,
    home: &AgentHome,
    config_dir: Option<&Path>,
) -> Result<ConfigSource, ConfigError> {
    if let Some(spec) = config {
        return resolve_config_path(spec, home, config_dir).map(ConfigSource::File);
    }

    if let Some(name) = profile {
        return Ok(match resolve_config_path(name, home, config_dir) {
            Ok(path) => ConfigSource::File(path),
            Err(_) => {
                tracing::warn!(profile = name, "Profile not found, using safe mode defaults");
                ConfigSource::SafeMode
            }
        });
    }

    Ok(resolve_config_path("default", home, config_dir)
        .map(ConfigSource::File)
        .unwrap_or(ConfigSource::SafeMode))
}
