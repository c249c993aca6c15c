pub mod config_cmd;
pub mod init;
pub mod pricing;
pub mod run;

use std::path::{Path, PathBuf};

use clap::Args;
use stepwise_config::{AgentHome, AppConfig, ConfigError, ConfigSource, select_config};

/// Where to find the configuration of a run.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Profile name under .stepwise/configs/ (falls back to safe mode if missing)
    #[arg(short, long, conflicts_with = "config")]
    pub profile: Option<String>,

    /// Config file path or name
    #[arg(short, long)]
    pub config: Option<String>,

    /// Project directory holding the .stepwise/ agent home
    #[arg(short, long, default_value = ".")]
    pub workdir: PathBuf,
}

impl ConfigArgs {
    pub fn home(&self) -> AgentHome {
        let workdir = self
            .workdir
            .canonicalize()
            .unwrap_or_else(|_| self.workdir.clone());
        AgentHome::new(workdir)
    }

    /// Load `configs/.env`, pick the config source, load it and fill
    /// omitted values from the environment.
    pub fn load(&self, home: &AgentHome) -> Result<(AppConfig, ConfigSource), ConfigError> {
        home.load_env()?;

        let config_dir = std::env::var_os("STEPWISE_CONFIG_DIR").map(PathBuf::from);
        let source = select_config(
            self.config.as_deref(),
            self.profile.as_deref(),
            home,
            config_dir.as_deref(),
        )?;

        let mut config = source.load()?;
        config.apply_env()?;
        Ok((config, source))
    }
}

/// Human-readable name of a config source.
pub fn describe(source: &ConfigSource) -> String {
    match source {
        ConfigSource::File(path) => display(path),
        ConfigSource::SafeMode => "safe mode defaults".into(),
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
