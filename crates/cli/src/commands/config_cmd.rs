//! `stepwise config`: show the effective configuration.

use super::{ConfigArgs, describe};

/// Print the configuration a run would use, secrets redacted.
pub async fn show(args: ConfigArgs) -> Result<(), Box<dyn std::error::Error>> {
    let home = args.home();
    let (config, source) = args.load(&home)?;
    config.validate()?;

    println!("# Source: {}", describe(&source));
    if !config.has_api_key() {
        println!("# No API key configured; provider keys are read from <PROVIDER>_API_KEY");
    }
    println!("{}", config.to_redacted_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_config::ConfigSource;

    #[test]
    fn safe_mode_without_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let args = ConfigArgs {
            profile: Some("missing".into()),
            config: None,
            workdir: dir.path().to_path_buf(),
        };
        let (config, source) = args.load(&args.home()).unwrap();
        assert_eq!(source, ConfigSource::SafeMode);
        assert_eq!(config.agent.step_limit, 20);
        assert_eq!(describe(&source), "safe mode defaults");
    }

    #[test]
    fn initialized_home_provides_live_profile() {
        let dir = tempfile::tempdir().unwrap();
        let args = ConfigArgs {
            profile: Some("live".into()),
            config: None,
            workdir: dir.path().to_path_buf(),
        };
        let home = args.home();
        home.initialize().unwrap();

        let (config, source) = args.load(&home).unwrap();
        assert!(matches!(source, ConfigSource::File(ref p) if p.ends_with("live.toml")));
        assert_eq!(config.agent.step_limit, 50);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = ConfigArgs {
            profile: None,
            config: Some("nowhere".into()),
            workdir: dir.path().to_path_buf(),
        };
        let err = args.load(&args.home()).unwrap_err();
        assert!(err.to_string().contains("nowhere.toml"));
    }
}
