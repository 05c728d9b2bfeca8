use crate::{AppConfig, ConfigError};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

const ORG: &str = "io";
const AUTHOR: &str = "CoveMail";
const APP: &str = "CoveBridge";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
    data_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from(ORG, AUTHOR, APP).ok_or(ConfigError::MissingDirectories)?;
        Self::with_dirs(dirs.config_dir(), dirs.data_dir())
    }

    /// Lays the config out under one root: `config.toml` and `data/`.
    pub fn in_dir(root: &Path) -> Result<Self, ConfigError> {
        Self::with_dirs(root, &root.join("data"))
    }

    fn with_dirs(config_dir: &Path, data_dir: &Path) -> Result<Self, ConfigError> {
        fs::create_dir_all(config_dir)?;
        fs::create_dir_all(data_dir)?;

        let config_path = config_dir.join("config.toml");
        if !config_path.exists() {
            let initial = AppConfig::default();
            let content = toml::to_string_pretty(&initial)?;
            fs::write(&config_path, content)?;
            tracing::info!(path = %config_path.display(), "wrote default config");
        }

        Ok(Self {
            config_path,
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let content = fs::read_to_string(&self.config_path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.provider.api_origin()?;
        Ok(config)
    }

    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content)?;
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::ConfigManager;
    use cove_core::PatchMode;

    #[test]
    fn writes_defaults_on_first_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = ConfigManager::in_dir(dir.path()).expect("manager");

        assert!(manager.config_path().exists());
        let config = manager.load().expect("load");
        assert_eq!(config.sync.quiet_interval_ms, 1_500);
        assert_eq!(config.sync.max_batch_events, None);
        assert_eq!(config.sync.patch_mode, PatchMode::Incremental);
    }

    #[test]
    fn save_round_trips_edits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = ConfigManager::in_dir(dir.path()).expect("manager");

        let mut config = manager.load().expect("load");
        config.sync.max_batch_events = Some(200);
        config.session.clear_storage_timeout_ms = 500;
        manager.save(&config).expect("save");

        let reloaded = manager.load().expect("reload");
        assert_eq!(reloaded.sync.max_batch_events, Some(200));
        assert_eq!(reloaded.session.clear_storage_timeout_ms, 500);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = ConfigManager::in_dir(dir.path()).expect("manager");
        std::fs::write(
            manager.config_path(),
            r#"
version = 1
profile_name = "work"

[provider]
entry_url = "https://mail.example.com"
entry_api_url = "https://api.example.com"
"#,
        )
        .expect("write");

        let config = manager.load().expect("load");
        assert_eq!(config.profile_name, "work");
        assert_eq!(config.notifications.page_type_poll_interval_ms, 1_000);
        assert_eq!(config.session.clear_storage_timeout_ms, 3_000);
    }

    #[test]
    fn rejects_unparseable_api_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = ConfigManager::in_dir(dir.path()).expect("manager");
        let mut config = manager.load().expect("load");
        config.provider.entry_api_url = "not a url".to_string();
        manager.save(&config).expect("save");

        assert!(manager.load().is_err());
    }
}
