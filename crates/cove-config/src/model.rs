use crate::ConfigError;
use cove_core::PatchMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: u32,
    pub profile_name: String,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Web client origin; the login page lives at `{entry_url}/login`.
    pub entry_url: String,
    /// Backend origin whose `/api/...` responses are intercepted.
    pub entry_api_url: String,
}

impl ProviderConfig {
    pub fn api_origin(&self) -> Result<Url, ConfigError> {
        Ok(Url::parse(&self.entry_api_url)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub quiet_interval_ms: u64,
    /// Force-close a batch at this many events. Unset means batches only
    /// close on a quiet interval, so a steady stream never closes one.
    pub max_batch_events: Option<usize>,
    pub patch_mode: PatchMode,
    /// SQLite database holding the entity store, relative to the data dir.
    pub database_file: String,
}

impl SyncConfig {
    pub fn quiet_interval(&self) -> Duration {
        Duration::from_millis(self.quiet_interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            quiet_interval_ms: 1_500,
            max_batch_events: None,
            patch_mode: PatchMode::Incremental,
            database_file: "entities.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub logged_in_poll_interval_ms: u64,
    pub page_type_poll_interval_ms: u64,
}

impl NotificationConfig {
    pub fn logged_in_poll_interval(&self) -> Duration {
        Duration::from_millis(self.logged_in_poll_interval_ms)
    }

    pub fn page_type_poll_interval(&self) -> Duration {
        Duration::from_millis(self.page_type_poll_interval_ms)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            logged_in_poll_interval_ms: 1_000,
            page_type_poll_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub clear_storage_timeout_ms: u64,
    pub keychain_service: String,
}

impl SessionConfig {
    pub fn clear_storage_timeout(&self) -> Duration {
        Duration::from_millis(self.clear_storage_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            clear_storage_timeout_ms: 3_000,
            keychain_service: "io.covemail.bridge".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            profile_name: "default".to_string(),
            provider: ProviderConfig {
                entry_url: "https://mail.protonmail.com".to_string(),
                entry_api_url: "https://mail.protonmail.com".to_string(),
            },
            sync: SyncConfig::default(),
            notifications: NotificationConfig::default(),
            session: SessionConfig::default(),
        }
    }
}
