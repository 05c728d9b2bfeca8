use crate::browser::CookieJar;
use anyhow::Context;
use cove_config::{AppConfig, ConfigManager};
use cove_core::SessionKey;
use cove_email::EmailService;
use cove_security::{KeychainSessionStore, SessionService};
use cove_storage::EntityStore;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

const COOKIE_JAR_FILE: &str = "cookies.json";

pub struct AppState {
    pub(crate) config_manager: ConfigManager,
    pub(crate) config: RwLock<AppConfig>,
    pub(crate) store: Arc<EntityStore>,
    pub(crate) email: EmailService,
    pub(crate) browser: Arc<CookieJar>,
    pub(crate) sessions: SessionService,
}

impl AppState {
    pub async fn initialize(home: Option<&Path>) -> anyhow::Result<Self> {
        let config_manager = match home {
            Some(home) => ConfigManager::in_dir(home),
            None => ConfigManager::new(),
        }
        .context("initialize config manager")?;
        let config = config_manager.load().context("load app config")?;

        let database_path = config_manager.data_dir().join(&config.sync.database_file);
        let store = Arc::new(
            EntityStore::open(&database_path)
                .await
                .context("open entity store")?,
        );
        let email = EmailService::new(store.clone(), config.sync.patch_mode);

        let browser = Arc::new(CookieJar::new(config_manager.data_dir().join(COOKIE_JAR_FILE)));
        let sessions = SessionService::new(
            Arc::new(KeychainSessionStore::new(config.session.keychain_service.clone())),
            browser.clone(),
        )
        .with_clear_storage_timeout(config.session.clear_storage_timeout());

        tracing::info!(
            profile = %config.profile_name,
            entry_url = %config.provider.entry_url,
            patch_mode = ?config.sync.patch_mode,
            "bridge state initialized"
        );

        Ok(Self {
            config_manager,
            config: RwLock::new(config),
            store,
            email,
            browser,
            sessions,
        })
    }

    pub async fn config(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    pub async fn session_key(&self, login: &str) -> anyhow::Result<SessionKey> {
        let api_endpoint_origin = self
            .config()
            .await
            .provider
            .api_origin()
            .context("parse provider api url")?;
        Ok(SessionKey {
            login: login.to_string(),
            api_endpoint_origin,
        })
    }
}
