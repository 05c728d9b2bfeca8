//! Saving and restoring the provider's backend session.
//!
//! The provider keeps its backend session in a pair of cookies: an access
//! token (`AUTH-*`) and a refresh token (`REFRESH-*`). A saved session is
//! only meaningful with exactly one of each.

use crate::SecurityError;
use async_trait::async_trait;
use cove_core::{ClientSession, Cookie, SavedSession, SavedWindow, SessionKey};
use std::sync::Arc;
use std::time::Duration;

const ACCESS_TOKEN_PREFIX: &str = "AUTH-";
const REFRESH_TOKEN_PREFIX: &str = "REFRESH-";

pub const DEFAULT_CLEAR_STORAGE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Persistence for saved sessions.
pub trait SessionStore: Send + Sync {
    fn get_session(&self, key: &SessionKey) -> Result<Option<SavedSession>, SecurityError>;

    fn save_session(&self, session: &SavedSession) -> Result<(), SecurityError>;

    fn clear_session(&self, key: &SessionKey) -> Result<(), SecurityError>;
}

/// The browser-side session of one login.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn cookies(&self, login: &str) -> Result<Vec<Cookie>, SecurityError>;

    async fn set_cookie(&self, login: &str, url: &str, cookie: Cookie) -> Result<(), SecurityError>;

    async fn clear_storage_data(&self, login: &str) -> Result<(), SecurityError>;
}

struct TokenCookies<'a> {
    access: Vec<&'a Cookie>,
    refresh: Vec<&'a Cookie>,
}

fn token_cookies(cookies: &[Cookie]) -> TokenCookies<'_> {
    let has_prefix = |cookie: &Cookie, prefix: &str| {
        cookie
            .name
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    };

    TokenCookies {
        access: cookies
            .iter()
            .filter(|cookie| has_prefix(cookie, ACCESS_TOKEN_PREFIX))
            .collect(),
        refresh: cookies
            .iter()
            .filter(|cookie| has_prefix(cookie, REFRESH_TOKEN_PREFIX))
            .collect(),
    }
}

/// Only the attributes that are re-applied to a fresh browser session.
fn cookie_to_apply(cookie: &Cookie) -> Cookie {
    Cookie {
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain: None,
        path: cookie.path.clone(),
        secure: cookie.secure,
        http_only: cookie.http_only,
        expiration_date: None,
    }
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    browser: Arc<dyn BrowserSession>,
    clear_storage_timeout: Duration,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>, browser: Arc<dyn BrowserSession>) -> Self {
        Self {
            store,
            browser,
            clear_storage_timeout: DEFAULT_CLEAR_STORAGE_TIMEOUT,
        }
    }

    pub fn with_clear_storage_timeout(mut self, timeout: Duration) -> Self {
        self.clear_storage_timeout = timeout;
        self
    }

    /// The client-side half of a saved session. Records without a window
    /// name cannot be restored and resolve to `None`.
    pub fn resolve_saved_client_session(
        &self,
        key: &SessionKey,
    ) -> Result<Option<ClientSession>, SecurityError> {
        let Some(saved) = self.store.get_session(key)? else {
            return Ok(None);
        };

        match saved.window.name {
            Some(window_name) if !window_name.is_empty() => Ok(Some(ClientSession {
                session_storage: saved.session_storage,
                window_name,
            })),
            _ => Ok(None),
        }
    }

    pub async fn save_session(
        &self,
        key: &SessionKey,
        client_session: ClientSession,
    ) -> Result<(), SecurityError> {
        let cookies = self.browser.cookies(&key.login).await?;

        let tokens = token_cookies(&cookies);
        if tokens.access.len() > 1 || tokens.refresh.len() > 1 {
            return Err(SecurityError::AmbiguousSession {
                access: tokens.access.len(),
                refresh: tokens.refresh.len(),
            });
        }

        let saved = SavedSession {
            login: key.login.clone(),
            api_endpoint_origin: key.api_endpoint_origin.clone(),
            cookies,
            session_storage: client_session.session_storage,
            window: SavedWindow {
                name: Some(client_session.window_name),
            },
        };
        self.store.save_session(&saved)?;

        tracing::info!(login = %key.login, cookies = saved.cookies.len(), "session saved");
        Ok(())
    }

    pub fn reset_saved_session(&self, key: &SessionKey) -> Result<(), SecurityError> {
        self.store.clear_session(key)?;
        tracing::info!(login = %key.login, "saved session cleared");
        Ok(())
    }

    /// Resets the browser session, then restores the saved token cookies.
    /// Returns `false` when there is no saved session or it lacks either
    /// token cookie.
    pub async fn apply_saved_backend_session(&self, key: &SessionKey) -> Result<bool, SecurityError> {
        let saved = self.store.get_session(key)?;

        self.reset_backend_session(&key.login).await?;

        let Some(saved) = saved else {
            return Ok(false);
        };

        let tokens = token_cookies(&saved.cookies);
        let (Some(access), Some(refresh)) = (tokens.access.last(), tokens.refresh.last()) else {
            tracing::debug!(login = %key.login, "saved session has no token cookie pair");
            return Ok(false);
        };

        let origin = key.api_endpoint_origin.origin().ascii_serialization();
        for cookie in [access, refresh] {
            let url = format!("{origin}{}", cookie.path);
            self.browser
                .set_cookie(&key.login, &url, cookie_to_apply(cookie))
                .await?;
        }

        tracing::info!(login = %key.login, "backend session restored");
        Ok(true)
    }

    pub async fn reset_backend_session(&self, login: &str) -> Result<(), SecurityError> {
        match tokio::time::timeout(
            self.clear_storage_timeout,
            self.browser.clear_storage_data(login),
        )
        .await
        {
            Ok(cleared) => cleared,
            Err(_) => Err(SecurityError::Timeout(
                self.clear_storage_timeout.as_millis() as u64,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;
    use url::Url;

    #[derive(Default)]
    struct MemoryStore {
        sessions: Mutex<HashMap<String, SavedSession>>,
    }

    impl SessionStore for MemoryStore {
        fn get_session(&self, key: &SessionKey) -> Result<Option<SavedSession>, SecurityError> {
            Ok(self.sessions.lock().expect("lock").get(&key.as_username()).cloned())
        }

        fn save_session(&self, session: &SavedSession) -> Result<(), SecurityError> {
            let key = SessionKey {
                login: session.login.clone(),
                api_endpoint_origin: session.api_endpoint_origin.clone(),
            };
            self.sessions
                .lock()
                .expect("lock")
                .insert(key.as_username(), session.clone());
            Ok(())
        }

        fn clear_session(&self, key: &SessionKey) -> Result<(), SecurityError> {
            self.sessions.lock().expect("lock").remove(&key.as_username());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeBrowser {
        cookies: Mutex<Vec<Cookie>>,
        applied: Mutex<Vec<(String, Cookie)>>,
        clears: Mutex<usize>,
        hang_on_clear: bool,
    }

    #[async_trait]
    impl BrowserSession for FakeBrowser {
        async fn cookies(&self, _login: &str) -> Result<Vec<Cookie>, SecurityError> {
            Ok(self.cookies.lock().expect("lock").clone())
        }

        async fn set_cookie(&self, _login: &str, url: &str, cookie: Cookie) -> Result<(), SecurityError> {
            self.applied.lock().expect("lock").push((url.to_string(), cookie));
            Ok(())
        }

        async fn clear_storage_data(&self, _login: &str) -> Result<(), SecurityError> {
            if self.hang_on_clear {
                std::future::pending::<()>().await;
            }
            *self.clears.lock().expect("lock") += 1;
            self.cookies.lock().expect("lock").clear();
            Ok(())
        }
    }

    fn key() -> SessionKey {
        SessionKey {
            login: "alice".to_string(),
            api_endpoint_origin: Url::parse("https://api.example.com/").expect("url"),
        }
    }

    fn cookie(name: &str, value: &str, path: &str) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: Some("api.example.com".to_string()),
            path: path.to_string(),
            secure: true,
            http_only: true,
            expiration_date: Some(1.0e10),
        }
    }

    fn client_session(window_name: &str) -> ClientSession {
        ClientSession {
            session_storage: BTreeMap::from([("ui".to_string(), "state".to_string())]),
            window_name: window_name.to_string(),
        }
    }

    fn service(browser: FakeBrowser) -> (SessionService, Arc<MemoryStore>, Arc<FakeBrowser>) {
        let store = Arc::new(MemoryStore::default());
        let browser = Arc::new(browser);
        let service = SessionService::new(store.clone(), browser.clone());
        (service, store, browser)
    }

    fn browser_with(cookies: Vec<Cookie>) -> FakeBrowser {
        FakeBrowser {
            cookies: Mutex::new(cookies),
            ..FakeBrowser::default()
        }
    }

    #[tokio::test]
    async fn save_then_resolve_client_session() {
        let (service, _, _) = service(browser_with(vec![
            cookie("AUTH-1", "a", "/api/"),
            cookie("REFRESH-1", "r", "/api/auth/refresh"),
            cookie("Session-Id", "s", "/"),
        ]));

        service
            .save_session(&key(), client_session("win-1"))
            .await
            .expect("save");

        let resolved = service
            .resolve_saved_client_session(&key())
            .expect("resolve")
            .expect("saved");
        assert_eq!(resolved, client_session("win-1"));
    }

    #[tokio::test]
    async fn empty_window_name_is_not_restorable() {
        let (service, _, _) = service(FakeBrowser::default());
        service
            .save_session(&key(), client_session(""))
            .await
            .expect("save");

        assert_eq!(service.resolve_saved_client_session(&key()).expect("resolve"), None);
    }

    #[tokio::test]
    async fn ambiguous_token_cookies_are_refused() {
        let (service, store, _) = service(browser_with(vec![
            cookie("AUTH-1", "a", "/api/"),
            cookie("auth-2", "b", "/api/"),
            cookie("REFRESH-1", "r", "/api/"),
        ]));

        let err = service
            .save_session(&key(), client_session("win"))
            .await
            .expect_err("refused");

        assert!(matches!(
            err,
            SecurityError::AmbiguousSession {
                access: 2,
                refresh: 1
            }
        ));
        assert!(store.get_session(&key()).expect("get").is_none());
    }

    #[tokio::test]
    async fn apply_restores_last_token_pair_after_reset() {
        let (service, store, browser) = service(FakeBrowser::default());
        store
            .save_session(&SavedSession {
                login: "alice".to_string(),
                api_endpoint_origin: key().api_endpoint_origin,
                cookies: vec![
                    cookie("AUTH-old", "a0", "/api/"),
                    cookie("AUTH-new", "a1", "/api/"),
                    cookie("REFRESH-x", "r", "/api/auth/refresh"),
                    cookie("Other", "o", "/"),
                ],
                session_storage: BTreeMap::new(),
                window: SavedWindow::default(),
            })
            .expect("seed");

        assert!(service.apply_saved_backend_session(&key()).await.expect("apply"));

        assert_eq!(*browser.clears.lock().expect("lock"), 1);
        let applied = browser.applied.lock().expect("lock").clone();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].0, "https://api.example.com/api/");
        assert_eq!(applied[0].1.name, "AUTH-new");
        assert_eq!(applied[0].1.domain, None);
        assert_eq!(applied[0].1.expiration_date, None);
        assert!(applied[0].1.http_only);
        assert_eq!(applied[1].0, "https://api.example.com/api/auth/refresh");
        assert_eq!(applied[1].1.value, "r");
    }

    #[tokio::test]
    async fn apply_without_token_pair_still_resets() {
        let (service, store, browser) = service(FakeBrowser::default());

        assert!(!service.apply_saved_backend_session(&key()).await.expect("apply"));
        assert_eq!(*browser.clears.lock().expect("lock"), 1);

        store
            .save_session(&SavedSession {
                login: "alice".to_string(),
                api_endpoint_origin: key().api_endpoint_origin,
                cookies: vec![cookie("AUTH-1", "a", "/api/")],
                session_storage: BTreeMap::new(),
                window: SavedWindow::default(),
            })
            .expect("seed");
        assert!(!service.apply_saved_backend_session(&key()).await.expect("apply"));
        assert!(browser.applied.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn reset_saved_session_forgets_record() {
        let (service, _, _) = service(FakeBrowser::default());
        service
            .save_session(&key(), client_session("win"))
            .await
            .expect("save");

        service.reset_saved_session(&key()).expect("reset");

        assert_eq!(service.resolve_saved_client_session(&key()).expect("resolve"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_clear_times_out() {
        let (service, _, _) = service(FakeBrowser {
            hang_on_clear: true,
            ..FakeBrowser::default()
        });

        let err = service
            .reset_backend_session("alice")
            .await
            .expect_err("timeout");

        assert!(matches!(err, SecurityError::Timeout(3000)));
    }
}
