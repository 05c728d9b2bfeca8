use async_trait::async_trait;
use cove_core::Cookie;
use cove_security::{BrowserSession, SecurityError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Per-login cookies reported by the host page, kept in a JSON file so that
/// `session save` and `session apply` work across runs.
pub struct CookieJar {
    path: PathBuf,
    lock: Mutex<()>,
}

type Jar = BTreeMap<String, Vec<Cookie>>;

impl CookieJar {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Jar, SecurityError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Jar::new()),
            Err(err) => Err(SecurityError::Browser(format!(
                "read {}: {err}",
                self.path.display()
            ))),
        }
    }

    async fn store(&self, jar: &Jar) -> Result<(), SecurityError> {
        let bytes = serde_json::to_vec_pretty(jar)?;
        tokio::fs::write(&self.path, bytes).await.map_err(|err| {
            SecurityError::Browser(format!("write {}: {err}", self.path.display()))
        })
    }
}

#[async_trait]
impl BrowserSession for CookieJar {
    async fn cookies(&self, login: &str) -> Result<Vec<Cookie>, SecurityError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(login).unwrap_or_default())
    }

    async fn set_cookie(&self, login: &str, url: &str, cookie: Cookie) -> Result<(), SecurityError> {
        let _guard = self.lock.lock().await;
        let mut jar = self.load().await?;
        let cookies = jar.entry(login.to_string()).or_default();
        cookies.retain(|existing| existing.name != cookie.name || existing.path != cookie.path);
        tracing::debug!(login, url, name = %cookie.name, "cookie set");
        cookies.push(cookie);
        self.store(&jar).await
    }

    async fn clear_storage_data(&self, login: &str) -> Result<(), SecurityError> {
        let _guard = self.lock.lock().await;
        let mut jar = self.load().await?;
        if jar.remove(login).is_some() {
            self.store(&jar).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, value: &str) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: None,
            path: "/api/".to_string(),
            secure: true,
            http_only: true,
            expiration_date: None,
        }
    }

    #[tokio::test]
    async fn cookies_are_scoped_per_login_and_replaced_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jar = CookieJar::new(dir.path().join("cookies.json"));

        jar.set_cookie("alice", "https://api.test/api/", cookie("AUTH-1", "a"))
            .await
            .expect("set");
        jar.set_cookie("alice", "https://api.test/api/", cookie("AUTH-1", "b"))
            .await
            .expect("set");
        jar.set_cookie("bob", "https://api.test/api/", cookie("AUTH-2", "c"))
            .await
            .expect("set");

        let alice = jar.cookies("alice").await.expect("cookies");
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].value, "b");

        jar.clear_storage_data("alice").await.expect("clear");
        assert!(jar.cookies("alice").await.expect("cookies").is_empty());
        assert_eq!(jar.cookies("bob").await.expect("cookies").len(), 1);
    }
}
