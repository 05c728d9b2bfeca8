use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("keychain error: {0}")]
    Keychain(#[from] keyring::Error),
    #[error("session record error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(
        "refusing to save more than one session cookie set \
         (access tokens: {access}, refresh tokens: {refresh})"
    )]
    AmbiguousSession { access: usize, refresh: usize },
    #[error("session clearing did not finish in {0}ms")]
    Timeout(u64),
    #[error("browser session error: {0}")]
    Browser(String),
}
