use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid response pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("email error: {0}")]
    Email(#[from] cove_email::EmailError),
    #[error("notification task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
