use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("malformed provider event: {0}")]
    MalformedEvent(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Storage(#[from] cove_storage::StorageError),
}
