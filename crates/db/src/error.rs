#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("shared store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error accessing deployment state: {0}")]
    Io(#[from] std::io::Error),
    #[error("deployment state file is corrupted beyond recovery: {0}")]
    Corrupted(String),
    #[error("refused to write an empty deployments map over a non-empty state file")]
    RefusedEmptyOverwrite,
    #[error("unknown deployment id: {0}")]
    NotFound(String),
    #[error("deployment state file is empty, cannot update status for {0}")]
    EmptyOnUpdate(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
