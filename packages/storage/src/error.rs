use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("invalid stored value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
