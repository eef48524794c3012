use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("bson encoding: {0}")]
    BsonSer(#[from] mongodb::bson::ser::Error),

    #[error("bson decoding: {0}")]
    BsonDe(#[from] mongodb::bson::de::Error),

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },
}

impl RepositoryError {
    pub fn not_found(entity_type: &str, id: &str) -> Self {
        Self::NotFound { entity_type: entity_type.to_string(), id: id.to_string() }
    }

    /// Duplicate-key inserts are how idempotent creates signal "already
    /// applied"; callers treat them as success.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            RepositoryError::Database(err) => {
                matches!(
                    err.kind.as_ref(),
                    mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(
                        write_error,
                    )) if write_error.code == 11000
                )
            },
            _ => false,
        }
    }
}
