use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("webhook signature: {0}")]
    WebhookSignature(String),

    #[error("provider: {0}")]
    Provider(String),

    #[error("provider: not found: {0}")]
    ProviderNotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("access denied")]
    AccessDenied,

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("unknown product: {0}")]
    UnknownProduct(String),

    #[error("config: {0}")]
    Config(String),
}

impl PipelineError {
    /// Failures that may succeed if the same work is attempted later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Provider(_) | Self::Timeout(_)
        )
    }

    /// Bad or incomplete data on the provider side. Retrying cannot help.
    pub fn is_data_integrity(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UnknownProduct(_))
    }
}
