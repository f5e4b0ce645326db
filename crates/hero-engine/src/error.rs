use hero_contracts::catalog::{CatalogError, CategoryId};
use hero_contracts::media::StoreError;
use thiserror::Error;

/// Failure classes reported by the pipeline entrypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotFound,
    Provider,
    Persistence,
    Catalog,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Provider => "provider",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Catalog => "catalog",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("image generation client is not configured (missing API key)")]
    NotConfigured,

    #[error("image generation was cancelled")]
    Cancelled,

    #[error("image generation failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("generated image payload could not be decoded: {0}")]
    Decode(String),

    #[error("failed to write generated image {file_name}: {source}")]
    Write {
        file_name: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to assign {file_name} to category {category_id}: {source}")]
    CategoryUpdate {
        file_name: String,
        category_id: CategoryId,
        #[source]
        source: CatalogError,
    },
}

#[derive(Debug, Error)]
pub enum HeroError {
    #[error("Module is disabled in configuration.")]
    Disabled,

    #[error("OpenAI API key is not configured.")]
    MissingApiKey,

    #[error("Category with ID {0} not found.")]
    CategoryNotFound(CategoryId),

    #[error("No products with images found in category {0}.")]
    NoProducts(CategoryId),

    #[error("Failed to generate image: {0}")]
    Generation(#[from] GenerationError),

    #[error("Failed to save category image: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

impl HeroError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeroError::Disabled | HeroError::MissingApiKey => ErrorKind::Configuration,
            HeroError::CategoryNotFound(_) | HeroError::NoProducts(_) => ErrorKind::NotFound,
            HeroError::Generation(GenerationError::NotConfigured) => ErrorKind::Configuration,
            HeroError::Generation(GenerationError::Cancelled) => ErrorKind::Cancelled,
            HeroError::Generation(GenerationError::Failed(_)) => ErrorKind::Provider,
            HeroError::Persistence(_) => ErrorKind::Persistence,
            HeroError::Catalog(_) => ErrorKind::Catalog,
        }
    }
}
